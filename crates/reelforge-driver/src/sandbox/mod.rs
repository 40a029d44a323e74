//! Sandboxes that turn untrusted patch code into a locator table document.
//!
//! A sandbox only ever *produces* a JSON document. Parsing, shape checks
//! and installation of the resulting table happen in the driver, so a
//! misbehaving patch can at worst produce a document that gets rejected.

pub mod declarative;
pub mod script;

pub use declarative::DeclarativeSandbox;
pub use script::ScriptSandbox;

use async_trait::async_trait;
use reelforge_core::config::DriverConfig;
use reelforge_core::error::{ForgeError, Result};
use std::path::Path;
use std::sync::Arc;

/// Capability-restricted evaluator for patch code.
///
/// Implementations must enforce their own hard timeout and report every
/// fault as [`ForgeError::Sandbox`].
#[async_trait]
pub trait PatchSandbox: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate `code` and return the locator table document it yields.
    async fn evaluate(&self, code: &str) -> Result<serde_json::Value>;
}

/// Host part of `url` if it is an http(s) URL on the allow-list.
pub(crate) fn check_fetch_target(raw: &str, allowed_hosts: &[String]) -> Result<url::Url> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| ForgeError::Sandbox(format!("bad url '{raw}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ForgeError::Sandbox(format!(
            "scheme '{}' not allowed",
            parsed.scheme()
        )));
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| ForgeError::Sandbox(format!("url '{raw}' has no host")))?;
    if !allowed_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)) {
        return Err(ForgeError::Sandbox(format!("host '{host}' not allowed")));
    }
    Ok(parsed)
}

/// Build the sandbox named by `driver.sandbox`.
pub fn from_config(config: &DriverConfig, work_dir: &Path) -> Result<Arc<dyn PatchSandbox>> {
    let timeout = std::time::Duration::from_secs(config.sandbox_timeout_secs.max(1));
    match config.sandbox.as_str() {
        "declarative" => Ok(Arc::new(DeclarativeSandbox::new(
            config.allowed_fetch_hosts.clone(),
            timeout,
        ))),
        "script" => Ok(Arc::new(ScriptSandbox::new(
            &config.deno_bin,
            config.allowed_fetch_hosts.clone(),
            timeout,
            work_dir.join("patches"),
        ))),
        other => Err(ForgeError::Config(format!(
            "unknown driver.sandbox '{other}' (expected 'declarative' or 'script')"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_target_allow_list() {
        let hosts = vec!["cdn.example.com".to_string()];
        assert!(check_fetch_target("https://cdn.example.com/p.json", &hosts).is_ok());
        assert!(check_fetch_target("https://CDN.example.com/p.json", &hosts).is_ok());
        assert!(check_fetch_target("https://evil.example.com/p.json", &hosts).is_err());
        assert!(check_fetch_target("file:///etc/passwd", &hosts).is_err());
        assert!(check_fetch_target("not a url", &hosts).is_err());
        assert!(check_fetch_target("https://cdn.example.com/p.json", &[]).is_err());
    }

    #[test]
    fn test_from_config_kinds() {
        let mut config = DriverConfig::default();
        let dir = std::env::temp_dir();
        assert_eq!(from_config(&config, &dir).unwrap().name(), "declarative");
        config.sandbox = "script".into();
        assert_eq!(from_config(&config, &dir).unwrap().name(), "script");
        config.sandbox = "vm".into();
        assert!(matches!(from_config(&config, &dir), Err(ForgeError::Config(_))));
    }
}
