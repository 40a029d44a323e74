//! Trust policy for remotely sourced patch code.
//!
//! Patch code is identified by the SHA-256 digest of its exact bytes.
//! Digests listed in `driver.trusted_patch_digests` are trusted; anything
//! else either runs with a warning or is refused outright, depending on
//! `driver.require_trusted_patches`.

use reelforge_core::config::DriverConfig;
use reelforge_core::error::{ForgeError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Patch code larger than this is refused before it reaches a sandbox.
pub const MAX_PATCH_BYTES: usize = 64 * 1024;

/// Hex-encoded SHA-256 of `code`.
pub fn patch_digest(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone)]
pub struct PatchPolicy {
    trusted: HashSet<String>,
    require_trusted: bool,
    max_bytes: usize,
}

impl PatchPolicy {
    pub fn new(trusted: impl IntoIterator<Item = String>, require_trusted: bool) -> Self {
        Self {
            trusted: trusted.into_iter().map(|d| d.trim().to_lowercase()).collect(),
            require_trusted,
            max_bytes: MAX_PATCH_BYTES,
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(
            config.trusted_patch_digests.iter().cloned(),
            config.require_trusted_patches,
        )
    }

    /// Accept or refuse `code` for execution. Returns its digest.
    pub fn admit(&self, asset_id: &str, code: &str) -> Result<String> {
        if code.trim().is_empty() {
            return Err(ForgeError::Sandbox(format!("patch {asset_id} is empty")));
        }
        if code.len() > self.max_bytes {
            return Err(ForgeError::Sandbox(format!(
                "patch {asset_id} is {} bytes (limit {})",
                code.len(),
                self.max_bytes
            )));
        }
        let digest = patch_digest(code);
        if self.trusted.contains(&digest) {
            tracing::debug!("🔏 Patch {asset_id} trusted ({digest})");
            return Ok(digest);
        }
        if self.require_trusted {
            return Err(ForgeError::Sandbox(format!(
                "patch {asset_id} refused: digest {digest} is not trusted"
            )));
        }
        tracing::warn!("⚠️ Running untrusted patch {asset_id} (sha256 {digest})");
        Ok(digest)
    }
}

impl Default for PatchPolicy {
    fn default() -> Self {
        Self::new(Vec::new(), false)
    }
}
