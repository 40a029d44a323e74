//! Subprocess script sandbox backed by `deno`.
//!
//! The patch is written to a scratch file and run with
//! `deno run --no-prompt --allow-net=<hosts>`: network access only to the
//! allow-listed hosts, no file, env, or subprocess permissions. The script
//! must print the locator table document as JSON on stdout.

use async_trait::async_trait;
use reelforge_core::error::{ForgeError, Result};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use super::PatchSandbox;

const MAX_STDOUT_BYTES: usize = 256 * 1024;

pub struct ScriptSandbox {
    deno_bin: String,
    allowed_hosts: Vec<String>,
    timeout: Duration,
    work_dir: PathBuf,
}

impl ScriptSandbox {
    pub fn new(deno_bin: &str, allowed_hosts: Vec<String>, timeout: Duration, work_dir: PathBuf) -> Self {
        Self {
            deno_bin: deno_bin.to_string(),
            allowed_hosts,
            timeout,
            work_dir,
        }
    }

    /// Arguments passed to the interpreter for `script`.
    fn args(&self, script: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--quiet".to_string(),
            "--no-prompt".to_string(),
            "--no-config".to_string(),
        ];
        if !self.allowed_hosts.is_empty() {
            args.push(format!("--allow-net={}", self.allowed_hosts.join(",")));
        }
        args.push(script.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl PatchSandbox for ScriptSandbox {
    fn name(&self) -> &str {
        "script"
    }

    async fn evaluate(&self, code: &str) -> Result<serde_json::Value> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(|e| ForgeError::Sandbox(format!("create sandbox dir: {e}")))?;

        let file_name = format!("patch_{}.js", &uuid::Uuid::new_v4().to_string()[..8]);
        let script = self.work_dir.join(&file_name);
        tokio::fs::write(&script, code)
            .await
            .map_err(|e| ForgeError::Sandbox(format!("write patch file: {e}")))?;

        let run = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.deno_bin)
                .args(self.args(&script))
                .env_clear()
                .env("NO_COLOR", "1")
                .env("DENO_DIR", self.work_dir.join(".deno"))
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let _ = tokio::fs::remove_file(&script).await;

        let output = match run {
            Ok(Ok(o)) => o,
            Ok(Err(e)) => {
                return Err(ForgeError::Sandbox(format!(
                    "'{}' not found or not executable: {e}",
                    self.deno_bin
                )));
            }
            Err(_) => {
                return Err(ForgeError::Sandbox(format!(
                    "patch timed out after {}ms",
                    self.timeout.as_millis()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.chars().take(500).collect();
            return Err(ForgeError::Sandbox(format!(
                "patch exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        if output.stdout.len() > MAX_STDOUT_BYTES {
            return Err(ForgeError::Sandbox(format!(
                "patch wrote {} bytes to stdout",
                output.stdout.len()
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| ForgeError::Sandbox(format!("patch output is not JSON: {e}")))
    }
}
