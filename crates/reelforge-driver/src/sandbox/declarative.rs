//! In-process declarative patch interpreter.
//!
//! A patch is a JSON document. Either it *is* the locator table document,
//! or it is a small program:
//!
//! ```json
//! { "steps": [
//!     { "op": "url_join", "base": "https://cdn.example.com/", "path": "yt/v7.json", "as": "src" },
//!     { "op": "fetch_json", "url": "$src", "pointer": "/selectors" },
//!     { "op": "set", "role": "next_button", "locators": ["#next-v7"] }
//! ] }
//! ```
//!
//! The only capabilities are URL joining and GET requests that return JSON
//! from allow-listed hosts. There is no filesystem or process access.

use async_trait::async_trait;
use reelforge_core::error::{ForgeError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::{PatchSandbox, check_fetch_target};

const DEFAULT_MAX_STEPS: usize = 32;
const MAX_FETCH_BYTES: usize = 256 * 1024;

pub struct DeclarativeSandbox {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
    timeout: Duration,
    max_steps: usize,
}

impl DeclarativeSandbox {
    pub fn new(allowed_hosts: Vec<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            allowed_hosts,
            timeout,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    async fn run(&self, doc: Value) -> Result<Value> {
        let Some(steps) = doc.get("steps") else {
            return Ok(doc);
        };
        let steps = steps
            .as_array()
            .ok_or_else(|| ForgeError::Sandbox("'steps' must be an array".into()))?;
        if steps.len() > self.max_steps {
            return Err(ForgeError::Sandbox(format!(
                "patch has {} steps (limit {})",
                steps.len(),
                self.max_steps
            )));
        }

        let mut vars: HashMap<String, String> = HashMap::new();
        let mut out = Map::new();

        for (i, step) in steps.iter().enumerate() {
            let op = str_field(step, "op", i)?;
            match op {
                "set" => {
                    let role = str_field(step, "role", i)?;
                    let locators = step
                        .get("locators")
                        .cloned()
                        .ok_or_else(|| ForgeError::Sandbox(format!("step {i}: missing 'locators'")))?;
                    out.insert(role.to_string(), locators);
                }
                "url_join" => {
                    let base = resolve(str_field(step, "base", i)?, &vars, i)?;
                    let path = str_field(step, "path", i)?;
                    let name = str_field(step, "as", i)?;
                    let joined = url::Url::parse(&base)
                        .and_then(|b| b.join(path))
                        .map_err(|e| ForgeError::Sandbox(format!("step {i}: url_join: {e}")))?;
                    vars.insert(name.to_string(), joined.to_string());
                }
                "fetch_json" => {
                    let target = resolve(str_field(step, "url", i)?, &vars, i)?;
                    let fetched = self.fetch_json(&target).await?;
                    let selected = match step.get("pointer").and_then(|p| p.as_str()) {
                        Some(pointer) => fetched.pointer(pointer).cloned().ok_or_else(|| {
                            ForgeError::Sandbox(format!("step {i}: pointer '{pointer}' not found"))
                        })?,
                        None => fetched,
                    };
                    let Value::Object(map) = selected else {
                        return Err(ForgeError::Sandbox(format!(
                            "step {i}: fetched document is not an object"
                        )));
                    };
                    out.extend(map);
                }
                other => {
                    return Err(ForgeError::Sandbox(format!("step {i}: unknown op '{other}'")));
                }
            }
        }
        Ok(Value::Object(out))
    }

    async fn fetch_json(&self, raw: &str) -> Result<Value> {
        let target = check_fetch_target(raw, &self.allowed_hosts)?;
        let resp = self
            .client
            .get(target.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ForgeError::Sandbox(format!("fetch {target}: {e}")))?;
        if !resp.status().is_success() {
            return Err(ForgeError::Sandbox(format!(
                "fetch {target}: HTTP {}",
                resp.status()
            )));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| ForgeError::Sandbox(format!("fetch {target}: {e}")))?;
        if body.len() > MAX_FETCH_BYTES {
            return Err(ForgeError::Sandbox(format!(
                "fetch {target}: body is {} bytes",
                body.len()
            )));
        }
        serde_json::from_slice(&body)
            .map_err(|e| ForgeError::Sandbox(format!("fetch {target}: invalid JSON: {e}")))
    }
}

fn str_field<'a>(step: &'a Value, key: &str, i: usize) -> Result<&'a str> {
    step.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ForgeError::Sandbox(format!("step {i}: missing '{key}'")))
}

/// `$name` refers to a variable bound by an earlier `url_join`.
fn resolve(value: &str, vars: &HashMap<String, String>, i: usize) -> Result<String> {
    match value.strip_prefix('$') {
        Some(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| ForgeError::Sandbox(format!("step {i}: unbound variable '{name}'"))),
        None => Ok(value.to_string()),
    }
}

#[async_trait]
impl PatchSandbox for DeclarativeSandbox {
    fn name(&self) -> &str {
        "declarative"
    }

    async fn evaluate(&self, code: &str) -> Result<Value> {
        let doc: Value = serde_json::from_str(code)
            .map_err(|e| ForgeError::Sandbox(format!("patch is not valid JSON: {e}")))?;
        match tokio::time::timeout(self.timeout, self.run(doc)).await {
            Ok(result) => result,
            Err(_) => Err(ForgeError::Sandbox(format!(
                "patch timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sandbox(hosts: &[&str]) -> DeclarativeSandbox {
        DeclarativeSandbox::new(
            hosts.iter().map(|h| h.to_string()).collect(),
            Duration::from_millis(300),
        )
    }

    #[tokio::test]
    async fn test_plain_document_passes_through() {
        let out = sandbox(&[])
            .evaluate(r##"{"next_button": "#next-v2"}"##)
            .await
            .unwrap();
        assert_eq!(out, json!({"next_button": "#next-v2"}));
    }

    #[tokio::test]
    async fn test_set_and_url_join_steps() {
        let code = json!({"steps": [
            {"op": "url_join", "base": "https://cdn.example.com/a/", "path": "b.json", "as": "src"},
            {"op": "set", "role": "next_button", "locators": ["#n1", {"text": "Next"}]}
        ]})
        .to_string();
        let out = sandbox(&[]).evaluate(&code).await.unwrap();
        assert_eq!(out, json!({"next_button": ["#n1", {"text": "Next"}]}));
    }

    #[tokio::test]
    async fn test_faults_are_sandbox_errors() {
        let sb = sandbox(&["cdn.example.com"]);
        for code in [
            "module.exports = () => {}".to_string(),
            json!({"steps": "nope"}).to_string(),
            json!({"steps": [{"op": "exec", "cmd": "rm"}]}).to_string(),
            json!({"steps": [{"op": "fetch_json", "url": "https://evil.example.com/x"}]}).to_string(),
            json!({"steps": [{"op": "fetch_json", "url": "$unbound"}]}).to_string(),
            json!({"steps": [{"op": "set", "role": "x"}]}).to_string(),
        ] {
            let err = sb.evaluate(&code).await.unwrap_err();
            assert!(matches!(err, ForgeError::Sandbox(_)), "{code}: {err}");
        }
    }

    #[tokio::test]
    async fn test_step_budget() {
        let steps: Vec<Value> = (0..5)
            .map(|i| json!({"op": "set", "role": format!("r{i}"), "locators": ["#x"]}))
            .collect();
        let code = json!({ "steps": steps }).to_string();
        let sb = sandbox(&[]).with_max_steps(4);
        assert!(sb.evaluate(&code).await.is_err());
    }

    #[tokio::test]
    async fn test_hung_fetch_hits_timeout() {
        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });

        let code = json!({"steps": [
            {"op": "fetch_json", "url": format!("http://127.0.0.1:{}/p.json", addr.port())}
        ]})
        .to_string();
        let start = std::time::Instant::now();
        let err = sandbox(&["127.0.0.1"]).evaluate(&code).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
