//! Minimal W3C WebDriver client (chromedriver, geckodriver) over reqwest.
//!
//! Only the commands the driver needs are implemented. Session material
//! is the browser's cookie jar serialized as a JSON array.

use async_trait::async_trait;
use reelforge_core::config::DriverConfig;
use reelforge_core::error::{ForgeError, Result};
use reelforge_core::traits::{BrowserLauncher, BrowserSession, ElementHandle, ElementQuery};
use serde_json::{Value, json};
use std::path::Path;
use tokio::sync::Mutex;

/// Key under which W3C WebDriver returns element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a6c3-00bb0e4ff3bf";

pub struct WebDriverLauncher {
    endpoint: String,
    headless: bool,
    client: reqwest::Client,
}

impl WebDriverLauncher {
    pub fn new(endpoint: &str, headless: bool) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            headless,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(&config.webdriver_url, config.headless)
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage", "--window-size=1280,900"];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, credentials: Option<&str>) -> Result<Box<dyn BrowserSession>> {
        let url = format!("{}/session", self.endpoint);
        let resp = self
            .client
            .post(&url)
            .json(&self.capabilities())
            .send()
            .await
            .map_err(|e| ForgeError::TransientAutomation(format!("webdriver unreachable ({url}): {e}")))?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ForgeError::TransientAutomation(format!("webdriver new session: {e}")))?;
        check_error(&body)?;
        let session_id = body["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| ForgeError::TransientAutomation("webdriver returned no sessionId".into()))?
            .to_string();

        let cookies = match credentials {
            Some(blob) => match serde_json::from_str::<Vec<Value>>(blob) {
                Ok(list) => Some(list),
                Err(e) => {
                    tracing::warn!("⚠️ Ignoring unreadable session material: {e}");
                    None
                }
            },
            None => None,
        };

        let session = WebDriverSession {
            base: format!("{}/session/{}", self.endpoint, session_id),
            client: self.client.clone(),
            pending_cookies: Mutex::new(cookies),
        };
        session
            .command(
                reqwest::Method::POST,
                "/timeouts",
                Some(json!({ "implicit": 10_000, "pageLoad": 60_000, "script": 30_000 })),
            )
            .await?;
        tracing::debug!("🌐 WebDriver session {session_id} opened");
        Ok(Box::new(session))
    }
}

pub struct WebDriverSession {
    base: String,
    client: reqwest::Client,
    /// Cookies are restored after the first navigation, since WebDriver
    /// only accepts cookies for the current document's domain.
    pending_cookies: Mutex<Option<Vec<Value>>>,
}

/// `Err` for a WebDriver error payload.
fn check_error(body: &Value) -> Result<()> {
    if let Some(error) = body["value"]["error"].as_str() {
        let message = body["value"]["message"].as_str().unwrap_or("");
        return Err(ForgeError::TransientAutomation(format!("{error}: {message}")));
    }
    Ok(())
}

fn element_id(value: &Value) -> Option<String> {
    value[ELEMENT_KEY].as_str().map(str::to_string)
}

impl WebDriverSession {
    async fn raw(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ForgeError::TransientAutomation(format!("webdriver {path}: {e}")))?;
        resp.json()
            .await
            .map_err(|e| ForgeError::TransientAutomation(format!("webdriver {path}: {e}")))
    }

    async fn command(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value> {
        let body = self.raw(method, path, body).await?;
        check_error(&body)?;
        Ok(body["value"].clone())
    }

    async fn restore_cookies(&self) -> Result<bool> {
        let Some(cookies) = self.pending_cookies.lock().await.take() else {
            return Ok(false);
        };
        for cookie in cookies {
            if let Err(e) = self
                .command(reqwest::Method::POST, "/cookie", Some(json!({ "cookie": cookie })))
                .await
            {
                tracing::debug!("cookie rejected: {e}");
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn goto(&self, url: &str) -> Result<()> {
        self.command(reqwest::Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        if self.restore_cookies().await? {
            self.command(reqwest::Method::POST, "/refresh", Some(json!({})))
                .await?;
        }
        Ok(())
    }

    async fn find(&self, query: &ElementQuery) -> Result<Option<ElementHandle>> {
        let body = self
            .raw(
                reqwest::Method::POST,
                "/element",
                Some(json!({ "using": query.strategy.webdriver_name(), "value": query.value })),
            )
            .await?;
        if body["value"]["error"].as_str() == Some("no such element") {
            return Ok(None);
        }
        check_error(&body)?;
        Ok(element_id(&body["value"]).map(ElementHandle))
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.command(
            reqwest::Method::POST,
            &format!("/element/{}/click", element.0),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()> {
        // Rich text boxes sometimes refuse clear; typing still works.
        let _ = self
            .command(
                reqwest::Method::POST,
                &format!("/element/{}/clear", element.0),
                Some(json!({})),
            )
            .await;
        self.command(
            reqwest::Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    async fn upload_file(&self, element: &ElementHandle, path: &Path) -> Result<()> {
        let absolute = std::fs::canonicalize(path)
            .map_err(|e| ForgeError::TransientAutomation(format!("upload {}: {e}", path.display())))?;
        self.command(
            reqwest::Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": absolute.to_string_lossy() })),
        )
        .await?;
        Ok(())
    }

    async fn text(&self, element: &ElementHandle) -> Result<String> {
        let value = self
            .command(reqwest::Method::GET, &format!("/element/{}/text", element.0), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.command(reqwest::Method::GET, "/url", None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn export_credentials(&self) -> Result<Option<String>> {
        let value = self.command(reqwest::Method::GET, "/cookie", None).await?;
        match value.as_array() {
            Some(cookies) if !cookies.is_empty() => Ok(Some(value.to_string())),
            _ => Ok(None),
        }
    }

    async fn close(&self) -> Result<()> {
        self.raw(reqwest::Method::DELETE, "", None).await?;
        Ok(())
    }
}
