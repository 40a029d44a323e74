//! Browser session boundary used by the automation driver.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// How a concrete lookup expression is interpreted by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategy {
    Css,
    XPath,
    LinkText,
}

impl QueryStrategy {
    /// W3C WebDriver `using` value.
    pub fn webdriver_name(&self) -> &'static str {
        match self {
            QueryStrategy::Css => "css selector",
            QueryStrategy::XPath => "xpath",
            QueryStrategy::LinkText => "link text",
        }
    }
}

/// A concrete element lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementQuery {
    pub strategy: QueryStrategy,
    pub value: String,
}

impl ElementQuery {
    pub fn css(value: impl Into<String>) -> Self {
        Self {
            strategy: QueryStrategy::Css,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            strategy: QueryStrategy::XPath,
            value: value.into(),
        }
    }
}

impl std::fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.strategy.webdriver_name(), self.value)
    }
}

/// Opaque reference to an element inside a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(pub String);

/// One live headless-browser session.
///
/// Errors from these calls are reported as
/// [`ForgeError::TransientAutomation`](crate::ForgeError::TransientAutomation).
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// `Ok(None)` when nothing matches; `Err` only when the session itself fails.
    async fn find(&self, query: &ElementQuery) -> Result<Option<ElementHandle>>;

    async fn click(&self, element: &ElementHandle) -> Result<()>;

    async fn type_text(&self, element: &ElementHandle, text: &str) -> Result<()>;

    async fn upload_file(&self, element: &ElementHandle, path: &Path) -> Result<()>;

    async fn text(&self, element: &ElementHandle) -> Result<String>;

    async fn current_url(&self) -> Result<String>;

    /// Serialized session material to persist on the channel.
    async fn export_credentials(&self) -> Result<Option<String>>;

    async fn close(&self) -> Result<()>;
}

/// Opens sessions, optionally restoring persisted session material.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, credentials: Option<&str>) -> Result<Box<dyn BrowserSession>>;
}
