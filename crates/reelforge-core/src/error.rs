//! Error taxonomy shared by every stage of the pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForgeError {
    /// Selector miss, navigation timeout, dead session. Retried by self-heal.
    #[error("automation error: {0}")]
    TransientAutomation(String),

    /// Quality-gate rejection. Terminal, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Per-channel dispatch ceiling reached. Raised before any automation starts.
    #[error("RateLimitExceeded")]
    RateLimitExceeded {
        channel_id: String,
        window_minutes: u32,
        ceiling: u32,
    },

    /// Speech engine or transcoder failure.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Patch fault, timeout, or malformed patch output. Never leaves the driver.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("patch registry error: {0}")]
    Registry(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForgeError>;

impl ForgeError {
    /// Whether the driver's self-heal loop may retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ForgeError::TransientAutomation(_))
    }

    /// Text written to `Task.error` when a task fails with this error.
    pub fn ledger_message(&self) -> String {
        match self {
            ForgeError::RateLimitExceeded { .. } => "RateLimitExceeded".into(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_ledger_message() {
        let err = ForgeError::RateLimitExceeded {
            channel_id: "c1".into(),
            window_minutes: 60,
            ceiling: 5,
        };
        assert_eq!(err.ledger_message(), "RateLimitExceeded");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ForgeError::TransientAutomation("selector miss".into()).is_transient());
        assert!(!ForgeError::Validation("missing full_script".into()).is_transient());
        assert_eq!(
            ForgeError::Synthesis("ffmpeg exited 1".into()).ledger_message(),
            "synthesis error: ffmpeg exited 1"
        );
    }
}
