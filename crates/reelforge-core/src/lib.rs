//! # ReelForge Core
//!
//! Shared vocabulary for every ReelForge crate: the persisted data model,
//! the error taxonomy, configuration, and the narrow traits through which
//! the pipeline reaches its external collaborators.
//!
//! ```text
//! Scheduler ──► Ledger (scraping) ──► Dispatcher ──► Orchestrator
//!                                                     ├── Driver.scrape   (BrowserSession)
//!                                                     ├── MutationModel.generate
//!                                                     ├── Synthesis (SpeechEngine + Transcoder)
//!                                                     ├── RateLimiter
//!                                                     └── Driver.publish  (BrowserSession)
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ForgeConfig;
pub use error::{ForgeError, Result};
pub use types::*;
