//! Seams between the pipeline and everything it does not own.

pub mod automation;
pub mod discovery;
pub mod generation;
pub mod ledger;

pub use automation::{BrowserLauncher, BrowserSession, ElementHandle, ElementQuery, QueryStrategy};
pub use discovery::{Candidate, MetricsSource, SignalSource};
pub use generation::{MutationModel, PatchCandidate, PatchRegistry, SpeechEngine, Transcoder};
pub use ledger::Ledger;
