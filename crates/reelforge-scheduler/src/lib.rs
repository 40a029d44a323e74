//! # ReelForge Scheduler
//!
//! Four heartbeats, each on its own interval loop:
//!
//! ```text
//! schedule-promoter (60s)   due ScheduleEntry → claim → Task → dispatcher
//! radar (1h)                SignalSource → threshold → niche routing → Task
//! recovery (startup + 5m)   Ledger.list_stale → re-dispatch by id
//! variant-swap (30m)        MetricsSource → next unused title → metadata update
//! ```
//!
//! None of them waits for a pipeline to finish.

pub mod heartbeat;
pub mod promoter;
pub mod radar;
pub mod recovery;
pub mod variant_swap;

#[cfg(test)]
mod testing;

pub use heartbeat::{Heartbeats, spawn_heartbeat};
pub use promoter::SchedulePromoter;
pub use radar::{FeedSignalSource, Radar};
pub use recovery::RecoverySweep;
pub use variant_swap::{LedgerMetrics, VariantSwapMonitor};
