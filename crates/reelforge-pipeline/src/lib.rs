//! # ReelForge Pipeline
//!
//! - [`orchestrator`]: the per-task state machine
//! - [`gate`] / [`prompt`] / [`model`]: mutation plan generation and validation
//! - [`rate_limit`]: per-channel rolling-window ceilings
//! - [`dispatcher`]: bounded priority lanes with observable completion
//! - [`control`]: inbound operations shared by the gateway and the CLI
//! - [`scratch`]: startup sweep for orphaned artifacts

pub mod control;
pub mod dispatcher;
pub mod gate;
pub mod model;
pub mod orchestrator;
pub mod prompt;
pub mod rate_limit;
pub mod scratch;

pub use control::ControlPlane;
pub use dispatcher::{DispatchHandle, Dispatcher, Lane, LaneStats, TaskOutcome, TaskRunner};
pub use gate::{MutationPlan, QualityGate};
pub use model::HttpMutationModel;
pub use orchestrator::Orchestrator;
pub use rate_limit::RateLimiter;
pub use scratch::sweep_orphans;
