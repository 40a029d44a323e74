//! # ReelForge Gateway
//! HTTP surface over the control plane.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
