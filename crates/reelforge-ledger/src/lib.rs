//! # ReelForge Ledger
//!
//! Single source of truth for task status. SQLite in WAL mode; every write is
//! a short statement so async callers use it inline.
//!
//! The ledger only persists. Retries and transition rules live in the
//! pipeline.

pub mod sqlite;

pub use sqlite::SqliteLedger;
