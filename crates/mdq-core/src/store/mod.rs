//! Persistent job store (SQLite via sqlx).
//!
//! Single source of truth for job state, the dedup view over normalized
//! URLs, and the runtime-mutable settings consumed by the scheduler and
//! the sync agent.

pub mod db;
mod jobs;
mod settings;
pub mod types;


pub use db::*;
pub use types::*;
