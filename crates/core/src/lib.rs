//! recap-sentry core library.
//!
//! Pulls crash reports from a Recap crash-reporting server and forwards them
//! as error events to Sentry, remembering the highest crash id already sent so
//! repeated runs only forward new crashes.

pub mod config;
pub mod errors;
pub mod models;
pub mod progress;
pub mod recap;
pub mod sink;
pub mod sync_engine;
pub mod transform;

// Re-exports for convenience.
pub use config::{SyncConfig, SyncSettings};
pub use errors::SyncError;
pub use progress::ProgressStore;
pub use recap::Auth;
pub use sync_engine::SyncEngine;
