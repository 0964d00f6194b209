//! Recap crash-reporting server integration.

pub mod auth;
pub mod client;

use std::future::Future;

use crate::errors::SourceError;
use crate::models::RawCrash;

pub use auth::{Auth, Credential};
pub use client::{crash_query_url, RecapClient, RecapSettings};

/// Anything the sync engine can pull a page of crashes from.
pub trait CrashSource {
    /// Crashes with an id above `watermark`, in server order.
    fn fetch(
        &self,
        watermark: u64,
    ) -> impl Future<Output = Result<Vec<RawCrash>, SourceError>> + Send;
}
