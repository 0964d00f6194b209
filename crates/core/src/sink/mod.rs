//! Error-tracking sinks that receive normalized events.

pub mod sentry;

use std::future::Future;

use crate::errors::SinkError;
use crate::models::NormalizedEvent;

pub use sentry::{Dsn, SentrySink};

/// Destination for normalized events.
///
/// `capture` may buffer; only a successful `flush` means the events were
/// handed off to the backend.
pub trait EventSink {
    fn capture(
        &mut self,
        event: &NormalizedEvent,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;

    fn flush(&mut self) -> impl Future<Output = Result<(), SinkError>> + Send;
}
