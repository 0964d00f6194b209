//! Crash → Sentry sync engine.
//!
//! The [`SyncEngine`] runs one sync cycle as a small state machine:
//!
//! `Idle → LockAcquired → WatermarkLoaded → Fetching → Emitting →
//! WatermarkPersisted → Idle`, or `Aborted` on any failure.
//!
//! 1. Take the advisory lock on the state file (blocks until free).
//! 2. Load the watermark.
//! 3. Initialize the sink.
//! 4. Fetch one page of crashes above the watermark.
//! 5. For each crash, in server order: advance the candidate watermark,
//!    transform, capture, flush.
//! 6. Persist the candidate watermark and release the lock.
//!
//! Nothing is retried. A failure anywhere before step 6 leaves the stored
//! watermark as it was, so the next run fetches the same page again and any
//! events already sent from it are delivered a second time.

use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::SyncSettings;
use crate::errors::{FetchError, SinkError, SyncError};
use crate::models::SyncReport;
use crate::progress::ProgressStore;
use crate::recap::{CrashSource, RecapClient};
use crate::sink::{EventSink, SentrySink};
use crate::transform::construct_event;

// ---------------------------------------------------------------------------
// Sync state machine
// ---------------------------------------------------------------------------

/// States of a sync cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    LockAcquired,
    WatermarkLoaded,
    Fetching,
    Emitting,
    WatermarkPersisted,
    Aborted,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LockAcquired => write!(f, "lock_acquired"),
            Self::WatermarkLoaded => write!(f, "watermark_loaded"),
            Self::Fetching => write!(f, "fetching"),
            Self::Emitting => write!(f, "emitting"),
            Self::WatermarkPersisted => write!(f, "watermark_persisted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Syncs crashes from one Recap server into one Sentry project.
pub struct SyncEngine {
    settings: SyncSettings,
    store: ProgressStore,
    state: Mutex<SyncState>,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings) -> Self {
        let store = ProgressStore::new(settings.state_file.clone());
        info!(state_file = %store.path().display(), "initializing sync engine");
        Self {
            settings,
            store,
            state: Mutex::new(SyncState::Idle),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// State of the current (or last) cycle.
    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run one cycle against the configured Recap server and Sentry project.
    ///
    /// The HTTP clients are created inside the cycle and dropped at its end.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let dsn = self.settings.sentry_dsn.clone();
        let sink_timeout = self.settings.sink_timeout;
        let recap = self.settings.recap.clone();

        self.run_with(
            move || SentrySink::new(&dsn, sink_timeout),
            move || RecapClient::new(recap),
        )
        .await
    }

    /// Run one cycle with caller-supplied sink and crash source.
    ///
    /// The factories are only invoked once the lock is held and the watermark
    /// loaded, so construction failures are reported in the same phase as
    /// they would be for the real clients.
    pub async fn run_with<S, C, MS, MC>(
        &self,
        make_sink: MS,
        make_source: MC,
    ) -> Result<SyncReport, SyncError>
    where
        S: EventSink,
        C: CrashSource,
        MS: FnOnce() -> Result<S, SinkError>,
        MC: FnOnce() -> Result<C, FetchError>,
    {
        let result = self.cycle(make_sink, make_source).await;
        match &result {
            Ok(report) => {
                self.set_state(SyncState::Idle);
                info!(
                    previous = report.previous_watermark,
                    watermark = report.watermark,
                    fetched = report.crashes_fetched,
                    emitted = report.events_emitted,
                    "sync cycle completed"
                );
            }
            Err(e) => {
                self.set_state(SyncState::Aborted);
                error!(error = %e, "sync cycle aborted, watermark left unchanged");
            }
        }
        result
    }

    async fn cycle<S, C, MS, MC>(
        &self,
        make_sink: MS,
        make_source: MC,
    ) -> Result<SyncReport, SyncError>
    where
        S: EventSink,
        C: CrashSource,
        MS: FnOnce() -> Result<S, SinkError>,
        MC: FnOnce() -> Result<C, FetchError>,
    {
        let started_at = Utc::now();

        let lock = self.store.lock().await?;
        self.set_state(SyncState::LockAcquired);

        let previous = lock.load()?;
        self.set_state(SyncState::WatermarkLoaded);

        let mut sink = make_sink().map_err(SyncError::SinkInit)?;
        let source = make_source()?;

        self.set_state(SyncState::Fetching);
        let crashes = source.fetch(previous).await?;

        self.set_state(SyncState::Emitting);
        let mut candidate = previous;
        let mut emitted = 0;
        for crash in &crashes {
            candidate = candidate.max(crash.id);
            let event = construct_event(crash);
            sink.capture(&event).await.map_err(SyncError::SinkEmit)?;
            // Flush per event: a failure mid-page re-sends at most the
            // events of this page, never more.
            sink.flush().await.map_err(SyncError::SinkEmit)?;
            emitted += 1;
            debug!(crash_id = crash.id, event_id = %event.event_id, "forwarded crash");
        }

        lock.store(candidate)?;
        self.set_state(SyncState::WatermarkPersisted);
        drop(lock);

        Ok(SyncReport {
            previous_watermark: previous,
            watermark: candidate,
            crashes_fetched: crashes.len(),
            events_emitted: emitted,
            started_at,
            completed_at: Utc::now(),
        })
    }

    fn set_state(&self, new_state: SyncState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(from = %*state, to = %new_state, "state transition");
        *state = new_state;
    }
}
