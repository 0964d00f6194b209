//! Error types for the recap-sentry core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and the
//! top-level [`SyncError`] unifies them for callers that drive a whole run.

use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Everything that can abort a sync run.
///
/// None of these are retried internally; the watermark is never advanced
/// for a run that ends in one of them.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    State(#[from] StateError),

    /// The sink could not be set up (bad DSN, HTTP client construction).
    #[error("sink initialization failed: {0}")]
    SinkInit(#[source] SinkError),

    /// An event could not be handed to the sink or delivered on flush.
    #[error("event emission failed: {0}")]
    SinkEmit(#[source] SinkError),
}

impl From<SourceError> for SyncError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Auth(e) => Self::Auth(e),
            SourceError::Fetch(e) => Self::Fetch(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Both cookie and bearer credentials were supplied, or neither was.
    #[error("exactly one of cookie auth or bearer auth must be provided")]
    AuthModeAmbiguous,

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Crash source errors
// ---------------------------------------------------------------------------

/// Errors from the login or token exchange against the Recap server.
#[derive(Debug, Error)]
pub enum AuthError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("authentication HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The auth endpoint returned a non-success status code.
    #[error("authentication rejected (HTTP {status})")]
    Rejected { status: u16 },

    /// The token response did not contain a usable `access_token`.
    #[error("token response did not contain an access token")]
    MissingToken,

    /// Login succeeded at the HTTP level but no session cookie was set.
    #[error("login did not set the '{0}' session cookie")]
    MissingSessionCookie(String),
}

/// Errors while listing crashes.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP-level transport error.
    #[error("crash fetch HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The crash endpoint returned a non-success status code.
    #[error("crash endpoint returned HTTP {status}: {body}")]
    ApiError { status: u16, body: String },

    /// The response body did not have the expected shape.
    #[error("unexpected crash response: {0}")]
    ParseError(String),

    /// The request URL could not be assembled.
    #[error("invalid crash URL '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },
}

/// Anything a [`CrashSource`](crate::recap::CrashSource) can fail with.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

// ---------------------------------------------------------------------------
// Progress store errors
// ---------------------------------------------------------------------------

/// The advisory lock serializing runs could not be taken.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to open lock file '{}': {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to lock '{}': {source}", path.display())]
    Acquire {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking lock task was cancelled or panicked.
    #[error("lock task did not complete: {0}")]
    Interrupted(String),
}

/// Errors reading or writing the watermark file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file '{}' does not hold a crash id: {contents:?}", path.display())]
    Corrupt { path: PathBuf, contents: String },

    #[error("state file I/O error at '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Sink errors
// ---------------------------------------------------------------------------

/// Errors from the error-tracking sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The DSN is empty or not of the form `scheme://key@host/project`.
    #[error("invalid DSN: {0}")]
    InvalidDsn(String),

    /// HTTP-level transport error.
    #[error("sink HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The ingestion endpoint rejected an event.
    #[error("sink rejected event {event_id} (HTTP {status}): {body}")]
    Rejected {
        event_id: String,
        status: u16,
        body: String,
    },

    /// The event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
