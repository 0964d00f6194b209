//! Recap crash listing client.

use std::sync::Arc;
use std::time::Duration;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::errors::{FetchError, SourceError};
use crate::models::RawCrash;
use crate::recap::auth::Auth;
use crate::recap::CrashSource;

/// Server-side default page size, applied explicitly on the first sync.
pub const FIRST_SYNC_LIMIT: u32 = 1000;

const CRASHES_MEDIA_TYPE: &str = "application/vnd.scea.recap.crashes+json; version=1";

/// Everything except unreserved characters and the matrix-parameter syntax
/// (`;`, `=`, `:`) gets percent-encoded.
const RANGE_FILTER: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b';')
    .remove(b'=')
    .remove(b':');

/// Connection settings for one Recap server.
#[derive(Debug, Clone)]
pub struct RecapSettings {
    pub base_url: String,
    pub crash_endpoint: String,
    pub auth: Auth,
    pub timeout: Duration,
}

/// Build the crash listing URL for a given watermark.
///
/// The first sync (`watermark == 0`) is capped at [`FIRST_SYNC_LIMIT`];
/// later ones ask for ids strictly above the watermark with an open Solr
/// range, `{N TO *}`.
pub fn crash_query_url(base_url: &str, crash_endpoint: &str, watermark: u64) -> String {
    let crash_url = format!("{}{}", base_url.trim_end_matches('/'), crash_endpoint);
    if watermark == 0 {
        format!("{};limit={}", crash_url, FIRST_SYNC_LIMIT)
    } else {
        let filter = format!(";q=id:{{{} TO *}}", watermark);
        format!("{}{}", crash_url, utf8_percent_encode(&filter, RANGE_FILTER))
    }
}

#[derive(Deserialize)]
struct CrashPage {
    #[serde(rename = "_embedded")]
    embedded: EmbeddedCrashes,
}

#[derive(Deserialize)]
struct EmbeddedCrashes {
    crash: Vec<RawCrash>,
}

/// HTTP client for one sync run against a Recap server.
///
/// Owns its own `reqwest` client and cookie jar; both are dropped with the
/// `RecapClient` at the end of the run.
pub struct RecapClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base_url: Url,
    settings: RecapSettings,
}

impl RecapClient {
    pub fn new(settings: RecapSettings) -> Result<Self, FetchError> {
        let base_url = Url::parse(&settings.base_url).map_err(|e| FetchError::InvalidUrl {
            url: settings.base_url.clone(),
            detail: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(CRASHES_MEDIA_TYPE));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("recap-sentry/", env!("CARGO_PKG_VERSION")))
            .cookie_provider(Arc::clone(&jar))
            .timeout(settings.timeout)
            .build()?;

        info!(base_url = %base_url, auth = settings.auth.kind(), "created RecapClient");
        Ok(Self {
            http,
            jar,
            base_url,
            settings,
        })
    }

    /// Authenticate, then list the crashes above `watermark`.
    #[instrument(skip(self))]
    pub async fn fetch_crashes(&self, watermark: u64) -> Result<Vec<RawCrash>, SourceError> {
        let url = crash_query_url(
            &self.settings.base_url,
            &self.settings.crash_endpoint,
            watermark,
        );

        let credential = self
            .settings
            .auth
            .authenticate(&self.http, &self.jar, &self.base_url)
            .await?;

        debug!(url = %url, "fetching crashes");
        let resp = credential
            .apply(self.http.get(&url))
            .send()
            .await
            .map_err(FetchError::from)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "crash endpoint returned error");
            return Err(FetchError::ApiError {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let body = resp.text().await.map_err(FetchError::from)?;
        let page: CrashPage =
            serde_json::from_str(&body).map_err(|e| FetchError::ParseError(e.to_string()))?;

        let crashes = page.embedded.crash;
        info!(count = crashes.len(), watermark, "found crashes");
        Ok(crashes)
    }
}

impl CrashSource for RecapClient {
    async fn fetch(&self, watermark: u64) -> Result<Vec<RawCrash>, SourceError> {
        self.fetch_crashes(watermark).await
    }
}
