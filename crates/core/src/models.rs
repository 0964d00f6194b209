//! Domain model types used throughout recap-sentry.
//!
//! [`RawCrash`] mirrors what the Recap server returns, [`NormalizedEvent`]
//! mirrors the Sentry event JSON the sink sends. The transformer in
//! [`crate::transform`] is the only place that maps one onto the other.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Crash records (Recap side)
// ---------------------------------------------------------------------------

/// One crash as listed by the Recap crash endpoint.
///
/// Only `id`, `stopReason` and `_links.self` are required. Everything else is
/// optional, accepted in whatever JSON type the server sends, and unknown
/// fields are ignored: one odd crash must not reject its whole page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCrash {
    pub id: u64,
    pub stop_reason: String,
    #[serde(rename = "_links")]
    pub links: CrashLinks,
    #[serde(default, deserialize_with = "lenient::text")]
    pub stop_location: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub return_location: Option<String>,
    #[serde(default, deserialize_with = "lenient::frames")]
    pub detailed_stack_trace: Option<Vec<DetailedFrame>>,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub stack_trace: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub platform: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub sys_version: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub hardware_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub app_version: Option<String>,
    pub title_id: Option<Value>,
    pub user_data: Option<Value>,
    pub upload_date: Option<Value>,
}

/// HAL links block of a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
}

/// A HAL link, either a bare URL or an object with an `href`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Link {
    Plain(String),
    Href { href: String },
}

impl Link {
    pub fn href(&self) -> &str {
        match self {
            Self::Plain(url) => url,
            Self::Href { href } => href,
        }
    }
}

/// A symbolicated frame from `detailedStackTrace`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedFrame {
    #[serde(default, deserialize_with = "lenient::text")]
    pub source_file: Option<String>,
    #[serde(default, deserialize_with = "lenient::line")]
    pub source_line: Option<u64>,
    #[serde(default, deserialize_with = "lenient::address")]
    pub absolute_address: Option<Address>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub module_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub resolved_symbol: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub display_value: Option<String>,
}

/// An instruction address, sent by the server either as text or as a number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Address {
    Text(String),
    Numeric(u64),
}

impl Address {
    /// Sentry expects addresses as `0x`-prefixed hex strings.
    pub fn to_hex(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Numeric(n) => format!("{:#x}", n),
        }
    }
}

/// Deserializers for optional crash fields.
///
/// `null` means absent, scalars of the wrong type are rendered as text, and
/// values that cannot be used at all are dropped instead of failing.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    use super::{Address, DetailedFrame};

    fn render(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(render(Value::deserialize(d)?))
    }

    pub fn texts<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => Some(items.into_iter().filter_map(render).collect()),
            other => render(other).map(|s| vec![s]),
        })
    }

    pub fn line<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    pub fn address<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Address>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => Some(match n.as_u64() {
                Some(addr) => Address::Numeric(addr),
                None => Address::Text(n.to_string()),
            }),
            other => render(other).map(Address::Text),
        })
    }

    pub fn frames<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Vec<DetailedFrame>>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => Some(
                items
                    .into_iter()
                    .filter_map(|item| DetailedFrame::deserialize(item).ok())
                    .collect(),
            ),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Normalized events (Sentry side)
// ---------------------------------------------------------------------------

/// A backend-ready error event in the Sentry event JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Fresh per event; never derived from the crash.
    pub event_id: String,
    pub sdk: SdkInfo,
    pub platform: String,
    pub exception: ExceptionValues,
    pub tags: BTreeMap<String, String>,
    pub contexts: EventContexts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

impl NormalizedEvent {
    /// The single exception every crash event carries.
    pub fn primary_exception(&self) -> Option<&ExceptionValue> {
        self.exception.values.first()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SdkInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExceptionValues {
    pub values: Vec<ExceptionValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionValue {
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

/// A stack frame; unset members are left out of the JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_addr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_function: Option<String>,
    pub in_app: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContexts {
    pub request: RequestContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppContext>,
    #[serde(
        rename = "userData",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub user_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestContext {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeContext {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceContext {
    pub name: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppContext {
    pub app_version: String,
}

// ---------------------------------------------------------------------------
// Run statistics
// ---------------------------------------------------------------------------

/// Outcome of one successful sync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub previous_watermark: u64,
    pub watermark: u64,
    pub crashes_fetched: usize,
    pub events_emitted: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    /// Whether the run moved the watermark forward.
    pub fn advanced(&self) -> bool {
        self.watermark > self.previous_watermark
    }
}
