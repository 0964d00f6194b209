//! Crash → Sentry event transformation.
//!
//! [`construct_event`] is pure: it never fails and performs no I/O. Optional
//! crash fields that are absent are simply left out of the event.

use std::collections::BTreeMap;

use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    AppContext, DetailedFrame, DeviceContext, EventContexts, ExceptionValue, ExceptionValues,
    Frame, NormalizedEvent, RawCrash, RequestContext, RuntimeContext, SdkInfo, Stacktrace,
};

/// SDK name reported on every event.
pub const SDK_NAME: &str = "recap.uploader.sdk";

/// SDK version reported on every event.
pub const SDK_VERSION: &str = "0.1.0";

/// Build the Sentry event for one crash.
pub fn construct_event(crash: &RawCrash) -> NormalizedEvent {
    let mut tags = BTreeMap::new();
    tags.insert("id".to_string(), crash.id.to_string());
    if let Some(title_id) = &crash.title_id {
        tags.insert("titleId".to_string(), scalar_to_string(title_id));
    }

    let exception = ExceptionValue {
        ty: crash.stop_reason.clone(),
        value: crash
            .stop_location
            .clone()
            .or_else(|| crash.return_location.clone()),
        stacktrace: build_stacktrace(crash),
    };

    // Runtime and device both hang off `platform`, each gated on its own
    // companion field.
    let runtime = match (&crash.platform, &crash.sys_version) {
        (Some(platform), Some(version)) => Some(RuntimeContext {
            name: platform.clone(),
            version: version.clone(),
        }),
        _ => None,
    };
    let device = match (&crash.platform, &crash.hardware_id) {
        (Some(platform), Some(hardware_id)) => Some(DeviceContext {
            name: platform.clone(),
            model_id: hardware_id.clone(),
        }),
        _ => None,
    };

    NormalizedEvent {
        event_id: Uuid::new_v4().simple().to_string(),
        sdk: SdkInfo {
            name: SDK_NAME.to_string(),
            version: SDK_VERSION.to_string(),
        },
        platform: "native".to_string(),
        exception: ExceptionValues {
            values: vec![exception],
        },
        tags,
        contexts: EventContexts {
            request: RequestContext {
                url: crash.links.self_link.href().to_string(),
            },
            runtime,
            device,
            app: crash.app_version.as_ref().map(|v| AppContext {
                app_version: v.clone(),
            }),
            user_data: crash.user_data.clone(),
        },
        timestamp: crash.upload_date.clone(),
    }
}

/// Detailed trace wins over the simple one; neither means no stacktrace.
fn build_stacktrace(crash: &RawCrash) -> Option<Stacktrace> {
    if let Some(detailed) = &crash.detailed_stack_trace {
        return Some(Stacktrace {
            frames: detailed.iter().map(detailed_frame).collect(),
        });
    }

    crash.stack_trace.as_ref().map(|functions| Stacktrace {
        frames: functions
            .iter()
            .map(|function| Frame {
                function: Some(function.clone()),
                in_app: true,
                ..Default::default()
            })
            .collect(),
    })
}

fn detailed_frame(frame: &DetailedFrame) -> Frame {
    Frame {
        filename: frame.source_file.clone(),
        lineno: frame.source_line,
        instruction_addr: frame.absolute_address.as_ref().map(|a| a.to_hex()),
        module: frame.module_name.clone(),
        function: frame.resolved_symbol.clone(),
        raw_function: frame.display_value.clone(),
        in_app: true,
    }
}

/// Tags are strings; keep text as-is and render anything else as JSON.
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
