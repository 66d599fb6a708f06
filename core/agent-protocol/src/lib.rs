//! IPC protocol types and validation for the cmdtrail background agent.
//!
//! This crate is shared by the hook and the agent to prevent schema drift.
//! The outbound batch schema lives here too, since the agent forwards the
//! same payload to the remote API that the hook sends directly when the
//! agent is down.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 4 * 1024 * 1024; // 4MB

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    SubmitBatch,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }
}

/// One correlated command, as delivered to the analytics service.
///
/// `start_time`/`end_time` are Unix seconds; the `*_nano` fields carry the
/// full nanosecond timestamps. Start fields are zero when no pre event
/// preceded the completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub session_id: i64,
    pub command: String,
    pub start_time: i64,
    pub start_time_nano: i64,
    pub end_time: i64,
    pub end_time_nano: i64,
    pub result: i32,
}

/// Shared attributes for every record in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchMetadata {
    pub hostname: String,
    pub username: String,
    pub os: String,
    pub os_version: String,
    pub shell: String,
}

/// Params of a `submit_batch` request and body of the remote POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BatchPayload {
    pub records: Vec<BatchRecord>,
    pub metadata: BatchMetadata,
    /// Newest post-event timestamp (Unix nanoseconds) covered by this batch.
    pub cursor: i64,
}

impl BatchPayload {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.records.is_empty() {
            return Err(ErrorInfo::new("empty_batch", "records must not be empty"));
        }
        if self.cursor <= 0 {
            return Err(ErrorInfo::new("invalid_cursor", "cursor must be positive"));
        }

        for record in &self.records {
            if record.end_time_nano > self.cursor {
                return Err(ErrorInfo::new(
                    "invalid_cursor",
                    "cursor must not precede any record end time",
                ));
            }
            if record.start_time_nano > record.end_time_nano {
                return Err(ErrorInfo::new(
                    "invalid_record",
                    "start_time_nano must not exceed end_time_nano",
                ));
            }
        }

        Ok(())
    }
}

pub fn parse_batch(params: Value) -> Result<BatchPayload, ErrorInfo> {
    let payload: BatchPayload = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("batch payload is invalid JSON: {}", err),
        )
    })?;
    payload.validate()?;
    Ok(payload)
}
