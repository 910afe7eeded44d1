//! Response envelope decoding.
//!
//! Every answer is wrapped as `{"<commandname>response": {...}}`. The key
//! text is not inspected; the single top-level value is the payload.

use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    transport::RawResponse,
    types::ApiErrorBody,
};

/// Decoded meaning of a raw response.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiOutcome {
    /// Synchronous result.
    Success(Value),

    /// The platform rejected the request.
    Error(ApiErrorBody),

    /// The request was accepted and runs as an async job.
    Accepted {
        /// Job id to poll.
        job_id: String,
        /// The full payload (some commands return the new resource id too).
        payload: Value,
    },
}

/// Decode a raw response.
///
/// A non-2xx status always yields [`ApiOutcome::Error`]; malformed bodies on
/// 2xx responses are [`Error::Protocol`].
pub fn decode(raw: &RawResponse) -> Result<ApiOutcome> {
    if !raw.is_success() {
        return Ok(ApiOutcome::Error(http_error(raw)));
    }

    if raw.body.iter().all(u8::is_ascii_whitespace) {
        return Err(Error::protocol(format!(
            "empty response body (HTTP {})",
            raw.status
        )));
    }

    let root: Value = serde_json::from_slice(&raw.body)
        .map_err(|e| Error::protocol(format!("malformed JSON response: {e}")))?;

    let payload = unwrap_envelope(root)?;
    classify(payload)
}

fn classify(payload: Value) -> Result<ApiOutcome> {
    if let Some(code) = payload.get("errorcode") {
        return ApiErrorBody::from_payload(&payload)
            .map(ApiOutcome::Error)
            .ok_or_else(|| Error::protocol(format!("unreadable errorcode {code}")));
    }

    Ok(match payload.get("jobid").and_then(job_id_text) {
        Some(job_id) => ApiOutcome::Accepted { job_id, payload },
        None => ApiOutcome::Success(payload),
    })
}

fn unwrap_envelope(root: Value) -> Result<Value> {
    let map: Map<String, Value> = match root {
        Value::Object(map) => map,
        other => {
            return Err(Error::protocol(format!(
                "expected a JSON object envelope, got {}",
                json_type(&other)
            )));
        }
    };

    if map.len() != 1 {
        return Err(Error::protocol(format!(
            "expected exactly one top-level key in envelope, got {}",
            map.len()
        )));
    }

    match map.into_iter().next() {
        Some((_, payload @ Value::Object(_))) => Ok(payload),
        Some((key, other)) => Err(Error::protocol(format!(
            "envelope '{key}' holds {} instead of an object",
            json_type(&other)
        ))),
        None => Err(Error::protocol("empty envelope")),
    }
}

/// Error for a non-2xx status, preferring a structured body when present.
fn http_error(raw: &RawResponse) -> ApiErrorBody {
    let structured = serde_json::from_slice::<Value>(&raw.body)
        .ok()
        .and_then(|root| unwrap_envelope(root).ok())
        .and_then(|payload| ApiErrorBody::from_payload(&payload));

    structured.unwrap_or_else(|| ApiErrorBody {
        code: i64::from(raw.status),
        cs_error_code: None,
        message: reqwest::StatusCode::from_u16(raw.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected HTTP status")
            .to_string(),
    })
}

fn job_id_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
