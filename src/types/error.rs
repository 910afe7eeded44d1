use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error object embedded in a response payload or in a failed job result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// `errorcode`.
    #[serde(rename = "errorcode")]
    pub code: i64,

    /// `cserrorcode`: the platform's internal exception code.
    #[serde(rename = "cserrorcode", default, skip_serializing_if = "Option::is_none")]
    pub cs_error_code: Option<i64>,

    /// `errortext`.
    #[serde(rename = "errortext", default)]
    pub message: String,
}

impl ApiErrorBody {
    /// Extract an error object from a payload, if it carries `errorcode`.
    ///
    /// Codes are accepted as JSON numbers or numeric strings.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        let code = as_i64(payload.get("errorcode")?)?;
        let cs_error_code = payload.get("cserrorcode").and_then(as_i64);
        let message = payload
            .get("errortext")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Some(Self {
            code,
            cs_error_code,
            message,
        })
    }
}

pub(crate) fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
