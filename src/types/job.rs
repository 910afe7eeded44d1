use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ApiErrorBody, as_i64};
use crate::error::{Error, Result};

/// Status of an async job as reported by one `queryAsyncJobResult` call.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// Still running (`jobstatus` 0).
    Pending,

    /// Finished; carries `jobresult` unchanged (`jobstatus` 1).
    Succeeded(Value),

    /// Failed (`jobstatus` 2).
    Failed {
        /// `jobresult.errorcode`, falling back to `jobresultcode`.
        code: i64,
        /// `jobresult.cserrorcode`, when supplied.
        cs_error_code: Option<i64>,
        /// `jobresult.errortext`, or the raw result when it has none.
        message: String,
    },
}

impl JobStatus {
    /// Whether this status is final.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Interpret a `queryAsyncJobResult` payload.
    ///
    /// A payload without a usable `jobstatus` is a protocol error, never an
    /// implicit `Pending`.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let status = payload
            .get("jobstatus")
            .ok_or_else(|| Error::protocol("job status response has no 'jobstatus' field"))?;

        match as_i64(status) {
            Some(0) => Ok(Self::Pending),
            Some(1) => Ok(Self::Succeeded(
                payload.get("jobresult").cloned().unwrap_or(Value::Null),
            )),
            Some(2) => Ok(failed(payload)),
            _ => Err(Error::protocol(format!("unknown jobstatus value {status}"))),
        }
    }
}

fn failed(payload: &Value) -> JobStatus {
    let result = payload.get("jobresult").unwrap_or(&Value::Null);
    let result_code = payload.get("jobresultcode").and_then(as_i64);

    if let Some(body) = ApiErrorBody::from_payload(result) {
        return JobStatus::Failed {
            code: body.code,
            cs_error_code: body.cs_error_code,
            message: body.message,
        };
    }

    let message = match result {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("errortext")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| result.to_string()),
        Value::Null => "async job failed".to_string(),
        other => other.to_string(),
    };

    JobStatus::Failed {
        code: result_code.unwrap_or_default(),
        cs_error_code: result.get("cserrorcode").and_then(as_i64),
        message,
    }
}

/// Typed view of a `queryAsyncJobResult` payload.
///
/// Only the stable fields are modeled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncJobResult {
    /// Job id.
    pub jobid: String,

    /// 0 pending, 1 succeeded, 2 failed.
    pub jobstatus: i64,

    /// Progress hint reported by some commands.
    #[serde(default)]
    pub jobprocstatus: Option<i64>,

    /// Result code; non-zero on failure.
    #[serde(default)]
    pub jobresultcode: Option<i64>,

    /// `"object"` or `"text"`.
    #[serde(default)]
    pub jobresulttype: Option<String>,

    /// Command result, or error object on failure.
    #[serde(default)]
    pub jobresult: Option<Value>,

    /// Fully qualified name of the server-side command.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Creation timestamp.
    #[serde(default)]
    pub created: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn pending_and_succeeded() {
        assert_eq!(
            JobStatus::from_payload(&json!({"jobid": "j", "jobstatus": 0})).unwrap(),
            JobStatus::Pending
        );

        let status = JobStatus::from_payload(&json!({
            "jobid": "j",
            "jobstatus": 1,
            "jobresultcode": 0,
            "jobresult": {"virtualmachine": {"id": "vm-1"}}
        }))
        .unwrap();
        assert!(status.is_terminal());
        assert_eq!(
            status,
            JobStatus::Succeeded(json!({"virtualmachine": {"id": "vm-1"}}))
        );
    }

    #[test]
    fn failed_prefers_error_object() {
        let status = JobStatus::from_payload(&json!({
            "jobid": "j",
            "jobstatus": 2,
            "jobresultcode": 530,
            "jobresult": {"errorcode": 431, "cserrorcode": 4350, "errortext": "Unable to find zone"}
        }))
        .unwrap();
        assert_eq!(
            status,
            JobStatus::Failed {
                code: 431,
                cs_error_code: Some(4350),
                message: "Unable to find zone".to_string()
            }
        );
    }

    #[test]
    fn failed_with_text_result() {
        let status = JobStatus::from_payload(&json!({
            "jobstatus": "2",
            "jobresultcode": 530,
            "jobresulttype": "text",
            "jobresult": "host is in maintenance"
        }))
        .unwrap();
        assert_eq!(
            status,
            JobStatus::Failed {
                code: 530,
                cs_error_code: None,
                message: "host is in maintenance".to_string()
            }
        );
    }

    #[test]
    fn missing_or_unknown_status_is_a_protocol_error() {
        let err = JobStatus::from_payload(&json!({"jobid": "j"})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let err = JobStatus::from_payload(&json!({"jobid": "j", "jobstatus": 7})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn typed_view_deserializes() {
        let result: AsyncJobResult = serde_json::from_value(json!({
            "jobid": "a1",
            "jobstatus": 1,
            "jobresulttype": "object",
            "jobresult": {"success": true},
            "cmd": "org.apache.cloudstack.api.command.user.vm.DeployVMCmd"
        }))
        .unwrap();
        assert_eq!(result.jobid, "a1");
        assert_eq!(result.jobresult, Some(json!({"success": true})));
        assert_eq!(result.jobprocstatus, None);
    }
}
