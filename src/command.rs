//! Typed command descriptions.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::params::ParameterSet;

/// A command with a typed response.
///
/// Resource wrappers implement this to get [`crate::Client::call`]. For
/// async commands, `Response` describes the job's `jobresult`, not the
/// `{"jobid": ...}` acknowledgement.
pub trait Command {
    /// Decoded response payload.
    type Response: DeserializeOwned;

    /// Command name, e.g. `listVirtualMachines`.
    fn name(&self) -> &str;

    /// Request parameters (without `command`, `apiKey` or `response`).
    fn params(&self) -> ParameterSet;
}

/// Decode `v`, reporting the JSON path of the first mismatch.
pub(crate) fn deserialize_value<T: DeserializeOwned>(v: Value) -> std::result::Result<T, String> {
    serde_path_to_error::deserialize(v).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Zone {
        id: String,
        networktype: String,
    }

    #[derive(Debug, Deserialize)]
    struct ListZones {
        count: u32,
        zone: Vec<Zone>,
    }

    #[test]
    fn decodes_list_payload() {
        let v = json!({"count": 1, "zone": [{"id": "z1", "networktype": "Advanced"}]});
        let decoded: ListZones = deserialize_value(v).unwrap();
        assert_eq!(decoded.count, 1);
        assert_eq!(decoded.zone[0].id, "z1");
        assert_eq!(decoded.zone[0].networktype, "Advanced");
    }

    #[test]
    fn error_names_the_failing_path() {
        let v = json!({"count": 1, "zone": [{"id": "z1", "networktype": 3}]});
        let err = deserialize_value::<ListZones>(v).unwrap_err();
        assert!(err.starts_with("zone[0].networktype"), "{err}");
    }
}
