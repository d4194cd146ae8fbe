//! Wire schema of the local-channel protocol.
//!
//! One JSON object per line, UTF-8, terminated by a single `\n`. There is no
//! request id: responses are matched to requests purely by order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_status_code() -> u16 {
    200
}

fn default_success() -> bool {
    true
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcRequest {
    pub method: String,
    pub endpoint: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Send time, ISO-8601.
    pub timestamp: DateTime<Utc>,
}

impl IpcRequest {
    /// Build a request stamped with the current time. Missing data becomes `{}`.
    pub fn new(
        method: impl Into<String>,
        endpoint: impl Into<String>,
        data: Option<serde_json::Value>,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            data: data.unwrap_or_else(empty_object),
            headers,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_data_to_empty_object() {
        let req = IpcRequest::new("GET", "/health", None, HashMap::new());
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "GET");
        assert_eq!(json["endpoint"], "/health");
        assert_eq!(json["data"], serde_json::json!({}));
        assert_eq!(json["headers"], serde_json::json!({}));
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn request_serializes_to_single_line() {
        let req = IpcRequest::new(
            "POST",
            "/capabilities/request",
            Some(serde_json::json!({ "note": "line\nbreak" })),
            HashMap::new(),
        );
        let line = serde_json::to_string(&req).unwrap();
        assert!(!line.contains('\n'));
    }

    #[test]
    fn response_defaults_when_fields_absent() {
        let resp: IpcResponse = serde_json::from_str(r#"{"data": {"ok": true}}"#).unwrap();
        assert_eq!(resp.status_code, 200);
        assert!(resp.success);
        assert!(resp.headers.is_empty());
        assert!(resp.error.is_none());
        assert_eq!(resp.data.unwrap()["ok"], true);
    }

    #[test]
    fn response_with_explicit_failure() {
        let resp: IpcResponse = serde_json::from_str(
            r#"{"status_code": 403, "success": false, "error": "denied", "data": null}"#,
        )
        .unwrap();
        assert_eq!(resp.status_code, 403);
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("denied"));
        assert!(resp.data.is_none());
    }
}
