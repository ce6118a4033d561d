use crate::errors::McpError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
        }
    }

    pub fn from_error(id: Value, error: McpError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: error.code.as_i32(),
                message: error.message,
                data: error.data,
            }),
        }
    }
}

/// Request id carried by `notifications/cancelled`.
pub fn cancelled_request_id(params: &Value) -> Option<String> {
    params.get("requestId").map(request_key)
}

/// Stable map key for a JSON-RPC id (numbers and strings never collide).
pub fn request_key(id: &Value) -> String {
    match id {
        Value::String(text) => format!("s:{}", text),
        other => format!("v:{}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[test]
    fn json_rpc_request_allows_missing_id_for_notifications() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized","params":{}}"#;
        let parsed: JsonRpcRequest = serde_json::from_str(raw).expect("must parse");
        assert!(parsed.is_notification());
        assert_eq!(parsed.method, "notifications/initialized");
    }

    #[test]
    fn json_rpc_request_parses_id_when_present() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#;
        let parsed: JsonRpcRequest = serde_json::from_str(raw).expect("must parse");
        assert!(parsed.id.is_some());
        assert_eq!(parsed.method, "tools/list");
    }

    #[test]
    fn cancellation_ids_match_request_keys() {
        let params = serde_json::json!({"requestId": 7, "reason": "user"});
        assert_eq!(cancelled_request_id(&params), Some(request_key(&serde_json::json!(7))));
        assert_ne!(request_key(&serde_json::json!(7)), request_key(&serde_json::json!("7")));
    }

    #[test]
    fn error_data_is_serialized() {
        let error = McpError::new(ErrorCode::InvalidParams, "bad")
            .with_data(serde_json::json!({"violations": []}));
        let response = JsonRpcResponse::from_error(serde_json::json!(1), error);
        let value = serde_json::to_value(&response).expect("serialize");
        assert_eq!(value["error"]["code"], -32602);
        assert_eq!(value["error"]["data"]["violations"], serde_json::json!([]));
    }
}
