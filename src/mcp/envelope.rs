use crate::utils::redact::mask_literal_secrets;
use serde_json::Value;

/// Per-call metadata recorded by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMeta {
    pub trace_id: String,
    pub duration_ms: u64,
    pub invoked_as: Option<String>,
}

/// Wraps a shaped result. Only the literal credential is masked; backend
/// text comes back as the backend sent it.
pub fn build_generic_envelope(
    tool_name: &str,
    tool_result: &Value,
    meta: &CallMeta,
    secrets: Option<&[String]>,
) -> Value {
    let mut envelope = serde_json::json!({
        "success": true,
        "tool": tool_name,
        "result": mask_literal_secrets(tool_result, secrets.unwrap_or_default()),
        "trace_id": meta.trace_id,
        "duration_ms": meta.duration_ms,
    });
    if let (Some(invoked), Value::Object(map)) = (meta.invoked_as.as_ref(), &mut envelope) {
        map.insert("invoked_as".to_string(), Value::String(invoked.clone()));
    }
    envelope
}

/// MCP `tools/call` result: the envelope as text plus structured content.
pub fn tool_call_result(envelope: &Value) -> Value {
    serde_json::json!({
        "content": [ { "type": "text", "text": serde_json::to_string(envelope).unwrap_or_else(|_| "{}".to_string()) } ],
        "structuredContent": envelope,
        "isError": false,
    })
}
