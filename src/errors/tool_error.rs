use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Initialization,
    NotFound,
    InvalidParams,
    Retryable,
    Client,
    Protocol,
    PartialFailure,
    Cancelled,
    Internal,
}

/// One rejected argument. Validation errors carry every violation found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: String,
    pub problem: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(kind, ToolErrorKind::Retryable),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn initialization(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Initialization, "INITIALIZATION_ERROR", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, "RESOLUTION_ERROR", message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidParams, "VALIDATION_ERROR", message)
    }

    pub fn validation(subject: &str, violations: Vec<Violation>) -> Self {
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        let message = format!(
            "Invalid arguments for {} ({} violation{}: {})",
            subject,
            violations.len(),
            if violations.len() == 1 { "" } else { "s" },
            fields.join(", ")
        );
        Self::invalid_params(message)
            .with_details(serde_json::json!({ "violations": violations }))
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Retryable, "TRANSIENT_FAILURE", message)
    }

    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Client, "CLIENT_ERROR", message)
            .with_details(serde_json::json!({ "status": status }))
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Protocol, "PROTOCOL_VIOLATION", message)
    }

    pub fn partial_failure(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::PartialFailure, "PARTIAL_FAILURE", message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Cancelled, "CANCELLED", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Internal, "INTERNAL", message)
    }

    /// Violations attached by [`ToolError::validation`], empty for other kinds.
    pub fn violations(&self) -> Vec<Violation> {
        self.details
            .as_ref()
            .and_then(|d| d.get("violations"))
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        Some(Violation::new(
                            item.get("field")?.as_str()?,
                            item.get("problem")?.as_str()?,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn status(&self) -> Option<u16> {
        self.details
            .as_ref()
            .and_then(|d| d.get("status").or_else(|| d.get("last_status")))
            .and_then(|v| v.as_u64())
            .map(|v| v as u16)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ToolError {}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_field() {
        let err = ToolError::validation(
            "create_work_package",
            vec![
                Violation::new("project_id", "missing required field"),
                Violation::new("subject", "missing required field"),
            ],
        );
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
        assert!(err.message.contains("project_id, subject"));
        assert_eq!(err.violations().len(), 2);
        assert!(!err.retryable);
    }

    #[test]
    fn only_transient_failures_are_marked_retryable() {
        assert!(ToolError::retryable("busy").retryable);
        assert!(!ToolError::client(404, "missing").retryable);
        assert!(!ToolError::protocol("cursor went backwards").retryable);
        assert_eq!(ToolError::client(409, "conflict").status(), Some(409));
    }
}
