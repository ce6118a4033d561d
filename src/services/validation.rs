use crate::constants::limits::SUGGESTION_LIMIT;
use crate::errors::{InitError, ToolError, Violation};
use crate::utils::suggest::suggest;
use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::JSONSchema;
use serde_json::{Map, Value};

/// Checks tool arguments against a compiled JSON Schema and reports every
/// violated field at once.
pub struct ArgumentValidator {
    subject: String,
    schema: Value,
    compiled: JSONSchema,
    require_any: Vec<String>,
}

impl std::fmt::Debug for ArgumentValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgumentValidator")
            .field("subject", &self.subject)
            .field("require_any", &self.require_any)
            .finish()
    }
}

impl ArgumentValidator {
    pub fn compile(
        subject: &str,
        schema: Value,
        require_any: Vec<String>,
    ) -> Result<Self, InitError> {
        let compiled = JSONSchema::compile(&schema)
            .map_err(|err| InitError::Catalog(format!("{}: invalid input schema: {}", subject, err)))?;
        Ok(Self {
            subject: subject.to_string(),
            schema,
            compiled,
            require_any,
        })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Null-valued arguments count as absent.
    pub fn normalize(args: &Value) -> Result<Map<String, Value>, ToolError> {
        match args {
            Value::Null => Ok(Map::new()),
            Value::Object(map) => Ok(map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()),
            _ => Err(ToolError::validation(
                "arguments",
                vec![Violation::new("(root)", "arguments must be an object")],
            )),
        }
    }

    pub fn violations(&self, args: &Map<String, Value>) -> Vec<Violation> {
        let instance = Value::Object(args.clone());
        let mut out = Vec::new();
        if let Err(errors) = self.compiled.validate(&instance) {
            for err in errors {
                let pointer = err.instance_path.to_string();
                let field = top_level_field(&pointer);
                match &err.kind {
                    ValidationErrorKind::Required { property } => {
                        let name = property
                            .as_str()
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| property.to_string());
                        out.push(Violation::new(name, "missing required field"));
                    }
                    ValidationErrorKind::AdditionalProperties { unexpected } => {
                        let known = self.property_names();
                        for unknown in unexpected {
                            let hints = suggest(unknown, &known, SUGGESTION_LIMIT);
                            let problem = if hints.is_empty() {
                                "unknown field".to_string()
                            } else {
                                format!("unknown field (did you mean: {})", hints.join(", "))
                            };
                            out.push(Violation::new(unknown.clone(), problem));
                        }
                    }
                    ValidationErrorKind::Type { kind } => {
                        out.push(Violation::new(field, format!("expected {}", type_name(kind))));
                    }
                    ValidationErrorKind::Enum { options } => {
                        let allowed: Vec<String> = options
                            .as_array()
                            .map(|items| {
                                items
                                    .iter()
                                    .map(|v| v.as_str().map(|s| s.to_string()).unwrap_or_else(|| v.to_string()))
                                    .collect()
                            })
                            .unwrap_or_default();
                        out.push(Violation::new(
                            field,
                            format!("expected one of {}", allowed.join(", ")),
                        ));
                    }
                    _ => out.push(Violation::new(field, err.to_string())),
                }
            }
        }
        if !self.require_any.is_empty()
            && !self.require_any.iter().any(|name| args.contains_key(name))
        {
            out.push(Violation::new(
                "(root)",
                format!("at least one of {} is required", self.require_any.join(", ")),
            ));
        }
        out
    }

    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), ToolError> {
        let violations = self.violations(args);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ToolError::validation(&self.subject, violations))
        }
    }

    fn property_names(&self) -> Vec<String> {
        self.schema
            .get("properties")
            .and_then(|v| v.as_object())
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn top_level_field(pointer: &str) -> String {
    pointer
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .unwrap_or_else(|| "(root)".to_string())
}

fn type_name(kind: &TypeKind) -> String {
    match kind {
        TypeKind::Single(primitive) => primitive.to_string(),
        TypeKind::Multiple(types) => {
            let list: Vec<String> = (*types).into_iter().map(|t| t.to_string()).collect();
            if list.is_empty() {
                "unknown".to_string()
            } else {
                list.join(" | ")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolErrorKind;
    use serde_json::json;

    fn validator() -> ArgumentValidator {
        ArgumentValidator::compile(
            "create_work_package",
            json!({
                "type": "object",
                "properties": {
                    "project_id": {"type": ["integer", "string"]},
                    "subject": {"type": "string"},
                    "percentage_done": {"type": "integer", "minimum": 0, "maximum": 100},
                    "notify": {"type": "boolean"}
                },
                "required": ["project_id", "subject"],
                "additionalProperties": false
            }),
            Vec::new(),
        )
        .expect("schema compiles")
    }

    #[test]
    fn reports_every_missing_field() {
        let args = ArgumentValidator::normalize(&json!({})).expect("object");
        let err = validator().validate(&args).expect_err("missing fields");
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
        let mut fields: Vec<String> = err.violations().into_iter().map(|v| v.field).collect();
        fields.sort();
        assert_eq!(fields, vec!["project_id", "subject"]);
    }

    #[test]
    fn mixes_type_and_unknown_field_problems() {
        let args = ArgumentValidator::normalize(&json!({
            "project_id": 3,
            "subject": 7,
            "notfy": true
        }))
        .expect("object");
        let violations = validator().violations(&args);
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.field == "subject" && v.problem.contains("string")));
        assert!(violations
            .iter()
            .any(|v| v.field == "notfy" && v.problem.contains("notify")));
    }

    #[test]
    fn null_arguments_are_absent() {
        let args = ArgumentValidator::normalize(&json!({
            "project_id": 1,
            "subject": "x",
            "notify": null
        }))
        .expect("object");
        assert!(!args.contains_key("notify"));
        assert!(validator().validate(&args).is_ok());
    }

    #[test]
    fn require_any_needs_one_field() {
        let validator = ArgumentValidator::compile(
            "update_project",
            json!({"type": "object", "properties": {"id": {}, "name": {}, "description": {}}}),
            vec!["name".to_string(), "description".to_string()],
        )
        .expect("compiles");
        let args = ArgumentValidator::normalize(&json!({"id": 1})).expect("object");
        let err = validator.validate(&args).expect_err("needs a field");
        assert!(err.message.contains("update_project"));
        let args = ArgumentValidator::normalize(&json!({"id": 1, "name": "n"})).expect("object");
        assert!(validator.validate(&args).is_ok());
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = ArgumentValidator::normalize(&json!([1, 2])).expect_err("array");
        assert_eq!(err.kind, ToolErrorKind::InvalidParams);
    }
}
