use crate::constants::schema::API_PREFIX;
use crate::errors::{ToolError, Violation};
use crate::services::dispatch::{CallPlan, PlanExecutor, ToolHandler};
use crate::services::endpoint::{EndpointDescriptor, HttpMethod, ParamLocation, ParamType};
use crate::services::logger::Logger;
use crate::services::schema_index::SchemaIndex;
use crate::utils::output::OutputShape;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const RUN_API_TOOL: &str = "run_api";

/// Passthrough for any indexed route, addressed by concrete path.
pub struct RawApiManager {
    logger: Logger,
    index: Arc<SchemaIndex>,
    executor: PlanExecutor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawTarget {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RawApiManager {
    pub fn new(logger: &Logger, index: Arc<SchemaIndex>, executor: PlanExecutor) -> Self {
        Self {
            logger: logger.child("run_api"),
            index,
            executor,
        }
    }

    pub fn plan(&self, args: &Value) -> Result<CallPlan, ToolError> {
        let raw_query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
        let method_text = args.get("method").and_then(|v| v.as_str()).unwrap_or("GET");
        let method = HttpMethod::parse(method_text).ok_or_else(|| {
            ToolError::validation(
                RUN_API_TOOL,
                vec![Violation::new(
                    "method",
                    format!("unsupported method '{}'", method_text),
                )],
            )
        })?;
        let target = split_target(raw_query)?;
        let (descriptor, bound) = self.index.match_path(method, &target.path).ok_or_else(|| {
            ToolError::not_found(format!("No operation matches {} {}", method, target.path))
                .with_hint("Use query_api to find the indexed routes")
                .with_details(serde_json::json!({"method": method.as_str(), "path": target.path}))
        })?;

        let mut values = Map::new();
        let mut rejected = Vec::new();
        for (name, value) in bound {
            let kind = descriptor.param(&name).map(|spec| spec.kind);
            let value = match kind {
                Some(kind) => coerce(kind, value),
                None => value,
            };
            if kind == Some(ParamType::Integer) && !value.is_i64() {
                rejected.push(Violation::new(
                    "query",
                    format!("path segment for '{}' must be an integer, got {}", name, value),
                ));
                continue;
            }
            values.insert(name, value);
        }
        if !rejected.is_empty() {
            return Err(ToolError::validation(RUN_API_TOOL, rejected));
        }
        let mut extra_query = Vec::new();
        for (key, value) in target.query {
            match declared_query_param(&descriptor, &key) {
                Some((name, kind)) => {
                    values.insert(name, coerce(kind, Value::String(value)));
                }
                None => extra_query.push((key, value)),
            }
        }

        let mut plan = CallPlan::from_arguments(descriptor, values, OutputShape::default());
        plan.params.extra_query = extra_query;
        plan.params.raw_body = match args.get("body") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(serde_json::from_str(text).map_err(|err| {
                ToolError::validation(
                    RUN_API_TOOL,
                    vec![Violation::new("body", format!("not valid JSON: {}", err))],
                )
            })?),
            Some(other) => Some(other.clone()),
        };
        if plan.params.raw_body.as_ref().is_some_and(|b| !b.is_object()) {
            return Err(ToolError::validation(
                RUN_API_TOOL,
                vec![Violation::new("body", "must be a JSON object")],
            ));
        }
        Ok(plan)
    }
}

/// Accepts `/api/v3/...` paths or paths relative to the API root.
pub fn split_target(raw: &str) -> Result<RawTarget, ToolError> {
    let trimmed = raw.trim();
    let invalid = |problem: &str| {
        ToolError::validation(RUN_API_TOOL, vec![Violation::new("query", problem)])
    };
    if trimmed.is_empty() {
        return Err(invalid("must be a non-empty path"));
    }
    if trimmed.contains("://") {
        return Err(invalid("must be a path, not an absolute URL"));
    }
    let (path, query) = match trimmed.split_once('?') {
        Some((path, query)) => (path, query),
        None => (trimmed, ""),
    };
    let path = path.trim_end_matches('/');
    let path = if path.starts_with(API_PREFIX) {
        path.to_string()
    } else if path.starts_with('/') {
        format!("{}{}", API_PREFIX, path)
    } else {
        format!("{}/{}", API_PREFIX, path)
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    Ok(RawTarget { path, query })
}

fn declared_query_param(descriptor: &EndpointDescriptor, wire: &str) -> Option<(String, ParamType)> {
    descriptor
        .params_in(ParamLocation::Query)
        .find(|p| p.wire_name() == wire)
        .map(|p| (p.name.clone(), p.kind))
}

fn coerce(kind: ParamType, value: Value) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    match kind {
        ParamType::Integer | ParamType::Id => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or(value),
        ParamType::Boolean => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value,
        },
        _ => value,
    }
}

#[async_trait]
impl ToolHandler for RawApiManager {
    async fn handle(&self, args: Value, cancel: CancellationToken) -> Result<Value, ToolError> {
        let plan = self.plan(&args)?;
        self.logger.debug(
            "run_api",
            Some(&serde_json::json!({
                "operation": plan.descriptor.key,
                "extra_query": plan.params.extra_query.len(),
            })),
        );
        let descriptor = plan.descriptor.clone();
        let result = self.executor.execute(plan, &cancel).await?;
        Ok(serde_json::json!({
            "operation": descriptor.key,
            "method": descriptor.method.as_str(),
            "path": descriptor.path,
            "response": result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_anchored_at_the_api_root() {
        let target = split_target("/projects/3/work_packages?pageSize=5&foo=bar").expect("target");
        assert_eq!(target.path, "/api/v3/projects/3/work_packages");
        assert_eq!(
            target.query,
            vec![
                ("pageSize".to_string(), "5".to_string()),
                ("foo".to_string(), "bar".to_string())
            ]
        );
        let target = split_target("/api/v3/users/").expect("target");
        assert_eq!(target.path, "/api/v3/users");
        assert!(target.query.is_empty());
    }

    #[test]
    fn absolute_urls_and_empty_paths_are_rejected() {
        assert!(split_target("https://elsewhere.example/api/v3/users").is_err());
        assert!(split_target("   ").is_err());
    }

    #[test]
    fn numeric_text_becomes_numbers_for_integer_params() {
        assert_eq!(coerce(ParamType::Id, Value::from("12")), Value::from(12));
        assert_eq!(coerce(ParamType::Id, Value::from("abc")), Value::from("abc"));
        assert_eq!(coerce(ParamType::String, Value::from("12")), Value::from("12"));
        assert_eq!(coerce(ParamType::Boolean, Value::from("true")), Value::Bool(true));
    }
}
