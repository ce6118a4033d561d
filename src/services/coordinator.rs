//! Sequenced multi-call operations with partial-failure reporting.

use crate::errors::{ToolError, ToolErrorKind};
use crate::services::endpoint::HttpMethod;
use crate::services::exchange::BoundParameters;
use crate::services::logger::Logger;
use crate::services::operation::OperationRunner;
use crate::services::schema_index::SchemaIndex;
use crate::utils::data_path::lookup;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where a step parameter takes its value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binding {
    Step {
        step: String,
        path: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        as_list: bool,
    },
    Arg {
        arg: String,
    },
    Const {
        #[serde(rename = "const")]
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,
    pub operation: String,
    #[serde(default)]
    pub bind: BTreeMap<String, Binding>,
    /// Argument that must be present for the step to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Committed,
    /// A read step; it ran but changed nothing on the backend.
    Executed,
    Failed,
    Skipped,
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub operation: String,
    pub state: StepState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeOutcome {
    pub steps: Vec<StepReport>,
    pub results: Map<String, Value>,
}

impl CompositeOutcome {
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "status": "committed",
            "steps": self.steps,
            "results": self.results,
        })
    }
}

#[derive(Clone)]
pub struct Coordinator {
    index: Arc<SchemaIndex>,
    runner: OperationRunner,
    logger: Logger,
}

impl Coordinator {
    pub fn new(index: Arc<SchemaIndex>, runner: OperationRunner, logger: &Logger) -> Self {
        Self {
            index,
            runner,
            logger: logger.child("coordinator"),
        }
    }

    /// Runs every step at most once, in order. Committed steps are never
    /// undone; a failure after a commit is reported as a partial failure.
    pub async fn run(
        &self,
        tool: &str,
        steps: &[StepSpec],
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<CompositeOutcome, ToolError> {
        let mut reports: Vec<StepReport> = steps
            .iter()
            .map(|step| StepReport {
                name: step.name.clone(),
                operation: step.operation.clone(),
                state: StepState::NotAttempted,
                error: None,
            })
            .collect();
        let mut results = Map::new();

        for (position, step) in steps.iter().enumerate() {
            if let Some(arg) = &step.when {
                if !args.get(arg).is_some_and(|v| !v.is_null()) {
                    reports[position].state = StepState::Skipped;
                    continue;
                }
            }

            let outcome = if cancel.is_cancelled() {
                Err(ToolError::cancelled(format!(
                    "{} was cancelled before step '{}'",
                    tool, step.name
                )))
            } else {
                self.run_step(step, args, &results, cancel).await
            };

            match outcome {
                Ok((value, state)) => {
                    reports[position].state = state;
                    self.logger.info(
                        "step finished",
                        Some(&serde_json::json!({
                            "tool": tool,
                            "step": step.name,
                            "operation": step.operation,
                            "state": state,
                        })),
                    );
                    results.insert(step.name.clone(), value);
                }
                Err(err) => {
                    reports[position].state = StepState::Failed;
                    reports[position].error = Some(err.to_value());
                    self.logger.warn(
                        "step failed",
                        Some(&serde_json::json!({
                            "tool": tool,
                            "step": step.name,
                            "operation": step.operation,
                            "code": err.code,
                        })),
                    );
                    return Err(aborted(tool, &step.name, err, reports, results));
                }
            }
        }

        Ok(CompositeOutcome {
            steps: reports,
            results,
        })
    }

    async fn run_step(
        &self,
        step: &StepSpec,
        args: &Map<String, Value>,
        results: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<(Value, StepState), ToolError> {
        let descriptor = self.index.resolve(&step.operation)?;
        let state = if descriptor.method == HttpMethod::Get {
            StepState::Executed
        } else {
            StepState::Committed
        };
        let mut values = Map::new();
        for (param, binding) in step.bind.iter() {
            if let Some(value) = resolve_binding(&step.name, binding, args, results)? {
                values.insert(param.clone(), value);
            }
        }
        let value = self
            .runner
            .run(&descriptor, &BoundParameters::new(values), cancel)
            .await?;
        Ok((value, state))
    }
}

fn resolve_binding(
    step: &str,
    binding: &Binding,
    args: &Map<String, Value>,
    results: &Map<String, Value>,
) -> Result<Option<Value>, ToolError> {
    match binding {
        Binding::Arg { arg } => Ok(args.get(arg).filter(|v| !v.is_null()).cloned()),
        Binding::Const { value } => Ok(Some(value.clone())),
        Binding::Step {
            step: source,
            path,
            as_list,
        } => {
            let value = results
                .get(source)
                .and_then(|result| lookup(result, path))
                .filter(|v| !v.is_null())
                .cloned()
                .ok_or_else(|| {
                    ToolError::protocol(format!(
                        "Step '{}' needs '{}' from the result of step '{}', which is missing",
                        step, path, source
                    ))
                })?;
            Ok(Some(if *as_list { Value::Array(vec![value]) } else { value }))
        }
    }
}

fn aborted(
    tool: &str,
    failed_step: &str,
    cause: ToolError,
    steps: Vec<StepReport>,
    results: Map<String, Value>,
) -> ToolError {
    let committed: Vec<&str> = steps
        .iter()
        .filter(|s| s.state == StepState::Committed)
        .map(|s| s.name.as_str())
        .collect();

    if committed.is_empty() {
        let mut details = match cause.details.clone() {
            Some(Value::Object(map)) => map,
            Some(other) => {
                let mut map = Map::new();
                map.insert("cause".to_string(), other);
                map
            }
            None => Map::new(),
        };
        details.insert("steps".to_string(), serde_json::json!(steps));
        details.insert("committed".to_string(), Value::Array(Vec::new()));
        details.insert("failed_step".to_string(), Value::String(failed_step.to_string()));
        let mut err = cause;
        err.details = Some(Value::Object(details));
        return err;
    }

    let hint = if cause.kind == ToolErrorKind::Cancelled {
        "The call was cancelled; committed steps remain on the backend"
    } else {
        "Committed steps were not rolled back; inspect or clean up the objects they created"
    };
    ToolError::partial_failure(format!(
        "{} committed {} of {} steps; step '{}' failed: {}",
        tool,
        committed.len(),
        steps.len(),
        failed_step,
        cause.message
    ))
    .with_hint(hint)
    .with_details(serde_json::json!({
        "steps": steps,
        "committed": committed,
        "failed_step": failed_step,
        "cause": cause.to_value(),
        "results": results,
    }))
}
