//! Tool invocation routing: name resolution, argument validation, call
//! planning and result envelopes.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::constants::pagination::OFFSET_PARAM;
use crate::errors::{InitError, ToolError};
use crate::mcp::aliases::{builtin_tool_aliases, canonical_tool_name};
use crate::mcp::catalog::{ToolCatalog, ToolEntry, ToolKind, ALL_ARG, MAX_ITEMS_ARG};
use crate::mcp::envelope::{build_generic_envelope, CallMeta};
use crate::services::coordinator::Coordinator;
use crate::services::endpoint::{EndpointDescriptor, ResponseShape};
use crate::services::exchange::BoundParameters;
use crate::services::logger::Logger;
use crate::services::operation::OperationRunner;
use crate::services::pagination::{PageCursor, PaginationWalker};
use crate::services::validation::ArgumentValidator;
use crate::utils::output::OutputShape;
use crate::utils::tool_errors::unknown_name_error;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, args: Value, cancel: CancellationToken) -> Result<Value, ToolError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// How a collection operation is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    Page(PageCursor),
    Walk { max_items: Option<usize> },
}

/// One resolved operation with bound values, ready to execute.
#[derive(Debug, Clone)]
pub struct CallPlan {
    pub descriptor: Arc<EndpointDescriptor>,
    pub params: BoundParameters,
    pub mode: CollectionMode,
    pub output: OutputShape,
}

impl CallPlan {
    /// Splits walk arguments off `args`; the rest bind to the operation.
    pub fn from_arguments(
        descriptor: Arc<EndpointDescriptor>,
        mut args: Map<String, Value>,
        output: OutputShape,
    ) -> Self {
        let walk_all = args
            .remove(ALL_ARG)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let max_items = args
            .remove(MAX_ITEMS_ARG)
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);
        let mode = if walk_all || max_items.is_some() {
            CollectionMode::Walk { max_items }
        } else {
            let offset = args
                .get(OFFSET_PARAM)
                .and_then(|v| v.as_u64())
                .map(|offset| PageCursor { offset })
                .unwrap_or_else(PageCursor::first);
            CollectionMode::Page(offset)
        };
        Self {
            descriptor,
            params: BoundParameters::new(args),
            mode,
            output,
        }
    }
}

#[derive(Clone)]
pub struct PlanExecutor {
    runner: OperationRunner,
    walker: PaginationWalker,
}

impl PlanExecutor {
    pub fn new(runner: OperationRunner, walker: PaginationWalker) -> Self {
        Self { runner, walker }
    }

    pub async fn execute(&self, plan: CallPlan, cancel: &CancellationToken) -> Result<Value, ToolError> {
        if plan.descriptor.response != ResponseShape::Collection {
            let value = self.runner.run(&plan.descriptor, &plan.params, cancel).await?;
            return Ok(plan.output.apply(&value));
        }
        match plan.mode {
            CollectionMode::Page(cursor) => {
                let mut page = self
                    .walker
                    .page(&plan.descriptor, &plan.params, cursor, cancel)
                    .await?;
                page.items = plan.output.apply_items(&page.items);
                Ok(page.to_value())
            }
            CollectionMode::Walk { max_items } => {
                let mut collected = self
                    .walker
                    .collect(plan.descriptor.clone(), plan.params, max_items, cancel)
                    .await?;
                collected.items = plan.output.apply_items(&collected.items);
                Ok(collected.to_value())
            }
        }
    }
}

#[derive(Clone)]
pub struct ToolRouter {
    logger: Logger,
    catalog: Arc<ToolCatalog>,
    executor: PlanExecutor,
    coordinator: Coordinator,
    handlers: Arc<HashMap<String, Arc<dyn ToolHandler>>>,
    secrets: Arc<Vec<String>>,
}

impl ToolRouter {
    pub fn new(
        logger: &Logger,
        catalog: Arc<ToolCatalog>,
        executor: PlanExecutor,
        coordinator: Coordinator,
        handlers: HashMap<String, Arc<dyn ToolHandler>>,
        secrets: Vec<String>,
    ) -> Result<Self, InitError> {
        validate_tool_wiring(&catalog, &handlers)?;
        Ok(Self {
            logger: logger.child("router"),
            catalog,
            executor,
            coordinator,
            handlers: Arc::new(handlers),
            secrets: Arc::new(secrets),
        })
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    fn resolve(&self, name: &str) -> Result<(Arc<ToolEntry>, Option<String>), ToolError> {
        let canonical = canonical_tool_name(name);
        let invoked_as = (canonical != name).then(|| name.to_string());
        match self.catalog.get(canonical) {
            Some(entry) => Ok((entry.clone(), invoked_as)),
            None => {
                let mut known: Vec<&str> = self.catalog.names();
                known.extend(builtin_tool_aliases().iter().map(|(alias, _)| *alias));
                Err(unknown_name_error("tool", name, &known))
            }
        }
    }

    pub async fn dispatch(
        &self,
        invocation: ToolInvocation,
        cancel: CancellationToken,
    ) -> Result<Value, ToolError> {
        let started = Instant::now();
        let trace_id = uuid::Uuid::new_v4().to_string();
        let (entry, invoked_as) = self.resolve(&invocation.name)?;
        let args = ArgumentValidator::normalize(&invocation.arguments)?;
        entry.validator.validate(&args)?;

        self.logger.debug(
            "dispatch",
            Some(&serde_json::json!({"tool": entry.name(), "trace_id": trace_id})),
        );

        let outcome = self.run(&entry, args, &cancel).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                self.logger.warn(
                    "tool call failed",
                    Some(&serde_json::json!({
                        "tool": entry.name(),
                        "trace_id": trace_id,
                        "code": err.code,
                        "duration_ms": duration_ms,
                    })),
                );
                return Err(err);
            }
        };
        self.logger.info(
            "tool call completed",
            Some(&serde_json::json!({
                "tool": entry.name(),
                "trace_id": trace_id,
                "duration_ms": duration_ms,
            })),
        );

        let meta = CallMeta {
            trace_id,
            duration_ms,
            invoked_as,
        };
        Ok(build_generic_envelope(
            entry.name(),
            &result,
            &meta,
            Some(self.secrets.as_slice()),
        ))
    }

    async fn run(
        &self,
        entry: &ToolEntry,
        args: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ToolError> {
        match &entry.spec.kind {
            ToolKind::Operation { output, .. } => {
                let descriptor = entry.descriptor.clone().ok_or_else(|| {
                    ToolError::internal(format!("{} has no resolved operation", entry.name()))
                })?;
                let plan = CallPlan::from_arguments(descriptor, args, output.clone());
                self.executor.execute(plan, cancel).await
            }
            ToolKind::Composite { steps, .. } => self
                .coordinator
                .run(entry.name(), steps, &args, cancel)
                .await
                .map(|outcome| outcome.to_value()),
            ToolKind::Builtin { .. } => {
                let handler = self.handlers.get(entry.name()).ok_or_else(|| {
                    ToolError::internal(format!("No handler registered for {}", entry.name()))
                })?;
                handler.handle(Value::Object(args), cancel.clone()).await
            }
        }
    }
}

/// Every builtin catalog entry needs a handler and every handler an entry.
pub fn validate_tool_wiring(
    catalog: &ToolCatalog,
    handlers: &HashMap<String, Arc<dyn ToolHandler>>,
) -> Result<(), InitError> {
    let builtins = catalog.builtin_names();
    let mut missing: Vec<&str> = builtins
        .iter()
        .copied()
        .filter(|name| !handlers.contains_key(*name))
        .collect();
    let mut orphaned: Vec<&str> = handlers
        .keys()
        .map(|k| k.as_str())
        .filter(|name| !builtins.contains(name))
        .collect();
    if missing.is_empty() && orphaned.is_empty() {
        return Ok(());
    }
    missing.sort_unstable();
    orphaned.sort_unstable();
    Err(InitError::Catalog(format!(
        "builtin wiring mismatch (no handler: [{}], not in catalog: [{}])",
        missing.join(", "),
        orphaned.join(", ")
    )))
}
