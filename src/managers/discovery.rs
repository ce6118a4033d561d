use crate::constants::limits::{SEARCH_DEFAULT_LIMIT, SEARCH_MAX_LIMIT};
use crate::errors::ToolError;
use crate::mcp::catalog::ToolCatalog;
use crate::services::dispatch::ToolHandler;
use crate::services::endpoint::{DescriptorSource, EndpointDescriptor, ParamLocation};
use crate::services::exchange::HttpExchange;
use crate::services::logger::Logger;
use crate::services::schema_index::{SchemaIndex, SearchHit};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryAction {
    QueryApi,
    DescribeOperation,
    SchemaInfo,
}

impl DiscoveryAction {
    pub const ALL: [DiscoveryAction; 3] = [
        DiscoveryAction::QueryApi,
        DiscoveryAction::DescribeOperation,
        DiscoveryAction::SchemaInfo,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            DiscoveryAction::QueryApi => "query_api",
            DiscoveryAction::DescribeOperation => "describe_operation",
            DiscoveryAction::SchemaInfo => "schema_info",
        }
    }
}

/// Read-only tools over the schema index.
pub struct DiscoveryManager {
    logger: Logger,
    index: Arc<SchemaIndex>,
    exchange: Arc<HttpExchange>,
    catalog: Arc<ToolCatalog>,
}

impl DiscoveryManager {
    pub fn new(
        logger: &Logger,
        index: Arc<SchemaIndex>,
        exchange: Arc<HttpExchange>,
        catalog: Arc<ToolCatalog>,
    ) -> Self {
        Self {
            logger: logger.child("discovery"),
            index,
            exchange,
            catalog,
        }
    }

    pub fn query_api(&self, args: &Value) -> Result<Value, ToolError> {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(SEARCH_DEFAULT_LIMIT)
            .clamp(1, SEARCH_MAX_LIMIT);

        let results = self.index.search(query);
        let total = results.len();
        let hits: Vec<Value> = results
            .iter()
            .skip(offset)
            .take(limit)
            .map(render_hit)
            .collect();
        let next_offset = (offset + hits.len() < total).then_some(offset + hits.len());
        self.logger.debug(
            "query_api",
            Some(&serde_json::json!({"query": query, "total": total})),
        );
        Ok(serde_json::json!({
            "query": query,
            "total": total,
            "offset": offset,
            "results": hits,
            "next_offset": next_offset,
        }))
    }

    pub fn describe_operation(&self, args: &Value) -> Result<Value, ToolError> {
        let key = args.get("key").and_then(|v| v.as_str()).unwrap_or("");
        let descriptor = self.index.resolve(key)?;
        let mut out = serde_json::to_value(descriptor.as_ref())
            .map_err(|err| ToolError::internal(format!("Failed to render {}: {}", key, err)))?;
        if let Value::Object(map) = &mut out {
            map.insert("input_schema".to_string(), descriptor.input_schema());
            map.insert(
                "retry_safe".to_string(),
                Value::Bool(self.exchange.is_retry_safe(&descriptor)),
            );
            map.insert(
                "paginated".to_string(),
                Value::Bool(descriptor.is_paginated()),
            );
            let tools: Vec<&str> = self
                .catalog
                .entries()
                .filter(|e| e.descriptor.as_ref().is_some_and(|d| d.key == descriptor.key))
                .map(|e| e.name())
                .collect();
            map.insert("tools".to_string(), serde_json::json!(tools));
        }
        Ok(out)
    }

    pub fn schema_info(&self) -> Result<Value, ToolError> {
        Ok(serde_json::json!({
            "version": self.index.version(),
            "fingerprint": self.index.fingerprint(),
            "operations": self.index.len(),
            "by_source": {
                "manifest": self.index.count_by_source(DescriptorSource::Manifest),
                "schema_db": self.index.count_by_source(DescriptorSource::SchemaDb),
            },
            "tools": self.catalog.len(),
            "catalog_version": self.catalog.version(),
        }))
    }
}

fn render_hit(hit: &SearchHit) -> Value {
    let descriptor = &hit.descriptor;
    serde_json::json!({
        "key": descriptor.key,
        "method": descriptor.method.as_str(),
        "path": descriptor.path,
        "summary": descriptor.summary,
        "request_body": request_body(descriptor),
        "responses": descriptor.responses,
        "score": hit.score,
    })
}

/// The stored request schema, else the body fields the operation accepts.
fn request_body(descriptor: &EndpointDescriptor) -> Value {
    if let Some(schema) = &descriptor.request_schema {
        return schema.clone();
    }
    let fields: Vec<Value> = descriptor
        .params_in(ParamLocation::Body)
        .map(|p| {
            serde_json::json!({
                "name": p.name,
                "wire": p.wire_name(),
                "required": p.required,
            })
        })
        .collect();
    if fields.is_empty() {
        Value::Null
    } else {
        Value::Array(fields)
    }
}

pub struct DiscoveryHandler {
    manager: Arc<DiscoveryManager>,
    action: DiscoveryAction,
}

impl DiscoveryHandler {
    pub fn new(manager: Arc<DiscoveryManager>, action: DiscoveryAction) -> Self {
        Self { manager, action }
    }
}

#[async_trait]
impl ToolHandler for DiscoveryHandler {
    async fn handle(&self, args: Value, _cancel: CancellationToken) -> Result<Value, ToolError> {
        match self.action {
            DiscoveryAction::QueryApi => self.manager.query_api(&args),
            DiscoveryAction::DescribeOperation => self.manager.describe_operation(&args),
            DiscoveryAction::SchemaInfo => self.manager.schema_info(),
        }
    }
}
