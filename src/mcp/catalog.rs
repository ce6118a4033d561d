use crate::errors::InitError;
use crate::mcp::aliases::builtin_tool_aliases;
use crate::services::coordinator::{Binding, StepSpec};
use crate::services::endpoint::EndpointDescriptor;
use crate::services::schema_index::SchemaIndex;
use crate::services::validation::ArgumentValidator;
use crate::utils::output::OutputShape;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const ALL_ARG: &str = "all";
pub const MAX_ITEMS_ARG: &str = "max_items";

const EMBEDDED_CATALOG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tool_catalog.json"));

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    version: u32,
    tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub kind: ToolKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolKind {
    /// One backend operation; arguments are the operation's parameters.
    Operation {
        operation: String,
        #[serde(default)]
        output: OutputShape,
    },
    Composite {
        #[serde(rename = "inputSchema")]
        input_schema: Value,
        steps: Vec<StepSpec>,
    },
    Builtin {
        #[serde(rename = "inputSchema")]
        input_schema: Value,
    },
}

#[derive(Debug)]
pub struct ToolEntry {
    pub spec: ToolSpec,
    pub input_schema: Value,
    pub validator: ArgumentValidator,
    pub descriptor: Option<Arc<EndpointDescriptor>>,
}

impl ToolEntry {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn to_listing(&self) -> Value {
        serde_json::json!({
            "name": self.spec.name,
            "description": self.spec.description,
            "inputSchema": self.input_schema,
        })
    }
}

/// Declarative tool definitions checked against the schema index at startup.
#[derive(Debug)]
pub struct ToolCatalog {
    version: u32,
    entries: Vec<Arc<ToolEntry>>,
    by_name: HashMap<String, usize>,
}

impl ToolCatalog {
    pub fn embedded(index: &SchemaIndex) -> Result<Self, InitError> {
        Self::load(EMBEDDED_CATALOG, index)
    }

    pub fn load(raw: &str, index: &SchemaIndex) -> Result<Self, InitError> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        let mut entries = Vec::with_capacity(file.tools.len());
        let mut by_name = HashMap::new();
        for spec in file.tools {
            if by_name.contains_key(&spec.name) {
                return Err(InitError::Catalog(format!("tool '{}' is declared twice", spec.name)));
            }
            let entry = build_entry(spec, index)?;
            by_name.insert(entry.spec.name.clone(), entries.len());
            entries.push(Arc::new(entry));
        }
        for (alias, target) in builtin_tool_aliases() {
            if by_name.contains_key(*alias) {
                return Err(InitError::Catalog(format!("alias '{}' shadows a tool", alias)));
            }
            if !by_name.contains_key(*target) {
                return Err(InitError::Catalog(format!(
                    "alias '{}' targets unknown tool '{}'",
                    alias, target
                )));
            }
        }
        Ok(Self {
            version: file.version,
            entries,
            by_name,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolEntry>> {
        self.by_name.get(name).map(|idx| &self.entries[*idx])
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<ToolEntry>> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    pub fn builtin_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| matches!(e.spec.kind, ToolKind::Builtin { .. }))
            .map(|e| e.name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn list_tools(&self) -> Vec<Value> {
        self.entries.iter().map(|e| e.to_listing()).collect()
    }
}

fn fail(tool: &str, reason: impl std::fmt::Display) -> InitError {
    InitError::Catalog(format!("{}: {}", tool, reason))
}

fn build_entry(spec: ToolSpec, index: &SchemaIndex) -> Result<ToolEntry, InitError> {
    let (input_schema, require_any, descriptor) = match &spec.kind {
        ToolKind::Operation { operation, .. } => {
            let descriptor = index
                .get(operation)
                .cloned()
                .ok_or_else(|| fail(&spec.name, format!("unknown operation '{}'", operation)))?;
            (operation_schema(&spec.name, &descriptor)?, descriptor.require_any.clone(), Some(descriptor))
        }
        ToolKind::Composite { input_schema, steps } => {
            check_steps(&spec.name, input_schema, steps, index)?;
            (input_schema.clone(), Vec::new(), None)
        }
        ToolKind::Builtin { input_schema } => (input_schema.clone(), Vec::new(), None),
    };
    if input_schema.get("type").and_then(|v| v.as_str()) != Some("object") {
        return Err(fail(&spec.name, "inputSchema must describe an object"));
    }
    let validator = ArgumentValidator::compile(&spec.name, input_schema.clone(), require_any)?;
    Ok(ToolEntry {
        spec,
        input_schema,
        validator,
        descriptor,
    })
}

fn operation_schema(tool: &str, descriptor: &EndpointDescriptor) -> Result<Value, InitError> {
    let mut schema = descriptor.input_schema();
    if descriptor.is_paginated() {
        if descriptor.param(ALL_ARG).is_some() || descriptor.param(MAX_ITEMS_ARG).is_some() {
            return Err(fail(tool, "operation parameters collide with walk arguments"));
        }
        if let Some(Value::Object(properties)) = schema.get_mut("properties") {
            properties.insert(
                ALL_ARG.to_string(),
                serde_json::json!({
                    "type": "boolean",
                    "description": "Walk every page instead of returning one page"
                }),
            );
            properties.insert(
                MAX_ITEMS_ARG.to_string(),
                serde_json::json!({
                    "type": "integer",
                    "minimum": 1,
                    "description": "Stop a walk after this many items"
                }),
            );
        }
    }
    Ok(schema)
}

fn check_steps(
    tool: &str,
    input_schema: &Value,
    steps: &[StepSpec],
    index: &SchemaIndex,
) -> Result<(), InitError> {
    if steps.is_empty() {
        return Err(fail(tool, "composite tool without steps"));
    }
    let properties: HashSet<&str> = input_schema
        .get("properties")
        .and_then(|v| v.as_object())
        .map(|map| map.keys().map(|k| k.as_str()).collect())
        .unwrap_or_default();
    let mut earlier: HashSet<&str> = HashSet::new();
    for step in steps.iter() {
        let descriptor = index.get(&step.operation).ok_or_else(|| {
            fail(tool, format!("step '{}' uses unknown operation '{}'", step.name, step.operation))
        })?;
        for (param, binding) in step.bind.iter() {
            if descriptor.param(param).is_none() {
                return Err(fail(
                    tool,
                    format!("step '{}' binds unknown parameter '{}'", step.name, param),
                ));
            }
            match binding {
                Binding::Arg { arg } if !properties.contains(arg.as_str()) => {
                    return Err(fail(
                        tool,
                        format!("step '{}' reads undeclared argument '{}'", step.name, arg),
                    ))
                }
                Binding::Step { step: source, .. } if !earlier.contains(source.as_str()) => {
                    return Err(fail(
                        tool,
                        format!("step '{}' reads step '{}' before it runs", step.name, source),
                    ))
                }
                _ => {}
            }
        }
        if let Some(arg) = &step.when {
            if !properties.contains(arg.as_str()) {
                return Err(fail(
                    tool,
                    format!("step '{}' is gated on undeclared argument '{}'", step.name, arg),
                ));
            }
        }
        if !earlier.insert(step.name.as_str()) {
            return Err(fail(tool, format!("step name '{}' is used twice", step.name)));
        }
    }
    Ok(())
}
