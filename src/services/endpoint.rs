//! Endpoint descriptors: one backend route and its parameter contract.

use crate::constants::pagination::{OFFSET_PARAM, PAGE_SIZE_PARAM};
use crate::errors::InitError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Safe to repeat when the outcome of an attempt is unknown.
    pub fn is_idempotent(self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Put | HttpMethod::Delete)
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamLocation {
    Path,
    Query,
    Body,
    Attachment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Integer,
    Number,
    #[default]
    String,
    Boolean,
    Array,
    Object,
    /// Integer or string identifier.
    Id,
    Any,
}

impl ParamType {
    pub fn json_schema(self) -> Value {
        match self {
            ParamType::Integer => serde_json::json!({"type": "integer"}),
            ParamType::Number => serde_json::json!({"type": "number"}),
            ParamType::String => serde_json::json!({"type": "string"}),
            ParamType::Boolean => serde_json::json!({"type": "boolean"}),
            ParamType::Array => serde_json::json!({"type": "array"}),
            ParamType::Object => serde_json::json!({"type": "object"}),
            ParamType::Id => serde_json::json!({"type": ["integer", "string"]}),
            ParamType::Any => serde_json::json!({}),
        }
    }
}

/// How an argument value is turned into its wire form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Plain,
    /// JSON text in a query parameter; strings pass through untouched.
    Json,
    /// Arrays joined with commas.
    Csv,
    /// `true`/`false` text in a query parameter.
    BoolString,
    /// `{"href": template}` with `{value}` substituted.
    Href { template: String },
    /// List of hrefs, one per array element.
    HrefList { template: String },
    /// `{"raw": value}`, optionally with a markup `format`.
    Formattable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    /// Single-condition filter list: `[{field: {operator, values: [value]}}]`.
    Filter { field: String, operator: String },
    /// Object spread into one query pair per key.
    Expand,
}

impl Encoding {
    fn allowed_in(&self, location: ParamLocation) -> bool {
        match self {
            Encoding::Plain => true,
            Encoding::Href { .. } | Encoding::HrefList { .. } | Encoding::Formattable { .. } => {
                matches!(location, ParamLocation::Body)
            }
            Encoding::Json
            | Encoding::Csv
            | Encoding::BoolString
            | Encoding::Filter { .. }
            | Encoding::Expand => matches!(location, ParamLocation::Query),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub location: ParamLocation,
    #[serde(rename = "type", default)]
    pub kind: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire: Option<String>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: &str, location: ParamLocation, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            location,
            kind,
            required: false,
            wire: None,
            encoding: Encoding::Plain,
            default: None,
            description: None,
            constraints: None,
        }
    }

    /// Query key, path placeholder or dotted body path. Empty means body root.
    pub fn wire_name(&self) -> &str {
        self.wire.as_deref().unwrap_or(&self.name)
    }

    pub fn argument_schema(&self) -> Value {
        let mut schema = self.kind.json_schema();
        if let Value::Object(map) = &mut schema {
            if let Some(description) = &self.description {
                map.insert("description".to_string(), Value::String(description.clone()));
            }
            if let Some(default) = &self.default {
                map.insert("default".to_string(), default.clone());
            }
            if let Some(Value::Object(extra)) = &self.constraints {
                for (key, value) in extra {
                    map.insert(key.clone(), value.clone());
                }
            }
        }
        schema
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    #[default]
    Resource,
    Collection,
    Empty,
    Raw,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorSource {
    #[default]
    Manifest,
    SchemaDb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub key: String,
    pub method: HttpMethod,
    pub path: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub response: ResponseShape,
    /// Explicit retry safety; `None` falls back to the method default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_template: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require_any: Vec<String>,
    #[serde(default)]
    pub source: DescriptorSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<Value>,
}

impl EndpointDescriptor {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn params_in(&self, location: ParamLocation) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(move |p| p.location == location)
    }

    pub fn attachment_param(&self) -> Option<&ParamSpec> {
        self.params_in(ParamLocation::Attachment).next()
    }

    pub fn placeholders(&self) -> Vec<&str> {
        placeholders(&self.path)
    }

    /// Collection endpoints that accept `offset`/`page_size` query parameters.
    pub fn is_paginated(&self) -> bool {
        self.response == ResponseShape::Collection
            && self.param(OFFSET_PARAM).map(|p| p.location) == Some(ParamLocation::Query)
    }

    pub fn retry_safe_by_default(&self) -> bool {
        self.idempotent.unwrap_or_else(|| self.method.is_idempotent())
    }

    /// JSON Schema for tool arguments targeting this operation.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in self.params.iter() {
            properties.insert(param.name.clone(), param.argument_schema());
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    pub fn validate(&self) -> Result<(), InitError> {
        let fail = |reason: String| InitError::MalformedOperation {
            key: self.key.clone(),
            reason,
        };
        if self.key.trim().is_empty() {
            return Err(InitError::MalformedOperation {
                key: self.path.clone(),
                reason: "operation key is empty".to_string(),
            });
        }
        if !self.path.starts_with('/') {
            return Err(fail(format!("path '{}' must start with '/'", self.path)));
        }

        let mut names = HashSet::new();
        for param in self.params.iter() {
            if param.name.trim().is_empty() {
                return Err(fail("parameter with an empty name".to_string()));
            }
            if !names.insert(param.name.as_str()) {
                return Err(fail(format!("parameter '{}' is declared twice", param.name)));
            }
            if !param.encoding.allowed_in(param.location) {
                return Err(fail(format!(
                    "parameter '{}' uses an encoding not valid in {:?}",
                    param.name, param.location
                )));
            }
            if param.location == ParamLocation::Path && param.wire_name().is_empty() {
                return Err(fail(format!("path parameter '{}' has no wire name", param.name)));
            }
            if let Some(constraints) = &param.constraints {
                if !constraints.is_object() {
                    return Err(fail(format!(
                        "constraints of '{}' must be an object",
                        param.name
                    )));
                }
            }
        }

        let declared: HashSet<&str> = self
            .params_in(ParamLocation::Path)
            .map(|p| p.wire_name())
            .collect();
        let in_template: HashSet<&str> = self.placeholders().into_iter().collect();
        if declared != in_template {
            let mut missing: Vec<&str> = in_template.difference(&declared).copied().collect();
            let mut extra: Vec<&str> = declared.difference(&in_template).copied().collect();
            missing.sort_unstable();
            extra.sort_unstable();
            return Err(fail(format!(
                "path placeholders and path parameters disagree (undeclared: [{}], unused: [{}])",
                missing.join(", "),
                extra.join(", ")
            )));
        }
        if self.params_in(ParamLocation::Path).any(|p| !p.required) {
            return Err(fail("path parameters must be required".to_string()));
        }

        let attachments: Vec<&ParamSpec> = self.params_in(ParamLocation::Attachment).collect();
        if attachments.len() > 1 {
            return Err(fail("more than one attachment parameter".to_string()));
        }
        if !attachments.is_empty() && self.method == HttpMethod::Get {
            return Err(fail("GET operations cannot carry attachments".to_string()));
        }

        let has_offset = self.param(OFFSET_PARAM).is_some();
        let has_page_size = self.param(PAGE_SIZE_PARAM).is_some();
        if has_offset != has_page_size {
            return Err(fail(format!(
                "'{}' and '{}' must be declared together",
                OFFSET_PARAM, PAGE_SIZE_PARAM
            )));
        }
        if has_offset && self.response != ResponseShape::Collection {
            return Err(fail("only collection operations can paginate".to_string()));
        }

        for name in self.require_any.iter() {
            if !names.contains(name.as_str()) {
                return Err(fail(format!("require_any names unknown parameter '{}'", name)));
            }
        }
        if let Some(template) = &self.body_template {
            if !template.is_object() {
                return Err(fail("body_template must be an object".to_string()));
            }
        }
        Ok(())
    }
}

pub fn placeholders(path: &str) -> Vec<&str> {
    PLACEHOLDER
        .captures_iter(path)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(path: &str, params: Vec<ParamSpec>) -> EndpointDescriptor {
        EndpointDescriptor {
            key: "work_packages.view".to_string(),
            method: HttpMethod::Get,
            path: path.to_string(),
            summary: String::new(),
            params,
            response: ResponseShape::Resource,
            idempotent: None,
            body_template: None,
            require_any: Vec::new(),
            source: DescriptorSource::Manifest,
            request_schema: None,
            responses: None,
        }
    }

    fn path_param(name: &str, wire: &str) -> ParamSpec {
        let mut spec = ParamSpec::new(name, ParamLocation::Path, ParamType::Integer);
        spec.wire = Some(wire.to_string());
        spec.required = true;
        spec
    }

    #[test]
    fn well_formed_descriptor_validates() {
        let desc = descriptor(
            "/api/v3/work_packages/{id}",
            vec![path_param("work_package_id", "id")],
        );
        assert!(desc.validate().is_ok());
        assert_eq!(desc.placeholders(), vec!["id"]);
    }

    #[test]
    fn placeholder_mismatch_is_rejected() {
        let desc = descriptor("/api/v3/work_packages/{id}", vec![]);
        let err = desc.validate().expect_err("must fail");
        assert!(err.to_string().contains("undeclared: [id]"));
    }

    #[test]
    fn duplicate_parameter_names_are_rejected() {
        let desc = descriptor(
            "/api/v3/work_packages/{id}",
            vec![path_param("id", "id"), path_param("id", "id")],
        );
        assert!(desc.validate().is_err());
    }

    #[test]
    fn body_encodings_are_rejected_in_query() {
        let mut bad = ParamSpec::new("status_id", ParamLocation::Query, ParamType::Integer);
        bad.encoding = Encoding::Href {
            template: "/api/v3/statuses/{value}".to_string(),
        };
        let desc = descriptor("/api/v3/work_packages", vec![bad]);
        assert!(desc.validate().is_err());
    }

    #[test]
    fn method_defaults_drive_retry_safety() {
        let mut desc = descriptor("/api/v3/projects", vec![]);
        assert!(desc.retry_safe_by_default());
        desc.method = HttpMethod::Post;
        assert!(!desc.retry_safe_by_default());
        desc.idempotent = Some(true);
        assert!(desc.retry_safe_by_default());
    }

    #[test]
    fn input_schema_lists_required_arguments() {
        let mut subject = ParamSpec::new("subject", ParamLocation::Body, ParamType::String);
        subject.required = true;
        let desc = descriptor("/api/v3/work_packages", vec![subject]);
        let schema = desc.input_schema();
        assert_eq!(schema["required"], serde_json::json!(["subject"]));
        assert_eq!(schema["properties"]["subject"]["type"], "string");
        assert_eq!(schema["additionalProperties"], false);
    }

    #[test]
    fn encoding_deserializes_from_tagged_objects() {
        let encoding: Encoding = serde_json::from_value(serde_json::json!({
            "kind": "href", "template": "/api/v3/types/{value}"
        }))
        .expect("encoding");
        assert_eq!(
            encoding,
            Encoding::Href {
                template: "/api/v3/types/{value}".to_string()
            }
        );
    }
}
