use crate::utils::data_path::lookup;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field selection applied to a resource, or to each item of a collection.
/// Only fields present in the source are copied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputShape {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pick: Vec<String>,
    /// Output field name to dotted source path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl OutputShape {
    pub fn is_identity(&self) -> bool {
        self.pick.is_empty() && self.fields.is_empty()
    }

    pub fn apply(&self, value: &Value) -> Value {
        if self.is_identity() {
            return value.clone();
        }
        let Value::Object(source) = value else {
            return value.clone();
        };
        let mut out = Map::new();
        for field in self.pick.iter() {
            if let Some(entry) = source.get(field) {
                out.insert(field.clone(), entry.clone());
            }
        }
        for (name, path) in self.fields.iter() {
            if let Some(entry) = lookup(value, path) {
                out.insert(name.clone(), entry.clone());
            }
        }
        Value::Object(out)
    }

    pub fn apply_items(&self, items: &[Value]) -> Vec<Value> {
        items.iter().map(|item| self.apply(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shape() -> OutputShape {
        serde_json::from_value(json!({
            "pick": ["id", "name", "active"],
            "fields": {"description": "description.raw", "parent": "_links.parent.title"}
        }))
        .expect("shape")
    }

    #[test]
    fn copies_present_fields_only() {
        let shaped = shape().apply(&json!({
            "id": 3,
            "name": "Demo",
            "description": {"format": "markdown", "raw": "text"},
            "_links": {"self": {"href": "/api/v3/projects/3"}}
        }));
        assert_eq!(shaped, json!({"id": 3, "name": "Demo", "description": "text"}));
    }

    #[test]
    fn identity_and_non_objects_pass_through() {
        let value = json!({"id": 1, "extra": true});
        assert_eq!(OutputShape::default().apply(&value), value);
        assert_eq!(shape().apply(&json!("text")), json!("text"));
    }

    #[test]
    fn unknown_shape_keys_are_rejected() {
        let parsed: Result<OutputShape, _> = serde_json::from_value(json!({"omit": ["id"]}));
        assert!(parsed.is_err());
    }
}
