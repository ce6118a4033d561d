//! Dotted paths (`_links.status.href`, `elements[0].id`) into JSON values.

use crate::errors::ToolError;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, ToolError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;
    for ch in trimmed.chars() {
        match ch {
            '.' if !in_brackets => flush(&mut current, &mut segments),
            '[' if !in_brackets => {
                flush(&mut current, &mut segments);
                in_brackets = true;
            }
            ']' if in_brackets => {
                flush(&mut current, &mut segments);
                in_brackets = false;
            }
            _ => current.push(ch),
        }
    }
    if in_brackets {
        return Err(ToolError::invalid_params(format!(
            "Path '{}' has an unclosed bracket",
            path
        )));
    }
    flush(&mut current, &mut segments);
    Ok(segments)
}

fn flush(current: &mut String, segments: &mut Vec<PathSegment>) {
    let raw = current.trim();
    if !raw.is_empty() {
        let segment = match raw.parse::<usize>() {
            Ok(index) => PathSegment::Index(index),
            _ => PathSegment::Key(raw.trim_matches(|c| c == '"' || c == '\'').to_string()),
        };
        segments.push(segment);
    }
    current.clear();
}

/// Borrowing lookup; `None` when any segment is absent. Empty path is the root.
pub fn lookup<'a>(target: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path).ok()?;
    let mut current = target;
    for segment in segments.iter() {
        current = match segment {
            PathSegment::Key(key) => current.get(key)?,
            PathSegment::Index(index) => current.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

/// Writes `value` at a key-only dotted path, creating intermediate objects.
/// An empty path merges an object value into the root.
pub fn set_path_value(target: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), ToolError> {
    let segments = parse_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return match value {
            Value::Object(map) => {
                target.extend(map);
                Ok(())
            }
            _ => Err(ToolError::invalid_params(
                "Only an object can be placed at the body root",
            )),
        };
    };
    let mut current = target;
    for segment in parents {
        let PathSegment::Key(key) = segment else {
            return Err(index_not_supported(path));
        };
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return Err(index_not_supported(path)),
        };
    }
    match last {
        PathSegment::Key(key) => {
            current.insert(key.clone(), value);
            Ok(())
        }
        PathSegment::Index(_) => Err(index_not_supported(path)),
    }
}

fn index_not_supported(path: &str) -> ToolError {
    ToolError::invalid_params(format!("Path '{}' cannot be written: indexes are read-only", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_follows_keys_and_indexes() {
        let doc = json!({"_embedded": {"elements": [{"id": 7}]}});
        assert_eq!(lookup(&doc, "_embedded.elements[0].id"), Some(&json!(7)));
        assert_eq!(lookup(&doc, "_embedded.missing"), None);
        assert_eq!(lookup(&doc, ""), Some(&doc));
    }

    #[test]
    fn set_path_value_creates_nested_objects() {
        let mut body = Map::new();
        set_path_value(&mut body, "_links.status", json!({"href": "/api/v3/statuses/1"}))
            .expect("set");
        set_path_value(&mut body, "subject", json!("Fix login")).expect("set");
        assert_eq!(
            Value::Object(body),
            json!({"_links": {"status": {"href": "/api/v3/statuses/1"}}, "subject": "Fix login"})
        );
    }

    #[test]
    fn set_path_value_merges_objects_at_root() {
        let mut body = Map::new();
        set_path_value(&mut body, "", json!({"name": "Demo"})).expect("set");
        assert_eq!(body.get("name"), Some(&json!("Demo")));
        assert!(set_path_value(&mut body, "", json!(3)).is_err());
    }
}
