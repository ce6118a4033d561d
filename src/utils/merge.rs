use serde_json::Value;

/// Deep merge of `overlay` into `base`. Objects merge key by key; any other
/// overlay value replaces. A `null` in the overlay removes the key.
pub fn merge_deep(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    base_map.remove(key);
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_deep(existing, value)
                    }
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::merge_deep;
    use serde_json::json;

    #[test]
    fn merges_nested_links_and_drops_nulls() {
        let mut base = json!({"subject": "a", "_links": {"type": {"href": "/t/1"}}, "gone": 1});
        merge_deep(
            &mut base,
            &json!({"_links": {"status": {"href": "/s/2"}}, "gone": null}),
        );
        assert_eq!(
            base,
            json!({"subject": "a", "_links": {"type": {"href": "/t/1"}, "status": {"href": "/s/2"}}})
        );
    }
}
