use crate::utils::text::truncate_utf8_prefix;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;

const DEFAULT_REDACTION: &str = "[REDACTED]";
const INLINE_REDACTION: &str = "***REDACTED***";

static SENSITIVE_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "password",
        "secret",
        "token",
        "api_key",
        "apikey",
        "authorization",
        "proxy-authorization",
        "x-api-key",
        "cookie",
        "set-cookie",
    ]
    .into_iter()
    .collect()
});

static INLINE_REDACTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\b(Basic|Bearer)\s+([A-Za-z0-9+/._~=-]{8,})", "$1 ***REDACTED***"),
        (r"\bapikey:[A-Za-z0-9]{8,}\b", "apikey:***REDACTED***"),
        (
            r#"\b(password|token|api[_-]?key|secret|access[_-]?token)\b\s*([:=])\s*([^\s"'&]+)"#,
            "$1$2***REDACTED***",
        ),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = key.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    SENSITIVE_KEYS.contains(normalized.as_str())
        || normalized.contains("secret")
        || normalized.contains("password")
        || normalized.ends_with("_token")
}

fn truncate_string(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    format!("{}...", truncate_utf8_prefix(value, max_length))
}

/// Masks inline credentials, then any literal `extra_secrets` of useful length.
pub fn redact_text(value: &str, max_string: usize, extra_secrets: Option<&[String]>) -> String {
    let mut out = value.to_string();
    for (re, replacement) in INLINE_REDACTION_PATTERNS.iter() {
        if re.is_match(&out) {
            out = re.replace_all(&out, *replacement).to_string();
        }
    }
    for needle in extra_secrets.unwrap_or_default() {
        let needle = needle.trim();
        if needle.len() >= 6 {
            out = out.replace(needle, INLINE_REDACTION);
        }
    }
    truncate_string(&out, max_string)
}

/// Replaces literal credential material in every string of `value` and
/// leaves everything else untouched, keys and lengths included.
pub fn mask_literal_secrets(value: &Value, secrets: &[String]) -> Value {
    match value {
        Value::String(text) => {
            let mut out = text.clone();
            for needle in secrets.iter().map(|s| s.trim()).filter(|s| s.len() >= 6) {
                if out.contains(needle) {
                    out = out.replace(needle, INLINE_REDACTION);
                }
            }
            Value::String(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| mask_literal_secrets(item, secrets))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| (key.clone(), mask_literal_secrets(entry, secrets)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

pub fn redact_object(value: &Value, max_string: usize, extra_secrets: Option<&[String]>) -> Value {
    match value {
        Value::String(text) => Value::String(redact_text(text, max_string, extra_secrets)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_object(item, max_string, extra_secrets))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, entry)| {
                    let redacted = if is_sensitive_key(key) && !entry.is_null() {
                        Value::String(DEFAULT_REDACTION.to_string())
                    } else {
                        redact_object(entry, max_string, extra_secrets)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_object_masks_authorization_headers() {
        let input = serde_json::json!({"headers": {"Authorization": "Basic abc", "Accept": "json"}});
        let out = redact_object(&input, usize::MAX, None);
        assert_eq!(out["headers"]["Authorization"], "[REDACTED]");
        assert_eq!(out["headers"]["Accept"], "json");
    }

    #[test]
    fn redact_text_masks_inline_basic_credentials() {
        let out = redact_text("sent Basic YXBpa2V5OjEyMzQ1Njc4OTA= upstream", usize::MAX, None);
        assert_eq!(out, "sent Basic ***REDACTED*** upstream");
    }

    #[test]
    fn redact_text_masks_extra_secrets_and_truncates() {
        let secrets = vec!["supersecretvalue".to_string()];
        let out = redact_text("key=supersecretvalue tail", 12, Some(&secrets));
        assert!(!out.contains("supersecretvalue"));
        assert!(out.ends_with("..."));
    }

    #[test]
    fn literal_masking_leaves_backend_text_alone() {
        let secrets = vec!["YXBpa2V5OnNlY3JldA==".to_string()];
        let input = serde_json::json!({
            "password": "shown as stored",
            "description": {"raw": "Set password: hunter2 and token=abc123"},
            "echo": ["Basic YXBpa2V5OnNlY3JldA=="],
        });
        let out = mask_literal_secrets(&input, &secrets);
        assert_eq!(out["password"], "shown as stored");
        assert_eq!(out["description"]["raw"], "Set password: hunter2 and token=abc123");
        assert_eq!(out["echo"][0], "Basic ***REDACTED***");
    }

    #[test]
    fn work_package_fields_are_not_treated_as_sensitive() {
        assert!(!is_sensitive_key("lockVersion"));
        assert!(!is_sensitive_key("subject"));
        assert!(is_sensitive_key("refresh_token"));
    }
}
