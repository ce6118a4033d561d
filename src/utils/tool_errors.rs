use crate::constants::limits::SUGGESTION_LIMIT;
use crate::errors::ToolError;
use crate::utils::suggest::suggest;

/// NotFound for an unregistered tool name or operation key, with suggestions.
pub fn unknown_name_error<S: AsRef<str>>(what: &str, name: &str, known: &[S]) -> ToolError {
    let suggestions = suggest(name, known, SUGGESTION_LIMIT);
    let hint = if suggestions.is_empty() {
        match what {
            "tool" => "Call tools/list to see the available tools".to_string(),
            _ => "Use query_api to search the available operations".to_string(),
        }
    } else {
        format!("Did you mean: {}?", suggestions.join(", "))
    };
    ToolError::not_found(format!("Unknown {}: {}", what, name))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "name": name,
            "did_you_mean": suggestions,
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ToolErrorKind;

    #[test]
    fn unknown_tool_is_not_found_with_suggestions() {
        let err = unknown_name_error("tool", "view_projekt", &["view_project", "list_users"]);
        assert_eq!(err.kind, ToolErrorKind::NotFound);
        assert_eq!(err.details.as_ref().unwrap()["did_you_mean"][0], "view_project");
    }
}
