//! "Did you mean" ranking for tool names and operation keys.

fn fold(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(ca != *cb);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b_chars.len()]
}

fn distance(input: &str, candidate: &str) -> Option<usize> {
    let a = fold(input);
    let b = fold(candidate);
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if a == b {
        return Some(0);
    }
    if a.contains(&b) || b.contains(&a) {
        return Some(1);
    }
    Some(edit_distance(&a, &b))
}

fn tolerance(input: &str) -> usize {
    match fold(input).len() {
        0 => 0,
        1..=4 => 1,
        5..=8 => 2,
        n => ((n as f32) * 0.35).floor().max(3.0) as usize,
    }
}

/// Closest candidates first; ties go to the shorter, then lexically smaller name.
pub fn suggest<S: AsRef<str>>(input: &str, candidates: &[S], limit: usize) -> Vec<String> {
    let allowed = tolerance(input);
    if allowed == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, &str)> = candidates
        .iter()
        .map(|c| c.as_ref())
        .filter_map(|c| distance(input, c).filter(|d| *d <= allowed).map(|d| (d, c)))
        .collect();
    scored.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.len().cmp(&b.1.len()))
            .then_with(|| a.1.cmp(b.1))
    });
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit.max(1))
        .map(|(_, c)| c.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::suggest;

    #[test]
    fn suggests_close_tool_names() {
        let tools = ["view_work_package", "view_project", "list_projects"];
        assert_eq!(suggest("view_workpackage", &tools, 3)[0], "view_work_package");
        assert_eq!(suggest("list_project", &tools, 3)[0], "list_projects");
    }

    #[test]
    fn returns_nothing_for_unrelated_or_empty_input() {
        let tools = ["view_project"];
        assert!(suggest("", &tools, 3).is_empty());
        assert!(suggest("delete_everything_now", &tools, 3).is_empty());
    }
}
