//! Response Builder (§2, §4.10): renders human-readable `assistant_text`
//! strings from structured action results. Kept deliberately simple string
//! assembly, same register as the teacher's inline tool-result text.

pub fn search(status: &str, hit_count: usize, top_path: Option<&str>, advisory: bool, outcome: &str) -> String {
    let prefix = if advisory { "Advisory: " } else { "" };
    match status {
        "FOUND" => match top_path {
            Some(path) => format!("{prefix}Found {hit_count} candidate(s); top match is `{path}` ({outcome})."),
            None => format!("{prefix}Found {hit_count} candidate(s) ({outcome})."),
        },
        _ => "No matching documents found. Try action `catalog` to list what's indexed.".to_string(),
    }
}

pub fn catalog(count: usize) -> String {
    format!("Catalog has {count} document(s). Use action `search` with a query to find specific guidance.")
}

pub fn preflight(constraint_count: usize, pitfall_count: usize, has_dod: bool) -> String {
    let dod = if has_dod { " A definition-of-done document is available." } else { "" };
    format!("{constraint_count} governing constraint(s) and {pitfall_count} known pitfall(s) apply to this scope.{dod}")
}

pub fn validate(verdict: &str, gap_count: usize) -> String {
    match verdict {
        "VERIFIED" => "Completion claim looks verified; no gaps detected.".to_string(),
        "NEEDS_ARTIFACTS" => format!("Completion claimed but {gap_count} piece(s) of evidence are missing."),
        _ => "Could not determine completion status from the claim; please clarify.".to_string(),
    }
}

pub fn get(path: &str) -> String {
    format!("Returned content for `{path}`.")
}

pub fn version(tool_version: &str, schema_version: &str, commit: Option<&str>) -> String {
    match commit {
        Some(c) => format!("epistemic-arbiter {tool_version}, index schema {schema_version}, baseline commit {c}."),
        None => format!("epistemic-arbiter {tool_version}, index schema {schema_version}, no baseline resolved."),
    }
}

pub fn cleanup(removed: usize) -> String {
    if removed == 0 {
        "No stale baseline cache entries to remove.".to_string()
    } else {
        format!("Removed {removed} stale baseline cache entr{}.", if removed == 1 { "y" } else { "ies" })
    }
}

pub fn error(code: &str, message: &str) -> String {
    let suggestion = match code {
        "UNKNOWN_ACTION" => " use action `catalog` to list available documents.",
        "INPUT_REQUIRED" => " supply the `input` field with your query or claim.",
        _ => "",
    };
    format!("Error ({code}): {message}.{suggestion}")
}

pub fn orient(mode: &str) -> String {
    format!("Detected epistemic mode: {mode}.")
}

pub fn challenge(tension_count: usize) -> String {
    if tension_count == 0 {
        "No tensions surfaced between candidate documents.".to_string()
    } else {
        format!("{tension_count} tension(s) surfaced between candidate documents.")
    }
}

pub fn gate(ready: bool, missing_count: usize) -> String {
    if ready {
        "Gate prerequisites satisfied.".to_string()
    } else {
        format!("Gate blocked: {missing_count} prerequisite(s) still missing.")
    }
}

pub fn encode() -> String {
    "Decision artifact template generated.".to_string()
}
