//! Pure, idempotent helpers for turning caller-supplied names and env-file
//! bytes into values safe to interpolate into remote shell commands.

const MAX_CONTAINER_NAME_LEN: usize = 50;

/// Lowercase; characters outside `[a-z0-9-]` become `-`; collapse and trim
/// leading/trailing `-`; empty becomes `app`; truncate to 50 characters.
pub fn sanitize(input: &str) -> String {
    let lowered = input.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut last_was_dash = false;
    for c in lowered.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '-' {
            c
        } else {
            '-'
        };
        if mapped == '-' {
            if last_was_dash {
                continue;
            }
            last_was_dash = true;
        } else {
            last_was_dash = false;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches('-');
    let result = if trimmed.is_empty() { "app" } else { trimmed };
    let truncated: String = result.chars().take(MAX_CONTAINER_NAME_LEN).collect();
    let retrimmed = truncated.trim_matches('-');
    if retrimmed.is_empty() { "app".to_string() } else { retrimmed.to_string() }
}

/// Compute the canonical container name per the precedence rule: explicit
/// name wins, then `deployknot-{project}-{deployment}`, then
/// `deployknot-{id}`.
pub fn container_name(
    explicit: Option<&str>,
    project_name: Option<&str>,
    deployment_name: Option<&str>,
    deployment_id: uuid::Uuid,
) -> String {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    match (project_name, deployment_name) {
        (Some(p), Some(d)) if !p.is_empty() && !d.is_empty() => {
            format!("deployknot-{}-{}", sanitize(p), sanitize(d))
        }
        _ => format!("deployknot-{deployment_id}"),
    }
}

/// Normalize env-file bytes into `KEY=VALUE\n` lines: trim each line, drop
/// blank lines and comment lines (`#`), require `=`, trim key/value, strip
/// one layer of matched surrounding quotes from the value.
pub fn normalize_env_file(input: &str) -> String {
    let mut lines = Vec::new();
    for raw_line in input.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = strip_matched_quotes(value.trim());
        if key.is_empty() {
            continue;
        }
        lines.push(format!("{key}={value}"));
    }
    lines.join("\n")
}

fn strip_matched_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}
