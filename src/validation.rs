use crate::error::ApiError;

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.len();
    if len < min || len > max {
        return Err(ApiError::BadRequest(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        )));
    }
    Ok(())
}

pub fn check_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    check_length(field, value, 1, 4096)
}

pub fn check_target_ip(value: &str) -> Result<(), ApiError> {
    check_non_empty("target_ip", value)?;
    if value.parse::<std::net::IpAddr>().is_err() {
        return Err(ApiError::BadRequest(
            "target_ip must be a valid IPv4 or IPv6 address".into(),
        ));
    }
    Ok(())
}

pub fn check_port(port: i64) -> Result<u16, ApiError> {
    if port < 1 || port > i64::from(u16::MAX) {
        return Err(ApiError::BadRequest(format!(
            "port must be between 1 and 65535 (got {port})"
        )));
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(port as u16)
}

pub fn check_url(value: &str) -> Result<(), ApiError> {
    check_length("github_repo_url", value, 1, 2048)?;
    if !value.starts_with("http://") && !value.starts_with("https://") {
        return Err(ApiError::BadRequest(
            "github_repo_url must use http or https scheme".into(),
        ));
    }
    Ok(())
}

/// Rejects branch names that could escape the checkout command they are
/// interpolated into.
pub fn check_branch_name(value: &str) -> Result<(), ApiError> {
    check_length("github_branch", value, 1, 255)?;
    let safe = value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !safe || value.contains("..") || value.contains('\0') {
        return Err(ApiError::BadRequest(
            "github_branch contains characters unsafe to interpolate into a shell command".into(),
        ));
    }
    Ok(())
}
