/// Maximum rate-limit retries accepted on the command line.
const MAX_RETRIES: u32 = 20;

/// Validate bucket name: non-empty, no whitespace or path separators.
///
/// Naming rules are left to S3; legacy buckets may use uppercase letters
/// and underscores.
pub fn validate_bucket(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("bucket name must not be empty".to_string());
    }

    if s.chars().any(|ch| ch == '/' || ch.is_whitespace()) {
        return Err(format!(
            "bucket name must not contain '/' or whitespace: {s}"
        ));
    }

    Ok(s.to_string())
}

/// Validate retry count: must be between 0 and 20.
pub fn validate_retries(s: &str) -> Result<u32, String> {
    let value = s
        .parse::<u32>()
        .map_err(|_| format!("invalid number: {}", s))?;

    if value > MAX_RETRIES {
        return Err(format!("retries cannot exceed {MAX_RETRIES}"));
    }

    Ok(value)
}

/// Validate search limit: must be between 1 and 100.
pub fn validate_search_limit(s: &str) -> Result<usize, String> {
    let value = s
        .parse::<usize>()
        .map_err(|_| format!("invalid number: {}", s))?;

    if value == 0 {
        return Err("limit must be at least 1".to_string());
    }

    if value > 100 {
        return Err("limit cannot exceed 100".to_string());
    }

    Ok(value)
}
