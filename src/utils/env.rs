/// Get environment variable with DEALGATE_ prefix, falling back to unprefixed version
///
/// This helper function checks for `DEALGATE_{key}` first, then falls back to `{key}`
/// so deployments can share variables like `API_BASE_URL` with other services.
///
/// # Examples
///
/// ```rust
/// use dealgate::utils::get_env_with_prefix;
///
/// // Checks DEALGATE_API_BASE_URL first, then API_BASE_URL
/// let base = get_env_with_prefix("API_BASE_URL");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("DEALGATE_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse a boolean flag the way operators tend to write them.
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
