//! Validation helpers for context names.

use crate::error::{ConfigError, ConfigResult};

/// Ensure a context name can be used as part of a credential file name.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidContext`] for empty names, names containing
/// path separators, or names that would escape the configuration directory.
pub fn validate_context(context: &str) -> ConfigResult<()> {
    let invalid = |reason| ConfigError::InvalidContext {
        value: context.to_string(),
        reason,
    };

    if context.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if context.contains(['/', '\\']) {
        return Err(invalid("must not contain path separators"));
    }
    if context.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    if context.chars().any(char::is_control) {
        return Err(invalid("must not contain control characters"));
    }
    Ok(())
}
