use crate::error::{Result, StorageError};

/// Longest key accepted, matching the S3 object key limit.
pub const MAX_KEY_LEN: usize = 1024;

/// Checks that a key is a single, non-hidden path segment.
///
/// The same rules apply to both backends so a key written to one can always be
/// written to the other.
pub fn validate_key(key: &str) -> Result<()> {
    let invalid = |reason| {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason,
        })
    };

    if key.is_empty() {
        return invalid("key cannot be empty");
    }
    if key.len() > MAX_KEY_LEN {
        return invalid("key is longer than 1024 bytes");
    }
    if key.contains('/') || key.contains('\\') {
        tracing::warn!("Path separator in artifact key: {}", key);
        return invalid("key cannot contain path separators");
    }
    // Also covers "." and "..". Hidden names are reserved for in-flight temp files.
    if key.starts_with('.') {
        return invalid("key cannot start with '.'");
    }
    // Reserved in URL-shaped locations; see `key_segment`.
    if key.contains(['?', '#', '%']) {
        return invalid("key cannot contain '?', '#' or '%'");
    }
    if key.chars().any(|c| c.is_control()) {
        return invalid("key cannot contain control characters");
    }

    Ok(())
}
