use crate::error::StorageError;

/// Check that `name` can be used as a single entry name in the sandbox
pub fn validate_entry_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}
