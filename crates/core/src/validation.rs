use thiserror::Error;

/// Hard cap on a single uploaded file.
pub const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
/// Files above this size go through the chunked upload path.
pub const CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Temp files written during atomic replacement carry this prefix and are
/// never valid logical file names.
pub const TEMP_PREFIX: &str = ".tmp-";

const MAX_NAME_LENGTH: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file name must be a single non-empty path component")]
    InvalidFileName,
    #[error("file exceeds {0} MB limit")]
    FileTooLarge(u64),
}

/// A logical file name is one UTF-8 path component: no separators, no NUL,
/// not a dot entry, and not the reserved temp prefix.
pub fn validate_file_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::InvalidFileName);
    }
    if name == "." || name == ".." {
        return Err(ValidationError::InvalidFileName);
    }
    if name.starts_with(TEMP_PREFIX) {
        return Err(ValidationError::InvalidFileName);
    }
    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
    {
        return Err(ValidationError::InvalidFileName);
    }
    Ok(())
}

pub fn file_too_large(limit_bytes: u64) -> ValidationError {
    ValidationError::FileTooLarge(limit_bytes / (1024 * 1024))
}
