//! Validation functions for configuration values.
//!
//! Custom `validator` hooks for the YAML config: blank strings, the sync tool
//! path and the log file path.

use tempfile::NamedTempFile;
use validator::ValidationError;

use std::path::Path;

pub fn validate_not_blank<S: AsRef<str>>(value: S) -> Result<(), ValidationError> {
    if value.as_ref().trim().is_empty() {
        return Err(ValidationError::new("BlankValue").with_message("must not be blank".into()));
    }

    Ok(())
}

pub fn validate_path_not_blank<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    if path.as_ref().as_os_str().is_empty() {
        return Err(ValidationError::new("BlankPath").with_message("path must not be empty".into()));
    }

    Ok(())
}

pub fn validate_log_file<P: AsRef<Path>>(path: P) -> Result<(), ValidationError> {
    let path = path.as_ref();
    validate_path_not_blank(path)?;
    if path.is_dir() {
        return Err(ValidationError::new("InvalidLogFile")
            .with_message(format!("{:?} is a directory", path).into()));
    }

    Ok(())
}

/// Checks that the log file can be appended to without creating it.
///
/// An existing file is opened in append mode. For a missing one, a throwaway
/// file is created and removed in the parent directory, so the answer comes
/// from the OS rather than from permission bits.
pub fn check_log_file_writable<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let path = path.as_ref();
    if path.exists() {
        if path.is_dir() {
            return Err(std::io::Error::other(format!("{:?} is a directory", path)));
        }
        return std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .map(|_| ());
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !std::fs::metadata(parent)?.is_dir() {
        return Err(std::io::Error::other(format!(
            "parent {:?} is not a directory",
            parent
        )));
    }
    NamedTempFile::new_in(parent)?.close()
}
