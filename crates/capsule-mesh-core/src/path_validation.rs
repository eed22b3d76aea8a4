//! Capsule name validation.
//!
//! Names become file names inside the store directory, so they must not be able to
//! escape it or collide with the store's own temporary files.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

pub const MAX_NAME_LEN: usize = 128;

/// Suffix of every persisted capsule entry.
pub const ENTRY_SUFFIX: &str = ".capsule.json";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("Capsule name is empty")]
    Empty,

    #[error("Capsule name exceeds {MAX_NAME_LEN} bytes")]
    TooLong,

    #[error("Capsule name '{0}' must start with a letter or digit and contain only [A-Za-z0-9._-]")]
    InvalidCharacters(String),
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap_or_else(|e| panic!("name regex: {e}"))
    })
}

/// Reject names that could traverse out of the store or shadow temp files.
pub fn validate_capsule_name(name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong);
    }
    if !name_pattern().is_match(name) || name.contains("..") {
        return Err(NameError::InvalidCharacters(name.to_string()));
    }
    Ok(())
}

/// Path of the entry for an already-validated `name` under `root`.
pub fn entry_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}{ENTRY_SUFFIX}"))
}

/// Inverse of [`entry_path`]: the capsule name for a directory entry, if it is one.
pub fn name_from_entry(file_name: &str) -> Option<&str> {
    let name = file_name.strip_suffix(ENTRY_SUFFIX)?;
    validate_capsule_name(name).ok().map(|_| name)
}
