//! Dependency manifest and lock file handling
//!
//! The manifest (`pyproject.toml`) declares what the application depends on,
//! the lock file (`poetry.lock`) pins the exact version of every package that
//! may end up in the environment. [`consistency::check`] verifies that the two
//! agree before anything is installed.

pub mod consistency;
pub mod constraint;
pub mod lockfile;
pub mod pyproject;
pub mod version;

pub use consistency::{check as check_consistency, Inconsistency};
pub use constraint::{InvalidConstraint, VersionConstraint};
pub use lockfile::{is_bootstrap_package, LockFile, LockedDependency, LockedPackage};
pub use pyproject::{Manifest, Requirement};
pub use version::{InvalidVersion, Version};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    TomlParseError { path: PathBuf, message: String },

    #[error("Missing field '{field}' in {path}")]
    MissingField { path: PathBuf, field: String },

    #[error("Invalid version specification '{spec}' in {path}: {message}")]
    InvalidVersionSpec {
        path: PathBuf,
        spec: String,
        message: String,
    },

    #[error("Package '{name}' is pinned more than once in {path}")]
    DuplicatePin { path: PathBuf, name: String },
}

/// Normalize a distribution name (PEP 503): lowercase, runs of `-`, `_`, `.`
/// collapse to a single `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
            }
            in_separator = true;
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        lowercase = { "Django", "django" },
        underscore = { "crawler_server", "crawler-server" },
        dots = { "zope.interface", "zope-interface" },
        runs = { "Foo__Bar-.baz", "foo-bar-baz" },
        untouched = { "h11", "h11" },
    )]
    fn test_normalize_name(input: &str, expected: &str) {
        assert_eq!(normalize_name(input), expected);
    }
}
