//! poetry.lock parser

use super::version::Version;
use super::{normalize_name, ManifestError};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use toml::Value;

/// Packages the installer provisions for itself. Exempt from containment
/// unless the lock file pins them.
pub const BOOTSTRAP_PACKAGES: &[&str] = &["pip", "setuptools", "wheel"];

pub fn is_bootstrap_package(name: &str) -> bool {
    BOOTSTRAP_PACKAGES.contains(&name)
}

/// A dependency edge recorded under `[package.dependencies]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedDependency {
    pub name: String,
    pub optional: bool,
    /// Guarded by markers or a python restriction
    pub conditional: bool,
}

/// One `[[package]]` entry
#[derive(Debug, Clone)]
pub struct LockedPackage {
    /// Normalized name (PEP 503)
    pub name: String,
    pub version: Version,
    pub category: Option<String>,
    pub optional: bool,
    pub dependencies: Vec<LockedDependency>,
}

/// The Lock File
#[derive(Debug, Clone)]
pub struct LockFile {
    pub path: PathBuf,
    pub packages: Vec<LockedPackage>,
    pub lock_version: Option<String>,
    pub python_versions: Option<String>,
    pub content_hash: Option<String>,
}

impl LockFile {
    pub fn from_path(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Err(ManifestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = fs::read_to_string(path).map_err(|source| ManifestError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self, ManifestError> {
        let toml: Value =
            toml::from_str(content).map_err(|e: toml::de::Error| ManifestError::TomlParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let entries = toml
            .get("package")
            .and_then(|p| p.as_array())
            .ok_or_else(|| ManifestError::MissingField {
                path: path.to_path_buf(),
                field: "package".to_string(),
            })?;

        let mut packages = Vec::with_capacity(entries.len());
        let mut seen = BTreeSet::new();

        for entry in entries {
            let raw_name = entry.get("name").and_then(|n| n.as_str()).ok_or_else(|| {
                ManifestError::MissingField {
                    path: path.to_path_buf(),
                    field: "package.name".to_string(),
                }
            })?;
            let raw_version = entry
                .get("version")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ManifestError::MissingField {
                    path: path.to_path_buf(),
                    field: format!("package.version ({})", raw_name),
                })?;
            let version: Version =
                raw_version
                    .parse()
                    .map_err(|_| ManifestError::InvalidVersionSpec {
                        path: path.to_path_buf(),
                        spec: raw_version.to_string(),
                        message: format!("locked version of '{}' is not a valid version", raw_name),
                    })?;

            let name = normalize_name(raw_name);
            if !seen.insert(name.clone()) {
                return Err(ManifestError::DuplicatePin {
                    path: path.to_path_buf(),
                    name,
                });
            }

            let dependencies = entry
                .get("dependencies")
                .and_then(|d| d.as_table())
                .map(|table| {
                    table
                        .iter()
                        .map(|(dep_name, value)| locked_dependency(dep_name, value))
                        .collect()
                })
                .unwrap_or_default();

            packages.push(LockedPackage {
                name,
                version,
                category: entry
                    .get("category")
                    .and_then(|c| c.as_str())
                    .map(|c| c.to_string()),
                optional: entry
                    .get("optional")
                    .and_then(|o| o.as_bool())
                    .unwrap_or(false),
                dependencies,
            });
        }

        packages.sort_by(|a, b| a.name.cmp(&b.name));

        let metadata = toml.get("metadata");
        let meta_str = |key: &str| {
            metadata
                .and_then(|m| m.get(key))
                .and_then(|v| v.as_str())
                .map(|v| v.to_string())
        };

        Ok(Self {
            path: path.to_path_buf(),
            packages,
            lock_version: meta_str("lock-version"),
            python_versions: meta_str("python-versions"),
            content_hash: meta_str("content-hash"),
        })
    }

    pub fn package(&self, name: &str) -> Option<&LockedPackage> {
        let name = normalize_name(name);
        self.packages.iter().find(|p| p.name == name)
    }

    /// Every pinned version, keyed by normalized name
    pub fn pins(&self) -> BTreeMap<String, Version> {
        self.packages
            .iter()
            .map(|p| (p.name.clone(), p.version.clone()))
            .collect()
    }

    /// Packages that must be installed for `roots`, following only
    /// unconditional, non-optional edges through the lock graph.
    pub fn required_closure<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        let mut required = BTreeSet::new();
        let mut queue: Vec<String> = roots.into_iter().map(normalize_name).collect();

        while let Some(name) = queue.pop() {
            if !required.insert(name.clone()) {
                continue;
            }
            if let Some(package) = self.package(&name) {
                queue.extend(
                    package
                        .dependencies
                        .iter()
                        .filter(|d| !d.optional && !d.conditional)
                        .map(|d| d.name.clone()),
                );
            }
        }

        required
    }

    /// Render every pin as a pip constraints file, one `name==version` per line
    pub fn to_constraints(&self) -> String {
        self.pins()
            .iter()
            .map(|(name, version)| format!("{}=={}\n", name, version))
            .collect()
    }
}

fn locked_dependency(name: &str, value: &Value) -> LockedDependency {
    let (optional, conditional) = match value {
        Value::Table(table) => (
            table
                .get("optional")
                .and_then(|o| o.as_bool())
                .unwrap_or(false),
            table.contains_key("markers") || table.contains_key("python"),
        ),
        Value::Array(_) => (false, true),
        _ => (false, false),
    };

    LockedDependency {
        name: normalize_name(name),
        optional,
        conditional,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK: &str = r#"
[[package]]
name = "click"
version = "8.0.4"
description = "Composable command line interface toolkit"
category = "main"
optional = false
python-versions = ">=3.6"

[package.dependencies]
colorama = {version = "*", markers = "platform_system == \"Windows\""}

[[package]]
name = "colorama"
version = "0.4.4"
category = "main"
optional = false
python-versions = ">=2.7, !=3.0.*"

[[package]]
name = "uvicorn"
version = "0.17.6"
category = "main"
optional = false
python-versions = ">=3.7"

[package.dependencies]
asgiref = ">=3.4.0"
click = ">=7.0"
h11 = ">=0.8"
httptools = {version = ">=0.4.0", optional = true}

[[package]]
name = "asgiref"
version = "3.5.0"
category = "main"
optional = false
python-versions = ">=3.7"

[[package]]
name = "H11"
version = "0.13.0"
category = "main"
optional = false
python-versions = ">=3.6"

[[package]]
name = "httptools"
version = "0.4.0"
category = "main"
optional = true
python-versions = ">=3.5.0"

[metadata]
lock-version = "1.1"
python-versions = "^3.10"
content-hash = "abc123"
"#;

    fn lock() -> LockFile {
        LockFile::parse(Path::new("poetry.lock"), LOCK).unwrap()
    }

    #[test]
    fn test_parse_lock() {
        let lock = lock();
        assert_eq!(lock.packages.len(), 6);
        assert_eq!(lock.lock_version.as_deref(), Some("1.1"));
        assert_eq!(lock.python_versions.as_deref(), Some("^3.10"));
        assert_eq!(lock.content_hash.as_deref(), Some("abc123"));
        assert_eq!(lock.package("h11").unwrap().version.to_string(), "0.13.0");
        assert!(lock.package("httptools").unwrap().optional);
    }

    #[test]
    fn test_packages_sorted_and_normalized() {
        let binding = lock();
        let names: Vec<&str> = binding.packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["asgiref", "click", "colorama", "h11", "httptools", "uvicorn"]
        );
    }

    #[test]
    fn test_required_closure_skips_conditional_and_optional() {
        let closure = lock().required_closure(["uvicorn"]);
        let expected: BTreeSet<String> = ["uvicorn", "asgiref", "click", "h11"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(closure, expected);
    }

    #[test]
    fn test_constraints_file() {
        let constraints = lock().to_constraints();
        assert!(constraints.starts_with("asgiref==3.5.0\n"));
        assert!(constraints.contains("uvicorn==0.17.6\n"));
        assert_eq!(constraints.lines().count(), 6);
    }

    #[test]
    fn test_constraints_keep_pinned_bootstrap() {
        let lock = LockFile::parse(
            Path::new("poetry.lock"),
            "[[package]]\nname = \"setuptools\"\nversion = \"65.5.0\"\n\n[[package]]\nname = \"six\"\nversion = \"1.16.0\"\n",
        )
        .unwrap();
        assert_eq!(lock.to_constraints(), "setuptools==65.5.0\nsix==1.16.0\n");
        assert_eq!(lock.pins()["setuptools"].to_string(), "65.5.0");
    }

    #[test]
    fn test_duplicate_pin_rejected() {
        let err = LockFile::parse(
            Path::new("poetry.lock"),
            "[[package]]\nname = \"six\"\nversion = \"1.16.0\"\n\n[[package]]\nname = \"Six\"\nversion = \"1.15.0\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicatePin { .. }));
    }

    #[test]
    fn test_missing_packages_table() {
        let err = LockFile::parse(Path::new("poetry.lock"), "[metadata]\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { .. }));
    }

    #[test]
    fn test_invalid_locked_version() {
        let err = LockFile::parse(
            Path::new("poetry.lock"),
            "[[package]]\nname = \"six\"\nversion = \"latest\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidVersionSpec { .. }));
    }
}
