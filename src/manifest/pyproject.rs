//! pyproject.toml parser
//!
//! Handles:
//! - project.name / project.version / project.dependencies (PEP 621)
//! - project.optional-dependencies (PEP 621)
//! - tool.poetry.name / version / dependencies / packages (Poetry)
//! - build-system.build-backend

use super::constraint::VersionConstraint;
use super::{normalize_name, ManifestError};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use toml::Value;

// PEP 508: name [extras] (version spec) ; markers
static PEP508_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[([^\]]*)\])?\s*(@\s*\S+|\(?[^;()]*\)?)\s*(?:;\s*(.*))?$",
    )
    .unwrap()
});

/// A dependency declared by the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Normalized name (PEP 503)
    pub name: String,
    pub constraint: VersionConstraint,
    pub extras: Vec<String>,
    /// Only installed when an extra of this project is requested
    pub optional: bool,
    /// Restricted by an environment marker or python version
    pub conditional: bool,
    /// Declared by URL, path or VCS reference rather than by version
    pub direct_reference: bool,
}

impl Requirement {
    /// A requirement that pip will always install for this project
    pub fn is_unconditional(&self) -> bool {
        !self.optional && !self.conditional
    }
}

/// The Dependency Manifest
#[derive(Debug, Clone)]
pub struct Manifest {
    pub path: PathBuf,
    /// Normalized project name
    pub name: String,
    pub version: Option<String>,
    pub requires_python: Option<VersionConstraint>,
    pub dependencies: Vec<Requirement>,
    /// Source directories of the importable package(s), relative to the project root
    pub packages: Vec<PathBuf>,
    /// Extra files the build backend reads (readme, license)
    pub support_files: Vec<PathBuf>,
    pub build_backend: Option<String>,
}

impl Manifest {
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

        let project = toml.get("project");
        let poetry = toml.get("tool").and_then(|t| t.get("poetry"));

        let name = project
            .and_then(|p| p.get("name"))
            .or_else(|| poetry.and_then(|p| p.get("name")))
            .and_then(|n| n.as_str())
            .ok_or_else(|| ManifestError::MissingField {
                path: path.to_path_buf(),
                field: "project.name".to_string(),
            })?;

        let version = project
            .and_then(|p| p.get("version"))
            .or_else(|| poetry.and_then(|p| p.get("version")))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());

        let mut requires_python = None;
        let mut dependencies = Vec::new();

        if let Some(spec) = project
            .and_then(|p| p.get("requires-python"))
            .and_then(|v| v.as_str())
        {
            requires_python = Some(parse_constraint(path, spec)?);
        }

        if let Some(deps) = project
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_array())
        {
            for dep in deps.iter().filter_map(|d| d.as_str()) {
                dependencies.push(parse_pep508(path, dep, false)?);
            }
        }

        if let Some(optional) = project
            .and_then(|p| p.get("optional-dependencies"))
            .and_then(|d| d.as_table())
        {
            for deps in optional.values().filter_map(|d| d.as_array()) {
                for dep in deps.iter().filter_map(|d| d.as_str()) {
                    dependencies.push(parse_pep508(path, dep, true)?);
                }
            }
        }

        if let Some(poetry_deps) = poetry
            .and_then(|p| p.get("dependencies"))
            .and_then(|d| d.as_table())
        {
            for (dep_name, value) in poetry_deps {
                if dep_name == "python" {
                    if let Some(spec) = value.as_str() {
                        requires_python = Some(parse_constraint(path, spec)?);
                    }
                    continue;
                }
                dependencies.push(parse_poetry_dependency(path, dep_name, value)?);
            }
        }

        let packages = poetry_packages(poetry)
            .unwrap_or_else(|| vec![PathBuf::from(normalize_name(name).replace('-', "_"))]);

        let mut support_files = Vec::new();
        let readme = project
            .and_then(|p| p.get("readme"))
            .or_else(|| poetry.and_then(|p| p.get("readme")));
        if let Some(readme) = readme {
            match readme {
                Value::String(file) => support_files.push(PathBuf::from(file)),
                Value::Array(files) => support_files.extend(
                    files
                        .iter()
                        .filter_map(|f| f.as_str())
                        .map(PathBuf::from),
                ),
                Value::Table(table) => {
                    if let Some(file) = table.get("file").and_then(|f| f.as_str()) {
                        support_files.push(PathBuf::from(file));
                    }
                }
                _ => {}
            }
        }
        if let Some(file) = project
            .and_then(|p| p.get("license"))
            .and_then(|l| l.get("file"))
            .and_then(|f| f.as_str())
        {
            support_files.push(PathBuf::from(file));
        }

        let build_backend = toml
            .get("build-system")
            .and_then(|b| b.get("build-backend"))
            .and_then(|b| b.as_str())
            .map(|b| b.to_string());

        Ok(Self {
            path: path.to_path_buf(),
            name: normalize_name(name),
            version,
            requires_python,
            dependencies,
            packages,
            support_files,
            build_backend,
        })
    }

    pub fn dependency(&self, name: &str) -> Option<&Requirement> {
        let name = normalize_name(name);
        self.dependencies.iter().find(|d| d.name == name)
    }
}

fn parse_constraint(path: &Path, spec: &str) -> Result<VersionConstraint, ManifestError> {
    spec.parse()
        .map_err(|e: super::constraint::InvalidConstraint| ManifestError::InvalidVersionSpec {
            path: path.to_path_buf(),
            spec: spec.to_string(),
            message: e.message,
        })
}

/// Parse a PEP 508 dependency string such as `requests[socks]>=2.8 ; python_version < "3.11"`
fn parse_pep508(path: &Path, dep: &str, optional: bool) -> Result<Requirement, ManifestError> {
    let caps = PEP508_RE
        .captures(dep)
        .ok_or_else(|| ManifestError::InvalidVersionSpec {
            path: path.to_path_buf(),
            spec: dep.to_string(),
            message: "not a PEP 508 requirement".to_string(),
        })?;

    let extras = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let spec = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
    let direct_reference = spec.starts_with('@');
    let constraint = if direct_reference {
        VersionConstraint::any()
    } else {
        parse_constraint(path, spec.trim_start_matches('(').trim_end_matches(')'))?
    };

    Ok(Requirement {
        name: normalize_name(&caps[1]),
        constraint,
        extras,
        optional,
        conditional: caps.get(4).is_some_and(|m| !m.as_str().trim().is_empty()),
        direct_reference,
    })
}

/// Parse one `[tool.poetry.dependencies]` entry
///
/// Values may be a constraint string, a table (`{version, optional, markers,
/// python, extras}` or a `path`/`git`/`url` source), or an array of tables
/// with mutually exclusive markers.
fn parse_poetry_dependency(
    path: &Path,
    name: &str,
    value: &Value,
) -> Result<Requirement, ManifestError> {
    let mut requirement = Requirement {
        name: normalize_name(name),
        constraint: VersionConstraint::any(),
        extras: vec![],
        optional: false,
        conditional: false,
        direct_reference: false,
    };

    match value {
        Value::String(spec) => {
            requirement.constraint = parse_constraint(path, spec)?;
        }
        Value::Table(table) => {
            if let Some(spec) = table.get("version").and_then(|v| v.as_str()) {
                requirement.constraint = parse_constraint(path, spec)?;
            }
            requirement.optional = table
                .get("optional")
                .and_then(|o| o.as_bool())
                .unwrap_or(false);
            requirement.conditional =
                table.contains_key("markers") || table.contains_key("python");
            requirement.direct_reference = ["path", "git", "url"]
                .iter()
                .any(|key| table.contains_key(*key));
            if let Some(extras) = table.get("extras").and_then(|e| e.as_array()) {
                requirement.extras = extras
                    .iter()
                    .filter_map(|e| e.as_str())
                    .map(|e| e.to_string())
                    .collect();
            }
        }
        Value::Array(entries) => {
            let constraints = entries
                .iter()
                .filter_map(|e| e.get("version").and_then(|v| v.as_str()))
                .map(|spec| parse_constraint(path, spec))
                .collect::<Result<Vec<_>, _>>()?;
            requirement.constraint = VersionConstraint::union(constraints);
            requirement.conditional = true;
        }
        _ => {
            return Err(ManifestError::InvalidVersionSpec {
                path: path.to_path_buf(),
                spec: value.to_string(),
                message: format!("unsupported dependency declaration for '{}'", name),
            })
        }
    }

    Ok(requirement)
}

fn poetry_packages(poetry: Option<&Value>) -> Option<Vec<PathBuf>> {
    let includes = poetry?.get("packages")?.as_array()?;
    let packages: Vec<PathBuf> = includes
        .iter()
        .filter_map(|entry| {
            let include = entry.get("include")?.as_str()?;
            let from = entry.get("from").and_then(|f| f.as_str());
            Some(match from {
                Some(from) => Path::new(from).join(include),
                None => PathBuf::from(include),
            })
        })
        .collect();

    if packages.is_empty() {
        None
    } else {
        Some(packages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Manifest {
        Manifest::parse(Path::new("pyproject.toml"), content).unwrap()
    }

    #[test]
    fn test_parse_poetry_manifest() {
        let manifest = parse(
            r#"
[tool.poetry]
name = "Crawler_Server"
version = "0.1.0"
readme = "README.md"
packages = [{ include = "crawler_server" }]

[tool.poetry.dependencies]
python = "^3.10"
fastapi = "^0.73.0"
boto3 = { version = "^1.20.54", optional = true }
uvicorn = { version = "^0.17.4", extras = ["standard"] }
colorama = { version = "*", markers = "sys_platform == 'win32'" }

[build-system]
requires = ["poetry-core>=1.0.0"]
build-backend = "poetry.core.masonry.api"
"#,
        );

        assert_eq!(manifest.name, "crawler-server");
        assert_eq!(manifest.version.as_deref(), Some("0.1.0"));
        assert!(manifest.requires_python.is_some());
        assert_eq!(manifest.dependencies.len(), 4);
        assert_eq!(manifest.packages, vec![PathBuf::from("crawler_server")]);
        assert_eq!(manifest.support_files, vec![PathBuf::from("README.md")]);
        assert_eq!(
            manifest.build_backend.as_deref(),
            Some("poetry.core.masonry.api")
        );

        let boto3 = manifest.dependency("boto3").unwrap();
        assert!(boto3.optional);
        assert!(!boto3.is_unconditional());

        let uvicorn = manifest.dependency("uvicorn").unwrap();
        assert_eq!(uvicorn.extras, vec!["standard".to_string()]);
        assert!(uvicorn.is_unconditional());

        assert!(manifest.dependency("colorama").unwrap().conditional);
    }

    #[test]
    fn test_parse_pep621_manifest() {
        let manifest = parse(
            r#"
[project]
name = "crawler-server"
version = "0.2.0"
requires-python = ">=3.10"
dependencies = [
    "fastapi>=0.73,<1.0",
    "requests[socks] (>=2.27)",
    "tomli; python_version < '3.11'",
    "mylib @ https://example.com/mylib-1.0.tar.gz",
]

[project.optional-dependencies]
s3 = ["boto3>=1.20"]
"#,
        );

        assert_eq!(manifest.packages, vec![PathBuf::from("crawler_server")]);
        assert_eq!(manifest.dependencies.len(), 5);

        let requests = manifest.dependency("requests").unwrap();
        assert_eq!(requests.extras, vec!["socks".to_string()]);
        assert!(requests.constraint.matches(&"2.27.1".parse().unwrap()));

        assert!(manifest.dependency("tomli").unwrap().conditional);
        assert!(manifest.dependency("mylib").unwrap().direct_reference);
        assert!(manifest.dependency("boto3").unwrap().optional);
    }

    #[test]
    fn test_poetry_packages_from_src() {
        let manifest = parse(
            r#"
[tool.poetry]
name = "app"
version = "1.0"
packages = [{ include = "app", from = "src" }]
"#,
        );
        assert_eq!(manifest.packages, vec![PathBuf::from("src/app")]);
    }

    #[test]
    fn test_multiple_constraints_dependency() {
        let manifest = parse(
            r#"
[tool.poetry]
name = "app"
version = "1.0"

[tool.poetry.dependencies]
numpy = [
    { version = "<1.22", python = "<3.8" },
    { version = "^1.22", python = ">=3.8" },
]
"#,
        );
        let numpy = manifest.dependency("numpy").unwrap();
        assert!(numpy.conditional);
        assert!(numpy.constraint.matches(&"1.21.0".parse().unwrap()));
        assert!(numpy.constraint.matches(&"1.23.0".parse().unwrap()));
    }

    #[test]
    fn test_missing_name() {
        let err = Manifest::parse(Path::new("pyproject.toml"), "[tool.black]\n").unwrap_err();
        assert!(matches!(err, ManifestError::MissingField { .. }));
    }

    #[test]
    fn test_invalid_toml() {
        let err = Manifest::parse(Path::new("pyproject.toml"), "[project\n").unwrap_err();
        assert!(matches!(err, ManifestError::TomlParseError { .. }));
    }

    #[test]
    fn test_invalid_constraint() {
        let err = Manifest::parse(
            Path::new("pyproject.toml"),
            "[tool.poetry]\nname = \"x\"\n[tool.poetry.dependencies]\nfoo = \"~=1\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidVersionSpec { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Manifest::from_path(Path::new("/nonexistent/pyproject.toml")).unwrap_err();
        assert!(matches!(err, ManifestError::NotFound { .. }));
    }
}
