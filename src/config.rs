//! Configuration management for venvpack
//!
//! A [`PipelineConfig`] is assembled once, validated, and then passed by
//! reference to every stage and to the launcher. Layers, lowest first:
//!
//! 1. Built-in defaults
//! 2. `venvpack.toml` in the project directory (optional)
//! 3. `VENVPACK_*` environment variables
//! 4. CLI flags (applied by the CLI handlers)
//!
//! # Environment Variables
//!
//! - `VENVPACK_PYTHON_VERSION`: interpreter version of the base environment - default: "3.10"
//! - `VENVPACK_INTERPRETER`: interpreter executable used by the builder - default: "python3"
//! - `VENVPACK_APP`: ASGI application as `module.path:attribute` - default: "crawler_server.app:app"
//! - `VENVPACK_PORT`: port the server binds - default: "8080"
//! - `VENVPACK_INSTALLER_TIMEOUT`: installer network timeout in seconds - default: "100"
//! - `VENVPACK_INSTALLER_VERSION`: pinned installer version - default: unset
//!
//! `VENVPACK_LOG_LEVEL` and `VENVPACK_LOG_JSON` are read by [`crate::util::logging`].
//!
//! # Example
//!
//! ```no_run
//! use venvpack::PipelineConfig;
//! use std::path::Path;
//!
//! let config = PipelineConfig::load(Path::new(".")).expect("valid configuration");
//! println!("{}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the optional configuration file in the project directory
pub const CONFIG_FILE: &str = "venvpack.toml";

const DEFAULT_PYTHON_VERSION: &str = "3.10";
const DEFAULT_INTERPRETER: &str = "python3";
const DEFAULT_WORKDIR: &str = "/app";
const DEFAULT_INSTALLER_TIMEOUT_SECS: u64 = 100;
const DEFAULT_APP: &str = "crawler_server.app:app";
const DEFAULT_SERVER: &str = "uvicorn";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_VENV_PATH: &str = "/venv";
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    /// Configuration file could not be read or parsed
    #[error("Invalid configuration file {path}: {message}")]
    FileError { path: PathBuf, message: String },
}

/// Seed for Python's string hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HashSeedRepr", into = "HashSeedRepr")]
pub enum HashSeed {
    /// A fresh seed per process start
    Random,
    /// Fixed seed, reproducible across runs
    Fixed(u32),
}

impl HashSeed {
    /// Whether two processes started with this setting hash strings identically
    pub fn is_reproducible(&self) -> bool {
        matches!(self, HashSeed::Fixed(_))
    }

    /// The value for `PYTHONHASHSEED`
    pub fn env_value(&self) -> String {
        match self {
            HashSeed::Random => "random".to_string(),
            HashSeed::Fixed(seed) => seed.to_string(),
        }
    }
}

impl std::str::FromStr for HashSeed {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("random") {
            return Ok(HashSeed::Random);
        }
        trimmed
            .parse::<u32>()
            .map(HashSeed::Fixed)
            .map_err(|_| ConfigError::ParseError {
                field: "hash_seed".to_string(),
                error: format!(
                    "'{}' is neither \"random\" nor an integer in 0..=4294967295",
                    s
                ),
            })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum HashSeedRepr {
    Seed(u32),
    Text(String),
}

impl TryFrom<HashSeedRepr> for HashSeed {
    type Error = ConfigError;

    fn try_from(repr: HashSeedRepr) -> Result<Self, Self::Error> {
        match repr {
            HashSeedRepr::Seed(seed) => Ok(HashSeed::Fixed(seed)),
            HashSeedRepr::Text(text) => text.parse(),
        }
    }
}

impl From<HashSeed> for HashSeedRepr {
    fn from(seed: HashSeed) -> Self {
        match seed {
            HashSeed::Random => HashSeedRepr::Text("random".to_string()),
            HashSeed::Fixed(n) => HashSeedRepr::Seed(n),
        }
    }
}

/// How a pinned installer version is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinPolicy {
    /// Install exactly the pinned version
    #[default]
    Enforce,
    /// Upgrade to the latest installer, only log the declared version
    Hint,
}

/// Interpreter and runtime flags shared by every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BaseConfig {
    pub python_version: String,
    pub interpreter: String,
    /// Base image reference; derived from the python version when unset
    pub image: Option<String>,
    pub workdir: PathBuf,
    pub fault_handler: bool,
    pub unbuffered: bool,
    pub hash_seed: HashSeed,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            image: None,
            workdir: PathBuf::from(DEFAULT_WORKDIR),
            fault_handler: true,
            unbuffered: true,
            hash_seed: HashSeed::Random,
        }
    }
}

impl BaseConfig {
    pub fn image_ref(&self) -> String {
        self.image
            .clone()
            .unwrap_or_else(|| format!("python:{}-slim-bullseye", self.python_version))
    }
}

/// Package installer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    pub no_cache: bool,
    pub disable_version_check: bool,
    pub timeout_secs: u64,
    /// Installer version to pin, e.g. "22.0.4"
    pub version: Option<String>,
    pub pin_policy: PinPolicy,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            no_cache: true,
            disable_version_check: true,
            timeout_secs: DEFAULT_INSTALLER_TIMEOUT_SECS,
            version: None,
            pin_policy: PinPolicy::Enforce,
        }
    }
}

impl InstallerConfig {
    /// `PIP_*` variables exported while the installer runs
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if self.no_cache {
            env.insert("PIP_NO_CACHE_DIR".to_string(), "1".to_string());
        }
        if self.disable_version_check {
            env.insert("PIP_DISABLE_PIP_VERSION_CHECK".to_string(), "1".to_string());
        }
        env.insert(
            "PIP_DEFAULT_TIMEOUT".to_string(),
            self.timeout_secs.to_string(),
        );
        env
    }
}

/// Builder inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Manifest path, relative to the project directory
    pub manifest: PathBuf,
    /// Lock file path, relative to the project directory
    pub lockfile: PathBuf,
    /// Application source directories; taken from the manifest when empty
    pub sources: Vec<PathBuf>,
    /// Where the environment lives inside the runtime image
    pub venv_path: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("pyproject.toml"),
            lockfile: PathBuf::from("poetry.lock"),
            sources: Vec::new(),
            venv_path: PathBuf::from(DEFAULT_VENV_PATH),
        }
    }
}

/// Startup contract of the runtime image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// ASGI application as `module.path:attribute`
    pub app: String,
    /// Server module run with `python -m`
    pub server: String,
    pub host: String,
    pub port: u16,
    /// Variables the application needs from the container environment
    pub required_env: Vec<String>,
    /// HTTP path probed by the image healthcheck; `None` disables it
    pub healthcheck_path: Option<String>,
    pub shutdown_grace_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            app: DEFAULT_APP.to_string(),
            server: DEFAULT_SERVER.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            required_env: Vec::new(),
            healthcheck_path: Some("/".to_string()),
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub base: BaseConfig,
    pub installer: InstallerConfig,
    pub build: BuildConfig,
    pub runtime: RuntimeConfig,
}

impl PipelineConfig {
    /// Defaults, then `venvpack.toml` from `project_dir`, then the process
    /// environment. Validates the result.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file_or_default(&project_dir.join(CONFIG_FILE))?;
        config.apply_env_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file; a missing file yields the defaults
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::FileError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `VENVPACK_*` overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(version) = lookup("VENVPACK_PYTHON_VERSION") {
            self.base.python_version = version;
        }
        if let Some(interpreter) = lookup("VENVPACK_INTERPRETER") {
            self.base.interpreter = interpreter;
        }
        if let Some(app) = lookup("VENVPACK_APP") {
            self.runtime.app = app;
        }
        if let Some(port) = lookup("VENVPACK_PORT") {
            self.runtime.port = parse_field("VENVPACK_PORT", &port)?;
        }
        if let Some(timeout) = lookup("VENVPACK_INSTALLER_TIMEOUT") {
            self.installer.timeout_secs = parse_field("VENVPACK_INSTALLER_TIMEOUT", &timeout)?;
        }
        if let Some(version) = lookup("VENVPACK_INSTALLER_VERSION") {
            self.installer.version = Some(version).filter(|v| !v.trim().is_empty());
        }
        Ok(())
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let version_ok = !self.base.python_version.is_empty()
            && self
                .base
                .python_version
                .split('.')
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
        if !version_ok {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid python version '{}', expected e.g. \"3.10\"",
                self.base.python_version
            )));
        }

        if self.base.interpreter.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Interpreter must not be empty".to_string(),
            ));
        }

        if !self.base.workdir.is_absolute() || !self.build.venv_path.is_absolute() {
            return Err(ConfigError::ValidationFailed(
                "Image workdir and venv path must be absolute".to_string(),
            ));
        }

        if self.installer.timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Installer timeout must be at least 1 second".to_string(),
            ));
        }

        if self.runtime.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "Port must be between 1 and 65535".to_string(),
            ));
        }

        crate::launch::AppTarget::parse(&self.runtime.app)
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        if let Some(path) = &self.runtime.healthcheck_path {
            if !path.starts_with('/') {
                return Err(ConfigError::ValidationFailed(format!(
                    "Healthcheck path '{}' must start with '/'",
                    path
                )));
            }
        }

        if let Some(name) = self
            .runtime
            .required_env
            .iter()
            .find(|name| name.is_empty() || name.contains('='))
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid required variable name '{}'",
                name
            )));
        }

        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::ParseError {
            field: field.to_string(),
            error: e.to_string(),
        })
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "venvpack configuration:")?;
        writeln!(f, "  Python: {}", self.base.python_version)?;
        writeln!(f, "  Base image: {}", self.base.image_ref())?;
        writeln!(f, "  Interpreter: {}", self.base.interpreter)?;
        writeln!(f, "  Hash seed: {}", self.base.hash_seed.env_value())?;
        writeln!(
            f,
            "  Installer: timeout {}s, pin {}",
            self.installer.timeout_secs,
            self.installer.version.as_deref().unwrap_or("latest")
        )?;
        writeln!(f, "  Manifest: {}", self.build.manifest.display())?;
        writeln!(f, "  Lock file: {}", self.build.lockfile.display())?;
        writeln!(
            f,
            "  App: {} via {} on {}:{}",
            self.runtime.app, self.runtime.server, self.runtime.host, self.runtime.port
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_configuration() {
        let config = PipelineConfig::default();
        assert_eq!(config.base.python_version, "3.10");
        assert_eq!(config.base.image_ref(), "python:3.10-slim-bullseye");
        assert_eq!(config.base.hash_seed, HashSeed::Random);
        assert_eq!(config.installer.timeout_secs, 100);
        assert_eq!(config.installer.pin_policy, PinPolicy::Enforce);
        assert_eq!(config.runtime.app, "crawler_server.app:app");
        assert_eq!(config.runtime.host, "0.0.0.0");
        assert_eq!(config.runtime.port, 8080);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_installer_env() {
        let env = InstallerConfig::default().env();
        assert_eq!(env.get("PIP_NO_CACHE_DIR").map(String::as_str), Some("1"));
        assert_eq!(
            env.get("PIP_DISABLE_PIP_VERSION_CHECK").map(String::as_str),
            Some("1")
        );
        assert_eq!(env.get("PIP_DEFAULT_TIMEOUT").map(String::as_str), Some("100"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::default();
        config
            .apply_env_overrides(lookup(&[
                ("VENVPACK_PYTHON_VERSION", "3.11"),
                ("VENVPACK_APP", "svc.main:application"),
                ("VENVPACK_PORT", "9000"),
                ("VENVPACK_INSTALLER_TIMEOUT", "30"),
                ("VENVPACK_INSTALLER_VERSION", "22.0.4"),
            ]))
            .unwrap();

        assert_eq!(config.base.python_version, "3.11");
        assert_eq!(config.runtime.app, "svc.main:application");
        assert_eq!(config.runtime.port, 9000);
        assert_eq!(config.installer.timeout_secs, 30);
        assert_eq!(config.installer.version.as_deref(), Some("22.0.4"));
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = PipelineConfig::default();
        let err = config
            .apply_env_overrides(lookup(&[("VENVPACK_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref field, .. } if field == "VENVPACK_PORT"));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE),
            r#"
[base]
python_version = "3.11"
hash_seed = 42

[installer]
version = "23.1"
pin_policy = "hint"

[runtime]
app = "crawler_server.app:app"
required_env = ["CRAWLER_TOKEN"]
"#,
        )
        .unwrap();

        let config = PipelineConfig::from_file_or_default(&temp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.base.python_version, "3.11");
        assert_eq!(config.base.hash_seed, HashSeed::Fixed(42));
        assert_eq!(config.installer.pin_policy, PinPolicy::Hint);
        assert_eq!(config.runtime.required_env, vec!["CRAWLER_TOKEN"]);
        assert_eq!(config.runtime.port, 8080);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[runtime]\nprot = 80\n").unwrap();
        let err = PipelineConfig::from_file_or_default(&path).unwrap_err();
        assert!(matches!(err, ConfigError::FileError { .. }));
    }

    #[test]
    #[serial]
    fn test_load_reads_environment() {
        let temp = TempDir::new().unwrap();
        env::set_var("VENVPACK_PORT", "8081");
        let config = PipelineConfig::load(temp.path());
        env::remove_var("VENVPACK_PORT");
        assert_eq!(config.unwrap().runtime.port, 8081);
    }

    #[test]
    fn test_hash_seed_parsing() {
        assert_eq!("random".parse::<HashSeed>().unwrap(), HashSeed::Random);
        assert_eq!("RANDOM".parse::<HashSeed>().unwrap(), HashSeed::Random);
        assert_eq!("0".parse::<HashSeed>().unwrap(), HashSeed::Fixed(0));
        assert_eq!(
            "4294967295".parse::<HashSeed>().unwrap(),
            HashSeed::Fixed(u32::MAX)
        );
        assert!("4294967296".parse::<HashSeed>().is_err());
        assert!("-1".parse::<HashSeed>().is_err());
        assert!(!HashSeed::Random.is_reproducible());
        assert!(HashSeed::Fixed(7).is_reproducible());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.base.python_version = "three".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.runtime.app = "crawler_server.app".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.installer.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.runtime.port = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.build.venv_path = PathBuf::from("venv");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_display() {
        let display = PipelineConfig::default().to_string();
        assert!(display.contains("venvpack configuration:"));
        assert!(display.contains("crawler_server.app:app via uvicorn on 0.0.0.0:8080"));
    }
}
