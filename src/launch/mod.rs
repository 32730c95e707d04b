//! Container start: the application target and the server command line

pub mod supervisor;

pub use supervisor::{LaunchPlan, Launcher, RuntimeError};

use regex::Regex;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

static APP_TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*:[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .unwrap()
});

/// An importable application object, `module.path:attribute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppTarget {
    pub module: String,
    pub attribute: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid application target '{0}', expected 'module.path:attribute'")]
pub struct InvalidAppTarget(pub String);

impl AppTarget {
    pub fn parse(target: &str) -> Result<Self, InvalidAppTarget> {
        let trimmed = target.trim();
        if !APP_TARGET_RE.is_match(trimmed) {
            return Err(InvalidAppTarget(target.to_string()));
        }
        let (module, attribute) = trimmed
            .split_once(':')
            .ok_or_else(|| InvalidAppTarget(target.to_string()))?;
        Ok(Self {
            module: module.to_string(),
            attribute: attribute.to_string(),
        })
    }

    /// A `python -c` script that imports the module and resolves the attribute
    pub fn import_check_script(&self) -> String {
        format!(
            "import functools, importlib\n\
             module = importlib.import_module({module:?})\n\
             functools.reduce(getattr, {attrs:?}.split('.'), module)\n",
            module = self.module,
            attrs = self.attribute,
        )
    }
}

impl FromStr for AppTarget {
    type Err = InvalidAppTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AppTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.attribute)
    }
}

/// The single foreground process of the runtime image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupCommand {
    /// Server module, run as `python -m <server>`
    pub server: String,
    pub app: AppTarget,
    pub host: String,
    pub port: u16,
}

impl StartupCommand {
    pub fn from_runtime(runtime: &crate::config::RuntimeConfig) -> Result<Self, InvalidAppTarget> {
        Ok(Self {
            server: runtime.server.clone(),
            app: AppTarget::parse(&runtime.app)?,
            host: runtime.host.clone(),
            port: runtime.port,
        })
    }

    /// Full command line using `python` as the interpreter
    pub fn argv(&self, python: &Path) -> Vec<String> {
        vec![
            python.to_string_lossy().to_string(),
            "-m".to_string(),
            self.server.clone(),
            self.app.to_string(),
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use yare::parameterized;

    #[parameterized(
        simple = { "crawler_server.app:app" },
        top_level = { "main:app" },
        nested_attribute = { "svc.api:factory.app" },
    )]
    fn test_valid_targets(target: &str) {
        let parsed = AppTarget::parse(target).unwrap();
        assert_eq!(parsed.to_string(), target);
    }

    #[parameterized(
        missing_attribute = { "crawler_server.app" },
        empty_module = { ":app" },
        path_separator = { "crawler_server/app:app" },
        leading_digit = { "1app:app" },
        double_colon = { "a:b:c" },
        empty = { "" },
    )]
    fn test_invalid_targets(target: &str) {
        assert!(AppTarget::parse(target).is_err());
    }

    #[test]
    fn test_import_check_script() {
        let script = AppTarget::parse("crawler_server.app:app")
            .unwrap()
            .import_check_script();
        assert!(script.contains("importlib.import_module(\"crawler_server.app\")"));
        assert!(script.contains("functools.reduce(getattr, \"app\".split('.'), module)"));
    }

    #[test]
    fn test_default_startup_command() {
        let command = StartupCommand::from_runtime(&RuntimeConfig::default()).unwrap();
        assert_eq!(
            command.argv(Path::new("/venv/bin/python")),
            vec![
                "/venv/bin/python",
                "-m",
                "uvicorn",
                "crawler_server.app:app",
                "--host",
                "0.0.0.0",
                "--port",
                "8080"
            ]
        );
    }
}
