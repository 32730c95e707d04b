//! Base environment shared by the builder and final stages

use crate::config::{BaseConfig, HashSeed};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Interpreter runtime flags exported into every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFlags {
    /// Dump tracebacks on fatal signals
    pub fault_handler: bool,
    /// Unbuffered stdout/stderr, so logs reach the container runtime immediately
    pub unbuffered: bool,
    pub hash_seed: HashSeed,
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self {
            fault_handler: true,
            unbuffered: true,
            hash_seed: HashSeed::Random,
        }
    }
}

impl RuntimeFlags {
    /// `PYTHON*` variables for these flags. Disabled flags are left unset
    /// rather than set to `0`, since the interpreter treats any non-empty
    /// value as enabled.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if self.fault_handler {
            env.insert("PYTHONFAULTHANDLER".to_string(), "1".to_string());
        }
        if self.unbuffered {
            env.insert("PYTHONUNBUFFERED".to_string(), "1".to_string());
        }
        env.insert("PYTHONHASHSEED".to_string(), self.hash_seed.env_value());
        env
    }
}

/// Environment of one concrete stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEnvironment {
    pub name: String,
    pub base_image: String,
    pub python_version: String,
    pub interpreter: String,
    pub workdir: PathBuf,
    pub env: BTreeMap<String, String>,
}

impl StageEnvironment {
    /// Add or replace variables; the base flags stay untouched unless named
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}

/// The fixed interpreter and flags every stage starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseEnvironment {
    pub python_version: String,
    pub interpreter: String,
    pub image: String,
    pub workdir: PathBuf,
    pub flags: RuntimeFlags,
}

impl BaseEnvironment {
    pub fn from_config(config: &BaseConfig) -> Self {
        Self {
            python_version: config.python_version.clone(),
            interpreter: config.interpreter.clone(),
            image: config.image_ref(),
            workdir: config.workdir.clone(),
            flags: RuntimeFlags {
                fault_handler: config.fault_handler,
                unbuffered: config.unbuffered,
                hash_seed: config.hash_seed,
            },
        }
    }

    pub fn env(&self) -> BTreeMap<String, String> {
        self.flags.env()
    }

    /// Describe a stage built on this base. Pure: calling it twice with the
    /// same name gives equal results.
    pub fn derive_stage(&self, name: &str) -> StageEnvironment {
        StageEnvironment {
            name: name.to_string(),
            base_image: self.image.clone(),
            python_version: self.python_version.clone(),
            interpreter: self.interpreter.clone(),
            workdir: self.workdir.clone(),
            env: self.env(),
        }
    }
}

/// Prefix match of an interpreter's `--version` output against `wanted`,
/// segment by segment: "3.10" accepts "Python 3.10.12" but not "3.1.2".
pub fn interpreter_matches(wanted: &str, reported: &str) -> bool {
    let version = reported.trim().trim_start_matches("Python").trim();
    let wanted: Vec<&str> = wanted.split('.').collect();
    let actual: Vec<&str> = version.split('.').collect();
    actual.len() >= wanted.len() && wanted.iter().zip(&actual).all(|(w, a)| w == a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags_env() {
        let env = RuntimeFlags::default().env();
        assert_eq!(env.len(), 3);
        assert_eq!(env["PYTHONFAULTHANDLER"], "1");
        assert_eq!(env["PYTHONUNBUFFERED"], "1");
        assert_eq!(env["PYTHONHASHSEED"], "random");
    }

    #[test]
    fn test_disabled_flags_are_unset() {
        let flags = RuntimeFlags {
            fault_handler: false,
            unbuffered: false,
            hash_seed: HashSeed::Fixed(0),
        };
        let env = flags.env();
        assert!(!env.contains_key("PYTHONFAULTHANDLER"));
        assert!(!env.contains_key("PYTHONUNBUFFERED"));
        assert_eq!(env["PYTHONHASHSEED"], "0");
    }

    #[test]
    fn test_derive_stage_is_deterministic() {
        let base = BaseEnvironment::from_config(&BaseConfig::default());
        let a = base.derive_stage("builder");
        let b = base.derive_stage("builder");
        assert_eq!(a, b);
        assert_eq!(a.name, "builder");
        assert_eq!(a.base_image, "python:3.10-slim-bullseye");
        assert_eq!(a.env, base.env());
    }

    #[test]
    fn test_with_env_keeps_base_flags() {
        let base = BaseEnvironment::from_config(&BaseConfig::default());
        let stage = base
            .derive_stage("final")
            .with_env([("PATH", "/venv/bin:/usr/bin")]);
        assert_eq!(stage.env["PATH"], "/venv/bin:/usr/bin");
        assert_eq!(stage.env["PYTHONHASHSEED"], "random");
    }

    #[test]
    fn test_interpreter_matches() {
        assert!(interpreter_matches("3.10", "Python 3.10.12\n"));
        assert!(interpreter_matches("3.10", "3.10.0"));
        assert!(interpreter_matches("3.10.12", "Python 3.10.12"));
        assert!(!interpreter_matches("3.10", "Python 3.1.2"));
        assert!(!interpreter_matches("3.10", "Python 3.11.4"));
        assert!(!interpreter_matches("3.10", "Python 3"));
    }
}
