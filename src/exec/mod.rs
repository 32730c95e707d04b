//! External command execution
//!
//! Every interpreter and installer invocation goes through a [`CommandRunner`],
//! so the stages can be driven against a real interpreter or against
//! [`mock::SimulatedPython`] in tests.

pub mod mock;
pub mod process;

pub use mock::SimulatedPython;
pub use process::ProcessRunner;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// A fully described command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Variables set on top of the runner's passthrough environment
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    /// Short label used in logs and errors, e.g. "install dependencies"
    pub description: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, description: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            description: description.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Program followed by its arguments
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Last few lines of stderr, for error messages
    pub fn stderr_tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stderr.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

/// Runs commands to completion, capturing their output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec`. An `Err` means the command could not be started; a
    /// non-zero exit is reported through [`CommandOutput::status`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let mut env = BTreeMap::new();
        env.insert("PIP_NO_CACHE_DIR".to_string(), "1".to_string());

        let spec = CommandSpec::new("/venv/bin/python", "upgrade installer")
            .args(["-m", "pip", "install"])
            .arg("--upgrade")
            .envs(&env)
            .cwd("/tmp");

        assert_eq!(
            spec.argv(),
            vec!["/venv/bin/python", "-m", "pip", "install", "--upgrade"]
        );
        assert_eq!(spec.env["PIP_NO_CACHE_DIR"], "1");
        assert_eq!(spec.cwd, Some(PathBuf::from("/tmp")));
        assert_eq!(spec.to_string(), "/venv/bin/python -m pip install --upgrade");
    }

    #[test]
    fn test_stderr_tail() {
        let output = CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: "a\nb\nc\nd".to_string(),
        };
        assert!(!output.success());
        assert_eq!(output.stderr_tail(2), "c\nd");
        assert_eq!(output.stderr_tail(10), "a\nb\nc\nd");
    }
}
