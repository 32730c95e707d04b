//! Real process execution via tokio

use super::{CommandOutput, CommandRunner, CommandSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::env;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, trace};

/// Host variables forwarded to child processes. Everything else is cleared
/// so the build does not depend on the caller's shell.
pub const PASSTHROUGH_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "LC_ALL",
    "TMPDIR",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
    "SSL_CERT_FILE",
    "SSL_CERT_DIR",
    "REQUESTS_CA_BUNDLE",
    "PIP_INDEX_URL",
    "PIP_EXTRA_INDEX_URL",
    "PIP_TRUSTED_HOST",
];

/// Runs commands as child processes with a cleared environment
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args).env_clear();
        for key in PASSTHROUGH_VARS {
            if let Ok(value) = env::var(key) {
                command.env(key, value);
            }
        }
        command.envs(&spec.env);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Running {}", spec.description);
        let started = Instant::now();

        let output = Self::command(spec)
            .output()
            .await
            .with_context(|| format!("Failed to start {}", spec.program.display()))?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        trace!(stdout = %result.stdout, stderr = %result.stderr, "command output");
        debug!(
            status = ?result.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "{} finished",
            spec.description
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "process"
    }
}
