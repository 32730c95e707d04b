//! Container start: resolve the image's command, check the application
//! imports, then run the server as the single foreground child

use super::AppTarget;
use crate::artifact::EnvironmentArtifact;
use crate::exec::process::PASSTHROUGH_VARS;
use crate::exec::{CommandRunner, CommandSpec};
use crate::image::RuntimeImage;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

const DEFAULT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Invalid runtime image: {0}")]
    Image(String),

    #[error("No virtual environment at {path}")]
    MissingEnvironment { path: PathBuf },

    #[error("Required environment variable {name} is not set")]
    MissingVariable { name: String },

    #[error("Application '{target}' failed to import (exit status {status}):\n{stderr}")]
    ImportFailed {
        target: String,
        status: String,
        stderr: String,
    },

    #[error("Import check for '{target}' could not run: {source}")]
    Preflight {
        target: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Lost track of server process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Everything needed to start the server, resolved against a local rootfs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Complete child environment; nothing else is inherited
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub app: AppTarget,
    pub venv: PathBuf,
}

impl LaunchPlan {
    /// Resolve `image` for a local start. `lookup` reads the caller's
    /// environment for the application's required variables.
    pub fn resolve<F>(image: &RuntimeImage, lookup: F) -> Result<Self, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let venv = image.venv_dir();
        if !EnvironmentArtifact::is_environment(&venv) {
            return Err(RuntimeError::MissingEnvironment { path: venv });
        }

        let app = AppTarget::parse(&image.config.app)
            .map_err(|e| RuntimeError::Image(e.to_string()))?;

        let (program, args) = image
            .config
            .cmd
            .split_first()
            .ok_or_else(|| RuntimeError::Image("image command is empty".to_string()))?;
        let program = Path::new(program);
        let program = if program.is_absolute() {
            image.resolve(program)
        } else {
            program.to_path_buf()
        };

        let mut env = image.config.env.clone();
        let venv_bin = venv.join("bin");
        let host_path = lookup("PATH").unwrap_or_default();
        let path = if host_path.is_empty() {
            venv_bin.to_string_lossy().to_string()
        } else {
            format!("{}:{}", venv_bin.display(), host_path)
        };
        env.insert("PATH".to_string(), path);
        env.insert(
            "VIRTUAL_ENV".to_string(),
            venv.to_string_lossy().to_string(),
        );

        for name in &image.config.required_env {
            let value = lookup(name).ok_or_else(|| RuntimeError::MissingVariable {
                name: name.clone(),
            })?;
            env.insert(name.clone(), value);
        }

        Ok(Self {
            program,
            args: args.to_vec(),
            env,
            cwd: image.rootfs(),
            app,
            venv,
        })
    }

    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn python(&self) -> PathBuf {
        self.venv.join("bin").join("python")
    }
}

/// Starts and supervises the server process
pub struct Launcher {
    runner: Arc<dyn CommandRunner>,
    grace: Duration,
}

impl Launcher {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            grace: DEFAULT_GRACE,
        }
    }

    /// Time the server gets to exit after an interrupt before it is killed
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Import the application module and resolve the attribute without
    /// starting the server
    pub async fn preflight(&self, plan: &LaunchPlan) -> Result<(), RuntimeError> {
        let spec = CommandSpec::new(plan.python(), "import preflight")
            .arg("-c")
            .arg(plan.app.import_check_script())
            .envs(&plan.env)
            .cwd(&plan.cwd);

        let output = self
            .runner
            .run(&spec)
            .await
            .map_err(|source| RuntimeError::Preflight {
                target: plan.app.to_string(),
                source,
            })?;

        if !output.success() {
            return Err(RuntimeError::ImportFailed {
                target: plan.app.to_string(),
                status: output
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: output.stderr_tail(20),
            });
        }
        debug!(app = %plan.app, "Application imports cleanly");
        Ok(())
    }

    /// Run the server in the foreground and return the exit code to mirror
    pub async fn run(&self, plan: &LaunchPlan) -> Result<i32, RuntimeError> {
        let mut command = Command::new(&plan.program);
        command.args(&plan.args).env_clear();
        for key in PASSTHROUGH_VARS {
            if plan.env.contains_key(*key) {
                continue;
            }
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }
        command
            .envs(&plan.env)
            .current_dir(&plan.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        info!(command = %plan.argv().join(" "), "Starting server");
        let mut child = command.spawn().map_err(|source| RuntimeError::Spawn {
            program: plan.program.clone(),
            source,
        })?;

        let status = tokio::select! {
            status = child.wait() => status.map_err(RuntimeError::Wait)?,
            _ = tokio::signal::ctrl_c() => {
                info!(grace_secs = self.grace.as_secs(), "Interrupt received, waiting for server to stop");
                match tokio::time::timeout(self.grace, child.wait()).await {
                    Ok(status) => status.map_err(RuntimeError::Wait)?,
                    Err(_) => {
                        warn!("Server did not stop within the grace period, killing it");
                        child.kill().await.map_err(RuntimeError::Wait)?;
                        child.wait().await.map_err(RuntimeError::Wait)?
                    }
                }
            }
        };

        let code = exit_code(status);
        info!(code, "Server exited");
        Ok(code)
    }

    /// Resolve, preflight, then run
    pub async fn launch<F>(&self, image: &RuntimeImage, lookup: F) -> Result<i32, RuntimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let plan = LaunchPlan::resolve(image, lookup)?;
        self.preflight(&plan).await?;
        self.run(&plan).await
    }
}

/// Exit code for the container; signal deaths map to `128 + signal`
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
