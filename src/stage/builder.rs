//! Builder stage: populate an isolated virtual environment from the lock file
//!
//! Inputs are validated before anything touches the disk. After that every
//! side effect stays inside the work directory, and any failure removes the
//! partially built environment, so an [`EnvironmentArtifact`] exists only for
//! a complete, verified build.

use super::base::{interpreter_matches, BaseEnvironment, StageEnvironment};
use crate::artifact::{EnvironmentArtifact, InstalledPackage};
use crate::config::{BuildConfig, InstallerConfig, PinPolicy, PipelineConfig};
use crate::exec::{CommandRunner, CommandSpec};
use crate::manifest::{
    check_consistency, is_bootstrap_package, Inconsistency, LockFile, Manifest, ManifestError,
    Version, VersionConstraint,
};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use crate::util::fs as fsutil;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const STAGE_NAME: &str = "builder";

/// Layout of the builder's work directory
pub const VENV_DIR: &str = "venv";
pub const CONTEXT_DIR: &str = "context";
pub const CONSTRAINTS_FILE: &str = "constraints.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainmentProblem {
    /// Installed but not pinned by the lock file
    Unpinned { name: String, version: String },
    /// Installed at a different version than pinned
    Drift {
        name: String,
        locked: String,
        installed: String,
    },
    /// Required by the manifest's dependency closure but not installed
    Missing { name: String },
}

impl fmt::Display for ContainmentProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainmentProblem::Unpinned { name, version } => {
                write!(f, "{}=={} is installed but not pinned", name, version)
            }
            ContainmentProblem::Drift {
                name,
                locked,
                installed,
            } => write!(f, "{} is pinned at {} but {} is installed", name, locked, installed),
            ContainmentProblem::Missing { name } => {
                write!(f, "{} is required but was not installed", name)
            }
        }
    }
}

fn bullet_list<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn path_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{kind} not found: {path}")]
    MissingInput { kind: &'static str, path: PathBuf },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Lock file does not satisfy the manifest:\n{}", bullet_list(.problems))]
    Inconsistent { problems: Vec<Inconsistency> },

    #[error("Application source not found: {}", path_list(.paths))]
    MissingSources { paths: Vec<PathBuf> },

    #[error("Python {configured} is excluded by {source_file} (requires {requires})")]
    UnsupportedPython {
        configured: String,
        requires: String,
        source_file: PathBuf,
    },

    #[error("Interpreter reports '{found}', expected Python {expected}")]
    InterpreterMismatch { expected: String, found: String },

    #[error("Step '{step}' failed (exit status {status}):\n{stderr}")]
    CommandFailed {
        step: String,
        status: String,
        stderr: String,
    },

    #[error("Step '{step}' could not run: {source}")]
    Command {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Installed environment does not match the lock file:\n{}", bullet_list(.problems))]
    Containment { problems: Vec<ContainmentProblem> },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BuildError {
    /// True for problems with the inputs, detected before any side effect
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            BuildError::MissingInput { .. }
                | BuildError::Manifest(_)
                | BuildError::Inconsistent { .. }
                | BuildError::UnsupportedPython { .. }
                | BuildError::MissingSources { .. }
        )
    }

    fn io(context: impl Into<String>, source: anyhow::Error) -> Self {
        BuildError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Parsed and cross-checked builder inputs
#[derive(Debug, Clone)]
pub struct BuildInputs {
    pub project_dir: PathBuf,
    pub manifest: Manifest,
    pub lock: LockFile,
    /// Source paths relative to the project directory
    pub sources: Vec<PathBuf>,
}

impl BuildInputs {
    /// Validate manifest, lock file and sources. Reads files only.
    pub fn load(config: &PipelineConfig, project_dir: &Path) -> Result<Self, BuildError> {
        let manifest_path = project_dir.join(&config.build.manifest);
        let lock_path = project_dir.join(&config.build.lockfile);

        if !manifest_path.is_file() {
            return Err(BuildError::MissingInput {
                kind: "Dependency manifest",
                path: manifest_path,
            });
        }
        if !lock_path.is_file() {
            return Err(BuildError::MissingInput {
                kind: "Lock file",
                path: lock_path,
            });
        }

        let manifest = Manifest::from_path(&manifest_path)?;
        let lock = LockFile::from_path(&lock_path)?;
        check_consistency(&manifest, &lock)
            .map_err(|problems| BuildError::Inconsistent { problems })?;
        check_python_support(&config.base.python_version, &manifest, &lock)?;

        let sources = if config.build.sources.is_empty() {
            manifest.packages.clone()
        } else {
            config.build.sources.clone()
        };
        let missing: Vec<PathBuf> = sources
            .iter()
            .filter(|s| !project_dir.join(s).exists())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingSources { paths: missing });
        }

        debug!(
            project = %manifest.name,
            dependencies = manifest.dependencies.len(),
            pinned = lock.packages.len(),
            "Inputs validated"
        );

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            manifest,
            lock,
            sources,
        })
    }

    /// Files copied into the build context besides the source trees:
    /// manifest, lock file and the support files that exist
    pub fn context_files(&self, config: &BuildConfig) -> Vec<PathBuf> {
        let mut files = vec![config.manifest.clone(), config.lockfile.clone()];
        for support in &self.manifest.support_files {
            if self.project_dir.join(support).is_file() {
                files.push(support.clone());
            } else {
                warn!(file = %support.display(), "Declared support file is missing");
            }
        }
        files
    }

    /// Unconditional manifest dependencies plus everything they pull in
    pub fn required_packages(&self) -> std::collections::BTreeSet<String> {
        self.lock.required_closure(
            self.manifest
                .dependencies
                .iter()
                .filter(|d| d.is_unconditional())
                .map(|d| d.name.as_str()),
        )
    }
}

/// The configured interpreter version must fall inside the manifest's python
/// requirement and the lock file's `python-versions`
fn check_python_support(
    configured: &str,
    manifest: &Manifest,
    lock: &LockFile,
) -> Result<(), BuildError> {
    let Ok(version) = configured.parse::<Version>() else {
        return Ok(());
    };

    if let Some(requires) = &manifest.requires_python {
        if !requires.admits_prefix(&version) {
            return Err(BuildError::UnsupportedPython {
                configured: configured.to_string(),
                requires: requires.to_string(),
                source_file: manifest.path.clone(),
            });
        }
    }

    if let Some(raw) = &lock.python_versions {
        match raw.parse::<VersionConstraint>() {
            Ok(requires) if !requires.admits_prefix(&version) => {
                return Err(BuildError::UnsupportedPython {
                    configured: configured.to_string(),
                    requires: raw.clone(),
                    source_file: lock.path.clone(),
                });
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Ignoring unparsable lock python-versions"),
        }
    }

    Ok(())
}

/// Arguments (after `python`) that bring the installer to its configured version
pub fn installer_upgrade_args(installer: &InstallerConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-m", "pip", "install"].iter().map(|s| s.to_string()).collect();
    match (&installer.version, installer.pin_policy) {
        (Some(version), PinPolicy::Enforce) => args.push(format!("pip=={}", version)),
        _ => {
            args.push("--upgrade".to_string());
            args.push("pip".to_string());
        }
    }
    args
}

/// Arguments (after `python`) for the constrained install of the project
pub fn install_args(constraints: &str, context: &str) -> Vec<String> {
    ["-m", "pip", "install", "--constraint", constraints, context]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Compare an installed listing with the lock file
///
/// The listing may hold only pinned packages at their pinned versions, the
/// application package itself and installer bootstrap packages the lock does
/// not pin. Every package in the manifest's unconditional dependency closure
/// must be present.
pub fn check_containment(
    installed: &[InstalledPackage],
    inputs: &BuildInputs,
) -> Result<(), Vec<ContainmentProblem>> {
    let pins = inputs.lock.pins();
    let exempt = |name: &str| is_bootstrap_package(name) && !pins.contains_key(name);
    let mut problems = Vec::new();

    for package in installed {
        if exempt(&package.name) {
            continue;
        }
        if package.name == inputs.manifest.name {
            if let Some(expected) = &inputs.manifest.version {
                if !same_version(expected, &package.version) {
                    problems.push(ContainmentProblem::Drift {
                        name: package.name.clone(),
                        locked: expected.clone(),
                        installed: package.version.clone(),
                    });
                }
            }
            continue;
        }
        match pins.get(&package.name) {
            None => problems.push(ContainmentProblem::Unpinned {
                name: package.name.clone(),
                version: package.version.clone(),
            }),
            Some(locked) if !same_version(&locked.to_string(), &package.version) => {
                problems.push(ContainmentProblem::Drift {
                    name: package.name.clone(),
                    locked: locked.to_string(),
                    installed: package.version.clone(),
                })
            }
            Some(_) => {}
        }
    }

    let installed_names: std::collections::BTreeSet<&str> =
        installed.iter().map(|p| p.name.as_str()).collect();
    for name in inputs.required_packages() {
        if !exempt(&name) && !installed_names.contains(name.as_str()) {
            problems.push(ContainmentProblem::Missing { name });
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

fn same_version(a: &str, b: &str) -> bool {
    match (a.parse::<Version>(), b.parse::<Version>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// Runs the builder stage
pub struct EnvironmentBuilder {
    config: PipelineConfig,
    stage: StageEnvironment,
    runner: Arc<dyn CommandRunner>,
    progress: Arc<dyn ProgressHandler>,
}

impl EnvironmentBuilder {
    pub fn new(
        config: &PipelineConfig,
        base: &BaseEnvironment,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let stage = base
            .derive_stage(STAGE_NAME)
            .with_env(config.installer.env());
        Self {
            config: config.clone(),
            stage,
            runner,
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    pub fn stage(&self) -> &StageEnvironment {
        &self.stage
    }

    /// Build the environment for the project in `project_dir` inside `work_dir`
    pub async fn build(
        &self,
        project_dir: &Path,
        work_dir: &Path,
    ) -> Result<EnvironmentArtifact, BuildError> {
        let inputs = BuildInputs::load(&self.config, project_dir)?;
        let interpreter_version = self.verify_interpreter().await?;

        let venv = work_dir.join(VENV_DIR);
        let result = self
            .populate(&inputs, work_dir, &venv, &interpreter_version)
            .await;

        if result.is_err() {
            if let Err(e) = fsutil::remove_if_exists(&venv) {
                warn!(venv = %venv.display(), error = %e, "Failed to remove partial environment");
            }
        }
        result
    }

    async fn populate(
        &self,
        inputs: &BuildInputs,
        work_dir: &Path,
        venv: &Path,
        interpreter_version: &str,
    ) -> Result<EnvironmentArtifact, BuildError> {
        fsutil::remove_if_exists(venv)
            .map_err(|e| BuildError::io("Failed to clear previous environment", e))?;
        std::fs::create_dir_all(work_dir).map_err(|e| {
            BuildError::io(
                format!("Failed to create work directory {}", work_dir.display()),
                e.into(),
            )
        })?;

        let step = self.step("create venv");
        let spec = CommandSpec::new(&self.stage.interpreter, "create venv")
            .args(["-m", "venv"])
            .arg(venv.to_string_lossy())
            .envs(&self.stage.env);
        self.run_checked(&spec).await?;
        step.done();

        let step = self.step("copy context");
        let context = work_dir.join(CONTEXT_DIR);
        let copied = self.copy_context(inputs, &context)?;
        debug!(files = copied, context = %context.display(), "Build context assembled");
        step.done();

        let python = venv.join("bin").join("python");

        let step = self.step("upgrade installer");
        if let (Some(version), PinPolicy::Hint) =
            (&self.config.installer.version, self.config.installer.pin_policy)
        {
            info!(declared = %version, "Installer version is advisory, upgrading to latest");
        }
        let spec = CommandSpec::new(&python, "upgrade installer")
            .args(installer_upgrade_args(&self.config.installer))
            .envs(&self.stage.env)
            .cwd(work_dir);
        self.run_checked(&spec).await?;
        step.done();

        let step = self.step("install dependencies");
        let constraints = work_dir.join(CONSTRAINTS_FILE);
        std::fs::write(&constraints, inputs.lock.to_constraints()).map_err(|e| {
            BuildError::io(
                format!("Failed to write {}", constraints.display()),
                e.into(),
            )
        })?;
        let spec = CommandSpec::new(&python, "install dependencies")
            .args(install_args(
                &constraints.to_string_lossy(),
                &context.to_string_lossy(),
            ))
            .envs(&self.stage.env)
            .cwd(work_dir);
        self.run_checked(&spec).await?;
        step.done();

        let step = self.step("verify environment");
        let build_id = uuid::Uuid::new_v4().to_string();
        let artifact = EnvironmentArtifact::describe(&build_id, venv, interpreter_version)
            .map_err(|e| BuildError::io("Failed to scan installed packages", e))?;
        check_containment(&artifact.packages, inputs)
            .map_err(|problems| BuildError::Containment { problems })?;
        step.done();

        self.progress.on_progress(&ProgressEvent::ArtifactReady {
            build_id: artifact.build_id.clone(),
            packages: artifact.packages.len(),
            digest: artifact.digest.to_string(),
        });
        Ok(artifact)
    }

    /// `python --version` must report the configured version
    async fn verify_interpreter(&self) -> Result<String, BuildError> {
        let step = self.step("verify interpreter");
        let spec = CommandSpec::new(&self.stage.interpreter, "verify interpreter")
            .arg("--version")
            .envs(&self.stage.env);
        let output = self.run_checked(&spec).await?;

        // Python 2 and some 3.x builds print the version on stderr
        let reported = if output.stdout.trim().is_empty() {
            output.stderr.trim()
        } else {
            output.stdout.trim()
        };
        if !interpreter_matches(&self.stage.python_version, reported) {
            return Err(BuildError::InterpreterMismatch {
                expected: self.stage.python_version.clone(),
                found: reported.to_string(),
            });
        }
        step.done();
        Ok(reported.trim_start_matches("Python").trim().to_string())
    }

    fn copy_context(&self, inputs: &BuildInputs, context: &Path) -> Result<u64, BuildError> {
        fsutil::remove_if_exists(context)
            .map_err(|e| BuildError::io("Failed to clear build context", e))?;
        std::fs::create_dir_all(context).map_err(|e| {
            BuildError::io(
                format!("Failed to create {}", context.display()),
                e.into(),
            )
        })?;

        let project = &inputs.project_dir;
        let mut copied = 0;

        for file in inputs.context_files(&self.config.build) {
            let dest = context.join(&file);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| BuildError::io("Failed to create context directory", e.into()))?;
            }
            std::fs::copy(project.join(&file), &dest).map_err(|e| {
                BuildError::io(format!("Failed to copy {}", file.display()), e.into())
            })?;
            copied += 1;
        }

        for source in &inputs.sources {
            let from = project.join(source);
            if from.is_file() {
                let dest = context.join(source);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        BuildError::io("Failed to create context directory", e.into())
                    })?;
                }
                std::fs::copy(&from, &dest).map_err(|e| {
                    BuildError::io(format!("Failed to copy {}", source.display()), e.into())
                })?;
                copied += 1;
                continue;
            }
            let entries = fsutil::walk_context(&from)
                .map_err(|e| BuildError::io(format!("Failed to walk {}", from.display()), e))?;
            copied += fsutil::copy_entries(&entries, &context.join(source))
                .map_err(|e| BuildError::io(format!("Failed to copy {}", source.display()), e))?;
        }

        Ok(copied)
    }

    async fn run_checked(
        &self,
        spec: &CommandSpec,
    ) -> Result<crate::exec::CommandOutput, BuildError> {
        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|source| BuildError::Command {
                step: spec.description.clone(),
                source,
            })?;
        if !output.success() {
            return Err(BuildError::CommandFailed {
                step: spec.description.clone(),
                status: output
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                stderr: output.stderr_tail(20),
            });
        }
        Ok(output)
    }

    fn step(&self, name: &str) -> StepTimer<'_> {
        self.progress.on_progress(&ProgressEvent::StepStarted {
            stage: STAGE_NAME.to_string(),
            step: name.to_string(),
        });
        StepTimer {
            progress: self.progress.as_ref(),
            name: name.to_string(),
            started: Instant::now(),
        }
    }
}

struct StepTimer<'a> {
    progress: &'a dyn ProgressHandler,
    name: String,
    started: Instant,
}

impl StepTimer<'_> {
    fn done(self) {
        self.progress.on_progress(&ProgressEvent::StepComplete {
            stage: STAGE_NAME.to_string(),
            step: self.name,
            duration: self.started.elapsed(),
        });
    }
}
