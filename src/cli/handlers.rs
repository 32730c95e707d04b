//! Subcommand handlers. Each returns the process exit code.

use super::commands::{
    BuildArgs, CheckArgs, ConfigOverrides, ExportArgs, InspectArgs, PlanArgs, ProbeArgs, RunArgs,
};
use super::output::{CheckReport, OutputFormatter};
use crate::config::{ConfigError, PipelineConfig, CONFIG_FILE};
use crate::exec::ProcessRunner;
use crate::image::export::export_image;
use crate::image::RuntimeImage;
use crate::launch::{LaunchPlan, Launcher};
use crate::output::BuildPlan;
use crate::pipeline::{PipelineContext, PipelineOrchestrator};
use crate::probe::{probe, probe_url};
use crate::progress::LoggingHandler;
use crate::stage::{BuildError, BuildInputs};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const DEFAULT_OUTPUT: &str = "dist/image";

impl ConfigOverrides {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(version) = &self.python_version {
            config.base.python_version = version.clone();
        }
        if let Some(interpreter) = &self.interpreter {
            config.base.interpreter = interpreter.clone();
        }
        if let Some(app) = &self.app {
            config.runtime.app = app.clone();
        }
        if let Some(port) = self.port {
            config.runtime.port = port;
        }
    }
}

/// Configuration file, then `VENVPACK_*` variables, then CLI flags
pub fn load_config(
    project_dir: &Path,
    overrides: &ConfigOverrides,
) -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::from_file_or_default(&project_dir.join(CONFIG_FILE))?;
    config.apply_env_overrides(|key| env::var(key).ok())?;
    overrides.apply(&mut config);
    config.validate()?;
    debug!("{}", config);
    Ok(config)
}

fn project_dir(path: &Option<PathBuf>) -> PathBuf {
    path.clone().unwrap_or_else(|| PathBuf::from("."))
}

fn emit(content: &str, output: Option<&Path>) -> i32 {
    match output {
        Some(path) => match fs::write(path, content) {
            Ok(()) => {
                info!("Output written to {}", path.display());
                0
            }
            Err(e) => {
                error!("Failed to write {}: {}", path.display(), e);
                1
            }
        },
        None => {
            print!("{}", content);
            if !content.ends_with('\n') {
                println!();
            }
            0
        }
    }
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    let project = project_dir(&args.project_path);
    let config = match load_config(&project, &args.overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| project.join(DEFAULT_OUTPUT));
    let work_dir = args.work_dir.clone().unwrap_or_else(|| {
        env::temp_dir().join(format!("venvpack-{}", uuid::Uuid::new_v4()))
    });

    let mut context = PipelineContext::new(
        config,
        project,
        work_dir,
        output,
        Arc::new(ProcessRunner::new()),
    )
    .with_progress(Arc::new(LoggingHandler));

    let image = match PipelineOrchestrator::new()
        .keep_work(args.keep_work)
        .execute(&mut context)
        .await
    {
        Ok(image) => image,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    if quiet {
        return 0;
    }
    match OutputFormatter::new(args.format.into()).format_image(&image) {
        Ok(summary) => emit(&summary, None),
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

pub fn handle_plan(args: &PlanArgs) -> i32 {
    let project = project_dir(&args.project_path);
    let config = match load_config(&project, &args.overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };
    let inputs = match BuildInputs::load(&config, &project) {
        Ok(inputs) => inputs,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let rendered = BuildPlan::resolve(&config, &inputs)
        .and_then(|plan| {
            plan.validate()?;
            OutputFormatter::new(args.format.into()).format_plan(&plan)
        });
    match rendered {
        Ok(content) => emit(&content, args.output.as_deref()),
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

pub fn handle_check(args: &CheckArgs) -> i32 {
    let project = project_dir(&args.project_path);
    let config = match load_config(&project, &ConfigOverrides::default()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let mut report = CheckReport {
        project: project.display().to_string(),
        manifest: config.build.manifest.display().to_string(),
        lockfile: config.build.lockfile.display().to_string(),
        dependencies: 0,
        pinned: 0,
        consistent: true,
        problems: Vec::new(),
    };

    match BuildInputs::load(&config, &project) {
        Ok(inputs) => {
            report.project = inputs.manifest.name.clone();
            report.dependencies = inputs.manifest.dependencies.len();
            report.pinned = inputs.lock.packages.len();
        }
        Err(BuildError::Inconsistent { problems }) => {
            report.consistent = false;
            report.problems = problems.iter().map(|p| p.to_string()).collect();
        }
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    }

    let code = emit(
        &match OutputFormatter::new(args.format.into()).format_check(&report) {
            Ok(content) => content,
            Err(e) => {
                error!("{:#}", e);
                return 1;
            }
        },
        None,
    );
    if report.consistent {
        code
    } else {
        1
    }
}

pub async fn handle_run(args: &RunArgs) -> i32 {
    let image = match RuntimeImage::load(&args.image) {
        Ok(image) => image,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };

    let plan = match LaunchPlan::resolve(&image, |key| env::var(key).ok()) {
        Ok(plan) => plan,
        Err(e) => {
            error!("{}", e);
            return 1;
        }
    };

    let grace = args.grace.unwrap_or(image.config.shutdown_grace_secs);
    let launcher =
        Launcher::new(Arc::new(ProcessRunner::new())).with_grace(Duration::from_secs(grace));

    if !args.skip_preflight {
        if let Err(e) = launcher.preflight(&plan).await {
            error!("{}", e);
            return 1;
        }
        info!(app = %plan.app, "Preflight passed");
    }
    if args.preflight_only {
        return 0;
    }

    match launcher.run(&plan).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            1
        }
    }
}

pub fn handle_inspect(args: &InspectArgs) -> i32 {
    let inspection = match RuntimeImage::load(&args.image).and_then(|image| image.inspect()) {
        Ok(inspection) => inspection,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };

    let code = match OutputFormatter::new(args.format.into()).format_inspection(&inspection) {
        Ok(content) => emit(&content, None),
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };
    if inspection.is_healthy() {
        code
    } else {
        error!("Image at {} failed verification", args.image.display());
        1
    }
}

pub fn handle_export(args: &ExportArgs, quiet: bool) -> i32 {
    match export_image(&args.image, &args.output) {
        Ok(entries) => {
            if !quiet {
                println!("Wrote {} ({} entries)", args.output.display(), entries);
            }
            0
        }
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

pub async fn handle_probe(args: &ProbeArgs) -> i32 {
    let url = args
        .url
        .clone()
        .unwrap_or_else(|| probe_url(&args.host, args.port, &args.path));

    match probe(&url, Duration::from_secs(args.timeout)).await {
        Ok(report) => {
            println!("{}", report);
            if report.healthy() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_cli_overrides_win() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CONFIG_FILE), "[runtime]\nport = 9000\n").unwrap();
        env::set_var("VENVPACK_PORT", "9100");

        let overrides = ConfigOverrides {
            port: Some(9200),
            ..Default::default()
        };
        let from_flags = load_config(temp.path(), &overrides).unwrap();
        let from_env = load_config(temp.path(), &ConfigOverrides::default()).unwrap();
        env::remove_var("VENVPACK_PORT");
        let from_file = load_config(temp.path(), &ConfigOverrides::default()).unwrap();

        assert_eq!(from_flags.runtime.port, 9200);
        assert_eq!(from_env.runtime.port, 9100);
        assert_eq!(from_file.runtime.port, 9000);
    }

    #[test]
    #[serial]
    fn test_invalid_override_fails_validation() {
        let temp = TempDir::new().unwrap();
        let overrides = ConfigOverrides {
            app: Some("not-a-target".to_string()),
            ..Default::default()
        };
        assert!(load_config(temp.path(), &overrides).is_err());
    }
}
