//! Runtime checks against a real interpreter
//!
//! Each test builds a bare environment with the host's `python3`
//! (`-m venv --without-pip`, no network), promotes it and starts processes
//! from the resulting image. Tests skip when `python3` is not installed.

mod common;

use std::process::Command;
use std::sync::Arc;
use tempfile::TempDir;
use venvpack::artifact::EnvironmentArtifact;
use venvpack::exec::ProcessRunner;
use venvpack::image::RuntimeImage;
use venvpack::launch::{LaunchPlan, Launcher, RuntimeError};
use venvpack::stage::{BaseEnvironment, ImagePromoter};
use venvpack::PipelineConfig;

fn image_with_app(temp: &TempDir, app: &str) -> Option<RuntimeImage> {
    let python = common::python3()?;
    let venv = temp.path().join("venv");
    let status = Command::new(python)
        .args(["-m", "venv", "--without-pip"])
        .arg(&venv)
        .status()
        .ok()?;
    if !status.success() {
        eprintln!("python3 cannot create environments here, skipping");
        return None;
    }

    let mut config = PipelineConfig::default();
    config.runtime.app = app.to_string();
    config.runtime.healthcheck_path = None;
    let base = BaseEnvironment::from_config(&config.base);

    let artifact = EnvironmentArtifact::describe("e2e", &venv, "3").unwrap();
    let image = ImagePromoter::new(&config, &base)
        .promote(artifact, &temp.path().join("image"))
        .unwrap();
    Some(image)
}

fn run_hash(plan: &LaunchPlan) -> String {
    let output = Command::new(&plan.program)
        .args(["-c", "print(hash('venvpack'))"])
        .env_clear()
        .envs(&plan.env)
        .current_dir(&plan.cwd)
        .output()
        .unwrap();
    assert!(output.status.success());
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

#[test]
fn test_hash_seed_differs_between_processes() {
    let temp = TempDir::new().unwrap();
    let Some(image) = image_with_app(&temp, "json:dumps") else {
        return;
    };
    let plan = LaunchPlan::resolve(&image, |key| std::env::var(key).ok()).unwrap();
    assert_eq!(plan.env["PYTHONHASHSEED"], "random");

    let seen: std::collections::BTreeSet<String> = (0..4).map(|_| run_hash(&plan)).collect();
    assert!(seen.len() > 1, "hash('venvpack') never changed: {:?}", seen);
}

#[test]
fn test_process_runs_inside_the_environment() {
    let temp = TempDir::new().unwrap();
    let Some(image) = image_with_app(&temp, "json:dumps") else {
        return;
    };
    let plan = LaunchPlan::resolve(&image, |key| std::env::var(key).ok()).unwrap();

    let output = Command::new(&plan.program)
        .args(["-c", "import sys; print(sys.prefix != sys.base_prefix)"])
        .env_clear()
        .envs(&plan.env)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "True");
}

#[tokio::test]
async fn test_preflight_accepts_importable_app() {
    let temp = TempDir::new().unwrap();
    let Some(image) = image_with_app(&temp, "json:dumps") else {
        return;
    };
    let plan = LaunchPlan::resolve(&image, |key| std::env::var(key).ok()).unwrap();

    Launcher::new(Arc::new(ProcessRunner::new()))
        .preflight(&plan)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_preflight_rejects_missing_attribute() {
    let temp = TempDir::new().unwrap();
    let Some(image) = image_with_app(&temp, "json:no_such_app") else {
        return;
    };
    let plan = LaunchPlan::resolve(&image, |key| std::env::var(key).ok()).unwrap();

    let err = Launcher::new(Arc::new(ProcessRunner::new()))
        .preflight(&plan)
        .await
        .unwrap_err();

    match err {
        RuntimeError::ImportFailed { stderr, .. } => {
            assert!(stderr.contains("no_such_app"), "unexpected stderr: {}", stderr)
        }
        other => panic!("expected ImportFailed, got {:?}", other),
    }
}
