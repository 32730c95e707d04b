//! Simulated interpreter and installer for tests
//!
//! `SimulatedPython` understands the handful of invocations the builder and
//! launcher make and reproduces their filesystem effects: `--version`,
//! `-m venv`, `-m pip install` (installer upgrade and constrained install) and
//! `-c` import checks. Installed packages are materialized as
//! `*.dist-info/METADATA` files so the listing scanner sees them.

use super::{CommandOutput, CommandRunner, CommandSpec};
use crate::manifest::Manifest;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SEEDED_PIP: &str = "22.0.4";
const SEEDED_SETUPTOOLS: &str = "58.1.0";
const UPGRADED_PIP: &str = "23.0.1";

pub struct SimulatedPython {
    version: String,
    recorded: Mutex<Vec<CommandSpec>>,
    fail_on: Mutex<Vec<String>>,
    skipped: Mutex<BTreeSet<String>>,
    extra: Mutex<BTreeMap<String, String>>,
    overrides: Mutex<BTreeMap<String, String>>,
}

impl SimulatedPython {
    /// A simulated interpreter reporting `version` (e.g. "3.10.12")
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            recorded: Mutex::new(Vec::new()),
            fail_on: Mutex::new(Vec::new()),
            skipped: Mutex::new(BTreeSet::new()),
            extra: Mutex::new(BTreeMap::new()),
            overrides: Mutex::new(BTreeMap::new()),
        }
    }

    /// Any command whose rendering contains `needle` exits with status 1
    pub fn fail_on(&self, needle: impl Into<String>) {
        self.fail_on.lock().unwrap().push(needle.into());
    }

    /// Do not install `name` even when it is constrained, like a package
    /// excluded by a platform marker
    pub fn skip(&self, name: impl Into<String>) {
        self.skipped.lock().unwrap().insert(name.into());
    }

    /// Install a package that no constraint mentions
    pub fn install_extra(&self, name: impl Into<String>, version: impl Into<String>) {
        self.extra
            .lock()
            .unwrap()
            .insert(name.into(), version.into());
    }

    /// Install `name` at `version` regardless of its constraint
    pub fn override_version(&self, name: impl Into<String>, version: impl Into<String>) {
        self.overrides
            .lock()
            .unwrap()
            .insert(name.into(), version.into());
    }

    /// Every command run so far, in order
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.recorded.lock().unwrap().clone()
    }

    fn short_version(&self) -> String {
        self.version.split('.').take(2).collect::<Vec<_>>().join(".")
    }

    fn site_packages(&self, venv: &Path) -> PathBuf {
        venv.join("lib")
            .join(format!("python{}", self.short_version()))
            .join("site-packages")
    }

    fn create_venv(&self, venv: &Path) -> Result<()> {
        let bin = venv.join("bin");
        fs::create_dir_all(&bin)?;
        fs::create_dir_all(self.site_packages(venv))?;
        fs::write(
            venv.join("pyvenv.cfg"),
            format!(
                "home = /usr/local/bin\ninclude-system-site-packages = false\nversion = {}\n",
                self.version
            ),
        )?;
        fs::write(bin.join("python"), "#!simulated\n")?;
        #[cfg(unix)]
        std::os::unix::fs::symlink("python", bin.join("python3"))?;
        self.write_dist_info(venv, "pip", SEEDED_PIP)?;
        self.write_dist_info(venv, "setuptools", SEEDED_SETUPTOOLS)?;
        Ok(())
    }

    fn write_dist_info(&self, venv: &Path, name: &str, version: &str) -> Result<()> {
        let site = self.site_packages(venv);
        let prefix = format!("{}-", name.replace('-', "_"));
        if site.exists() {
            for entry in fs::read_dir(&site)? {
                let entry = entry?;
                let file_name = entry.file_name().to_string_lossy().to_string();
                if file_name.starts_with(&prefix) && file_name.ends_with(".dist-info") {
                    fs::remove_dir_all(entry.path())?;
                }
            }
        }
        let dist_info = site.join(format!("{}{}.dist-info", prefix, version));
        fs::create_dir_all(&dist_info)?;
        fs::write(
            dist_info.join("METADATA"),
            format!(
                "Metadata-Version: 2.1\nName: {}\nVersion: {}\nSummary: simulated\n",
                name, version
            ),
        )?;
        Ok(())
    }

    fn pip_install(&self, venv: &Path, args: &[String]) -> Result<CommandOutput> {
        if let Some(requirement) = args.iter().find(|a| a.starts_with("pip")) {
            let version = requirement
                .strip_prefix("pip==")
                .unwrap_or(UPGRADED_PIP)
                .to_string();
            self.write_dist_info(venv, "pip", &version)?;
            return Ok(ok(format!("Successfully installed pip-{}\n", version)));
        }

        let constraint_file = args
            .iter()
            .position(|a| a == "--constraint" || a == "-c")
            .and_then(|i| args.get(i + 1))
            .context("simulated installer expects a constraints file")?;
        let project = args
            .last()
            .map(PathBuf::from)
            .context("simulated installer expects a project directory")?;

        let mut to_install: BTreeMap<String, String> = BTreeMap::new();
        for line in fs::read_to_string(constraint_file)?.lines() {
            if let Some((name, version)) = line.trim().split_once("==") {
                to_install.insert(name.to_string(), version.to_string());
            }
        }
        for name in self.skipped.lock().unwrap().iter() {
            to_install.remove(name);
        }
        to_install.extend(self.extra.lock().unwrap().clone());
        to_install.extend(self.overrides.lock().unwrap().clone());

        let manifest = Manifest::from_path(&project.join("pyproject.toml"))?;
        for source in &manifest.packages {
            if !project.join(source).exists() {
                return Ok(CommandOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: format!("ERROR: package directory '{}' does not exist\n", source.display()),
                });
            }
        }
        to_install.insert(
            manifest.name.clone(),
            manifest.version.clone().unwrap_or_else(|| "0.0.0".to_string()),
        );

        for (name, version) in &to_install {
            self.write_dist_info(venv, name, version)?;
        }

        let installed: Vec<String> = to_install
            .iter()
            .map(|(n, v)| format!("{}-{}", n, v))
            .collect();
        Ok(ok(format!("Successfully installed {}\n", installed.join(" "))))
    }
}

fn ok(stdout: String) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout,
        stderr: String::new(),
    }
}

/// `<venv>/bin/python` -> `<venv>`
fn venv_of(program: &Path) -> Option<&Path> {
    let bin = program.parent()?;
    if bin.file_name()? == "bin" {
        bin.parent()
    } else {
        None
    }
}

#[async_trait]
impl CommandRunner for SimulatedPython {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.recorded.lock().unwrap().push(spec.clone());

        let rendered = spec.to_string();
        if self
            .fail_on
            .lock()
            .unwrap()
            .iter()
            .any(|needle| rendered.contains(needle.as_str()))
        {
            return Ok(CommandOutput {
                status: Some(1),
                stdout: String::new(),
                stderr: format!("ERROR: simulated failure of '{}'\n", spec.description),
            });
        }

        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["--version"] => Ok(ok(format!("Python {}\n", self.version))),
            ["-m", "venv", target, ..] => {
                self.create_venv(Path::new(target))?;
                Ok(ok(String::new()))
            }
            ["-m", "pip", "install", ..] => {
                let venv = venv_of(&spec.program)
                    .with_context(|| format!("{} is not a venv interpreter", spec.program.display()))?;
                self.pip_install(venv, &spec.args[3..])
            }
            ["-c", ..] => Ok(ok(String::new())),
            _ => bail!("simulated interpreter cannot run '{}'", rendered),
        }
    }

    fn name(&self) -> &str {
        "simulated-python"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_version_and_venv() {
        let temp = TempDir::new().unwrap();
        let venv = temp.path().join("venv");
        let python = SimulatedPython::new("3.10.12");

        let version = python
            .run(&CommandSpec::new("python3", "version").arg("--version"))
            .await
            .unwrap();
        assert_eq!(version.stdout.trim(), "Python 3.10.12");

        python
            .run(
                &CommandSpec::new("python3", "create venv")
                    .args(["-m", "venv"])
                    .arg(venv.to_string_lossy()),
            )
            .await
            .unwrap();

        assert!(venv.join("pyvenv.cfg").exists());
        assert!(venv
            .join("lib/python3.10/site-packages/pip-22.0.4.dist-info/METADATA")
            .exists());
        assert_eq!(python.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_fail_on() {
        let python = SimulatedPython::new("3.10.12");
        python.fail_on("--version");
        let output = python
            .run(&CommandSpec::new("python3", "version").arg("--version"))
            .await
            .unwrap();
        assert_eq!(output.status, Some(1));
    }

    #[tokio::test]
    async fn test_unknown_invocation() {
        let python = SimulatedPython::new("3.10.12");
        let result = python
            .run(&CommandSpec::new("python3", "script").arg("script.py"))
            .await;
        assert!(result.is_err());
    }
}
