//! Final stage: promote the builder's environment into a fresh runtime image
//!
//! Only the environment directory is copied. The manifest, lock file,
//! build context and installer are never consulted here.

use super::base::{BaseEnvironment, StageEnvironment};
use crate::artifact::{Digest, EnvironmentArtifact};
use crate::config::PipelineConfig;
use crate::image::{
    rootfs_path, Healthcheck, ImageConfig, RuntimeImage, LABEL_BUILD_ID, LABEL_DIGEST,
    LABEL_PYTHON, ROOTFS_DIR, SCHEMA_VERSION,
};
use crate::launch::{InvalidAppTarget, StartupCommand};
use crate::util::fs as fsutil;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const STAGE_NAME: &str = "final";

const SYSTEM_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("Environment artifact not found: {path}")]
    MissingArtifact { path: PathBuf },

    #[error("{path} is not a virtual environment (no pyvenv.cfg)")]
    NotAnEnvironment { path: PathBuf },

    #[error("Copied environment does not match the build: expected {expected}, found {actual}")]
    DigestMismatch { expected: Digest, actual: Digest },

    #[error("Copied environment files differ from the build: expected {expected}, found {actual}")]
    ContentMismatch { expected: Digest, actual: Digest },

    #[error("Invalid startup command: {0}")]
    Startup(#[from] InvalidAppTarget),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PromotionError {
    fn io(context: impl Into<String>, source: anyhow::Error) -> Self {
        PromotionError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Runs the final stage
pub struct ImagePromoter {
    config: PipelineConfig,
    stage: StageEnvironment,
}

impl ImagePromoter {
    pub fn new(config: &PipelineConfig, base: &BaseEnvironment) -> Self {
        let venv = config.build.venv_path.to_string_lossy().to_string();
        let stage = base.derive_stage(STAGE_NAME).with_env([
            ("PATH".to_string(), format!("{}/bin:{}", venv, SYSTEM_PATH)),
            ("VIRTUAL_ENV".to_string(), venv),
        ]);
        Self {
            config: config.clone(),
            stage,
        }
    }

    pub fn stage(&self) -> &StageEnvironment {
        &self.stage
    }

    /// Startup command with the in-image interpreter path
    pub fn startup_command(&self) -> Result<Vec<String>, InvalidAppTarget> {
        let python = self.config.build.venv_path.join("bin").join("python");
        Ok(StartupCommand::from_runtime(&self.config.runtime)?.argv(&python))
    }

    /// Copy `artifact` into a new image at `output`, replacing any image
    /// already there. The artifact is consumed: after promotion the image
    /// owns its own copy.
    pub fn promote(
        &self,
        artifact: EnvironmentArtifact,
        output: &Path,
    ) -> Result<RuntimeImage, PromotionError> {
        if !artifact.path.exists() {
            return Err(PromotionError::MissingArtifact {
                path: artifact.path,
            });
        }
        if !EnvironmentArtifact::is_environment(&artifact.path) {
            return Err(PromotionError::NotAnEnvironment {
                path: artifact.path,
            });
        }

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        fs::create_dir_all(&parent).map_err(|e| {
            PromotionError::io(format!("Failed to create {}", parent.display()), e.into())
        })?;

        let staging = parent.join(format!(".{}.partial-{}", name, uuid::Uuid::new_v4()));
        let result = self.stage_image(&artifact, &staging);
        let config = match result {
            Ok(config) => config,
            Err(e) => {
                if let Err(cleanup) = fsutil::remove_if_exists(&staging) {
                    warn!(staging = %staging.display(), error = %cleanup, "Failed to remove staging directory");
                }
                return Err(e);
            }
        };

        fsutil::remove_if_exists(output)
            .map_err(|e| PromotionError::io("Failed to remove previous image", e))?;
        fs::rename(&staging, output).map_err(|e| {
            PromotionError::io(
                format!("Failed to move image into {}", output.display()),
                e.into(),
            )
        })?;

        info!(
            image = %output.display(),
            packages = config.packages.len(),
            digest = %artifact.digest.short(),
            "Runtime image ready"
        );

        Ok(RuntimeImage {
            root: output.to_path_buf(),
            config,
        })
    }

    fn stage_image(
        &self,
        artifact: &EnvironmentArtifact,
        staging: &Path,
    ) -> Result<ImageConfig, PromotionError> {
        let rootfs = staging.join(ROOTFS_DIR);
        let venv = rootfs_path(&rootfs, &self.config.build.venv_path);

        let copied = fsutil::copy_tree(&artifact.path, &venv)
            .map_err(|e| PromotionError::io("Failed to copy environment", e))?;
        debug!(entries = copied, dest = %venv.display(), "Environment copied");

        if let Some(actual) = artifact
            .verify_at(&venv)
            .map_err(|e| PromotionError::io("Failed to scan copied environment", e))?
        {
            return Err(PromotionError::DigestMismatch {
                expected: artifact.digest.clone(),
                actual,
            });
        }
        if let Some(actual) = artifact
            .verify_content_at(&venv)
            .map_err(|e| PromotionError::io("Failed to hash copied environment", e))?
        {
            return Err(PromotionError::ContentMismatch {
                expected: artifact.content.clone(),
                actual,
            });
        }

        let config = self.image_config(artifact)?;
        config
            .write(staging)
            .map_err(|e| PromotionError::io("Failed to write image config", e))?;
        Ok(config)
    }

    fn image_config(&self, artifact: &EnvironmentArtifact) -> Result<ImageConfig, PromotionError> {
        let runtime = &self.config.runtime;
        let python = self.config.build.venv_path.join("bin").join("python");

        let mut labels = BTreeMap::new();
        labels.insert(LABEL_DIGEST.to_string(), artifact.digest.to_string());
        labels.insert(LABEL_BUILD_ID.to_string(), artifact.build_id.clone());
        labels.insert(
            LABEL_PYTHON.to_string(),
            artifact.interpreter_version.clone(),
        );

        Ok(ImageConfig {
            schema_version: SCHEMA_VERSION.to_string(),
            base_image: self.stage.base_image.clone(),
            created: chrono::Utc::now(),
            env: self.stage.env.clone(),
            workdir: self.stage.workdir.clone(),
            cmd: self.startup_command()?,
            app: runtime.app.clone(),
            venv_path: self.config.build.venv_path.clone(),
            exposed_ports: vec![runtime.port],
            healthcheck: runtime
                .healthcheck_path
                .as_deref()
                .map(|path| Healthcheck::http(&python, runtime.port, path)),
            required_env: runtime.required_env.clone(),
            shutdown_grace_secs: runtime.shutdown_grace_secs,
            labels,
            packages: artifact.packages.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseConfig;
    use tempfile::TempDir;

    fn fake_venv(root: &Path) {
        let site = root.join("lib/python3.10/site-packages");
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("pyvenv.cfg"), "version = 3.10.12\n").unwrap();
        fs::write(root.join("bin/python"), "").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("python", root.join("bin/python3")).unwrap();
        for (name, version) in [("uvicorn", "0.17.6"), ("h11", "0.13.0")] {
            let dir = site.join(format!("{}-{}.dist-info", name, version));
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("METADATA"),
                format!("Name: {}\nVersion: {}\n", name, version),
            )
            .unwrap();
        }
    }

    fn promoter() -> ImagePromoter {
        let config = PipelineConfig::default();
        ImagePromoter::new(&config, &BaseEnvironment::from_config(&BaseConfig::default()))
    }

    fn artifact(temp: &TempDir) -> EnvironmentArtifact {
        let venv = temp.path().join("work/venv");
        fake_venv(&venv);
        EnvironmentArtifact::describe("b1", &venv, "3.10.12").unwrap()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_promote_copies_only_environment() {
        let temp = TempDir::new().unwrap();
        let artifact = artifact(&temp);
        let digest = artifact.digest.clone();
        let output = temp.path().join("out/image");

        let image = promoter().promote(artifact, &output).unwrap();

        assert_eq!(entries(&output.join("rootfs")), vec!["venv"]);
        assert_eq!(entries(&output), vec!["image.json", "rootfs"]);
        assert_eq!(entries(&temp.path().join("out")), vec!["image"]);
        #[cfg(unix)]
        assert!(fs::symlink_metadata(output.join("rootfs/venv/bin/python3"))
            .unwrap()
            .file_type()
            .is_symlink());

        assert_eq!(image.config.digest(), Some(digest));
        assert_eq!(image.config.build_id(), Some("b1"));
        assert_eq!(
            image.config.cmd,
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
        assert_eq!(image.config.env["PYTHONUNBUFFERED"], "1");
        assert_eq!(image.config.env["VIRTUAL_ENV"], "/venv");
        assert_eq!(image.config.exposed_ports, vec![8080]);
        assert!(image.config.healthcheck.is_some());

        let reloaded = RuntimeImage::load(&output).unwrap();
        assert_eq!(reloaded.config, image.config);
        assert!(reloaded.inspect().unwrap().is_healthy());
    }

    #[test]
    fn test_promote_replaces_previous_image() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("image");
        fs::create_dir_all(output.join("rootfs/app")).unwrap();
        fs::write(output.join("stale.txt"), "old").unwrap();

        promoter().promote(artifact(&temp), &output).unwrap();

        assert_eq!(entries(&output), vec!["image.json", "rootfs"]);
        assert_eq!(entries(&output.join("rootfs")), vec!["venv"]);
    }

    #[test]
    fn test_missing_artifact() {
        let temp = TempDir::new().unwrap();
        let mut artifact = artifact(&temp);
        artifact.path = temp.path().join("gone");
        let output = temp.path().join("image");

        let err = promoter().promote(artifact, &output).unwrap_err();
        assert!(matches!(err, PromotionError::MissingArtifact { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_not_an_environment() {
        let temp = TempDir::new().unwrap();
        let artifact = artifact(&temp);
        fs::remove_file(artifact.path.join("pyvenv.cfg")).unwrap();

        let err = promoter()
            .promote(artifact, &temp.path().join("image"))
            .unwrap_err();
        assert!(matches!(err, PromotionError::NotAnEnvironment { .. }));
    }

    #[test]
    fn test_digest_mismatch_leaves_no_image() {
        let temp = TempDir::new().unwrap();
        let artifact = artifact(&temp);
        let extra = artifact
            .path
            .join("lib/python3.10/site-packages/six-1.16.0.dist-info");
        fs::create_dir_all(&extra).unwrap();
        fs::write(extra.join("METADATA"), "Name: six\nVersion: 1.16.0\n").unwrap();

        let output = temp.path().join("out/image");
        let err = promoter().promote(artifact, &output).unwrap_err();

        assert!(matches!(err, PromotionError::DigestMismatch { .. }));
        assert!(!output.exists());
        assert!(entries(&temp.path().join("out")).is_empty());
    }

    #[test]
    fn test_truncated_module_leaves_no_image() {
        let temp = TempDir::new().unwrap();
        let venv = temp.path().join("work/venv");
        fake_venv(&venv);
        let module = venv.join("lib/python3.10/site-packages/h11/__init__.py");
        fs::create_dir_all(module.parent().unwrap()).unwrap();
        fs::write(&module, "from ._connection import Connection\n").unwrap();
        let artifact = EnvironmentArtifact::describe("b1", &venv, "3.10.12").unwrap();

        fs::write(&module, "from ._conn").unwrap();

        let output = temp.path().join("out/image");
        let err = promoter().promote(artifact, &output).unwrap_err();

        assert!(matches!(err, PromotionError::ContentMismatch { .. }));
        assert!(!output.exists());
        assert!(entries(&temp.path().join("out")).is_empty());
    }
}
