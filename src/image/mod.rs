//! Runtime image layout and configuration
//!
//! A runtime image is a directory:
//!
//! ```text
//! <image>/
//!   image.json        ImageConfig
//!   rootfs/
//!     venv/           the promoted environment, nothing else
//! ```

pub mod export;

use crate::artifact::{Digest, InstalledPackage};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const IMAGE_CONFIG_FILE: &str = "image.json";
pub const ROOTFS_DIR: &str = "rootfs";
pub const SCHEMA_VERSION: &str = "1.0";

pub const LABEL_DIGEST: &str = "io.venvpack.environment.digest";
pub const LABEL_BUILD_ID: &str = "io.venvpack.build-id";
pub const LABEL_PYTHON: &str = "io.venvpack.python-version";

/// Container health check configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Health check command, `CMD` form
    pub test: Vec<String>,
    /// HTTP path the check requests
    pub path: String,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
}

impl Healthcheck {
    /// An HTTP GET against the server's own port using only the standard library
    pub fn http(python: &Path, port: u16, path: &str) -> Self {
        let script = format!(
            "import sys, urllib.request; sys.exit(0 if urllib.request.urlopen('http://127.0.0.1:{}{}', timeout=3).status < 400 else 1)",
            port, path
        );
        Self {
            test: vec![
                "CMD".to_string(),
                python.to_string_lossy().to_string(),
                "-c".to_string(),
                script,
            ],
            path: path.to_string(),
            interval: "30s".to_string(),
            timeout: "5s".to_string(),
            retries: 3,
        }
    }
}

/// Contents of `image.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    pub schema_version: String,
    pub base_image: String,
    pub created: DateTime<Utc>,
    pub env: BTreeMap<String, String>,
    pub workdir: PathBuf,
    pub cmd: Vec<String>,
    /// Application object the command serves, `module.path:attribute`
    pub app: String,
    /// Location of the environment inside the image
    pub venv_path: PathBuf,
    pub exposed_ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Seconds the server gets to exit after an interrupt before it is killed
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    pub labels: BTreeMap<String, String>,
    pub packages: Vec<InstalledPackage>,
}

fn default_shutdown_grace() -> u64 {
    10
}

impl ImageConfig {
    pub fn digest(&self) -> Option<Digest> {
        self.labels.get(LABEL_DIGEST).and_then(|d| d.parse().ok())
    }

    pub fn build_id(&self) -> Option<&str> {
        self.labels.get(LABEL_BUILD_ID).map(String::as_str)
    }

    pub fn write(&self, image_dir: &Path) -> Result<()> {
        let path = image_dir.join(IMAGE_CONFIG_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize image config")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Map an absolute in-image path onto the rootfs directory
pub fn rootfs_path(rootfs: &Path, in_image: &Path) -> PathBuf {
    let relative: PathBuf = in_image
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    rootfs.join(relative)
}

/// A runtime image on disk
#[derive(Debug, Clone)]
pub struct RuntimeImage {
    pub root: PathBuf,
    pub config: ImageConfig,
}

impl RuntimeImage {
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(IMAGE_CONFIG_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ImageConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    pub fn rootfs(&self) -> PathBuf {
        self.root.join(ROOTFS_DIR)
    }

    /// The environment directory inside this image's rootfs
    pub fn venv_dir(&self) -> PathBuf {
        rootfs_path(&self.rootfs(), &self.config.venv_path)
    }

    /// Translate an in-image path (e.g. `/venv/bin/python`) to this directory
    pub fn resolve(&self, in_image: &Path) -> PathBuf {
        rootfs_path(&self.rootfs(), in_image)
    }

    pub fn inspect(&self) -> Result<ImageInspection> {
        let rootfs = self.rootfs();
        let mut top_level = Vec::new();
        for entry in
            fs::read_dir(&rootfs).with_context(|| format!("Failed to read {}", rootfs.display()))?
        {
            top_level.push(entry?.file_name().to_string_lossy().to_string());
        }
        top_level.sort();

        let expected_top = self
            .config
            .venv_path
            .components()
            .find_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                _ => None,
            })
            .unwrap_or_default();

        let packages = crate::artifact::scan(&self.venv_dir())?;
        let digest = crate::artifact::listing_digest(&packages);

        Ok(ImageInspection {
            path: self.root.clone(),
            contained: top_level == vec![expected_top],
            top_level,
            digest_matches: self.config.digest().as_ref() == Some(&digest),
            digest,
            build_id: self.config.build_id().map(str::to_string),
            base_image: self.config.base_image.clone(),
            cmd: self.config.cmd.clone(),
            packages,
        })
    }
}

/// What `inspect` reports about an image
#[derive(Debug, Clone, Serialize)]
pub struct ImageInspection {
    pub path: PathBuf,
    pub base_image: String,
    pub build_id: Option<String>,
    pub top_level: Vec<String>,
    /// The rootfs holds only the environment
    pub contained: bool,
    pub digest: Digest,
    /// The installed listing still matches the digest recorded at build time
    pub digest_matches: bool,
    pub cmd: Vec<String>,
    pub packages: Vec<InstalledPackage>,
}

impl ImageInspection {
    pub fn is_healthy(&self) -> bool {
        self.contained && self.digest_matches
    }
}

impl fmt::Display for ImageInspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runtime Image: {}", self.path.display())?;
        writeln!(f, "  Base Image: {}", self.base_image)?;
        if let Some(ref id) = self.build_id {
            writeln!(f, "  Build ID:   {}", id)?;
        }
        writeln!(f, "  Command:    {}", self.cmd.join(" "))?;
        writeln!(
            f,
            "  Rootfs:     {} ({})",
            self.top_level.join(", "),
            if self.contained {
                "environment only"
            } else {
                "UNEXPECTED CONTENT"
            }
        )?;
        writeln!(
            f,
            "  Digest:     {} ({})",
            self.digest,
            if self.digest_matches {
                "matches build"
            } else {
                "DIFFERS FROM BUILD"
            }
        )?;
        writeln!(f, "  Packages ({}):", self.packages.len())?;
        for package in &self.packages {
            writeln!(f, "    - {}", package)?;
        }
        Ok(())
    }
}
