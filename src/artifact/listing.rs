//! Installed package listing of a virtual environment

use super::digest::Digest;
use crate::manifest::normalize_name;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// Normalized name (PEP 503)
    pub name: String,
    pub version: String,
}

impl fmt::Display for InstalledPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=={}", self.name, self.version)
    }
}

/// `lib/python*/site-packages` directories of `venv`
pub fn site_packages_dirs(venv: &Path) -> Result<Vec<PathBuf>> {
    let lib = venv.join("lib");
    if !lib.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(&lib).with_context(|| format!("Failed to read {}", lib.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let site = entry.path().join("site-packages");
        if name.starts_with("python") && site.is_dir() {
            dirs.push(site);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Read every `*.dist-info` in the environment. The result is sorted and
/// free of duplicates.
pub fn scan(venv: &Path) -> Result<Vec<InstalledPackage>> {
    let mut packages = Vec::new();
    for site in site_packages_dirs(venv)? {
        for entry in
            fs::read_dir(&site).with_context(|| format!("Failed to read {}", site.display()))?
        {
            let path = entry?.path();
            let is_dist_info = path
                .extension()
                .is_some_and(|ext| ext == "dist-info");
            if !is_dist_info || !path.is_dir() {
                continue;
            }
            match read_dist_info(&path)? {
                Some(package) => packages.push(package),
                None => warn!(path = %path.display(), "Skipping unreadable dist-info"),
            }
        }
    }
    packages.sort();
    packages.dedup();
    debug!(venv = %venv.display(), count = packages.len(), "Scanned installed packages");
    Ok(packages)
}

fn read_dist_info(dir: &Path) -> Result<Option<InstalledPackage>> {
    let metadata = dir.join("METADATA");
    if metadata.is_file() {
        let content = fs::read_to_string(&metadata)
            .with_context(|| format!("Failed to read {}", metadata.display()))?;
        let mut name = None;
        let mut version = None;
        // Headers end at the first blank line; the long description follows.
        for line in content.lines().take_while(|l| !l.trim().is_empty()) {
            if let Some(value) = line.strip_prefix("Name:") {
                name = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("Version:") {
                version = Some(value.trim().to_string());
            }
        }
        if let (Some(name), Some(version)) = (name, version) {
            return Ok(Some(InstalledPackage {
                name: normalize_name(&name),
                version,
            }));
        }
    }

    // `<name>-<version>.dist-info`; names in directory form never contain `-`
    let stem = dir
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(stem.split_once('-').map(|(name, version)| InstalledPackage {
        name: normalize_name(name),
        version: version.to_string(),
    }))
}

/// Content address of a listing: sha256 over `name==version\n` lines in sorted order
pub fn listing_digest(packages: &[InstalledPackage]) -> Digest {
    let mut sorted: Vec<&InstalledPackage> = packages.iter().collect();
    sorted.sort();
    let canonical: String = sorted.iter().map(|p| format!("{}\n", p)).collect();
    Digest::sha256(canonical)
}
