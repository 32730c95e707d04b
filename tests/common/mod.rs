#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Copy a fixture project into a fresh temporary directory
pub fn project(name: &str) -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    venvpack::util::fs::copy_tree(&fixture(name), temp.path()).expect("Failed to copy fixture");
    temp
}

pub fn venvpack_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_venvpack"))
}

pub fn python3() -> Option<PathBuf> {
    let output = std::process::Command::new("python3")
        .arg("--version")
        .output()
        .ok()?;
    output.status.success().then(|| PathBuf::from("python3"))
}
