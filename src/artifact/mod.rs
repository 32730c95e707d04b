//! The environment artifact handed from the builder to the final stage

pub mod digest;
pub mod listing;
pub mod tree;

pub use digest::{Digest, InvalidDigest};
pub use listing::{listing_digest, scan, InstalledPackage};
pub use tree::tree_digest;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Marker file every virtual environment carries at its root
pub const VENV_MARKER: &str = "pyvenv.cfg";

/// Descriptor of a populated virtual environment
///
/// Produced only by a successful build. The final stage takes it by value:
/// once promoted, the builder's copy is no longer referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentArtifact {
    pub build_id: String,
    pub path: PathBuf,
    pub interpreter_version: String,
    pub packages: Vec<InstalledPackage>,
    /// Listing digest, identical across builds of the same lock
    pub digest: Digest,
    /// Digest of every file in this build's tree
    pub content: Digest,
}

impl EnvironmentArtifact {
    /// Scan `path` and describe it
    pub fn describe(
        build_id: impl Into<String>,
        path: &Path,
        interpreter_version: impl Into<String>,
    ) -> Result<Self> {
        let packages = scan(path)?;
        let digest = listing_digest(&packages);
        let content = tree_digest(path)?;
        Ok(Self {
            build_id: build_id.into(),
            path: path.to_path_buf(),
            interpreter_version: interpreter_version.into(),
            packages,
            digest,
            content,
        })
    }

    pub fn is_environment(path: &Path) -> bool {
        path.join(VENV_MARKER).is_file()
    }

    pub fn package(&self, name: &str) -> Option<&InstalledPackage> {
        let name = crate::manifest::normalize_name(name);
        self.packages.iter().find(|p| p.name == name)
    }

    /// Re-scan `path` and compare with the recorded listing digest
    pub fn verify_at(&self, path: &Path) -> Result<Option<Digest>> {
        let actual = listing_digest(&scan(path)?);
        Ok(if actual == self.digest {
            None
        } else {
            Some(actual)
        })
    }

    /// Re-hash `path` and compare with the recorded content digest
    pub fn verify_content_at(&self, path: &Path) -> Result<Option<Digest>> {
        let actual = tree_digest(path)?;
        Ok(if actual == self.content {
            None
        } else {
            Some(actual)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fake_venv(root: &Path, packages: &[(&str, &str)]) {
        fs::write(root.join(VENV_MARKER), "version = 3.10.12\n").unwrap();
        let site = root.join("lib/python3.10/site-packages");
        for (name, version) in packages {
            let dir = site.join(format!("{}-{}.dist-info", name, version));
            fs::create_dir_all(&dir).unwrap();
            fs::write(
                dir.join("METADATA"),
                format!("Name: {}\nVersion: {}\n", name, version),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_describe_and_verify() {
        let temp = TempDir::new().unwrap();
        fake_venv(temp.path(), &[("uvicorn", "0.17.6"), ("h11", "0.13.0")]);

        let artifact = EnvironmentArtifact::describe("b1", temp.path(), "3.10.12").unwrap();
        assert!(EnvironmentArtifact::is_environment(temp.path()));
        assert_eq!(artifact.packages.len(), 2);
        assert_eq!(artifact.package("UVICORN").unwrap().version, "0.17.6");
        assert!(artifact.verify_at(temp.path()).unwrap().is_none());

        fake_venv(temp.path(), &[("six", "1.16.0")]);
        assert!(artifact.verify_at(temp.path()).unwrap().is_some());
    }

    #[test]
    fn test_content_check_catches_edited_module() {
        let temp = TempDir::new().unwrap();
        fake_venv(temp.path(), &[("h11", "0.13.0")]);
        let module = temp.path().join("lib/python3.10/site-packages/h11.py");
        fs::write(&module, "class Connection:\n    pass\n").unwrap();

        let artifact = EnvironmentArtifact::describe("b1", temp.path(), "3.10.12").unwrap();
        assert!(artifact.verify_content_at(temp.path()).unwrap().is_none());

        fs::write(&module, "class Conn").unwrap();
        assert!(artifact.verify_at(temp.path()).unwrap().is_none());
        assert!(artifact.verify_content_at(temp.path()).unwrap().is_some());
    }
}
