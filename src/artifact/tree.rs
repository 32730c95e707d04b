//! Content digest of a whole environment tree
//!
//! Unlike the listing digest this covers every file byte, so it differs
//! between builds (scripts embed the venv path, bytecode embeds timestamps).
//! It is only compared against a copy of the same build.

use super::Digest;
use crate::util::fs::{walk_all, EntryKind};
use anyhow::{Context, Result};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io;
use std::path::Path;

/// sha256 over the sorted entries under `root`: relative path and kind of
/// each entry, file contents and symlink targets
pub fn tree_digest(root: &Path) -> Result<Digest> {
    let mut hasher = Sha256::new();

    for entry in walk_all(root)? {
        let relative = entry.relative.to_string_lossy();
        match entry.kind {
            EntryKind::Directory => {
                hasher.update(format!("d {}\n", relative));
            }
            EntryKind::Symlink => {
                let target = std::fs::read_link(&entry.absolute)
                    .with_context(|| format!("Failed to read link {}", entry.absolute.display()))?;
                hasher.update(format!("l {} {}\n", relative, target.to_string_lossy()));
            }
            EntryKind::File => {
                let mut file = File::open(&entry.absolute)
                    .with_context(|| format!("Failed to open {}", entry.absolute.display()))?;
                let len = file.metadata()?.len();
                hasher.update(format!("f {} {}\n", relative, len));
                io::copy(&mut file, &mut hasher)
                    .with_context(|| format!("Failed to read {}", entry.absolute.display()))?;
            }
        }
    }

    Ok(Digest::from_sha256(hasher))
}
