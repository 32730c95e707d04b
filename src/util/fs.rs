//! Filesystem helpers
//!
//! Directory copies here never follow symlinks: a virtual environment's
//! `bin/python` is a link to the base interpreter and must stay one.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Kind of entry seen during a walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One entry of a walked tree, relative to the walk root
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub relative: PathBuf,
    pub absolute: PathBuf,
    pub kind: EntryKind,
}

/// Walk `root` without any ignore filtering, sorted by path.
///
/// The root itself is not returned.
pub fn walk_all(root: &Path) -> Result<Vec<TreeEntry>> {
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();
    collect(root, walker)
}

/// Walk a project tree the way a build context is assembled: `.gitignore`
/// and `.dockerignore` rules apply, VCS metadata and bytecode caches are
/// skipped. Hidden files are kept.
pub fn walk_context(root: &Path) -> Result<Vec<TreeEntry>> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .follow_links(false)
        .add_custom_ignore_filename(".dockerignore")
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(matches!(name.as_ref(), ".git" | ".hg" | ".svn" | "__pycache__")
                || name.ends_with(".pyc")
                || name.ends_with(".pyo"))
        });
    collect(root, builder.build())
}

fn collect(root: &Path, walker: ignore::Walk) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    for entry in walker {
        let entry = entry.context("Failed to read directory entry")?;
        let path = entry.path();
        if path == root {
            continue;
        }

        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("Failed to read metadata of {}", path.display()))?;
        let kind = if metadata.file_type().is_symlink() {
            EntryKind::Symlink
        } else if metadata.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };

        let relative = path
            .strip_prefix(root)
            .context("Failed to strip prefix")?
            .to_path_buf();
        trace!(path = %relative.display(), ?kind, "walked");
        entries.push(TreeEntry {
            relative,
            absolute: path.to_path_buf(),
            kind,
        });
    }
    Ok(entries)
}

/// Recreate `entries` under `dest`. Returns the number of files and links copied.
pub fn copy_entries(entries: &[TreeEntry], dest: &Path) -> Result<u64> {
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut copied = 0;
    for entry in entries {
        let target = dest.join(&entry.relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        match entry.kind {
            EntryKind::Directory => {
                fs::create_dir_all(&target)
                    .with_context(|| format!("Failed to create {}", target.display()))?;
            }
            EntryKind::File => {
                fs::copy(&entry.absolute, &target).with_context(|| {
                    format!(
                        "Failed to copy {} to {}",
                        entry.absolute.display(),
                        target.display()
                    )
                })?;
                copied += 1;
            }
            EntryKind::Symlink => {
                let link = fs::read_link(&entry.absolute).with_context(|| {
                    format!("Failed to read link {}", entry.absolute.display())
                })?;
                symlink(&link, &target)?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

/// Copy a whole tree, preserving symlinks
pub fn copy_tree(src: &Path, dest: &Path) -> Result<u64> {
    let entries = walk_all(src)?;
    let copied = copy_entries(&entries, dest)?;
    debug!(
        from = %src.display(),
        to = %dest.display(),
        files = copied,
        "Copied tree"
    );
    Ok(copied)
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, target)
        .with_context(|| format!("Failed to create symlink {}", target.display()))
}

#[cfg(not(unix))]
fn symlink(link: &Path, target: &Path) -> Result<()> {
    anyhow::bail!(
        "Cannot recreate symlink {} -> {} on this platform",
        target.display(),
        link.display()
    )
}

/// Remove a file or directory tree if it exists
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove {}", path.display())),
        Ok(_) => fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to inspect {}", path.display())),
    }
}
