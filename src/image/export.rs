//! Deterministic tarball of a runtime image
//!
//! Entries are sorted by path, timestamps are zeroed and ownership is fixed
//! to root, so two exports of identical trees are byte-identical.

use super::{IMAGE_CONFIG_FILE, ROOTFS_DIR};
use crate::util::fs::{walk_all, EntryKind};
use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use tar::{EntryType, Header};
use tracing::debug;

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

fn base_header(kind: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

/// Write `image_dir` (config plus rootfs) as a gzip-compressed tarball.
/// Returns the number of entries written.
pub fn export_image(image_dir: &Path, output: &Path) -> Result<usize> {
    let config = image_dir.join(IMAGE_CONFIG_FILE);
    let rootfs = image_dir.join(ROOTFS_DIR);
    if !config.is_file() || !rootfs.is_dir() {
        anyhow::bail!("{} is not a runtime image", image_dir.display());
    }

    let file = File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut count = 0;

    let metadata = fs::metadata(&config)?;
    let mut header = base_header(EntryType::Regular, 0o644, metadata.len());
    builder
        .append_data(
            &mut header,
            IMAGE_CONFIG_FILE,
            File::open(&config).with_context(|| format!("Failed to open {}", config.display()))?,
        )
        .context("Failed to append image config")?;
    count += 1;

    let mut header = base_header(EntryType::Directory, 0o755, 0);
    builder.append_data(&mut header, ROOTFS_DIR, std::io::empty())?;
    count += 1;

    for entry in walk_all(&rootfs)? {
        let archive_path = Path::new(ROOTFS_DIR).join(&entry.relative);
        match entry.kind {
            EntryKind::Directory => {
                let mut header = base_header(EntryType::Directory, 0o755, 0);
                builder.append_data(&mut header, &archive_path, std::io::empty())?;
            }
            EntryKind::File => {
                let metadata = fs::metadata(&entry.absolute)?;
                let mode = if is_executable(&metadata) { 0o755 } else { 0o644 };
                let mut header = base_header(EntryType::Regular, mode, metadata.len());
                let file = File::open(&entry.absolute)
                    .with_context(|| format!("Failed to open {}", entry.absolute.display()))?;
                builder.append_data(&mut header, &archive_path, file)?;
            }
            EntryKind::Symlink => {
                let target = fs::read_link(&entry.absolute)?;
                let mut header = base_header(EntryType::Symlink, 0o777, 0);
                builder.append_link(&mut header, &archive_path, &target)?;
            }
        }
        count += 1;
    }

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    encoder.finish().context("Failed to finish gzip stream")?;

    debug!(output = %output.display(), entries = count, "Exported image");
    Ok(count)
}
