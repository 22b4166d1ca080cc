//! Contains the logic for writing a device's contents to a backup archive.
//!
//! Archives are xz-compressed tarballs. Member names are relative to the
//! device root and always use `/` as separator, so a backup taken on one
//! platform restores on any other. Hidden entries (leading `.`) are skipped at
//! every level.

use crate::device::{self, is_hidden};
use crate::error::{Error, IoResultExt, Result};
use crate::progress::Progress;
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, info_span, warn};
use walkdir::{DirEntry, WalkDir};
use xz2::write::XzEncoder;

/// File name prefix shared by every backup.
pub const ARCHIVE_PREFIX: &str = "opie-backup-";
/// File name suffix shared by every backup.
pub const ARCHIVE_EXTENSION: &str = ".tar.xz";

/// xz preset; 6 is the `xz` command's default.
const XZ_PRESET: u32 = 6;

const BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

/// `opie-backup-YYYY-MM-DD-HHMMSS.tar.xz` for the current local time.
///
/// Two backups started within the same second share a name; the later one
/// overwrites the earlier.
pub fn archive_file_name() -> String {
    format!(
        "{ARCHIVE_PREFIX}{}{ARCHIVE_EXTENSION}",
        Local::now().format("%Y-%m-%d-%H%M%S")
    )
}

/// Converts a path under `root` into an archive member name.
pub(crate) fn member_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Every visible entry below `mount`, parents before children, siblings in
/// name order.
fn visible_entries(mount: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(mount)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
}

/// Counts the files and directories that [`create_archive`] will write.
pub fn count_entries(mount: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in visible_entries(mount) {
        entry.with_context(|| format!("Failed to scan {}", mount.display()))?;
        total += 1;
    }
    Ok(total)
}

/// Writes a backup of `mount` into `output_dir` and returns the archive path.
///
/// # Arguments
///
/// * `mount` - The device root to back up.
/// * `output_dir` - Directory that receives the archive; created if missing.
/// * `running` - Cleared by an interrupt handler to abort between entries.
/// * `on_progress` - Called after every entry with the running count against
///   the precomputed total.
///
/// # Errors
///
/// Any I/O error aborts the whole backup and leaves the partial archive on
/// disk for the caller to inspect or delete. A cancelled backup removes its
/// partial archive and returns [`Error::Cancelled`].
pub fn create_archive<F>(
    mount: &Path,
    output_dir: &Path,
    running: Arc<AtomicBool>,
    mut on_progress: F,
) -> Result<PathBuf>
where
    F: FnMut(Progress),
{
    let mount = device::normalize_path(mount);
    if !mount.is_dir() {
        return Err(Error::NotFound {
            what: "Mount point",
            path: mount,
        });
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let archive_path = output_dir.join(archive_file_name());

    let span = info_span!("create_archive", archive = %archive_path.display());
    let _guard = span.enter();

    let total = count_entries(&mount)?;
    info!(mount = %mount.display(), total, "Writing backup");

    match write_entries(&mount, &archive_path, total, &running, &mut on_progress) {
        Err(Error::Cancelled) => {
            if let Err(e) = std::fs::remove_file(&archive_path) {
                warn!(
                    archive = %archive_path.display(),
                    error = %e,
                    "Could not remove partial archive"
                );
            }
            Err(Error::Cancelled)
        }
        Err(e) => Err(e),
        Ok(written) => {
            info!(entries = written, "Backup written");
            Ok(archive_path)
        }
    }
}

fn write_entries<F>(
    mount: &Path,
    archive_path: &Path,
    total: u64,
    running: &AtomicBool,
    on_progress: &mut F,
) -> Result<u64>
where
    F: FnMut(Progress),
{
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;
    let encoder = XzEncoder::new(BufWriter::with_capacity(BUFFER_SIZE, file), XZ_PRESET);
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut written: u64 = 0;
    for entry in visible_entries(mount) {
        if !running.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let entry = entry.with_context(|| format!("Failed to scan {}", mount.display()))?;
        let Some(name) = member_name(mount, entry.path()) else {
            continue;
        };

        debug!(entry = %name, "Adding");
        builder
            .append_path_with_name(entry.path(), &name)
            .with_context(|| format!("Failed to add {name} to archive"))?;

        written += 1;
        on_progress(Progress::new(written, total.max(written)));
    }

    let context = || format!("Failed to finish {}", archive_path.display());
    let encoder = builder.into_inner().with_context(context)?;
    let mut writer = encoder.finish().with_context(context)?;
    writer.flush().with_context(context)?;

    Ok(written)
}
