//! Contains the logic for writing a backup archive back onto the device.
//!
//! The restore is not atomic. Entries are extracted in archive order straight
//! onto the mount; if one fails, the ones before it stay on the device and
//! nothing is rolled back. Callers should run [`crate::verify_structure`] and
//! get the user's confirmation first.

use crate::device::{self, is_valid_mount};
use crate::error::{Error, IoResultExt, Result};
use crate::progress::Progress;
use crate::verify::open_archive;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, info_span};

/// Number of entries in an archive. Reads (and decompresses) it once.
pub fn count_archive_entries(archive_path: &Path) -> Result<u64> {
    let context = || format!("Failed to read {}", archive_path.display());
    let mut archive = open_archive(archive_path).with_context(context)?;
    let mut total = 0;
    for entry in archive.entries().with_context(context)? {
        entry.with_context(context)?;
        total += 1;
    }
    Ok(total)
}

/// Extracts `archive_path` onto `mount`.
///
/// # Arguments
///
/// * `archive_path` - The backup to restore.
/// * `mount` - The OP-1's mount point. Must carry the OP-1 directory layout.
/// * `running` - Cleared by an interrupt handler to abort between entries.
/// * `on_progress` - Called after each entry. Its percentage never decreases
///   and reaches 100 exactly once, on the final entry.
///
/// # Errors
///
/// * [`Error::NotFound`] if the archive does not exist.
/// * [`Error::InvalidMount`] if `mount` is not an OP-1.
/// * [`Error::Restore`] wrapping the first failure during extraction,
///   including cancellation. The device may be left partially restored.
pub fn restore_archive<F>(
    archive_path: &Path,
    mount: &Path,
    running: Arc<AtomicBool>,
    mut on_progress: F,
) -> Result<()>
where
    F: FnMut(Progress),
{
    let archive_path = device::normalize_path(archive_path);
    let mount = device::normalize_path(mount);

    if !archive_path.exists() {
        return Err(Error::NotFound {
            what: "Backup file",
            path: archive_path,
        });
    }
    if !is_valid_mount(&mount) {
        return Err(Error::InvalidMount { path: mount });
    }

    let span = info_span!("restore_archive", archive = %archive_path.display());
    let _guard = span.enter();

    extract_entries(&archive_path, &mount, &running, &mut on_progress)
        .map_err(|e| Error::Restore {
            source: Box::new(e),
        })?;

    info!(mount = %mount.display(), "Restore completed successfully");
    Ok(())
}

fn extract_entries<F>(
    archive_path: &Path,
    mount: &Path,
    running: &AtomicBool,
    on_progress: &mut F,
) -> Result<()>
where
    F: FnMut(Progress),
{
    let total = count_archive_entries(archive_path)?;
    info!(total, mount = %mount.display(), "Restoring backup");

    let context = || format!("Failed to read {}", archive_path.display());
    let mut archive = open_archive(archive_path).with_context(context)?;
    let mut processed: u64 = 0;

    for entry in archive.entries().with_context(context)? {
        if !running.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }

        let mut entry = entry.with_context(context)?;
        let name = entry
            .path()
            .with_context(context)?
            .to_string_lossy()
            .into_owned();
        debug!(entry = %name, "Extracting");

        // `unpack_in` normalizes the member path and refuses anything that
        // would land outside the mount.
        let inside = entry
            .unpack_in(mount)
            .with_context(|| format!("Failed to extract {name}"))?;
        if !inside {
            return Err(Error::io(
                format!("Refusing to extract {name}"),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "entry path escapes the mount point",
                ),
            ));
        }

        processed += 1;
        on_progress(Progress::new(processed, total.max(processed)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::OP1_BASE_DIRS;
    use std::fs;
    use tempfile::tempdir;

    fn make_op1(root: &Path) {
        for dir in OP1_BASE_DIRS {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    #[test]
    fn missing_archive_is_not_found() {
        let temp = tempdir().unwrap();
        make_op1(temp.path());
        let running = Arc::new(AtomicBool::new(true));

        let err = restore_archive(
            &temp.path().join("nope.tar.xz"),
            temp.path(),
            running,
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn refuses_unrelated_mount() {
        let temp = tempdir().unwrap();
        let archive = temp.path().join("backup.tar.xz");
        fs::write(&archive, b"whatever").unwrap();
        let target = temp.path().join("not-an-op1");
        fs::create_dir_all(target.join("Documents")).unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let err = restore_archive(&archive, &target, running, |_| {}).unwrap_err();
        assert!(matches!(err, Error::InvalidMount { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
        // Nothing was touched.
        assert_eq!(fs::read_dir(&target).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_archive_is_a_wrapped_failure() {
        let temp = tempdir().unwrap();
        let mount = temp.path().join("op1");
        make_op1(&mount);
        let archive = temp.path().join("backup.tar.xz");
        fs::write(&archive, b"not an xz stream").unwrap();
        let running = Arc::new(AtomicBool::new(true));

        let err = restore_archive(&archive, &mount, running, |_| {}).unwrap_err();
        assert!(matches!(err, Error::Restore { .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Io);
    }

    #[test]
    fn cancelled_restore_is_a_wrapped_failure() {
        let temp = tempdir().unwrap();
        let device = temp.path().join("op1");
        make_op1(&device);
        fs::write(device.join("tape/track_1.aif"), b"tape one").unwrap();
        let archive = crate::archive::create_archive(
            &device,
            &temp.path().join("backups"),
            Arc::new(AtomicBool::new(true)),
            |_| {},
        )
        .unwrap();

        let target = temp.path().join("target");
        make_op1(&target);
        let mut updates = 0;
        let err = restore_archive(&archive, &target, Arc::new(AtomicBool::new(false)), |_| {
            updates += 1
        })
        .unwrap_err();

        assert!(matches!(err, Error::Restore { .. }));
        assert!(err.is_cancelled());
        assert_eq!(updates, 0);
        assert!(!target.join("tape/track_1.aif").exists());
    }
}
