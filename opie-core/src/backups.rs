//! The backups directory as a list of archives.

use crate::archive::ARCHIVE_EXTENSION;
use crate::device::is_hidden;
use crate::error::{Error, IoResultExt, Result};
use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};

/// A backup archive found on disk.
#[derive(Clone, Debug)]
pub struct BackupFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Local>,
}

impl BackupFile {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

impl fmt::Display for BackupFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}MB, modified {})",
            self.name(),
            self.size_mb(),
            self.modified.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Visible `*.tar.xz` files in `dir`, most recently modified first.
///
/// A missing directory simply has no backups.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupFile>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(Error::io(
                format!("Error accessing backup directory {}", dir.display()),
                e,
            ));
        }
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let name = entry.file_name();
        if is_hidden(&name) || !name.to_string_lossy().ends_with(ARCHIVE_EXTENSION) {
            continue;
        }

        let metadata = entry
            .metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;

        backups.push(BackupFile {
            path: entry.path(),
            size_bytes: metadata.len(),
            modified: modified.into(),
        });
    }

    backups.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(backups)
}

/// Refuses backups that cannot possibly be restored: missing, not a regular
/// file, or empty.
pub fn check_backup_file(path: &Path) -> Result<()> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound {
                what: "Backup file",
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(Error::io(format!("Failed to stat {}", path.display()), e)),
    };

    if !metadata.is_file() {
        return Err(Error::InvalidBackup {
            path: path.to_path_buf(),
            reason: "not a file".to_string(),
        });
    }
    if metadata.len() == 0 {
        return Err(Error::InvalidBackup {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(())
}
