//! The OP-1's identity: the volume record and the directory fingerprint.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Top-level directories every OP-1 in disk mode exposes.
pub const OP1_BASE_DIRS: [&str; 4] = ["tape", "album", "synth", "drum"];

/// USB vendor id of teenage engineering.
pub const VENDOR_TE: u16 = 0x2367;
/// USB product id of the OP-1.
pub const PRODUCT_OP1: u16 = 0x0002;

/// A mounted volume as reported by the operating system.
///
/// Volumes are enumerated fresh on every query and never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Volume {
    /// The device node or drive letter (e.g. `/dev/disk2s1` or `E:`).
    pub identifier: String,
    /// Where the volume's filesystem is reachable.
    pub mount_path: PathBuf,
}

impl Volume {
    pub fn new(identifier: impl Into<String>, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            identifier: identifier.into(),
            mount_path: mount_path.into(),
        }
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<15} {}", self.identifier, self.mount_path.display())
    }
}

/// Returns true for names hidden by the leading-dot convention.
pub fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Lexically normalizes a path: drops `.` components and folds `..` into
/// its parent where possible, like the platform `normpath`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Names of the immediate, non-hidden subdirectories of `path`.
pub fn visible_dirs(path: &Path) -> io::Result<HashSet<String>> {
    let mut dirs = HashSet::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name();
        if is_hidden(&name) {
            continue;
        }
        // Follows symlinks, matching what a directory listing shows the user.
        if entry.path().is_dir() {
            dirs.insert(name.to_string_lossy().into_owned());
        }
    }
    Ok(dirs)
}

/// Whether `path` carries the OP-1 directory layout.
///
/// All of [`OP1_BASE_DIRS`] must be present as visible subdirectories; extra
/// entries are allowed. An unreadable or missing path is simply not a match.
pub fn matches_fingerprint(path: &Path) -> bool {
    let path = normalize_path(path);
    match visible_dirs(&path) {
        Ok(found) => OP1_BASE_DIRS.iter().all(|dir| found.contains(*dir)),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
        {
            debug!(path = %path.display(), error = %e, "Path is not readable, skipping");
            false
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unexpected error checking path");
            false
        }
    }
}

/// Whether `path` exists and is an OP-1 mount. Guards restores.
pub fn is_valid_mount(path: &Path) -> bool {
    let path = normalize_path(path);
    path.exists() && matches_fingerprint(&path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn make_tree(root: &Path, dirs: &[&str]) {
        for dir in dirs {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    #[test]
    fn full_layout_matches() {
        let temp = tempdir().unwrap();
        make_tree(temp.path(), &OP1_BASE_DIRS);
        assert!(matches_fingerprint(temp.path()));
        assert!(is_valid_mount(temp.path()));
    }

    #[test]
    fn extra_entries_are_allowed() {
        let temp = tempdir().unwrap();
        make_tree(temp.path(), &OP1_BASE_DIRS);
        make_tree(temp.path(), &["user", ".Trashes"]);
        fs::write(temp.path().join("readme.txt"), b"hi").unwrap();
        assert!(matches_fingerprint(temp.path()));
    }

    #[test]
    fn missing_directory_does_not_match() {
        let temp = tempdir().unwrap();
        make_tree(temp.path(), &["tape", "album", "synth"]);
        assert!(!matches_fingerprint(temp.path()));
    }

    #[test]
    fn file_in_place_of_directory_does_not_match() {
        let temp = tempdir().unwrap();
        make_tree(temp.path(), &["tape", "album", "synth"]);
        fs::write(temp.path().join("drum"), b"not a dir").unwrap();
        assert!(!matches_fingerprint(temp.path()));
    }

    #[test]
    fn missing_path_is_no_match() {
        let temp = tempdir().unwrap();
        let gone = temp.path().join("unplugged");
        assert!(!matches_fingerprint(&gone));
        assert!(!is_valid_mount(&gone));
    }

    #[test]
    fn hidden_names() {
        assert!(is_hidden(OsStr::new(".trash")));
        assert!(is_hidden(OsStr::new(".DS_Store")));
        assert!(!is_hidden(OsStr::new("tape")));
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(
            normalize_path(Path::new("/Volumes/OP-1/./tape/../")),
            PathBuf::from("/Volumes/OP-1")
        );
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn volume_display() {
        let v = Volume::new("/dev/disk2s1", "/Volumes/OP-1");
        assert_eq!(v.to_string(), "/dev/disk2s1    /Volumes/OP-1");
    }
}
