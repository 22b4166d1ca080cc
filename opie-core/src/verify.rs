//! Contains the logic for checking a backup archive before it is restored.
//!
//! Two independent checks:
//! 1.  Structure: the archive is readable and holds the OP-1's four top-level
//!     directories, none of them empty. Entries are listed, never extracted.
//! 2.  Digest: SHA-256 of the raw archive file, streamed in fixed-size chunks.

use crate::device::OP1_BASE_DIRS;
use crate::error::{Error, IoResultExt, Result};
use crate::metadata::{BackupMetadata, MetadataStore};
use chrono::{DateTime, Local};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use xz2::read::XzDecoder;

const BUFFER_SIZE: usize = 1024 * 1024; // 1 MiB

/// Outcome of [`verify_structure`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StructureReport {
    pub valid: bool,
    /// Human-readable problems, in a stable order. Empty iff `valid`.
    pub issues: Vec<String>,
}

/// A SHA-256 digest of an archive file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveDigest(pub [u8; 32]);

impl ArchiveDigest {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ArchiveDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Everything learned about one archive in one verification pass.
#[derive(Clone, Debug)]
pub struct VerificationReport {
    pub structurally_valid: bool,
    pub issues: Vec<String>,
    pub digest: ArchiveDigest,
    pub size_bytes: u64,
    pub verified_at: DateTime<Local>,
}

impl VerificationReport {
    pub fn to_metadata(&self) -> BackupMetadata {
        BackupMetadata {
            last_verified: self.verified_at,
            size_bytes: self.size_bytes,
            sha256: self.digest.to_hex(),
            structure_verified: self.structurally_valid,
        }
    }
}

pub(crate) fn open_archive(path: &Path) -> io::Result<tar::Archive<XzDecoder<BufReader<File>>>> {
    let file = File::open(path)?;
    Ok(tar::Archive::new(XzDecoder::new(BufReader::with_capacity(
        BUFFER_SIZE,
        file,
    ))))
}

/// Top-level directory names seen in the archive, and the required names
/// that at least one entry's path begins with (the directory's own entry
/// counts).
fn scan_top_level(path: &Path) -> io::Result<(HashSet<String>, HashSet<&'static str>)> {
    let mut archive = open_archive(path)?;
    let mut found = HashSet::new();
    let mut populated = HashSet::new();

    for entry in archive.entries()? {
        let entry = entry?;
        let entry_path = entry.path()?;
        let parts: Vec<String> = entry_path
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        let Some(top) = parts.first() else {
            continue;
        };
        let name = parts.join("/");
        populated.extend(OP1_BASE_DIRS.iter().filter(|dir| name.starts_with(**dir)));
        found.insert(top.clone());
    }

    Ok((found, populated))
}

/// Checks that the archive holds the OP-1's top-level directories.
///
/// Never fails: an unreadable or corrupt archive is reported as a single
/// issue with `valid = false`.
pub fn verify_structure(path: &Path) -> StructureReport {
    let (found, populated) = match scan_top_level(path) {
        Ok(scan) => scan,
        Err(e) => {
            warn!(archive = %path.display(), error = %e, "Failed to read archive");
            return StructureReport {
                valid: false,
                issues: vec![format!("Error reading backup archive: {e}")],
            };
        }
    };

    let mut issues = Vec::new();
    for dir in OP1_BASE_DIRS {
        if !found.contains(dir) {
            issues.push(format!("Missing required directory: {dir}"));
        } else if !populated.contains(dir) {
            issues.push(format!("Directory '{dir}' is empty"));
        }
    }

    debug!(archive = %path.display(), issues = issues.len(), "Structure checked");
    StructureReport {
        valid: issues.is_empty(),
        issues,
    }
}

/// Streams the archive file through SHA-256.
///
/// `running` is checked before every chunk; clearing it aborts with
/// [`Error::Cancelled`].
pub fn compute_digest(path: &Path, running: &AtomicBool) -> Result<ArchiveDigest> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        if !running.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let n = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ArchiveDigest(hasher.finalize().into()))
}

/// Runs both checks and collects the result.
///
/// Fails only when the archive file itself cannot be found or read, or when
/// `running` is cleared while hashing; structural problems are reported in
/// the returned value.
pub fn verify_archive(path: &Path, running: Arc<AtomicBool>) -> Result<VerificationReport> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::NotFound {
            what: "Backup file",
            path: path.to_path_buf(),
        },
        _ => Error::io(format!("Failed to stat {}", path.display()), e),
    })?;

    if !running.load(Ordering::SeqCst) {
        return Err(Error::Cancelled);
    }
    let structure = verify_structure(path);
    let digest = compute_digest(path, &running)?;

    info!(
        archive = %path.display(),
        valid = structure.valid,
        sha256 = %digest,
        "Archive verified"
    );

    Ok(VerificationReport {
        structurally_valid: structure.valid,
        issues: structure.issues,
        digest,
        size_bytes: metadata.len(),
        verified_at: Local::now(),
    })
}

/// Saves a report into the metadata store, keyed by the archive's file name.
///
/// A failed write is logged and otherwise ignored.
pub fn record_verification(store: &mut MetadataStore, archive: &Path, report: &VerificationReport) {
    let Some(name) = archive.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return;
    };
    if let Err(e) = store.update(&name, report.to_metadata()) {
        warn!(error = %e, "Could not save backup metadata");
    }
}
