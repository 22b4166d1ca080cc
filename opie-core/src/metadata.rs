//! Verification records kept next to the backups.
//!
//! A single JSON file in the backups directory maps each archive's file name
//! to the outcome of its last verification. The file is read-modify-write with
//! no locking; only one opie process is expected to touch it at a time.

use crate::error::{IoResultExt, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the metadata file inside the backups directory.
pub const METADATA_FILE_NAME: &str = "backup_metadata.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub last_verified: DateTime<Local>,
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the archive file.
    pub sha256: String,
    pub structure_verified: bool,
}

pub struct MetadataStore {
    path: PathBuf,
    records: BTreeMap<String, BackupMetadata>,
}

impl MetadataStore {
    /// Loads the store for `backups_dir`.
    ///
    /// A missing file is an empty store. So is a corrupt one; its contents
    /// are replaced on the next [`Self::update`].
    pub fn open(backups_dir: &Path) -> Self {
        let path = backups_dir.join(METADATA_FILE_NAME);
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable backup metadata");
                BTreeMap::new()
            }),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No backup metadata yet");
                BTreeMap::new()
            }
        };
        Self { path, records }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, backup_name: &str) -> Option<&BackupMetadata> {
        self.records.get(backup_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BackupMetadata)> {
        self.records.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Replaces the record for `backup_name` and writes the whole store.
    pub fn update(&mut self, backup_name: &str, metadata: BackupMetadata) -> Result<()> {
        self.records.insert(backup_name.to_string(), metadata);
        self.save()
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.records)
            .map_err(std::io::Error::other)
            .context("Failed to serialize backup metadata")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
