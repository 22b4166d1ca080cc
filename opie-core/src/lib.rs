//! The core, UI-agnostic library for `opie`, a backup tool for the OP-1.
//!
//! `opie-core` is designed to be used as a library by any front-end. It finds
//! an OP-1 that is connected in disk mode, writes its contents to a
//! compressed archive, checks archives before they are trusted, and writes
//! them back onto the device.
//!
//! The library is structured into several key modules:
//! - [`platform`]: Lists mounted volumes and probes the USB bus, per OS.
//! - [`device`]: The [`Volume`] record and the OP-1 directory fingerprint.
//! - [`locator`]: [`DeviceLocator`], which polls until the OP-1 is mounted.
//! - [`archive`]: Writes a device tree into a `tar.xz` backup.
//! - [`verify`]: Checks an archive's structure and computes its SHA-256.
//! - [`restore`]: Extracts a backup onto the device.
//! - [`backups`] and [`metadata`]: The backups directory and its records.
//!
//! Everything is synchronous. Long operations take a shared
//! `Arc<AtomicBool>` that an interrupt handler clears to cancel them, and
//! report progress through callbacks so the caller decides how to show it.
//!
//! ## Example: Backing up with progress reporting
//!
//! ```rust,no_run
//! use opie_core::{Config, DeviceLocator, LocatorEvent, create_archive};
//! use std::sync::{Arc, atomic::AtomicBool};
//!
//! fn main() -> opie_core::Result<()> {
//!     let config = Config::resolve()?;
//!     config.ensure_dirs()?;
//!
//!     // A shared flag to allow for graceful cancellation.
//!     let running = Arc::new(AtomicBool::new(true));
//!
//!     let locator = DeviceLocator::new(&config, running.clone());
//!     let mount = locator.ensure_device_mount(|event| {
//!         if event == LocatorEvent::WaitingForConnection {
//!             println!("Waiting for OP-1 to connect in disk mode...");
//!         }
//!     })?;
//!
//!     let archive = create_archive(&mount, &config.backups_dir, running, |p| {
//!         println!("{}/{} entries", p.processed, p.total);
//!     })?;
//!
//!     println!("Backup saved at {}", archive.display());
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod backups;
pub mod config;
pub mod device;
pub mod error;
pub mod locator;
pub mod metadata;
pub mod platform;
pub mod progress;
pub mod restore;
pub mod verify;

pub use archive::{archive_file_name, count_entries, create_archive};
pub use backups::{BackupFile, check_backup_file, list_backups};
pub use config::Config;
pub use device::{OP1_BASE_DIRS, Volume, is_valid_mount, matches_fingerprint};
pub use error::{Error, ErrorKind, Result};
pub use locator::{DeviceLocator, LocatorEvent, PresenceProbe, VolumeSource};
pub use metadata::{BackupMetadata, MetadataStore};
pub use progress::Progress;
pub use restore::{count_archive_entries, restore_archive};
pub use verify::{
    ArchiveDigest, StructureReport, VerificationReport, compute_digest, record_verification,
    verify_archive, verify_structure,
};
