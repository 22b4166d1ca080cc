//! Process-wide settings, resolved once at startup.

use crate::error::{Error, IoResultExt, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the opie home directory.
pub const HOME_ENV: &str = "OPIE_HOME";

/// Number of one-second polls made while waiting for the device to mount.
pub const DEFAULT_MOUNT_WAIT_ATTEMPTS: u32 = 15;

/// Paths and timings shared by every operation.
///
/// Build it once with [`Config::resolve`] and hand it to the components that
/// need it; nothing in the library reads the environment on its own.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root of opie's own files (e.g. `~/opie`).
    pub home: PathBuf,
    /// Where backup archives and their metadata live.
    pub backups_dir: PathBuf,
    /// Polls made by [`crate::DeviceLocator::ensure_device_mount`] once the
    /// device is connected but not yet mounted.
    pub mount_wait_attempts: u32,
    /// Delay between two polls.
    pub poll_interval: Duration,
}

impl Config {
    /// Builds a configuration rooted at `home`.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        Self {
            backups_dir: home.join("backups"),
            home,
            mount_wait_attempts: DEFAULT_MOUNT_WAIT_ATTEMPTS,
            poll_interval: Duration::from_secs(1),
        }
    }

    /// Resolves the configuration from the environment.
    ///
    /// `OPIE_HOME` wins when set; otherwise the user's home directory is looked
    /// up (platform API first, then `HOME` / `USERPROFILE`) and `opie` is
    /// appended to it.
    pub fn resolve() -> Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::with_home(home));
        }

        let user_home = dirs::home_dir()
            .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
            .or_else(|| std::env::var_os("USERPROFILE").map(PathBuf::from))
            .ok_or(Error::NoHomeDirectory)?;

        Ok(Self::with_home(user_home.join("opie")))
    }

    /// Replaces the backups directory, e.g. from a command-line flag.
    pub fn with_backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = dir.into();
        self
    }

    /// Creates the home and backups directories if they are missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        create_dir(&self.home)?;
        create_dir(&self.backups_dir)
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))
}
