//! Finds the OP-1's mount point, waiting for it when necessary.
//!
//! Every wait is a blocking poll on the calling thread. Each loop re-checks
//! the shared `running` flag between short sleeps, so an interrupt handler
//! that clears the flag ends the wait with [`Error::Cancelled`] almost
//! immediately. That outcome is distinct from the device not being found.

use crate::config::Config;
use crate::device::{self, Volume, PRODUCT_OP1, VENDOR_TE};
use crate::error::{Error, Result};
use crate::platform;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Upper bound on a single sleep slice while polling.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Anything that can enumerate mounted volumes.
pub trait VolumeSource {
    fn list_volumes(&self) -> Vec<Volume>;
}

/// Anything that can tell whether the OP-1 is attached.
///
/// `None` means "cannot tell on this system".
pub trait PresenceProbe {
    fn is_connected(&self) -> Option<bool>;
}

impl<F: Fn() -> Vec<Volume>> VolumeSource for F {
    fn list_volumes(&self) -> Vec<Volume> {
        self()
    }
}

impl<F: Fn() -> Option<bool>> PresenceProbe for F {
    fn is_connected(&self) -> Option<bool> {
        self()
    }
}

/// The operating system's mount table.
pub struct SystemVolumes;

impl VolumeSource for SystemVolumes {
    fn list_volumes(&self) -> Vec<Volume> {
        platform::list_volumes()
    }
}

/// The OP-1's USB vendor/product ids as seen by the platform.
pub struct UsbPresence;

impl PresenceProbe for UsbPresence {
    fn is_connected(&self) -> Option<bool> {
        platform::usb_device_present(VENDOR_TE, PRODUCT_OP1)
    }
}

/// What the locator is doing, for callers that want to tell the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocatorEvent {
    /// Emitted once per poll while waiting for the USB connection.
    WaitingForConnection,
    Connected,
    /// Emitted before each mount poll, `attempt` counting from 1.
    WaitingForMount { attempt: u32, attempts: u32 },
    Found(PathBuf),
    TimedOut,
}

pub struct DeviceLocator {
    volumes: Box<dyn VolumeSource>,
    probe: Box<dyn PresenceProbe>,
    running: Arc<AtomicBool>,
    poll_interval: Duration,
    mount_wait_attempts: u32,
}

impl DeviceLocator {
    /// A locator backed by the real mount table and USB bus.
    pub fn new(config: &Config, running: Arc<AtomicBool>) -> Self {
        Self::with_sources(SystemVolumes, UsbPresence, running)
            .poll_interval(config.poll_interval)
            .mount_wait_attempts(config.mount_wait_attempts)
    }

    pub fn with_sources(
        volumes: impl VolumeSource + 'static,
        probe: impl PresenceProbe + 'static,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            volumes: Box::new(volumes),
            probe: Box::new(probe),
            running,
            poll_interval: Duration::from_secs(1),
            mount_wait_attempts: crate::config::DEFAULT_MOUNT_WAIT_ATTEMPTS,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn mount_wait_attempts(mut self, attempts: u32) -> Self {
        self.mount_wait_attempts = attempts;
        self
    }

    /// First enumerated volume that carries the OP-1 layout.
    ///
    /// Volumes are tested in the order the OS lists them; an unreadable volume
    /// counts as a non-match and does not stop the search.
    pub fn find_device_mount(&self) -> Option<PathBuf> {
        for volume in self.volumes.list_volumes() {
            debug!(volume = %volume, "Checking volume");
            if device::matches_fingerprint(&volume.mount_path) {
                info!(mount = %volume.mount_path.display(), "Found OP-1");
                return Some(volume.mount_path);
            }
        }
        None
    }

    /// Whether the OP-1 is attached. Falls back to looking for its mount when
    /// the platform cannot report USB devices.
    pub fn is_connected(&self) -> bool {
        self.probe
            .is_connected()
            .unwrap_or_else(|| self.find_device_mount().is_some())
    }

    /// Polls [`Self::find_device_mount`] up to `attempts` times.
    ///
    /// Returns `Ok(None)` once the attempts are exhausted and
    /// `Err(Error::Cancelled)` if interrupted.
    pub fn wait_for_device_mount(
        &self,
        attempts: u32,
        mut on_event: impl FnMut(LocatorEvent),
    ) -> Result<Option<PathBuf>> {
        for attempt in 1..=attempts {
            self.check_running()?;
            on_event(LocatorEvent::WaitingForMount { attempt, attempts });

            if let Some(mount) = self.find_device_mount() {
                on_event(LocatorEvent::Found(mount.clone()));
                return Ok(Some(mount));
            }

            if attempt < attempts {
                self.sleep()?;
            }
        }

        info!(attempts, "Timed out waiting for mount");
        on_event(LocatorEvent::TimedOut);
        Ok(None)
    }

    /// Blocks until the OP-1 is attached. There is no timeout; only an
    /// interrupt ends the wait early.
    pub fn wait_for_connection(&self, mut on_event: impl FnMut(LocatorEvent)) -> Result<()> {
        loop {
            self.check_running()?;
            if self.is_connected() {
                on_event(LocatorEvent::Connected);
                return Ok(());
            }
            on_event(LocatorEvent::WaitingForConnection);
            self.sleep()?;
        }
    }

    /// Returns the OP-1's mount path, waiting for the connection and then for
    /// the mount as needed.
    ///
    /// Fails with [`Error::DeviceNotFound`] when the device is attached but
    /// never mounts within the configured attempts.
    pub fn ensure_device_mount(&self, mut on_event: impl FnMut(LocatorEvent)) -> Result<PathBuf> {
        if !self.is_connected() {
            info!("Waiting for OP-1 to connect in disk mode");
            self.wait_for_connection(&mut on_event)?;
        }

        if let Some(mount) = self.find_device_mount() {
            on_event(LocatorEvent::Found(mount.clone()));
            return Ok(device::normalize_path(&mount));
        }

        info!("Waiting for OP-1 disk to mount");
        self.wait_for_device_mount(self.mount_wait_attempts, &mut on_event)?
            .map(|mount| device::normalize_path(&mount))
            .ok_or(Error::DeviceNotFound)
    }

    fn check_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    }

    fn sleep(&self) -> Result<()> {
        let deadline = Instant::now() + self.poll_interval;
        loop {
            self.check_running()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
