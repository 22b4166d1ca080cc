use crate::device::{self, Volume};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use windows_sys::Win32::Storage::FileSystem::{GetDriveTypeW, GetLogicalDrives};

const DRIVE_NO_ROOT_DIR: u32 = 1;
const DRIVE_REMOVABLE: u32 = 2;

fn wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn drive_type(root: &str) -> u32 {
    let root = wide(root);
    // SAFETY: `root` is a NUL-terminated UTF-16 buffer that outlives the call.
    unsafe { GetDriveTypeW(root.as_ptr()) }
}

/// Drive roots (`A:\` .. `Z:\`) that currently hold a volume.
fn live_drives() -> Vec<(char, u32)> {
    // SAFETY: no arguments, returns a bitmask of logical drives.
    let mask = unsafe { GetLogicalDrives() };
    if mask == 0 {
        warn!(
            error = %std::io::Error::last_os_error(),
            "GetLogicalDrives failed"
        );
        return Vec::new();
    }

    ('A'..='Z')
        .enumerate()
        .filter(|(bit, _)| mask & (1 << bit) != 0)
        .map(|(_, letter)| (letter, drive_type(&format!("{letter}:\\"))))
        .filter(|(_, kind)| *kind != DRIVE_NO_ROOT_DIR)
        .collect()
}

/// Whether a drive root is the Windows system drive.
pub fn is_system_mount(path: &Path) -> bool {
    let system_drive = std::env::var("SystemDrive").unwrap_or_else(|_| "C:".to_string());
    path.to_string_lossy()
        .to_uppercase()
        .starts_with(&system_drive.to_uppercase())
}

/// Lists every live drive letter except the system drive.
pub fn list_volumes() -> Vec<Volume> {
    live_drives()
        .into_iter()
        .map(|(letter, _)| Volume::new(format!("{letter}:"), format!("{letter}:\\")))
        .filter(|v| {
            let skip = is_system_mount(&v.mount_path);
            if skip {
                debug!(volume = %v, "Skipping system drive");
            }
            !skip
        })
        .collect()
}

fn removable_drives() -> Vec<PathBuf> {
    live_drives()
        .into_iter()
        .filter(|(_, kind)| *kind == DRIVE_REMOVABLE)
        .map(|(letter, _)| PathBuf::from(format!("{letter}:\\")))
        .collect()
}

/// Windows exposes no cheap USB id lookup without extra drivers, so a
/// removable drive carrying the OP-1 layout stands in for the USB signal.
pub fn usb_device_present(_vendor: u16, _product: u16) -> Option<bool> {
    Some(
        removable_drives()
            .iter()
            .any(|drive| device::matches_fingerprint(drive)),
    )
}
