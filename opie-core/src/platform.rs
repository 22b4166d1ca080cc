//! Provides platform-specific functionality.
//!
//! This module contains the logic for asking the operating system which
//! volumes are mounted and whether an OP-1 is attached over USB.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the correct
//! implementation for the target OS. Each submodule exposes the same public
//! API:
//!
//! - `list_volumes() -> Vec<Volume>`: mounted volumes, system volumes removed.
//!   Never fails; a failed OS query yields an empty list and a warning.
//! - `is_system_mount(&Path) -> bool`: the post-filter used by `list_volumes`.
//! - `usb_device_present(vendor, product) -> Option<bool>`: `None` when the
//!   platform offers no way to tell.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use self::unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::*;
