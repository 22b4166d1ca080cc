use crate::device::Volume;
use regex::Regex;
use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Mount points that can never be a removable device.
const SYSTEM_MOUNTS: [&str; 2] = ["/", "/home"];

/// Pseudo-filesystem and system partition prefixes: device nodes, kernel
/// interfaces, network mounts, process info and the boot partition.
const SYSTEM_PREFIXES: [&str; 5] = ["/dev", "/sys", "/net", "/proc", "/boot"];

/// `<device> on <mount path>[ type <fs>] (<options>)`.
///
/// Linux prints ` type vfat (rw,...)`, macOS prints ` (msdos, local, ...)`.
/// The mount path may contain spaces.
static MOUNT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<device>/dev/\S+) on (?P<mount>.+?)(?: type \S+)? \(.*\)\s*$")
        .expect("mount line pattern is valid")
});

/// Parses one line of `mount` output into a volume.
///
/// Lines that do not describe a `/dev` device are ignored.
pub fn parse_mount_line(line: &str) -> Option<Volume> {
    let caps = MOUNT_LINE.captures(line)?;
    Some(Volume::new(&caps["device"], &caps["mount"]))
}

/// Whether a mount path belongs to the system rather than to removable media.
pub fn is_system_mount(path: &Path) -> bool {
    if SYSTEM_MOUNTS.iter().any(|m| path == Path::new(m)) {
        return true;
    }
    SYSTEM_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

/// Lists mounted volumes by running `mount` and parsing its output.
pub fn list_volumes() -> Vec<Volume> {
    let output = match Command::new("mount").output() {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "Failed to run mount");
            return Vec::new();
        }
    };

    if !output.status.success() {
        warn!(status = %output.status, "mount command appeared to fail");
        return Vec::new();
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if stdout.trim().is_empty() {
        warn!("mount command returned no output");
        return Vec::new();
    }

    volumes_from_mount_output(&stdout)
}

fn volumes_from_mount_output(output: &str) -> Vec<Volume> {
    output
        .lines()
        .filter_map(parse_mount_line)
        .filter(|v| {
            let skip = is_system_mount(&v.mount_path);
            if skip {
                debug!(volume = %v, "Skipping system mount");
            }
            !skip
        })
        .collect()
}

/// Reads `/sys/bus/usb/devices/*/idVendor` and `idProduct`.
#[cfg(target_os = "linux")]
pub fn usb_device_present(vendor: u16, product: u16) -> Option<bool> {
    use std::fs;
    use std::path::PathBuf;

    fn read_id(dir: &Path, file: &str) -> Option<u16> {
        let raw = fs::read_to_string(dir.join(file)).ok()?;
        u16::from_str_radix(raw.trim(), 16).ok()
    }

    let devices = fs::read_dir(PathBuf::from("/sys/bus/usb/devices")).ok()?;
    let found = devices.filter_map(Result::ok).any(|entry| {
        let dir = entry.path();
        read_id(&dir, "idVendor") == Some(vendor) && read_id(&dir, "idProduct") == Some(product)
    });
    Some(found)
}

/// Asks the IOKit registry through `ioreg`.
#[cfg(target_os = "macos")]
pub fn usb_device_present(vendor: u16, product: u16) -> Option<bool> {
    let output = Command::new("ioreg")
        .args(["-p", "IOUSB", "-l", "-w", "0"])
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(status = %output.status, "ioreg failed");
        return None;
    }
    Some(ioreg_lists_device(
        &String::from_utf8_lossy(&output.stdout),
        vendor,
        product,
    ))
}

/// Scans `ioreg -l` output, one `+-o` node at a time, for a node carrying
/// both ids.
#[cfg(target_os = "macos")]
fn ioreg_lists_device(output: &str, vendor: u16, product: u16) -> bool {
    fn property(line: &str, key: &str) -> Option<u16> {
        let (_, value) = line.split_once(&format!("\"{key}\" = "))?;
        value.trim().parse().ok()
    }

    let (mut seen_vendor, mut seen_product) = (None, None);
    for line in output.lines() {
        if line.contains("+-o ") {
            seen_vendor = None;
            seen_product = None;
        }
        if let Some(v) = property(line, "idVendor") {
            seen_vendor = Some(v);
        }
        if let Some(p) = property(line, "idProduct") {
            seen_product = Some(p);
        }
        if seen_vendor == Some(vendor) && seen_product == Some(product) {
            return true;
        }
    }
    false
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn usb_device_present(_vendor: u16, _product: u16) -> Option<bool> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_macos_line() {
        let v = parse_mount_line("/dev/disk2s1 on /Volumes/OP-1 (msdos, local, nodev, nosuid)")
            .unwrap();
        assert_eq!(v.identifier, "/dev/disk2s1");
        assert_eq!(v.mount_path, PathBuf::from("/Volumes/OP-1"));
    }

    #[test]
    fn parses_linux_line_with_type() {
        let v = parse_mount_line(
            "/dev/sdb1 on /media/user/OP-1 type vfat (rw,nosuid,nodev,relatime,uid=1000)",
        )
        .unwrap();
        assert_eq!(v.identifier, "/dev/sdb1");
        assert_eq!(v.mount_path, PathBuf::from("/media/user/OP-1"));
    }

    #[test]
    fn mount_path_may_contain_spaces() {
        let v = parse_mount_line("/dev/disk3s1 on /Volumes/OP 1 backup (msdos, local)").unwrap();
        assert_eq!(v.mount_path, PathBuf::from("/Volumes/OP 1 backup"));

        let v = parse_mount_line("/dev/sdc1 on /media/me/My Disk type exfat (rw)").unwrap();
        assert_eq!(v.mount_path, PathBuf::from("/media/me/My Disk"));
    }

    #[test]
    fn non_device_lines_are_dropped() {
        assert!(parse_mount_line("proc on /proc type proc (rw,nosuid)").is_none());
        assert!(parse_mount_line("map auto_home on /System/Volumes/Data/home (autofs)").is_none());
        assert!(parse_mount_line("").is_none());
        assert!(parse_mount_line("garbage").is_none());
    }

    #[test]
    fn system_mounts_are_filtered() {
        assert!(is_system_mount(Path::new("/")));
        assert!(is_system_mount(Path::new("/home")));
        assert!(is_system_mount(Path::new("/boot/efi")));
        assert!(is_system_mount(Path::new("/dev/shm")));
        assert!(is_system_mount(Path::new("/proc")));
        assert!(!is_system_mount(Path::new("/Volumes/OP-1")));
        assert!(!is_system_mount(Path::new("/media/user/OP-1")));
        assert!(!is_system_mount(Path::new("/run/media/user/OP-1")));
        assert!(!is_system_mount(Path::new("/devices")));
    }

    #[test]
    fn mount_output_keeps_order_and_drops_system() {
        let output = "\
/dev/nvme0n1p2 on / type ext4 (rw,relatime)
/dev/nvme0n1p1 on /boot/efi type vfat (rw)
tmpfs on /run type tmpfs (rw)
/dev/sdb1 on /media/user/OP-1 type vfat (rw)
/dev/sdc1 on /media/user/CARD type exfat (rw)
";
        let volumes = volumes_from_mount_output(output);
        assert_eq!(
            volumes,
            vec![
                Volume::new("/dev/sdb1", "/media/user/OP-1"),
                Volume::new("/dev/sdc1", "/media/user/CARD"),
            ]
        );
    }

    #[cfg(target_os = "macos")]
    #[test]
    fn ioreg_output_matches_per_node() {
        let output = r#"
+-o Root  <class IORegistryEntry, id 0x100000100>
  +-o OP-1@14100000  <class IOUSBHostDevice>
      {
        "idProduct" = 2
        "idVendor" = 9063
      }
"#;
        assert!(ioreg_lists_device(output, 0x2367, 0x0002));
        assert!(!ioreg_lists_device(output, 0x2367, 0x0003));
    }
}
