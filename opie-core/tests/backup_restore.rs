use opie_core::{
    MetadataStore, OP1_BASE_DIRS, Progress, create_archive, record_verification, restore_archive,
    verify_archive, verify_structure,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::{TempDir, tempdir};
use walkdir::WalkDir;

fn running() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(true))
}

/// An OP-1 as it shows up in disk mode, plus a hidden trash folder.
fn make_device(root: &Path) {
    fs::create_dir_all(root.join("tape")).unwrap();
    fs::write(root.join("tape/track_1.aif"), b"tape one").unwrap();
    fs::create_dir_all(root.join("album")).unwrap();
    fs::write(root.join("album/side_a.aif"), b"side a audio").unwrap();
    fs::write(root.join("album/side_b.aif"), b"side b audio").unwrap();
    fs::create_dir_all(root.join("synth/user")).unwrap();
    fs::write(root.join("synth/user/pad.aif"), b"pad patch").unwrap();
    fs::create_dir_all(root.join("drum/user")).unwrap();
    fs::write(root.join("drum/user/kit.aif"), b"kit patch").unwrap();
    fs::create_dir_all(root.join(".trash")).unwrap();
    fs::write(root.join(".trash/deleted.aif"), b"gone").unwrap();
}

/// Relative path -> file contents (`None` for directories), hidden entries
/// excluded.
fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.unwrap())
        .map(|e| {
            let rel = e
                .path()
                .strip_prefix(root)
                .unwrap()
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let content = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
            (rel, content)
        })
        .collect()
}

fn archive_members(archive: &Path) -> Vec<String> {
    let file = fs::File::open(archive).unwrap();
    let mut tar = tar::Archive::new(xz2::read::XzDecoder::new(file));
    tar.entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn backup(device: &Path) -> (TempDir, PathBuf) {
    let out = tempdir().unwrap();
    let archive = create_archive(device, out.path(), running(), |_| {}).unwrap();
    (out, archive)
}

#[test]
fn backup_excludes_hidden_entries_and_verifies() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("OP-1");
    make_device(&device);

    let (_out, archive) = backup(&device);
    let members = archive_members(&archive);

    assert!(members.iter().all(|m| !m.contains(".trash")));
    assert!(members.contains(&"album/side_a.aif".to_string()));
    assert!(members.contains(&"album/side_b.aif".to_string()));

    let mut tops: Vec<&str> = members.iter().map(|m| m.split('/').next().unwrap()).collect();
    tops.sort();
    tops.dedup();
    assert_eq!(tops, vec!["album", "drum", "synth", "tape"]);

    let report = verify_structure(&archive);
    assert!(report.valid, "issues: {:?}", report.issues);
    assert!(report.issues.is_empty());
}

#[test]
fn round_trip_reproduces_visible_tree() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("OP-1");
    make_device(&device);
    let (_out, archive) = backup(&device);

    // A second device with the bare layout and a stale file to overwrite.
    let target = temp.path().join("OP-1 restored");
    for dir in OP1_BASE_DIRS {
        fs::create_dir_all(target.join(dir)).unwrap();
    }
    fs::write(target.join("album/side_a.aif"), b"stale").unwrap();

    restore_archive(&archive, &target, running(), |_| {}).unwrap();

    assert_eq!(snapshot(&target), snapshot(&device));
    assert!(!target.join(".trash").exists());
}

#[test]
fn restore_progress_is_monotonic_and_ends_at_100_once() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("OP-1");
    make_device(&device);
    for i in 0..150 {
        fs::write(device.join(format!("tape/take_{i:03}.aif")), b"x").unwrap();
    }
    let (_out, archive) = backup(&device);

    let target = temp.path().join("target");
    for dir in OP1_BASE_DIRS {
        fs::create_dir_all(target.join(dir)).unwrap();
    }

    let mut updates: Vec<Progress> = Vec::new();
    restore_archive(&archive, &target, running(), |p| updates.push(p)).unwrap();

    let percents: Vec<u8> = updates.iter().map(Progress::percent).collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.iter().filter(|p| **p == 100).count(), 1);
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(updates.len() as u64, updates.last().unwrap().total);
}

#[test]
fn missing_directory_is_named_in_issues() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("almost");
    make_device(&device);
    fs::remove_dir_all(device.join("synth")).unwrap();

    let (_out, archive) = backup(&device);
    let report = verify_structure(&archive);

    assert!(!report.valid);
    assert_eq!(report.issues.len(), 1);
    assert!(report.issues[0].contains("synth"));
}

#[test]
fn bare_directories_with_a_filled_album_are_valid() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("OP-1");
    for dir in ["tape", "album", "synth", "drum", ".trash"] {
        fs::create_dir_all(device.join(dir)).unwrap();
    }
    fs::write(device.join("album/side_a.aif"), b"side a audio").unwrap();
    fs::write(device.join("album/side_b.aif"), b"side b audio").unwrap();

    let (_out, archive) = backup(&device);
    let members = archive_members(&archive);
    assert!(members.iter().all(|m| !m.contains(".trash")));
    let mut tops: Vec<&str> = members.iter().map(|m| m.split('/').next().unwrap()).collect();
    tops.sort();
    tops.dedup();
    assert_eq!(tops, vec!["album", "drum", "synth", "tape"]);

    let report = verify_structure(&archive);
    assert!(report.valid, "issues: {:?}", report.issues);
    assert!(report.issues.is_empty());
}

#[test]
fn verification_is_recorded_by_archive_name() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("OP-1");
    make_device(&device);
    let (out, archive) = backup(&device);

    let report = verify_archive(&archive, running()).unwrap();
    assert!(report.structurally_valid);
    assert_eq!(report.size_bytes, fs::metadata(&archive).unwrap().len());

    let mut store = MetadataStore::open(out.path());
    record_verification(&mut store, &archive, &report);

    let name = archive.file_name().unwrap().to_string_lossy().into_owned();
    let reopened = MetadataStore::open(out.path());
    let record = reopened.get(&name).unwrap();
    assert_eq!(record.sha256, report.digest.to_hex());
    assert_eq!(record.sha256.len(), 64);
    assert!(record.structure_verified);
}

#[test]
fn digest_covers_raw_archive_bytes() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("OP-1");
    make_device(&device);
    let (_out, archive) = backup(&device);

    let first = opie_core::compute_digest(&archive, &running()).unwrap();
    let copy = temp.path().join("copy.tar.xz");
    fs::copy(&archive, &copy).unwrap();
    assert_eq!(opie_core::compute_digest(&copy, &running()).unwrap(), first);

    let mut bytes = fs::read(&copy).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&copy, bytes).unwrap();
    assert_ne!(opie_core::compute_digest(&copy, &running()).unwrap(), first);
}
