//! Tests for vacuum (compaction)
//!
//! These tests verify:
//! - Content is byte-identical after compaction
//! - The container never grows and live data becomes contiguous
//! - Orphaned overwrite blocks are reclaimed
//! - Empty disks and zero-length blobs survive compaction and reopen
//! - A failed copy leaves every disk file untouched
//! - Mount finishes a committed swap and discards an uncommitted one

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use blockvault::format::{
    blocks_for, sibling, BITMAP_FILENAME, CONTAINER_FILENAME, DISK_FILENAMES, INDEX_FILENAME,
    STAGING_SUFFIX, VACUUM_COMMIT_FILENAME,
};
use blockvault::index::{FileIndex, LogIndex};
use blockvault::{Config, Extent, FileRecord, SyncStrategy, VaultError, VirtualDisk};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const BLOCK: usize = 4096;

fn test_config() -> Config {
    Config::builder()
        .block_size(BLOCK as u32)
        .initial_size(64 * BLOCK as u64)
        .growth_buffer_blocks(4)
        .sync_strategy(SyncStrategy::OsBuffered)
        .build()
}

fn pattern(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

fn load_all(disk: &VirtualDisk, uri: &str) -> Vec<u8> {
    let mut stream = disk.load(uri).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    out
}

/// Save 20 blobs, delete the even ones, overwrite one survivor
fn fragment(disk: &VirtualDisk) -> BTreeMap<String, Vec<u8>> {
    let mut expected = BTreeMap::new();
    for i in 0..20u32 {
        let uri = format!("blob-{:02}", i);
        let data = pattern((i as usize + 1) * 3_000, i);
        disk.save(&uri, &data).unwrap();
        expected.insert(uri, data);
    }
    for i in (0..20).step_by(2) {
        let uri = format!("blob-{:02}", i);
        disk.delete(&uri).unwrap();
        expected.remove(&uri);
    }
    let rewritten = pattern(10_000, 99);
    disk.save("blob-01", &rewritten).unwrap();
    expected.insert("blob-01".to_string(), rewritten);
    expected
}

fn assert_contents(disk: &VirtualDisk, expected: &BTreeMap<String, Vec<u8>>) {
    for (uri, data) in expected {
        assert_eq!(&load_all(disk, uri), data, "content of {}", uri);
    }
    assert_eq!(disk.records().len(), expected.len());
}

fn staged(dir: &Path, name: &str) -> PathBuf {
    sibling(&dir.join(name), STAGING_SUFFIX)
}

/// Copy every regular file of `from` into `to`, renaming via `rename`
fn copy_files(from: &Path, to: &Path, rename: impl Fn(&str) -> String) {
    fs::create_dir_all(to).unwrap();
    for entry in fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let name = entry.file_name().into_string().unwrap();
        fs::copy(entry.path(), to.join(rename(&name))).unwrap();
    }
}

/// Contents of the four disk files
fn disk_files(dir: &Path) -> Vec<Vec<u8>> {
    DISK_FILENAMES
        .iter()
        .map(|name| fs::read(dir.join(name)).unwrap())
        .collect()
}

fn assert_no_vacuum_leftovers(dir: &Path) {
    for name in DISK_FILENAMES {
        assert!(!staged(dir, name).exists(), "staged {} left behind", name);
    }
    assert!(!dir.join(VACUUM_COMMIT_FILENAME).exists());
}

/// Pre-vacuum copy, post-vacuum copy and the pre-vacuum records
struct Generations {
    _temp: TempDir,
    before: PathBuf,
    after: PathBuf,
    records_before: Vec<(String, FileRecord)>,
    expected: BTreeMap<String, Vec<u8>>,
}

fn two_generations() -> Generations {
    let temp = TempDir::new().unwrap();
    let live = temp.path().join("live");
    let before = temp.path().join("before");

    let disk = VirtualDisk::open(&live, &test_config()).unwrap();
    let expected = fragment(&disk);
    let records_before = disk.records();
    disk.close().unwrap();
    copy_files(&live, &before, |n| n.to_string());

    let disk = VirtualDisk::open(&live, &test_config()).unwrap();
    disk.vacuum().unwrap();
    disk.close().unwrap();

    Generations {
        _temp: temp,
        before,
        after: live,
        records_before,
        expected,
    }
}

/// Old generation plus the new one staged next to it
fn crash_dir(gens: &Generations, name: &str) -> PathBuf {
    let dir = gens.before.with_file_name(name);
    copy_files(&gens.before, &dir, |n| n.to_string());
    copy_files(&gens.after, &dir, |n| format!("{}.{}", n, STAGING_SUFFIX));
    dir
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_vacuum_preserves_content() {
    let temp = TempDir::new().unwrap();
    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
    let expected = fragment(&disk);
    let size_before = disk.stats().unwrap().container_bytes;

    let report = disk.vacuum().unwrap();

    assert_eq!(report.files_moved, expected.len());
    assert_contents(&disk, &expected);
    let stats = disk.stats().unwrap();
    assert!(stats.container_bytes <= size_before);
    assert_eq!(report.blocks_after, stats.total_blocks);
    assert!(report.blocks_after <= report.blocks_before);
}

#[test]
fn test_vacuum_lays_out_contiguously_in_uri_order() {
    let temp = TempDir::new().unwrap();
    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
    fragment(&disk);

    disk.vacuum().unwrap();

    let mut next = 0u64;
    for (_uri, record) in disk.records() {
        let blocks = blocks_for(record.file_size, BLOCK as u32);
        assert_eq!(record.extents, vec![Extent::new(next, blocks as u32)]);
        next += blocks;
    }

    let stats = disk.stats().unwrap();
    assert_eq!(stats.total_blocks, next);
    assert_eq!(stats.used_blocks, next);
    assert_eq!(stats.referenced_blocks, next);
}

#[test]
fn test_vacuum_reclaims_overwritten_blocks() {
    let temp = TempDir::new().unwrap();
    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();

    disk.save("a", &pattern(4 * BLOCK, 1)).unwrap();
    disk.save("a", &pattern(4 * BLOCK, 2)).unwrap();
    assert_eq!(disk.stats().unwrap().used_blocks, 8);

    disk.vacuum().unwrap();

    let stats = disk.stats().unwrap();
    assert_eq!(stats.used_blocks, 4);
    assert_eq!(stats.total_blocks, 4);
    assert_eq!(load_all(&disk, "a"), pattern(4 * BLOCK, 2));
}

#[test]
fn test_vacuum_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let expected = {
        let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
        let expected = fragment(&disk);
        disk.vacuum().unwrap();
        disk.close().unwrap();
        expected
    };

    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
    assert_contents(&disk, &expected);

    // Saves after compaction grow from the compacted end
    let total = disk.total_blocks();
    disk.save("after", &pattern(BLOCK, 5)).unwrap();
    assert_eq!(disk.record("after").unwrap().extents, vec![Extent::new(total, 1)]);
    assert_contents(&disk, &{
        let mut all = expected.clone();
        all.insert("after".to_string(), pattern(BLOCK, 5));
        all
    });
}

#[test]
fn test_vacuum_preserves_created_at() {
    let temp = TempDir::new().unwrap();
    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();

    disk.save("a", b"first").unwrap();
    let created = disk.record("a").unwrap().created_at;

    disk.vacuum().unwrap();

    assert_eq!(disk.record("a").unwrap().created_at, created);
}

#[test]
fn test_vacuum_leaves_no_staging_files() {
    let temp = TempDir::new().unwrap();
    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
    disk.save("a", b"data").unwrap();

    disk.vacuum().unwrap();

    assert!(!temp.path().join(format!("{}.vacuum", CONTAINER_FILENAME)).exists());
    assert!(!temp.path().join(format!("{}.vacuum", BITMAP_FILENAME)).exists());
}

// =============================================================================
// Edge Case Tests
// =============================================================================

#[test]
fn test_vacuum_empty_disk() {
    let temp = TempDir::new().unwrap();

    {
        let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
        let report = disk.vacuum().unwrap();
        assert_eq!(report.files_moved, 0);
        assert_eq!(report.blocks_before, 64);
        assert_eq!(report.blocks_after, 0);
        assert_eq!(fs::metadata(temp.path().join(CONTAINER_FILENAME)).unwrap().len(), 0);
        disk.close().unwrap();
    }

    // A zero-length container with a header is mounted, not reformatted
    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
    assert_eq!(disk.total_blocks(), 0);

    disk.save("late", &pattern(5_000, 1)).unwrap();
    assert_eq!(disk.total_blocks(), 2 + 4);
    assert_eq!(load_all(&disk, "late"), pattern(5_000, 1));
}

#[test]
fn test_vacuum_keeps_zero_length_blobs() {
    let temp = TempDir::new().unwrap();

    {
        let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
        disk.save("empty", b"").unwrap();
        disk.vacuum().unwrap();
        assert!(disk.exists("empty"));
        disk.close().unwrap();
    }

    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
    assert!(disk.exists("empty"));
    assert!(disk.record("empty").unwrap().extents.is_empty());
    assert!(load_all(&disk, "empty").is_empty());
}

// =============================================================================
// Failure and Crash Recovery Tests
// =============================================================================

#[test]
fn test_failed_vacuum_leaves_disk_untouched() {
    let temp = TempDir::new().unwrap();
    let mut expected = BTreeMap::new();
    {
        let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
        for i in 0..5u32 {
            let uri = format!("blob-{}", i);
            let data = pattern(5_000 + i as usize * 700, i);
            disk.save(&uri, &data).unwrap();
            expected.insert(uri, data);
        }
        disk.delete("blob-2").unwrap();
        expected.remove("blob-2");
        disk.close().unwrap();
    }

    // A record whose extent lies beyond the container; copied last
    {
        let (index, _) = LogIndex::open(&temp.path().join(INDEX_FILENAME), true, 4).unwrap();
        index
            .set(
                "zzz-dangling",
                FileRecord {
                    file_size: 100,
                    extents: vec![Extent::new(10_000, 1)],
                    created_at: 0,
                },
            )
            .unwrap();
    }

    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
    let records_before = disk.records();
    let bitmap_before = disk.bitmap_snapshot();
    let files_before = disk_files(temp.path());

    let result = disk.vacuum();

    assert!(matches!(result, Err(VaultError::Io(_))), "{:?}", result);
    assert_eq!(disk_files(temp.path()), files_before);
    assert_eq!(disk.records(), records_before);
    assert_eq!(disk.bitmap_snapshot(), bitmap_before);
    assert_no_vacuum_leftovers(temp.path());
    for (uri, data) in &expected {
        assert_eq!(&load_all(&disk, uri), data, "content of {}", uri);
    }

    // The disk stays fully usable
    disk.save("after-failure", &pattern(3_000, 9)).unwrap();
    assert_eq!(load_all(&disk, "after-failure"), pattern(3_000, 9));
}

#[test]
fn test_mount_rolls_forward_committed_vacuum() {
    let gens = two_generations();
    let dir = crash_dir(&gens, "crashed-after-first-rename");
    fs::write(dir.join(VACUUM_COMMIT_FILENAME), b"").unwrap();
    // Crash after the container swap, before the others
    fs::rename(staged(&dir, CONTAINER_FILENAME), dir.join(CONTAINER_FILENAME)).unwrap();

    let disk = VirtualDisk::open(&dir, &test_config()).unwrap();

    assert_no_vacuum_leftovers(&dir);
    assert_contents(&disk, &gens.expected);
    assert_eq!(disk_files(&dir), disk_files(&gens.after));
    let mut next = 0u64;
    for (_uri, record) in disk.records() {
        assert_eq!(record.extents.first().map(|e| e.start_block).unwrap_or(next), next);
        next += record.block_count();
    }
}

#[test]
fn test_mount_rolls_forward_before_any_rename() {
    let gens = two_generations();
    let dir = crash_dir(&gens, "crashed-after-commit");
    fs::write(dir.join(VACUUM_COMMIT_FILENAME), b"").unwrap();

    let disk = VirtualDisk::open(&dir, &test_config()).unwrap();

    assert_no_vacuum_leftovers(&dir);
    assert_contents(&disk, &gens.expected);
    assert_eq!(disk_files(&dir), disk_files(&gens.after));
}

#[test]
fn test_mount_discards_uncommitted_vacuum() {
    let gens = two_generations();
    let dir = crash_dir(&gens, "crashed-while-staging");

    let disk = VirtualDisk::open(&dir, &test_config()).unwrap();

    assert_no_vacuum_leftovers(&dir);
    assert_eq!(disk.records(), gens.records_before);
    assert_contents(&disk, &gens.expected);
    assert_eq!(disk_files(&dir), disk_files(&gens.before));
}
