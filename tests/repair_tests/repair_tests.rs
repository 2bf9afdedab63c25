//! Tests for repair and inspection
//!
//! These tests verify:
//! - Leaked blocks are freed, missing references forced used
//! - Out-of-range extents are reported, never dropped
//! - Disk-level repair reclaims orphaned overwrite blocks
//! - Inspection reads header + bitmap without mounting

use std::fs;

use blockvault::bitmap::AllocationBitmap;
use blockvault::format::HEADER_FILENAME;
use blockvault::index::{FileIndex, LogIndex};
use blockvault::repair::{self, RepairReport};
use blockvault::{Config, Extent, FileRecord, SyncStrategy, VaultError, VirtualDisk};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn test_config() -> Config {
    Config::builder()
        .initial_size(32 * 4096)
        .sync_strategy(SyncStrategy::OsBuffered)
        .build()
}

fn index_with(temp: &TempDir, records: &[(&str, Vec<Extent>)]) -> LogIndex {
    let (index, _) = LogIndex::open(&temp.path().join("index.log"), false, 4).unwrap();
    for (uri, extents) in records {
        let blocks: u64 = extents.iter().map(|e| e.block_count as u64).sum();
        index
            .set(
                uri,
                FileRecord {
                    file_size: blocks * 4096,
                    extents: extents.clone(),
                    created_at: 0,
                },
            )
            .unwrap();
    }
    index
}

// =============================================================================
// Reconcile Tests
// =============================================================================

#[test]
fn test_reconcile_frees_leaks_and_marks_missing() {
    let temp = TempDir::new().unwrap();
    let index = index_with(&temp, &[("a", vec![Extent::new(2, 3)])]);

    let mut bitmap = AllocationBitmap::new(16);
    bitmap.set(0); // leak
    bitmap.set(2);
    bitmap.set(3); // block 4 missing

    let report = repair::reconcile(&mut bitmap, &index);

    assert_eq!(report.leaked_freed, 1);
    assert_eq!(report.missing_marked, 1);
    assert!(report.changed());
    assert!(!bitmap.is_set(0));
    assert!((2..5).all(|b| bitmap.is_set(b)));
    assert_eq!(bitmap.used_count(), 3);
}

#[test]
fn test_reconcile_clean_bitmap_is_untouched() {
    let temp = TempDir::new().unwrap();
    let index = index_with(
        &temp,
        &[("a", vec![Extent::new(0, 2)]), ("b", vec![Extent::new(5, 1), Extent::new(9, 2)])],
    );

    let mut bitmap = AllocationBitmap::new(16);
    for extent in [Extent::new(0, 2), Extent::new(5, 1), Extent::new(9, 2)] {
        bitmap.set_extent(&extent);
    }
    let before = bitmap.clone();

    let report = repair::reconcile(&mut bitmap, &index);

    assert_eq!(report, RepairReport::default());
    assert!(report.is_clean());
    assert_eq!(bitmap, before);
}

#[test]
fn test_reconcile_reports_out_of_range_extents() {
    let temp = TempDir::new().unwrap();
    let index = index_with(&temp, &[("tail", vec![Extent::new(14, 4)])]);

    let mut bitmap = AllocationBitmap::new(16);
    let report = repair::reconcile(&mut bitmap, &index);

    assert_eq!(report.out_of_range, vec![("tail".to_string(), Extent::new(14, 4))]);
    assert_eq!(report.missing_marked, 2);
    assert!(bitmap.is_set(14) && bitmap.is_set(15));
    assert!(!report.is_clean());
}

// =============================================================================
// Disk Repair Tests
// =============================================================================

#[test]
fn test_disk_repair_reclaims_overwrite_orphans() {
    let temp = TempDir::new().unwrap();
    let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();

    disk.save("a", &vec![1u8; 8000]).unwrap();
    disk.save("a", &vec![2u8; 8000]).unwrap();
    assert_eq!(disk.stats().unwrap().used_blocks, 4);

    let report = disk.repair().unwrap();
    assert_eq!(report.leaked_freed, 2);
    assert_eq!(disk.stats().unwrap().used_blocks, 2);

    // Freed blocks are reusable and the live blob is intact
    disk.save("b", &vec![3u8; 8000]).unwrap();
    assert_eq!(disk.record("b").unwrap().extents, vec![Extent::new(0, 2)]);
    assert_eq!(disk.load("a").unwrap().into_bytes().unwrap().as_ref(), &vec![2u8; 8000][..]);

    assert!(disk.repair().unwrap().is_clean());
}

// =============================================================================
// Inspection Tests
// =============================================================================

#[test]
fn test_inspect_reports_utilization() {
    let temp = TempDir::new().unwrap();
    {
        let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
        disk.save("a", &vec![7u8; 3 * 4096]).unwrap();
        disk.close().unwrap();
    }

    let usage = repair::inspect(temp.path()).unwrap();

    assert_eq!(usage.header.block_size, 4096);
    assert_eq!(usage.header.total_blocks, 32);
    assert_eq!(usage.used_blocks, 3);
    assert_eq!(usage.free_blocks, 29);
    assert_eq!(usage.container_bytes, 32 * 4096);
    assert!((usage.ratio() - 3.0 / 32.0).abs() < f64::EPSILON);
}

#[test]
fn test_inspect_without_header_fails() {
    let temp = TempDir::new().unwrap();
    {
        let disk = VirtualDisk::open(temp.path(), &test_config()).unwrap();
        disk.close().unwrap();
    }
    fs::remove_file(temp.path().join(HEADER_FILENAME)).unwrap();

    let result = repair::inspect(temp.path());
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}
