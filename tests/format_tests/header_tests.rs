//! Tests for the container header
//!
//! These tests verify:
//! - Bit-exact field order and widths
//! - Bitmap block count derivation
//! - Magic/version validation
//! - Header file read/write

use blockvault::format::{ContainerHeader, FORMAT_VERSION, HEADER_SIZE, MAGIC};
use blockvault::VaultError;
use tempfile::TempDir;

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_header_layout_is_bit_exact() {
    let header = ContainerHeader::new(4096, 1000);
    let buf = header.encode();

    assert_eq!(buf.len(), HEADER_SIZE);
    assert_eq!(&buf[0..8], MAGIC);
    assert_eq!(&buf[8..12], &FORMAT_VERSION.to_le_bytes());
    assert_eq!(&buf[12..16], &4096u32.to_le_bytes());
    assert_eq!(&buf[16..24], &1000u64.to_le_bytes());
    assert_eq!(&buf[24..32], &0u64.to_le_bytes());
    assert_eq!(&buf[32..36], &1u32.to_le_bytes());
}

#[test]
fn test_bitmap_block_count() {
    // 100_000 blocks → 12_500 bitmap bytes → 25 blocks of 512
    assert_eq!(ContainerHeader::new(512, 100_000).bitmap_blocks, 25);
    assert_eq!(ContainerHeader::new(4096, 0).bitmap_blocks, 0);
    // 32_768 blocks → exactly one 4 KB bitmap block
    assert_eq!(ContainerHeader::new(4096, 32_768).bitmap_blocks, 1);
    assert_eq!(ContainerHeader::new(4096, 32_769).bitmap_blocks, 2);
}

#[test]
fn test_decode_encoded_header() {
    let header = ContainerHeader::new(8192, 123_456);
    let decoded = ContainerHeader::decode(&header.encode()).unwrap();

    assert_eq!(decoded, header);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_decode_rejects_bad_magic() {
    let mut buf = ContainerHeader::new(4096, 10).encode();
    buf[0] = b'X';

    let result = ContainerHeader::decode(&buf);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

#[test]
fn test_decode_rejects_unknown_version() {
    let mut buf = ContainerHeader::new(4096, 10).encode();
    buf[8..12].copy_from_slice(&99u32.to_le_bytes());

    let result = ContainerHeader::decode(&buf);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

#[test]
fn test_decode_rejects_short_buffer() {
    let buf = ContainerHeader::new(4096, 10).encode();

    let result = ContainerHeader::decode(&buf[..20]);
    assert!(matches!(result, Err(VaultError::Corruption(_))));
}

// =============================================================================
// File Tests
// =============================================================================

#[test]
fn test_read_missing_header_file() {
    let temp = TempDir::new().unwrap();

    let header = ContainerHeader::read_from(&temp.path().join("container.header")).unwrap();
    assert!(header.is_none());
}

#[test]
fn test_write_then_read_header_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("container.header");

    let header = ContainerHeader::new(4096, 77);
    header.write_to(&path, true).unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), HEADER_SIZE as u64);
    assert_eq!(ContainerHeader::read_from(&path).unwrap(), Some(header));
}
