//! Tests for the `cache` module.

use super::cache::{DataFileCache, MapMode};
use super::error::Error;
use super::layout::DATA_FILE_SIZE;
use tempfile::TempDir;

#[test]
fn test_write_mode_creates_and_caches_mapping() {
    let dir = TempDir::new().unwrap();
    let mut cache = DataFileCache::new(MapMode::Write, None);
    let first = cache.data_map(dir.path(), 0, 7).unwrap();
    let again = cache.data_map(dir.path(), 0, 7).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &again));
    assert_eq!(1, cache.mapped_count());
    assert_eq!(
        DATA_FILE_SIZE as u64,
        std::fs::metadata(dir.path().join("data-7-0")).unwrap().len()
    );
}

#[test]
fn test_read_mode_missing_file_is_corrupt_data() {
    let dir = TempDir::new().unwrap();
    let mut cache = DataFileCache::new(MapMode::Read, None);
    assert!(matches!(
        cache.data_map(dir.path(), 0, 7),
        Err(Error::CorruptData(_))
    ));
}

#[test]
fn test_eviction_keeps_newest_mappings() {
    let dir = TempDir::new().unwrap();
    // Budget of exactly two data files.
    let mut cache = DataFileCache::new(MapMode::Write, Some(2 * DATA_FILE_SIZE as u64));
    cache.data_map(dir.path(), 0, 1).unwrap();
    cache.data_map(dir.path(), 1, 1).unwrap();
    assert_eq!(2, cache.mapped_count());
    cache.data_map(dir.path(), 2, 1).unwrap();
    assert_eq!(2, cache.mapped_count());
}

#[test]
fn test_evicted_mapping_stays_usable_through_its_guard() {
    let dir = TempDir::new().unwrap();
    let mut cache = DataFileCache::new(MapMode::Write, Some(DATA_FILE_SIZE as u64));
    let held = cache.data_map(dir.path(), 0, 1).unwrap();
    held.write_at(4, b"still here").unwrap();
    // Overflow the budget so (0, 1) is evicted from the cache.
    cache.data_map(dir.path(), 1, 1).unwrap();
    assert_eq!(1, cache.mapped_count());
    assert_eq!(b"still here", &held.as_slice()[4..14]);
}

#[test]
fn test_clear_releases_everything() {
    let dir = TempDir::new().unwrap();
    let mut cache = DataFileCache::new(MapMode::Write, None);
    cache.data_map(dir.path(), 0, 1).unwrap();
    cache.data_map(dir.path(), 0, 2).unwrap();
    cache.clear();
    assert_eq!(0, cache.mapped_count());
}
