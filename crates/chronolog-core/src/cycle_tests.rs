//! Tests for the `cycle` module.

use super::cycle::{self, CycleDirs};
use super::error::Error;
use super::layout::{DATA_FILE_SIZE, INDEX_FILE_SIZE};
use chrono::NaiveDate;
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn mkcycle(dir: &TempDir, name: &str) {
    std::fs::create_dir(dir.path().join(name)).unwrap();
}

#[test]
fn test_first_picks_earliest_cycle() {
    let dir = TempDir::new().unwrap();
    mkcycle(&dir, "20150316");
    mkcycle(&dir, "20150102");
    mkcycle(&dir, "20160101");
    assert_eq!(
        dir.path().join("20150102"),
        CycleDirs::new(dir.path()).first().unwrap()
    );
}

#[test]
fn test_first_ignores_non_cycle_entries() {
    let dir = TempDir::new().unwrap();
    mkcycle(&dir, "notadate0");
    mkcycle(&dir, "2015010");
    std::fs::write(dir.path().join("20150102"), b"a file, not a dir").unwrap();
    mkcycle(&dir, "20150103");
    assert_eq!(
        dir.path().join("20150103"),
        CycleDirs::new(dir.path()).first().unwrap()
    );
}

#[test]
fn test_first_on_empty_base_is_no_data() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        CycleDirs::new(dir.path()).first(),
        Err(Error::NoData)
    ));
}

#[test]
fn test_first_at_or_after_skips_earlier_cycles() {
    let dir = TempDir::new().unwrap();
    mkcycle(&dir, "20150101");
    mkcycle(&dir, "20150103");
    let dirs = CycleDirs::new(dir.path());
    assert_eq!(
        dir.path().join("20150101"),
        dirs.first_at_or_after(date(2015, 1, 1)).unwrap()
    );
    // No exact match: the next later cycle wins.
    assert_eq!(
        dir.path().join("20150103"),
        dirs.first_at_or_after(date(2015, 1, 2)).unwrap()
    );
    assert!(matches!(
        dirs.first_at_or_after(date(2015, 1, 4)),
        Err(Error::NoChronicleForDate(_))
    ));
}

#[test]
fn test_next_after_walks_in_date_order() {
    let dir = TempDir::new().unwrap();
    mkcycle(&dir, "20150101");
    mkcycle(&dir, "20150105");
    let dirs = CycleDirs::new(dir.path());
    let first = dirs.first().unwrap();
    let second = dirs.next_after(&first).unwrap().unwrap();
    assert_eq!(dir.path().join("20150105"), second);
    assert!(dirs.next_after(&second).unwrap().is_none());
}

#[test]
fn test_cycle_path_and_date_round_trip() {
    let dirs = CycleDirs::new("/journal");
    let path = dirs.cycle_path(date(2015, 4, 16));
    assert_eq!("20150416", path.file_name().unwrap().to_str().unwrap());
    assert_eq!(date(2015, 4, 16), cycle::cycle_date(&path).unwrap());
}

#[test]
fn test_file_names() {
    let base = std::path::Path::new("/journal/20150416");
    assert_eq!(
        "index-3",
        cycle::index_path(base, 3).file_name().unwrap().to_str().unwrap()
    );
    assert_eq!(
        "data-4021-7",
        cycle::data_path(base, 4021, 7)
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
    );
}

#[test]
fn test_preallocated_files_have_fixed_sizes() {
    let dir = TempDir::new().unwrap();
    let index = cycle::open_index_preallocated(&dir.path().join("index-0")).unwrap();
    assert_eq!(INDEX_FILE_SIZE as u64, index.metadata().unwrap().len());
    let data = cycle::open_data_preallocated(&dir.path().join("data-1-0")).unwrap();
    assert_eq!(DATA_FILE_SIZE as u64, data.metadata().unwrap().len());
}

#[test]
fn test_preallocated_open_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("index-0");
    drop(cycle::open_index_preallocated(&path).unwrap());
    // Reopening must not truncate or grow an existing file.
    drop(cycle::open_index_preallocated(&path).unwrap());
    assert_eq!(
        INDEX_FILE_SIZE as u64,
        std::fs::metadata(&path).unwrap().len()
    );
}
