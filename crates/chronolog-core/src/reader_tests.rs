//! Tests for the `reader` module.

use super::config::ChronicleConfig;
use super::cycle;
use super::error::Error;
use super::layout::{to_full_index, DATA_FILE_SIZE};
use super::reader::ChronicleReader;
use super::writer::ChronicleWriter;
use chrono::NaiveDate;
use tempfile::TempDir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn test_empty_chronicle_get_index_is_no_data() {
    let dir = TempDir::new().unwrap();
    let reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    assert!(matches!(reader.get_index(), Err(Error::NoData)));
}

#[test]
fn test_empty_chronicle_next_record_is_no_data() {
    let dir = TempDir::new().unwrap();
    let mut reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    assert!(matches!(reader.next_record(), Err(Error::NoData)));
}

#[test]
fn test_config_rejects_small_mapped_memory_budget() {
    let dir = TempDir::new().unwrap();
    let config =
        ChronicleConfig::new(dir.path()).max_mapped_memory(Some(DATA_FILE_SIZE as u64 - 1));
    assert!(matches!(
        ChronicleReader::open(config),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_config_rejects_date_with_full_index() {
    let dir = TempDir::new().unwrap();
    let config = ChronicleConfig::new(dir.path())
        .date(date(2015, 1, 1))
        .full_index(42);
    assert!(matches!(
        ChronicleReader::open(config),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_reader_selects_cycle_written_on_a_previous_day() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("20150221")).unwrap();
    let reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    assert_eq!(Some(date(2015, 2, 21)), reader.get_date());
    assert_eq!(0x40_6700_0000_0000, reader.get_index().unwrap());
}

#[test]
fn test_set_date_selects_at_or_after() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("20150101")).unwrap();
    std::fs::create_dir(dir.path().join("20150103")).unwrap();
    cycle::open_index_preallocated(&dir.path().join("20150103").join("index-0")).unwrap();

    let mut reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    assert_eq!(Some(date(2015, 1, 1)), reader.get_date());

    reader.set_date(date(2015, 1, 2)).unwrap();
    assert_eq!(Some(date(2015, 1, 3)), reader.get_date());
    assert_eq!(to_full_index(date(2015, 1, 3), 0), reader.get_index().unwrap());

    assert!(matches!(
        reader.set_date(date(2015, 1, 4)),
        Err(Error::NoData)
    ));
}

#[test]
fn test_reader_at_future_date_never_falls_back_to_older_cycles() {
    let dir = TempDir::new().unwrap();
    let writer = ChronicleWriter::open(ChronicleConfig::new(dir.path())).unwrap();
    let mut appender = writer.get_appender();
    appender.write_i32(41).unwrap();
    appender.finish().unwrap();

    let tomorrow = writer.get_date().unwrap().succ_opt().unwrap();
    let mut reader =
        ChronicleReader::open(ChronicleConfig::new(dir.path()).date(tomorrow)).unwrap();
    assert!(matches!(reader.next_record(), Err(Error::NoData)));
}

#[test]
fn test_get_index_parity_between_writer_and_fresh_reader() {
    let dir = TempDir::new().unwrap();
    let writer = ChronicleWriter::open(ChronicleConfig::new(dir.path())).unwrap();
    let mut appender = writer.get_appender();
    appender.write_u8(1).unwrap();
    appender.finish().unwrap();

    let index = writer.get_index().unwrap();
    assert!(index > 0x40_0000_0000_0000);

    let reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    assert_eq!(index, reader.get_index().unwrap());
}

#[test]
fn test_next_index_and_set_index_rewind() {
    let dir = TempDir::new().unwrap();
    let writer = ChronicleWriter::open(ChronicleConfig::new(dir.path())).unwrap();
    for value in 0..3 {
        let mut appender = writer.get_appender();
        appender.write_i32(value).unwrap();
        appender.finish().unwrap();
    }

    let mut reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    let first = reader.next_index().unwrap();
    let second = reader.next_index().unwrap();
    assert_eq!(first + 1, second);

    reader.set_index(first).unwrap();
    assert_eq!(1, reader.next_record().unwrap().reader().read_i32().unwrap());
    reader.set_index(first - 1).unwrap();
    assert_eq!(0, reader.next_record().unwrap().reader().read_i32().unwrap());
}

#[test]
fn test_end_index_today_is_first_unpublished_slot() {
    let dir = TempDir::new().unwrap();
    let writer = ChronicleWriter::open(ChronicleConfig::new(dir.path())).unwrap();
    let records = 300;
    for value in 0..records {
        let mut appender = writer.get_appender();
        appender.write_i32(value).unwrap();
        appender.finish().unwrap();
    }
    let today = writer.get_date().unwrap();

    let mut reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    assert_eq!(
        to_full_index(today, u64::from(records.unsigned_abs())),
        reader.get_end_index_today().unwrap()
    );

    reader.set_end_index_today().unwrap();
    assert!(matches!(reader.next_record(), Err(Error::NoData)));
}

#[test]
fn test_set_end_skips_everything_published() {
    let dir = TempDir::new().unwrap();
    let writer = ChronicleWriter::open(ChronicleConfig::new(dir.path())).unwrap();
    for value in 0..5 {
        let mut appender = writer.get_appender();
        appender.write_i32(value).unwrap();
        appender.finish().unwrap();
    }

    let mut reader = ChronicleReader::open(ChronicleConfig::new(dir.path())).unwrap();
    reader.set_end().unwrap();
    assert!(matches!(reader.next_record(), Err(Error::NoData)));
    reader.set_start_index_today();
    assert_eq!(0, reader.next_record().unwrap().reader().read_i32().unwrap());
}

#[test]
fn test_bounded_reader_follows_records_across_data_files() {
    let dir = TempDir::new().unwrap();
    let writer = ChronicleWriter::open(ChronicleConfig::new(dir.path())).unwrap();
    // A threshold this close to the file size advances the data file after
    // every record.
    let mut appender = writer.get_appender_with_max_msg_size(DATA_FILE_SIZE - 8);
    for value in 10..13 {
        appender.write_i32(value).unwrap();
        appender.finish().unwrap();
    }

    let config =
        ChronicleConfig::new(dir.path()).max_mapped_memory(Some(DATA_FILE_SIZE as u64));
    let mut reader = ChronicleReader::open(config).unwrap();
    for value in 10..13 {
        let record = reader.next_record().unwrap();
        assert_eq!(4, record.len().unwrap());
        assert_eq!(value, record.reader().read_i32().unwrap());
    }
    assert!(matches!(reader.next_record(), Err(Error::NoData)));
}
