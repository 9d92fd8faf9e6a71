//! # chronolog-core
//!
//! Memory-mapped, multi-process append-only message journal, bit-compatible
//! with the Vanilla Chronicle on-disk format.
//!
//! A chronicle is a base directory of per-UTC-day *cycles*, each holding
//! fixed-size index files (8-byte published-record slots) and per-thread
//! data files (length-framed record payloads). Producers append binary
//! records and receive a monotonically increasing 64-bit global index;
//! consumers iterate records in global order across day boundaries, with
//! optional polling for new data. Writers in any number of threads *and
//! processes* coordinate exclusively through atomic compare-and-swap on the
//! shared index mappings; there are no locks and no server.
//!
//! ## Quick start
//!
//! ```no_run
//! use chronolog_core::{ChronicleConfig, ChronicleReader, ChronicleWriter};
//!
//! fn main() -> chronolog_core::Result<()> {
//!     let writer = ChronicleWriter::open(ChronicleConfig::new("./journal"))?;
//!     let mut appender = writer.get_appender();
//!     appender.write_i32(42)?;
//!     appender.write_string("hello")?;
//!     appender.finish()?; // publishes: readers can see the record now
//!
//!     let mut reader = ChronicleReader::open(ChronicleConfig::new("./journal"))?;
//!     let record = reader.next_record()?;
//!     let mut cursor = record.reader();
//!     assert_eq!(42, cursor.read_i32()?);
//!     assert_eq!("hello", cursor.read_string()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - A record is visible to readers only after its frame (payload plus
//!   length sentinel) is fully written; slot publication is the
//!   linearisation point.
//! - Per thread, records appear in program order; across threads and
//!   processes the order is the CAS order on index slots.
//! - The global index `(days_since_epoch << 40) | intra_day_sequence` is
//!   stable across processes and restarts.

#![warn(missing_docs)]

mod cache;
#[cfg(test)]
mod cache_tests;
pub mod clock;
pub mod codec;
pub mod config;
mod cycle;
#[cfg(test)]
mod cycle_tests;
pub mod error;
pub mod layout;
pub mod mmap;
pub mod reader;
#[cfg(test)]
mod reader_tests;
pub mod writer;

pub use clock::{Clock, SystemClock};
pub use codec::ByteReader;
pub use config::ChronicleConfig;
pub use error::{Error, Result};
pub use layout::{
    from_full_index, thread_id_bits, to_full_index, Slot, SlotLayout, CYCLE_INDEX_POS,
    DATA_FILE_SIZE, ENTRIES_PER_INDEX_FILE, INDEX_FILE_SIZE,
};
pub use mmap::SharedMmap;
pub use reader::{ChronicleReader, Record};
pub use writer::{Appender, ChronicleWriter};
