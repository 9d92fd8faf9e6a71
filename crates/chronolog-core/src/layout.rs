//! On-disk layout constants and bit packing.
//!
//! The journal keeps two fixed-size file kinds per day directory: `index-N`
//! files of 8-byte slots and `data-T-F` files holding framed records. A slot
//! packs the writing thread id, the data file number and the byte offset of
//! the record's payload:
//!
//! ```text
//! bits 63 .. 64-TB   thread id
//! bits 63-TB .. 26   data file number
//! bits 25 .. 0       byte offset into the data file
//! ```
//!
//! where `TB` is the thread-id width derived from the host's maximum pid.
//! The public record identifier is the *global index*,
//! `(days_since_epoch << 40) | intra_day_sequence`, stable across processes
//! and restarts.

use crate::error::{Error, Result};
use chrono::{Days, NaiveDate};

/// Size of every `data-T-F` file.
pub const DATA_FILE_SIZE: usize = 64 * 1024 * 1024;

/// Size of every `index-N` file.
pub const INDEX_FILE_SIZE: usize = 16 * 1024 * 1024;

/// Number of 8-byte slots held by one index file.
pub const ENTRIES_PER_INDEX_FILE: u64 = (INDEX_FILE_SIZE / 8) as u64;

/// Bit position of the data file number inside a slot's payload part.
pub const FILENUM_FROM_POS_SHIFT: u32 = 26;

/// Mask of the byte-offset bits of a slot.
pub const POS_MASK: u64 = (1 << FILENUM_FROM_POS_SHIFT) - 1;

/// Bit position of the cycle day inside a global index.
pub const CYCLE_INDEX_POS: u32 = 40;

/// Mask of the intra-day sequence bits of a global index.
pub const INTRA_DAY_MASK: u64 = (1 << CYCLE_INDEX_POS) - 1;

/// Default appender threshold for advancing to the next data file.
pub const DEFAULT_MAX_MSG_SIZE: usize = 64 * 1024;

/// Thread-id width used when the host does not expose a pid limit.
const FALLBACK_THREAD_ID_BITS: u32 = 16;

const SECONDS_PER_DAY: i64 = 86_400;

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("unix epoch is a valid date")
}

/// Thread-id width for a host whose pids are below `pid_max`.
///
/// This is `bit_length(pid_max - 1)`: the narrowest field that can hold
/// every pid the kernel will hand out.
#[must_use]
pub fn thread_id_bits(pid_max: u64) -> u32 {
    let top = pid_max.saturating_sub(1);
    if top == 0 {
        0
    } else {
        64 - top.leading_zeros()
    }
}

/// Reads the host's pid limit and derives the thread-id width.
///
/// Falls back to 16 bits on hosts without `/proc/sys/kernel/pid_max`.
#[must_use]
pub fn detect_thread_id_bits() -> u32 {
    std::fs::read_to_string("/proc/sys/kernel/pid_max")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map_or(FALLBACK_THREAD_ID_BITS, thread_id_bits)
}

/// Combines a cycle date and an intra-day sequence into a global index.
#[must_use]
pub fn to_full_index(date: NaiveDate, index: u64) -> u64 {
    let days = date.signed_duration_since(epoch()).num_days();
    #[allow(clippy::cast_sign_loss)] // cycle dates before 1970 do not occur on disk
    let days = days as u64;
    (days << CYCLE_INDEX_POS) | (index & INTRA_DAY_MASK)
}

/// Splits a global index back into its cycle date and intra-day sequence.
#[must_use]
pub fn from_full_index(full_index: u64) -> (NaiveDate, u64) {
    let days = full_index >> CYCLE_INDEX_POS;
    let date = epoch()
        .checked_add_days(Days::new(days))
        .expect("cycle day count fits the calendar range");
    (date, full_index & INTRA_DAY_MASK)
}

/// Seconds since the unix epoch of a cycle date's UTC midnight.
#[must_use]
pub fn utc_midnight_seconds(date: NaiveDate) -> i64 {
    date.signed_duration_since(epoch()).num_days() * SECONDS_PER_DAY
}

/// A decoded index slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Writing thread id.
    pub thread: u64,
    /// Data file number for that thread.
    pub filenum: u32,
    /// Byte offset of the record payload inside the data file.
    pub pos: usize,
}

/// Slot bit packing parameterised by the thread-id width.
///
/// The width must match between every writer and reader of a chronicle;
/// a mismatch makes published slots undecodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    thread_id_bits: u32,
}

impl SlotLayout {
    /// Builds a layout for the given thread-id width.
    pub fn new(thread_id_bits: u32) -> Result<Self> {
        // The file-number field is 38-TB bits wide; both fields need room.
        if !(1..=37).contains(&thread_id_bits) {
            return Err(Error::Config(format!(
                "thread_id_bits must be between 1 and 37, got {thread_id_bits}"
            )));
        }
        Ok(Self { thread_id_bits })
    }

    /// The thread-id width in bits.
    #[must_use]
    pub fn thread_id_bits(&self) -> u32 {
        self.thread_id_bits
    }

    /// Mask applied to OS thread ids before they enter a slot.
    #[must_use]
    pub fn thread_mask(&self) -> u64 {
        (1 << self.thread_id_bits) - 1
    }

    /// Mask of the non-thread (file number + offset) part of a slot.
    #[must_use]
    pub fn payload_mask(&self) -> u64 {
        (1 << (64 - self.thread_id_bits)) - 1
    }

    /// Packs `(thread, filenum, pos)` into a slot value.
    #[must_use]
    pub fn pack(&self, thread: u64, filenum: u64, pos: u64) -> u64 {
        (thread << (64 - self.thread_id_bits)) | (filenum << FILENUM_FROM_POS_SHIFT) | pos
    }

    /// Decodes a published slot value.
    #[must_use]
    pub fn unpack(&self, value: u64) -> Slot {
        let payload = value & self.payload_mask();
        #[allow(clippy::cast_possible_truncation)] // filenum is at most 38-TB bits
        let filenum = (payload >> FILENUM_FROM_POS_SHIFT) as u32;
        #[allow(clippy::cast_possible_truncation)] // pos is 26 bits
        let pos = (value & POS_MASK) as usize;
        Slot {
            thread: value >> (64 - self.thread_id_bits),
            filenum,
            pos,
        }
    }
}
