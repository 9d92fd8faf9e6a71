//! Error taxonomy for the journal engine.

use chrono::NaiveDate;
use std::io;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds surfaced by readers, writers and the primitive codec.
///
/// `EndOfIndexFile` and `NoChronicleForDate` are internal sentinels: they are
/// produced while probing for the next index file or cycle directory and are
/// folded into `NoData` before they reach the public reader API. All OS-level
/// mapping and file failures arrive as [`Error::Map`]; after one of those the
/// chronicle state must be considered unusable and reopened.
#[derive(Debug, Error)]
pub enum Error {
    /// No published record is available under a non-blocking policy.
    #[error("no published record available")]
    NoData,

    /// No cycle directory exists at or after the requested date.
    #[error("no chronicle cycle exists at or after {0}")]
    NoChronicleForDate(NaiveDate),

    /// Probed past the last `index-N` file of the current cycle.
    #[error("past the last index file of the cycle")]
    EndOfIndexFile,

    /// The current data file cannot hold the pending write.
    #[error("data file cannot hold the pending write")]
    NoSpace,

    /// Midnight was crossed mid-record and this appender was not the
    /// rollover leader; the partially written bytes are lost.
    #[error("record crossed midnight and lost the day-rollover race")]
    PartialWriteLostOnRollover,

    /// A published slot points at a missing data file, a frame is
    /// undecodable, or the journal was written with different
    /// `thread_id_bits`.
    #[error("corrupt chronicle data: {0}")]
    CorruptData(String),

    /// Invalid configuration options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An argument is out of range for the requested operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Any OS mapping or file error.
    #[error("mapping failure: {0}")]
    Map(#[from] io::Error),
}
