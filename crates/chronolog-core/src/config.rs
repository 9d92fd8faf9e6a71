//! Chronicle configuration.

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::layout::{self, DATA_FILE_SIZE};
use chrono::NaiveDate;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default mapped-memory budget per chronicle.
///
/// Address space is plentiful on Unix so eviction is disabled; Windows keeps
/// the historical 1 GiB budget because of how it accounts mapped sections.
#[cfg(windows)]
pub const DEFAULT_MAX_MAPPED_MEMORY: Option<u64> = Some(1024 * 1024 * 1024);
/// Default mapped-memory budget per chronicle.
#[cfg(not(windows))]
pub const DEFAULT_MAX_MAPPED_MEMORY: Option<u64> = None;

/// Options shared by [`ChronicleReader`](crate::ChronicleReader) and
/// [`ChronicleWriter`](crate::ChronicleWriter).
///
/// ```no_run
/// use chronolog_core::{ChronicleConfig, ChronicleReader};
/// use std::time::Duration;
///
/// # fn main() -> chronolog_core::Result<()> {
/// let config = ChronicleConfig::new("/var/journal/ticks")
///     .polling_interval(Some(Duration::from_millis(1)));
/// let reader = ChronicleReader::open(config)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChronicleConfig {
    pub(crate) base_dir: PathBuf,
    pub(crate) polling_interval: Option<Duration>,
    pub(crate) date: Option<NaiveDate>,
    pub(crate) full_index: Option<u64>,
    pub(crate) max_mapped_memory: Option<u64>,
    pub(crate) thread_id_bits: Option<u32>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl ChronicleConfig {
    /// Configuration rooted at `base_dir` with default options.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            polling_interval: None,
            date: None,
            full_index: None,
            max_mapped_memory: DEFAULT_MAX_MAPPED_MEMORY,
            thread_id_bits: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Tail-polling policy: `None` = non-blocking (`NoData`), zero = spin,
    /// anything else = sleep between polls.
    #[must_use]
    pub fn polling_interval(mut self, interval: Option<Duration>) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Starting cycle date. Mutually exclusive with [`Self::full_index`].
    #[must_use]
    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Starting global index. Mutually exclusive with [`Self::date`].
    #[must_use]
    pub fn full_index(mut self, full_index: u64) -> Self {
        self.full_index = Some(full_index);
        self
    }

    /// Byte budget for data mappings; `None` disables eviction.
    #[must_use]
    pub fn max_mapped_memory(mut self, budget: Option<u64>) -> Self {
        self.max_mapped_memory = budget;
        self
    }

    /// Overrides the auto-detected thread-id width. Must match every other
    /// writer and reader of the same chronicle.
    #[must_use]
    pub fn thread_id_bits(mut self, bits: u32) -> Self {
        self.thread_id_bits = Some(bits);
        self
    }

    /// Installs a custom UTC clock (tests use this to cross midnight).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.date.is_some() && self.full_index.is_some() {
            return Err(Error::Config(
                "date and full_index are mutually exclusive".into(),
            ));
        }
        if let Some(budget) = self.max_mapped_memory {
            if budget < DATA_FILE_SIZE as u64 {
                return Err(Error::Config(format!(
                    "max_mapped_memory must be at least one data file ({DATA_FILE_SIZE} bytes)"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn resolve_thread_id_bits(&self) -> u32 {
        self.thread_id_bits
            .unwrap_or_else(layout::detect_thread_id_bits)
    }
}

impl std::fmt::Debug for ChronicleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChronicleConfig")
            .field("base_dir", &self.base_dir)
            .field("polling_interval", &self.polling_interval)
            .field("date", &self.date)
            .field("full_index", &self.full_index)
            .field("max_mapped_memory", &self.max_mapped_memory)
            .field("thread_id_bits", &self.thread_id_bits)
            .finish_non_exhaustive()
    }
}
