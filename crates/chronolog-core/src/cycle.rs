//! Cycle directory enumeration and file management.
//!
//! Each UTC day lives in a `YYYYMMDD` directory under the chronicle base
//! directory, holding `index-N` files of published slots and `data-T-F`
//! files of framed records, all preallocated to their fixed sizes.

use crate::error::{Error, Result};
use crate::layout::{DATA_FILE_SIZE, INDEX_FILE_SIZE};
use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Enumerates and selects the per-day directories of one chronicle.
#[derive(Debug, Clone)]
pub(crate) struct CycleDirs {
    base: PathBuf,
}

impl CycleDirs {
    pub(crate) fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub(crate) fn base(&self) -> &Path {
        &self.base
    }

    /// Path of the cycle directory for `date` (not necessarily existing).
    pub(crate) fn cycle_path(&self, date: NaiveDate) -> PathBuf {
        self.base.join(dir_name(date))
    }

    /// Sorted names of the cycle directories currently on disk.
    fn scan(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.base)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_cycle_name(name) {
                continue;
            }
            if !entry.path().is_dir() {
                tracing::debug!(name, "skipping non-directory cycle entry");
                continue;
            }
            names.push(name.to_owned());
        }
        names.sort_unstable();
        Ok(names)
    }

    /// Earliest cycle directory.
    pub(crate) fn first(&self) -> Result<PathBuf> {
        self.scan()?
            .first()
            .map(|name| self.base.join(name))
            .ok_or(Error::NoData)
    }

    /// Earliest cycle directory whose date is `date` or later.
    pub(crate) fn first_at_or_after(&self, date: NaiveDate) -> Result<PathBuf> {
        let target = dir_name(date);
        self.scan()?
            .into_iter()
            .find(|name| name.as_str() >= target.as_str())
            .map(|name| self.base.join(name))
            .ok_or(Error::NoChronicleForDate(date))
    }

    /// Cycle directory immediately after `current`, if any.
    pub(crate) fn next_after(&self, current: &Path) -> Result<Option<PathBuf>> {
        let Some(current_name) = current.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        Ok(self
            .scan()?
            .into_iter()
            .find(|name| name.as_str() > current_name)
            .map(|name| self.base.join(name)))
    }
}

fn is_cycle_name(name: &str) -> bool {
    name.len() == 8 && name.bytes().all(|b| b.is_ascii_digit())
}

/// `YYYYMMDD` directory name for a UTC date.
pub(crate) fn dir_name(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Parses the UTC date out of a cycle directory path.
pub(crate) fn cycle_date(dir: &Path) -> Result<NaiveDate> {
    let name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| is_cycle_name(n))
        .ok_or_else(|| {
            Error::CorruptData(format!("not a cycle directory: {}", dir.display()))
        })?;
    NaiveDate::parse_from_str(name, "%Y%m%d")
        .map_err(|_| Error::CorruptData(format!("invalid cycle date: {name}")))
}

/// Path of the `n`th index file in a cycle directory.
pub(crate) fn index_path(cycle_dir: &Path, n: usize) -> PathBuf {
    cycle_dir.join(format!("index-{n}"))
}

/// Path of a thread's data file in a cycle directory.
pub(crate) fn data_path(cycle_dir: &Path, thread: u64, filenum: u32) -> PathBuf {
    cycle_dir.join(format!("data-{thread}-{filenum}"))
}

/// Opens `path` read-only.
pub(crate) fn open_readonly(path: &Path) -> io::Result<File> {
    File::open(path)
}

/// Opens `path` read-write, creating and preallocating it to `size` bytes.
///
/// Preallocation is sparse (`set_len`); the kernel zero-fills pages on first
/// touch, which is exactly the unused-slot encoding the index relies on.
pub(crate) fn open_preallocated(path: &Path, size: u64) -> io::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    if file.metadata()?.len() < size {
        file.set_len(size)?;
    }
    Ok(file)
}

/// Opens or creates an index file at its fixed size.
pub(crate) fn open_index_preallocated(path: &Path) -> io::Result<File> {
    open_preallocated(path, INDEX_FILE_SIZE as u64)
}

/// Opens or creates a data file at its fixed size.
pub(crate) fn open_data_preallocated(path: &Path) -> io::Result<File> {
    open_preallocated(path, DATA_FILE_SIZE as u64)
}
