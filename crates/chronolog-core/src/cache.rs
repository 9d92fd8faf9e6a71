//! Data-file mapping cache.
//!
//! Owns the file handles and active mappings of a cycle's data files, keyed
//! by `(filenum, thread)`. On platforms where address space or handle count
//! is constrained the cache evicts in insertion order under a byte budget;
//! evicted mappings stay alive until the last record guard referencing them
//! drops.

use crate::cycle::{data_path, open_data_preallocated, open_readonly};
use crate::error::{Error, Result};
use crate::layout::DATA_FILE_SIZE;
use crate::mmap::SharedMmap;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Whether mappings are opened for reading or for appending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MapMode {
    Read,
    Write,
}

/// Cache of `(filenum, thread) -> data mapping` for the current cycle.
pub(crate) struct DataFileCache {
    mode: MapMode,
    /// Budget in whole data files; `None` disables eviction.
    max_maps: Option<usize>,
    files: FxHashMap<(u32, u64), File>,
    maps: IndexMap<(u32, u64), Arc<SharedMmap>>,
}

impl DataFileCache {
    pub(crate) fn new(mode: MapMode, max_mapped_memory: Option<u64>) -> Self {
        #[allow(clippy::cast_possible_truncation)] // budget / 64 MiB is small
        let max_maps = max_mapped_memory.map(|budget| (budget / DATA_FILE_SIZE as u64) as usize);
        Self {
            mode,
            max_maps,
            files: FxHashMap::default(),
            maps: IndexMap::new(),
        }
    }

    /// Returns the mapping for `(filenum, thread)`, opening file and map on
    /// a miss and evicting the oldest entry past the budget.
    pub(crate) fn data_map(
        &mut self,
        cycle_dir: &Path,
        filenum: u32,
        thread: u64,
    ) -> Result<Arc<SharedMmap>> {
        let key = (filenum, thread);
        if let Some(map) = self.maps.get(&key) {
            return Ok(Arc::clone(map));
        }

        if !self.files.contains_key(&key) {
            let path = data_path(cycle_dir, thread, filenum);
            let file = match self.mode {
                MapMode::Read => open_readonly(&path).map_err(|e| {
                    if e.kind() == io::ErrorKind::NotFound {
                        Error::CorruptData(format!(
                            "published slot refers to missing data file {}",
                            path.display()
                        ))
                    } else {
                        Error::Map(e)
                    }
                })?,
                MapMode::Write => open_data_preallocated(&path)?,
            };
            self.files.insert(key, file);
        }
        let file = &self.files[&key];
        let map = Arc::new(match self.mode {
            MapMode::Read => SharedMmap::open_read(file, DATA_FILE_SIZE)?,
            MapMode::Write => SharedMmap::open_write(file, DATA_FILE_SIZE)?,
        });
        self.maps.insert(key, Arc::clone(&map));

        if let Some(max_maps) = self.max_maps {
            if self.maps.len() > max_maps {
                if let Some(((filenum, thread), _evicted)) = self.maps.shift_remove_index(0) {
                    self.files.remove(&(filenum, thread));
                    tracing::debug!(filenum, thread, "evicted data mapping over budget");
                }
            }
        }
        Ok(map)
    }

    /// Drops every cached mapping and file handle.
    pub(crate) fn clear(&mut self) {
        self.maps.clear();
        self.files.clear();
    }

    #[cfg(test)]
    pub(crate) fn mapped_count(&self) -> usize {
        self.maps.len()
    }
}
