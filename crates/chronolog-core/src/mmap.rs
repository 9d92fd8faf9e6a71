//! Shared memory-map primitive.
//!
//! Wraps a fixed-size `memmap2` mapping of an open file and exposes the three
//! operations the journal protocol is built on: an aligned 8-byte atomic
//! load, an 8-byte compare-and-swap, and plain byte stores into regions the
//! caller owns exclusively. Mappings are `MAP_SHARED`, so the CAS is the
//! cross-process linearisation point for index-slot publication.

use crate::error::{Error, Result};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};

enum Mapping {
    Read(#[allow(dead_code)] Mmap),
    Write(#[allow(dead_code)] MmapMut),
}

/// A fixed-size shared mapping of an open file.
///
/// Read-only mappings support atomic loads and byte views; read-write
/// mappings additionally support `cas_u64` and `write_at`. The mapping is
/// unmapped when the last owner drops it.
pub struct SharedMmap {
    ptr: *mut u8,
    len: usize,
    writable: bool,
    /// Keeps the mapping alive for as long as `ptr` is dereferenced.
    _map: Mapping,
}

// SAFETY: `SharedMmap` is `Send`/`Sync` because every access path is either
// atomic (`read_u64`/`cas_u64`) or bounds-checked into regions the journal
// protocol hands to exactly one writer (`write_at` targets the data file
// owned by the calling thread's tid; `as_slice` is only read behind
// published index slots, which are never written again after the 0→nonzero
// transition).
unsafe impl Send for SharedMmap {}
unsafe impl Sync for SharedMmap {}

impl SharedMmap {
    /// Maps `[0, len)` of `file` read-only.
    pub fn open_read(file: &File, len: usize) -> Result<Self> {
        // SAFETY: the file stays open for the lifetime of the mapping and the
        // journal never truncates files, so the mapped range stays backed.
        let map = unsafe { MmapOptions::new().len(len).map(file)? };
        let ptr = map.as_ptr().cast_mut();
        Ok(Self {
            ptr,
            len,
            writable: false,
            _map: Mapping::Read(map),
        })
    }

    /// Maps `[0, len)` of `file` read-write, shared.
    pub fn open_write(file: &File, len: usize) -> Result<Self> {
        // SAFETY: as for `open_read`; files are preallocated to `len` before
        // they are mapped, so the whole range is allocated.
        let mut map = unsafe { MmapOptions::new().len(len).map_mut(file)? };
        let ptr = map.as_mut_ptr();
        Ok(Self {
            ptr,
            len,
            writable: true,
            _map: Mapping::Write(map),
        })
    }

    /// Mapped length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether stores are permitted on this mapping.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn atomic64(&self, offset: usize) -> Result<&AtomicU64> {
        if offset % 8 != 0 {
            return Err(Error::InvalidArgument(format!(
                "atomic access at unaligned offset {offset}"
            )));
        }
        if offset + 8 > self.len {
            return Err(Error::InvalidArgument(format!(
                "atomic access at {offset} beyond mapping of {} bytes",
                self.len
            )));
        }
        // SAFETY: offset is 8-aligned and in bounds (checked above), the
        // mapping itself is page-aligned, and `AtomicU64` is layout-identical
        // to `u64`. Concurrent access from other threads and processes is the
        // point: that is what the atomic type is for.
        Ok(unsafe { &*self.ptr.add(offset).cast::<AtomicU64>() })
    }

    /// Aligned 8-byte load with sequentially consistent ordering.
    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        Ok(self.atomic64(offset)?.load(Ordering::SeqCst))
    }

    /// Atomic 8-byte compare-and-swap.
    ///
    /// Returns the value observed in memory before the attempt; the swap
    /// succeeded iff the returned value equals `expected`.
    pub fn cas_u64(&self, offset: usize, expected: u64, new: u64) -> Result<u64> {
        if !self.writable {
            return Err(Error::InvalidArgument(
                "compare-and-swap on a read-only mapping".into(),
            ));
        }
        Ok(
            match self
                .atomic64(offset)?
                .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(observed) | Err(observed) => observed,
            },
        )
    }

    /// Copies `bytes` into the mapping at `offset`.
    ///
    /// The caller must own the target region exclusively; the journal
    /// guarantees this by embedding the writing thread id in data file names.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::InvalidArgument(
                "store on a read-only mapping".into(),
            ));
        }
        let end = offset.checked_add(bytes.len());
        if end.is_none() || end.is_some_and(|end| end > self.len) {
            return Err(Error::InvalidArgument(format!(
                "store of {} bytes at {offset} beyond mapping of {} bytes",
                bytes.len(),
                self.len
            )));
        }
        // SAFETY: the range is in bounds (checked above) and the region is
        // exclusive to this writer until the record is published, after which
        // it is never written again.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    /// The whole mapping as a byte slice.
    ///
    /// Readers only dereference ranges behind published index slots, which
    /// the write protocol freezes before publication.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr/len describe the live mapping held by `_map`.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}
