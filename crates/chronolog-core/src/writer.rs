//! Chronicle writer: multi-writer append with CAS publication.
//!
//! A [`ChronicleWriter`] may be shared by any number of threads; each thread
//! obtains its own [`Appender`] and writes framed records into a data file
//! whose name embeds the thread id, so record bytes are never contended.
//! The only cross-writer synchronisation is the atomic compare-and-swap
//! that publishes an index slot: the first writer to flip a slot from zero
//! owns that sequence number, in this process or any other.

use crate::cache::{DataFileCache, MapMode};
use crate::clock::Clock;
use crate::codec::{encode_stopbit, stopbit_len, ByteReader, MAX_STOPBIT_LEN};
use crate::config::ChronicleConfig;
use crate::cycle::{self, CycleDirs};
use crate::error::{Error, Result};
use crate::layout::{SlotLayout, DATA_FILE_SIZE, DEFAULT_MAX_MSG_SIZE, INDEX_FILE_SIZE};
use crate::mmap::SharedMmap;
use crate::reader::CycleState;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long a rollover follower waits for the leader to create `index-0`
/// before falling back to creating it itself.
const ROLLOVER_WAIT_STEP: Duration = Duration::from_millis(10);
const ROLLOVER_WAIT_STEPS: u32 = 50;

struct WriterInner {
    state: CycleState,
    /// Next free `(filenum, pos)` per thread id.
    positions: FxHashMap<u64, (u32, usize)>,
}

/// Appending handle over one chronicle.
///
/// Share it across threads by reference; every thread must call
/// [`ChronicleWriter::get_appender`] for its own [`Appender`].
pub struct ChronicleWriter {
    inner: Mutex<WriterInner>,
    layout: SlotLayout,
    clock: Arc<dyn Clock>,
}

impl ChronicleWriter {
    /// Opens (creating if needed) the chronicle for appending.
    ///
    /// Today's cycle directory is created, `index-0` is opened, and the
    /// per-thread write positions are recovered from the slots already
    /// published in the cycle.
    pub fn open(config: ChronicleConfig) -> Result<Self> {
        config.validate()?;
        let layout = SlotLayout::new(config.resolve_thread_id_bits())?;
        let clock = Arc::clone(&config.clock);
        std::fs::create_dir_all(&config.base_dir)?;

        let data = DataFileCache::new(MapMode::Write, config.max_mapped_memory);
        let mut state = CycleState::new(
            CycleDirs::new(&config.base_dir),
            MapMode::Write,
            layout,
            Arc::clone(&clock),
            data,
        );

        let today = clock.today();
        let todays_dir = state.dirs.cycle_path(today);
        std::fs::create_dir_all(&todays_dir)?;
        state.cycle_dir = Some(todays_dir);
        state.set_date_and_base(today);
        state.open_next_index()?;

        let positions = recover_positions(&mut state)?;

        Ok(Self {
            inner: Mutex::new(WriterInner { state, positions }),
            layout,
            clock,
        })
    }

    /// Appender for the calling thread, with the default 64 KiB message
    /// size threshold.
    #[must_use]
    pub fn get_appender(&self) -> Appender<'_> {
        self.get_appender_with_max_msg_size(DEFAULT_MAX_MSG_SIZE)
    }

    /// Appender for the calling thread with an explicit threshold for
    /// advancing to the next data file.
    #[must_use]
    pub fn get_appender_with_max_msg_size(&self, max_msg_size: usize) -> Appender<'_> {
        let thread = os_thread_id() & self.layout.thread_mask();
        let (mut filenum, mut pos) = self
            .inner
            .lock()
            .positions
            .get(&thread)
            .copied()
            .unwrap_or((0, 4));
        // A recovered position inside the tail guard band would trip
        // NoSpace mid-record; move to the next file up front.
        if pos + max_msg_size >= DATA_FILE_SIZE {
            filenum += 1;
            pos = 4;
        }
        Appender {
            writer: self,
            thread,
            filenum,
            pos,
            start_pos: pos,
            start_date: None,
            max_msg_size,
            map: None,
        }
    }

    /// Global index at the writer's cursor (the slot most recently
    /// consumed by this writer, as a fresh reader would report it).
    pub fn get_index(&self) -> Result<u64> {
        self.inner.lock().state.get_index()
    }

    /// Date of the cycle currently being appended to.
    #[must_use]
    pub fn get_date(&self) -> Option<NaiveDate> {
        self.inner.lock().state.date
    }
}

impl CycleState {
    /// Publishes `value` into the first free index slot.
    ///
    /// Contention never surfaces: a lost swap just advances to the next
    /// slot. The cursor is left at the consumed slot.
    fn publish_slot(&mut self, value: u64) -> Result<()> {
        if self.intra == 0 {
            self.intra = self.end_index_today()?;
        }
        loop {
            let byte_offset = self.intra * 8;
            #[allow(clippy::cast_possible_truncation)] // index file count is small
            let index_filenum = (byte_offset / INDEX_FILE_SIZE as u64) as usize;
            #[allow(clippy::cast_possible_truncation)] // bounded by INDEX_FILE_SIZE
            let within = (byte_offset % INDEX_FILE_SIZE as u64) as usize;
            while self.open_index_count() <= index_filenum {
                self.open_next_index()?;
            }
            let map = self.index_map(index_filenum);
            if map.read_u64(within)? != 0 {
                self.intra += 1;
                continue;
            }
            if map.cas_u64(within, 0, value)? != 0 {
                // Another writer won this sequence number.
                self.intra += 1;
                continue;
            }
            break;
        }
        self.max_seen = self.max_seen.max(self.intra + 1);
        Ok(())
    }

    /// Moves the writer to a new day's cycle. Returns whether this call
    /// created the directory (the rollover leader).
    fn day_rollover(&mut self, new_date: NaiveDate) -> Result<bool> {
        let new_dir = self.dirs.cycle_path(new_date);
        let leader = match std::fs::create_dir(&new_dir) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => false,
            Err(e) => return Err(e.into()),
        };
        tracing::info!(cycle = %new_dir.display(), leader, "day rollover");
        if !leader {
            wait_for_leader_index(&new_dir);
        }
        self.set_cycle_dir(new_dir)?;
        // index-1 is opened eagerly so the first boundary crossing of the
        // fresh day never faults inside a publish loop.
        self.open_next_index()?;
        self.open_next_index()?;
        Ok(leader)
    }
}

/// Followers give the leader a moment to create `index-0`; after the wait
/// they create it themselves, which the preallocating open makes idempotent.
fn wait_for_leader_index(cycle_dir: &Path) {
    let index0 = cycle::index_path(cycle_dir, 0);
    for _ in 0..ROLLOVER_WAIT_STEPS {
        if index0.exists() {
            return;
        }
        std::thread::sleep(ROLLOVER_WAIT_STEP);
    }
    tracing::warn!(
        path = %index0.display(),
        "rollover leader did not create index-0 in time; creating it here"
    );
}

/// Recovers the next free `(filenum, pos)` per thread from the published
/// slots of the current cycle, scanning backwards from the end.
///
/// Safe because a data file is written only by the thread whose id is in
/// its name; the latest published record of a thread therefore ends at
/// that thread's next write position.
fn recover_positions(state: &mut CycleState) -> Result<FxHashMap<u64, (u32, usize)>> {
    let end = state.end_index_today()?;
    state.intra = end;
    state.max_seen = end;

    let mut positions: FxHashMap<u64, (u32, usize)> = FxHashMap::default();
    let mut i = end;
    while i > 0 {
        i -= 1;
        let value = state.slot_value(i)?;
        if value & state.layout.payload_mask() == 0 {
            continue;
        }
        let slot = state.layout.unpack(value);
        if positions.contains_key(&slot.thread) {
            continue;
        }
        let map = state.data_map(slot.filenum, slot.thread)?;
        let length = ByteReader::at(map.as_slice(), slot.pos).get_length()?;
        let length = usize::try_from(length).map_err(|_| {
            Error::CorruptData(format!(
                "published record at slot {i} has negative length {length}"
            ))
        })?;
        positions.insert(slot.thread, (slot.filenum, slot.pos + length + 4));
    }
    if !positions.is_empty() {
        tracing::debug!(threads = positions.len(), end, "recovered writer positions");
    }
    Ok(positions)
}

#[cfg(target_os = "linux")]
fn os_thread_id() -> u64 {
    // SAFETY: gettid has no preconditions.
    #[allow(clippy::cast_sign_loss)] // pids are non-negative
    unsafe {
        libc::gettid() as u64
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn os_thread_id() -> u64 {
    // Best effort off Linux: pthread ids are unique per live thread.
    unsafe { libc::pthread_self() as usize as u64 }
}

#[cfg(not(unix))]
fn os_thread_id() -> u64 {
    u64::from(std::process::id())
}

/// Per-thread, per-record writing scope.
///
/// Codec writes accumulate into the thread's data file; [`Appender::finish`]
/// seals the frame (length sentinel last) and publishes the index slot,
/// which is the instant the record becomes visible to readers. The appender
/// can be reused for the next record after `finish`.
pub struct Appender<'a> {
    writer: &'a ChronicleWriter,
    thread: u64,
    filenum: u32,
    pos: usize,
    start_pos: usize,
    start_date: Option<NaiveDate>,
    max_msg_size: usize,
    map: Option<Arc<SharedMmap>>,
}

impl Appender<'_> {
    /// Bytes written into the current record so far.
    #[must_use]
    pub fn bytes_written(&self) -> usize {
        self.pos - self.start_pos
    }

    /// Current write offset inside the data file.
    #[must_use]
    pub fn get_offset(&self) -> usize {
        self.pos
    }

    /// Thread id this appender writes under.
    #[must_use]
    pub fn thread_id(&self) -> u64 {
        self.thread
    }

    /// Marks the record as started; the first write of each record pins the
    /// record's date and triggers a rollover if the writer is on an older
    /// cycle.
    fn start(&mut self) -> Result<()> {
        if self.start_date.is_some() {
            return Ok(());
        }
        let today = self.writer.clock.today();
        self.start_date = Some(today);
        let mut inner = self.writer.inner.lock();
        if inner.state.date != Some(today) {
            // Nothing of this record is on disk yet, so losing the race is
            // harmless here; both leader and follower just move cycles.
            inner.state.day_rollover(today)?;
            inner.positions.clear();
            drop(inner);
            self.pos = self.pos - self.start_pos + 4;
            self.start_pos = 4;
            self.filenum = 0;
            self.map = None;
        }
        Ok(())
    }

    fn data_map(&mut self) -> Result<Arc<SharedMmap>> {
        if let Some(map) = &self.map {
            return Ok(Arc::clone(map));
        }
        let map = self
            .writer
            .inner
            .lock()
            .state
            .data_map(self.filenum, self.thread)?;
        self.map = Some(Arc::clone(&map));
        Ok(map)
    }

    /// Writes raw bytes into the record.
    ///
    /// This is the primitive every codec write lowers to; it is public so
    /// records can be blitted between chronicles without re-encoding.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.start()?;
        if self.pos + bytes.len() >= DATA_FILE_SIZE {
            return Err(Error::NoSpace);
        }
        let map = self.data_map()?;
        map.write_at(self.pos, bytes)?;
        self.pos += bytes.len();
        Ok(())
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    /// Writes a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Writes a little-endian `i16`.
    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `i64`.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `f32`.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a little-endian `f64`.
    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Writes a non-negative value as a stop-bit varint.
    pub fn write_stopbit(&mut self, value: i64) -> Result<()> {
        let value = u64::try_from(value).map_err(|_| {
            Error::InvalidArgument(format!("stop-bit values must be non-negative, got {value}"))
        })?;
        self.write_stopbit_raw(value)
    }

    fn write_stopbit_raw(&mut self, value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_STOPBIT_LEN];
        let n = encode_stopbit(value, &mut buf);
        self.write_bytes(&buf[..n])
    }

    /// Writes a stop-bit-length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_stopbit_raw(value.len() as u64)?;
        self.write_bytes(value.as_bytes())
    }

    /// Writes a string into a fixed-width field of `max_size` bytes,
    /// zero-padding the remainder.
    pub fn write_fixed_string(&mut self, value: &str, max_size: usize) -> Result<()> {
        let encoded = value.len();
        let prefix = stopbit_len(encoded as u64);
        if encoded + prefix > max_size {
            return Err(Error::InvalidArgument(format!(
                "string of {encoded} bytes does not fit a fixed field of {max_size}"
            )));
        }
        self.write_string(value)?;
        self.fill(max_size - prefix - encoded, 0)
    }

    /// Skips `num_bytes` without writing them.
    pub fn advance(&mut self, num_bytes: usize) -> Result<()> {
        self.start()?;
        if self.pos + num_bytes >= DATA_FILE_SIZE {
            return Err(Error::NoSpace);
        }
        self.pos += num_bytes;
        Ok(())
    }

    /// Writes `num_bytes` copies of `byte`.
    pub fn fill(&mut self, num_bytes: usize, byte: u8) -> Result<()> {
        self.write_bytes(&vec![byte; num_bytes])
    }

    /// Seals and publishes the current record.
    ///
    /// The length sentinel is the last store before the index slot flips,
    /// so a reader that observes the slot always sees a complete frame. If
    /// midnight passed since the record started, the pending bytes are
    /// carried into the new cycle when this appender wins the rollover;
    /// otherwise they are lost and `PartialWriteLostOnRollover` is
    /// returned.
    pub fn finish(&mut self) -> Result<()> {
        let length = self.pos - self.start_pos;
        let today = self.writer.clock.today();
        let crossed_midnight = self.start_date.is_some_and(|d| d != today);

        let mut inner = self.writer.inner.lock();
        if crossed_midnight || inner.state.date != Some(today) {
            let survived = self.relocate_record(&mut inner, today, length)?;
            if !survived {
                self.start_date = None;
                return Err(Error::PartialWriteLostOnRollover);
            }
        }

        // Sentinel last: readers may dereference the frame as soon as the
        // slot below publishes.
        let map = match &self.map {
            Some(map) => Arc::clone(map),
            None => {
                let map = inner.state.data_map(self.filenum, self.thread)?;
                self.map = Some(Arc::clone(&map));
                map
            }
        };
        #[allow(clippy::cast_possible_truncation)] // records are far below 2^31 bytes
        let sentinel = !(length as i32);
        map.write_at(self.start_pos - 4, &sentinel.to_le_bytes())?;

        let value = self.writer.layout.pack(
            self.thread,
            u64::from(self.filenum),
            self.start_pos as u64,
        );
        inner.state.publish_slot(value)?;

        if self.pos + self.max_msg_size >= DATA_FILE_SIZE {
            self.pos = 4;
            self.filenum += 1;
            self.map = None;
        } else {
            self.pos += 4;
        }
        inner.positions.insert(self.thread, (self.filenum, self.pos));
        drop(inner);

        self.start_pos = self.pos;
        self.start_date = None;
        Ok(())
    }

    /// Midnight crossed mid-record: rolls the writer into today's cycle and
    /// carries the pending bytes along when allowed to. Returns whether the
    /// record survived.
    fn relocate_record(
        &mut self,
        inner: &mut WriterInner,
        today: NaiveDate,
        length: usize,
    ) -> Result<bool> {
        let pending: Vec<u8> = if length == 0 {
            Vec::new()
        } else {
            let map = match &self.map {
                Some(map) => Arc::clone(map),
                None => inner.state.data_map(self.filenum, self.thread)?,
            };
            map.as_slice()[self.start_pos..self.pos].to_vec()
        };

        let survived = if inner.state.date == Some(today) {
            // Another appender already rolled the writer past this record's
            // start; its bytes live in the abandoned cycle.
            false
        } else {
            inner.state.day_rollover(today)?
        };
        inner.positions.clear();

        self.filenum = 0;
        self.start_pos = 4;
        self.map = None;

        if !survived {
            self.pos = 4;
            return Ok(false);
        }

        self.pos = length + 4;
        let map = inner.state.data_map(0, self.thread)?;
        map.write_at(4, &pending)?;
        self.map = Some(map);
        Ok(true)
    }
}
