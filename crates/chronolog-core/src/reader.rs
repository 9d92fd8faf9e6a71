//! Chronicle reader: ordered traversal of published records.
//!
//! A reader walks index slots in global order, resolves each published slot
//! to its data mapping and yields zero-copy [`Record`] guards. It can seek
//! by global index or date, binary-search the end of the current day, tail
//! new records under a polling policy, and follow the journal across day
//! boundaries.

use crate::cache::{DataFileCache, MapMode};
use crate::clock::Clock;
use crate::codec::ByteReader;
use crate::config::ChronicleConfig;
use crate::cycle::{self, CycleDirs};
use crate::error::{Error, Result};
use crate::layout::{
    from_full_index, to_full_index, Slot, SlotLayout, ENTRIES_PER_INDEX_FILE, INDEX_FILE_SIZE,
};
use crate::mmap::SharedMmap;
use chrono::NaiveDate;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Zero-copy view of one published record.
///
/// The guard owns a reference to the data mapping, so the bytes stay valid
/// even if the mapping cache evicts the file while the record is in use.
pub struct Record {
    map: Arc<SharedMmap>,
    start: usize,
}

impl Record {
    pub(crate) fn new(map: Arc<SharedMmap>, start: usize) -> Self {
        Self { map, start }
    }

    /// Byte offset of the record payload inside its data file.
    #[must_use]
    pub fn start(&self) -> usize {
        self.start
    }

    /// Payload length decoded from the frame's sentinel.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> Result<usize> {
        let len = self.reader().get_length()?;
        usize::try_from(len)
            .map_err(|_| Error::CorruptData(format!("negative record length {len}")))
    }

    /// Codec cursor positioned at the start of the payload.
    #[must_use]
    pub fn reader(&self) -> ByteReader<'_> {
        ByteReader::at(self.map.as_slice(), self.start)
    }

    /// The whole data-file mapping backing this record.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.map.as_slice()
    }
}

/// Cycle bookkeeping shared by readers and writers.
///
/// This is the chronicle aggregate: the selected cycle directory with its
/// date and global-index base, the intra-day cursor, the open index
/// mappings and the data-file cache.
pub(crate) struct CycleState {
    pub(crate) dirs: CycleDirs,
    pub(crate) mode: MapMode,
    pub(crate) layout: SlotLayout,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cycle_dir: Option<PathBuf>,
    pub(crate) date: Option<NaiveDate>,
    /// Earliest cycle date this state may select when scanning from the
    /// start; readers opened at a date that does not exist yet wait for it
    /// instead of falling back to older cycles.
    floor_date: Option<NaiveDate>,
    pub(crate) full_index_base: Option<u64>,
    /// Intra-day slot cursor.
    pub(crate) intra: u64,
    /// Lower bound on the first unpublished slot, to bound end searches.
    pub(crate) max_seen: u64,
    index_files: Vec<File>,
    index_maps: Vec<Arc<SharedMmap>>,
    pub(crate) data: DataFileCache,
}

impl CycleState {
    pub(crate) fn new(
        dirs: CycleDirs,
        mode: MapMode,
        layout: SlotLayout,
        clock: Arc<dyn Clock>,
        data: DataFileCache,
    ) -> Self {
        Self {
            dirs,
            mode,
            layout,
            clock,
            cycle_dir: None,
            date: None,
            floor_date: None,
            full_index_base: None,
            intra: 0,
            max_seen: 0,
            index_files: Vec::new(),
            index_maps: Vec::new(),
            data,
        }
    }

    /// Releases every mapping and handle and forgets the selected cycle.
    pub(crate) fn release(&mut self) {
        self.data.clear();
        self.index_maps.clear();
        self.index_files.clear();
        self.intra = 0;
        self.max_seen = 0;
        self.cycle_dir = None;
        self.date = None;
        self.full_index_base = None;
    }

    pub(crate) fn set_date_and_base(&mut self, date: NaiveDate) {
        self.date = Some(date);
        self.full_index_base = Some(to_full_index(date, 0));
    }

    /// Switches to `dir`, releasing the previous cycle's resources.
    pub(crate) fn set_cycle_dir(&mut self, dir: PathBuf) -> Result<()> {
        let date = cycle::cycle_date(&dir)?;
        self.release();
        self.cycle_dir = Some(dir);
        self.set_date_and_base(date);
        Ok(())
    }

    /// Selects the first cycle directory, or the first at or after `date`.
    pub(crate) fn try_set_cycle_dir(&mut self, date: Option<NaiveDate>) -> Result<()> {
        let dir = match date.or(self.floor_date) {
            Some(date) => self.dirs.first_at_or_after(date)?,
            None => self.dirs.first()?,
        };
        self.set_cycle_dir(dir)
    }

    pub(crate) fn set_floor_date(&mut self, date: Option<NaiveDate>) {
        self.floor_date = date;
    }

    /// Advances to the cycle directory after the current one.
    ///
    /// Returns `false` when the current cycle is still the latest.
    pub(crate) fn try_next_date(&mut self) -> Result<bool> {
        if self.cycle_dir.is_none() {
            self.try_set_cycle_dir(None)?;
        }
        let Some(current) = self.cycle_dir.clone() else {
            return Ok(false);
        };
        match self.dirs.next_after(&current)? {
            Some(next) => {
                tracing::debug!(cycle = %next.display(), "advancing to next cycle");
                self.set_cycle_dir(next)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Opens the next `index-N` file of the current cycle.
    ///
    /// Readers require the file to exist (`EndOfIndexFile` otherwise);
    /// writers create and preallocate it.
    pub(crate) fn open_next_index(&mut self) -> Result<()> {
        if self.cycle_dir.is_none() {
            self.try_set_cycle_dir(None)?;
        }
        let Some(dir) = &self.cycle_dir else {
            return Err(Error::NoData);
        };
        let path = cycle::index_path(dir, self.index_maps.len());
        let (file, map) = match self.mode {
            MapMode::Read => {
                let file = match cycle::open_readonly(&path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(Error::EndOfIndexFile);
                    }
                    Err(e) => return Err(e.into()),
                };
                let map = SharedMmap::open_read(&file, INDEX_FILE_SIZE)?;
                (file, map)
            }
            MapMode::Write => {
                let file = cycle::open_index_preallocated(&path)?;
                let map = SharedMmap::open_write(&file, INDEX_FILE_SIZE)?;
                (file, map)
            }
        };
        self.index_files.push(file);
        self.index_maps.push(Arc::new(map));
        Ok(())
    }

    pub(crate) fn open_index_count(&self) -> usize {
        self.index_maps.len()
    }

    pub(crate) fn index_map(&self, filenum: usize) -> &Arc<SharedMmap> {
        &self.index_maps[filenum]
    }

    /// Value of intra-day slot `i`; slots past the last index file read 0.
    pub(crate) fn slot_value(&mut self, i: u64) -> Result<u64> {
        let byte_offset = i * 8;
        #[allow(clippy::cast_possible_truncation)] // index file count is small
        let filenum = (byte_offset / INDEX_FILE_SIZE as u64) as usize;
        #[allow(clippy::cast_possible_truncation)] // bounded by INDEX_FILE_SIZE
        let within = (byte_offset % INDEX_FILE_SIZE as u64) as usize;
        while filenum >= self.index_maps.len() {
            match self.open_next_index() {
                Ok(()) => {}
                Err(Error::EndOfIndexFile) => return Ok(0),
                Err(e) => return Err(e),
            }
        }
        self.index_maps[filenum].read_u64(within)
    }

    /// Decodes and consumes the slot at the cursor if it is published.
    pub(crate) fn try_next_position(&mut self) -> Result<Option<Slot>> {
        let value = self.slot_value(self.intra)?;
        if value & self.layout.payload_mask() == 0 {
            return Ok(None);
        }
        self.intra += 1;
        self.max_seen = self.max_seen.max(self.intra);
        Ok(Some(self.layout.unpack(value)))
    }

    /// First unpublished intra-day slot, found by binary search.
    pub(crate) fn end_index_today(&mut self) -> Result<u64> {
        let mut low = self.max_seen.max(self.intra);
        if self.slot_value(low)? == 0 {
            return Ok(low);
        }

        let mut high = ENTRIES_PER_INDEX_FILE - 1;
        while self.slot_value(high)? != 0 {
            high += ENTRIES_PER_INDEX_FILE;
        }

        loop {
            let mid = (low + high) / 2;
            if self.slot_value(mid)? != 0 {
                low = mid;
                if high == low + 1 {
                    break;
                }
            } else {
                high = mid;
                if low == high - 1 {
                    break;
                }
            }
        }
        Ok(high)
    }

    /// The data mapping a decoded slot points into.
    pub(crate) fn data_map(&mut self, filenum: u32, thread: u64) -> Result<Arc<SharedMmap>> {
        if self.cycle_dir.is_none() && !self.try_next_date()? {
            return Err(Error::NoData);
        }
        let Some(dir) = &self.cycle_dir else {
            return Err(Error::NoData);
        };
        self.data.data_map(dir, filenum, thread)
    }

    /// Global index of the cursor.
    pub(crate) fn get_index(&self) -> Result<u64> {
        let base = self.full_index_base.ok_or(Error::NoData)?;
        Ok(base + self.intra)
    }
}

/// Ordered reader over one chronicle.
///
/// Obtained from [`ChronicleReader::open`]; traversal state is external to
/// the journal, so any number of readers can follow the same files.
pub struct ChronicleReader {
    state: CycleState,
    polling_interval: Option<Duration>,
}

impl ChronicleReader {
    /// Opens a reader over the chronicle described by `config`.
    ///
    /// With neither `date` nor `full_index` the reader starts at the
    /// earliest cycle; an empty chronicle is fine and yields `NoData` until
    /// a writer publishes.
    pub fn open(config: ChronicleConfig) -> Result<Self> {
        config.validate()?;
        let layout = SlotLayout::new(config.resolve_thread_id_bits())?;
        let data = DataFileCache::new(MapMode::Read, config.max_mapped_memory);
        let mut state = CycleState::new(
            CycleDirs::new(&config.base_dir),
            MapMode::Read,
            layout,
            Arc::clone(&config.clock),
            data,
        );

        let mut start_intra = 0;
        let target_date = if let Some(full_index) = config.full_index {
            let (date, intra) = from_full_index(full_index);
            start_intra = intra;
            Some(date)
        } else {
            config.date
        };

        state.set_floor_date(target_date);
        match state.try_set_cycle_dir(target_date) {
            Ok(()) | Err(Error::NoData | Error::NoChronicleForDate(_)) => {}
            Err(e) => return Err(e),
        }
        if start_intra != 0 {
            state.intra = start_intra;
        }

        Ok(Self {
            state,
            polling_interval: config.polling_interval,
        })
    }

    /// Global index of the next record to be read.
    pub fn get_index(&self) -> Result<u64> {
        self.state.get_index()
    }

    /// Date of the currently selected cycle.
    #[must_use]
    pub fn get_date(&self) -> Option<NaiveDate> {
        self.state.date
    }

    /// Seeks to a global index, switching cycles if necessary.
    pub fn set_index(&mut self, full_index: u64) -> Result<()> {
        let (date, intra) = from_full_index(full_index);
        if self.state.date != Some(date) {
            self.try_select(Some(date))?;
        }
        self.state.intra = intra;
        Ok(())
    }

    /// Selects the first cycle at or after `date`.
    pub fn set_date(&mut self, date: NaiveDate) -> Result<()> {
        self.try_select(Some(date))
    }

    /// Rewinds to the first slot of the current cycle.
    pub fn set_start_index_today(&mut self) {
        self.state.intra = 0;
    }

    /// Global index of the first unpublished slot of the current cycle.
    pub fn get_end_index_today(&mut self) -> Result<u64> {
        let base = self.state.full_index_base.ok_or(Error::NoData)?;
        let end = self.state.end_index_today()?;
        Ok(base + end)
    }

    /// Positions the cursor just past the last published record of today.
    pub fn set_end_index_today(&mut self) -> Result<()> {
        let end = self.get_end_index_today()?;
        self.set_index(end)
    }

    /// Follows to the latest cycle and positions past its last record.
    pub fn set_end(&mut self) -> Result<()> {
        while self.state.try_next_date()? {}
        self.set_end_index_today()
    }

    /// Advances past the next record and returns its global index.
    pub fn next_index(&mut self) -> Result<u64> {
        self.next_position()?;
        self.state.get_index()
    }

    /// Yields the next published record.
    ///
    /// Blocks according to the configured polling policy; with no polling
    /// interval an exhausted journal returns `NoData`.
    pub fn next_record(&mut self) -> Result<Record> {
        let slot = self.next_position()?;
        let map = self.state.data_map(slot.filenum, slot.thread)?;
        Ok(Record::new(map, slot.pos))
    }

    fn try_select(&mut self, date: Option<NaiveDate>) -> Result<()> {
        match self.state.try_set_cycle_dir(date) {
            Ok(()) => Ok(()),
            Err(Error::NoChronicleForDate(_)) => Err(Error::NoData),
            Err(e) => Err(e),
        }
    }

    fn next_position(&mut self) -> Result<Slot> {
        loop {
            // A start date with no cycle on disk yet reads as "nothing
            // published": the polling policy below decides whether to wait.
            match self.state.try_next_position() {
                Ok(Some(slot)) => return Ok(slot),
                Ok(None) | Err(Error::NoChronicleForDate(_)) => {}
                Err(e) => return Err(e),
            }
            // Exhausted today's slots: follow the day cycle first, then fall
            // back to the polling policy.
            let today = self.state.clock.today();
            if self.state.date != Some(today) {
                match self.state.try_next_date() {
                    Ok(true) => continue,
                    Ok(false) | Err(Error::NoChronicleForDate(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            match self.polling_interval {
                None => return Err(Error::NoData),
                Some(interval) if interval.is_zero() => {}
                Some(interval) => std::thread::sleep(interval),
            }
        }
    }
}
