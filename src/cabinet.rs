use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::time::Instant;

use log::{debug, info, warn};
use rand::Rng;

use crate::block::DataBlock;
use crate::consts;
use crate::ctype::CompressionType;
use crate::file::{FileEntry, FileRecord};
use crate::folder::FolderAccumulator;
use crate::output::UnitOutput;
use crate::stats::Statistics;
use crate::string::validate_string;
use crate::unit::{header_size, CabinetUnit, Scratch, ScratchMode, UnitName};

/// Configures and creates a [`CabinetSet`].
///
/// # Example
///
/// ```no_run
/// use cabset::{CabinetSetBuilder, CompressionType, FileEntry, MemoryOutput};
///
/// let mut builder = CabinetSetBuilder::new("disk#.cab");
/// builder.set_max_unit_size(1_440_000).set_disk_label("Disk #");
/// let mut set = builder.build(MemoryOutput::new())?;
/// set.add_folder(CompressionType::MsZip(9))?;
/// set.add_file(FileEntry::new("hi.txt"), "Hello, world!\n".as_bytes())?;
/// let (output, _stats) = set.finish()?;
/// println!("{} unit(s)", output.units().len());
/// # Ok::<(), std::io::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct CabinetSetBuilder {
    name_template: String,
    disk_label_template: String,
    max_unit_size: u32,
    set_id: Option<u16>,
    first_disk: u32,
    reserve_data: Vec<u8>,
    compression_type: CompressionType,
    scratch_mode: ScratchMode,
}

impl CabinetSetBuilder {
    /// Creates a builder for a set whose units are named after
    /// `name_template`, with each `#` replaced by the unit's disk number.
    pub fn new<S: Into<String>>(name_template: S) -> CabinetSetBuilder {
        CabinetSetBuilder {
            name_template: name_template.into(),
            disk_label_template: String::new(),
            max_unit_size: 0,
            set_id: None,
            first_disk: 1,
            reserve_data: Vec::new(),
            compression_type: CompressionType::mszip(),
            scratch_mode: ScratchMode::TempFile,
        }
    }

    /// Sets the user-friendly disk label recorded in the prev/next links of
    /// neighbouring units.  `#` is replaced by the disk number.  Empty by
    /// default.
    pub fn set_disk_label<S: Into<String>>(
        &mut self,
        template: S,
    ) -> &mut CabinetSetBuilder {
        self.disk_label_template = template.into();
        self
    }

    /// Sets the size ceiling of each unit, in bytes.  Zero (the default)
    /// means a single unit of unbounded size; any other value must be at
    /// least 50,000 bytes and requires a `#` in the name template.
    pub fn set_max_unit_size(
        &mut self,
        max_unit_size: u32,
    ) -> &mut CabinetSetBuilder {
        self.max_unit_size = max_unit_size;
        self
    }

    /// Sets the ID shared by all units of the set.  A random ID is chosen by
    /// default.
    pub fn set_set_id(&mut self, set_id: u16) -> &mut CabinetSetBuilder {
        self.set_id = Some(set_id);
        self
    }

    /// Sets the disk number substituted for `#` in the first unit's name.
    /// The default is 1.  The cabinet index stored in each header always
    /// starts at 0.
    pub fn set_first_disk_number(
        &mut self,
        disk: u32,
    ) -> &mut CabinetSetBuilder {
        self.first_disk = disk;
        self
    }

    /// Sets the reserve data stored in each unit's header.  At most 60,000
    /// bytes are allowed.
    pub fn set_reserve_data(
        &mut self,
        data: Vec<u8>,
    ) -> &mut CabinetSetBuilder {
        self.reserve_data = data;
        self
    }

    /// Sets the compression used for files added before any explicit
    /// [`CabinetSet::add_folder`] call.  MS-ZIP at level 6 by default.
    pub fn set_compression_type(
        &mut self,
        compression_type: CompressionType,
    ) -> &mut CabinetSetBuilder {
        self.compression_type = compression_type;
        self
    }

    /// Sets where data blocks are kept until their unit is written out.  One
    /// anonymous temporary file by default.
    pub fn set_scratch_mode(
        &mut self,
        mode: ScratchMode,
    ) -> &mut CabinetSetBuilder {
        self.scratch_mode = mode;
        self
    }

    /// Validates the configuration and starts a cabinet set that writes its
    /// units to `output`.
    pub fn build<O: UnitOutput>(
        &self,
        output: O,
    ) -> io::Result<CabinetSet<O>> {
        if self.name_template.is_empty() {
            invalid_input!("Cabinet name must not be empty");
        }
        if self.name_template.contains(&['/', '\\'][..]) {
            invalid_input!(
                "Cabinet name must be a bare file name: {:?}",
                self.name_template
            );
        }
        if self.max_unit_size != 0 {
            if self.max_unit_size < consts::MIN_UNIT_SIZE {
                invalid_input!(
                    "Cabinet unit size is too small \
                     ({} bytes; min is {} bytes)",
                    self.max_unit_size,
                    consts::MIN_UNIT_SIZE
                );
            }
            if !self.name_template.contains('#') {
                invalid_input!(
                    "Cabinet name needs a '#' to number the units of a \
                     set: {:?}",
                    self.name_template
                );
            }
        }
        if self.reserve_data.len() > consts::MAX_HEADER_RESERVE_SIZE {
            invalid_input!(
                "Cabinet header reserve data is too large \
                 ({} bytes; max is {} bytes)",
                self.reserve_data.len(),
                consts::MAX_HEADER_RESERVE_SIZE
            );
        }
        let compression_type = self.compression_type.validate()?;

        let set_id = match self.set_id {
            Some(set_id) => set_id,
            None => rand::thread_rng().gen_range(1..=u16::MAX),
        };
        let options = SetOptions {
            name_template: self.name_template.clone(),
            disk_label_template: self.disk_label_template.clone(),
            max_unit_size: self.max_unit_size,
            set_id,
            first_disk: self.first_disk,
            reserve_data: self.reserve_data.clone(),
            scratch_mode: self.scratch_mode,
        };
        let first = options.unit_name(0);
        let second = options.unit_name(1);
        for name in [&first, &second] {
            validate_string(&name.cabinet, "Cabinet name")?;
            validate_string(&name.disk, "Disk label")?;
        }
        if options.spans() {
            let smallest_unit = header_size(
                options.reserve_data.len(),
                Some(&first),
                Some(&second),
            ) as u64
                + consts::FOLDER_ENTRY_SIZE as u64
                + consts::FILE_ENTRY_FIXED_SIZE as u64
                + consts::MAX_STRING_SIZE as u64
                + 1
                + consts::DATA_BLOCK_HEADER_SIZE as u64
                + consts::MAX_COMPRESSED_BLOCK_SIZE as u64;
            if (options.max_unit_size as u64) < smallest_unit {
                invalid_input!(
                    "Cabinet unit size of {} bytes cannot hold a header, \
                     a carried file record and a data block ({} bytes)",
                    options.max_unit_size,
                    smallest_unit
                );
            }
        }

        debug!(
            "Starting cabinet set {:?} (set ID {}, max unit size {})",
            options.name_template, set_id, options.max_unit_size
        );
        let scratch = Scratch::new(options.scratch_mode)?;
        Ok(CabinetSet {
            planner: UnitPlanner {
                options,
                output,
                scratch,
                units: VecDeque::new(),
                units_started: 0,
                bytes_written: 0,
                cabinets_written: 0,
                failed: false,
            },
            default_compression: compression_type,
            folder: None,
            next_file_id: 0,
            stats: Statistics::default(),
            started: Instant::now(),
        })
    }
}

struct SetOptions {
    name_template: String,
    disk_label_template: String,
    max_unit_size: u32,
    set_id: u16,
    first_disk: u32,
    reserve_data: Vec<u8>,
    scratch_mode: ScratchMode,
}

impl SetOptions {
    fn spans(&self) -> bool {
        self.max_unit_size != 0
    }

    fn unit_name(&self, index: usize) -> UnitName {
        let disk = (self.first_disk as u64 + index as u64).to_string();
        UnitName {
            cabinet: self.name_template.replace('#', &disk),
            disk: self.disk_label_template.replace('#', &disk),
        }
    }
}

/// The folder currently accepting bytes.
struct ActiveFolder {
    accumulator: FolderAccumulator,
    // Whether the newest unit already holds a record for this folder.
    in_unit: bool,
    // Whether an earlier unit holds part of this folder.
    spanned: bool,
}

impl ActiveFolder {
    fn new(compression_type: CompressionType) -> io::Result<ActiveFolder> {
        Ok(ActiveFolder {
            accumulator: FolderAccumulator::new(compression_type)?,
            in_unit: false,
            spanned: false,
        })
    }
}

/// Decides which unit each data block and record goes to, and writes each
/// unit out once nothing can change it any more.
struct UnitPlanner<O: UnitOutput> {
    options: SetOptions,
    output: O,
    scratch: Scratch,
    // Units not yet written, oldest first.  The last one is being filled.
    units: VecDeque<CabinetUnit>,
    units_started: usize,
    bytes_written: u64,
    cabinets_written: u64,
    // Set once a unit or data block may have been lost.
    failed: bool,
}

impl<O: UnitOutput> UnitPlanner<O> {
    fn check_usable(&self) -> io::Result<()> {
        if self.failed {
            invalid_data!("Cabinet set cannot continue after a write error");
        }
        Ok(())
    }

    fn note_failure<T>(&mut self, result: io::Result<T>) -> io::Result<T> {
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn new_unit(&self, index: usize) -> io::Result<CabinetUnit> {
        if index > u16::MAX as usize {
            invalid_data!(
                "Cabinet set has too many units (max is {})",
                u16::MAX as usize + 1
            );
        }
        let name = self.options.unit_name(index);
        validate_string(&name.cabinet, "Cabinet name")?;
        validate_string(&name.disk, "Disk label")?;
        let prev = index.checked_sub(1).map(|i| self.options.unit_name(i));
        let next = if self.options.spans() {
            Some(self.options.unit_name(index + 1))
        } else {
            None
        };
        let planned_header_size = header_size(
            self.options.reserve_data.len(),
            prev.as_ref(),
            next.as_ref(),
        );
        Ok(CabinetUnit::new(index as u16, name, prev, planned_header_size))
    }

    /// Appends a prefix of `data` to the folder's stream, placing the data
    /// block completed along the way.  Returns how many bytes were taken.
    fn feed(
        &mut self,
        folder: &mut ActiveFolder,
        data: &[u8],
    ) -> io::Result<usize> {
        let result = self.frame_and_place(folder, data);
        self.note_failure(result)
    }

    fn frame_and_place(
        &mut self,
        folder: &mut ActiveFolder,
        data: &[u8],
    ) -> io::Result<usize> {
        let (taken, block) = folder.accumulator.write(data)?;
        if let Some(block) = block {
            let framed_len = folder.accumulator.framed_len();
            let files =
                folder.accumulator.take_files_starting_before(framed_len);
            self.place(folder, Some(block), files)?;
        }
        Ok(taken)
    }

    /// Frames the rest of the folder and places its last data block along
    /// with every remaining record, trailing empty files included.
    fn seal(&mut self, folder: &mut ActiveFolder) -> io::Result<()> {
        let result = self.seal_and_place(folder);
        self.note_failure(result)
    }

    fn seal_and_place(&mut self, folder: &mut ActiveFolder) -> io::Result<()> {
        let block = folder.accumulator.finish()?;
        let files = folder.accumulator.take_remaining_files();
        if block.is_some() || !files.is_empty() {
            self.place(folder, block, files)?;
        }
        Ok(())
    }

    /// Places a data block of `folder` (if any) and `files` in the current
    /// unit, rolling over to a new unit first when they would not fit.
    fn place(
        &mut self,
        folder: &mut ActiveFolder,
        block: Option<DataBlock>,
        files: Vec<FileRecord>,
    ) -> io::Result<()> {
        let framed_len = folder.accumulator.framed_len();
        let stream_start = match block {
            Some(ref block) => framed_len - block.uncompressed_size() as u64,
            None => framed_len,
        };
        let mut needed: u64 =
            files.iter().map(|file| file.serialized_size() as u64).sum();
        if let Some(ref block) = block {
            needed += block.serialized_size();
        }
        if !folder.in_unit {
            needed += consts::FOLDER_ENTRY_SIZE as u64;
        }

        let mut carried = None;
        if self.units.is_empty() {
            let unit = self.new_unit(self.units_started)?;
            self.units.push_back(unit);
            self.units_started += 1;
        } else if self.options.spans() {
            let ceiling = self.options.max_unit_size as u64;
            let unit = self.current_unit();
            if !unit.is_empty() && unit.planned_size() + needed > ceiling {
                carried = self.roll_over(folder)?;
            }
        }

        let compression_type = folder.accumulator.compression_type();
        let UnitPlanner { ref mut units, ref mut scratch, .. } = *self;
        let unit = match units.back_mut() {
            Some(unit) => unit,
            None => panic!("no open cabinet unit"),
        };
        if !folder.in_unit {
            unit.open_folder(compression_type, stream_start, folder.spanned)?;
            folder.in_unit = true;
            if let Some(record) = carried {
                debug!(
                    "Carried {} over to {}",
                    record.name(),
                    unit.name().cabinet
                );
                unit.push_continued_file(record)?;
            }
        }
        if let Some(ref block) = block {
            unit.push_block(block, scratch)?;
            debug!(
                "Placed data block in {}: {} -> {} bytes, checksum {:08x}",
                unit.name().cabinet,
                block.uncompressed_size(),
                block.compressed_size(),
                block.checksum()
            );
        }
        for file in files {
            debug!("Recorded {} in {}", file.name(), unit.name().cabinet);
            unit.push_file(file)?;
        }
        if unit.planned_size() > consts::MAX_TOTAL_CAB_SIZE as u64 {
            invalid_data!(
                "Cabinet {} is too large ({} bytes; max is {} bytes)",
                unit.name().cabinet,
                unit.planned_size(),
                consts::MAX_TOTAL_CAB_SIZE
            );
        }
        Ok(())
    }

    /// Starts the next unit.  Returns the file record the next unit must
    /// carry when `folder` continues into it.
    fn roll_over(
        &mut self,
        folder: &mut ActiveFolder,
    ) -> io::Result<Option<FileRecord>> {
        let index = self.units_started;
        let unit = self.current_unit();
        let carried = if folder.in_unit {
            folder.in_unit = false;
            folder.spanned = true;
            unit.continue_in_next()
        } else {
            None
        };
        debug!(
            "Cabinet {} is full at {} bytes; rolling over to unit {}",
            unit.name().cabinet,
            unit.planned_size(),
            index
        );
        let unit = self.new_unit(index)?;
        self.units.push_back(unit);
        self.units_started += 1;
        self.write_finished_units()?;
        Ok(carried)
    }

    fn current_unit(&mut self) -> &mut CabinetUnit {
        match self.units.back_mut() {
            Some(unit) => unit,
            None => panic!("no open cabinet unit"),
        }
    }

    /// Sets the size of every record of file `id`, then writes out the units
    /// that were only waiting for it.
    fn complete_file(&mut self, id: u64, size: u32) -> io::Result<()> {
        let mut found = false;
        for unit in self.units.iter_mut() {
            if let Some(record) = unit.file_mut(id) {
                record.set_uncompressed_size(size);
                found = true;
            }
        }
        assert!(found, "record of file {} was lost", id);
        let result = self.write_finished_units();
        self.note_failure(result)
    }

    /// Drops every record of file `id`.  Where it carried a folder across
    /// units, the next best record of the folder takes over.
    fn withdraw_file(&mut self, id: u64) -> io::Result<()> {
        let mut carried = None;
        for unit in self.units.iter_mut() {
            carried = unit.withdraw_file(id, carried);
        }
        if self.failed {
            return Ok(());
        }
        let result = self.write_finished_units();
        self.note_failure(result)
    }

    /// Writes out, in order, every unit before the one being filled whose
    /// records are all complete.
    fn write_finished_units(&mut self) -> io::Result<()> {
        while self.units.len() > 1 && self.units[0].is_complete() {
            let next = self.units[1].name().clone();
            if let Some(unit) = self.units.pop_front() {
                self.write_unit(unit, Some(&next))?;
            }
        }
        let only_current = self.units.len() == 1 && !self.units[0].has_data();
        if only_current && self.scratch.len() > 0 {
            self.scratch.clear()?;
        }
        Ok(())
    }

    /// Writes out every remaining unit; the last one gets no next link.
    fn write_all_units(&mut self) -> io::Result<()> {
        while let Some(unit) = self.units.pop_front() {
            debug_assert!(unit.is_complete());
            let next = self.units.front().map(|unit| unit.name().clone());
            self.write_unit(unit, next.as_ref())?;
        }
        Ok(())
    }

    fn write_unit(
        &mut self,
        unit: CabinetUnit,
        next: Option<&UnitName>,
    ) -> io::Result<()> {
        let planned_size = unit.planned_size();
        let size = {
            let mut writer = self.output.create_unit(&unit.name().cabinet)?;
            let size = unit.write_to(
                &mut writer,
                &mut self.scratch,
                self.options.set_id,
                &self.options.reserve_data,
                next,
            )?;
            writer.flush()?;
            size
        };
        assert!(size <= planned_size);
        self.bytes_written += size;
        self.cabinets_written += 1;
        info!(
            "Wrote cabinet {} (index {}): {} bytes, {} folder(s), {} file(s)",
            unit.name().cabinet,
            unit.index(),
            size,
            unit.num_folders(),
            unit.num_files()
        );
        Ok(())
    }
}

/// A cabinet set being written: one or more linked cabinet units.
///
/// Files are grouped into folders; each folder is compressed as one stream.
/// When a size ceiling is set, a new unit is started whenever the next data
/// block would not fit, and a folder straddling the boundary is continued in
/// the following unit.  A unit is written to the [`UnitOutput`] as soon as
/// the unit after it has started and the sizes of all its files are known;
/// the last unit is written by [`CabinetSet::finish`].
///
/// After an error writing a unit, the set refuses further work.
pub struct CabinetSet<O: UnitOutput> {
    planner: UnitPlanner<O>,
    default_compression: CompressionType,
    folder: Option<ActiveFolder>,
    next_file_id: u64,
    stats: Statistics,
    started: Instant,
}

impl<O: UnitOutput> CabinetSet<O> {
    /// Returns the ID shared by all units of this set.
    pub fn set_id(&self) -> u16 {
        self.planner.options.set_id
    }

    /// Returns the output, holding the units written so far.
    pub fn output(&self) -> &O {
        &self.planner.output
    }

    /// Returns the statistics gathered so far.
    pub fn stats(&self) -> Statistics {
        let mut stats = self.stats.clone();
        stats.bytes_written = self.planner.bytes_written;
        stats.cabinets_written = self.planner.cabinets_written;
        stats.elapsed = self.started.elapsed();
        stats
    }

    /// Seals the current folder and starts a new one.  Files added from now
    /// on are compressed with `compression_type`.
    pub fn add_folder(
        &mut self,
        compression_type: CompressionType,
    ) -> io::Result<()> {
        self.planner.check_usable()?;
        let folder = ActiveFolder::new(compression_type)?;
        self.seal_folder()?;
        self.folder = Some(folder);
        Ok(())
    }

    /// Adds a file to the current folder, reading its data from `reader`
    /// until end of file.  Returns an ID identifying the file in this set.
    ///
    /// If reading fails, the error is returned and no record of the file is
    /// written; the set stays usable for further files.
    pub fn add_file<R: Read>(
        &mut self,
        entry: FileEntry,
        mut reader: R,
    ) -> io::Result<u64> {
        self.planner.check_usable()?;
        let folder = match self.folder {
            Some(ref mut folder) => folder,
            None => {
                let folder = ActiveFolder::new(self.default_compression)?;
                self.folder.insert(folder)
            }
        };
        let id = self.next_file_id;
        let name = entry.name().to_string();
        if let Err(err) = folder.accumulator.begin_file(id, entry) {
            self.stats.files_skipped += 1;
            return Err(err);
        }
        self.next_file_id += 1;

        match stream_file(&mut self.planner, folder, &mut reader) {
            Ok(size) => {
                self.stats.bytes_read += size;
                self.stats.files_added += 1;
                debug!("Added {} ({} bytes)", name, size);
                match folder.accumulator.pending_file_mut(id) {
                    Some(record) => record.set_uncompressed_size(size as u32),
                    None => self.planner.complete_file(id, size as u32)?,
                }
                Ok(id)
            }
            Err(err) => {
                self.stats.files_skipped += 1;
                warn!("Skipping {}: {}", name, err);
                if !folder.accumulator.withdraw_file(id) {
                    self.planner.withdraw_file(id)?;
                }
                Err(err)
            }
        }
    }

    fn seal_folder(&mut self) -> io::Result<()> {
        let mut folder = match self.folder.take() {
            Some(folder) => folder,
            None => return Ok(()),
        };
        self.planner.seal(&mut folder)?;

        let stats = folder.accumulator.stats();
        if folder.in_unit || folder.spanned {
            self.stats.absorb_folder(stats);
            debug!(
                "Sealed {} folder: {} file(s), {} -> {} bytes \
                 in {} block(s), {:?}",
                folder.accumulator.compression_type(),
                stats.files,
                stats.uncompressed_bytes,
                stats.compressed_bytes,
                stats.data_blocks,
                stats.elapsed
            );
        } else {
            debug!("Dropped empty folder");
        }
        Ok(())
    }

    /// Seals the last folder and writes the units not yet written, in unit
    /// order.  If no file was ever added, nothing is written.  Returns the
    /// output along with the final statistics.
    pub fn finish(mut self) -> io::Result<(O, Statistics)> {
        self.planner.check_usable()?;
        self.seal_folder()?;
        if self.stats.files_added == 0 && self.planner.cabinets_written == 0 {
            debug!("No files were added; no cabinet written");
        } else {
            let result = self.planner.write_all_units();
            self.planner.note_failure(result)?;
        }
        let stats = self.stats();
        Ok((self.planner.output, stats))
    }
}

fn stream_file<O: UnitOutput, R: Read>(
    planner: &mut UnitPlanner<O>,
    folder: &mut ActiveFolder,
    reader: &mut R,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; consts::MAX_UNCOMPRESSED_BLOCK_SIZE];
    let mut total: u64 = 0;
    loop {
        let count = match reader.read(&mut buffer) {
            Ok(0) => return Ok(total),
            Ok(count) => count,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        total += count as u64;
        if total > consts::MAX_FILE_SIZE as u64 {
            invalid_data!(
                "File is too large (more than {} bytes)",
                consts::MAX_FILE_SIZE
            );
        }
        let mut data = &buffer[..count];
        while !data.is_empty() {
            let taken = planner.feed(folder, data)?;
            data = &data[taken..];
        }
    }
}
