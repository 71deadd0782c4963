use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::block::DataBlock;
use crate::consts;
use crate::ctype::CompressionType;
use crate::file::FileRecord;
use crate::string::write_null_terminated_string;

/// Where CFDATA records wait until their unit is written out.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScratchMode {
    /// An anonymous temporary file, removed automatically.
    TempFile,
    /// A buffer in memory.
    Memory,
}

enum ScratchStore {
    Memory(Vec<u8>),
    Disk(BufWriter<File>),
}

/// The CFDATA records of every unit not yet written, back to back.  Units
/// are written in order, so one store serves the whole set.
pub(crate) struct Scratch {
    store: ScratchStore,
    len: u64,
}

impl Scratch {
    pub fn new(mode: ScratchMode) -> io::Result<Scratch> {
        let store = match mode {
            ScratchMode::TempFile => {
                ScratchStore::Disk(BufWriter::new(tempfile::tempfile()?))
            }
            ScratchMode::Memory => ScratchStore::Memory(Vec::new()),
        };
        Ok(Scratch { store, len: 0 })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    fn append(&mut self, block: &DataBlock) -> io::Result<()> {
        match self.store {
            ScratchStore::Memory(ref mut buffer) => block.write_to(buffer)?,
            ScratchStore::Disk(ref mut writer) => block.write_to(writer)?,
        }
        self.len += block.serialized_size();
        Ok(())
    }

    fn copy_range<W: Write>(
        &mut self,
        start: u64,
        len: u64,
        writer: &mut W,
    ) -> io::Result<()> {
        debug_assert!(start + len <= self.len);
        match self.store {
            ScratchStore::Memory(ref buffer) => {
                let range = start as usize..(start + len) as usize;
                writer.write_all(&buffer[range])?;
            }
            ScratchStore::Disk(ref mut buffered) => {
                buffered.flush()?;
                let file = buffered.get_mut();
                file.seek(SeekFrom::Start(start))?;
                let mut data = Read::take(&mut *file, len);
                let copied = io::copy(&mut data, writer)?;
                file.seek(SeekFrom::End(0))?;
                if copied != len {
                    invalid_data!(
                        "Scratch data ended early ({} of {} bytes)",
                        copied,
                        len
                    );
                }
            }
        }
        Ok(())
    }

    /// Drops everything stored so far.
    pub fn clear(&mut self) -> io::Result<()> {
        match self.store {
            ScratchStore::Memory(ref mut buffer) => buffer.clear(),
            ScratchStore::Disk(ref mut buffered) => {
                buffered.flush()?;
                let file = buffered.get_mut();
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
            }
        }
        self.len = 0;
        Ok(())
    }
}

/// The cabinet and disk names recorded for a unit, and in its neighbours'
/// prev/next links.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct UnitName {
    pub cabinet: String,
    pub disk: String,
}

impl UnitName {
    fn link_size(&self) -> u32 {
        (self.cabinet.len() + 1 + self.disk.len() + 1) as u32
    }

    fn write_link<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write_null_terminated_string(writer, &self.cabinet)?;
        write_null_terminated_string(writer, &self.disk)?;
        Ok(())
    }
}

/// Size of a CFHEADER with the given reserve data and links.
pub(crate) fn header_size(
    reserve_size: usize,
    prev: Option<&UnitName>,
    next: Option<&UnitName>,
) -> u32 {
    let mut size = consts::HEADER_FIXED_SIZE;
    if reserve_size > 0 {
        size += consts::HEADER_RESERVE_FIELDS_SIZE + reserve_size as u32;
    }
    size += prev.map_or(0, UnitName::link_size);
    size += next.map_or(0, UnitName::link_size);
    size
}

/// The part of a folder whose data blocks live in one unit.
struct FolderRecord {
    compression_type: CompressionType,
    num_data_blocks: u16,
    data_size: u64,
    continued_from_prev: bool,
    stream_start: u64,
}

struct UnitFile {
    record: FileRecord,
    folder_index: usize,
    // A copy of a record from the previous unit.
    from_prev: bool,
    // Carries the folder on into the next unit.
    to_next: bool,
}

/// Plan of one physical cabinet unit: its CFFOLDER and CFFILE records, plus
/// the place of its CFDATA records in the set's [`Scratch`].
pub(crate) struct CabinetUnit {
    index: u16,
    name: UnitName,
    prev: Option<UnitName>,
    planned_header_size: u32,
    folders: Vec<FolderRecord>,
    files: Vec<UnitFile>,
    file_records_size: u64,
    data_start: u64,
    data_size: u64,
}

impl CabinetUnit {
    /// `planned_header_size` is the header size assumed while filling the
    /// unit; serialization recomputes it from the actual links.
    pub fn new(
        index: u16,
        name: UnitName,
        prev: Option<UnitName>,
        planned_header_size: u32,
    ) -> CabinetUnit {
        CabinetUnit {
            index,
            name,
            prev,
            planned_header_size,
            folders: Vec::new(),
            files: Vec::new(),
            file_records_size: 0,
            data_start: 0,
            data_size: 0,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn name(&self) -> &UnitName {
        &self.name
    }

    pub fn num_folders(&self) -> usize {
        self.folders.len()
    }

    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn has_data(&self) -> bool {
        self.data_size > 0
    }

    /// Whether every file record has its final size.
    pub fn is_complete(&self) -> bool {
        self.files.iter().all(|file| file.record.is_complete())
    }

    /// Size of the unit if it were serialized with its planned header.
    pub fn planned_size(&self) -> u64 {
        self.planned_header_size as u64
            + self.folders.len() as u64 * consts::FOLDER_ENTRY_SIZE as u64
            + self.file_records_size
            + self.data_size
    }

    /// Starts this unit's part of a folder.  `stream_start` is the offset in
    /// the folder's uncompressed stream where that part begins.
    pub fn open_folder(
        &mut self,
        compression_type: CompressionType,
        stream_start: u64,
        continued_from_prev: bool,
    ) -> io::Result<()> {
        if self.folders.len() >= consts::MAX_NUM_FOLDERS {
            invalid_data!(
                "Cabinet {} has too many folders (max is {})",
                self.name.cabinet,
                consts::MAX_NUM_FOLDERS
            );
        }
        assert!(
            !continued_from_prev || self.folders.is_empty(),
            "only the first folder of a unit can be continued"
        );
        self.folders.push(FolderRecord {
            compression_type,
            num_data_blocks: 0,
            data_size: 0,
            continued_from_prev,
            stream_start,
        });
        Ok(())
    }

    /// Marks the last folder as continuing into the following unit.
    ///
    /// Readers only see the continuation through the iFolder fields, so the
    /// record of the file reaching furthest into the folder's stream is
    /// marked as carrying on, and a copy is returned for the next unit.  This
    /// is the file holding the part's last byte, unless that byte belongs to
    /// a withdrawn file.  Returns `None` when the part records no file.
    pub fn continue_in_next(&mut self) -> Option<FileRecord> {
        let folder_index = match self.folders.len().checked_sub(1) {
            Some(index) => index,
            None => panic!("no folder to continue"),
        };
        let carrier = self
            .files
            .iter_mut()
            .filter(|file| file.folder_index == folder_index)
            .max_by_key(|file| {
                (!file.record.is_complete(), file.record.end_within_folder())
            })?;
        carrier.to_next = true;
        Some(carrier.record.clone())
    }

    /// Appends a data block to the last folder.
    pub fn push_block(
        &mut self,
        block: &DataBlock,
        scratch: &mut Scratch,
    ) -> io::Result<()> {
        let folder = match self.folders.last_mut() {
            Some(folder) => folder,
            None => panic!("data block placed before its folder"),
        };
        if folder.num_data_blocks as usize >= consts::MAX_NUM_DATA_BLOCKS {
            invalid_data!(
                "Folder in cabinet {} has too many data blocks (max is {})",
                self.name.cabinet,
                consts::MAX_NUM_DATA_BLOCKS
            );
        }
        if self.data_size == 0 {
            self.data_start = scratch.len();
        }
        debug_assert_eq!(self.data_start + self.data_size, scratch.len());
        scratch.append(block)?;
        folder.num_data_blocks += 1;
        folder.data_size += block.serialized_size();
        self.data_size += block.serialized_size();
        Ok(())
    }

    /// Records a file in the last folder.
    pub fn push_file(&mut self, record: FileRecord) -> io::Result<()> {
        self.add_file(record, false)
    }

    /// Records a file carried over from the previous unit.  It must come
    /// before any other record of the continued folder.
    pub fn push_continued_file(
        &mut self,
        record: FileRecord,
    ) -> io::Result<()> {
        match self.folders.first() {
            Some(folder) if folder.continued_from_prev => {
                let offset = record.offset_within_folder() as u64;
                debug_assert!(offset < folder.stream_start);
            }
            _ => panic!("carried file placed outside a continued folder"),
        }
        assert!(self.files.is_empty(), "carried file placed after others");
        self.add_file(record, true)
    }

    fn add_file(
        &mut self,
        record: FileRecord,
        from_prev: bool,
    ) -> io::Result<()> {
        assert!(!self.folders.is_empty(), "file placed before its folder");
        if self.files.len() >= consts::MAX_NUM_FILES {
            invalid_data!(
                "Cabinet {} has too many files (max is {})",
                self.name.cabinet,
                consts::MAX_NUM_FILES
            );
        }
        self.file_records_size += record.serialized_size() as u64;
        self.files.push(UnitFile {
            record,
            folder_index: self.folders.len() - 1,
            from_prev,
            to_next: false,
        });
        Ok(())
    }

    pub fn file_mut(&mut self, id: u64) -> Option<&mut FileRecord> {
        self.files
            .iter_mut()
            .rev()
            .map(|file| &mut file.record)
            .find(|record| record.id() == id)
    }

    /// Drops the record of file `id`, if present.  A dropped copy from the
    /// previous unit gives way to `replacement`, the record now carrying the
    /// folder there.  Returns the record now carrying the folder into the
    /// next unit when the dropped one did.
    pub fn withdraw_file(
        &mut self,
        id: u64,
        replacement: Option<FileRecord>,
    ) -> Option<FileRecord> {
        let index =
            self.files.iter().position(|file| file.record.id() == id)?;
        let file = self.files.remove(index);
        self.file_records_size -= file.record.serialized_size() as u64;
        if let (true, Some(record)) = (file.from_prev, replacement) {
            self.file_records_size += record.serialized_size() as u64;
            let carried = UnitFile {
                record,
                folder_index: 0,
                from_prev: true,
                to_next: false,
            };
            self.files.insert(0, carried);
        }
        if file.to_next {
            self.continue_in_next()
        } else {
            None
        }
    }

    fn folder_index_field(&self, file: &UnitFile) -> u16 {
        match (file.from_prev, file.to_next) {
            (false, false) => file.folder_index as u16,
            (true, false) => consts::IFOLD_CONTINUED_FROM_PREV,
            (false, true) => consts::IFOLD_CONTINUED_TO_NEXT,
            (true, true) => consts::IFOLD_CONTINUED_PREV_AND_NEXT,
        }
    }

    /// Serializes the unit, copying its data blocks out of `scratch`, and
    /// returns the number of bytes written.
    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
        scratch: &mut Scratch,
        set_id: u16,
        reserve_data: &[u8],
        next: Option<&UnitName>,
    ) -> io::Result<u64> {
        let prev = self.prev.as_ref();
        let header_size = header_size(reserve_data.len(), prev, next);
        let first_file_offset = header_size as u64
            + self.folders.len() as u64 * consts::FOLDER_ENTRY_SIZE as u64;
        let first_data_offset = first_file_offset + self.file_records_size;
        let total_size = first_data_offset + self.data_size;
        if total_size > consts::MAX_TOTAL_CAB_SIZE as u64 {
            invalid_data!(
                "Cabinet {} is too large ({} bytes; max is {} bytes)",
                self.name.cabinet,
                total_size,
                consts::MAX_TOTAL_CAB_SIZE
            );
        }
        assert!(self.folders.len() <= consts::MAX_NUM_FOLDERS);
        assert!(self.files.len() <= consts::MAX_NUM_FILES);

        let mut flags: u16 = 0;
        if prev.is_some() {
            flags |= consts::FLAG_PREV_CABINET;
        }
        if next.is_some() {
            flags |= consts::FLAG_NEXT_CABINET;
        }
        if !reserve_data.is_empty() {
            flags |= consts::FLAG_RESERVE_PRESENT;
        }

        // Write cabinet header:
        writer.write_u32::<LittleEndian>(consts::FILE_SIGNATURE)?;
        writer.write_u32::<LittleEndian>(0)?; // reserved1
        writer.write_u32::<LittleEndian>(total_size as u32)?;
        writer.write_u32::<LittleEndian>(0)?; // reserved2
        writer.write_u32::<LittleEndian>(first_file_offset as u32)?;
        writer.write_u32::<LittleEndian>(0)?; // reserved3
        writer.write_u8(consts::VERSION_MINOR)?;
        writer.write_u8(consts::VERSION_MAJOR)?;
        writer.write_u16::<LittleEndian>(self.folders.len() as u16)?;
        writer.write_u16::<LittleEndian>(self.files.len() as u16)?;
        writer.write_u16::<LittleEndian>(flags)?;
        writer.write_u16::<LittleEndian>(set_id)?;
        writer.write_u16::<LittleEndian>(self.index)?;
        if !reserve_data.is_empty() {
            writer.write_u16::<LittleEndian>(reserve_data.len() as u16)?;
            writer.write_u8(0)?; // folder reserve size
            writer.write_u8(0)?; // data reserve size
            writer.write_all(reserve_data)?;
        }
        if let Some(prev) = prev {
            prev.write_link(writer)?;
        }
        if let Some(next) = next {
            next.write_link(writer)?;
        }

        // Write structs for folders:
        let mut data_offset = first_data_offset;
        for folder in self.folders.iter() {
            writer.write_u32::<LittleEndian>(data_offset as u32)?;
            writer.write_u16::<LittleEndian>(folder.num_data_blocks)?;
            let bitfield = folder.compression_type.to_bitfield();
            writer.write_u16::<LittleEndian>(bitfield)?;
            data_offset += folder.data_size;
        }
        debug_assert_eq!(data_offset, total_size);

        // Write structs for files:
        for file in self.files.iter() {
            let folder_index = self.folder_index_field(file);
            file.record.write_to(writer, folder_index)?;
        }

        // Write data blocks:
        if self.data_size > 0 {
            scratch.copy_range(self.data_start, self.data_size, writer)?;
        }
        Ok(total_size)
    }
}
