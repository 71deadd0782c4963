use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use time::PrimitiveDateTime;

use crate::consts;
use crate::datetime::{datetime_to_bits, now_utc};
use crate::string::{
    needs_utf_flag, validate_string, write_null_terminated_string,
};

/// Describes a file to be added to a cabinet set.
#[derive(Clone, Debug)]
pub struct FileEntry {
    name: String,
    attributes: u16,
    datetime: PrimitiveDateTime,
}

impl FileEntry {
    /// Creates an entry with the given name within the cabinet.  The name is
    /// stored as UTF-8 and flagged as such when it is not plain ASCII.
    pub fn new<S: Into<String>>(name: S) -> FileEntry {
        let name = name.into();
        let mut entry = FileEntry {
            attributes: consts::ATTR_ARCH,
            datetime: now_utc(),
            name,
        };
        let is_utf = needs_utf_flag(&entry.name);
        entry.set_attribute(consts::ATTR_NAME_IS_UTF, is_utf);
        entry
    }

    /// Returns the name of the file within the cabinet.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the raw CFFILE attribute bits.
    pub fn attributes(&self) -> u16 {
        self.attributes
    }

    /// Returns the datetime that will be recorded for this file.
    pub fn datetime(&self) -> PrimitiveDateTime {
        self.datetime
    }

    /// Sets the datetime for this file.  According to the MS-CAB
    /// documentation, this "is typically considered the 'last modified' time
    /// in local time, but the actual definition is application-defined".
    ///
    /// The CAB file format only supports storing datetimes with years from
    /// 1980 to 2107 (inclusive), with a resolution of two seconds.  If the
    /// given datetime is outside this range/resolution, it will be
    /// clamped/rounded to the nearest legal value.
    ///
    /// By default, the datetime of a new `FileEntry` is the current UTC
    /// date/time.
    pub fn set_datetime(&mut self, datetime: PrimitiveDateTime) {
        self.datetime = datetime;
    }

    /// Sets whether this file has the "read-only" attribute set.  This
    /// attribute is false by default.
    pub fn set_is_read_only(&mut self, is_read_only: bool) {
        self.set_attribute(consts::ATTR_READ_ONLY, is_read_only);
    }

    /// Sets whether this file has the "hidden" attribute set.  This attribute
    /// is false by default.
    pub fn set_is_hidden(&mut self, is_hidden: bool) {
        self.set_attribute(consts::ATTR_HIDDEN, is_hidden);
    }

    /// Sets whether this file has the "system file" attribute set.  This
    /// attribute is false by default.
    pub fn set_is_system(&mut self, is_system_file: bool) {
        self.set_attribute(consts::ATTR_SYSTEM, is_system_file);
    }

    /// Sets whether this file has the "archive" (modified since last backup)
    /// attribute set.  This attribute is true by default.
    pub fn set_is_archive(&mut self, is_archive: bool) {
        self.set_attribute(consts::ATTR_ARCH, is_archive);
    }

    /// Sets whether this file has the "execute after extraction" attribute
    /// set.  This attribute is false by default.
    pub fn set_is_exec(&mut self, is_exec: bool) {
        self.set_attribute(consts::ATTR_EXEC, is_exec);
    }

    fn set_attribute(&mut self, bit: u16, enable: bool) {
        if enable {
            self.attributes |= bit;
        } else {
            self.attributes &= !bit;
        }
    }
}

/// A CFFILE record waiting to be written into a cabinet unit.
#[derive(Clone)]
pub(crate) struct FileRecord {
    id: u64,
    name: String,
    attributes: u16,
    date: u16,
    time: u16,
    uncompressed_size: Option<u32>,
    offset_within_folder: u32,
}

impl FileRecord {
    pub fn new(
        id: u64,
        entry: FileEntry,
        offset_within_folder: u32,
    ) -> io::Result<FileRecord> {
        validate_string(&entry.name, "File name")?;
        let (date, time) = datetime_to_bits(entry.datetime);
        Ok(FileRecord {
            id,
            name: entry.name,
            attributes: entry.attributes,
            date,
            time,
            uncompressed_size: None, // known once the data has been read
            offset_within_folder,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offset_within_folder(&self) -> u32 {
        self.offset_within_folder
    }

    #[cfg(test)]
    pub fn uncompressed_size(&self) -> Option<u32> {
        self.uncompressed_size
    }

    pub fn set_uncompressed_size(&mut self, size: u32) {
        self.uncompressed_size = Some(size);
    }

    /// Whether the file's data has been read to the end.
    pub fn is_complete(&self) -> bool {
        self.uncompressed_size.is_some()
    }

    /// One past the last folder offset holding this file's data, as far as
    /// it has been read.
    pub fn end_within_folder(&self) -> u64 {
        self.offset_within_folder as u64
            + self.uncompressed_size.unwrap_or(0) as u64
    }

    pub fn serialized_size(&self) -> u32 {
        consts::FILE_ENTRY_FIXED_SIZE + self.name.len() as u32 + 1
    }

    pub fn write_to<W: Write>(
        &self,
        writer: &mut W,
        folder_index: u16,
    ) -> io::Result<()> {
        debug_assert!(self.is_complete(), "{} written unfinished", self.name);
        writer.write_u32::<LittleEndian>(self.uncompressed_size.unwrap_or(0))?;
        writer.write_u32::<LittleEndian>(self.offset_within_folder)?;
        writer.write_u16::<LittleEndian>(folder_index)?;
        writer.write_u16::<LittleEndian>(self.date)?;
        writer.write_u16::<LittleEndian>(self.time)?;
        writer.write_u16::<LittleEndian>(self.attributes)?;
        write_null_terminated_string(writer, &self.name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::{FileEntry, FileRecord};

    #[test]
    fn default_attributes() {
        let entry = FileEntry::new("hi.txt");
        assert_eq!(entry.attributes(), 0x20);
        let entry = FileEntry::new("\u{2603}.txt");
        assert_eq!(entry.attributes(), 0xa0);
    }

    #[test]
    fn attribute_setters() {
        let mut entry = FileEntry::new("hi.txt");
        entry.set_is_read_only(true);
        entry.set_is_hidden(true);
        entry.set_is_system(true);
        entry.set_is_exec(true);
        entry.set_is_archive(false);
        assert_eq!(entry.attributes(), 0x47);
    }

    #[test]
    fn write_file_record() {
        let mut entry = FileEntry::new("hi.txt");
        entry.set_datetime(datetime!(1997-03-12 11:13:52));
        let mut record = FileRecord::new(0, entry, 5).unwrap();
        assert!(!record.is_complete());
        record.set_uncompressed_size(14);
        assert!(record.is_complete());
        assert_eq!(record.serialized_size(), 23);
        assert_eq!(record.end_within_folder(), 19);
        let mut out = Vec::new();
        record.write_to(&mut out, 0xfffe).unwrap();
        assert_eq!(
            out.as_slice(),
            b"\x0e\0\0\0\x05\0\0\0\xfe\xff\x6c\x22\xba\x59\x20\0hi.txt\0"
                as &[u8]
        );
    }

    #[test]
    fn reject_long_name() {
        let entry = FileEntry::new("n".repeat(256));
        assert!(FileRecord::new(0, entry, 0).is_err());
    }
}
