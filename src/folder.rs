use std::io;
use std::time::Instant;

use crate::block::{BlockFramer, DataBlock};
use crate::ctype::CompressionType;
use crate::file::{FileEntry, FileRecord};
use crate::stats::FolderStats;

/// Collects the files of the active folder into one uncompressed stream and
/// hands it to a [`BlockFramer`].
///
/// File records stay pending here until the data block holding their first
/// byte has been framed, since that block decides which cabinet unit the
/// record belongs to.
pub(crate) struct FolderAccumulator {
    compression_type: CompressionType,
    framer: Option<BlockFramer>,
    stream_len: u64,
    framed_len: u64,
    pending_files: Vec<FileRecord>,
    stats: FolderStats,
}

impl FolderAccumulator {
    pub fn new(
        compression_type: CompressionType,
    ) -> io::Result<FolderAccumulator> {
        Ok(FolderAccumulator {
            compression_type: compression_type.validate()?,
            framer: None, // created on the first byte
            stream_len: 0,
            framed_len: 0,
            pending_files: Vec::new(),
            stats: FolderStats::default(),
        })
    }

    pub fn compression_type(&self) -> CompressionType {
        self.compression_type
    }

    /// Bytes of the stream written so far.
    #[cfg(test)]
    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    /// Bytes of the stream already framed into data blocks.
    pub fn framed_len(&self) -> u64 {
        self.framed_len
    }

    pub fn stats(&self) -> &FolderStats {
        &self.stats
    }

    /// Starts a file at the current end of the stream.
    pub fn begin_file(&mut self, id: u64, entry: FileEntry) -> io::Result<()> {
        if self.stream_len > (u32::MAX as u64) {
            invalid_data!(
                "Folder is overfull \
                 (file offset of {} bytes, max is {} bytes)",
                self.stream_len,
                u32::MAX
            );
        }
        let record = FileRecord::new(id, entry, self.stream_len as u32)?;
        self.pending_files.push(record);
        self.stats.files += 1;
        Ok(())
    }

    /// Appends a prefix of `buf` to the stream.  See [`BlockFramer::write`].
    pub fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<(usize, Option<DataBlock>)> {
        if buf.is_empty() {
            return Ok((0, None));
        }
        let start = Instant::now();
        let framer = match self.framer {
            Some(ref mut framer) => framer,
            None => {
                let framer = BlockFramer::new(self.compression_type)?;
                self.framer.insert(framer)
            }
        };
        let (taken, block) = framer.write(buf)?;
        self.stream_len += taken as u64;
        if let Some(ref block) = block {
            self.count_block(block);
        }
        self.stats.elapsed += start.elapsed();
        Ok((taken, block))
    }

    /// Frames the rest of the stream and releases the compression context.
    pub fn finish(&mut self) -> io::Result<Option<DataBlock>> {
        let start = Instant::now();
        let block = match self.framer.take() {
            Some(mut framer) => framer.finish()?,
            None => None,
        };
        if let Some(ref block) = block {
            self.count_block(block);
        }
        assert_eq!(self.framed_len, self.stream_len);
        self.stats.elapsed += start.elapsed();
        Ok(block)
    }

    fn count_block(&mut self, block: &DataBlock) {
        self.framed_len += block.uncompressed_size() as u64;
        self.stats.uncompressed_bytes += block.uncompressed_size() as u64;
        self.stats.compressed_bytes += block.compressed_size() as u64;
        self.stats.data_blocks += 1;
        debug_assert_eq!(
            self.framed_len
                + self.framer.as_ref().map_or(0, |f| f.buffered_len() as u64),
            self.stream_len
        );
    }

    /// Removes the pending records of files starting before `end`.
    pub fn take_files_starting_before(&mut self, end: u64) -> Vec<FileRecord> {
        let count = self
            .pending_files
            .iter()
            .take_while(|file| (file.offset_within_folder() as u64) < end)
            .count();
        self.pending_files.drain(..count).collect()
    }

    pub fn take_remaining_files(&mut self) -> Vec<FileRecord> {
        std::mem::take(&mut self.pending_files)
    }

    pub fn pending_file_mut(&mut self, id: u64) -> Option<&mut FileRecord> {
        self.pending_files.iter_mut().rev().find(|file| file.id() == id)
    }

    /// Drops file `id` from the folder, taking its record back if it is
    /// still pending.  Returns false when the record was already handed out.
    pub fn withdraw_file(&mut self, id: u64) -> bool {
        self.stats.files -= 1;
        match self.pending_files.iter().position(|file| file.id() == id) {
            Some(index) => {
                self.pending_files.remove(index);
                true
            }
            None => false,
        }
    }
}
