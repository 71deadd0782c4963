use std::io::{self, Write};
use std::mem;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::checksum::data_block_checksum;
use crate::consts;
use crate::ctype::CompressionType;
use crate::mszip::MsZipCompressor;

/// One sealed CFDATA record.
pub(crate) struct DataBlock {
    checksum: u32,
    uncompressed_size: u16,
    payload: Vec<u8>,
}

impl DataBlock {
    fn new(payload: Vec<u8>, uncompressed_size: usize) -> DataBlock {
        assert!(uncompressed_size <= consts::MAX_UNCOMPRESSED_BLOCK_SIZE);
        assert!(payload.len() <= consts::MAX_COMPRESSED_BLOCK_SIZE);
        let uncompressed_size = uncompressed_size as u16;
        let checksum = data_block_checksum(
            &payload,
            payload.len() as u16,
            uncompressed_size,
        );
        DataBlock { checksum, uncompressed_size, payload }
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn compressed_size(&self) -> u16 {
        self.payload.len() as u16
    }

    pub fn uncompressed_size(&self) -> u16 {
        self.uncompressed_size
    }

    #[cfg(test)]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size of the record once written, header included.
    pub fn serialized_size(&self) -> u64 {
        consts::DATA_BLOCK_HEADER_SIZE as u64 + self.payload.len() as u64
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(self.checksum)?;
        writer.write_u16::<LittleEndian>(self.compressed_size())?;
        writer.write_u16::<LittleEndian>(self.uncompressed_size)?;
        writer.write_all(&self.payload)?;
        Ok(())
    }
}

enum FolderCompressor {
    Uncompressed,
    MsZip(MsZipCompressor),
}

/// Cuts a folder's uncompressed stream into 32 KiB chunks and turns each
/// chunk into a [`DataBlock`].
///
/// A full chunk is only framed once more bytes arrive, so that the chunk
/// ending the folder is always known to be the last one.
pub(crate) struct BlockFramer {
    compressor: FolderCompressor,
    buffer: Vec<u8>,
}

impl BlockFramer {
    pub fn new(compression_type: CompressionType) -> io::Result<BlockFramer> {
        let compressor = match compression_type.validate()? {
            CompressionType::None => FolderCompressor::Uncompressed,
            CompressionType::MsZip(level) => {
                FolderCompressor::MsZip(MsZipCompressor::new(level))
            }
        };
        Ok(BlockFramer {
            compressor,
            buffer: Vec::with_capacity(consts::MAX_UNCOMPRESSED_BLOCK_SIZE),
        })
    }

    /// Number of bytes accepted but not yet framed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Accepts a prefix of `buf`, returning how many bytes were taken and the
    /// block completed along the way, if any.  When a block comes back no
    /// bytes were taken; call again with the same input.
    pub fn write(
        &mut self,
        buf: &[u8],
    ) -> io::Result<(usize, Option<DataBlock>)> {
        if buf.is_empty() {
            return Ok((0, None));
        }
        let capacity = consts::MAX_UNCOMPRESSED_BLOCK_SIZE;
        if self.buffer.len() == capacity {
            let block = self.frame(false)?;
            return Ok((0, Some(block)));
        }
        let max_bytes = buf.len().min(capacity - self.buffer.len());
        self.buffer.extend_from_slice(&buf[..max_bytes]);
        Ok((max_bytes, None))
    }

    /// Frames whatever is left as the folder's final block.  An empty
    /// remainder produces no block.
    pub fn finish(&mut self) -> io::Result<Option<DataBlock>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        self.frame(true).map(Some)
    }

    fn frame(&mut self, is_last_block: bool) -> io::Result<DataBlock> {
        debug_assert!(!self.buffer.is_empty());
        let uncompressed_size = self.buffer.len();
        let payload = match self.compressor {
            FolderCompressor::Uncompressed => {
                let empty =
                    Vec::with_capacity(consts::MAX_UNCOMPRESSED_BLOCK_SIZE);
                mem::replace(&mut self.buffer, empty)
            }
            FolderCompressor::MsZip(ref mut compressor) => {
                let payload =
                    compressor.compress_block(&self.buffer, is_last_block)?;
                self.buffer.clear();
                payload
            }
        };
        Ok(DataBlock::new(payload, uncompressed_size))
    }
}
