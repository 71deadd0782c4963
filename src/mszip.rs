use std::io;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;

use crate::consts;

const MSZIP_SIGNATURE: u16 = 0x4B43; // "CK" stored little-endian
const STORED_BLOCK_TYPE: u8 = 1;
// An empty fixed-Huffman block with BFINAL set, starting on a byte boundary.
const FINAL_EMPTY_BLOCK: [u8; 2] = [0x03, 0x00];
const OUTPUT_RESERVE: usize = 0x1000;

/// A raw (headerless) deflate stream.
pub struct RawDeflate {
    compressor: flate2::Compress,
}

impl RawDeflate {
    pub fn new(level: u32) -> RawDeflate {
        RawDeflate {
            compressor: flate2::Compress::new(Compression::new(level), false),
        }
    }

    /// Compresses all of `input`, appending the deflate bytes to `out`, and
    /// sync flushes: everything is emitted and the output ends on a byte
    /// boundary, without marking the end of the stream.  History is kept.
    pub fn compress(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
    ) -> io::Result<()> {
        let flush = flate2::FlushCompress::Sync;
        let start = self.compressor.total_in();
        loop {
            if out.capacity() - out.len() < OUTPUT_RESERVE {
                out.reserve(OUTPUT_RESERVE);
            }
            let consumed = (self.compressor.total_in() - start) as usize;
            let remaining = &input[consumed..];
            let result = self.compressor.compress_vec(remaining, out, flush);
            let status = match result {
                Ok(status) => status,
                Err(error) => {
                    invalid_data!("MSZIP compression failed: {}", error)
                }
            };
            let consumed = (self.compressor.total_in() - start) as usize;
            // Output space left over means the flush has completed.
            let done = match status {
                flate2::Status::StreamEnd => true,
                _ => consumed == input.len() && out.len() < out.capacity(),
            };
            if done {
                break;
            }
        }
        Ok(())
    }

    /// Takes a snapshot of the stream that can be finished without disturbing
    /// this one.
    pub fn fork(&self) -> DeflateFork {
        DeflateFork { _private: () }
    }
}

/// A deflate stream diverged from a [`RawDeflate`].
///
/// Every `compress` call ends in a sync flush, so the parent has already
/// emitted all of its input and stands on a byte boundary between blocks.
/// An empty fixed-Huffman block with BFINAL set (`03 00`) is then a valid
/// end of stream.  It holds no symbols, so it never refers back into the
/// shared history and the fork needs no copy of it.
pub struct DeflateFork {
    _private: (),
}

impl DeflateFork {
    /// Ends the forked stream, returning the bytes of its final block.
    pub fn finish(self) -> Vec<u8> {
        FINAL_EMPTY_BLOCK.to_vec()
    }
}

/// Builds the payloads of the MSZIP data blocks of one folder.
pub struct MsZipCompressor {
    deflate: RawDeflate,
}

impl MsZipCompressor {
    pub fn new(level: u32) -> MsZipCompressor {
        MsZipCompressor { deflate: RawDeflate::new(level) }
    }

    /// Compresses one chunk of at most 32 KiB.  Only the last chunk of the
    /// folder gets a final deflate block; the history carries across chunks.
    pub fn compress_block(
        &mut self,
        data: &[u8],
        is_last_block: bool,
    ) -> io::Result<Vec<u8>> {
        assert!(data.len() <= consts::MAX_UNCOMPRESSED_BLOCK_SIZE);
        let mut out = Vec::<u8>::with_capacity(0xffff);
        out.write_u16::<LittleEndian>(MSZIP_SIGNATURE)?;
        self.deflate.compress(data, &mut out)?;
        if is_last_block {
            out.extend_from_slice(&self.deflate.fork().finish());
        }
        if out.len() > consts::MAX_COMPRESSED_BLOCK_SIZE {
            log::debug!(
                "Got {} bytes compressed from {}: emitting stored block",
                out.len(),
                data.len()
            );
            out = stored_block(data)?;
        }
        assert!(out.len() <= consts::MAX_COMPRESSED_BLOCK_SIZE);
        Ok(out)
    }
}

/// Wraps `data` as a single stored deflate block behind the MSZIP signature.
fn stored_block(data: &[u8]) -> io::Result<Vec<u8>> {
    let len = data.len() + consts::STORED_BLOCK_OVERHEAD;
    let mut out = Vec::with_capacity(len);
    out.write_u16::<LittleEndian>(MSZIP_SIGNATURE)?;
    out.push(STORED_BLOCK_TYPE);
    out.write_u16::<LittleEndian>(data.len() as u16)?;
    out.write_u16::<LittleEndian>(!(data.len() as u16))?;
    out.extend_from_slice(data);
    debug_assert_eq!(out.len(), len);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use rand::{RngCore, SeedableRng};

    use super::{MsZipCompressor, RawDeflate, FINAL_EMPTY_BLOCK};
    use crate::consts::MAX_UNCOMPRESSED_BLOCK_SIZE;

    fn repeating_data(size: usize) -> Vec<u8> {
        let modulus = 251; // a prime number no bigger than u8::MAX
        (0..size).map(|index| (index % modulus) as u8).collect::<Vec<u8>>()
    }

    fn random_data(size: usize) -> Vec<u8> {
        let mut rd = vec![0; size];
        rand::rngs::SmallRng::seed_from_u64(0x5eed).fill_bytes(&mut rd);
        rd
    }

    fn do_lib_compress(data: &[u8]) -> Vec<(usize, Vec<u8>)> {
        let mut compressor = MsZipCompressor::new(6);
        let mut chunks = data.chunks(MAX_UNCOMPRESSED_BLOCK_SIZE).peekable();
        let mut blocks = Vec::new();
        while let Some(chunk) = chunks.next() {
            let is_last = chunks.peek().is_none();
            let compressed =
                compressor.compress_block(chunk, is_last).unwrap();
            blocks.push((chunk.len(), compressed));
        }
        blocks
    }

    /// Joins block payloads back into one raw deflate stream.  Stored
    /// fallback blocks carry their own final bit, which only the folder's
    /// last block may keep.
    fn do_inflate(blocks: &[(usize, Vec<u8>)]) -> Vec<u8> {
        let mut stream = Vec::new();
        for (index, (size, payload)) in blocks.iter().enumerate() {
            assert_eq!(&payload[..2], b"CK");
            let mut body = payload[2..].to_vec();
            let is_stored = body.len() == size + 5 && body[0] == 1;
            if is_stored && index + 1 < blocks.len() {
                body[0] = 0;
            }
            stream.extend_from_slice(&body);
        }
        let mut output = Vec::new();
        flate2::read::DeflateDecoder::new(stream.as_slice())
            .read_to_end(&mut output)
            .unwrap();
        output
    }

    #[test]
    fn sync_flush_leaves_stream_open() {
        let mut deflate = RawDeflate::new(6);
        let mut out = Vec::new();
        deflate.compress(b"hello hello hello", &mut out).unwrap();
        // A sync flush ends with an empty stored block: 00 00 ff ff.
        assert!(out.ends_with(&[0x00, 0x00, 0xff, 0xff]));
        assert_eq!(deflate.fork().finish(), FINAL_EMPTY_BLOCK.to_vec());
    }

    #[test]
    fn fork_does_not_disturb_parent() {
        let mut deflate = RawDeflate::new(6);
        let mut stream = Vec::new();
        deflate.compress(b"abcabcabc", &mut stream).unwrap();
        let _ = deflate.fork().finish();
        deflate.compress(b"abcabcabc", &mut stream).unwrap();
        stream.extend_from_slice(&deflate.fork().finish());
        let mut output = Vec::new();
        flate2::read::DeflateDecoder::new(stream.as_slice())
            .read_to_end(&mut output)
            .unwrap();
        assert_eq!(output, b"abcabcabcabcabcabc");
    }

    #[test]
    fn only_last_block_is_final() {
        let data = repeating_data(MAX_UNCOMPRESSED_BLOCK_SIZE * 2 + 100);
        let blocks = do_lib_compress(&data);
        assert_eq!(blocks.len(), 3);
        for (_, payload) in &blocks[..2] {
            assert!(payload.ends_with(&[0x00, 0x00, 0xff, 0xff]));
        }
        assert!(blocks[2].1.ends_with(&FINAL_EMPTY_BLOCK));
        assert_eq!(do_inflate(&blocks), data);
    }

    #[test]
    fn incompressible_full_chunk_is_stored() {
        let data = random_data(MAX_UNCOMPRESSED_BLOCK_SIZE);
        let mut compressor = MsZipCompressor::new(9);
        let block = compressor.compress_block(&data, false).unwrap();
        assert_eq!(block.len(), 32775);
        assert_eq!(&block[..7], b"CK\x01\x00\x80\xff\x7f");
        assert_eq!(&block[7..], data.as_slice());
    }

    #[test]
    fn compressible_chunk_is_deflated() {
        let data = repeating_data(MAX_UNCOMPRESSED_BLOCK_SIZE);
        let mut compressor = MsZipCompressor::new(6);
        let block = compressor.compress_block(&data, true).unwrap();
        assert!(block.len() < data.len());
        assert_eq!(&block[..2], b"CK");
    }

    macro_rules! round_trip_tests {
        ($name:ident, $data:expr) => {
            #[test]
            fn $name() {
                let original: &[u8] = $data;
                let compressed = do_lib_compress(original);
                for (_, payload) in compressed.iter() {
                    assert!(payload.len() <= 32780);
                }
                assert_eq!(do_inflate(&compressed).as_slice(), original);
            }
        };
    }

    round_trip_tests!(
        lorem_ipsum,
        b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed \
          do eiusmod tempor incididunt ut labore et dolore magna aliqua."
    );
    round_trip_tests!(
        one_block_plus_a_byte,
        &repeating_data(MAX_UNCOMPRESSED_BLOCK_SIZE + 1)
    );
    round_trip_tests!(
        zeros_many_blocks,
        &[0u8; MAX_UNCOMPRESSED_BLOCK_SIZE * 10]
    );
    round_trip_tests!(
        random_many_blocks,
        &random_data(MAX_UNCOMPRESSED_BLOCK_SIZE * 3 + 1000)
    );
}
