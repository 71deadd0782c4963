/// Computes the cabinet checksum of `buf`, starting from `seed`.
///
/// Whole 4-byte groups are XORed in as little-endian words.  The trailing
/// zero to three bytes form one more word with the first of them in the low
/// byte.
pub fn checksum(buf: &[u8], seed: u32) -> u32 {
    let mut checksum = Checksum::with_seed(seed);
    checksum.update(buf);
    checksum.value()
}

/// Computes the checksum stored in a CFDATA header: the payload is summed
/// first, then the size fields that follow the checksum in the header.
pub fn data_block_checksum(
    payload: &[u8],
    compressed_size: u16,
    uncompressed_size: u16,
) -> u32 {
    let mut sizes = [0u8; 4];
    sizes[..2].copy_from_slice(&compressed_size.to_le_bytes());
    sizes[2..].copy_from_slice(&uncompressed_size.to_le_bytes());
    checksum(&sizes, checksum(payload, 0))
}

/// An incremental version of [`checksum`].  Feeding the same bytes in any
/// number of `update` calls gives the same value.
pub struct Checksum {
    value: u32,
    remainder: u32,
    remainder_shift: u32,
}

impl Checksum {
    /// Starts a checksum with a zero seed.
    pub fn new() -> Checksum {
        Checksum::with_seed(0)
    }

    /// Starts a checksum from the given seed.
    pub fn with_seed(seed: u32) -> Checksum {
        Checksum { value: seed, remainder: 0, remainder_shift: 0 }
    }

    /// Returns the checksum of all bytes fed so far.
    pub fn value(&self) -> u32 {
        // Partial words are already packed low byte first, and an empty
        // remainder is zero.
        self.value ^ self.remainder
    }

    /// Feeds more bytes into the checksum.
    pub fn update(&mut self, buf: &[u8]) {
        for &byte in buf {
            self.remainder |= (byte as u32) << self.remainder_shift;
            if self.remainder_shift == 24 {
                self.value ^= self.remainder;
                self.remainder = 0;
                self.remainder_shift = 0;
            } else {
                self.remainder_shift += 8;
            }
        }
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Checksum::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{checksum, data_block_checksum, Checksum};

    #[test]
    fn empty_checksum() {
        assert_eq!(Checksum::new().value(), 0);
        assert_eq!(checksum(b"", 0), 0);
        assert_eq!(checksum(b"", 0xdeadbeef), 0xdeadbeef);
    }

    #[test]
    fn whole_words_are_little_endian() {
        assert_eq!(checksum(b"\x01\x00\x00\x00", 0), 1);
        assert_eq!(checksum(b"\x78\x56\x34\x12", 0), 0x12345678);
        assert_eq!(checksum(b"\x01\x00\x00\x00\x01\x00\x00\x00", 0), 0);
    }

    #[test]
    fn trailing_bytes_start_at_low_byte() {
        assert_eq!(checksum(b"\x01", 0), 0x00000001);
        assert_eq!(checksum(b"\x01\x02", 0), 0x00000201);
        assert_eq!(checksum(b"\x01\x02\x03", 0), 0x00030201);
        assert_eq!(checksum(b"\xaa\xbb", 0x11223344), 0x112288ee);
    }

    #[test]
    fn reordering_bytes_changes_checksum() {
        let original = checksum(b"\x01\x02\x03\x04\x05\x06\x07\x08", 0);
        let swapped = checksum(b"\x02\x01\x03\x04\x05\x06\x07\x08", 0);
        assert_ne!(original, swapped);
    }

    #[test]
    fn incremental_updates_match_one_shot() {
        let data = b"\x0e\0\x0e\0Hello, world!\n";
        let mut checksum_value = Checksum::new();
        for piece in data.chunks(3) {
            checksum_value.update(piece);
        }
        assert_eq!(checksum_value.value(), checksum(data, 0));
        assert_eq!(checksum(data, 0), 0x7f2e3167);
    }

    #[test]
    fn checksum_from_sample_cabinet() {
        // From the example cabinet in the MS-CAB documentation.
        let mut checksum = Checksum::new();
        checksum.update(
            b"\x97\0\x97\0#include <stdio.h>\r\n\r\n\
              void main(void)\r\n{\r\n    \
              printf(\"Hello, world!\\n\");\r\n}\r\n\
              #include <stdio.h>\r\n\r\n\
              void main(void)\r\n{\r\n    \
              printf(\"Welcome!\\n\");\r\n}\r\n\r\n",
        );
        assert_eq!(checksum.value(), 0x30a65abd);
    }

    #[test]
    fn data_block_checksum_folds_in_sizes() {
        let checksum = data_block_checksum(b"Hello, world!\n", 14, 14);
        assert_eq!(checksum, 0x7f2e3167);
        assert_eq!(
            data_block_checksum(b"Hello, world!\nSee you later!\n", 29, 29),
            0x3509541a
        );
    }
}
