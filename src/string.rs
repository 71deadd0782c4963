use std::io::{self, Write};

use byteorder::WriteBytesExt;

use crate::consts;

/// Checks that `string` fits in a CAB string field: at most 255 bytes and no
/// embedded NUL.
pub(crate) fn validate_string(string: &str, what: &str) -> io::Result<()> {
    if string.len() > consts::MAX_STRING_SIZE {
        invalid_input!(
            "{} is too long ({} bytes; max is {} bytes): {:?}",
            what,
            string.len(),
            consts::MAX_STRING_SIZE,
            string
        );
    }
    if string.bytes().any(|byte| byte == 0) {
        invalid_input!("{} contains a NUL byte: {:?}", what, string);
    }
    Ok(())
}

/// Returns true if the string has to be flagged as UTF-8 rather than read
/// in the extractor's code page.
pub(crate) fn needs_utf_flag(string: &str) -> bool {
    string.bytes().any(|byte| byte > 0x7f)
}

pub(crate) fn write_null_terminated_string<W: Write>(
    writer: &mut W,
    string: &str,
) -> io::Result<()> {
    debug_assert!(string.len() <= consts::MAX_STRING_SIZE);
    writer.write_all(string.as_bytes())?;
    writer.write_u8(0)?;
    Ok(())
}
