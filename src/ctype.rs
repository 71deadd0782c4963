use std::fmt;
use std::io;
use std::str::FromStr;

const CTYPE_NONE: u16 = 0;
const CTYPE_MSZIP: u16 = 1;

const MSZIP_LEVEL_MIN: u32 = 1;
const MSZIP_LEVEL_MAX: u32 = 9;
const MSZIP_LEVEL_DEFAULT: u32 = 6;

/// A scheme for compressing data within a cabinet folder.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum CompressionType {
    /// No compression; data blocks hold the folder bytes verbatim.
    None,
    /// MSZIP compression at the given deflate level (1 to 9).  MSZIP is
    /// described further in
    /// [MS-MCI](https://msdn.microsoft.com/en-us/library/cc483131.aspx).
    MsZip(u32),
}

impl CompressionType {
    /// MSZIP compression at the default level.
    pub fn mszip() -> CompressionType {
        CompressionType::MsZip(MSZIP_LEVEL_DEFAULT)
    }

    /// Returns an error if the compression level is out of range.
    pub(crate) fn validate(self) -> io::Result<CompressionType> {
        if let CompressionType::MsZip(level) = self {
            if !(MSZIP_LEVEL_MIN..=MSZIP_LEVEL_MAX).contains(&level) {
                invalid_input!(
                    "Invalid MSZIP level: {} (must be {} to {})",
                    level,
                    MSZIP_LEVEL_MIN,
                    MSZIP_LEVEL_MAX
                );
            }
        }
        Ok(self)
    }

    /// The CFFOLDER `typeCompress` field.  The deflate level is a property
    /// of the writer only and is not recorded.
    pub(crate) fn to_bitfield(self) -> u16 {
        match self {
            CompressionType::None => CTYPE_NONE,
            CompressionType::MsZip(_) => CTYPE_MSZIP,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        CompressionType::mszip()
    }
}

impl fmt::Display for CompressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionType::None => write!(f, "none"),
            CompressionType::MsZip(level) => write!(f, "mszip:{}", level),
        }
    }
}

/// Parses `none`, `mszip` or `mszip:LEVEL`, ignoring case.
impl FromStr for CompressionType {
    type Err = io::Error;

    fn from_str(string: &str) -> io::Result<CompressionType> {
        let lower = string.trim().to_ascii_lowercase();
        let (method, level) = match lower.split_once(':') {
            Some((method, level)) => (method, Some(level)),
            None => (lower.as_str(), None),
        };
        match method {
            "none" if level.is_none() => Ok(CompressionType::None),
            "mszip" => {
                let level = match level {
                    None | Some("") => MSZIP_LEVEL_DEFAULT,
                    Some(level) => match level.parse::<u32>() {
                        Ok(level) => level,
                        Err(_) => {
                            invalid_input!("Invalid MSZIP level: {:?}", level)
                        }
                    },
                };
                CompressionType::MsZip(level).validate()
            }
            _ => invalid_input!("Invalid compression type: {:?}", string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CompressionType;

    #[test]
    fn compression_type_to_bitfield() {
        assert_eq!(CompressionType::None.to_bitfield(), 0x0);
        assert_eq!(CompressionType::MsZip(1).to_bitfield(), 0x1);
        assert_eq!(CompressionType::MsZip(9).to_bitfield(), 0x1);
    }

    #[test]
    fn parse_compression_type() {
        assert_eq!(
            "none".parse::<CompressionType>().unwrap(),
            CompressionType::None
        );
        assert_eq!(
            "MSZIP".parse::<CompressionType>().unwrap(),
            CompressionType::MsZip(6)
        );
        assert_eq!(
            "mszip:1".parse::<CompressionType>().unwrap(),
            CompressionType::MsZip(1)
        );
        assert_eq!(
            "mszip:".parse::<CompressionType>().unwrap(),
            CompressionType::MsZip(6)
        );
    }

    #[test]
    fn reject_bad_compression_type() {
        assert!("mszip:0".parse::<CompressionType>().is_err());
        assert!("mszip:10".parse::<CompressionType>().is_err());
        assert!("mszip:x".parse::<CompressionType>().is_err());
        assert!("lzx:21".parse::<CompressionType>().is_err());
        assert!("none:1".parse::<CompressionType>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for ctype in [CompressionType::None, CompressionType::MsZip(3)] {
            let text = ctype.to_string();
            assert_eq!(text.parse::<CompressionType>().unwrap(), ctype);
        }
    }
}
