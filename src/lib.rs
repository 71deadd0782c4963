//! A library for writing [Windows
//! cabinet](https://en.wikipedia.org/wiki/Cabinet_(file_format)) (CAB) files,
//! including cabinet sets spanning several linked files.
//!
//! Files are grouped into folders, each compressed as one stream with
//! MS-ZIP (or stored as-is) and cut into checksummed 32 KiB data blocks.  When
//! a maximum unit size is configured, the cabinet is split into a set of
//! units, and folders crossing a unit boundary are continued in the next
//! unit.
//!
//! [`CabinetSet`] is the core writer, fed with [`FileEntry`] descriptions and
//! readers; [`Archive`] drives it from paths and wildcard patterns on disk.

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod archive;
mod block;
mod cabinet;
mod checksum;
mod consts;
mod ctype;
mod datetime;
mod file;
mod folder;
mod mszip;
mod output;
pub mod source;
mod stats;
mod string;
mod unit;

pub use crate::archive::Archive;
pub use crate::cabinet::{CabinetSet, CabinetSetBuilder};
pub use crate::checksum::{checksum, data_block_checksum, Checksum};
pub use crate::ctype::CompressionType;
pub use crate::file::FileEntry;
pub use crate::output::{DirectoryOutput, MemoryOutput, UnitOutput};
pub use crate::stats::Statistics;
pub use crate::unit::ScratchMode;
