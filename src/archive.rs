use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::cabinet::{CabinetSet, CabinetSetBuilder};
use crate::ctype::CompressionType;
use crate::output::DirectoryOutput;
use crate::source::{self, SourceFile};
use crate::stats::Statistics;

enum State {
    Configuring(CabinetSetBuilder),
    Open(CabinetSet<DirectoryOutput>),
    Closed(Statistics),
}

/// Builds a cabinet (or cabinet set) on disk from files on disk.
///
/// The calls follow the classic sequence: [`Archive::open`], optional
/// settings, [`Archive::add_header`], then any mix of
/// [`Archive::add_folder`], [`Archive::add`] and [`Archive::add_wild`],
/// and finally [`Archive::flush`] or [`Archive::close`].
///
/// ```no_run
/// use cabset::{Archive, CompressionType};
///
/// let mut archive = Archive::open("out/disk#.cab", Some(1_440_000))?;
/// archive.set_disk_label("Disk #")?;
/// archive.add_header()?;
/// archive.add_folder(Some(CompressionType::MsZip(9)))?;
/// archive.add_wild("docs/*.txt", false)?;
/// let stats = archive.close()?;
/// let (files, units) = (stats.files_added, stats.cabinets_written);
/// println!("{} file(s) in {} cabinet(s)", files, units);
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct Archive {
    dir: PathBuf,
    state: State,
    compression_type: CompressionType,
    strip: Option<String>,
    skipped: u64,
}

impl Archive {
    /// Prepares a cabinet at `path`.  A `#` in the file name is replaced by
    /// the disk number of each unit.  With `max_unit_size`, the output is
    /// split into a set of units of at most roughly that many bytes.
    /// Units are created on disk as each one fills up; the last one is
    /// written by [`Archive::flush`].
    pub fn open<P: AsRef<Path>>(
        path: P,
        max_unit_size: Option<u32>,
    ) -> io::Result<Archive> {
        let path = path.as_ref();
        let template = match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name.to_string(),
            None => invalid_input!("Bad cabinet path: {}", path.display()),
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                parent.to_path_buf()
            }
            _ => PathBuf::from("."),
        };
        let mut builder = CabinetSetBuilder::new(template);
        if let Some(max_unit_size) = max_unit_size {
            builder.set_max_unit_size(max_unit_size);
        }
        Ok(Archive {
            dir,
            state: State::Configuring(builder),
            compression_type: CompressionType::mszip(),
            strip: None,
            skipped: 0,
        })
    }

    fn builder_mut(&mut self) -> io::Result<&mut CabinetSetBuilder> {
        match self.state {
            State::Configuring(ref mut builder) => Ok(builder),
            _ => {
                invalid_input!("Cabinet settings must come before add_header")
            }
        }
    }

    fn set_mut(&mut self) -> io::Result<&mut CabinetSet<DirectoryOutput>> {
        match self.state {
            State::Open(ref mut set) => Ok(set),
            State::Configuring(_) => {
                invalid_input!("A cabinet header must be added first")
            }
            State::Closed(_) => {
                invalid_input!("Cannot add to a closed cabinet")
            }
        }
    }

    /// Sets the disk label of each unit; `#` is replaced by the disk number.
    pub fn set_disk_label(&mut self, label: &str) -> io::Result<()> {
        self.builder_mut()?.set_disk_label(label);
        Ok(())
    }

    /// Reserves `size` zero bytes in each unit's header.
    pub fn set_header_reserve(&mut self, size: usize) -> io::Result<()> {
        self.builder_mut()?.set_reserve_data(vec![0; size]);
        Ok(())
    }

    /// Sets the cabinet set ID instead of a random one.
    pub fn set_set_id(&mut self, set_id: u16) -> io::Result<()> {
        self.builder_mut()?.set_set_id(set_id);
        Ok(())
    }

    /// Sets the compression of folders started without an explicit type.
    pub fn set_compression_type(
        &mut self,
        compression_type: CompressionType,
    ) -> io::Result<()> {
        let compression_type = compression_type.validate()?;
        if let State::Configuring(ref mut builder) = self.state {
            builder.set_compression_type(compression_type);
        }
        self.compression_type = compression_type;
        Ok(())
    }

    /// Sets the prefix stripped from item names (`"*"` strips all
    /// directories).  See [`source::cab_item_name`].
    pub fn set_strip(&mut self, strip: Option<&str>) {
        self.strip = strip.map(str::to_string);
    }

    /// Starts the cabinet set.  Settings are fixed from here on.
    pub fn add_header(&mut self) -> io::Result<()> {
        let builder = match self.state {
            State::Configuring(ref builder) => builder,
            State::Open(_) => {
                invalid_input!("Cabinet header was already added")
            }
            State::Closed(_) => {
                invalid_input!("Cannot add to a closed cabinet")
            }
        };
        let set = builder.build(DirectoryOutput::new(&self.dir))?;
        self.state = State::Open(set);
        Ok(())
    }

    /// Starts a new folder; files added from now on go into it.  With no
    /// type, the archive's default compression is used.
    pub fn add_folder(
        &mut self,
        compression_type: Option<CompressionType>,
    ) -> io::Result<()> {
        let compression_type =
            compression_type.unwrap_or(self.compression_type);
        self.set_mut()?.add_folder(compression_type)
    }

    /// Adds one file.  A path of `+` starts a new folder instead.
    pub fn add<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        if path == Path::new("+") {
            return self.add_folder(None);
        }
        self.set_mut()?;
        let source = match SourceFile::open(path, self.strip.as_deref()) {
            Ok(source) => source,
            Err(err) => {
                warn!("Skipping {}: {}", path.display(), err);
                self.skipped += 1;
                return Err(err);
            }
        };
        debug!("Adding {} ({} bytes)", source.path().display(), source.size());
        let (entry, file) = source.into_parts();
        self.set_mut()?.add_file(entry, file)?;
        Ok(())
    }

    /// Adds every file matching `pattern` (see [`source::list`]), skipping
    /// the ones that cannot be added.  A pattern of `+` starts a new folder
    /// instead.  Returns the number of files added.
    pub fn add_wild(
        &mut self,
        pattern: &str,
        recursive: bool,
    ) -> io::Result<usize> {
        if pattern == "+" {
            self.add_folder(None)?;
            return Ok(0);
        }
        self.set_mut()?;
        let mut added = 0;
        let listing = source::list(pattern, recursive)?;
        if listing.is_empty() {
            warn!("No files match {:?}", pattern);
        }
        for entry in listing {
            match entry {
                Ok(path) => {
                    if self.add(&path).is_ok() {
                        added += 1;
                    }
                }
                Err(err) => {
                    warn!("Skipping entry under {:?}: {}", pattern, err);
                    self.skipped += 1;
                }
            }
        }
        Ok(added)
    }

    /// Returns the statistics gathered so far.
    pub fn stats(&self) -> Statistics {
        let mut stats = match self.state {
            State::Configuring(_) => Statistics::default(),
            State::Open(ref set) => set.stats(),
            State::Closed(ref stats) => return stats.clone(),
        };
        stats.files_skipped += self.skipped;
        stats
    }

    /// Seals the last folder and writes every unit to disk.  The archive is
    /// closed afterwards.  Nothing is written if no file was added.
    pub fn flush(&mut self) -> io::Result<Statistics> {
        let closed = State::Closed(Statistics::default());
        match mem::replace(&mut self.state, closed) {
            State::Open(set) => {
                let (output, mut stats) = set.finish()?;
                stats.files_skipped += self.skipped;
                for path in output.paths() {
                    debug!("Wrote {}", path.display());
                }
                self.state = State::Closed(stats.clone());
                Ok(stats)
            }
            State::Closed(stats) => {
                self.state = State::Closed(stats.clone());
                Ok(stats)
            }
            State::Configuring(builder) => {
                self.state = State::Configuring(builder);
                invalid_input!("Cannot flush a cabinet without a header")
            }
        }
    }

    /// Flushes the archive if needed and returns the final statistics.
    pub fn close(mut self) -> io::Result<Statistics> {
        match self.state {
            State::Configuring(_) => Ok(Statistics::default()),
            _ => self.flush(),
        }
    }
}
