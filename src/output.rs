use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// A destination for the physical units of a cabinet set.
///
/// Units are created one at a time, in unit order, as soon as each one is
/// final, so earlier units exist while later files are still being added.
/// Each returned writer is flushed and dropped before the next unit is
/// created.
pub trait UnitOutput {
    /// Opens a writer for the unit with the given file name.
    fn create_unit<'a>(
        &'a mut self,
        name: &str,
    ) -> io::Result<Box<dyn Write + 'a>>;
}

/// Writes each unit as a file in a directory.
#[derive(Clone, Debug)]
pub struct DirectoryOutput {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectoryOutput {
    /// Creates an output that places units in `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> DirectoryOutput {
        DirectoryOutput {
            dir: dir.as_ref().to_path_buf(),
            written: Vec::new(),
        }
    }

    /// Returns the directory units are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the paths of the units created so far, in unit order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.written
    }
}

impl UnitOutput for DirectoryOutput {
    fn create_unit<'a>(
        &'a mut self,
        name: &str,
    ) -> io::Result<Box<dyn Write + 'a>> {
        let path = self.dir.join(name);
        let file = File::create(&path).map_err(|err| {
            let path = path.display();
            io::Error::new(
                err.kind(),
                format!("Failed to create cabinet {}: {}", path, err),
            )
        })?;
        self.written.push(path);
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Keeps each unit in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryOutput {
    units: Vec<(String, Vec<u8>)>,
}

impl MemoryOutput {
    /// Creates an empty in-memory output.
    pub fn new() -> MemoryOutput {
        MemoryOutput::default()
    }

    /// Returns the `(name, bytes)` pairs of the units written so far.
    pub fn units(&self) -> &[(String, Vec<u8>)] {
        &self.units
    }

    /// Consumes the output, returning the `(name, bytes)` pair of each unit.
    pub fn into_units(self) -> Vec<(String, Vec<u8>)> {
        self.units
    }
}

impl UnitOutput for MemoryOutput {
    fn create_unit<'a>(
        &'a mut self,
        name: &str,
    ) -> io::Result<Box<dyn Write + 'a>> {
        self.units.push((name.to_string(), Vec::new()));
        let index = self.units.len() - 1;
        Ok(Box::new(&mut self.units[index].1))
    }
}
