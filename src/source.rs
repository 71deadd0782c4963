//! Finding files on disk and describing them as cabinet entries.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::datetime::datetime_from_system_time;
use crate::file::FileEntry;
use crate::string::validate_string;

/// Turns a path on disk into the name of an item within a cabinet.
///
/// Any drive and root prefix is dropped and `/` becomes `\`.  With
/// `strip` set to `"*"`, all directory components are removed; with any
/// other value, that leading path prefix is removed.
pub fn cab_item_name(path: &Path, strip: Option<&str>) -> String {
    let mut name = path.to_string_lossy().replace('/', "\\");
    let bytes = name.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        name.drain(..2);
    }
    let mut name = name.trim_start_matches('\\');
    while let Some(rest) = name.strip_prefix(".\\") {
        name = rest.trim_start_matches('\\');
    }
    match strip {
        Some("*") => match name.rfind('\\') {
            Some(index) => name[index + 1..].to_string(),
            None => name.to_string(),
        },
        Some(prefix) => {
            let prefix = prefix.replace('/', "\\");
            let prefix = prefix.trim_start_matches('\\');
            match name.strip_prefix(prefix) {
                Some(rest) if !prefix.is_empty() => {
                    rest.trim_start_matches('\\').to_string()
                }
                _ => name.to_string(),
            }
        }
        None => name.to_string(),
    }
}

/// Lists the files matching `pattern`.
///
/// Without `recursive`, `pattern` is a glob pattern, and a directory stands
/// for the files directly inside it.  With `recursive`, `pattern` names a
/// directory (or file) to walk, deepest entries first.  Directories are never
/// listed themselves.  A malformed pattern fails as a whole; entries that
/// cannot be read come back as individual errors.
pub fn list(
    pattern: &str,
    recursive: bool,
) -> io::Result<Vec<io::Result<PathBuf>>> {
    if recursive {
        let walker =
            WalkDir::new(pattern).contents_first(true).sort_by_file_name();
        let mut paths = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    paths.push(Ok(entry.into_path()))
                }
                Ok(_) => {}
                Err(err) => paths.push(Err(io::Error::from(err))),
            }
        }
        return Ok(paths);
    }

    let pattern = if Path::new(pattern).is_dir() {
        Path::new(pattern).join("*").to_string_lossy().into_owned()
    } else {
        pattern.to_string()
    };
    let matches = match glob::glob(&pattern) {
        Ok(matches) => matches,
        Err(err) => invalid_input!("Bad file pattern {:?}: {}", pattern, err),
    };
    let mut paths = Vec::new();
    for entry in matches {
        match entry {
            Ok(path) if path.is_dir() => {}
            Ok(path) => paths.push(Ok(path)),
            Err(err) => paths.push(Err(err.into())),
        }
    }
    Ok(paths)
}

/// A file on disk, opened for adding to a cabinet.
pub struct SourceFile {
    path: PathBuf,
    entry: FileEntry,
    size: u64,
    file: File,
}

impl SourceFile {
    /// Opens the file at `path`, taking its item name from the path (see
    /// [`cab_item_name`]) and its datetime and attributes from the file
    /// system.
    pub fn open<P: AsRef<Path>>(
        path: P,
        strip: Option<&str>,
    ) -> io::Result<SourceFile> {
        let path = path.as_ref();
        let name = cab_item_name(path, strip);
        validate_string(&name, "Item name")?;
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            invalid_input!("Not a regular file: {}", path.display());
        }
        let mut entry = FileEntry::new(name);
        if let Ok(modified) = metadata.modified() {
            entry.set_datetime(datetime_from_system_time(modified));
        }
        entry.set_is_read_only(metadata.permissions().readonly());
        apply_dos_attributes(&mut entry, &metadata);
        Ok(SourceFile {
            path: path.to_path_buf(),
            entry,
            size: metadata.len(),
            file,
        })
    }

    /// Returns the path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the entry describing the file within the cabinet.
    pub fn entry(&self) -> &FileEntry {
        &self.entry
    }

    /// Returns the file's size when it was opened.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Splits into the cabinet entry and the open file to read data from.
    pub fn into_parts(self) -> (FileEntry, File) {
        (self.entry, self.file)
    }
}

#[cfg(windows)]
fn apply_dos_attributes(entry: &mut FileEntry, metadata: &fs::Metadata) {
    use std::os::windows::fs::MetadataExt;

    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;
    const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;
    let attributes = metadata.file_attributes();
    entry.set_is_hidden(attributes & FILE_ATTRIBUTE_HIDDEN != 0);
    entry.set_is_system(attributes & FILE_ATTRIBUTE_SYSTEM != 0);
    entry.set_is_archive(attributes & FILE_ATTRIBUTE_ARCHIVE != 0);
}

#[cfg(not(windows))]
fn apply_dos_attributes(_entry: &mut FileEntry, _metadata: &fs::Metadata) {}
