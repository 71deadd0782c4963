use std::time::Duration;

/// Running totals for one folder.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FolderStats {
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
    pub data_blocks: u64,
    pub files: u64,
    pub elapsed: Duration,
}

/// Totals for a whole cabinet set.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Statistics {
    /// Bytes read from input files.
    pub bytes_read: u64,
    /// Data block payload bytes emitted, after compression.
    pub bytes_emitted: u64,
    /// Bytes written across all cabinet units, headers included.
    pub bytes_written: u64,
    /// Files recorded in the set.
    pub files_added: u64,
    /// Input files that could not be added.
    pub files_skipped: u64,
    /// Folders sealed.
    pub folders: u64,
    /// Data blocks emitted.
    pub data_blocks: u64,
    /// Cabinet units written.
    pub cabinets_written: u64,
    /// Time spent building the set.
    pub elapsed: Duration,
}

impl Statistics {
    /// Emitted bytes per byte read (0 when nothing was read).
    pub fn ratio(&self) -> f64 {
        if self.bytes_read == 0 {
            0.0
        } else {
            self.bytes_emitted as f64 / self.bytes_read as f64
        }
    }

    /// Input throughput in KiB per second.
    pub fn kib_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_read as f64 / 1024.0 / secs
        } else {
            0.0
        }
    }

    pub(crate) fn absorb_folder(&mut self, folder: &FolderStats) {
        self.bytes_emitted += folder.compressed_bytes;
        self.data_blocks += folder.data_blocks;
        self.folders += 1;
    }
}
