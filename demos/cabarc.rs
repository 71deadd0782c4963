use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use cabset::{Archive, CompressionType};
use clap::Parser;

// ========================================================================= //

/// Creates a cabinet, or a set of cabinets, from files on disk.
#[derive(Parser, Debug)]
#[command(
    name = "cabarc",
    version,
    about,
    after_help = "File names may contain wildcards (e.g. /usr/lib/py*/*.pyc); \
                  directory names in recursive mode may not.\n\
                  Use a plus sign (+) as a file name to start a new folder."
)]
struct Args {
    /// Reads more file names from FILE, one per line
    #[arg(short = 'i', value_name = "FILE")]
    list: Option<PathBuf>,
    /// Searches for files in every subdirectory, too
    #[arg(short = 'r')]
    recursive: bool,
    /// Strips PREFIX from item names (* strips all directories)
    #[arg(short = 'P', value_name = "PREFIX")]
    strip: Option<String>,
    /// Sets the compression type: NONE, MSZIP or MSZIP:1..9
    #[arg(short = 'm', value_name = "TYPE", default_value = "mszip:9")]
    compression: CompressionType,
    /// Reserves BYTES in each cabinet header (max 60,000)
    #[arg(short = 's', value_name = "BYTES", default_value_t = 0)]
    reserve: usize,
    /// Limits each cabinet unit of a set to SIZE bytes (at least 50,000);
    /// use # in the cabinet name for the disk number
    #[arg(short = 'd', value_name = "SIZE")]
    max_size: Option<u32>,
    /// Sets a disk label for each unit of a set (# is the disk number)
    #[arg(short = 'l', value_name = "LABEL")]
    label: Option<String>,
    /// Logs debugging output
    #[arg(short = 'D', long = "debug")]
    debug: bool,
    /// The cabinet to create
    cabinet: PathBuf,
    /// Files, directories or wildcard patterns to add
    #[arg(required_unless_present = "list")]
    files: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(filter),
    )
    .format_timestamp(None)
    .init();

    let mut names = args.files.clone();
    if let Some(ref list) = args.list {
        let text = fs::read_to_string(list).with_context(|| {
            format!("Failed to read file list {}", list.display())
        })?;
        names.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
    }
    if names.is_empty() {
        bail!("No files to add");
    }

    let mut archive = Archive::open(&args.cabinet, args.max_size)?;
    if let Some(ref label) = args.label {
        archive.set_disk_label(label)?;
    }
    if args.reserve > 0 {
        archive.set_header_reserve(args.reserve)?;
    }
    archive.set_compression_type(args.compression)?;
    archive.set_strip(args.strip.as_deref());
    archive
        .add_header()
        .with_context(|| format!("Cannot create {}", args.cabinet.display()))?;

    for name in &names {
        if let Err(err) = archive.add_wild(name, args.recursive) {
            log::warn!("Skipping {:?}: {}", name, err);
        }
    }
    let stats = archive.close()?;
    if stats.files_added == 0 {
        bail!("No files to add");
    }

    println!();
    println!("Statistics:");
    println!("-----------");
    println!(
        "{} bytes read from {} file(s) ({} skipped);",
        stats.bytes_read, stats.files_added, stats.files_skipped
    );
    println!(
        "{} bytes emitted in {} folder(s), {} data block(s);",
        stats.bytes_emitted, stats.folders, stats.data_blocks
    );
    println!(
        "{} bytes written in {} cabinet(s).",
        stats.bytes_written, stats.cabinets_written
    );
    println!(
        "Ratio: {:.4}:1. {:.2} seconds elapsed, speed {:.1} KiB/s.",
        stats.ratio(),
        stats.elapsed.as_secs_f64(),
        stats.kib_per_second()
    );
    Ok(())
}

// ========================================================================= //


// ========================================================================= //
