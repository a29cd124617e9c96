//! `posdb-compact`: merge every partition's runs down to one, either in
//! place or into a fresh replica directory.

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::{error, info, LevelFilter};

use posdb::database::{FormatADatabase, FormatBDatabase};
use posdb::{Config, Result};

/// Args for posdb-compact
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct CompactArgs {
    /// Database root directory
    #[clap(long, value_parser)]
    db: PathBuf,
    /// On-disk layout: "a" or "b", matching how the database was created
    #[clap(long, value_parser = parse_format, default_value = "a")]
    format: Format,
    /// Merge into a fresh replica at this path instead of in place;
    /// the source database is left untouched
    #[clap(long, value_parser)]
    replicate_to: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Format {
    A,
    B,
}

fn parse_format(s: &str) -> std::result::Result<Format, String> {
    match s {
        "a" | "A" => Ok(Format::A),
        "b" | "B" => Ok(Format::B),
        other => Err(format!("unrecognized format {other:?}, expected \"a\" or \"b\"")),
    }
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{e}");
        exit(1);
    }
}

fn report_progress(done: u64, total: u64) {
    if total > 0 && (done == total || done % 4096 == 0) {
        info!("merged {done}/{total} entries");
    }
}

fn run() -> Result<()> {
    let args = CompactArgs::parse();
    let config = Config::default();

    match (args.format, &args.replicate_to) {
        (Format::A, None) => FormatADatabase::open(&args.db, config)?.merge_all(report_progress)?,
        (Format::A, Some(dest)) => {
            FormatADatabase::open(&args.db, config)?.replicate_merge_all(dest, report_progress)?
        }
        (Format::B, None) => FormatBDatabase::open(&args.db, config)?.merge_all(report_progress)?,
        (Format::B, Some(dest)) => {
            FormatBDatabase::open(&args.db, config)?.replicate_merge_all(dest, report_progress)?
        }
    }

    info!("compaction complete");
    Ok(())
}
