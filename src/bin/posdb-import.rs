//! `posdb-import`: ingest one or more PGN files, all under the same
//! strength tier, into a database.

use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::{error, info, LevelFilter};

use posdb::database::{FormatADatabase, FormatBDatabase};
use posdb::ingest::IngestSource;
use posdb::key::Tier;
use posdb::{Config, Result};

/// Args for posdb-import
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct ImportArgs {
    /// Database root directory (created if absent)
    #[clap(long, value_parser)]
    db: PathBuf,
    /// On-disk layout: "a" (one partition per classification) or "b"
    /// (one shared partition, classification embedded in the key)
    #[clap(long, value_parser = parse_format, default_value = "a")]
    format: Format,
    /// Strength tier the given PGN files were played at
    #[clap(long, value_parser = parse_tier)]
    tier: Tier,
    /// Run the producer/sorter stages across multiple worker threads
    #[clap(long)]
    parallel: bool,
    /// PGN files to ingest
    #[clap(required = true, value_parser)]
    files: Vec<PathBuf>,
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

fn parse_tier(s: &str) -> std::result::Result<Tier, String> {
    match s {
        "human" => Ok(Tier::Human),
        "engine" => Ok(Tier::Engine),
        "server" => Ok(Tier::Server),
        other => Err(format!("unrecognized tier {other:?}, expected human/engine/server")),
    }
}

fn main() {
    env_logger::builder().filter_level(LevelFilter::Info).init();

    if let Err(e) = run() {
        error!("{e}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = ImportArgs::parse();

    let sources: Vec<IngestSource> =
        args.files.iter().map(|path| IngestSource { path: path.clone(), tier: args.tier }).collect();

    info!("posdb-import {}", env!("CARGO_PKG_VERSION"));
    info!("ingesting {} file(s) at tier {:?} into {:?}", sources.len(), args.tier, args.db);

    let config = Config::default();
    let stats = match args.format {
        Format::A => {
            let db = FormatADatabase::open(&args.db, config)?;
            let stats = db.import(&sources, args.parallel)?;
            db.flush()?;
            stats
        }
        Format::B => {
            let db = FormatBDatabase::open(&args.db, config)?;
            let stats = db.import(&sources, args.parallel)?;
            db.flush()?;
            stats
        }
    };

    info!(
        "ingested {} games ({} skipped, {} positions)",
        stats.num_games, stats.num_skipped_games, stats.num_positions
    );
    Ok(())
}
