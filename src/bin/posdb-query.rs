//! `posdb-query`: run one JSON query request (read from a file or
//! stdin) against a database and print the JSON response.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;
use log::{error, LevelFilter};

use posdb::database::{FormatADatabase, FormatBDatabase};
use posdb::query::Request;
use posdb::{Config, PosDbError, Result};

/// Args for posdb-query
#[derive(Parser)]
#[clap(author, version, about)]
#[clap(propagate_version = true)]
struct QueryArgs {
    /// Database root directory
    #[clap(long, value_parser)]
    db: PathBuf,
    /// On-disk layout: "a" or "b", matching how the database was created
    #[clap(long, value_parser = parse_format, default_value = "a")]
    format: Format,
    /// Path to a JSON request file; reads stdin if omitted
    #[clap(long, value_parser)]
    request: Option<PathBuf>,
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
    env_logger::builder().filter_level(LevelFilter::Warn).init();

    if let Err(e) = run() {
        error!("{e}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = QueryArgs::parse();

    let body = match &args.request {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let request: Request = serde_json::from_str(&body)?;

    let config = Config::default();
    let response = match args.format {
        Format::A => {
            let db = FormatADatabase::open(&args.db, config)?;
            db.execute_query(request)?
        }
        Format::B => {
            let db = FormatBDatabase::open(&args.db, config)?;
            db.execute_query(request)?
        }
    };

    let out = serde_json::to_string_pretty(&response).map_err(PosDbError::from)?;
    println!("{out}");
    Ok(())
}
