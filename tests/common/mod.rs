//! Shared end-to-end test harness: the handful of scenario tests in
//! this directory run identically against both on-disk layouts, so
//! this wraps whichever one is under test behind one small enum
//! instead of duplicating each scenario per format.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use posdb::database::{FormatADatabase, FormatBDatabase};
use posdb::ingest::{IngestSource, IngestStats};
use posdb::query::{Request, Response};
use posdb::{Config, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseFormat {
    A,
    B,
}

pub const ALL_FORMATS: [DatabaseFormat; 2] = [DatabaseFormat::A, DatabaseFormat::B];

pub enum TestDb {
    A(FormatADatabase),
    B(FormatBDatabase),
}

impl TestDb {
    pub fn open(format: DatabaseFormat, root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        Ok(match format {
            DatabaseFormat::A => TestDb::A(FormatADatabase::open(root, config)?),
            DatabaseFormat::B => TestDb::B(FormatBDatabase::open(root, config)?),
        })
    }

    pub fn root(&self) -> &Path {
        match self {
            TestDb::A(db) => db.root(),
            TestDb::B(db) => db.root(),
        }
    }

    pub fn import(&self, sources: &[IngestSource], parallel: bool) -> Result<IngestStats> {
        match self {
            TestDb::A(db) => db.import(sources, parallel),
            TestDb::B(db) => db.import(sources, parallel),
        }
    }

    pub fn merge_all(&self) -> Result<()> {
        match self {
            TestDb::A(db) => db.merge_all(|_, _| {}),
            TestDb::B(db) => db.merge_all(|_, _| {}),
        }
    }

    pub fn replicate_merge_all(&self, dest: impl AsRef<Path>) -> Result<()> {
        match self {
            TestDb::A(db) => db.replicate_merge_all(dest, |_, _| {}),
            TestDb::B(db) => db.replicate_merge_all(dest, |_, _| {}),
        }
    }

    pub fn execute_query(&self, request: Request) -> Result<Response> {
        match self {
            TestDb::A(db) => db.execute_query(request),
            TestDb::B(db) => db.execute_query(request),
        }
    }

    pub fn flush(&self) -> Result<()> {
        match self {
            TestDb::A(db) => db.flush(),
            TestDb::B(db) => db.flush(),
        }
    }
}

/// Write `text` to `dir`/`name`, returning the written path.
pub fn write_pgn(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

/// Every regular file under `dir`, relative to it, sorted.
pub fn list_files_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    out.sort();
    out
}
