//! Format-A: one partition per (tier, outcome) classification under
//! `<root>/{tier}/{outcome}/`, plus a single header store shared across
//! every tier at `<root>/header` + `<root>/index`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::header::HeaderStore;
use crate::ingest::{ingest, ClassifiedPartitions, IngestSource, IngestStats};
use crate::io::handle_pool::HandlePool;
use crate::io::threadpool::IoThreadPool;
use crate::key::{Classification, Tier};
use crate::manifest;
use crate::partition::Partition;
use crate::query::{self, QueryBackend, Request, Response};

/// Format key recorded in this layout's manifest; requires a matching
/// native-endianness signature since entries are read back with raw
/// `u32`/`u64` decodes rather than a self-describing wire format.
pub const FORMAT_KEY: &str = "posdb.format-a.v1";

/// A database with one partition per classification and a header store
/// shared across all nine of them.
pub struct FormatADatabase {
    root: PathBuf,
    config: Config,
    partitions: HashMap<Classification, Partition>,
    header: HeaderStore,
}

impl FormatADatabase {
    /// Open (creating if absent) the database rooted at `root`: writes
    /// or validates its manifest, then opens all nine partitions and
    /// the shared header store, discovering their existing runs.
    pub fn open(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        manifest::open_or_create(root.join("manifest"), FORMAT_KEY, true)?;

        let pool = HandlePool::new(config.pool_max_open_files as usize);
        let io_pool = Arc::new(IoThreadPool::new(config.io_threadpool_size as usize)?);

        let mut partitions = HashMap::with_capacity(9);
        for classification in Classification::all() {
            let dir = root.join(classification.tier.dir_name()).join(classification.outcome.dir_name());
            let partition = Partition::open(dir, Arc::clone(&pool), Arc::clone(&io_pool), &config)?;
            partitions.insert(classification, partition);
        }

        let header = HeaderStore::open(Arc::clone(&pool), root.join("header"), root.join("index"))?;

        Ok(FormatADatabase { root, config, partitions, header })
    }

    /// Database root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition(&self, classification: Classification) -> &Partition {
        self.partitions.get(&classification).expect("every classification's partition was opened")
    }

    /// Ingest `sources` into their classification-appropriate
    /// partitions, all sharing this database's single header store.
    pub fn import(&self, sources: &[IngestSource], parallel: bool) -> Result<IngestStats> {
        ingest(sources, self, &self.header, &self.config, parallel)
    }

    /// Merge every partition's runs down to one, in place.
    pub fn merge_all(&self, mut progress: impl FnMut(u64, u64)) -> Result<()> {
        for classification in Classification::all() {
            self.partition(classification).merge_all(&mut progress)?;
        }
        Ok(())
    }

    /// Merge every partition into a replica rooted at `dest`, copying
    /// the header store and writing a matching manifest; this database
    /// is left untouched.
    pub fn replicate_merge_all(&self, dest: impl AsRef<Path>, mut progress: impl FnMut(u64, u64)) -> Result<()> {
        let dest = dest.as_ref();
        std::fs::create_dir_all(dest)?;
        for classification in Classification::all() {
            let dir = dest.join(classification.tier.dir_name()).join(classification.outcome.dir_name());
            self.partition(classification).replicate_merge_all(dir, &mut progress)?;
        }
        std::fs::copy(self.root.join("header"), dest.join("header"))?;
        std::fs::copy(self.root.join("index"), dest.join("index"))?;
        manifest::Manifest::new(FORMAT_KEY, true).write(dest.join("manifest"))?;
        Ok(())
    }

    /// Run a query against this database.
    pub fn execute_query(&self, request: Request) -> Result<Response> {
        query::execute(self, request)
    }

    /// Flush buffered writes (the header store's log and offset index;
    /// partition runs are already sealed synchronously as they're written).
    pub fn flush(&self) -> Result<()> {
        self.header.flush()
    }

    /// Wipe every partition and the header store. The manifest is left
    /// in place: the schema hasn't changed, only its contents.
    pub fn clear(&self) -> Result<()> {
        for classification in Classification::all() {
            self.partition(classification).clear()?;
        }
        self.header.clear()
    }
}

impl ClassifiedPartitions for FormatADatabase {
    fn partition_for(&self, classification: Classification) -> &Partition {
        self.partition(classification)
    }
}

impl QueryBackend for FormatADatabase {
    fn partition_for(&self, classification: Classification) -> &Partition {
        self.partition(classification)
    }

    fn header_store_for(&self, _tier: Tier) -> &HeaderStore {
        &self.header
    }

    fn sequential_read_max_bytes(&self) -> usize {
        self.config.sequential_read_max_bytes as usize
    }
}
