//! Format-B: one shared partition at `<root>/data/`, with the
//! classification folded into each entry's key, plus one header store
//! per tier at `<root>/header_{tier}` + `<root>/index_{tier}` (each
//! tier's games are numbered independently, so first/last boundary ids
//! are only meaningful within their own tier's header store).

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

/// Format key recorded in this layout's manifest. Unlike format-A,
/// entries don't need a native-endianness signature: `Key`/`Entry`
/// bytes are always little-endian regardless of host, so format-B
/// could equally be read cross-endian — this flag just records that
/// the original layout's choice was made deliberately, not that the
/// bytes themselves differ.
pub const FORMAT_KEY: &str = "posdb.format-b.v1";

/// A database with a single shared partition and one header store per
/// tier.
pub struct FormatBDatabase {
    root: PathBuf,
    config: Config,
    partition: Partition,
    headers: [HeaderStore; 3],
}

struct SharedPartition<'a>(&'a Partition);

impl ClassifiedPartitions for SharedPartition<'_> {
    fn partition_for(&self, _classification: Classification) -> &Partition {
        self.0
    }
}

impl FormatBDatabase {
    /// Open (creating if absent) the database rooted at `root`: writes
    /// or validates its manifest, then opens the shared partition and
    /// the three per-tier header stores.
    pub fn open(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        manifest::open_or_create(root.join("manifest"), FORMAT_KEY, false)?;

        let pool = HandlePool::new(config.pool_max_open_files as usize);
        let io_pool = Arc::new(IoThreadPool::new(config.io_threadpool_size as usize)?);

        let partition = Partition::open(root.join("data"), Arc::clone(&pool), Arc::clone(&io_pool), &config)?;

        let headers = Tier::all().map(|tier| {
            let log = root.join(format!("header_{}", tier.dir_name()));
            let offsets = root.join(format!("index_{}", tier.dir_name()));
            HeaderStore::open(Arc::clone(&pool), log, offsets)
        });
        let [h0, h1, h2] = headers;
        let headers = [h0?, h1?, h2?];

        Ok(FormatBDatabase { root, config, partition, headers })
    }

    /// Database root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn header_for(&self, tier: Tier) -> &HeaderStore {
        &self.headers[tier.packed_ordinal() as usize]
    }

    /// Ingest `sources`, grouped by tier so each group is ingested
    /// against its own header store while sharing the one partition.
    pub fn import(&self, sources: &[IngestSource], parallel: bool) -> Result<IngestStats> {
        let mut total = IngestStats::default();
        let sink = SharedPartition(&self.partition);
        for tier in Tier::all() {
            let group: Vec<IngestSource> =
                sources.iter().filter(|s| s.tier == tier).map(|s| IngestSource { path: s.path.clone(), tier }).collect();
            if group.is_empty() {
                continue;
            }
            let stats = ingest(&group, &sink, self.header_for(tier), &self.config, parallel)?;
            total.num_games += stats.num_games;
            total.num_skipped_games += stats.num_skipped_games;
            total.num_positions += stats.num_positions;
        }
        Ok(total)
    }

    /// Merge the shared partition's runs down to one, in place.
    pub fn merge_all(&self, progress: impl FnMut(u64, u64)) -> Result<()> {
        self.partition.merge_all(progress)
    }

    /// Merge the shared partition into a replica rooted at `dest`,
    /// copying every header store and writing a matching manifest;
    /// this database is left untouched.
    pub fn replicate_merge_all(&self, dest: impl AsRef<Path>, progress: impl FnMut(u64, u64)) -> Result<()> {
        let dest = dest.as_ref();
        std::fs::create_dir_all(dest)?;
        self.partition.replicate_merge_all(dest.join("data"), progress)?;
        for tier in Tier::all() {
            for prefix in ["header_", "index_"] {
                let name = format!("{prefix}{}", tier.dir_name());
                std::fs::copy(self.root.join(&name), dest.join(&name))?;
            }
        }
        manifest::Manifest::new(FORMAT_KEY, false).write(dest.join("manifest"))?;
        Ok(())
    }

    /// Run a query against this database.
    pub fn execute_query(&self, request: Request) -> Result<Response> {
        query::execute(self, request)
    }

    /// Flush every header store's buffered log and offset index writes.
    pub fn flush(&self) -> Result<()> {
        for header in &self.headers {
            header.flush()?;
        }
        Ok(())
    }

    /// Wipe the shared partition and every header store. The manifest
    /// is left in place.
    pub fn clear(&self) -> Result<()> {
        self.partition.clear()?;
        for header in &self.headers {
            header.clear()?;
        }
        Ok(())
    }
}

impl QueryBackend for FormatBDatabase {
    fn partition_for(&self, _classification: Classification) -> &Partition {
        &self.partition
    }

    fn header_store_for(&self, tier: Tier) -> &HeaderStore {
        self.header_for(tier)
    }

    fn sequential_read_max_bytes(&self) -> usize {
        self.config.sequential_read_max_bytes as usize
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::Outcome;

    fn write_pgn(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn open_creates_shared_partition_and_three_header_stores() {
        let dir = tempfile::tempdir().unwrap();
        let db = FormatBDatabase::open(dir.path(), Config::default()).unwrap();
        assert_eq!(db.partition.run_count(), 0);
        for tier in Tier::all() {
            assert_eq!(db.header_for(tier).len().unwrap(), 0);
        }
        assert!(dir.path().join("manifest").exists());
    }

    #[test]
    fn games_from_different_tiers_get_independent_ids_in_one_partition() {
        let dir = tempfile::tempdir().unwrap();
        let db = FormatBDatabase::open(dir.path(), Config::default()).unwrap();

        let human_pgn = "[Event \"A\"]\n[Result \"1-0\"]\n\n1. e4 e5 1-0\n";
        let engine_pgn = "[Event \"B\"]\n[Result \"0-1\"]\n\n1. e4 e5 0-1\n";
        let human_path = write_pgn(dir.path(), "human.pgn", human_pgn);
        let engine_path = write_pgn(dir.path(), "engine.pgn", engine_pgn);

        let sources =
            vec![IngestSource { path: human_path, tier: Tier::Human }, IngestSource { path: engine_path, tier: Tier::Engine }];
        let stats = db.import(&sources, false).unwrap();
        assert_eq!(stats.num_games, 2);

        assert_eq!(db.header_for(Tier::Human).len().unwrap(), 1);
        assert_eq!(db.header_for(Tier::Engine).len().unwrap(), 1);
        assert_eq!(db.header_for(Tier::Server).len().unwrap(), 0);
        assert!(db.partition.run_count() >= 1);
    }

    #[test]
    fn query_all_category_finds_games_across_tiers_sharing_the_partition() {
        let dir = tempfile::tempdir().unwrap();
        let db = FormatBDatabase::open(dir.path(), Config::default()).unwrap();

        let human_pgn = "[Event \"A\"]\n[Result \"1-0\"]\n\n1. e4 e5 1-0\n";
        let human_path = write_pgn(dir.path(), "human.pgn", human_pgn);
        db.import(&[IngestSource { path: human_path, tier: Tier::Human }], false).unwrap();

        let request = Request {
            token: "t".to_string(),
            positions: vec![query::PositionRequest { fen: crate::chess::Position::start().to_fen(), mv: None }],
            levels: vec![Tier::Human, Tier::Engine, Tier::Server],
            results: vec![Outcome::WhiteWin, Outcome::BlackWin, Outcome::Draw],
            continuations: None,
            transpositions: None,
            all: Some(query::FetchingOptions {
                fetch_children: false,
                fetch_first_game: true,
                fetch_last_game: true,
                fetch_first_game_for_each_child: false,
                fetch_last_game_for_each_child: false,
            }),
        };
        let response = db.execute_query(request).unwrap();
        let root_entries = &response.roots[0].all.as_ref().unwrap().moves["--"];
        let human_win = root_entries.iter().find(|e| e.level == Tier::Human && e.result == Outcome::WhiteWin).unwrap();
        assert_eq!(human_win.count, 1);
    }

    #[test]
    fn clear_empties_the_partition_and_every_header_store() {
        let dir = tempfile::tempdir().unwrap();
        let db = FormatBDatabase::open(dir.path(), Config::default()).unwrap();
        let pgn = "[Event \"A\"]\n[Result \"1-0\"]\n\n1. e4 e5 1-0\n";
        let path = write_pgn(dir.path(), "games.pgn", pgn);
        db.import(&[IngestSource { path, tier: Tier::Human }], false).unwrap();

        db.clear().unwrap();
        assert_eq!(db.partition.run_count(), 0);
        for tier in Tier::all() {
            assert_eq!(db.header_for(tier).len().unwrap(), 0);
        }
    }
}
