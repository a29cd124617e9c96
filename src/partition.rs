//! A partition: a directory holding an ordered set of sorted runs, plus
//! their range indexes, supporting scheduled (async) and synchronous
//! appends and multi-way merge compaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::entry::{Entry, ENTRY_DISK_SIZE};
use crate::error::{PosDbError, Result};
use crate::io::file::{ImmutableFile, OutputFile};
use crate::io::handle_pool::HandlePool;
use crate::io::sort::merge_runs;
use crate::io::span::ImmutableSpan;
use crate::io::threadpool::IoThreadPool;
use crate::key::OrderKind;
use crate::range_index::{RangeIndex, RangeIndexBuilder};

/// A sealed, on-disk run plus its two range indexes.
#[derive(Clone)]
pub struct Run {
    pub id: u32,
    pub data: ImmutableSpan<Entry>,
    /// Index over [`OrderKind::HashOnlyOrder`].
    pub index_hash: RangeIndex,
    /// Index over [`OrderKind::FullOrder`].
    pub index_full: RangeIndex,
}

/// A run scheduled on the async pipeline, not yet promoted into the
/// partition's run list.
pub struct FutureFile {
    id: u32,
    future: crate::io::threadpool::IoFuture<Result<Run>>,
}

impl FutureFile {
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// A named temporary file under a partition directory, committed to its
/// final name on success and removed on drop otherwise.
struct TempRun {
    path: PathBuf,
    committed: bool,
}

impl TempRun {
    fn new(dir: &Path, tag: &str) -> Self {
        TempRun { path: dir.join(format!(".tmp-{tag}")), committed: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn commit(mut self, dest: &Path) -> Result<()> {
        std::fs::rename(&self.path, dest)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for TempRun {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn index_file_name(id: u32, order: OrderKind) -> String {
    match order {
        OrderKind::HashOnlyOrder => format!("{id}_index0"),
        OrderKind::FullOrder => format!("{id}_index1"),
    }
}

fn write_index_file(pool: &Arc<HandlePool>, dir: &Path, id: u32, order: OrderKind, index: &RangeIndex) -> Result<()> {
    let name = index_file_name(id, order);
    let tmp = TempRun::new(dir, &name);
    let out = OutputFile::create(Arc::clone(pool), tmp.path(), true)?;
    out.append(&index.to_bytes())?;
    out.flush()?;
    drop(out);
    tmp.commit(&dir.join(name))
}

fn read_index_file(pool: &Arc<HandlePool>, dir: &Path, id: u32, order: OrderKind) -> Result<RangeIndex> {
    let path = dir.join(index_file_name(id, order));
    let file = ImmutableFile::open(Arc::clone(pool), &path)?;
    let mut buf = vec![0u8; file.len() as usize];
    if !buf.is_empty() {
        file.read_at(&mut buf, 0)?;
    }
    Ok(RangeIndex::from_bytes(&buf, order))
}

/// Write `entries` (already sorted under [`OrderKind::FullOrder`]) to a
/// fresh run `id` under `dir`, building and persisting both range
/// indexes alongside it.
fn write_new_run(pool: &Arc<HandlePool>, dir: &Path, id: u32, entries: &[Entry], granularity: u64) -> Result<Run> {
    let mut builder_hash = RangeIndexBuilder::new(OrderKind::HashOnlyOrder, granularity);
    let mut builder_full = RangeIndexBuilder::new(OrderKind::FullOrder, granularity);

    let main_tmp = TempRun::new(dir, &format!("run-{id}"));
    let out = OutputFile::create(Arc::clone(pool), main_tmp.path(), true)?;
    for (i, e) in entries.iter().enumerate() {
        out.append(&e.to_bytes())?;
        builder_hash.push(e.key, i as u64);
        builder_full.push(e.key, i as u64);
    }
    out.flush()?;
    drop(out);

    let index_hash = builder_hash.finish(entries.len() as u64);
    let index_full = builder_full.finish(entries.len() as u64);

    let main_path = dir.join(id.to_string());
    main_tmp.commit(&main_path)?;
    write_index_file(pool, dir, id, OrderKind::HashOnlyOrder, &index_hash)?;
    write_index_file(pool, dir, id, OrderKind::FullOrder, &index_full)?;

    let main_file = Arc::new(ImmutableFile::open(Arc::clone(pool), &main_path)?);
    Ok(Run { id, data: ImmutableSpan::whole_file(main_file), index_hash, index_full })
}

/// Merge `runs` (already in ascending-id, and thus ascending-FullOrder-tie-break,
/// order) into one new run `new_id` under `dest_dir`.
fn merge_runs_into(
    pool: &Arc<HandlePool>,
    dest_dir: &Path,
    new_id: u32,
    runs: &[Run],
    granularity: u64,
    priority_queue_threshold: u32,
    sequential_read_max_bytes: usize,
    mut progress: impl FnMut(u64, u64),
) -> Result<Run> {
    let mut builder_hash = RangeIndexBuilder::new(OrderKind::HashOnlyOrder, granularity);
    let mut builder_full = RangeIndexBuilder::new(OrderKind::FullOrder, granularity);

    let total: u64 = runs.iter().map(|r| r.data.len()).sum();
    let mut done = 0u64;

    let main_tmp = TempRun::new(dest_dir, &format!("run-{new_id}"));
    let out = OutputFile::create(Arc::clone(pool), main_tmp.path(), true)?;
    let spans: Vec<ImmutableSpan<Entry>> = runs.iter().map(|r| r.data.clone()).collect();

    merge_runs(
        &spans,
        |a: &Entry, b: &Entry| a.key.compare(b.key, OrderKind::FullOrder),
        sequential_read_max_bytes,
        priority_queue_threshold as usize,
        |entry| {
            out.append(&entry.to_bytes())?;
            builder_hash.push(entry.key, done);
            builder_full.push(entry.key, done);
            done += 1;
            progress(done, total);
            Ok(())
        },
    )?;
    out.flush()?;
    drop(out);

    let index_hash = builder_hash.finish(done);
    let index_full = builder_full.finish(done);

    let main_path = dest_dir.join(new_id.to_string());
    main_tmp.commit(&main_path)?;
    write_index_file(pool, dest_dir, new_id, OrderKind::HashOnlyOrder, &index_hash)?;
    write_index_file(pool, dest_dir, new_id, OrderKind::FullOrder, &index_full)?;

    let main_file = Arc::new(ImmutableFile::open(Arc::clone(pool), &main_path)?);
    Ok(Run { id: new_id, data: ImmutableSpan::whole_file(main_file), index_hash, index_full })
}

fn discover_runs(dir: &Path, pool: &Arc<HandlePool>) -> Result<Vec<Run>> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        // A run file's name is a bare decimal u32; index siblings carry a
        // `_index0`/`_index1` suffix and so fail this parse already.
        let id: u32 = match name.parse() {
            Ok(id) => id,
            Err(_) => continue,
        };
        if entry.metadata()?.len() == 0 {
            continue;
        }
        ids.push(id);
    }
    ids.sort_unstable();

    let mut runs = Vec::with_capacity(ids.len());
    for id in ids {
        let main_path = dir.join(id.to_string());
        let main_file = Arc::new(ImmutableFile::open(Arc::clone(pool), &main_path)?);
        if main_file.len() % ENTRY_DISK_SIZE as u64 != 0 {
            return Err(PosDbError::CorruptRun(main_path));
        }
        let data: ImmutableSpan<Entry> = ImmutableSpan::whole_file(main_file);
        let index_hash = read_index_file(pool, dir, id, OrderKind::HashOnlyOrder)?;
        let index_full = read_index_file(pool, dir, id, OrderKind::FullOrder)?;
        runs.push(Run { id, data, index_hash, index_full });
    }
    Ok(runs)
}

/// A directory of ordered runs, plus the bookkeeping to schedule new
/// ones asynchronously and to compact the set into a single run.
pub struct Partition {
    dir: PathBuf,
    pool: Arc<HandlePool>,
    io_pool: Arc<IoThreadPool>,
    index_granularity: u64,
    merge_priority_queue_threshold: u32,
    sequential_read_max_bytes: u32,
    runs: Mutex<Vec<Run>>,
    futures: Mutex<BTreeMap<u32, FutureFile>>,
}

impl Partition {
    /// Open (creating if absent) the partition rooted at `dir`,
    /// discovering its existing runs.
    pub fn open(dir: impl Into<PathBuf>, pool: Arc<HandlePool>, io_pool: Arc<IoThreadPool>, config: &Config) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let runs = discover_runs(&dir, &pool)?;
        Ok(Partition {
            dir,
            pool,
            io_pool,
            index_granularity: config.index_granularity,
            merge_priority_queue_threshold: config.merge_priority_queue_threshold,
            sequential_read_max_bytes: config.sequential_read_max_bytes as usize,
            runs: Mutex::new(runs),
            futures: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A snapshot of the run list, in ascending id order.
    pub fn runs(&self) -> Vec<Run> {
        self.runs.lock().unwrap().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// `max(id in futures ∪ files) + 1`, so concurrent schedulers
    /// observe a monotonic allocator.
    pub fn next_id(&self) -> u32 {
        let runs = self.runs.lock().unwrap();
        let futures = self.futures.lock().unwrap();
        let max_run = runs.iter().map(|r| r.id).max();
        let max_future = futures.keys().next_back().copied();
        match max_run.into_iter().chain(max_future).max() {
            Some(m) => m + 1,
            None => 0,
        }
    }

    /// Write `entries` (already sorted under FullOrder) as a new run
    /// with the next id, synchronously.
    pub fn store_ordered(&self, entries: Vec<Entry>) -> Result<u32> {
        let id = self.next_id();
        let run = write_new_run(&self.pool, &self.dir, id, &entries, self.index_granularity)?;
        self.runs.lock().unwrap().push(run);
        Ok(id)
    }

    /// Schedule `entries` (already sorted under FullOrder) to be written
    /// as run `id` on the async I/O pool; the result is not visible via
    /// [`Self::runs`] until [`Self::collect_futures`] is called.
    pub fn store_unordered(&self, entries: Vec<Entry>, id: u32) {
        let pool = Arc::clone(&self.pool);
        let dir = self.dir.clone();
        let granularity = self.index_granularity;
        let future = self.io_pool.submit(move || write_new_run(&pool, &dir, id, &entries, granularity));
        self.futures.lock().unwrap().insert(id, FutureFile { id, future });
    }

    /// Await every outstanding [`FutureFile`] and promote it into the
    /// run list, preserving id order.
    pub fn collect_futures(&self) -> Result<()> {
        let pending: BTreeMap<u32, FutureFile> = std::mem::take(&mut *self.futures.lock().unwrap());
        let mut runs = self.runs.lock().unwrap();
        for (id, ff) in pending {
            let run = ff.future.join()?;
            debug_assert_eq!(run.id, id);
            runs.push(run);
        }
        runs.sort_by_key(|r| r.id);
        Ok(())
    }

    /// Merge every run into one, in place. No-op if fewer than 2 runs.
    pub fn merge_all(&self, progress: impl FnMut(u64, u64)) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        if runs.len() < 2 {
            return Ok(());
        }
        let new_id = runs.iter().map(|r| r.id).min().expect("checked len >= 2");
        let merged = merge_runs_into(
            &self.pool,
            &self.dir,
            new_id,
            &runs,
            self.index_granularity,
            self.merge_priority_queue_threshold,
            self.sequential_read_max_bytes,
            progress,
        )?;

        for old in runs.iter() {
            let _ = std::fs::remove_file(self.dir.join(old.id.to_string()));
            let _ = std::fs::remove_file(self.dir.join(index_file_name(old.id, OrderKind::HashOnlyOrder)));
            let _ = std::fs::remove_file(self.dir.join(index_file_name(old.id, OrderKind::FullOrder)));
        }
        *runs = vec![merged];
        Ok(())
    }

    /// Merge every run into one and write the result into `dest_dir`,
    /// leaving this partition untouched. If this partition holds a
    /// single run, this degenerates to a plain file copy.
    pub fn replicate_merge_all(&self, dest_dir: impl AsRef<Path>, progress: impl FnMut(u64, u64)) -> Result<()> {
        let dest_dir = dest_dir.as_ref();
        std::fs::create_dir_all(dest_dir)?;
        let runs = self.runs.lock().unwrap();

        if runs.is_empty() {
            return Ok(());
        }
        if runs.len() == 1 {
            let run = &runs[0];
            for name in [
                run.id.to_string(),
                index_file_name(run.id, OrderKind::HashOnlyOrder),
                index_file_name(run.id, OrderKind::FullOrder),
            ] {
                std::fs::copy(self.dir.join(&name), dest_dir.join(&name))?;
            }
            return Ok(());
        }

        let new_id = runs.iter().map(|r| r.id).min().expect("checked len >= 2");
        merge_runs_into(
            &self.pool,
            dest_dir,
            new_id,
            &runs,
            self.index_granularity,
            self.merge_priority_queue_threshold,
            self.sequential_read_max_bytes,
            progress,
        )?;
        Ok(())
    }

    /// Remove every run from this partition. Callers must not have
    /// ingestion scheduled concurrently; any uncollected future is
    /// discarded without being joined.
    pub fn clear(&self) -> Result<()> {
        let mut runs = self.runs.lock().unwrap();
        for run in runs.iter() {
            let _ = std::fs::remove_file(self.dir.join(run.id.to_string()));
            let _ = std::fs::remove_file(self.dir.join(index_file_name(run.id, OrderKind::HashOnlyOrder)));
            let _ = std::fs::remove_file(self.dir.join(index_file_name(run.id, OrderKind::FullOrder)));
        }
        runs.clear();
        self.futures.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entry::CountAndGameOffset;
    use crate::key::Key;

    fn entry_for(n: u32, game_id: u32) -> Entry {
        let pos = crate::chess::Position::start();
        let key = Key::new(&pos, crate::chess::ReverseMove::root(), None);
        let mut quads = key.quads();
        quads[0] = n;
        Entry::new(Key::from_quads(quads), game_id, CountAndGameOffset::single(game_id as u64))
    }

    fn open_partition(dir: &Path) -> Partition {
        let pool = HandlePool::new(16);
        let io_pool = Arc::new(IoThreadPool::new(2).unwrap());
        let config = Config::default();
        Partition::open(dir, pool, io_pool, &config).unwrap()
    }

    #[test]
    fn store_ordered_assigns_sequential_ids_and_persists_runs() {
        let dir = tempfile::tempdir().unwrap();
        let partition = open_partition(dir.path());

        let id0 = partition.store_ordered(vec![entry_for(0, 0), entry_for(1, 1)]).unwrap();
        let id1 = partition.store_ordered(vec![entry_for(2, 2)]).unwrap();
        assert_eq!(id0, 0);
        assert_eq!(id1, 1);
        assert_eq!(partition.run_count(), 2);

        // Reopening rediscovers the runs from disk.
        let pool = HandlePool::new(16);
        let io_pool = Arc::new(IoThreadPool::new(2).unwrap());
        let reopened = Partition::open(dir.path(), pool, io_pool, &Config::default()).unwrap();
        assert_eq!(reopened.run_count(), 2);
        assert_eq!(reopened.next_id(), 2);
    }

    #[test]
    fn store_unordered_is_invisible_until_collected() {
        let dir = tempfile::tempdir().unwrap();
        let partition = open_partition(dir.path());

        let id = partition.next_id();
        partition.store_unordered(vec![entry_for(5, 0)], id);
        assert_eq!(partition.run_count(), 0);

        partition.collect_futures().unwrap();
        assert_eq!(partition.run_count(), 1);
        assert_eq!(partition.runs()[0].id, id);
    }

    #[test]
    fn merge_all_is_noop_below_two_runs() {
        let dir = tempfile::tempdir().unwrap();
        let partition = open_partition(dir.path());
        partition.store_ordered(vec![entry_for(0, 0)]).unwrap();
        partition.merge_all(|_, _| {}).unwrap();
        assert_eq!(partition.run_count(), 1);
    }

    #[test]
    fn merge_all_combines_runs_preserving_full_multiset_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let partition = open_partition(dir.path());
        partition.store_ordered(vec![entry_for(0, 0), entry_for(2, 1)]).unwrap();
        partition.store_ordered(vec![entry_for(1, 2), entry_for(3, 3)]).unwrap();

        partition.merge_all(|_, _| {}).unwrap();
        assert_eq!(partition.run_count(), 1);

        let run = &partition.runs()[0];
        assert_eq!(run.id, 0);
        assert_eq!(run.data.len(), 4);
        let values: Vec<u32> = (0..run.data.len()).map(|i| run.data.get(i).unwrap().key.quads()[0]).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[test]
    fn merge_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let partition = open_partition(dir.path());
        partition.store_ordered(vec![entry_for(0, 0)]).unwrap();
        partition.store_ordered(vec![entry_for(1, 1)]).unwrap();
        partition.merge_all(|_, _| {}).unwrap();
        let before: Vec<u32> = partition.runs().iter().map(|r| r.id).collect();
        partition.merge_all(|_, _| {}).unwrap();
        let after: Vec<u32> = partition.runs().iter().map(|r| r.id).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn clear_removes_all_runs_and_their_files() {
        let dir = tempfile::tempdir().unwrap();
        let partition = open_partition(dir.path());
        partition.store_ordered(vec![entry_for(0, 0)]).unwrap();
        partition.store_ordered(vec![entry_for(1, 1)]).unwrap();
        partition.clear().unwrap();
        assert_eq!(partition.run_count(), 0);

        let pool = HandlePool::new(16);
        let io_pool = Arc::new(IoThreadPool::new(2).unwrap());
        let reopened = Partition::open(dir.path(), pool, io_pool, &Config::default()).unwrap();
        assert_eq!(reopened.run_count(), 0);
    }

    #[test]
    fn replicate_merge_all_leaves_source_untouched() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let partition = open_partition(src_dir.path());
        partition.store_ordered(vec![entry_for(0, 0)]).unwrap();
        partition.store_ordered(vec![entry_for(1, 1)]).unwrap();

        partition.replicate_merge_all(dest_dir.path(), |_, _| {}).unwrap();
        assert_eq!(partition.run_count(), 2);

        let pool = HandlePool::new(16);
        let io_pool = Arc::new(IoThreadPool::new(2).unwrap());
        let replica = Partition::open(dest_dir.path(), pool, io_pool, &Config::default()).unwrap();
        assert_eq!(replica.run_count(), 1);
        assert_eq!(replica.runs()[0].data.len(), 2);
    }
}
