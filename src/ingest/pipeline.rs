//! The three-stage ingestion pipeline: producer(s) walk PGN games and
//! emit position entries into classification-keyed buffers, sorter(s)
//! sort each full buffer under FullOrder, and a single writer schedules
//! each sorted buffer as a new run in its partition.
//!
//! Buffers are drawn from a fixed-size [`BufferPool`] so memory use
//! stays bounded regardless of how many files or games are in flight;
//! producers block when the pool is exhausted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use crate::chess::pgn::{parse_game, split_games, GameResult};
use crate::chess::Position;
use crate::config::Config;
use crate::entry::{CountAndGameOffset, Entry};
use crate::error::Result;
use crate::header::{GameHeader, HeaderResult, HeaderStore, PackedDate, PackedEco};
use crate::key::{Classification, Key, OrderKind, Outcome, Tier};
use crate::partition::Partition;

use super::buffer_pool::BufferPool;

/// One PGN file to ingest, tagged with the strength tier its games are
/// attributed to (a corpus is typically organized one file/set per
/// tier; per-game tier selection is out of scope).
pub struct IngestSource {
    pub path: PathBuf,
    pub tier: Tier,
}

/// Aggregate counts returned by a completed ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestStats {
    pub num_games: u64,
    pub num_skipped_games: u64,
    pub num_positions: u64,
}

/// Resolves a classification to the partition its entries belong in.
/// Implemented by the database layer: format-A routes by tier/outcome
/// directory; format-B always returns its single partition, since the
/// classification already lives inside the key.
pub trait ClassifiedPartitions: Sync {
    fn partition_for(&self, classification: Classification) -> &Partition;
}

fn outcome_from_result(result: GameResult) -> Outcome {
    match result {
        GameResult::WhiteWin => Outcome::WhiteWin,
        GameResult::BlackWin => Outcome::BlackWin,
        GameResult::Draw => Outcome::Draw,
    }
}

fn header_result_from_outcome(outcome: Outcome) -> HeaderResult {
    match outcome {
        Outcome::WhiteWin => HeaderResult::WhiteWin,
        Outcome::BlackWin => HeaderResult::BlackWin,
        Outcome::Draw => HeaderResult::Draw,
    }
}

fn all_classifications() -> impl Iterator<Item = Classification> {
    Tier::all().into_iter().flat_map(|tier| Outcome::all().into_iter().map(move |outcome| Classification { tier, outcome }))
}

struct SortJob {
    classification: Classification,
    entries: Vec<Entry>,
}

struct WriteJob {
    classification: Classification,
    entries: Vec<Entry>,
}

/// Split `sources` into `worker_count` blocks of approximately equal
/// total byte size, via simple greedy bin-packing (largest file first,
/// always into the currently-lightest block).
fn partition_sources_by_size(sources: &[IngestSource], worker_count: usize) -> Vec<Vec<&IngestSource>> {
    let worker_count = worker_count.max(1);
    let mut sized: Vec<(&IngestSource, u64)> = sources
        .iter()
        .map(|s| (s, std::fs::metadata(&s.path).map(|m| m.len()).unwrap_or(0)))
        .collect();
    sized.sort_by(|a, b| b.1.cmp(&a.1));

    let mut blocks: Vec<Vec<&IngestSource>> = vec![Vec::new(); worker_count];
    let mut totals = vec![0u64; worker_count];
    for (source, size) in sized {
        let (i, _) = totals.iter().enumerate().min_by_key(|&(_, &t)| t).expect("worker_count >= 1");
        blocks[i].push(source);
        totals[i] += size;
    }
    blocks
}

/// Walk every game in one PGN file, emitting sorter jobs once a
/// classification's buffer fills. A file that can't be opened/read is
/// logged and skipped; I/O errors from the header store abort ingest.
fn run_producer(
    source: &IngestSource,
    header_store: &HeaderStore,
    sort_tx: &Sender<SortJob>,
    buffer_pool: &BufferPool,
    stats: &Mutex<IngestStats>,
) -> Result<()> {
    let text = match std::fs::read_to_string(&source.path) {
        Ok(text) => text,
        Err(e) => {
            log::warn!("skipping unreadable PGN file {:?}: {e}", source.path);
            return Ok(());
        }
    };

    let mut buffers: HashMap<Classification, Vec<Entry>> = HashMap::new();

    for block in split_games(&text) {
        let game = parse_game(block);
        let Some(result) = game.headers.result else {
            stats.lock().unwrap().num_skipped_games += 1;
            continue;
        };
        let classification = Classification { tier: source.tier, outcome: outcome_from_result(result) };

        let header = GameHeader {
            game_idx: 0,
            event: game.headers.event.clone(),
            white: game.headers.white.clone(),
            black: game.headers.black.clone(),
            date: PackedDate::parse(&game.headers.date),
            eco: PackedEco::parse(&game.headers.eco),
            result: header_result_from_outcome(classification.outcome),
            ply_count: 0,
        };
        let (log_offset, game_id) = header_store.add(&header)?;
        header_store.stamp_game_idx(log_offset, game_id)?;

        let visited = crate::chess::pgn::walk_game(Position::start(), &game.sans);
        for (pos, reverse_move) in &visited {
            let key = Key::new(pos, *reverse_move, Some(classification));
            let entry = Entry::new(key, game_id, CountAndGameOffset::single(game_id as u64));

            let buf = buffers.entry(classification).or_insert_with(|| buffer_pool.acquire());
            buf.push(entry);
            if buf.len() >= buffer_pool.buffer_entry_capacity() {
                let full = std::mem::replace(buf, buffer_pool.acquire());
                sort_tx.send(SortJob { classification, entries: full }).expect("sorter stage still running");
            }
        }

        let ply_count = (visited.len() - 1) as u32;
        header_store.rewrite_ply_count(log_offset, ply_count)?;

        let mut s = stats.lock().unwrap();
        s.num_games += 1;
        s.num_positions += visited.len() as u64;
    }

    for (classification, buf) in buffers {
        if buf.is_empty() {
            buffer_pool.release(buf);
        } else {
            sort_tx.send(SortJob { classification, entries: buf }).expect("sorter stage still running");
        }
    }
    Ok(())
}

fn run_producer_block(
    block: &[&IngestSource],
    header_store: &HeaderStore,
    sort_tx: &Sender<SortJob>,
    buffer_pool: &BufferPool,
    stats: &Mutex<IngestStats>,
) -> Result<()> {
    for source in block {
        run_producer(source, header_store, sort_tx, buffer_pool, stats)?;
    }
    Ok(())
}

/// Sort each incoming buffer under FullOrder, tie-breaking on ascending
/// game id, and forward it to the writer.
fn run_sorter(sort_rx: Arc<Mutex<Receiver<SortJob>>>, write_tx: Sender<WriteJob>) {
    loop {
        let job = {
            let rx = sort_rx.lock().unwrap();
            rx.recv()
        };
        match job {
            Ok(SortJob { classification, mut entries }) => {
                entries.sort_by(|a, b| {
                    a.key.compare(b.key, OrderKind::FullOrder).then(a.game_id_tiebreak.cmp(&b.game_id_tiebreak))
                });
                write_tx.send(WriteJob { classification, entries }).expect("writer stage still running");
            }
            Err(_) => break,
        }
    }
}

/// Schedule each sorted buffer as a new run in its partition, on the
/// partition's own async I/O pool, then return a fresh buffer to the
/// pool (the entries vector itself lives on until its write completes,
/// reclaimed by [`Partition::collect_futures`]).
fn run_writer(write_rx: Receiver<WriteJob>, classified: &(dyn ClassifiedPartitions + Sync), buffer_pool: &BufferPool) {
    for job in write_rx {
        let partition = classified.partition_for(job.classification);
        let id = partition.next_id();
        partition.store_unordered(job.entries, id);
        buffer_pool.release(Vec::with_capacity(buffer_pool.buffer_entry_capacity()));
    }
}

/// Ingest `sources` into the partitions `classified` resolves
/// classifications to. In parallel mode, the PGN file list is split
/// into `config.ingest_producer_threads` blocks of roughly equal byte
/// size, each with its own producer (the calling thread serves as the
/// first block's producer); sequential mode uses a single block. The
/// writer is a single thread, so run-id allocation (via
/// [`Partition::next_id`]/[`Partition::store_unordered`]) is already
/// serialized per partition and never collides, without needing a
/// separate id-band reservation scheme.
pub fn ingest(
    sources: &[IngestSource],
    classified: &(dyn ClassifiedPartitions + Sync),
    header_store: &HeaderStore,
    config: &Config,
    parallel: bool,
) -> Result<IngestStats> {
    let worker_count = if parallel { config.ingest_producer_threads.max(1) as usize } else { 1 };
    let sorter_count = config.ingest_sorter_threads.max(1) as usize;

    // 3 tiers x 3 outcomes: the maximum number of distinct classification
    // buffers that can be in flight at once, used as the pool's overcommit
    // margin alongside the producer count.
    const PARTITION_OVERCOMMIT: usize = 9;
    let buffer_entry_capacity =
        (config.max_merge_buffer_size.as_bytes() as usize / crate::entry::ENTRY_DISK_SIZE).max(1);
    let buffer_pool = BufferPool::new(2 * worker_count + PARTITION_OVERCOMMIT, buffer_entry_capacity);

    let blocks = partition_sources_by_size(sources, worker_count);
    let stats = Mutex::new(IngestStats::default());

    let (sort_tx, sort_rx) = mpsc::channel::<SortJob>();
    let (write_tx, write_rx) = mpsc::channel::<WriteJob>();
    let sort_rx = Arc::new(Mutex::new(sort_rx));

    let producer_result = std::thread::scope(|scope| -> Result<()> {
        let writer_handle = scope.spawn(|| run_writer(write_rx, classified, &buffer_pool));

        let mut sorter_handles = Vec::with_capacity(sorter_count);
        for _ in 0..sorter_count {
            let sort_rx = Arc::clone(&sort_rx);
            let write_tx = write_tx.clone();
            sorter_handles.push(scope.spawn(move || run_sorter(sort_rx, write_tx)));
        }
        drop(write_tx);

        let mut blocks_iter = blocks.into_iter();
        let first_block = blocks_iter.next().unwrap_or_default();

        let mut producer_handles = Vec::new();
        for block in blocks_iter {
            let sort_tx = sort_tx.clone();
            let buffer_pool = &buffer_pool;
            let stats = &stats;
            producer_handles.push(
                scope.spawn(move || run_producer_block(&block, header_store, &sort_tx, buffer_pool, stats)),
            );
        }

        let mut result = run_producer_block(&first_block, header_store, &sort_tx, &buffer_pool, &stats);
        drop(sort_tx);

        for handle in producer_handles {
            let block_result = handle.join().expect("producer thread panicked");
            if result.is_ok() {
                result = block_result;
            }
        }

        for handle in sorter_handles {
            handle.join().expect("sorter thread panicked");
        }
        writer_handle.join().expect("writer thread panicked");

        result
    });

    producer_result?;

    for classification in all_classifications() {
        classified.partition_for(classification).collect_futures()?;
    }

    Ok(stats.into_inner().unwrap())
}
