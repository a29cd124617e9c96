//! External sort and multi-way merge over fixed-size record runs.
//!
//! [`external_sort`] buffers items in memory up to a configured chunk
//! size, sorts each chunk, and writes it out as one sorted run.
//! [`merge_runs`] then combines any number of already-sorted runs into
//! one ordered stream, either by a plain linear scan over the runs'
//! current fronts (cheap when there are few runs) or through a binary
//! heap once the run count passes a configurable threshold.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::error::Result;

use super::file::OutputFile;
use super::span::{FixedSizeRecord, ImmutableSpan, SpanIter};

/// Sort `items` in bounded-memory chunks of at most `chunk_records`
/// elements, writing each sorted chunk out as its own run via
/// `make_run`. Returns the resulting sorted runs, in the order they
/// were produced (not merged).
pub fn external_sort<T, C>(
    items: impl IntoIterator<Item = T>,
    mut cmp: C,
    chunk_records: usize,
    mut make_run: impl FnMut(Vec<T>) -> Result<ImmutableSpan<T>>,
) -> Result<Vec<ImmutableSpan<T>>>
where
    T: FixedSizeRecord,
    C: FnMut(&T, &T) -> Ordering,
{
    let chunk_records = chunk_records.max(1);
    let mut runs = Vec::new();
    let mut chunk = Vec::with_capacity(chunk_records);

    for item in items {
        chunk.push(item);
        if chunk.len() >= chunk_records {
            chunk.sort_by(&mut cmp);
            runs.push(make_run(std::mem::replace(&mut chunk, Vec::with_capacity(chunk_records)))?);
        }
    }
    if !chunk.is_empty() {
        chunk.sort_by(&mut cmp);
        runs.push(make_run(chunk)?);
    }
    Ok(runs)
}

/// Write a sorted chunk to a fresh [`OutputFile`] and seal it into a
/// whole-file [`ImmutableSpan`]; the usual `make_run` callback for
/// [`external_sort`] when each chunk gets its own file.
pub fn write_sorted_chunk<T: FixedSizeRecord>(file: OutputFile, chunk: Vec<T>) -> Result<ImmutableSpan<T>> {
    let mut buf = vec![0u8; T::ENCODED_SIZE];
    for item in &chunk {
        item.encode(&mut buf);
        file.append(&buf)?;
    }
    let sealed = Arc::new(file.seal()?);
    Ok(ImmutableSpan::whole_file(sealed))
}

/// An entry parked in the merge heap: the current front value of one
/// run, tagged with which run it came from (used as a stable tie-break
/// so equal keys merge in run order) and the comparator to order by.
struct HeapEntry<'a, T, C> {
    value: T,
    source: usize,
    cmp: &'a C,
}

impl<T, C: Fn(&T, &T) -> Ordering> HeapEntry<'_, T, C> {
    fn order_key(&self, other: &Self) -> Ordering {
        (self.cmp)(&self.value, &other.value).then(self.source.cmp(&other.source))
    }
}

impl<T, C: Fn(&T, &T) -> Ordering> PartialEq for HeapEntry<'_, T, C> {
    fn eq(&self, other: &Self) -> bool {
        self.order_key(other) == Ordering::Equal
    }
}
impl<T, C: Fn(&T, &T) -> Ordering> Eq for HeapEntry<'_, T, C> {}
impl<T, C: Fn(&T, &T) -> Ordering> PartialOrd for HeapEntry<'_, T, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T, C: Fn(&T, &T) -> Ordering> Ord for HeapEntry<'_, T, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the smallest key pops first.
        other.order_key(self)
    }
}

/// Merge already-sorted `runs` into ascending order under `cmp`,
/// invoking `emit` once per record in merged order. Below
/// `priority_queue_threshold` runs, uses a linear scan over each run's
/// current front (fewer allocations, fine for small fan-in); at or
/// above it, uses a binary heap to avoid O(runs) work per output
/// record.
pub fn merge_runs<T, C>(
    runs: &[ImmutableSpan<T>],
    cmp: C,
    read_max_bytes: usize,
    priority_queue_threshold: usize,
    mut emit: impl FnMut(T) -> Result<()>,
) -> Result<()>
where
    T: FixedSizeRecord,
    C: Fn(&T, &T) -> Ordering,
{
    if runs.is_empty() {
        return Ok(());
    }

    let mut iters: Vec<std::iter::Peekable<SpanIter<T>>> =
        runs.iter().map(|r| r.iter(read_max_bytes).peekable()).collect();

    if runs.len() < priority_queue_threshold {
        loop {
            let mut best: Option<usize> = None;
            for i in 0..iters.len() {
                let peeked = match iters[i].peek() {
                    Some(Ok(v)) => v,
                    Some(Err(_)) => return Err(iters[i].next().unwrap().unwrap_err()),
                    None => continue,
                };
                let is_better = match best {
                    None => true,
                    Some(b) => {
                        // `b`'s peek was already confirmed `Some(Ok(_))` above.
                        let b_val = match iters[b].peek().unwrap() {
                            Ok(v) => v,
                            Err(_) => unreachable!(),
                        };
                        cmp(peeked, b_val) == Ordering::Less
                    }
                };
                if is_better {
                    best = Some(i);
                }
            }
            match best {
                Some(i) => emit(iters[i].next().unwrap()?)?,
                None => break,
            }
        }
        return Ok(());
    }

    let mut heap: BinaryHeap<HeapEntry<'_, T, C>> = BinaryHeap::new();
    for (source, it) in iters.iter_mut().enumerate() {
        if let Some(next) = it.next() {
            heap.push(HeapEntry { value: next?, source, cmp: &cmp });
        }
    }
    while let Some(HeapEntry { value, source, .. }) = heap.pop() {
        emit(value)?;
        if let Some(next) = iters[source].next() {
            heap.push(HeapEntry { value: next?, source, cmp: &cmp });
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entry::{CountAndGameOffset, Entry};
    use crate::io::handle_pool::HandlePool;
    use crate::key::{Key, OrderKind};

    fn entry_for(n: u32) -> Entry {
        let pos = crate::chess::Position::start();
        let mut key = Key::new(&pos, crate::chess::ReverseMove::root(), None);
        // Fold n into the low quad so entries sort distinctly for the test.
        let mut quads = key.quads();
        quads[0] = n;
        key = Key::from_quads(quads);
        Entry::new(key, n, CountAndGameOffset::single(n as u64))
    }

    #[test]
    fn external_sort_produces_sorted_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let pool = HandlePool::new(8);
        let items: Vec<Entry> = vec![5, 1, 4, 2, 3, 9, 8, 7, 6, 0].into_iter().map(entry_for).collect();

        let mut file_idx = 0u32;
        let runs = external_sort(
            items,
            |a: &Entry, b: &Entry| a.key.compare(b.key, OrderKind::FullOrder),
            4,
            |chunk| {
                file_idx += 1;
                let path = dir.path().join(format!("chunk{file_idx}.bin"));
                let file = OutputFile::create(Arc::clone(&pool), &path, true).unwrap();
                write_sorted_chunk(file, chunk)
            },
        )
        .unwrap();

        assert_eq!(runs.len(), 3);
        for run in &runs {
            let values: Vec<u32> = (0..run.len()).map(|i| run.get(i).unwrap().key.quads()[0]).collect();
            let mut sorted = values.clone();
            sorted.sort();
            assert_eq!(values, sorted);
        }
    }

    #[test]
    fn merge_runs_interleaves_in_order_both_strategies() {
        let dir = tempfile::tempdir().unwrap();
        let pool = HandlePool::new(8);

        let run_a: Vec<Entry> = vec![0u32, 2, 4, 6].into_iter().map(entry_for).collect();
        let run_b: Vec<Entry> = vec![1u32, 3, 5, 7].into_iter().map(entry_for).collect();

        let mut make_run = |values: Vec<Entry>, name: &str| {
            let path = dir.path().join(name);
            let file = OutputFile::create(Arc::clone(&pool), &path, true).unwrap();
            write_sorted_chunk(file, values).unwrap()
        };
        let span_a = make_run(run_a, "a.bin");
        let span_b = make_run(run_b, "b.bin");

        for threshold in [1usize, 100usize] {
            let mut out = Vec::new();
            merge_runs(
                &[span_a.clone(), span_b.clone()],
                |a: &Entry, b: &Entry| a.key.compare(b.key, OrderKind::FullOrder),
                4096,
                threshold,
                |e| {
                    out.push(e.key.quads()[0]);
                    Ok(())
                },
            )
            .unwrap();
            assert_eq!(out, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        }
    }
}
