//! The batched keyed lookup engine: given a sorted run (optionally with
//! a [`RangeIndex`]) and a set of distinct lookup keys, resolves each
//! key to the half-open offset interval of entries equal to it.
//!
//! Per-key search narrows an offset window via interpolation over the
//! 128-bit key space, reads a small window around the interpolated
//! midpoint, and either resolves outright, narrows further, or falls
//! back to exponential expansion when a single key's run fills an
//! entire read window. Every window read along the way is also used to
//! narrow any other still-unresolved key whose current bounds overlap
//! it, so one batch of keys shares disk traffic.

use std::cmp::Ordering;
use std::ops::Range;

use crate::entry::Entry;
use crate::error::Result;
use crate::io::span::ImmutableSpan;
use crate::key::{Key, OrderKind};
use crate::range_index::RangeIndex;

/// The resolved half-open entry-index range `[lo, hi)` for one lookup
/// key, or `None` if the key is absent from the run.
pub type KeyRange = Option<Range<u64>>;

/// Mutable search state for one in-flight key during a batch.
struct Probe {
    key: Key,
    low: u64,
    high: u64,
    result: Option<KeyRange>,
}

/// Resolve every key in `keys` to its equal-range within `run`, using
/// `index` (if present) to seed initial bounds and prune absent keys
/// without touching `run` at all. Keys need not be sorted or
/// deduplicated.
pub fn batched_lookup(
    run: &ImmutableSpan<Entry>,
    index: Option<&RangeIndex>,
    order: OrderKind,
    keys: &[Key],
    sequential_read_max_bytes: usize,
) -> Result<Vec<KeyRange>> {
    let entry_size = crate::entry::ENTRY_DISK_SIZE;
    let window_threshold = (sequential_read_max_bytes / entry_size).max(3) as u64;
    let n = run.len();

    if n == 0 || keys.is_empty() {
        return Ok(vec![None; keys.len()]);
    }

    let mut probes: Vec<Probe> = keys
        .iter()
        .map(|&key| match index.and_then(|ix| ix.bounding_window(key)) {
            Some((lo, hi)) => Probe { key, low: lo, high: hi, result: None },
            None if index.is_some() => Probe { key, low: 0, high: 0, result: Some(None) },
            None => Probe { key, low: 0, high: n, result: None },
        })
        .collect();

    for i in 0..probes.len() {
        resolve_one(run, order, window_threshold, &mut probes, i)?;
    }

    Ok(probes.into_iter().map(|p| p.result.unwrap_or(None)).collect())
}

fn resolve_one(
    run: &ImmutableSpan<Entry>,
    order: OrderKind,
    window_threshold: u64,
    probes: &mut [Probe],
    idx: usize,
) -> Result<()> {
    loop {
        if probes[idx].result.is_some() {
            return Ok(());
        }
        let (low, high) = (probes[idx].low, probes[idx].high);
        if low >= high {
            probes[idx].result = Some(None);
            return Ok(());
        }

        let key = probes[idx].key;
        let low_value = run.get(low)?.key;
        let high_value = run.get(high - 1)?.key;

        if key.compare(low_value, order) == Ordering::Less || key.compare(high_value, order) == Ordering::Greater {
            probes[idx].result = Some(None);
            return Ok(());
        }

        let window_len = high - low;
        if window_len <= window_threshold {
            let window_keys = read_keys(run, low, high)?;
            let (start, end) = equal_range(&window_keys, key, order);
            narrow_others(order, probes, idx, low, &window_keys);
            probes[idx].result =
                Some(if end > start { Some((low + start as u64)..(low + end as u64)) } else { None });
            return Ok(());
        }

        let mid = interpolate(low, high, key, low_value, high_value, order);
        let half = (window_threshold / 2).max(1);
        let win_low = mid.saturating_sub(half).max(low);
        let win_high = (mid + half).min(high);

        let window_keys = read_keys(run, win_low, win_high)?;
        narrow_others(order, probes, idx, win_low, &window_keys);

        let (start, end) = equal_range(&window_keys, key, order);
        let left_interior = start > 0;
        let right_interior = end < window_keys.len();

        if left_interior && right_interior {
            probes[idx].result = Some(Some((win_low + start as u64)..(win_low + end as u64)));
            return Ok(());
        }
        if start == window_keys.len() {
            // Whole window compares less than key.
            probes[idx].low = win_high;
            continue;
        }
        if end == 0 {
            // Whole window compares greater than key.
            probes[idx].high = win_low;
            continue;
        }
        if left_interior && win_high < high {
            probes[idx].high = win_high;
            continue;
        }
        if right_interior && win_low > low {
            probes[idx].low = win_low;
            continue;
        }
        // The equal-range fills this window from one edge all the way
        // to a bound we can no longer narrow without leaving [low, high):
        // exponential expansion outward to find the true edges.
        return expand_and_finish(run, order, window_threshold, probes, idx, win_low, win_high, key);
    }
}

fn read_keys(run: &ImmutableSpan<Entry>, lo: u64, hi: u64) -> Result<Vec<Key>> {
    (lo..hi).map(|i| run.get(i).map(|e| e.key)).collect()
}

/// `(start, end)` such that `window_keys[start..end]` are exactly the
/// elements equal to `key` under `order`.
fn equal_range(window_keys: &[Key], key: Key, order: OrderKind) -> (usize, usize) {
    let start = window_keys.partition_point(|k| k.compare(key, order) == Ordering::Less);
    let end = start + window_keys[start..].partition_point(|k| k.compare(key, order) == Ordering::Equal);
    (start, end)
}

/// After reading `window_keys` starting at absolute offset
/// `window_start`, narrow every other still-unresolved probe whose
/// bounds overlap this window using what it reveals.
fn narrow_others(
    order: OrderKind,
    probes: &mut [Probe],
    exclude: usize,
    window_start: u64,
    window_keys: &[Key],
) {
    let window_end = window_start + window_keys.len() as u64;
    for j in 0..probes.len() {
        if j == exclude || probes[j].result.is_some() {
            continue;
        }
        let (plow, phigh) = (probes[j].low, probes[j].high);
        if phigh <= window_start || plow >= window_end {
            continue;
        }
        let key = probes[j].key;
        let (start, end) = equal_range(window_keys, key, order);
        if end > start {
            let found_low = window_start + start as u64;
            let found_high = window_start + end as u64;
            let complete = (start > 0 || window_start <= plow) && (end < window_keys.len() || window_end >= phigh);
            if complete {
                probes[j].result = Some(Some(found_low..found_high));
            } else if start == 0 {
                // Equal-range may extend left past this window; narrow
                // the right bound only.
                probes[j].high = found_high;
            } else {
                probes[j].low = found_low;
            }
        } else if start == window_keys.len() {
            probes[j].low = window_end;
        } else if end == 0 {
            probes[j].high = window_start;
        }
    }
}

/// Exponentially expand outward from `[win_low, win_high)` (known to be
/// filled entirely by `key`) until a strictly smaller/greater key is
/// found on each side, then binary-search within the expanded bound to
/// pinpoint the equal-range.
fn expand_and_finish(
    run: &ImmutableSpan<Entry>,
    order: OrderKind,
    window_threshold: u64,
    probes: &mut [Probe],
    idx: usize,
    win_low: u64,
    win_high: u64,
    key: Key,
) -> Result<()> {
    let n = run.len();

    let mut lo_bound = win_low;
    let mut step = (win_high - win_low).max(1);
    while lo_bound > 0 {
        let probe_at = lo_bound.saturating_sub(step);
        let v = run.get(probe_at)?.key;
        lo_bound = probe_at;
        step *= 2;
        if v.compare(key, order) == Ordering::Less {
            break;
        }
    }

    let mut hi_bound = win_high;
    let mut step = (win_high - win_low).max(1);
    while hi_bound < n {
        let probe_at = (hi_bound + step).min(n);
        let v = run.get(probe_at - 1)?.key;
        hi_bound = probe_at;
        step *= 2;
        if v.compare(key, order) == Ordering::Greater {
            break;
        }
    }

    let lower = binary_search_lower(run, order, lo_bound, hi_bound, key)?;
    let upper = binary_search_upper(run, order, lo_bound, hi_bound, key)?;

    probes[idx].result = if upper > lower { Some(Some(lower..upper)) } else { Some(None) };
    Ok(())
}

fn binary_search_lower(run: &ImmutableSpan<Entry>, order: OrderKind, mut lo: u64, mut hi: u64, key: Key) -> Result<u64> {
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let v = run.get(mid)?.key;
        if v.compare(key, order) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

fn binary_search_upper(run: &ImmutableSpan<Entry>, order: OrderKind, mut lo: u64, mut hi: u64, key: Key) -> Result<u64> {
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let v = run.get(mid)?.key;
        if v.compare(key, order) == Ordering::Greater {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    Ok(lo)
}

fn interpolate(low: u64, high: u64, key: Key, low_value: Key, high_value: Key, order: OrderKind) -> u64 {
    if low_value.equals(high_value, order) {
        return low + (high - low) / 2;
    }
    let num = key_distance(low_value, key, order);
    let den = key_distance(low_value, high_value, order);
    if den == 0 {
        return low + (high - low) / 2;
    }
    let span = (high - low - 1) as u128;
    let mid_offset = num.saturating_mul(span) / den;
    (low as u128 + mid_offset).min(high.saturating_sub(1) as u128) as u64
}

/// A 128-bit "distance" between two keys under `order`, used only to
/// weight the interpolation split; saturates at 0 if `b < a`.
fn key_distance(a: Key, b: Key, order: OrderKind) -> u128 {
    key_as_u128(b, order).saturating_sub(key_as_u128(a, order))
}

fn key_as_u128(k: Key, order: OrderKind) -> u128 {
    let quads = match order {
        OrderKind::FullOrder => k.quads(),
        OrderKind::HashOnlyOrder => k.hash_only().quads(),
    };
    ((quads[0] as u128) << 96) | ((quads[1] as u128) << 64) | ((quads[2] as u128) << 32) | (quads[3] as u128)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chess::moves::{MoveKind, ReverseMove};
    use crate::chess::position::Square;
    use crate::chess::Position;
    use crate::entry::CountAndGameOffset;
    use crate::io::file::OutputFile;
    use crate::io::handle_pool::HandlePool;
    use crate::range_index::RangeIndexBuilder;
    use std::sync::Arc;

    fn key_n(n: u32) -> Key {
        let pos = Position::start();
        let rm = ReverseMove {
            from: Square::from_ordinal(0),
            to: Square::from_ordinal(0),
            kind: MoveKind::Normal,
            promoted_piece: None,
        };
        let mut quads = Key::new(&pos, rm, None).quads();
        quads[0] = n;
        Key::from_quads(quads)
    }

    fn build_run(values: &[u32]) -> (tempfile::TempDir, ImmutableSpan<Entry>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = HandlePool::new(8);
        let path = dir.path().join("run.bin");
        let out = OutputFile::create(Arc::clone(&pool), &path, true).unwrap();
        for (i, &v) in values.iter().enumerate() {
            let key = key_n(v);
            let entry = Entry::new(key, i as u32, CountAndGameOffset::single(i as u64));
            out.append(&entry.to_bytes()).unwrap();
        }
        let sealed = Arc::new(out.seal().unwrap());
        (dir, ImmutableSpan::whole_file(sealed))
    }

    #[test]
    fn finds_present_keys_without_index() {
        let values: Vec<u32> = (0..2000).collect();
        let (_dir, run) = build_run(&values);
        let keys = vec![key_n(0), key_n(999), key_n(1999), key_n(500)];
        let results = batched_lookup(&run, None, OrderKind::FullOrder, &keys, 1024).unwrap();
        for (k, r) in keys.iter().zip(results) {
            let range = r.expect("present key resolves");
            assert_eq!(range.len(), 1);
            let got = run.get(range.start).unwrap().key;
            assert!(got.equals(*k, OrderKind::FullOrder));
        }
    }

    #[test]
    fn absent_keys_resolve_to_none() {
        let values: Vec<u32> = (0..100).map(|i| i * 2).collect();
        let (_dir, run) = build_run(&values);
        let keys = vec![key_n(1), key_n(999_999), key_n(0)];
        let results = batched_lookup(&run, None, OrderKind::FullOrder, &keys, 1024).unwrap();
        assert!(results[0].is_none());
        assert!(results[1].is_none());
        assert!(results[2].is_some());
    }

    #[test]
    fn duplicate_keys_return_full_equal_range() {
        let mut values = Vec::new();
        for v in 0..10u32 {
            for _ in 0..5 {
                values.push(v);
            }
        }
        let (_dir, run) = build_run(&values);
        let results = batched_lookup(&run, None, OrderKind::FullOrder, &[key_n(5)], 1024).unwrap();
        let range = results[0].clone().unwrap();
        assert_eq!(range.len(), 5);
    }

    #[test]
    fn large_equal_run_resolves_via_exponential_expansion() {
        let mut values = vec![1u32; 5000];
        values.extend(std::iter::repeat(2u32).take(5000));
        values.extend(std::iter::repeat(3u32).take(5000));
        let (_dir, run) = build_run(&values);
        // Small read window forces the interior of the `2`-run to hit
        // the all-window-filled exponential-expansion path.
        let results = batched_lookup(&run, None, OrderKind::FullOrder, &[key_n(2)], 3 * crate::entry::ENTRY_DISK_SIZE).unwrap();
        let range = results[0].clone().unwrap();
        assert_eq!(range, 5000..10000);
    }

    #[test]
    fn range_index_prunes_without_reading_absent_keys() {
        let values: Vec<u32> = (0..5000).collect();
        let (_dir, run) = build_run(&values);
        let mut builder = RangeIndexBuilder::new(OrderKind::FullOrder, 64);
        for i in 0..run.len() {
            builder.push(run.get(i).unwrap().key, i);
        }
        let index = builder.finish(run.len());

        let results = batched_lookup(&run, Some(&index), OrderKind::FullOrder, &[key_n(4_999_999)], 1024).unwrap();
        assert!(results[0].is_none());

        let results = batched_lookup(&run, Some(&index), OrderKind::FullOrder, &[key_n(2500)], 1024).unwrap();
        let range = results[0].clone().unwrap();
        assert_eq!(run.get(range.start).unwrap().key, key_n(2500));
    }

    #[test]
    fn empty_run_reports_all_absent() {
        let (_dir, run) = build_run(&[]);
        let keys = vec![key_n(1), key_n(2)];
        let results = batched_lookup(&run, None, OrderKind::FullOrder, &keys, 1024).unwrap();
        assert!(results.iter().all(|r| r.is_none()));
    }
}
