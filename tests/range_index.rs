//! Range-index pruning: a query for a key outside a run's covered
//! range resolves via the index alone, and a query for a key present
//! in the middle of a large run still resolves correctly.

use std::sync::Arc;

use posdb::entry::{CountAndGameOffset, Entry};
use posdb::io::handle_pool::HandlePool;
use posdb::io::threadpool::IoThreadPool;
use posdb::key::{Key, OrderKind};
use posdb::lookup::batched_lookup;
use posdb::partition::Partition;
use posdb::Config;

const RUN_LEN: u32 = 20_000;

fn synthetic_entries() -> Vec<Entry> {
    // Ascending FullOrder keys: quads[0..3] carry the ordinal, quads[3]'s
    // low bits are left zero so the packed-tail mask doesn't disturb order.
    (0..RUN_LEN)
        .map(|i| {
            let key = Key::from_quads([0, 0, i, 0]);
            Entry::new(key, i, CountAndGameOffset::single(i as u64))
        })
        .collect()
}

#[test]
fn out_of_range_key_resolves_without_touching_data() {
    let dir = tempfile::tempdir().unwrap();
    let pool = HandlePool::new(32);
    let io_pool = Arc::new(IoThreadPool::new(2).unwrap());
    let partition = Partition::open(dir.path(), Arc::clone(&pool), Arc::clone(&io_pool), &Config::default()).unwrap();

    partition.store_ordered(synthetic_entries()).unwrap();
    let run = &partition.runs()[0];

    let too_low = Key::from_quads([u32::MAX, u32::MAX, u32::MAX, u32::MAX]);
    // This key's ordinal is far above the run's last entry (RUN_LEN - 1),
    // so the range index should report it absent without a data read.
    let results =
        batched_lookup(&run.data, Some(&run.index_full), OrderKind::FullOrder, &[too_low], 32 * 1024).unwrap();
    assert_eq!(results, vec![None]);
}

#[test]
fn present_key_in_the_middle_resolves_to_its_single_entry() {
    let dir = tempfile::tempdir().unwrap();
    let pool = HandlePool::new(32);
    let io_pool = Arc::new(IoThreadPool::new(2).unwrap());
    let partition = Partition::open(dir.path(), Arc::clone(&pool), Arc::clone(&io_pool), &Config::default()).unwrap();

    partition.store_ordered(synthetic_entries()).unwrap();
    let run = &partition.runs()[0];

    let middle = RUN_LEN / 2;
    let key = Key::from_quads([0, 0, middle, 0]);
    let results = batched_lookup(&run.data, Some(&run.index_full), OrderKind::FullOrder, &[key], 32 * 1024).unwrap();

    let range = results[0].clone().expect("middle key must be present");
    assert_eq!(range, middle as u64..middle as u64 + 1);
}

#[test]
fn batched_lookup_shares_reads_across_several_keys() {
    let dir = tempfile::tempdir().unwrap();
    let pool = HandlePool::new(32);
    let io_pool = Arc::new(IoThreadPool::new(2).unwrap());
    let partition = Partition::open(dir.path(), Arc::clone(&pool), Arc::clone(&io_pool), &Config::default()).unwrap();

    partition.store_ordered(synthetic_entries()).unwrap();
    let run = &partition.runs()[0];

    let keys: Vec<Key> = [10u32, 5_000, 10_000, 15_000, RUN_LEN - 1].iter().map(|&i| Key::from_quads([0, 0, i, 0])).collect();
    let results = batched_lookup(&run.data, Some(&run.index_full), OrderKind::FullOrder, &keys, 32 * 1024).unwrap();

    for (i, &ord) in [10u32, 5_000, 10_000, 15_000, RUN_LEN - 1].iter().enumerate() {
        let range = results[i].clone().unwrap_or_else(|| panic!("key {ord} should be present"));
        assert_eq!(range, ord as u64..ord as u64 + 1);
    }
}
