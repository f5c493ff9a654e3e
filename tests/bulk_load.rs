//! Bulk-load tests for oxilipp

use oxilipp::{LippConfig, LippIndex};

#[test]
fn test_bulk_load_round_trip() {
    let mut index = LippIndex::new();
    let pairs: Vec<(u64, u64)> = (0..4096).map(|i| (i * 13 + 5, i)).collect();
    index.bulk_load(&pairs);

    assert_eq!(index.len(), pairs.len());
    for &(k, v) in &pairs {
        assert_eq!(index.lookup(k), Some(v));
    }
    assert!(!index.exists(0));
    assert!(!index.exists(u64::MAX));
    index.verify();
}

#[test]
fn test_bulk_load_cardinalities() {
    let mut index = LippIndex::new();

    index.bulk_load(&[]);
    assert!(index.is_empty());

    index.bulk_load(&[(7u64, 70u64)]);
    assert_eq!(index.len(), 1);
    assert_eq!(index.lookup(7), Some(70));

    index.bulk_load(&[(1, 10), (2, 20)]);
    assert_eq!(index.len(), 2);
    assert_eq!(index.lookup(1), Some(10));
    assert_eq!(index.lookup(2), Some(20));
    assert_eq!(index.lookup(7), None);

    index.bulk_load(&[(5, 50), (6, 60), (8, 80)]);
    assert_eq!(index.len(), 3);
    assert_eq!(index.lookup(5), Some(50));
    assert_eq!(index.lookup(6), Some(60));
    assert_eq!(index.lookup(8), Some(80));
    assert_eq!(index.lookup(1), None);
    index.verify();
}

#[test]
fn test_fmcd_uniform_keys() {
    let mut index = LippIndex::with_config(LippConfig::new().with_use_fmcd(true));
    let pairs: Vec<(u64, u64)> = (0..1024).map(|i| (i * 1000, i)).collect();
    index.bulk_load(&pairs);

    assert!(index.stats().fmcd_success_times >= 1);
    for i in 0..1024u64 {
        assert_eq!(index.lookup(i * 1000), Some(i));
    }
    index.verify();
}

#[test]
fn test_fmcd_skewed_keys_fall_back_or_recurse() {
    // Heavily clustered keys defeat a single linear model; the build must
    // still terminate with every key retrievable.
    let mut index = LippIndex::new();
    let mut keys: Vec<u64> = Vec::new();
    for cluster in 0..32u64 {
        let base = cluster * 1_000_000_000;
        for j in 0..32 {
            keys.push(base + j);
        }
    }
    let pairs: Vec<(u64, u64)> = keys.iter().map(|&k| (k, k / 3)).collect();
    index.bulk_load(&pairs);

    for &(k, v) in &pairs {
        assert_eq!(index.lookup(k), Some(v));
    }
    index.verify();
}

#[test]
fn test_insert_after_bulk_load() {
    let mut index = LippIndex::new();
    let pairs: Vec<(u64, u64)> = (0..256).map(|i| (i * 100, i)).collect();
    index.bulk_load(&pairs);

    // Fill some of the gaps the bulk build left open.
    for i in 0..256u64 {
        index.insert(i * 100 + 37, i + 10_000);
    }

    assert_eq!(index.len(), 512);
    for i in 0..256u64 {
        assert_eq!(index.lookup(i * 100), Some(i));
        assert_eq!(index.lookup(i * 100 + 37), Some(i + 10_000));
    }
    index.verify();
}

#[test]
fn test_bulk_load_replaces_previous_contents() {
    let mut index = LippIndex::new();
    index.bulk_load(&(0..100u64).map(|i| (i, i)).collect::<Vec<_>>());
    index.bulk_load(&(1000..1100u64).map(|i| (i, i)).collect::<Vec<_>>());

    assert_eq!(index.len(), 100);
    assert!(!index.exists(50));
    assert_eq!(index.lookup(1050), Some(1050));
    index.verify();
}
