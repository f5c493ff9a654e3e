//! Adaptive rebuild tests for oxilipp

use oxilipp::LippIndex;

#[test]
fn test_adversarial_collisions_trigger_rebuild() {
    // Bulk-load a sparse key set, then hammer one inter-key gap so every
    // insert collides into the same region of the root.
    let mut index = LippIndex::new();
    let pairs: Vec<(u64, u64)> = (0..128).map(|i| (i * 1000, i)).collect();
    index.bulk_load(&pairs);

    for j in 0..512u64 {
        index.insert(64_001 + j, 1_000_000 + j);
    }

    assert!(
        index.stats().num_rebuilds >= 1,
        "adversarial insert pattern should have rebuilt a subtree"
    );

    // All 640 keys must be retrievable.
    for &(k, v) in &pairs {
        assert_eq!(index.lookup(k), Some(v));
    }
    for j in 0..512u64 {
        assert_eq!(index.lookup(64_001 + j), Some(1_000_000 + j));
    }
    assert_eq!(index.len(), 640);
    index.verify();
}

#[test]
fn test_sequential_append_stays_shallow() {
    // Appending at the right edge chains two-key nodes; rebuilds must keep
    // the depth bounded well below the hard limit.
    let index = LippIndex::new();
    for i in 0..50_000u64 {
        index.insert(i, i);
    }

    assert!(index.stats().num_rebuilds >= 1);
    for i in (0..50_000u64).step_by(997) {
        assert_eq!(index.lookup(i), Some(i));
    }
    assert_eq!(index.len(), 50_000);
    index.verify();
}

#[test]
fn test_rebuild_preserves_all_entries() {
    let index = LippIndex::new();

    // Dense random-ish inserts with enough collisions to rebuild several
    // subtrees.
    let mut key = 1u64;
    for i in 0..20_000u64 {
        key = key.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        index.insert(key >> 16, i);
    }

    let expected = index.len();
    let mut seen = 0;
    let mut probe = 1u64;
    for _ in 0..20_000u64 {
        probe = probe
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        if index.exists(probe >> 16) {
            seen += 1;
        }
    }
    // The LCG stream is duplicate-free within this run, so every
    // generated key must be found.
    assert_eq!(seen, 20_000);
    assert_eq!(expected, 20_000);
    index.verify();
}

#[test]
fn test_no_rebuild_without_degradation() {
    // A pure bulk load followed by nothing must not rebuild.
    let mut index = LippIndex::new();
    index.bulk_load(&(0..10_000u64).map(|i| (i * 3, i)).collect::<Vec<_>>());
    assert_eq!(index.stats().num_rebuilds, 0);

    for i in (0..10_000u64).step_by(131) {
        assert!(index.exists(i * 3));
    }
    assert_eq!(index.stats().num_rebuilds, 0);
}
