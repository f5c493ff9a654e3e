//! Model-based fuzz tests for oxilipp
//!
//! Random operation streams are mirrored into a `HashMap` model; the index
//! must agree with the model at every step and after the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use oxilipp::{LippConfig, LippIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn run_model_checked(seed: u64, steps: usize, key_space: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let index: LippIndex<u64, u64> = LippIndex::new();
    let mut model = HashMap::<u64, u64>::new();

    for _ in 0..steps {
        let op = rng.gen_range(0u8..=99);
        let key = rng.gen_range(0..key_space);

        match op {
            0..=49 => {
                // Insert only keys the index has not seen (duplicates are
                // unsupported).
                if !model.contains_key(&key) {
                    let value = rng.gen::<u64>();
                    index.insert(key, value);
                    model.insert(key, value);
                }
            }
            50..=79 => {
                assert_eq!(index.lookup(key), model.get(&key).copied());
            }
            _ => {
                assert_eq!(index.exists(key), model.contains_key(&key));
            }
        }
    }

    assert_eq!(index.len(), model.len());
    for (&k, &v) in &model {
        assert_eq!(index.lookup(k), Some(v), "model mismatch for key {}", k);
    }
    index.verify();
}

#[test]
fn fuzz_small_key_space() {
    // Dense key space: lots of collisions and two-key promotions.
    run_model_checked(0xdead_beef, 20_000, 4_096);
}

#[test]
fn fuzz_large_key_space() {
    run_model_checked(0xfeed_face, 20_000, u64::MAX);
}

#[test]
fn fuzz_three_point_fitter() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut index = LippIndex::with_config(LippConfig::new().with_use_fmcd(false));
    let mut model = HashMap::<u64, u64>::new();

    let mut pairs: Vec<(u64, u64)> = Vec::new();
    let mut last = 0u64;
    for _ in 0..2_000 {
        last += rng.gen_range(1..1_000);
        let value = rng.gen::<u64>();
        pairs.push((last, value));
        model.insert(last, value);
    }
    index.bulk_load(&pairs);

    for _ in 0..5_000 {
        let key = rng.gen_range(0..last + 1_000);
        if rng.gen_bool(0.5) && !model.contains_key(&key) {
            let value = rng.gen::<u64>();
            index.insert(key, value);
            model.insert(key, value);
        } else {
            assert_eq!(index.lookup(key), model.get(&key).copied());
        }
    }

    assert_eq!(index.len(), model.len());
    index.verify();
}

#[test]
fn fuzz_concurrent_disjoint_streams() {
    // Each worker owns a residue class, inserts random keys from it, and
    // checks its own committed writes while the others churn.
    let index: Arc<LippIndex<u64, u64>> = Arc::new(LippIndex::new());
    let threads = 4u64;

    let mut handles = Vec::new();
    for t in 0..threads {
        let index = index.clone();
        handles.push(thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(t);
            let mut mine = HashMap::<u64, u64>::new();

            for _ in 0..5_000 {
                if rng.gen_bool(0.7) {
                    let key = rng.gen_range(0..1_000_000u64) * threads + t;
                    if !mine.contains_key(&key) {
                        let value = rng.gen::<u64>();
                        index.insert(key, value);
                        mine.insert(key, value);
                    }
                } else if let Some(&k) = mine.keys().next() {
                    assert_eq!(index.lookup(k), Some(mine[&k]));
                }
            }
            mine
        }));
    }

    let mut union = HashMap::new();
    for handle in handles {
        union.extend(handle.join().unwrap());
    }

    assert_eq!(index.len(), union.len());
    for (&k, &v) in &union {
        assert_eq!(index.lookup(k), Some(v));
    }
    index.verify();
}
