//! Node builders
//!
//! Three builders produce nodes: `build_none` (the empty root),
//! `build_two` (the 8-slot node created when a leaf slot collides), and
//! `build_bulk` (bottom-up construction over sorted input, fitting each
//! node's model with FMCD or the three-point method and distributing keys
//! into slots by prediction runs).

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::bitmap::Bitmap;
use crate::constants::{FIXED_SIZE_THRESHOLD, TWO_NODE_ITEMS};
use crate::key::{IndexKey, IndexValue};
use crate::model::LinearModel;
use crate::sync::OptLock;

use super::node::{make_items, Node};
use super::LippIndex;

/// Gap multiplier: the slot array is `size * (gap + 1)` slots.
pub(super) fn compute_gap_count(size: usize) -> usize {
    if size >= 1_000_000 {
        1
    } else if size >= 100_000 {
        2
    } else {
        5
    }
}

/// Build the 1-slot empty node used as the initial root.
pub(super) fn build_none<K: IndexKey, V: IndexValue>() -> *mut Node<K, V> {
    Node::into_raw(Node {
        lock: OptLock::new(),
        is_two: false,
        fixed: false,
        build_size: 0,
        num_items: 1,
        model: LinearModel::default(),
        size: AtomicUsize::new(0),
        num_inserts: AtomicU32::new(0),
        num_insert_to_data: AtomicU32::new(0),
        items: make_items(1),
        none_bitmap: Bitmap::new(1, true),
        child_bitmap: Bitmap::new(1, false),
    })
}

/// Three-point model fit: anchor the model on the two mid-edge keys at the
/// third points of the input so they map to the centres of the left and
/// right thirds of the slot array.
fn fit_three_point<K: IndexKey>(keys: &[K]) -> (LinearModel, usize) {
    let size = keys.len();
    let gap = compute_gap_count(size);

    let mid1_pos = (size - 1) / 3;
    let mid2_pos = (size - 1) * 2 / 3;
    assert!(mid1_pos < mid2_pos);
    assert!(mid2_pos < size - 1);

    let mid1_key = (keys[mid1_pos].to_model() + keys[mid1_pos + 1].to_model()) / 2.0;
    let mid2_key = (keys[mid2_pos].to_model() + keys[mid2_pos + 1].to_model()) / 2.0;

    let num_items = size * (gap + 1);
    let mid1_target = (mid1_pos * (gap + 1) + (gap + 1) / 2) as f64;
    let mid2_target = (mid2_pos * (gap + 1) + (gap + 1) / 2) as f64;

    let a = (mid2_target - mid1_target) / (mid2_key - mid1_key);
    let b = mid1_target - a * mid1_key;
    assert!(a.is_finite());
    assert!(b.is_finite());

    (LinearModel::new(a, b), num_items)
}

/// Where a finished segment's node pointer goes.
enum SlotDst<K: IndexKey, V: IndexValue> {
    Root,
    Child {
        parent: *mut Node<K, V>,
        pos: usize,
    },
}

struct Segment<K: IndexKey, V: IndexValue> {
    begin: usize,
    end: usize,
    dst: SlotDst<K, V>,
}

impl<K: IndexKey, V: IndexValue> LippIndex<K, V> {
    /// Build a two-key node, reusing one from the pool when available.
    ///
    /// The model maps the two keys to slots `num_items / 3` and
    /// `num_items * 2 / 3` of the 8-slot array, which keeps the two
    /// predictions distinct for any representable `key1 < key2`.
    pub(super) fn build_two(
        &self,
        key1: K,
        value1: V,
        key2: K,
        value2: V,
    ) -> *mut Node<K, V> {
        let (key1, value1, key2, value2) = if key1 > key2 {
            (key2, value2, key1, value1)
        } else {
            (key1, value1, key2, value2)
        };
        assert!(key1 < key2, "duplicate key inserted into the index");

        let raw = match self.pool.acquire() {
            Some(ptr) => ptr,
            None => Node::into_raw(Node {
                lock: OptLock::new(),
                is_two: true,
                fixed: false,
                build_size: 2,
                num_items: TWO_NODE_ITEMS,
                model: LinearModel::default(),
                size: AtomicUsize::new(2),
                num_inserts: AtomicU32::new(0),
                num_insert_to_data: AtomicU32::new(0),
                items: make_items(TWO_NODE_ITEMS),
                none_bitmap: Bitmap::new(TWO_NODE_ITEMS, true),
                child_bitmap: Bitmap::new(TWO_NODE_ITEMS, false),
            }),
        };

        let mid1_target = (TWO_NODE_ITEMS / 3) as f64;
        let mid2_target = (TWO_NODE_ITEMS * 2 / 3) as f64;
        let a = (mid2_target - mid1_target) / (key2.to_model() - key1.to_model());
        let b = mid1_target - a * key1.to_model();
        assert!(a.is_finite());
        assert!(b.is_finite());

        // Safety: the node is unpublished (fresh or past its grace period),
        // so exclusive access is guaranteed.
        unsafe {
            {
                let node = &mut *raw;
                node.lock.reset();
                node.model = LinearModel::new(a, b);
            }
            let node = &*raw;
            for (key, value) in [(key1, value1), (key2, value2)] {
                let pos = node.predict(key);
                assert!(node.none_bitmap.get(pos));
                node.none_bitmap.clear(pos);
                node.set_entry(pos, key, value);
            }
        }

        raw
    }

    /// Bulk-build a subtree over sorted, strictly ascending input.
    ///
    /// Works bottom-up through an explicit segment stack: each popped
    /// segment fits a model, drops single-prediction runs straight into
    /// slots, and pushes multi-key runs as child segments.
    pub(super) fn build_bulk(&self, keys: &[K], values: &[V]) -> *mut Node<K, V> {
        assert!(keys.len() >= 2);
        debug_assert_eq!(keys.len(), values.len());

        let mut root = std::ptr::null_mut();
        let mut stack = vec![Segment {
            begin: 0,
            end: keys.len(),
            dst: SlotDst::Root,
        }];

        while let Some(seg) = stack.pop() {
            let size = seg.end - seg.begin;
            assert!(size >= 2);

            let node = if size == 2 {
                self.build_two(
                    keys[seg.begin],
                    values[seg.begin],
                    keys[seg.begin + 1],
                    values[seg.begin + 1],
                )
            } else {
                self.build_inner(
                    &keys[seg.begin..seg.end],
                    &values[seg.begin..seg.end],
                    seg.begin,
                    &mut stack,
                )
            };

            match seg.dst {
                SlotDst::Root => root = node,
                // Safety: the parent is still private to this build.
                SlotDst::Child { parent, pos } => unsafe { (*parent).set_child(pos, node) },
            }
        }

        root
    }

    /// Fit and fill one inner node; child segments land on `stack`.
    fn build_inner(
        &self,
        keys: &[K],
        values: &[V],
        base: usize,
        stack: &mut Vec<Segment<K, V>>,
    ) -> *mut Node<K, V> {
        let size = keys.len();

        let (model, num_items) = if self.config.use_fmcd {
            self.fit_fmcd(keys)
        } else {
            fit_three_point(keys)
        };

        let lr_remains = (size as f64 * self.config.build_lr_remain) as usize;
        let model = LinearModel::new(model.a, model.b + lr_remains as f64);
        let num_items = num_items + lr_remains * 2;

        let raw = Node::into_raw(Node {
            lock: OptLock::new(),
            is_two: false,
            fixed: size > FIXED_SIZE_THRESHOLD,
            build_size: size,
            num_items,
            model,
            size: AtomicUsize::new(size),
            num_inserts: AtomicU32::new(0),
            num_insert_to_data: AtomicU32::new(0),
            items: make_items(num_items),
            none_bitmap: Bitmap::new(num_items, true),
            child_bitmap: Bitmap::new(num_items, false),
        });
        // Safety: the node is private to this build until published.
        let node = unsafe { &*raw };

        // Distribute the inputs left to right: a run of consecutive keys
        // predicting the same slot becomes a child segment, a run of one
        // drops straight into the slot.
        let mut item_i = node.predict(keys[0]);
        let mut offset = 0;
        while offset < size {
            let mut next = offset + 1;
            let mut next_i = 0;
            while next < size {
                next_i = node.predict(keys[next]);
                if next_i == item_i {
                    next += 1;
                } else {
                    break;
                }
            }

            if next == offset + 1 {
                node.none_bitmap.clear(item_i);
                unsafe { node.set_entry(item_i, keys[offset], values[offset]) };
            } else {
                node.none_bitmap.clear(item_i);
                node.child_bitmap.set(item_i);
                stack.push(Segment {
                    begin: base + offset,
                    end: base + next,
                    dst: SlotDst::Child {
                        parent: raw,
                        pos: item_i,
                    },
                });
            }

            if next >= size {
                break;
            }
            item_i = next_i;
            offset = next;
        }

        raw
    }

    /// FMCD model fit (Fastest Minimum Conflict Degree).
    ///
    /// Finds the smallest conflict degree `D` whose `D`-shifted key gaps
    /// all reach the slot width `U`, then sets `a = 1/U`. Aborts to the
    /// three-point fit once `3D > n`.
    fn fit_fmcd(&self, keys: &[K]) -> (LinearModel, usize) {
        let size = keys.len();
        let gap = compute_gap_count(size);
        let l = size * (gap + 1);

        let mut i = 0;
        let mut d = 1;
        assert!(d <= size - 1 - d);
        // U gets a small slack so that a = 1/U stays strictly below the
        // theoretical bound.
        let mut ut =
            (keys[size - 1 - d].to_model() - keys[d].to_model()) / (l - 2) as f64 + 1e-6;
        while i < size - 1 - d {
            while i + d < size && keys[i + d].to_model() - keys[i].to_model() >= ut {
                i += 1;
            }
            if i + d >= size {
                break;
            }
            d += 1;
            if d * 3 > size {
                break;
            }
            assert!(d <= size - 1 - d);
            ut = (keys[size - 1 - d].to_model() - keys[d].to_model()) / (l - 2) as f64 + 1e-6;
        }

        if d * 3 <= size {
            self.stats.fmcd_success.fetch_add(1, Ordering::Relaxed);

            let a = 1.0 / ut;
            let b = (l as f64 - a * (keys[size - 1 - d].to_model() + keys[d].to_model())) / 2.0;
            assert!(a.is_finite());
            assert!(b.is_finite());
            assert!(a >= 0.0);
            (LinearModel::new(a, b), l)
        } else {
            self.stats.fmcd_broken.fetch_add(1, Ordering::Relaxed);
            fit_three_point(keys)
        }
    }
}
