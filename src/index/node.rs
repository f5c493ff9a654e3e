//! Node data model
//!
//! A node is one learned model over a contiguous key range plus its slot
//! array. Each slot is a tagged union of empty / leaf datum / child
//! pointer; the tag lives in two parallel bitmaps (`none`, `child`) rather
//! than a per-slot byte. Slots are read optimistically by concurrent
//! walkers, so every access goes through raw pointer reads that the caller
//! validates against the node's version lock.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::bitmap::Bitmap;
use crate::constants::TWO_NODE_ITEMS;
use crate::key::{IndexKey, IndexValue};
use crate::model::LinearModel;
use crate::sync::OptLock;

/// Leaf datum stored inline in a slot.
#[derive(Clone, Copy)]
pub(crate) struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

/// Slot payload; the discriminant lives in the node's bitmaps.
pub(crate) union Slot<K: IndexKey, V: IndexValue> {
    pub data: Entry<K, V>,
    pub child: *mut Node<K, V>,
}

/// One slot of a node's item array.
pub(crate) struct Item<K: IndexKey, V: IndexValue>(UnsafeCell<Slot<K, V>>);

impl<K: IndexKey, V: IndexValue> Item<K, V> {
    fn null() -> Self {
        Item(UnsafeCell::new(Slot {
            child: ptr::null_mut(),
        }))
    }
}

/// Allocate a fresh item array of `n` empty slots.
pub(crate) fn make_items<K: IndexKey, V: IndexValue>(n: usize) -> Box<[Item<K, V>]> {
    (0..n).map(|_| Item::null()).collect()
}

/// One model node of the index tree.
pub(crate) struct Node<K: IndexKey, V: IndexValue> {
    pub lock: OptLock,
    /// Built by `build_two`; recycled through the pool on destroy
    pub is_two: bool,
    /// Large nodes never trigger a rebuild
    pub fixed: bool,
    /// Subtree size when this node was built
    pub build_size: usize,
    /// Slot-array length, immutable after build
    pub num_items: usize,
    pub model: LinearModel,
    /// Leaf data reachable from this subtree
    pub size: AtomicUsize,
    pub num_inserts: AtomicU32,
    /// Inserts below this node that promoted a leaf slot into a child
    pub num_insert_to_data: AtomicU32,
    pub items: Box<[Item<K, V>]>,
    /// 1 means empty; 0 means datum or child
    pub none_bitmap: Bitmap,
    /// 1 means child; always 0 where `none_bitmap` is 1
    pub child_bitmap: Bitmap,
}

impl<K: IndexKey, V: IndexValue> Node<K, V> {
    /// Predicted slot for `key` in this node.
    #[inline]
    pub fn predict(&self, key: K) -> usize {
        self.model.predict_pos(self.num_items, key)
    }

    /// Move the node to the heap and leak it as a raw pointer.
    pub fn into_raw(node: Self) -> *mut Self {
        Box::into_raw(Box::new(node))
    }

    /// Free a node allocated by [`Node::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must be uniquely owned and no thread may still observe it
    /// (guaranteed by the epoch reclaimer or by exclusive access). Child
    /// pointers in the slots are *not* followed.
    pub unsafe fn free(ptr: *mut Self) {
        drop(Box::from_raw(ptr));
    }

    /// Copy out the leaf datum in slot `pos`.
    ///
    /// # Safety
    ///
    /// The caller must validate the node's version after the read before
    /// trusting the result, and the slot must have been written as a datum
    /// at some point (slots are zero-initialized).
    #[inline]
    pub unsafe fn entry_at(&self, pos: usize) -> Entry<K, V> {
        ptr::read(self.items[pos].0.get()).data
    }

    /// Copy out the child pointer in slot `pos`.
    ///
    /// # Safety
    ///
    /// The pointer may only be dereferenced after the node's version has
    /// been re-validated (`check`), which proves the pointer was installed
    /// before the snapshot and is still protected by the current epoch.
    #[inline]
    pub unsafe fn child_at(&self, pos: usize) -> *mut Node<K, V> {
        ptr::read(self.items[pos].0.get()).child
    }

    /// Store a leaf datum into slot `pos`.
    ///
    /// # Safety
    ///
    /// The caller must hold the node's write lock, or have exclusive
    /// access to an unpublished node.
    #[inline]
    pub unsafe fn set_entry(&self, pos: usize, key: K, value: V) {
        ptr::write(
            self.items[pos].0.get(),
            Slot {
                data: Entry { key, value },
            },
        );
    }

    /// Store a child pointer into slot `pos`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Node::set_entry`].
    #[inline]
    pub unsafe fn set_child(&self, pos: usize, child: *mut Node<K, V>) {
        ptr::write(self.items[pos].0.get(), Slot { child });
    }
}

/// Raw node pointer that may cross threads (inside deferred deleters and
/// the two-key pool).
pub(crate) struct RawNode<K: IndexKey, V: IndexValue>(pub *mut Node<K, V>);

// Safety: a RawNode is only ever handed to one owner at a time (the pool's
// vector or a single deferred deleter), so moving it between threads is
// sound.
unsafe impl<K: IndexKey, V: IndexValue> Send for RawNode<K, V> {}

/// Recycle pool for retired two-key nodes.
///
/// `build_two` prefers reusing a pooled node over a fresh allocation;
/// destroyed two-key nodes return here instead of being freed.
pub(crate) struct TwoKeyPool<K: IndexKey, V: IndexValue> {
    nodes: Mutex<Vec<RawNode<K, V>>>,
}

impl<K: IndexKey, V: IndexValue> TwoKeyPool<K, V> {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(Vec::new()),
        }
    }

    /// Pop a recycled node, already reset to the empty two-key state.
    pub fn acquire(&self) -> Option<*mut Node<K, V>> {
        self.nodes.lock().pop().map(|raw| raw.0)
    }

    /// Reset a retired two-key node and return it to the pool.
    ///
    /// # Safety
    ///
    /// `ptr` must be a retired `is_two` node that no thread can still
    /// observe (epoch grace period elapsed, or exclusive access).
    pub unsafe fn release(&self, ptr: *mut Node<K, V>) {
        let node = &*ptr;
        assert!(node.is_two);
        assert_eq!(node.build_size, 2);
        assert_eq!(node.num_items, TWO_NODE_ITEMS);

        node.size.store(2, Ordering::Relaxed);
        node.num_inserts.store(0, Ordering::Relaxed);
        node.num_insert_to_data.store(0, Ordering::Relaxed);
        node.none_bitmap.set_all();
        node.child_bitmap.clear_all();

        self.nodes.lock().push(RawNode(ptr));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.lock().len()
    }
}

impl<K: IndexKey, V: IndexValue> Drop for TwoKeyPool<K, V> {
    fn drop(&mut self) {
        for raw in self.nodes.get_mut().drain(..) {
            // Safety: pooled nodes are unpublished and uniquely owned by
            // the pool.
            unsafe { Node::free(raw.0) };
        }
    }
}

/// Free a whole subtree, recycling two-key nodes through the pool.
///
/// # Safety
///
/// Requires exclusive access to the subtree (destructor or `bulk_load`);
/// never call while concurrent operations may be in flight.
pub(crate) unsafe fn destroy_tree<K: IndexKey, V: IndexValue>(
    root: *mut Node<K, V>,
    pool: &TwoKeyPool<K, V>,
) {
    let mut stack = vec![root];
    while let Some(ptr) = stack.pop() {
        let node = &*ptr;
        for i in 0..node.num_items {
            if node.child_bitmap.get(i) {
                stack.push(node.child_at(i));
            }
        }
        if node.is_two {
            pool.release(ptr);
        } else {
            Node::free(ptr);
        }
    }
}
