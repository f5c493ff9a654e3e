//! Adaptive subtree rebuilds
//!
//! After every insert the traversal path is walked top-down; the first
//! node whose statistics satisfy the rebuild predicate is re-bulk-loaded
//! from its extracted contents. Lower path nodes are skipped (an ancestor
//! rebuild subsumes them). The retired subtree is handed to the epoch
//! reclaimer, so in-flight readers finish safely.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_utils::Backoff;

use crate::epoch::EpochGuard;
use crate::key::{IndexKey, IndexValue};
use crate::sync::Restart;

use super::node::{Node, RawNode};
use super::LippIndex;

impl<K: IndexKey, V: IndexValue> LippIndex<K, V> {
    /// Walk the insertion path top-down and rebuild the first degraded
    /// node, if any.
    ///
    /// A node qualifies when it is not `fixed`, has quadrupled since its
    /// build, holds at least 64 entries, and at least a tenth of the
    /// inserts since the build collided into two-key children.
    pub(super) fn adjust(&self, guard: &EpochGuard<'_>, path: &[*mut Node<K, V>], key: K) {
        let backoff = Backoff::new();
        'restart: loop {
            for (i, &raw) in path.iter().enumerate() {
                let node = unsafe { &*raw };
                let version = match node.lock.read_lock() {
                    Ok(v) => v,
                    Err(Restart) => {
                        if node.lock.is_obsolete() {
                            // A concurrent rebuild already replaced this
                            // subtree; nothing left to examine.
                            return;
                        }
                        backoff.snooze();
                        continue 'restart;
                    }
                };

                let size = node.size.load(Ordering::Relaxed);
                let num_inserts = node.num_inserts.load(Ordering::Relaxed) as usize;
                let num_insert_to_data =
                    node.num_insert_to_data.load(Ordering::Relaxed) as usize;
                let need_rebuild = !node.fixed
                    && size >= node.build_size * 4
                    && size >= 64
                    && num_insert_to_data * 10 >= num_inserts;

                if !need_rebuild {
                    if node.lock.read_unlock(version).is_err() {
                        if node.lock.is_obsolete() {
                            return;
                        }
                        backoff.snooze();
                        continue 'restart;
                    }
                    continue;
                }

                if node.lock.upgrade_to_write(version).is_err() {
                    backoff.snooze();
                    continue 'restart;
                }
                self.rebuild_at(guard, path, i, key);
                return;
            }
            return;
        }
    }

    /// Rebuild the write-locked node `path[i]` and publish the
    /// replacement.
    fn rebuild_at(&self, guard: &EpochGuard<'_>, path: &[*mut Node<K, V>], i: usize, key: K) {
        let raw = path[i];
        let node = unsafe { &*raw };

        let expected = node.size.load(Ordering::Relaxed);
        let mut keys = Vec::with_capacity(expected);
        let mut values = Vec::with_capacity(expected);
        let doomed = self.scan_subtree(raw, &mut keys, &mut values);

        let new_node = self.build_bulk(&keys, &values);

        if i == 0 {
            self.root.store(new_node, Ordering::Release);
        } else {
            let parent = path[i - 1];
            // Safety: the parent still routes `key` to the slot that held
            // the retired node; a single word store swings the subtree.
            unsafe {
                let pos = (*parent).predict(key);
                (*parent).set_child(pos, new_node);
            }
        }

        // Readers and writers still holding a version of the old node
        // restart from the (new) root.
        node.lock.write_unlock_obsolete();

        for ptr in doomed {
            let pool = Arc::clone(&self.pool);
            let raw = RawNode(ptr);
            guard.defer(move || {
                let raw = raw;
                unsafe {
                    if (*raw.0).is_two {
                        pool.release(raw.0);
                    } else {
                        Node::free(raw.0);
                    }
                }
            });
        }

        self.stats.rebuilds.fetch_add(1, Ordering::Relaxed);
    }

    /// Extract every leaf datum of the subtree in key order and collect
    /// the visited nodes.
    ///
    /// The subtree root is write-locked by the caller; descendants are
    /// scanned under read versions, and any validation failure restarts
    /// the whole scan before anything is scheduled for deletion.
    fn scan_subtree(
        &self,
        root: *mut Node<K, V>,
        keys: &mut Vec<K>,
        values: &mut Vec<V>,
    ) -> Vec<*mut Node<K, V>> {
        let backoff = Backoff::new();
        loop {
            keys.clear();
            values.clear();
            let mut doomed = Vec::new();
            // Safety: the caller's write lock pins the subtree root; the
            // epoch guard keeps all descendants allocated.
            match unsafe { self.scan_node(root, true, keys, values, &mut doomed) } {
                Ok(()) => return doomed,
                Err(Restart) => backoff.snooze(),
            }
        }
    }

    unsafe fn scan_node(
        &self,
        ptr: *mut Node<K, V>,
        is_subtree_root: bool,
        keys: &mut Vec<K>,
        values: &mut Vec<V>,
        doomed: &mut Vec<*mut Node<K, V>>,
    ) -> Result<(), Restart> {
        let node = &*ptr;
        let version = if is_subtree_root {
            None
        } else {
            Some(node.lock.read_lock()?)
        };
        doomed.push(ptr);

        for i in 0..node.num_items {
            if node.none_bitmap.get(i) {
                continue;
            }
            if node.child_bitmap.get(i) {
                self.scan_node(node.child_at(i), false, keys, values, doomed)?;
            } else {
                let entry = node.entry_at(i);
                keys.push(entry.key);
                values.push(entry.value);
            }
        }

        if let Some(version) = version {
            node.lock.read_unlock(version)?;
        }
        Ok(())
    }
}
