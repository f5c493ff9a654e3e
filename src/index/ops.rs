//! Optimistic lookup and insert walks
//!
//! Both walks descend root-to-leaf under hand-over-hand read versions: at
//! most two snapshots are live at once (current node and its parent), the
//! parent is validated before a freshly loaded child pointer is trusted,
//! and any conflict surfaces as `Restart`, retrying the whole walk.

use std::ptr;
use std::sync::atomic::Ordering;

use crate::constants::MAX_DEPTH;
use crate::epoch::EpochGuard;
use crate::key::{IndexKey, IndexValue};
use crate::sync::Restart;

use super::node::Node;
use super::LippIndex;

impl<K: IndexKey, V: IndexValue> LippIndex<K, V> {
    /// One lookup attempt; `Err(Restart)` means retry from the root.
    pub(super) fn try_search(&self, key: K) -> Result<Option<V>, Restart> {
        let root = self.root.load(Ordering::Acquire);
        let mut node = root;
        // Safety: the epoch guard held by the caller keeps every reachable
        // node allocated; version validation covers staleness.
        let mut version = unsafe { (*node).lock.read_lock()? };
        if self.root.load(Ordering::Acquire) != root {
            return Err(Restart);
        }

        let mut parent: Option<(*mut Node<K, V>, u64)> = None;
        loop {
            let n = unsafe { &*node };
            let pos = n.predict(key);

            if let Some((p, pv)) = parent.take() {
                unsafe { (*p).lock.read_unlock(pv)? };
            }

            if n.child_bitmap.get(pos) {
                let child = unsafe { n.child_at(pos) };
                // The child pointer is only trusted once the parent proves
                // unchanged since the snapshot.
                n.lock.check(version)?;
                let child_version = unsafe { (*child).lock.read_lock()? };
                parent = Some((node, version));
                node = child;
                version = child_version;
            } else if n.none_bitmap.get(pos) {
                n.lock.read_unlock(version)?;
                return Ok(None);
            } else {
                let entry = unsafe { n.entry_at(pos) };
                n.lock.read_unlock(version)?;
                return Ok((entry.key == key).then_some(entry.value));
            }
        }
    }

    /// One permissive lookup attempt: trusts the prediction and skips the
    /// emptiness and key-equality checks.
    ///
    /// # Safety
    ///
    /// The key must be present in the index, otherwise the slot read may
    /// return an uninitialized or unrelated datum.
    pub(super) unsafe fn try_search_unchecked(&self, key: K) -> Result<V, Restart> {
        let root = self.root.load(Ordering::Acquire);
        let mut node = root;
        let mut version = (*node).lock.read_lock()?;
        if self.root.load(Ordering::Acquire) != root {
            return Err(Restart);
        }

        let mut parent: Option<(*mut Node<K, V>, u64)> = None;
        loop {
            let n = &*node;
            let pos = n.predict(key);

            if let Some((p, pv)) = parent.take() {
                (*p).lock.read_unlock(pv)?;
            }

            if n.child_bitmap.get(pos) {
                let child = n.child_at(pos);
                n.lock.check(version)?;
                let child_version = (*child).lock.read_lock()?;
                parent = Some((node, version));
                node = child;
                version = child_version;
            } else {
                let entry = n.entry_at(pos);
                n.lock.read_unlock(version)?;
                return Ok(entry.value);
            }
        }
    }

    /// One insert attempt; `Err(Restart)` means retry from the root.
    ///
    /// Records the traversal path, commits the datum at the leaf under a
    /// single write lock, then bumps the statistics of every node on the
    /// path and hands the path to the rebuild walk.
    pub(super) fn try_insert(
        &self,
        guard: &EpochGuard<'_>,
        key: K,
        value: V,
    ) -> Result<(), Restart> {
        let root = self.root.load(Ordering::Acquire);
        let mut node = root;
        // Safety: see `try_search`.
        let mut version = unsafe { (*node).lock.read_lock()? };

        let mut parent: Option<(*mut Node<K, V>, u64)> = None;
        let mut path: [*mut Node<K, V>; MAX_DEPTH] = [ptr::null_mut(); MAX_DEPTH];
        let mut depth = 0;
        let conflict;

        loop {
            assert!(depth < MAX_DEPTH, "index tree exceeded maximum depth");
            path[depth] = node;
            depth += 1;

            if let Some((p, pv)) = parent.take() {
                unsafe { (*p).lock.read_unlock(pv)? };
            }

            let n = unsafe { &*node };
            let pos = n.predict(key);

            if n.none_bitmap.get(pos) {
                // Empty slot: the datum lands here.
                n.lock.upgrade_to_write(version)?;
                unsafe { n.set_entry(pos, key, value) };
                n.none_bitmap.clear(pos);
                n.lock.write_unlock();
                conflict = false;
                break;
            } else if !n.child_bitmap.get(pos) {
                // Occupied leaf slot: promote it to a two-key child.
                n.lock.upgrade_to_write(version)?;
                let existing = unsafe { n.entry_at(pos) };
                let two = self.build_two(key, value, existing.key, existing.value);
                unsafe { n.set_child(pos, two) };
                n.child_bitmap.set(pos);
                n.lock.write_unlock();
                conflict = true;
                break;
            } else {
                let child = unsafe { n.child_at(pos) };
                n.lock.check(version)?;
                let child_version = unsafe { (*child).lock.read_lock()? };
                parent = Some((node, version));
                node = child;
                version = child_version;
            }
        }

        // Commit the statistics only after the leaf write succeeded, so an
        // insert is either visible in every ancestor's size or not at all.
        for &p in &path[..depth] {
            let n = unsafe { &*p };
            n.size.fetch_add(1, Ordering::Relaxed);
            n.num_inserts.fetch_add(1, Ordering::Relaxed);
            if conflict {
                n.num_insert_to_data.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.adjust(guard, &path[..depth], key);
        Ok(())
    }
}
