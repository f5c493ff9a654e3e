//! Three-epoch reclamation manager
//!
//! Rotating epochs `{0, 1, 2}` with per-thread deferred-free lists. A
//! thread inside a critical section publishes the global epoch into its
//! slot; the global epoch may only advance when no live thread still sits
//! in the *previous* epoch, so memory drained on entering epoch `e + 1`
//! was scheduled during `e - 1` and has survived two full grace periods.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::OnceLock;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::constants::MAX_THREADS;

// ============ Thread ID Allocation ============

/// Global counter for allocating thread-local IDs
static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

/// Recycled thread IDs (used when threads exit).
static FREE_THREAD_IDS: OnceLock<Mutex<Vec<usize>>> = OnceLock::new();

fn free_thread_ids() -> &'static Mutex<Vec<usize>> {
    FREE_THREAD_IDS.get_or_init(|| Mutex::new(Vec::new()))
}

#[derive(Debug)]
struct ThreadIdGuard {
    id: usize,
}

impl Drop for ThreadIdGuard {
    fn drop(&mut self) {
        if let Some(free) = FREE_THREAD_IDS.get() {
            free.lock().push(self.id);
        }
    }
}

fn try_allocate_thread_id() -> Option<ThreadIdGuard> {
    if let Some(id) = free_thread_ids().lock().pop() {
        return Some(ThreadIdGuard { id });
    }

    match NEXT_THREAD_ID.fetch_update(Ordering::AcqRel, Ordering::Acquire, |next| {
        if next < MAX_THREADS {
            Some(next + 1)
        } else {
            None
        }
    }) {
        Ok(id) => Some(ThreadIdGuard { id }),
        Err(_) => {
            // Another thread may have just returned an ID. Re-check before
            // giving up.
            free_thread_ids()
                .lock()
                .pop()
                .map(|id| ThreadIdGuard { id })
        }
    }
}

thread_local! {
    static THREAD_ID: RefCell<Option<ThreadIdGuard>> = const { RefCell::new(None) };
}

/// Errors surfaced by the epoch manager.
#[derive(Debug, thiserror::Error)]
pub enum EpochError {
    /// More threads entered the index concurrently than the epoch table
    /// has slots for.
    #[error("too many concurrent threads (limit {0})")]
    TooManyThreads(usize),
}

/// Get the current thread's ID for epoch protection.
///
/// The ID is allocated on first call, remains constant for the thread's
/// lifetime, and is recycled when the thread exits.
///
/// # Errors
///
/// Returns [`EpochError::TooManyThreads`] if more than
/// [`MAX_THREADS`] threads concurrently use the library.
#[inline]
pub fn get_thread_id() -> Result<usize, EpochError> {
    try_get_thread_id().ok_or(EpochError::TooManyThreads(MAX_THREADS))
}

/// Try to get the current thread's ID for epoch protection.
///
/// Returns `None` if more than [`MAX_THREADS`] threads concurrently use
/// the library.
pub fn try_get_thread_id() -> Option<usize> {
    THREAD_ID.with(|slot| {
        let mut slot = slot.borrow_mut();
        if let Some(guard) = slot.as_ref() {
            return Some(guard.id);
        }

        let guard = try_allocate_thread_id()?;
        let id = guard.id;
        *slot = Some(guard);
        Some(id)
    })
}

// ============ Epoch Manager ============

/// Epoch value meaning "outside any critical section"
const SENTINEL: u32 = 3;

/// A thread asks for an epoch advance after this many scheduled deletions
const ADVANCE_BATCH: usize = 64;

const NEXT_EPOCH: [u32; 3] = [1, 2, 0];
const PREV_EPOCH: [u32; 3] = [2, 0, 1];

type Deferred = Box<dyn FnOnce() + Send>;

/// Per-thread epoch state (one cache-padded slot per thread ID)
struct ThreadEntry {
    /// Epoch this thread is currently inside, or `SENTINEL`
    local_epoch: AtomicU32,
    /// Epoch observed on the previous `enter`
    prev_epoch: Cell<u32>,
    /// Whether this thread wants the global epoch advanced
    want_advance: Cell<bool>,
    /// Deferred deleters, one list per epoch
    free_lists: [UnsafeCell<Vec<Deferred>>; 3],
}

impl ThreadEntry {
    fn new() -> Self {
        Self {
            local_epoch: AtomicU32::new(SENTINEL),
            prev_epoch: Cell::new(SENTINEL),
            want_advance: Cell::new(false),
            free_lists: [
                UnsafeCell::new(Vec::new()),
                UnsafeCell::new(Vec::new()),
                UnsafeCell::new(Vec::new()),
            ],
        }
    }
}

// Safety: `local_epoch` is the only field read by other threads and is
// atomic. The cells and free lists are touched exclusively by the thread
// owning the slot (thread IDs are unique among live threads), except in
// `EpochManager::drop`, which holds `&mut self`.
unsafe impl Sync for ThreadEntry {}
unsafe impl Send for ThreadEntry {}

/// Three-epoch reclamation manager.
///
/// One instance per index. Threads interact through [`EpochManager::enter`],
/// which yields an RAII [`EpochGuard`] for the critical section.
pub struct EpochManager {
    /// Per-thread epoch table
    table: Box<[CachePadded<ThreadEntry>]>,
    /// Current global epoch, always in `{0, 1, 2}`
    current_epoch: AtomicU32,
}

impl EpochManager {
    /// Create a new manager with all threads outside any critical section.
    pub fn new() -> Self {
        let table = (0..MAX_THREADS)
            .map(|_| CachePadded::new(ThreadEntry::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            table,
            current_epoch: AtomicU32::new(0),
        }
    }

    /// Enter a critical section.
    ///
    /// Publishes the global epoch into this thread's slot. If the epoch
    /// rotated since this thread's previous entry, the deferred-free list
    /// for the newly entered epoch is drained first (its contents are two
    /// grace periods old). Finally, if this thread has accumulated enough
    /// garbage, it attempts to advance the global epoch.
    pub fn enter(&self) -> Result<EpochGuard<'_>, EpochError> {
        let thread_id = get_thread_id()?;
        let entry = &self.table[thread_id];
        debug_assert_eq!(entry.local_epoch.load(Ordering::Relaxed), SENTINEL);

        let epoch = self.current_epoch.load(Ordering::Acquire);
        if entry.prev_epoch.get() != epoch {
            // Safety: this thread owns the slot; no other thread touches
            // its free lists.
            unsafe { drain_list(&entry.free_lists[epoch as usize]) };
            entry.want_advance.set(false);
            entry.prev_epoch.set(epoch);
        }
        entry.local_epoch.store(epoch, Ordering::Release);

        if entry.want_advance.get() && self.can_advance(epoch) {
            let _ = self.current_epoch.compare_exchange(
                epoch,
                NEXT_EPOCH[epoch as usize],
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }

        Ok(EpochGuard {
            manager: self,
            thread_id,
        })
    }

    /// The epoch may advance iff no live thread still sits in the previous
    /// epoch.
    fn can_advance(&self, current: u32) -> bool {
        let previous = PREV_EPOCH[current as usize];
        self.table
            .iter()
            .all(|entry| entry.local_epoch.load(Ordering::Acquire) != previous)
    }

    /// Current global epoch (for diagnostics and tests).
    pub fn current_epoch(&self) -> u32 {
        self.current_epoch.load(Ordering::Acquire)
    }
}

impl Default for EpochManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EpochManager {
    fn drop(&mut self) {
        // Exclusive access: run everything that is still deferred.
        for entry in self.table.iter() {
            for list in &entry.free_lists {
                // Safety: `&mut self` excludes every other accessor.
                unsafe { drain_list(list) };
            }
        }
    }
}

unsafe fn drain_list(list: &UnsafeCell<Vec<Deferred>>) {
    let list = &mut *list.get();
    for deleter in list.drain(..) {
        deleter();
    }
}

/// RAII guard for one critical section.
pub struct EpochGuard<'a> {
    manager: &'a EpochManager,
    thread_id: usize,
}

impl EpochGuard<'_> {
    /// Schedule a deleter to run once no thread can still observe the
    /// memory it frees.
    pub fn defer(&self, deleter: impl FnOnce() + Send + 'static) {
        let entry = &self.manager.table[self.thread_id];
        let epoch = entry.local_epoch.load(Ordering::Relaxed);
        debug_assert_ne!(epoch, SENTINEL);

        // Safety: this thread owns the slot for the guard's lifetime.
        let list = unsafe { &mut *entry.free_lists[epoch as usize].get() };
        list.push(Box::new(deleter));
        entry.want_advance.set(list.len() % ADVANCE_BATCH == 0);
    }

    /// Thread ID backing this guard.
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }
}

impl Drop for EpochGuard<'_> {
    fn drop(&mut self) {
        self.manager.table[self.thread_id]
            .local_epoch
            .store(SENTINEL, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_enter_leave() {
        let mgr = EpochManager::new();
        let tid = {
            let guard = mgr.enter().unwrap();
            let tid = guard.thread_id();
            assert_ne!(
                mgr.table[tid].local_epoch.load(Ordering::Relaxed),
                SENTINEL
            );
            tid
        };
        assert_eq!(mgr.table[tid].local_epoch.load(Ordering::Relaxed), SENTINEL);
    }

    #[test]
    fn test_deferred_runs_after_two_rotations() {
        let mgr = EpochManager::new();
        let executed = Arc::new(AtomicUsize::new(0));

        // Fill a batch per epoch so the manager keeps asking for advances;
        // after a full rotation the first batch must have run.
        for round in 0..4 {
            {
                let guard = mgr.enter().unwrap();
                for _ in 0..ADVANCE_BATCH {
                    let executed = executed.clone();
                    guard.defer(move || {
                        executed.fetch_add(1, Ordering::Relaxed);
                    });
                }
            }
            // A fresh entry attempts the advance.
            drop(mgr.enter().unwrap());
            if round == 0 {
                assert_eq!(executed.load(Ordering::Relaxed), 0);
            }
        }

        assert!(executed.load(Ordering::Relaxed) >= ADVANCE_BATCH);
    }

    #[test]
    fn test_drop_drains_everything() {
        let executed = Arc::new(AtomicUsize::new(0));
        {
            let mgr = EpochManager::new();
            let guard = mgr.enter().unwrap();
            for _ in 0..10 {
                let executed = executed.clone();
                guard.defer(move || {
                    executed.fetch_add(1, Ordering::Relaxed);
                });
            }
            drop(guard);
        }
        assert_eq!(executed.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_no_advance_while_previous_epoch_occupied() {
        let mgr = Arc::new(EpochManager::new());

        // Pin a second thread inside epoch 0, then try to force two
        // advances from this thread. The second advance (1 -> 2) must be
        // blocked because epoch 0 is the previous epoch of... epoch 1's
        // previous is 0, so even the first advance from 1 is blocked.
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let mgr2 = mgr.clone();
        let pinned = std::thread::spawn(move || {
            let _guard = mgr2.enter().unwrap();
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        started_rx.recv().unwrap();

        // Advance 0 -> 1 is legal (previous epoch of 0 is 2, unoccupied).
        {
            let guard = mgr.enter().unwrap();
            for _ in 0..ADVANCE_BATCH {
                guard.defer(|| {});
            }
        }
        drop(mgr.enter().unwrap());
        assert_eq!(mgr.current_epoch(), 1);

        // Advance 1 -> 2 requires epoch 0 to be empty, but the pinned
        // thread still sits there.
        {
            let guard = mgr.enter().unwrap();
            for _ in 0..ADVANCE_BATCH {
                guard.defer(|| {});
            }
        }
        drop(mgr.enter().unwrap());
        assert_eq!(mgr.current_epoch(), 1);

        release_tx.send(()).unwrap();
        pinned.join().unwrap();
    }

    #[test]
    fn test_thread_id_bounds() {
        let id = get_thread_id().unwrap();
        assert!(id < MAX_THREADS);
    }

    #[test]
    fn test_thread_id_does_not_exhaust_under_sequential_churn() {
        for _ in 0..(MAX_THREADS * 2) {
            std::thread::spawn(|| {
                let id = get_thread_id().unwrap();
                assert!(id < MAX_THREADS);
            })
            .join()
            .unwrap();
        }
    }
}
