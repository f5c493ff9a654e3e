//! Optimistic version lock
//!
//! Each node carries one 64-bit version word: bit 0 is the obsolete flag,
//! bit 1 the write-lock flag, and the remaining bits a version counter.
//! Readers proceed without exclusive state and validate their snapshot at
//! the end of the critical section; any mismatch surfaces as [`Restart`],
//! which obliges the caller to retry the whole operation from the root
//! under an escalating back-off.

use std::sync::atomic::{AtomicU64, Ordering};

/// Transient conflict signal: the observed node changed (or is locked or
/// obsolete) and the operation must be retried from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restart;

/// Result of an optimistic lock operation.
pub type LockResult<T> = Result<T, Restart>;

const OBSOLETE_BIT: u64 = 0b01;
const LOCKED_BIT: u64 = 0b10;
const INITIAL_VERSION: u64 = 0b100;

/// 64-bit optimistic version lock.
pub struct OptLock {
    version: AtomicU64,
}

impl OptLock {
    /// Create an unlocked, non-obsolete lock at the initial version.
    pub const fn new() -> Self {
        Self {
            version: AtomicU64::new(INITIAL_VERSION),
        }
    }

    /// Reinitialize the word for a recycled node.
    ///
    /// Only safe once no reader can still hold a version snapshot of the
    /// previous incarnation, which the epoch-deferred recycle guarantees.
    pub fn reset(&self) {
        self.version.store(INITIAL_VERSION, Ordering::Release);
    }

    #[inline]
    fn is_locked_word(word: u64) -> bool {
        word & LOCKED_BIT != 0
    }

    #[inline]
    fn is_obsolete_word(word: u64) -> bool {
        word & OBSOLETE_BIT != 0
    }

    /// Take a read snapshot: the current version iff neither locked nor
    /// obsolete.
    #[inline]
    pub fn read_lock(&self) -> LockResult<u64> {
        let word = self.version.load(Ordering::Acquire);
        if Self::is_locked_word(word) || Self::is_obsolete_word(word) {
            return Err(Restart);
        }
        Ok(word)
    }

    /// Cheap revalidation that the node has not changed since `version`.
    #[inline]
    pub fn check(&self, version: u64) -> LockResult<()> {
        if self.version.load(Ordering::Acquire) == version {
            Ok(())
        } else {
            Err(Restart)
        }
    }

    /// End-of-critical-section validation; identical to [`check`] but named
    /// for protocol clarity.
    ///
    /// [`check`]: OptLock::check
    #[inline]
    pub fn read_unlock(&self, version: u64) -> LockResult<()> {
        self.check(version)
    }

    /// Atomically take the write lock iff the version still matches.
    #[inline]
    pub fn upgrade_to_write(&self, version: u64) -> LockResult<()> {
        match self.version.compare_exchange(
            version,
            version | LOCKED_BIT,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => Err(Restart),
        }
    }

    /// Release the write lock, bumping the version counter.
    #[inline]
    pub fn write_unlock(&self) {
        // Adding 0b10 to a locked word clears the lock bit and carries into
        // the counter.
        self.version.fetch_add(LOCKED_BIT, Ordering::Release);
    }

    /// Release the write lock and mark the node obsolete; every future
    /// `read_lock` restarts.
    #[inline]
    pub fn write_unlock_obsolete(&self) {
        self.version
            .fetch_add(LOCKED_BIT | OBSOLETE_BIT, Ordering::Release);
    }

    /// Whether the obsolete flag is set.
    #[inline]
    pub fn is_obsolete(&self) -> bool {
        Self::is_obsolete_word(self.version.load(Ordering::Acquire))
    }
}

impl Default for OptLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_lock_fresh() {
        let lock = OptLock::new();
        let v = lock.read_lock().unwrap();
        assert!(lock.check(v).is_ok());
        assert!(lock.read_unlock(v).is_ok());
    }

    #[test]
    fn test_write_cycle_invalidates_readers() {
        let lock = OptLock::new();
        let v = lock.read_lock().unwrap();
        lock.upgrade_to_write(v).unwrap();

        // A reader that snapshotted before the upgrade fails validation.
        assert_eq!(lock.check(v), Err(Restart));
        // New readers restart while the lock is held.
        assert_eq!(lock.read_lock(), Err(Restart));

        lock.write_unlock();
        // The version moved on; the old snapshot stays invalid.
        assert_eq!(lock.read_unlock(v), Err(Restart));
        // But fresh readers succeed again.
        let v2 = lock.read_lock().unwrap();
        assert_ne!(v, v2);
    }

    #[test]
    fn test_upgrade_conflict() {
        let lock = OptLock::new();
        let v = lock.read_lock().unwrap();
        lock.upgrade_to_write(v).unwrap();
        // A second upgrade from the same stale snapshot must fail.
        assert_eq!(lock.upgrade_to_write(v), Err(Restart));
        lock.write_unlock();
    }

    #[test]
    fn test_obsolete() {
        let lock = OptLock::new();
        let v = lock.read_lock().unwrap();
        lock.upgrade_to_write(v).unwrap();
        lock.write_unlock_obsolete();

        assert!(lock.is_obsolete());
        assert_eq!(lock.read_lock(), Err(Restart));
    }

    #[test]
    fn test_reset_clears_obsolete() {
        let lock = OptLock::new();
        let v = lock.read_lock().unwrap();
        lock.upgrade_to_write(v).unwrap();
        lock.write_unlock_obsolete();
        lock.reset();
        assert!(!lock.is_obsolete());
        assert!(lock.read_lock().is_ok());
    }
}
