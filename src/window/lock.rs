//! Manually scoped operation lock for windows.
//!
//! `acquire` takes the lock and `release` drops it, on whatever thread and
//! scope the caller chooses, so a borrowed guard cannot express it. The lock
//! is therefore driven through `parking_lot`'s raw reader-writer lock: READ
//! operations share it, WRITE operations hold it exclusively.

use parking_lot::lock_api::RawRwLock as _;
use parking_lot::RawRwLock;

use super::OperationType;

/// Shared-for-read / exclusive-for-write lock with explicit lock/unlock.
pub(crate) struct OperationLock {
    raw: RawRwLock,
}

impl OperationLock {
    pub(crate) const fn new() -> Self {
        Self {
            raw: <RawRwLock as parking_lot::lock_api::RawRwLock>::INIT,
        }
    }

    /// Blocks until the lock is held in the mode `op` requires.
    pub(crate) fn lock(&self, op: OperationType) {
        match op {
            OperationType::Read => self.raw.lock_shared(),
            OperationType::Write => self.raw.lock_exclusive(),
        }
    }

    /// Releases a lock previously taken with [`lock`](Self::lock).
    ///
    /// The caller must currently hold the lock in exactly the mode `op`
    /// names; the window handle pairs every unlock with the lock taken at
    /// acquire time.
    pub(crate) fn unlock(&self, op: OperationType) {
        // SAFETY: the pool's acquire/release protocol guarantees this thread
        // holds the lock in the given mode: every handle locks on creation
        // and unlocks exactly once on release, with the same OperationType.
        unsafe {
            match op {
                OperationType::Read => self.raw.unlock_shared(),
                OperationType::Write => self.raw.unlock_exclusive(),
            }
        }
    }
}

impl std::fmt::Debug for OperationLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OperationLock")
    }
}
