//! Brick elements: the fixed slots of the pool's partition.
//!
//! A brick covers a contiguous run of records and owns at most one
//! [`BrickWindow`]. The slot's `RwLock` doubles as the per-brick monitor:
//! installing or removing a window takes it in write mode, which makes the
//! lock-count check and the installation one atomic decision against
//! concurrent acquires (which hold it in read mode while they mark).
//!
//! ## Demand and Lock Accounting
//!
//! `get_and_mark_window` is the single entry point of the acquire hot path:
//!
//! - `lock_count` rises on every call, window or not. A successful caller
//!   carries the count until its release; a row-path caller carries it so
//!   no window can be installed under its feet while its row is live. The
//!   acquire loop drops the count itself when it loses an insertion race
//!   and retries.
//! - `hit` rises on every call as well: it measures demand for the brick's
//!   region, and the refresh pass needs demand visible on unmapped bricks
//!   (served by rows) just as much as on mapped ones.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::window::BrickWindow;

#[derive(Debug)]
pub struct BrickElement {
    index: u32,
    hit: AtomicU64,
    hit_snapshot: AtomicU64,
    lock_count: AtomicU32,
    window: RwLock<Option<Arc<BrickWindow>>>,
}

impl BrickElement {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            hit: AtomicU64::new(0),
            hit_snapshot: AtomicU64::new(0),
            lock_count: AtomicU32::new(0),
            window: RwLock::new(None),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Registers an acquire on this brick and returns its window if one is
    /// installed and markable. `lock_count` is raised on both outcomes; a
    /// `None` return means the caller proceeds on the row path and keeps
    /// carrying the count until its release.
    pub(crate) fn get_and_mark_window(&self) -> Option<Arc<BrickWindow>> {
        let slot = self.window.read();
        self.lock_count.fetch_add(1, Ordering::AcqRel);
        self.hit.fetch_add(1, Ordering::Relaxed);
        match slot.as_ref() {
            Some(window) if window.core().mark_in_use() => Some(Arc::clone(window)),
            _ => None,
        }
    }

    /// Drops one acquire's hold on this brick.
    pub(crate) fn release_lock(&self) {
        let prev = self.lock_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "release_lock without a matching acquire");
    }

    pub(crate) fn lock_count(&self) -> u32 {
        self.lock_count.load(Ordering::Acquire)
    }

    /// The installed window, if any.
    pub(crate) fn window(&self) -> Option<Arc<BrickWindow>> {
        self.window.read().clone()
    }

    pub(crate) fn has_window(&self) -> bool {
        self.window.read().is_some()
    }

    /// The window slot itself; write access is the per-brick monitor for
    /// installation and removal.
    pub(crate) fn window_slot(&self) -> &RwLock<Option<Arc<BrickWindow>>> {
        &self.window
    }

    /// Freezes the current demand counter for sorting.
    pub(crate) fn snapshot_hit_count(&self) {
        self.hit_snapshot
            .store(self.hit.load(Ordering::Relaxed), Ordering::Relaxed);
    }

    /// Starts a fresh demand-observation period.
    pub(crate) fn reset_hits(&self) {
        self.hit.store(0, Ordering::Relaxed);
    }

    pub(crate) fn hit_snapshot(&self) -> u64 {
        self.hit_snapshot.load(Ordering::Relaxed)
    }
}

/// Factory for brick elements, injected at pool construction so callers can
/// instrument brick behavior.
pub trait BrickFactory: Send + Sync {
    fn create(&self, index: u32) -> Arc<BrickElement>;
}

/// The stock factory: plain [`BrickElement`]s.
#[derive(Debug, Default)]
pub struct DefaultBrickFactory;

impl BrickFactory for DefaultBrickFactory {
    fn create(&self, index: u32) -> Arc<BrickElement> {
        Arc::new(BrickElement::new(index))
    }
}
