//! RAII handle to an acquired window.
//!
//! `WindowPool::acquire` returns a `WindowHandle` that already holds the
//! window's operation lock in the requested mode and keeps the window's
//! in-use marker (and the brick's lock count) raised. Dropping the handle
//! releases everything, so the lock cannot leak on an error path;
//! `WindowPool::release` does the same but surfaces write-back errors.
//!
//! Byte access mirrors the lock mode: `record()` is available to every
//! handle, `record_mut()` only to WRITE handles; a WRITE handle holds the
//! window exclusively, which is what makes the mutable slice sound.

use std::sync::Arc;

use crate::window::{BrickWindow, OperationType, PersistenceRow};

use super::brick::BrickElement;
use super::WindowPool;

/// What an acquire pinned down; released exactly once.
pub(crate) enum Acquired {
    /// A brick's installed window (mapped or plain).
    Window {
        window: Arc<BrickWindow>,
        brick: Arc<BrickElement>,
    },
    /// A transient single-record row; `brick` is the brick lock carried for
    /// the row's region (absent when mapping is disabled pool-wide).
    Row {
        row: Arc<PersistenceRow>,
        brick: Option<Arc<BrickElement>>,
    },
}

/// A locked view of the record at one position.
pub struct WindowHandle<'pool> {
    pub(crate) pool: &'pool WindowPool,
    pub(crate) position: u64,
    pub(crate) op: OperationType,
    pub(crate) acquired: Option<Acquired>,
}

impl<'pool> WindowHandle<'pool> {
    pub(crate) fn new(
        pool: &'pool WindowPool,
        position: u64,
        op: OperationType,
        acquired: Acquired,
    ) -> Self {
        Self {
            pool,
            position,
            op,
            acquired: Some(acquired),
        }
    }

    /// The record position this handle was acquired for.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The lock mode the handle holds.
    pub fn operation(&self) -> OperationType {
        self.op
    }

    fn record_ptr(&self) -> *mut u8 {
        // INVARIANT: `acquired` is only taken by release, which consumes the
        // handle; a live handle always has it.
        match self.acquired.as_ref().expect("handle already released") {
            Acquired::Window { window, .. } => window.record_ptr(self.position),
            Acquired::Row { row, .. } => row.record_ptr(),
        }
    }

    /// The record's bytes.
    pub fn record(&self) -> &[u8] {
        // SAFETY: the handle holds the window's operation lock for its whole
        // lifetime; mutation only happens under the exclusive WRITE mode, so
        // a shared slice is stable while any handle reads it.
        unsafe { std::slice::from_raw_parts(self.record_ptr(), self.pool.page_size()) }
    }

    /// The record's bytes, writable. Requires a WRITE handle.
    pub fn record_mut(&mut self) -> &mut [u8] {
        assert!(
            self.op == OperationType::Write,
            "record_mut requires a WRITE acquire"
        );
        match self.acquired.as_ref().expect("handle already released") {
            Acquired::Window { window, .. } => window.mark_dirty(),
            Acquired::Row { row, .. } => row.mark_dirty(),
        }
        // SAFETY: WRITE mode holds the window's operation lock exclusively
        // and `&mut self` makes this the only slice derived from this
        // handle, so the mutable borrow is unique.
        unsafe { std::slice::from_raw_parts_mut(self.record_ptr(), self.pool.page_size()) }
    }
}

impl Drop for WindowHandle<'_> {
    fn drop(&mut self) {
        if let Some(acquired) = self.acquired.take() {
            if let Err(err) = self.pool.release_acquired(acquired, self.op) {
                // A destructor cannot surface the error; callers that need
                // it use WindowPool::release instead.
                tracing::error!(
                    position = self.position,
                    error = %err,
                    "window release failed during handle drop"
                );
            }
        }
    }
}

impl std::fmt::Debug for WindowHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.acquired {
            Some(Acquired::Window { window, .. }) if window.is_mapped() => "mapped",
            Some(Acquired::Window { .. }) => "plain",
            Some(Acquired::Row { .. }) => "row",
            None => "released",
        };
        f.debug_struct("WindowHandle")
            .field("position", &self.position)
            .field("op", &self.op)
            .field("kind", &kind)
            .finish()
    }
}
