//! # Persistence Windows
//!
//! A window is a lockable, byte-addressable view of part of the store file.
//! The pool deals in three shapes:
//!
//! - [`MappedWindow`]: an OS memory mapping of one brick's file region.
//!   Reads and writes go straight through the mapping; `force` is an msync.
//! - [`PlainWindow`]: a heap buffer sized to one brick, loaded eagerly from
//!   the channel. Writes are staged under a dirty flag and written back on
//!   force/close.
//! - [`PersistenceRow`]: a heap buffer covering exactly one record, created
//!   on demand for positions whose brick carries no window, written out and
//!   discarded on release.
//!
//! ## Locking Core
//!
//! Every window embeds a [`WindowCore`]: its position/extent, the operation
//! lock (shared READ / exclusive WRITE), and the in-use marker. The marker
//! is a packed atomic, a user count plus a CLOSED bit, and gates window
//! installation and removal:
//!
//! ```text
//! mark_in_use()        count += 1, refused once CLOSED is set
//! release_use()        count -= 1
//! try_close(expected)  CAS: count == expected  →  CLOSED
//! ```
//!
//! A thread that marked a window in use is guaranteed the window will not
//! close underneath it until its matching release. Eviction closes a brick
//! window only at `expected = 0` (no users at all); a releasing row thread
//! closes its row at `expected = 1` (itself the sole user).
//!
//! ## Byte Access Discipline
//!
//! Window buffers are shared across threads, so byte access goes through
//! raw-pointer slices materialized by the pool's `WindowHandle`, which holds
//! the operation lock for its whole lifetime. The lock is the aliasing
//! rule: shared slices only under READ, the exclusive slice only under
//! WRITE. Each `unsafe` block states its reliance on that rule.

mod lock;
mod mapped;
mod plain;
mod row;

pub use mapped::MappedWindow;
pub use plain::PlainWindow;
pub use row::PersistenceRow;

pub(crate) use lock::OperationLock;

use std::sync::atomic::{AtomicU32, Ordering};

/// Intent a caller declares when acquiring a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    /// Shared access; concurrent readers of the same window proceed together.
    Read,
    /// Exclusive access; serializes against every other lock on the window.
    Write,
}

/// Why constructing a window failed.
///
/// Resource failures (mmap refusal, buffer allocation failure, a channel
/// that cannot map) are recoverable: the pool counts them, tells the
/// monitor, and keeps serving the brick through rows. Channel I/O failures
/// propagate to the caller.
#[derive(Debug)]
pub(crate) enum WindowInitError {
    Resource(eyre::Report),
    Io(eyre::Report),
}

const CLOSED: u32 = 1 << 31;
const USER_MASK: u32 = CLOSED - 1;

/// Position/extent bookkeeping, the operation lock, and the in-use marker
/// shared by all window shapes.
#[derive(Debug)]
pub(crate) struct WindowCore {
    first_position: u64,
    page_size: usize,
    size: usize,
    lock: OperationLock,
    state: AtomicU32,
}

impl WindowCore {
    pub(crate) fn new(
        first_position: u64,
        page_size: usize,
        size: usize,
        initial_users: u32,
    ) -> Self {
        debug_assert!(page_size > 0 && size >= page_size && size % page_size == 0);
        Self {
            first_position,
            page_size,
            size,
            lock: OperationLock::new(),
            state: AtomicU32::new(initial_users),
        }
    }

    /// First record position this window covers.
    pub(crate) fn first_position(&self) -> u64 {
        self.first_position
    }

    /// Bytes covered by the window.
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    /// Byte offset of the window's first record within the store file.
    pub(crate) fn byte_offset(&self) -> u64 {
        self.first_position * self.page_size as u64
    }

    pub(crate) fn contains(&self, position: u64) -> bool {
        position >= self.first_position
            && (position - self.first_position) as usize * self.page_size < self.size
    }

    /// Byte offset of `position`'s record within the window buffer.
    pub(crate) fn offset_of(&self, position: u64) -> usize {
        debug_assert!(self.contains(position));
        (position - self.first_position) as usize * self.page_size
    }

    /// Registers a user, unless the window has been closed.
    pub(crate) fn mark_in_use(&self) -> bool {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            if state & CLOSED != 0 {
                return false;
            }
            match self.state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => state = observed,
            }
        }
    }

    /// Drops a user registered by [`mark_in_use`](Self::mark_in_use).
    pub(crate) fn release_use(&self) {
        let prev = self.state.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev & USER_MASK > 0, "release_use without a matching mark");
    }

    /// Atomically closes the window iff exactly `expected_users` users are
    /// registered (the expected users are consumed by the close).
    pub(crate) fn try_close(&self, expected_users: u32) -> bool {
        self.state
            .compare_exchange(expected_users, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Closes the window regardless of registered users. Pool shutdown only;
    /// outstanding handles at that point are a caller error.
    pub(crate) fn force_close(&self) {
        self.state.fetch_or(CLOSED, Ordering::AcqRel);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) & CLOSED != 0
    }

    pub(crate) fn users(&self) -> u32 {
        self.state.load(Ordering::Acquire) & USER_MASK
    }

    pub(crate) fn lock_op(&self, op: OperationType) {
        self.lock.lock(op);
    }

    pub(crate) fn unlock_op(&self, op: OperationType) {
        self.lock.unlock(op);
    }
}

/// The two window shapes a brick slot can hold.
#[derive(Debug)]
pub enum BrickWindow {
    Mapped(MappedWindow),
    Plain(PlainWindow),
}

impl BrickWindow {
    pub(crate) fn core(&self) -> &WindowCore {
        match self {
            BrickWindow::Mapped(w) => w.core(),
            BrickWindow::Plain(w) => w.core(),
        }
    }

    pub(crate) fn is_mapped(&self) -> bool {
        matches!(self, BrickWindow::Mapped(_))
    }

    /// Pointer to the record at `position` within the window buffer.
    pub(crate) fn record_ptr(&self, position: u64) -> *mut u8 {
        match self {
            BrickWindow::Mapped(w) => w.record_ptr(position),
            BrickWindow::Plain(w) => w.record_ptr(position),
        }
    }

    /// Stages a dirty marker for a write made through a handle.
    pub(crate) fn mark_dirty(&self) {
        if let BrickWindow::Plain(w) = self {
            w.mark_dirty();
        }
        // Mapped windows write straight through the mapping; the OS tracks
        // dirtiness at page granularity.
    }

    /// Pushes window contents toward the file: msync for mapped windows,
    /// dirty write-back for plain ones.
    pub(crate) fn force(&self) -> eyre::Result<()> {
        match self {
            BrickWindow::Mapped(w) => w.flush(),
            BrickWindow::Plain(w) => w.write_back(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> WindowCore {
        WindowCore::new(4, 16, 64, 0)
    }

    #[test]
    fn offsets_and_containment() {
        let core = core();
        assert_eq!(core.byte_offset(), 64);
        assert!(core.contains(4));
        assert!(core.contains(7));
        assert!(!core.contains(8));
        assert!(!core.contains(3));
        assert_eq!(core.offset_of(6), 32);
    }

    #[test]
    fn mark_release_close_protocol() {
        let core = core();

        assert!(core.mark_in_use());
        assert!(core.mark_in_use());
        assert_eq!(core.users(), 2);

        // Two users registered: neither eviction nor sole-user close applies.
        assert!(!core.try_close(0));
        assert!(!core.try_close(1));

        core.release_use();
        assert!(core.try_close(1));
        assert!(core.is_closed());
        assert!(!core.mark_in_use());
    }

    #[test]
    fn force_close_wins_over_users() {
        let core = core();
        assert!(core.mark_in_use());
        core.force_close();
        assert!(core.is_closed());
        assert!(!core.mark_in_use());
    }
}
