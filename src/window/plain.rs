//! Heap-buffered persistence window.
//!
//! Used when memory mapping is turned off (or refused): a `PlainWindow`
//! holds one brick's worth of records in a heap buffer, eagerly loaded from
//! the channel when the window is installed. Writes are staged in the
//! buffer under a dirty flag and written back on force or close.
//!
//! The eager load happens inside window allocation, which means an acquire
//! that triggers allocation pays for reading the whole brick. That is the
//! documented trade of this variant; there is no background loading.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::eyre;

use crate::channel::Channel;

use super::{OperationType, PersistenceRow, WindowCore, WindowInitError};

pub struct PlainWindow {
    core: WindowCore,
    channel: Arc<dyn Channel>,
    dirty: AtomicBool,
    buf: UnsafeCell<Box<[u8]>>,
}

// SAFETY: buffer access is mediated by the window's operation lock (shared
// slices only under READ, the single mutable slice only under WRITE), and
// write-back takes the lock in READ mode to snapshot a stable buffer. The
// dirty flag and in-use marker are atomics.
unsafe impl Send for PlainWindow {}
unsafe impl Sync for PlainWindow {}

impl PlainWindow {
    /// Allocates a brick-sized buffer and fills it from the channel.
    ///
    /// Buffer allocation is fallible: running out of heap is reported as a
    /// resource failure (the brick falls back to rows), not an abort. Read
    /// failures are channel I/O errors and propagate.
    pub(crate) fn load(
        channel: Arc<dyn Channel>,
        first_position: u64,
        page_size: usize,
        size: usize,
    ) -> Result<Self, WindowInitError> {
        let mut data: Vec<u8> = Vec::new();
        data.try_reserve_exact(size).map_err(|e| {
            WindowInitError::Resource(eyre!("failed to allocate {size} byte window buffer: {e}"))
        })?;
        data.resize(size, 0);

        let byte_offset = first_position * page_size as u64;
        channel
            .read_at(byte_offset, &mut data)
            .map_err(WindowInitError::Io)?;

        Ok(Self {
            core: WindowCore::new(first_position, page_size, size, 0),
            channel,
            dirty: AtomicBool::new(false),
            buf: UnsafeCell::new(data.into_boxed_slice()),
        })
    }

    pub(crate) fn core(&self) -> &WindowCore {
        &self.core
    }

    pub(crate) fn record_ptr(&self, position: u64) -> *mut u8 {
        let offset = self.core.offset_of(position);
        // SAFETY: offset_of bounds-checks position (debug) and the buffer is
        // `size` bytes by construction. Aliasing is governed by the
        // operation lock held by the caller's handle.
        unsafe { (*self.buf.get()).as_mut_ptr().add(offset) }
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Copies a released row's record into this window's buffer.
    ///
    /// The caller holds this window's WRITE lock and the row's operation
    /// lock, which is what makes the copy race-free.
    pub(crate) fn accept_contents(&self, row: &PersistenceRow) {
        let offset = self.core.offset_of(row.position());
        let len = self.core.page_size();
        // SAFETY: exclusive access to the destination via the held WRITE
        // lock; the source row buffer is stable under the row's held lock;
        // the regions belong to different allocations.
        unsafe {
            let dst = (*self.buf.get()).as_mut_ptr().add(offset);
            std::ptr::copy_nonoverlapping(row.buf_ptr(), dst, len);
        }
        self.dirty.store(true, Ordering::Release);
    }

    /// Writes staged changes back to the channel, if any.
    ///
    /// Takes the operation lock in READ mode so an in-flight writer finishes
    /// before the buffer is snapshot.
    pub(crate) fn write_back(&self) -> eyre::Result<()> {
        if !self.dirty.load(Ordering::Acquire) {
            return Ok(());
        }

        self.core.lock_op(OperationType::Read);
        let result = {
            // SAFETY: holding the lock in READ mode excludes writers, so the
            // buffer is stable for the duration of the write.
            let buf = unsafe { &*self.buf.get() };
            self.channel.write_at(self.core.byte_offset(), buf)
        };
        self.core.unlock_op(OperationType::Read);

        result?;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for PlainWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainWindow")
            .field("first_position", &self.core.first_position())
            .field("size", &self.core.size())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
