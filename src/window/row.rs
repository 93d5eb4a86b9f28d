//! Single-record fallback window.
//!
//! When a position's brick carries no window, the pool serves the acquire
//! through a `PersistenceRow`: a heap buffer covering exactly one record,
//! filled from the channel at creation. Rows are transient (the common
//! case is one acquire/release cycle), but the active-row map may hand the
//! same row to several threads racing on one position, so the row carries
//! the full locking core.
//!
//! ## Release Protocol
//!
//! `write_out_and_close_if_free` runs on release, while the releasing
//! thread still holds the row's operation lock:
//!
//! - dirty bytes are written to the channel first, unconditionally (unless
//!   the pool is read-only); a released write must never be lost, whether
//!   or not the row survives;
//! - then, if the releasing thread is the sole registered user, the row
//!   closes and reports that it can be removed from the active-row map;
//! - otherwise the row stays alive, clean, for the threads still holding
//!   it.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::channel::Channel;

use super::WindowCore;

pub struct PersistenceRow {
    core: WindowCore,
    channel: Arc<dyn Channel>,
    dirty: AtomicBool,
    buf: UnsafeCell<Box<[u8]>>,
}

// SAFETY: buffer access is mediated by the row's operation lock; write-out
// runs only on threads that hold the lock. Flags and the in-use marker are
// atomics.
unsafe impl Send for PersistenceRow {}
unsafe impl Sync for PersistenceRow {}

impl PersistenceRow {
    /// Creates a row for `position`, reading the record from the channel.
    /// A record past end-of-file reads as zeroes.
    ///
    /// The creating thread counts as the first registered user.
    pub fn new(position: u64, page_size: usize, channel: Arc<dyn Channel>) -> Result<Self> {
        let mut buf = vec![0u8; page_size];
        channel
            .read_at(position * page_size as u64, &mut buf)
            .wrap_err_with(|| format!("failed to read record at position {position}"))?;

        Ok(Self {
            core: WindowCore::new(position, page_size, page_size, 1),
            channel,
            dirty: AtomicBool::new(false),
            buf: UnsafeCell::new(buf.into_boxed_slice()),
        })
    }

    /// The record position this row covers.
    pub fn position(&self) -> u64 {
        self.core.first_position()
    }

    pub(crate) fn core(&self) -> &WindowCore {
        &self.core
    }

    /// Registers another user, unless the row already closed.
    pub(crate) fn mark_in_use(&self) -> bool {
        self.core.mark_in_use()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub(crate) fn record_ptr(&self) -> *mut u8 {
        // SAFETY: the buffer is page_size bytes by construction; aliasing is
        // governed by the operation lock held by the caller's handle.
        unsafe { (*self.buf.get()).as_mut_ptr() }
    }

    pub(crate) fn buf_ptr(&self) -> *const u8 {
        self.record_ptr()
    }

    /// Writes out dirty bytes and closes the row if the releasing thread is
    /// its sole user. Returns whether the row closed (and should be removed
    /// from the active-row map).
    ///
    /// Must be called with the releasing thread's operation lock still
    /// held, and with that thread's in-use registration still counted; the
    /// registration is consumed here on both outcomes.
    pub(crate) fn write_out_and_close_if_free(&self, read_only: bool) -> Result<bool> {
        if self.dirty.load(Ordering::Acquire) {
            if !read_only {
                self.write_out()?;
            }
            self.dirty.store(false, Ordering::Release);
        }

        if self.core.try_close(1) {
            Ok(true)
        } else {
            // Another thread has the row marked; leave it for them.
            self.core.release_use();
            Ok(false)
        }
    }

    /// Drops a row that lost the insertion race before anyone else could
    /// see it.
    pub(crate) fn discard(&self) {
        debug_assert!(!self.is_dirty());
        self.core.try_close(1);
    }

    fn write_out(&self) -> Result<()> {
        // SAFETY: the caller holds the row's operation lock, so the buffer
        // is stable for the duration of the write.
        let buf = unsafe { &*self.buf.get() };
        self.channel
            .write_at(self.core.byte_offset(), buf)
            .wrap_err_with(|| {
                format!("failed to write out record at position {}", self.position())
            })
    }
}

impl std::fmt::Debug for PersistenceRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceRow")
            .field("position", &self.position())
            .field("page_size", &self.core.page_size())
            .field("dirty", &self.is_dirty())
            .field("users", &self.core.users())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FileChannel;
    use tempfile::tempdir;

    fn channel(dir: &tempfile::TempDir) -> Arc<dyn Channel> {
        Arc::new(FileChannel::create(dir.path().join("store")).unwrap())
    }

    #[test]
    fn new_row_reads_record_bytes() {
        let dir = tempdir().unwrap();
        let channel = channel(&dir);
        channel.write_at(0, &[3u8; 27]).unwrap();

        let row = PersistenceRow::new(1, 9, Arc::clone(&channel)).unwrap();
        // SAFETY: test has sole access.
        let record = unsafe { std::slice::from_raw_parts(row.record_ptr(), 9) };
        assert_eq!(record, &[3u8; 9]);
    }

    #[test]
    fn new_row_past_end_reads_zeroes() {
        let dir = tempdir().unwrap();
        let channel = channel(&dir);

        let row = PersistenceRow::new(10, 9, Arc::clone(&channel)).unwrap();
        let record = unsafe { std::slice::from_raw_parts(row.record_ptr(), 9) };
        assert_eq!(record, &[0u8; 9]);
    }

    #[test]
    fn sole_user_release_writes_out_and_closes() {
        let dir = tempdir().unwrap();
        let channel = channel(&dir);

        let row = PersistenceRow::new(2, 9, Arc::clone(&channel)).unwrap();
        unsafe { std::slice::from_raw_parts_mut(row.record_ptr(), 9) }.fill(0x42);
        row.mark_dirty();

        assert!(row.write_out_and_close_if_free(false).unwrap());
        assert!(row.core().is_closed());
        assert!(!row.mark_in_use());

        let mut buf = [0u8; 9];
        channel.read_at(2 * 9, &mut buf).unwrap();
        assert_eq!(buf, [0x42; 9]);
    }

    #[test]
    fn busy_release_writes_out_but_keeps_row_alive() {
        let dir = tempdir().unwrap();
        let channel = channel(&dir);

        let row = PersistenceRow::new(0, 9, Arc::clone(&channel)).unwrap();
        assert!(row.mark_in_use()); // a second thread holds the row

        unsafe { std::slice::from_raw_parts_mut(row.record_ptr(), 9) }.fill(0x11);
        row.mark_dirty();

        assert!(!row.write_out_and_close_if_free(false).unwrap());
        assert!(!row.core().is_closed());
        assert!(!row.is_dirty());

        // The released write reached the channel even though the row lives on.
        let mut buf = [0u8; 9];
        channel.read_at(0, &mut buf).unwrap();
        assert_eq!(buf, [0x11; 9]);

        // The remaining holder can still close it.
        assert!(row.write_out_and_close_if_free(false).unwrap());
    }

    #[test]
    fn read_only_release_skips_write_out() {
        let dir = tempdir().unwrap();
        let channel = channel(&dir);

        let row = PersistenceRow::new(0, 9, Arc::clone(&channel)).unwrap();
        unsafe { std::slice::from_raw_parts_mut(row.record_ptr(), 9) }.fill(0x99);
        row.mark_dirty();

        assert!(row.write_out_and_close_if_free(true).unwrap());
        assert_eq!(channel.len().unwrap(), 0);
    }
}
