//! Memory-mapped persistence window.
//!
//! A `MappedWindow` is an OS mapping of exactly one brick's file region.
//! Reads and writes address the mapping directly, so a record access on a
//! resident page costs a pointer offset and no syscall; `flush` is an
//! msync. The pool maps read-only or read-write according to its own mode.

use std::sync::Arc;

use eyre::{eyre, WrapErr};
use memmap2::{Mmap, MmapMut, MmapOptions};

use crate::channel::Channel;

use super::{WindowCore, WindowInitError};

#[derive(Debug)]
enum Region {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

pub struct MappedWindow {
    core: WindowCore,
    ptr: *mut u8,
    region: Region,
}

// SAFETY: the raw pointer aliases the mapping owned by `region`, which lives
// as long as the window. Concurrent byte access is mediated by the window's
// operation lock (shared READ / exclusive WRITE); the pointer itself is only
// ever offset, never reassigned.
unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
    /// Maps the brick `[first_position * page_size, .. + size)` of the
    /// channel's file.
    ///
    /// Any failure to establish the mapping (a channel without a file
    /// handle, an undersized read-only file, a refused mmap) comes back as
    /// a resource failure the pool recovers from by serving the brick
    /// through rows.
    pub(crate) fn map(
        channel: &Arc<dyn Channel>,
        first_position: u64,
        page_size: usize,
        size: usize,
        read_only: bool,
    ) -> Result<Self, WindowInitError> {
        let byte_offset = first_position * page_size as u64;
        let end = byte_offset + size as u64;

        let file = channel.file().ok_or_else(|| {
            WindowInitError::Resource(eyre!("channel exposes no file handle to map"))
        })?;

        let file_len = channel.len().map_err(WindowInitError::Io)?;
        if file_len < end {
            if read_only {
                return Err(WindowInitError::Resource(eyre!(
                    "window [{byte_offset}, {end}) extends past the end of a read-only store"
                )));
            }
            // Touching mapped pages past end-of-file faults, so the file is
            // grown to the brick boundary before mapping. A failure here is
            // recoverable the same way a refused mmap is.
            channel.grow(end).map_err(WindowInitError::Resource)?;
        }

        // SAFETY: the pool has exclusive write ownership of the mapped file
        // region by contract, the offset/len pair lies within the file after
        // the grow above, and the mapping's lifetime is tied to the window,
        // which outlives every pointer derived from it.
        let region = unsafe {
            if read_only {
                MmapOptions::new()
                    .offset(byte_offset)
                    .len(size)
                    .map(file)
                    .map(Region::ReadOnly)
            } else {
                MmapOptions::new()
                    .offset(byte_offset)
                    .len(size)
                    .map_mut(file)
                    .map(Region::ReadWrite)
            }
        }
        .map_err(|e| {
            WindowInitError::Resource(
                eyre::Report::new(e)
                    .wrap_err(format!("failed to map window [{byte_offset}, {end})")),
            )
        })?;

        let ptr = match &region {
            Region::ReadOnly(m) => m.as_ptr() as *mut u8,
            Region::ReadWrite(m) => m.as_ptr() as *mut u8,
        };

        let window = Self {
            core: WindowCore::new(first_position, page_size, size, 0),
            ptr,
            region,
        };
        window.advise_will_need();
        Ok(window)
    }

    pub(crate) fn core(&self) -> &WindowCore {
        &self.core
    }

    /// Pointer to `position`'s record inside the mapping.
    ///
    /// Writing through the pointer is only valid for read-write mappings;
    /// the pool never hands out WRITE access on a read-only pool.
    pub(crate) fn record_ptr(&self, position: u64) -> *mut u8 {
        // SAFETY: offset_of bounds-checks position against the window extent
        // (debug) and the mapping is `size` bytes long by construction.
        unsafe { self.ptr.add(self.core.offset_of(position)) }
    }

    /// Forces mapped contents out to the file.
    pub(crate) fn flush(&self) -> eyre::Result<()> {
        match &self.region {
            Region::ReadOnly(_) => Ok(()),
            Region::ReadWrite(m) => m.flush().wrap_err_with(|| {
                format!(
                    "failed to flush mapped window at position {}",
                    self.core.first_position()
                )
            }),
        }
    }

    /// Hints to the OS that the whole window will be accessed soon. Windows
    /// are allocated for bricks that just proved hot, so prefetching the
    /// region cuts the first-touch fault storm.
    fn advise_will_need(&self) {
        #[cfg(unix)]
        // SAFETY: the pointer/length pair describes exactly the live mapping
        // owned by this window; MADV_WILLNEED is advisory and does not
        // change the mapping.
        unsafe {
            libc::madvise(
                self.ptr as *mut libc::c_void,
                self.core.size(),
                libc::MADV_WILLNEED,
            );
        }
    }
}

impl std::fmt::Debug for MappedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedWindow")
            .field("first_position", &self.core.first_position())
            .field("size", &self.core.size())
            .field("read_only", &matches!(self.region, Region::ReadOnly(_)))
            .finish()
    }
}
