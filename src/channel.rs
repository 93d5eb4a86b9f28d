//! # Backing Channel Abstraction
//!
//! This module provides the [`Channel`] trait, the pool's view of the store
//! file it caches: a seekable, sized, force-able run of bytes. The pool
//! itself defines no on-disk format (it is a transparent cache over the
//! caller's file), so the channel interface is deliberately small.
//!
//! ## Copy-Based Interface
//!
//! The primary interface uses positional copy semantics:
//!
//! ```text
//! fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;
//! fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;
//! ```
//!
//! `read_at` tolerates reads past end-of-file: the unread tail of the buffer
//! is left zeroed. Store files grow record by record, and a row window for a
//! record that has never been written must read as zeroes rather than fail.
//! `write_at` extends the file when writing past the current end.
//!
//! ## Memory-Mapping Capability
//!
//! Mapping a brick needs the raw file handle. Backends expose it through
//! `file()`, which defaults to `None`:
//!
//! ```text
//! fn file(&self) -> Option<&File> { None }
//! ```
//!
//! A channel without a file handle simply cannot host mapped windows; the
//! pool treats that as a recoverable allocation failure and serves the
//! affected bricks through plain windows or rows instead.
//!
//! ## Thread Safety
//!
//! Positional I/O takes `&self`, so a single channel serves every pool
//! thread concurrently. Implementations must be `Send + Sync`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};

/// A seekable, sized, force-able byte file backing a window pool.
pub trait Channel: Send + Sync + std::fmt::Debug {
    /// Reads `buf.len()` bytes starting at `offset`.
    ///
    /// A read reaching past end-of-file is not an error; the bytes beyond
    /// the end are left zeroed in `buf`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes all of `data` starting at `offset`, extending the file if the
    /// write reaches past the current end.
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Current file size in bytes.
    fn len(&self) -> Result<u64>;

    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Extends the file to at least `new_len` bytes. Never shrinks.
    fn grow(&self, new_len: u64) -> Result<()>;

    /// Flushes file contents (and metadata when `metadata` is set) to
    /// durable storage.
    fn force(&self, metadata: bool) -> Result<()>;

    /// The raw file handle, for backends that support memory mapping.
    fn file(&self) -> Option<&File> {
        None
    }
}

/// [`Channel`] implementation over a regular file.
#[derive(Debug)]
pub struct FileChannel {
    path: PathBuf,
    file: File,
}

impl FileChannel {
    /// Opens an existing store file read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Opens an existing store file, optionally read-only.
    pub fn open_with<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        Ok(Self { path, file })
    }

    /// Creates a new store file (or opens an existing one) read-write.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .wrap_err_with(|| format!("failed to create store file '{}'", path.display()))?;

        Ok(Self { path, file })
    }

    /// The path this channel was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn read_at_raw(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.read_at(buf, offset)
    }

    #[cfg(windows)]
    fn read_at_raw(&self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_read(buf, offset)
    }

    #[cfg(unix)]
    fn write_at_raw(&self, offset: u64, data: &[u8]) -> std::io::Result<usize> {
        use std::os::unix::fs::FileExt;
        self.file.write_at(data, offset)
    }

    #[cfg(windows)]
    fn write_at_raw(&self, offset: u64, data: &[u8]) -> std::io::Result<usize> {
        use std::os::windows::fs::FileExt;
        self.file.seek_write(data, offset)
    }
}

impl Channel for FileChannel {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut pos = 0usize;
        while pos < buf.len() {
            match self.read_at_raw(offset + pos as u64, &mut buf[pos..]) {
                Ok(0) => {
                    // End of file: the record has never been written.
                    buf[pos..].fill(0);
                    return Ok(());
                }
                Ok(n) => pos += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to read {} bytes at offset {} from '{}'",
                            buf.len(),
                            offset,
                            self.path.display()
                        )
                    });
                }
            }
        }
        Ok(())
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        while pos < data.len() {
            match self.write_at_raw(offset + pos as u64, &data[pos..]) {
                Ok(0) => {
                    eyre::bail!(
                        "wrote 0 bytes at offset {} to '{}'",
                        offset + pos as u64,
                        self.path.display()
                    );
                }
                Ok(n) => pos += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!(
                            "failed to write {} bytes at offset {} to '{}'",
                            data.len(),
                            offset,
                            self.path.display()
                        )
                    });
                }
            }
        }
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        let metadata = self
            .file
            .metadata()
            .wrap_err_with(|| format!("failed to stat store file '{}'", self.path.display()))?;
        Ok(metadata.len())
    }

    fn grow(&self, new_len: u64) -> Result<()> {
        if self.len()? >= new_len {
            return Ok(());
        }
        self.file.set_len(new_len).wrap_err_with(|| {
            format!(
                "failed to extend '{}' to {} bytes",
                self.path.display(),
                new_len
            )
        })
    }

    fn force(&self, metadata: bool) -> Result<()> {
        let result = if metadata {
            self.file.sync_all()
        } else {
            self.file.sync_data()
        };
        result.wrap_err_with(|| format!("failed to force store file '{}'", self.path.display()))
    }

    fn file(&self) -> Option<&File> {
        Some(&self.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_past_end_zero_fills() {
        let dir = tempdir().unwrap();
        let channel = FileChannel::create(dir.path().join("store")).unwrap();

        channel.write_at(0, b"abcd").unwrap();

        let mut buf = [0xffu8; 8];
        channel.read_at(2, &mut buf).unwrap();
        assert_eq!(&buf[..2], b"cd");
        assert_eq!(&buf[2..], &[0u8; 6]);
    }

    #[test]
    fn write_past_end_extends_file() {
        let dir = tempdir().unwrap();
        let channel = FileChannel::create(dir.path().join("store")).unwrap();

        channel.write_at(100, b"xyz").unwrap();
        assert_eq!(channel.len().unwrap(), 103);

        let mut buf = [0u8; 3];
        channel.read_at(100, &mut buf).unwrap();
        assert_eq!(&buf, b"xyz");
    }

    #[test]
    fn grow_never_shrinks() {
        let dir = tempdir().unwrap();
        let channel = FileChannel::create(dir.path().join("store")).unwrap();

        channel.grow(64).unwrap();
        assert_eq!(channel.len().unwrap(), 64);

        channel.grow(16).unwrap();
        assert_eq!(channel.len().unwrap(), 64);
    }

    #[test]
    fn file_channel_exposes_handle_for_mapping() {
        let dir = tempdir().unwrap();
        let channel = FileChannel::create(dir.path().join("store")).unwrap();
        assert!(channel.file().is_some());
    }
}
