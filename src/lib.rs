//! # windowpool - Adaptive Memory-Mapped Window Pool
//!
//! `windowpool` is a caching layer for fixed-record-size store files. It
//! partitions a file into equally sized *bricks*, adaptively memory-maps the
//! hottest bricks as persistence *windows*, and serves the rest through
//! short-lived single-record fallbacks, so a bounded memory budget ends up
//! covering the regions the workload actually touches.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use windowpool::{FileChannel, OperationType, WindowPool};
//!
//! let channel = Arc::new(FileChannel::open("./store.db")?);
//! let pool = WindowPool::builder("./store.db", 32, channel)
//!     .mapped_memory(64 * 1024 * 1024)
//!     .open()?;
//!
//! let mut window = pool.acquire(42, OperationType::Write)?;
//! window.record_mut().copy_from_slice(&record_bytes);
//! drop(window); // release: unlock, hand off, write out
//!
//! pool.flush_all()?;
//! pool.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          Public API (WindowPool)             │
//! │   acquire / release / flush_all / close      │
//! ├──────────────────────────────────────────────┤
//! │  Brick array │ Active-row map │ Refresh pass │
//! ├──────────────┴────────┬───────┴──────────────┤
//! │   Mapped / Plain windows   │ Persistence rows│
//! ├───────────────────────────────────────────────┤
//! │        Backing channel (positional I/O)       │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! Each acquire maps a record position to its brick. A brick carrying a
//! window serves the acquire from memory (a *hit*); any other acquire rides
//! a transient row (a *miss*). Misses feed a demand counter per brick, and
//! every 50,000 of them one thread rebalances which bricks deserve windows.
//!
//! ## Guarantees
//!
//! - An acquired window is locked for the requested operation (shared READ,
//!   exclusive WRITE) and pinned against eviction until released.
//! - A released write is never lost: it reaches the channel, or a
//!   co-located window that will flush it.
//! - Mapping failures are absorbed (affected bricks keep working through
//!   rows), while channel I/O errors surface to the caller.
//!
//! The pool imposes no ordering between concurrent operations on the same
//! position; callers that need it bring their own.
//!
//! ## Module Overview
//!
//! - [`pool`]: the pool itself, bricks, handles, statistics, monitor hook
//! - [`window`]: mapped/plain windows and persistence rows
//! - [`channel`]: the backing-file abstraction
//! - [`config`]: tunables and the auto-detected mapping budget

pub mod channel;
pub mod config;
pub mod pool;
pub mod window;

pub use channel::{Channel, FileChannel};
pub use pool::{
    BrickElement, BrickFactory, DefaultBrickFactory, Monitor, NoopMonitor, RowMap, ShardedRowMap,
    WindowHandle, WindowPool, WindowPoolBuilder, WindowPoolStats,
};
pub use window::{BrickWindow, MappedWindow, OperationType, PersistenceRow, PlainWindow};
