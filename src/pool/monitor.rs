//! Observer hook for pool statistics, status, and errors.
//!
//! Purely advisory: every callback has an empty default body, and the pool
//! never changes behavior based on what a monitor does. [`NoopMonitor`] is
//! the sentinel for callers that don't care.

use std::path::Path;

/// Receives advisory notifications from a pool.
pub trait Monitor: Send + Sync {
    /// Cumulative operation counters, reported when the pool closes.
    fn record_statistics(
        &self,
        _store_name: &Path,
        _hit: u64,
        _miss: u64,
        _switches: u64,
        _alloc_failures: u64,
    ) {
    }

    /// The brick layout chosen at setup.
    fn record_status(
        &self,
        _store_name: &Path,
        _brick_count: usize,
        _brick_size: usize,
        _available_mem: u64,
        _file_size: u64,
    ) {
    }

    /// A window allocation failed; the affected brick falls back to rows.
    fn allocation_error(&self, _store_name: &Path, _cause: &eyre::Report, _description: &str) {}

    /// The configured mapping budget is too small to use; mapping is
    /// disabled for the pool's lifetime.
    fn insufficient_memory_for_mapping(&self, _available: u64, _wanted: u64) {}
}

/// Monitor that ignores everything.
#[derive(Debug, Default)]
pub struct NoopMonitor;

impl Monitor for NoopMonitor {}
