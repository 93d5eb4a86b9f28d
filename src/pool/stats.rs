//! Point-in-time pool statistics.
//!
//! Counters on the acquire hot path are maintained with relaxed atomics and
//! no cross-counter coordination, so a snapshot is eventually consistent:
//! individual values are monotonic but may lag each other. Callers should
//! treat them as order-of-magnitude signals, not an audit trail.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct WindowPoolStats {
    pub store_name: PathBuf,
    /// Bytes configured for window memory (0 when mapping is disabled).
    pub available_mem: u64,
    /// Bytes currently held by installed windows.
    pub mem_used: u64,
    pub brick_count: usize,
    pub brick_size: usize,
    /// Acquires served by an installed brick window.
    pub hit: u64,
    /// Acquires that fell back to a row.
    pub miss: u64,
    /// Windows that migrated from a cold brick to a hot one during refresh.
    pub switches: u64,
    /// Window allocations refused (mmap failure or buffer exhaustion).
    pub alloc_failures: u64,
    pub refreshes: u64,
    pub averted_refreshes: u64,
    /// Mean wall time of a refresh pass.
    pub avg_refresh_millis: u64,
}

impl std::fmt::Display for WindowPoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: hit={} miss={} switches={} alloc_failures={} bricks={}x{}b mem={}/{}b \
             refreshes={} (averted {}, avg {}ms)",
            self.store_name.display(),
            self.hit,
            self.miss,
            self.switches,
            self.alloc_failures,
            self.brick_count,
            self.brick_size,
            self.mem_used,
            self.available_mem,
            self.refreshes,
            self.averted_refreshes,
            self.avg_refresh_millis,
        )
    }
}
