//! # Configuration Module
//!
//! Centralizes all configuration constants for the window pool. Constants
//! are grouped by their functional area and interdependencies are documented
//! and enforced through compile-time assertions.
//!
//! Also hosts [`auto_mapped_memory`], the convenience default for the
//! mapping budget when the caller has no better number.
//!
//! ## Module Organization
//!
//! - [`constants`]: all numeric configuration values with dependency notes

pub mod constants;
pub use constants::*;

use std::sync::OnceLock;

use sysinfo::System;

static SYSTEM_TOTAL_MEMORY: OnceLock<u64> = OnceLock::new();

/// Computes a default mapping budget from system RAM.
///
/// Returns [`DEFAULT_MAPPED_PERCENT`] percent of total memory, never below
/// [`MIN_AUTO_MAPPED`]. The system query runs once per process.
pub fn auto_mapped_memory() -> u64 {
    let total = *SYSTEM_TOTAL_MEMORY.get_or_init(|| {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.total_memory()
    });

    let budget = (total / 100) * DEFAULT_MAPPED_PERCENT;
    budget.max(MIN_AUTO_MAPPED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_mapped_memory_respects_floor() {
        assert!(auto_mapped_memory() >= MIN_AUTO_MAPPED);
    }
}
