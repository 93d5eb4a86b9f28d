//! # Pool Configuration Constants
//!
//! This module centralizes every tunable of the window pool, grouping
//! interdependent values together and documenting their relationships.
//! Constants that depend on each other are co-located to prevent mismatch
//! bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! MAX_BRICK_COUNT (100,000)
//!       │
//!       └─> scarce-memory brick sizing caps the brick count here; the
//!           brick array is preallocated, so this bounds setup cost.
//!
//! REFRESH_BRICK_COUNT (50,000)
//!       │
//!       └─> brick misses accumulated before a refresh pass runs. Amortizes
//!           the sort-and-remap cost over many row-path acquires.
//!
//! MIN_MAPPED_RECORDS (10)
//!       │
//!       └─> a mapping budget below MIN_MAPPED_RECORDS * page_size disables
//!           mapping for the pool's lifetime (too small to be useful).
//!
//! FULL_FIT_BRICK_TARGET (1,000)
//! SCARCE_BRICK_TARGET (1,000)
//! EMPTY_FILE_BRICK_DIVISOR (100)
//!       │
//!       └─> brick sizing divisors: ~1,000 bricks whether the file fits in
//!           memory or not (fine-grained eviction when scarce, cheap
//!           bookkeeping when it fits); a coarser split when only a memory
//!           budget is known and the file is still empty.
//!
//! ROW_MAP_SHARD_COUNT (64)
//!       │
//!       └─> lock shards in the default active-row map. Power of two so
//!           shard selection is a mask.
//! ```
//!
//! ## Usage
//!
//! Import constants from this module rather than defining them locally:
//!
//! ```ignore
//! use windowpool::config::{MAX_BRICK_COUNT, REFRESH_BRICK_COUNT};
//! ```

// ============================================================================
// BRICK LAYOUT LIMITS
// ============================================================================

/// Upper bound on the number of bricks a pool will partition its file into.
/// The brick array is allocated eagerly at setup, so this caps both memory
/// overhead and refresh sort cost.
pub const MAX_BRICK_COUNT: usize = 100_000;

/// Number of brick misses (acquires served by a row instead of a mapped
/// window) accumulated before the pool attempts a refresh pass.
pub const REFRESH_BRICK_COUNT: usize = 50_000;

/// Bounded yield loop in window allocation: how many times to re-check a
/// brick for draining row locks before giving up on installing a window.
pub const MAX_ALLOC_ATTEMPTS: usize = 5;

// ============================================================================
// BRICK SIZING DIVISORS
// These drive the setup arithmetic in WindowPool::setup_bricks.
// ============================================================================

/// Minimum number of records the mapping budget must cover. Below
/// `MIN_MAPPED_RECORDS * page_size` bytes, memory mapping is disabled for
/// the pool's lifetime.
pub const MIN_MAPPED_RECORDS: usize = 10;

/// Brick-count target when the whole file fits in the mapping budget:
/// brick size is budget / FULL_FIT_BRICK_TARGET.
pub const FULL_FIT_BRICK_TARGET: u64 = 1_000;

/// Brick-count target when the file exceeds the mapping budget: the pool
/// aims for SCARCE_BRICK_TARGET bricks per budget-sized slice of the file.
pub const SCARCE_BRICK_TARGET: u64 = 1_000;

/// Brick sizing divisor when the file is still empty and only a memory
/// budget is known: brick size is budget / EMPTY_FILE_BRICK_DIVISOR.
pub const EMPTY_FILE_BRICK_DIVISOR: u64 = 100;

// ============================================================================
// ACTIVE ROW MAP SHARDING
// ============================================================================

/// Number of lock shards in the default active-row map.
/// Higher values reduce contention but increase memory overhead.
pub const ROW_MAP_SHARD_COUNT: usize = 64;

const _: () = assert!(
    ROW_MAP_SHARD_COUNT.is_power_of_two(),
    "ROW_MAP_SHARD_COUNT must be a power of two so shard selection is a mask"
);

// ============================================================================
// AUTO-DETECTED MAPPING BUDGET
// ============================================================================

/// Default mapping budget as a percentage of system RAM.
pub const DEFAULT_MAPPED_PERCENT: u64 = 25;

/// Floor for the auto-detected mapping budget in bytes (4MB).
pub const MIN_AUTO_MAPPED: u64 = 4 * 1024 * 1024;

const _: () = assert!(
    DEFAULT_MAPPED_PERCENT <= 100,
    "DEFAULT_MAPPED_PERCENT is a percentage of system RAM"
);
