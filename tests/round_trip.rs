//! # Round-Trip and Sizing Integration Tests
//!
//! This module verifies the pool end to end against a real store file:
//!
//! 1. Write-Then-Read
//!    - Every record written through WRITE handles survives flush, close,
//!      and a reopen with a fresh pool
//!
//! 2. Mapping Disabled
//!    - A zero memory budget serves every acquire through rows (hit == 0)
//!    - A budget below ten records disables mapping and notifies the
//!      monitor with the exact (available, wanted) pair
//!
//! 3. Sizing Seeds
//!    - Scarce memory against a 10GB sparse file caps the brick count at
//!      100,000 with a record-aligned brick size

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::tempdir;
use windowpool::{Channel, FileChannel, Monitor, OperationType, WindowPool};

fn record_pattern(position: u64, page_size: usize) -> Vec<u8> {
    (0..page_size)
        .map(|i| (position as usize).wrapping_mul(31).wrapping_add(i) as u8)
        .collect()
}

fn open_channel(path: &Path) -> Arc<dyn Channel> {
    Arc::new(FileChannel::create(path).unwrap())
}

#[test]
fn write_then_read_survives_reopen() {
    const PAGE_SIZE: usize = 64;
    const RECORDS: u64 = 100;

    let dir = tempdir().unwrap();
    let path = dir.path().join("store");

    {
        let pool = WindowPool::builder(&path, PAGE_SIZE, open_channel(&path))
            .mapped_memory(64 * 1024)
            .open()
            .unwrap();

        for position in 0..RECORDS {
            let mut window = pool.acquire(position, OperationType::Write).unwrap();
            window
                .record_mut()
                .copy_from_slice(&record_pattern(position, PAGE_SIZE));
            pool.release(window).unwrap();
        }

        pool.flush_all().unwrap();
        pool.close().unwrap();
    }

    let pool = WindowPool::builder(&path, PAGE_SIZE, open_channel(&path))
        .mapped_memory(64 * 1024)
        .open()
        .unwrap();

    for position in 0..RECORDS {
        let window = pool.acquire(position, OperationType::Read).unwrap();
        assert_eq!(
            window.record(),
            record_pattern(position, PAGE_SIZE).as_slice(),
            "record {position} corrupted across reopen"
        );
    }
}

#[test]
fn zero_budget_serves_everything_through_rows() {
    const PAGE_SIZE: usize = 9;

    let dir = tempdir().unwrap();
    let path = dir.path().join("store");
    std::fs::write(&path, vec![0xa5u8; 900]).unwrap();

    let pool = WindowPool::builder(&path, PAGE_SIZE, open_channel(&path))
        .mapped_memory(0)
        .open()
        .unwrap();

    for position in 0..100 {
        let window = pool.acquire(position, OperationType::Read).unwrap();
        assert_eq!(window.record(), &[0xa5u8; PAGE_SIZE]);
    }

    let stats = pool.stats();
    assert_eq!(stats.hit, 0);
    assert!(stats.miss >= 100);
    assert_eq!(stats.brick_count, 0);
    assert_eq!(stats.mem_used, 0);
}

#[derive(Default)]
struct InsufficiencyMonitor {
    calls: Mutex<Vec<(u64, u64)>>,
}

impl Monitor for InsufficiencyMonitor {
    fn insufficient_memory_for_mapping(&self, available: u64, wanted: u64) {
        self.calls.lock().push((available, wanted));
    }
}

#[test]
fn tiny_budget_disables_mapping_with_monitor_notice() {
    const PAGE_SIZE: usize = 9;

    let dir = tempdir().unwrap();
    let path = dir.path().join("store");
    std::fs::write(&path, vec![1u8; 900]).unwrap();

    let monitor = Arc::new(InsufficiencyMonitor::default());
    let pool = WindowPool::builder(&path, PAGE_SIZE, open_channel(&path))
        .mapped_memory(8)
        .monitor(Arc::clone(&monitor) as Arc<dyn Monitor>)
        .open()
        .unwrap();

    assert_eq!(monitor.calls.lock().as_slice(), &[(8, 90)]);
    assert_eq!(pool.stats().brick_count, 0);

    // The pool still works, just without windows.
    let window = pool.acquire(3, OperationType::Read).unwrap();
    assert_eq!(window.record(), &[1u8; PAGE_SIZE]);
}

#[test]
fn scarce_budget_against_huge_file_caps_brick_count() {
    const PAGE_SIZE: usize = 33;

    let dir = tempdir().unwrap();
    let path = dir.path().join("store");
    let channel = open_channel(&path);
    // Sparse: apparent size only, no 10GB of disk.
    channel.grow(10_000_000_000).unwrap();

    let pool = WindowPool::builder(&path, PAGE_SIZE, channel)
        .mapped_memory(10_000_000)
        .open()
        .unwrap();

    let stats = pool.stats();
    assert_eq!(stats.brick_count, 100_000);
    assert_eq!(stats.brick_size, 99_990);
    assert_eq!(stats.brick_size % PAGE_SIZE, 0);

    // No windows exist until demand shows up; an acquire rides a row.
    let window = pool.acquire(0, OperationType::Read).unwrap();
    assert_eq!(window.record(), &[0u8; PAGE_SIZE]);
}

#[test]
fn plain_windows_round_trip_without_memory_mapping() {
    const PAGE_SIZE: usize = 32;
    const RECORDS: u64 = 50;

    let dir = tempdir().unwrap();
    let path = dir.path().join("store");

    {
        let pool = WindowPool::builder(&path, PAGE_SIZE, open_channel(&path))
            .mapped_memory(32 * 1024)
            .use_memory_mapped(false)
            .open()
            .unwrap();

        for position in 0..RECORDS {
            let mut window = pool.acquire(position, OperationType::Write).unwrap();
            window
                .record_mut()
                .copy_from_slice(&record_pattern(position, PAGE_SIZE));
        }
        pool.flush_all().unwrap();
        pool.close().unwrap();
    }

    let contents = std::fs::read(&path).unwrap();
    for position in 0..RECORDS {
        let start = position as usize * PAGE_SIZE;
        assert_eq!(
            &contents[start..start + PAGE_SIZE],
            record_pattern(position, PAGE_SIZE).as_slice(),
            "record {position} corrupted on disk"
        );
    }
}
