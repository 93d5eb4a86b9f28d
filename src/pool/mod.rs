//! # The Window Pool
//!
//! `WindowPool` mediates record-granular access to one store file. It
//! partitions the file into equally sized bricks, keeps the hottest bricks
//! mapped into memory as persistence windows, and serves everything else
//! through short-lived single-record rows.
//!
//! ## Data Flow
//!
//! ```text
//!            acquire(position, op)
//!                     │
//!          position → brick index ──────── index past the end? expand
//!                     │
//!         brick has a markable window?
//!             │               │
//!            yes              no
//!             │               │
//!        hit; lock it    miss; row from the active-row map
//!             │               (or a fresh one, compare-absent insert)
//!             │               │
//!             └───── WindowHandle (locked for op) ─────┘
//!
//!            release (handle drop)
//!                     │
//!        row? hand off dirty bytes to a co-located plain window,
//!             write out, close-if-free, compare-remove from map
//!                     │
//!        unlock; drop the brick's lock count
//! ```
//!
//! ## Rebalancing
//!
//! Every `REFRESH_BRICK_COUNT` brick misses, one thread (elected by CAS) runs
//! a refresh pass: demand counters are snapshot and reset, bricks are sorted
//! by observed demand, spare memory is filled with the hottest unmapped
//! bricks, and cold mappings are swapped for hot unmapped ones. Concurrent
//! would-be refreshers count an averted refresh and move on. Expansion and
//! refresh serialize on one rebalance mutex.
//!
//! ## Concurrency
//!
//! Many threads call `acquire`/`release` concurrently. Blocking points are
//! the per-window operation lock (WRITE excludes everything, READ is
//! shared) and the bounded yield loop in window allocation that waits for a
//! brick's row locks to drain. Statistics counters are relaxed atomics and
//! eventually consistent by contract.

mod brick;
mod handle;
mod monitor;
mod row_map;
mod stats;

pub use brick::{BrickElement, BrickFactory, DefaultBrickFactory};
pub use handle::WindowHandle;
pub use monitor::{Monitor, NoopMonitor};
pub use row_map::{RowMap, ShardedRowMap};
pub use stats::WindowPoolStats;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use eyre::{ensure, eyre, Result, WrapErr};
use parking_lot::{Mutex, RwLock};

use crate::channel::Channel;
use crate::config::{
    EMPTY_FILE_BRICK_DIVISOR, FULL_FIT_BRICK_TARGET, MAX_ALLOC_ATTEMPTS, MAX_BRICK_COUNT,
    MIN_MAPPED_RECORDS, REFRESH_BRICK_COUNT, SCARCE_BRICK_TARGET,
};
use crate::window::{
    BrickWindow, MappedWindow, OperationType, PersistenceRow, PlainWindow, WindowInitError,
};

use handle::Acquired;

/// Adaptive window pool over one fixed-record-size store file.
pub struct WindowPool {
    store_name: PathBuf,
    page_size: usize,
    channel: RwLock<Option<Arc<dyn Channel>>>,
    read_only: bool,
    use_memory_mapped: bool,

    /// Bytes dedicated to windows; 0 once mapping is disabled.
    available_mem: u64,
    /// Bytes per brick; 0 disables the brick path entirely.
    brick_size: usize,
    bricks: RwLock<Vec<Arc<BrickElement>>>,
    mem_used: AtomicU64,

    hit: AtomicU64,
    miss: AtomicU64,
    switches: AtomicU64,
    alloc_failures: AtomicU64,
    brick_miss: AtomicUsize,

    refreshing: AtomicBool,
    refreshes: AtomicU64,
    averted_refreshes: AtomicU64,
    refresh_time_millis: AtomicU64,
    /// Serializes expansion and the refresh body.
    rebalance: Mutex<()>,

    active_rows: Arc<dyn RowMap>,
    brick_factory: Arc<dyn BrickFactory>,
    monitor: Arc<dyn Monitor>,
}

/// Configures and opens a [`WindowPool`].
pub struct WindowPoolBuilder {
    store_name: PathBuf,
    page_size: usize,
    channel: Arc<dyn Channel>,
    mapped_mem: u64,
    use_memory_mapped: bool,
    read_only: bool,
    active_rows: Option<Arc<dyn RowMap>>,
    brick_factory: Option<Arc<dyn BrickFactory>>,
    monitor: Option<Arc<dyn Monitor>>,
}

impl WindowPoolBuilder {
    /// Bytes dedicated to window memory. 0 disables mapping; every acquire
    /// then takes the row path.
    pub fn mapped_memory(mut self, bytes: u64) -> Self {
        self.mapped_mem = bytes;
        self
    }

    /// Use heap-buffered plain windows instead of OS memory mappings.
    pub fn use_memory_mapped(mut self, yes: bool) -> Self {
        self.use_memory_mapped = yes;
        self
    }

    /// Read-only pool: WRITE acquires are rejected and flushing is a no-op.
    pub fn read_only(mut self, yes: bool) -> Self {
        self.read_only = yes;
        self
    }

    /// Supplies the active-row map (instrumentation/sharing seam).
    pub fn active_rows(mut self, rows: Arc<dyn RowMap>) -> Self {
        self.active_rows = Some(rows);
        self
    }

    /// Supplies the brick factory (instrumentation seam).
    pub fn brick_factory(mut self, factory: Arc<dyn BrickFactory>) -> Self {
        self.brick_factory = Some(factory);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Sizes the bricks against the file and opens the pool.
    pub fn open(self) -> Result<WindowPool> {
        ensure!(self.page_size >= 1, "page size must be at least 1 byte");

        let monitor = self.monitor.unwrap_or_else(|| Arc::new(NoopMonitor));
        let file_size = self
            .channel
            .len()
            .wrap_err_with(|| format!("failed to size store '{}'", self.store_name.display()))?;

        let layout = compute_brick_layout(
            file_size,
            self.page_size,
            self.mapped_mem,
            monitor.as_ref(),
        );

        let brick_factory = self
            .brick_factory
            .unwrap_or_else(|| Arc::new(DefaultBrickFactory));
        let bricks = (0..layout.brick_count)
            .map(|i| brick_factory.create(i as u32))
            .collect::<Vec<_>>();

        tracing::debug!(
            store = %self.store_name.display(),
            brick_count = layout.brick_count,
            brick_size = layout.brick_size,
            available_mem = layout.available_mem,
            file_size,
            "window pool opened"
        );
        monitor.record_status(
            &self.store_name,
            layout.brick_count,
            layout.brick_size,
            layout.available_mem,
            file_size,
        );

        Ok(WindowPool {
            store_name: self.store_name,
            page_size: self.page_size,
            channel: RwLock::new(Some(self.channel)),
            read_only: self.read_only,
            use_memory_mapped: self.use_memory_mapped,
            available_mem: layout.available_mem,
            brick_size: layout.brick_size,
            bricks: RwLock::new(bricks),
            mem_used: AtomicU64::new(0),
            hit: AtomicU64::new(0),
            miss: AtomicU64::new(0),
            switches: AtomicU64::new(0),
            alloc_failures: AtomicU64::new(0),
            brick_miss: AtomicUsize::new(0),
            refreshing: AtomicBool::new(false),
            refreshes: AtomicU64::new(0),
            averted_refreshes: AtomicU64::new(0),
            refresh_time_millis: AtomicU64::new(0),
            rebalance: Mutex::new(()),
            active_rows: self
                .active_rows
                .unwrap_or_else(|| Arc::new(ShardedRowMap::new())),
            brick_factory,
            monitor,
        })
    }
}

struct BrickLayout {
    available_mem: u64,
    brick_size: usize,
    brick_count: usize,
}

impl BrickLayout {
    const DISABLED: BrickLayout = BrickLayout {
        available_mem: 0,
        brick_size: 0,
        brick_count: 0,
    };
}

/// Sizes bricks for a file of `file_size` bytes given `mapped_mem` bytes of
/// window memory.
///
/// Targets roughly a thousand bricks whether the file fits in memory or not:
/// fine-grained eviction when memory is scarce, cheap bookkeeping when it
/// fits. Brick size is always a positive multiple of the record size when
/// mapping is enabled at all.
fn compute_brick_layout(
    file_size: u64,
    page_size: usize,
    mapped_mem: u64,
    monitor: &dyn Monitor,
) -> BrickLayout {
    let record = page_size as u64;

    // A budget that cannot hold even a handful of records is not worth the
    // bookkeeping; turn mapping off for the pool's lifetime.
    if mapped_mem > 0 && mapped_mem < record * MIN_MAPPED_RECORDS as u64 {
        tracing::warn!(
            available = mapped_mem,
            wanted = record * MIN_MAPPED_RECORDS as u64,
            "mapping budget too small, window memory disabled"
        );
        monitor.insufficient_memory_for_mapping(mapped_mem, record * MIN_MAPPED_RECORDS as u64);
        return BrickLayout::DISABLED;
    }

    if mapped_mem > 0 && file_size > 0 {
        if mapped_mem >= file_size {
            // Whole file fits: split the budget into ~1000 equal bricks.
            let mut brick_size = mapped_mem / FULL_FIT_BRICK_TARGET;
            brick_size = (brick_size / record) * record;
            if brick_size == 0 {
                brick_size = record;
            }
            BrickLayout {
                available_mem: mapped_mem,
                brick_size: brick_size as usize,
                brick_count: (file_size / brick_size) as usize,
            }
        } else {
            // Memory is scarce: ~1000 bricks per budget-sized slice of the
            // file, capped so the brick array stays tractable.
            let mut brick_count =
                ((SCARCE_BRICK_TARGET * file_size).div_ceil(mapped_mem)) as usize;
            if brick_count > MAX_BRICK_COUNT {
                brick_count = MAX_BRICK_COUNT;
            }
            if file_size / brick_count as u64 > mapped_mem {
                tracing::warn!(
                    available = mapped_mem,
                    wanted = file_size / brick_count as u64,
                    "mapping budget below one brick, window memory disabled"
                );
                monitor
                    .insufficient_memory_for_mapping(mapped_mem, file_size / brick_count as u64);
                return BrickLayout::DISABLED;
            }
            let mut brick_size = file_size / brick_count as u64;
            if brick_size < record {
                brick_size = record;
            } else {
                brick_size = (brick_size / record) * record;
            }
            BrickLayout {
                available_mem: mapped_mem,
                brick_size: brick_size as usize,
                brick_count,
            }
        }
    } else if mapped_mem > 0 {
        // Empty file, only a budget: bricks exist from the first expansion.
        let brick_size = ((mapped_mem / EMPTY_FILE_BRICK_DIVISOR) / record) * record;
        BrickLayout {
            available_mem: mapped_mem,
            brick_size: brick_size as usize,
            brick_count: 0,
        }
    } else {
        BrickLayout::DISABLED
    }
}

impl WindowPool {
    /// Starts building a pool for `channel`, whose records are `page_size`
    /// bytes each. `store_name` is an opaque identifier used in errors and
    /// monitor callbacks.
    pub fn builder<P: Into<PathBuf>>(
        store_name: P,
        page_size: usize,
        channel: Arc<dyn Channel>,
    ) -> WindowPoolBuilder {
        WindowPoolBuilder {
            store_name: store_name.into(),
            page_size,
            channel,
            mapped_mem: 0,
            use_memory_mapped: true,
            read_only: false,
            active_rows: None,
            brick_factory: None,
            monitor: None,
        }
    }

    /// Record size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// The store identifier this pool was opened with.
    pub fn store_name(&self) -> &Path {
        &self.store_name
    }

    /// Acquires a window covering `position`, locked for `op`.
    ///
    /// Blocks while another thread holds the same window exclusively. The
    /// returned handle must be released (dropped) by the acquiring caller;
    /// abandoning it leaks the brick's lock count and pins the brick
    /// unmapped forever.
    pub fn acquire(&self, position: u64, op: OperationType) -> Result<WindowHandle<'_>> {
        ensure!(
            !(self.read_only && op == OperationType::Write),
            "cannot acquire WRITE windows on the read-only pool for '{}'",
            self.store_name.display()
        );

        if self.brick_miss.load(Ordering::Relaxed) >= REFRESH_BRICK_COUNT {
            self.refresh_bricks()?;
        }

        loop {
            let mut brick: Option<Arc<BrickElement>> = None;
            if self.brick_size > 0 {
                let index = self.position_to_brick(position);
                if index >= self.bricks.read().len() {
                    self.expand_bricks(index + 1)?;
                }
                let the_brick = Arc::clone(&self.bricks.read()[index]);
                if let Some(window) = the_brick.get_and_mark_window() {
                    self.hit.fetch_add(1, Ordering::Relaxed);
                    window.core().lock_op(op);
                    return Ok(WindowHandle::new(
                        self,
                        position,
                        op,
                        Acquired::Window {
                            window,
                            brick: the_brick,
                        },
                    ));
                }
                // No markable window; the brick lock taken above now covers
                // the row this acquire will ride.
                brick = Some(the_brick);
            }

            self.miss.fetch_add(1, Ordering::Relaxed);
            self.brick_miss.fetch_add(1, Ordering::Relaxed);

            if let Some(row) = self.active_rows.get(position) {
                if row.mark_in_use() {
                    row.core().lock_op(op);
                    return Ok(WindowHandle::new(
                        self,
                        position,
                        op,
                        Acquired::Row { row, brick },
                    ));
                }
            }

            // No live row for this position (or it closed under us); build
            // one and race to publish it.
            let row = match self
                .channel()
                .and_then(|channel| PersistenceRow::new(position, self.page_size, channel))
            {
                Ok(row) => Arc::new(row),
                Err(err) => {
                    if let Some(b) = &brick {
                        b.release_lock();
                    }
                    return Err(err);
                }
            };
            match self.active_rows.put_if_absent(position, Arc::clone(&row)) {
                None => {
                    row.core().lock_op(op);
                    return Ok(WindowHandle::new(
                        self,
                        position,
                        op,
                        Acquired::Row { row, brick },
                    ));
                }
                Some(_winner) => {
                    // Another thread published first; drop ours and take the
                    // winner's row on the next pass.
                    row.discard();
                    if let Some(b) = brick.take() {
                        b.release_lock();
                    }
                }
            }
        }
    }

    /// Releases `handle`, surfacing any write-back error. Dropping the
    /// handle does the same release but can only log failures.
    pub fn release(&self, mut handle: WindowHandle<'_>) -> Result<()> {
        debug_assert!(
            std::ptr::eq(handle.pool, self),
            "handle released to a different pool"
        );
        match handle.acquired.take() {
            Some(acquired) => self.release_acquired(acquired, handle.op),
            None => Ok(()),
        }
    }

    pub(crate) fn release_acquired(&self, acquired: Acquired, op: OperationType) -> Result<()> {
        match acquired {
            Acquired::Window { window, brick } => {
                window.core().unlock_op(op);
                window.core().release_use();
                brick.release_lock();
                Ok(())
            }
            Acquired::Row { row, brick } => {
                let result = self.release_row(&row);
                if let Some(brick) = &brick {
                    brick.release_lock();
                }
                row.core().unlock_op(op);
                result
            }
        }
    }

    fn release_row(&self, row: &Arc<PersistenceRow>) -> Result<()> {
        // If a plain window appeared over this brick while the row was out,
        // it was loaded before the row's bytes existed; hand the changes
        // over. Mapped windows view the same file region the row writes to,
        // so they need no transfer.
        if self.brick_size > 0 && row.is_dirty() {
            self.apply_changes_to_brick_window(row);
        }
        if row.write_out_and_close_if_free(self.read_only)? {
            self.active_rows.remove(row.position(), row);
        }
        Ok(())
    }

    fn apply_changes_to_brick_window(&self, row: &PersistenceRow) {
        let index = self.position_to_brick(row.position());
        let window = {
            let bricks = self.bricks.read();
            match bricks.get(index) {
                Some(brick) => brick.window(),
                None => None,
            }
        };
        let Some(window) = window else { return };
        if window.is_mapped() || !window.core().mark_in_use() {
            return;
        }
        if let BrickWindow::Plain(plain) = &*window {
            window.core().lock_op(OperationType::Write);
            plain.accept_contents(row);
            window.core().unlock_op(OperationType::Write);
        }
        window.core().release_use();
    }

    fn position_to_brick(&self, position: u64) -> usize {
        (position * self.page_size as u64 / self.brick_size as u64) as usize
    }

    fn brick_to_position(&self, index: u32) -> u64 {
        index as u64 * self.brick_size as u64 / self.page_size as u64
    }

    fn channel(&self) -> Result<Arc<dyn Channel>> {
        self.channel
            .read()
            .as_ref()
            .cloned()
            .ok_or_else(|| eyre!("window pool for '{}' is closed", self.store_name.display()))
    }

    /// Runs a refresh pass if this thread wins the election; concurrent
    /// triggers count an averted refresh and return immediately.
    fn refresh_bricks(&self) -> Result<()> {
        if self.brick_miss.load(Ordering::Relaxed) < REFRESH_BRICK_COUNT || self.brick_size == 0 {
            return Ok(());
        }

        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let started = Instant::now();
            let result = self.do_refresh_bricks();
            if result.is_ok() {
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                self.refresh_time_millis
                    .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
            }
            self.refreshing.store(false, Ordering::Release);
            result
        } else {
            // Someone else is refreshing right now; trust them.
            self.averted_refreshes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn do_refresh_bricks(&self) -> Result<()> {
        let _rebalance = self.rebalance.lock();
        self.brick_miss.store(0, Ordering::Relaxed);

        let mut mapped = Vec::new();
        let mut unmapped = Vec::new();
        for brick in self.bricks.read().iter() {
            brick.snapshot_hit_count();
            if brick.has_window() {
                mapped.push(Arc::clone(brick));
            } else {
                unmapped.push(Arc::clone(brick));
            }
            brick.reset_hits();
        }
        mapped.sort_by_key(|b| b.hit_snapshot());
        unmapped.sort_by_key(|b| b.hit_snapshot());

        let brick_size = self.brick_size as u64;

        // Fill unused memory with the hottest unmapped bricks, but never map
        // a region nobody asked for.
        while self.mem_used.load(Ordering::Relaxed) + brick_size <= self.available_mem {
            let Some(hot) = unmapped.pop() else { break };
            if hot.hit_snapshot() == 0 {
                return Ok(());
            }
            self.allocate_new_window(&hot)?;
        }

        // Swap cold mappings for hotter unmapped bricks. Both cursors advance
        // every iteration whether or not the eviction went through; a locked
        // cold brick just forfeits this round's swap.
        let mut switched = 0u64;
        let mut mapped_iter = mapped.iter();
        while let Some(hot) = unmapped.pop() {
            let Some(cold) = mapped_iter.next() else { break };
            if cold.hit_snapshot() >= hot.hit_snapshot() {
                break;
            }
            if self.evict_window(cold)? && self.allocate_new_window(&hot)? {
                switched += 1;
            }
        }
        if switched > 0 {
            self.switches.fetch_add(switched, Ordering::Relaxed);
        }

        tracing::debug!(
            store = %self.store_name.display(),
            switched,
            mem_used = self.mem_used.load(Ordering::Relaxed),
            "brick refresh complete"
        );
        Ok(())
    }

    /// Grows the brick array to cover `new_count` bricks. New bricks get
    /// eager windows while the budget allows; when memory is already tight,
    /// the coldest window is freed first.
    fn expand_bricks(&self, new_count: usize) -> Result<()> {
        let _rebalance = self.rebalance.lock();
        let current = self.bricks.read().len();
        if new_count <= current {
            return Ok(());
        }

        let brick_size = self.brick_size as u64;
        if self.mem_used.load(Ordering::Relaxed) + brick_size >= self.available_mem {
            self.free_windows(1)?;
        }

        // New bricks are built and (possibly) mapped before publication, so
        // no acquire can be racing on them yet.
        let mut fresh = Vec::with_capacity(new_count - current);
        for index in current..new_count {
            let brick = self.brick_factory.create(index as u32);
            if self.mem_used.load(Ordering::Relaxed) + brick_size <= self.available_mem {
                self.allocate_new_window(&brick)?;
            }
            fresh.push(brick);
        }
        self.bricks.write().extend(fresh);
        Ok(())
    }

    /// Frees the `nr` coldest mapped windows (those that close without a
    /// fight). Expansion pressure only; the caller holds the rebalance lock.
    fn free_windows(&self, nr: usize) -> Result<()> {
        if self.brick_size == 0 {
            return Ok(());
        }
        let mut mapped: Vec<Arc<BrickElement>> = self
            .bricks
            .read()
            .iter()
            .filter(|b| b.has_window())
            .cloned()
            .collect();
        for brick in &mapped {
            brick.snapshot_hit_count();
        }
        mapped.sort_by_key(|b| b.hit_snapshot());

        for brick in mapped.iter().take(nr) {
            self.evict_window(brick)?;
        }
        Ok(())
    }

    /// Closes and removes a brick's window if nothing is using it. Memory
    /// accounting happens before any write-back error propagates, so the
    /// budget never drifts.
    fn evict_window(&self, brick: &Arc<BrickElement>) -> Result<bool> {
        let mut slot = brick.window_slot().write();
        let Some(window) = slot.clone() else {
            return Ok(false);
        };
        if !window.core().try_close(0) {
            return Ok(false);
        }
        let write_back = if self.read_only {
            Ok(())
        } else {
            window.force()
        };
        *slot = None;
        self.mem_used
            .fetch_sub(self.brick_size as u64, Ordering::Relaxed);
        write_back?;
        Ok(true)
    }

    /// Installs a window on `brick`. Returns whether the installation
    /// happened; mapping refusals and buffer exhaustion are counted,
    /// reported, and absorbed (the brick keeps running on rows), while
    /// channel I/O errors propagate.
    fn allocate_new_window(&self, brick: &Arc<BrickElement>) -> Result<bool> {
        let channel = self.channel()?;
        for attempt in 0..MAX_ALLOC_ATTEMPTS {
            if attempt > 0 {
                // Rows are short-lived; give their holders a chance to drain.
                std::thread::yield_now();
            }
            let mut slot = brick.window_slot().write();
            if brick.lock_count() != 0 {
                continue;
            }

            let first_position = self.brick_to_position(brick.index());
            let built = if self.use_memory_mapped {
                MappedWindow::map(
                    &channel,
                    first_position,
                    self.page_size,
                    self.brick_size,
                    self.read_only,
                )
                .map(BrickWindow::Mapped)
            } else {
                PlainWindow::load(
                    Arc::clone(&channel),
                    first_position,
                    self.page_size,
                    self.brick_size,
                )
                .map(BrickWindow::Plain)
            };

            return match built {
                Ok(window) => {
                    *slot = Some(Arc::new(window));
                    self.mem_used
                        .fetch_add(self.brick_size as u64, Ordering::Relaxed);
                    Ok(true)
                }
                Err(WindowInitError::Resource(cause)) => {
                    self.alloc_failures.fetch_add(1, Ordering::Relaxed);
                    let description = if self.use_memory_mapped {
                        "unable to memory map window"
                    } else {
                        "unable to allocate window buffer"
                    };
                    tracing::warn!(
                        store = %self.store_name.display(),
                        brick = brick.index(),
                        error = %cause,
                        "{description}"
                    );
                    self.monitor
                        .allocation_error(&self.store_name, &cause, description);
                    Ok(false)
                }
                Err(WindowInitError::Io(err)) => Err(err),
            };
        }
        Ok(false)
    }

    /// Forces every installed window and then the channel. No-op on a
    /// read-only pool. Any I/O failure surfaces to the caller.
    pub fn flush_all(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let channel = self.channel()?;
        let bricks: Vec<_> = self.bricks.read().clone();
        for brick in &bricks {
            if let Some(window) = brick.window() {
                window.force().wrap_err_with(|| {
                    format!(
                        "failed to flush window for brick {} of '{}'",
                        brick.index(),
                        self.store_name.display()
                    )
                })?;
            }
        }
        channel
            .force(false)
            .wrap_err_with(|| format!("failed to force store '{}'", self.store_name.display()))
    }

    /// Flushes everything, closes all windows, clears the active-row map,
    /// and drops the channel reference. Idempotent; the pool rejects
    /// operations afterwards. Windows still held by callers at this point
    /// are a caller error and are closed out from under them.
    pub fn close(&self) -> Result<()> {
        let _rebalance = self.rebalance.lock();
        if self.channel.read().is_none() {
            return Ok(());
        }

        let flush_result = self.flush_all();

        for brick in self.bricks.read().iter() {
            let mut slot = brick.window_slot().write();
            if let Some(window) = slot.take() {
                window.core().force_close();
                self.mem_used
                    .fetch_sub(self.brick_size as u64, Ordering::Relaxed);
            }
        }
        self.active_rows.clear();
        *self.channel.write() = None;

        self.monitor.record_statistics(
            &self.store_name,
            self.hit.load(Ordering::Relaxed),
            self.miss.load(Ordering::Relaxed),
            self.switches.load(Ordering::Relaxed),
            self.alloc_failures.load(Ordering::Relaxed),
        );
        flush_result
    }

    /// A point-in-time statistics snapshot (eventually consistent).
    pub fn stats(&self) -> WindowPoolStats {
        let refreshes = self.refreshes.load(Ordering::Relaxed);
        let avg_refresh_millis = if refreshes == 0 {
            0
        } else {
            self.refresh_time_millis.load(Ordering::Relaxed) / refreshes
        };
        WindowPoolStats {
            store_name: self.store_name.clone(),
            available_mem: self.available_mem,
            mem_used: self.mem_used.load(Ordering::Relaxed),
            brick_count: self.bricks.read().len(),
            brick_size: self.brick_size,
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            refreshes,
            averted_refreshes: self.averted_refreshes.load(Ordering::Relaxed),
            avg_refresh_millis,
        }
    }
}

impl Drop for WindowPool {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::error!(
                store = %self.store_name.display(),
                error = %err,
                "window pool close failed during drop"
            );
        }
    }
}

impl std::fmt::Debug for WindowPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowPool")
            .field("store_name", &self.store_name)
            .field("page_size", &self.page_size)
            .field("brick_size", &self.brick_size)
            .field("brick_count", &self.bricks.read().len())
            .field("available_mem", &self.available_mem)
            .field("read_only", &self.read_only)
            .field("use_memory_mapped", &self.use_memory_mapped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FileChannel;
    use parking_lot::Mutex as PlMutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingMonitor {
        insufficient: PlMutex<Vec<(u64, u64)>>,
        statuses: PlMutex<Vec<(usize, usize)>>,
    }

    impl Monitor for RecordingMonitor {
        fn record_status(
            &self,
            _store_name: &std::path::Path,
            brick_count: usize,
            brick_size: usize,
            _available_mem: u64,
            _file_size: u64,
        ) {
            self.statuses.lock().push((brick_count, brick_size));
        }

        fn insufficient_memory_for_mapping(&self, available: u64, wanted: u64) {
            self.insufficient.lock().push((available, wanted));
        }
    }

    fn layout(file_size: u64, page_size: usize, mapped_mem: u64) -> BrickLayout {
        compute_brick_layout(file_size, page_size, mapped_mem, &NoopMonitor)
    }

    #[test]
    fn sizing_zero_memory_disables_mapping() {
        let layout = layout(900, 9, 0);
        assert_eq!(layout.brick_size, 0);
        assert_eq!(layout.brick_count, 0);
        assert_eq!(layout.available_mem, 0);
    }

    #[test]
    fn sizing_tiny_budget_disables_mapping_and_notifies() {
        let monitor = RecordingMonitor::default();
        let layout = compute_brick_layout(900, 9, 8, &monitor);
        assert_eq!(layout.brick_size, 0);
        assert_eq!(monitor.insufficient.lock().as_slice(), &[(8, 90)]);
    }

    #[test]
    fn sizing_full_fit_targets_a_thousand_bricks() {
        let layout = layout(900, 9, 9_000);
        assert_eq!(layout.brick_size, 9);
        assert_eq!(layout.brick_count, 100);
        assert_eq!(layout.available_mem, 9_000);
    }

    #[test]
    fn sizing_scarce_memory_keeps_record_multiple() {
        let layout = layout(900, 9, 90);
        assert_eq!(layout.brick_size, 9);
        assert_eq!(layout.brick_count, 10_000);
    }

    #[test]
    fn sizing_scarce_memory_caps_brick_count() {
        let layout = layout(10_000_000_000, 33, 10_000_000);
        assert_eq!(layout.brick_count, MAX_BRICK_COUNT);
        assert_eq!(layout.brick_size, 99_990);
        assert_eq!(layout.brick_size % 33, 0);
    }

    #[test]
    fn sizing_empty_file_uses_budget_divisor() {
        let layout = layout(0, 16, 64_000);
        assert_eq!(layout.brick_size, 640);
        assert_eq!(layout.brick_count, 0);
        assert_eq!(layout.available_mem, 64_000);
    }

    #[test]
    fn position_mapping_round_trips_through_bricks() {
        let dir = tempdir().unwrap();
        let channel: Arc<dyn Channel> =
            Arc::new(FileChannel::create(dir.path().join("store")).unwrap());
        channel.write_at(0, &vec![0u8; 900]).unwrap();

        let pool = WindowPool::builder(dir.path().join("store"), 9, channel)
            .mapped_memory(9_000)
            .open()
            .unwrap();

        assert_eq!(pool.position_to_brick(0), 0);
        assert_eq!(pool.position_to_brick(1), 1);
        assert_eq!(pool.brick_to_position(7), 7);
    }

    #[test]
    fn open_reports_status_once() {
        let dir = tempdir().unwrap();
        let channel: Arc<dyn Channel> =
            Arc::new(FileChannel::create(dir.path().join("store")).unwrap());
        channel.write_at(0, &vec![1u8; 900]).unwrap();

        let monitor = Arc::new(RecordingMonitor::default());
        let _pool = WindowPool::builder(dir.path().join("store"), 9, channel)
            .mapped_memory(9_000)
            .monitor(Arc::clone(&monitor) as Arc<dyn Monitor>)
            .open()
            .unwrap();

        assert_eq!(monitor.statuses.lock().as_slice(), &[(100, 9)]);
    }

    #[test]
    fn write_acquire_rejected_on_read_only_pool() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store");
        std::fs::write(&path, vec![0u8; 90]).unwrap();
        let channel: Arc<dyn Channel> =
            Arc::new(FileChannel::open_with(&path, true).unwrap());

        let pool = WindowPool::builder(&path, 9, channel)
            .read_only(true)
            .open()
            .unwrap();

        assert!(pool.acquire(0, OperationType::Write).is_err());
        let handle = pool.acquire(0, OperationType::Read).unwrap();
        assert_eq!(handle.record(), &[0u8; 9]);
    }

    #[test]
    fn acquire_after_close_fails() {
        let dir = tempdir().unwrap();
        let channel: Arc<dyn Channel> =
            Arc::new(FileChannel::create(dir.path().join("store")).unwrap());

        let pool = WindowPool::builder(dir.path().join("store"), 9, channel)
            .open()
            .unwrap();
        pool.close().unwrap();
        assert!(pool.acquire(0, OperationType::Read).is_err());
        // close is idempotent
        pool.close().unwrap();
    }
}
