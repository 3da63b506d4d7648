//! Allocator context: the public allocation API.
//!
//! Each call takes the heap lock for block work and then, after dropping
//! it, the tracker lock for the journal. The two locks are never held at
//! the same time.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::block::BlockView;
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::heap::{BlockHeap, HeapStats, Resize};
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LogEvent};
use crate::site::CallSite;
use crate::tracker::{AllocKind, AllocationRecord, LeakReport, Tracker};

/// A heap plus its allocation journal.
///
/// Several allocators may coexist; each owns its own arenas. Dropping an
/// allocator unmaps every arena it still holds, so pointers it handed out
/// must not outlive it.
#[derive(Debug)]
pub struct Allocator {
    config: AllocatorConfig,
    heap: Mutex<BlockHeap>,
    tracker: Tracker,
    torn_down: AtomicBool,
}

impl Allocator {
    #[must_use]
    pub fn new(config: AllocatorConfig) -> Self {
        let mut heap = BlockHeap::new(&config);
        heap.note(
            AllocatorLogLevel::Info,
            LogEvent::new("startup", "init", "success"),
            || format!("mode={}", config.mode.as_str()),
        );
        Self {
            tracker: Tracker::with_capacity(config.tracker_capacity),
            heap: Mutex::new(heap),
            config,
            torn_down: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate `size` bytes, or `None` for a zero-size request, an OS
    /// mapping failure, or a torn-down allocator.
    #[must_use]
    pub fn allocate(&self, size: usize, site: CallSite) -> Option<NonNull<u8>> {
        self.try_allocate(size, site).ok()
    }

    pub fn try_allocate(&self, size: usize, site: CallSite) -> Result<NonNull<u8>, AllocError> {
        self.allocate_as(size, site, "malloc", AllocKind::Malloc)
    }

    fn allocate_as(
        &self,
        size: usize,
        site: CallSite,
        symbol: &'static str,
        kind: AllocKind,
    ) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.heap.lock().allocate(size, symbol, site)?;
        self.tracker.record(ptr.as_ptr() as usize, size, site, kind);
        Ok(ptr)
    }

    /// Allocate `count * size` zeroed bytes.
    #[must_use]
    pub fn allocate_zeroed(
        &self,
        count: usize,
        size: usize,
        site: CallSite,
    ) -> Option<NonNull<u8>> {
        self.try_allocate_zeroed(count, size, site).ok()
    }

    pub fn try_allocate_zeroed(
        &self,
        count: usize,
        size: usize,
        site: CallSite,
    ) -> Result<NonNull<u8>, AllocError> {
        let total = count
            .checked_mul(size)
            .ok_or(AllocError::SizeOverflow { count, size })?;
        let ptr = self.allocate_as(total, site, "calloc", AllocKind::Calloc)?;
        // SAFETY: the block behind `ptr` holds at least `total` bytes.
        unsafe { ptr.as_ptr().write_bytes(0, total) };
        Ok(ptr)
    }

    /// Resize the allocation at `ptr` to `size` bytes.
    ///
    /// A null `ptr` allocates; a zero `size` releases and returns `None`.
    /// Otherwise the block is grown or shrunk in place when possible, and
    /// moved with its first `min(old, new)` bytes otherwise. On failure
    /// the original allocation is left untouched.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must not be accessed through other copies while
    /// this call runs. In [`SafetyLevel::Off`](crate::SafetyLevel::Off)
    /// mode it must be a live pointer returned by this allocator.
    #[must_use]
    pub unsafe fn reallocate(
        &self,
        ptr: *mut u8,
        size: usize,
        site: CallSite,
    ) -> Option<NonNull<u8>> {
        // SAFETY: forwarded caller contract.
        unsafe { self.try_reallocate(ptr, size, site) }.ok().flatten()
    }

    /// Fallible form of [`reallocate`](Self::reallocate). `Ok(None)` means
    /// the block was released because `size` was zero.
    ///
    /// # Safety
    ///
    /// Same contract as [`reallocate`](Self::reallocate).
    pub unsafe fn try_reallocate(
        &self,
        ptr: *mut u8,
        size: usize,
        site: CallSite,
    ) -> Result<Option<NonNull<u8>>, AllocError> {
        let Some(old) = NonNull::new(ptr) else {
            return self.try_allocate(size, site).map(Some);
        };
        if size == 0 {
            // SAFETY: forwarded caller contract.
            unsafe { self.release(ptr, site) }?;
            return Ok(None);
        }

        let moved = {
            let mut heap = self.heap.lock();
            match heap.resize(old, size, site)? {
                Resize::InPlace => None,
                Resize::Move { old_size } => {
                    let new = heap.allocate(size, "realloc", site)?;
                    // SAFETY: `old` holds `old_size` bytes, `new` at least
                    // `size`, and two used blocks never overlap.
                    unsafe {
                        ptr::copy_nonoverlapping(old.as_ptr(), new.as_ptr(), old_size.min(size));
                    }
                    // `old` was just validated by `resize`.
                    let released = heap.release(old, site);
                    debug_assert!(released.is_ok(), "moved block release failed: {released:?}");
                    Some(new)
                }
            }
        };

        match moved {
            Some(new) => {
                self.tracker
                    .record(new.as_ptr() as usize, size, site, AllocKind::Realloc);
                self.tracker.mark_freed(old.as_ptr() as usize);
                Ok(Some(new))
            }
            None => Ok(Some(old)),
        }
    }

    /// Return the allocation at `ptr`. A null pointer is a no-op.
    ///
    /// # Safety
    ///
    /// The caller must not use `ptr` afterwards. In
    /// [`SafetyLevel::Off`](crate::SafetyLevel::Off) mode it must be a
    /// pointer returned by this allocator.
    pub unsafe fn release(&self, ptr: *mut u8, site: CallSite) -> Result<(), AllocError> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };
        self.heap.lock().release(ptr, site)?;
        self.tracker.mark_freed(ptr.as_ptr() as usize);
        Ok(())
    }

    /// Leak report over the journal so far. Does not modify anything.
    #[must_use]
    pub fn report(&self) -> LeakReport {
        self.tracker.report()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.lock().stats()
    }

    /// Run an explicit coalescing pass and return the resulting stats.
    pub fn defragment(&self) -> HeapStats {
        let mut heap = self.heap.lock();
        let before = heap.stats().block_count;
        let merged = heap.merge_adjacent_free();
        let stats = heap.stats();
        heap.note(
            AllocatorLogLevel::Info,
            LogEvent::new("defrag", "merge", "success"),
            || format!("blocks_before={before} merged={merged}"),
        );
        stats
    }

    /// Check the block list's structural invariants.
    pub fn verify(&self) -> Result<HeapStats, AllocError> {
        self.heap.lock().verify()
    }

    #[must_use]
    pub fn blocks(&self) -> Vec<BlockView> {
        self.heap.lock().blocks()
    }

    #[must_use]
    pub fn records(&self) -> Vec<AllocationRecord> {
        self.tracker.records()
    }

    /// Forget the allocation journal. Later reports only cover allocations
    /// made after this call.
    pub fn clear_records(&self) {
        self.tracker.clear();
    }

    #[must_use]
    pub fn lifecycle_log(&self) -> Vec<AllocatorLogRecord> {
        self.heap.lock().lifecycle_log()
    }

    pub fn drain_lifecycle_log(&self) -> Vec<AllocatorLogRecord> {
        self.heap.lock().drain_lifecycle_log()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Produce the final leak report, unmap every arena and release the
    /// journal. Only the first call does any work; later calls return
    /// `None`.
    pub fn teardown(&self) -> Option<LeakReport> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return None;
        }
        let report = self.tracker.report();
        {
            let mut heap = self.heap.lock();
            let (records, leaked) = (report.records, report.leaked_bytes);
            heap.note(
                AllocatorLogLevel::Info,
                LogEvent::new("shutdown", "report", "success"),
                || format!("records={records} leaked_bytes={leaked}"),
            );
            heap.teardown();
        }
        self.tracker.clear();
        Some(report)
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(AllocatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyLevel;

    const SITE: CallSite = CallSite::new("unit.rs", 1);

    fn allocator() -> Allocator {
        Allocator::new(AllocatorConfig::default().with_log_level(Some(AllocatorLogLevel::Trace)))
    }

    #[test]
    fn zero_size_allocates_nothing() {
        let alloc = allocator();
        assert!(alloc.allocate(0, SITE).is_none());
        assert_eq!(alloc.try_allocate(0, SITE), Err(AllocError::ZeroSize));
        assert_eq!(alloc.report().records, 0);
        assert_eq!(alloc.stats().block_count, 0);
    }

    #[test]
    fn zeroed_allocation_overwrites_reused_memory() {
        let alloc = allocator();
        let p = alloc.allocate(64, SITE).unwrap();
        // SAFETY: p owns 64 bytes.
        unsafe {
            p.as_ptr().write_bytes(0xFF, 64);
            alloc.release(p.as_ptr(), SITE).unwrap();
        }
        let q = alloc.allocate_zeroed(8, 8, SITE).unwrap();
        assert_eq!(q, p);
        // SAFETY: q owns 64 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), 64) };
        assert!(bytes.iter().all(|b| *b == 0));
        assert_eq!(alloc.records()[1].kind, AllocKind::Calloc);
    }

    #[test]
    fn zeroed_overflow_is_rejected() {
        let alloc = allocator();
        assert_eq!(
            alloc.try_allocate_zeroed(usize::MAX, 2, SITE),
            Err(AllocError::SizeOverflow {
                count: usize::MAX,
                size: 2
            })
        );
        assert!(alloc.allocate_zeroed(usize::MAX, 2, SITE).is_none());
        assert!(alloc.records().is_empty());
    }

    #[test]
    fn realloc_null_and_zero() {
        let alloc = allocator();
        // SAFETY: null and a live pointer are both valid inputs.
        unsafe {
            let p = alloc.reallocate(ptr::null_mut(), 24, SITE).unwrap();
            assert_eq!(alloc.records()[0].kind, AllocKind::Malloc);
            assert_eq!(alloc.try_reallocate(p.as_ptr(), 0, SITE), Ok(None));
        }
        assert!(alloc.report().is_clean());
    }

    #[test]
    fn realloc_in_place_keeps_record() {
        let alloc = allocator();
        let p = alloc.allocate(256, SITE).unwrap();
        // SAFETY: p is live.
        let q = unsafe { alloc.reallocate(p.as_ptr(), 32, SITE) }.unwrap();
        assert_eq!(p, q);
        let records = alloc.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 256);
        assert!(!records[0].freed);
    }

    #[test]
    fn realloc_move_copies_and_retags() {
        let alloc = allocator();
        let p = alloc.allocate(16, SITE).unwrap();
        let _pin = alloc.allocate(16, SITE).unwrap();
        // SAFETY: p owns 16 bytes; it is not used after the move.
        let q = unsafe {
            for i in 0..16u8 {
                p.as_ptr().add(usize::from(i)).write(i);
            }
            alloc.reallocate(p.as_ptr(), 200, SITE).unwrap()
        };
        assert_ne!(p, q);
        // SAFETY: q owns at least 200 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(q.as_ptr(), 16) };
        assert_eq!(bytes, (0..16u8).collect::<Vec<_>>().as_slice());
        let records = alloc.records();
        assert!(records[0].freed);
        assert_eq!(records[2].kind, AllocKind::Realloc);
        assert_eq!(records[2].size, 200);
        alloc.verify().unwrap();
    }

    #[test]
    fn moved_block_is_released_in_every_mode() {
        for mode in [SafetyLevel::Strict, SafetyLevel::Hardened, SafetyLevel::Off] {
            let alloc = Allocator::new(AllocatorConfig::default().with_mode(mode));
            let p = alloc.allocate(32, SITE).unwrap();
            let _pin = alloc.allocate(32, SITE).unwrap();
            // SAFETY: p is live and replaced by the result.
            let q = unsafe { alloc.reallocate(p.as_ptr(), 500, SITE) }.unwrap();
            assert_ne!(p, q, "mode={mode:?}");
            let old = alloc
                .blocks()
                .into_iter()
                .find(|b| b.addr == p.as_ptr() as usize)
                .unwrap();
            assert!(old.free, "mode={mode:?}");
            let stats = alloc.verify().unwrap();
            assert_eq!(stats.used_bytes, 32 + 504, "mode={mode:?}");
        }
    }

    #[test]
    fn rejected_realloc_leaves_block_alone() {
        let alloc = allocator();
        let p = alloc.allocate(32, SITE).unwrap();
        // SAFETY: the pointer is validated in strict mode.
        unsafe {
            alloc.release(p.as_ptr(), SITE).unwrap();
            assert!(matches!(
                alloc.try_reallocate(p.as_ptr(), 64, SITE),
                Err(AllocError::UseAfterRelease { .. })
            ));
        }
        assert_eq!(alloc.records().len(), 1);
    }

    #[test]
    fn defragment_reports_stats() {
        let alloc = allocator();
        let p = alloc.allocate(100, SITE).unwrap();
        // SAFETY: p is live.
        unsafe { alloc.release(p.as_ptr(), SITE) }.unwrap();
        let stats = alloc.defragment();
        assert_eq!(stats.block_count, 1);
        assert_eq!(stats.free_blocks, 1);
        assert!(
            alloc
                .lifecycle_log()
                .iter()
                .any(|r| r.symbol == "defrag" && r.outcome == "success")
        );
    }

    #[test]
    fn teardown_runs_once_and_disables_api() {
        let alloc = allocator();
        let _leak = alloc.allocate(40, SITE).unwrap();
        let report = alloc.teardown().unwrap();
        assert_eq!(report.leaked_bytes, 40);
        assert!(alloc.teardown().is_none());
        assert!(alloc.is_shut_down());
        assert_eq!(alloc.try_allocate(8, SITE), Err(AllocError::ShutDown));
        assert_eq!(alloc.stats().arena_count, 0);
        assert!(alloc.records().is_empty());
    }

    #[test]
    fn off_mode_tolerates_double_release() {
        let alloc = Allocator::new(AllocatorConfig::default().with_mode(SafetyLevel::Off));
        let p = alloc.allocate(48, SITE).unwrap();
        // SAFETY: Off mode re-marks the still-mapped block free.
        unsafe {
            alloc.release(p.as_ptr(), SITE).unwrap();
            alloc.release(p.as_ptr(), SITE).unwrap();
        }
        alloc.verify().unwrap();
        assert!(alloc.report().is_clean());
    }

    #[test]
    fn cleared_journal_forgets_live_blocks() {
        let alloc = allocator();
        let p = alloc.allocate(24, SITE).unwrap();
        alloc.clear_records();
        assert!(alloc.report().is_clean());
        // SAFETY: `p` came from `alloc` and is released once.
        unsafe { alloc.release(p.as_ptr(), SITE) }.unwrap();
        assert!(alloc.records().is_empty());
        assert_eq!(alloc.stats().used_bytes, 0);
    }
}
