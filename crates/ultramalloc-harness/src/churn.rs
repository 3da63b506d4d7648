//! Seeded multi-threaded allocate/reallocate/release workload.
#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use ultramalloc_core::{Allocator, AllocatorConfig, CallSite, SafetyLevel};

use crate::error::HarnessError;
use crate::rng::XorShift64;
use crate::scenarios::StatsSnapshot;

const SLOTS: usize = 32;
const MAX_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChurnConfig {
    pub threads: usize,
    pub ops: usize,
    pub seed: u64,
    pub mode: SafetyLevel,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops: 10_000,
            seed: 0xDEAD_BEEF,
            mode: SafetyLevel::Strict,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpCounts {
    pub allocations: usize,
    pub reallocations: usize,
    pub releases: usize,
    /// Payloads found overwritten by someone else.
    pub corruptions: usize,
}

impl OpCounts {
    fn add(&mut self, other: Self) {
        self.allocations += other.allocations;
        self.reallocations += other.reallocations;
        self.releases += other.releases;
        self.corruptions += other.corruptions;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChurnReport {
    pub threads: usize,
    pub ops_per_thread: usize,
    pub seed: u64,
    pub mode: &'static str,
    pub counts: OpCounts,
    pub elapsed_ms: u64,
    pub verified: bool,
    pub leaked_bytes: usize,
    pub stats: StatsSnapshot,
}

impl ChurnReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.verified && self.leaked_bytes == 0 && self.counts.corruptions == 0
    }
}

impl fmt::Display for ChurnReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASS" } else { "FAIL" };
        writeln!(
            f,
            "[{verdict}] churn threads={} ops={} seed={:#x} mode={}",
            self.threads, self.ops_per_thread, self.seed, self.mode
        )?;
        writeln!(
            f,
            "  alloc={} realloc={} free={} corruptions={} elapsed={}ms",
            self.counts.allocations,
            self.counts.reallocations,
            self.counts.releases,
            self.counts.corruptions,
            self.elapsed_ms
        )?;
        writeln!(
            f,
            "  verified={} leaked={}B blocks={} arenas={}",
            self.verified, self.leaked_bytes, self.stats.block_count, self.stats.arena_count
        )
    }
}

struct Slot {
    ptr: NonNull<u8>,
    size: usize,
    fill: u8,
}

fn intact(slot: &Slot, len: usize) -> bool {
    // SAFETY: the slot's block is live, owned by this worker and holds at
    // least `len` bytes.
    let bytes = unsafe { std::slice::from_raw_parts(slot.ptr.as_ptr(), len) };
    bytes.iter().all(|b| *b == slot.fill)
}

fn worker(alloc: &Allocator, seed: u64, ops: usize) -> Result<OpCounts, HarnessError> {
    let site = CallSite::caller();
    let mut rng = XorShift64::new(seed);
    let mut slots: Vec<Option<Slot>> = (0..SLOTS).map(|_| None).collect();
    let mut counts = OpCounts::default();

    for _ in 0..ops {
        let idx = rng.gen_range_usize(0, SLOTS - 1);
        let Some(slot) = slots[idx].take() else {
            let size = rng.gen_range_usize(1, MAX_SIZE);
            let fill = rng.next_u64() as u8;
            let ptr = alloc.try_allocate(size, site)?;
            // SAFETY: `ptr` owns `size` bytes.
            unsafe { ptr.as_ptr().write_bytes(fill, size) };
            slots[idx] = Some(Slot { ptr, size, fill });
            counts.allocations += 1;
            continue;
        };

        if !intact(&slot, slot.size) {
            counts.corruptions += 1;
        }
        if rng.gen_range_usize(0, 2) == 0 {
            let size = rng.gen_range_usize(1, MAX_SIZE);
            // SAFETY: the old pointer is owned here and replaced by the result.
            let resized = unsafe { alloc.try_reallocate(slot.ptr.as_ptr(), size, site) }?;
            let Some(ptr) = resized else {
                counts.releases += 1;
                continue;
            };
            let moved = Slot {
                ptr,
                size,
                fill: slot.fill,
            };
            if !intact(&moved, size.min(slot.size)) {
                counts.corruptions += 1;
            }
            // SAFETY: `ptr` owns `size` bytes.
            unsafe { ptr.as_ptr().write_bytes(slot.fill, size) };
            slots[idx] = Some(moved);
            counts.reallocations += 1;
        } else {
            // SAFETY: released once and dropped from the slot table.
            unsafe { alloc.release(slot.ptr.as_ptr(), site) }?;
            counts.releases += 1;
        }
    }

    for slot in slots.into_iter().flatten() {
        // SAFETY: released once; the slot table is consumed.
        unsafe { alloc.release(slot.ptr.as_ptr(), site) }?;
        counts.releases += 1;
    }
    Ok(counts)
}

/// Run `config.threads` workers against one shared allocator and check the
/// heap afterwards. Each worker derives its own seed from `config.seed`.
pub fn run_churn(config: ChurnConfig) -> Result<ChurnReport, HarnessError> {
    if config.threads == 0 {
        return Err(HarnessError::NoThreads);
    }
    let alloc = Allocator::new(
        AllocatorConfig::default()
            .with_mode(config.mode)
            .with_report_on_shutdown(false),
    );
    let started = Instant::now();

    let results: Vec<Result<OpCounts, HarnessError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads as u64)
            .map(|i| {
                let alloc = &alloc;
                let seed = config.seed ^ (i + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                scope.spawn(move || worker(alloc, seed, config.ops))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(HarnessError::WorkerPanicked)))
            .collect()
    });

    let mut counts = OpCounts::default();
    for result in results {
        counts.add(result?);
    }
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let verified = alloc.verify().is_ok();
    let report = alloc.report();

    Ok(ChurnReport {
        threads: config.threads,
        ops_per_thread: config.ops,
        seed: config.seed,
        mode: config.mode.as_str(),
        counts,
        elapsed_ms,
        verified,
        leaked_bytes: report.leaked_bytes,
        stats: alloc.stats().into(),
    })
}
