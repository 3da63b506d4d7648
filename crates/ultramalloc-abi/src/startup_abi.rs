//! Lifecycle and diagnostics entry points.

use std::ffi::c_int;

use ultramalloc_core::lifecycle::{self, global};
use ultramalloc_core::{AllocatorConfig, HeapStats};

use crate::util::fail;

/// C mirror of [`HeapStats`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UltraHeapStats {
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub block_count: usize,
    pub free_blocks: usize,
    pub arena_count: usize,
    pub mapped_bytes: usize,
    pub fragmentation_percent: f64,
}

impl From<HeapStats> for UltraHeapStats {
    fn from(stats: HeapStats) -> Self {
        Self {
            total_bytes: stats.total_bytes,
            used_bytes: stats.used_bytes,
            free_bytes: stats.free_bytes,
            block_count: stats.block_count,
            free_blocks: stats.free_blocks,
            arena_count: stats.arena_count,
            mapped_bytes: stats.mapped_bytes,
            fragmentation_percent: stats.fragmentation_percent(),
        }
    }
}

/// Start the allocator with settings from the environment.
///
/// Returns 0 on success and -1 (errno `EALREADY`) if it is already running.
#[unsafe(no_mangle)]
pub extern "C" fn ultramalloc_startup() -> c_int {
    match lifecycle::startup(AllocatorConfig::from_env()) {
        Ok(session) => {
            let mode = session.detach().config().mode;
            println!("ultramalloc initialized (mode={})", mode.as_str());
            0
        }
        Err(err) => {
            fail(err);
            -1
        }
    }
}

/// Print the final leak report and unmap every arena. Only the first call
/// does anything.
#[unsafe(no_mangle)]
pub extern "C" fn ultramalloc_shutdown() {
    if lifecycle::shutdown().is_some() {
        println!("ultramalloc cleaned up");
    }
}

/// Fill `out` with current heap statistics. Returns 0, or -1 if `out` is
/// null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ultramalloc_stats(out: *mut UltraHeapStats) -> c_int {
    if out.is_null() {
        return -1;
    }
    let stats = global().map(|alloc| alloc.stats()).unwrap_or_default();
    // SAFETY: caller passes a writable `UltraHeapStats`.
    unsafe { out.write(stats.into()) };
    0
}

/// Coalesce free neighbours and print the resulting statistics. Before
/// startup there is no heap, so empty statistics are printed.
#[unsafe(no_mangle)]
pub extern "C" fn ultramalloc_defrag() {
    println!("Running memory defragmentation...");
    let stats = global().map(|alloc| alloc.defragment()).unwrap_or_default();
    print!("\n{stats}\n");
}

/// Print the current leak report without changing anything.
#[unsafe(no_mangle)]
pub extern "C" fn ultramalloc_report() {
    let report = global().map(|alloc| alloc.report()).unwrap_or_default();
    print!("\n{report}\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_rejects_null_out_pointer() {
        // SAFETY: null is checked before any write.
        assert_eq!(unsafe { ultramalloc_stats(std::ptr::null_mut()) }, -1);
    }

    #[test]
    fn stats_mirror_copies_every_field() {
        let stats = HeapStats {
            total_bytes: 100,
            used_bytes: 40,
            free_bytes: 12,
            block_count: 4,
            free_blocks: 1,
            arena_count: 2,
            mapped_bytes: 100,
        };
        let mirror = UltraHeapStats::from(stats);
        assert_eq!(mirror.used_bytes, 40);
        assert_eq!(mirror.arena_count, 2);
        assert!((mirror.fragmentation_percent - 25.0).abs() < f64::EPSILON);
    }
}
