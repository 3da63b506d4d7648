//! Diagnostics called before any allocation must not start the allocator,
//! so this runs in its own binary with a fresh process-wide state.

use ultramalloc_abi::{UltraHeapStats, ultramalloc_defrag, ultramalloc_startup, ultramalloc_stats};
use ultramalloc_core::lifecycle;

#[test]
fn defrag_before_startup_installs_nothing() {
    ultramalloc_defrag();
    assert!(lifecycle::global().is_none(), "defrag must not start the allocator");

    let mut out = UltraHeapStats::default();
    // SAFETY: `out` is a valid, writable struct.
    assert_eq!(unsafe { ultramalloc_stats(&mut out) }, 0);
    assert_eq!(out, UltraHeapStats::default());

    // Startup still works afterwards.
    assert_eq!(ultramalloc_startup(), 0);
    assert!(lifecycle::global().is_some());
    ultramalloc_defrag();
    assert!(lifecycle::global().is_some_and(|alloc| !alloc.is_shut_down()));
    lifecycle::shutdown();
}
