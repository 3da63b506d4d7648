//! The process-wide allocator can only be started once, so this binary holds
//! a single test that walks the whole lifecycle.

use ultramalloc_core::lifecycle::{self, global, shutdown, startup};
use ultramalloc_core::{AllocError, AllocatorConfig, CallSite};

#[test]
fn global_allocator_lifecycle() {
    assert!(global().is_none());
    assert!(shutdown().is_none(), "nothing to tear down before startup");

    let config = AllocatorConfig::default().with_report_on_shutdown(false);
    let session = startup(config.clone()).expect("first startup");
    assert!(matches!(startup(config), Err(AllocError::AlreadyStarted)));

    let alloc = session.allocator();
    assert!(std::ptr::eq(alloc, lifecycle::global_or_init()));
    let site = CallSite::caller();
    let leaked = alloc.allocate(40, site).expect("alloc");
    let freed = alloc.allocate(16, site).expect("alloc");
    // SAFETY: `freed` came from this allocator.
    unsafe { alloc.release(freed.as_ptr(), site) }.expect("release");

    let report = session.finish().expect("first shutdown reports");
    assert_eq!(report.records, 2);
    assert_eq!(report.leaks.len(), 1);
    assert_eq!(report.leaks[0].addr, leaked.as_ptr() as usize);
    assert_eq!(report.leaks[0].site, site);

    assert!(shutdown().is_none(), "shutdown runs once");
    let alloc = global().expect("torn-down allocator stays installed");
    assert!(alloc.is_shut_down());
    assert!(alloc.allocate(8, CallSite::UNKNOWN).is_none());
    assert_eq!(alloc.try_allocate(8, CallSite::UNKNOWN), Err(AllocError::ShutDown));
    assert_eq!(alloc.stats().arena_count, 0);
}
