// Every entry point takes raw pointers from C callers; the contracts are
// documented once on each module.
#![allow(clippy::missing_safety_doc)]
//! # ultramalloc-abi
//!
//! `extern "C"` boundary over the process-wide ultramalloc allocator.
//!
//! ```text
//! C caller -> ultramalloc_* entry (this crate) -> lifecycle::global_or_init -> Allocator
//! ```
//!
//! Symbols carry an `ultramalloc_` prefix so they sit next to the system
//! allocator instead of replacing it. A C header maps `malloc(n)` to
//! `ultramalloc_malloc(n, __FILE__, __LINE__)` and so on. Calls made before
//! [`ultramalloc_startup`](startup_abi::ultramalloc_startup) start the
//! allocator lazily with settings from the environment.

mod util;

pub mod malloc_abi;
pub mod startup_abi;

pub use malloc_abi::{ultramalloc_calloc, ultramalloc_free, ultramalloc_malloc, ultramalloc_realloc};
pub use startup_abi::{
    UltraHeapStats, ultramalloc_defrag, ultramalloc_report, ultramalloc_shutdown,
    ultramalloc_startup, ultramalloc_stats,
};
