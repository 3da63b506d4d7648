//! # ultramalloc-core
//!
//! Best-fit heap allocator over OS-mapped arenas, with an allocation
//! journal that produces leak reports.
//!
//! Blocks live in one singly linked list of in-band headers. Requests are
//! served from the smallest sufficient free block, which is split when the
//! remainder is large enough; releases coalesce touching free neighbours of
//! the same arena. When nothing fits a new arena is mapped for the request.
//!
//! ```no_run
//! use ultramalloc_core::{Allocator, AllocatorConfig, CallSite};
//!
//! let alloc = Allocator::new(AllocatorConfig::default());
//! let p = alloc.allocate(100, CallSite::caller()).unwrap();
//! // SAFETY: `p` came from `alloc` and is not used afterwards.
//! unsafe { alloc.release(p.as_ptr(), CallSite::caller()) }.unwrap();
//! assert!(alloc.report().is_clean());
//! ```

pub mod allocator;
mod arena;
pub mod block;
pub mod config;
pub mod error;
mod heap;
pub mod lifecycle;
pub mod log;
pub mod site;
pub mod tracker;

pub use allocator::Allocator;
pub use block::{ALIGNMENT, BlockView, HEADER_SIZE, MIN_BLOCK_SIZE, POISON_BYTE, align};
pub use config::{AllocatorConfig, SafetyLevel};
pub use error::AllocError;
pub use heap::HeapStats;
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
pub use site::CallSite;
pub use tracker::{AllocKind, AllocationRecord, LeakEntry, LeakReport, Tracker};
