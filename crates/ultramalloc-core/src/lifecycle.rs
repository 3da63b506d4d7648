//! Process-wide allocator and its startup/shutdown hooks.
//!
//! The process holds at most one global [`Allocator`]. It is installed by
//! [`startup`] (or lazily by [`global_or_init`]) and torn down by
//! [`shutdown`], which prints the leak report unless disabled. A torn-down
//! global stays installed and rejects further allocations.

use std::sync::OnceLock;

use crate::allocator::Allocator;
use crate::config::AllocatorConfig;
use crate::error::AllocError;
use crate::tracker::LeakReport;

static GLOBAL: OnceLock<Allocator> = OnceLock::new();

/// Install the process-wide allocator.
///
/// Fails with [`AllocError::AlreadyStarted`] if one is already installed,
/// whether by an earlier `startup` or by lazy initialization.
pub fn startup(config: AllocatorConfig) -> Result<Session, AllocError> {
    let mut installed = false;
    let allocator = GLOBAL.get_or_init(|| {
        installed = true;
        Allocator::new(config)
    });
    if installed {
        Ok(Session { allocator })
    } else {
        Err(AllocError::AlreadyStarted)
    }
}

/// The installed allocator, if any.
#[must_use]
pub fn global() -> Option<&'static Allocator> {
    GLOBAL.get()
}

/// The installed allocator, configured from the environment on first use.
pub fn global_or_init() -> &'static Allocator {
    GLOBAL.get_or_init(|| Allocator::new(AllocatorConfig::from_env()))
}

/// Tear down the process-wide allocator.
///
/// The first call returns the final leak report (also printed to stdout
/// when `report_on_shutdown` is set); later calls, or calls before any
/// startup, return `None`.
pub fn shutdown() -> Option<LeakReport> {
    let allocator = GLOBAL.get()?;
    let report = allocator.teardown()?;
    if allocator.config().report_on_shutdown {
        print!("\n{report}\n");
    }
    Some(report)
}

/// Scope guard returned by [`startup`]; shuts the global allocator down
/// when dropped.
#[must_use = "dropping the session shuts the allocator down immediately"]
#[derive(Debug)]
pub struct Session {
    allocator: &'static Allocator,
}

impl Session {
    #[must_use]
    pub fn allocator(&self) -> &'static Allocator {
        self.allocator
    }

    /// Shut down now and return the final report.
    pub fn finish(self) -> Option<LeakReport> {
        shutdown()
    }

    /// Drop the guard without shutting down. [`shutdown`] must then be
    /// called explicitly.
    pub fn detach(self) -> &'static Allocator {
        let allocator = self.allocator;
        std::mem::forget(self);
        allocator
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        shutdown();
    }
}
