//! Allocation tracker: an append-only journal of allocation records.
//!
//! Records are never removed before teardown; a release only flips the
//! `freed` flag of the first unfreed record at that address. After address
//! reuse the journal can therefore hold several records for one pointer,
//! and a release is attributed to the oldest live one.

use std::fmt;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::site::CallSite;

/// Entry point that produced an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    Malloc,
    Calloc,
    Realloc,
}

impl AllocKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malloc => "malloc",
            Self::Calloc => "calloc",
            Self::Realloc => "realloc",
        }
    }
}

impl fmt::Display for AllocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Payload address handed to the caller.
    pub addr: usize,
    /// Requested size, before alignment.
    pub size: usize,
    pub site: CallSite,
    pub timestamp: SystemTime,
    pub freed: bool,
    pub kind: AllocKind,
}

/// An allocation that was never released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakEntry {
    pub addr: usize,
    pub size: usize,
    pub site: CallSite,
    pub kind: AllocKind,
    pub timestamp: SystemTime,
}

/// Summary of the journal at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// Number of records ever made.
    pub records: usize,
    /// Sum of requested sizes over all records.
    pub total_allocated: usize,
    /// Sum of requested sizes over unreleased records.
    pub leaked_bytes: usize,
    /// Unreleased records, in allocation order.
    pub leaks: Vec<LeakEntry>,
}

impl LeakReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===== MEMORY ALLOCATION REPORT =====")?;
        writeln!(f, "Total allocations tracked: {}", self.records)?;
        for leak in &self.leaks {
            writeln!(
                f,
                "LEAK: {} bytes at {:#x} allocated in {} ({})",
                leak.size, leak.addr, leak.site, leak.kind
            )?;
        }
        writeln!(f)?;
        writeln!(f, "Summary:")?;
        writeln!(f, "Total memory allocated: {} bytes", self.total_allocated)?;
        writeln!(f, "Potential leaks: {} bytes", self.leaked_bytes)?;
        writeln!(f, "===================================")
    }
}

/// Journal of allocation records behind its own lock.
#[derive(Debug)]
pub struct Tracker {
    records: Mutex<Vec<AllocationRecord>>,
}

impl Tracker {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append a record for a fresh allocation.
    pub fn record(&self, addr: usize, size: usize, site: CallSite, kind: AllocKind) {
        let mut records = self.records.lock();
        if records.len() == records.capacity() {
            let grow = records.capacity().max(1);
            records.reserve_exact(grow);
        }
        records.push(AllocationRecord {
            addr,
            size,
            site,
            timestamp: SystemTime::now(),
            freed: false,
            kind,
        });
    }

    /// Flag the first unfreed record at `addr`. Returns false if none exists.
    pub fn mark_freed(&self, addr: usize) -> bool {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.addr == addr && !r.freed) {
            Some(record) => {
                record.freed = true;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn report(&self) -> LeakReport {
        let records = self.records.lock();
        let mut report = LeakReport {
            records: records.len(),
            ..LeakReport::default()
        };
        for record in records.iter() {
            report.total_allocated += record.size;
            if !record.freed {
                report.leaked_bytes += record.size;
                report.leaks.push(LeakEntry {
                    addr: record.addr,
                    size: record.size,
                    site: record.site,
                    kind: record.kind,
                    timestamp: record.timestamp,
                });
            }
        }
        report
    }

    #[must_use]
    pub fn records(&self) -> Vec<AllocationRecord> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.records.lock().capacity()
    }

    /// Drop every record and release the backing storage.
    pub fn clear(&self) {
        *self.records.lock() = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: CallSite = CallSite::new("main.c", 12);

    #[test]
    fn release_marks_only_first_live_record() {
        let tracker = Tracker::with_capacity(4);
        tracker.record(0x100, 40, SITE, AllocKind::Malloc);
        tracker.record(0x100, 40, SITE, AllocKind::Malloc);
        assert!(tracker.mark_freed(0x100));
        let freed: Vec<bool> = tracker.records().iter().map(|r| r.freed).collect();
        assert_eq!(freed, vec![true, false]);
        assert!(tracker.mark_freed(0x100));
        assert!(!tracker.mark_freed(0x100), "no live record remains");
    }

    #[test]
    fn unknown_address_is_silent() {
        let tracker = Tracker::with_capacity(4);
        tracker.record(0x100, 8, SITE, AllocKind::Calloc);
        assert!(!tracker.mark_freed(0x200));
        assert_eq!(tracker.report().leaks.len(), 1);
    }

    #[test]
    fn report_totals_and_leak_lines() {
        let tracker = Tracker::with_capacity(4);
        tracker.record(0x10, 100, SITE, AllocKind::Malloc);
        tracker.record(0x20, 40, CallSite::new("leak.c", 7), AllocKind::Realloc);
        tracker.mark_freed(0x10);
        let report = tracker.report();
        assert_eq!(report.records, 2);
        assert_eq!(report.total_allocated, 140);
        assert_eq!(report.leaked_bytes, 40);
        assert_eq!(report.leaks[0].site, CallSite::new("leak.c", 7));
        let text = report.to_string();
        assert!(text.contains("LEAK: 40 bytes at 0x20 allocated in leak.c:7 (realloc)"));
        assert!(text.contains("Potential leaks: 40 bytes"));
        assert_eq!(report, tracker.report(), "reporting does not mutate");
    }

    #[test]
    fn storage_doubles_when_full() {
        let tracker = Tracker::with_capacity(2);
        for addr in 0..3 {
            tracker.record(addr, 1, SITE, AllocKind::Malloc);
        }
        assert_eq!(tracker.len(), 3);
        assert!(tracker.capacity() >= 4);
    }

    #[test]
    fn clear_releases_everything() {
        let tracker = Tracker::with_capacity(8);
        tracker.record(1, 1, SITE, AllocKind::Malloc);
        tracker.clear();
        assert!(tracker.is_empty());
        assert_eq!(tracker.capacity(), 0);
        assert!(tracker.report().is_clean());
    }
}
