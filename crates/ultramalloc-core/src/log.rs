//! Structured allocator lifecycle records.
//!
//! The heap appends a record for every allocation decision it makes. Records
//! live in a bounded ring guarded by the heap lock; once the ring is full the
//! oldest record is dropped.

use std::collections::VecDeque;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl AllocatorLogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`malloc`, `calloc`, `realloc`, `free`, `defrag`, `shutdown`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `grow`, `free`, `double_release`, ...).
    pub event: &'static str,
    /// Payload address involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Owning arena of the block involved.
    pub arena: Option<u32>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: blocks currently in use.
    pub used_blocks: usize,
    /// Snapshot: payload bytes currently in use.
    pub used_bytes: usize,
}

/// Event fields supplied by the heap; the log fills in ids and level.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogEvent {
    pub symbol: &'static str,
    pub event: &'static str,
    pub ptr: Option<usize>,
    pub size: Option<usize>,
    pub arena: Option<u32>,
    pub outcome: &'static str,
}

impl LogEvent {
    pub(crate) const fn new(
        symbol: &'static str,
        event: &'static str,
        outcome: &'static str,
    ) -> Self {
        Self {
            symbol,
            event,
            ptr: None,
            size: None,
            arena: None,
            outcome,
        }
    }

    pub(crate) const fn ptr(mut self, ptr: usize) -> Self {
        self.ptr = Some(ptr);
        self
    }

    pub(crate) const fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub(crate) const fn arena(mut self, arena: u32) -> Self {
        self.arena = Some(arena);
        self
    }
}

/// Bounded ring of lifecycle records.
#[derive(Debug)]
pub(crate) struct LifecycleLog {
    min_level: Option<AllocatorLogLevel>,
    capacity: usize,
    next_decision_id: u64,
    records: VecDeque<AllocatorLogRecord>,
}

impl LifecycleLog {
    pub(crate) fn new(min_level: Option<AllocatorLogLevel>, capacity: usize) -> Self {
        Self {
            min_level,
            capacity,
            next_decision_id: 1,
            records: VecDeque::new(),
        }
    }

    /// Returns true if a record at `level` would be kept.
    pub(crate) fn enabled(&self, level: AllocatorLogLevel) -> bool {
        self.capacity > 0 && self.min_level.is_some_and(|min| level >= min)
    }

    pub(crate) fn push(
        &mut self,
        level: AllocatorLogLevel,
        event: LogEvent,
        details: impl Into<String>,
        used_blocks: usize,
        used_bytes: usize,
    ) {
        if !self.enabled(level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(AllocatorLogRecord {
            decision_id,
            trace_id: format!("core::ultramalloc::{}::{:016x}", event.symbol, decision_id),
            level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            arena: event.arena,
            outcome: event.outcome,
            details: details.into(),
            used_blocks,
            used_bytes,
        });
    }

    pub(crate) fn snapshot(&self) -> Vec<AllocatorLogRecord> {
        self.records.iter().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<AllocatorLogRecord> {
        self.records.drain(..).collect()
    }
}
