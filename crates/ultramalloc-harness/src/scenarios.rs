//! Canned allocation scenarios with self-checking reports.
#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;

use clap::ValueEnum;
use serde::Serialize;
use ultramalloc_core::{
    AllocError, Allocator, AllocatorConfig, AllocatorLogLevel, AllocatorLogRecord, CallSite,
    HEADER_SIZE, HeapStats, LeakReport, SafetyLevel,
};

use crate::error::HarnessError;

/// Call site the leak scenario attributes its unreleased block to.
pub const LEAK_SITE: CallSite = CallSite::new("leak_scenario.c", 42);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Free blocks of 64, 128 and 256 bytes; a 100-byte request takes the 128.
    BestFit,
    /// Releases coalesce list neighbours only.
    Fragmentation,
    /// One 40-byte block is never released.
    Leak,
    /// Reallocation keeps the common prefix, in place and when moving.
    Realloc,
    /// Releasing the same pointer twice.
    DoubleRelease,
}

impl Scenario {
    pub const ALL: [Self; 5] = [
        Self::BestFit,
        Self::Fragmentation,
        Self::Leak,
        Self::Realloc,
        Self::DoubleRelease,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BestFit => "best-fit",
            Self::Fragmentation => "fragmentation",
            Self::Leak => "leak",
            Self::Realloc => "realloc",
            Self::DoubleRelease => "double-release",
        }
    }
}

/// One named assertion inside a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Serializable copy of [`HeapStats`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_bytes: usize,
    pub used_bytes: usize,
    pub free_bytes: usize,
    pub block_count: usize,
    pub free_blocks: usize,
    pub arena_count: usize,
    pub fragmentation_percent: f64,
}

impl From<HeapStats> for StatsSnapshot {
    fn from(stats: HeapStats) -> Self {
        Self {
            total_bytes: stats.total_bytes,
            used_bytes: stats.used_bytes,
            free_bytes: stats.free_bytes,
            block_count: stats.block_count,
            free_blocks: stats.free_blocks,
            arena_count: stats.arena_count,
            fragmentation_percent: stats.fragmentation_percent(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakSnapshot {
    pub addr: usize,
    pub size: usize,
    pub site: String,
    pub kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakSummary {
    pub records: usize,
    pub total_allocated: usize,
    pub leaked_bytes: usize,
    pub leaks: Vec<LeakSnapshot>,
}

impl From<&LeakReport> for LeakSummary {
    fn from(report: &LeakReport) -> Self {
        Self {
            records: report.records,
            total_allocated: report.total_allocated,
            leaked_bytes: report.leaked_bytes,
            leaks: report
                .leaks
                .iter()
                .map(|leak| LeakSnapshot {
                    addr: leak.addr,
                    size: leak.size,
                    site: leak.site.to_string(),
                    kind: leak.kind.as_str(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: &'static str,
    pub mode: &'static str,
    pub passed: bool,
    pub checks: Vec<Check>,
    pub stats: StatsSnapshot,
    pub report: LeakSummary,
    /// Lifecycle records captured while the scenario ran.
    #[serde(skip)]
    pub log: Vec<AllocatorLogRecord>,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        writeln!(f, "[{verdict}] {} (mode={})", self.scenario, self.mode)?;
        for check in &self.checks {
            let mark = if check.passed { "ok" } else { "FAILED" };
            writeln!(f, "  {mark:<6} {}: {}", check.name, check.detail)?;
        }
        writeln!(
            f,
            "  blocks={} free={} arenas={} used={}B leaked={}B",
            self.stats.block_count,
            self.stats.free_blocks,
            self.stats.arena_count,
            self.stats.used_bytes,
            self.report.leaked_bytes
        )
    }
}

struct Run {
    allocator: Allocator,
    mode: SafetyLevel,
    checks: Vec<Check>,
}

impl Run {
    fn new(mode: SafetyLevel, log_level: Option<AllocatorLogLevel>) -> Self {
        let config = AllocatorConfig::default()
            .with_mode(mode)
            .with_log_level(log_level)
            .with_report_on_shutdown(false);
        Self {
            allocator: Allocator::new(config),
            mode,
            checks: Vec::new(),
        }
    }

    fn check(&mut self, name: &'static str, passed: bool, detail: impl Into<String>) {
        self.checks.push(Check {
            name,
            passed,
            detail: detail.into(),
        });
    }

    #[track_caller]
    fn alloc(&self, size: usize) -> Result<NonNull<u8>, HarnessError> {
        Ok(self.allocator.try_allocate(size, CallSite::caller())?)
    }

    #[track_caller]
    fn free(&self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        // SAFETY: scenarios only release pointers they got from `self.allocator`
        // and never touch them afterwards.
        unsafe { self.allocator.release(ptr.as_ptr(), CallSite::caller()) }
    }

    fn layout(&self) -> Vec<(usize, bool)> {
        self.allocator.blocks().iter().map(|b| (b.size, b.free)).collect()
    }

    fn finish(self, scenario: Scenario) -> ScenarioReport {
        let mut checks = self.checks;
        let verified = self.allocator.verify();
        checks.push(Check {
            name: "heap_verifies",
            passed: verified.is_ok(),
            detail: match &verified {
                Ok(stats) => format!("{} blocks consistent", stats.block_count),
                Err(err) => err.to_string(),
            },
        });
        let report = self.allocator.report();
        ScenarioReport {
            scenario: scenario.as_str(),
            mode: self.mode.as_str(),
            passed: checks.iter().all(|c| c.passed),
            checks,
            stats: self.allocator.stats().into(),
            report: LeakSummary::from(&report),
            log: self.allocator.drain_lifecycle_log(),
        }
    }
}

/// Run one scenario on a fresh allocator.
pub fn run_scenario(
    scenario: Scenario,
    mode: SafetyLevel,
    log_level: Option<AllocatorLogLevel>,
) -> Result<ScenarioReport, HarnessError> {
    let mut run = Run::new(mode, log_level);
    match scenario {
        Scenario::BestFit => best_fit(&mut run)?,
        Scenario::Fragmentation => fragmentation(&mut run)?,
        Scenario::Leak => leak(&mut run)?,
        Scenario::Realloc => realloc(&mut run)?,
        Scenario::DoubleRelease => double_release(&mut run)?,
    }
    Ok(run.finish(scenario))
}

fn best_fit(run: &mut Run) -> Result<(), HarnessError> {
    let small = run.alloc(64)?;
    let medium = run.alloc(128)?;
    let large = run.alloc(256)?;
    for p in [small, medium, large] {
        run.free(p)?;
    }
    let chosen = run.alloc(100)?;
    run.check(
        "picks_128_block",
        chosen == medium,
        format!("chosen={:p} expected={:p}", chosen, medium),
    );
    let arenas = run.allocator.stats().arena_count;
    run.check("no_new_arena", arenas == 3, format!("arenas={arenas}"));
    run.free(chosen)?;
    Ok(())
}

fn fragmentation(run: &mut Run) -> Result<(), HarnessError> {
    let arena = run.alloc(400)?;
    run.free(arena)?;
    let a = run.alloc(64)?;
    let b = run.alloc(64)?;
    let c = run.alloc(64)?;
    let d = run.alloc(64)?;

    run.free(a)?;
    run.free(c)?;
    let layout = run.layout();
    let apart = layout.len() == 5 && layout[0] == (64, true) && layout[2] == (64, true);
    run.check(
        "separated_frees_stay_apart",
        apart,
        format!("layout={layout:?}"),
    );

    run.free(b)?;
    let layout = run.layout();
    let merged = 3 * 64 + 2 * HEADER_SIZE;
    run.check(
        "neighbour_frees_merge",
        layout.first() == Some(&(merged, true)) && layout.len() == 3,
        format!("layout={layout:?}"),
    );
    let fragmentation = run.allocator.stats().fragmentation_percent();
    run.check(
        "fragmentation_reported",
        fragmentation > 0.0,
        format!("{fragmentation:.2}%"),
    );

    run.free(d)?;
    let layout = run.layout();
    run.check(
        "full_release_coalesces_arena",
        layout == [(400, true)],
        format!("layout={layout:?}"),
    );
    Ok(())
}

fn leak(run: &mut Run) -> Result<(), HarnessError> {
    let leaked = run.allocator.try_allocate(40, LEAK_SITE)?;
    for size in [16, 96, 200] {
        let p = run.alloc(size)?;
        run.free(p)?;
    }
    let report = run.allocator.report();
    let entry = report.leaks.first();
    run.check(
        "exactly_one_leak",
        report.leaks.len() == 1,
        format!("leaks={}", report.leaks.len()),
    );
    run.check(
        "leak_attributed_to_site",
        entry.is_some_and(|e| {
            e.size == 40 && e.site == LEAK_SITE && e.addr == leaked.as_ptr() as usize
        }),
        entry.map_or_else(String::new, |e| format!("{} bytes at {}", e.size, e.site)),
    );
    run.check(
        "report_is_idempotent",
        report == run.allocator.report(),
        "two reports compared",
    );
    Ok(())
}

fn realloc(run: &mut Run) -> Result<(), HarnessError> {
    let p = run.alloc(100)?;
    let pin = run.alloc(8)?;
    let pattern: Vec<u8> = (0..100u8).collect();
    // SAFETY: `p` owns 100 bytes.
    unsafe { p.as_ptr().copy_from_nonoverlapping(pattern.as_ptr(), pattern.len()) };

    // SAFETY: `p` is live and replaced by the result.
    let shrunk = unsafe { run.allocator.try_reallocate(p.as_ptr(), 50, CallSite::caller()) }?;
    let Some(shrunk) = shrunk else {
        run.check("shrink_in_place", false, "realloc returned null");
        return Ok(());
    };
    // SAFETY: `shrunk` owns at least 50 bytes.
    let prefix = unsafe { std::slice::from_raw_parts(shrunk.as_ptr(), 50) };
    run.check(
        "shrink_in_place",
        shrunk == p && prefix == &pattern[..50],
        format!("moved={}", shrunk != p),
    );

    // SAFETY: `shrunk` is live and replaced by the result.
    let grown =
        unsafe { run.allocator.try_reallocate(shrunk.as_ptr(), 300, CallSite::caller()) }?;
    let Some(grown) = grown else {
        run.check("grow_preserves_prefix", false, "realloc returned null");
        return Ok(());
    };
    // SAFETY: `grown` owns at least 300 bytes.
    let prefix = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 50) };
    run.check(
        "grow_preserves_prefix",
        prefix == &pattern[..50],
        format!("moved={}", grown != shrunk),
    );
    let kinds: Vec<&str> = run.allocator.records().iter().map(|r| r.kind.as_str()).collect();
    run.check(
        "move_recorded_as_realloc",
        kinds.last() == Some(&"realloc"),
        format!("kinds={kinds:?}"),
    );
    run.free(grown)?;
    run.free(pin)?;
    Ok(())
}

fn double_release(run: &mut Run) -> Result<(), HarnessError> {
    let p = run.alloc(32)?;
    let keep = run.alloc(32)?;
    run.free(p)?;
    let second = run.free(p);
    if run.mode.validates_pointers() {
        run.check(
            "second_release_rejected",
            matches!(second, Err(AllocError::DoubleRelease { .. })),
            format!("{second:?}"),
        );
    } else {
        run.check(
            "second_release_tolerated",
            second.is_ok(),
            format!("{second:?}"),
        );
    }
    run.free(keep)?;
    Ok(())
}
