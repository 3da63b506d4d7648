//! Allocator configuration.
//!
//! The release-checking mode is set via the `ULTRAMALLOC_MODE` environment
//! variable:
//! - `strict` (default): every released or reallocated pointer is located in
//!   the block list first. Unknown pointers and blocks that are already free
//!   are rejected without touching the heap.
//! - `hardened`: strict checking, and freed payloads are overwritten with
//!   [`POISON_BYTE`](crate::block::POISON_BYTE) so stale reads are visible.
//! - `off`: no validation. The header is computed straight from the pointer
//!   and a second release re-marks the block free and merges again.
//!
//! `ULTRAMALLOC_LOG` selects the minimum lifecycle log level and
//! `ULTRAMALLOC_REPORT=0` suppresses the leak report printed at shutdown.

use crate::log::AllocatorLogLevel;

const DEFAULT_LOG_CAPACITY: usize = 1024;
const DEFAULT_TRACKER_CAPACITY: usize = 1024;

/// Pointer-validation mode applied on release and reallocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLevel {
    /// Validate pointers; reject double release and foreign pointers.
    #[default]
    Strict,
    /// Strict validation plus poisoning of released payloads.
    Hardened,
    /// No validation. Legacy behavior, kept as a benchmarking baseline.
    Off,
}

impl SafetyLevel {
    /// Parse from string (case-insensitive). Unknown input maps to `Strict`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" | "default" | "check" => Self::Strict,
            "hardened" | "poison" | "full" => Self::Hardened,
            "off" | "none" | "disabled" | "legacy" => Self::Off,
            _ => Self::Strict,
        }
    }

    /// Returns true if pointers are validated before the heap is touched.
    #[must_use]
    pub const fn validates_pointers(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns true if released payloads are poisoned.
    #[must_use]
    pub const fn poisons_on_release(self) -> bool {
        matches!(self, Self::Hardened)
    }

    /// Lowercase name, as accepted by [`from_str_loose`](Self::from_str_loose).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Hardened => "hardened",
            Self::Off => "off",
        }
    }
}

/// Allocator tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Pointer-validation mode.
    pub mode: SafetyLevel,
    /// Minimum lifecycle log level; `None` disables the lifecycle log.
    pub log_level: Option<AllocatorLogLevel>,
    /// Maximum number of retained lifecycle records (oldest are dropped).
    pub log_capacity: usize,
    /// Initial capacity of the allocation record log.
    pub tracker_capacity: usize,
    /// Print the leak report to stdout during shutdown.
    pub report_on_shutdown: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            mode: SafetyLevel::Strict,
            log_level: Some(AllocatorLogLevel::Warn),
            log_capacity: DEFAULT_LOG_CAPACITY,
            tracker_capacity: DEFAULT_TRACKER_CAPACITY,
            report_on_shutdown: true,
        }
    }
}

impl AllocatorConfig {
    /// Build a configuration from `ULTRAMALLOC_*` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(mode) = lookup("ULTRAMALLOC_MODE") {
            config.mode = SafetyLevel::from_str_loose(&mode);
        }
        if let Some(level) = lookup("ULTRAMALLOC_LOG") {
            config.log_level = parse_log_level(&level);
        }
        if let Some(report) = lookup("ULTRAMALLOC_REPORT") {
            config.report_on_shutdown = !matches!(
                report.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off" | "no"
            );
        }
        config
    }

    #[must_use]
    pub fn with_mode(mut self, mode: SafetyLevel) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: Option<AllocatorLogLevel>) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_tracker_capacity(mut self, capacity: usize) -> Self {
        self.tracker_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_report_on_shutdown(mut self, enabled: bool) -> Self {
        self.report_on_shutdown = enabled;
        self
    }
}

fn parse_log_level(raw: &str) -> Option<AllocatorLogLevel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(AllocatorLogLevel::Trace),
        "debug" => Some(AllocatorLogLevel::Debug),
        "info" => Some(AllocatorLogLevel::Info),
        "error" => Some(AllocatorLogLevel::Error),
        "off" | "none" => None,
        _ => Some(AllocatorLogLevel::Warn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_safety_levels() {
        assert_eq!(SafetyLevel::from_str_loose("strict"), SafetyLevel::Strict);
        assert_eq!(SafetyLevel::from_str_loose("STRICT"), SafetyLevel::Strict);
        assert_eq!(
            SafetyLevel::from_str_loose(" hardened "),
            SafetyLevel::Hardened
        );
        assert_eq!(SafetyLevel::from_str_loose("poison"), SafetyLevel::Hardened);
        assert_eq!(SafetyLevel::from_str_loose("off"), SafetyLevel::Off);
        assert_eq!(SafetyLevel::from_str_loose("legacy"), SafetyLevel::Off);
        assert_eq!(SafetyLevel::from_str_loose("bogus"), SafetyLevel::Strict);
    }

    #[test]
    fn default_is_strict_with_report() {
        let config = AllocatorConfig::default();
        assert_eq!(config.mode, SafetyLevel::Strict);
        assert!(config.report_on_shutdown);
        assert_eq!(config.log_level, Some(AllocatorLogLevel::Warn));
        assert_eq!(config.tracker_capacity, 1024);
    }

    #[test]
    fn only_off_skips_validation() {
        assert!(SafetyLevel::Strict.validates_pointers());
        assert!(SafetyLevel::Hardened.validates_pointers());
        assert!(!SafetyLevel::Off.validates_pointers());
        assert!(SafetyLevel::Hardened.poisons_on_release());
        assert!(!SafetyLevel::Strict.poisons_on_release());
    }

    #[test]
    fn lookup_reads_all_variables() {
        let config = AllocatorConfig::from_lookup(|key| match key {
            "ULTRAMALLOC_MODE" => Some("hardened".to_string()),
            "ULTRAMALLOC_LOG" => Some("trace".to_string()),
            "ULTRAMALLOC_REPORT" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.mode, SafetyLevel::Hardened);
        assert_eq!(config.log_level, Some(AllocatorLogLevel::Trace));
        assert!(!config.report_on_shutdown);
    }

    #[test]
    fn lookup_without_variables_is_default() {
        assert_eq!(
            AllocatorConfig::from_lookup(|_| None),
            AllocatorConfig::default()
        );
    }

    #[test]
    fn log_level_off_disables_log() {
        assert_eq!(parse_log_level("off"), None);
        assert_eq!(parse_log_level("garbage"), Some(AllocatorLogLevel::Warn));
    }
}
