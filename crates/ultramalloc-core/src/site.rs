//! Call-site tags attached to allocation records.

use std::fmt;
use std::panic::Location;

/// Source location that requested an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
}

impl CallSite {
    /// Placeholder for callers that supply no location.
    pub const UNKNOWN: Self = Self {
        file: "<unknown>",
        line: 0,
    };

    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of the code calling this function (or of the outermost
    /// `#[track_caller]` frame above it).
    #[must_use]
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }
}

impl Default for CallSite {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_captures_this_file() {
        let site = CallSite::caller();
        assert!(site.file.ends_with("site.rs"));
        assert!(site.line > 0);
    }

    #[test]
    fn display_is_file_colon_line() {
        assert_eq!(CallSite::new("main.c", 42).to_string(), "main.c:42");
        assert_eq!(CallSite::default(), CallSite::UNKNOWN);
    }
}
