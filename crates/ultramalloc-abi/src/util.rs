//! Shared conversions for the entry points.

use std::ffi::{CStr, c_char, c_int};

use ultramalloc_core::{AllocError, CallSite};

/// Build a call-site tag from a C `__FILE__`/`__LINE__` pair.
///
/// A null, or non-UTF-8 file name becomes `"<unknown>"`; a negative line
/// becomes 0.
///
/// # Safety
///
/// `file` must be null or point to a NUL-terminated string that stays
/// valid for the rest of the process, as string literals do.
pub(crate) unsafe fn call_site(file: *const c_char, line: c_int) -> CallSite {
    let line = u32::try_from(line).unwrap_or(0);
    if file.is_null() {
        return CallSite::new(CallSite::UNKNOWN.file, line);
    }
    // SAFETY: caller guarantees a NUL-terminated string with static lifetime.
    let file: &'static CStr = unsafe { CStr::from_ptr(file) };
    CallSite::new(file.to_str().unwrap_or(CallSite::UNKNOWN.file), line)
}

/// errno value a failed call reports to C.
pub(crate) fn errno_for(err: &AllocError) -> Option<c_int> {
    match err {
        AllocError::ZeroSize => None,
        AllocError::SizeOverflow { .. } | AllocError::ShutDown => Some(libc::ENOMEM),
        AllocError::OutOfMemory { errno, .. } => Some(*errno),
        AllocError::DoubleRelease { .. }
        | AllocError::UseAfterRelease { .. }
        | AllocError::UnknownPointer { .. }
        | AllocError::Corrupted { .. } => Some(libc::EINVAL),
        AllocError::AlreadyStarted => Some(libc::EALREADY),
    }
}

#[cfg(target_os = "linux")]
pub(crate) fn set_errno(val: c_int) {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = val };
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn set_errno(_val: c_int) {}

/// Report `err` through errno when it maps to one.
pub(crate) fn fail(err: AllocError) {
    if let Some(errno) = errno_for(&err) {
        set_errno(errno);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_file_is_unknown() {
        // SAFETY: null is accepted.
        let site = unsafe { call_site(std::ptr::null(), 12) };
        assert_eq!(site, CallSite::new("<unknown>", 12));
    }

    #[test]
    fn literal_file_is_kept() {
        // SAFETY: a C string literal lives for the whole process.
        let site = unsafe { call_site(c"main.c".as_ptr(), -3) };
        assert_eq!(site, CallSite::new("main.c", 0));
    }

    #[test]
    fn zero_size_sets_no_errno() {
        assert_eq!(errno_for(&AllocError::ZeroSize), None);
        assert_eq!(
            errno_for(&AllocError::SizeOverflow { count: 2, size: 3 }),
            Some(libc::ENOMEM)
        );
    }
}
