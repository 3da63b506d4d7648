//! `malloc`-family entry points.
//!
//! Pointers handed in must be null or come from this allocator; in
//! `strict` and `hardened` modes anything else is rejected and reported in
//! the lifecycle log. `file` arguments follow the contract of a C string
//! literal (NUL-terminated, never freed).

use std::ffi::{c_char, c_int, c_void};
use std::ptr;

use ultramalloc_core::lifecycle::global_or_init;

use crate::util::{call_site, fail};

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ultramalloc_malloc(
    size: usize,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let site = unsafe { call_site(file, line) };
    match global_or_init().try_allocate(size, site) {
        Ok(p) => p.as_ptr().cast(),
        Err(err) => {
            fail(err);
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ultramalloc_calloc(
    nmemb: usize,
    size: usize,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let site = unsafe { call_site(file, line) };
    match global_or_init().try_allocate_zeroed(nmemb, size, site) {
        Ok(p) => p.as_ptr().cast(),
        Err(err) => {
            fail(err);
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ultramalloc_realloc(
    ptr: *mut c_void,
    size: usize,
    file: *const c_char,
    line: c_int,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let site = unsafe { call_site(file, line) };
    // SAFETY: C callers own `ptr` exclusively for the duration of realloc.
    match unsafe { global_or_init().try_reallocate(ptr.cast(), size, site) } {
        Ok(Some(p)) => p.as_ptr().cast(),
        Ok(None) => ptr::null_mut(),
        Err(err) => {
            fail(err);
            ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn ultramalloc_free(ptr: *mut c_void, file: *const c_char, line: c_int) {
    // SAFETY: forwarded caller contract.
    let site = unsafe { call_site(file, line) };
    // SAFETY: C callers give up `ptr` by freeing it.
    if let Err(err) = unsafe { global_or_init().release(ptr.cast(), site) } {
        fail(err);
    }
}
