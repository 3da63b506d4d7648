//! OS-backed arenas.
//!
//! Each arena is one private, anonymous, zero-filled mapping that starts
//! life as a single used block. Arenas are only ever unmapped together, at
//! teardown.

use std::io;
use std::ptr::{self, NonNull};

use crate::block::{BlockHeader, HEADER_SIZE, align};
use crate::error::AllocError;

/// Bookkeeping for one mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArenaRegion {
    pub(crate) id: u32,
    pub(crate) base: NonNull<u8>,
    pub(crate) len: usize,
}

impl ArenaRegion {
    #[must_use]
    pub(crate) fn start(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[must_use]
    pub(crate) fn end(&self) -> usize {
        self.start() + self.len
    }

    /// Returns true if `[addr, addr + len)` lies inside this region.
    #[must_use]
    pub(crate) fn contains_range(&self, addr: usize, len: usize) -> bool {
        addr >= self.start() && addr.checked_add(len).is_some_and(|end| end <= self.end())
    }
}

/// Map an arena large enough for a `requested`-byte payload.
///
/// The returned block covers the whole region and is marked used.
pub(crate) fn acquire_arena(
    requested: usize,
    id: u32,
) -> Result<(ArenaRegion, NonNull<BlockHeader>), AllocError> {
    let oom = |errno| AllocError::OutOfMemory { requested, errno };
    let total = requested
        .checked_add(HEADER_SIZE)
        .filter(|total| *total <= isize::MAX as usize)
        .map(align)
        .ok_or(oom(libc::ENOMEM))?;

    // SAFETY: anonymous private mapping; no fd, no fixed address.
    let raw = unsafe {
        libc::mmap(
            ptr::null_mut(),
            total,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if raw == libc::MAP_FAILED {
        let errno = io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::ENOMEM);
        return Err(oom(errno));
    }
    let base = NonNull::new(raw.cast::<u8>()).ok_or(oom(libc::ENOMEM))?;

    // SAFETY: the mapping is page aligned and `total` bytes long.
    let block = unsafe { BlockHeader::write(base, total - HEADER_SIZE, id, false) };
    Ok((ArenaRegion { id, base, len: total }, block))
}

/// Return a region to the OS.
///
/// # Safety
///
/// `region` must come from [`acquire_arena`], must not have been released
/// before, and nothing may touch its memory afterwards.
pub(crate) unsafe fn release_arena(region: &ArenaRegion) -> io::Result<()> {
    // SAFETY: caller guarantees the region is a live mapping of `len` bytes.
    let rc = unsafe { libc::munmap(region.base.as_ptr().cast(), region.len) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_is_one_used_block_of_aligned_size() {
        let (region, block) = acquire_arena(100, 7).expect("mmap should succeed");
        // SAFETY: block was just written by acquire_arena.
        let header = unsafe { block.as_ref() };
        assert_eq!(region.len, align(100 + HEADER_SIZE));
        assert_eq!(header.size, region.len - HEADER_SIZE);
        assert!(!header.is_free());
        assert!(header.next.is_null());
        assert_eq!(header.arena, 7);
        assert_eq!(region.start() % 4096, 0, "mmap regions are page aligned");
        // SAFETY: region is live and released once.
        unsafe { release_arena(&region) }.expect("munmap should succeed");
    }

    #[test]
    fn arena_memory_is_zeroed_and_writable() {
        let (region, block) = acquire_arena(256, 1).unwrap();
        let payload = BlockHeader::payload(block);
        // SAFETY: payload is 256 writable bytes inside the mapping.
        unsafe {
            let bytes = std::slice::from_raw_parts_mut(payload.as_ptr(), 256);
            assert!(bytes.iter().all(|b| *b == 0));
            bytes.fill(0xAB);
            assert_eq!(bytes[255], 0xAB);
            release_arena(&region).unwrap();
        }
    }

    #[test]
    fn oversized_request_fails_without_mapping() {
        let err = acquire_arena(usize::MAX - 4, 1).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfMemory {
                requested: usize::MAX - 4,
                errno: libc::ENOMEM
            }
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn unmappable_request_reports_os_errno() {
        let err = acquire_arena(1 << 62, 1).unwrap_err();
        assert!(matches!(err, AllocError::OutOfMemory { requested, .. } if requested == 1 << 62));
    }

    #[test]
    fn contains_range_respects_bounds() {
        let (region, _) = acquire_arena(64, 2).unwrap();
        assert!(region.contains_range(region.start(), region.len));
        assert!(!region.contains_range(region.start(), region.len + 1));
        assert!(!region.contains_range(region.start().wrapping_sub(8), 8));
        assert!(!region.contains_range(usize::MAX - 2, 8));
        // SAFETY: released once.
        unsafe { release_arena(&region) }.unwrap();
    }
}
