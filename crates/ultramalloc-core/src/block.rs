//! Block header layout and size arithmetic.
//!
//! ```text
//! arena: ┌────────────────────┬──────────────┬────────────────────┬──────┐
//!        │ BlockHeader (24 B) │ payload      │ BlockHeader (24 B) │ ...  │
//!        │ size│next│arena│tag│ `size` bytes │ size│next│arena│tag│      │
//!        └────────────────────┴──────────────┴────────────────────┴──────┘
//! ```
//!
//! Arenas are page aligned, the header size and every block size are
//! multiples of [`ALIGNMENT`], so every payload is [`ALIGNMENT`]-aligned.

use std::ptr::NonNull;

/// Payload alignment and size granule.
pub const ALIGNMENT: usize = 8;

/// Smallest remainder a split may leave behind.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Byte written over released payloads in hardened mode.
pub const POISON_BYTE: u8 = 0xDE;

/// Bytes occupied by a header in front of every payload.
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % ALIGNMENT == 0);
const _: () = assert!(align_of::<BlockHeader>() <= ALIGNMENT);

pub(crate) const BLOCK_USED: u32 = 0xA110_C8ED;
pub(crate) const BLOCK_FREE: u32 = 0xF7EE_B10C;

/// In-band header preceding each payload.
///
/// The free/used state is a 32-bit tag rather than a `bool` so a header
/// reached through a stale pointer never holds an invalid value.
#[repr(C)]
#[derive(Debug)]
pub(crate) struct BlockHeader {
    /// Usable bytes following the header.
    pub size: usize,
    /// Next block in acquisition order, or null at the tail.
    pub next: *mut BlockHeader,
    /// Id of the arena this block was carved from.
    pub arena: u32,
    /// [`BLOCK_USED`] or [`BLOCK_FREE`].
    pub tag: u32,
}

impl BlockHeader {
    /// Write a fresh header at `at`.
    ///
    /// # Safety
    ///
    /// `at` must be [`ALIGNMENT`]-aligned and valid for writes of
    /// `HEADER_SIZE + size` bytes inside a mapped arena.
    pub unsafe fn write(at: NonNull<u8>, size: usize, arena: u32, free: bool) -> NonNull<Self> {
        let header = at.cast::<Self>();
        // SAFETY: caller guarantees `at` is aligned and writable.
        unsafe {
            header.write(Self {
                size,
                next: std::ptr::null_mut(),
                arena,
                tag: if free { BLOCK_FREE } else { BLOCK_USED },
            });
        }
        header
    }

    /// Header position for a payload pointer, without any validation.
    ///
    /// Dereferencing the result is only sound if `payload` was produced by
    /// [`payload`](Self::payload) and its arena is still mapped.
    pub fn from_payload(payload: NonNull<u8>) -> Option<NonNull<Self>> {
        NonNull::new(payload.as_ptr().wrapping_sub(HEADER_SIZE).cast::<Self>())
    }

    /// First usable byte after `header`.
    pub fn payload(header: NonNull<Self>) -> NonNull<u8> {
        // SAFETY: every header is followed by its payload inside the arena.
        unsafe { header.cast::<u8>().add(HEADER_SIZE) }
    }

    pub fn is_free(&self) -> bool {
        self.tag == BLOCK_FREE
    }

    pub fn has_valid_tag(&self) -> bool {
        self.tag == BLOCK_FREE || self.tag == BLOCK_USED
    }

    pub fn set_free(&mut self, free: bool) {
        self.tag = if free { BLOCK_FREE } else { BLOCK_USED };
    }

    /// Address one past this block's payload.
    pub fn end_addr(header: NonNull<Self>) -> usize {
        // SAFETY: `header` points at a live header inside an arena.
        let size = unsafe { header.as_ref().size };
        header.as_ptr() as usize + HEADER_SIZE + size
    }
}

/// Read-only view of one block, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView {
    /// Payload address.
    pub addr: usize,
    /// Usable bytes.
    pub size: usize,
    pub free: bool,
    pub arena: u32,
}

/// Round `n` up to [`ALIGNMENT`]. Saturates at the largest aligned value.
#[must_use]
pub const fn align(n: usize) -> usize {
    match n.checked_add(ALIGNMENT - 1) {
        Some(v) => v & !(ALIGNMENT - 1),
        None => usize::MAX & !(ALIGNMENT - 1),
    }
}
