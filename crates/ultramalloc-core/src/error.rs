//! Allocator error taxonomy.

use thiserror::Error;

/// Failure modes of the allocator core.
///
/// Pointer-returning entry points collapse these into `None`; the `try_*`
/// variants and [`Allocator::release`](crate::Allocator::release) surface
/// them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A zero-byte request.
    #[error("zero-size allocation request")]
    ZeroSize,
    /// `count * size` does not fit in `usize`.
    #[error("allocation size overflow: {count} x {size}")]
    SizeOverflow { count: usize, size: usize },
    /// The OS refused to map a new arena.
    #[error("out of memory: arena of {requested} bytes could not be mapped (errno {errno})")]
    OutOfMemory { requested: usize, errno: i32 },
    /// The block behind the pointer is already free.
    #[error("double release of {addr:#x}")]
    DoubleRelease { addr: usize },
    /// A reallocation named a block that has already been released.
    #[error("use of released pointer {addr:#x}")]
    UseAfterRelease { addr: usize },
    /// The pointer does not name the payload of any block in this heap.
    #[error("pointer {addr:#x} was not returned by this allocator")]
    UnknownPointer { addr: usize },
    /// The allocator has already been torn down.
    #[error("allocator has been shut down")]
    ShutDown,
    /// `startup()` was called while a process-wide allocator is installed.
    #[error("allocator already started")]
    AlreadyStarted,
    /// A heap walk found a broken structural invariant.
    #[error("heap corrupted at {addr:#x}: {reason}")]
    Corrupted { addr: usize, reason: &'static str },
}

impl AllocError {
    /// Returns true for misuse of a pointer (double release or foreign pointer).
    #[must_use]
    pub const fn is_pointer_misuse(&self) -> bool {
        matches!(
            self,
            Self::DoubleRelease { .. } | Self::UseAfterRelease { .. } | Self::UnknownPointer { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_addresses_in_hex() {
        let err = AllocError::DoubleRelease { addr: 0x1000 };
        assert_eq!(err.to_string(), "double release of 0x1000");
        let err = AllocError::UnknownPointer { addr: 0xdead };
        assert!(err.to_string().contains("0xdead"));
    }

    #[test]
    fn pointer_misuse_classification() {
        assert!(AllocError::DoubleRelease { addr: 8 }.is_pointer_misuse());
        assert!(AllocError::UnknownPointer { addr: 8 }.is_pointer_misuse());
        assert!(AllocError::UseAfterRelease { addr: 8 }.is_pointer_misuse());
        assert!(!AllocError::ZeroSize.is_pointer_misuse());
        assert!(
            !AllocError::OutOfMemory {
                requested: 1,
                errno: 12
            }
            .is_pointer_misuse()
        );
    }
}
