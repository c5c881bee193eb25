//! Allocator error types

use core::fmt;

/// Errors from heap operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The frame pool could not supply backing pages.
    OutOfFrames,
    /// The span registry is full; the slab cannot claim another page.
    SpanRegistryFull,
    /// Size or alignment is unsatisfiable.
    InvalidLayout,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => write!(f, "frame pool exhausted"),
            Self::SpanRegistryFull => write!(f, "slab span registry full"),
            Self::InvalidLayout => write!(f, "invalid layout"),
        }
    }
}
