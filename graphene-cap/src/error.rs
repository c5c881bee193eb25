//! Capability error types

use core::fmt;

/// Errors from capability-table operations and lookups.
///
/// Type mismatch and missing rights are deliberately distinct: a caller
/// naming the wrong kind of object is a different bug from a caller
/// holding an attenuated capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[must_use = "capability errors must be handled"]
pub enum CapError {
    /// Slot index outside the table.
    InvalidIndex,
    /// The source slot holds no capability.
    EmptySlot,
    /// The destination slot already holds a capability.
    SlotOccupied,
    /// Generation mismatch or object destroyed: the capability is stale.
    Stale,
    /// The capability lacks a required right.
    InsufficientRights,
    /// The object is not of the expected type.
    TypeMismatch,
    /// No free slot in the table.
    TableFull,
    /// Object arena exhausted.
    OutOfMemory,
}

impl CapError {
    /// Short description.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidIndex => "invalid slot index",
            Self::EmptySlot => "slot is empty",
            Self::SlotOccupied => "destination slot is occupied",
            Self::Stale => "capability is stale",
            Self::InsufficientRights => "insufficient rights",
            Self::TypeMismatch => "object type mismatch",
            Self::TableFull => "capability table full",
            Self::OutOfMemory => "object arena exhausted",
        }
    }
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result type for capability operations.
pub type CapResult<T> = Result<T, CapError>;
