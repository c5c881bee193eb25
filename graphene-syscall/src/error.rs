//! Syscall error codes
//!
//! The stable error enumeration returned to user space. Kernel-internal
//! subsystems have their own error types; they are funnelled into this
//! enumeration exactly once, at the syscall boundary.

/// Stable syscall error codes.
///
/// Success is 0 or a non-negative count; failures are small negative
/// integers. The values are ABI and never change.
#[repr(i64)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysError {
    /// Success.
    Success = 0,
    /// Unknown request number.
    InvalidSyscall = -1,
    /// Slot empty, stale, or referencing a destroyed object.
    InvalidCapability = -2,
    /// Capability lacks the required rights (or W^X violation).
    PermissionDenied = -3,
    /// Bad address, length, or alignment.
    InvalidArgument = -4,
    /// Out of frames, pool entries, or heap.
    OutOfMemory = -5,
    /// Non-blocking operation could not complete.
    WouldBlock = -6,
    /// Endpoint closed or referenced entity absent.
    NotFound = -7,
    /// Recognised but unimplemented request.
    NotImplemented = -8,
    /// Capability refers to an object of the wrong type.
    TypeMismatch = -9,
    /// Capability table has no free slot.
    TableFull = -10,
}

impl SysError {
    /// Raw value for the return register.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self as i64
    }

    /// Decode a raw return value into an error, if it is one.
    #[must_use]
    pub const fn from_return(value: i64) -> Option<Self> {
        Some(match value {
            -1 => Self::InvalidSyscall,
            -2 => Self::InvalidCapability,
            -3 => Self::PermissionDenied,
            -4 => Self::InvalidArgument,
            -5 => Self::OutOfMemory,
            -6 => Self::WouldBlock,
            -7 => Self::NotFound,
            -8 => Self::NotImplemented,
            -9 => Self::TypeMismatch,
            -10 => Self::TableFull,
            _ => return None,
        })
    }

    /// Error name for logging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidSyscall => "invalid_syscall",
            Self::InvalidCapability => "invalid_capability",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidArgument => "invalid_argument",
            Self::OutOfMemory => "out_of_memory",
            Self::WouldBlock => "would_block",
            Self::NotFound => "not_found",
            Self::NotImplemented => "not_implemented",
            Self::TypeMismatch => "type_mismatch",
            Self::TableFull => "table_full",
        }
    }
}

/// Result type used by syscall handlers: a non-negative count on
/// success, a [`SysError`] on failure.
pub type SysResult = Result<i64, SysError>;

/// Collapse a handler result into the raw return-register value.
#[inline]
#[must_use]
pub fn to_return_value(result: SysResult) -> i64 {
    match result {
        Ok(v) => v,
        Err(e) => e.as_i64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_values() {
        assert_eq!(SysError::Success.as_i64(), 0);
        assert_eq!(SysError::InvalidSyscall.as_i64(), -1);
        assert_eq!(SysError::InvalidCapability.as_i64(), -2);
        assert_eq!(SysError::PermissionDenied.as_i64(), -3);
        assert_eq!(SysError::InvalidArgument.as_i64(), -4);
        assert_eq!(SysError::OutOfMemory.as_i64(), -5);
        assert_eq!(SysError::WouldBlock.as_i64(), -6);
        assert_eq!(SysError::NotFound.as_i64(), -7);
        assert_eq!(SysError::NotImplemented.as_i64(), -8);
        assert_eq!(SysError::TypeMismatch.as_i64(), -9);
        assert_eq!(SysError::TableFull.as_i64(), -10);
    }

    #[test]
    fn test_from_return() {
        assert_eq!(SysError::from_return(-6), Some(SysError::WouldBlock));
        assert_eq!(SysError::from_return(0), None);
        assert_eq!(SysError::from_return(4), None);
        assert_eq!(SysError::from_return(-11), None);
    }

    #[test]
    fn test_to_return_value() {
        assert_eq!(to_return_value(Ok(4)), 4);
        assert_eq!(to_return_value(Err(SysError::TableFull)), -10);
    }
}
