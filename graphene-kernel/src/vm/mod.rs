//! Virtual memory management
//!
//! The address-space manager sits above the page-table engine: it
//! tracks regions, enforces W^X at region-creation time, owns each
//! space's page-table root, and answers page faults.

pub mod aspace;
pub mod fault;

pub use aspace::{AddressSpace, Region, RegionFlags, VmError};

use graphene_syscall::SysError;

impl From<VmError> for SysError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::WxViolation => Self::PermissionDenied,
            VmError::Overlap | VmError::BadRange | VmError::BadAlignment => Self::InvalidArgument,
            VmError::NoMemory => Self::OutOfMemory,
            VmError::NotFound => Self::NotFound,
            VmError::MapFailed(_) => Self::InvalidArgument,
        }
    }
}
