//! Program loading
//!
//! Builds user address-space contents from ELF images handed over as
//! boot modules (or memory objects).

pub mod elf;

pub use elf::{load_elf, ElfLoadError, LoadedImage};

use graphene_syscall::SysError;

impl From<ElfLoadError> for SysError {
    fn from(e: ElfLoadError) -> Self {
        match e {
            ElfLoadError::WxSegment => Self::PermissionDenied,
            ElfLoadError::NoMemory => Self::OutOfMemory,
            _ => Self::InvalidArgument,
        }
    }
}
