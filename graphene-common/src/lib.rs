//! # graphene-common
//!
//! Types shared between the bootloader handoff, the kernel, and the
//! support crates: physical/virtual address newtypes, the boot-info
//! structure, the memory map, and page-size constants.
//!
//! Everything here is `#[repr(C)]` or `#[repr(transparent)]` and free of
//! target-specific code, so the crate builds on the host for testing.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod boot;
pub mod memory;

pub use addr::{PhysAddr, VirtAddr};
pub use boot::{BootInfo, BootModule, FramebufferInfo};
pub use memory::{MemoryKind, MemoryMap, MemoryRegion};
