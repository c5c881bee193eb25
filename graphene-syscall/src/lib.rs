//! # graphene-syscall
//!
//! The stable ABI between user space and the Graphene kernel.
//!
//! # ABI
//!
//! One software-interrupt vector (`int 0x80`, gate DPL = 3):
//! - `rax`: request number
//! - `rdi`, `rsi`, `rdx`, `r10`, `r8`, `r9`: arguments
//! - `rax`: result (0 or a non-negative count on success, a small
//!   negative integer from [`SysError`] on failure)
//!
//! The request set is closed; see [`Syscall`]. Message-carrying calls
//! pass a pointer to a [`Message`] in user memory.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod invoke;
pub mod message;
pub mod numbers;

pub use error::{SysError, SysResult};
pub use message::{Message, MessageFlags, MessageHeader, MSG_MAX_CAPS, MSG_MAX_PAYLOAD};
pub use numbers::Syscall;

/// Software-interrupt vector registered for syscalls.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Mapping permission bits for `mem_map`.
pub mod mem {
    /// Map readable.
    pub const READ: u64 = 1 << 0;
    /// Map writable.
    pub const WRITE: u64 = 1 << 1;
    /// Map executable.
    pub const EXECUTE: u64 = 1 << 2;
}

/// `thread_create` stack argument meaning "allocate a default stack".
pub const STACK_DEFAULT: u64 = u64::MAX;
