//! # graphene-arch
//!
//! The x86-64 architecture seam. Everything the portable kernel needs
//! from the hardware is confined here behind a narrow interface:
//!
//! - [`cpu`]: interrupt flag control, halt, CPU relax
//! - [`gdt`]: GDT/TSS setup, per-thread kernel stack (`set_kernel_stack`)
//! - [`trap`]: the uniform trap frame and the `int 0x80` entry stub
//! - [`context`]: callee-saved context switch and ring-3 entry
//! - [`mmu`]: CR3 load/read and TLB invalidation
//! - [`port`]: 8/16/32-bit port I/O
//! - [`sync`]: interrupt-safe spinlock ([`IrqSpinMutex`])
//!
//! The privileged instructions are compiled only for bare-metal targets;
//! on a hosted build (unit tests) the CPU control functions are inert so
//! the portable kernel logic can be exercised on the host.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![feature(naked_functions)]

pub mod context;
pub mod cpu;
pub mod gdt;
pub mod mmu;
pub mod port;
pub mod sync;
pub mod trap;

pub use cpu::{disable_interrupts, halt, restore_interrupts, wait_for_interrupt};
pub use sync::{IrqSpinMutex, IrqSpinMutexGuard};
pub use trap::TrapFrame;
