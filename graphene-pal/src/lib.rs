//! # graphene-pal
//!
//! The platform abstraction layer covers the pieces of PC hardware the
//! kernel consumes but does not specify: a 16550 serial console for
//! logs and panics, the two EOI-capable interrupt controllers (legacy
//! 8259 pair and the local APIC) behind one trait, and the PIT driving
//! the scheduler tick.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod console;
pub mod intc;
pub mod timer;

pub use intc::{active_controller, InterruptController};
