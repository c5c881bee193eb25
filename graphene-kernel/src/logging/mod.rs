//! Kernel logging
//!
//! A `log`-crate backend: messages are formatted into a fixed stack
//! buffer, timestamped with the scheduler tick, pushed into a ring
//! buffer, and echoed to the serial console while the early console is
//! enabled. Panic output bypasses all of it and hits the UART
//! directly.

pub mod buffer;
pub mod logger;

pub use logger::init;
