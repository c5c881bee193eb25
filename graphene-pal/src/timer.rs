//! PIT scheduler tick
//!
//! Channel 0 of the 8253/8254 in rate-generator mode drives the
//! preemption tick. The frequency is a compile-time choice between 100
//! and 1000 Hz.

use core::sync::atomic::{AtomicU64, Ordering};

use graphene_arch::port::{out_port, PortWidth};

/// Tick frequency in Hz.
pub const TICK_HZ: u32 = 250;

const _: () = assert!(TICK_HZ >= 100 && TICK_HZ <= 1000);

/// Nanoseconds per tick.
pub const NS_PER_TICK: u64 = 1_000_000_000 / TICK_HZ as u64;

/// PIT input clock in Hz.
const PIT_HZ: u32 = 1_193_182;

const PIT_CH0: u16 = 0x40;
const PIT_CMD: u16 = 0x43;

/// Monotonic tick counter, advanced by the timer interrupt handler.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Program PIT channel 0 as a rate generator at [`TICK_HZ`].
pub fn init() {
    let divisor = PIT_HZ / TICK_HZ;
    // SAFETY: Standard PIT programming: channel 0, lobyte/hibyte,
    // mode 2 (rate generator).
    unsafe {
        out_port(PIT_CMD, 0x34, PortWidth::Byte);
        out_port(PIT_CH0, divisor & 0xFF, PortWidth::Byte);
        out_port(PIT_CH0, (divisor >> 8) & 0xFF, PortWidth::Byte);
    }
    log::info!("timer: PIT at {} Hz (divisor {})", TICK_HZ, divisor);
}

/// Record one tick. Called from the timer interrupt handler only.
#[inline]
pub fn on_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Ticks since boot.
#[inline]
#[must_use]
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Milliseconds since boot, derived from the tick counter.
#[inline]
#[must_use]
pub fn now_ms() -> u64 {
    ticks() * 1000 / TICK_HZ as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_accounting() {
        let before = ticks();
        on_tick();
        on_tick();
        assert_eq!(ticks(), before + 2);
    }

    #[test]
    fn test_ns_per_tick() {
        assert_eq!(NS_PER_TICK, 1_000_000_000 / TICK_HZ as u64);
    }
}
