//! Nice-to-weight mapping
//!
//! The classic 40-entry table: weight(0) = 1024, ratio ≈ 1.25 per nice
//! step. A thread's vruntime advances by `delta · W0 / weight(nice)`,
//! so lower nice (higher weight) accumulates vruntime more slowly and
//! receives proportionally more CPU.

/// Weight of nice 0.
pub const W0: u64 = 1024;

/// Default time-slice length in scheduler ticks.
pub const DEFAULT_QUANTUM_TICKS: u32 = 4;

/// Weights for nice −20 (index 0) through +19 (index 39).
const NICE_WEIGHTS: [u64; 40] = [
    88761, 71755, 56483, 46273, 36291, // -20 .. -16
    29154, 23254, 18705, 14949, 11916, // -15 .. -11
    9548, 7620, 6100, 4904, 3906, // -10 .. -6
    3121, 2501, 1991, 1586, 1277, // -5 .. -1
    1024, 820, 655, 526, 423, // 0 .. 4
    335, 272, 215, 172, 137, // 5 .. 9
    110, 87, 70, 56, 45, // 10 .. 14
    36, 29, 23, 18, 15, // 15 .. 19
];

/// Weight for a nice value (clamped to [−20, 19]).
#[inline]
#[must_use]
pub const fn weight(nice: i8) -> u64 {
    let mut idx = nice as i32 + 20;
    if idx < 0 {
        idx = 0;
    }
    if idx > 39 {
        idx = 39;
    }
    NICE_WEIGHTS[idx as usize]
}

/// Advance of vruntime for `delta_ns` of real execution at `nice`.
#[inline]
#[must_use]
pub const fn vruntime_delta(delta_ns: u64, nice: i8) -> u64 {
    delta_ns * W0 / weight(nice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_points() {
        assert_eq!(weight(0), 1024);
        assert_eq!(weight(-20), 88761);
        assert_eq!(weight(19), 15);
        // Clamping
        assert_eq!(weight(-128), 88761);
        assert_eq!(weight(127), 15);
    }

    #[test]
    fn test_ratio_is_about_1_25() {
        for nice in -20i8..19 {
            let ratio = weight(nice) as f64 / weight(nice + 1) as f64;
            assert!((1.15..1.35).contains(&ratio), "nice {nice}: ratio {ratio}");
        }
    }

    #[test]
    fn test_vruntime_scaling() {
        // Nice 0 advances 1:1.
        assert_eq!(vruntime_delta(4_000_000, 0), 4_000_000);
        // Higher weight advances more slowly.
        assert!(vruntime_delta(4_000_000, -5) < 4_000_000);
        // Lower weight advances faster.
        assert!(vruntime_delta(4_000_000, 5) > 4_000_000);
    }
}
