//! High-Precision Timing
//!
//! Uses RDTSCP on x86_64 and CNTVCT_EL0 on AArch64 for minimal overhead
//! cycle counting. Raw intervals are corrected by a calibration constant
//! that accounts for the fixed cost of reading the counter itself.

use std::time::Duration;
use thiserror::Error;

// ─── Inline cycle counter helpers ────────────────────────────────────────────

/// Read the CPU cycle/tick counter (platform-specific).
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    // SAFETY: RDTSCP is available on all x86_64 CPUs since ~2006.
    // It is serializing by design — waits for all prior instructions
    // to complete before reading the cycle counter.
    unsafe {
        let mut _aux: u32 = 0;
        std::arch::x86_64::__rdtscp(&mut _aux)
    }
}

/// Read the virtual counter timer on AArch64 (comparable to x86 TSC).
#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_cycles() -> u64 {
    let cnt: u64;
    // SAFETY: CNTVCT_EL0 is accessible from EL0 (userspace) on all
    // AArch64 implementations. It provides a monotonically increasing
    // counter at a fixed frequency (typically the system timer frequency).
    unsafe {
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) cnt, options(nostack, nomem));
    }
    cnt
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn read_cycles() -> u64 {
    0
}

/// Whether this platform provides real cycle counters.
pub const HAS_CYCLE_COUNTER: bool = cfg!(target_arch = "x86_64") || cfg!(target_arch = "aarch64");

/// Back-to-back counter read pairs taken during calibration.
const CALIBRATION_ROUNDS: usize = 10_000;

/// Wall-clock window used to estimate the counter frequency.
const FREQ_ESTIMATION_WINDOW: Duration = Duration::from_millis(50);

/// Errors from the timing pipeline.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// The platform exposes no hardware cycle counter. Measurements would be
    /// meaningless, so this is fatal for the whole run.
    #[error("no hardware cycle counter available on this platform")]
    NoCycleCounter,
}

// ─── Calibration ─────────────────────────────────────────────────────────────

/// Fixed overhead of one cycle-counter read, subtracted from every measured
/// interval.
///
/// Must be computed exactly once, before any peer process is spawned, so all
/// ranks subtract the identical constant — recomputing per process would skew
/// peers whose results are compared against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickCorrection(u64);

impl TickCorrection {
    /// Measure the intrinsic cost of reading the cycle counter.
    ///
    /// Takes back-to-back readings and keeps the minimum delta: larger deltas
    /// include interrupts or migrations, while the minimum approaches the
    /// true serialized read cost.
    pub fn calibrate() -> Result<Self, MeasureError> {
        if !HAS_CYCLE_COUNTER {
            return Err(MeasureError::NoCycleCounter);
        }

        let mut min_delta = u64::MAX;
        for _ in 0..CALIBRATION_ROUNDS {
            let a = read_cycles();
            let b = read_cycles();
            min_delta = min_delta.min(b.saturating_sub(a));
        }
        Ok(Self(min_delta))
    }

    /// Rebuild a correction from a raw value (used by spawned peers, which
    /// inherit the supervisor's constant instead of recalibrating).
    pub fn from_raw(ticks: u64) -> Self {
        Self(ticks)
    }

    /// The correction constant in ticks.
    pub fn ticks(&self) -> u64 {
        self.0
    }
}

/// Estimate the cycle counter frequency in Hz by counting ticks across a
/// short wall-clock window.
///
/// Used as the reference clock for throughput conversion when the
/// configuration does not pin one explicitly.
pub fn estimate_ref_hz() -> Result<f64, MeasureError> {
    if !HAS_CYCLE_COUNTER {
        return Err(MeasureError::NoCycleCounter);
    }

    let wall_start = std::time::Instant::now();
    let tick_start = read_cycles();
    while wall_start.elapsed() < FREQ_ESTIMATION_WINDOW {
        std::hint::spin_loop();
    }
    let ticks = read_cycles().saturating_sub(tick_start);
    let secs = wall_start.elapsed().as_secs_f64();
    Ok(ticks as f64 / secs)
}

// ─── Stopwatch ───────────────────────────────────────────────────────────────

/// Scoped measurement over a region of the protocol.
///
/// Captures the counter on `start` and yields corrected ticks on `stop`.
/// The correction never pushes an interval below zero.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    start_ticks: u64,
}

impl Stopwatch {
    /// Capture the counter at region entry.
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start_ticks: read_cycles(),
        }
    }

    /// Close the region and return corrected elapsed ticks.
    #[inline(always)]
    pub fn stop(&self, correction: TickCorrection) -> u64 {
        read_cycles()
            .saturating_sub(self.start_ticks)
            .saturating_sub(correction.ticks())
    }
}

/// Busy-wait for approximately `cycles` ticks.
///
/// Used for the post-completion delay; a no-op on platforms without a
/// counter.
pub fn spin_for_cycles(cycles: u64) {
    if cycles == 0 || !HAS_CYCLE_COUNTER {
        return;
    }
    let start = read_cycles();
    while read_cycles().wrapping_sub(start) < cycles {
        std::hint::spin_loop();
    }
}

// ─── CPU affinity ────────────────────────────────────────────────────────────

/// Pin the calling process to a specific core.
///
/// Keeps the TSC stable by avoiding core migrations. Every rank pins itself
/// after spawn; the supervisor never pins its children.
#[cfg(target_os = "linux")]
pub fn pin_to_core(core: usize) -> Result<(), std::io::Error> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let set_ref = set.assume_init_mut();

        libc::CPU_ZERO(set_ref);
        libc::CPU_SET(core, set_ref);

        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

/// CPU pinning not supported on this platform.
#[cfg(not(target_os = "linux"))]
pub fn pin_to_core(_core: usize) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_counter_monotonic() {
        if HAS_CYCLE_COUNTER {
            let a = read_cycles();
            let b = read_cycles();
            assert!(b >= a, "cycle counter should be monotonic");
        }
    }

    #[test]
    fn test_calibration_is_small() {
        if !HAS_CYCLE_COUNTER {
            return;
        }
        let correction = TickCorrection::calibrate().unwrap();
        // A serialized counter read costs tens of cycles; anything near a
        // million means the calibration loop itself is broken.
        assert!(correction.ticks() < 1_000_000);
    }

    #[test]
    fn test_correction_roundtrip() {
        let correction = TickCorrection::from_raw(42);
        assert_eq!(correction.ticks(), 42);
    }

    #[test]
    fn test_stopwatch_never_negative() {
        // An absurdly large correction must clamp to zero, not wrap.
        let watch = Stopwatch::start();
        let corrected = watch.stop(TickCorrection::from_raw(u64::MAX));
        assert_eq!(corrected, 0);
    }

    #[test]
    fn test_stopwatch_measures_elapsed() {
        if !HAS_CYCLE_COUNTER {
            return;
        }
        let correction = TickCorrection::calibrate().unwrap();
        let watch = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(5));
        let corrected = watch.stop(correction);
        assert!(corrected > 0, "5ms sleep should cost measurable ticks");
    }

    #[test]
    fn test_estimate_ref_hz_plausible() {
        if !HAS_CYCLE_COUNTER {
            return;
        }
        let hz = estimate_ref_hz().unwrap();
        // Counter frequencies range from tens of MHz (ARM system timers)
        // to a few GHz (x86 TSC).
        assert!(hz > 1e6 && hz < 1e11, "implausible frequency: {hz}");
    }

    #[test]
    fn test_spin_for_cycles_returns() {
        spin_for_cycles(0);
        spin_for_cycles(1_000);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pin_to_nonexistent_core_fails() {
        // An index past the cpu_set_t capacity leaves the mask empty, which
        // the kernel rejects with EINVAL.
        assert!(pin_to_core(1 << 20).is_err());
    }
}
