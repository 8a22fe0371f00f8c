//! Tunable parameters for the encoder poller and PWM programming protocol.
//!
//! Defaults match the reference board.  Integration tests shrink the
//! timing values so the same code paths run in milliseconds on the host.

use serde::{Deserialize, Serialize};

/// Encoder polling-thread configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Sleep between polling ticks (microseconds).  1000 ≈ 1 kHz, fast
    /// enough to never miss a Gray-code state at hand-turning speeds.
    pub poll_interval_us: u64,
    /// Minimum interval between two *registered* button presses (ms).
    pub debounce_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            poll_interval_us: 1000,
            debounce_ms: 50,
        }
    }
}

/// Timing knobs for the PWM bring-up and reprogramming protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PwmTiming {
    /// Total time to wait for the channel surface to appear after export (ms).
    pub export_wait_ms: u64,
    /// Interval between appearance checks during that wait (ms).
    pub export_poll_ms: u64,
    /// Full bring-up sequence attempts before giving up.
    pub bringup_attempts: u32,
    /// Pause between register writes that need the driver to settle (ms).
    pub settle_ms: u64,
}

impl Default for PwmTiming {
    fn default() -> Self {
        Self {
            export_wait_ms: 500,
            export_poll_ms: 20,
            bringup_attempts: 3,
            settle_ms: 2,
        }
    }
}

/// Servo pulse-width bounds (nanoseconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoConfig {
    /// PWM period.  20 ms = the standard 50 Hz servo frame.
    pub period_ns: u64,
    /// Pulse width that holds the servo still.
    pub neutral_ns: u64,
    /// Shortest pulse the horn is allowed to see.
    pub min_ns: u64,
    /// Longest pulse the horn is allowed to see.
    pub max_ns: u64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            period_ns: 20_000_000,
            neutral_ns: 1_600_000,
            min_ns: 1_200_000,
            max_ns: 2_000_000,
        }
    }
}
