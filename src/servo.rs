//! Servo policy layer over one owned [`PwmChannel`].
//!
//! Maps logical motions (left/right/stop/absolute pulse width) onto
//! bounded duty values.  Holds no state beyond the pulse bounds: every
//! motion is recomputed from them, so a reconfigured neutral takes effect
//! on the next command.
//!
//! Pulse writes go through the channel's direct absolute path — a single
//! `duty_cycle` write with no retry ladder.  The servo frame never changes
//! period once brought up, so the duty > period rejection cannot occur
//! here, and a failed write means something worth surfacing immediately.

use log::info;

use crate::config::{PwmTiming, ServoConfig};
use crate::error::Result;
use crate::pins;
use crate::pwm::{PwmChannel, PwmRegs, SysfsPwm};

/// A servo-style actuator on one PWM channel.
pub struct ServoActuator<R: PwmRegs> {
    channel: PwmChannel<R>,
    neutral_ns: u64,
    min_ns: u64,
    max_ns: u64,
}

impl ServoActuator<SysfsPwm> {
    /// Open the reference board's servo channel, honouring the `PWM_CHIP`
    /// environment override.
    pub fn open_onboard(config: &ServoConfig) -> Result<Self> {
        let regs = SysfsPwm::from_env(pins::SERVO_PWM_CHANNEL);
        Self::open(regs, config, PwmTiming::default())
    }
}

impl<R: PwmRegs> ServoActuator<R> {
    /// Bring up the channel at the servo frame period with the neutral
    /// pulse as the initial duty.
    pub fn open(regs: R, config: &ServoConfig, timing: PwmTiming) -> Result<Self> {
        let neutral_fraction = config.neutral_ns as f64 / config.period_ns as f64;
        let mut channel = PwmChannel::open(regs, config.period_ns, neutral_fraction, timing)?;

        // The bring-up clamps into the 5–95 % band; a servo neutral is
        // ~8 % of frame so the clamp is a no-op, but commit the exact
        // neutral anyway so the horn starts dead still.
        channel.set_duty_ns(config.neutral_ns)?;

        info!(
            "servo: up, neutral={} ns span=[{}, {}] ns",
            config.neutral_ns, config.min_ns, config.max_ns
        );
        Ok(Self {
            channel,
            neutral_ns: config.neutral_ns,
            min_ns: config.min_ns,
            max_ns: config.max_ns,
        })
    }

    /// Command an exact pulse width, clamped into `[min_ns, max_ns]`.
    pub fn set_pulse_ns(&mut self, duty_ns: u64) -> Result<()> {
        let ns = duty_ns.clamp(self.min_ns, self.max_ns);
        self.channel.set_duty_ns(ns)
    }

    /// Move toward `min_ns` by `pct` percent of the span below neutral.
    pub fn left(&mut self, pct: u8) -> Result<()> {
        let span = self.neutral_ns - self.min_ns;
        let delta = span * u64::from(pct.min(100)) / 100;
        self.set_pulse_ns(self.neutral_ns - delta)
    }

    /// Move toward `max_ns` by `pct` percent of the span above neutral.
    pub fn right(&mut self, pct: u8) -> Result<()> {
        let span = self.max_ns - self.neutral_ns;
        let delta = span * u64::from(pct.min(100)) / 100;
        self.set_pulse_ns(self.neutral_ns + delta)
    }

    /// Return to the neutral pulse.
    pub fn stop(&mut self) -> Result<()> {
        self.set_pulse_ns(self.neutral_ns)
    }

    /// Disable the output and release the channel.  Best-effort and
    /// idempotent; also runs when the actuator is dropped.
    pub fn close(&mut self) {
        self.channel.close();
    }

    /// Committed pulse width in nanoseconds.
    pub fn pulse_ns(&self) -> u64 {
        self.channel.duty_ns()
    }

    /// Borrow the owned channel (diagnostics and tests).
    pub fn channel(&self) -> &PwmChannel<R> {
        &self.channel
    }
}
