//! Sysfs PWM channel with a retrying bring-up and reprogramming protocol.
//!
//! The drivers on these boards reject any `duty_cycle` write that exceeds
//! the currently-effective `period`, and reject a `period` write smaller
//! than the current duty.  Every sequence that could transiently leave
//! duty > period must therefore first shrink duty to a value smaller than
//! any valid period (1 ns) before touching the period.  That single rule
//! shapes the whole module:
//!
//! - [`PwmChannel::open`] runs a 5-step bring-up (disable → duty 1 →
//!   period → bounded duty → enable), retried whole up to 3 times.
//! - [`PwmChannel::set_frequency`] walks an ordered ladder of
//!   [`ReprogramStrategy`] values, stopping at the first that sticks.
//! - [`PwmChannel::set_duty`] tries a direct write and falls back to a
//!   disable/prime/restore sequence.
//!
//! Committed duty is always kept strictly inside (0, period) — rail
//! values at 0 % or 100 % trip driver-specific misbehaviour.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::PwmTiming;
use crate::error::{Error, InitError, ProgrammingError, Result};
use crate::pins;
use crate::sysfs;

/// Default sysfs PWM class directory.
pub const PWM_CLASS: &str = "/sys/class/pwm";

/// Duty ratios are clamped into this band before committing.
pub const DUTY_RATIO_MIN: f64 = 0.05;
/// Upper clamp of the committed duty ratio.
pub const DUTY_RATIO_MAX: f64 = 0.95;

// ── Port trait ────────────────────────────────────────────────

/// Register surface of one PWM channel.
///
/// The real adapter is [`SysfsPwm`]; tests substitute a mock that enforces
/// the duty/period rejection rule so each strategy's write ordering is
/// verified against the same constraint the hardware imposes.
pub trait PwmRegs {
    /// Does the channel's control surface exist yet?
    fn present(&self) -> bool;
    /// Ask the chip to create the channel surface.
    fn export(&mut self) -> io::Result<()>;
    /// Ask the chip to remove the channel surface.
    fn unexport(&mut self) -> io::Result<()>;
    /// Program the period in nanoseconds.
    fn write_period(&mut self, ns: u64) -> io::Result<()>;
    /// Program the duty in nanoseconds.
    fn write_duty(&mut self, ns: u64) -> io::Result<()>;
    /// Switch the output on or off.
    fn write_enable(&mut self, on: bool) -> io::Result<()>;
    /// Read back the enable flag.
    fn read_enable(&mut self) -> io::Result<bool>;
    /// Read back the period.
    fn read_period(&mut self) -> io::Result<u64>;
    /// Set polarity to "normal" if the attribute exists; an absent
    /// attribute is not an error.
    fn write_polarity_normal(&mut self) -> io::Result<()>;
    /// Pause for the driver to settle between writes.  Mocks override
    /// this with a no-op so tests run in microseconds.
    fn settle(&mut self, d: Duration) {
        std::thread::sleep(d);
    }
}

// ── Sysfs adapter ─────────────────────────────────────────────

/// `PwmRegs` over `/sys/class/pwm/pwmchip{chip}/pwm{channel}`.
#[derive(Debug)]
pub struct SysfsPwm {
    chip: u32,
    channel: u32,
    chip_dir: PathBuf,
    channel_dir: PathBuf,
}

impl SysfsPwm {
    /// Adapter for `pwmchip{chip}/pwm{channel}` under the standard class
    /// directory.
    pub fn new(chip: u32, channel: u32) -> Self {
        Self::with_root(Path::new(PWM_CLASS), chip, channel)
    }

    /// Chip index from the `PWM_CHIP` environment variable, falling back
    /// to the board default.  Chip numbering moves between device-tree
    /// overlays, so deployments pin it in the service environment.
    pub fn from_env(channel: u32) -> Self {
        let chip = std::env::var(pins::PWM_CHIP_ENV)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(pins::DEFAULT_PWM_CHIP);
        Self::new(chip, channel)
    }

    /// Same adapter against an alternate class root (disk-backed fakes).
    pub fn with_root(root: &Path, chip: u32, channel: u32) -> Self {
        let chip_dir = root.join(format!("pwmchip{chip}"));
        let channel_dir = chip_dir.join(format!("pwm{channel}"));
        Self {
            chip,
            channel,
            chip_dir,
            channel_dir,
        }
    }

    /// Controller index this adapter points at.
    pub fn chip(&self) -> u32 {
        self.chip
    }

    fn attr(&self, name: &str) -> PathBuf {
        self.channel_dir.join(name)
    }
}

impl PwmRegs for SysfsPwm {
    fn present(&self) -> bool {
        sysfs::exists(&self.channel_dir)
    }

    fn export(&mut self) -> io::Result<()> {
        if !sysfs::exists(&self.chip_dir) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} does not exist", self.chip_dir.display()),
            ));
        }
        match sysfs::write_u64(&self.chip_dir.join("export"), u64::from(self.channel)) {
            Ok(()) => Ok(()),
            // EBUSY from a concurrent or stale export still means the
            // surface is (or is about to be) there.
            Err(e) if self.present() => {
                debug!("pwm: export raced ({e}), surface already present");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn unexport(&mut self) -> io::Result<()> {
        sysfs::write_u64(&self.chip_dir.join("unexport"), u64::from(self.channel))
    }

    fn write_period(&mut self, ns: u64) -> io::Result<()> {
        sysfs::write_u64(&self.attr("period"), ns)
    }

    fn write_duty(&mut self, ns: u64) -> io::Result<()> {
        sysfs::write_u64(&self.attr("duty_cycle"), ns)
    }

    fn write_enable(&mut self, on: bool) -> io::Result<()> {
        sysfs::write_u64(&self.attr("enable"), u64::from(on))
    }

    fn read_enable(&mut self) -> io::Result<bool> {
        Ok(sysfs::read_u64(&self.attr("enable"))? != 0)
    }

    fn read_period(&mut self) -> io::Result<u64> {
        sysfs::read_u64(&self.attr("period"))
    }

    fn write_polarity_normal(&mut self) -> io::Result<()> {
        let path = self.attr("polarity");
        if !sysfs::exists(&path) {
            return Ok(());
        }
        sysfs::write_attr(&path, "normal")
    }
}

// ── Bounded duty ──────────────────────────────────────────────

/// Clamp `ratio` into the committed band and convert to nanoseconds,
/// keeping the result strictly inside (0, period).
pub fn bounded_duty_ns(ratio: f64, period_ns: u64) -> u64 {
    let ratio = ratio.clamp(DUTY_RATIO_MIN, DUTY_RATIO_MAX);
    let dc = (ratio * period_ns as f64).round() as u64;
    dc.clamp(1, period_ns.saturating_sub(1).max(1))
}

// ── Reprogramming strategies ──────────────────────────────────

/// One rung of the frequency-change ladder.
///
/// Each strategy is a pure sequence of register writes over [`PwmRegs`]
/// with a success/failure outcome, so its ordering invariant is testable
/// in isolation.  [`PwmChannel::set_frequency`] tries them in declaration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReprogramStrategy {
    /// Fast path: enable first if the output was off, then write period
    /// and duty in place.  Works whenever the new period is not smaller
    /// than the committed duty.
    Direct,
    /// Safe ordering, still in place: shrink duty to 1 ns (acceptable
    /// under any period), then period, then the target duty.
    PrimedOrder,
    /// Full reset, two attempts: disable, prime, period, duty, re-enable.
    /// A failed enable is retried once after a brief backoff.
    FullReset,
}

impl ReprogramStrategy {
    /// Apply this strategy's write sequence.  On `Ok` the hardware holds
    /// `period_ns`/`duty_ns` and the output is enabled.
    pub fn apply<R: PwmRegs + ?Sized>(
        self,
        regs: &mut R,
        timing: &PwmTiming,
        period_ns: u64,
        duty_ns: u64,
    ) -> io::Result<()> {
        let settle = Duration::from_millis(timing.settle_ms);
        match self {
            Self::Direct => {
                let enabled = regs.read_enable().unwrap_or(true);
                if !enabled {
                    let _ = regs.write_enable(true);
                    regs.settle(settle);
                }
                regs.write_period(period_ns)?;
                regs.write_duty(duty_ns)
            }
            Self::PrimedOrder => {
                regs.write_duty(1)?;
                regs.write_period(period_ns)?;
                regs.write_duty(duty_ns)
            }
            Self::FullReset => {
                let mut last = io::Error::other("full reset never ran");
                for attempt in 0..2 {
                    let _ = regs.write_enable(false);
                    regs.settle(settle);
                    let _ = regs.write_duty(1);

                    match regs
                        .write_period(period_ns)
                        .and_then(|()| regs.write_duty(duty_ns))
                    {
                        Ok(()) => match regs.write_enable(true) {
                            Ok(()) => {
                                regs.settle(settle);
                                return Ok(());
                            }
                            Err(e) => {
                                // Back off briefly and retry the enable alone.
                                regs.settle(settle);
                                if regs.write_enable(true).is_ok() {
                                    return Ok(());
                                }
                                last = e;
                            }
                        },
                        Err(e) => {
                            last = e;
                            regs.settle(settle);
                            let _ = regs.write_enable(true);
                            regs.settle(settle);
                        }
                    }
                    debug!("pwm: full-reset attempt {} failed: {last}", attempt + 1);
                }
                Err(last)
            }
        }
    }
}

/// Ladder order for `set_frequency`.
const LADDER: [ReprogramStrategy; 3] = [
    ReprogramStrategy::Direct,
    ReprogramStrategy::PrimedOrder,
    ReprogramStrategy::FullReset,
];

// ── Channel ───────────────────────────────────────────────────

/// One owned hardware PWM output.
///
/// Single-writer contract: operations are synchronous and assume one
/// caller per channel.  Multiple independent channels are fine — each
/// owns its backend handle; there is no process-wide state.
#[derive(Debug)]
pub struct PwmChannel<R: PwmRegs> {
    regs: R,
    period_ns: u64,
    duty_ns: u64,
    duty_ratio: f64,
    enabled: bool,
    closed: bool,
    timing: PwmTiming,
}

impl<R: PwmRegs> PwmChannel<R> {
    /// Export the channel if needed, wait for its surface to appear, and
    /// run the bring-up sequence.
    ///
    /// `initial_duty_fraction` is clamped into [5 %, 95 %] of the period
    /// before the first commit; rail values at first bring-up stick some
    /// drivers in a state only a power cycle clears.
    pub fn open(
        mut regs: R,
        period_ns: u64,
        initial_duty_fraction: f64,
        timing: PwmTiming,
    ) -> Result<Self> {
        ensure_exported(&mut regs, &timing)?;

        let duty_ns = bounded_duty_ns(initial_duty_fraction, period_ns);
        let settle = Duration::from_millis(timing.settle_ms);
        let mut last = io::Error::other("bring-up never ran");

        for attempt in 1..=timing.bringup_attempts {
            // 1) hard-off; 2) prime duty so any period is acceptable.
            let _ = regs.write_enable(false);
            regs.settle(settle);
            let _ = regs.write_duty(1);
            regs.settle(settle);
            let _ = regs.write_polarity_normal();

            // 3..5) period → bounded duty → enable; retry the whole
            // sequence on any failure.
            match regs
                .write_period(period_ns)
                .and_then(|()| regs.write_duty(duty_ns))
                .and_then(|()| regs.write_enable(true))
            {
                Ok(()) => {
                    info!(
                        "pwm: brought up, period={period_ns} ns duty={duty_ns} ns (attempt {attempt})"
                    );
                    return Ok(Self {
                        regs,
                        period_ns,
                        duty_ns,
                        duty_ratio: duty_ns as f64 / period_ns as f64,
                        enabled: true,
                        closed: false,
                        timing,
                    });
                }
                Err(e) => {
                    debug!("pwm: bring-up attempt {attempt} failed: {e}");
                    last = e;
                    regs.settle(settle);
                }
            }
        }

        warn!("pwm: bring-up failed after {} attempts", timing.bringup_attempts);
        Err(ProgrammingError::BringUp {
            attempts: timing.bringup_attempts,
            last,
        }
        .into())
    }

    /// Reprogram the output frequency, preserving the committed
    /// duty/period ratio (clamped into the band for the new period).
    ///
    /// Strategies are tried in order; the channel ends enabled on success.
    pub fn set_frequency(&mut self, hz: f64) -> Result<()> {
        if hz.is_nan() || hz <= 0.0 {
            return Err(ProgrammingError::InvalidFrequency(hz).into());
        }
        let new_period = (1e9 / hz).round().max(1.0) as u64;
        let target = bounded_duty_ns(self.duty_ratio, new_period);

        let mut last = io::Error::other("no strategy ran");
        for strategy in LADDER {
            match strategy.apply(&mut self.regs, &self.timing, new_period, target) {
                Ok(()) => {
                    debug!(
                        "pwm: set_frequency({hz}) committed via {strategy:?}, period={new_period} ns"
                    );
                    self.period_ns = new_period;
                    self.duty_ns = target;
                    self.duty_ratio = target as f64 / new_period as f64;
                    self.enabled = true;
                    return Ok(());
                }
                Err(e) => {
                    debug!("pwm: strategy {strategy:?} failed: {e}");
                    last = e;
                }
            }
        }

        warn!("pwm: set_frequency({hz}) exhausted every strategy");
        Err(ProgrammingError::Reprogram { last }.into())
    }

    /// Commit a new duty as a fraction of the current period, clamped
    /// into [5 %, 95 %].
    ///
    /// Direct write first; on rejection, fall back to disable → prime →
    /// target, restoring the enable state the channel had before the call.
    pub fn set_duty(&mut self, fraction: f64) -> Result<()> {
        if self.period_ns == 0 {
            // Channel adopted without a bring-up: learn the period from
            // the hardware before computing absolute nanoseconds.
            self.period_ns = self
                .regs
                .read_period()
                .map_err(ProgrammingError::DutyWrite)?;
        }
        let dc = bounded_duty_ns(fraction, self.period_ns);

        if let Err(direct) = self.regs.write_duty(dc) {
            let settle = Duration::from_millis(self.timing.settle_ms);
            let was_enabled = self.regs.read_enable().unwrap_or(true);
            let _ = self.regs.write_enable(false);
            self.regs.settle(settle);
            let _ = self.regs.write_duty(1);
            let ok = self.regs.write_duty(dc).is_ok();
            if was_enabled {
                let _ = self.regs.write_enable(true);
            }
            if !ok {
                warn!("pwm: duty write rejected even after prime: {direct}");
                return Err(ProgrammingError::DutyWrite(direct).into());
            }
        }

        self.duty_ns = dc;
        self.duty_ratio = dc as f64 / self.period_ns as f64;
        Ok(())
    }

    /// Commit an exact duty in nanoseconds with a single direct write —
    /// no clamping band, no ladder.  The servo path uses this; a failure
    /// surfaces immediately.
    pub fn set_duty_ns(&mut self, ns: u64) -> Result<()> {
        self.regs
            .write_duty(ns)
            .map_err(ProgrammingError::DutyWrite)?;
        self.duty_ns = ns;
        if self.period_ns > 0 {
            self.duty_ratio = ns as f64 / self.period_ns as f64;
        }
        Ok(())
    }

    /// Disable the output and release the channel surface.  Best-effort:
    /// nothing here can fail the caller, and the in-memory enabled flag
    /// goes false unconditionally.  Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.regs.write_enable(false) {
            debug!("pwm: disable during close failed: {e}");
        }
        if let Err(e) = self.regs.unexport() {
            debug!("pwm: unexport during close failed: {e}");
        }
        self.enabled = false;
        self.closed = true;
    }

    /// Committed period in nanoseconds.
    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// Committed duty in nanoseconds.
    pub fn duty_ns(&self) -> u64 {
        self.duty_ns
    }

    /// Committed duty as a fraction of the period.
    pub fn duty_ratio(&self) -> f64 {
        self.duty_ratio
    }

    /// Last known enable state.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Borrow the underlying register port (tests and diagnostics).
    pub fn regs(&self) -> &R {
        &self.regs
    }
}

impl<R: PwmRegs> Drop for PwmChannel<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Export the channel surface and wait, bounded, for it to appear.
fn ensure_exported<R: PwmRegs>(regs: &mut R, timing: &PwmTiming) -> Result<()> {
    if regs.present() {
        return Ok(());
    }

    // A missing chip directory is unrecoverable; any other export failure
    // still gets the appearance wait, since another process may have won
    // the export race.
    let export_result = regs.export();
    if let Err(e) = &export_result {
        if e.kind() == io::ErrorKind::NotFound {
            return Err(InitError::ChipMissing(e.to_string()).into());
        }
        debug!("pwm: export write failed ({e}), polling for appearance anyway");
    }

    let step = Duration::from_millis(timing.export_poll_ms.max(1));
    let tries = timing.export_wait_ms / timing.export_poll_ms.max(1);
    for _ in 0..=tries {
        if regs.present() {
            return Ok(());
        }
        regs.settle(step);
    }

    Err(InitError::ExportTimeout {
        waited_ms: timing.export_wait_ms,
    }
    .into())
}

// ── embedded-hal interop ──────────────────────────────────────

impl<R: PwmRegs> embedded_hal::pwm::ErrorType for PwmChannel<R> {
    type Error = Error;
}

impl<R: PwmRegs> embedded_hal::pwm::SetDutyCycle for PwmChannel<R> {
    fn max_duty_cycle(&self) -> u16 {
        u16::MAX
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<()> {
        self.set_duty(f64::from(duty) / f64::from(u16::MAX))
    }
}
