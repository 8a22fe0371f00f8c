//! Unified error types for the DialDrive HAL.
//!
//! Two fatal categories exist.  `Init` means a required hardware control
//! surface could not be brought into existence within its bounded wait; the
//! owning component refuses to start and leaves no thread or partial state
//! behind.  `Programming` means a register write was still rejected after
//! the full retry ladder; the channel is left in whatever state the
//! hardware last reported.
//!
//! Quadrature glitches and encoder line read failures are *not* errors:
//! the decoder table absorbs the former and the poller skips the tick on
//! the latter (logged at debug level, never surfaced).

use std::io;
use thiserror::Error;

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible operation in the HAL funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    /// A required resource could not be exported, configured, or opened.
    #[error("init: {0}")]
    Init(#[from] InitError),
    /// A hardware register write was rejected after exhausting retries.
    #[error("programming: {0}")]
    Programming(#[from] ProgrammingError),
}

/// Startup failures.  Fatal to the owning component.
#[derive(Debug, Error)]
pub enum InitError {
    /// A GPIO line could not be exported, configured as input, or opened.
    #[error("gpio line {line}: {op} failed: {source}")]
    Gpio {
        /// Platform line number.
        line: u32,
        /// Which sysfs step failed ("export", "direction", "open value").
        op: &'static str,
        source: io::Error,
    },
    /// The PWM chip directory does not exist at all.
    #[error("pwm chip not present: {0}")]
    ChipMissing(String),
    /// The OS refused to start the encoder polling thread.
    #[error("encoder poller thread could not be started: {0}")]
    Spawn(io::Error),
    /// The channel surface never appeared after the export request.
    #[error("pwm channel did not appear within {waited_ms} ms of export")]
    ExportTimeout {
        /// How long the appearance poll ran before giving up.
        waited_ms: u64,
    },
}

/// Register programming failures, reported only after the retry ladder.
#[derive(Debug, Error)]
pub enum ProgrammingError {
    /// The 5-step bring-up sequence failed on every attempt.
    #[error("bring-up failed after {attempts} attempts: {last}")]
    BringUp { attempts: u32, last: io::Error },
    /// Every reprogramming strategy failed, including the full reset.
    #[error("reprogramming failed after all strategies: {last}")]
    Reprogram { last: io::Error },
    /// A direct duty_cycle write was rejected (and, where a fallback
    /// applies, the fallback was rejected too).
    #[error("duty_cycle write rejected: {0}")]
    DutyWrite(io::Error),
    /// The requested frequency cannot be expressed as a period.
    #[error("invalid frequency: {0} Hz")]
    InvalidFrequency(f64),
}

impl embedded_hal::pwm::Error for Error {
    fn kind(&self) -> embedded_hal::pwm::ErrorKind {
        embedded_hal::pwm::ErrorKind::Other
    }
}
