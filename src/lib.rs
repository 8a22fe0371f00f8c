//! DialDrive hardware abstraction library.
//!
//! Input/actuator subsystem for a Linux single-board controller: a
//! quadrature rotary encoder with an integrated pushbutton, decoded on a
//! background polling thread, and a servo-style PWM output programmed
//! through sysfs control attributes.
//!
//! All hardware access goes through two port traits —
//! [`LineReader`](gpio::LineReader) for digital inputs and
//! [`PwmRegs`](pwm::PwmRegs) for the PWM register surface — so every piece
//! of decode and programming logic runs unmodified on the host against
//! scripted or mock adapters.

#![deny(unused_must_use)]

pub mod config;
pub mod encoder;
pub mod gpio;
pub mod pwm;
pub mod servo;

mod error;
mod sysfs;

pub mod pins;

pub use config::{EncoderConfig, PwmTiming, ServoConfig};
pub use encoder::EncoderService;
pub use error::{Error, InitError, ProgrammingError, Result};
pub use gpio::GpioLine;
pub use pwm::{PwmChannel, SysfsPwm};
pub use servo::ServoActuator;
