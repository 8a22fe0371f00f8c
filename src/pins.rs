//! GPIO line and PWM channel assignments for the reference board.
//!
//! Single source of truth — every driver references this module rather than
//! hard-coding line numbers.  Change an assignment here and it propagates
//! everywhere.

// ---------------------------------------------------------------------------
// Rotary encoder (three digital inputs)
// ---------------------------------------------------------------------------

/// Quadrature phase A.
pub const ENC_A_LINE: u32 = 439;
/// Quadrature phase B.
pub const ENC_B_LINE: u32 = 336;
/// Integrated pushbutton (active HIGH through the board's level shifter).
pub const ENC_BUTTON_LINE: u32 = 434;

// ---------------------------------------------------------------------------
// Servo PWM output
// ---------------------------------------------------------------------------

/// PWM controller used when no override is given.
pub const DEFAULT_PWM_CHIP: u32 = 0;
/// Channel index on the controller.
pub const SERVO_PWM_CHANNEL: u32 = 0;
/// Environment variable overriding the controller index.  Useful because
/// pwmchip numbering shifts between kernel revisions and device-tree
/// overlays on these boards.
pub const PWM_CHIP_ENV: &str = "PWM_CHIP";
