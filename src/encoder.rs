//! Rotary encoder service: quadrature decode + debounced button edge.
//!
//! One background thread polls the two phase lines and the pushbutton at
//! ~1 kHz.  All communication with consumers goes through independent
//! atomics — a signed position counter, a one-shot press flag, and a run
//! flag.  No locks anywhere; `take_button_edge()` uses swap semantics so a
//! press is delivered to exactly one caller.
//!
//! ## Decode table
//!
//! Each tick packs the two phase levels into a 2-bit state and combines it
//! with the previous state into a 4-bit transition code.  Of the 16 codes,
//! 4 are valid forward steps and 4 valid backward steps along the Gray
//! cycle `00→01→11→10→00`; the other 8 (no-change and glitch codes) apply
//! no change.  Sampling mid-edge therefore never produces phantom motion.
//!
//! ## Read-failure policy
//!
//! A failed line read skips the whole tick: position and the press flag
//! are untouched and nothing is surfaced to consumers.  The failure is
//! visible at debug level only.  This mirrors the board's observed
//! behaviour where `value` reads fail transiently during pinmux changes;
//! a persistently failing line simply looks like a motionless knob.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::EncoderConfig;
use crate::error::InitError;
use crate::gpio::{GpioLine, LineReader};
use crate::pins;

/// Position delta per 4-bit transition code, indexed by
/// `(last_state << 2) | state`.
const STEP_TABLE: [i8; 16] = [
    0, 1, -1, 0, // from 00
    -1, 0, 0, 1, // from 01
    1, 0, 0, -1, // from 10
    0, -1, 1, 0, // from 11
];

/// Table-driven quadrature state machine.
#[derive(Debug)]
pub struct QuadratureDecoder {
    last: u8,
}

impl QuadratureDecoder {
    /// Seed the decoder with the levels observed before the first tick.
    pub fn new(a: bool, b: bool) -> Self {
        Self { last: pack(a, b) }
    }

    /// Feed one sample of both phases; returns -1, 0, or +1.
    pub fn step(&mut self, a: bool, b: bool) -> i8 {
        let state = pack(a, b);
        let code = (self.last << 2) | state;
        self.last = state;
        STEP_TABLE[code as usize]
    }
}

fn pack(a: bool, b: bool) -> u8 {
    (u8::from(a) << 1) | u8::from(b)
}

/// Debounced rising-edge detector for the pushbutton.
///
/// Level changes are always tracked, but a rising edge is *registered*
/// only if enough time has passed since the last registered one.  Falling
/// edges never register; a held button registers exactly once.
#[derive(Debug)]
pub struct ButtonEdgeDetector {
    last_level: bool,
    last_registered: Option<Instant>,
    debounce: Duration,
}

impl ButtonEdgeDetector {
    /// Seed with the level observed before the first tick.
    pub fn new(initial_level: bool, debounce: Duration) -> Self {
        Self {
            last_level: initial_level,
            last_registered: None,
            debounce,
        }
    }

    /// Feed one sample.  Returns `true` when a debounced press registers.
    pub fn sample(&mut self, level: bool, now: Instant) -> bool {
        if level == self.last_level {
            return false;
        }
        self.last_level = level;
        if !level {
            return false;
        }
        let quiet = self
            .last_registered
            .is_none_or(|t| now.duration_since(t) > self.debounce);
        if quiet {
            self.last_registered = Some(now);
        }
        quiet
    }
}

// ── Shared state between poller and consumers ─────────────────

struct Shared {
    position: AtomicI64,
    button_edge: AtomicBool,
    run: AtomicBool,
}

/// Owns the polling thread and the three input lines.
///
/// Any number of reader threads may call [`position`](Self::position) and
/// [`take_button_edge`](Self::take_button_edge) concurrently while the
/// poller runs.  [`stop`](Self::stop) is idempotent and also runs on drop.
pub struct EncoderService {
    shared: Arc<Shared>,
    poller: Option<JoinHandle<()>>,
}

impl EncoderService {
    /// Export, configure, and open the reference board's three encoder
    /// lines, then start polling.  No thread is started if any line fails.
    pub fn open_onboard(config: EncoderConfig) -> Result<Self, InitError> {
        let a = GpioLine::open_input(pins::ENC_A_LINE)?;
        let b = GpioLine::open_input(pins::ENC_B_LINE)?;
        let button = GpioLine::open_input(pins::ENC_BUTTON_LINE)?;
        Self::start(a, b, button, config)
    }

    /// Start the poller over already-open lines.  Position starts at 0 and
    /// the press flag unset.  Fails only if the OS refuses the thread; the
    /// lines are closed again in that case.
    pub fn start<L>(
        mut phase_a: L,
        mut phase_b: L,
        mut button: L,
        config: EncoderConfig,
    ) -> Result<Self, InitError>
    where
        L: LineReader + 'static,
    {
        let shared = Arc::new(Shared {
            position: AtomicI64::new(0),
            button_edge: AtomicBool::new(false),
            run: AtomicBool::new(true),
        });

        let poll = Duration::from_micros(config.poll_interval_us);
        let debounce = Duration::from_millis(config.debounce_ms);
        let state = Arc::clone(&shared);

        let poller = thread::Builder::new()
            .name("encoder-poll".into())
            .spawn(move || {
                // Seed both state machines from the pre-loop levels; a
                // failed initial read just seeds from low.
                let a0 = phase_a.read().unwrap_or(false);
                let b0 = phase_b.read().unwrap_or(false);
                let sw0 = button.read().unwrap_or(false);
                let mut decoder = QuadratureDecoder::new(a0, b0);
                let mut detector = ButtonEdgeDetector::new(sw0, debounce);

                while state.run.load(Ordering::Acquire) {
                    thread::sleep(poll);

                    let (a, b, sw) = match (phase_a.read(), phase_b.read(), button.read()) {
                        (Ok(a), Ok(b), Ok(sw)) => (a, b, sw),
                        _ => {
                            debug!("encoder: line read failed, skipping tick");
                            continue;
                        }
                    };

                    match decoder.step(a, b) {
                        1 => {
                            state.position.fetch_add(1, Ordering::Relaxed);
                        }
                        -1 => {
                            state.position.fetch_sub(1, Ordering::Relaxed);
                        }
                        _ => {}
                    }

                    if detector.sample(sw, Instant::now()) {
                        state.button_edge.store(true, Ordering::Release);
                    }
                }
                // Lines drop here, closing their value handles.
            })
            .map_err(InitError::Spawn)?;

        info!("encoder: poller started ({} us tick)", config.poll_interval_us);
        Ok(Self {
            shared,
            poller: Some(poller),
        })
    }

    /// Current signed position.  Wraps at the i64 boundaries.
    pub fn position(&self) -> i64 {
        self.shared.position.load(Ordering::Relaxed)
    }

    /// Overwrite the position counter (calibration).  Decoding state is
    /// unaffected.
    pub fn set_position(&self, v: i64) {
        self.shared.position.store(v, Ordering::Relaxed);
    }

    /// Read-and-clear the one-shot press flag.  Returns `true` at most
    /// once per qualifying press, to exactly one caller.
    pub fn take_button_edge(&self) -> bool {
        self.shared.button_edge.swap(false, Ordering::AcqRel)
    }

    /// Signal the poller and join it.  The poller notices the flag within
    /// about one polling interval.  Safe to call repeatedly.
    pub fn stop(&mut self) {
        if !self.shared.run.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.poller.take() {
            let _ = handle.join();
        }
        info!("encoder: poller stopped");
    }
}

impl Drop for EncoderService {
    fn drop(&mut self) {
        self.stop();
    }
}
