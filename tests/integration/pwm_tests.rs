//! PWM bring-up and reprogramming protocol, end to end against the mock
//! register surface.

use crate::mock_regs::{MockRegs, RegOp};
use dialdrive::config::PwmTiming;
use dialdrive::pwm::{PwmChannel, ReprogramStrategy};
use dialdrive::{Error, InitError, ProgrammingError};

/// Timing with real-time waits shrunk so failure paths finish instantly.
/// The mock's `settle` is a no-op anyway; this keeps the appearance poll
/// iteration count small.
fn fast_timing() -> PwmTiming {
    PwmTiming {
        export_wait_ms: 10,
        export_poll_ms: 2,
        bringup_attempts: 3,
        settle_ms: 1,
    }
}

// ── open() ────────────────────────────────────────────────────

#[test]
fn open_brings_up_a_fresh_channel() {
    let mock = MockRegs::fresh();
    let ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    assert_eq!(ch.period_ns(), 20_000_000);
    assert_eq!(ch.duty_ns(), 10_000_000);
    assert!(ch.is_enabled());
    assert!(mock.enabled());
    assert_eq!(mock.period(), 20_000_000);
    assert_eq!(mock.duty(), 10_000_000);
}

#[test]
fn open_commits_duty_inside_the_band() {
    // Scenario from the datasheet bring-up: 20 ms period, 50 % duty.
    let mock = MockRegs::fresh();
    let ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();
    assert!(ch.duty_ns() >= 1_000_000);
    assert!(ch.duty_ns() <= 19_000_000);
}

#[test]
fn open_clamps_rail_fractions() {
    let mock = MockRegs::fresh();
    let ch = PwmChannel::open(mock.clone(), 20_000_000, 1.0, fast_timing()).unwrap();
    assert_eq!(ch.duty_ns(), 19_000_000);

    let mock = MockRegs::fresh();
    let ch = PwmChannel::open(mock.clone(), 20_000_000, 0.0, fast_timing()).unwrap();
    assert_eq!(ch.duty_ns(), 1_000_000);
}

#[test]
fn open_orders_writes_disable_prime_period_duty_enable() {
    let mock = MockRegs::fresh();
    let _ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    let ops = mock.ops();
    let off = ops.iter().position(|o| *o == RegOp::Enable(false)).unwrap();
    let prime = ops.iter().position(|o| *o == RegOp::Duty(1)).unwrap();
    let period = ops
        .iter()
        .position(|o| *o == RegOp::Period(20_000_000))
        .unwrap();
    let duty = ops
        .iter()
        .position(|o| *o == RegOp::Duty(10_000_000))
        .unwrap();
    let on = ops.iter().position(|o| *o == RegOp::Enable(true)).unwrap();
    assert!(off < prime && prime < period && period < duty && duty < on);
}

#[test]
fn open_retries_the_whole_sequence() {
    let mock = MockRegs::fresh();
    mock.fail_period_writes(1);
    let ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    assert!(ch.is_enabled());
    // Two full attempts ran: two period writes recorded.
    assert_eq!(mock.count(|o| matches!(o, RegOp::Period(_))), 2);
}

#[test]
fn open_reports_programming_error_after_all_attempts() {
    let mock = MockRegs::fresh();
    mock.fail_period_writes(usize::MAX);
    let err = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap_err();

    match err {
        Error::Programming(ProgrammingError::BringUp { attempts: 3, .. }) => {}
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(mock.count(|o| matches!(o, RegOp::Period(_))), 3);
    assert!(!mock.enabled());
}

#[test]
fn open_fails_when_export_never_appears() {
    let mock = MockRegs::never_appears();
    let err = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap_err();

    match err {
        Error::Init(InitError::ExportTimeout { waited_ms }) => assert_eq!(waited_ms, 10),
        other => panic!("unexpected error: {other}"),
    }
    // Nothing was programmed, nothing enabled.
    assert!(!mock.enabled());
    assert_eq!(mock.count(|o| matches!(o, RegOp::Enable(true))), 0);
}

#[test]
fn open_skips_export_when_surface_exists() {
    let mock = MockRegs::exported_with(0, 0, false);
    let _ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();
    assert_eq!(mock.count(|o| *o == RegOp::Export), 0);
}

// ── set_frequency() ───────────────────────────────────────────

#[test]
fn frequency_change_preserves_ratio_without_reset() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();
    let ratio_before = ch.duty_ratio();

    ch.set_frequency(50.0).unwrap();
    ch.set_frequency(100.0).unwrap();

    assert_eq!(ch.period_ns(), 10_000_000);
    assert!((ch.duty_ratio() - ratio_before).abs() / ratio_before < 0.01);
    // The fast paths sufficed: the output was never switched off after
    // bring-up (one disable total, from the bring-up itself).
    assert_eq!(mock.count(|o| *o == RegOp::Enable(false)), 1);
}

#[test]
fn frequency_change_falls_back_to_primed_order() {
    // 95 % duty at 20 ms = 19 ms; halving the period to 10 ms makes the
    // direct period write invalid, so the primed ordering must run.
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.95, fast_timing()).unwrap();
    assert_eq!(ch.duty_ns(), 19_000_000);

    ch.set_frequency(100.0).unwrap();

    assert_eq!(ch.period_ns(), 10_000_000);
    assert_eq!(ch.duty_ns(), 9_500_000);
    // Still no disable beyond bring-up, but a prime-to-1 happened after it.
    assert_eq!(mock.count(|o| *o == RegOp::Enable(false)), 1);
    assert!(mock.count(|o| *o == RegOp::Duty(1)) >= 2);
}

#[test]
fn frequency_change_full_reset_when_inplace_writes_rejected() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    // Driver refuses period changes while running: both in-place
    // strategies fail, the full reset must disable first.
    mock.reject_inplace_period();
    ch.set_frequency(100.0).unwrap();

    assert_eq!(ch.period_ns(), 10_000_000);
    assert!(ch.is_enabled());
    assert!(mock.enabled());
    assert!(mock.count(|o| *o == RegOp::Enable(false)) >= 2);
}

#[test]
fn frequency_change_reports_error_when_every_strategy_fails() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    mock.fail_period_writes(usize::MAX);
    let err = ch.set_frequency(100.0).unwrap_err();
    match err {
        Error::Programming(ProgrammingError::Reprogram { .. }) => {}
        other => panic!("unexpected error: {other}"),
    }
    // Committed state unchanged.
    assert_eq!(ch.period_ns(), 20_000_000);
}

#[test]
fn frequency_zero_is_rejected_up_front() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();
    let ops_before = mock.ops().len();

    assert!(ch.set_frequency(0.0).is_err());
    assert_eq!(mock.ops().len(), ops_before);
}

// ── Individual strategies ─────────────────────────────────────

#[test]
fn direct_strategy_enables_a_disabled_channel_first() {
    let mock = MockRegs::exported_with(20_000_000, 10_000_000, false);
    let mut handle = mock.clone();
    ReprogramStrategy::Direct
        .apply(&mut handle, &fast_timing(), 20_000_000, 10_000_000)
        .unwrap();

    let ops = mock.ops();
    assert_eq!(ops[0], RegOp::Enable(true));
}

#[test]
fn primed_order_strategy_never_lets_duty_exceed_period() {
    let mock = MockRegs::exported_with(20_000_000, 19_000_000, true);
    let mut handle = mock.clone();
    ReprogramStrategy::PrimedOrder
        .apply(&mut handle, &fast_timing(), 10_000_000, 9_500_000)
        .unwrap();

    assert_eq!(
        mock.ops(),
        vec![
            RegOp::Duty(1),
            RegOp::Period(10_000_000),
            RegOp::Duty(9_500_000)
        ]
    );
}

#[test]
fn full_reset_strategy_retries_a_failed_enable() {
    let mock = MockRegs::exported_with(20_000_000, 10_000_000, true);
    mock.fail_enable_writes(2); // the disable and the first re-enable
    let mut handle = mock.clone();
    ReprogramStrategy::FullReset
        .apply(&mut handle, &fast_timing(), 10_000_000, 5_000_000)
        .unwrap();

    assert!(mock.enabled());
    assert_eq!(mock.period(), 10_000_000);
    assert_eq!(mock.duty(), 5_000_000);
}

// ── set_duty() ────────────────────────────────────────────────

#[test]
fn duty_commits_strictly_inside_the_period() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    for fraction in [0.0, 0.03, 0.2, 0.5, 0.8, 0.97, 1.0] {
        ch.set_duty(fraction).unwrap();
        assert!(ch.duty_ns() > 0, "fraction {fraction}");
        assert!(ch.duty_ns() < ch.period_ns(), "fraction {fraction}");
        assert!(ch.duty_ns() >= 1_000_000, "fraction {fraction}");
        assert!(ch.duty_ns() <= 19_000_000, "fraction {fraction}");
    }
}

#[test]
fn rejected_duty_write_falls_back_through_disable_and_prime() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    mock.fail_duty_writes(1);
    ch.set_duty(0.25).unwrap();

    assert_eq!(ch.duty_ns(), 5_000_000);
    let ops = mock.ops();
    // Tail of the log: direct (failed), disable, prime, target, re-enable.
    let tail = &ops[ops.len() - 5..];
    assert_eq!(
        tail,
        &[
            RegOp::Duty(5_000_000),
            RegOp::Enable(false),
            RegOp::Duty(1),
            RegOp::Duty(5_000_000),
            RegOp::Enable(true)
        ]
    );
    assert!(mock.enabled());
}

#[test]
fn duty_fallback_restores_a_disabled_channel_to_disabled() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();
    // Channel switched off out-of-band (e.g. by a supervising process).
    {
        let mut handle = mock.clone();
        use dialdrive::pwm::PwmRegs;
        handle.write_enable(false).unwrap();
    }

    mock.fail_duty_writes(1);
    ch.set_duty(0.25).unwrap();

    // The fallback must not leave a previously-off output running.
    assert!(!mock.enabled());
}

#[test]
fn duty_failure_after_fallback_is_surfaced() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();
    let before = ch.duty_ns();

    mock.fail_duty_writes(usize::MAX);
    let err = ch.set_duty(0.25).unwrap_err();
    match err {
        Error::Programming(ProgrammingError::DutyWrite(_)) => {}
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ch.duty_ns(), before);
    // Enable state restored even though the write never stuck.
    assert!(mock.enabled());
}

// ── close() ───────────────────────────────────────────────────

#[test]
fn close_disables_and_unexports_once() {
    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    ch.close();
    ch.close();
    drop(ch);

    assert!(!mock.enabled());
    assert!(!mock.present());
    assert_eq!(mock.count(|o| *o == RegOp::Unexport), 1);
}

#[test]
fn drop_closes_the_channel() {
    let mock = MockRegs::fresh();
    {
        let _ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();
    }
    assert!(!mock.enabled());
    assert_eq!(mock.count(|o| *o == RegOp::Unexport), 1);
}

// ── embedded-hal interop ──────────────────────────────────────

#[test]
fn embedded_hal_duty_maps_through_the_band() {
    use embedded_hal::pwm::SetDutyCycle;

    let mock = MockRegs::fresh();
    let mut ch = PwmChannel::open(mock.clone(), 20_000_000, 0.5, fast_timing()).unwrap();

    ch.set_duty_cycle_fully_on().unwrap();
    assert_eq!(ch.duty_ns(), 19_000_000);
    ch.set_duty_cycle_fully_off().unwrap();
    assert_eq!(ch.duty_ns(), 1_000_000);
    ch.set_duty_cycle_percent(50).unwrap();
    assert!((ch.duty_ratio() - 0.5).abs() < 0.01);
}
