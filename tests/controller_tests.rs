use ethnum::{I256, U256};
use reward_controller::controller::{
    self, Controller, ControllerConfig, ControllerParameter, IntegralAction,
};
use reward_controller::fixed_point::{RAY, WAD_I};
use reward_controller::RewardError;

fn wad(x: i128) -> I256 {
    I256::new(x) * WAD_I
}

/// Gains with a 1% per hour integral leak and an asymmetric output range.
fn leaky_config() -> ControllerConfig {
    ControllerConfig {
        kp: I256::new(222_002_205_862),
        ki: WAD_I,
        co_bias: I256::ZERO,
        output_upper_bound: I256::new(18_640_000_000_000_000_000),
        output_lower_bound: I256::new(-51_034_000_000_000_000_000),
        per_second_integral_leak: U256::new(999_997_208_243_937_652_252_849_536),
    }
}

/// Integral-only controller with no leak and bounds at ±10.
fn integral_only(ki: I256) -> ControllerConfig {
    ControllerConfig {
        kp: I256::ZERO,
        ki,
        co_bias: I256::ZERO,
        output_upper_bound: wad(10),
        output_lower_bound: wad(-10),
        per_second_integral_leak: RAY,
    }
}

/// No leak, effectively unbounded output, negligible integral gain.
fn wide_config() -> ControllerConfig {
    ControllerConfig {
        kp: I256::ZERO,
        ki: I256::ONE,
        co_bias: I256::ZERO,
        output_upper_bound: wad(1_000_000_000),
        output_lower_bound: wad(-1_000_000_000),
        per_second_integral_leak: RAY,
    }
}

// ─── Test 1: Fresh controller has empty state ──────────────────────────

#[test]
fn test_fresh_state() {
    let ctrl = Controller::new(ControllerConfig::default()).unwrap();
    assert_eq!(ctrl.error_integral(), I256::ZERO);
    assert_eq!(ctrl.last_error(), I256::ZERO);
    assert_eq!(ctrl.last_update_time(), 0);
    assert_eq!(ctrl.elapsed(1_000), 0);
    assert_eq!(ctrl.kp(), wad(-2));
    assert_eq!(ctrl.ki(), I256::new(-100_000_000_000_000_000));
    assert_eq!(ctrl.per_second_integral_leak(), RAY);
}

// ─── Test 2: Zero error returns the bias ───────────────────────────────

#[test]
fn test_raw_output_zero_error() {
    let ctrl = Controller::new(ControllerConfig::default()).unwrap();
    let out = ctrl.get_raw_output(I256::ZERO, I256::ZERO).unwrap();
    assert_eq!(out.output, WAD_I);
    assert_eq!(out.p_term, I256::ZERO);
    assert_eq!(out.i_term, I256::ZERO);
}

// ─── Test 3: Proportional term is kp * error / WAD ─────────────────────

#[test]
fn test_raw_output_proportional() {
    let ctrl = Controller::new(leaky_config()).unwrap();
    let error = I256::new(100_000_000_000_000_000_000);
    let out = ctrl.get_raw_output(error, I256::ZERO).unwrap();
    assert_eq!(out.p_term, I256::new(222_002_205_862) * I256::new(100));
    assert_eq!(out.i_term, I256::ZERO);
    assert_eq!(out.output, out.p_term);
}

// ─── Test 4: First update with a measured overshoot ────────────────────

#[test]
fn test_first_positive_error() {
    let mut ctrl = Controller::new(leaky_config()).unwrap();

    // -5% relative error expressed in RAY
    let error = I256::new(-50_000_000_000_000_000_000_000_000);

    let expected = I256::new(222_002_205_862) * I256::new(-50_000_000);
    let preview = ctrl.get_new_pi_output(error, 1_700_000_000).unwrap();
    assert_eq!(preview.output, expected);
    assert_eq!(preview.i_term, I256::ZERO);

    let out = ctrl.update(error, 1_700_000_000).unwrap();
    assert_eq!(out, preview);

    let last = ctrl.last_update();
    assert_eq!(last.time, 1_700_000_000);
    assert_eq!(last.output, expected);
    assert_eq!(last.p_term, expected);
    assert_eq!(last.i_term, I256::ZERO);
    assert_eq!(ctrl.last_output(), expected);
    assert_eq!(ctrl.last_update_time(), 1_700_000_000);
    assert_eq!(ctrl.error_integral(), I256::ZERO);
    assert_eq!(ctrl.last_error(), I256::new(-50_000_000_000_000_000_000_000_000));
}

// ─── Test 5: First update never integrates ─────────────────────────────

#[test]
fn test_first_update_keeps_integral_zero() {
    for error in [I256::ZERO, I256::ONE, wad(-3), wad(7)] {
        let mut ctrl = Controller::new(wide_config()).unwrap();
        ctrl.update(error, 1_000).unwrap();
        assert_eq!(ctrl.error_integral(), I256::ZERO);
        assert_eq!(ctrl.last_error(), error);
        assert_eq!(ctrl.last_update_time(), 1_000);
    }
}

// ─── Test 6: Zero gains output the bias ────────────────────────────────

#[test]
fn test_zero_gains() {
    let config = ControllerConfig {
        kp: I256::ZERO,
        ki: I256::ZERO,
        ..ControllerConfig::default()
    };
    let mut ctrl = Controller::new(config).unwrap();
    for (i, error) in [wad(1), wad(-1), wad(5)].into_iter().enumerate() {
        let out = ctrl.update(error, 100 + 10 * i as u64).unwrap();
        assert_eq!(out.output, WAD_I);
    }
}

// ─── Test 7: Constant error integrates linearly without leak ───────────

#[test]
fn test_linear_integral_growth() {
    let mut ctrl = Controller::new(wide_config()).unwrap();
    let error = I256::new(10_000_000_000_000_000);
    let elapsed = 10u64;

    ctrl.update(error, 100).unwrap();
    for n in 1..=5u64 {
        ctrl.update(error, 100 + n * elapsed).unwrap();
        let expected = error * I256::new((n * (elapsed + 1)) as i128);
        assert_eq!(ctrl.error_integral(), expected, "after {} updates", n);
    }
}

// ─── Test 8: Trapezoid uses the mean of both errors ────────────────────

#[test]
fn test_trapezoid_area() {
    let mut ctrl = Controller::new(wide_config()).unwrap();
    ctrl.update(wad(1), 100).unwrap();

    let (integral, area) = ctrl.get_new_error_integral(wad(3), 104).unwrap();
    // (1 + 3) / 2 * (4 + 1)
    assert_eq!(area, wad(10));
    assert_eq!(integral, wad(10));
}

// ─── Test 9: Equal timestamps add no area ──────────────────────────────

#[test]
fn test_zero_elapsed_is_noop() {
    let mut ctrl = Controller::new(wide_config()).unwrap();
    ctrl.update(wad(1), 100).unwrap();
    ctrl.update(wad(1), 110).unwrap();
    let before = ctrl.error_integral();

    let (integral, area) = ctrl.get_new_error_integral(wad(5), 110).unwrap();
    assert_eq!(area, I256::ZERO);
    assert_eq!(integral, before);

    ctrl.update(wad(5), 110).unwrap();
    assert_eq!(ctrl.error_integral(), before);
    assert_eq!(ctrl.last_error(), wad(5));
}

// ─── Test 10: Leak decays the integral ─────────────────────────────────

#[test]
fn test_leak_decays_integral() {
    let mut ctrl = Controller::new(leaky_config()).unwrap();
    ctrl.update(wad(1), 1_000).unwrap();
    ctrl.update(wad(1), 1_010).unwrap();
    let integral = ctrl.error_integral();
    assert_eq!(integral, wad(11));

    // An error of -1 cancels the new area, leaving only the leaked integral.
    let (leaked, area) = ctrl.get_new_error_integral(wad(-1), 1_010 + 3_600).unwrap();
    assert_eq!(area, I256::ZERO);
    assert!(leaked < integral);
    assert!(leaked * I256::new(100) > integral * I256::new(98), "leaked {}", leaked);
}

// ─── Test 11: Anti-windup stops growth at the upper bound ──────────────

#[test]
fn test_anti_windup_upper() {
    let mut ctrl = Controller::new(integral_only(WAD_I)).unwrap();

    ctrl.update(wad(1), 1).unwrap();
    ctrl.update(wad(1), 5).unwrap();
    assert_eq!(ctrl.error_integral(), wad(5));

    // Exactly at the bound is not saturation.
    let out = ctrl.update(wad(1), 9).unwrap();
    assert_eq!(ctrl.error_integral(), wad(10));
    assert_eq!(out.output, wad(10));

    // Pushing past it: the new area is dropped.
    let out = ctrl.update(wad(1), 13).unwrap();
    assert_eq!(out.output, wad(10));
    assert_eq!(ctrl.error_integral(), wad(10));
    let out = ctrl.update(wad(1), 17).unwrap();
    assert_eq!(out.output, wad(10));
    assert_eq!(ctrl.error_integral(), wad(10));

    // Reversed error: accumulation resumes.
    ctrl.update(wad(-1), 21).unwrap();
    assert_eq!(ctrl.error_integral(), wad(10));
    let out = ctrl.update(wad(-1), 25).unwrap();
    assert_eq!(ctrl.error_integral(), wad(5));
    assert_eq!(out.output, wad(5));
}

// ─── Test 12: Anti-windup with a negative integral gain ────────────────

#[test]
fn test_anti_windup_lower() {
    let mut ctrl = Controller::new(integral_only(-WAD_I)).unwrap();

    ctrl.update(wad(1), 1).unwrap();
    ctrl.update(wad(1), 5).unwrap();
    ctrl.update(wad(1), 9).unwrap();
    assert_eq!(ctrl.last_output(), wad(-10));
    assert_eq!(ctrl.error_integral(), wad(10));

    let out = ctrl.update(wad(1), 13).unwrap();
    assert_eq!(out.output, wad(-10));
    assert_eq!(out.i_term, wad(-15));
    assert_eq!(ctrl.error_integral(), wad(10));
}

#[test]
fn test_lower_clamp_then_resume() {
    let config = ControllerConfig {
        kp: I256::new(225_000_000_000),
        ki: I256::new(72_000),
        co_bias: I256::ZERO,
        output_upper_bound: I256::new(18_640_000_000_000_000_000),
        output_lower_bound: I256::new(-51_034_000_000_000_000_000),
        per_second_integral_leak: RAY,
    };
    let mut ctrl = Controller::new(config).unwrap();
    let small = I256::new(-10_000_000_000_000_000_000_000_000);
    let huge = I256::new(-600_000_000_000_000_000_000_000_000);

    // Two small errors an hour apart stay inside the band.
    let o1 = ctrl.update(small, 1_000).unwrap();
    let o2 = ctrl.update(small, 4_600).unwrap();
    let held = ctrl.error_integral();
    assert_eq!(held, I256::new(-36_010_000_000_000_000_000_000_000_000));
    assert!(o2.output < o1.output);
    assert!(o2.output > ctrl.output_lower_bound());

    // A huge error pins the output and the integral is held.
    let o3 = ctrl.update(huge, 8_200).unwrap();
    assert_eq!(o3.output, ctrl.output_lower_bound());
    assert_eq!(ctrl.error_integral(), held);

    // Back to a small error: the output leaves the bound and the
    // integral accumulates again.
    let o4 = ctrl.update(small, 11_800).unwrap();
    assert_eq!(o4.output, I256::new(-2_331_670_680_000_000_000));
    assert!(o4.output > ctrl.output_lower_bound());
    assert_eq!(
        ctrl.error_integral(),
        I256::new(-1_134_315_000_000_000_000_000_000_000_000)
    );
    assert!(ctrl.error_integral() < held);
}

// ─── Test 13: Integral decision table ──────────────────────────────────

#[test]
fn test_integral_action_table() {
    let (lower, upper) = (I256::ZERO, I256::new(10));
    let one = I256::ONE;
    let decide = |raw: i128, ki: I256, area: i128| {
        IntegralAction::decide(I256::new(raw), lower, upper, ki, I256::new(area))
    };

    assert_eq!(decide(5, one, 1), IntegralAction::Accumulate);
    assert_eq!(decide(5, one, -1), IntegralAction::Accumulate);
    assert_eq!(decide(11, one, 1), IntegralAction::SuppressUpper);
    assert_eq!(decide(11, one, -1), IntegralAction::Unwind);
    assert_eq!(decide(-1, one, -1), IntegralAction::SuppressLower);
    assert_eq!(decide(-1, one, 1), IntegralAction::Unwind);
    assert_eq!(decide(11, -one, -1), IntegralAction::SuppressUpper);
    assert_eq!(decide(-1, -one, 1), IntegralAction::SuppressLower);
    assert_eq!(decide(11, one, 0), IntegralAction::Accumulate);
    assert_eq!(decide(11, I256::ZERO, 1), IntegralAction::Accumulate);

    assert!(IntegralAction::SuppressUpper.suppresses());
    assert!(IntegralAction::SuppressLower.suppresses());
    assert!(!IntegralAction::Unwind.suppresses());
    assert!(!IntegralAction::Accumulate.suppresses());
}

// ─── Test 14: Output is always within bounds ───────────────────────────

#[test]
fn test_bound_output() {
    let ctrl = Controller::new(ControllerConfig::default()).unwrap();
    assert_eq!(ctrl.bound_output(wad(50)), wad(10));
    assert_eq!(ctrl.bound_output(wad(-50)), I256::new(1_000_000_000_000_000));
    assert_eq!(ctrl.bound_output(wad(2)), wad(2));
}

// ─── Test 15: Time must not go backwards ───────────────────────────────

#[test]
fn test_non_monotonic_time() {
    let mut ctrl = Controller::new(wide_config()).unwrap();
    ctrl.update(wad(1), 100).unwrap();
    ctrl.update(wad(1), 110).unwrap();
    let integral = ctrl.error_integral();

    let err = ctrl.update(wad(2), 50).unwrap_err();
    assert_eq!(err, RewardError::NonMonotonicTime { last: 110, now: 50 });
    assert_eq!(ctrl.error_integral(), integral);
    assert_eq!(ctrl.last_error(), wad(1));
    assert_eq!(ctrl.last_update_time(), 110);
}

// ─── Test 16: Preview does not change state ────────────────────────────

#[test]
fn test_preview_is_pure() {
    let mut ctrl = Controller::new(ControllerConfig::default()).unwrap();
    ctrl.update(wad(1), 100).unwrap();
    let before = (ctrl.error_integral(), ctrl.last_error(), ctrl.last_update_time());

    let preview = ctrl.get_new_pi_output(wad(-1), 500).unwrap();
    assert_eq!(
        (ctrl.error_integral(), ctrl.last_error(), ctrl.last_update_time()),
        before
    );
    assert_eq!(ctrl.update(wad(-1), 500).unwrap(), preview);
}

// ─── Test 17: Parameter validation ─────────────────────────────────────

#[test]
fn test_modify_parameters() {
    let mut ctrl = Controller::new(ControllerConfig::default()).unwrap();

    ctrl.modify_parameter(ControllerParameter::Kp(wad(-3))).unwrap();
    ctrl.modify_parameter(ControllerParameter::Ki(wad(-1))).unwrap();
    ctrl.modify_parameter(ControllerParameter::CoBias(wad(2))).unwrap();
    ctrl.modify_parameter(ControllerParameter::OutputUpperBound(wad(20))).unwrap();
    ctrl.modify_parameter(ControllerParameter::OutputLowerBound(wad(-20))).unwrap();
    ctrl.modify_parameter(ControllerParameter::PerSecondIntegralLeak(RAY - U256::ONE))
        .unwrap();
    assert_eq!(ctrl.kp(), wad(-3));
    assert_eq!(ctrl.ki(), wad(-1));
    assert_eq!(ctrl.co_bias(), wad(2));
    assert_eq!(ctrl.output_upper_bound(), wad(20));
    assert_eq!(ctrl.output_lower_bound(), wad(-20));
    assert_eq!(ctrl.per_second_integral_leak(), RAY - U256::ONE);
}

#[test]
fn test_modify_parameters_rejects_invalid() {
    let mut ctrl = Controller::new(ControllerConfig::default()).unwrap();

    let bad = [
        ControllerParameter::OutputUpperBound(I256::ZERO),
        ControllerParameter::OutputLowerBound(wad(11)),
        ControllerParameter::PerSecondIntegralLeak(U256::ZERO),
        ControllerParameter::PerSecondIntegralLeak(RAY + U256::ONE),
    ];
    for param in bad {
        let err = ctrl.modify_parameter(param).unwrap_err();
        assert!(matches!(err, RewardError::InvalidParameter(_)), "{:?}", param);
    }
    assert_eq!(ctrl.config(), &ControllerConfig::default());
}

#[test]
fn test_invalid_config_rejected() {
    let config = ControllerConfig {
        output_upper_bound: wad(-1),
        ..ControllerConfig::default()
    };
    assert!(matches!(
        Controller::new(config),
        Err(RewardError::InvalidParameter(_))
    ));
}

// ─── Test 18: Relative error helper ────────────────────────────────────

#[test]
fn test_error_helper() {
    let target = wad(1_800);
    assert_eq!(
        controller::error(target, wad(100)).unwrap(),
        I256::new(944_444_444_444_444_444)
    );
    assert_eq!(controller::error(target, target).unwrap(), I256::ZERO);
    assert_eq!(controller::error(target, wad(3_600)).unwrap(), wad(-1));
    assert_eq!(
        controller::error(I256::ZERO, wad(1)).unwrap_err(),
        RewardError::DivisionByZero
    );
}

// ─── Test 19: Slow updates raise the deployed controller's output ──────

#[test]
fn test_deployed_gains_direction() {
    let mut ctrl = Controller::new(ControllerConfig::default()).unwrap();

    // Updates arrive every hour against a 30 minute target.
    let error = controller::error(wad(1_800), wad(3_600)).unwrap();
    let out = ctrl.update(error, 1_000).unwrap();
    assert!(out.output > WAD_I, "output {}", out.output);

    // Updates arrive every minute.
    let mut ctrl = Controller::new(ControllerConfig::default()).unwrap();
    let error = controller::error(wad(1_800), wad(60)).unwrap();
    let out = ctrl.update(error, 1_000).unwrap();
    assert_eq!(out.output, ctrl.output_lower_bound());
}
