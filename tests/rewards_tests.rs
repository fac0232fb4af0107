use ethnum::{I256, U256};
use reward_controller::fixed_point::{self, WAD};
use reward_controller::rewards::{
    RewardCurve, RewardLedger, RewardParameter, ScaleTable, ROSTER_PAGE_SIZE,
};
use reward_controller::{Address, RewardError};

fn wad(x: u128) -> U256 {
    U256::new(x) * WAD
}

// ─── Test 1: Time reward is clamped at both ends ───────────────────────

#[test]
fn test_time_reward_bounds() {
    let curve = RewardCurve::default();
    let lo = curve.min_time_reward();
    let hi = curve.max_time_reward();
    assert_eq!(lo, WAD / 2);
    assert_eq!(hi, wad(5_000));

    assert_eq!(curve.calc_time_reward(U256::ZERO).unwrap(), lo);
    assert_eq!(curve.calc_time_reward(curve.min_ts).unwrap(), lo);
    assert_eq!(curve.calc_time_reward(curve.max_ts).unwrap(), hi);
    assert_eq!(curve.calc_time_reward(wad(1_000_000)).unwrap(), hi);
}

#[test]
fn test_time_reward_is_linear() {
    let curve = RewardCurve::default();
    let mid = (curve.min_ts + curve.max_ts) / 2;
    // lo + (hi - lo) / 2 = 0.5 + 2499.75
    assert_eq!(
        curve.calc_time_reward(mid).unwrap(),
        U256::new(2_500_250_000_000_000_000_000)
    );

    let mut prev = U256::ZERO;
    for secs in [1u128, 60, 600, 1_800, 3_600, 7_200] {
        let r = curve.calc_time_reward(wad(secs)).unwrap();
        assert!(r >= prev, "time reward fell at {}s", secs);
        prev = r;
    }
}

// ─── Test 2: Deviation reward follows the polynomial ───────────────────

#[test]
fn test_deviation_reward_bounds() {
    let curve = RewardCurve::default();
    assert_eq!(
        curve.calc_deviation_reward(U256::ZERO).unwrap(),
        curve.min_deviation_reward()
    );
    assert_eq!(
        curve.calc_deviation_reward(curve.min_deviation).unwrap(),
        curve.min_deviation_reward()
    );
    assert_eq!(
        curve.calc_deviation_reward(curve.max_deviation).unwrap(),
        curve.max_deviation_reward()
    );
    assert_eq!(
        curve.calc_deviation_reward(wad(100)).unwrap(),
        curve.max_deviation_reward()
    );
}

#[test]
fn test_deviation_reward_midpoint() {
    let curve = RewardCurve::default();
    // x = 0.5 on the normalized axis; 2.5x - 2x^2 + 0.5x^3 = 0.8125
    let deviation = curve.min_deviation + (curve.max_deviation - curve.min_deviation) / 2;
    let expected = curve.min_deviation_reward()
        + (curve.max_deviation_reward() - curve.min_deviation_reward()) * U256::new(8_125)
            / U256::new(10_000);
    assert_eq!(curve.calc_deviation_reward(deviation).unwrap(), expected);
    assert_eq!(expected, U256::new(4_062_593_750_000_000_000_000));
}

#[test]
fn test_deviation_shape_is_clamped() {
    // A polynomial that overshoots 1 on (0, 1) cannot pay more than the max.
    let curve = RewardCurve {
        coeff: vec![I256::ZERO, I256::new(4) * I256::new(1_000_000_000_000_000_000)],
        ..RewardCurve::default()
    };
    let deviation = curve.min_deviation + (curve.max_deviation - curve.min_deviation) / 2;
    assert_eq!(
        curve.calc_deviation_reward(deviation).unwrap(),
        curve.max_deviation_reward()
    );

    // And one that dips below 0 cannot pay less than the min.
    let curve = RewardCurve {
        coeff: vec![I256::new(-1_000_000_000_000_000_000)],
        ..RewardCurve::default()
    };
    assert_eq!(
        curve.calc_deviation_reward(deviation).unwrap(),
        curve.min_deviation_reward()
    );
}

// ─── Test 3: Combined reward spans [min_reward, max_reward] ────────────

#[test]
fn test_calc_reward_range() {
    let curve = RewardCurve::default();
    let tolerance = U256::new(1_000_000_000_000_000);

    let (t, d) = curve.calc_reward(U256::ZERO, U256::ZERO).unwrap();
    assert!(curve.min_reward - (t + d) <= tolerance);

    let (t, d) = curve.calc_reward(wad(10_000), wad(10)).unwrap();
    assert!(curve.max_reward - (t + d) <= tolerance);

    // Half of each span: the low ends of both curves still contribute.
    let (t, _) = curve
        .calc_reward((curve.min_ts + curve.max_ts) / 2, U256::ZERO)
        .unwrap();
    let half = (curve.max_time_reward() + curve.min_time_reward()) / 2;
    assert!(fixed_point::abs_diff(t, half) <= tolerance);
}

#[test]
fn test_elapsed_in_milliseconds() {
    let curve = RewardCurve::default();
    assert_eq!(curve.elapsed(5_000, 2_000).unwrap(), wad(3));
    assert_eq!(curve.elapsed(2_500, 2_000).unwrap(), WAD / 2);
    assert_eq!(curve.elapsed(1_000, 2_000).unwrap(), U256::ZERO);

    let seconds = RewardCurve {
        ts_units_per_second: 1,
        ..RewardCurve::default()
    };
    assert_eq!(seconds.elapsed(5_000, 2_000).unwrap(), wad(3_000));
}

// ─── Test 4: Parameter changes are validated before they land ──────────

#[test]
fn test_modify_parameter() {
    let mut curve = RewardCurve::default();
    curve
        .modify_parameter(RewardParameter::MaxReward(wad(20_000)))
        .unwrap();
    assert_eq!(curve.max_reward, wad(20_000));
    assert_eq!(curve.max_time_reward(), wad(10_000));

    let before = curve.clone();
    for bad in [
        RewardParameter::MinReward(wad(30_000)),
        RewardParameter::MinTs(curve.max_ts),
        RewardParameter::MaxDeviation(curve.min_deviation),
        RewardParameter::Coeff(Vec::new()),
        RewardParameter::TsUnitsPerSecond(0),
    ] {
        assert!(matches!(
            curve.modify_parameter(bad),
            Err(RewardError::InvalidParameter(_))
        ));
    }
    assert_eq!(curve, before);
}

// ─── Test 5: Scales ────────────────────────────────────────────────────

#[test]
fn test_scale_table() {
    let mut scales = ScaleTable::new();
    assert!(scales.is_empty());
    assert_eq!(
        scales.set_scale(1, U256::ZERO).unwrap_err(),
        RewardError::InvalidScale(1)
    );

    scales.set_scale(1, U256::new(10).pow(27)).unwrap();
    assert_eq!(scales.get(1), Some(U256::new(10).pow(27)));
    assert_eq!(scales.get(2), None);

    // 2 gwei apart at scale 1e27 is a 2.0 deviation, in either direction.
    let a = U256::new(20_000_000_000);
    let b = U256::new(22_000_000_000);
    assert_eq!(scales.calc_deviation(1, a, b).unwrap(), wad(2));
    assert_eq!(scales.calc_deviation(1, b, a).unwrap(), wad(2));
    assert_eq!(scales.calc_deviation(1, a, a).unwrap(), U256::ZERO);

    assert_eq!(
        scales.calc_deviation(2, a, b).unwrap_err(),
        RewardError::InvalidScale(2)
    );
}

#[test]
fn test_set_scales_all_or_nothing() {
    let mut scales = ScaleTable::new();
    scales.set_scale(1, WAD).unwrap();

    let err = scales
        .set_scales(&[(1, wad(2)), (10, U256::ZERO), (8453, wad(3))])
        .unwrap_err();
    assert_eq!(err, RewardError::InvalidScale(10));
    assert_eq!(scales.get(1), Some(WAD));
    assert_eq!(scales.len(), 1);

    scales.set_scales(&[(1, wad(2)), (8453, wad(3))]).unwrap();
    assert_eq!(
        scales.iter().collect::<Vec<_>>(),
        vec![(1, wad(2)), (8453, wad(3))]
    );
}

// ─── Test 6: Ledger ────────────────────────────────────────────────────

#[test]
fn test_ledger_totals() {
    let mut ledger = RewardLedger::new();
    let alice = Address::from_low_u64(0xa11ce);
    let bob = Address::from_low_u64(0xb0b);

    ledger.credit(alice, wad(3)).unwrap();
    ledger.credit(bob, wad(4)).unwrap();
    ledger.credit(alice, wad(5)).unwrap();

    assert_eq!(ledger.rewards(alice), wad(8));
    assert_eq!(ledger.rewards(bob), wad(4));
    assert_eq!(ledger.rewards(Address::ZERO), U256::ZERO);
    assert_eq!(ledger.total_rewards(), wad(12));
    assert_eq!(ledger.roster(), &[alice, bob]);
}

#[test]
fn test_ledger_overflow_leaves_state() {
    let mut ledger = RewardLedger::new();
    let alice = Address::from_low_u64(1);
    ledger.credit(alice, U256::MAX - U256::ONE).unwrap();

    assert_eq!(
        ledger.credit(Address::from_low_u64(2), wad(1)).unwrap_err(),
        RewardError::Overflow
    );
    assert_eq!(ledger.updater_count(), 1);
    assert_eq!(ledger.total_rewards(), U256::MAX - U256::ONE);
}

#[test]
fn test_roster_pages() {
    let mut ledger = RewardLedger::new();
    for i in 1..=15u64 {
        ledger.credit(Address::from_low_u64(i), WAD).unwrap();
    }
    assert_eq!(ledger.updaters(0).len(), 15);
    assert!(ledger.updaters(1).is_empty());

    for i in 16..=25u64 {
        ledger.credit(Address::from_low_u64(i), WAD).unwrap();
    }
    // Repeat credits do not duplicate roster entries.
    ledger.credit(Address::from_low_u64(3), WAD).unwrap();

    assert_eq!(ledger.updater_count(), 25);
    assert_eq!(ledger.updaters(0).len(), ROSTER_PAGE_SIZE);
    assert_eq!(ledger.updaters(0)[0], Address::from_low_u64(1));
    assert_eq!(ledger.updaters(1), &[
        Address::from_low_u64(21),
        Address::from_low_u64(22),
        Address::from_low_u64(23),
        Address::from_low_u64(24),
        Address::from_low_u64(25),
    ]);
    assert!(ledger.updaters(2).is_empty());
    assert!(ledger.updaters(usize::MAX).is_empty());

    let sum = ledger
        .roster()
        .iter()
        .fold(U256::ZERO, |acc, a| acc + ledger.rewards(*a));
    assert_eq!(sum, ledger.total_rewards());
}
