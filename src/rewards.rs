use std::collections::{BTreeMap, HashMap};

use ethnum::{I256, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::address::Address;
use crate::error::{Result, RewardError};
use crate::fixed_point::{self, decimal, decimal_vec, WAD, WAD_I};

/// Number of updaters returned per roster page.
pub const ROSTER_PAGE_SIZE: usize = 20;

// ═══════════════════════════════════════════════════════════════════════
// Reward curves
// ═══════════════════════════════════════════════════════════════════════

/// Staleness and deviation curves. Each curve pays between half the
/// minimum and half the maximum reward, so a submission earns between
/// `min_reward` and `max_reward` in total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardCurve {
    #[serde(with = "decimal")]
    pub min_reward: U256,
    #[serde(with = "decimal")]
    pub max_reward: U256,
    /// Staleness (WAD seconds) at or below which the time reward is floored
    #[serde(with = "decimal")]
    pub min_ts: U256,
    /// Staleness (WAD seconds) at or above which the time reward is capped
    #[serde(with = "decimal")]
    pub max_ts: U256,
    #[serde(with = "decimal")]
    pub min_deviation: U256,
    #[serde(with = "decimal")]
    pub max_deviation: U256,
    /// Deviation shape polynomial, lowest degree first, WAD-scaled. Its
    /// value at 0 and at 1 should be 0 and 1.
    #[serde(with = "decimal_vec")]
    pub coeff: Vec<I256>,
    /// Payload timestamp ticks per second (1000 for milliseconds)
    pub ts_units_per_second: u64,
}

impl Default for RewardCurve {
    fn default() -> Self {
        RewardCurve {
            min_reward: WAD,
            max_reward: U256::new(10_000) * WAD,
            min_ts: WAD,
            max_ts: U256::new(7_200) * WAD,
            min_deviation: WAD / U256::new(10),
            max_deviation: U256::new(3) * WAD,
            // 2.5x - 2x^2 + 0.5x^3
            coeff: vec![
                I256::ZERO,
                I256::new(2_500_000_000_000_000_000),
                I256::new(-2_000_000_000_000_000_000),
                I256::new(500_000_000_000_000_000),
            ],
            ts_units_per_second: 1_000,
        }
    }
}

/// A settable reward-curve parameter with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewardParameter {
    MinReward(U256),
    MaxReward(U256),
    MinTs(U256),
    MaxTs(U256),
    MinDeviation(U256),
    MaxDeviation(U256),
    Coeff(Vec<I256>),
    TsUnitsPerSecond(u64),
}

impl RewardCurve {
    pub fn validate(&self) -> Result<()> {
        if self.min_reward > self.max_reward {
            return Err(RewardError::InvalidParameter(format!(
                "min_reward {} exceeds max_reward {}",
                self.min_reward, self.max_reward
            )));
        }
        if self.min_ts >= self.max_ts {
            return Err(RewardError::InvalidParameter(format!(
                "min_ts {} must be below max_ts {}",
                self.min_ts, self.max_ts
            )));
        }
        if self.min_deviation >= self.max_deviation {
            return Err(RewardError::InvalidParameter(format!(
                "min_deviation {} must be below max_deviation {}",
                self.min_deviation, self.max_deviation
            )));
        }
        if self.coeff.is_empty() {
            return Err(RewardError::InvalidParameter(
                "deviation polynomial has no coefficients".to_string(),
            ));
        }
        if self.ts_units_per_second == 0 {
            return Err(RewardError::InvalidParameter(
                "ts_units_per_second must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply one parameter; the curve is left untouched if the result
    /// would be invalid.
    pub fn modify_parameter(&mut self, param: RewardParameter) -> Result<()> {
        let mut next = self.clone();
        match param {
            RewardParameter::MinReward(v) => next.min_reward = v,
            RewardParameter::MaxReward(v) => next.max_reward = v,
            RewardParameter::MinTs(v) => next.min_ts = v,
            RewardParameter::MaxTs(v) => next.max_ts = v,
            RewardParameter::MinDeviation(v) => next.min_deviation = v,
            RewardParameter::MaxDeviation(v) => next.max_deviation = v,
            RewardParameter::Coeff(v) => next.coeff = v,
            RewardParameter::TsUnitsPerSecond(v) => next.ts_units_per_second = v,
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    pub fn min_time_reward(&self) -> U256 {
        self.min_reward / U256::new(2)
    }

    pub fn max_time_reward(&self) -> U256 {
        self.max_reward / U256::new(2)
    }

    pub fn min_deviation_reward(&self) -> U256 {
        self.min_reward / U256::new(2)
    }

    pub fn max_deviation_reward(&self) -> U256 {
        self.max_reward / U256::new(2)
    }

    /// Staleness in WAD seconds between two payload timestamps.
    pub fn elapsed(&self, ts_new: u64, ts_old: u64) -> Result<U256> {
        let ticks = U256::from(ts_new.saturating_sub(ts_old));
        fixed_point::mul_div(ticks, WAD, U256::from(self.ts_units_per_second))
    }

    /// Linear in `elapsed` between `min_ts` and `max_ts`, clamped.
    pub fn calc_time_reward(&self, elapsed: U256) -> Result<U256> {
        let (lo, hi) = (self.min_time_reward(), self.max_time_reward());
        if elapsed <= self.min_ts {
            return Ok(lo);
        }
        if elapsed >= self.max_ts {
            return Ok(hi);
        }
        let span = fixed_point::mul_div(hi - lo, elapsed - self.min_ts, self.max_ts - self.min_ts)?;
        fixed_point::add(lo, span)
    }

    /// Polynomial shape of the normalized deviation, clamped.
    pub fn calc_deviation_reward(&self, deviation: U256) -> Result<U256> {
        let (lo, hi) = (self.min_deviation_reward(), self.max_deviation_reward());
        if deviation <= self.min_deviation {
            return Ok(lo);
        }
        if deviation >= self.max_deviation {
            return Ok(hi);
        }

        let x = fixed_point::mul_div(
            deviation - self.min_deviation,
            WAD,
            self.max_deviation - self.min_deviation,
        )?;
        let x = fixed_point::to_signed(x)?;

        // Horner, highest degree first.
        let mut shape = I256::ZERO;
        for c in self.coeff.iter().rev() {
            shape = fixed_point::add_signed(fixed_point::mul_div_signed(shape, x, WAD_I)?, *c)?;
        }
        let shape = shape.clamp(I256::ZERO, WAD_I).as_u256();

        let span = fixed_point::mul_div(hi - lo, shape, WAD)?;
        fixed_point::add(lo, span)
    }

    /// `(time_reward, deviation_reward)`; callers sum them.
    pub fn calc_reward(&self, elapsed: U256, deviation: U256) -> Result<(U256, U256)> {
        Ok((
            self.calc_time_reward(elapsed)?,
            self.calc_deviation_reward(deviation)?,
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Per-chain scales
// ═══════════════════════════════════════════════════════════════════════

/// Chain id → positive scale that brings price differences of different
/// chains onto a common WAD deviation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaleTable {
    scales: BTreeMap<u64, U256>,
}

impl ScaleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scale(&mut self, chain_id: u64, scale: U256) -> Result<()> {
        if scale == U256::ZERO {
            return Err(RewardError::InvalidScale(chain_id));
        }
        self.scales.insert(chain_id, scale);
        info!(chain_id, %scale, "scale set");
        Ok(())
    }

    /// Overlay several scales. Nothing is written if any of them is zero.
    pub fn set_scales(&mut self, scales: &[(u64, U256)]) -> Result<()> {
        if let Some((chain_id, _)) = scales.iter().find(|(_, s)| *s == U256::ZERO) {
            return Err(RewardError::InvalidScale(*chain_id));
        }
        for &(chain_id, scale) in scales {
            self.set_scale(chain_id, scale)?;
        }
        Ok(())
    }

    pub fn get(&self, chain_id: u64) -> Option<U256> {
        self.scales.get(&chain_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, U256)> + '_ {
        self.scales.iter().map(|(c, s)| (*c, *s))
    }

    pub fn len(&self) -> usize {
        self.scales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scales.is_empty()
    }

    /// `|new - old| * scale / WAD`. Fails for a chain without a scale.
    pub fn calc_deviation(&self, chain_id: u64, new_value: U256, old_value: U256) -> Result<U256> {
        let scale = self
            .get(chain_id)
            .filter(|s| *s != U256::ZERO)
            .ok_or(RewardError::InvalidScale(chain_id))?;
        fixed_point::mul_div(fixed_point::abs_diff(new_value, old_value), scale, WAD)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Ledger
// ═══════════════════════════════════════════════════════════════════════

/// Accumulated rewards per updater. `total_rewards` always equals the sum
/// of every balance, and the roster lists each updater once in order of
/// first credit.
#[derive(Debug, Clone, Default)]
pub struct RewardLedger {
    rewards: HashMap<Address, U256>,
    total_rewards: U256,
    roster: Vec<Address>,
}

impl RewardLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&mut self, updater: Address, amount: U256) -> Result<()> {
        let balance = fixed_point::add(self.rewards(updater), amount)?;
        let total = fixed_point::add(self.total_rewards, amount)?;

        if !self.rewards.contains_key(&updater) {
            self.roster.push(updater);
        }
        self.rewards.insert(updater, balance);
        self.total_rewards = total;
        Ok(())
    }

    pub fn rewards(&self, updater: Address) -> U256 {
        self.rewards.get(&updater).copied().unwrap_or(U256::ZERO)
    }

    pub fn total_rewards(&self) -> U256 {
        self.total_rewards
    }

    /// One page of the roster; pages past the end are empty.
    pub fn updaters(&self, page: usize) -> &[Address] {
        let start = page.saturating_mul(ROSTER_PAGE_SIZE);
        if start >= self.roster.len() {
            return &[];
        }
        let end = (start + ROSTER_PAGE_SIZE).min(self.roster.len());
        &self.roster[start..end]
    }

    pub fn updater_count(&self) -> usize {
        self.roster.len()
    }

    pub fn roster(&self) -> &[Address] {
        &self.roster
    }
}
