//! Anti-windup PI controller with a leaky, time-weighted error integral.
//!
//! The controller turns an externally measured error (signed WAD) into a
//! bounded output. Time is supplied by the caller on every call and must
//! never go backwards.
//!
//! - P term: `kp * error / WAD`
//! - I term: `ki * error_integral / WAD`, where the integral decays by
//!   `per_second_integral_leak` (RAY) per second and grows by the
//!   trapezoidal area `(last_error + error) / 2 * (elapsed + 1)`
//! - Anti-windup: while the output is pinned at a bound, area pushing
//!   further into that bound is not committed
use ethnum::{I256, U256};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, RewardError};
use crate::fixed_point::{self, decimal, RAY, RAY_I, WAD_I};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Proportional gain (WAD)
    #[serde(with = "decimal")]
    pub kp: I256,
    /// Integral gain (WAD)
    #[serde(with = "decimal")]
    pub ki: I256,
    /// Output when both terms are zero
    #[serde(with = "decimal")]
    pub co_bias: I256,
    #[serde(with = "decimal")]
    pub output_upper_bound: I256,
    #[serde(with = "decimal")]
    pub output_lower_bound: I256,
    /// Per-second integral retention (RAY); `1 RAY` means no decay.
    #[serde(with = "decimal")]
    pub per_second_integral_leak: U256,
}

impl Default for ControllerConfig {
    /// Gains of the deployed incentive controller: output is a reward
    /// multiplier in `[0.001, 10]` centred on `1.0`.
    fn default() -> Self {
        ControllerConfig {
            kp: I256::new(-2_000_000_000_000_000_000),
            ki: I256::new(-100_000_000_000_000_000),
            co_bias: WAD_I,
            output_upper_bound: I256::new(10_000_000_000_000_000_000),
            output_lower_bound: I256::new(1_000_000_000_000_000),
            per_second_integral_leak: RAY,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_upper_bound < self.output_lower_bound {
            return Err(RewardError::InvalidParameter(format!(
                "output_upper_bound {} is below output_lower_bound {}",
                self.output_upper_bound, self.output_lower_bound
            )));
        }
        check_leak(self.per_second_integral_leak)
    }
}

fn check_leak(leak: U256) -> Result<()> {
    if leak == U256::ZERO || leak > RAY {
        return Err(RewardError::InvalidParameter(format!(
            "per_second_integral_leak {} must be in (0, 1 RAY]",
            leak
        )));
    }
    Ok(())
}

/// A settable controller parameter with its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerParameter {
    Kp(I256),
    Ki(I256),
    CoBias(I256),
    OutputUpperBound(I256),
    OutputLowerBound(I256),
    PerSecondIntegralLeak(U256),
}

/// Output of one controller evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PiOutput {
    pub output: I256,
    pub p_term: I256,
    pub i_term: I256,
}

/// Record of the last committed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LastUpdate {
    pub time: u64,
    pub output: I256,
    pub p_term: I256,
    pub i_term: I256,
}

/// What happens to the freshly integrated area.
///
/// | raw output     | area pushes output | action          |
/// |----------------|--------------------|-----------------|
/// | within bounds  | any                | `Accumulate`    |
/// | above upper    | up                 | `SuppressUpper` |
/// | below lower    | down               | `SuppressLower` |
/// | above / below  | back inside        | `Unwind`        |
/// | any            | nowhere (zero)     | `Accumulate`    |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegralAction {
    Accumulate,
    SuppressUpper,
    SuppressLower,
    Unwind,
}

impl IntegralAction {
    pub fn decide(raw_output: I256, lower: I256, upper: I256, ki: I256, new_area: I256) -> Self {
        // Direction the area moves the output in: sign(ki * area).
        let push = ki.signum() * new_area.signum();
        if push == I256::ZERO {
            return IntegralAction::Accumulate;
        }
        if raw_output > upper {
            if push > I256::ZERO {
                IntegralAction::SuppressUpper
            } else {
                IntegralAction::Unwind
            }
        } else if raw_output < lower {
            if push < I256::ZERO {
                IntegralAction::SuppressLower
            } else {
                IntegralAction::Unwind
            }
        } else {
            IntegralAction::Accumulate
        }
    }

    pub fn suppresses(self) -> bool {
        matches!(
            self,
            IntegralAction::SuppressUpper | IntegralAction::SuppressLower
        )
    }
}

#[derive(Debug, Clone)]
pub struct Controller {
    config: ControllerConfig,
    error_integral: I256,
    last_error: I256,
    /// Zero until the first update.
    last_update_time: u64,
    last_update: LastUpdate,
}

/// Result of evaluating an error without committing it.
struct Step {
    output: PiOutput,
    integral: I256,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Controller {
            config,
            error_integral: I256::ZERO,
            last_error: I256::ZERO,
            last_update_time: 0,
            last_update: LastUpdate::default(),
        })
    }

    /// Unbounded `co_bias + p + i` for a given error and integral.
    pub fn get_raw_output(&self, error: I256, error_integral: I256) -> Result<PiOutput> {
        let p_term = fixed_point::mul_div_signed(self.config.kp, error, WAD_I)?;
        let i_term = fixed_point::mul_div_signed(self.config.ki, error_integral, WAD_I)?;
        let output =
            fixed_point::add_signed(fixed_point::add_signed(self.config.co_bias, p_term)?, i_term)?;
        Ok(PiOutput {
            output,
            p_term,
            i_term,
        })
    }

    pub fn bound_output(&self, output: I256) -> I256 {
        output.clamp(self.config.output_lower_bound, self.config.output_upper_bound)
    }

    /// Seconds since the last update, zero before the first one.
    pub fn elapsed(&self, now: u64) -> u64 {
        if self.last_update_time == 0 {
            return 0;
        }
        now.saturating_sub(self.last_update_time)
    }

    fn check_time(&self, now: u64) -> Result<()> {
        if now < self.last_update_time {
            return Err(RewardError::NonMonotonicTime {
                last: self.last_update_time,
                now,
            });
        }
        Ok(())
    }

    /// Leaked integral plus the new trapezoidal area, and the area alone.
    ///
    /// The first update and zero elapsed time contribute nothing.
    pub fn get_new_error_integral(&self, error: I256, now: u64) -> Result<(I256, I256)> {
        self.check_time(now)?;
        let elapsed = self.elapsed(now);
        if elapsed == 0 {
            return Ok((self.error_integral, I256::ZERO));
        }

        let decay = fixed_point::rpow(self.config.per_second_integral_leak, elapsed, RAY)?;
        let leaked = fixed_point::mul_div_signed(
            fixed_point::to_signed(decay)?,
            self.error_integral,
            RAY_I,
        )?;

        // Both interval endpoints count as ticks, hence elapsed + 1.
        let ticks = I256::new(elapsed as i128 + 1);
        let half_sum = fixed_point::add_signed(self.last_error, error)? / I256::new(2);
        let new_area = half_sum.checked_mul(ticks).ok_or(RewardError::Overflow)?;

        Ok((fixed_point::add_signed(leaked, new_area)?, new_area))
    }

    fn step(&self, error: I256, now: u64) -> Result<Step> {
        let (new_integral, new_area) = self.get_new_error_integral(error, now)?;
        let raw = self.get_raw_output(error, new_integral)?;

        let action = IntegralAction::decide(
            raw.output,
            self.config.output_lower_bound,
            self.config.output_upper_bound,
            self.config.ki,
            new_area,
        );
        let integral = if action.suppresses() {
            fixed_point::sub_signed(new_integral, new_area)?
        } else {
            new_integral
        };

        Ok(Step {
            output: PiOutput {
                output: self.bound_output(raw.output),
                ..raw
            },
            integral,
        })
    }

    /// Bounded output `update` would produce at `now`, without committing.
    pub fn get_new_pi_output(&self, error: I256, now: u64) -> Result<PiOutput> {
        Ok(self.step(error, now)?.output)
    }

    /// Evaluate `error` at `now` and commit the integral, error and time.
    pub fn update(&mut self, error: I256, now: u64) -> Result<PiOutput> {
        let step = self.step(error, now)?;

        self.error_integral = step.integral;
        self.last_error = error;
        self.last_update_time = now;
        self.last_update = LastUpdate {
            time: now,
            output: step.output.output,
            p_term: step.output.p_term,
            i_term: step.output.i_term,
        };

        info!(
            %error,
            output = %step.output.output,
            integral = %step.integral,
            now,
            "controller updated"
        );
        Ok(step.output)
    }

    pub fn modify_parameter(&mut self, param: ControllerParameter) -> Result<()> {
        let mut next = self.config.clone();
        match param {
            ControllerParameter::Kp(v) => next.kp = v,
            ControllerParameter::Ki(v) => next.ki = v,
            ControllerParameter::CoBias(v) => next.co_bias = v,
            ControllerParameter::OutputUpperBound(v) => {
                if v < next.output_lower_bound {
                    return Err(RewardError::InvalidParameter(format!(
                        "output_upper_bound {} is below output_lower_bound {}",
                        v, next.output_lower_bound
                    )));
                }
                next.output_upper_bound = v;
            }
            ControllerParameter::OutputLowerBound(v) => {
                if v > next.output_upper_bound {
                    return Err(RewardError::InvalidParameter(format!(
                        "output_lower_bound {} is above output_upper_bound {}",
                        v, next.output_upper_bound
                    )));
                }
                next.output_lower_bound = v;
            }
            ControllerParameter::PerSecondIntegralLeak(v) => {
                check_leak(v)?;
                next.per_second_integral_leak = v;
            }
        }
        self.config = next;
        info!(?param, "controller parameter modified");
        Ok(())
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn kp(&self) -> I256 {
        self.config.kp
    }

    pub fn ki(&self) -> I256 {
        self.config.ki
    }

    pub fn co_bias(&self) -> I256 {
        self.config.co_bias
    }

    pub fn output_upper_bound(&self) -> I256 {
        self.config.output_upper_bound
    }

    pub fn output_lower_bound(&self) -> I256 {
        self.config.output_lower_bound
    }

    pub fn per_second_integral_leak(&self) -> U256 {
        self.config.per_second_integral_leak
    }

    pub fn error_integral(&self) -> I256 {
        self.error_integral
    }

    pub fn last_error(&self) -> I256 {
        self.last_error
    }

    pub fn last_update_time(&self) -> u64 {
        self.last_update_time
    }

    pub fn last_update(&self) -> LastUpdate {
        self.last_update
    }

    pub fn last_output(&self) -> I256 {
        self.last_update.output
    }
}

/// Relative error of a measurement against its target, signed WAD:
/// `(target - measured) * WAD / target`.
pub fn error(target: I256, measured: I256) -> Result<I256> {
    let diff = fixed_point::sub_signed(target, measured)?;
    fixed_point::mul_div_signed(diff, WAD_I, target)
}
