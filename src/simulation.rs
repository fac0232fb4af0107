use ethnum::U256;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};
use tracing::debug;

use crate::address::Address;
use crate::codec::{PayloadBuilder, BASE_FEE_TYPE};
use crate::config::{chains, EngineConfig};
use crate::engine::{ChunkOutcome, RewardController};
use crate::error::{Result, RewardError};
use crate::fixed_point::{self, WAD};

/// Unix time the simulated network starts at.
const GENESIS_SECS: u64 = 1_736_000_000;

/// One reported chain: its id, starting base fee and per-second log
/// volatility.
#[derive(Debug, Clone)]
pub struct ChainSpec {
    pub chain_id: u64,
    pub initial_gwei: f64,
    pub volatility: f64,
    pub block_time_secs: u64,
}

impl ChainSpec {
    pub fn new(chain_id: u64, initial_gwei: f64, volatility: f64, block_time_secs: u64) -> Self {
        ChainSpec {
            chain_id,
            initial_gwei,
            volatility,
            block_time_secs,
        }
    }
}

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub engine: EngineConfig,
    pub chains: Vec<ChainSpec>,
    pub updaters: usize,
    pub system_id: u8,
    pub duration_secs: u64,
    /// Seconds between controller updates
    pub control_interval_secs: u64,
    /// Fraction of the base fee reported as the reward type's value
    pub tip_ratio: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            engine: EngineConfig::default(),
            chains: vec![
                ChainSpec::new(chains::ETHEREUM, 20.0, 0.002, 12),
                ChainSpec::new(chains::BASE, 0.05, 0.004, 2),
                ChainSpec::new(chains::ARBITRUM, 0.01, 0.004, 1),
                ChainSpec::new(chains::OPTIMISM, 0.002, 0.004, 2),
            ],
            updaters: 5,
            system_id: 2,
            duration_secs: 24 * 3600,
            control_interval_secs: 600,
            tip_ratio: 0.1,
            seed: 42,
        }
    }
}

/// One accepted or refused submission.
#[derive(Debug, Clone)]
pub struct UpdateMetrics {
    pub time: u64,
    pub chain_id: u64,
    pub updater: Address,
    pub gas_price_gwei: f64,
    /// Seconds since the previous accepted update of this chain
    pub interval_secs: f64,
    pub time_reward: f64,
    pub deviation_reward: f64,
    pub accepted: bool,
}

/// One controller step.
#[derive(Debug, Clone)]
pub struct ControlMetrics {
    pub time: u64,
    pub observed_interval_secs: f64,
    pub error: f64,
    pub output: f64,
    pub p_term: f64,
    pub i_term: f64,
}

/// A synthetic oracle network: updaters report random-walk gas prices at
/// a rate scaled by the controller output, and the controller steers the
/// mean update interval toward `target_time_since`.
pub struct Simulation {
    pub engine: RewardController,
    pub config: SimulationConfig,
    pub updates: Vec<UpdateMetrics>,
    pub control: Vec<ControlMetrics>,
    operator: Address,
    updaters: Vec<Address>,
    prices: Vec<f64>,
    next_submission: Vec<f64>,
    last_accepted: Vec<u64>,
    rng: StdRng,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.chains.is_empty() || config.updaters == 0 {
            return Err(RewardError::InvalidParameter(
                "simulation needs at least one chain and one updater".to_string(),
            ));
        }
        if config.control_interval_secs == 0 {
            return Err(RewardError::InvalidParameter(
                "control_interval_secs must be positive".to_string(),
            ));
        }

        let operator = Address::from_low_u64(1);
        let engine = RewardController::new(operator, &config.engine)?;
        let updaters = (0..config.updaters as u64)
            .map(|i| Address::from_low_u64(1_000 + i))
            .collect();

        Ok(Simulation {
            engine,
            prices: config.chains.iter().map(|c| c.initial_gwei).collect(),
            next_submission: vec![0.0; config.chains.len()],
            last_accepted: vec![GENESIS_SECS; config.chains.len()],
            updates: Vec::new(),
            control: Vec::new(),
            operator,
            updaters,
            rng: StdRng::seed_from_u64(config.seed.wrapping_add(0xBEEF)),
            config,
        })
    }

    fn target_interval_secs(&self) -> f64 {
        fixed_point::wad_to_f64(self.engine.target_time_since())
    }

    /// Submission rate multiplier currently set by the controller.
    fn activity(&self) -> f64 {
        if self.engine.controller().last_update_time() == 0 {
            return fixed_point::signed_wad_to_f64(self.engine.controller().co_bias());
        }
        fixed_point::signed_wad_to_f64(self.engine.controller().last_output())
    }

    fn draw_gap(&mut self) -> Result<f64> {
        let rate = self.activity().max(1e-6) / self.target_interval_secs();
        let exp = Exp::new(rate).map_err(|e| RewardError::InvalidParameter(e.to_string()))?;
        Ok(exp.sample(&mut self.rng))
    }

    /// Run for `duration_secs` of simulated time.
    pub fn run(&mut self) -> Result<()> {
        for i in 0..self.config.chains.len() {
            self.next_submission[i] = self.draw_gap()?;
        }

        let shock = Normal::new(0.0, 1.0).map_err(|e| RewardError::InvalidParameter(e.to_string()))?;
        for t in 1..=self.config.duration_secs {
            let now = GENESIS_SECS + t;

            for i in 0..self.config.chains.len() {
                let z: f64 = shock.sample(&mut self.rng);
                self.prices[i] *= (self.config.chains[i].volatility * z).exp();

                if (t as f64) >= self.next_submission[i] {
                    self.submit(i, now)?;
                    self.next_submission[i] = t as f64 + self.draw_gap()?;
                }
            }

            if t % self.config.control_interval_secs == 0 {
                self.control_step(now)?;
            }
        }
        Ok(())
    }

    fn submit(&mut self, chain: usize, now: u64) -> Result<()> {
        let spec = &self.config.chains[chain];
        let updater = self.updaters[self.rng.gen_range(0..self.updaters.len())];
        let base_wei = self.prices[chain] * 1e9;
        let height = (now - GENESIS_SECS) / spec.block_time_secs.max(1) + 1;

        let payload = PayloadBuilder::new(1, height, spec.chain_id, self.config.system_id, now * 1_000)
            .value(BASE_FEE_TYPE, U256::from(base_wei.max(1.0) as u128))
            .value(
                self.engine.reward_type(),
                U256::from((base_wei * self.config.tip_ratio).max(1.0) as u128),
            )
            .signature(&[0u8; 65])
            .build()?;

        let outcome = self.engine.update_oracle(updater, &payload)?;
        let (time_reward, deviation_reward) = outcome.rewards();
        let accepted = matches!(outcome, ChunkOutcome::Rewarded { .. });
        let interval_secs = (now - self.last_accepted[chain]) as f64;
        if accepted {
            self.last_accepted[chain] = now;
        }

        self.updates.push(UpdateMetrics {
            time: now,
            chain_id: spec.chain_id,
            updater,
            gas_price_gwei: self.prices[chain],
            interval_secs,
            time_reward: fixed_point::wad_to_f64(time_reward),
            deviation_reward: fixed_point::wad_to_f64(deviation_reward),
            accepted,
        });
        Ok(())
    }

    /// Feed the mean accepted interval of the last control window into
    /// the controller. Chains with no update in the window count with
    /// their current staleness.
    fn control_step(&mut self, now: u64) -> Result<()> {
        let window_start = now.saturating_sub(self.config.control_interval_secs);
        let mut intervals: Vec<f64> = self
            .updates
            .iter()
            .rev()
            .take_while(|u| u.time > window_start)
            .filter(|u| u.accepted)
            .map(|u| u.interval_secs)
            .collect();
        for (i, spec) in self.config.chains.iter().enumerate() {
            let quiet = self.last_accepted[i] <= window_start;
            if quiet {
                debug!(chain_id = spec.chain_id, "no update in control window");
                intervals.push((now - self.last_accepted[i]) as f64);
            }
        }
        let observed = intervals.iter().sum::<f64>() / intervals.len() as f64;

        let error = self.engine.interval_error(fixed_point::wad_from_f64(observed).max(WAD))?;
        let out = self.engine.update_controller(self.operator, error, now)?;

        self.control.push(ControlMetrics {
            time: now,
            observed_interval_secs: observed,
            error: fixed_point::signed_wad_to_f64(error),
            output: fixed_point::signed_wad_to_f64(out.output),
            p_term: fixed_point::signed_wad_to_f64(out.p_term),
            i_term: fixed_point::signed_wad_to_f64(out.i_term),
        });
        Ok(())
    }

    /// Mean `|observed - target| / target` over all controller steps.
    pub fn mean_abs_interval_error(&self) -> f64 {
        if self.control.is_empty() {
            return 0.0;
        }
        let target = self.target_interval_secs();
        self.control
            .iter()
            .map(|c| ((c.observed_interval_secs - target) / target).abs())
            .sum::<f64>()
            / self.control.len() as f64
    }
}

/// Build and run a simulation.
pub fn run_simulation(config: SimulationConfig) -> Result<Simulation> {
    let mut sim = Simulation::new(config)?;
    sim.run()?;
    Ok(sim)
}
