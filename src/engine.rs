//! The reward controller: one context object owning the PI controller, the
//! oracle store, per-chain moving averages, scales, reward curves and the
//! ledger.
//!
//! Every entry point runs to completion before the next one starts, and a
//! failing call leaves no partial state behind. Inside a batch, chunks are
//! applied in payload order and each one sees the effects of the chunks
//! before it.

use std::collections::HashSet;

use ethnum::{I256, U256};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::codec::{self, BASE_FEE_TYPE};
use crate::config::EngineConfig;
use crate::controller::{self, Controller, ControllerParameter, PiOutput};
use crate::error::{Result, RewardError};
use crate::fixed_point::{self, decimal};
use crate::rewards::{RewardCurve, RewardLedger, RewardParameter, ScaleTable};
use crate::store::{MovingAverages, OracleRecord, OracleStore};

/// Any engine parameter an authority can set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    Controller(ControllerParameter),
    Reward(RewardParameter),
    Scale { chain_id: u64, scale: U256 },
    DefaultWindowSize(usize),
    RewardType(u16),
    TargetTimeSince(U256),
    AddAuthority(Address),
    RemoveAuthority(Address),
}

/// What happened to one chunk of an oracle update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Rewarded {
        time_reward: U256,
        deviation_reward: U256,
    },
    /// Not newer than the stored record; nothing changed.
    Stale,
    /// Failed on its own without affecting the rest of the batch.
    Rejected(RewardError),
}

impl ChunkOutcome {
    /// `(time_reward, deviation_reward)`, zero unless rewarded.
    pub fn rewards(&self) -> (U256, U256) {
        match self {
            ChunkOutcome::Rewarded {
                time_reward,
                deviation_reward,
            } => (*time_reward, *deviation_reward),
            _ => (U256::ZERO, U256::ZERO),
        }
    }

    pub fn is_rewarded(&self) -> bool {
        matches!(self, ChunkOutcome::Rewarded { .. })
    }
}

/// Emitted for every accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleUpdated {
    pub updater: Address,
    pub system_id: u8,
    pub chain_id: u64,
    #[serde(with = "decimal")]
    pub value: U256,
    pub height: u64,
    pub timestamp: u64,
    #[serde(with = "decimal")]
    pub time_reward: U256,
    #[serde(with = "decimal")]
    pub deviation_reward: U256,
}

#[derive(Debug, Clone)]
pub struct RewardController {
    controller: Controller,
    store: OracleStore,
    averages: MovingAverages,
    scales: ScaleTable,
    curve: RewardCurve,
    ledger: RewardLedger,
    authorities: HashSet<Address>,
    frozen: bool,
    reward_type: u16,
    target_time_since: U256,
    events: Vec<OracleUpdated>,
}

impl RewardController {
    /// Build an engine from a validated config. `deployer` is always an
    /// authority.
    pub fn new(deployer: Address, config: &EngineConfig) -> Result<Self> {
        config.validate()?;

        let mut scales = ScaleTable::new();
        for (chain_id, scale) in &config.scales {
            scales.set_scale(*chain_id, *scale)?;
        }

        let mut authorities: HashSet<Address> = config.authorities.iter().copied().collect();
        authorities.insert(deployer);

        Ok(RewardController {
            controller: Controller::new(config.controller.clone())?,
            store: OracleStore::new(),
            averages: MovingAverages::new(config.oracle.default_window_size)?,
            scales,
            curve: config.rewards.clone(),
            ledger: RewardLedger::new(),
            authorities,
            frozen: false,
            reward_type: config.oracle.reward_type,
            target_time_since: config.oracle.target_time_since,
            events: Vec::new(),
        })
    }

    fn authorize(&self, caller: Address) -> Result<()> {
        if !self.authorities.contains(&caller) {
            warn!(%caller, "unauthorized call");
            return Err(RewardError::Unauthorized(caller));
        }
        Ok(())
    }

    fn check_not_frozen(&self) -> Result<()> {
        if self.frozen {
            warn!("oracle update refused while frozen");
            return Err(RewardError::Frozen);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Oracle updates
    // ═══════════════════════════════════════════════════════════════════

    /// Apply one chunk. Stale data yields [`ChunkOutcome::Stale`]; every
    /// other problem is returned as an error.
    pub fn update_oracle(&mut self, sender: Address, payload: &[u8]) -> Result<ChunkOutcome> {
        self.check_not_frozen()?;
        self.apply_chunk(sender, payload, false)
    }

    /// Split `payload` into `n` equal chunks and apply each independently.
    ///
    /// A shape problem in any chunk fails the whole call before anything
    /// is applied. Other failures only reject their own chunk.
    pub fn update_oracles(
        &mut self,
        sender: Address,
        payload: &[u8],
        n: usize,
    ) -> Result<Vec<ChunkOutcome>> {
        self.run_batch(sender, payload, n, false)
    }

    /// Outcomes `update_oracles` would produce right now, without applying
    /// them.
    pub fn preview_oracles(
        &self,
        sender: Address,
        payload: &[u8],
        n: usize,
    ) -> Result<Vec<ChunkOutcome>> {
        self.clone().run_batch(sender, payload, n, true)
    }

    /// Shared batch loop. A preview run logs at debug level only.
    fn run_batch(
        &mut self,
        sender: Address,
        payload: &[u8],
        n: usize,
        preview: bool,
    ) -> Result<Vec<ChunkOutcome>> {
        self.check_not_frozen()?;
        let chunks = codec::split_chunks(payload, n)?;

        let mut outcomes = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.into_iter().enumerate() {
            let outcome = match self.apply_chunk(sender, chunk, preview) {
                Ok(outcome) => outcome,
                Err(e) => {
                    if preview {
                        debug!(preview, chunk = i, error = %e, "chunk rejected");
                    } else {
                        warn!(chunk = i, error = %e, "chunk rejected");
                    }
                    ChunkOutcome::Rejected(e)
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    fn apply_chunk(
        &mut self,
        sender: Address,
        chunk: &[u8],
        preview: bool,
    ) -> Result<ChunkOutcome> {
        let decoded = codec::decode(chunk, self.reward_type)?;
        let prior = self
            .store
            .get(decoded.system_id, decoded.chain_id, BASE_FEE_TYPE);

        if !prior.is_superseded_by(decoded.height, decoded.timestamp) {
            debug!(
                chain_id = decoded.chain_id,
                height = decoded.height,
                stored_height = prior.height,
                preview,
                "stale chunk"
            );
            return Ok(ChunkOutcome::Stale);
        }

        // Everything fallible is computed before the first write.
        let elapsed = self.curve.elapsed(decoded.timestamp, prior.timestamp)?;
        let deviation = self.scales.calc_deviation(
            decoded.chain_id,
            decoded.base_value,
            self.averages.get_average(decoded.chain_id),
        )?;
        let (time_reward, deviation_reward) = self.curve.calc_reward(elapsed, deviation)?;
        let reward = fixed_point::add(time_reward, deviation_reward)?;
        fixed_point::add(self.ledger.total_rewards(), reward)?;

        self.averages
            .add_value(decoded.chain_id, decoded.base_value)?;
        self.store.store_values(chunk)?;
        self.ledger.credit(sender, reward)?;

        let event = OracleUpdated {
            updater: sender,
            system_id: decoded.system_id,
            chain_id: decoded.chain_id,
            value: decoded.base_value,
            height: decoded.height,
            timestamp: decoded.timestamp,
            time_reward,
            deviation_reward,
        };
        if preview {
            debug!(
                preview,
                updater = %sender,
                chain_id = event.chain_id,
                height = event.height,
                %time_reward,
                %deviation_reward,
                "oracle updated"
            );
        } else {
            info!(
                updater = %sender,
                chain_id = event.chain_id,
                height = event.height,
                %time_reward,
                %deviation_reward,
                "oracle updated"
            );
        }
        self.events.push(event);

        Ok(ChunkOutcome::Rewarded {
            time_reward,
            deviation_reward,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Controller
    // ═══════════════════════════════════════════════════════════════════

    pub fn update_controller(&mut self, caller: Address, error: I256, now: u64) -> Result<PiOutput> {
        self.authorize(caller)?;
        self.controller.update(error, now)
    }

    /// Relative error of an observed mean update interval (WAD seconds)
    /// against `target_time_since`.
    pub fn interval_error(&self, observed_interval: U256) -> Result<I256> {
        controller::error(
            fixed_point::to_signed(self.target_time_since)?,
            fixed_point::to_signed(observed_interval)?,
        )
    }

    // ═══════════════════════════════════════════════════════════════════
    // Admin
    // ═══════════════════════════════════════════════════════════════════

    pub fn modify_parameter(&mut self, caller: Address, param: Parameter) -> Result<()> {
        self.authorize(caller)?;
        match &param {
            Parameter::Controller(p) => self.controller.modify_parameter(*p)?,
            Parameter::Reward(p) => self.curve.modify_parameter(p.clone())?,
            Parameter::Scale { chain_id, scale } => self.scales.set_scale(*chain_id, *scale)?,
            Parameter::DefaultWindowSize(size) => self.averages.set_default_window_size(*size)?,
            Parameter::RewardType(typ) => self.reward_type = *typ,
            Parameter::TargetTimeSince(t) => {
                if *t == U256::ZERO {
                    return Err(RewardError::InvalidParameter(
                        "target_time_since must be positive".to_string(),
                    ));
                }
                self.target_time_since = *t;
            }
            Parameter::AddAuthority(a) => {
                self.authorities.insert(*a);
            }
            Parameter::RemoveAuthority(a) => {
                if self.authorities.len() == 1 && self.authorities.contains(a) {
                    return Err(RewardError::InvalidParameter(
                        "cannot remove the last authority".to_string(),
                    ));
                }
                self.authorities.remove(a);
            }
        }
        info!(%caller, ?param, "parameter modified");
        Ok(())
    }

    pub fn set_scales(&mut self, caller: Address, scales: &[(u64, U256)]) -> Result<()> {
        self.authorize(caller)?;
        self.scales.set_scales(scales)
    }

    pub fn add_value(&mut self, caller: Address, chain_id: u64, value: U256) -> Result<()> {
        self.authorize(caller)?;
        self.averages.add_value(chain_id, value)
    }

    pub fn resize_buffer(&mut self, caller: Address, chain_id: u64, new_size: usize) -> Result<()> {
        self.authorize(caller)?;
        self.averages.resize_buffer(chain_id, new_size)?;
        info!(chain_id, new_size, "moving average resized");
        Ok(())
    }

    /// Bulk write of every slot in a payload, with no staleness check.
    pub fn store_values(&mut self, caller: Address, payload: &[u8]) -> Result<usize> {
        self.authorize(caller)?;
        self.store.store_values(payload)
    }

    pub fn freeze(&mut self, caller: Address) -> Result<()> {
        self.authorize(caller)?;
        self.frozen = true;
        info!(%caller, "oracle updates frozen");
        Ok(())
    }

    pub fn unfreeze(&mut self, caller: Address) -> Result<()> {
        self.authorize(caller)?;
        self.frozen = false;
        info!(%caller, "oracle updates unfrozen");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn curve(&self) -> &RewardCurve {
        &self.curve
    }

    pub fn scales(&self) -> &ScaleTable {
        &self.scales
    }

    pub fn store(&self) -> &OracleStore {
        &self.store
    }

    pub fn averages(&self) -> &MovingAverages {
        &self.averages
    }

    pub fn ledger(&self) -> &RewardLedger {
        &self.ledger
    }

    pub fn get(&self, system_id: u8, chain_id: u64, typ: u16) -> OracleRecord {
        self.store.get(system_id, chain_id, typ)
    }

    pub fn get_average(&self, chain_id: u64) -> U256 {
        self.averages.get_average(chain_id)
    }

    pub fn get_window_size(&self, chain_id: u64) -> usize {
        self.averages.get_window_size(chain_id)
    }

    pub fn rewards(&self, updater: Address) -> U256 {
        self.ledger.rewards(updater)
    }

    pub fn total_rewards(&self) -> U256 {
        self.ledger.total_rewards()
    }

    pub fn updaters(&self, page: usize) -> &[Address] {
        self.ledger.updaters(page)
    }

    pub fn events(&self) -> &[OracleUpdated] {
        &self.events
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn is_authorized(&self, address: Address) -> bool {
        self.authorities.contains(&address)
    }

    pub fn reward_type(&self) -> u16 {
        self.reward_type
    }

    pub fn target_time_since(&self) -> U256 {
        self.target_time_since
    }
}
