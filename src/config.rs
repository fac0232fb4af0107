use std::collections::BTreeMap;
use std::path::Path;

use ethnum::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;
use crate::controller::ControllerConfig;
use crate::error::RewardError;
use crate::fixed_point::{decimal, WAD};
use crate::rewards::RewardCurve;
use crate::store;

/// Chain ids of the networks the deployed oracle reports on.
pub mod chains {
    pub const ETHEREUM: u64 = 1;
    pub const OPTIMISM: u64 = 10;
    pub const UNICHAIN: u64 = 130;
    pub const SONEIUM: u64 = 1868;
    pub const BASE: u64 = 8453;
    pub const ARBITRUM: u64 = 42161;
    pub const LINEA: u64 = 59144;
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error(transparent)]
    Invalid(#[from] RewardError),
}

/// Oracle-facing settings that are neither controller gains nor curve
/// shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Window of moving averages created from now on
    pub default_window_size: usize,
    /// Slot type rewarded alongside the base fee
    pub reward_type: u16,
    /// Desired seconds between updates of a chain (WAD)
    #[serde(with = "decimal")]
    pub target_time_since: U256,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            default_window_size: 10,
            reward_type: 322,
            target_time_since: U256::new(1_800) * WAD,
        }
    }
}

/// Full engine configuration, loadable from TOML:
///
/// ```toml
/// authorities = ["0x…"]
///
/// [controller]
/// kp = "-2000000000000000000"
///
/// [scales]
/// 1 = "1000000000000000000000000000"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub authorities: Vec<Address>,
    pub controller: ControllerConfig,
    pub rewards: RewardCurve,
    pub oracle: OracleConfig,
    #[serde(with = "scale_map")]
    pub scales: BTreeMap<u64, U256>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            authorities: Vec::new(),
            controller: ControllerConfig::default(),
            rewards: RewardCurve::default(),
            oracle: OracleConfig::default(),
            scales: default_scales(),
        }
    }
}

/// Deviation scales of the deployed oracle, relative to Ethereum at 1e27.
pub fn default_scales() -> BTreeMap<u64, U256> {
    let l2_small = U256::new(228_550_000_000_000_000_000_000);
    BTreeMap::from([
        (chains::ETHEREUM, U256::new(1_000_000_000_000_000_000_000_000_000)),
        (chains::ARBITRUM, U256::new(99_340_000_000_000_000_000_000_000)),
        (chains::BASE, U256::new(144_939_290_000_000_000_000_000_000)),
        (chains::LINEA, U256::new(612_710_000_000_000_000_000_000_000)),
        (chains::OPTIMISM, l2_small),
        (chains::SONEIUM, l2_small),
        (chains::UNICHAIN, l2_small),
    ])
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), RewardError> {
        self.controller.validate()?;
        self.rewards.validate()?;
        store::check_window(self.oracle.default_window_size)?;
        if self.oracle.target_time_since == U256::ZERO {
            return Err(RewardError::InvalidParameter(
                "target_time_since must be positive".to_string(),
            ));
        }
        if let Some((chain_id, _)) = self.scales.iter().find(|(_, s)| **s == U256::ZERO) {
            return Err(RewardError::InvalidScale(*chain_id));
        }
        Ok(())
    }
}

/// TOML tables need string keys and U256 needs decimal strings.
mod scale_map {
    use std::collections::BTreeMap;

    use ethnum::U256;
    use serde::ser::SerializeMap;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(map: &BTreeMap<u64, U256>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (chain_id, scale) in map {
            out.serialize_entry(&chain_id.to_string(), &scale.to_string())?;
        }
        out.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<u64, U256>, D::Error> {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(k, v)| {
                let chain_id = k.trim().parse::<u64>().map_err(de::Error::custom)?;
                let scale = v.trim().replace('_', "").parse::<U256>().map_err(de::Error::custom)?;
                Ok((chain_id, scale))
            })
            .collect()
    }
}
