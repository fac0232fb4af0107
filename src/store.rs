use std::collections::{HashMap, VecDeque};

use ethnum::U256;

use crate::codec::{self, StoreKey};
use crate::error::{Result, RewardError};

/// Largest window a moving average may be configured with.
pub const MAX_WINDOW_SIZE: usize = 1_024;

/// Latest accepted observation for one `(system, chain, type)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OracleRecord {
    pub value: U256,
    pub height: u64,
    pub timestamp: u64,
}

impl OracleRecord {
    /// Strictly newer in both height and timestamp.
    pub fn is_superseded_by(&self, height: u64, timestamp: u64) -> bool {
        height > self.height && timestamp > self.timestamp
    }
}

/// Keyed latest-value table. Records are created on first write and never
/// removed.
#[derive(Debug, Clone, Default)]
pub struct OracleStore {
    records: HashMap<StoreKey, OracleRecord>,
}

impl OracleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write every slot of a payload under its type key, without a
    /// staleness check. Returns the number of records written.
    pub fn store_values(&mut self, payload: &[u8]) -> Result<usize> {
        let (header, slots) = codec::decode_values(payload)?;
        let base = header.key_base();
        for slot in &slots {
            self.records.insert(
                codec::append_type(base, slot.typ),
                OracleRecord {
                    value: slot.value,
                    height: header.height,
                    timestamp: header.timestamp,
                },
            );
        }
        Ok(slots.len())
    }

    /// The record for a key, or the zero record if it was never written.
    pub fn get(&self, system_id: u8, chain_id: u64, typ: u16) -> OracleRecord {
        self.get_by_key(codec::get_key(system_id, chain_id, typ))
    }

    pub fn get_by_key(&self, key: StoreKey) -> OracleRecord {
        self.records.get(&key).copied().unwrap_or_default()
    }

    pub fn contains(&self, system_id: u8, chain_id: u64, typ: u16) -> bool {
        self.records
            .contains_key(&codec::get_key(system_id, chain_id, typ))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Moving averages
// ═══════════════════════════════════════════════════════════════════════

/// Fixed-capacity ring of the most recent values with a running sum.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    values: VecDeque<U256>,
    window_size: usize,
    sum: U256,
}

impl MovingAverage {
    pub fn new(window_size: usize) -> Result<Self> {
        check_window(window_size)?;
        Ok(Self::with_window(window_size))
    }

    fn with_window(window_size: usize) -> Self {
        MovingAverage {
            values: VecDeque::new(),
            window_size,
            sum: U256::ZERO,
        }
    }

    /// Push a value, evicting the oldest once the window is full.
    pub fn add_value(&mut self, value: U256) -> Result<()> {
        self.sum = self.sum.checked_add(value).ok_or(RewardError::Overflow)?;
        self.values.push_back(value);
        self.evict_to(self.window_size);
        Ok(())
    }

    /// `sum / count` over the retained values, zero when empty.
    pub fn average(&self) -> U256 {
        if self.values.is_empty() {
            return U256::ZERO;
        }
        self.sum / U256::from(self.values.len() as u64)
    }

    /// Shrinking keeps the most recent `new_size` values; growing keeps
    /// everything and only raises the capacity.
    pub fn resize(&mut self, new_size: usize) -> Result<()> {
        check_window(new_size)?;
        self.window_size = new_size;
        self.evict_to(new_size);
        Ok(())
    }

    fn evict_to(&mut self, size: usize) {
        while self.values.len() > size {
            if let Some(old) = self.values.pop_front() {
                self.sum -= old;
            }
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn sum(&self) -> U256 {
        self.sum
    }

    /// Retained values, oldest first.
    pub fn values(&self) -> impl Iterator<Item = &U256> {
        self.values.iter()
    }
}

pub(crate) fn check_window(size: usize) -> Result<()> {
    if size == 0 || size > MAX_WINDOW_SIZE {
        return Err(RewardError::InvalidParameter(format!(
            "window size {} must be in 1..={}",
            size, MAX_WINDOW_SIZE
        )));
    }
    Ok(())
}

/// One moving average per chain id, created lazily at the default window.
#[derive(Debug, Clone)]
pub struct MovingAverages {
    buffers: HashMap<u64, MovingAverage>,
    default_window_size: usize,
}

impl MovingAverages {
    pub fn new(default_window_size: usize) -> Result<Self> {
        check_window(default_window_size)?;
        Ok(MovingAverages {
            buffers: HashMap::new(),
            default_window_size,
        })
    }

    fn buffer_mut(&mut self, chain_id: u64) -> &mut MovingAverage {
        let size = self.default_window_size;
        self.buffers
            .entry(chain_id)
            .or_insert_with(|| MovingAverage::with_window(size))
    }

    pub fn add_value(&mut self, chain_id: u64, value: U256) -> Result<()> {
        self.buffer_mut(chain_id).add_value(value)
    }

    pub fn get_average(&self, chain_id: u64) -> U256 {
        self.buffers
            .get(&chain_id)
            .map(MovingAverage::average)
            .unwrap_or(U256::ZERO)
    }

    pub fn get_window_size(&self, chain_id: u64) -> usize {
        self.buffers
            .get(&chain_id)
            .map(MovingAverage::window_size)
            .unwrap_or(self.default_window_size)
    }

    pub fn resize_buffer(&mut self, chain_id: u64, new_size: usize) -> Result<()> {
        check_window(new_size)?;
        self.buffer_mut(chain_id).resize(new_size)
    }

    pub fn get(&self, chain_id: u64) -> Option<&MovingAverage> {
        self.buffers.get(&chain_id)
    }

    pub fn default_window_size(&self) -> usize {
        self.default_window_size
    }

    /// Applies to buffers created from now on; existing ones keep their size.
    pub fn set_default_window_size(&mut self, size: usize) -> Result<()> {
        check_window(size)?;
        self.default_window_size = size;
        Ok(())
    }
}
