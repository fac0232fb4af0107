//! Packed oracle payload codec.
//!
//! A payload is a 32-byte header word followed by `payload_len` 32-byte
//! value slots. Everything is big-endian. Header layout, most significant
//! byte first:
//!
//! | bytes    | bits       | field         |
//! |----------|------------|---------------|
//! | `0..6`   | `208..256` | zero          |
//! | `6..8`   | `192..208` | `payload_len` |
//! | `8..14`  | `144..192` | `timestamp`   |
//! | `14`     | `136..144` | `system_id`   |
//! | `15..23` | `72..136`  | `chain_id`    |
//! | `23..31` | `8..72`    | `height`      |
//! | `31`     | `0..8`     | `version`     |
//!
//! A value slot is `type:16 | value:240`. When chunks are batched each one
//! may carry an opaque signature suffix after its last slot; the codec never
//! looks at it.

use ethnum::U256;

use crate::error::{Result, RewardError};

pub const HEADER_LEN: usize = 32;
pub const SLOT_LEN: usize = 32;

/// Type id of the base-fee value every chunk carries.
pub const BASE_FEE_TYPE: u16 = 107;

pub const MAX_TIMESTAMP: u64 = (1 << 48) - 1;

/// Store keys hold `system_id:8 | chain_id:64 | type:16`.
pub type StoreKey = u128;

const CHAIN_SHIFT: u32 = 16;
const SYSTEM_SHIFT: u32 = 80;

/// Largest value a slot can carry.
pub fn max_slot_value() -> U256 {
    U256::MAX >> 16u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub version: u8,
    pub height: u64,
    pub chain_id: u64,
    pub system_id: u8,
    pub timestamp: u64,
    pub payload_len: u16,
}

impl Header {
    pub fn encode(&self) -> Result<[u8; HEADER_LEN]> {
        if self.timestamp > MAX_TIMESTAMP {
            return Err(RewardError::MalformedPayload(format!(
                "timestamp {} does not fit in 48 bits",
                self.timestamp
            )));
        }

        let mut word = [0u8; HEADER_LEN];
        word[6..8].copy_from_slice(&self.payload_len.to_be_bytes());
        word[8..14].copy_from_slice(&self.timestamp.to_be_bytes()[2..]);
        word[14] = self.system_id;
        word[15..23].copy_from_slice(&self.chain_id.to_be_bytes());
        word[23..31].copy_from_slice(&self.height.to_be_bytes());
        word[31] = self.version;
        Ok(word)
    }

    pub fn decode(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_LEN {
            return Err(RewardError::MalformedPayload(format!(
                "payload of {} bytes is shorter than a header",
                bytes.len()
            )));
        }

        let mut ts = [0u8; 8];
        ts[2..].copy_from_slice(&bytes[8..14]);

        Ok(Header {
            version: bytes[31],
            height: u64::from_be_bytes(be8(&bytes[23..31])),
            chain_id: u64::from_be_bytes(be8(&bytes[15..23])),
            system_id: bytes[14],
            timestamp: u64::from_be_bytes(ts),
            payload_len: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Per-(system, chain) namespace that type ids are appended to.
    pub fn key_base(&self) -> StoreKey {
        store_key_base(self.system_id, self.chain_id)
    }

    /// Header plus declared value slots, signature excluded.
    pub fn payload_size(&self) -> usize {
        HEADER_LEN + self.payload_len as usize * SLOT_LEN
    }
}

fn be8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

pub fn prepare_header(
    version: u8,
    height: u64,
    chain_id: u64,
    system_id: u8,
    timestamp: u64,
    payload_len: u16,
) -> Result<[u8; HEADER_LEN]> {
    Header {
        version,
        height,
        chain_id,
        system_id,
        timestamp,
        payload_len,
    }
    .encode()
}

/// Decode the header word of a payload. The returned header exposes
/// `payload_len`, `key_base()`, `timestamp` and `height`.
pub fn decode_header(payload: &[u8]) -> Result<Header> {
    Header::decode(payload)
}

pub fn store_key_base(system_id: u8, chain_id: u64) -> StoreKey {
    ((system_id as u128) << SYSTEM_SHIFT) | ((chain_id as u128) << CHAIN_SHIFT)
}

pub fn append_type(key_base: StoreKey, typ: u16) -> StoreKey {
    key_base + typ as u128
}

pub fn get_key(system_id: u8, chain_id: u64, typ: u16) -> StoreKey {
    append_type(store_key_base(system_id, chain_id), typ)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSlot {
    pub typ: u16,
    pub value: U256,
}

impl ValueSlot {
    fn decode(bytes: &[u8]) -> ValueSlot {
        let mut word = [0u8; 32];
        word[2..].copy_from_slice(&bytes[2..SLOT_LEN]);
        ValueSlot {
            typ: u16::from_be_bytes([bytes[0], bytes[1]]),
            value: U256::from_be_bytes(word),
        }
    }

    fn encode(&self) -> Result<[u8; SLOT_LEN]> {
        if self.value > max_slot_value() {
            return Err(RewardError::MalformedPayload(format!(
                "value for type {} does not fit in 240 bits",
                self.typ
            )));
        }
        let mut word = self.value.to_be_bytes();
        word[..2].copy_from_slice(&self.typ.to_be_bytes());
        Ok(word)
    }
}

/// Decode the header and check the payload is long enough for every
/// declared slot.
fn checked_header(payload: &[u8]) -> Result<Header> {
    let header = Header::decode(payload)?;
    if header.payload_len == 0 {
        return Err(RewardError::MalformedPayload(
            "header declares no value slots".to_string(),
        ));
    }
    if payload.len() < header.payload_size() {
        return Err(RewardError::MalformedPayload(format!(
            "header declares {} slots ({} bytes) but payload has {} bytes",
            header.payload_len,
            header.payload_size(),
            payload.len()
        )));
    }
    Ok(header)
}

/// Read the `index`-th value slot following the header.
pub fn get_value(payload: &[u8], index: usize) -> Result<ValueSlot> {
    let header = checked_header(payload)?;
    if index >= header.payload_len as usize {
        return Err(RewardError::MalformedPayload(format!(
            "slot {} out of range for payload_len {}",
            index, header.payload_len
        )));
    }
    let start = HEADER_LEN + index * SLOT_LEN;
    Ok(ValueSlot::decode(&payload[start..start + SLOT_LEN]))
}

/// Decode the header and every declared slot. Bytes past the last slot
/// are ignored.
pub fn decode_values(payload: &[u8]) -> Result<(Header, Vec<ValueSlot>)> {
    let header = checked_header(payload)?;
    let slots = payload[HEADER_LEN..header.payload_size()]
        .chunks_exact(SLOT_LEN)
        .map(ValueSlot::decode)
        .collect();
    Ok((header, slots))
}

/// A chunk reduced to the fields the reward engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub system_id: u8,
    pub chain_id: u64,
    /// Value of [`BASE_FEE_TYPE`].
    pub base_value: U256,
    /// Value of the requested type.
    pub value: U256,
    pub timestamp: u64,
    pub height: u64,
}

/// Scan the slots for the base-fee value and the requested type's value.
/// The first slot of a type wins.
pub fn decode(payload: &[u8], typ: u16) -> Result<Decoded> {
    let (header, slots) = decode_values(payload)?;
    let find = |t: u16| {
        slots
            .iter()
            .find(|s| s.typ == t)
            .map(|s| s.value)
            .ok_or(RewardError::UnknownType(t))
    };

    Ok(Decoded {
        system_id: header.system_id,
        chain_id: header.chain_id,
        base_value: find(BASE_FEE_TYPE)?,
        value: find(typ)?,
        timestamp: header.timestamp,
        height: header.height,
    })
}

/// Split a batch into `n` equally sized chunks and check each one holds
/// its declared slots. Any shape problem fails the whole batch.
pub fn split_chunks(payload: &[u8], n: usize) -> Result<Vec<&[u8]>> {
    if n == 0 {
        return Err(RewardError::MalformedPayload(
            "chunk count must be positive".to_string(),
        ));
    }
    if payload.is_empty() || payload.len() % n != 0 {
        return Err(RewardError::MalformedPayload(format!(
            "payload of {} bytes cannot be split into {} equal chunks",
            payload.len(),
            n
        )));
    }

    let chunks: Vec<&[u8]> = payload.chunks_exact(payload.len() / n).collect();
    for (i, chunk) in chunks.iter().enumerate() {
        checked_header(chunk).map_err(|e| match e {
            RewardError::MalformedPayload(reason) => {
                RewardError::MalformedPayload(format!("chunk {}: {}", i, reason))
            }
            other => other,
        })?;
    }
    Ok(chunks)
}

/// Assembles a chunk: header, typed value slots, optional signature.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    header: Header,
    slots: Vec<ValueSlot>,
    signature: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new(version: u8, height: u64, chain_id: u64, system_id: u8, timestamp: u64) -> Self {
        PayloadBuilder {
            header: Header {
                version,
                height,
                chain_id,
                system_id,
                timestamp,
                payload_len: 0,
            },
            slots: Vec::new(),
            signature: Vec::new(),
        }
    }

    pub fn value(mut self, typ: u16, value: U256) -> Self {
        self.slots.push(ValueSlot { typ, value });
        self
    }

    pub fn signature(mut self, signature: &[u8]) -> Self {
        self.signature = signature.to_vec();
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let payload_len = u16::try_from(self.slots.len()).map_err(|_| {
            RewardError::MalformedPayload(format!("{} slots exceed u16", self.slots.len()))
        })?;
        let header = Header {
            payload_len,
            ..self.header
        };

        let mut out = Vec::with_capacity(header.payload_size() + self.signature.len());
        out.extend_from_slice(&header.encode()?);
        for slot in &self.slots {
            out.extend_from_slice(&slot.encode()?);
        }
        out.extend_from_slice(&self.signature);
        Ok(out)
    }
}
