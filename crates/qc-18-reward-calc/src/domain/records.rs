//! # Data Log Records
//!
//! Records the node writes for the engine to read. Keys are fixed prefixes
//! followed by a big-endian height or index so that a prefix scan returns
//! records in order; values are MessagePack arrays.
//!
//! | Record | Key | Value |
//! |--------|-----|-------|
//! | Header | `HD` | `[version, block_height, revision]` |
//! | Governance variables | `gv` + be64(height) | `[irep, rrep, main_prep_count, sub_prep_count]` |
//! | Block produce info | `bp` + be64(height) | `[generator, [validator…]]` |
//! | P-Rep snapshot | `prep` + be64(height) | `[total_delegation, [[address, delegated]…]]` |
//! | Transaction | `TX` + be64(index) | `[address, block_height, type, data]` |

use crate::domain::errors::RewardCalcError;
use rmpv::Value;
use shared_types::{u256_from_bytes, u256_to_bytes, Address, BlockHeight, U256};

pub const HEADER_KEY: &[u8] = b"HD";
pub const GOVERNANCE_PREFIX: &[u8] = b"gv";
pub const BLOCK_PRODUCE_PREFIX: &[u8] = b"bp";
pub const PREPS_PREFIX: &[u8] = b"prep";
pub const TRANSACTION_PREFIX: &[u8] = b"TX";

/// Key under which the last written transaction index is kept.
pub const LAST_TX_INDEX_KEY: &[u8] = b"last_transaction_index";

/// Log header, written once per calculation period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub block_height: BlockHeight,
    pub revision: u32,
}

/// Governance values in force at `block_height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernanceVariables {
    pub block_height: BlockHeight,
    pub calculated_irep: U256,
    pub reward_rep: U256,
    pub main_prep_count: u32,
    pub sub_prep_count: u32,
}

/// Who produced and validated the block at `block_height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockProduceInfo {
    pub block_height: BlockHeight,
    pub generator: Address,
    pub validators: Vec<Address>,
}

/// Delegation held by one P-Rep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PRepDelegation {
    pub address: Address,
    pub delegated: U256,
}

/// Main and sub P-Reps with their delegations at `block_height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PRepSnapshot {
    pub block_height: BlockHeight,
    pub total_delegation: U256,
    pub preps: Vec<PRepDelegation>,
}

/// One delegation entry: `amount` delegated to `address`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationEntry {
    pub address: Address,
    pub amount: U256,
}

/// Transaction-derived change the engine must account for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxData {
    /// Full replacement of the sender's delegation list.
    Delegation(Vec<DelegationEntry>),
    PRepRegister,
    PRepUnregister,
}

impl TxData {
    pub const fn type_code(&self) -> u64 {
        match self {
            Self::Delegation(_) => 0,
            Self::PRepRegister => 1,
            Self::PRepUnregister => 2,
        }
    }
}

/// Transaction record body. Its index is assigned by the data log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub address: Address,
    pub block_height: BlockHeight,
    pub data: TxData,
}

/// Any record the data log stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRecord {
    Header(Header),
    GovernanceVariables(GovernanceVariables),
    BlockProduceInfo(BlockProduceInfo),
    PReps(PRepSnapshot),
    Transaction(TxRecord),
}

/// Parsed record key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKey {
    Header,
    GovernanceVariables(BlockHeight),
    BlockProduceInfo(BlockHeight),
    PReps(BlockHeight),
    Transaction(u64),
}

fn keyed(prefix: &[u8], n: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&n.to_be_bytes());
    key
}

fn suffix_u64(key: &[u8], prefix: &[u8]) -> Option<u64> {
    let rest = key.strip_prefix(prefix)?;
    let bytes: [u8; 8] = rest.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

impl RecordKey {
    pub fn to_bytes(self) -> Vec<u8> {
        match self {
            Self::Header => HEADER_KEY.to_vec(),
            Self::GovernanceVariables(h) => keyed(GOVERNANCE_PREFIX, h),
            Self::BlockProduceInfo(h) => keyed(BLOCK_PRODUCE_PREFIX, h),
            Self::PReps(h) => keyed(PREPS_PREFIX, h),
            Self::Transaction(i) => keyed(TRANSACTION_PREFIX, i),
        }
    }

    /// Parse a stored key. `None` for keys that are not records, such as
    /// [`LAST_TX_INDEX_KEY`].
    pub fn parse(key: &[u8]) -> Option<Self> {
        if key == HEADER_KEY {
            return Some(Self::Header);
        }
        // `prep` must be tried before shorter prefixes that could collide.
        if let Some(h) = suffix_u64(key, PREPS_PREFIX) {
            return Some(Self::PReps(h));
        }
        if let Some(h) = suffix_u64(key, GOVERNANCE_PREFIX) {
            return Some(Self::GovernanceVariables(h));
        }
        if let Some(h) = suffix_u64(key, BLOCK_PRODUCE_PREFIX) {
            return Some(Self::BlockProduceInfo(h));
        }
        suffix_u64(key, TRANSACTION_PREFIX).map(Self::Transaction)
    }
}

impl DataRecord {
    /// Metric label.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Header(_) => "header",
            Self::GovernanceVariables(_) => "governance",
            Self::BlockProduceInfo(_) => "block_produce",
            Self::PReps(_) => "preps",
            Self::Transaction(_) => "transaction",
        }
    }

    /// Block the record was written for.
    pub fn block_height(&self) -> BlockHeight {
        match self {
            Self::Header(h) => h.block_height,
            Self::GovernanceVariables(gv) => gv.block_height,
            Self::BlockProduceInfo(bp) => bp.block_height,
            Self::PReps(p) => p.block_height,
            Self::Transaction(tx) => tx.block_height,
        }
    }

    /// Key for every record except transactions, whose key depends on the
    /// index assigned at append time.
    pub fn own_key(&self) -> Option<RecordKey> {
        match self {
            Self::Header(_) => Some(RecordKey::Header),
            Self::GovernanceVariables(gv) => Some(RecordKey::GovernanceVariables(gv.block_height)),
            Self::BlockProduceInfo(bp) => Some(RecordKey::BlockProduceInfo(bp.block_height)),
            Self::PReps(p) => Some(RecordKey::PReps(p.block_height)),
            Self::Transaction(_) => None,
        }
    }

    /// MessagePack value bytes.
    pub fn encode_value(&self) -> Result<Vec<u8>, RewardCalcError> {
        let value = match self {
            Self::Header(h) => Value::Array(vec![
                Value::from(h.version),
                Value::from(h.block_height),
                Value::from(h.revision),
            ]),
            Self::GovernanceVariables(gv) => Value::Array(vec![
                int_value(&gv.calculated_irep),
                int_value(&gv.reward_rep),
                Value::from(gv.main_prep_count),
                Value::from(gv.sub_prep_count),
            ]),
            Self::BlockProduceInfo(bp) => Value::Array(vec![
                address_value(&bp.generator),
                Value::Array(bp.validators.iter().map(address_value).collect()),
            ]),
            Self::PReps(p) => Value::Array(vec![
                int_value(&p.total_delegation),
                Value::Array(
                    p.preps
                        .iter()
                        .map(|d| Value::Array(vec![address_value(&d.address), int_value(&d.delegated)]))
                        .collect(),
                ),
            ]),
            Self::Transaction(tx) => {
                let data = match &tx.data {
                    TxData::Delegation(entries) => Value::Array(
                        entries
                            .iter()
                            .map(|e| Value::Array(vec![address_value(&e.address), int_value(&e.amount)]))
                            .collect(),
                    ),
                    TxData::PRepRegister | TxData::PRepUnregister => Value::Nil,
                };
                Value::Array(vec![
                    address_value(&tx.address),
                    Value::from(tx.block_height),
                    Value::from(tx.data.type_code()),
                    data,
                ])
            }
        };
        let mut buf = Vec::with_capacity(64);
        rmpv::encode::write_value(&mut buf, &value)
            .map_err(|e| RewardCalcError::Storage(format!("encode {} record: {}", self.name(), e)))?;
        Ok(buf)
    }

    /// Decode a stored `(key, value)` pair.
    pub fn decode(key: &[u8], value: &[u8]) -> Result<(RecordKey, Self), RewardCalcError> {
        let record_key = RecordKey::parse(key)
            .ok_or_else(|| corrupt(format!("unknown record key {}", hex::encode(key))))?;
        let value = rmpv::decode::read_value(&mut &value[..])
            .map_err(|e| corrupt(format!("record value: {}", e)))?;
        let mut f = Items::new(&value)?;

        let record = match record_key {
            RecordKey::Header => Self::Header(Header {
                version: f.u32()?,
                block_height: f.u64()?,
                revision: f.u32()?,
            }),
            RecordKey::GovernanceVariables(block_height) => {
                Self::GovernanceVariables(GovernanceVariables {
                    block_height,
                    calculated_irep: f.u256()?,
                    reward_rep: f.u256()?,
                    main_prep_count: f.u32()?,
                    sub_prep_count: f.u32()?,
                })
            }
            RecordKey::BlockProduceInfo(block_height) => {
                let generator = f.address()?;
                let validators = f
                    .array()?
                    .iter()
                    .map(decode_address)
                    .collect::<Result<Vec<_>, _>>()?;
                Self::BlockProduceInfo(BlockProduceInfo {
                    block_height,
                    generator,
                    validators,
                })
            }
            RecordKey::PReps(block_height) => {
                let total_delegation = f.u256()?;
                let preps = f
                    .array()?
                    .iter()
                    .map(|pair| {
                        let mut p = Items::new(pair)?;
                        Ok(PRepDelegation {
                            address: p.address()?,
                            delegated: p.u256()?,
                        })
                    })
                    .collect::<Result<Vec<_>, RewardCalcError>>()?;
                Self::PReps(PRepSnapshot {
                    block_height,
                    total_delegation,
                    preps,
                })
            }
            RecordKey::Transaction(_) => {
                let address = f.address()?;
                let block_height = f.u64()?;
                let data = match f.u64()? {
                    0 => TxData::Delegation(
                        f.array()?
                            .iter()
                            .map(|pair| {
                                let mut p = Items::new(pair)?;
                                Ok(DelegationEntry {
                                    address: p.address()?,
                                    amount: p.u256()?,
                                })
                            })
                            .collect::<Result<Vec<_>, RewardCalcError>>()?,
                    ),
                    1 => TxData::PRepRegister,
                    2 => TxData::PRepUnregister,
                    other => return Err(corrupt(format!("unknown transaction type {}", other))),
                };
                Self::Transaction(TxRecord {
                    address,
                    block_height,
                    data,
                })
            }
        };
        Ok((record_key, record))
    }
}

fn corrupt(message: String) -> RewardCalcError {
    RewardCalcError::Storage(format!("corrupt data log record: {}", message))
}

fn address_value(address: &Address) -> Value {
    Value::Binary(address.to_bytes_including_prefix().to_vec())
}

fn int_value(value: &U256) -> Value {
    Value::Binary(u256_to_bytes(value))
}

fn decode_address(value: &Value) -> Result<Address, RewardCalcError> {
    let bytes = value
        .as_slice()
        .ok_or_else(|| corrupt("address is not binary".to_string()))?;
    Address::from_bytes_including_prefix(bytes).map_err(|e| corrupt(e.to_string()))
}

struct Items<'a> {
    items: std::slice::Iter<'a, Value>,
}

impl<'a> Items<'a> {
    fn new(value: &'a Value) -> Result<Self, RewardCalcError> {
        let items = value
            .as_array()
            .ok_or_else(|| corrupt("value is not an array".to_string()))?;
        Ok(Self { items: items.iter() })
    }

    fn next(&mut self) -> Result<&'a Value, RewardCalcError> {
        self.items
            .next()
            .ok_or_else(|| corrupt("missing field".to_string()))
    }

    fn u64(&mut self) -> Result<u64, RewardCalcError> {
        self.next()?
            .as_u64()
            .ok_or_else(|| corrupt("expected unsigned integer".to_string()))
    }

    fn u32(&mut self) -> Result<u32, RewardCalcError> {
        u32::try_from(self.u64()?).map_err(|_| corrupt("integer exceeds u32".to_string()))
    }

    fn u256(&mut self) -> Result<U256, RewardCalcError> {
        let bytes = self
            .next()?
            .as_slice()
            .ok_or_else(|| corrupt("expected integer bytes".to_string()))?;
        u256_from_bytes(bytes).map_err(|e| corrupt(e.to_string()))
    }

    fn address(&mut self) -> Result<Address, RewardCalcError> {
        decode_address(self.next()?)
    }

    fn array(&mut self) -> Result<&'a Vec<Value>, RewardCalcError> {
        self.next()?
            .as_array()
            .ok_or_else(|| corrupt("expected array".to_string()))
    }
}
