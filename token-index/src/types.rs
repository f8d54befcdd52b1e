//! Core types for the token index
//!
//! All types are designed for:
//! - Deterministic serialization (bincode on disk, JSON at the edges)
//! - Explicit presence/absence (no sentinel nulls)
//! - Exact arithmetic (Decimal quantities, scale 0)

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hex length of a policy identifier inside an asset unit
pub const POLICY_ID_HEX_LEN: usize = 56;

/// Maximum asset name length in bytes
pub const MAX_ASSET_NAME_BYTES: usize = 32;

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        Error::InvalidIdentifier(format!("{} must be {} bytes, got {}", what, N, len))
    })
}

/// 28-byte Blake2b-224 digest (script hash, key hash, policy id)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash28([u8; 28]);

/// Minting policy identifier
pub type PolicyId = Hash28;

/// Script hash (payment credential, transfer logic)
pub type ScriptHash = Hash28;

/// Verification key hash (stake credential)
pub type KeyHash = Hash28;

impl Hash28 {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 28]) -> Self {
        Self(bytes)
    }

    /// Parse from 56 hex characters
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_fixed::<28>(s, "hash").map(Self)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 28] {
        &self.0
    }

    /// Lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Hash28 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Hash28 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash28 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash28({})", self.to_hex())
    }
}

impl Serialize for Hash28 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash28 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// 32-byte transaction hash
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from 64 hex characters
    pub fn from_hex(s: &str) -> Result<Self> {
        decode_fixed::<32>(s, "transaction hash").map(Self)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.to_hex())
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Opaque chain address (bech32 or hex)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset name (up to 32 bytes)
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AssetName(Vec<u8>);

impl AssetName {
    /// Create from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > MAX_ASSET_NAME_BYTES {
            return Err(Error::InvalidIdentifier(format!(
                "asset name is {} bytes, maximum is {}",
                bytes.len(),
                MAX_ASSET_NAME_BYTES
            )));
        }
        Ok(Self(bytes))
    }

    /// Parse from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::new(hex::decode(s)?)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for AssetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetName({})", self.to_hex())
    }
}

impl Serialize for AssetName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AssetName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Asset identity: the chain's native coin or a (policy, name) token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AssetId {
    /// Native coin
    Native,
    /// Minted token
    Token {
        /// Minting policy
        policy_id: PolicyId,
        /// Asset name, absent when the unit is the bare policy id
        name: Option<AssetName>,
    },
}

impl AssetId {
    /// Parse a raw unit string (`<policy hex><name hex>` or the native unit)
    pub fn from_unit(unit: &str, native_unit: &str) -> Result<Self> {
        if unit == native_unit {
            return Ok(AssetId::Native);
        }

        if unit.len() < POLICY_ID_HEX_LEN || !unit.is_char_boundary(POLICY_ID_HEX_LEN) {
            return Err(Error::InvalidIdentifier(format!(
                "asset unit shorter than policy id: {}",
                unit
            )));
        }

        let (policy_hex, name_hex) = unit.split_at(POLICY_ID_HEX_LEN);
        let policy_id = PolicyId::from_hex(policy_hex)?;
        let name = if name_hex.is_empty() {
            None
        } else {
            Some(AssetName::from_hex(name_hex)?)
        };

        Ok(AssetId::Token { policy_id, name })
    }

    /// Render back to a unit string
    pub fn unit(&self, native_unit: &str) -> String {
        match self {
            AssetId::Native => native_unit.to_string(),
            AssetId::Token { policy_id, name } => match name {
                Some(name) => format!("{}{}", policy_id, name),
                None => policy_id.to_hex(),
            },
        }
    }

    /// Policy id for tokens
    pub fn policy_id(&self) -> Option<&PolicyId> {
        match self {
            AssetId::Native => None,
            AssetId::Token { policy_id, .. } => Some(policy_id),
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetId::Native => write!(f, "native"),
            AssetId::Token { policy_id, name: Some(name) } => write!(f, "{}.{}", policy_id, name),
            AssetId::Token { policy_id, name: None } => write!(f, "{}", policy_id),
        }
    }
}

/// Transaction position on chain; the derived order is chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxRef {
    /// Slot of the containing block
    pub slot: u64,
    /// Height of the containing block
    pub block_height: u64,
    /// Position of the transaction inside its block
    pub tx_index: u32,
    /// Transaction hash
    pub tx_hash: TxHash,
}

/// Identity of one transaction output (the backing record of a UTXO)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    /// Producing transaction
    pub tx_hash: TxHash,
    /// Output index within the producing transaction
    pub index: u32,
}

impl OutputRef {
    /// Create new output reference
    pub fn new(tx_hash: TxHash, index: u32) -> Self {
        Self { tx_hash, index }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_hash, self.index)
    }
}

/// Unparsed per-asset amount as delivered by the chain event source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAmount {
    /// Native unit or `<policy hex><name hex>`
    pub unit: String,
    /// Quantity (integral)
    pub quantity: Decimal,
}

impl RawAmount {
    /// Create new raw amount
    pub fn new(unit: impl Into<String>, quantity: impl Into<Decimal>) -> Self {
        Self {
            unit: unit.into(),
            quantity: quantity.into(),
        }
    }
}

/// Produced transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Owning address
    pub address: Address,
    /// Per-asset amounts
    pub amounts: Vec<RawAmount>,
    /// Inline datum (hex CBOR), if any
    #[serde(default)]
    pub inline_datum: Option<String>,
}

/// Transaction as delivered by the chain event source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTransaction {
    /// Transaction hash
    pub tx_hash: TxHash,
    /// Consumed records
    pub inputs: Vec<OutputRef>,
    /// Produced records, in output-index order
    pub outputs: Vec<TxOutput>,
}

/// Block of transactions, in chain order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEvent {
    /// Block slot
    pub slot: u64,
    /// Block height
    pub block_height: u64,
    /// Transactions in block order
    pub transactions: Vec<ChainTransaction>,
}

impl BlockEvent {
    /// Chain position of the transaction at `tx_index`
    pub fn tx_ref(&self, tx_index: u32, tx_hash: TxHash) -> TxRef {
        TxRef {
            slot: self.slot,
            block_height: self.block_height,
            tx_index,
            tx_hash,
        }
    }
}

/// Absolute balance of one (address, asset) immediately after one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Owning address
    pub address: Address,
    /// Payment credential hash of `address`
    pub payment_script_hash: ScriptHash,
    /// Stake credential hash of `address`, if it has one
    pub stake_key_hash: Option<KeyHash>,
    /// Transaction after which this balance holds
    pub tx: TxRef,
    /// Asset
    pub asset: AssetId,
    /// Absolute balance (not a delta)
    pub quantity: Decimal,
    /// Asset policy was in the registry when indexed
    pub is_registered_asset: bool,
    /// Wall-clock time the snapshot was written
    pub recorded_at: DateTime<Utc>,
}
