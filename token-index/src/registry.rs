//! Registry set: an on-chain sorted linked list of registered policy ids
//!
//! Every registered policy id owns one node record; each node names the key of
//! its successor. Starting at the head sentinel and following `next` visits
//! every key in strictly increasing order and ends at the tail sentinel, so
//! the half-open intervals `[key, next)` partition the identifier space.
//!
//! Registering a key never touches more than two records: the gap node whose
//! interval contains the key is spent and re-created pointing at the newcomer,
//! and the newcomer is created pointing at the gap node's old successor.
//!
//! ```text
//!  before:  [head | P3] ------------------> [P3 | tail]
//!  insert P1:
//!  after:   [head | P1] --> [P1 | P3] ----> [P3 | tail]
//! ```
//!
//! No lock is held over the on-chain list. A plan references the backing
//! record of its gap node, and only one plan per gap node can ever be
//! realized; the loser observes [`Error::StalePlan`] and re-plans against a
//! refreshed view.

use crate::source::AssetClassifier;
use crate::types::{OutputRef, PolicyId, ScriptHash};
use crate::{Error, Result};
use ciborium::value::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Length of the tail sentinel when written back on chain
pub const TAIL_SENTINEL_LEN: usize = 30;

const KEY_LEN: usize = 28;

/// Position in the registry key space
///
/// The derived order puts [`NodeKey::Head`] below every policy id and
/// [`NodeKey::Tail`] above every policy id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    /// Head sentinel (empty key)
    Head,
    /// Registered policy id
    Token(PolicyId),
    /// Tail sentinel (all `0xff`, longer than a policy id)
    Tail,
}

impl NodeKey {
    /// Decode from the raw bytes stored in a node datum
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(NodeKey::Head);
        }
        // A 28-byte key is always a policy id, even when every byte is 0xff
        if bytes.len() > KEY_LEN && bytes.iter().all(|b| *b == 0xff) {
            return Ok(NodeKey::Tail);
        }
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::InvalidIdentifier(format!(
                "registry key must be {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(NodeKey::Token(PolicyId::from_bytes(key)))
    }

    /// Decode from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::from_bytes(&hex::decode(s)?)
    }

    /// Raw bytes as stored in a node datum
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            NodeKey::Head => Vec::new(),
            NodeKey::Token(policy_id) => policy_id.as_bytes().to_vec(),
            NodeKey::Tail => vec![0xff; TAIL_SENTINEL_LEN],
        }
    }

    /// Policy id, for non-sentinel keys
    pub fn policy_id(&self) -> Option<&PolicyId> {
        match self {
            NodeKey::Token(policy_id) => Some(policy_id),
            _ => None,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Head => write!(f, "<head>"),
            NodeKey::Token(policy_id) => write!(f, "{}", policy_id),
            NodeKey::Tail => write!(f, "<tail>"),
        }
    }
}

/// One element of the registry list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryNode {
    /// Key owned by this node
    pub key: NodeKey,
    /// Key of the following node
    pub next: NodeKey,
    /// Script governing transfers of `key`'s token
    pub transfer_logic: Option<ScriptHash>,
    /// Script governing third-party transfers (seizure, freeze)
    pub third_party_transfer_logic: Option<ScriptHash>,
    /// Cross-reference to a global state policy
    pub global_state_policy: Option<PolicyId>,
}

impl RegistryNode {
    /// Head sentinel of an empty registry
    pub fn head() -> Self {
        Self {
            key: NodeKey::Head,
            next: NodeKey::Tail,
            transfer_logic: None,
            third_party_transfer_logic: None,
            global_state_policy: None,
        }
    }

    /// New node for `key` carrying `payload`
    pub fn new(key: PolicyId, next: NodeKey, payload: &NodePayload) -> Self {
        Self {
            key: NodeKey::Token(key),
            next,
            transfer_logic: Some(payload.transfer_logic),
            third_party_transfer_logic: payload.third_party_transfer_logic,
            global_state_policy: payload.global_state_policy,
        }
    }

    /// Same node pointing at a different successor
    pub fn with_next(&self, next: NodeKey) -> Self {
        Self {
            next,
            ..self.clone()
        }
    }

    /// Decode a node from the hex CBOR inline datum of its record
    pub fn from_inline_datum(datum: &str) -> Result<Self> {
        Self::try_from(RegistryDatum::from_cbor_hex(datum)?)
    }

    /// Whether `key` falls strictly inside `(self.key, self.next)`
    pub fn covers(&self, key: &NodeKey) -> bool {
        self.key < *key && *key < self.next
    }
}

/// Caller-supplied fields of a node being registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePayload {
    /// Transfer logic script
    pub transfer_logic: ScriptHash,
    /// Third-party transfer logic script
    pub third_party_transfer_logic: Option<ScriptHash>,
    /// Global state policy
    pub global_state_policy: Option<PolicyId>,
}

/// Registry node together with the record that materializes it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Backing record identity
    pub output_ref: OutputRef,
    /// Decoded node
    pub node: RegistryNode,
}

/// Node datum as hex fields; empty strings mark absent values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDatum {
    /// Key bytes
    pub key: String,
    /// Next key bytes
    pub next: String,
    /// Transfer logic script hash
    #[serde(default)]
    pub transfer_logic_script: String,
    /// Third-party transfer logic script hash
    #[serde(default)]
    pub third_party_transfer_logic_script: String,
    /// Global state policy id
    #[serde(default)]
    pub global_state_policy_id: String,
}

impl RegistryDatum {
    /// Decode the hex CBOR of an on-chain node datum
    ///
    /// The datum is `Constr 0 [key, next, transfer, third_party, global_state]`
    /// where both transfer fields are credentials (`Constr 0|1 [hash]`) and the
    /// other fields are byte strings. The head carries empty values.
    pub fn from_cbor_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)?;
        let value: Value = ciborium::de::from_reader(bytes.as_slice())
            .map_err(|e| Error::InvalidDatum(format!("not CBOR: {:?}", e)))?;

        let (0, fields) = constr(&value)? else {
            return Err(Error::InvalidDatum("node datum must be constructor 0".to_string()));
        };
        let [key, next, transfer, third_party, global_state] = fields else {
            return Err(Error::InvalidDatum(format!(
                "node datum has {} fields, expected 5",
                fields.len()
            )));
        };

        Ok(Self {
            key: hex::encode(plutus_bytes(key)?),
            next: hex::encode(plutus_bytes(next)?),
            transfer_logic_script: hex::encode(credential_hash(transfer)?),
            third_party_transfer_logic_script: hex::encode(credential_hash(third_party)?),
            global_state_policy_id: hex::encode(plutus_bytes(global_state)?),
        })
    }

    /// Encode as hex CBOR, the inverse of [`RegistryDatum::from_cbor_hex`]
    ///
    /// The head carries `Constr 0` placeholder credentials, every other node
    /// script credentials (`Constr 1`).
    pub fn to_cbor_hex(&self) -> Result<String> {
        let credential = if self.key.is_empty() { 0 } else { 1 };
        let value = constr_value(
            0,
            vec![
                Value::Bytes(hex::decode(&self.key)?),
                Value::Bytes(hex::decode(&self.next)?),
                constr_value(credential, vec![Value::Bytes(hex::decode(&self.transfer_logic_script)?)]),
                constr_value(
                    credential,
                    vec![Value::Bytes(hex::decode(&self.third_party_transfer_logic_script)?)],
                ),
                Value::Bytes(hex::decode(&self.global_state_policy_id)?),
            ],
        );
        encode_cbor_hex(&value)
    }
}

/// Plutus constructor with alternative `alt`
pub(crate) fn constr_value(alt: u64, fields: Vec<Value>) -> Value {
    Value::Tag(121 + alt, Box::new(Value::Array(fields)))
}

pub(crate) fn encode_cbor_hex(value: &Value) -> Result<String> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| Error::InvalidDatum(format!("CBOR encoding failed: {:?}", e)))?;
    Ok(hex::encode(bytes))
}

/// Plutus constructor alternatives 0..=6 are CBOR tags 121..=127
fn constr(value: &Value) -> Result<(u64, &[Value])> {
    match value {
        Value::Tag(tag @ 121..=127, inner) => match &**inner {
            Value::Array(fields) => Ok((tag - 121, fields.as_slice())),
            _ => Err(Error::InvalidDatum("constructor fields must be a list".to_string())),
        },
        _ => Err(Error::InvalidDatum("expected a constructor".to_string())),
    }
}

fn plutus_bytes(value: &Value) -> Result<&[u8]> {
    match value {
        Value::Bytes(bytes) => Ok(bytes),
        _ => Err(Error::InvalidDatum("expected a byte string".to_string())),
    }
}

fn credential_hash(value: &Value) -> Result<&[u8]> {
    match constr(value)? {
        (0 | 1, [hash]) => plutus_bytes(hash),
        (alt, fields) => Err(Error::InvalidDatum(format!(
            "bad credential: constructor {} with {} fields",
            alt,
            fields.len()
        ))),
    }
}

fn optional_hash(s: &str) -> Result<Option<ScriptHash>> {
    if s.is_empty() {
        Ok(None)
    } else {
        ScriptHash::from_hex(s).map(Some)
    }
}

fn hash_or_empty(hash: &Option<ScriptHash>) -> String {
    hash.map(|h| h.to_hex()).unwrap_or_default()
}

impl TryFrom<RegistryDatum> for RegistryNode {
    type Error = Error;

    fn try_from(datum: RegistryDatum) -> Result<Self> {
        let key = NodeKey::from_hex(&datum.key)?;
        let next = NodeKey::from_hex(&datum.next)?;
        if key == NodeKey::Tail {
            return Err(Error::InvalidIdentifier("node key cannot be the tail".to_string()));
        }
        if next == NodeKey::Head {
            return Err(Error::InvalidIdentifier("node next cannot be the head".to_string()));
        }

        Ok(Self {
            key,
            next,
            transfer_logic: optional_hash(&datum.transfer_logic_script)?,
            third_party_transfer_logic: optional_hash(&datum.third_party_transfer_logic_script)?,
            global_state_policy: optional_hash(&datum.global_state_policy_id)?,
        })
    }
}

impl From<&RegistryNode> for RegistryDatum {
    fn from(node: &RegistryNode) -> Self {
        Self {
            key: hex::encode(node.key.to_bytes()),
            next: hex::encode(node.next.to_bytes()),
            transfer_logic_script: hash_or_empty(&node.transfer_logic),
            third_party_transfer_logic_script: hash_or_empty(&node.third_party_transfer_logic),
            global_state_policy_id: hash_or_empty(&node.global_state_policy),
        }
    }
}

/// Exact mutation that registers one new key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertionPlan {
    /// Gap node to spend, with its backing record
    pub consume: RegistryRecord,
    /// Gap node re-created pointing at the new key
    pub mutated_node: RegistryNode,
    /// Node created for the new key
    pub new_node: RegistryNode,
}

impl InsertionPlan {
    /// Key being registered
    pub fn inserted_key(&self) -> &NodeKey {
        &self.new_node.key
    }
}

/// Read-only view of the registry nodes at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySet {
    nodes: BTreeMap<NodeKey, RegistryRecord>,
}

impl RegistrySet {
    /// Build a view from unspent node records
    ///
    /// Rejects records that cannot be part of a sorted list (duplicate keys,
    /// a backing record listed twice, a node that does not precede its next).
    pub fn from_records(records: impl IntoIterator<Item = RegistryRecord>) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        let mut seen_refs = HashSet::new();

        for record in records {
            if record.node.key >= record.node.next {
                return Err(Error::CorruptNodeSet(format!(
                    "node {} does not precede its next {}",
                    record.node.key, record.node.next
                )));
            }
            if !seen_refs.insert(record.output_ref) {
                return Err(Error::CorruptNodeSet(format!(
                    "record {} listed twice",
                    record.output_ref
                )));
            }
            let key = record.node.key;
            if let Some(existing) = nodes.insert(key, record) {
                return Err(Error::CorruptNodeSet(format!(
                    "key {} held by more than one record ({})",
                    key, existing.output_ref
                )));
            }
        }

        Ok(Self { nodes })
    }

    /// Number of nodes, head included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// No nodes at all (protocol not bootstrapped)
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Records in key order
    pub fn records(&self) -> impl Iterator<Item = &RegistryRecord> {
        self.nodes.values()
    }

    /// Record owning `key`
    pub fn get(&self, key: &PolicyId) -> Option<&RegistryRecord> {
        self.nodes.get(&NodeKey::Token(*key))
    }

    /// Whether some node owns `key`
    pub fn is_registered(&self, key: &PolicyId) -> bool {
        self.nodes.contains_key(&NodeKey::Token(*key))
    }

    /// The unique node `n` with `n.key < key < n.next`
    ///
    /// Zero or several matches mean the view is corrupt or stale.
    pub fn find_insertion_gap(&self, key: &PolicyId) -> Result<&RegistryRecord> {
        let target = NodeKey::Token(*key);
        let mut matches = self.nodes.values().filter(|r| r.node.covers(&target));

        match (matches.next(), matches.next()) {
            (Some(gap), None) => Ok(gap),
            (None, _) => Err(Error::CorruptNodeSet(format!(
                "no node covers {} ({} nodes in view)",
                key,
                self.nodes.len()
            ))),
            (Some(first), Some(second)) => Err(Error::CorruptNodeSet(format!(
                "nodes {} and {} both cover {}",
                first.node.key, second.node.key, key
            ))),
        }
    }

    /// Compute the two-node rewrite that registers `key`
    pub fn plan_insertion(&self, key: PolicyId, payload: NodePayload) -> Result<InsertionPlan> {
        if self.is_registered(&key) {
            return Err(Error::DuplicateKey(key));
        }

        let gap = self.find_insertion_gap(&key)?;
        let mutated_node = gap.node.with_next(NodeKey::Token(key));
        let new_node = RegistryNode::new(key, gap.node.next, &payload);

        tracing::info!(
            key = %key,
            gap_key = %gap.node.key,
            gap_next = %gap.node.next,
            gap_record = %gap.output_ref,
            "Insertion planned"
        );

        Ok(InsertionPlan {
            consume: gap.clone(),
            mutated_node,
            new_node,
        })
    }

    /// Verify the full partition invariant
    pub fn check_partition(&self) -> Result<()> {
        let mut records = self.nodes.values();
        let first = records
            .next()
            .ok_or_else(|| Error::CorruptNodeSet("registry has no head node".to_string()))?;
        if first.node.key != NodeKey::Head {
            return Err(Error::CorruptNodeSet(format!(
                "first node is {}, not the head",
                first.node.key
            )));
        }

        let mut previous = first;
        for record in records {
            if previous.node.next != record.node.key {
                return Err(Error::CorruptNodeSet(format!(
                    "node {} points at {} but the following node is {}",
                    previous.node.key, previous.node.next, record.node.key
                )));
            }
            previous = record;
        }

        if previous.node.next != NodeKey::Tail {
            return Err(Error::CorruptNodeSet(format!(
                "last node {} points at {}, not the tail",
                previous.node.key, previous.node.next
            )));
        }

        Ok(())
    }

    /// View after `plan` has been committed
    ///
    /// `mutated_ref` and `new_ref` are the records the commit produced. Fails
    /// with [`Error::StalePlan`] if the gap record is no longer in this view.
    pub fn apply(
        &self,
        plan: &InsertionPlan,
        mutated_ref: OutputRef,
        new_ref: OutputRef,
    ) -> Result<Self> {
        let current = self.nodes.get(&plan.consume.node.key);
        if current != Some(&plan.consume) {
            return Err(Error::StalePlan {
                consumed: plan.consume.output_ref,
            });
        }
        if let Some(key) = plan.new_node.key.policy_id() {
            if self.is_registered(key) {
                return Err(Error::DuplicateKey(*key));
            }
        }

        let mut nodes = self.nodes.clone();
        nodes.insert(
            plan.mutated_node.key,
            RegistryRecord {
                output_ref: mutated_ref,
                node: plan.mutated_node.clone(),
            },
        );
        nodes.insert(
            plan.new_node.key,
            RegistryRecord {
                output_ref: new_ref,
                node: plan.new_node.clone(),
            },
        );

        Ok(Self { nodes })
    }
}

impl AssetClassifier for RegistrySet {
    fn is_registered_policy(&self, policy_id: &PolicyId) -> bool {
        self.is_registered(policy_id)
    }
}

/// Registry view shared between the ingestion actor and readers
///
/// Readers take a cheap [`Arc`] of the current view; writers swap in a whole
/// new view, so a reader never observes a half-applied change.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry(Arc<RwLock<Arc<RegistrySet>>>);

impl SharedRegistry {
    /// Share `view`
    pub fn new(view: RegistrySet) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(view))))
    }

    /// Current view
    pub fn load(&self) -> Arc<RegistrySet> {
        self.0.read().clone()
    }

    /// Replace the current view
    pub fn store(&self, view: RegistrySet) -> Arc<RegistrySet> {
        let view = Arc::new(view);
        *self.0.write() = view.clone();
        view
    }
}
