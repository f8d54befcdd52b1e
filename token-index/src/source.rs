//! Seams to the collaborators that live outside the index
//!
//! - [`UtxoResolver`]: resolves a consumed record to its owner and amounts
//! - [`RegistryNodeSource`]: lists unspent registry nodes for a script
//! - [`AssetClassifier`]: answers whether a policy is a registered token
//!
//! [`TrackedScripts`] is the set of payment scripts whose addresses are
//! indexed. It is an immutable value handed to every ingestion call; callers
//! swap in a new value when the protocol parameters change.

use crate::registry::RegistryRecord;
use crate::types::{OutputRef, PolicyId, ScriptHash, TxOutput};
use crate::Result;
use std::collections::{BTreeSet, HashMap};

/// Resolves a consumed record to the output that created it
pub trait UtxoResolver: Send + Sync {
    /// Look up an output by identity; `None` if unknown
    fn resolve(&self, output_ref: &OutputRef) -> Result<Option<TxOutput>>;
}

/// Source of the current unspent registry nodes
pub trait RegistryNodeSource: Send + Sync {
    /// All unspent node records held by `spend_script`
    fn unspent_nodes(&self, spend_script: &ScriptHash) -> Result<Vec<RegistryRecord>>;
}

/// Classifies assets as registered programmable tokens
pub trait AssetClassifier: Send + Sync {
    /// Whether `policy_id` is a registered key
    fn is_registered_policy(&self, policy_id: &PolicyId) -> bool;
}

/// Payment scripts whose addresses are indexed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedScripts(BTreeSet<ScriptHash>);

impl TrackedScripts {
    /// Build from script hashes
    pub fn new(scripts: impl IntoIterator<Item = ScriptHash>) -> Self {
        Self(scripts.into_iter().collect())
    }

    /// Whether addresses with this payment credential are indexed
    pub fn contains(&self, script: &ScriptHash) -> bool {
        self.0.contains(script)
    }

    /// Nothing to index
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of tracked scripts
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate tracked scripts
    pub fn iter(&self) -> impl Iterator<Item = &ScriptHash> {
        self.0.iter()
    }
}

/// In-memory resolver, for callers that already hold the spent outputs
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    outputs: HashMap<OutputRef, TxOutput>,
}

impl MemoryResolver {
    /// Create empty resolver
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output
    pub fn insert(&mut self, output_ref: OutputRef, output: TxOutput) {
        self.outputs.insert(output_ref, output);
    }
}

impl UtxoResolver for MemoryResolver {
    fn resolve(&self, output_ref: &OutputRef) -> Result<Option<TxOutput>> {
        Ok(self.outputs.get(output_ref).cloned())
    }
}

/// Fixed list of registry records
#[derive(Debug, Clone, Default)]
pub struct StaticNodeSource {
    records: Vec<RegistryRecord>,
}

impl StaticNodeSource {
    /// Create from records
    pub fn new(records: Vec<RegistryRecord>) -> Self {
        Self { records }
    }
}

impl RegistryNodeSource for StaticNodeSource {
    fn unspent_nodes(&self, _spend_script: &ScriptHash) -> Result<Vec<RegistryRecord>> {
        Ok(self.records.clone())
    }
}
