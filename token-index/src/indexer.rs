//! Block processing
//!
//! For each transaction, in block order:
//!
//! 1. resolve every consumed record to its owner; owners whose payment
//!    credential is tracked contribute negative amounts
//! 2. produced records at tracked addresses contribute positive amounts
//! 3. registry nodes spent and created at the registry spend script update
//!    the node cache, and the shared registry view is rebuilt from it
//! 4. the aggregated net changes are recorded in the balance ledger
//! 5. tracked outputs are remembered so later transactions can resolve them
//!
//! Inputs are resolved before this transaction's outputs are stored, and the
//! stored outputs are never removed. Re-processing a transaction therefore sees
//! exactly the same inputs and produces the same net changes.

use crate::{
    address::{decompose, AddressComponents},
    balance::{BalanceChanges, BalanceLedger},
    error::Result,
    metrics::Metrics,
    registry::{RegistryNode, RegistryRecord, RegistrySet, SharedRegistry},
    source::{TrackedScripts, UtxoResolver},
    storage::Storage,
    types::{Address, BlockEvent, ChainTransaction, OutputRef, PolicyId, ScriptHash, TxOutput, TxRef},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Values every ingestion call is evaluated against
#[derive(Debug, Clone, Default)]
pub struct IndexContext {
    /// Payment scripts whose addresses are indexed
    pub tracked: Arc<TrackedScripts>,
    /// Registry view used to flag registered assets; updated as nodes change
    pub registry: SharedRegistry,
    /// Spend script holding the registry nodes; `None` leaves the view alone
    pub registry_script: Option<ScriptHash>,
    /// Policy of the node NFTs; when set, node outputs must carry one
    pub node_policy: Option<PolicyId>,
}

/// Outcome of one transaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Snapshots written
    pub snapshots: usize,
    /// Inputs with no known owner
    pub unresolved_inputs: usize,
    /// Amounts dropped as malformed
    pub malformed_amounts: usize,
    /// Outputs remembered for later resolution
    pub tracked_outputs: usize,
    /// Registry node records spent or created
    pub registry_updates: usize,
}

/// Outcome of one block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block slot
    pub slot: u64,
    /// Block height
    pub block_height: u64,
    /// Transactions processed
    pub transactions: usize,
    /// Snapshots written
    pub snapshots: usize,
    /// Inputs with no known owner
    pub unresolved_inputs: usize,
    /// Amounts dropped as malformed
    pub malformed_amounts: usize,
    /// Registry node records spent or created
    pub registry_updates: usize,
}

impl BlockSummary {
    fn add(&mut self, tx: &TransactionSummary) {
        self.transactions += 1;
        self.snapshots += tx.snapshots;
        self.unresolved_inputs += tx.unresolved_inputs;
        self.malformed_amounts += tx.malformed_amounts;
        self.registry_updates += tx.registry_updates;
    }
}

/// Turns chain events into balance snapshots
pub struct Indexer {
    storage: Arc<Storage>,
    ledger: BalanceLedger,
    resolver: Arc<dyn UtxoResolver>,
    native_unit: String,
    metrics: Metrics,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("native_unit", &self.native_unit)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    /// Create indexer
    ///
    /// `resolver` places consumed records; pass the storage itself to rely on
    /// the outputs this indexer has already seen.
    pub fn new(
        storage: Arc<Storage>,
        ledger: BalanceLedger,
        resolver: Arc<dyn UtxoResolver>,
        native_unit: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        Self {
            storage,
            ledger,
            resolver,
            native_unit: native_unit.into(),
            metrics,
        }
    }

    /// Process every transaction of `block` in order
    pub fn process_block(&self, block: &BlockEvent, context: &IndexContext) -> Result<BlockSummary> {
        let started = Instant::now();
        let mut summary = BlockSummary {
            slot: block.slot,
            block_height: block.block_height,
            ..Default::default()
        };

        if context.tracked.is_empty() {
            tracing::debug!(slot = block.slot, "No tracked scripts, skipping block");
            return Ok(summary);
        }

        for (index, tx) in block.transactions.iter().enumerate() {
            let tx_ref = block.tx_ref(index as u32, tx.tx_hash);
            let outcome = self.process_transaction(&tx_ref, tx, context)?;
            summary.add(&outcome);
        }

        self.metrics
            .record_block(summary.transactions, started.elapsed().as_secs_f64());

        tracing::debug!(
            slot = block.slot,
            block_height = block.block_height,
            transactions = summary.transactions,
            snapshots = summary.snapshots,
            registry_updates = summary.registry_updates,
            "Block processed"
        );

        Ok(summary)
    }

    /// Process one transaction at chain position `tx_ref`
    pub fn process_transaction(
        &self,
        tx_ref: &TxRef,
        tx: &ChainTransaction,
        context: &IndexContext,
    ) -> Result<TransactionSummary> {
        let mut changes = BalanceChanges::new();
        let mut summary = TransactionSummary::default();

        for input in &tx.inputs {
            let Some(output) = self.resolver.resolve(input)? else {
                tracing::debug!(tx_hash = %tx.tx_hash, input = %input, "Input not resolvable");
                summary.unresolved_inputs += 1;
                continue;
            };
            if let Some(owner) = tracked_owner(&output.address, &context.tracked) {
                changes.consume(&owner, &output.amounts, &self.native_unit);
            }
        }

        let mut tracked_outputs = Vec::new();
        let mut nodes = Vec::new();
        for (index, output) in tx.outputs.iter().enumerate() {
            let Some(owner) = components(&output.address) else {
                continue;
            };
            let payment = owner.payment_hash();
            if context.registry_script == Some(payment) {
                if let Some(node) = registry_node(output, context.node_policy.as_ref()) {
                    nodes.push(RegistryRecord {
                        output_ref: OutputRef::new(tx.tx_hash, index as u32),
                        node,
                    });
                }
            }
            if context.tracked.contains(&payment) {
                changes.produce(&owner, &output.amounts, &self.native_unit);
                tracked_outputs.push((index as u32, output.clone()));
            }
        }

        // Registration and first mint share a transaction, so the view must
        // include this transaction's nodes before its balances are classified
        if context.registry_script.is_some() {
            summary.registry_updates = self.storage.apply_registry_changes(&tx.inputs, &nodes)?;
            if summary.registry_updates > 0 {
                self.reload_registry(&context.registry)?;
            }
        }

        let registry = context.registry.load();
        let snapshots = self.ledger.record_event(tx_ref, &changes, registry.as_ref())?;

        if !tracked_outputs.is_empty() {
            self.storage.put_outputs(&tx.tx_hash, &tracked_outputs)?;
        }

        self.metrics.unresolved_inputs.inc_by(summary.unresolved_inputs as u64);
        self.metrics.malformed_amounts.inc_by(changes.malformed() as u64);

        summary.snapshots = snapshots.len();
        summary.malformed_amounts = changes.malformed();
        summary.tracked_outputs = tracked_outputs.len();
        Ok(summary)
    }

    /// Rebuild the shared view from the stored node records
    fn reload_registry(&self, shared: &SharedRegistry) -> Result<()> {
        match RegistrySet::from_records(self.storage.registry_records()?) {
            Ok(view) => {
                let view = shared.store(view);
                self.metrics.registry_nodes.set(view.len() as i64);
                tracing::info!(nodes = view.len(), "Registry view updated from chain");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stored registry nodes inconsistent, keeping previous view");
            }
        }
        Ok(())
    }
}

fn components(address: &Address) -> Option<AddressComponents> {
    match decompose(address) {
        Ok(components) => Some(components),
        Err(e) => {
            tracing::debug!(address = %address, error = %e, "Address not decomposable");
            None
        }
    }
}

fn tracked_owner(address: &Address, tracked: &TrackedScripts) -> Option<AddressComponents> {
    components(address).filter(|owner| tracked.contains(&owner.payment_hash()))
}

/// Node carried by an output at the registry spend script, if any
fn registry_node(output: &TxOutput, node_policy: Option<&PolicyId>) -> Option<RegistryNode> {
    if let Some(policy) = node_policy {
        let policy = policy.to_hex();
        let holds_nft = output
            .amounts
            .iter()
            .any(|amount| amount.unit.starts_with(&policy) && amount.quantity > Decimal::ZERO);
        if !holds_nft {
            tracing::debug!(address = %output.address, "Registry output without node token");
            return None;
        }
    }

    let Some(datum) = output.inline_datum.as_deref() else {
        tracing::debug!(address = %output.address, "Registry output without inline datum");
        return None;
    };
    match RegistryNode::from_inline_datum(datum) {
        Ok(node) => Some(node),
        Err(e) => {
            tracing::warn!(address = %output.address, error = %e, "Registry datum not decodable");
            None
        }
    }
}
