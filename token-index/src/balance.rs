//! Balance ledger
//!
//! Every transaction touching a tracked address is reduced to one net change
//! per (address, asset) pair: produced quantities minus consumed quantities.
//! Each non-zero net change becomes an immutable [`BalanceSnapshot`] holding
//! the absolute balance after that transaction, so the current balance of a
//! pair is always its latest snapshot in chain order.
//!
//! Snapshots are keyed by (address, asset, tx hash). Recording the same
//! transaction twice finds the keys already present and writes nothing.

use crate::{
    address::AddressComponents,
    error::{Error, Result},
    metrics::Metrics,
    source::AssetClassifier,
    storage::Storage,
    types::{Address, AssetId, BalanceSnapshot, KeyHash, RawAmount, ScriptHash, TxHash, TxRef},
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Net change of one (address, asset) pair within one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    /// Owning address
    pub address: Address,
    /// Payment credential of `address`
    pub payment_script_hash: ScriptHash,
    /// Stake credential of `address`
    pub stake_key_hash: Option<KeyHash>,
    /// Asset
    pub asset: AssetId,
    /// Produced minus consumed
    pub net: Decimal,
}

/// Per-transaction aggregation of consumed and produced amounts
#[derive(Debug, Clone, Default)]
pub struct BalanceChanges {
    changes: BTreeMap<(Address, AssetId), PendingChange>,
    malformed: usize,
}

impl BalanceChanges {
    /// Create empty aggregation
    pub fn new() -> Self {
        Self::default()
    }

    /// Amounts leaving `owner` (a consumed record)
    pub fn consume(&mut self, owner: &AddressComponents, amounts: &[RawAmount], native_unit: &str) {
        self.accumulate(owner, amounts, native_unit, false);
    }

    /// Amounts arriving at `owner` (a produced record)
    pub fn produce(&mut self, owner: &AddressComponents, amounts: &[RawAmount], native_unit: &str) {
        self.accumulate(owner, amounts, native_unit, true);
    }

    fn accumulate(
        &mut self,
        owner: &AddressComponents,
        amounts: &[RawAmount],
        native_unit: &str,
        produced: bool,
    ) {
        for amount in amounts {
            let asset = match parse_amount(amount, native_unit) {
                Ok(asset) => asset,
                Err(e) => {
                    tracing::warn!(
                        address = %owner.address,
                        unit = %amount.unit,
                        error = %e,
                        "Skipping malformed amount"
                    );
                    self.malformed += 1;
                    continue;
                }
            };

            let entry = self
                .changes
                .entry((owner.address.clone(), asset.clone()))
                .or_insert_with(|| PendingChange {
                    address: owner.address.clone(),
                    payment_script_hash: owner.payment_hash(),
                    stake_key_hash: owner.stake_hash(),
                    asset,
                    net: Decimal::ZERO,
                });

            let next = if produced {
                entry.net.checked_add(amount.quantity)
            } else {
                entry.net.checked_sub(amount.quantity)
            };
            match next {
                Some(net) => entry.net = net,
                None => {
                    tracing::warn!(
                        address = %owner.address,
                        unit = %amount.unit,
                        "Skipping amount that overflows the net change"
                    );
                    self.malformed += 1;
                }
            }
        }
    }

    /// Aggregated changes, ordered by (address, asset); includes zero nets
    pub fn iter(&self) -> impl Iterator<Item = &PendingChange> {
        self.changes.values()
    }

    /// Net change of one pair, if it was touched
    pub fn net_change(&self, address: &Address, asset: &AssetId) -> Option<Decimal> {
        self.changes
            .get(&(address.clone(), asset.clone()))
            .map(|change| change.net)
    }

    /// Amounts dropped as malformed
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Nothing touched
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

fn parse_amount(amount: &RawAmount, native_unit: &str) -> Result<AssetId> {
    let asset = AssetId::from_unit(&amount.unit, native_unit)?;
    if amount.quantity.is_sign_negative() || !amount.quantity.fract().is_zero() {
        return Err(Error::InvalidIdentifier(format!(
            "quantity {} is not a non-negative integer",
            amount.quantity
        )));
    }
    Ok(asset)
}

/// Balance difference between two snapshots of the same pair
///
/// With no previous snapshot the whole current quantity is the difference.
pub fn diff(current: &BalanceSnapshot, previous: Option<&BalanceSnapshot>) -> Decimal {
    match previous {
        Some(previous) => current.quantity - previous.quantity,
        None => current.quantity,
    }
}

/// Append-only balance history over the snapshot store
#[derive(Debug, Clone)]
pub struct BalanceLedger {
    storage: Arc<Storage>,
    metrics: Metrics,
    max_history_limit: usize,
}

impl BalanceLedger {
    /// Create ledger over `storage`
    pub fn new(storage: Arc<Storage>, metrics: Metrics, max_history_limit: usize) -> Self {
        Self {
            storage,
            metrics,
            max_history_limit,
        }
    }

    /// Append one snapshot per non-zero net change of `tx`
    ///
    /// Pairs that already have a snapshot for `tx.tx_hash` are skipped, so
    /// recording a transaction again is a no-op. All snapshots of one call are
    /// written in a single batch. Returns the snapshots that were written.
    pub fn record_event(
        &self,
        tx: &TxRef,
        changes: &BalanceChanges,
        classifier: &dyn AssetClassifier,
    ) -> Result<Vec<BalanceSnapshot>> {
        let mut appended = Vec::new();
        let mut skipped = 0;

        for change in changes.iter() {
            if change.net.is_zero() {
                continue;
            }

            if self
                .storage
                .snapshot_exists(&change.address, &change.asset, &tx.tx_hash)?
            {
                tracing::debug!(
                    address = %change.address,
                    asset = %change.asset,
                    tx_hash = %tx.tx_hash,
                    "Snapshot already recorded, skipping"
                );
                skipped += 1;
                continue;
            }

            let previous = self
                .storage
                .latest_snapshot(&change.address, &change.asset)?
                .map(|s| s.quantity)
                .unwrap_or(Decimal::ZERO);
            let quantity = previous.checked_add(change.net).ok_or_else(|| {
                Error::InvariantViolation(format!(
                    "balance of {} {} overflows",
                    change.address, change.asset
                ))
            })?;

            let is_registered_asset = change
                .asset
                .policy_id()
                .map(|policy| classifier.is_registered_policy(policy))
                .unwrap_or(false);

            tracing::info!(
                address = %change.address,
                asset = %change.asset,
                tx_hash = %tx.tx_hash,
                previous = %previous,
                net = %change.net,
                balance = %quantity,
                "Balance snapshot"
            );

            appended.push(BalanceSnapshot {
                address: change.address.clone(),
                payment_script_hash: change.payment_script_hash,
                stake_key_hash: change.stake_key_hash,
                tx: *tx,
                asset: change.asset.clone(),
                quantity,
                is_registered_asset,
                recorded_at: Utc::now(),
            });
        }

        if !appended.is_empty() {
            self.storage.append_snapshots(&appended)?;
        }
        self.metrics.record_snapshots(appended.len(), skipped);

        Ok(appended)
    }

    /// Most recent snapshot of (address, asset)
    pub fn latest(&self, address: &Address, asset: &AssetId) -> Result<Option<BalanceSnapshot>> {
        self.storage.latest_snapshot(address, asset)
    }

    /// Most recent snapshot of every asset `address` has held, newest first
    pub fn all_latest(&self, address: &Address) -> Result<Vec<BalanceSnapshot>> {
        let mut latest = Vec::new();
        for asset in self.storage.assets_for_address(address)? {
            if let Some(snapshot) = self.storage.latest_snapshot(address, &asset)? {
                latest.push(snapshot);
            }
        }
        sort_newest_first(&mut latest);
        Ok(latest)
    }

    /// Up to `limit` snapshots of (address, asset), newest first
    pub fn history(
        &self,
        address: &Address,
        asset: &AssetId,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>> {
        self.storage
            .snapshot_history(address, asset, None, self.clamp(limit))
    }

    /// Up to `limit` snapshots of `address` across all assets, newest first
    pub fn history_for_address(&self, address: &Address, limit: usize) -> Result<Vec<BalanceSnapshot>> {
        let limit = self.clamp(limit);
        let mut history = Vec::new();
        for asset in self.storage.assets_for_address(address)? {
            history.extend(self.storage.snapshot_history(address, &asset, None, limit)?);
        }
        sort_newest_first(&mut history);
        history.truncate(limit);
        Ok(history)
    }

    /// Latest snapshots of every address paying to `script`
    pub fn latest_by_payment_script(&self, script: &ScriptHash) -> Result<Vec<BalanceSnapshot>> {
        self.latest_for_addresses(self.storage.addresses_for_payment(script)?)
    }

    /// Latest snapshots of every address delegating to `stake`
    pub fn latest_by_stake_key(&self, stake: &KeyHash) -> Result<Vec<BalanceSnapshot>> {
        self.latest_for_addresses(self.storage.addresses_for_stake(stake)?)
    }

    /// Latest snapshots of addresses with both credentials
    pub fn latest_by_payment_and_stake(
        &self,
        script: &ScriptHash,
        stake: &KeyHash,
    ) -> Result<Vec<BalanceSnapshot>> {
        let delegated: BTreeSet<Address> =
            self.storage.addresses_for_stake(stake)?.into_iter().collect();
        let addresses = self
            .storage
            .addresses_for_payment(script)?
            .into_iter()
            .filter(|address| delegated.contains(address))
            .collect();
        self.latest_for_addresses(addresses)
    }

    fn latest_for_addresses(&self, addresses: Vec<Address>) -> Result<Vec<BalanceSnapshot>> {
        let mut latest = Vec::new();
        for address in addresses {
            latest.extend(self.all_latest(&address)?);
        }
        sort_newest_first(&mut latest);
        Ok(latest)
    }

    /// Every snapshot written for one transaction
    pub fn by_transaction(&self, tx_hash: &TxHash) -> Result<Vec<BalanceSnapshot>> {
        self.storage.snapshots_for_transaction(tx_hash)
    }

    /// Latest balances of `address` in registered programmable tokens
    pub fn registered_token_balances(&self, address: &Address) -> Result<Vec<BalanceSnapshot>> {
        Ok(self
            .all_latest(address)?
            .into_iter()
            .filter(|snapshot| snapshot.is_registered_asset)
            .collect())
    }

    /// Snapshot immediately preceding `snapshot` for the same pair
    pub fn previous(&self, snapshot: &BalanceSnapshot) -> Result<Option<BalanceSnapshot>> {
        Ok(self
            .storage
            .snapshot_history(&snapshot.address, &snapshot.asset, Some(&snapshot.tx), 1)?
            .into_iter()
            .next())
    }

    fn clamp(&self, limit: usize) -> usize {
        limit.min(self.max_history_limit)
    }
}

fn sort_newest_first(snapshots: &mut [BalanceSnapshot]) {
    snapshots.sort_by(|a, b| b.tx.cmp(&a.tx).then_with(|| a.asset.cmp(&b.asset)));
}
