//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `snapshots` - Balance snapshots (key: pair || tx_hash)
//! - `history` - Chain-ordered snapshot index (key: pair || slot || height || tx_index || tx_hash)
//! - `assets` - Assets ever held per address (key: address || asset)
//! - `credentials` - Addresses per credential (key: tag || hash || address)
//! - `transactions` - Snapshots per transaction (key: tx_hash || pair)
//! - `outputs` - Tracked outputs (key: tx_hash || index)
//! - `registry` - Unspent registry nodes (key: tx_hash || index)
//! - `registry_spent` - Registry node records seen spent (key: tx_hash || index)
//!
//! `pair` is the length-prefixed address followed by the asset key, so every
//! scan over one address or one (address, asset) pair is a contiguous range.

use crate::{
    error::{Error, Result},
    registry::RegistryRecord,
    source::UtxoResolver,
    types::{
        Address, AssetId, BalanceSnapshot, Hash28, KeyHash, OutputRef, ScriptHash, TxHash,
        TxOutput, TxRef,
    },
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_SNAPSHOTS: &str = "snapshots";
const CF_HISTORY: &str = "history";
const CF_ASSETS: &str = "assets";
const CF_CREDENTIALS: &str = "credentials";
const CF_TRANSACTIONS: &str = "transactions";
const CF_OUTPUTS: &str = "outputs";
const CF_REGISTRY: &str = "registry";
const CF_REGISTRY_SPENT: &str = "registry_spent";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_SNAPSHOTS,
    CF_HISTORY,
    CF_ASSETS,
    CF_CREDENTIALS,
    CF_TRANSACTIONS,
    CF_OUTPUTS,
    CF_REGISTRY,
    CF_REGISTRY_SPENT,
];

/// slot (8) || height (8) || tx_index (4) || tx_hash (32)
const HISTORY_SUFFIX_LEN: usize = 52;
const TX_HASH_LEN: usize = 32;

const TAG_PAYMENT: u8 = b'P';
const TAG_STAKE: u8 = b'S';

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").field("path", &self.db.path()).finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = COLUMN_FAMILIES.len(),
            "Opened RocksDB"
        );

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            CF_SNAPSHOTS | CF_OUTPUTS => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            _ => {
                // Index families are read on every query
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
        }
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    /// Forward scan of every entry whose key starts with `prefix`
    fn scan_prefix(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut entries = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    // Snapshot operations

    /// Whether a snapshot exists for (address, asset) at `tx_hash`
    pub fn snapshot_exists(&self, address: &Address, asset: &AssetId, tx_hash: &TxHash) -> Result<bool> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        let key = snapshot_key(&pair_key(address, asset)?, tx_hash);
        Ok(self.db.get_pinned_cf(cf, key)?.is_some())
    }

    fn get_snapshot_by_pair(&self, pair: &[u8], tx_hash: &TxHash) -> Result<Option<BalanceSnapshot>> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        match self.db.get_cf(cf, snapshot_key(pair, tx_hash))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Snapshots of (address, asset), newest first
    ///
    /// Starts strictly before `before` when given.
    pub fn snapshot_history(
        &self,
        address: &Address,
        asset: &AssetId,
        before: Option<&TxRef>,
        limit: usize,
    ) -> Result<Vec<BalanceSnapshot>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let cf = self.cf_handle(CF_HISTORY)?;
        let pair = pair_key(address, asset)?;
        let start = match before {
            Some(tx) => history_key(&pair, tx),
            None => {
                let mut key = pair.clone();
                key.extend_from_slice(&[0xff; HISTORY_SUFFIX_LEN]);
                key
            }
        };

        let mut snapshots = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Reverse))
        {
            let (key, _) = item?;
            if !key.starts_with(&pair) {
                break;
            }
            if key.len() != pair.len() + HISTORY_SUFFIX_LEN {
                return Err(Error::Storage(format!("Malformed history key for {}", address)));
            }
            // Reverse seek lands on `start` itself when it exists
            if before.is_some() && key.as_ref() == start.as_slice() {
                continue;
            }

            let tx_hash = tx_hash_suffix(&key)?;
            let snapshot = self.get_snapshot_by_pair(&pair, &tx_hash)?.ok_or_else(|| {
                Error::Storage(format!("History entry without snapshot: {} {}", address, tx_hash))
            })?;
            snapshots.push(snapshot);
            if snapshots.len() >= limit {
                break;
            }
        }

        Ok(snapshots)
    }

    /// Most recent snapshot of (address, asset)
    pub fn latest_snapshot(&self, address: &Address, asset: &AssetId) -> Result<Option<BalanceSnapshot>> {
        Ok(self.snapshot_history(address, asset, None, 1)?.into_iter().next())
    }

    /// Every asset `address` has a snapshot for
    pub fn assets_for_address(&self, address: &Address) -> Result<Vec<AssetId>> {
        let cf = self.cf_handle(CF_ASSETS)?;
        self.scan_prefix(cf, &address_prefix(address)?)?
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
            .collect()
    }

    /// Addresses whose payment credential is `hash`
    pub fn addresses_for_payment(&self, hash: &ScriptHash) -> Result<Vec<Address>> {
        self.addresses_for_credential(TAG_PAYMENT, hash)
    }

    /// Addresses whose stake credential is `hash`
    pub fn addresses_for_stake(&self, hash: &KeyHash) -> Result<Vec<Address>> {
        self.addresses_for_credential(TAG_STAKE, hash)
    }

    fn addresses_for_credential(&self, tag: u8, hash: &Hash28) -> Result<Vec<Address>> {
        let cf = self.cf_handle(CF_CREDENTIALS)?;
        let prefix = credential_prefix(tag, hash);
        self.scan_prefix(cf, &prefix)?
            .into_iter()
            .map(|(_, value)| {
                String::from_utf8(value.into_vec())
                    .map(Address::new)
                    .map_err(|e| Error::Storage(format!("Corrupt credential index: {}", e)))
            })
            .collect()
    }

    /// Every snapshot written for `tx_hash`
    pub fn snapshots_for_transaction(&self, tx_hash: &TxHash) -> Result<Vec<BalanceSnapshot>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut snapshots = Vec::new();
        for (key, _) in self.scan_prefix(cf, tx_hash.as_bytes())? {
            let pair = &key[TX_HASH_LEN..];
            let snapshot = self.get_snapshot_by_pair(pair, tx_hash)?.ok_or_else(|| {
                Error::Storage(format!("Transaction index without snapshot: {}", tx_hash))
            })?;
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    /// Append snapshots with every index entry (atomic)
    pub fn append_snapshots(&self, snapshots: &[BalanceSnapshot]) -> Result<()> {
        let cf_snapshots = self.cf_handle(CF_SNAPSHOTS)?;
        let cf_history = self.cf_handle(CF_HISTORY)?;
        let cf_assets = self.cf_handle(CF_ASSETS)?;
        let cf_credentials = self.cf_handle(CF_CREDENTIALS)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;

        let mut batch = WriteBatch::default();
        for snapshot in snapshots {
            let address = address_prefix(&snapshot.address)?;
            let pair = pair_key(&snapshot.address, &snapshot.asset)?;

            batch.put_cf(
                cf_snapshots,
                snapshot_key(&pair, &snapshot.tx.tx_hash),
                bincode::serialize(snapshot)?,
            );
            batch.put_cf(cf_history, history_key(&pair, &snapshot.tx), b"");
            batch.put_cf(cf_assets, &pair, bincode::serialize(&snapshot.asset)?);

            let mut payment = credential_prefix(TAG_PAYMENT, &snapshot.payment_script_hash);
            payment.extend_from_slice(&address);
            batch.put_cf(cf_credentials, payment, snapshot.address.as_str().as_bytes());
            if let Some(stake) = &snapshot.stake_key_hash {
                let mut key = credential_prefix(TAG_STAKE, stake);
                key.extend_from_slice(&address);
                batch.put_cf(cf_credentials, key, snapshot.address.as_str().as_bytes());
            }

            let mut tx_key = snapshot.tx.tx_hash.as_bytes().to_vec();
            tx_key.extend_from_slice(&pair);
            batch.put_cf(cf_transactions, tx_key, b"");
        }

        self.db.write(batch)?;

        tracing::debug!(count = snapshots.len(), "Snapshots appended");
        Ok(())
    }

    // Tracked output operations

    /// Remember outputs produced at tracked addresses
    pub fn put_outputs(&self, tx_hash: &TxHash, outputs: &[(u32, TxOutput)]) -> Result<()> {
        let cf = self.cf_handle(CF_OUTPUTS)?;
        let mut batch = WriteBatch::default();
        for (index, output) in outputs {
            batch.put_cf(cf, output_key(&OutputRef::new(*tx_hash, *index)), bincode::serialize(output)?);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Output previously stored by [`Storage::put_outputs`]
    pub fn get_output(&self, output_ref: &OutputRef) -> Result<Option<TxOutput>> {
        let cf = self.cf_handle(CF_OUTPUTS)?;
        match self.db.get_cf(cf, output_key(output_ref))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    // Registry cache operations

    /// Replace the stored registry view (atomic)
    pub fn replace_registry(&self, records: &[RegistryRecord]) -> Result<()> {
        let cf = self.cf_handle(CF_REGISTRY)?;
        let mut batch = WriteBatch::default();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(cf, key);
        }
        for record in records {
            batch.put_cf(cf, output_key(&record.output_ref), bincode::serialize(record)?);
        }
        self.db.write(batch)?;

        tracing::debug!(nodes = records.len(), "Registry view stored");
        Ok(())
    }

    /// Apply the node records one transaction spends and creates (atomic)
    ///
    /// Spent records are remembered so that re-processing the creating
    /// transaction cannot bring them back. Returns how many stored records
    /// changed; replaying a transaction changes none.
    pub fn apply_registry_changes(
        &self,
        spent: &[OutputRef],
        created: &[RegistryRecord],
    ) -> Result<usize> {
        let cf = self.cf_handle(CF_REGISTRY)?;
        let cf_spent = self.cf_handle(CF_REGISTRY_SPENT)?;
        let mut batch = WriteBatch::default();
        let mut changed = 0;

        for output_ref in spent {
            let key = output_key(output_ref);
            if self.db.get_pinned_cf(cf, &key)?.is_some() {
                batch.delete_cf(cf, &key);
                batch.put_cf(cf_spent, &key, b"");
                changed += 1;
            }
        }

        for record in created {
            let key = output_key(&record.output_ref);
            if self.db.get_pinned_cf(cf_spent, &key)?.is_some()
                || self.db.get_pinned_cf(cf, &key)?.is_some()
            {
                continue;
            }
            batch.put_cf(cf, &key, bincode::serialize(record)?);
            changed += 1;
        }

        if changed > 0 {
            self.db.write(batch)?;
        }
        Ok(changed)
    }

    /// Stored registry view
    pub fn registry_records(&self) -> Result<Vec<RegistryRecord>> {
        let cf = self.cf_handle(CF_REGISTRY)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_snapshots: self.approximate_count(self.cf_handle(CF_SNAPSHOTS)?)?,
            total_outputs: self.approximate_count(self.cf_handle(CF_OUTPUTS)?)?,
            registry_nodes: self.approximate_count(self.cf_handle(CF_REGISTRY)?)?,
        })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        Ok(self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }
}

impl UtxoResolver for Storage {
    fn resolve(&self, output_ref: &OutputRef) -> Result<Option<TxOutput>> {
        self.get_output(output_ref)
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Snapshots written (approximate)
    pub total_snapshots: u64,
    /// Tracked outputs remembered (approximate)
    pub total_outputs: u64,
    /// Registry nodes in the stored view (approximate)
    pub registry_nodes: u64,
}

// Key helpers

fn address_prefix(address: &Address) -> Result<Vec<u8>> {
    let bytes = address.as_str().as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::InvalidAddress(format!("address too long: {} bytes", bytes.len())))?;
    let mut key = Vec::with_capacity(2 + bytes.len());
    key.extend_from_slice(&len.to_be_bytes());
    key.extend_from_slice(bytes);
    Ok(key)
}

fn pair_key(address: &Address, asset: &AssetId) -> Result<Vec<u8>> {
    let mut key = address_prefix(address)?;
    match asset {
        AssetId::Native => key.push(0),
        AssetId::Token { policy_id, name: None } => {
            key.push(1);
            key.extend_from_slice(policy_id.as_bytes());
        }
        AssetId::Token { policy_id, name: Some(name) } => {
            key.push(2);
            key.extend_from_slice(policy_id.as_bytes());
            // Names are at most 32 bytes
            key.push(name.as_bytes().len() as u8);
            key.extend_from_slice(name.as_bytes());
        }
    }
    Ok(key)
}

fn snapshot_key(pair: &[u8], tx_hash: &TxHash) -> Vec<u8> {
    let mut key = pair.to_vec();
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

fn history_key(pair: &[u8], tx: &TxRef) -> Vec<u8> {
    let mut key = pair.to_vec();
    key.extend_from_slice(&tx.slot.to_be_bytes());
    key.extend_from_slice(&tx.block_height.to_be_bytes());
    key.extend_from_slice(&tx.tx_index.to_be_bytes());
    key.extend_from_slice(tx.tx_hash.as_bytes());
    key
}

fn tx_hash_suffix(key: &[u8]) -> Result<TxHash> {
    let bytes: [u8; TX_HASH_LEN] = key
        .get(key.len().saturating_sub(TX_HASH_LEN)..)
        .and_then(|tail| tail.try_into().ok())
        .ok_or_else(|| Error::Storage("Truncated index key".to_string()))?;
    Ok(TxHash::from_bytes(bytes))
}

fn credential_prefix(tag: u8, hash: &Hash28) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 28);
    key.push(tag);
    key.extend_from_slice(hash.as_bytes());
    key
}

fn output_key(output_ref: &OutputRef) -> Vec<u8> {
    let mut key = output_ref.tx_hash.as_bytes().to_vec();
    key.extend_from_slice(&output_ref.index.to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeKey, RegistryNode};
    use crate::types::{AssetName, RawAmount};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn token() -> AssetId {
        AssetId::Token {
            policy_id: Hash28::from_bytes([0x42; 28]),
            name: Some(AssetName::new(b"TOK".to_vec()).unwrap()),
        }
    }

    fn tx(slot: u64, index: u32, seed: u8) -> TxRef {
        TxRef {
            slot,
            block_height: slot / 20,
            tx_index: index,
            tx_hash: TxHash::from_bytes([seed; 32]),
        }
    }

    fn snapshot(address: &str, asset: AssetId, tx: TxRef, quantity: i64) -> BalanceSnapshot {
        BalanceSnapshot {
            address: Address::new(address),
            payment_script_hash: Hash28::from_bytes([0x5a; 28]),
            stake_key_hash: Some(Hash28::from_bytes([0x3c; 28])),
            tx,
            asset,
            quantity: Decimal::from(quantity),
            is_registered_asset: false,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        for name in COLUMN_FAMILIES {
            assert!(storage.db.cf_handle(name).is_some());
        }
    }

    #[test]
    fn test_history_is_newest_first() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        // Written out of hash order; history must follow chain order
        storage.append_snapshots(&[snapshot("addr_a", token(), tx(100, 0, 9), 1000)]).unwrap();
        storage.append_snapshots(&[snapshot("addr_a", token(), tx(200, 1, 1), 1500)]).unwrap();
        storage.append_snapshots(&[snapshot("addr_a", token(), tx(200, 2, 5), 2000)]).unwrap();

        let history = storage.snapshot_history(&Address::new("addr_a"), &token(), None, 10).unwrap();
        let quantities: Vec<_> = history.iter().map(|s| s.quantity).collect();
        assert_eq!(quantities, vec![Decimal::from(2000), Decimal::from(1500), Decimal::from(1000)]);

        let latest = storage.latest_snapshot(&Address::new("addr_a"), &token()).unwrap().unwrap();
        assert_eq!(latest.quantity, Decimal::from(2000));

        let before = storage
            .snapshot_history(&Address::new("addr_a"), &token(), Some(&latest.tx), 1)
            .unwrap();
        assert_eq!(before[0].quantity, Decimal::from(1500));
    }

    #[test]
    fn test_pairs_do_not_bleed() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        // "addr_a" is a byte prefix of "addr_ab"
        storage
            .append_snapshots(&[
                snapshot("addr_a", AssetId::Native, tx(100, 0, 1), 5),
                snapshot("addr_ab", AssetId::Native, tx(100, 0, 1), 7),
                snapshot("addr_a", token(), tx(100, 0, 1), 9),
            ])
            .unwrap();

        let history = storage
            .snapshot_history(&Address::new("addr_a"), &AssetId::Native, None, 10)
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].quantity, Decimal::from(5));

        let mut assets = storage.assets_for_address(&Address::new("addr_a")).unwrap();
        assets.sort();
        assert_eq!(assets, vec![AssetId::Native, token()]);

        assert_eq!(storage.snapshots_for_transaction(&TxHash::from_bytes([1; 32])).unwrap().len(), 3);
        assert_eq!(
            storage.addresses_for_stake(&Hash28::from_bytes([0x3c; 28])).unwrap(),
            vec![Address::new("addr_a"), Address::new("addr_ab")]
        );
    }

    #[test]
    fn test_snapshot_exists() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let address = Address::new("addr_a");
        let hash = TxHash::from_bytes([3; 32]);

        assert!(!storage.snapshot_exists(&address, &AssetId::Native, &hash).unwrap());
        storage.append_snapshots(&[snapshot("addr_a", AssetId::Native, tx(10, 0, 3), 1)]).unwrap();
        assert!(storage.snapshot_exists(&address, &AssetId::Native, &hash).unwrap());
        assert!(!storage.snapshot_exists(&address, &token(), &hash).unwrap());
    }

    #[test]
    fn test_outputs_resolve() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let hash = TxHash::from_bytes([8; 32]);
        let output = TxOutput {
            address: Address::new("addr_a"),
            amounts: vec![RawAmount::new("lovelace", 2_000_000)],
            inline_datum: None,
        };

        storage.put_outputs(&hash, &[(1, output.clone())]).unwrap();
        assert_eq!(storage.resolve(&OutputRef::new(hash, 1)).unwrap(), Some(output));
        assert_eq!(storage.resolve(&OutputRef::new(hash, 0)).unwrap(), None);
    }

    #[test]
    fn test_registry_replace() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let head = RegistryRecord {
            output_ref: OutputRef::new(TxHash::from_bytes([1; 32]), 0),
            node: RegistryNode::head(),
        };
        let moved = RegistryRecord {
            output_ref: OutputRef::new(TxHash::from_bytes([2; 32]), 0),
            node: RegistryNode::head().with_next(NodeKey::Tail),
        };

        storage.replace_registry(&[head]).unwrap();
        storage.replace_registry(&[moved.clone()]).unwrap();
        assert_eq!(storage.registry_records().unwrap(), vec![moved]);
    }

    #[test]
    fn test_registry_changes_from_events() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();
        let head = RegistryRecord {
            output_ref: OutputRef::new(TxHash::from_bytes([1; 32]), 0),
            node: RegistryNode::head(),
        };
        let key = crate::types::Hash28::from_bytes([0x42; 28]);
        let rewritten = RegistryRecord {
            output_ref: OutputRef::new(TxHash::from_bytes([2; 32]), 1),
            node: RegistryNode::head().with_next(NodeKey::Token(key)),
        };

        assert_eq!(storage.apply_registry_changes(&[], &[head.clone()]).unwrap(), 1);
        assert_eq!(
            storage
                .apply_registry_changes(&[head.output_ref], &[rewritten.clone()])
                .unwrap(),
            2
        );
        assert_eq!(storage.registry_records().unwrap(), vec![rewritten.clone()]);

        // Re-delivering the creating transaction does not resurrect the spent head
        assert_eq!(storage.apply_registry_changes(&[], &[head]).unwrap(), 0);
        assert_eq!(storage.registry_records().unwrap(), vec![rewritten]);

        // Inputs that are not registry nodes change nothing
        let unrelated = OutputRef::new(TxHash::from_bytes([9; 32]), 0);
        assert_eq!(storage.apply_registry_changes(&[unrelated], &[]).unwrap(), 0);
    }
}
