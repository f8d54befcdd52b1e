//! Token index orchestration layer
//!
//! Ties storage, the ingestion actor, the balance ledger and the registry view
//! into one handle.
//!
//! # Example
//!
//! ```no_run
//! use token_index::{Config, TokenIndex};
//!
//! #[tokio::main]
//! async fn main() -> token_index::Result<()> {
//!     let config = Config::default();
//!     let index = TokenIndex::open(config).await?;
//!
//!     // let summary = index.ingest_block(block).await?;
//!
//!     index.shutdown().await
//! }
//! ```

use crate::{
    actor::{spawn_indexer_actor, IndexerHandle},
    address::enterprise_script_address,
    balance::BalanceLedger,
    indexer::{BlockSummary, IndexContext, Indexer},
    intent::RegistrationContext,
    metrics::Metrics,
    registry::{InsertionPlan, NodePayload, RegistrySet, SharedRegistry},
    source::{RegistryNodeSource, TrackedScripts, UtxoResolver},
    storage::{Storage, StorageStats},
    types::{
        Address, AssetId, AssetName, BalanceSnapshot, BlockEvent, KeyHash, PolicyId, ScriptHash,
        TxHash,
    },
    Config, Error, Result,
};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Main token index interface
#[derive(Debug)]
pub struct TokenIndex {
    /// Actor handle for ingestion
    handle: IndexerHandle,

    /// Actor task
    task: JoinHandle<()>,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Balance queries
    ledger: BalanceLedger,

    /// Current registry view, shared with the ingestion actor
    registry: SharedRegistry,

    /// Script holding the registry nodes
    spend_script: Option<ScriptHash>,

    /// Policy of the node NFTs
    node_policy: Option<PolicyId>,

    /// Current tracked scripts
    tracked: RwLock<Arc<TrackedScripts>>,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl TokenIndex {
    /// Open index, resolving consumed records from its own output cache
    pub async fn open(config: Config) -> Result<Self> {
        Self::open_with(config, None).await
    }

    /// Open index with an external resolver for consumed records
    pub async fn open_with_resolver(config: Config, resolver: Arc<dyn UtxoResolver>) -> Result<Self> {
        Self::open_with(config, Some(resolver)).await
    }

    async fn open_with(config: Config, resolver: Option<Arc<dyn UtxoResolver>>) -> Result<Self> {
        config.validate()?;

        let storage = Arc::new(Storage::open(&config)?);
        let metrics = Metrics::new().map_err(|e| Error::Config(format!("Metrics: {}", e)))?;
        let ledger = BalanceLedger::new(
            storage.clone(),
            metrics.clone(),
            config.indexer.max_history_limit,
        );

        let resolver: Arc<dyn UtxoResolver> = match resolver {
            Some(resolver) => resolver,
            None => storage.clone(),
        };
        let indexer = Indexer::new(
            storage.clone(),
            ledger.clone(),
            resolver,
            config.indexer.native_unit.clone(),
            metrics.clone(),
        );
        let (handle, task) = spawn_indexer_actor(indexer, config.indexer.mailbox_capacity);

        // Stored node records survive restarts
        let registry = RegistrySet::from_records(storage.registry_records()?)?;
        metrics.registry_nodes.set(registry.len() as i64);
        let tracked = config.registry.tracked()?;
        let spend_script = config.registry.spend_script()?;
        let node_policy = config.registry.mint_policy()?;

        tracing::info!(
            service = %config.service_name,
            registry_nodes = registry.len(),
            tracked_scripts = tracked.len(),
            "Token index opened"
        );

        Ok(Self {
            handle,
            task,
            storage,
            ledger,
            registry: SharedRegistry::new(registry),
            spend_script,
            node_policy,
            tracked: RwLock::new(Arc::new(tracked)),
            metrics,
            config,
        })
    }

    /// Ingest one block; blocks must arrive in chain order
    pub async fn ingest_block(&self, block: BlockEvent) -> Result<BlockSummary> {
        let context = IndexContext {
            tracked: self.tracked_scripts(),
            registry: self.registry.clone(),
            registry_script: self.spend_script,
            node_policy: self.node_policy,
        };
        self.handle.process_block(block, context).await
    }

    /// Replace the tracked scripts used for later blocks
    pub fn set_tracked_scripts(&self, tracked: TrackedScripts) {
        tracing::info!(tracked_scripts = tracked.len(), "Tracked scripts updated");
        *self.tracked.write() = Arc::new(tracked);
    }

    /// Current tracked scripts
    pub fn tracked_scripts(&self) -> Arc<TrackedScripts> {
        self.tracked.read().clone()
    }

    /// Current registry view
    pub fn registry(&self) -> Arc<RegistrySet> {
        self.registry.load()
    }

    /// Fetch the unspent registry nodes and swap in the new view
    pub fn refresh_registry(&self, source: &dyn RegistryNodeSource) -> Result<Arc<RegistrySet>> {
        let spend_script = self.required_spend_script()?;

        let records = source.unspent_nodes(&spend_script)?;
        let registry = RegistrySet::from_records(records)?;
        let records: Vec<_> = registry.records().cloned().collect();
        self.storage.replace_registry(&records)?;

        let registry = self.registry.store(registry);
        self.metrics.registry_nodes.set(registry.len() as i64);

        tracing::debug!(
            spend_script = %spend_script,
            nodes = registry.len(),
            "Registry view refreshed"
        );

        Ok(registry)
    }

    /// Plan the registration of `key` against a freshly fetched view
    ///
    /// The plan is valid until its gap record is spent; on
    /// [`Error::StalePlan`] from the commit path, call again.
    pub fn register(
        &self,
        key: PolicyId,
        payload: NodePayload,
        source: &dyn RegistryNodeSource,
    ) -> Result<InsertionPlan> {
        let registry = self.refresh_registry(source)?;
        self.plan(&registry, key, payload)
    }

    /// Plan the registration of `key` against the view kept from ingested blocks
    ///
    /// Only as fresh as the last ingested block; a plan that turns out stale
    /// is retried once the spending block has been ingested.
    pub fn plan_registration(&self, key: PolicyId, payload: NodePayload) -> Result<InsertionPlan> {
        self.plan(&self.registry(), key, payload)
    }

    fn plan(&self, registry: &RegistrySet, key: PolicyId, payload: NodePayload) -> Result<InsertionPlan> {
        match registry.plan_insertion(key, payload) {
            Ok(plan) => {
                self.metrics.plans_total.inc();
                Ok(plan)
            }
            Err(e) => {
                if e.is_rejection() {
                    self.metrics.registrations_rejected.inc();
                    tracing::info!(key = %key, "Registration rejected: already registered");
                } else {
                    tracing::error!(key = %key, error = %e, "Registration planning failed");
                }
                Err(e)
            }
        }
    }

    /// Protocol values of a registration transaction, taken from configuration
    ///
    /// `recipient` must already be the programmable-logic address that is
    /// to hold the initial supply.
    pub fn registration_context(
        &self,
        issuance_script: ScriptHash,
        asset_name: AssetName,
        quantity: Decimal,
        recipient: Address,
    ) -> Result<RegistrationContext> {
        let spend_script = self.required_spend_script()?;
        let node_policy = self.node_policy.ok_or_else(|| {
            Error::Config("registry mint policy is not configured".to_string())
        })?;

        Ok(RegistrationContext {
            registry_address: enterprise_script_address(&spend_script, self.config.registry.network_id),
            node_policy,
            issuance_script,
            asset_name,
            quantity,
            recipient,
            min_coin: Decimal::from(self.config.registry.min_node_coin),
        })
    }

    fn required_spend_script(&self) -> Result<ScriptHash> {
        self.spend_script
            .ok_or_else(|| Error::Config("registry spend script is not configured".to_string()))
    }

    // Balance queries

    /// Most recent snapshot of (address, asset)
    pub fn latest(&self, address: &Address, asset: &AssetId) -> Result<Option<BalanceSnapshot>> {
        self.ledger.latest(address, asset)
    }

    /// Most recent snapshot per asset of `address`
    pub fn all_latest(&self, address: &Address) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.all_latest(address)
    }

    /// Most recent `limit` snapshots of (address, asset), newest first
    pub fn history(&self, address: &Address, asset: &AssetId, limit: usize) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.history(address, asset, limit)
    }

    /// Most recent `limit` snapshots of `address`, all assets
    pub fn history_for_address(&self, address: &Address, limit: usize) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.history_for_address(address, limit)
    }

    /// Latest snapshots of addresses paying to `script`
    pub fn latest_by_payment_script(&self, script: &ScriptHash) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.latest_by_payment_script(script)
    }

    /// Latest snapshots of addresses delegating to `stake`
    pub fn latest_by_stake_key(&self, stake: &KeyHash) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.latest_by_stake_key(stake)
    }

    /// Latest snapshots of addresses with both credentials
    pub fn latest_by_payment_and_stake(
        &self,
        script: &ScriptHash,
        stake: &KeyHash,
    ) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.latest_by_payment_and_stake(script, stake)
    }

    /// Snapshots written for one transaction
    pub fn by_transaction(&self, tx_hash: &TxHash) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.by_transaction(tx_hash)
    }

    /// Latest balances of `address` in registered tokens
    pub fn registered_token_balances(&self, address: &Address) -> Result<Vec<BalanceSnapshot>> {
        self.ledger.registered_token_balances(address)
    }

    /// Snapshot preceding `snapshot` for the same pair
    pub fn previous(&self, snapshot: &BalanceSnapshot) -> Result<Option<BalanceSnapshot>> {
        self.ledger.previous(snapshot)
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Storage statistics
    pub fn storage_stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the ingestion actor and wait for it to drain
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.task
            .await
            .map_err(|e| Error::Concurrency(format!("Indexer task failed: {}", e)))?;
        tracing::info!("Token index shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeKey, RegistryDatum, RegistryNode, RegistryRecord};
    use crate::source::StaticNodeSource;
    use crate::types::{ChainTransaction, Hash28, OutputRef, RawAmount, TxOutput};
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    const SCRIPT: [u8; 28] = [0x5a; 28];
    const REGISTRY_SCRIPT: &str = "e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1";

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.registry.spend_script_hash = Some(REGISTRY_SCRIPT.to_string());
        config.registry.tracked_scripts = vec![hex::encode(SCRIPT)];
        (config, temp_dir)
    }

    fn policy(b: u8) -> PolicyId {
        Hash28::from_bytes([b; 28])
    }

    fn payload() -> NodePayload {
        NodePayload {
            transfer_logic: Hash28::from_bytes([0x77; 28]),
            third_party_transfer_logic: None,
            global_state_policy: None,
        }
    }

    fn source() -> StaticNodeSource {
        StaticNodeSource::new(vec![
            RegistryRecord {
                output_ref: OutputRef::new(TxHash::from_bytes([1; 32]), 0),
                node: RegistryNode::head().with_next(NodeKey::Token(policy(0x30))),
            },
            RegistryRecord {
                output_ref: OutputRef::new(TxHash::from_bytes([2; 32]), 0),
                node: RegistryNode::new(policy(0x30), NodeKey::Tail, &payload()),
            },
        ])
    }

    fn address() -> Address {
        let mut bytes = vec![0x70];
        bytes.extend_from_slice(&SCRIPT);
        Address::new(hex::encode(bytes))
    }

    #[tokio::test]
    async fn test_open_and_shutdown() {
        let (config, _temp) = test_config();
        let index = TokenIndex::open(config).await.unwrap();
        assert!(index.registry().is_empty());
        assert_eq!(index.tracked_scripts().len(), 1);
        index.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_plans_and_rejects_duplicates() {
        let (config, _temp) = test_config();
        let index = TokenIndex::open(config).await.unwrap();

        let plan = index.register(policy(0x10), payload(), &source()).unwrap();
        assert_eq!(plan.consume.node.key, NodeKey::Head);
        assert_eq!(plan.mutated_node.next, NodeKey::Token(policy(0x10)));
        assert_eq!(plan.new_node.next, NodeKey::Token(policy(0x30)));

        let err = index.register(policy(0x30), payload(), &source()).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey(_)));
        assert_eq!(index.metrics().registrations_rejected.get(), 1);
        assert_eq!(index.metrics().plans_total.get(), 1);

        index.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_view_survives_restart() {
        let (config, _temp) = test_config();

        let index = TokenIndex::open(config.clone()).await.unwrap();
        index.refresh_registry(&source()).unwrap();
        index.shutdown().await.unwrap();

        let reopened = TokenIndex::open(config).await.unwrap();
        assert_eq!(reopened.registry().len(), 2);
        assert!(reopened.registry().is_registered(&policy(0x30)));
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_requires_spend_script() {
        let (mut config, _temp) = test_config();
        config.registry.spend_script_hash = None;
        let index = TokenIndex::open(config).await.unwrap();
        assert!(matches!(index.refresh_registry(&source()), Err(Error::Config(_))));
        index.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ingest_flags_registered_tokens() {
        let (config, _temp) = test_config();
        let index = TokenIndex::open(config).await.unwrap();
        index.refresh_registry(&source()).unwrap();

        let unit = policy(0x30).to_hex();
        let block = BlockEvent {
            slot: 900,
            block_height: 45,
            transactions: vec![ChainTransaction {
                tx_hash: TxHash::from_bytes([6; 32]),
                inputs: vec![],
                outputs: vec![TxOutput {
                    address: address(),
                    amounts: vec![
                        RawAmount::new("lovelace", 1_000_000),
                        RawAmount::new(unit.clone(), 25),
                    ],
                    inline_datum: None,
                }],
            }],
        };

        let summary = index.ingest_block(block).await.unwrap();
        assert_eq!(summary.snapshots, 2);

        let registered = index.registered_token_balances(&address()).unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].quantity, Decimal::from(25));
        assert_eq!(index.by_transaction(&TxHash::from_bytes([6; 32])).unwrap().len(), 2);

        index.shutdown().await.unwrap();
    }

    fn registry_output(node: &RegistryNode) -> TxOutput {
        let script = ScriptHash::from_hex(REGISTRY_SCRIPT).unwrap();
        TxOutput {
            address: enterprise_script_address(&script, 0),
            amounts: vec![RawAmount::new("lovelace", 1_000_000)],
            inline_datum: Some(RegistryDatum::from(node).to_cbor_hex().unwrap()),
        }
    }

    /// Bootstrap the head, then register 0x30 and mint 25 of it in one transaction
    fn registration_block() -> BlockEvent {
        let bootstrap = TxHash::from_bytes([0x0b; 32]);
        let registration = TxHash::from_bytes([0x0c; 32]);
        BlockEvent {
            slot: 1_200,
            block_height: 60,
            transactions: vec![
                ChainTransaction {
                    tx_hash: bootstrap,
                    inputs: vec![],
                    outputs: vec![registry_output(&RegistryNode::head())],
                },
                ChainTransaction {
                    tx_hash: registration,
                    inputs: vec![OutputRef::new(bootstrap, 0)],
                    outputs: vec![
                        TxOutput {
                            address: address(),
                            amounts: vec![RawAmount::new(policy(0x30).to_hex(), 25)],
                            inline_datum: None,
                        },
                        registry_output(&RegistryNode::head().with_next(NodeKey::Token(policy(0x30)))),
                        registry_output(&RegistryNode::new(policy(0x30), NodeKey::Tail, &payload())),
                    ],
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_registry_follows_ingested_nodes() {
        let (config, _temp) = test_config();
        let index = TokenIndex::open(config.clone()).await.unwrap();

        let summary = index.ingest_block(registration_block()).await.unwrap();
        assert_eq!(summary.registry_updates, 4);

        let registry = index.registry();
        assert_eq!(registry.len(), 2);
        assert!(registry.is_registered(&policy(0x30)));
        registry.check_partition().unwrap();
        assert_eq!(index.metrics().registry_nodes.get(), 2);

        // Registered in the same transaction that minted it
        let asset = AssetId::from_unit(&policy(0x30).to_hex(), "lovelace").unwrap();
        let latest = index.latest(&address(), &asset).unwrap().unwrap();
        assert!(latest.is_registered_asset);
        assert_eq!(latest.quantity, Decimal::from(25));

        // Planning works from the chain-fed view alone
        let plan = index.plan_registration(policy(0x40), payload()).unwrap();
        assert_eq!(plan.consume.node.key, NodeKey::Token(policy(0x30)));
        assert!(index.plan_registration(policy(0x30), payload()).unwrap_err().is_rejection());

        let replay = index.ingest_block(registration_block()).await.unwrap();
        assert_eq!(replay.registry_updates, 0);
        assert_eq!(index.registry().len(), 2);
        index.shutdown().await.unwrap();

        let reopened = TokenIndex::open(config).await.unwrap();
        assert!(reopened.registry().is_registered(&policy(0x30)));
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_registration_context_from_config() {
        let (mut config, _temp) = test_config();
        let index = TokenIndex::open(config.clone()).await.unwrap();
        let name = AssetName::new(b"USDX".to_vec()).unwrap();
        let err = index
            .registration_context(policy(0xe0), name.clone(), Decimal::from(10), address())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        index.shutdown().await.unwrap();

        config.registry.mint_policy_id = Some(policy(0xd0).to_hex());
        config.registry.min_node_coin = 2_000_000;
        let index = TokenIndex::open(config).await.unwrap();
        let context = index
            .registration_context(policy(0xe0), name, Decimal::from(10), address())
            .unwrap();

        assert_eq!(context.node_policy, policy(0xd0));
        assert_eq!(context.min_coin, Decimal::from(2_000_000));
        let registry_address = crate::address::decompose(&context.registry_address).unwrap();
        assert_eq!(registry_address.payment_hash().to_hex(), REGISTRY_SCRIPT);
        index.shutdown().await.unwrap();
    }
}
