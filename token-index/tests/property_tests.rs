//! Property-based tests for index invariants
//!
//! - Partition: any insertion order keeps the registry a sorted head-to-tail list
//! - Uniqueness: registering a present key is always rejected
//! - Balance correctness: latest balance equals the sum of net changes
//! - Idempotency: replaying transactions writes nothing new

use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;
use token_index::{
    address::{AddressKind, Credential, CredentialKind},
    metrics::Metrics,
    registry::{NodeKey, NodePayload, RegistryNode, RegistryRecord, RegistrySet},
    types::{Hash28, RawAmount, TxHash},
    Address, AddressComponents, AssetId, BalanceChanges, BalanceLedger, BlockEvent,
    ChainTransaction, Config, Error, OutputRef, PolicyId, Storage, TokenIndex, TxOutput, TxRef,
};

const SCRIPT: [u8; 28] = [0x5a; 28];
const POLICY: &str = "a0028f350aaabe0545fdcb56b039bfb08e4bb4d8c4d7c3c7d481c235";

/// Strategy for policy ids, biased towards the ends of the key space
fn policy_strategy() -> impl Strategy<Value = PolicyId> {
    prop_oneof![
        1 => Just(Hash28::from_bytes([0x00; 28])),
        1 => Just(Hash28::from_bytes([0xff; 28])),
        8 => prop::array::uniform28(any::<u8>()).prop_map(Hash28::from_bytes),
    ]
}

/// Strategy for non-zero net changes
fn net_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![-1_000_000i64..-1, 1i64..1_000_000]
}

fn payload() -> NodePayload {
    NodePayload {
        transfer_logic: Hash28::from_bytes([0x77; 28]),
        third_party_transfer_logic: None,
        global_state_policy: None,
    }
}

fn output_ref(n: u32) -> OutputRef {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&n.to_be_bytes());
    OutputRef::new(TxHash::from_bytes(bytes), 0)
}

fn genesis() -> RegistrySet {
    RegistrySet::from_records([RegistryRecord {
        output_ref: output_ref(0),
        node: RegistryNode::head(),
    }])
    .unwrap()
}

fn owner() -> AddressComponents {
    AddressComponents {
        address: Address::new("addr_test1prop"),
        kind: AddressKind::Enterprise,
        network_id: 0,
        payment: Credential {
            kind: CredentialKind::Script,
            hash: Hash28::from_bytes(SCRIPT),
        },
        stake: None,
    }
}

fn tx_ref(n: u32) -> TxRef {
    TxRef {
        slot: 1_000 + n as u64,
        block_height: 100 + n as u64,
        tx_index: 0,
        tx_hash: output_ref(n + 1).tx_hash,
    }
}

fn create_test_ledger() -> (BalanceLedger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    let storage = Arc::new(Storage::open(&config).unwrap());
    let ledger = BalanceLedger::new(storage, Metrics::new().unwrap(), 1000);
    (ledger, temp_dir)
}

fn net_changes(net: i64) -> BalanceChanges {
    let mut changes = BalanceChanges::new();
    let amount = [RawAmount::new(POLICY, net.abs())];
    if net > 0 {
        changes.produce(&owner(), &amount, "lovelace");
    } else {
        changes.consume(&owner(), &amount, "lovelace");
    }
    changes
}

struct Unregistered;

impl token_index::AssetClassifier for Unregistered {
    fn is_registered_policy(&self, _policy_id: &PolicyId) -> bool {
        false
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every insertion order yields a partition of the key space
    #[test]
    fn prop_insertions_preserve_partition(keys in prop::collection::vec(policy_strategy(), 1..40)) {
        let mut set = genesis();
        let mut inserted = BTreeSet::new();
        let mut next_ref = 1u32;

        for key in &keys {
            match set.plan_insertion(*key, payload()) {
                Ok(plan) => {
                    prop_assert!(plan.consume.node.covers(&NodeKey::Token(*key)));
                    prop_assert_eq!(plan.mutated_node.next, NodeKey::Token(*key));
                    prop_assert_eq!(plan.new_node.next, plan.consume.node.next);

                    set = set.apply(&plan, output_ref(next_ref), output_ref(next_ref + 1)).unwrap();
                    next_ref += 2;
                    inserted.insert(*key);
                }
                Err(Error::DuplicateKey(duplicate)) => {
                    prop_assert_eq!(duplicate, *key);
                    prop_assert!(inserted.contains(key));
                }
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
            prop_assert!(set.check_partition().is_ok());
        }

        prop_assert_eq!(set.len(), inserted.len() + 1);
        let listed: Vec<_> = set.records().filter_map(|r| r.node.key.policy_id().copied()).collect();
        let expected: Vec<_> = inserted.into_iter().collect();
        prop_assert_eq!(listed, expected);
    }

    /// Property: a present key is always rejected and the view is unchanged
    #[test]
    fn prop_duplicate_rejected(keys in prop::collection::btree_set(policy_strategy(), 1..20), pick in any::<prop::sample::Index>()) {
        let mut set = genesis();
        let mut next_ref = 1u32;
        for key in &keys {
            let plan = set.plan_insertion(*key, payload()).unwrap();
            set = set.apply(&plan, output_ref(next_ref), output_ref(next_ref + 1)).unwrap();
            next_ref += 2;
        }

        let keys: Vec<_> = keys.into_iter().collect();
        let key = keys[pick.index(keys.len())];
        let before = set.clone();
        let err = set.plan_insertion(key, payload()).unwrap_err();

        prop_assert!(err.is_rejection());
        prop_assert_eq!(set, before);
    }

    /// Property: a plan applied twice is stale the second time
    #[test]
    fn prop_second_plan_on_same_gap_is_stale(a in policy_strategy(), b in policy_strategy()) {
        prop_assume!(a != b);
        let set = genesis();
        let first = set.plan_insertion(a, payload()).unwrap();
        let second = set.plan_insertion(b, payload()).unwrap();
        prop_assert_eq!(&first.consume, &second.consume);

        let committed = set.apply(&first, output_ref(1), output_ref(2)).unwrap();
        let err = committed.apply(&second, output_ref(3), output_ref(4)).unwrap_err();
        prop_assert!(err.is_retryable());
    }

    /// Property: latest balance equals the running sum of net changes
    #[test]
    fn prop_balance_is_sum_of_nets(nets in prop::collection::vec(net_strategy(), 1..25)) {
        let (ledger, _temp) = create_test_ledger();
        let asset = AssetId::from_unit(POLICY, "lovelace").unwrap();

        let mut expected = Decimal::ZERO;
        for (n, net) in nets.iter().enumerate() {
            let written = ledger.record_event(&tx_ref(n as u32), &net_changes(*net), &Unregistered).unwrap();
            prop_assert_eq!(written.len(), 1);
            expected += Decimal::from(*net);
            prop_assert_eq!(written[0].quantity, expected);
        }

        let latest = ledger.latest(&owner().address, &asset).unwrap().unwrap();
        prop_assert_eq!(latest.quantity, expected);
        prop_assert_eq!(ledger.history(&owner().address, &asset, 1000).unwrap().len(), nets.len());
    }

    /// Property: replaying every transaction leaves the history untouched
    #[test]
    fn prop_replay_is_idempotent(nets in prop::collection::vec(net_strategy(), 1..15)) {
        let (ledger, _temp) = create_test_ledger();
        let asset = AssetId::from_unit(POLICY, "lovelace").unwrap();

        for (n, net) in nets.iter().enumerate() {
            ledger.record_event(&tx_ref(n as u32), &net_changes(*net), &Unregistered).unwrap();
        }
        let first: Vec<_> = ledger
            .history(&owner().address, &asset, 1000)
            .unwrap()
            .into_iter()
            .map(|s| (s.tx, s.quantity))
            .collect();

        for (n, net) in nets.iter().enumerate() {
            let written = ledger.record_event(&tx_ref(n as u32), &net_changes(*net), &Unregistered).unwrap();
            prop_assert!(written.is_empty());
        }
        let second: Vec<_> = ledger
            .history(&owner().address, &asset, 1000)
            .unwrap()
            .into_iter()
            .map(|s| (s.tx, s.quantity))
            .collect();

        prop_assert_eq!(first, second);
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    fn script_address() -> Address {
        let mut bytes = vec![0x70];
        bytes.extend_from_slice(&SCRIPT);
        Address::new(hex::encode(bytes))
    }

    fn token_output(quantity: i64) -> TxOutput {
        TxOutput {
            address: script_address(),
            amounts: vec![RawAmount::new(POLICY, quantity)],
            inline_datum: None,
        }
    }

    async fn create_test_index() -> (TokenIndex, TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.registry.tracked_scripts = vec![hex::encode(SCRIPT)];
        (TokenIndex::open(config).await.unwrap(), temp_dir)
    }

    #[tokio::test]
    async fn test_history_of_three_transactions() {
        let (index, _temp) = create_test_index().await;
        let tx1 = TxHash::from_bytes([1; 32]);
        let tx2 = TxHash::from_bytes([2; 32]);
        let tx3 = TxHash::from_bytes([3; 32]);

        let block = BlockEvent {
            slot: 4_000,
            block_height: 200,
            transactions: vec![
                // 0 -> 1000
                ChainTransaction {
                    tx_hash: tx1,
                    inputs: vec![],
                    outputs: vec![token_output(1000)],
                },
                // 1000 -> 2000
                ChainTransaction {
                    tx_hash: tx2,
                    inputs: vec![OutputRef::new(tx1, 0)],
                    outputs: vec![token_output(2000)],
                },
                // 2000 -> 1500
                ChainTransaction {
                    tx_hash: tx3,
                    inputs: vec![OutputRef::new(tx2, 0)],
                    outputs: vec![token_output(1500)],
                },
            ],
        };
        index.ingest_block(block.clone()).await.unwrap();

        let asset = AssetId::from_unit(POLICY, "lovelace").unwrap();
        let history = index.history(&script_address(), &asset, 2).unwrap();
        let quantities: Vec<_> = history.iter().map(|s| s.quantity).collect();
        assert_eq!(quantities, vec![Decimal::from(1500), Decimal::from(2000)]);

        // Re-delivery of the same block changes nothing
        let replay = index.ingest_block(block).await.unwrap();
        assert_eq!(replay.snapshots, 0);
        assert_eq!(index.history(&script_address(), &asset, 10).unwrap().len(), 3);

        let latest = index.latest(&script_address(), &asset).unwrap().unwrap();
        let previous = index.previous(&latest).unwrap();
        assert_eq!(token_index::diff(&latest, previous.as_ref()), Decimal::from(-500));

        index.shutdown().await.unwrap();
    }
}
