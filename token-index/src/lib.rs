//! Programmable token index
//!
//! Two derived views over a UTXO ledger:
//!
//! - a **balance ledger**: append-only snapshots of the holdings of every
//!   tracked address, per asset, in chain order
//! - a **registry set**: the on-chain sorted linked list of registered token
//!   policies, and the two-node rewrite that registers a new one
//!
//! # Architecture
//!
//! - **Single Writer**: blocks are ingested by one actor task
//! - **Idempotent Replay**: snapshots are keyed by transaction, re-delivery writes nothing
//! - **Optimistic Registry**: insertion plans name the record they consume; stale plans are re-planned
//!
//! # Invariants
//!
//! - `latest(address, asset)` equals the sum of all net changes of that pair
//! - Snapshots are never modified or deleted
//! - Registry nodes partition the key space from head to tail

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod address;
pub mod balance;
pub mod config;
pub mod error;
pub mod index;
pub mod indexer;
pub mod intent;
pub mod metrics;
pub mod registry;
pub mod source;
pub mod storage;
pub mod types;

// Re-exports
pub use address::{decompose, enterprise_script_address, AddressComponents};
pub use balance::{diff, BalanceChanges, BalanceLedger};
pub use config::Config;
pub use error::{Error, Result};
pub use index::TokenIndex;
pub use indexer::{BlockSummary, IndexContext};
pub use intent::{RegistrationContext, RegistrationIntent};
pub use registry::{
    InsertionPlan, NodeKey, NodePayload, RegistryDatum, RegistryNode, RegistryRecord, RegistrySet,
    SharedRegistry,
};
pub use source::{AssetClassifier, RegistryNodeSource, TrackedScripts, UtxoResolver};
pub use storage::Storage;
pub use types::{
    Address, AssetId, AssetName, BalanceSnapshot, BlockEvent, ChainTransaction, OutputRef,
    PolicyId, ScriptHash, TxHash, TxOutput, TxRef,
};
