//! Registration transaction intent
//!
//! Turns an [`InsertionPlan`] into a declarative description of the one
//! transaction that realizes it. The external transaction builder adds fee
//! inputs, balances, signs and submits; nothing here touches keys or the
//! network.
//!
//! The intent spends the gap node and recreates it pointing at the new key,
//! adds the new node, and mints both the node NFT and the first supply of the
//! token. Either all of it lands or none of it does.

use crate::{
    error::{Error, Result},
    registry::{constr_value, encode_cbor_hex, InsertionPlan, RegistryDatum},
    types::{Address, AssetName, OutputRef, PolicyId, ScriptHash},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Redeemers the registration scripts expect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Redeemer {
    /// Spend a registry node (constructor 0, no fields)
    RegistrySpend,
    /// Mint the node NFT for `key` (constructor 1: key, issuance script)
    RegistryInsert {
        /// Key being inserted
        key: PolicyId,
        /// Substandard issuance script
        issuance_script: ScriptHash,
    },
    /// Mint the token (constructor 0 wrapping constructor 1: issuance script)
    IssuanceMint {
        /// Substandard issuance script
        issuance_script: ScriptHash,
    },
}

/// Datum attached to a produced output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OutputDatum {
    /// Registry node datum
    Node(RegistryDatum),
    /// Unit datum (constructor 0, no fields)
    Unit,
}

impl OutputDatum {
    /// Hex CBOR to attach as the output's inline datum
    pub fn to_cbor_hex(&self) -> Result<String> {
        match self {
            OutputDatum::Node(datum) => datum.to_cbor_hex(),
            OutputDatum::Unit => encode_cbor_hex(&constr_value(0, Vec::new())),
        }
    }
}

/// One asset quantity inside an output value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetQuantity {
    /// Policy
    pub policy_id: PolicyId,
    /// Asset name
    pub name: AssetName,
    /// Quantity
    pub quantity: Decimal,
}

/// Record the transaction must consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputIntent {
    /// Record identity
    pub output_ref: OutputRef,
    /// Spend redeemer
    pub redeemer: Redeemer,
}

/// Record the transaction must produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputIntent {
    /// Destination
    pub address: Address,
    /// Native coin locked with the output
    pub coin: Decimal,
    /// Non-native assets
    pub assets: Vec<AssetQuantity>,
    /// Attached datum
    pub datum: Option<OutputDatum>,
    /// `datum` as hex CBOR
    pub inline_datum: Option<String>,
}

impl OutputIntent {
    fn new(address: Address, coin: Decimal, asset: AssetQuantity, datum: OutputDatum) -> Result<Self> {
        Ok(Self {
            address,
            coin,
            assets: vec![asset],
            inline_datum: Some(datum.to_cbor_hex()?),
            datum: Some(datum),
        })
    }
}

/// Asset the transaction must mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintIntent {
    /// Minting policy
    pub policy_id: PolicyId,
    /// Asset name
    pub name: AssetName,
    /// Quantity
    pub quantity: Decimal,
    /// Mint redeemer
    pub redeemer: Redeemer,
}

/// Protocol and request values the plan alone does not carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationContext {
    /// Address of the registry spend script
    pub registry_address: Address,
    /// Policy minting the node NFTs
    pub node_policy: PolicyId,
    /// Substandard issuance script (withdrawn from with zero to authorize the mint)
    pub issuance_script: ScriptHash,
    /// Name of the token being issued
    pub asset_name: AssetName,
    /// Initial supply
    pub quantity: Decimal,
    /// Receiver of the initial supply
    ///
    /// Programmable tokens only count as held at addresses whose payment
    /// credential is the programmable-logic script, so this must already be
    /// such an address (typically the script plus the payee's stake
    /// credential). No address is derived here.
    pub recipient: Address,
    /// Coin locked with each produced output
    pub min_coin: Decimal,
}

/// Declarative registration transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationIntent {
    /// Token policy being registered
    pub policy_id: PolicyId,
    /// Records to consume
    pub inputs: Vec<InputIntent>,
    /// Assets to mint
    pub mints: Vec<MintIntent>,
    /// Records to produce, in order
    pub outputs: Vec<OutputIntent>,
    /// Scripts to withdraw zero from
    pub withdrawals: Vec<ScriptHash>,
}

impl RegistrationIntent {
    /// Build the intent realizing `plan`
    pub fn assemble(plan: &InsertionPlan, context: &RegistrationContext) -> Result<Self> {
        let policy_id = *plan.inserted_key().policy_id().ok_or_else(|| {
            Error::InvariantViolation("insertion plan must add a token key".to_string())
        })?;

        if context.quantity <= Decimal::ZERO || !context.quantity.fract().is_zero() {
            return Err(Error::InvalidRequest(format!(
                "initial supply must be a positive integer, got {}",
                context.quantity
            )));
        }
        if context.min_coin.is_sign_negative() {
            return Err(Error::InvalidRequest("min_coin cannot be negative".to_string()));
        }

        // Each node carries one NFT named by its own key
        let gap_nft = AssetName::new(plan.mutated_node.key.to_bytes())?;
        let new_nft = AssetName::new(plan.new_node.key.to_bytes())?;

        let token_output = OutputIntent::new(
            context.recipient.clone(),
            context.min_coin,
            AssetQuantity {
                policy_id,
                name: context.asset_name.clone(),
                quantity: context.quantity,
            },
            OutputDatum::Unit,
        )?;
        let mutated_output = OutputIntent::new(
            context.registry_address.clone(),
            context.min_coin,
            AssetQuantity {
                policy_id: context.node_policy,
                name: gap_nft,
                quantity: Decimal::ONE,
            },
            OutputDatum::Node(RegistryDatum::from(&plan.mutated_node)),
        )?;
        let new_output = OutputIntent::new(
            context.registry_address.clone(),
            context.min_coin,
            AssetQuantity {
                policy_id: context.node_policy,
                name: new_nft.clone(),
                quantity: Decimal::ONE,
            },
            OutputDatum::Node(RegistryDatum::from(&plan.new_node)),
        )?;

        Ok(Self {
            policy_id,
            inputs: vec![InputIntent {
                output_ref: plan.consume.output_ref,
                redeemer: Redeemer::RegistrySpend,
            }],
            mints: vec![
                MintIntent {
                    policy_id,
                    name: context.asset_name.clone(),
                    quantity: context.quantity,
                    redeemer: Redeemer::IssuanceMint {
                        issuance_script: context.issuance_script,
                    },
                },
                MintIntent {
                    policy_id: context.node_policy,
                    name: new_nft,
                    quantity: Decimal::ONE,
                    redeemer: Redeemer::RegistryInsert {
                        key: policy_id,
                        issuance_script: context.issuance_script,
                    },
                },
            ],
            outputs: vec![token_output, mutated_output, new_output],
            withdrawals: vec![context.issuance_script],
        })
    }

    /// Encode as JSON for the transaction builder
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeKey, NodePayload, RegistryNode, RegistryRecord, RegistrySet};
    use crate::types::{Hash28, TxHash};

    fn context() -> RegistrationContext {
        RegistrationContext {
            registry_address: Address::new("addr_test1registry"),
            node_policy: Hash28::from_bytes([0xd0; 28]),
            issuance_script: Hash28::from_bytes([0xe0; 28]),
            asset_name: AssetName::new(b"USDX".to_vec()).unwrap(),
            quantity: Decimal::from(1_000_000),
            recipient: Address::new("addr_test1recipient"),
            min_coin: Decimal::from(1_000_000),
        }
    }

    fn plan(key: u8) -> InsertionPlan {
        let set = RegistrySet::from_records([RegistryRecord {
            output_ref: OutputRef::new(TxHash::from_bytes([1; 32]), 0),
            node: RegistryNode::head(),
        }])
        .unwrap();
        set.plan_insertion(
            Hash28::from_bytes([key; 28]),
            NodePayload {
                transfer_logic: Hash28::from_bytes([0x77; 28]),
                third_party_transfer_logic: None,
                global_state_policy: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_assemble_from_head() {
        let plan = plan(0x42);
        let intent = RegistrationIntent::assemble(&plan, &context()).unwrap();
        let key = Hash28::from_bytes([0x42; 28]);

        assert_eq!(intent.policy_id, key);
        assert_eq!(intent.inputs.len(), 1);
        assert_eq!(intent.inputs[0].output_ref, plan.consume.output_ref);
        assert_eq!(intent.inputs[0].redeemer, Redeemer::RegistrySpend);

        // Head NFT has the empty name; new node NFT is named by the key
        assert!(intent.outputs[1].assets[0].name.as_bytes().is_empty());
        assert_eq!(intent.outputs[2].assets[0].name.as_bytes(), key.as_bytes());
        assert_eq!(intent.mints[1].name.as_bytes(), key.as_bytes());

        match &intent.outputs[1].datum {
            Some(OutputDatum::Node(datum)) => {
                assert_eq!(datum.key, "");
                assert_eq!(datum.next, key.to_hex());
            }
            other => panic!("unexpected datum {:?}", other),
        }
        match &intent.outputs[2].datum {
            Some(OutputDatum::Node(datum)) => {
                assert_eq!(datum.key, key.to_hex());
                assert_eq!(RegistryNode::try_from(datum.clone()).unwrap().next, NodeKey::Tail);
            }
            other => panic!("unexpected datum {:?}", other),
        }

        assert_eq!(intent.outputs[0].address, Address::new("addr_test1recipient"));
        assert_eq!(intent.outputs[0].inline_datum.as_deref(), Some("d87980"));
        // The builder's inline datum decodes back to the planned node
        let inline = intent.outputs[2].inline_datum.as_deref().unwrap();
        assert_eq!(RegistryNode::from_inline_datum(inline).unwrap(), plan.new_node);
        assert_eq!(intent.withdrawals, vec![Hash28::from_bytes([0xe0; 28])]);
    }

    #[test]
    fn test_rejects_bad_supply() {
        let mut ctx = context();
        ctx.quantity = Decimal::ZERO;
        assert!(matches!(
            RegistrationIntent::assemble(&plan(0x42), &ctx),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_json_shape() {
        let intent = RegistrationIntent::assemble(&plan(0x42), &context()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&intent.to_json().unwrap()).unwrap();

        assert_eq!(json["inputs"][0]["redeemer"]["type"], "registry_spend");
        assert_eq!(json["mints"][0]["redeemer"]["type"], "issuance_mint");
        assert_eq!(json["outputs"][0]["datum"]["type"], "unit");
        assert_eq!(json["outputs"][1]["datum"]["type"], "node");
        assert_eq!(json["policy_id"], Hash28::from_bytes([0x42; 28]).to_hex());
    }
}
