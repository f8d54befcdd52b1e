//! Address decomposition
//!
//! Extracts the payment credential and the optional stake credential from a
//! Shelley-era address, given either in bech32 (`addr...`, `addr_test...`)
//! or as raw hex bytes. The header nibble selects the layout:
//!
//! | type  | payment | stake      |
//! |-------|---------|------------|
//! | 0..=3 | yes     | credential |
//! | 4..=5 | yes     | pointer    |
//! | 6..=7 | yes     | none       |
//!
//! Byron (8) and reward (14, 15) addresses carry no payment credential and are
//! rejected.

use crate::types::{Address, Hash28};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

const CREDENTIAL_LEN: usize = 28;

/// Whether a credential is a verification key hash or a script hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    /// Verification key hash
    Key,
    /// Script hash
    Script,
}

/// Payment or stake credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Credential {
    /// Key or script
    pub kind: CredentialKind,
    /// Credential hash
    pub hash: Hash28,
}

/// Address layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressKind {
    /// Payment and stake credential
    Base,
    /// Payment credential and a chain pointer to a stake registration
    Pointer,
    /// Payment credential only
    Enterprise,
}

/// Decomposed address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressComponents {
    /// Original address
    pub address: Address,
    /// Layout
    pub kind: AddressKind,
    /// Network id from the header
    pub network_id: u8,
    /// Payment credential
    pub payment: Credential,
    /// Stake credential (base addresses only)
    pub stake: Option<Credential>,
}

impl AddressComponents {
    /// Payment credential hash
    pub fn payment_hash(&self) -> Hash28 {
        self.payment.hash
    }

    /// Stake credential hash, if any
    pub fn stake_hash(&self) -> Option<Hash28> {
        self.stake.map(|c| c.hash)
    }
}

/// Enterprise address (header type 7) paying to `script`, as hex
pub fn enterprise_script_address(script: &Hash28, network_id: u8) -> Address {
    let mut bytes = Vec::with_capacity(1 + CREDENTIAL_LEN);
    bytes.push(0x70 | (network_id & 0x0f));
    bytes.extend_from_slice(script.as_bytes());
    Address::new(hex::encode(bytes))
}

/// Decompose an address into its credentials
pub fn decompose(address: &Address) -> Result<AddressComponents> {
    let bytes = address_bytes(address.as_str())?;
    decompose_bytes(address, &bytes)
}

fn address_bytes(s: &str) -> Result<Vec<u8>> {
    if s.starts_with("addr") {
        let (hrp, data) = bech32::decode(s)
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))?;
        let hrp = hrp.to_string();
        if hrp != "addr" && hrp != "addr_test" {
            return Err(Error::InvalidAddress(format!("unexpected prefix {}", hrp)));
        }
        Ok(data)
    } else {
        hex::decode(s).map_err(|e| Error::InvalidAddress(format!("{}: {}", s, e)))
    }
}

fn credential(kind_is_script: bool, bytes: &[u8]) -> Result<Credential> {
    let hash: [u8; CREDENTIAL_LEN] = bytes
        .try_into()
        .map_err(|_| Error::InvalidAddress("truncated credential".to_string()))?;
    Ok(Credential {
        kind: if kind_is_script {
            CredentialKind::Script
        } else {
            CredentialKind::Key
        },
        hash: Hash28::from_bytes(hash),
    })
}

fn decompose_bytes(address: &Address, bytes: &[u8]) -> Result<AddressComponents> {
    let header = *bytes
        .first()
        .ok_or_else(|| Error::InvalidAddress("empty address".to_string()))?;
    let addr_type = header >> 4;
    let network_id = header & 0x0f;

    let payment_end = 1 + CREDENTIAL_LEN;
    let (kind, stake) = match addr_type {
        0..=3 => {
            let stake_end = payment_end + CREDENTIAL_LEN;
            if bytes.len() != stake_end {
                return Err(Error::InvalidAddress(format!(
                    "base address must be {} bytes, got {}",
                    stake_end,
                    bytes.len()
                )));
            }
            let stake = credential(addr_type & 0b10 != 0, &bytes[payment_end..stake_end])?;
            (AddressKind::Base, Some(stake))
        }
        4 | 5 => {
            // Pointer payload is variable length
            if bytes.len() <= payment_end {
                return Err(Error::InvalidAddress("truncated pointer address".to_string()));
            }
            (AddressKind::Pointer, None)
        }
        6 | 7 => {
            if bytes.len() != payment_end {
                return Err(Error::InvalidAddress(format!(
                    "enterprise address must be {} bytes, got {}",
                    payment_end,
                    bytes.len()
                )));
            }
            (AddressKind::Enterprise, None)
        }
        other => {
            return Err(Error::InvalidAddress(format!(
                "address type {} has no payment credential",
                other
            )))
        }
    };

    let payment = credential(addr_type & 0b01 != 0, &bytes[1..payment_end])?;

    Ok(AddressComponents {
        address: address.clone(),
        kind,
        network_id,
        payment,
        stake,
    })
}
