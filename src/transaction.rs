// src/transaction.rs
//
// Animica transaction model. Transactions are immutable once admitted;
// identity is the content hash of the signed view.
//

use serde::{Deserialize, Serialize};

use crate::config::TxLimits;
use crate::error::CoreError;
use crate::types::{content_hash, Address, Hash32};
use crate::Result;

pub type TxHash = Hash32;

/* ---------------------------------------------------------------------
   Fee fields
---------------------------------------------------------------------*/

/// Legacy single-price or dual (base + priority) fee declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeFields {
    Legacy { gas_price: u128 },
    Dual { max_fee: u128, max_priority_fee: u128 },
}

impl FeeFields {
    /// Upper bound on the per-gas price this tx can pay, used for the
    /// up-front gas debit before execution.
    pub fn price_upper_bound(&self) -> u128 {
        match *self {
            FeeFields::Legacy { gas_price } => gas_price,
            FeeFields::Dual { max_fee, .. } => max_fee,
        }
    }
}

/* ---------------------------------------------------------------------
   Access list
---------------------------------------------------------------------*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub address: Address,
    pub storage_keys: Vec<Hash32>,
}

/* ---------------------------------------------------------------------
   Transaction
---------------------------------------------------------------------*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub sender: Address,
    pub to: Address,
    pub nonce: u64,
    pub value: u128,
    /// Call payload; empty for a plain value transfer.
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub fee: FeeFields,
    /// Statically declared state accesses beyond the implied balance/nonce
    /// keys; lets contract calls participate in parallel scheduling.
    pub access_list: Vec<AccessEntry>,
    /// Opaque to the core; verified by the injected signature backend.
    pub signature: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct SigningView<'a> {
    sender: &'a Address,
    to: &'a Address,
    nonce: u64,
    value: u128,
    data: &'a [u8],
    gas_limit: u64,
    fee: &'a FeeFields,
    access_list: &'a [AccessEntry],
}

impl Transaction {
    pub fn transfer(
        sender: Address,
        to: Address,
        value: u128,
        nonce: u64,
        gas_limit: u64,
        fee: FeeFields,
    ) -> Self {
        Self {
            sender,
            to,
            nonce,
            value,
            data: Vec::new(),
            gas_limit,
            fee,
            access_list: Vec::new(),
            signature: None,
        }
    }

    pub fn is_transfer(&self) -> bool {
        self.data.is_empty()
    }

    fn signing_bytes(&self) -> Result<Vec<u8>> {
        let view = SigningView {
            sender: &self.sender,
            to: &self.to,
            nonce: self.nonce,
            value: self.value,
            data: &self.data,
            gas_limit: self.gas_limit,
            fee: &self.fee,
            access_list: &self.access_list,
        };
        Ok(bincode::serialize(&view)?)
    }

    /// Content hash; the tx identity from admission through inclusion.
    pub fn hash(&self) -> TxHash {
        content_hash(&self.signing_bytes().unwrap_or_default())
    }

    pub fn encoded_size(&self) -> usize {
        bincode::serialized_size(self).map(|n| n as usize).unwrap_or(0)
    }

    /* ---------------- validation ---------------- */
    pub fn validate_structure(&self, limits: &TxLimits) -> Result<()> {
        let size = self.encoded_size();
        if size > limits.max_tx_size_bytes {
            return Err(CoreError::InvalidTx(format!(
                "tx size {size} exceeds {} bytes",
                limits.max_tx_size_bytes
            )));
        }
        if self.data.len() > limits.max_code_size_bytes {
            return Err(CoreError::InvalidTx(format!(
                "payload {} exceeds {} bytes",
                self.data.len(),
                limits.max_code_size_bytes
            )));
        }
        if self.access_list.len() > limits.max_access_list_len {
            return Err(CoreError::InvalidTx(format!(
                "access list {} exceeds {} entries",
                self.access_list.len(),
                limits.max_access_list_len
            )));
        }
        if self.gas_limit == 0 {
            return Err(CoreError::InvalidTx("zero gas limit".into()));
        }
        Ok(())
    }

    /// Maximum wei this tx can cost the sender (value + worst-case gas).
    pub fn max_cost(&self) -> u128 {
        self.value
            .saturating_add(self.fee.price_upper_bound().saturating_mul(self.gas_limit as u128))
    }
}

/* ---------------------------------------------------------------------
   Signature verification seam
---------------------------------------------------------------------*/

/// Verification backend for PQ signatures; the scheme itself lives outside
/// the core. The admission pipeline consults this once per tx.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, tx: &Transaction) -> Result<()>;
}

/// Accepts any non-empty signature. Devnet and test default.
pub struct PermissiveVerifier;

impl SignatureVerifier for PermissiveVerifier {
    fn verify(&self, tx: &Transaction) -> Result<()> {
        match &tx.signature {
            Some(sig) if !sig.is_empty() => Ok(()),
            _ => Err(CoreError::BadSignature("missing signature".into())),
        }
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
