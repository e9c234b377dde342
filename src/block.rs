// src/block.rs
//
// Block model. The block hash binds the full header tuple plus the ordered
// transaction hashes, so any change to contents or ordering changes identity.
//

use serde::{Deserialize, Serialize};

use crate::transaction::{Transaction, TxHash};
use crate::types::{content_hash, Hash32};

pub type BlockHash = Hash32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: BlockHash,
    /// Epoch seconds, producer-declared.
    pub timestamp: i64,
    pub gas_limit: u64,
    /// State commitment after applying this block.
    pub state_root: Hash32,
    pub receipts_root: Hash32,
    /// Beacon output mixed into the execution environment.
    pub randomness_seed: Hash32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    pub fn genesis(timestamp: i64, gas_limit: u64) -> Self {
        Self {
            header: BlockHeader {
                height: 0,
                parent_hash: [0; 32],
                timestamp,
                gas_limit,
                state_root: [0; 32],
                receipts_root: [0; 32],
                randomness_seed: [0; 32],
            },
            transactions: Vec::new(),
        }
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Block identity: hash over the canonical header encoding followed by
    /// the ordered transaction hashes.
    pub fn hash(&self) -> BlockHash {
        let mut buf = bincode::serialize(&self.header).unwrap_or_default();
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.hash());
        }
        content_hash(&buf)
    }

    pub fn tx_hashes(&self) -> Vec<TxHash> {
        self.transactions.iter().map(|tx| tx.hash()).collect()
    }

    pub fn gas_declared(&self) -> u64 {
        self.transactions.iter().map(|tx| tx.gas_limit).sum()
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::FeeFields;
    use crate::types::Address;

    fn sample_block() -> Block {
        let tx = Transaction::transfer(
            Address::repeat(1),
            Address::repeat(2),
            10,
            0,
            21_000,
            FeeFields::Legacy { gas_price: 2 },
        );
        let mut b = Block::genesis(1_000, 30_000_000);
        b.header.height = 1;
        b.transactions.push(tx);
        b
    }

    #[test]
    fn hash_binds_header_fields() {
        let base = sample_block();
        let h = base.hash();

        let mut other = base.clone();
        other.header.timestamp += 1;
        assert_ne!(h, other.hash());

        let mut other = base.clone();
        other.header.randomness_seed = [9; 32];
        assert_ne!(h, other.hash());

        let mut other = base.clone();
        other.header.state_root = [1; 32];
        assert_ne!(h, other.hash());
    }

    #[test]
    fn hash_binds_tx_order() {
        let mut b = sample_block();
        let extra = Transaction::transfer(
            Address::repeat(3),
            Address::repeat(4),
            5,
            0,
            21_000,
            FeeFields::Legacy { gas_price: 2 },
        );
        b.transactions.push(extra);
        let h = b.hash();
        b.transactions.reverse();
        assert_ne!(h, b.hash());
    }
}
