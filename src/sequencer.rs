// src/sequencer.rs
//
// Per-sender nonce sequencing. Each sender gets its own queue keyed by
// nonce; a tx is *ready* when its nonce is the next expected for that
// sender and *held* while a gap exists. Queues live in a sharded map so
// hot senders do not contend with each other.
//
// `chain_nonce` is the confirmed on-chain nonce; `next_ready` is the
// speculative cursor advanced by pops so a contiguous run can drain in one
// pass. Only `update_chain_nonce` (inclusion or reorg) moves the confirmed
// base, and it resets the speculative cursor.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::fee_market::BPS_DEN;
use crate::transaction::{Transaction, TxHash};
use crate::types::Address;

/* ---------------------------------------------------------------------
   Pool entry
---------------------------------------------------------------------*/
#[derive(Debug, Clone)]
pub struct PooledTx {
    pub tx: Transaction,
    pub hash: TxHash,
    pub size_bytes: usize,
    /// Effective per-gas fee computed against the floor at admission.
    pub effective_fee: u128,
    /// Wall-clock seconds at admission; informational only.
    pub arrival_wall: f64,
}

impl PooledTx {
    pub fn sender(&self) -> Address {
        self.tx.sender
    }

    pub fn nonce(&self) -> u64 {
        self.tx.nonce
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Ready,
    Held,
}

/* ---------------------------------------------------------------------
   Add outcome
---------------------------------------------------------------------*/
#[derive(Debug)]
pub enum SeqAdd {
    Admitted {
        state: TxState,
    },
    /// A prior tx with the same (sender, nonce) was displaced.
    Replaced {
        old: Box<PooledTx>,
        state: TxState,
    },
    /// Identical content hash already pooled.
    DuplicateTx,
    /// Same (sender, nonce) with an insufficient fee bump.
    Underpriced {
        required_fee: u128,
    },
    /// Below the sender's confirmed chain nonce.
    NonceTooLow {
        chain_nonce: u64,
    },
}

/* ---------------------------------------------------------------------
   Per-sender queue
---------------------------------------------------------------------*/
#[derive(Debug, Default)]
struct SenderQueue {
    txs: std::collections::BTreeMap<u64, PooledTx>,
    chain_nonce: u64,
    next_ready: u64,
}

impl SenderQueue {
    fn new(chain_nonce: u64) -> Self {
        Self {
            txs: Default::default(),
            chain_nonce,
            next_ready: chain_nonce,
        }
    }

    fn state_of(&self, nonce: u64) -> TxState {
        if nonce == self.next_ready {
            TxState::Ready
        } else {
            TxState::Held
        }
    }
}

/* ---------------------------------------------------------------------
   Sequencer
---------------------------------------------------------------------*/
pub struct Sequencer {
    queues: DashMap<Address, SenderQueue>,
    replacement_bps: u64,
}

impl Sequencer {
    pub fn new(replacement_bps: u64) -> Self {
        Self {
            queues: DashMap::new(),
            replacement_bps,
        }
    }

    /// Insert a tx. `chain_nonce_hint` seeds the sender's queue when this is
    /// the first tx seen from them; known senders keep their tracked nonce.
    pub fn add(&self, ptx: PooledTx, chain_nonce_hint: u64) -> SeqAdd {
        let sender = ptx.sender();
        let nonce = ptx.nonce();
        let mut queue = self
            .queues
            .entry(sender)
            .or_insert_with(|| SenderQueue::new(chain_nonce_hint));

        if nonce < queue.chain_nonce {
            return SeqAdd::NonceTooLow {
                chain_nonce: queue.chain_nonce,
            };
        }

        if let Some((old_hash, old_fee)) = queue.txs.get(&nonce).map(|e| (e.hash, e.effective_fee)) {
            if old_hash == ptx.hash {
                return SeqAdd::DuplicateTx;
            }
            // Replacement: new effective fee must clear old by replacement_bps.
            let required = old_fee + old_fee * self.replacement_bps as u128 / BPS_DEN as u128;
            if ptx.effective_fee < required {
                return SeqAdd::Underpriced {
                    required_fee: required,
                };
            }
            let old = queue.txs.insert(nonce, ptx).expect("entry checked above");
            let state = queue.state_of(nonce);
            return SeqAdd::Replaced {
                old: Box::new(old),
                state,
            };
        }

        queue.txs.insert(nonce, ptx);
        SeqAdd::Admitted {
            state: queue.state_of(nonce),
        }
    }

    /// Pop one ready tx from `sender`, advancing the speculative cursor.
    /// The confirmed chain nonce only moves on inclusion.
    pub fn pop_ready_for(&self, sender: &Address) -> Option<PooledTx> {
        let mut queue = self.queues.get_mut(sender)?;
        let next = queue.next_ready;
        let ptx = queue.txs.remove(&next)?;
        queue.next_ready = next + 1;
        Some(ptx)
    }

    /// Pop a ready tx from any sender, scanning in address order.
    pub fn pop_ready(&self) -> Option<PooledTx> {
        let candidates: Vec<Address> = self.queues.iter().map(|e| *e.key()).collect();
        for sender in candidates {
            if let Some(ptx) = self.pop_ready_for(&sender) {
                return Some(ptx);
            }
        }
        None
    }

    /// Clone of the ready head for `sender`, if any.
    pub fn peek_ready(&self, sender: &Address) -> Option<PooledTx> {
        let queue = self.queues.get(sender)?;
        queue.txs.get(&queue.next_ready).cloned()
    }

    /// Set the confirmed chain nonce. Strictly lower nonces were included
    /// elsewhere and are dropped; the head is re-evaluated for readiness.
    /// Returns the dropped entries so the pool can account for them.
    pub fn update_chain_nonce(&self, sender: &Address, nonce: u64) -> Vec<PooledTx> {
        let mut queue = self
            .queues
            .entry(*sender)
            .or_insert_with(|| SenderQueue::new(nonce));
        queue.chain_nonce = nonce;
        queue.next_ready = nonce;
        let stale: Vec<u64> = queue.txs.range(..nonce).map(|(n, _)| *n).collect();
        let mut dropped = Vec::with_capacity(stale.len());
        for n in stale {
            if let Some(ptx) = queue.txs.remove(&n) {
                dropped.push(ptx);
            }
        }
        if queue.txs.is_empty() {
            let sender = *sender;
            drop(queue);
            self.queues.remove_if(&sender, |_, q| q.txs.is_empty());
        }
        dropped
    }

    pub fn chain_nonce(&self, sender: &Address) -> Option<u64> {
        self.queues.get(sender).map(|q| q.chain_nonce)
    }

    /// Reset speculative cursors after a reorg so readiness is recomputed
    /// from the confirmed nonces.
    pub fn recompute_readiness_for_senders<'a, I>(&self, senders: I)
    where
        I: IntoIterator<Item = &'a Address>,
    {
        for sender in senders {
            if let Some(mut queue) = self.queues.get_mut(sender) {
                queue.next_ready = queue.chain_nonce;
            }
        }
    }

    /// Remove a specific pooled tx (inclusion or eviction).
    pub fn remove(&self, sender: &Address, nonce: u64) -> Option<PooledTx> {
        let mut queue = self.queues.get_mut(sender)?;
        let removed = queue.txs.remove(&nonce);
        if queue.txs.is_empty() {
            drop(queue);
            self.queues.remove_if(sender, |_, q| q.txs.is_empty());
        }
        removed
    }

    pub fn state_of(&self, sender: &Address, nonce: u64) -> Option<TxState> {
        let queue = self.queues.get(sender)?;
        queue.txs.get(&nonce).map(|_| queue.state_of(nonce))
    }

    pub fn senders(&self) -> Vec<Address> {
        self.queues.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(|e| e.value().txs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
