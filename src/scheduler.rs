// src/scheduler.rs
//
// Optimistic conflict-partitioned scheduler. Transactions are layered by
// read/write access-set disjointness; layers apply in order and txs within
// a layer commute, so they execute in parallel over one frozen base
// snapshot. The result must equal strict serial application bit-for-bit.
//
// A tx is placed after the last layer it conflicts with. Joining an
// earlier disjoint layer would let it run before a conflicting
// earlier-declared tx, which breaks serial equivalence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;

use crate::block::Block;
use crate::config::{ChainConfig, TxLimits};
use crate::executor::{execute_tx, receipts_root, ApplyResult, BlockEnv, Receipt, Vm};
use crate::state::StateStore;
use crate::transaction::Transaction;
use crate::types::{Address, Hash32};

/* ---------------------------------------------------------------------
   Access sets
---------------------------------------------------------------------*/
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StateKey {
    Balance(Address),
    Nonce(Address),
    Storage(Address, Hash32),
}

#[derive(Debug, Clone, Default)]
pub struct AccessSets {
    pub reads: HashSet<StateKey>,
    pub writes: HashSet<StateKey>,
    /// Contract call without a declared access list: accesses are unknown
    /// and the tx must be fenced into its own layer.
    pub opaque: bool,
}

/// Statically derive the (R, W) key sets a tx touches.
pub fn access_sets(tx: &Transaction) -> AccessSets {
    let mut sets = AccessSets::default();
    sets.reads.insert(StateKey::Balance(tx.sender));
    sets.reads.insert(StateKey::Nonce(tx.sender));
    sets.reads.insert(StateKey::Balance(tx.to));
    sets.writes.insert(StateKey::Balance(tx.sender));
    sets.writes.insert(StateKey::Balance(tx.to));
    sets.writes.insert(StateKey::Nonce(tx.sender));

    if !tx.is_transfer() {
        if tx.access_list.is_empty() {
            sets.opaque = true;
        } else {
            for entry in &tx.access_list {
                sets.reads.insert(StateKey::Balance(entry.address));
                sets.writes.insert(StateKey::Balance(entry.address));
                for key in &entry.storage_keys {
                    sets.reads.insert(StateKey::Storage(entry.address, *key));
                    sets.writes.insert(StateKey::Storage(entry.address, *key));
                }
            }
        }
    }
    sets
}

/* ---------------------------------------------------------------------
   Layering
---------------------------------------------------------------------*/
#[derive(Debug, Default)]
struct LayerSets {
    reads: HashSet<StateKey>,
    writes: HashSet<StateKey>,
    opaque: bool,
}

impl LayerSets {
    fn conflicts_with(&self, tx: &AccessSets) -> bool {
        if self.opaque || tx.opaque {
            return true;
        }
        tx.writes.iter().any(|k| self.writes.contains(k))
            || tx.writes.iter().any(|k| self.reads.contains(k))
            || tx.reads.iter().any(|k| self.writes.contains(k))
    }

    fn absorb(&mut self, tx: &AccessSets) {
        self.reads.extend(tx.reads.iter().cloned());
        self.writes.extend(tx.writes.iter().cloned());
        self.opaque |= tx.opaque;
    }
}

/// Partition tx indices into conflict-free layers, preserving declared
/// order: each tx lands in the first layer after every layer it conflicts
/// with.
pub fn layer_transactions(txs: &[Transaction]) -> Vec<Vec<usize>> {
    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut layer_sets: Vec<LayerSets> = Vec::new();

    for (idx, tx) in txs.iter().enumerate() {
        let acc = access_sets(tx);
        let last_conflict = layer_sets.iter().rposition(|l| l.conflicts_with(&acc));
        let target = match last_conflict {
            Some(i) => i + 1,
            None => 0,
        };
        if target == layers.len() {
            layers.push(Vec::new());
            layer_sets.push(LayerSets::default());
        }
        layers[target].push(idx);
        layer_sets[target].absorb(&acc);
    }
    layers
}

/* ---------------------------------------------------------------------
   Optimistic apply
---------------------------------------------------------------------*/
pub struct OptimisticScheduler {
    vm: Arc<dyn Vm>,
    cfg: ChainConfig,
    limits: TxLimits,
    pool: rayon::ThreadPool,
}

impl OptimisticScheduler {
    pub fn new(vm: Arc<dyn Vm>, cfg: ChainConfig, limits: TxLimits) -> Self {
        let threads = num_cpus::get().max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("exec-layer-{i}"))
            .build()
            .expect("build scheduler thread pool");
        Self { vm, cfg, limits, pool }
    }

    /// Apply layers in order; within a layer txs execute in parallel over
    /// the merged state of all prior layers, and their disjoint deltas are
    /// folded back in declared order.
    pub fn optimistic_apply(
        &self,
        parent: &StateStore,
        block: &Block,
        base_fee: u128,
    ) -> ApplyResult {
        let env = BlockEnv::for_block(block, base_fee);
        let layers = layer_transactions(&block.transactions);

        let mut state = parent.clone();
        let mut receipts: Vec<Option<Receipt>> = vec![None; block.transactions.len()];
        let mut gas_used = 0u64;

        for layer in layers {
            let state_ref = &state;
            let env_ref = &env;
            let mut results: Vec<(usize, Receipt, HashMap<Address, crate::state::AccountState>)> =
                self.pool.install(|| {
                    layer
                        .par_iter()
                        .map(|&i| {
                            let (receipt, writes) = execute_tx(
                                state_ref,
                                &block.transactions[i],
                                env_ref,
                                self.vm.as_ref(),
                                &self.cfg,
                                &self.limits,
                            );
                            (i, receipt, writes)
                        })
                        .collect()
                });
            results.sort_by_key(|(i, _, _)| *i);
            for (i, receipt, writes) in results {
                gas_used += receipt.gas_used;
                receipts[i] = Some(receipt);
                state.apply_writes(writes);
            }
        }

        let receipts: Vec<Receipt> = receipts.into_iter().flatten().collect();
        let state_root = state.state_root();
        let receipts_root = receipts_root(&receipts);
        ApplyResult {
            state,
            receipts,
            state_root,
            receipts_root,
            gas_used,
        }
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
