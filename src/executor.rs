// src/executor.rs
//
// Deterministic block application. Given (parent_state, block) the executor
// produces (new_state, receipts, state_root) with no wall-clock reads, no
// nondeterministic iteration, and integer math only: identical inputs yield
// a bit-identical state root on every honest node.
//
// The VM is an injected pure function over (callee, input, gas, env); plain
// value transfers never enter it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::Block;
use crate::config::{ChainConfig, TxLimits};
use crate::fee_market::{effective_gas_price, BPS_DEN};
use crate::state::{AccountState, Overlay, StateStore, StateView};
use crate::transaction::{Transaction, TxHash};
use crate::types::{content_hash, Address, Hash32};

/* ---------------------------------------------------------------------
   VM seam
---------------------------------------------------------------------*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash32>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct BlockEnv {
    pub height: u64,
    pub timestamp: i64,
    pub gas_limit: u64,
    pub randomness_seed: Hash32,
    /// Fee-market floor recorded for this block; prices settle against it.
    pub base_fee: u128,
}

impl BlockEnv {
    pub fn for_block(block: &Block, base_fee: u128) -> Self {
        Self {
            height: block.header.height,
            timestamp: block.header.timestamp,
            gas_limit: block.header.gas_limit,
            randomness_seed: block.header.randomness_seed,
            base_fee,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TxEnv {
    pub tx_hash: TxHash,
    pub origin: Address,
    pub value: u128,
}

#[derive(Debug, Clone, Default)]
pub struct VmOutcome {
    pub return_data: Vec<u8>,
    pub gas_used: u64,
    /// Refund units reported by the VM; capped by the refund ratio.
    pub refund_units: u64,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,
    #[error("revert: {0}")]
    Revert(String),
    #[error("trap: {0}")]
    Trap(String),
}

/// Pure VM entrypoint: `(callee, input, gas, env) → (return, gas_used, logs)`.
pub trait Vm: Send + Sync {
    fn execute(
        &self,
        callee: Address,
        input: &[u8],
        gas_limit: u64,
        block_env: &BlockEnv,
        tx_env: &TxEnv,
    ) -> Result<VmOutcome, VmError>;
}

/// Deterministic byte-priced stand-in used where no real VM is wired:
/// charges `gas_per_byte` per input byte and emits one log entry echoing
/// the callee. Input starting with 0xFF traps, for failure-path tests.
pub struct FixedCostVm {
    pub gas_per_byte: u64,
}

impl Default for FixedCostVm {
    fn default() -> Self {
        Self { gas_per_byte: 16 }
    }
}

impl Vm for FixedCostVm {
    fn execute(
        &self,
        callee: Address,
        input: &[u8],
        gas_limit: u64,
        _block_env: &BlockEnv,
        tx_env: &TxEnv,
    ) -> Result<VmOutcome, VmError> {
        if input.first() == Some(&0xFF) {
            return Err(VmError::Trap("poisoned input".into()));
        }
        let cost = self.gas_per_byte.saturating_mul(input.len() as u64);
        if cost > gas_limit {
            return Err(VmError::OutOfGas);
        }
        Ok(VmOutcome {
            return_data: Vec::new(),
            gas_used: cost,
            refund_units: 0,
            logs: vec![LogEntry {
                address: callee,
                topics: vec![tx_env.tx_hash],
                data: Vec::new(),
            }],
        })
    }
}

/* ---------------------------------------------------------------------
   Receipts
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptReason {
    InvalidNonce,
    InsufficientFunds,
    VmFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// 1 success, 0 failure/skip.
    pub status: u8,
    pub reason: Option<ReceiptReason>,
    pub gas_used: u64,
    pub logs: Vec<LogEntry>,
}

impl Receipt {
    fn skipped(tx_hash: TxHash, reason: ReceiptReason) -> Self {
        Self {
            tx_hash,
            status: 0,
            reason: Some(reason),
            gas_used: 0,
            logs: Vec::new(),
        }
    }
}

/// Event bounds a VM outcome must respect to settle successfully.
fn outcome_within_limits(outcome: &VmOutcome, limits: &TxLimits) -> bool {
    outcome.logs.len() <= limits.max_logs_per_tx
        && outcome.logs.iter().all(|log| {
            log.topics.len() <= limits.max_event_topics
                && log.data.len() <= limits.max_event_data_bytes
        })
}

/// Commitment over receipts in block order.
pub fn receipts_root(receipts: &[Receipt]) -> Hash32 {
    let encoded = bincode::serialize(receipts).unwrap_or_default();
    content_hash(&encoded)
}

/* ---------------------------------------------------------------------
   Single-tx execution
---------------------------------------------------------------------*/

/// Execute one tx against a read-only base, returning the receipt and the
/// buffered account writes. Pre-execution skips (bad nonce, unfundable gas
/// debit) leave the writes empty, identical for serial and optimistic
/// application.
pub fn execute_tx(
    base: &dyn StateView,
    tx: &Transaction,
    env: &BlockEnv,
    vm: &dyn Vm,
    cfg: &ChainConfig,
    limits: &TxLimits,
) -> (Receipt, HashMap<Address, AccountState>) {
    let tx_hash = tx.hash();
    let sender_state = base.account(&tx.sender);

    if sender_state.nonce != tx.nonce {
        return (
            Receipt::skipped(tx_hash, ReceiptReason::InvalidNonce),
            HashMap::new(),
        );
    }

    let (price, _, _) = effective_gas_price(&tx.fee, env.base_fee);
    let upfront = (tx.gas_limit as u128).saturating_mul(price);

    let mut overlay = Overlay::new(base);
    if overlay.debit(tx.sender, upfront).is_err() {
        return (
            Receipt::skipped(tx_hash, ReceiptReason::InsufficientFunds),
            HashMap::new(),
        );
    }

    let tx_env = TxEnv {
        tx_hash,
        origin: tx.sender,
        value: tx.value,
    };

    // The call/transfer phase buffers into a nested overlay so a failure
    // reverts everything except the gas debit.
    let (status, reason, gas_used, refund_units, logs, call_writes) = {
        let mut call = Overlay::new(&overlay);
        let call_result: Result<VmOutcome, (u64, ReceiptReason)> = (|| {
            if call.debit(tx.sender, tx.value).is_err() {
                return Err((cfg.intrinsic_gas, ReceiptReason::InsufficientFunds));
            }
            call.credit(tx.to, tx.value);
            if tx.is_transfer() {
                return Ok(VmOutcome {
                    gas_used: 0,
                    ..Default::default()
                });
            }
            let vm_gas_budget = tx.gas_limit.saturating_sub(cfg.intrinsic_gas);
            match vm.execute(tx.to, &tx.data, vm_gas_budget, env, &tx_env) {
                Ok(outcome)
                    if outcome.gas_used <= vm_gas_budget
                        && outcome_within_limits(&outcome, limits) =>
                {
                    Ok(outcome)
                }
                Ok(_) | Err(_) => Err((tx.gas_limit, ReceiptReason::VmFailure)),
            }
        })();

        match call_result {
            Ok(outcome) => (
                1,
                None,
                cfg.intrinsic_gas + outcome.gas_used,
                outcome.refund_units,
                outcome.logs,
                Some(call.into_writes()),
            ),
            // call overlay dropped: the delta reverts, the gas debit stands.
            Err((gas, reason)) => (0, Some(reason), gas, 0, Vec::new(), None),
        }
    };
    if let Some(writes) = call_writes {
        for (addr, acct) in writes {
            overlay.set_account(addr, acct);
        }
    }

    let gas_used = gas_used.min(tx.gas_limit);
    // VM refunds are capped at refund_ratio_cap of gas actually used.
    let refund_cap = gas_used as u128 * cfg.refund_ratio_cap_bps as u128 / BPS_DEN as u128;
    let refunded_units = (refund_units as u128).min(refund_cap) as u64;
    let charged_gas = gas_used.saturating_sub(refunded_units);
    let unused = ((tx.gas_limit - charged_gas) as u128).saturating_mul(price);
    overlay.credit(tx.sender, unused);
    overlay.bump_nonce(tx.sender);

    let receipt = Receipt {
        tx_hash,
        status,
        reason,
        gas_used: charged_gas,
        logs,
    };
    (receipt, overlay.into_writes())
}

/* ---------------------------------------------------------------------
   Block application
---------------------------------------------------------------------*/
#[derive(Debug)]
pub struct ApplyResult {
    pub state: StateStore,
    pub receipts: Vec<Receipt>,
    pub state_root: Hash32,
    pub receipts_root: Hash32,
    pub gas_used: u64,
}

pub struct Executor {
    vm: Arc<dyn Vm>,
    cfg: ChainConfig,
    limits: TxLimits,
}

impl Executor {
    pub fn new(vm: Arc<dyn Vm>, cfg: ChainConfig, limits: TxLimits) -> Self {
        Self { vm, cfg, limits }
    }

    pub fn vm(&self) -> &Arc<dyn Vm> {
        &self.vm
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.cfg
    }

    /// Strict serial application in declared order; the correctness baseline
    /// the optimistic scheduler must match bit-for-bit.
    pub fn serial_apply(&self, parent: &StateStore, block: &Block, base_fee: u128) -> ApplyResult {
        let env = BlockEnv::for_block(block, base_fee);
        let mut state = parent.clone();
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut gas_used = 0u64;

        for tx in &block.transactions {
            let (receipt, writes) =
                execute_tx(&state, tx, &env, self.vm.as_ref(), &self.cfg, &self.limits);
            gas_used += receipt.gas_used;
            receipts.push(receipt);
            state.apply_writes(writes);
        }

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
#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::FeeFields;

    const A: Address = Address([0x11; 20]);
    const B: Address = Address([0x22; 20]);
    const C: Address = Address([0x33; 20]);

    fn executor() -> Executor {
        Executor::new(
            Arc::new(FixedCostVm::default()),
            ChainConfig::default(),
            TxLimits::default(),
        )
    }

    fn transfer(from: Address, to: Address, value: u128, nonce: u64) -> Transaction {
        Transaction::transfer(from, to, value, nonce, 30_000, FeeFields::Legacy { gas_price: 1 })
    }

    fn block_with(txs: Vec<Transaction>) -> Block {
        let mut b = Block::genesis(10, 30_000_000);
        b.header.height = 1;
        b.transactions = txs;
        b
    }

    fn funded() -> StateStore {
        StateStore::with_balances([(A, 1_000_000), (B, 1_000_000)])
    }

    #[test]
    fn transfer_moves_value_and_charges_intrinsic_gas() {
        let ex = executor();
        let res = ex.serial_apply(&funded(), &block_with(vec![transfer(A, C, 500, 0)]), 1);
        assert_eq!(res.receipts.len(), 1);
        let r = &res.receipts[0];
        assert_eq!(r.status, 1);
        assert_eq!(r.gas_used, 21_000);
        assert_eq!(res.state.balance_of(&C), 500);
        assert_eq!(res.state.balance_of(&A), 1_000_000 - 500 - 21_000);
        assert_eq!(res.state.nonce_of(&A), 1);
    }

    #[test]
    fn invalid_nonce_leaves_state_unchanged() {
        let ex = executor();
        let parent = funded();
        let root_before = parent.state_root();
        let res = ex.serial_apply(&parent, &block_with(vec![transfer(A, C, 500, 7)]), 1);
        let r = &res.receipts[0];
        assert_eq!(r.status, 0);
        assert_eq!(r.reason, Some(ReceiptReason::InvalidNonce));
        assert_eq!(r.gas_used, 0);
        assert_eq!(res.state_root, root_before);
    }

    #[test]
    fn unfundable_gas_debit_skips() {
        let ex = executor();
        let parent = StateStore::with_balances([(A, 10)]);
        let res = ex.serial_apply(&parent, &block_with(vec![transfer(A, C, 1, 0)]), 1);
        assert_eq!(res.receipts[0].reason, Some(ReceiptReason::InsufficientFunds));
        assert_eq!(res.state.balance_of(&A), 10);
    }

    #[test]
    fn value_exceeding_balance_fails_but_charges_gas() {
        let ex = executor();
        // Can cover the gas debit but not the transfer value.
        let parent = StateStore::with_balances([(A, 40_000)]);
        let res = ex.serial_apply(&parent, &block_with(vec![transfer(A, C, 50_000, 0)]), 1);
        let r = &res.receipts[0];
        assert_eq!(r.status, 0);
        assert_eq!(r.reason, Some(ReceiptReason::InsufficientFunds));
        assert_eq!(r.gas_used, 21_000);
        assert_eq!(res.state.balance_of(&C), 0);
        assert_eq!(res.state.balance_of(&A), 40_000 - 21_000);
        // Failed execution still consumes the nonce.
        assert_eq!(res.state.nonce_of(&A), 1);
    }

    #[test]
    fn vm_trap_reverts_call_but_keeps_gas_debit() {
        let ex = executor();
        let mut tx = transfer(A, C, 500, 0);
        tx.data = vec![0xFF, 0x01];
        let res = ex.serial_apply(&funded(), &block_with(vec![tx]), 1);
        let r = &res.receipts[0];
        assert_eq!(r.status, 0);
        assert_eq!(r.reason, Some(ReceiptReason::VmFailure));
        assert_eq!(r.gas_used, 30_000); // full gas limit on trap
        assert_eq!(res.state.balance_of(&C), 0); // value move reverted
        assert_eq!(res.state.balance_of(&A), 1_000_000 - 30_000);
    }

    #[test]
    fn vm_call_charges_intrinsic_plus_vm_gas() {
        let ex = executor();
        let mut tx = transfer(A, C, 0, 0);
        tx.data = vec![0x01; 100]; // 100 bytes · 16 gas
        let res = ex.serial_apply(&funded(), &block_with(vec![tx]), 1);
        let r = &res.receipts[0];
        assert_eq!(r.status, 1);
        assert_eq!(r.gas_used, 21_000 + 1_600);
        assert_eq!(r.logs.len(), 1);
    }

    #[test]
    fn same_sender_sequence_in_one_block() {
        let ex = executor();
        let res = ex.serial_apply(
            &funded(),
            &block_with(vec![transfer(A, C, 100, 0), transfer(A, C, 100, 1)]),
            1,
        );
        assert!(res.receipts.iter().all(|r| r.status == 1));
        assert_eq!(res.state.balance_of(&C), 200);
        assert_eq!(res.state.nonce_of(&A), 2);
    }

    #[test]
    fn apply_is_deterministic() {
        let ex = executor();
        let block = block_with(vec![transfer(A, C, 100, 0), transfer(B, C, 7, 0)]);
        let r1 = ex.serial_apply(&funded(), &block, 1);
        let r2 = ex.serial_apply(&funded(), &block, 1);
        assert_eq!(r1.state_root, r2.state_root);
        assert_eq!(r1.receipts_root, r2.receipts_root);
    }

    #[test]
    fn receipts_root_binds_order() {
        let r1 = Receipt::skipped([1; 32], ReceiptReason::InvalidNonce);
        let r2 = Receipt::skipped([2; 32], ReceiptReason::InvalidNonce);
        assert_ne!(
            receipts_root(&[r1.clone(), r2.clone()]),
            receipts_root(&[r2, r1])
        );
    }
}
