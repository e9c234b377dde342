// src/mempool.rs
//
// Transaction mempool: composes the rate limiter, fee market, and
// per-sender sequencer behind one admission pipeline, owns the pending-tx
// set, selects txs for block building, and reconciles itself across chain
// reorgs.
//
// Byte capacity is enforced by evicting the cheapest entries first; every
// admission, drop, and replacement is published on the event bus.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::block::Block;
use crate::config::{MempoolConfig, TxLimits};
use crate::fee_market::{
    admission_check, suggest_fees, FeeMarketConfig, FeeMarketState, FeeSuggestion, FeeVerdict,
    MempoolPressure,
};
use crate::limiter::{Limiter, LimiterConfig, ANON_PEER};
use crate::notify::{
    publish_dropped_tx, publish_pending_tx, publish_replaced_tx, publish_reorg_summary, EventBus,
};
use crate::sequencer::{PooledTx, SeqAdd, Sequencer, TxState};
use crate::transaction::{SignatureVerifier, Transaction, TxHash};
use crate::types::{hex_0x, Address};

/// Read access to confirmed chain nonces; implemented by the chain store.
pub trait NonceSource: Send + Sync {
    fn chain_nonce(&self, addr: &Address) -> u64;
}

/* ---------------------------------------------------------------------
   Admission outcomes
---------------------------------------------------------------------*/
#[derive(Debug)]
pub enum Admission {
    Admitted { hash: TxHash, state: TxState },
    Rejected(AdmissionError),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AdmissionError {
    InvalidTx { detail: String },
    BadSignature { detail: String },
    RateLimited { retry_after_seconds: f64 },
    NoFeeFields,
    BelowFloor { floor_with_surge: String, effective: String },
    TipTooLow { min_tip: String },
    Underpriced { required_fee: String },
    DuplicateTx,
    NonceTooLow { chain_nonce: u64 },
    MempoolFull,
}

/* ---------------------------------------------------------------------
   Stats
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MempoolStats {
    pub pending_txs: usize,
    pub pending_bytes: usize,
    pub pending_gas: u64,
    pub senders: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReorgStats {
    pub reinjected: usize,
    pub dropped_confirmed: usize,
    pub skipped_duplicate: usize,
    pub skipped_replaced: usize,
    pub reinject_errors: usize,
    pub nonce_updates: usize,
    pub senders_touched: usize,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone)]
struct TxMeta {
    sender: Address,
    nonce: u64,
    size_bytes: usize,
    effective_fee: u128,
    gas_limit: u64,
}

/* ---------------------------------------------------------------------
   Mempool
---------------------------------------------------------------------*/
pub struct Mempool {
    cfg: MempoolConfig,
    limits: TxLimits,
    fee_cfg: FeeMarketConfig,
    fee_state: parking_lot::RwLock<FeeMarketState>,
    limiter: Limiter,
    sequencer: Sequencer,
    bus: Arc<EventBus>,
    verifier: Arc<dyn SignatureVerifier>,
    block_gas_limit: u64,

    index: DashMap<TxHash, TxMeta>,
    bytes_used: AtomicUsize,
    pending_gas: AtomicU64,
}

impl Mempool {
    pub fn new(
        cfg: MempoolConfig,
        limits: TxLimits,
        fee_cfg: FeeMarketConfig,
        limiter_cfg: LimiterConfig,
        block_gas_limit: u64,
        bus: Arc<EventBus>,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            sequencer: Sequencer::new(cfg.replacement_bps),
            limiter: Limiter::new(limiter_cfg),
            fee_state: parking_lot::RwLock::new(FeeMarketState::default()),
            cfg,
            limits,
            fee_cfg,
            bus,
            verifier,
            block_gas_limit,
            index: DashMap::new(),
            bytes_used: AtomicUsize::new(0),
            pending_gas: AtomicU64::new(0),
        }
    }

    /* ---------------- admission ------------------- */

    /// Full admission pipeline for a tx received from `peer_id` (None maps
    /// to the shared anonymous bucket).
    pub fn submit(
        &self,
        peer_id: Option<&str>,
        tx: Transaction,
        nonces: &dyn NonceSource,
    ) -> Admission {
        // 1. structural + signature validation
        if let Err(e) = tx.validate_structure(&self.limits) {
            return Admission::Rejected(AdmissionError::InvalidTx {
                detail: e.to_string(),
            });
        }
        if let Err(e) = self.verifier.verify(&tx) {
            return Admission::Rejected(AdmissionError::BadSignature {
                detail: e.to_string(),
            });
        }

        // 2. ingress rate limits
        let size = tx.encoded_size();
        let peer = peer_id.unwrap_or(ANON_PEER);
        let decision = self.limiter.admit_now(peer, size);
        if !decision.accept {
            return Admission::Rejected(AdmissionError::RateLimited {
                retry_after_seconds: decision.wait_seconds,
            });
        }

        self.admit_pooled(tx, size, nonces, true)
    }

    /// Shared tail of admission: fee check, capacity, sequencing, events.
    /// Reorg re-injection enters here directly, bypassing the limiter.
    fn admit_pooled(
        &self,
        tx: Transaction,
        size: usize,
        nonces: &dyn NonceSource,
        emit_pending: bool,
    ) -> Admission {
        // 3. fee admission against the floor snapshot taken now
        let suggestion = self.suggest_fees();
        let fee = admission_check(&tx.fee, suggestion.floor_with_surge, suggestion.min_tip);
        match fee.verdict {
            FeeVerdict::Accept => {}
            FeeVerdict::NoFeeFields => return Admission::Rejected(AdmissionError::NoFeeFields),
            FeeVerdict::BelowFloor => {
                return Admission::Rejected(AdmissionError::BelowFloor {
                    floor_with_surge: fee.floor_with_surge.to_string(),
                    effective: fee.effective_price.to_string(),
                })
            }
            FeeVerdict::TipTooLow => {
                return Admission::Rejected(AdmissionError::TipTooLow {
                    min_tip: suggestion.min_tip.to_string(),
                })
            }
        }

        // 4. byte capacity, cheapest-first eviction
        if !self.make_room(size, fee.effective_price) {
            return Admission::Rejected(AdmissionError::MempoolFull);
        }

        // 5. per-sender sequencing
        let hash = tx.hash();
        let sender = tx.sender;
        let nonce = tx.nonce;
        let gas_limit = tx.gas_limit;
        let ptx = PooledTx {
            hash,
            size_bytes: size,
            effective_fee: fee.effective_price,
            arrival_wall: Utc::now().timestamp_millis() as f64 / 1_000.0,
            tx,
        };
        let chain_nonce_hint = nonces.chain_nonce(&sender);
        let state = match self.sequencer.add(ptx, chain_nonce_hint) {
            SeqAdd::Admitted { state } => state,
            SeqAdd::Replaced { old, state } => {
                self.forget_meta(&old.hash);
                publish_replaced_tx(&self.bus, &hex_0x(&old.hash), &hex_0x(&hash), "rbf");
                state
            }
            SeqAdd::DuplicateTx => return Admission::Rejected(AdmissionError::DuplicateTx),
            SeqAdd::Underpriced { required_fee } => {
                return Admission::Rejected(AdmissionError::Underpriced {
                    required_fee: required_fee.to_string(),
                })
            }
            SeqAdd::NonceTooLow { chain_nonce } => {
                return Admission::Rejected(AdmissionError::NonceTooLow { chain_nonce })
            }
        };

        self.index.insert(
            hash,
            TxMeta {
                sender,
                nonce,
                size_bytes: size,
                effective_fee: fee.effective_price,
                gas_limit,
            },
        );
        self.bytes_used.fetch_add(size, Ordering::SeqCst);
        self.pending_gas.fetch_add(gas_limit, Ordering::SeqCst);

        if emit_pending {
            publish_pending_tx(
                &self.bus,
                &hex_0x(&hash),
                &sender.to_string(),
                nonce,
                fee.effective_price,
                size,
            );
        }
        Admission::Admitted { hash, state }
    }

    /// Evict cheapest entries until `size` fits. Returns false when the
    /// incoming fee does not beat the cheapest resident tx.
    fn make_room(&self, size: usize, incoming_fee: u128) -> bool {
        loop {
            if self.bytes_used.load(Ordering::SeqCst) + size <= self.cfg.max_bytes {
                return true;
            }
            let victim = self
                .index
                .iter()
                .min_by_key(|e| (e.value().effective_fee, *e.key()))
                .map(|e| (*e.key(), e.value().clone()));
            let Some((victim_hash, meta)) = victim else {
                return size <= self.cfg.max_bytes;
            };
            if meta.effective_fee >= incoming_fee {
                return false;
            }
            if self.sequencer.remove(&meta.sender, meta.nonce).is_some() {
                self.forget_meta(&victim_hash);
                publish_dropped_tx(&self.bus, &hex_0x(&victim_hash), "evicted");
            } else {
                self.forget_meta(&victim_hash);
            }
        }
    }

    fn forget_meta(&self, hash: &TxHash) {
        if let Some((_, meta)) = self.index.remove(hash) {
            self.bytes_used.fetch_sub(meta.size_bytes, Ordering::SeqCst);
            self.pending_gas.fetch_sub(meta.gas_limit, Ordering::SeqCst);
        }
    }

    /* ---------------- fee suggestions ------------- */

    pub fn pressure(&self) -> MempoolPressure {
        MempoolPressure {
            pending_txs: self.index.len(),
            pending_gas: self.pending_gas.load(Ordering::SeqCst),
            block_gas_limit: self.block_gas_limit,
        }
    }

    pub fn suggest_fees(&self) -> FeeSuggestion {
        let snapshot = self.fee_state.read().clone();
        suggest_fees(&snapshot, &self.pressure(), &self.fee_cfg)
    }

    pub fn fee_state(&self) -> FeeMarketState {
        self.fee_state.read().clone()
    }

    /// Install the fee-market state derived for the new canonical tip; the
    /// block-apply thread is the only writer, admission reads snapshots.
    pub fn set_fee_state(&self, state: FeeMarketState) {
        *self.fee_state.write() = state;
    }

    /* ---------------- block selection ------------- */

    /// Select ready txs for a block: the best-paying ready head across all
    /// senders is taken each round, respecting the gas limit. Selected txs
    /// leave the pool; inclusion confirms them, a reorg re-injects them.
    pub fn select_for_block(&self, gas_limit: u64, max_txs: usize) -> Vec<Transaction> {
        let mut selected = Vec::new();
        let mut gas_left = gas_limit;

        while selected.len() < max_txs {
            let mut best: Option<(u128, Address, u64)> = None;
            for sender in self.sequencer.senders() {
                if let Some(head) = self.sequencer.peek_ready(&sender) {
                    if head.tx.gas_limit > gas_left {
                        continue;
                    }
                    let candidate = (head.effective_fee, sender, head.nonce());
                    let better = match &best {
                        None => true,
                        // Highest fee wins; address order breaks ties.
                        Some((fee, addr, _)) => {
                            candidate.0 > *fee || (candidate.0 == *fee && candidate.1 < *addr)
                        }
                    };
                    if better {
                        best = Some(candidate);
                    }
                }
            }
            let Some((_, sender, _)) = best else { break };
            let Some(ptx) = self.sequencer.pop_ready_for(&sender) else {
                break;
            };
            gas_left -= ptx.tx.gas_limit;
            self.forget_meta(&ptx.hash);
            selected.push(ptx.tx);
        }
        selected
    }

    /* ---------------- post-inclusion -------------- */

    /// Drop included txs and refresh sender nonces after a block commits.
    pub fn mark_included(&self, block: &Block, nonces: &dyn NonceSource) {
        let mut senders: Vec<Address> = Vec::new();
        for tx in &block.transactions {
            self.sequencer.remove(&tx.sender, tx.nonce);
            self.forget_meta(&tx.hash());
            if !senders.contains(&tx.sender) {
                senders.push(tx.sender);
            }
        }
        for sender in senders {
            let fresh = nonces.chain_nonce(&sender);
            for dropped in self.sequencer.update_chain_nonce(&sender, fresh) {
                self.forget_meta(&dropped.hash);
                publish_dropped_tx(&self.bus, &hex_0x(&dropped.hash), "stale_nonce");
            }
        }
    }

    /* ---------------- reorg reconciliation -------- */

    /// Reconcile the pool with a chain reorg: re-inject orphaned txs from
    /// the removed branch unless the new branch included or replaced them,
    /// drop everything the new branch confirmed, and refresh chain nonces
    /// for every touched sender. Individual re-injection failures are
    /// counted, never fatal.
    pub fn handle_reorg(
        &self,
        removed: &[Block],
        added: &[Block],
        nonces: &dyn NonceSource,
    ) -> ReorgStats {
        let t0 = Instant::now();
        let mut stats = ReorgStats::default();

        // 1. analyze the new branch
        let mut included_hashes: std::collections::HashSet<TxHash> = Default::default();
        let mut replacements: std::collections::HashMap<(Address, u64), TxHash> = Default::default();
        for block in added {
            for tx in &block.transactions {
                let h = tx.hash();
                included_hashes.insert(h);
                replacements.insert((tx.sender, tx.nonce), h);
            }
        }

        // 2. candidates from the old branch
        let mut reinject: Vec<Transaction> = Vec::new();
        let mut affected: Vec<Address> = Vec::new();
        for block in removed {
            for tx in &block.transactions {
                let h = tx.hash();
                if included_hashes.contains(&h) {
                    stats.skipped_duplicate += 1;
                    continue;
                }
                if let Some(new_hash) = replacements.get(&(tx.sender, tx.nonce)) {
                    if *new_hash != h {
                        stats.skipped_replaced += 1;
                        publish_replaced_tx(&self.bus, &hex_0x(&h), &hex_0x(new_hash), "reorg");
                        continue;
                    }
                }
                if !affected.contains(&tx.sender) {
                    affected.push(tx.sender);
                }
                reinject.push(tx.clone());
            }
        }

        // 3. confirm/drop everything on the new branch
        for h in &included_hashes {
            if let Some(meta) = self.index.get(h).map(|e| e.value().clone()) {
                self.sequencer.remove(&meta.sender, meta.nonce);
                self.forget_meta(h);
            }
            stats.dropped_confirmed += 1;
        }

        // 4. refresh chain nonces before re-injecting so readiness is
        //    computed against the new canonical branch
        for block in added {
            for tx in &block.transactions {
                if !affected.contains(&tx.sender) {
                    affected.push(tx.sender);
                }
            }
        }
        for sender in &affected {
            let fresh = nonces.chain_nonce(sender);
            for dropped in self.sequencer.update_chain_nonce(sender, fresh) {
                self.forget_meta(&dropped.hash);
                publish_dropped_tx(&self.bus, &hex_0x(&dropped.hash), "stale_nonce");
            }
            stats.nonce_updates += 1;
        }
        self.sequencer.recompute_readiness_for_senders(affected.iter());
        stats.senders_touched = affected.len();

        // 5. re-inject survivors, revalidating against the current floor
        for tx in reinject {
            let size = tx.encoded_size();
            match self.admit_pooled(tx, size, nonces, true) {
                Admission::Admitted { .. } => stats.reinjected += 1,
                Admission::Rejected(err) => {
                    log::debug!("reorg re-injection rejected: {err:?}");
                    stats.reinject_errors += 1;
                }
            }
        }

        stats.elapsed_ms = t0.elapsed().as_secs_f64() * 1_000.0;
        publish_reorg_summary(
            &self.bus,
            &json!({
                "reinjected": stats.reinjected,
                "droppedConfirmed": stats.dropped_confirmed,
                "skippedDuplicate": stats.skipped_duplicate,
                "skippedReplaced": stats.skipped_replaced,
                "reinjectErrors": stats.reinject_errors,
                "nonceUpdates": stats.nonce_updates,
                "sendersTouched": stats.senders_touched,
                "elapsedMs": stats.elapsed_ms,
            }),
        );
        log::info!(
            "mempool reorg handled: reinjected={} dropped={} dup={} replaced={} nonce_updates={} senders={} ({:.1}ms)",
            stats.reinjected,
            stats.dropped_confirmed,
            stats.skipped_duplicate,
            stats.skipped_replaced,
            stats.nonce_updates,
            stats.senders_touched,
            stats.elapsed_ms
        );
        stats
    }

    /* ---------------- queries --------------------- */

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.index.contains_key(hash)
    }

    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            pending_txs: self.index.len(),
            pending_bytes: self.bytes_used.load(Ordering::SeqCst),
            pending_gas: self.pending_gas.load(Ordering::SeqCst),
            senders: self.sequencer.senders().len(),
        }
    }

    pub fn limiter(&self) -> &Limiter {
        &self.limiter
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee_market::GWEI;
    use crate::transaction::{FeeFields, PermissiveVerifier};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    const A: Address = Address([0xAA; 20]);
    const B: Address = Address([0xBB; 20]);
    const X: Address = Address([0x01; 20]);
    const Y: Address = Address([0x02; 20]);

    struct FixedNonces(HashMap<Address, u64>);

    impl NonceSource for FixedNonces {
        fn chain_nonce(&self, addr: &Address) -> u64 {
            self.0.get(addr).copied().unwrap_or(0)
        }
    }

    fn nonces(pairs: &[(Address, u64)]) -> FixedNonces {
        FixedNonces(pairs.iter().copied().collect())
    }

    fn pool() -> Mempool {
        pool_with(MempoolConfig::default())
    }

    fn pool_with(cfg: MempoolConfig) -> Mempool {
        Mempool::new(
            cfg,
            TxLimits::default(),
            FeeMarketConfig::default(),
            LimiterConfig::default(),
            30_000_000,
            Arc::new(EventBus::new()),
            Arc::new(PermissiveVerifier),
        )
    }

    fn tx(sender: Address, to: Address, nonce: u64, gas_price: u128) -> Transaction {
        let mut t = Transaction::transfer(sender, to, 1, nonce, 21_000, FeeFields::Legacy { gas_price });
        t.signature = Some(vec![1]);
        t
    }

    fn priced(sender: Address, nonce: u64) -> Transaction {
        // Comfortably above the default 1 gwei floor + 1 gwei tip.
        tx(sender, X, nonce, 5 * GWEI)
    }

    #[test]
    fn admit_then_select() {
        let mp = pool();
        let ns = nonces(&[(A, 0)]);
        let res = mp.submit(Some("peer:1"), priced(A, 0), &ns);
        assert!(res.is_admitted());
        assert_eq!(mp.stats().pending_txs, 1);

        let selected = mp.select_for_block(30_000_000, 100);
        assert_eq!(selected.len(), 1);
        assert_eq!(mp.stats().pending_txs, 0);
    }

    #[test]
    fn below_floor_rejected_with_reason() {
        let mp = pool();
        let ns = nonces(&[(A, 0)]);
        let res = mp.submit(None, tx(A, X, 0, 1), &ns); // 1 wei << 2 gwei floor+tip
        match res {
            Admission::Rejected(AdmissionError::BelowFloor { .. }) => {}
            other => panic!("expected BelowFloor, got {other:?}"),
        }
    }

    #[test]
    fn missing_signature_rejected() {
        let mp = pool();
        let ns = nonces(&[(A, 0)]);
        let mut t = priced(A, 0);
        t.signature = None;
        assert!(matches!(
            mp.submit(None, t, &ns),
            Admission::Rejected(AdmissionError::BadSignature { .. })
        ));
    }

    #[test]
    fn held_until_gap_filled() {
        let mp = pool();
        let ns = nonces(&[(A, 5)]);
        match mp.submit(None, priced(A, 7), &ns) {
            Admission::Admitted { state, .. } => assert_eq!(state, TxState::Held),
            other => panic!("{other:?}"),
        }
        assert!(mp.select_for_block(30_000_000, 10).is_empty());

        mp.submit(None, priced(A, 5), &ns);
        mp.submit(None, priced(A, 6), &ns);
        let selected = mp.select_for_block(30_000_000, 10);
        let nonce_order: Vec<u64> = selected.iter().map(|t| t.nonce).collect();
        assert_eq!(nonce_order, vec![5, 6, 7]);
    }

    #[test]
    fn selection_prefers_higher_fee() {
        let mp = pool();
        let ns = nonces(&[(A, 0), (B, 0)]);
        mp.submit(None, tx(A, X, 0, 5 * GWEI), &ns);
        mp.submit(None, tx(B, Y, 0, 9 * GWEI), &ns);
        let selected = mp.select_for_block(30_000_000, 10);
        assert_eq!(selected[0].sender, B);
        assert_eq!(selected[1].sender, A);
    }

    #[test]
    fn selection_respects_gas_limit() {
        let mp = pool();
        let ns = nonces(&[(A, 0), (B, 0)]);
        mp.submit(None, tx(A, X, 0, 9 * GWEI), &ns);
        mp.submit(None, tx(B, Y, 0, 5 * GWEI), &ns);
        let selected = mp.select_for_block(21_000, 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].sender, A);
    }

    #[test]
    fn replacement_emits_event_and_swaps() {
        let bus = Arc::new(EventBus::new());
        let replaced = Arc::new(AtomicUsize::new(0));
        let r = replaced.clone();
        bus.subscribe(crate::notify::REPLACED_TX, move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let mp = Mempool::new(
            MempoolConfig::default(),
            TxLimits::default(),
            FeeMarketConfig::default(),
            LimiterConfig::default(),
            30_000_000,
            bus,
            Arc::new(PermissiveVerifier),
        );
        let ns = nonces(&[(A, 0)]);
        mp.submit(None, tx(A, X, 0, 5 * GWEI), &ns);
        // +10% bump required: 5.5 gwei clears it.
        let res = mp.submit(None, tx(A, X, 0, 6 * GWEI), &ns);
        assert!(res.is_admitted());
        assert_eq!(replaced.load(Ordering::SeqCst), 1);
        assert_eq!(mp.stats().pending_txs, 1);
    }

    #[test]
    fn underpriced_replacement_rejected() {
        let mp = pool();
        let ns = nonces(&[(A, 0)]);
        mp.submit(None, tx(A, X, 0, 5 * GWEI), &ns);
        let res = mp.submit(None, tx(A, X, 0, 5 * GWEI + 1), &ns);
        assert!(matches!(
            res,
            Admission::Rejected(AdmissionError::Underpriced { .. })
        ));
    }

    #[test]
    fn capacity_evicts_cheapest_first() {
        let mut cfg = MempoolConfig::default();
        // Room for roughly two pooled txs.
        cfg.max_bytes = 2 * tx(A, X, 0, 5 * GWEI).encoded_size() + 10;
        let mp = pool_with(cfg);
        let ns = nonces(&[(A, 0), (B, 0), (X, 0)]);

        mp.submit(None, tx(A, X, 0, 3 * GWEI), &ns);
        mp.submit(None, tx(B, Y, 0, 5 * GWEI), &ns);
        // Higher fee forces out the cheapest (A's 3 gwei).
        let res = mp.submit(None, tx(X, Y, 0, 9 * GWEI), &ns);
        assert!(res.is_admitted());
        let stats = mp.stats();
        assert_eq!(stats.pending_txs, 2);
        let selected = mp.select_for_block(30_000_000, 10);
        assert!(selected.iter().all(|t| t.sender != A));
    }

    #[test]
    fn incoming_cheaper_than_everything_is_rejected_when_full() {
        let mut cfg = MempoolConfig::default();
        cfg.max_bytes = tx(A, X, 0, 5 * GWEI).encoded_size() + 1;
        let mp = pool_with(cfg);
        let ns = nonces(&[(A, 0), (B, 0)]);
        mp.submit(None, tx(A, X, 0, 9 * GWEI), &ns);
        let res = mp.submit(None, tx(B, Y, 0, 5 * GWEI), &ns);
        assert!(matches!(res, Admission::Rejected(AdmissionError::MempoolFull)));
    }

    /* ---------------- reorg ----------------------- */

    fn block_of(height: u64, txs: Vec<Transaction>) -> Block {
        let mut b = Block::genesis(100, 30_000_000);
        b.header.height = height;
        b.transactions = txs;
        b
    }

    #[test]
    fn reorg_replacement_scenario() {
        // Old branch included tx_old(A,0,→X); new branch includes a
        // different tx_new(A,0,→Y). Afterwards neither is pending, exactly
        // one replacedTx fires, and A's nonce is refreshed.
        let bus = Arc::new(EventBus::new());
        let replaced = Arc::new(AtomicUsize::new(0));
        let r = replaced.clone();
        bus.subscribe(crate::notify::REPLACED_TX, move |_, _| {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let mp = Mempool::new(
            MempoolConfig::default(),
            TxLimits::default(),
            FeeMarketConfig::default(),
            LimiterConfig::default(),
            30_000_000,
            bus,
            Arc::new(PermissiveVerifier),
        );

        let tx_old = tx(A, X, 0, 5 * GWEI);
        let tx_new = tx(A, Y, 0, 6 * GWEI);
        assert_ne!(tx_old.hash(), tx_new.hash());

        let removed = vec![block_of(5, vec![tx_old.clone()])];
        let added = vec![block_of(5, vec![tx_new.clone()])];
        // New branch already executed: A's nonce is 1.
        let ns = nonces(&[(A, 1)]);

        let stats = mp.handle_reorg(&removed, &added, &ns);
        assert_eq!(stats.skipped_replaced, 1);
        assert_eq!(stats.reinjected, 0);
        assert_eq!(stats.senders_touched, 1);
        assert_eq!(replaced.load(Ordering::SeqCst), 1);
        assert!(!mp.contains(&tx_old.hash()));
        assert!(!mp.contains(&tx_new.hash()));
    }

    #[test]
    fn reorg_reinjects_orphaned_txs() {
        let mp = pool();
        let orphan = tx(A, X, 0, 5 * GWEI);
        let removed = vec![block_of(5, vec![orphan.clone()])];
        // Reorg rolled A's nonce back to 0 and the new branch is empty.
        let ns = nonces(&[(A, 0)]);
        let stats = mp.handle_reorg(&removed, &[], &ns);
        assert_eq!(stats.reinjected, 1);
        assert!(mp.contains(&orphan.hash()));
        let selected = mp.select_for_block(30_000_000, 10);
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn reorg_skips_txs_included_on_both_branches() {
        let mp = pool();
        let shared = tx(A, X, 0, 5 * GWEI);
        let removed = vec![block_of(5, vec![shared.clone()])];
        let added = vec![block_of(5, vec![shared.clone()])];
        let ns = nonces(&[(A, 1)]);
        let stats = mp.handle_reorg(&removed, &added, &ns);
        assert_eq!(stats.skipped_duplicate, 1);
        assert_eq!(stats.reinjected, 0);
        assert!(!mp.contains(&shared.hash()));
    }

    #[test]
    fn mark_included_clears_pool_and_refreshes_nonce() {
        let mp = pool();
        let ns = nonces(&[(A, 0)]);
        let t = priced(A, 0);
        mp.submit(None, t.clone(), &ns);

        let block = block_of(1, vec![t]);
        let after = nonces(&[(A, 1)]);
        mp.mark_included(&block, &after);
        assert_eq!(mp.stats().pending_txs, 0);
    }
}
