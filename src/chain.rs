// src/chain.rs
//
// Canonical chain store. Owns block snapshots (state, fee-market state,
// receipts per block), commits blocks through the optimistic scheduler,
// and drives mempool reconciliation across reorgs.
//
// The fee floor is chain-derived: each block's update is computed from its
// own gas usage and included fees starting from the parent's snapshot, so
// every node following the same chain derives the same floor sequence.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::{Block, BlockHash};
use crate::config::Config;
use crate::error::CoreError;
use crate::executor::{ApplyResult, Receipt, Vm};
use crate::fee_market::{update_on_block, FeeMarketConfig, FeeMarketState};
use crate::mempool::{Admission, Mempool, NonceSource, ReorgStats};
use crate::notify::EventBus;
use crate::scheduler::OptimisticScheduler;
use crate::state::{StateStore, StateView};
use crate::transaction::{SignatureVerifier, Transaction, TxHash};
use crate::types::{hex_0x, Address, Hash32};
use crate::Result;

struct BlockSnapshot {
    block: Block,
    state: StateStore,
    fee: FeeMarketState,
    receipts: Vec<Receipt>,
}

/* ---------------------------------------------------------------------
   Chain
---------------------------------------------------------------------*/
pub struct Chain {
    fee_cfg: FeeMarketConfig,
    scheduler: OptimisticScheduler,
    mempool: Arc<Mempool>,
    bus: Arc<EventBus>,

    snapshots: RwLock<HashMap<BlockHash, Arc<BlockSnapshot>>>,
    /// Canonical hashes, genesis first.
    canonical: RwLock<Vec<BlockHash>>,
    /// tx hash → receipt, canonical chain only.
    receipt_index: RwLock<HashMap<TxHash, Receipt>>,
    block_gas_limit: u64,
}

struct NonceView<'a>(&'a Chain);

impl NonceSource for NonceView<'_> {
    fn chain_nonce(&self, addr: &Address) -> u64 {
        self.0.nonce_of(addr)
    }
}

impl Chain {
    /// Boot a chain from config with a funded genesis allocation. All
    /// process-wide collaborators are injected here, once.
    pub fn new(
        config: &Config,
        vm: Arc<dyn Vm>,
        bus: Arc<EventBus>,
        verifier: Arc<dyn SignatureVerifier>,
        genesis_alloc: Vec<(Address, u128)>,
    ) -> Result<Self> {
        config.validate()?;
        let mempool = Arc::new(Mempool::new(
            config.mempool.clone(),
            config.limits.clone(),
            config.fee_market.clone(),
            config.limiter.clone(),
            config.chain.block_gas_limit,
            bus.clone(),
            verifier,
        ));

        let state = StateStore::with_balances(genesis_alloc);
        let mut genesis = Block::genesis(config.chain.genesis_timestamp, config.chain.block_gas_limit);
        genesis.header.state_root = state.state_root();
        let genesis_hash = genesis.hash();

        let snapshot = Arc::new(BlockSnapshot {
            block: genesis,
            state,
            fee: FeeMarketState::default(),
            receipts: Vec::new(),
        });

        let chain = Self {
            fee_cfg: config.fee_market.clone(),
            scheduler: OptimisticScheduler::new(vm, config.chain.clone(), config.limits.clone()),
            mempool,
            bus,
            snapshots: RwLock::new(HashMap::from([(genesis_hash, snapshot)])),
            canonical: RwLock::new(vec![genesis_hash]),
            receipt_index: RwLock::new(HashMap::new()),
            block_gas_limit: config.chain.block_gas_limit,
        };
        Ok(chain)
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /* ---------------- queries --------------------- */

    fn tip_snapshot(&self) -> Arc<BlockSnapshot> {
        let canonical = self.canonical.read();
        let tip = canonical.last().expect("canonical chain never empty");
        self.snapshots
            .read()
            .get(tip)
            .cloned()
            .expect("tip snapshot present")
    }

    pub fn height(&self) -> u64 {
        self.tip_snapshot().block.header.height
    }

    pub fn tip_hash(&self) -> BlockHash {
        *self.canonical.read().last().expect("canonical chain never empty")
    }

    pub fn nonce_of(&self, addr: &Address) -> u64 {
        self.tip_snapshot().state.nonce_of(addr)
    }

    pub fn balance_of(&self, addr: &Address) -> u128 {
        self.tip_snapshot().state.balance_of(addr)
    }

    pub fn state_root(&self) -> Hash32 {
        self.tip_snapshot().block.header.state_root
    }

    pub fn fee_state(&self) -> FeeMarketState {
        self.tip_snapshot().fee.clone()
    }

    pub fn receipt_of(&self, tx_hash: &TxHash) -> Option<Receipt> {
        self.receipt_index.read().get(tx_hash).cloned()
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        let canonical = self.canonical.read();
        let hash = canonical.get(height as usize)?;
        self.snapshots.read().get(hash).map(|s| s.block.clone())
    }

    /* ---------------- admission ------------------- */

    pub fn submit_transaction(&self, peer_id: Option<&str>, tx: Transaction) -> Admission {
        self.mempool.submit(peer_id, tx, &NonceView(self))
    }

    /* ---------------- block building -------------- */

    /// Build, apply, and commit the next canonical block from mempool
    /// contents. The producer-chosen order is whatever selection returned.
    pub fn produce_block(&self, timestamp: i64, randomness_seed: Hash32) -> Result<Block> {
        let parent = self.tip_snapshot();
        let txs = self.mempool.select_for_block(self.block_gas_limit, usize::MAX);

        let mut block = Block::genesis(timestamp, self.block_gas_limit);
        block.header.height = parent.block.header.height + 1;
        block.header.parent_hash = parent.block.hash();
        block.header.randomness_seed = randomness_seed;
        block.transactions = txs;

        let snapshot = self.apply_on(&parent, block)?;
        let block = snapshot.block.clone();
        self.commit_snapshot(snapshot);
        Ok(block)
    }

    /// Commit an externally received block on top of the current tip. A
    /// declared state root that does not match the computed one is fatal
    /// for the block: nothing is committed.
    pub fn commit_block(&self, block: Block) -> Result<()> {
        let parent = self.tip_snapshot();
        if block.header.parent_hash != parent.block.hash() {
            return Err(CoreError::BlockNotFound(format!(
                "parent {} is not the canonical tip",
                hex_0x(&block.header.parent_hash)
            )));
        }
        let snapshot = self.apply_on(&parent, block)?;
        self.commit_snapshot(snapshot);
        Ok(())
    }

    /// Apply `block` on top of `parent`, producing a full snapshot. Fills
    /// zeroed roots (producer path) and verifies declared ones (sync path).
    fn apply_on(&self, parent: &BlockSnapshot, mut block: Block) -> Result<BlockSnapshot> {
        if block.header.height != parent.block.header.height + 1 {
            return Err(CoreError::InvalidArgument(format!(
                "height {} does not extend parent {}",
                block.header.height, parent.block.header.height
            )));
        }

        let base_fee = parent.fee.ema_floor;
        let ApplyResult {
            state,
            receipts,
            state_root,
            receipts_root,
            gas_used,
        } = self.scheduler.optimistic_apply(&parent.state, &block, base_fee);

        if block.header.state_root != [0; 32] && block.header.state_root != state_root {
            return Err(CoreError::StateRootMismatch {
                computed: hex_0x(&state_root),
                expected: hex_0x(&block.header.state_root),
            });
        }
        block.header.state_root = state_root;
        if block.header.receipts_root != [0; 32] && block.header.receipts_root != receipts_root {
            return Err(CoreError::StateRootMismatch {
                computed: hex_0x(&receipts_root),
                expected: hex_0x(&block.header.receipts_root),
            });
        }
        block.header.receipts_root = receipts_root;

        let fee = update_on_block(
            &parent.fee,
            block.header.height,
            gas_used,
            block.header.gas_limit,
            observed_p50(&block, base_fee),
            None,
            &self.fee_cfg,
        );

        Ok(BlockSnapshot {
            block,
            state,
            fee,
            receipts,
        })
    }

    fn commit_snapshot(&self, snapshot: BlockSnapshot) {
        let snapshot = Arc::new(snapshot);
        let hash = snapshot.block.hash();

        self.snapshots.write().insert(hash, snapshot.clone());
        self.canonical.write().push(hash);
        {
            let mut index = self.receipt_index.write();
            for receipt in &snapshot.receipts {
                index.insert(receipt.tx_hash, receipt.clone());
            }
        }

        self.mempool.set_fee_state(snapshot.fee.clone());
        self.mempool.mark_included(&snapshot.block, &NonceView(self));
    }

    /* ---------------- reorg ----------------------- */

    /// Replace the canonical suffix after the new branch's fork point.
    /// `new_branch` must be parent-linked and anchor at a canonical block.
    /// On success the mempool is reconciled and the stats returned; on any
    /// failure the canonical chain is untouched.
    pub fn reorg_to(&self, new_branch: &[Block]) -> Result<ReorgStats> {
        let Some(first) = new_branch.first() else {
            return Err(CoreError::InvalidArgument("empty reorg branch".into()));
        };
        let ancestor_hash = first.header.parent_hash;

        let ancestor_pos = {
            let canonical = self.canonical.read();
            canonical
                .iter()
                .position(|h| *h == ancestor_hash)
                .ok_or_else(|| {
                    CoreError::BlockNotFound(format!(
                        "reorg ancestor {} not on canonical chain",
                        hex_0x(&ancestor_hash)
                    ))
                })?
        };

        // Apply the whole new branch before touching canonical state.
        let mut new_snapshots = Vec::with_capacity(new_branch.len());
        {
            let snapshots = self.snapshots.read();
            let mut parent = snapshots
                .get(&ancestor_hash)
                .cloned()
                .ok_or_else(|| CoreError::BlockNotFound(hex_0x(&ancestor_hash)))?;
            drop(snapshots);
            for block in new_branch {
                if block.header.parent_hash != parent.block.hash() {
                    return Err(CoreError::InvalidArgument(
                        "reorg branch is not parent-linked".into(),
                    ));
                }
                let snapshot = Arc::new(self.apply_on(&parent, block.clone())?);
                new_snapshots.push(snapshot.clone());
                parent = snapshot;
            }
        }

        // Swap the canonical suffix.
        let removed_blocks: Vec<Block> = {
            let mut canonical = self.canonical.write();
            let removed: Vec<BlockHash> = canonical.split_off(ancestor_pos + 1);
            let snapshots_guard = self.snapshots.read();
            let removed_blocks = removed
                .iter()
                .filter_map(|h| snapshots_guard.get(h).map(|s| s.block.clone()))
                .collect();
            drop(snapshots_guard);

            let mut snapshots = self.snapshots.write();
            for snapshot in &new_snapshots {
                let hash = snapshot.block.hash();
                snapshots.insert(hash, snapshot.clone());
                canonical.push(hash);
            }
            removed_blocks
        };

        self.rebuild_receipt_index();
        if let Some(tip) = new_snapshots.last() {
            self.mempool.set_fee_state(tip.fee.clone());
        }

        let added_blocks: Vec<Block> = new_branch.to_vec();
        let stats = self
            .mempool
            .handle_reorg(&removed_blocks, &added_blocks, &NonceView(self));
        Ok(stats)
    }

    fn rebuild_receipt_index(&self) {
        let canonical = self.canonical.read();
        let snapshots = self.snapshots.read();
        let mut index = HashMap::new();
        for hash in canonical.iter() {
            if let Some(snapshot) = snapshots.get(hash) {
                for receipt in &snapshot.receipts {
                    index.insert(receipt.tx_hash, receipt.clone());
                }
            }
        }
        *self.receipt_index.write() = index;
    }
}

/// Median effective price of the block's txs against the parent floor.
fn observed_p50(block: &Block, base_fee: u128) -> Option<u128> {
    if block.transactions.is_empty() {
        return None;
    }
    let mut prices: Vec<u128> = block
        .transactions
        .iter()
        .map(|tx| crate::fee_market::effective_gas_price(&tx.fee, base_fee).0)
        .collect();
    prices.sort_unstable();
    Some(prices[prices.len() / 2])
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
