// Cross-module check that optimistic parallel application is
// indistinguishable from strict serial application, including under
// mixed workloads with contract calls, nonce holes, and underfunded
// senders.

use std::sync::Arc;

use proptest::prelude::*;

use animica_core::block::Block;
use animica_core::config::{ChainConfig, TxLimits};
use animica_core::executor::{Executor, FixedCostVm, Vm};
use animica_core::scheduler::OptimisticScheduler;
use animica_core::state::StateStore;
use animica_core::transaction::{AccessEntry, FeeFields, Transaction};
use animica_core::types::Address;

const ADDRS: [Address; 6] = [
    Address([0x11; 20]),
    Address([0x22; 20]),
    Address([0x33; 20]),
    Address([0x44; 20]),
    Address([0x55; 20]),
    Address([0x66; 20]),
];

fn harness() -> (Executor, OptimisticScheduler) {
    let vm: Arc<dyn Vm> = Arc::new(FixedCostVm::default());
    let cfg = ChainConfig::default();
    let limits = TxLimits::default();
    (
        Executor::new(vm.clone(), cfg.clone(), limits.clone()),
        OptimisticScheduler::new(vm, cfg, limits),
    )
}

fn block_with(txs: Vec<Transaction>) -> Block {
    let mut block = Block::genesis(1_000, 30_000_000);
    block.header.height = 1;
    block.transactions = txs;
    block
}

fn transfer(from: usize, to: usize, value: u128, nonce: u64) -> Transaction {
    Transaction::transfer(
        ADDRS[from],
        ADDRS[to],
        value,
        nonce,
        60_000,
        FeeFields::Legacy { gas_price: 2 },
    )
}

fn genesis_state() -> StateStore {
    StateStore::with_balances(ADDRS.iter().map(|a| (*a, 10_000_000u128)))
}

#[test]
fn mixed_workload_matches_serial() {
    let (executor, scheduler) = harness();

    let mut call_with_list = transfer(0, 4, 100, 1);
    call_with_list.data = vec![0x01; 32];
    call_with_list.access_list = vec![AccessEntry {
        address: ADDRS[4],
        storage_keys: vec![[1; 32]],
    }];

    let mut opaque_call = transfer(2, 5, 0, 0);
    opaque_call.data = vec![0x02; 8];

    let mut trapped = transfer(3, 5, 10, 0);
    trapped.data = vec![0xFF]; // FixedCostVm trap

    let block = block_with(vec![
        transfer(0, 1, 500, 0),
        transfer(1, 2, 250, 0),
        call_with_list,
        opaque_call,
        trapped,
        transfer(3, 0, 10, 1),
        transfer(0, 3, 5, 2),
        transfer(5, 4, 1, 7), // nonce hole, skipped by both schedules
    ]);

    let serial = executor.serial_apply(&genesis_state(), &block, 1);
    let optimistic = scheduler.optimistic_apply(&genesis_state(), &block, 1);

    assert_eq!(serial.state_root, optimistic.state_root);
    assert_eq!(serial.receipts_root, optimistic.receipts_root);
    assert_eq!(serial.gas_used, optimistic.gas_used);
    assert_eq!(serial.receipts, optimistic.receipts);
}

#[test]
fn repeated_application_is_bit_stable() {
    let (_, scheduler) = harness();
    let block = block_with(vec![
        transfer(0, 1, 500, 0),
        transfer(2, 3, 250, 0),
        transfer(4, 5, 125, 0),
    ]);
    let first = scheduler.optimistic_apply(&genesis_state(), &block, 1);
    for _ in 0..5 {
        let again = scheduler.optimistic_apply(&genesis_state(), &block, 1);
        assert_eq!(first.state_root, again.state_root);
        assert_eq!(first.receipts_root, again.receipts_root);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn randomized_blocks_match_serial(
        picks in proptest::collection::vec(
            (0usize..6, 0usize..6, 0u128..5_000, 0u8..10, any::<bool>()),
            1..40,
        )
    ) {
        let mut next_nonce = [0u64; 6];
        let mut txs = Vec::new();
        for (s, t, value, advance, as_call) in picks {
            let to = if s == t { (t + 1) % 6 } else { t };
            let mut tx = transfer(s, to, value, next_nonce[s]);
            if as_call {
                tx.data = vec![0x01; 4];
            }
            txs.push(tx);
            if advance < 8 {
                next_nonce[s] += 1;
            }
        }
        let block = block_with(txs);
        let (executor, scheduler) = harness();
        let serial = executor.serial_apply(&genesis_state(), &block, 1);
        let optimistic = scheduler.optimistic_apply(&genesis_state(), &block, 1);
        prop_assert_eq!(serial.state_root, optimistic.state_root);
        prop_assert_eq!(serial.receipts_root, optimistic.receipts_root);
        prop_assert_eq!(serial.receipts, optimistic.receipts);
    }
}
