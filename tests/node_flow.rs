// End-to-end flow through the public surfaces: JSON-RPC admission,
// block production, receipts, beacon round queries, and the AICF
// enqueue→dispatch→consume path.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use animica_core::aicf::{AicfWorker, DispatchError, Heartbeat, Job, JobStore, ProviderClient, Registry};
use animica_core::beacon::BeaconStore;
use animica_core::chain::Chain;
use animica_core::config::Config;
use animica_core::executor::FixedCostVm;
use animica_core::fee_market::GWEI;
use animica_core::notify::EventBus;
use animica_core::rpc::{register_all, NodeHandles, RpcRequest, RpcServer};
use animica_core::transaction::{FeeFields, PermissiveVerifier, Transaction};
use animica_core::types::{hex_0x, Address};

const FAUCET: Address = Address([0x01; 20]);
const BOB: Address = Address([0x02; 20]);

struct EchoProvider;

impl ProviderClient for EchoProvider {
    fn dispatch(
        &self,
        _provider_id: &str,
        job: &Job,
        _deadline: Duration,
    ) -> Result<Vec<u8>, DispatchError> {
        Ok(serde_json::to_vec(&job.spec).unwrap_or_default())
    }
}

struct Node {
    chain: Arc<Chain>,
    jobs: Arc<JobStore>,
    registry: Arc<Registry>,
    server: RpcServer,
}

fn node() -> Node {
    let config = Config::development();
    let bus = Arc::new(EventBus::new());
    let chain = Arc::new(
        Chain::new(
            &config,
            Arc::new(FixedCostVm::default()),
            bus,
            Arc::new(PermissiveVerifier),
            vec![(FAUCET, 1_000_000_000 * GWEI)],
        )
        .unwrap(),
    );
    let beacon = Arc::new(BeaconStore::new(config.beacon).unwrap());
    let jobs = Arc::new(JobStore::new(&config.aicf));
    let registry = Arc::new(Registry::new(config.aicf.clone()));

    let mut server = RpcServer::new(config.rpc.clone());
    register_all(
        &mut server,
        Arc::new(NodeHandles {
            chain: chain.clone(),
            beacon,
            jobs: jobs.clone(),
            registry: registry.clone(),
        }),
    );
    Node {
        chain,
        jobs,
        registry,
        server,
    }
}

fn call(server: &RpcServer, method: &str, params: Value) -> Result<Value, Value> {
    let request: RpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0", "id": 1, "method": method, "params": params,
    }))
    .unwrap();
    let response = server.dispatch(request);
    match response.error {
        None => Ok(response.result.unwrap_or(Value::Null)),
        Some(err) => Err(serde_json::to_value(err).unwrap()),
    }
}

fn signed_transfer(nonce: u64) -> Transaction {
    let mut tx = Transaction::transfer(
        FAUCET,
        BOB,
        10 * GWEI,
        nonce,
        21_000,
        FeeFields::Legacy { gas_price: 5 * GWEI },
    );
    tx.signature = Some(vec![0xAA]);
    tx
}

#[test]
fn submit_produce_and_read_receipt_over_rpc() {
    let node = node();
    let tx = signed_transfer(0);
    let raw = hex_0x(&bincode::serialize(&tx).unwrap());

    let hash = call(&node.server, "tx.sendRawTransaction", json!([raw])).unwrap();
    assert_eq!(hash.as_str().unwrap(), hex_0x(&tx.hash()));

    // Nothing mined yet: receipt is null.
    let receipt = call(&node.server, "tx.getTransactionReceipt", json!([hash])).unwrap();
    assert!(receipt.is_null());

    node.chain.produce_block(Utc::now().timestamp(), [0; 32]).unwrap();

    let receipt = call(&node.server, "tx.getTransactionReceipt", json!([hash])).unwrap();
    assert_eq!(receipt["status"], 1);

    let nonce = call(&node.server, "state.getNonce", json!([FAUCET.to_string()])).unwrap();
    assert_eq!(nonce, json!(1));
    let balance = call(&node.server, "state.getBalance", json!([BOB.to_string()])).unwrap();
    assert_eq!(balance.as_str().unwrap(), (10 * GWEI).to_string());
}

#[test]
fn duplicate_submission_rejected_over_rpc() {
    let node = node();
    let tx = signed_transfer(0);
    let raw = hex_0x(&bincode::serialize(&tx).unwrap());
    call(&node.server, "tx.sendRawTransaction", json!([raw.clone()])).unwrap();
    let err = call(&node.server, "tx.sendRawTransaction", json!([raw])).unwrap_err();
    assert_eq!(err["data"]["reason"], "duplicateTx");
}

#[test]
fn underpriced_tx_reports_below_floor() {
    let node = node();
    let mut tx = signed_transfer(0);
    tx.fee = FeeFields::Legacy { gas_price: 3 }; // wei, far below floor
    let raw = hex_0x(&bincode::serialize(&tx).unwrap());
    let err = call(&node.server, "tx.sendRawTransaction", json!([raw])).unwrap_err();
    assert!(err["message"].as_str().unwrap().starts_with("BelowFloor"));
}

#[test]
fn beacon_round_query_is_consistent() {
    let node = node();
    let round = call(&node.server, "rand.getRound", json!([])).unwrap();
    let schedule = &round["schedule"];
    assert!(schedule["commitOpen"].as_i64().unwrap() < schedule["commitClose"].as_i64().unwrap());
    assert_eq!(
        schedule["mixReady"].as_i64().unwrap(),
        schedule["vdfDeadline"].as_i64().unwrap()
    );
    // Round N+1 opens where round N's mix becomes ready.
    let rid = round["round"].as_u64().unwrap();
    let next = call(&node.server, "rand.getRound", json!([rid + 1])).unwrap();
    assert_eq!(
        next["schedule"]["commitOpen"].as_i64().unwrap(),
        schedule["mixReady"].as_i64().unwrap()
    );
}

#[test]
fn aicf_enqueue_dispatch_and_consume() {
    let node = node();
    let config = Config::development();

    node.registry.register("prov-1", 1_000_000);
    let now = Utc::now().timestamp();
    node.registry
        .handle_heartbeat(
            &Heartbeat {
                provider_id: "prov-1".into(),
                height: 0,
                timestamp: now,
                capacity_ai: 1,
                capacity_qp: 1,
                qos: 1.0,
                nonce: 1,
                sig: None,
            },
            0.0,
            now,
        )
        .unwrap();

    let enqueue_params = json!({
        "kind": "Quantum",
        "spec": {"circuit": {"qubits": 2}, "shots": 128},
        "attestation": {"vendor": "qpu-sim", "score": 1.0},
        "submitter": FAUCET.to_string(),
        "nonce": 7,
    });
    let receipt = call(&node.server, "aicf.enqueueJob", enqueue_params.clone()).unwrap();
    let task_id = receipt["task_id"].as_str().unwrap().to_string();

    // Re-submitting the equivalent envelope dedups to the same task.
    let again = call(&node.server, "aicf.enqueueJob", enqueue_params).unwrap();
    assert_eq!(again["task_id"].as_str().unwrap(), task_id);

    // Before fulfillment the result read fails with NoResultYet.
    let err = call(&node.server, "cap.getResult", json!([task_id])).unwrap_err();
    assert!(err["message"].as_str().unwrap().starts_with("NoResultYet"));

    let worker = AicfWorker::new(
        node.jobs.clone(),
        node.registry.clone(),
        Arc::new(EchoProvider),
        config.aicf.clone(),
    );
    assert!(worker.process_next(Duration::from_millis(200)));

    let first = call(&node.server, "cap.getResult", json!([task_id])).unwrap();
    let second = call(&node.server, "cap.getResult", json!([task_id])).unwrap();
    assert_eq!(first, second);
    assert!(first.as_str().unwrap().starts_with("0x"));
}

#[test]
fn fees_suggest_tracks_committed_blocks() {
    let node = node();
    let before = call(&node.server, "fees.suggest", json!([])).unwrap();

    for nonce in 0..3 {
        let raw = hex_0x(&bincode::serialize(&signed_transfer(nonce)).unwrap());
        call(&node.server, "tx.sendRawTransaction", json!([raw])).unwrap();
    }
    node.chain.produce_block(Utc::now().timestamp(), [0; 32]).unwrap();

    let after = call(&node.server, "fees.suggest", json!([])).unwrap();
    let floor_before: u128 = before["base_fee"].as_u64().unwrap() as u128;
    let floor_after: u128 = after["base_fee"].as_u64().unwrap() as u128;
    // Three 5-gwei txs pull the floor upward within the clamp.
    assert!(floor_after > floor_before);
}
