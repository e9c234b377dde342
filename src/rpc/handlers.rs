// src/rpc/handlers.rs
//
// Method implementations over the node handles. Handlers are registered by
// name once at startup; an unknown method is a configuration error
// surfaced as method-not-found, never a runtime fallback.
//

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use crate::aicf::{JobKind, JobStore, Registry};
use crate::beacon::{next_event_eta, schedule_for_round, BeaconStore};
use crate::chain::Chain;
use crate::mempool::Admission;
use crate::rpc::types::RpcError;
use crate::rpc::RpcServer;
use crate::transaction::Transaction;
use crate::types::{hex_0x, parse_hex_0x, Address};

/// Everything the RPC surface may touch, created once at boot.
pub struct NodeHandles {
    pub chain: Arc<Chain>,
    pub beacon: Arc<BeaconStore>,
    pub jobs: Arc<JobStore>,
    pub registry: Arc<Registry>,
}

/* ---------------------------------------------------------------------
   Param helpers
---------------------------------------------------------------------*/
fn param(params: &Value, idx: usize) -> Result<&Value, RpcError> {
    params
        .get(idx)
        .ok_or_else(|| RpcError::invalid_params(format!("missing param {idx}")))
}

fn param_str(params: &Value, idx: usize) -> Result<&str, RpcError> {
    param(params, idx)?
        .as_str()
        .ok_or_else(|| RpcError::invalid_params(format!("param {idx} must be a string")))
}

fn param_address(params: &Value, idx: usize) -> Result<Address, RpcError> {
    param_str(params, idx)?
        .parse()
        .map_err(|e| RpcError::invalid_params(format!("bad address: {e}")))
}

fn field_str<'a>(obj: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(format!("missing field {key}")))
}

fn field_hex(obj: &Value, key: &str) -> Result<Vec<u8>, RpcError> {
    parse_hex_0x(field_str(obj, key)?)
        .map_err(|e| RpcError::invalid_params(format!("bad hex in {key}: {e}")))
}

fn hash32(params: &Value, idx: usize) -> Result<[u8; 32], RpcError> {
    let bytes = parse_hex_0x(param_str(params, idx)?)
        .map_err(|e| RpcError::invalid_params(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| RpcError::invalid_params("expected a 32-byte hash"))
}

/* ---------------------------------------------------------------------
   Registration
---------------------------------------------------------------------*/
pub fn register_all(server: &mut RpcServer, node: Arc<NodeHandles>) {
    let n = node.clone();
    server.register("tx.sendRawTransaction", move |params| {
        let raw = parse_hex_0x(param_str(&params, 0)?)
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;
        let tx: Transaction = bincode::deserialize(&raw)
            .map_err(|e| RpcError::invalid_params(format!("undecodable transaction: {e}")))?;
        match n.chain.submit_transaction(None, tx) {
            Admission::Admitted { hash, .. } => Ok(json!(hex_0x(&hash))),
            Admission::Rejected(err) => Err(err.into()),
        }
    });

    let n = node.clone();
    server.register("tx.getTransactionReceipt", move |params| {
        let hash = hash32(&params, 0)?;
        match n.chain.receipt_of(&hash) {
            Some(receipt) => serde_json::to_value(receipt)
                .map_err(|e| RpcError::invalid_params(e.to_string())),
            None => Ok(Value::Null),
        }
    });

    let n = node.clone();
    server.register("state.getNonce", move |params| {
        let addr = param_address(&params, 0)?;
        Ok(json!(n.chain.nonce_of(&addr)))
    });

    let n = node.clone();
    server.register("state.getBalance", move |params| {
        let addr = param_address(&params, 0)?;
        Ok(json!(n.chain.balance_of(&addr).to_string()))
    });

    let n = node.clone();
    server.register("rand.getRound", move |params| {
        let now = Utc::now().timestamp();
        let round_id = match params.get(0) {
            Some(v) if !v.is_null() => v
                .as_u64()
                .ok_or_else(|| RpcError::invalid_params("round id must be an integer"))?,
            _ => crate::beacon::current_round_id(now, n.beacon.params()),
        };
        let sched = schedule_for_round(round_id, n.beacon.params());
        let counts = n.beacon.counts(round_id);
        let (next_event, eta) = next_event_eta(now, &sched);
        Ok(json!({
            "round": sched.round_id,
            "phase": sched.phase_at(now).to_string(),
            "schedule": {
                "commitOpen": sched.t_commit_open,
                "commitClose": sched.t_commit_close,
                "revealOpen": sched.t_reveal_open,
                "revealClose": sched.t_reveal_close,
                "revealGraceClose": sched.t_reveal_grace_close,
                "vdfDeadline": sched.t_vdf_deadline,
                "mixReady": sched.t_mix_ready,
            },
            "counts": { "commits": counts.commits, "reveals": counts.reveals },
            "nextEvent": next_event.to_string(),
            "etaSeconds": eta,
        }))
    });

    let n = node.clone();
    server.register("rand.commit", move |params| {
        let address: Address = field_str(&params, "address")?
            .parse()
            .map_err(|e| RpcError::invalid_params(format!("bad address: {e}")))?;
        let salt = field_hex(&params, "salt_hex")?;
        let payload = field_hex(&params, "payload_hex")?;
        let now = Utc::now().timestamp();
        let round = n.beacon.submit_commit(now, address, &salt, &payload)?;
        Ok(json!({ "round": round, "accepted": true }))
    });

    let n = node.clone();
    server.register("rand.reveal", move |params| {
        let salt = field_hex(&params, "salt_hex")?;
        let payload = field_hex(&params, "payload_hex")?;
        let now = Utc::now().timestamp();
        let round = n.beacon.submit_reveal(now, &salt, &payload)?;
        Ok(json!({ "round": round, "accepted": true }))
    });

    let n = node.clone();
    server.register("aicf.enqueueJob", move |params| {
        let kind = match field_str(&params, "kind")? {
            "AI" | "ai" => JobKind::Ai,
            "Quantum" | "quantum" => JobKind::Quantum,
            other => {
                return Err(RpcError::invalid_params(format!("unknown job kind {other}")))
            }
        };
        let spec = params
            .get("spec")
            .cloned()
            .ok_or_else(|| RpcError::invalid_params("missing field spec"))?;
        let attestation = params
            .get("attestation")
            .cloned()
            .ok_or_else(|| RpcError::invalid_params("missing field attestation"))?;
        let submitter: Address = field_str(&params, "submitter")?
            .parse()
            .map_err(|e| RpcError::invalid_params(format!("bad submitter: {e}")))?;
        let nonce = params.get("nonce").and_then(|v| v.as_u64()).unwrap_or(0);
        let deadline = params
            .get("deadline")
            .and_then(|v| v.as_i64())
            .unwrap_or_else(|| Utc::now().timestamp() + 3_600);

        let (task_id, status) = n
            .jobs
            .enqueue(kind, spec, &attestation, submitter, nonce, deadline)?;
        Ok(json!({
            "task_id": hex_0x(&task_id),
            "status": serde_json::to_value(status).unwrap_or(Value::Null),
        }))
    });

    let n = node.clone();
    server.register("cap.getResult", move |params| {
        let task_id = hash32(&params, 0)?;
        let bytes = n.jobs.read_result(&task_id)?;
        Ok(json!(hex_0x(&bytes)))
    });

    let n = node.clone();
    server.register("fees.suggest", move |_params| {
        let suggestion = n.chain.mempool().suggest_fees();
        serde_json::to_value(suggestion).map_err(|e| RpcError::invalid_params(e.to_string()))
    });

    let n = node;
    server.register("mempool.stats", move |_params| {
        serde_json::to_value(n.chain.mempool().stats())
            .map_err(|e| RpcError::invalid_params(e.to_string()))
    });
}
