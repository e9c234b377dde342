// src/aicf/registry.rs
//
// AICF provider registry: stake/earnings accounting, heartbeat ingestion
// with spam and replay controls, and the provider lifecycle
//
//   Registered → Active ⇄ Unavailable → Slashed | Retired
//
// Heartbeats gossip on a versioned topic as canonical JSON. Validation per
// provider: bounded clock skew, a minimum wall interval, and strictly
// monotone (nonce, timestamp) pairs. The registry is read-mostly: queries
// take the read lock, heartbeats a short write section.

use std::collections::{HashMap, VecDeque};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::aicf::attest::{canonical_bytes, normalize};
use crate::aicf::slashing::{ClawbackTranche, SlashPlan};
use crate::config::AicfConfig;

pub const TOPIC_HEARTBEAT_V1: &str = "aicf/provider/heartbeat/v1";

/* ---------------------------------------------------------------------
   Heartbeat wire type
---------------------------------------------------------------------*/

/// Point-in-time liveness/capacity signal from a provider. Capacity fields
/// are non-binding hints; qos is self-reported in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub provider_id: String,
    /// Chain height observed by the provider when sending.
    pub height: u64,
    /// Unix seconds from the provider's clock.
    pub timestamp: i64,
    #[serde(default)]
    pub capacity_ai: u32,
    #[serde(default)]
    pub capacity_qp: u32,
    #[serde(default = "default_qos")]
    pub qos: f64,
    /// Monotonically increasing per provider.
    #[serde(default)]
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

fn default_qos() -> f64 {
    1.0
}

impl Heartbeat {
    /// Canonical JSON wire bytes: sorted keys, compact separators, qos
    /// clamped to [0, 1] and rounded to 6 decimal places.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut hb = self.clone();
        hb.qos = hb.qos.clamp(0.0, 1.0);
        let value = serde_json::to_value(&hb).unwrap_or(Value::Null);
        canonical_bytes(&normalize(&value))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HeartbeatError> {
        serde_json::from_slice(data).map_err(|e| HeartbeatError::Malformed(e.to_string()))
    }
}

/* ---------------------------------------------------------------------
   Provider records
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Registered,
    Active,
    Unavailable,
    Slashed,
    Retired,
}

const QOS_WINDOW: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub provider_id: String,
    pub stake: u128,
    pub recent_earnings: u128,
    /// Rolling self-reported QoS samples, in bps.
    pub qos_window: VecDeque<u64>,
    /// Timestamp of the last accepted heartbeat.
    pub last_heartbeat: i64,
    pub status: ProviderStatus,
    /// Outstanding clawback tranches from executed slash plans.
    pub pending_clawbacks: Vec<ClawbackTranche>,

    last_nonce: u64,
    last_ts: i64,
    last_recv_wall: f64,
}

impl ProviderRecord {
    fn new(provider_id: String, stake: u128) -> Self {
        Self {
            provider_id,
            stake,
            recent_earnings: 0,
            qos_window: VecDeque::with_capacity(QOS_WINDOW),
            last_heartbeat: 0,
            status: ProviderStatus::Registered,
            pending_clawbacks: Vec::new(),
            last_nonce: 0,
            last_ts: 0,
            last_recv_wall: f64::MIN,
        }
    }

    pub fn qos_avg_bps(&self) -> u64 {
        if self.qos_window.is_empty() {
            return 10_000;
        }
        let sum: u64 = self.qos_window.iter().sum();
        sum / self.qos_window.len() as u64
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeartbeatError {
    #[error("unknown provider {0}")]
    UnknownProvider(String),
    #[error("stale heartbeat (ts {ts}, now {now})")]
    Stale { ts: i64, now: i64 },
    #[error("heartbeat below minimum interval")]
    TooFrequent,
    #[error("non-monotonic heartbeat (nonce {nonce} <= {last_nonce})")]
    NonMonotonic { nonce: u64, last_nonce: u64 },
    #[error("provider is {0:?}")]
    Inactive(ProviderStatus),
    #[error("malformed heartbeat: {0}")]
    Malformed(String),
}

type HeartbeatCallback = Box<dyn Fn(&Heartbeat) + Send + Sync>;

/* ---------------------------------------------------------------------
   Registry
---------------------------------------------------------------------*/
pub struct Registry {
    cfg: AicfConfig,
    providers: RwLock<HashMap<String, ProviderRecord>>,
    on_heartbeat: Mutex<Option<HeartbeatCallback>>,
}

impl Registry {
    pub fn new(cfg: AicfConfig) -> Self {
        Self {
            cfg,
            providers: RwLock::new(HashMap::new()),
            on_heartbeat: Mutex::new(None),
        }
    }

    pub fn register(&self, provider_id: &str, stake: u128) {
        self.providers
            .write()
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderRecord::new(provider_id.to_string(), stake));
    }

    pub fn set_heartbeat_callback<F>(&self, cb: F)
    where
        F: Fn(&Heartbeat) + Send + Sync + 'static,
    {
        *self.on_heartbeat.lock() = Some(Box::new(cb));
    }

    /* ---------------- heartbeats ------------------ */

    /// Validate and ingest one heartbeat. `now_wall` is monotonic seconds
    /// for interval control, `now_epoch` unix seconds for skew control.
    pub fn handle_heartbeat(
        &self,
        hb: &Heartbeat,
        now_wall: f64,
        now_epoch: i64,
    ) -> Result<(), HeartbeatError> {
        if hb.timestamp < now_epoch - self.cfg.heartbeat_max_skew_sec {
            return Err(HeartbeatError::Stale {
                ts: hb.timestamp,
                now: now_epoch,
            });
        }

        {
            let mut providers = self.providers.write();
            let record = providers
                .get_mut(&hb.provider_id)
                .ok_or_else(|| HeartbeatError::UnknownProvider(hb.provider_id.clone()))?;

            match record.status {
                ProviderStatus::Slashed | ProviderStatus::Retired => {
                    return Err(HeartbeatError::Inactive(record.status));
                }
                _ => {}
            }

            if record.last_recv_wall != f64::MIN
                && now_wall - record.last_recv_wall < self.cfg.heartbeat_min_interval_sec
            {
                return Err(HeartbeatError::TooFrequent);
            }
            // Strictly monotone (nonce, timestamp) pairs only.
            let monotone = hb.nonce > record.last_nonce
                || (hb.nonce == record.last_nonce && hb.timestamp > record.last_ts);
            if !monotone {
                return Err(HeartbeatError::NonMonotonic {
                    nonce: hb.nonce,
                    last_nonce: record.last_nonce,
                });
            }

            record.last_nonce = hb.nonce;
            record.last_ts = hb.timestamp;
            record.last_recv_wall = now_wall;
            record.last_heartbeat = hb.timestamp;
            record.status = ProviderStatus::Active;
            if record.qos_window.len() == QOS_WINDOW {
                record.qos_window.pop_front();
            }
            record
                .qos_window
                .push_back((hb.qos.clamp(0.0, 1.0) * 10_000.0).round() as u64);
        }

        if let Some(cb) = self.on_heartbeat.lock().as_ref() {
            cb(hb);
        }
        Ok(())
    }

    /// Flip providers whose heartbeat lapsed past the liveness threshold to
    /// Unavailable; returns the ids that transitioned.
    pub fn tick_liveness(&self, now_epoch: i64) -> Vec<String> {
        let mut flipped = Vec::new();
        let mut providers = self.providers.write();
        for record in providers.values_mut() {
            if record.status == ProviderStatus::Active
                && now_epoch - record.last_heartbeat > self.cfg.liveness_threshold_sec
            {
                record.status = ProviderStatus::Unavailable;
                flipped.push(record.provider_id.clone());
            }
        }
        flipped
    }

    /* ---------------- economics ------------------- */

    pub fn record_earnings(&self, provider_id: &str, amount: u128) {
        if let Some(record) = self.providers.write().get_mut(provider_id) {
            record.recent_earnings = record.recent_earnings.saturating_add(amount);
        }
    }

    /// Execute a slash plan: seize the immediate amount from stake, queue
    /// the clawback tranches, and mark the provider Slashed. A slashed
    /// provider stays on the books so the schedule can settle.
    pub fn apply_slash_plan(&self, provider_id: &str, plan: &SlashPlan) -> bool {
        let mut providers = self.providers.write();
        let Some(record) = providers.get_mut(provider_id) else {
            return false;
        };
        record.stake = record.stake.saturating_sub(plan.immediate_slash);
        record.pending_clawbacks.extend(plan.schedule.iter().cloned());
        record.status = ProviderStatus::Slashed;
        true
    }

    /// Collect every tranche due at `epoch` across providers; deducts from
    /// recent earnings and returns the total recovered.
    pub fn settle_epoch(&self, epoch: u64) -> u128 {
        let mut collected = 0u128;
        let mut providers = self.providers.write();
        for record in providers.values_mut() {
            let due: u128 = record
                .pending_clawbacks
                .iter()
                .filter(|t| t.epoch_idx == epoch)
                .map(|t| t.amount)
                .sum();
            if due > 0 {
                let take = due.min(record.recent_earnings);
                record.recent_earnings -= take;
                collected += take;
            }
            record.pending_clawbacks.retain(|t| t.epoch_idx != epoch);
        }
        collected
    }

    pub fn retire(&self, provider_id: &str) -> bool {
        let mut providers = self.providers.write();
        match providers.get_mut(provider_id) {
            Some(record) if record.status != ProviderStatus::Slashed => {
                record.status = ProviderStatus::Retired;
                true
            }
            _ => false,
        }
    }

    /* ---------------- queries --------------------- */

    pub fn get(&self, provider_id: &str) -> Option<ProviderRecord> {
        self.providers.read().get(provider_id).cloned()
    }

    pub fn active_providers(&self) -> Vec<String> {
        self.providers
            .read()
            .values()
            .filter(|r| r.status == ProviderStatus::Active)
            .map(|r| r.provider_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
