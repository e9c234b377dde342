// src/notify.rs
//
// Intra-process event bus for mempool/chain notifications plus an optional
// bridge toward the RPC WebSocket hub. Topics:
//
//   - "pendingTx"    : a transaction admitted into the mempool
//   - "droppedTx"    : a transaction removed/evicted from the mempool
//   - "replacedTx"   : a transaction replaced by a higher-fee one
//   - "reorgSummary" : consolidated stats after reorg reconciliation
//
// Delivery is synchronous on the publisher's thread, best-effort: a
// panicking subscriber is isolated and logged, never propagated.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use uuid::Uuid;

pub const PENDING_TX: &str = "pendingTx";
pub const DROPPED_TX: &str = "droppedTx";
pub const REPLACED_TX: &str = "replacedTx";
pub const REORG_SUMMARY: &str = "reorgSummary";

pub type Subscriber = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Opaque handle returned on subscribe; pass back to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    topic: String,
    id: Uuid,
}

/* ---------------------------------------------------------------------
   Event bus
---------------------------------------------------------------------*/

/// Thread-safe topic pub/sub with per-subscriber isolation.
#[derive(Default)]
pub struct EventBus {
    subs: RwLock<HashMap<String, Vec<(Uuid, Subscriber)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: &str, callback: F) -> SubscriptionHandle
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.subs
            .write()
            .entry(topic.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        SubscriptionHandle {
            topic: topic.to_string(),
            id,
        }
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut subs = self.subs.write();
        if let Some(list) = subs.get_mut(&handle.topic) {
            list.retain(|(id, _)| *id != handle.id);
            if list.is_empty() {
                subs.remove(&handle.topic);
            }
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subs.read().get(topic).map(|l| l.len()).unwrap_or(0)
    }

    /// Invoke all subscribers of `topic`; returns how many were delivered.
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        let subs: Vec<Subscriber> = {
            let guard = self.subs.read();
            guard
                .get(topic)
                .map(|l| l.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        let mut delivered = 0;
        for cb in subs {
            let outcome = catch_unwind(AssertUnwindSafe(|| cb(topic, payload)));
            match outcome {
                Ok(()) => delivered += 1,
                Err(_) => log::warn!("subscriber panicked on topic={topic}"),
            }
        }
        delivered
    }
}

/* ---------------------------------------------------------------------
   Payload builders
---------------------------------------------------------------------*/
fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1_000.0
}

pub fn publish_pending_tx(
    bus: &EventBus,
    tx_hash: &str,
    sender: &str,
    nonce: u64,
    effective_fee: u128,
    size: usize,
) -> usize {
    bus.publish(
        PENDING_TX,
        &json!({
            "hash": tx_hash,
            "sender": sender,
            "nonce": nonce,
            "effectiveFee": effective_fee.to_string(),
            "size": size,
            "ts": now_ts(),
        }),
    )
}

pub fn publish_dropped_tx(bus: &EventBus, tx_hash: &str, reason: &str) -> usize {
    bus.publish(
        DROPPED_TX,
        &json!({ "hash": tx_hash, "reason": reason, "ts": now_ts() }),
    )
}

pub fn publish_replaced_tx(bus: &EventBus, old_hash: &str, new_hash: &str, reason: &str) -> usize {
    bus.publish(
        REPLACED_TX,
        &json!({ "old": old_hash, "new": new_hash, "reason": reason, "ts": now_ts() }),
    )
}

pub fn publish_reorg_summary(bus: &EventBus, stats: &Value) -> usize {
    let mut payload = stats.clone();
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("ts".into(), json!(now_ts()));
    }
    bus.publish(REORG_SUMMARY, &payload)
}

/* ---------------------------------------------------------------------
   WebSocket bridge
---------------------------------------------------------------------*/

/// Forwards bus events to an injected `send(topic, payload)`, suppressing
/// duplicate (topic, tx hash) pairs within a short TTL window to absorb
/// reconnect storms.
pub struct WsBridge {
    sender: Subscriber,
    dedupe_ttl: Duration,
    last_sent: Mutex<HashMap<(String, String), Instant>>,
    subs: Mutex<Vec<SubscriptionHandle>>,
}

impl WsBridge {
    pub fn new<F>(sender: F, dedupe_ttl: Duration) -> Arc<Self>
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        Arc::new(Self {
            sender: Arc::new(sender),
            dedupe_ttl,
            last_sent: Mutex::new(HashMap::new()),
            subs: Mutex::new(Vec::new()),
        })
    }

    /// Subscribe to all four topics on the given bus.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let mut subs = self.subs.lock();
        if !subs.is_empty() {
            return; // already attached
        }
        for topic in [PENDING_TX, DROPPED_TX, REPLACED_TX, REORG_SUMMARY] {
            let bridge = Arc::clone(self);
            subs.push(bus.subscribe(topic, move |t, p| bridge.forward(t, p)));
        }
    }

    pub fn detach(&self, bus: &EventBus) {
        for handle in self.subs.lock().drain(..) {
            bus.unsubscribe(&handle);
        }
    }

    fn dedupe_key(topic: &str, payload: &Value) -> Option<String> {
        let key = match topic {
            PENDING_TX | DROPPED_TX => payload.get("hash"),
            REPLACED_TX => payload.get("new").or_else(|| payload.get("old")),
            _ => None,
        };
        key.and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    fn forward(&self, topic: &str, payload: &Value) {
        if self.dedupe_ttl > Duration::ZERO {
            if let Some(hash) = Self::dedupe_key(topic, payload) {
                let now = Instant::now();
                let mut last = self.last_sent.lock();
                let k = (topic.to_string(), hash);
                if let Some(prev) = last.get(&k) {
                    if now.duration_since(*prev) < self.dedupe_ttl {
                        return;
                    }
                }
                last.insert(k, now);
            }
        }
        (self.sender)(topic, payload);
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn publish_returns_delivered_count() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s1 = seen.clone();
        let s2 = seen.clone();
        bus.subscribe(PENDING_TX, move |_, _| {
            s1.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(PENDING_TX, move |_, _| {
            s2.fetch_add(1, Ordering::SeqCst);
        });
        let delivered = bus.publish(PENDING_TX, &json!({"hash": "0xaa"}));
        assert_eq!(delivered, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let handle = bus.subscribe(DROPPED_TX, move |_, _| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(&handle);
        assert_eq!(bus.publish(DROPPED_TX, &json!({})), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_poison_others() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        bus.subscribe(PENDING_TX, |_, _| panic!("boom"));
        bus.subscribe(PENDING_TX, move |_, _| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let delivered = bus.publish(PENDING_TX, &json!({"hash": "0xbb"}));
        assert_eq!(delivered, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bridge_dedupes_within_ttl() {
        let bus = EventBus::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let s = sent.clone();
        let bridge = WsBridge::new(
            move |_, _| {
                s.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_secs(60),
        );
        bridge.attach(&bus);

        let payload = json!({"hash": "0xcc"});
        bus.publish(PENDING_TX, &payload);
        bus.publish(PENDING_TX, &payload);
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        // A different hash passes through.
        bus.publish(PENDING_TX, &json!({"hash": "0xdd"}));
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bridge_forwards_all_topics() {
        let bus = EventBus::new();
        let sent = Arc::new(AtomicUsize::new(0));
        let s = sent.clone();
        let bridge = WsBridge::new(
            move |_, _| {
                s.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
        );
        bridge.attach(&bus);
        publish_pending_tx(&bus, "0x01", "anim1...", 0, 10, 100);
        publish_dropped_tx(&bus, "0x02", "evicted");
        publish_replaced_tx(&bus, "0x03", "0x04", "rbf");
        publish_reorg_summary(&bus, &json!({"reinjected": 1}));
        assert_eq!(sent.load(Ordering::SeqCst), 4);
    }
}
