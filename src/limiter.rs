// src/limiter.rs
//
// Token-bucket based ingress limits for the mempool and surrounding services.
//
// • Global TX-rate bucket (tx/s)
// • Global BYTES-rate bucket (bytes/s)
// • Per-peer TX-rate buckets, created on demand with LRU/TTL cleanup
// • Admission API that atomically checks/consumes all relevant buckets
//
// Time is an injected monotonic `f64` seconds value so tests are
// deterministic; `admit_now` is the wall-clock convenience wrapper. The
// limiter guards ingress only and never sits on a consensus path.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Synthetic peer id used when the transport cannot attribute a submission.
pub const ANON_PEER: &str = "anon";

/* ---------------------------------------------------------------------
   Token bucket
---------------------------------------------------------------------*/
#[derive(Debug, Clone)]
pub struct TokenBucket {
    pub capacity: f64,
    pub rate_per_sec: f64,
    tokens: f64,
    last_refill: f64,
}

impl TokenBucket {
    pub fn new(capacity: f64, rate_per_sec: f64, now: f64) -> Self {
        Self {
            capacity,
            rate_per_sec,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Refill tokens according to elapsed time. A non-positive rate disables
    /// refilling; tokens remain as-is.
    pub fn refill(&mut self, now: f64) {
        if self.rate_per_sec <= 0.0 {
            self.last_refill = now;
            return;
        }
        let dt = (now - self.last_refill).max(0.0);
        if dt > 0.0 {
            self.tokens = (self.tokens + self.rate_per_sec * dt).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Attempt to consume `amount` tokens. Returns `Ok(())` or the wait in
    /// seconds until the deficit would refill.
    pub fn try_consume(&mut self, amount: f64, now: f64) -> Result<(), f64> {
        if amount <= 0.0 {
            return Ok(());
        }
        self.refill(now);
        if self.tokens >= amount {
            self.tokens -= amount;
            return Ok(());
        }
        Err(self.wait_for(amount))
    }

    /// Time until `amount` tokens are available, without consuming.
    pub fn peek_wait(&mut self, amount: f64, now: f64) -> f64 {
        if amount <= 0.0 {
            return 0.0;
        }
        self.refill(now);
        if self.tokens >= amount {
            return 0.0;
        }
        self.wait_for(amount)
    }

    fn wait_for(&self, amount: f64) -> f64 {
        if self.rate_per_sec <= 0.0 {
            return f64::INFINITY;
        }
        (amount - self.tokens) / self.rate_per_sec
    }

    pub fn remaining(&mut self, now: f64) -> f64 {
        self.refill(now);
        self.tokens
    }

    fn retune(&mut self, capacity: f64, rate_per_sec: f64, now: f64) {
        self.refill(now);
        self.capacity = capacity;
        self.rate_per_sec = rate_per_sec;
        self.tokens = self.tokens.min(capacity);
    }
}

/* ---------------------------------------------------------------------
   Limiter config / decisions
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub global_tx_rate_per_sec: f64,
    pub global_tx_burst: f64,

    pub global_bytes_rate_per_sec: f64,
    pub global_bytes_burst: f64,

    pub per_peer_tx_rate_per_sec: f64,
    pub per_peer_tx_burst: f64,

    /// Drop idle peer buckets after this many seconds.
    pub peer_bucket_ttl_sec: f64,
    /// Upper bound on peer buckets kept (LRU).
    pub peer_bucket_max: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            global_tx_rate_per_sec: 1_000.0,
            global_tx_burst: 2_000.0,
            global_bytes_rate_per_sec: 10_000_000.0,
            global_bytes_burst: 20_000_000.0,
            per_peer_tx_rate_per_sec: 20.0,
            per_peer_tx_burst: 40.0,
            peer_bucket_ttl_sec: 600.0,
            peer_bucket_max: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterDecision {
    pub accept: bool,
    /// Retry hint in seconds when denied; 0 when accepted.
    pub wait_seconds: f64,
    pub remaining_global_tx: f64,
    pub remaining_global_bytes: f64,
    pub remaining_peer_tx: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSnapshot {
    pub global_tx_tokens: f64,
    pub global_bytes_tokens: f64,
    pub peer_buckets: usize,
}

/* ---------------------------------------------------------------------
   Composite limiter
---------------------------------------------------------------------*/
struct PeerBucket {
    bucket: TokenBucket,
    last_seen: f64,
}

struct LimiterInner {
    cfg: LimiterConfig,
    global_tx: TokenBucket,
    global_bytes: TokenBucket,
    peers: HashMap<String, PeerBucket>,
    /// Recency order for LRU eviction; front = least recently used.
    lru: VecDeque<String>,
}

/// Composite limiter enforcing global tx/s, global bytes/s, and per-peer tx/s
/// under a single mutex. Peek-then-consume keeps the three buckets atomic:
/// a denial consumes nothing, so there is never a partial decrement to unwind.
pub struct Limiter {
    inner: Mutex<LimiterInner>,
    origin: Instant,
}

impl Limiter {
    pub fn new(cfg: LimiterConfig) -> Self {
        let now = 0.0;
        let inner = LimiterInner {
            global_tx: TokenBucket::new(cfg.global_tx_burst, cfg.global_tx_rate_per_sec, now),
            global_bytes: TokenBucket::new(
                cfg.global_bytes_burst,
                cfg.global_bytes_rate_per_sec,
                now,
            ),
            peers: HashMap::new(),
            lru: VecDeque::new(),
            cfg,
        };
        Self {
            inner: Mutex::new(inner),
            origin: Instant::now(),
        }
    }

    /// Monotonic seconds since limiter creation.
    pub fn monotonic_now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Wall-clock convenience wrapper around [`Limiter::admit`].
    pub fn admit_now(&self, peer_id: &str, tx_bytes: usize) -> LimiterDecision {
        self.admit(peer_id, tx_bytes, self.monotonic_now())
    }

    /// Atomically check & consume tokens for one tx of `tx_bytes` from
    /// `peer_id`. If any bucket would deny, nothing is consumed and the
    /// longest wait is returned as a retry hint.
    pub fn admit(&self, peer_id: &str, tx_bytes: usize, now: f64) -> LimiterDecision {
        let mut inner = self.inner.lock();
        inner.cleanup_peers(now);
        inner.touch_peer(peer_id, now);

        let bytes = tx_bytes as f64;
        let gtx_wait = inner.global_tx.peek_wait(1.0, now);
        let gby_wait = inner.global_bytes.peek_wait(bytes, now);
        let ptx_wait = inner
            .peers
            .get_mut(peer_id)
            .map(|p| p.bucket.peek_wait(1.0, now))
            .unwrap_or(0.0);

        let max_wait = gtx_wait.max(gby_wait).max(ptx_wait);
        if max_wait > 0.0 {
            return LimiterDecision {
                accept: false,
                wait_seconds: max_wait,
                remaining_global_tx: inner.global_tx.remaining(now),
                remaining_global_bytes: inner.global_bytes.remaining(now),
                remaining_peer_tx: inner
                    .peers
                    .get_mut(peer_id)
                    .map(|p| p.bucket.remaining(now))
                    .unwrap_or(0.0),
            };
        }

        // All buckets can satisfy; consume atomically under the same lock.
        let _ = inner.global_tx.try_consume(1.0, now);
        let _ = inner.global_bytes.try_consume(bytes, now);
        if let Some(p) = inner.peers.get_mut(peer_id) {
            let _ = p.bucket.try_consume(1.0, now);
        }

        LimiterDecision {
            accept: true,
            wait_seconds: 0.0,
            remaining_global_tx: inner.global_tx.remaining(now),
            remaining_global_bytes: inner.global_bytes.remaining(now),
            remaining_peer_tx: inner
                .peers
                .get_mut(peer_id)
                .map(|p| p.bucket.remaining(now))
                .unwrap_or(0.0),
        }
    }

    /// Swap configuration and retune existing buckets.
    pub fn reconfigure(&self, cfg: LimiterConfig, now: f64) {
        let mut inner = self.inner.lock();
        inner
            .global_tx
            .retune(cfg.global_tx_burst, cfg.global_tx_rate_per_sec, now);
        inner
            .global_bytes
            .retune(cfg.global_bytes_burst, cfg.global_bytes_rate_per_sec, now);
        for p in inner.peers.values_mut() {
            p.bucket
                .retune(cfg.per_peer_tx_burst, cfg.per_peer_tx_rate_per_sec, now);
        }
        inner.cfg = cfg;
        inner.cleanup_peers(now);
    }

    pub fn snapshot(&self, now: f64) -> LimiterSnapshot {
        let mut inner = self.inner.lock();
        LimiterSnapshot {
            global_tx_tokens: inner.global_tx.remaining(now),
            global_bytes_tokens: inner.global_bytes.remaining(now),
            peer_buckets: inner.peers.len(),
        }
    }
}

impl LimiterInner {
    fn touch_peer(&mut self, peer_id: &str, now: f64) {
        if let Some(p) = self.peers.get_mut(peer_id) {
            p.last_seen = now;
            if let Some(pos) = self.lru.iter().position(|id| id == peer_id) {
                self.lru.remove(pos);
            }
            self.lru.push_back(peer_id.to_string());
            return;
        }
        self.peers.insert(
            peer_id.to_string(),
            PeerBucket {
                bucket: TokenBucket::new(
                    self.cfg.per_peer_tx_burst,
                    self.cfg.per_peer_tx_rate_per_sec,
                    now,
                ),
                last_seen: now,
            },
        );
        self.lru.push_back(peer_id.to_string());
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        let max_n = self.cfg.peer_bucket_max;
        while max_n > 0 && self.peers.len() > max_n {
            if let Some(oldest) = self.lru.pop_front() {
                self.peers.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn cleanup_peers(&mut self, now: f64) {
        let ttl = self.cfg.peer_bucket_ttl_sec;
        if ttl > 0.0 {
            let expired: Vec<String> = self
                .peers
                .iter()
                .filter(|(_, p)| now - p.last_seen > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            for id in expired {
                self.peers.remove(&id);
                if let Some(pos) = self.lru.iter().position(|x| *x == id) {
                    self.lru.remove(pos);
                }
            }
        }
        self.enforce_cap();
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
