// src/aicf/worker.rs
//
// AICF dispatch worker: drains the bounded job queue and drives provider
// RPC with explicit deadlines. Timeouts are retried up to the configured
// attempt budget, then the job fails with a deadline miss; provider
// rejections fail immediately. Suspension points are the queue read and
// the dispatch call, nothing else blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::aicf::jobs::{FailReason, Job, JobStore, TaskId};
use crate::aicf::registry::Registry;
use crate::config::AicfConfig;
use crate::types::hex_0x;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch timed out")]
    Timeout,
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected job: {0}")]
    Rejected(String),
}

/// Transport toward one compute provider. Implementations own connection
/// details and must respect the deadline they are given.
pub trait ProviderClient: Send + Sync {
    fn dispatch(
        &self,
        provider_id: &str,
        job: &Job,
        deadline: Duration,
    ) -> Result<Vec<u8>, DispatchError>;
}

/* ---------------------------------------------------------------------
   Worker
---------------------------------------------------------------------*/
pub struct AicfWorker {
    store: Arc<JobStore>,
    registry: Arc<Registry>,
    client: Arc<dyn ProviderClient>,
    cfg: AicfConfig,
    stop: Arc<AtomicBool>,
}

impl AicfWorker {
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<Registry>,
        client: Arc<dyn ProviderClient>,
        cfg: AicfConfig,
    ) -> Self {
        Self {
            store,
            registry,
            client,
            cfg,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Claim and settle one job; returns false when no work was available
    /// within `poll` (or no provider is active).
    pub fn process_next(&self, poll: Duration) -> bool {
        let Some(provider_id) = self.registry.active_providers().into_iter().min() else {
            std::thread::sleep(poll.min(Duration::from_millis(50)));
            return false;
        };
        let Some(task_id) = self.store.claim_next(&provider_id, poll) else {
            return false;
        };
        self.settle(&provider_id, &task_id);
        true
    }

    fn settle(&self, provider_id: &str, task_id: &TaskId) {
        let Some(job) = self.store.get(task_id) else {
            return;
        };
        let deadline = Duration::from_secs_f64(self.cfg.dispatch_timeout_sec);

        for attempt in 1..=self.cfg.dispatch_max_attempts {
            match self.client.dispatch(provider_id, &job, deadline) {
                Ok(result) => {
                    let now = Utc::now().timestamp();
                    if let Err(e) = self.store.complete(task_id, now, result) {
                        log::warn!("task {} completion rejected: {e}", hex_0x(task_id));
                    }
                    return;
                }
                Err(DispatchError::Timeout) | Err(DispatchError::Unavailable(_))
                    if attempt < self.cfg.dispatch_max_attempts =>
                {
                    log::debug!(
                        "task {} dispatch attempt {attempt} failed, retrying",
                        hex_0x(task_id)
                    );
                }
                Err(DispatchError::Timeout) | Err(DispatchError::Unavailable(_)) => {
                    self.store.fail(task_id, FailReason::DeadlineMiss);
                    return;
                }
                Err(DispatchError::Rejected(reason)) => {
                    log::warn!("task {} rejected by {provider_id}: {reason}", hex_0x(task_id));
                    self.store.fail(task_id, FailReason::ProviderError);
                    return;
                }
            }
        }
    }

    /// Blocking loop; exits when the stop flag flips. Also sweeps job
    /// deadlines between polls.
    pub fn run(&self) {
        while !self.stop.load(Ordering::SeqCst) {
            self.process_next(Duration::from_millis(100));
            self.store.expire_deadlines(Utc::now().timestamp());
        }
    }

    pub fn spawn(self: Arc<Self>) -> std::thread::JoinHandle<()> {
        std::thread::Builder::new()
            .name("aicf-worker".into())
            .spawn(move || self.run())
            .expect("spawn aicf worker")
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aicf::jobs::{JobKind, JobStatus};
    use crate::aicf::registry::Heartbeat;
    use crate::types::Address;
    use parking_lot::Mutex;
    use serde_json::json;

    struct ScriptedClient {
        /// Outcomes served in order; the last entry repeats.
        script: Mutex<Vec<Result<Vec<u8>, DispatchError>>>,
    }

    impl ScriptedClient {
        fn new(script: Vec<Result<Vec<u8>, DispatchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
            })
        }
    }

    impl ProviderClient for ScriptedClient {
        fn dispatch(
            &self,
            _provider_id: &str,
            _job: &Job,
            _deadline: Duration,
        ) -> Result<Vec<u8>, DispatchError> {
            let mut script = self.script.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    fn harness(client: Arc<dyn ProviderClient>) -> (Arc<JobStore>, Arc<Registry>, AicfWorker) {
        let cfg = AicfConfig {
            dispatch_max_attempts: 3,
            dispatch_timeout_sec: 0.1,
            ..Default::default()
        };
        let store = Arc::new(JobStore::new(&cfg));
        let registry = Arc::new(Registry::new(cfg.clone()));
        registry.register("prov-1", 1_000);
        let now = Utc::now().timestamp();
        registry
            .handle_heartbeat(
                &Heartbeat {
                    provider_id: "prov-1".into(),
                    height: 1,
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
        let worker = AicfWorker::new(store.clone(), registry.clone(), client, cfg);
        (store, registry, worker)
    }

    fn enqueue(store: &JobStore) -> TaskId {
        let deadline = Utc::now().timestamp() + 3_600;
        let (id, _) = store
            .enqueue(
                JobKind::Quantum,
                json!({"shots": 8}),
                &json!({"proof": "0x01"}),
                Address::repeat(1),
                0,
                deadline,
            )
            .unwrap();
        id
    }

    #[test]
    fn successful_dispatch_completes_job() {
        let client = ScriptedClient::new(vec![Ok(b"out".to_vec())]);
        let (store, _reg, worker) = harness(client);
        let id = enqueue(&store);
        assert!(worker.process_next(Duration::from_millis(100)));
        assert_eq!(store.status(&id), Some(JobStatus::Completed));
        assert_eq!(store.read_result(&id).unwrap(), b"out".to_vec());
    }

    #[test]
    fn timeouts_retry_then_succeed() {
        let client = ScriptedClient::new(vec![
            Err(DispatchError::Timeout),
            Err(DispatchError::Timeout),
            Ok(b"late-but-fine".to_vec()),
        ]);
        let (store, _reg, worker) = harness(client);
        let id = enqueue(&store);
        worker.process_next(Duration::from_millis(100));
        assert_eq!(store.status(&id), Some(JobStatus::Completed));
    }

    #[test]
    fn exhausted_retries_fail_with_deadline_miss() {
        let client = ScriptedClient::new(vec![Err(DispatchError::Timeout)]);
        let (store, _reg, worker) = harness(client);
        let id = enqueue(&store);
        worker.process_next(Duration::from_millis(100));
        assert_eq!(
            store.status(&id),
            Some(JobStatus::Failed { reason: FailReason::DeadlineMiss })
        );
    }

    #[test]
    fn rejection_fails_without_retry() {
        let client = ScriptedClient::new(vec![
            Err(DispatchError::Rejected("bad circuit".into())),
            Ok(b"never".to_vec()),
        ]);
        let (store, _reg, worker) = harness(client);
        let id = enqueue(&store);
        worker.process_next(Duration::from_millis(100));
        assert_eq!(
            store.status(&id),
            Some(JobStatus::Failed { reason: FailReason::ProviderError })
        );
    }

    #[test]
    fn no_active_provider_leaves_queue_untouched() {
        let cfg = AicfConfig::default();
        let store = Arc::new(JobStore::new(&cfg));
        let registry = Arc::new(Registry::new(cfg.clone()));
        let client = ScriptedClient::new(vec![Ok(vec![])]);
        let worker = AicfWorker::new(store.clone(), registry, client, cfg);
        let id = enqueue(&store);
        assert!(!worker.process_next(Duration::from_millis(10)));
        assert_eq!(store.status(&id), Some(JobStatus::Queued));
    }
}
