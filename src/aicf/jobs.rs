// src/aicf/jobs.rs
//
// AICF job lifecycle: bounded submission queue with backpressure, the
// status machine, and at-most-once result consumption.
//
//   Queued → Assigned → Completed | Failed | Cancelled | Slashed
//
// Terminal states are final. Cancellation is only honored from Queued;
// once assigned, a job runs to completion or deadline. Results are keyed
// by task id and injection is idempotent: the first write wins and every
// subsequent read returns those same bytes.

use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aicf::attest::{attestation_digest, job_id};
use crate::config::AicfConfig;
use crate::error::CoreError;
use crate::types::{hex_0x, Address, Hash32};
use crate::Result;

pub type TaskId = Hash32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    Ai,
    Quantum,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ai => "AI",
            JobKind::Quantum => "Quantum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Assigned { provider_id: String },
    Completed,
    Failed { reason: FailReason },
    Cancelled,
    Slashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailReason {
    DeadlineMiss,
    ProviderError,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed { .. } | JobStatus::Cancelled | JobStatus::Slashed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: TaskId,
    pub kind: JobKind,
    pub spec: Value,
    pub submitter: Address,
    pub attestation_digest: Hash32,
    pub status: JobStatus,
    /// Epoch seconds after which an unfinished job fails.
    pub deadline: i64,
}

/* ---------------------------------------------------------------------
   Store
---------------------------------------------------------------------*/
pub struct JobStore {
    jobs: DashMap<TaskId, Job>,
    results: DashMap<TaskId, Vec<u8>>,
    queue_tx: Sender<TaskId>,
    queue_rx: Receiver<TaskId>,
    enqueue_timeout: Duration,
}

impl JobStore {
    pub fn new(cfg: &AicfConfig) -> Self {
        let (queue_tx, queue_rx) = bounded(cfg.job_queue_capacity);
        Self {
            jobs: DashMap::new(),
            results: DashMap::new(),
            queue_tx,
            queue_rx,
            enqueue_timeout: Duration::from_secs_f64(cfg.enqueue_timeout_sec),
        }
    }

    /* ---------------- submission ------------------ */

    /// Enqueue a job derived from a canonically-normalized attestation.
    /// Resubmitting an identical envelope returns the existing task id.
    /// A full queue blocks up to the enqueue timeout, then `QueueFull`.
    pub fn enqueue(
        &self,
        kind: JobKind,
        spec: Value,
        attestation: &Value,
        submitter: Address,
        nonce: u64,
        deadline: i64,
    ) -> Result<(TaskId, JobStatus)> {
        let id = job_id(kind.as_str(), &spec, attestation, &submitter, nonce)?;
        if let Some(existing) = self.jobs.get(&id) {
            return Ok((id, existing.status.clone()));
        }

        let job = Job {
            id,
            kind,
            spec,
            submitter,
            attestation_digest: attestation_digest(attestation)?,
            status: JobStatus::Queued,
            deadline,
        };
        self.jobs.insert(id, job);

        if self.queue_tx.send_timeout(id, self.enqueue_timeout).is_err() {
            self.jobs.remove(&id);
            return Err(CoreError::QueueFull);
        }
        Ok((id, JobStatus::Queued))
    }

    /// Worker side: wait up to `timeout` for the next queued task, skipping
    /// entries cancelled or expired while waiting in line.
    pub fn claim_next(&self, provider_id: &str, timeout: Duration) -> Option<TaskId> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            let id = match self.queue_rx.recv_timeout(remaining) {
                Ok(id) => id,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return None,
            };
            let mut claimed = false;
            if let Some(mut job) = self.jobs.get_mut(&id) {
                if job.status == JobStatus::Queued {
                    job.status = JobStatus::Assigned {
                        provider_id: provider_id.to_string(),
                    };
                    claimed = true;
                }
            }
            if claimed {
                return Some(id);
            }
        }
    }

    /* ---------------- transitions ----------------- */

    /// Cancellation is only valid pre-assignment; afterwards it is ignored
    /// and the job runs to completion or deadline.
    pub fn cancel(&self, id: &TaskId) -> bool {
        match self.jobs.get_mut(id) {
            Some(mut job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Fulfill an assigned job before its deadline, storing the result.
    pub fn complete(&self, id: &TaskId, now: i64, result: Vec<u8>) -> Result<()> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown task {}", hex_0x(id))))?;
        match &job.status {
            JobStatus::Assigned { .. } if now <= job.deadline => {
                job.status = JobStatus::Completed;
                drop(job);
                self.inject_result(id, result);
                Ok(())
            }
            JobStatus::Assigned { .. } => {
                job.status = JobStatus::Failed {
                    reason: FailReason::DeadlineMiss,
                };
                Err(CoreError::Timeout(format!("task {} past deadline", hex_0x(id))))
            }
            other => Err(CoreError::InvalidArgument(format!(
                "task {} not assignable from {other:?}",
                hex_0x(id)
            ))),
        }
    }

    pub fn fail(&self, id: &TaskId, reason: FailReason) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Failed { reason };
            }
        }
    }

    /// Invalid attestation detected post-hoc: terminalize as slashed.
    pub fn mark_slashed(&self, id: &TaskId) {
        if let Some(mut job) = self.jobs.get_mut(id) {
            if !job.status.is_terminal() {
                job.status = JobStatus::Slashed;
            }
        }
    }

    /// Sweep non-terminal jobs past their deadline into Failed.
    pub fn expire_deadlines(&self, now: i64) -> usize {
        let mut expired = 0;
        for mut entry in self.jobs.iter_mut() {
            if !entry.status.is_terminal() && now > entry.deadline {
                entry.status = JobStatus::Failed {
                    reason: FailReason::DeadlineMiss,
                };
                expired += 1;
            }
        }
        expired
    }

    /* ---------------- results --------------------- */

    /// First write wins; duplicate injections are no-ops.
    pub fn inject_result(&self, id: &TaskId, result: Vec<u8>) {
        self.results.entry(*id).or_insert(result);
    }

    /// Fails with `NoResultYet` until fulfilled, then returns the same
    /// bytes on every call.
    pub fn read_result(&self, id: &TaskId) -> Result<Vec<u8>> {
        self.results
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| CoreError::NoResultYet(hex_0x(id)))
    }

    /* ---------------- queries --------------------- */

    pub fn get(&self, id: &TaskId) -> Option<Job> {
        self.jobs.get(id).map(|j| j.clone())
    }

    pub fn status(&self, id: &TaskId) -> Option<JobStatus> {
        self.jobs.get(id).map(|j| j.status.clone())
    }

    pub fn queued_len(&self) -> usize {
        self.queue_rx.len()
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> JobStore {
        JobStore::new(&AicfConfig {
            job_queue_capacity: 4,
            enqueue_timeout_sec: 0.05,
            ..Default::default()
        })
    }

    fn submit(store: &JobStore, nonce: u64) -> TaskId {
        let (id, status) = store
            .enqueue(
                JobKind::Quantum,
                json!({"shots": 256}),
                &json!({"proof": "0xab"}),
                Address::repeat(1),
                nonce,
                1_000,
            )
            .unwrap();
        assert_eq!(status, JobStatus::Queued);
        id
    }

    #[test]
    fn enqueue_then_claim_then_complete() {
        let s = store();
        let id = submit(&s, 0);
        let claimed = s.claim_next("prov-1", Duration::from_millis(50)).unwrap();
        assert_eq!(claimed, id);
        assert_eq!(
            s.status(&id),
            Some(JobStatus::Assigned { provider_id: "prov-1".into() })
        );
        s.complete(&id, 500, b"result".to_vec()).unwrap();
        assert_eq!(s.status(&id), Some(JobStatus::Completed));
        assert_eq!(s.read_result(&id).unwrap(), b"result".to_vec());
    }

    #[test]
    fn duplicate_submission_returns_same_task_id() {
        let s = store();
        let id1 = submit(&s, 0);
        let (id2, _) = s
            .enqueue(
                JobKind::Quantum,
                json!({"shots": 256}),
                // Key order differs; canonicalization makes it equivalent.
                &serde_json::from_str(r#"{ "proof" : "0xab" }"#).unwrap(),
                Address::repeat(1),
                0,
                1_000,
            )
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(s.queued_len(), 1);
    }

    #[test]
    fn read_before_fulfillment_is_no_result_yet() {
        let s = store();
        let id = submit(&s, 0);
        assert!(matches!(s.read_result(&id), Err(CoreError::NoResultYet(_))));
    }

    #[test]
    fn result_injection_is_idempotent() {
        let s = store();
        let id = submit(&s, 0);
        s.inject_result(&id, b"first".to_vec());
        s.inject_result(&id, b"second".to_vec());
        assert_eq!(s.read_result(&id).unwrap(), b"first".to_vec());
        assert_eq!(s.read_result(&id).unwrap(), b"first".to_vec());
    }

    #[test]
    fn cancel_only_from_queued() {
        let s = store();
        let id = submit(&s, 0);
        assert!(s.cancel(&id));
        assert_eq!(s.status(&id), Some(JobStatus::Cancelled));
        // Cancel is final; a second cancel is a no-op.
        assert!(!s.cancel(&id));

        let id2 = submit(&s, 1);
        // The worker skips the cancelled entry still sitting in the queue.
        let claimed = s.claim_next("prov-1", Duration::from_millis(50)).unwrap();
        assert_eq!(claimed, id2);
        assert!(!s.cancel(&id2)); // post-assignment cancellation ignored
        assert_eq!(
            s.status(&id2),
            Some(JobStatus::Assigned { provider_id: "prov-1".into() })
        );
    }

    #[test]
    fn completion_after_deadline_fails_the_job() {
        let s = store();
        let id = submit(&s, 0);
        s.claim_next("prov-1", Duration::from_millis(50)).unwrap();
        let err = s.complete(&id, 2_000, b"late".to_vec());
        assert!(err.is_err());
        assert_eq!(
            s.status(&id),
            Some(JobStatus::Failed { reason: FailReason::DeadlineMiss })
        );
        assert!(matches!(s.read_result(&id), Err(CoreError::NoResultYet(_))));
    }

    #[test]
    fn expire_sweep_fails_overdue_jobs() {
        let s = store();
        let id = submit(&s, 0);
        assert_eq!(s.expire_deadlines(999), 0);
        assert_eq!(s.expire_deadlines(1_001), 1);
        assert_eq!(
            s.status(&id),
            Some(JobStatus::Failed { reason: FailReason::DeadlineMiss })
        );
        // Terminal states are final.
        assert_eq!(s.expire_deadlines(2_000), 0);
    }

    #[test]
    fn queue_full_applies_backpressure() {
        let s = store(); // capacity 4
        for nonce in 0..4 {
            submit(&s, nonce);
        }
        let res = s.enqueue(
            JobKind::Ai,
            json!({"prompt": "hello"}),
            &json!({"proof": "0xcd"}),
            Address::repeat(2),
            99,
            1_000,
        );
        assert!(matches!(res, Err(CoreError::QueueFull)));
        // The rejected job leaves no residue.
        assert_eq!(s.queued_len(), 4);
    }

    #[test]
    fn slashed_is_terminal() {
        let s = store();
        let id = submit(&s, 0);
        s.mark_slashed(&id);
        assert_eq!(s.status(&id), Some(JobStatus::Slashed));
        s.fail(&id, FailReason::ProviderError);
        assert_eq!(s.status(&id), Some(JobStatus::Slashed));
    }
}
