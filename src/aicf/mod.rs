// src/aicf/mod.rs
//
// AICF compute market: job lifecycle, provider registry with heartbeats,
// slashing policy, and the dispatch worker.
//

pub mod attest;
pub mod jobs;
pub mod registry;
pub mod slashing;
pub mod worker;

pub use attest::{attestation_digest, job_id, normalize_attestation};
pub use jobs::{FailReason, Job, JobKind, JobStatus, JobStore, TaskId};
pub use registry::{Heartbeat, HeartbeatError, ProviderRecord, ProviderStatus, Registry, TOPIC_HEARTBEAT_V1};
pub use slashing::{
    compute_slash_plan, default_rule_table, severity_from_sla, ClawbackTranche, RuleTable,
    SlaMetrics, SlashPlan, SlashRule,
};
pub use worker::{AicfWorker, DispatchError, ProviderClient};
