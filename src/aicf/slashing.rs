// src/aicf/slashing.rs
//
// AICF slashing & clawback rules: deterministic, policy-driven penalties
// for provider misbehavior or SLA breaches. Computes (a) an immediate
// slash from stake and (b) a scheduled clawback of recent earnings spread
// over future epochs.
//
// Pure module: no IO, all integer math, stable ordering. Ratios are basis
// points; floats appear only at the SLA ingestion boundary and are
// converted immediately.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::fee_market::BPS_DEN;

/* ---------------------------------------------------------------------
   Rule table
---------------------------------------------------------------------*/

/// Policy for a given reason code. All ratios in bps, scaled by severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashRule {
    /// % of stake to slash immediately.
    pub immediate_bps: u64,
    /// % of recent earnings to claw back.
    pub clawback_bps: u64,
    /// Future epochs the clawback is spread over.
    pub schedule_epochs: u32,
    pub max_immediate_abs: Option<u128>,
    pub max_clawback_abs: Option<u128>,
}

pub type RuleTable = HashMap<String, SlashRule>;

pub const DEFAULT_RULE_KEY: &str = "__default__";

pub const REASON_FRAUD_PROOF: &str = "fraud_proof";
pub const REASON_INVALID_ATTESTATION: &str = "invalid_attestation";
pub const REASON_UNAVAILABLE: &str = "unavailable";
pub const REASON_DEADLINE_MISS: &str = "deadline_miss";
pub const REASON_DOUBLE_SUBMIT: &str = "double_submit";

/// Conservative defaults; deployments tune these.
pub fn default_rule_table() -> RuleTable {
    let mut rules = RuleTable::new();
    // Deliberate fraud / forged outputs: hard slash.
    rules.insert(
        REASON_FRAUD_PROOF.into(),
        SlashRule {
            immediate_bps: 10_000,
            clawback_bps: 10_000,
            schedule_epochs: 4,
            max_immediate_abs: None,
            max_clawback_abs: None,
        },
    );
    // Attestation invalid or traps failed: strong penalty.
    rules.insert(
        REASON_INVALID_ATTESTATION.into(),
        SlashRule {
            immediate_bps: 5_000,
            clawback_bps: 5_000,
            schedule_epochs: 3,
            max_immediate_abs: None,
            max_clawback_abs: None,
        },
    );
    // Availability / liveness issues (offline, lease lost).
    rules.insert(
        REASON_UNAVAILABLE.into(),
        SlashRule {
            immediate_bps: 500,
            clawback_bps: 2_000,
            schedule_epochs: 2,
            max_immediate_abs: None,
            max_clawback_abs: None,
        },
    );
    // Missed deadlines or QoS below threshold.
    rules.insert(
        REASON_DEADLINE_MISS.into(),
        SlashRule {
            immediate_bps: 0,
            clawback_bps: 3_000,
            schedule_epochs: 1,
            max_immediate_abs: None,
            max_clawback_abs: None,
        },
    );
    // Duplicate / conflicting submissions (sloppy but not malicious).
    rules.insert(
        REASON_DOUBLE_SUBMIT.into(),
        SlashRule {
            immediate_bps: 1_000,
            clawback_bps: 1_000,
            schedule_epochs: 2,
            max_immediate_abs: None,
            max_clawback_abs: None,
        },
    );
    // Safety net for unclassified reasons.
    rules.insert(
        DEFAULT_RULE_KEY.into(),
        SlashRule {
            immediate_bps: 0,
            clawback_bps: 500,
            schedule_epochs: 1,
            max_immediate_abs: None,
            max_clawback_abs: None,
        },
    );
    rules
}

/* ---------------------------------------------------------------------
   Plan types
---------------------------------------------------------------------*/
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClawbackTranche {
    pub epoch_idx: u64,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashPlan {
    pub reason_code: String,
    pub severity_bps: u64,
    pub immediate_slash: u128,
    pub clawback_total: u128,
    pub schedule: Vec<ClawbackTranche>,
}

/* ---------------------------------------------------------------------
   Helpers
---------------------------------------------------------------------*/

/// amount · (bps/10_000) · (severity_bps/10_000), integer math.
fn mul_clip(amount: u128, bps: u64, severity_bps: u64) -> u128 {
    if amount == 0 || bps == 0 || severity_bps == 0 {
        return 0;
    }
    amount * bps as u128 * severity_bps as u128 / (BPS_DEN as u128 * BPS_DEN as u128)
}

fn clip_cap(value: u128, cap: Option<u128>) -> u128 {
    match cap {
        Some(c) => value.min(c),
        None => value,
    }
}

/// Split `total` into `epochs` tranches starting at `start_epoch + 1`; the
/// first tranche takes the remainder so amounts sum exactly to `total`.
fn even_schedule(total: u128, start_epoch: u64, epochs: u32) -> Vec<ClawbackTranche> {
    if total == 0 || epochs == 0 {
        return Vec::new();
    }
    let n = epochs as u128;
    let base = total / n;
    let remainder = total - base * n;
    (0..epochs)
        .map(|i| ClawbackTranche {
            epoch_idx: start_epoch + i as u64 + 1,
            amount: base + if i == 0 { remainder } else { 0 },
        })
        .collect()
}

/* ---------------------------------------------------------------------
   Core policy
---------------------------------------------------------------------*/

/// Evaluate the rule table for a provider. The plan is pure output and is
/// never mutated after creation. `severity_bps` is clamped into [0, 10_000];
/// unknown reasons fall back to the mandatory `__default__` rule.
#[allow(clippy::too_many_arguments)]
pub fn compute_slash_plan(
    reason_code: &str,
    severity_bps: u64,
    stake_balance: u128,
    recent_earnings: u128,
    epoch_idx: u64,
    rules: &RuleTable,
    max_immediate_abs: Option<u128>,
    max_clawback_abs: Option<u128>,
) -> SlashPlan {
    let fallback = SlashRule {
        immediate_bps: 0,
        clawback_bps: 500,
        schedule_epochs: 1,
        max_immediate_abs: None,
        max_clawback_abs: None,
    };
    let rule = rules
        .get(reason_code)
        .or_else(|| rules.get(DEFAULT_RULE_KEY))
        .unwrap_or(&fallback);

    let severity_bps = severity_bps.min(BPS_DEN);

    let mut immediate = mul_clip(stake_balance, rule.immediate_bps, severity_bps);
    immediate = immediate.min(stake_balance);
    immediate = clip_cap(immediate, rule.max_immediate_abs);
    immediate = clip_cap(immediate, max_immediate_abs);

    let mut clawback = mul_clip(recent_earnings, rule.clawback_bps, severity_bps);
    clawback = clawback.min(recent_earnings);
    clawback = clip_cap(clawback, rule.max_clawback_abs);
    clawback = clip_cap(clawback, max_clawback_abs);

    let schedule = even_schedule(clawback, epoch_idx, rule.schedule_epochs.max(1));

    SlashPlan {
        reason_code: reason_code.to_string(),
        severity_bps,
        immediate_slash: immediate,
        clawback_total: clawback,
        schedule,
    }
}

/* ---------------------------------------------------------------------
   SLA → severity mapping
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Copy, Default)]
pub struct SlaMetrics {
    /// Fraction of trap tests passed, 0..1.
    pub traps_ratio: Option<f64>,
    /// Recent QoS score, 0..1 (1 = best).
    pub qos_score: Option<f64>,
    pub latency_p99_ms: Option<u64>,
    /// Uptime over the window, 0..1.
    pub availability: Option<f64>,
}

fn frac_to_bps(f: f64) -> u64 {
    if f <= 0.0 {
        return 0;
    }
    if f >= 1.0 {
        return BPS_DEN;
    }
    (f * BPS_DEN as f64).round() as u64
}

/// First-match mapping from SLA metrics to (reason_code, severity_bps).
/// The ordering is frozen: traps, then QoS, then latency, then availability.
pub fn severity_from_sla(metrics: &SlaMetrics, slo_latency_ms: u64) -> (&'static str, u64) {
    if let Some(traps) = metrics.traps_ratio {
        if traps < 0.98 {
            return (REASON_INVALID_ATTESTATION, frac_to_bps(1.0 - traps));
        }
    }
    if let Some(qos) = metrics.qos_score {
        if qos < 0.80 {
            return (REASON_DEADLINE_MISS, frac_to_bps(0.80 - qos));
        }
    }
    if let Some(p99) = metrics.latency_p99_ms {
        if p99 > slo_latency_ms {
            let over = p99 as f64 / slo_latency_ms as f64 - 1.0;
            return (REASON_DEADLINE_MISS, frac_to_bps(over));
        }
    }
    if let Some(avail) = metrics.availability {
        if avail < 0.95 {
            return (REASON_UNAVAILABLE, frac_to_bps(0.95 - avail));
        }
    }
    (DEFAULT_RULE_KEY, 0)
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
