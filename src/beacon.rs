// src/beacon.rs
//
// Randomness beacon schedule: map wall time to the current round, per-phase
// deadlines, and ETAs to the next event in the commit→reveal→(grace)→VDF→mix
// lifecycle. The math is pure arithmetic on epoch seconds; callers decide
// what "now" means (wall clock vs. latest block timestamp).
//
// A `BeaconStore` is layered on top to track per-round commit/reveal
// submissions with phase gating for the RPC surface.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{content_hash, Address, Hash32};
use crate::Result;

/* ---------------------------------------------------------------------
   Parameters & phases
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BeaconParams {
    /// Epoch second the beacon started.
    pub genesis_t0: i64,
    pub commit_sec: i64,
    pub reveal_sec: i64,
    pub reveal_grace_sec: i64,
    pub vdf_sec: i64,
}

impl BeaconParams {
    pub fn period(&self) -> i64 {
        self.commit_sec + self.reveal_sec + self.reveal_grace_sec + self.vdf_sec
    }

    pub fn validate(&self) -> Result<()> {
        if self.commit_sec < 0 || self.reveal_sec < 0 || self.reveal_grace_sec < 0 || self.vdf_sec < 0
        {
            return Err(CoreError::Config("beacon durations must be non-negative".into()));
        }
        if self.period() <= 0 {
            return Err(CoreError::Config("beacon per-round duration must be positive".into()));
        }
        Ok(())
    }
}

impl Default for BeaconParams {
    fn default() -> Self {
        Self {
            genesis_t0: 0,
            commit_sec: 12,
            reveal_sec: 12,
            reveal_grace_sec: 6,
            vdf_sec: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Commit,
    Reveal,
    RevealGrace,
    Vdf,
    MixReady,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Commit => "commit",
            Phase::Reveal => "reveal",
            Phase::RevealGrace => "reveal_grace",
            Phase::Vdf => "vdf",
            Phase::MixReady => "mix_ready",
        };
        f.write_str(s)
    }
}

/* ---------------------------------------------------------------------
   Round schedule
---------------------------------------------------------------------*/

/// Computed boundaries for a beacon round. All times are epoch seconds,
/// intervals closed-open. Mix output is ready at `t_mix_ready ==
/// t_vdf_deadline`, which equals the next round's commit open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSchedule {
    pub round_id: u64,

    pub t_commit_open: i64,
    pub t_commit_close: i64,

    pub t_reveal_open: i64,
    pub t_reveal_close: i64,

    pub t_reveal_grace_open: i64,
    pub t_reveal_grace_close: i64,

    pub t_vdf_start: i64,
    pub t_vdf_deadline: i64,

    pub t_mix_ready: i64,
}

impl RoundSchedule {
    pub fn phase_at(&self, ts: i64) -> Phase {
        if ts < self.t_commit_close {
            Phase::Commit
        } else if ts < self.t_reveal_close {
            Phase::Reveal
        } else if ts < self.t_reveal_grace_close {
            Phase::RevealGrace
        } else if ts < self.t_vdf_deadline {
            Phase::Vdf
        } else {
            Phase::MixReady
        }
    }
}

/// Round id active at `now`. Times before genesis resolve to round 0.
pub fn current_round_id(now: i64, params: &BeaconParams) -> u64 {
    let period = params.period();
    let delta = now - params.genesis_t0;
    if delta <= 0 {
        return 0;
    }
    (delta / period) as u64
}

/// Full schedule (boundaries & durations) for a specific round.
pub fn schedule_for_round(round_id: u64, params: &BeaconParams) -> RoundSchedule {
    let t0 = params.genesis_t0 + round_id as i64 * params.period();

    let t_commit_open = t0;
    let t_commit_close = t_commit_open + params.commit_sec;
    let t_reveal_open = t_commit_close;
    let t_reveal_close = t_reveal_open + params.reveal_sec;
    let t_reveal_grace_open = t_reveal_close;
    let t_reveal_grace_close = t_reveal_grace_open + params.reveal_grace_sec;
    let t_vdf_start = t_reveal_grace_close;
    let t_vdf_deadline = t_vdf_start + params.vdf_sec;

    RoundSchedule {
        round_id,
        t_commit_open,
        t_commit_close,
        t_reveal_open,
        t_reveal_close,
        t_reveal_grace_open,
        t_reveal_grace_close,
        t_vdf_start,
        t_vdf_deadline,
        t_mix_ready: t_vdf_deadline,
    }
}

/// Schedule of the round active at `now`.
pub fn schedule_for_time(now: i64, params: &BeaconParams) -> RoundSchedule {
    schedule_for_round(current_round_id(now, params), params)
}

/// `(next_event_phase, eta_seconds)` from `now` within a schedule. The ETA
/// counts to the close of the named window; past the VDF deadline the mix is
/// already available and the ETA is zero.
pub fn next_event_eta(now: i64, sched: &RoundSchedule) -> (Phase, i64) {
    if now < sched.t_commit_close {
        (Phase::Commit, sched.t_commit_close - now)
    } else if now < sched.t_reveal_close {
        (Phase::Reveal, sched.t_reveal_close - now)
    } else if now < sched.t_reveal_grace_close {
        (Phase::RevealGrace, sched.t_reveal_grace_close - now)
    } else if now < sched.t_vdf_deadline {
        (Phase::Vdf, sched.t_vdf_deadline - now)
    } else {
        (Phase::MixReady, 0)
    }
}

/// ETA in seconds from `now` to the start of `target_round_id`.
pub fn time_to_round_start(target_round_id: u64, now: i64, params: &BeaconParams) -> i64 {
    let t0 = params.genesis_t0 + target_round_id as i64 * params.period();
    (t0 - now).max(0)
}

/* ---------------------------------------------------------------------
   Commit/reveal store
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundCounts {
    pub commits: usize,
    pub reveals: usize,
}

#[derive(Default)]
struct RoundEntry {
    /// address → commitment digest
    commits: HashMap<Address, Hash32>,
    /// commitment digest → revealed payload
    reveals: HashMap<Hash32, Vec<u8>>,
}

/// Tracks commit/reveal submissions per round with phase gating. Derived
/// schedules are never stored; only submissions are.
pub struct BeaconStore {
    params: BeaconParams,
    rounds: RwLock<HashMap<u64, RoundEntry>>,
}

impl BeaconStore {
    pub fn new(params: BeaconParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            rounds: RwLock::new(HashMap::new()),
        })
    }

    pub fn params(&self) -> &BeaconParams {
        &self.params
    }

    fn commitment_digest(salt: &[u8], payload: &[u8]) -> Hash32 {
        let mut buf = Vec::with_capacity(salt.len() + payload.len());
        buf.extend_from_slice(salt);
        buf.extend_from_slice(payload);
        content_hash(&buf)
    }

    /// Record a commitment for the round active at `now`. Only valid during
    /// the commit window.
    pub fn submit_commit(&self, now: i64, address: Address, salt: &[u8], payload: &[u8]) -> Result<u64> {
        let sched = schedule_for_time(now, &self.params);
        let phase = sched.phase_at(now);
        if phase != Phase::Commit {
            return Err(CoreError::WrongPhase {
                expected: Phase::Commit.to_string(),
                actual: phase.to_string(),
            });
        }
        let digest = Self::commitment_digest(salt, payload);
        self.rounds
            .write()
            .entry(sched.round_id)
            .or_default()
            .commits
            .insert(address, digest);
        Ok(sched.round_id)
    }

    /// Record a reveal for the round active at `now`. Valid during the reveal
    /// window and its grace extension; the reveal must match a recorded
    /// commitment digest.
    pub fn submit_reveal(&self, now: i64, salt: &[u8], payload: &[u8]) -> Result<u64> {
        let sched = schedule_for_time(now, &self.params);
        let phase = sched.phase_at(now);
        if phase != Phase::Reveal && phase != Phase::RevealGrace {
            return Err(CoreError::WrongPhase {
                expected: Phase::Reveal.to_string(),
                actual: phase.to_string(),
            });
        }
        let digest = Self::commitment_digest(salt, payload);
        let mut rounds = self.rounds.write();
        let entry = rounds.entry(sched.round_id).or_default();
        if !entry.commits.values().any(|c| *c == digest) {
            return Err(CoreError::InvalidArgument(
                "reveal does not match any commitment in this round".into(),
            ));
        }
        entry.reveals.insert(digest, payload.to_vec());
        Ok(sched.round_id)
    }

    pub fn counts(&self, round_id: u64) -> RoundCounts {
        let rounds = self.rounds.read();
        rounds
            .get(&round_id)
            .map(|e| RoundCounts {
                commits: e.commits.len(),
                reveals: e.reveals.len(),
            })
            .unwrap_or_default()
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
