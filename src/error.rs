// src/error.rs
//
// Core error taxonomy. Admission verdicts and other expected rejections are
// modelled as enum return values in their own modules; `CoreError` covers
// failures that propagate with `?`.
//

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // Validation: reported to the caller, never retried automatically.
    #[error("invalid transaction: {0}")]
    InvalidTx(String),
    #[error("invalid nonce: expected {expected}, found {found}")]
    InvalidNonce { expected: u64, found: u64 },
    #[error("bad signature: {0}")]
    BadSignature(String),
    #[error("bad attestation: {0}")]
    BadAttestation(String),

    // Capacity: transient, caller may retry with backoff.
    #[error("mempool full")]
    MempoolFull,
    #[error("job queue full")]
    QueueFull,

    // Transient external, surfaced after adapter-level retries are exhausted.
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("unavailable: {0}")]
    Unavailable(String),

    // Consistency: caller should refresh its view and resubmit.
    #[error("stale chain nonce for {0}")]
    StaleChainNonce(String),
    #[error("reorg in progress")]
    ReorgInProgress,

    // Fatal invariants: halt block apply, do not commit.
    #[error("state root mismatch: computed {computed}, expected {expected}")]
    StateRootMismatch { computed: String, expected: String },
    #[error("non-deterministic apply: {0}")]
    NonDeterministicApply(String),

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientFunds { have: u128, need: u128 },
    #[error("wrong beacon phase: expected {expected}, currently {actual}")]
    WrongPhase { expected: String, actual: String },
    #[error("no result yet for task {0}")]
    NoResultYet(String),
    #[error("unknown block: {0}")]
    BlockNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(err: bincode::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CoreError {
    fn from(err: toml::ser::Error) -> Self {
        CoreError::Config(err.to_string())
    }
}
