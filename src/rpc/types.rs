// src/rpc/types.rs
//
// JSON-RPC 2.0 envelopes and the error-code mapping for core outcomes.
//

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::mempool::AdmissionError;

pub const JSONRPC_VERSION: &str = "2.0";

/* ---------------------------------------------------------------------
   Envelopes
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/* ---------------------------------------------------------------------
   Errors
---------------------------------------------------------------------*/
pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_DOMAIN: i64 = -32000;

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: CODE_METHOD_NOT_FOUND,
            message: format!("method not found: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self {
            code: CODE_INVALID_PARAMS,
            message: detail.into(),
            data: None,
        }
    }

    pub fn domain(reason: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code: CODE_DOMAIN,
            message: format!("{reason}: {}", message.into()),
            data,
        }
    }
}

impl From<AdmissionError> for RpcError {
    fn from(err: AdmissionError) -> Self {
        let reason = match &err {
            AdmissionError::InvalidTx { .. } => "InvalidTx",
            AdmissionError::BadSignature { .. } => "InvalidTx",
            AdmissionError::RateLimited { .. } => "RateLimited",
            AdmissionError::NoFeeFields => "InvalidTx",
            AdmissionError::BelowFloor { .. } => "BelowFloor",
            AdmissionError::TipTooLow { .. } => "BelowFloor",
            AdmissionError::Underpriced { .. } => "Underpriced",
            AdmissionError::DuplicateTx => "InvalidTx",
            AdmissionError::NonceTooLow { .. } => "InvalidTx",
            AdmissionError::MempoolFull => "MempoolFull",
        };
        let data = serde_json::to_value(&err).ok();
        RpcError::domain(reason, "transaction rejected", data)
    }
}

impl From<CoreError> for RpcError {
    fn from(err: CoreError) -> Self {
        let reason = match &err {
            CoreError::BadAttestation(_) => "AttestationError",
            CoreError::NoResultYet(_) => "NoResultYet",
            CoreError::WrongPhase { .. } => "WrongPhase",
            CoreError::Timeout(_) => "Timeout",
            CoreError::Unavailable(_) => "Unavailable",
            CoreError::QueueFull => "QueueFull",
            _ => "Error",
        };
        RpcError::domain(reason, err.to_string(), None)
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
