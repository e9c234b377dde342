// src/rpc/mod.rs
//
// JSON-RPC 2.0 surface over warp. Handlers live in a registry keyed by
// method name, populated once at startup; dispatch is a map lookup.
//

pub mod handlers;
pub mod types;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use warp::Filter;

use crate::config::RpcConfig;
use crate::error::CoreError;
use crate::Result;

pub use handlers::{register_all, NodeHandles};
pub use types::{RpcError, RpcRequest, RpcResponse};

type Handler = Arc<dyn Fn(Value) -> std::result::Result<Value, RpcError> + Send + Sync>;

pub struct RpcServer {
    cfg: RpcConfig,
    methods: HashMap<&'static str, Handler>,
}

impl RpcServer {
    pub fn new(cfg: RpcConfig) -> Self {
        Self {
            cfg,
            methods: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, method: &'static str, handler: F)
    where
        F: Fn(Value) -> std::result::Result<Value, RpcError> + Send + Sync + 'static,
    {
        self.methods.insert(method, Arc::new(handler));
    }

    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Dispatch one request envelope.
    pub fn dispatch(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        match self.methods.get(request.method.as_str()) {
            Some(handler) => match handler(request.params) {
                Ok(result) => RpcResponse::ok(id, result),
                Err(err) => RpcResponse::err(id, err),
            },
            None => RpcResponse::err(id, RpcError::method_not_found(&request.method)),
        }
    }

    /// Serve until the process exits. Body size is bounded; malformed
    /// envelopes answer with an invalid-request error rather than a 500.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.cfg.listen_address, self.cfg.port)
            .parse()
            .map_err(|e| CoreError::Config(format!("bad rpc listen address: {e}")))?;

        let server = self.clone();
        let route = warp::post()
            .and(warp::body::content_length_limit(self.cfg.max_body_bytes))
            .and(warp::body::json())
            .map(move |body: Value| {
                let response = match serde_json::from_value::<RpcRequest>(body) {
                    Ok(request) => server.dispatch(request),
                    Err(e) => RpcResponse::err(
                        Value::Null,
                        RpcError {
                            code: types::CODE_INVALID_REQUEST,
                            message: format!("invalid request: {e}"),
                            data: None,
                        },
                    ),
                };
                warp::reply::json(&response)
            });

        log::info!("rpc listening on {addr} ({} methods)", self.methods.len());
        warp::serve(route).run(addr).await;
        Ok(())
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
