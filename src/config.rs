// src/config.rs
//
// Node configuration: per-subsystem sections with TOML persistence,
// ANIMICA_* environment overrides, and preset profiles.
//

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::beacon::BeaconParams;
use crate::fee_market::FeeMarketConfig;
use crate::limiter::LimiterConfig;
use crate::Result;

/// Main configuration for the Animica node core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub chain: ChainConfig,
    pub limits: TxLimits,
    pub fee_market: FeeMarketConfig,
    pub limiter: LimiterConfig,
    pub mempool: MempoolConfig,
    pub beacon: BeaconParams,
    pub aicf: AicfConfig,
    pub rpc: RpcConfig,
}

impl Config {
    /// Production configuration with hardened admission settings.
    pub fn production() -> Self {
        Self {
            mempool: MempoolConfig::production(),
            aicf: AicfConfig::production(),
            rpc: RpcConfig::production(),
            ..Default::default()
        }
    }

    /// Development configuration with relaxed settings for local runs.
    pub fn development() -> Self {
        Self {
            limiter: LimiterConfig {
                per_peer_tx_rate_per_sec: 200.0,
                per_peer_tx_burst: 400.0,
                ..Default::default()
            },
            aicf: AicfConfig::development(),
            rpc: RpcConfig::development(),
            ..Default::default()
        }
    }

    /// Load configuration from file with environment variable overrides.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&config_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("ANIMICA_RPC_PORT") {
            if let Ok(port_num) = port.parse::<u16>() {
                self.rpc.port = port_num;
            }
        }
        if let Ok(addr) = std::env::var("ANIMICA_RPC_LISTEN_ADDR") {
            self.rpc.listen_address = addr;
        }
        if let Ok(enabled) = std::env::var("ANIMICA_RPC_ENABLED") {
            self.rpc.enabled = enabled.to_lowercase() == "true";
        }
        if let Ok(limit) = std::env::var("ANIMICA_BLOCK_GAS_LIMIT") {
            if let Ok(v) = limit.parse::<u64>() {
                self.chain.block_gas_limit = v;
            }
        }
        if let Ok(bytes) = std::env::var("ANIMICA_MEMPOOL_MAX_BYTES") {
            if let Ok(v) = bytes.parse::<usize>() {
                self.mempool.max_bytes = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chain.validate()?;
        self.mempool.validate()?;
        self.beacon.validate()?;
        self.aicf.validate()?;
        self.rpc.validate()?;
        Ok(())
    }
}

/* ---------------------------------------------------------------------
   Chain / execution
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub block_gas_limit: u64,
    /// Gas charged before the VM sees a tx.
    pub intrinsic_gas: u64,
    /// Cap on VM-reported refund units, as a fraction of gas used.
    pub refund_ratio_cap_bps: u64,
    pub genesis_timestamp: i64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_gas_limit: 30_000_000,
            intrinsic_gas: 21_000,
            refund_ratio_cap_bps: 2_000,
            genesis_timestamp: 0,
        }
    }
}

impl ChainConfig {
    fn validate(&self) -> Result<()> {
        if self.block_gas_limit == 0 {
            return Err(crate::error::CoreError::Config("block gas limit must be positive".into()));
        }
        if self.refund_ratio_cap_bps > 10_000 {
            return Err(crate::error::CoreError::Config("refund cap above 100%".into()));
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------
   Structural transaction limits
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxLimits {
    pub max_tx_size_bytes: usize,
    pub max_code_size_bytes: usize,
    pub max_logs_per_tx: usize,
    pub max_event_topics: usize,
    pub max_event_data_bytes: usize,
    pub max_access_list_len: usize,
}

impl Default for TxLimits {
    fn default() -> Self {
        Self {
            max_tx_size_bytes: 131_072,
            max_code_size_bytes: 65_536,
            max_logs_per_tx: 128,
            max_event_topics: 4,
            max_event_data_bytes: 65_536,
            max_access_list_len: 1_024,
        }
    }
}

/* ---------------------------------------------------------------------
   Mempool
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Byte capacity; admission past this point evicts the cheapest entries.
    pub max_bytes: usize,
    /// Minimum effective-fee bump for same-(sender, nonce) replacement.
    pub replacement_bps: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_bytes: 256 * 1024 * 1024,
            replacement_bps: 1_000,
        }
    }
}

impl MempoolConfig {
    pub fn production() -> Self {
        Self::default()
    }

    fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(crate::error::CoreError::Config("mempool capacity must be positive".into()));
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------
   AICF
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AicfConfig {
    /// Seconds without a heartbeat before a provider turns Unavailable.
    pub liveness_threshold_sec: i64,
    /// Heartbeats arriving faster than this per provider are dropped.
    pub heartbeat_min_interval_sec: f64,
    /// Heartbeats older than now − skew are dropped.
    pub heartbeat_max_skew_sec: i64,
    /// Bounded job queue capacity; producers block when full.
    pub job_queue_capacity: usize,
    /// Seconds a producer waits on a full queue before QueueFull.
    pub enqueue_timeout_sec: f64,
    /// Per-dispatch provider deadline.
    pub dispatch_timeout_sec: f64,
    pub dispatch_max_attempts: u32,
    /// Target P99 latency for the SLA severity mapping.
    pub slo_latency_ms: u64,
}

impl Default for AicfConfig {
    fn default() -> Self {
        Self {
            liveness_threshold_sec: 60,
            heartbeat_min_interval_sec: 5.0,
            heartbeat_max_skew_sec: 300,
            job_queue_capacity: 1_024,
            enqueue_timeout_sec: 5.0,
            dispatch_timeout_sec: 30.0,
            dispatch_max_attempts: 3,
            slo_latency_ms: 2_000,
        }
    }
}

impl AicfConfig {
    pub fn production() -> Self {
        Self {
            job_queue_capacity: 4_096,
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        Self {
            heartbeat_min_interval_sec: 0.5,
            enqueue_timeout_sec: 1.0,
            dispatch_timeout_sec: 5.0,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.job_queue_capacity == 0 {
            return Err(crate::error::CoreError::Config("job queue capacity must be positive".into()));
        }
        if self.dispatch_max_attempts == 0 {
            return Err(crate::error::CoreError::Config("dispatch attempts must be positive".into()));
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------
   RPC
---------------------------------------------------------------------*/
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub enabled: bool,
    pub listen_address: String,
    pub port: u16,
    pub max_body_bytes: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: "127.0.0.1".to_string(),
            port: 8545,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl RpcConfig {
    pub fn production() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        Self::default()
    }

    fn validate(&self) -> Result<()> {
        if self.enabled && self.listen_address.is_empty() {
            return Err(crate::error::CoreError::Config("rpc listen address is empty".into()));
        }
        Ok(())
    }
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/
