// src/main.rs
//
// Animica node binary: `run` boots the core (chain, mempool, beacon, AICF
// worker, RPC); the other subcommands are thin JSON-RPC clients against a
// running node.
//
// Exit codes: 0 success, 1 domain error, 2 usage error, 3 timeout or
// node unavailable. Command handlers propagate `anyhow` errors; the
// translation to an exit code happens once, in `main`.

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};

use animica_core::aicf::{
    AicfWorker, DispatchError, Job, JobStore, ProviderClient, Registry,
};
use animica_core::beacon::BeaconStore;
use animica_core::chain::Chain;
use animica_core::config::Config;
use animica_core::error::CoreError;
use animica_core::executor::FixedCostVm;
use animica_core::notify::EventBus;
use animica_core::rpc::{register_all, NodeHandles, RpcServer};
use animica_core::transaction::PermissiveVerifier;
use animica_core::types::{content_hash, Address};

const EXIT_DOMAIN: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_UNAVAILABLE: u8 = 3;

#[derive(Parser)]
#[command(name = "animica-core", version, about = "Animica layer-1 node core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node.
    Run(RunArgs),
    /// Randomness beacon tooling.
    #[command(subcommand)]
    Rand(RandCommand),
    /// AICF compute-market tooling.
    #[command(subcommand)]
    Aicf(AicfCommand),
    /// Fee-market tooling.
    #[command(subcommand)]
    Fees(FeesCommand),
}

#[derive(Args)]
struct RunArgs {
    /// TOML config file; defaults to the development profile.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Seconds between block production attempts.
    #[arg(long, default_value_t = 5)]
    produce_interval_secs: u64,
}

#[derive(Subcommand)]
enum RandCommand {
    /// Show window timings and counts for a randomness round.
    InspectRound(InspectRoundArgs),
}

#[derive(Args)]
struct InspectRoundArgs {
    /// Round to inspect; defaults to the current one.
    #[arg(long)]
    round: Option<u64>,
    #[arg(long)]
    json: bool,
    #[arg(long, env = "ANIMICA_RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,
}

#[derive(Subcommand)]
enum AicfCommand {
    /// Enqueue a Quantum job.
    EnqueueQuantum(EnqueueQuantumArgs),
}

#[derive(Args)]
struct EnqueueQuantumArgs {
    /// Inline circuit JSON.
    #[arg(long, conflicts_with = "circuit_file")]
    circuit: Option<String>,
    /// Path to a circuit JSON file.
    #[arg(long)]
    circuit_file: Option<PathBuf>,
    #[arg(long, default_value_t = 256)]
    shots: u32,
    /// Submitter address (bech32m).
    #[arg(long, default_value_t = Address::repeat(0x01).to_string())]
    submitter: String,
    #[arg(long)]
    json: bool,
    #[arg(long, env = "ANIMICA_RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,
}

#[derive(Subcommand)]
enum FeesCommand {
    /// Print the node's current fee suggestion.
    Suggest(SuggestArgs),
}

#[derive(Args)]
struct SuggestArgs {
    #[arg(long)]
    json: bool,
    #[arg(long, env = "ANIMICA_RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,
}

/* ---------------------------------------------------------------------
   Exit-code mapping
---------------------------------------------------------------------*/

/// Marker for bad invocations that clap cannot catch (e.g. an unreadable
/// --circuit-file); maps to exit code 2.
#[derive(Debug)]
struct UsageError(String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for UsageError {}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run_node(args),
        Command::Rand(RandCommand::InspectRound(args)) => inspect_round(args),
        Command::Aicf(AicfCommand::EnqueueQuantum(args)) => enqueue_quantum(args),
        Command::Fees(FeesCommand::Suggest(args)) => fees_suggest(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_failure(err),
    }
}

/// Single translation point from error chains to the process exit code:
/// usage problems exit 2, timeouts and unreachable nodes exit 3, anything
/// else is a domain error exiting 1.
fn report_failure(err: anyhow::Error) -> ExitCode {
    eprintln!("{err:#}");
    let usage = err.chain().any(|c| c.downcast_ref::<UsageError>().is_some());
    let unavailable = err.chain().any(|c| {
        matches!(
            c.downcast_ref::<CoreError>(),
            Some(CoreError::Timeout(_) | CoreError::Unavailable(_))
        )
    });
    if usage {
        ExitCode::from(EXIT_USAGE)
    } else if unavailable {
        ExitCode::from(EXIT_UNAVAILABLE)
    } else {
        ExitCode::from(EXIT_DOMAIN)
    }
}

/* ---------------------------------------------------------------------
   run
---------------------------------------------------------------------*/

/// Devnet stand-in provider: answers every job with a digest of its spec.
struct LoopbackProvider;

impl ProviderClient for LoopbackProvider {
    fn dispatch(
        &self,
        _provider_id: &str,
        job: &Job,
        _deadline: Duration,
    ) -> Result<Vec<u8>, DispatchError> {
        let spec = serde_json::to_vec(&job.spec).unwrap_or_default();
        Ok(content_hash(&spec).to_vec())
    }
}

fn run_node(args: RunArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::development(),
    };

    let bus = Arc::new(EventBus::new());
    let verifier = Arc::new(PermissiveVerifier);
    let vm = Arc::new(FixedCostVm::default());
    // Development faucet so local txs can be funded out of the box.
    let genesis_alloc = vec![(Address::repeat(0x01), u128::MAX / 4)];

    let chain = Arc::new(
        Chain::new(&config, vm, bus.clone(), verifier, genesis_alloc)
            .context("failed to boot chain")?,
    );
    let beacon = Arc::new(BeaconStore::new(config.beacon).context("invalid beacon params")?);
    let jobs = Arc::new(JobStore::new(&config.aicf));
    let registry = Arc::new(Registry::new(config.aicf.clone()));

    let worker = Arc::new(AicfWorker::new(
        jobs.clone(),
        registry.clone(),
        Arc::new(LoopbackProvider),
        config.aicf.clone(),
    ));
    let worker_stop = worker.stop_handle();
    let worker_handle = worker.spawn();

    let mut server = RpcServer::new(config.rpc.clone());
    register_all(
        &mut server,
        Arc::new(NodeHandles {
            chain: chain.clone(),
            beacon: beacon.clone(),
            jobs,
            registry,
        }),
    );
    log::info!("registered rpc methods: {:?}", server.method_names());

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;

    let producer_chain = chain.clone();
    let producer_beacon = beacon.clone();
    let interval = Duration::from_secs(args.produce_interval_secs.max(1));
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if producer_chain.mempool().stats().pending_txs == 0 {
                continue;
            }
            let now = Utc::now().timestamp();
            let round = animica_core::beacon::current_round_id(now, producer_beacon.params());
            let seed = content_hash(&round.to_be_bytes());
            match producer_chain.produce_block(now, seed) {
                Ok(block) => log::info!(
                    "produced block {} with {} txs",
                    block.header.height,
                    block.transactions.len()
                ),
                Err(e) => log::error!("block production failed: {e}"),
            }
        }
    });

    let serve_result = runtime.block_on(Arc::new(server).serve());
    worker_stop.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = worker_handle.join();
    serve_result.context("rpc server failed")?;
    Ok(())
}

/* ---------------------------------------------------------------------
   RPC client helpers
---------------------------------------------------------------------*/
fn rpc_call(url: &str, method: &str, params: Value) -> anyhow::Result<Value> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("client setup failed")?;
    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    let response = client
        .post(url)
        .json(&body)
        .send()
        .map_err(|e| CoreError::Unavailable(format!("rpc unreachable at {url}: {e}")))?;
    let envelope: Value = response
        .json()
        .map_err(|e| CoreError::Unavailable(format!("malformed rpc response: {e}")))?;
    if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
        bail!(
            "rpc error: {}",
            err.get("message").and_then(|m| m.as_str()).unwrap_or("unknown")
        );
    }
    Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
}

fn print_value(value: &Value, as_json: bool) {
    if as_json {
        println!("{}", serde_json::to_string(value).unwrap_or_default());
    } else {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

/* ---------------------------------------------------------------------
   Subcommands
---------------------------------------------------------------------*/
fn inspect_round(args: InspectRoundArgs) -> anyhow::Result<()> {
    let params = match args.round {
        Some(r) => json!([r]),
        None => json!([]),
    };
    let result = rpc_call(&args.rpc_url, "rand.getRound", params)?;
    print_value(&result, args.json);
    Ok(())
}

fn load_circuit(args: &EnqueueQuantumArgs) -> anyhow::Result<Value> {
    match (&args.circuit, &args.circuit_file) {
        (Some(inline), _) => serde_json::from_str(inline)
            .map_err(|e| UsageError(format!("--circuit is not valid JSON: {e}")).into()),
        (None, Some(path)) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| UsageError(format!("failed to read --circuit-file: {e}")))?;
            serde_json::from_str(&text)
                .map_err(|e| UsageError(format!("--circuit-file is not valid JSON: {e}")).into())
        }
        (None, None) => {
            Err(UsageError("provide either --circuit or --circuit-file".into()).into())
        }
    }
}

fn enqueue_quantum(args: EnqueueQuantumArgs) -> anyhow::Result<()> {
    let circuit = load_circuit(&args)?;
    let params = json!({
        "kind": "Quantum",
        "spec": { "circuit": circuit, "shots": args.shots },
        "attestation": { "source": "cli", "version": 1 },
        "submitter": args.submitter,
        "nonce": Utc::now().timestamp(),
    });
    let result = rpc_call(&args.rpc_url, "aicf.enqueueJob", params)?;
    print_value(&result, args.json);
    Ok(())
}

fn fees_suggest(args: SuggestArgs) -> anyhow::Result<()> {
    let result = rpc_call(&args.rpc_url, "fees.suggest", json!([]))?;
    print_value(&result, args.json);
    Ok(())
}
