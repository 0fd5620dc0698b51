//! orb-dispatch: drives the object-adapter dispatch core under load.
//!
//! Registers a persistent and a transient adapter, runs concurrent workers
//! through the remote, local and fast-local invocation patterns while an
//! administrative task cycles adapter states, then shuts the runtime down
//! and prints a summary.
//!
//! Usage:
//!   orb-dispatch                                 # Defaults: 4 workers, 200 calls each
//!   orb-dispatch --workers 16 --calls 1000       # Heavier run
//!   orb-dispatch --config dispatch.json          # Load DispatchConfig from JSON
//!   orb-dispatch --max-forwards 3 --verbose      # Override single settings

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use orb_protocol::{
    AdapterEvent, AdapterId, IdAssignment, ObjectReference, OrbError, Policy, RequestProcessing,
};
use orb_servants::demo::{CounterServant, EchoActivator, EchoServant};
use orb_servants::servant;
use orb_server::{
    AdapterFactory, ContextStack, DispatchConfig, Dispatcher, LocalStub, OrbRuntime, Request,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const SERVICES: AdapterId = AdapterId(1);
const SESSIONS: AdapterId = AdapterId(2);

#[derive(Parser, Debug)]
#[command(name = "orb-dispatch", about = "Object adapter dispatch driver")]
struct Cli {
    /// Dispatch configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Concurrent workers, each with its own context stack
    #[arg(long, default_value = "4")]
    workers: usize,

    /// Calls per worker
    #[arg(long, default_value = "200")]
    calls: usize,

    /// Override the forwarding limit
    #[arg(long)]
    max_forwards: Option<usize>,

    /// Seed for the per-worker call mix
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PatternStats {
    ok: u64,
    failed: u64,
}

#[derive(Debug, Default)]
struct Summary {
    remote: PatternStats,
    local: PatternStats,
    fast: PatternStats,
    forwards: u64,
    invalidations: usize,
}

impl Summary {
    fn merge(&mut self, other: &Summary) {
        for (mine, theirs) in [
            (&mut self.remote, other.remote),
            (&mut self.local, other.local),
            (&mut self.fast, other.fast),
        ] {
            mine.ok += theirs.ok;
            mine.failed += theirs.failed;
        }
        self.forwards += other.forwards;
        self.invalidations += other.invalidations;
    }
}

fn record(stats: &mut PatternStats, result: Result<(), OrbError>) {
    match result {
        Ok(()) => stats.ok += 1,
        Err(e) => {
            stats.failed += 1;
            tracing::debug!("call failed: {e}");
        }
    }
}

fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<DispatchConfig> {
    let mut config = match &cli.config {
        Some(path) => DispatchConfig::from_file(path)?,
        None => DispatchConfig::default(),
    };
    if let Some(max) = cli.max_forwards {
        config.max_forwards = max;
    }
    config.validate()?;
    Ok(config)
}

fn register_adapters(runtime: &OrbRuntime) -> anyhow::Result<()> {
    let services = AdapterFactory::persistent("services")
        .recreate_on_destroy(true)
        .on_create(|b| {
            b.activate_object_with_id("echo", servant(EchoServant::new()));
            b.activate_object_with_id("counter", servant(CounterServant::new()));
            b.forward_object("legacy-echo", ObjectReference::new(SERVICES, "echo"));
            Ok(())
        });
    runtime.register_adapter(SERVICES, services)?;

    let activator = Arc::new(EchoActivator::new("session-"));
    let sessions = AdapterFactory::transient("sessions")
        .recreate_on_destroy(true)
        .on_create(move |b| {
            b.set_policy(Policy::IdAssignment(IdAssignment::User))?;
            b.set_policy(Policy::RequestProcessing(RequestProcessing::UseServantManager))?;
            b.set_servant_manager(activator.clone());
            Ok(())
        });
    runtime.register_adapter(SESSIONS, sessions)?;
    Ok(())
}

async fn run_worker(dispatcher: Dispatcher, worker: usize, calls: usize, seed: u64) -> Summary {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(worker as u64));
    let mut stack = ContextStack::new();
    let mut counter = LocalStub::new(ObjectReference::new(SERVICES, "counter"));
    let mut summary = Summary::default();

    for i in 0..calls {
        match rng.random_range(0..3) {
            0 => {
                let target = if rng.random_bool(0.25) {
                    ObjectReference::new(SERVICES, "legacy-echo")
                } else {
                    ObjectReference::new(SERVICES, "echo")
                };
                let request = Request::new(target, "echo").with_args(json!({ "worker": worker, "call": i }));
                let result = dispatcher.invoke_remote(&mut stack, request).await.map(|reply| {
                    summary.forwards += reply.forwards as u64;
                });
                record(&mut summary.remote, result);
            }
            1 => {
                let session = format!("session-{}", rng.random_range(0..8));
                let request = Request::new(ObjectReference::new(SESSIONS, session), "ping");
                let result = dispatcher.invoke_local(&mut stack, request).await.map(|_| ());
                record(&mut summary.local, result);
            }
            _ => {
                let result = dispatcher
                    .invoke_stub(&mut stack, &mut counter, "increment", None)
                    .await
                    .map(|_| ());
                record(&mut summary.fast, result);
            }
        }
        if i % 32 == 0 {
            tokio::task::yield_now().await;
        }
    }

    if !stack.is_empty() {
        error!("Worker {} finished with {} contexts on its stack", worker, stack.depth());
    }
    summary.invalidations = counter.invalidations();
    summary
}

/// Cycle the session adapter through HOLDING and back, then destroy the
/// services adapter so workers exercise the destroyed-retry path.
async fn run_admin(runtime: Arc<OrbRuntime>) -> anyhow::Result<()> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    let sessions = runtime.registry().lookup(SESSIONS)?;
    sessions.hold()?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    sessions.activate()?;

    tokio::time::sleep(Duration::from_millis(5)).await;
    let services = runtime.registry().lookup(SERVICES)?;
    services.destroy();
    services
        .wait_for_completion(runtime.config().completion_timeout())
        .await?;
    info!("Services adapter drained after destroy");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = load_config(&cli)?;
    let runtime = Arc::new(OrbRuntime::new(config.clone())?);
    let events = Arc::new(Mutex::new(Vec::<AdapterEvent>::new()));
    let mut rx = runtime.subscribe();
    let collector = {
        let events = events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => events.lock().push(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!("Event collector lagged by {n}"),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    };

    register_adapters(&runtime)?;
    runtime.start()?;

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                    ORB Dispatch Driver                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Workers:       {}", cli.workers);
    println!("  Calls/worker:  {}", cli.calls);
    println!("  Max forwards:  {}", config.max_forwards);
    println!("  Endpoints:     {}", config.endpoints.len());
    println!();

    let dispatcher = Dispatcher::new(runtime.clone());
    let started = Instant::now();

    let admin = tokio::spawn(run_admin(runtime.clone()));
    let mut workers = Vec::with_capacity(cli.workers);
    for worker in 0..cli.workers {
        workers.push(tokio::spawn(run_worker(dispatcher.clone(), worker, cli.calls, cli.seed)));
    }

    let mut summary = Summary::default();
    for handle in workers {
        match handle.await {
            Ok(s) => summary.merge(&s),
            Err(e) => error!("Worker panicked: {e}"),
        }
    }
    match admin.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Admin task failed: {e:#}"),
        Err(e) => error!("Admin task panicked: {e}"),
    }
    let elapsed = started.elapsed();

    runtime.shutdown().await.context("runtime shutdown")?;
    // The channel stays open while the runtime lives; stop collecting here.
    collector.abort();

    let total = summary.remote.ok + summary.local.ok + summary.fast.ok;
    println!("  Remote:        {} ok, {} failed", summary.remote.ok, summary.remote.failed);
    println!("  Local:         {} ok, {} failed", summary.local.ok, summary.local.failed);
    println!("  Fast-local:    {} ok, {} failed", summary.fast.ok, summary.fast.failed);
    println!("  Forwards:      {}", summary.forwards);
    println!("  Invalidations: {}", summary.invalidations);
    println!("  Events:        {}", events.lock().len());
    println!("  Notifier errs: {}", runtime.notifier().failures());
    println!(
        "  Throughput:    {:.0} calls/s",
        total as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!();
    Ok(())
}
