//! meshwire load driver.
//!
//! Spawns execution units on dedicated threads, routes them under one
//! service and pushes requests through the coordinator.
//!
//! ```text
//!                 ┌──────────────┐
//!   requests ───▶ │ Coordinator  │──port──▶ unit-1 (thread + runtime, Wire)
//!                 │ route table  │──port──▶ unit-2
//!                 │ round robin  │──port──▶ unit-N
//!                 └──────────────┘
//! ```

use clap::Parser;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Instant;

use axum::http::{header::CONTENT_TYPE, HeaderValue};
use meshwire::config::load_config;
use meshwire::lifecycle::{wait_for_signal, Shutdown};
use meshwire::observability::{logging::init_logging, metrics};
use meshwire::transport;
use meshwire::{BoxError, Coordinator, MeshConfig, MeshRequest, MeshResponse, Server, Wire};

const SERVICE: &str = "echo";

#[derive(Parser, Debug)]
#[command(name = "meshwire", version, about = "In-process service mesh load driver")]
struct Args {
    /// Execution units to spawn.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Requests to send through the mesh.
    #[arg(long, default_value_t = 10_000)]
    requests: usize,

    /// Requests in flight at once.
    #[arg(long, default_value_t = 64)]
    concurrency: usize,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn spawn_unit(index: usize, port: transport::Port, config: MeshConfig, shutdown: &Shutdown) -> std::io::Result<JoinHandle<()>> {
    let mut stop = shutdown.subscribe();
    std::thread::Builder::new()
        .name(format!("unit-{index}"))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build unit runtime");
                    return;
                }
            };
            runtime.block_on(async move {
                let server = Server::handler(move |request: MeshRequest| async move {
                    let body = serde_json::to_vec(&json!({
                        "worker": index,
                        "path": request.path,
                    }))?;
                    Ok::<_, BoxError>(
                        MeshResponse::ok(body)
                            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json")),
                    )
                });
                let wire = Wire::new(port, server, config);
                let _ = stop.recv().await;
                wire.close().await;
            });
        })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => MeshConfig::default(),
    };
    init_logging(&config.observability)?;
    metrics::set_enabled(config.observability.metrics_enabled);

    tracing::info!(
        workers = args.workers,
        requests = args.requests,
        concurrency = args.concurrency,
        "meshwire v0.1.0 starting"
    );

    let coordinator = Coordinator::new(config.clone());
    coordinator.on_error(|err| tracing::warn!(code = err.code(), "Mesh degraded: {}", err));

    let shutdown = Shutdown::new();
    let mut units = Vec::with_capacity(args.workers);
    let mut ports = Vec::with_capacity(args.workers);
    for index in 0..args.workers {
        let (coordinator_side, unit_side) = transport::unit();
        units.push(spawn_unit(index, unit_side, config.clone(), &shutdown)?);
        ports.push(coordinator_side);
    }
    coordinator.add_route(SERVICE, ports, None).await?;
    tracing::info!(routes = ?coordinator.routes(), "Units routed");

    let mut interrupted = shutdown.subscribe();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let started = Instant::now();
    let mut per_worker: BTreeMap<u64, usize> = BTreeMap::new();
    let mut errors: BTreeMap<&'static str, usize> = BTreeMap::new();

    let mut responses = stream::iter(0..args.requests)
        .map(|i| {
            let coordinator = coordinator.clone();
            async move {
                let response = coordinator
                    .dispatch(SERVICE, MeshRequest::get(format!("/item/{i}")))
                    .await?;
                let body = response.body.collect().await?;
                Ok::<_, meshwire::MeshError>(serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null))
            }
        })
        .buffer_unordered(args.concurrency.max(1));

    loop {
        tokio::select! {
            next = responses.next() => match next {
                Some(Ok(body)) => {
                    let worker = body.get("worker").and_then(Value::as_u64).unwrap_or(u64::MAX);
                    *per_worker.entry(worker).or_default() += 1;
                }
                Some(Err(err)) => *errors.entry(err.code()).or_default() += 1,
                None => break,
            },
            _ = interrupted.recv() => {
                tracing::info!("Interrupted, closing mesh");
                break;
            }
        }
    }
    drop(responses);

    let elapsed = started.elapsed();
    let completed: usize = per_worker.values().sum();
    tracing::info!(
        completed,
        failed = errors.values().sum::<usize>(),
        elapsed_ms = elapsed.as_millis() as u64,
        rps = (completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON)) as u64,
        "Run finished"
    );
    for (worker, count) in &per_worker {
        tracing::info!(worker, count, "Requests served");
    }
    for (code, count) in &errors {
        tracing::warn!(code, count, "Requests failed");
    }

    let closed = coordinator.close().await;
    shutdown.trigger();
    for unit in units {
        if unit.join().is_err() {
            tracing::error!("Unit thread panicked");
        }
    }
    closed?;

    tracing::info!("Shutdown complete");
    Ok(())
}
