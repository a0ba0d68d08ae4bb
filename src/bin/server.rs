//! Demo kv-udf server binary
//!
//! Run with: cargo run --bin kv-server -- --help

use anyhow::Result;
use clap::Parser;
use kv_udf::server::{run_server, KvUdfServer, ServerConfig};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "kv-server")]
#[command(about = "In-memory record store with sample UDFs")]
struct Args {
    /// Server node ID
    #[arg(long, default_value = "0")]
    node_id: u32,

    /// gRPC listen address
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen_addr: String,

    /// Required username (anonymous when omitted)
    #[arg(long)]
    user: Option<String>,

    /// Required password
    #[arg(long)]
    password: Option<String>,

    /// JSON file of records to load at startup
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of worker threads for processing requests
    #[arg(long, default_value = "4")]
    worker_threads: usize,
}

/// Sample UDFs so the server is usable out of the box.
fn register_sample_udfs(server: &KvUdfServer) {
    // returns its arguments unchanged
    server.register_udf("examples", "echo", |_record, args| {
        Ok(Value::Array(args.to_vec()))
    });

    // returns the bin named by the first argument
    server.register_udf("records", "bin", |record, args| {
        let name = args
            .first()
            .and_then(Value::as_str)
            .ok_or("bin name required")?;
        record
            .bin(name)
            .cloned()
            .ok_or_else(|| format!("no bin {}", name))
    });

    // returns every bin of the record
    server.register_udf("records", "get", |record, _args| {
        Ok(Value::Object(record.bins.clone()))
    });

    // sums its numeric arguments
    server.register_udf("math", "add", |_record, args| {
        let mut total = 0.0;
        for arg in args {
            total += arg.as_f64().ok_or_else(|| format!("not a number: {}", arg))?;
        }
        Ok(Value::from(total))
    });
}

async fn run_with_config(args: Args) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let config = ServerConfig {
        node_id: args.node_id,
        user: args.user.clone(),
        password: args.password.clone(),
    };

    let server = KvUdfServer::new(config);
    register_sample_udfs(&server);

    if let Some(seed) = &args.seed {
        let count = server.seed_from_file(seed)?;
        tracing::info!("Seeded {} records from {}", count, seed.display());
    }

    tracing::info!("Listen address: {}", args.listen_addr);
    tracing::info!("Node ID: {}", args.node_id);
    tracing::info!("Auth: {}", if args.user.is_some() { "required" } else { "anonymous" });

    run_server(server, &args.listen_addr).await
}

fn main() -> Result<()> {
    let args = Args::parse();
    let worker_threads = args.worker_threads;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?
        .block_on(run_with_config(args))
}
