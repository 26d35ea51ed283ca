//! `ppgi` — runs one side of a privacy-preserving graph intersection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{bail, WrapErr};
use ppgi_core::blind::RsaBlindEngine;
use ppgi_core::graph::memory::MemoryGraph;
use ppgi_core::graph::GraphSchema;
use ppgi_core::kv::MemoryKv;
use ppgi_core::runtime::{IntersectionRuntime, Role, RuntimeOptions};
use ppgi_core::transport::tcp::{self, TcpAcceptor};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

const PEER_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Parser)]
#[command(name = "ppgi", version, about = "Privacy-preserving graph intersection daemon")]
struct Cli {
    /// Configuration file.
    #[arg(short = 'c', long = "config", default_value = "ppgi.yaml")]
    config: PathBuf,
    /// Show verbose information.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    init_logging(config.log_file.as_deref(), cli.verbose)?;

    let schema = GraphSchema::from_yaml_file(&config.graph.graph_definition)?;

    if config.algorithm.kind != "rsa" {
        bail!("unsupported algorithm type: {}", config.algorithm.kind);
    }
    let mut engine =
        RsaBlindEngine::new(config.algorithm.first_hash, config.algorithm.second_hash);
    if config.role == Role::Host {
        info!(bits = config.algorithm.key_bits, "generating RSA keypair");
        engine.generate_keypair(config.algorithm.key_bits)?;
    }

    let kv = match config.kv.kind.as_str() {
        "memory" => MemoryKv::new(),
        other => bail!("unsupported kv type: {other} (this build provides: memory)"),
    };

    if !config.graph.address.is_empty() {
        bail!(
            "graph driver for {}:{} is not built in; leave graph.address empty to use the in-memory store",
            config.graph.address,
            config.graph.port
        );
    }
    let graph = MemoryGraph::new(config.neighbor_hops());
    if let Some(path) = &config.graph.data_file {
        graph.load_file(path)?;
        info!(file = %path.display(), "graph seeded from fixture");
    }

    let (producer, consumer) = match config.mq.kind.as_str() {
        "tcp" => match config.role {
            Role::Host => {
                let acceptor = TcpAcceptor::bind(&config.mq.url).await?;
                info!(addr = %config.mq.url, "waiting for peer");
                acceptor.accept().await?
            }
            Role::Client => tcp::connect(&config.mq.url, PEER_RETRY_INTERVAL).await?,
        },
        other => bail!("unsupported mq type: {other} (this build provides: tcp)"),
    };

    let runtime = IntersectionRuntime::new(
        RuntimeOptions {
            role: config.role,
            fetch_interval: Duration::from_secs(config.graph.fetch_interval),
            conn_timeout: Duration::from_secs(config.conn_timeout),
        },
        engine,
        producer,
        kv,
        graph,
        schema,
    );
    runtime
        .run(consumer)
        .await
        .wrap_err("intersection runtime stopped")
}

/// One fmt layer to stdout, plus one to the configured log file.
fn init_logging(log_file: Option<&Path>, verbose: bool) -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let stdout_layer = tracing_subscriber::fmt::layer();
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file)),
                )
                .try_init()
        }
        None => tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .try_init(),
    }
    .map_err(|e| eyre::eyre!("installing logger: {e}"))
}
