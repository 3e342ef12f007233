//! dnsmux - Entry point.
//!
//! Loads configuration from an optional TOML file and command-line flags,
//! binds the UDP listener and serves until Ctrl-C.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dnsmux::config::{Config, ConfigOverrides};
use dnsmux::dns::{Failover, UpstreamResolver};
use dnsmux::server::{Listener, QueryHandler};

#[derive(Parser)]
#[command(name = "dnsmux")]
#[command(version)]
#[command(about = "DNS forwarder with domain-suffix overrides and ordered upstream failover")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<String>,

    /// Comma-separated list of DNS servers in priority order
    #[arg(long)]
    servers: Option<String>,

    /// Comma-separated list of domain=ip mappings (e.g. '.docker=172.168.1.1,.test=192.168.1.1')
    #[arg(long)]
    domains: Option<String>,

    /// Timeout for a single upstream exchange, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// Build the effective configuration: file values first, then flags.
    fn load_config(&self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::default(),
        };

        let overrides = ConfigOverrides {
            listen: self.listen.clone(),
            servers: self.servers.clone(),
            domains: self.domains.clone(),
            upstream_timeout_ms: self.timeout_ms,
        };
        let config = config
            .apply_overrides(&overrides)
            .context("Invalid configuration")?;
        Ok(config)
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;

    dnsmux::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    let listen_addr = config.listen_addr()?;
    let timeout = config.upstream_timeout();
    let upstreams: Vec<UpstreamResolver> = config
        .upstream_addrs()?
        .into_iter()
        .map(|addr| UpstreamResolver::new(addr).with_timeout(timeout))
        .collect();
    let overrides = config.override_table();

    info!("Starting DNS proxy on {}", listen_addr);
    info!("DNS servers (in priority order):");
    for (i, upstream) in upstreams.iter().enumerate() {
        info!("  {}. {}", i + 1, upstream);
    }
    info!("Domain mappings:");
    for entry in overrides.iter() {
        info!("  {} -> {}", entry.suffix, entry.target);
    }
    for entry in overrides.malformed() {
        warn!(
            "Mapping {} -> {} is not an IP address, matching queries will get SERVFAIL",
            entry.suffix, entry.target
        );
    }

    let listener = Listener::bind(listen_addr)
        .await
        .context("Failed to start DNS proxy")?;
    let handler = QueryHandler::new(overrides, Failover::new(upstreams));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down...");
        }
        result = listener.run(handler) => {
            result.context("DNS listener stopped")?;
        }
    }

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);
    run(cli).await
}
