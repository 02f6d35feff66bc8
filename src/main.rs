//! connprobe Binary Entry Point
//!
//! Runs the probe loop against the URL given on the command line until
//! interrupted. Core functionality is provided by the `connprobe` library crate.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;
use connprobe::{
    HttpClientFactory, ProbeRunner,
    config::{ProbeSettings, parse_duration},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// connprobe - Recurring HTTP Connectivity Probe
#[derive(Parser, Debug)]
#[command(name = "connprobe", version, about, long_about = None)]
struct Cli {
    /// Target URL to probe
    url: String,

    /// Path to an optional YAML settings file
    #[arg(short, long, env = "PROBE_CONFIG")]
    config: Option<String>,

    /// Pause between probe cycles, in milliseconds
    #[arg(long, env = "PROBE_REQUEST_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Upstream HTTP proxy host
    #[arg(long, env = "PROBE_PROXY_HOST")]
    proxy_host: Option<String>,

    /// Upstream HTTP proxy port
    #[arg(long, env = "PROBE_PROXY_PORT")]
    proxy_port: Option<u16>,

    /// Build a new client every cycle instead of evicting pooled connections
    #[arg(long, env = "PROBE_RECREATE_CLIENTS")]
    recreate_clients: Option<bool>,

    /// Basic-auth user
    #[arg(long, env = "TEST_USER")]
    user: Option<String>,

    /// Basic-auth password
    #[arg(long, env = "TEST_PASS", hide_env_values = true)]
    password: Option<String>,

    /// TCP connect timeout (e.g. "10s")
    #[arg(long, env = "PROBE_CONNECT_TIMEOUT", value_parser = parse_duration)]
    connect_timeout: Option<Duration>,

    /// Whole-request timeout (e.g. "30s")
    #[arg(long, env = "PROBE_REQUEST_TIMEOUT", value_parser = parse_duration)]
    request_timeout: Option<Duration>,

    /// Local address outgoing sockets bind to
    #[arg(long, env = "PROBE_LOCAL_ADDRESS")]
    local_address: Option<IpAddr>,

    /// Stop after this many cycles
    #[arg(long, env = "PROBE_MAX_CYCLES")]
    max_cycles: Option<u64>,
}

impl Cli {
    /// Apply CLI/env overrides on top of the file settings.
    fn apply(self, settings: &mut ProbeSettings) {
        if let Some(ms) = self.interval_ms {
            settings.interval = Some(Duration::from_millis(ms));
        }
        if self.proxy_host.is_some() {
            settings.proxy_host = self.proxy_host;
        }
        if self.proxy_port.is_some() {
            settings.proxy_port = self.proxy_port;
        }
        if self.recreate_clients.is_some() {
            settings.recreate_clients = self.recreate_clients;
        }
        if self.user.is_some() {
            settings.username = self.user;
        }
        if self.password.is_some() {
            settings.password = self.password;
        }
        if self.connect_timeout.is_some() {
            settings.connect_timeout = self.connect_timeout;
        }
        if self.request_timeout.is_some() {
            settings.request_timeout = self.request_timeout;
        }
        if self.local_address.is_some() {
            settings.local_address = self.local_address;
        }
        if self.max_cycles.is_some() {
            settings.max_cycles = self.max_cycles;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load settings file, then apply CLI/env overrides (CLI > ENV > file)
    let mut settings = match cli.config {
        Some(ref path) => {
            tracing::info!("Loading settings from: {}", path);
            ProbeSettings::load(path)?
        }
        None => ProbeSettings::default(),
    };
    let url = cli.url.clone();
    cli.apply(&mut settings);

    let config = settings.into_config(&url)?;
    tracing::info!(
        "Probing {} every {}",
        config.target_url,
        humantime::format_duration(config.interval)
    );

    let mut runner = ProbeRunner::new(config, HttpClientFactory::default())?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let cycles = runner.run(shutdown).await;

    tracing::info!(cycles, "Shutdown complete");
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    shutdown.cancel();
}
