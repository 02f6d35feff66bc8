//! connprobe - Recurring HTTP Connectivity Probe
//!
//! Periodically issues a GET request against a target URL and logs everything
//! an operator needs to diagnose intermittent network, proxy, DNS or TLS
//! trouble: request and response headers with timing, the response body,
//! socket and connection events, and a DNS lookup of the target and proxy
//! hosts after every request.
//!
//! # Architecture
//!
//! - **Config**: CLI, environment and YAML settings merged into a [`ProbeConfig`]
//! - **Client**: `reqwest` with middleware, a connector layer and a DNS adapter
//! - **Probe**: the cancellable `PROBE → DNS_CHECK → SLEEP → REFRESH_CLIENT` loop
//!
//! # Example
//!
//! ```rust,no_run
//! use connprobe::{HttpClientFactory, ProbeConfig, ProbeRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = ProbeConfig::parse_target("https://ci.example.com/login")?;
//! let config = ProbeConfig::new(url).with_max_cycles(3);
//!
//! let mut runner = ProbeRunner::new(config, HttpClientFactory::default())?;
//! runner.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod probe;

pub use client::{ClientError, HttpClientFactory, HttpProbeClient, ProbeClientBuilder};
pub use config::{ConfigError, ProbeConfig, ProbeSettings};
pub use probe::{ClientFactory, ProbeClient, ProbeRunner};
