//! The probe loop.

use tokio_util::sync::CancellationToken;

use super::traits::{ClientFactory, ProbeClient};
use crate::client::{ClientError, error_chain};
use crate::config::ProbeConfig;

/// Drives the `PROBE → DNS_CHECK → SLEEP → REFRESH_CLIENT` cycle.
///
/// The runner owns exactly one client at a time. Every failure inside a cycle
/// is logged and absorbed; only building the first client can fail.
pub struct ProbeRunner<F: ClientFactory> {
    config: ProbeConfig,
    factory: F,
    client: F::Client,
}

impl<F: ClientFactory> ProbeRunner<F> {
    /// Build the initial client.
    ///
    /// # Errors
    /// Returns the factory error when the first client cannot be built.
    pub fn new(config: ProbeConfig, factory: F) -> Result<Self, ClientError> {
        let client = factory.build(&config)?;

        tracing::info!(
            url = %config.target_url,
            interval = ?config.interval,
            proxy = ?config.proxy.as_ref().map(ToString::to_string),
            auth = config.credentials.is_some(),
            recreate_clients = config.recreate_clients,
            "Probe initialized"
        );

        Ok(Self {
            config,
            factory,
            client,
        })
    }

    /// Run cycles until `shutdown` is cancelled or `max_cycles` is reached.
    ///
    /// Cancellation is observed while sleeping; a cycle already issuing its
    /// request runs to the sleep first. Returns the number of completed cycles.
    pub async fn run(&mut self, shutdown: CancellationToken) -> u64 {
        let mut completed: u64 = 0;

        while !shutdown.is_cancelled() {
            self.probe_target().await;
            self.check_dns().await;

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(cycles = completed, "Stop signal received");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }

            self.refresh_client();
            completed += 1;

            if self.config.max_cycles.is_some_and(|max| completed >= max) {
                tracing::info!(cycles = completed, "Reached maximum number of cycles");
                break;
            }
        }

        completed
    }

    /// Issue the GET request and log its outcome.
    ///
    /// Any HTTP status is an observation. Only transport failures and body
    /// read failures are logged as errors.
    pub async fn probe_target(&self) {
        let url = &self.config.target_url;

        let response = match self.client.get(url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(url = %url, error = %error_chain(&e), "Failure executing request");
                return;
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) if body.is_empty() => tracing::info!(status, "Empty body"),
            Ok(body) => tracing::info!(status, "{}", body),
            Err(e) => {
                tracing::error!(url = %url, error = %error_chain(&e), "Could not retrieve body")
            }
        }
    }

    /// Resolve the target host, then the proxy host when proxying.
    pub async fn check_dns(&self) {
        self.lookup(&self.config.target_host()).await;

        if let Some(ref proxy) = self.config.proxy {
            self.lookup(&proxy.host).await;
        }
    }

    async fn lookup(&self, host: &str) {
        tracing::info!("Lookup DNS for {}", host);

        match self.client.lookup(host).await {
            Ok(addresses) => {
                for ip in addresses {
                    tracing::info!("  {}/{}", host, ip);
                }
            }
            Err(e) => {
                tracing::error!(error = %error_chain(&e), "Failure looking up {}", host);
            }
        }
    }

    /// Replace the client or evict its pooled connections.
    pub fn refresh_client(&mut self) {
        if !self.config.recreate_clients {
            self.client.evict_idle_connections();
            return;
        }

        match self.factory.build(&self.config) {
            Ok(client) => {
                self.client = client;
                tracing::debug!("Probe client recreated");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to recreate probe client, keeping current one");
            }
        }
    }
}
