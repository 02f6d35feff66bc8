//! Seams between the probe loop and the HTTP client.

use std::net::IpAddr;

use reqwest::Response;
use url::Url;

use crate::client::{ClientError, DnsError};
use crate::config::ProbeConfig;

/// Client operations the probe loop relies on.
///
/// # Error Handling
///
/// `get` only fails on transport errors; any HTTP status, including 4xx and
/// 5xx, is a successful observation and comes back as `Ok`.
#[async_trait::async_trait]
pub trait ProbeClient: Send + Sync + 'static {
    /// Issue a GET request for `url`.
    async fn get(&self, url: &Url) -> Result<Response, ClientError>;

    /// Resolve `host` with the client's resolver.
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;

    /// Drop all idle pooled connections, keeping the client configuration.
    fn evict_idle_connections(&mut self);
}

/// Builds probe clients from configuration.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: ProbeClient;

    /// Build a fully configured client.
    fn build(&self, config: &ProbeConfig) -> Result<Self::Client, ClientError>;
}

#[cfg(test)]
mockall::mock! {
    pub Client {}

    #[async_trait::async_trait]
    impl ProbeClient for Client {
        async fn get(&self, url: &Url) -> Result<Response, ClientError>;
        async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
        fn evict_idle_connections(&mut self);
    }
}
