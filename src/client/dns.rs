//! DNS resolution for the probe client.
//!
//! - [`DnsResolver`]: lookup abstraction shared by reqwest and the DNS check
//! - [`SystemResolver`]: platform resolver (`getaddrinfo` via tokio)
//! - [`ObservedResolver`]: reqwest adapter reporting lookups to an [`EventListener`]

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;

use super::events::{CallTracker, EventListener, report_connect_start};

/// DNS resolution errors.
#[derive(Debug, Error)]
pub enum DnsError {
    /// The resolver failed (unknown host, resolver unreachable...).
    #[error("failed to resolve {host}: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// The resolver answered without any address.
    #[error("no addresses found for {0}")]
    NoAddresses(String),
}

/// Resolves host names to IP addresses.
#[async_trait::async_trait]
pub trait DnsResolver: Send + Sync + 'static {
    /// Resolve `host` to its addresses.
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
}

#[cfg(test)]
mockall::mock! {
    pub Resolver {}

    #[async_trait::async_trait]
    impl DnsResolver for Resolver {
        async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
    }
}

/// Platform resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait::async_trait]
impl DnsResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|source| DnsError::Lookup {
                host: host.to_string(),
                source,
            })?;

        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }

        if ips.is_empty() {
            return Err(DnsError::NoAddresses(host.to_string()));
        }
        Ok(ips)
    }
}

/// reqwest resolver that delegates to a [`DnsResolver`] and reports
/// `dns_start`/`dns_end` to the listener.
///
/// When the name is the peer of the in-flight call, `connect_start` follows
/// `dns_end` with the first resolved address.
pub struct ObservedResolver {
    inner: Arc<dyn DnsResolver>,
    listener: Arc<dyn EventListener>,
    tracker: Arc<CallTracker>,
}

impl ObservedResolver {
    pub fn new(
        inner: Arc<dyn DnsResolver>,
        listener: Arc<dyn EventListener>,
        tracker: Arc<CallTracker>,
    ) -> Self {
        Self {
            inner,
            listener,
            tracker,
        }
    }
}

impl Resolve for ObservedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_name(
            Arc::clone(&self.inner),
            Arc::clone(&self.listener),
            Arc::clone(&self.tracker),
            name,
        ))
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn resolve_name(
    inner: Arc<dyn DnsResolver>,
    listener: Arc<dyn EventListener>,
    tracker: Arc<CallTracker>,
    name: Name,
) -> Result<Addrs, BoxError> {
    let ips = lookup_observed(inner.as_ref(), listener.as_ref(), name.as_str()).await?;
    announce_connect(listener.as_ref(), &tracker, name.as_str(), &ips);

    // Port is filled in by the connector from the request URI.
    let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
    Ok(addrs)
}

/// Report `connect_start` for `host` if it is the peer of the in-flight call.
fn announce_connect(
    listener: &dyn EventListener,
    tracker: &CallTracker,
    host: &str,
    ips: &[IpAddr],
) {
    let (Some(route), Some(&ip)) = (tracker.current_route(), ips.first()) else {
        return;
    };
    if route.peer_host().eq_ignore_ascii_case(host) {
        report_connect_start(listener, tracker, &route, ip);
    }
}

/// Resolve `host`, reporting start and (on success) end to the listener.
pub(crate) async fn lookup_observed(
    resolver: &dyn DnsResolver,
    listener: &dyn EventListener,
    host: &str,
) -> Result<Vec<IpAddr>, DnsError> {
    listener.dns_start(host);
    let ips = resolver.lookup(host).await?;
    listener.dns_end(host, &ips);
    Ok(ips)
}
