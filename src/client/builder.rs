//! Probe client construction.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Response;
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use super::auth::{AuthMiddleware, Authenticator, BasicAuthenticator};
use super::dns::{DnsError, DnsResolver, ObservedResolver, SystemResolver};
use super::error::ClientError;
use super::events::{CallTracker, ConnectionLogger, EventListener};
use super::interceptor::LoggingInterceptor;
use super::proxy::{FixedProxySelector, ProxySelector, into_reqwest_proxy};
use super::redirect::RedirectMiddleware;
use super::socket::LoggingConnectorLayer;
use crate::config::ProbeConfig;
use crate::probe::{ClientFactory, ProbeClient};

/// Builder for [`HttpProbeClient`].
///
/// Each hook is optional and driven by the configuration: Basic auth when
/// credentials are set, a fixed proxy when a proxy is set. Logging
/// interceptors, the socket logging layer and the event listener are always
/// installed.
pub struct ProbeClientBuilder {
    config: ProbeConfig,
    resolver: Arc<dyn DnsResolver>,
    listener: Arc<dyn EventListener>,
}

impl ProbeClientBuilder {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            config: config.clone(),
            resolver: Arc::new(SystemResolver),
            listener: Arc::new(ConnectionLogger),
        }
    }

    /// Use a custom DNS resolver.
    pub fn resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Use a custom connection/DNS event listener.
    pub fn event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Build the client.
    ///
    /// # Errors
    /// Returns `ClientError` if the credentials or proxy address are unusable
    /// or the TLS backend cannot be initialized.
    pub fn build(self) -> Result<HttpProbeClient, ClientError> {
        let authenticator = match self.config.credentials {
            Some(ref credentials) => {
                Some(Arc::new(BasicAuthenticator::new(credentials)?) as Arc<dyn Authenticator>)
            }
            None => None,
        };

        let proxy_selector = match self.config.proxy {
            Some(ref proxy) => {
                Some(Arc::new(FixedProxySelector::new(proxy)?) as Arc<dyn ProxySelector>)
            }
            None => None,
        };

        let parts = ClientParts {
            connect_timeout: self.config.connect_timeout,
            request_timeout: self.config.request_timeout,
            local_address: self.config.local_address,
            authenticator,
            proxy_selector,
            resolver: self.resolver,
            listener: self.listener,
            tracker: Arc::new(CallTracker::default()),
        };
        let http = parts.assemble()?;

        tracing::debug!(
            auth = parts.authenticator.is_some(),
            proxy = parts.proxy_selector.is_some(),
            local_address = ?parts.local_address,
            "Probe client built"
        );

        Ok(HttpProbeClient { parts, http })
    }
}

/// Everything needed to (re)assemble the middleware stack.
struct ClientParts {
    connect_timeout: Duration,
    request_timeout: Duration,
    local_address: Option<IpAddr>,
    authenticator: Option<Arc<dyn Authenticator>>,
    proxy_selector: Option<Arc<dyn ProxySelector>>,
    resolver: Arc<dyn DnsResolver>,
    listener: Arc<dyn EventListener>,
    tracker: Arc<CallTracker>,
}

impl ClientParts {
    /// Assemble a reqwest client with a fresh connection pool and wrap it in
    /// the interceptor chain: application logging, redirects, auth follow-up,
    /// network logging.
    fn assemble(&self) -> Result<ClientWithMiddleware, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .local_address(self.local_address)
            .redirect(reqwest::redirect::Policy::none())
            .dns_resolver(Arc::new(ObservedResolver::new(
                Arc::clone(&self.resolver),
                Arc::clone(&self.listener),
                Arc::clone(&self.tracker),
            )))
            .connector_layer(LoggingConnectorLayer::new(
                Arc::clone(&self.listener),
                Arc::clone(&self.tracker),
                self.local_address,
            ));

        builder = match self.proxy_selector {
            Some(ref selector) => builder.proxy(into_reqwest_proxy(Arc::clone(selector))),
            None => builder.no_proxy(),
        };

        let client = builder.build()?;

        let mut stack = reqwest_middleware::ClientBuilder::new(client)
            .with(LoggingInterceptor::application())
            .with(RedirectMiddleware::default());
        if let Some(ref authenticator) = self.authenticator {
            stack = stack.with(AuthMiddleware::new(Arc::clone(authenticator)));
        }
        Ok(stack
            .with(LoggingInterceptor::network(
                Arc::clone(&self.tracker),
                Arc::clone(&self.listener),
                self.proxy_selector.clone(),
            ))
            .build())
    }
}

/// HTTP client used by the probe loop.
pub struct HttpProbeClient {
    parts: ClientParts,
    http: ClientWithMiddleware,
}

impl HttpProbeClient {
    /// Whether Basic auth is installed.
    pub fn has_authenticator(&self) -> bool {
        self.parts.authenticator.is_some()
    }

    /// The proxy selector, when a proxy is configured.
    pub fn proxy_selector(&self) -> Option<&Arc<dyn ProxySelector>> {
        self.parts.proxy_selector.as_ref()
    }
}

impl std::fmt::Debug for HttpProbeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProbeClient")
            .field("auth", &self.has_authenticator())
            .field("proxy", &self.parts.proxy_selector.is_some())
            .field("local_address", &self.parts.local_address)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl ProbeClient for HttpProbeClient {
    async fn get(&self, url: &Url) -> Result<Response, ClientError> {
        Ok(self.http.get(url.clone()).send().await?)
    }

    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        self.parts.resolver.lookup(host).await
    }

    fn evict_idle_connections(&mut self) {
        match self.parts.assemble() {
            Ok(http) => {
                // Dropping the previous client closes its pooled connections.
                self.http = http;
                tracing::debug!("Evicted pooled connections");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to reset connection pool, keeping current one");
            }
        }
    }
}

/// Factory producing [`HttpProbeClient`]s.
#[derive(Clone)]
pub struct HttpClientFactory {
    resolver: Arc<dyn DnsResolver>,
    listener: Arc<dyn EventListener>,
}

impl Default for HttpClientFactory {
    fn default() -> Self {
        Self {
            resolver: Arc::new(SystemResolver),
            listener: Arc::new(ConnectionLogger),
        }
    }
}

impl HttpClientFactory {
    /// Use a custom DNS resolver for every client built.
    pub fn with_resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Use a custom event listener for every client built.
    pub fn with_event_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }
}

impl ClientFactory for HttpClientFactory {
    type Client = HttpProbeClient;

    fn build(&self, config: &ProbeConfig) -> Result<HttpProbeClient, ClientError> {
        ProbeClientBuilder::new(config)
            .resolver(Arc::clone(&self.resolver))
            .event_listener(Arc::clone(&self.listener))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Credentials, ProxyConfig};

    fn config() -> ProbeConfig {
        ProbeConfig::new(Url::parse("http://example.test/").unwrap())
    }

    #[test]
    fn test_build_plain_client() {
        let client = ProbeClientBuilder::new(&config()).build().unwrap();
        assert!(!client.has_authenticator());
        assert!(client.proxy_selector().is_none());
    }

    #[test]
    fn test_build_with_auth_and_proxy() {
        let config = config()
            .with_credentials(Credentials::from_parts(Some("alice"), Some("s3cret")).unwrap())
            .with_proxy(ProxyConfig {
                host: "squid.internal".to_string(),
                port: 3128,
            })
            .with_local_address("127.0.0.1".parse().unwrap());

        let client = ProbeClientBuilder::new(&config).build().unwrap();
        assert!(client.has_authenticator());

        let selected = client
            .proxy_selector()
            .unwrap()
            .select(&Url::parse("https://elsewhere.test/").unwrap());
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].host, "squid.internal");
        assert_eq!(selected[0].port, 3128);
    }

    #[test]
    fn test_invalid_proxy_fails_build() {
        let config = config().with_proxy(ProxyConfig {
            host: "bad host".to_string(),
            port: 3128,
        });
        let err = ProbeClientBuilder::new(&config).build().unwrap_err();
        assert!(matches!(err, ClientError::Proxy(_)));
    }

    #[tokio::test]
    async fn test_lookup_uses_configured_resolver() {
        let mut resolver = crate::client::dns::MockResolver::new();
        resolver
            .expect_lookup()
            .withf(|host| host == "example.test")
            .times(1)
            .returning(|_| Ok(vec!["192.0.2.7".parse().unwrap()]));

        let client = HttpClientFactory::default()
            .with_resolver(Arc::new(resolver))
            .build(&config())
            .unwrap();

        let ips = client.lookup("example.test").await.unwrap();
        assert_eq!(ips, vec!["192.0.2.7".parse::<IpAddr>().unwrap()]);
    }

    #[test]
    fn test_evict_keeps_configuration() {
        let config = config()
            .with_credentials(Credentials::from_parts(Some("alice"), Some("s3cret")).unwrap());
        let mut client = ProbeClientBuilder::new(&config).build().unwrap();

        client.evict_idle_connections();
        client.evict_idle_connections();

        assert!(client.has_authenticator());
    }
}
