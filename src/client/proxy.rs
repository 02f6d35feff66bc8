//! Proxy selection.

use std::fmt::Display;
use std::sync::Arc;

use url::Url;

use super::error::error_chain;
use crate::config::ProxyConfig;

/// A single HTTP proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
}

impl ProxyTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Proxy URL in `http://host:port` form.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        ProxyConfig {
            host: self.host.clone(),
            port: self.port,
        }
        .url()
    }
}

impl Display for ProxyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP @ {}:{}", self.host, self.port)
    }
}

/// Chooses the proxies a request URL goes through.
pub trait ProxySelector: Send + Sync + 'static {
    /// Proxies to use for `url`, in preference order. Empty means direct.
    fn select(&self, url: &Url) -> Vec<ProxyTarget>;

    /// Called when connecting through `proxy` for `url` failed.
    fn connect_failed(&self, url: &Url, proxy: &ProxyTarget, error: &dyn std::error::Error);
}

/// Selector that sends every request through one fixed proxy.
///
/// There is no fallback to a direct connection when the proxy is unreachable.
#[derive(Debug, Clone)]
pub struct FixedProxySelector {
    proxy: ProxyTarget,
}

impl FixedProxySelector {
    /// Create a selector for the configured proxy.
    ///
    /// # Errors
    /// Returns the URL parse error if host and port do not form a proxy URL.
    pub fn new(config: &ProxyConfig) -> Result<Self, url::ParseError> {
        config.url()?;
        Ok(Self {
            proxy: ProxyTarget::new(config.host.clone(), config.port),
        })
    }

    /// The proxy every request goes through.
    pub fn proxy(&self) -> &ProxyTarget {
        &self.proxy
    }
}

impl ProxySelector for FixedProxySelector {
    fn select(&self, _url: &Url) -> Vec<ProxyTarget> {
        vec![self.proxy.clone()]
    }

    fn connect_failed(&self, url: &Url, proxy: &ProxyTarget, error: &dyn std::error::Error) {
        tracing::warn!(
            url = %url,
            proxy = %proxy,
            error = %error_chain(error),
            "Proxy connection failed"
        );
    }
}

/// Adapt a selector to reqwest's custom proxy hook.
///
/// reqwest takes one proxy per request, so the first selected proxy is used.
pub(crate) fn into_reqwest_proxy(selector: Arc<dyn ProxySelector>) -> reqwest::Proxy {
    reqwest::Proxy::custom(move |url| {
        selector
            .select(url)
            .into_iter()
            .next()
            .and_then(|proxy| proxy.url().ok())
    })
}
