//! Resolved probe configuration.

use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;

use url::Url;

use super::validation::{ConfigError, is_blank};

// =============================================================================
// Constants
// =============================================================================

/// Default pause between probe cycles (90 seconds).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(90_000);

/// Default TCP connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default whole-request timeout (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Proxy
// =============================================================================

/// Fixed upstream HTTP proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy host name or IP address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl ProxyConfig {
    /// Build a proxy config from optional parts.
    ///
    /// Proxying is enabled only when the host is non-blank and a port is given.
    pub fn from_parts(host: Option<&str>, port: Option<u16>) -> Option<Self> {
        if is_blank(host) {
            return None;
        }
        Some(Self {
            host: host?.trim().to_string(),
            port: port?,
        })
    }

    /// Proxy URL in `http://host:port` form.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let host = match self.host.parse::<Ipv6Addr>() {
            Ok(ip) => format!("[{ip}]"),
            Err(_) => self.host.clone(),
        };
        Url::parse(&format!("http://{}:{}", host, self.port))
    }
}

impl std::fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials from optional parts.
    ///
    /// Returns `None` unless both user and password are non-blank.
    pub fn from_parts(username: Option<&str>, password: Option<&str>) -> Option<Self> {
        if is_blank(username) || is_blank(password) {
            return None;
        }
        Some(Self {
            username: username?.to_string(),
            password: password?.to_string(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// =============================================================================
// Probe Configuration
// =============================================================================

/// Immutable configuration shared by the client builder and the probe loop.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// URL probed every cycle.
    pub target_url: Url,
    /// Pause between cycles.
    pub interval: Duration,
    /// Optional fixed upstream proxy.
    pub proxy: Option<ProxyConfig>,
    /// Build a fresh client every cycle instead of evicting the pool.
    pub recreate_clients: bool,
    /// Optional Basic-auth credentials.
    pub credentials: Option<Credentials>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub request_timeout: Duration,
    /// Local address outgoing sockets bind to.
    pub local_address: Option<IpAddr>,
    /// Stop after this many cycles (`None` runs until stopped).
    pub max_cycles: Option<u64>,
}

impl ProbeConfig {
    /// Create a configuration with defaults for the given target URL.
    pub fn new(target_url: Url) -> Self {
        Self {
            target_url,
            interval: DEFAULT_INTERVAL,
            proxy: None,
            recreate_clients: false,
            credentials: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            local_address: None,
            max_cycles: None,
        }
    }

    /// Parse and validate the target URL argument.
    ///
    /// # Errors
    /// `ConfigError::InvalidUrl` if the argument does not parse,
    /// `ConfigError::Validation` if it is not an http(s) URL with a host.
    pub fn parse_target(raw: &str) -> Result<Url, ConfigError> {
        let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
            url: raw.to_string(),
            source,
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "target URL '{}' must use http or https, got '{}'",
                raw,
                url.scheme()
            )));
        }
        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::Validation(format!(
                "target URL '{}' has no host",
                raw
            )));
        }
        Ok(url)
    }

    /// Host part of the target URL, without IPv6 brackets.
    pub fn target_host(&self) -> String {
        match self.target_url.host() {
            Some(url::Host::Ipv6(ip)) => ip.to_string(),
            Some(host) => host.to_string(),
            None => String::new(),
        }
    }

    /// Set the cycle interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the upstream proxy.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set Basic-auth credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Select client recreation instead of pool eviction.
    pub fn with_recreate_clients(mut self, recreate: bool) -> Self {
        self.recreate_clients = recreate;
        self
    }

    /// Set the local bind address.
    pub fn with_local_address(mut self, address: IpAddr) -> Self {
        self.local_address = Some(address);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Bound the number of cycles.
    pub fn with_max_cycles(mut self, cycles: u64) -> Self {
        self.max_cycles = Some(cycles);
        self
    }
}
