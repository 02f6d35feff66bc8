//! Layered probe settings (YAML file, environment and CLI overrides).

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::probe::{
    Credentials, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INTERVAL, DEFAULT_REQUEST_TIMEOUT, ProbeConfig,
    ProxyConfig,
};
use super::validation::{ConfigError, expand_env_vars};

/// Unresolved probe settings.
///
/// Every field is optional so that the file, environment and CLI layers can be
/// merged before defaults are applied in [`ProbeSettings::into_config`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeSettings {
    /// Pause between probe cycles (e.g. "90s").
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// Upstream proxy host.
    pub proxy_host: Option<String>,

    /// Upstream proxy port.
    pub proxy_port: Option<u16>,

    /// Build a new client every cycle instead of evicting pooled connections.
    pub recreate_clients: Option<bool>,

    /// Basic-auth user.
    pub username: Option<String>,

    /// Basic-auth password.
    pub password: Option<String>,

    /// TCP connect timeout (e.g. "10s").
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Option<Duration>,

    /// Whole-request timeout (e.g. "30s").
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,

    /// Local address outgoing sockets bind to.
    pub local_address: Option<IpAddr>,

    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl ProbeSettings {
    /// Load settings from a YAML file, expanding `${VAR}` references first.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse settings from YAML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        if expanded.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&expanded)?)
    }

    /// Resolve into a [`ProbeConfig`] for the given target URL argument.
    ///
    /// # Errors
    /// Fails on a malformed target URL or a proxy host that cannot form a URL.
    pub fn into_config(self, target: &str) -> Result<ProbeConfig, ConfigError> {
        let target_url = ProbeConfig::parse_target(target)?;

        let proxy = ProxyConfig::from_parts(self.proxy_host.as_deref(), self.proxy_port);
        if let Some(ref proxy) = proxy {
            proxy.url().map_err(|e| {
                ConfigError::Validation(format!("invalid proxy address '{}': {}", proxy, e))
            })?;
        }

        Ok(ProbeConfig {
            target_url,
            interval: self.interval.unwrap_or(DEFAULT_INTERVAL),
            proxy,
            recreate_clients: self.recreate_clients.unwrap_or(false),
            credentials: Credentials::from_parts(
                self.username.as_deref(),
                self.password.as_deref(),
            ),
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            local_address: self.local_address,
            max_cycles: self.max_cycles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_settings_use_defaults() {
        let config = ProbeSettings::default()
            .into_config("http://example.test/")
            .unwrap();

        assert_eq!(config.interval, DEFAULT_INTERVAL);
        assert!(config.proxy.is_none());
        assert!(config.credentials.is_none());
        assert!(!config.recreate_clients);
    }

    #[test]
    fn test_parse_yaml_settings() {
        let yaml = r#"
interval: 1m30s
proxy_host: squid.internal
proxy_port: 3128
recreate_clients: true
username: alice
password: secret
connect_timeout: 5s
local_address: 127.0.0.1
max_cycles: 3
"#;
        let config = ProbeSettings::parse(yaml)
            .unwrap()
            .into_config("https://ci.example.com/")
            .unwrap();

        assert_eq!(config.interval, Duration::from_secs(90));
        assert_eq!(
            config.proxy,
            Some(ProxyConfig {
                host: "squid.internal".to_string(),
                port: 3128
            })
        );
        assert!(config.recreate_clients);
        assert_eq!(config.credentials.unwrap().username, "alice");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.local_address, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(config.max_cycles, Some(3));
    }

    #[test]
    fn test_blank_proxy_host_disables_proxy() {
        let settings = ProbeSettings {
            proxy_host: Some(" ".to_string()),
            proxy_port: Some(3128),
            ..Default::default()
        };
        let config = settings.into_config("http://example.test/").unwrap();
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_blank_password_disables_auth() {
        let settings = ProbeSettings {
            username: Some("alice".to_string()),
            password: Some(String::new()),
            ..Default::default()
        };
        let config = settings.into_config("http://example.test/").unwrap();
        assert!(config.credentials.is_none());
    }

    #[test]
    fn test_invalid_proxy_host_rejected() {
        let settings = ProbeSettings {
            proxy_host: Some("bad host/name".to_string()),
            proxy_port: Some(3128),
            ..Default::default()
        };
        let err = settings.into_config("http://example.test/").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_malformed_target_rejected() {
        let err = ProbeSettings::default().into_config("::nope::").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ProbeSettings::parse("polling: 5s\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "interval: 250ms").unwrap();
        writeln!(file, "proxy_host: ${{CONNPROBE_UNSET_HOST_98765:-proxy.local}}").unwrap();
        writeln!(file, "proxy_port: 8080").unwrap();

        let settings = ProbeSettings::load(file.path()).unwrap();
        assert_eq!(settings.interval, Some(Duration::from_millis(250)));
        assert_eq!(settings.proxy_host.as_deref(), Some("proxy.local"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ProbeSettings::load("/nonexistent/connprobe.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
