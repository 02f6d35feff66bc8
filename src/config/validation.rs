//! Configuration errors and parsing helpers.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The target URL argument is not a well-formed URL.
    #[error("invalid target URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Parse duration string using humantime.
///
/// Supports `30s`, `1m`, `5m30s`, `1h`, `100ms` and the other humantime forms.
///
/// # Examples
///
/// ```
/// use connprobe::config::parse_duration;
///
/// assert_eq!(parse_duration("30s").unwrap().as_secs(), 30);
/// assert_eq!(parse_duration("1m30s").unwrap().as_secs(), 90);
/// assert_eq!(parse_duration("250ms").unwrap().as_millis(), 250);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}

/// Returns `true` when the value is absent or only whitespace.
pub(crate) fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_valid() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("1ms").unwrap(), Duration::from_millis(1));
        assert_eq!(parse_duration(" 10s ").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("   ").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("30").is_err());
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        assert_eq!(expand_env_vars("proxy_host: squid"), "proxy_host: squid");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("proxy_host: ${CONNPROBE_UNSET_PROXY_12345:-squid.local}");
        assert_eq!(result, "proxy_host: squid.local");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: only this test touches this variable.
        unsafe {
            std::env::set_var("CONNPROBE_TEST_EXPAND", "s3cret");
        }
        let result = expand_env_vars("password: ${CONNPROBE_TEST_EXPAND}");
        assert_eq!(result, "password: s3cret");
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("CONNPROBE_TEST_EXPAND");
        }
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(None));
        assert!(is_blank(Some("")));
        assert!(is_blank(Some(" \t")));
        assert!(!is_blank(Some("alice")));
    }
}
