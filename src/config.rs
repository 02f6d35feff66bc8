//! Configuration for the probe.
//!
//! Settings are layered CLI > environment > YAML file > defaults and resolved
//! once at startup into an immutable [`ProbeConfig`]:
//! - Target URL (required positional argument)
//! - Cycle interval, proxy, credentials, client refresh mode
//! - Connect/request timeouts and local bind address

mod probe;
mod settings;
mod validation;

pub use probe::{Credentials, ProbeConfig, ProxyConfig};
pub use settings::ProbeSettings;
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use probe::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_INTERVAL, DEFAULT_REQUEST_TIMEOUT};
