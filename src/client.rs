//! Probe HTTP client.
//!
//! A `reqwest` client wrapped in a `reqwest-middleware` chain, with every
//! observation hook the probe needs:
//!
//! - [`LoggingInterceptor`]: application-level and network-level request/response logging
//! - [`RedirectMiddleware`]: follows 3xx hops so each one passes the network interceptor
//! - [`AuthMiddleware`] + [`BasicAuthenticator`]: one Basic-auth retry on 401/407
//! - [`FixedProxySelector`]: every request through one HTTP proxy
//! - [`LoggingConnectorLayer`]: logs each new socket before reqwest opens it
//! - [`ObservedResolver`] + [`EventListener`]: DNS and connect events
//!
//! Call chain: application interceptor → redirects → auth follow-up → network
//! interceptor → reqwest (pool, connector layer, resolver).

mod auth;
mod builder;
mod dns;
mod error;
mod events;
mod interceptor;
mod proxy;
mod redirect;
mod socket;

pub use auth::{AuthMiddleware, Authenticator, BasicAuthenticator};
pub use builder::{HttpClientFactory, HttpProbeClient, ProbeClientBuilder};
pub use dns::{DnsError, DnsResolver, ObservedResolver, SystemResolver};
pub use error::{ClientError, error_chain};
pub use events::{CallTracker, ConnectionLogger, EventListener, Route};
pub use interceptor::{InterceptLevel, LoggingInterceptor};
pub use proxy::{FixedProxySelector, ProxySelector, ProxyTarget};
pub use redirect::{MAX_FOLLOW_UPS, RedirectError, RedirectMiddleware};
pub use socket::{LoggingConnector, LoggingConnectorLayer};
