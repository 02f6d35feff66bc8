//! Connection and DNS event observation.

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use http::Version;

use super::error::error_chain;
use super::proxy::ProxyTarget;

/// Destination of one call: the origin address plus the proxy it goes through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// URL scheme of the call.
    pub scheme: String,
    /// Origin host.
    pub host: String,
    /// Origin port.
    pub port: u16,
    /// Proxy in use, `None` for a direct connection.
    pub proxy: Option<ProxyTarget>,
}

impl Route {
    /// Describe the route a URL takes, given the proxy chosen for it.
    pub fn for_url(url: &url::Url, proxy: Option<ProxyTarget>) -> Self {
        Self {
            scheme: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port_or_known_default().unwrap_or(80),
            proxy,
        }
    }

    /// Whether the origin connection is wrapped in TLS.
    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }

    /// Human-readable proxy description (`DIRECT` when there is none).
    pub fn proxy_description(&self) -> String {
        self.proxy
            .as_ref()
            .map_or_else(|| "DIRECT".to_string(), ToString::to_string)
    }

    /// Host the socket is opened to: the proxy when there is one.
    pub fn peer_host(&self) -> &str {
        self.proxy.as_ref().map_or(&self.host, |p| &p.host)
    }

    /// Port the socket is opened to.
    pub fn peer_port(&self) -> u16 {
        self.proxy.as_ref().map_or(self.port, |p| p.port)
    }

    /// The peer host as an IP address, when it is a literal.
    pub fn peer_ip(&self) -> Option<IpAddr> {
        self.peer_host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .ok()
    }

    /// `host:port` of the peer, for when no resolved address is known.
    pub fn peer(&self) -> String {
        format!("{}:{}", self.peer_host(), self.peer_port())
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Observer for connection and DNS events.
///
/// All methods default to no-ops so listeners only implement what they need.
/// `remote` is always the socket peer, which is the proxy for proxied routes.
pub trait EventListener: Send + Sync + 'static {
    /// A DNS lookup for `domain` is starting.
    fn dns_start(&self, _domain: &str) {}

    /// A DNS lookup for `domain` returned `addresses`.
    fn dns_end(&self, _domain: &str, _addresses: &[IpAddr]) {}

    /// A new connection for `route` is being opened to `remote`.
    fn connect_start(&self, _route: &Route, _remote: SocketAddr) {}

    /// A new connection for `route` carried its first exchange.
    fn connect_end(&self, _route: &Route, _remote: Option<SocketAddr>, _protocol: Version) {}

    /// Opening a connection for `route` failed.
    fn connect_failed(
        &self,
        _route: &Route,
        _remote: Option<SocketAddr>,
        _protocol: Option<Version>,
        _error: &dyn Error,
    ) {
    }
}

fn describe_remote(route: &Route, remote: Option<SocketAddr>) -> String {
    remote.map_or_else(|| route.peer(), |addr| addr.to_string())
}

/// Listener that writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionLogger;

impl EventListener for ConnectionLogger {
    fn dns_start(&self, domain: &str) {
        tracing::info!(domain = %domain, "DNS start for domain {}", domain);
    }

    fn dns_end(&self, domain: &str, addresses: &[IpAddr]) {
        tracing::info!(
            domain = %domain,
            "DNS end for domain {} with {:?}",
            domain,
            addresses
        );
    }

    fn connect_start(&self, route: &Route, remote: SocketAddr) {
        tracing::info!(
            "Connect start to {} through {}",
            remote,
            route.proxy_description()
        );
    }

    fn connect_end(&self, route: &Route, remote: Option<SocketAddr>, protocol: Version) {
        tracing::info!(
            "Connect end to {} through {} using {:?}",
            describe_remote(route, remote),
            route.proxy_description(),
            protocol
        );
    }

    fn connect_failed(
        &self,
        route: &Route,
        remote: Option<SocketAddr>,
        protocol: Option<Version>,
        error: &dyn Error,
    ) {
        let protocol = protocol.map_or_else(
            || "unknown protocol".to_string(),
            |version| format!("{version:?}"),
        );
        let error = error_chain(error);
        tracing::warn!(
            error = %error,
            "Connect failed to {} through {} using {} with {}",
            describe_remote(route, remote),
            route.proxy_description(),
            protocol,
            error
        );
    }
}

#[derive(Debug, Default)]
struct CallState {
    route: Option<Route>,
    remote: Option<SocketAddr>,
    connected: bool,
}

/// Tracks the route of the in-flight call.
///
/// The network interceptor records the route before handing the request to
/// the connection pool. The resolver and the connector layer read it when a
/// new socket is opened, record the peer address and flag the fresh connection
/// so that `connect_end` can be emitted once the negotiated protocol is known.
/// Only one call is in flight at a time.
#[derive(Debug, Default)]
pub struct CallTracker {
    state: Mutex<CallState>,
}

impl CallTracker {
    /// Record the route of a call that is about to go to the network.
    pub fn begin(&self, route: Route) {
        if let Ok(mut state) = self.state.lock() {
            *state = CallState {
                route: Some(route),
                ..CallState::default()
            };
        }
    }

    /// Route of the in-flight call.
    pub fn current_route(&self) -> Option<Route> {
        self.state.lock().ok().and_then(|s| s.route.clone())
    }

    /// Record the address the new connection is opened to.
    pub fn connecting(&self, remote: SocketAddr) {
        if let Ok(mut state) = self.state.lock() {
            state.remote = Some(remote);
        }
    }

    /// Address the in-flight call is connecting to, once known.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.state.lock().ok().and_then(|s| s.remote)
    }

    /// Flag that the in-flight call opened a new connection.
    pub fn mark_connected(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.connected = true;
        }
    }

    /// Take the new-connection flag, resetting it.
    pub fn take_connected(&self) -> bool {
        self.state
            .lock()
            .map(|mut s| std::mem::take(&mut s.connected))
            .unwrap_or(false)
    }
}

/// Record `ip` as the peer of the in-flight call and report `connect_start`.
pub(crate) fn report_connect_start(
    listener: &dyn EventListener,
    tracker: &CallTracker,
    route: &Route,
    ip: IpAddr,
) {
    let remote = SocketAddr::new(ip, route.peer_port());
    tracker.connecting(remote);
    listener.connect_start(route, remote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    fn route(url: &str, proxy: Option<ProxyTarget>) -> Route {
        Route::for_url(&url::Url::parse(url).unwrap(), proxy)
    }

    #[test]
    fn test_route_for_url() {
        let r = route("https://ci.example.com/login", None);
        assert_eq!(r.host, "ci.example.com");
        assert_eq!(r.port, 443);
        assert!(r.is_tls());
        assert_eq!(r.to_string(), "ci.example.com:443");
        assert_eq!(r.proxy_description(), "DIRECT");
        assert_eq!(r.peer(), "ci.example.com:443");
        assert!(r.peer_ip().is_none());

        let proxied = route(
            "http://ci.example.com:8080/",
            Some(ProxyTarget::new("10.0.0.7", 3128)),
        );
        assert_eq!(proxied.port, 8080);
        assert!(!proxied.is_tls());
        assert_eq!(proxied.proxy_description(), "HTTP @ 10.0.0.7:3128");
        assert_eq!(proxied.peer(), "10.0.0.7:3128");
        assert_eq!(proxied.peer_ip(), Some("10.0.0.7".parse().unwrap()));
    }

    #[test]
    fn test_route_peer_ipv6_literal() {
        let r = route("http://[::1]:8080/", None);
        assert_eq!(r.peer_ip(), Some("::1".parse().unwrap()));
        assert_eq!(r.peer_port(), 8080);
    }

    #[test]
    fn test_call_tracker_connected_flag() {
        let tracker = CallTracker::default();
        assert!(tracker.current_route().is_none());
        assert!(!tracker.take_connected());

        tracker.begin(route("http://a.test/", None));
        tracker.mark_connected();
        assert_eq!(tracker.current_route().unwrap().host, "a.test");
        assert!(tracker.take_connected());
        assert!(!tracker.take_connected());

        tracker.mark_connected();
        tracker.connecting("10.0.0.1:80".parse().unwrap());
        tracker.begin(route("http://b.test/", None));
        assert!(!tracker.take_connected());
        assert!(tracker.remote().is_none());
    }

    #[test]
    #[traced_test]
    fn test_report_connect_start_uses_peer_port() {
        let tracker = CallTracker::default();
        let r = route(
            "http://a.test:8080/",
            Some(ProxyTarget::new("squid", 3128)),
        );
        tracker.begin(r.clone());

        report_connect_start(&ConnectionLogger, &tracker, &r, "10.0.0.9".parse().unwrap());

        assert_eq!(tracker.remote(), Some("10.0.0.9:3128".parse().unwrap()));
        assert!(logs_contain("Connect start to 10.0.0.9:3128 through HTTP @ squid:3128"));
    }

    #[test]
    #[traced_test]
    fn test_connection_logger_lines() {
        let logger = ConnectionLogger;
        let r = route("http://a.test/", Some(ProxyTarget::new("squid", 3128)));
        let remote: SocketAddr = "10.0.0.2:3128".parse().unwrap();

        logger.dns_start("a.test");
        logger.dns_end("a.test", &["10.0.0.1".parse().unwrap()]);
        logger.connect_start(&r, remote);
        logger.connect_end(&r, Some(remote), Version::HTTP_11);
        logger.connect_failed(
            &r,
            None,
            None,
            &std::io::Error::other("connection refused"),
        );

        assert!(logs_contain("DNS start for domain a.test"));
        assert!(logs_contain("DNS end for domain a.test with [10.0.0.1]"));
        assert!(logs_contain(
            "Connect start to 10.0.0.2:3128 through HTTP @ squid:3128"
        ));
        assert!(logs_contain(
            "Connect end to 10.0.0.2:3128 through HTTP @ squid:3128 using HTTP/1.1"
        ));
        assert!(logs_contain(
            "Connect failed to squid:3128 through HTTP @ squid:3128 using unknown protocol"
        ));
        assert!(logs_contain("connection refused"));
    }

    #[test]
    #[traced_test]
    fn test_connect_failed_renders_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("tcp connect error")]
        struct ConnectError(#[source] std::io::Error);

        let r = route("http://a.test/", None);
        let error = ConnectError(std::io::Error::other("Connection refused"));

        ConnectionLogger.connect_failed(
            &r,
            Some("127.0.0.1:80".parse().unwrap()),
            Some(Version::HTTP_11),
            &error,
        );

        assert!(logs_contain(
            "Connect failed to 127.0.0.1:80 through DIRECT using HTTP/1.1"
        ));
        assert!(logs_contain("with tcp connect error: Connection refused"));
    }
}
