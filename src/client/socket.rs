//! Connector layer logging every new socket.
//!
//! Installed with `reqwest::ClientBuilder::connector_layer`, it wraps reqwest's
//! own connector (TCP, proxy tunnel and TLS) and only observes: socket creation
//! and handshakes are always delegated.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use super::events::{CallTracker, EventListener, Route, report_connect_start};

/// Layer producing [`LoggingConnector`] services.
#[derive(Clone)]
pub struct LoggingConnectorLayer {
    listener: Arc<dyn EventListener>,
    tracker: Arc<CallTracker>,
    local_address: Option<IpAddr>,
}

impl LoggingConnectorLayer {
    pub fn new(
        listener: Arc<dyn EventListener>,
        tracker: Arc<CallTracker>,
        local_address: Option<IpAddr>,
    ) -> Self {
        Self {
            listener,
            tracker,
            local_address,
        }
    }
}

impl<S> Layer<S> for LoggingConnectorLayer {
    type Service = LoggingConnector<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingConnector {
            inner,
            listener: Arc::clone(&self.listener),
            tracker: Arc::clone(&self.tracker),
            local_address: self.local_address,
        }
    }
}

/// Connector that logs the destination of each new socket before delegating.
#[derive(Clone)]
pub struct LoggingConnector<S> {
    inner: S,
    listener: Arc<dyn EventListener>,
    tracker: Arc<CallTracker>,
    local_address: Option<IpAddr>,
}

/// Log line written before a socket is opened.
pub(crate) fn socket_message(route: Option<&Route>, local_address: Option<IpAddr>) -> String {
    let destination = route.map_or_else(|| "unknown".to_string(), ToString::to_string);
    let kind = match route {
        Some(r) if r.is_tls() => " (TLS)",
        _ => "",
    };
    match local_address {
        Some(local) => format!("Socket connection to: {destination}{kind} on local {local}"),
        None => format!("Socket connection to: {destination}{kind}"),
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

impl<S, R> Service<R> for LoggingConnector<S>
where
    S: Service<R, Error = BoxError>,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let route = self.tracker.current_route();
        tracing::info!("{}", socket_message(route.as_ref(), self.local_address));

        // Named peers are announced by the resolver once their address is known.
        if let Some(ref route) = route {
            if let Some(ip) = route.peer_ip() {
                report_connect_start(self.listener.as_ref(), &self.tracker, route, ip);
            }
        }

        let connecting = self.inner.call(req);
        let listener = Arc::clone(&self.listener);
        let tracker = Arc::clone(&self.tracker);

        Box::pin(async move {
            match connecting.await {
                Ok(conn) => {
                    tracker.mark_connected();
                    Ok(conn)
                }
                Err(e) => {
                    if let Some(ref route) = route {
                        listener.connect_failed(route, tracker.remote(), None, &*e);
                    }
                    Err(e)
                }
            }
        })
    }
}
