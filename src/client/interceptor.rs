//! Request/response logging interceptors.

use std::sync::Arc;
use std::time::Instant;

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};

use super::events::{CallTracker, EventListener, Route};
use super::proxy::ProxySelector;

/// Where in the call chain an interceptor sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptLevel {
    /// Sees the call as issued by the caller, once per call.
    Application,
    /// Sees every exchange handed to the connection pool, follow-ups included.
    Network,
}

impl InterceptLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "APPLICATION",
            Self::Network => "NETWORK",
        }
    }
}

impl std::fmt::Display for InterceptLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-level hooks: route tracking and connect-end reporting.
struct NetworkHooks {
    tracker: Arc<CallTracker>,
    listener: Arc<dyn EventListener>,
    proxy_selector: Option<Arc<dyn ProxySelector>>,
}

/// Logs each request before forwarding it and each response with the elapsed
/// time around the forward.
pub struct LoggingInterceptor {
    level: InterceptLevel,
    network: Option<NetworkHooks>,
}

impl LoggingInterceptor {
    /// Interceptor for the application level.
    pub fn application() -> Self {
        Self {
            level: InterceptLevel::Application,
            network: None,
        }
    }

    /// Interceptor for the network level.
    ///
    /// Records the route of each exchange in `tracker` and reports
    /// `connect_end` when the exchange opened a new connection.
    pub fn network(
        tracker: Arc<CallTracker>,
        listener: Arc<dyn EventListener>,
        proxy_selector: Option<Arc<dyn ProxySelector>>,
    ) -> Self {
        Self {
            level: InterceptLevel::Network,
            network: Some(NetworkHooks {
                tracker,
                listener,
                proxy_selector,
            }),
        }
    }

    /// Describe the connection a request is about to use.
    fn connection(&self, request: &Request) -> Option<Route> {
        let hooks = self.network.as_ref()?;
        let proxy = hooks
            .proxy_selector
            .as_ref()
            .and_then(|selector| selector.select(request.url()).into_iter().next());
        let route = Route::for_url(request.url(), proxy);
        hooks.tracker.begin(route.clone());
        Some(route)
    }

    /// Tell the proxy selector that connecting through its proxy failed.
    fn report_proxy_failure(
        &self,
        url: &url::Url,
        route: Option<&Route>,
        error: &reqwest_middleware::Error,
    ) {
        let Some(hooks) = &self.network else {
            return;
        };
        let proxy = route.and_then(|r| r.proxy.as_ref());
        let (Some(selector), Some(proxy)) = (&hooks.proxy_selector, proxy) else {
            return;
        };
        if matches!(error, reqwest_middleware::Error::Reqwest(e) if e.is_connect()) {
            selector.connect_failed(url, proxy, error);
        }
    }
}

#[async_trait::async_trait]
impl Middleware for LoggingInterceptor {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let route = self.connection(&req);
        let connection = route.as_ref().map_or_else(
            || "none".to_string(),
            |r| format!("{} via {}", r, r.proxy_description()),
        );

        tracing::info!(
            headers = ?req.headers(),
            "[{}] Sending request {} {} on {}",
            self.level,
            req.method(),
            req.url(),
            connection
        );

        let url = req.url().clone();
        let start = Instant::now();
        let response = match next.run(req, extensions).await {
            Ok(response) => response,
            Err(e) => {
                self.report_proxy_failure(&url, route.as_ref(), &e);
                return Err(e);
            }
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        if let (Some(hooks), Some(route)) = (&self.network, &route) {
            if hooks.tracker.take_connected() {
                hooks
                    .listener
                    .connect_end(route, response.remote_addr(), response.version());
            }
        }

        tracing::info!(
            status = response.status().as_u16(),
            headers = ?response.headers(),
            "[{}] Received response for {} in {:.1}ms",
            self.level,
            response.url(),
            elapsed_ms
        );

        Ok(response)
    }
}
