//! Redirect following above the network interceptor.
//!
//! reqwest's own redirect handling runs below the middleware chain, so the
//! inner client is built with `Policy::none()` and hops are followed here,
//! where the network interceptor sees each one.

use http::Extensions;
use http::header::{self, HeaderMap};
use reqwest::{Method, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use thiserror::Error;
use url::Url;

/// Follow-ups allowed for one call before giving up.
pub const MAX_FOLLOW_UPS: usize = 20;

/// Redirect errors.
#[derive(Debug, Error)]
pub enum RedirectError {
    /// The redirect chain did not end within the allowed number of hops.
    #[error("too many follow-up requests: {count} (last {url})")]
    TooMany { url: Url, count: usize },
}

/// Middleware following 3xx responses that carry a usable `Location`.
#[derive(Debug, Clone)]
pub struct RedirectMiddleware {
    max_follow_ups: usize,
}

impl Default for RedirectMiddleware {
    fn default() -> Self {
        Self {
            max_follow_ups: MAX_FOLLOW_UPS,
        }
    }
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 300 | 301 | 302 | 303 | 307 | 308)
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

fn strip_body_headers(headers: &mut HeaderMap) {
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONTENT_TYPE);
    headers.remove(header::TRANSFER_ENCODING);
}

/// Build the request that follows `response`, or `None` when the response is
/// final (not a redirect, no usable `Location`, or a body that cannot be
/// replayed).
pub(crate) fn follow_up(request: &Request, response: &Response) -> Option<Request> {
    let status = response.status();
    if !is_redirect(status) {
        return None;
    }

    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    let target = request.url().join(location).ok()?;
    if !matches!(target.scheme(), "http" | "https") {
        return None;
    }

    let keeps_method = matches!(status.as_u16(), 307 | 308);
    let method = request.method();

    let mut next = if keeps_method || *method == Method::GET || *method == Method::HEAD {
        request.try_clone()?
    } else {
        let mut get = Request::new(Method::GET, target.clone());
        *get.headers_mut() = request.headers().clone();
        strip_body_headers(get.headers_mut());
        *get.timeout_mut() = request.timeout().copied();
        *get.version_mut() = request.version();
        get
    };

    if !same_origin(request.url(), &target) {
        next.headers_mut().remove(header::AUTHORIZATION);
        next.headers_mut().remove(header::COOKIE);
    }
    *next.url_mut() = target;
    Some(next)
}

#[async_trait::async_trait]
impl Middleware for RedirectMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let mut current = req.try_clone();
        let mut response = next.clone().run(req, extensions).await?;
        let mut follow_ups = 0;

        loop {
            let Some(request) = current.take() else {
                return Ok(response);
            };
            let Some(redirected) = follow_up(&request, &response) else {
                return Ok(response);
            };

            follow_ups += 1;
            if follow_ups > self.max_follow_ups {
                return Err(reqwest_middleware::Error::middleware(RedirectError::TooMany {
                    url: redirected.url().clone(),
                    count: follow_ups,
                }));
            }

            tracing::debug!(
                from = %request.url(),
                to = %redirected.url(),
                status = response.status().as_u16(),
                "Following redirect"
            );
            drop(response);

            current = redirected.try_clone();
            response = next.clone().run(redirected, extensions).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: Method, url: &str) -> Request {
        Request::new(method, Url::parse(url).unwrap())
    }

    fn redirect(status: u16, location: &str) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .header(header::LOCATION, location)
                .body(String::new())
                .unwrap(),
        )
    }

    #[test]
    fn test_relative_location_is_resolved() {
        let req = request(Method::GET, "http://example.test/old?x=1");
        let next = follow_up(&req, &redirect(307, "/new")).unwrap();

        assert_eq!(next.url().as_str(), "http://example.test/new");
        assert_eq!(next.method(), Method::GET);
    }

    #[test]
    fn test_non_redirect_is_final() {
        let req = request(Method::GET, "http://example.test/");
        assert!(follow_up(&req, &redirect(200, "/elsewhere")).is_none());
        assert!(follow_up(&req, &redirect(304, "/elsewhere")).is_none());
    }

    #[test]
    fn test_missing_or_unsupported_location_is_final() {
        let req = request(Method::GET, "http://example.test/");
        let no_location = Response::from(
            http::Response::builder()
                .status(302)
                .body(String::new())
                .unwrap(),
        );
        assert!(follow_up(&req, &no_location).is_none());
        assert!(follow_up(&req, &redirect(302, "ftp://files.example.test/")).is_none());
    }

    #[test]
    fn test_see_other_turns_post_into_get() {
        let mut req = request(Method::POST, "http://example.test/form");
        req.headers_mut()
            .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        *req.body_mut() = Some("payload".into());

        let next = follow_up(&req, &redirect(303, "/done")).unwrap();

        assert_eq!(next.method(), Method::GET);
        assert!(next.body().is_none());
        assert!(next.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_temporary_redirect_keeps_method() {
        let mut req = request(Method::POST, "http://example.test/form");
        *req.body_mut() = Some("payload".into());

        let next = follow_up(&req, &redirect(307, "/retry")).unwrap();

        assert_eq!(next.method(), Method::POST);
        assert!(next.body().is_some());
    }

    #[test]
    fn test_cross_origin_drops_credentials() {
        let mut req = request(Method::GET, "http://example.test/");
        req.headers_mut()
            .insert(header::AUTHORIZATION, "Basic YWxpY2U6czNjcmV0".parse().unwrap());

        let same = follow_up(&req, &redirect(302, "/login")).unwrap();
        assert!(same.headers().contains_key(header::AUTHORIZATION));

        let other = follow_up(&req, &redirect(302, "http://other.test/")).unwrap();
        assert!(!other.headers().contains_key(header::AUTHORIZATION));
    }
}
