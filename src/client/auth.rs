//! Authentication challenge handling.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::Extensions;
use http::header::{AUTHORIZATION, HeaderValue, InvalidHeaderValue};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};

use crate::config::Credentials;

/// Answers an authentication challenge with a follow-up request.
pub trait Authenticator: Send + Sync + 'static {
    /// Build the request to send in reply to the challenging `response`,
    /// or `None` to give up and return the challenge to the caller.
    fn authenticate(&self, request: &Request, response: &Response) -> Option<Request>;
}

/// Replies to every challenge with preemptive `Basic` credentials.
///
/// The challenge scheme is not inspected and nothing is cached between calls.
#[derive(Clone)]
pub struct BasicAuthenticator {
    header: HeaderValue,
}

impl BasicAuthenticator {
    /// Create an authenticator for the given credentials.
    pub fn new(credentials: &Credentials) -> Result<Self, InvalidHeaderValue> {
        let token = STANDARD.encode(format!(
            "{}:{}",
            credentials.username, credentials.password
        ));
        let mut header = HeaderValue::from_str(&format!("Basic {token}"))?;
        header.set_sensitive(true);
        Ok(Self { header })
    }

    /// The `Authorization` header value sent on retries.
    pub fn header(&self) -> &HeaderValue {
        &self.header
    }
}

impl std::fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthenticator").finish_non_exhaustive()
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, request: &Request, _response: &Response) -> Option<Request> {
        let mut follow_up = request.try_clone()?;
        follow_up
            .headers_mut()
            .insert(AUTHORIZATION, self.header.clone());
        Some(follow_up)
    }
}

/// Middleware that re-issues a challenged request once with the
/// authenticator's follow-up.
///
/// Sits between the application and network interceptors, so the network
/// interceptor sees both attempts and the application interceptor sees one.
pub struct AuthMiddleware {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthMiddleware {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

fn is_challenge(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::PROXY_AUTHENTICATION_REQUIRED
}

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        // Streaming bodies cannot be replayed; such requests are never retried.
        let original = req.try_clone();
        let response = next.clone().run(req, extensions).await?;

        if !is_challenge(response.status()) {
            return Ok(response);
        }
        let Some(original) = original else {
            return Ok(response);
        };
        let Some(follow_up) = self.authenticator.authenticate(&original, &response) else {
            return Ok(response);
        };

        tracing::info!(
            url = %original.url(),
            status = response.status().as_u16(),
            "Authentication challenge received, retrying with credentials"
        );
        drop(response);

        next.run(follow_up, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::from_parts(Some("alice"), Some("s3cret")).unwrap()
    }

    #[test]
    fn test_basic_header_value() {
        let auth = BasicAuthenticator::new(&credentials()).unwrap();
        // base64("alice:s3cret")
        assert_eq!(auth.header().to_str().unwrap(), "Basic YWxpY2U6czNjcmV0");
        assert!(auth.header().is_sensitive());
    }

    #[test]
    fn test_authenticate_adds_header_and_keeps_request() {
        let auth = BasicAuthenticator::new(&credentials()).unwrap();
        let url = reqwest::Url::parse("http://example.test/private").unwrap();
        let mut request = Request::new(reqwest::Method::GET, url.clone());
        request
            .headers_mut()
            .insert("x-probe", HeaderValue::from_static("1"));
        let response = Response::from(
            http::Response::builder()
                .status(401)
                .body(String::new())
                .unwrap(),
        );

        let follow_up = auth.authenticate(&request, &response).unwrap();

        assert_eq!(follow_up.url(), &url);
        assert_eq!(follow_up.method(), reqwest::Method::GET);
        assert_eq!(follow_up.headers()["x-probe"], "1");
        assert_eq!(
            follow_up.headers()[AUTHORIZATION],
            "Basic YWxpY2U6czNjcmV0"
        );
    }

    #[test]
    fn test_is_challenge() {
        assert!(is_challenge(StatusCode::UNAUTHORIZED));
        assert!(is_challenge(StatusCode::PROXY_AUTHENTICATION_REQUIRED));
        assert!(!is_challenge(StatusCode::FORBIDDEN));
        assert!(!is_challenge(StatusCode::OK));
    }
}
