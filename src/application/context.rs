//! Synthetic request contexts for rendering routes without a network listener.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, Request, header},
};
use thiserror::Error;
use url::Url;

use crate::domain::routes::{RenderMode, Route};

/// Header the live handlers inspect to tell a partial-navigation fetch from a
/// direct navigation.
pub const PARTIAL_REQUEST_HEADER: &str = "datastar-request";

/// User agent announced by build requests.
pub const BUILDER_USER_AGENT: &str = concat!("quire-builder/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("base url `{0}` is not an absolute http(s) origin")]
    RelativeBase(String),
    #[error("route path `{0}` cannot be joined onto the base url")]
    InvalidPath(String),
}

/// Everything a handler observes about a request, fabricated for a route.
#[derive(Debug, Clone)]
pub struct SyntheticRequestContext {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub mode: RenderMode,
}

impl SyntheticRequestContext {
    /// Convert into a request the router can dispatch. The URI keeps the
    /// absolute form so handlers that build canonical links see the origin.
    pub fn into_request(self) -> Result<Request<Body>, ContextError> {
        let mut builder = Request::builder()
            .method(self.method)
            .uri(self.url.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers);
        }
        builder
            .body(Body::empty())
            .map_err(|_| ContextError::InvalidPath(self.url.path().to_string()))
    }
}

/// Parse and check a site origin. Only `scheme://host[:port]` with an
/// optional trailing slash is accepted.
pub fn parse_base_url(base_url: &str) -> Result<Url, ContextError> {
    let parsed =
        Url::parse(base_url).map_err(|_| ContextError::RelativeBase(base_url.to_string()))?;

    let is_http = matches!(parsed.scheme(), "http" | "https");
    let is_origin = parsed.path() == "/" && parsed.query().is_none() && parsed.fragment().is_none();
    if !is_http || parsed.host_str().is_none() || !is_origin {
        return Err(ContextError::RelativeBase(base_url.to_string()));
    }

    Ok(parsed)
}

/// Build the request context for `route` rendered in `mode`.
pub fn synthesize(
    route: &Route,
    mode: RenderMode,
    base_url: &str,
) -> Result<SyntheticRequestContext, ContextError> {
    let base = parse_base_url(base_url)?;
    let url = base
        .join(&route.path)
        .map_err(|_| ContextError::InvalidPath(route.path.clone()))?;

    let mut headers = HeaderMap::new();
    let host = match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    let host = HeaderValue::from_str(&host)
        .map_err(|_| ContextError::RelativeBase(base_url.to_string()))?;
    headers.insert(header::HOST, host);
    headers.insert(header::ACCEPT, HeaderValue::from_static(accept_for(route, mode)));
    headers.insert(
        header::USER_AGENT,
        HeaderValue::from_static(BUILDER_USER_AGENT),
    );
    if mode == RenderMode::Fragment {
        headers.insert(
            HeaderName::from_static(PARTIAL_REQUEST_HEADER),
            HeaderValue::from_static("true"),
        );
    }

    Ok(SyntheticRequestContext {
        method: Method::GET,
        url,
        headers,
        mode,
    })
}

fn accept_for(route: &Route, mode: RenderMode) -> &'static str {
    if route.is_page() || mode == RenderMode::Fragment {
        "text/html"
    } else {
        "*/*"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mode_targets_absolute_url_without_partial_marker() {
        let ctx = synthesize(&Route::post("hello"), RenderMode::Full, "https://blog.example")
            .expect("context");
        assert_eq!(ctx.url.as_str(), "https://blog.example/posts/hello");
        assert_eq!(ctx.method, Method::GET);
        assert_eq!(ctx.headers.get(header::HOST).expect("host"), "blog.example");
        assert!(ctx.headers.get(PARTIAL_REQUEST_HEADER).is_none());
    }

    #[test]
    fn fragment_mode_adds_partial_marker() {
        let ctx = synthesize(&Route::index(), RenderMode::Fragment, "http://localhost:8080/")
            .expect("context");
        assert_eq!(ctx.url.as_str(), "http://localhost:8080/");
        assert_eq!(ctx.headers.get(header::HOST).expect("host"), "localhost:8080");
        assert_eq!(
            ctx.headers.get(PARTIAL_REQUEST_HEADER).expect("marker"),
            "true"
        );
    }

    #[test]
    fn relative_or_prefixed_bases_are_rejected() {
        for base in ["/site", "blog.example", "ftp://blog.example", "https://blog.example/sub"] {
            let err = synthesize(&Route::index(), RenderMode::Full, base).expect_err(base);
            assert_eq!(err, ContextError::RelativeBase(base.to_string()));
        }
    }

    #[test]
    fn into_request_keeps_headers_and_absolute_uri() {
        let request = synthesize(&Route::feed(), RenderMode::Full, "https://blog.example")
            .expect("context")
            .into_request()
            .expect("request");
        assert_eq!(request.uri().to_string(), "https://blog.example/feed.xml");
        assert_eq!(
            request.headers().get(header::USER_AGENT).expect("ua"),
            BUILDER_USER_AGENT
        );
    }

    #[test]
    fn synthesis_is_pure() {
        let a = synthesize(&Route::post("x"), RenderMode::Fragment, "https://a.example")
            .expect("a");
        let b = synthesize(&Route::post("x"), RenderMode::Fragment, "https://a.example")
            .expect("b");
        assert_eq!(a.url, b.url);
        assert_eq!(a.headers, b.headers);
    }
}
