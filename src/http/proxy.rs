//! Forwarding of unmatched requests to the upstream application.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::{IpAddr, SocketAddr};
use tracing::{debug, warn};

use super::AppState;
use crate::error::{Result, TollgateError};

const FORWARDED_FOR: &str = "x-forwarded-for";

/// The application the gateway fronts.
#[derive(Debug, Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base: String,
}

impl Upstream {
    pub fn new(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    /// Upstream URL for a request path and query.
    pub fn url_for(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base, path_and_query)
    }

    async fn forward(&self, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = self.url_for(path_and_query);
        debug!(method = %parts.method, url = %url, "Forwarding request upstream");

        let mut headers = without_hop_headers(parts.headers);
        append_forwarded_for(&mut headers, peer);

        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Upstream request failed");
                TollgateError::Upstream(e.to_string())
            })?;

        let mut response = Response::builder().status(upstream.status());
        if let Some(headers) = response.headers_mut() {
            *headers = without_hop_headers(upstream.headers().clone());
        }
        response
            .body(Body::from_stream(upstream.bytes_stream()))
            .map_err(|e| TollgateError::Upstream(e.to_string()))
    }
}

fn without_hop_headers(mut headers: HeaderMap) -> HeaderMap {
    headers.remove(HOST);
    headers.remove(CONNECTION);
    headers.remove(TRANSFER_ENCODING);
    headers
}

/// Add the connecting peer to `X-Forwarded-For`, keeping earlier hops.
fn append_forwarded_for(headers: &mut HeaderMap, peer: Option<IpAddr>) {
    let Some(peer) = peer else {
        return;
    };
    let chain = match headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, peer),
        _ => peer.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(FORWARDED_FOR, value);
    }
}

/// Fallback handler: forward when an upstream is configured, else 404.
pub async fn fallback(State(state): State<AppState>, request: Request) -> Response {
    match &state.upstream {
        Some(upstream) => match upstream.forward(request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        },
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Not found" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_base() {
        let upstream = Upstream::new("http://app:3000/");
        assert_eq!(upstream.url_for("/api/posts?page=2"), "http://app:3000/api/posts?page=2");
    }

    #[test]
    fn test_hop_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("gateway"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-request-id", HeaderValue::from_static("abc"));

        let headers = without_hop_headers(headers);
        assert!(headers.get(HOST).is_none());
        assert!(headers.get(CONNECTION).is_none());
        assert_eq!(headers["x-request-id"], "abc");
    }

    #[test]
    fn test_peer_appended_to_forwarded_chain() {
        let peer: IpAddr = "192.0.2.10".parse().unwrap();

        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, Some(peer));
        assert_eq!(headers[FORWARDED_FOR], "192.0.2.10");

        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        append_forwarded_for(&mut headers, Some(peer));
        assert_eq!(headers[FORWARDED_FOR], "203.0.113.7, 10.0.0.1, 192.0.2.10");
    }

    #[test]
    fn test_forwarded_chain_untouched_without_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.7"));
        append_forwarded_for(&mut headers, None);
        assert_eq!(headers[FORWARDED_FOR], "203.0.113.7");
    }
}
