//! The limiter as a request-pipeline stage.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use std::net::SocketAddr;
use tracing::{debug, instrument};

use super::routes::RouteClass;
use super::AppState;
use crate::config::UnknownClientPolicy;
use crate::ratelimit::{ClientKey, Decision};

const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Wrap `router` so every request passes through [`rate_limit`] first.
pub fn protect<S>(router: Router<S>, state: AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(state, rate_limit))
}

/// Authenticate protected paths, then count the request against its client.
///
/// Paths outside the configured prefixes pass straight through.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let class = state.routes.classify(request.uri().path());
    if class == RouteClass::Open {
        return next.run(request).await;
    }

    if class == RouteClass::Protected && !state.sessions.is_authenticated(request.headers()) {
        debug!("Rejecting unauthenticated request to protected route");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Authentication required" })),
        )
            .into_response();
    }

    let key = client_key(&request);
    if key.is_unknown() && state.unknown_client == UnknownClientPolicy::Exempt {
        debug!("Client identity unresolved, exempt from rate limiting");
        return next.run(request).await;
    }

    let decision = match state.limiter.check(&key).await {
        Ok(decision) => decision,
        Err(e) => return e.into_response(),
    };

    if !decision.admitted {
        return too_many_requests(&decision);
    }

    let mut response = next.run(request).await;
    if !decision.degraded {
        insert_limit_headers(response.headers_mut(), &decision);
    }
    response
}

/// Resolve the client from headers and, when served with connect info, the peer.
pub(crate) fn client_key(request: &Request) -> ClientKey {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    ClientKey::from_request(request.headers(), peer)
}

fn too_many_requests(decision: &Decision) -> Response {
    let retry_after = decision.retry_after_secs.unwrap_or(0);
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "Too many requests",
            "retryAfter": retry_after,
        })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    insert_limit_headers(headers, decision);
    response
}

fn insert_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(decision.reset_at.timestamp()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FailureMode, TollgateConfig};
    use crate::error::StoreError;
    use crate::ratelimit::{
        Hit, LimitPolicy, ManualClock, MemoryStore, RateLimitRecord, RateLimitStore, RateLimiter,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::routing::get;
    use chrono::{DateTime, Duration, Utc};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct DownStore;

    #[async_trait]
    impl RateLimitStore for DownStore {
        async fn hit(
            &self,
            _key: &str,
            _now: DateTime<Utc>,
            _policy: &LimitPolicy,
        ) -> Result<Hit, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn get(&self, _key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn sweep_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
    }

    fn app_with(config: TollgateConfig, limiter: RateLimiter) -> Router {
        let state = AppState::new(&config, Arc::new(limiter));
        let router = Router::new()
            .route("/api/posts", get(|| async { "posts" }))
            .route("/api/protected/likes", get(|| async { "likes" }))
            .route("/about", get(|| async { "about" }));
        protect(router, state)
    }

    fn app(max: u64) -> (Router, ManualClock) {
        let clock = ManualClock::default();
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            LimitPolicy::new(max, Duration::seconds(60)),
        )
        .with_clock(Arc::new(clock.clone()));
        (app_with(TollgateConfig::default(), limiter), clock)
    }

    fn get_from(path: &str, ip: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admitted_response_carries_headers() {
        let (app, _clock) = app(3);

        let response = app.oneshot(get_from("/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "2");
        assert_eq!(response.headers()["x-ratelimit-reset"], "60");
    }

    #[tokio::test]
    async fn test_rejection_body_and_retry_after() {
        let (app, clock) = app(2);

        for _ in 0..2 {
            let response = app.clone().oneshot(get_from("/api/posts", "10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        clock.advance(Duration::seconds(20));
        let response = app.clone().oneshot(get_from("/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "40");

        let body = json_body(response).await;
        assert_eq!(body["error"], "Too many requests");
        assert_eq!(body["retryAfter"], 40);

        let other = app.oneshot(get_from("/api/posts", "10.0.0.2")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_open_routes_are_not_counted() {
        let (app, _clock) = app(1);

        for _ in 0..3 {
            let response = app.clone().oneshot(get_from("/about", "10.0.0.1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get("x-ratelimit-limit").is_none());
        }
    }

    #[tokio::test]
    async fn test_protected_route_requires_session() {
        let (app, _clock) = app(5);

        let response = app
            .clone()
            .oneshot(get_from("/api/protected/likes", "10.0.0.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Authentication required");

        let request = axum::http::Request::builder()
            .uri("/api/protected/likes")
            .header("x-forwarded-for", "10.0.0.1")
            .header("cookie", "next-auth.session-token=abc")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
    }

    #[tokio::test]
    async fn test_unknown_clients_share_a_bucket() {
        let (app, _clock) = app(1);
        let anonymous = || {
            axum::http::Request::builder()
                .uri("/api/posts")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(anonymous()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(anonymous()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unknown_clients_exempt() {
        let mut config = TollgateConfig::default();
        config.rate_limiting.unknown_client = UnknownClientPolicy::Exempt;
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            LimitPolicy::new(1, Duration::seconds(60)),
        );
        let app = app_with(config, limiter);

        for _ in 0..3 {
            let request = axum::http::Request::builder()
                .uri("/api/posts")
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_store_failure_modes() {
        let open = RateLimiter::new(Arc::new(DownStore), LimitPolicy::default());
        let app = app_with(TollgateConfig::default(), open);
        let response = app.oneshot(get_from("/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());

        let closed = RateLimiter::new(Arc::new(DownStore), LimitPolicy::default())
            .with_failure_mode(FailureMode::Closed);
        let app = app_with(TollgateConfig::default(), closed);
        let response = app.oneshot(get_from("/api/posts", "10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Rate limiter unavailable");
    }
}
