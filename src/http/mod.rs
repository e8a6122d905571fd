//! HTTP surface: the limiter pipeline stage and the gateway routes.

mod auth;
mod middleware;
mod proxy;
mod routes;
mod server;
mod status;

use std::sync::Arc;

pub use auth::SessionGate;
pub use middleware::{protect, rate_limit};
pub use proxy::Upstream;
pub use routes::{RouteClass, RouteMatcher};
pub use server::{router, HttpServer};
pub use status::StatusBody;

use crate::config::{TollgateConfig, UnknownClientPolicy};
use crate::ratelimit::RateLimiter;

/// Shared state for the pipeline stage and the handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub routes: Arc<RouteMatcher>,
    pub sessions: Arc<SessionGate>,
    pub unknown_client: UnknownClientPolicy,
    pub upstream: Option<Arc<Upstream>>,
}

impl AppState {
    /// Build the state from configuration and an assembled limiter.
    pub fn new(config: &TollgateConfig, limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            routes: Arc::new(RouteMatcher::new(&config.routes)),
            sessions: Arc::new(SessionGate::new(&config.auth)),
            unknown_client: config.rate_limiting.unknown_client,
            upstream: config
                .server
                .upstream
                .as_deref()
                .map(|base| Arc::new(Upstream::new(base))),
        }
    }
}
