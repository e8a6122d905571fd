//! Read-only rate limit status endpoint.

use axum::extract::{Path, Request, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::middleware::client_key;
use super::AppState;
use crate::error::Result;
use crate::ratelimit::{ClientKey, Status};

/// `{ limit, remaining, reset }`, with `reset` in unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    pub key: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

impl StatusBody {
    fn new(key: &ClientKey, status: Status) -> Self {
        Self {
            key: key.to_string(),
            limit: status.limit,
            remaining: status.remaining,
            reset: status.reset_at.timestamp(),
        }
    }
}

/// Status for the calling client.
pub async fn own_status(State(state): State<AppState>, request: Request) -> Result<Json<StatusBody>> {
    let key = client_key(&request);
    let status = state.limiter.status(&key).await?;
    Ok(Json(StatusBody::new(&key, status)))
}

/// Status for an explicit key.
pub async fn key_status(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<StatusBody>> {
    let key = ClientKey::parse(&raw);
    debug!(key = %key, "Rate limit status lookup");
    let status = state.limiter.status(&key).await?;
    Ok(Json(StatusBody::new(&key, status)))
}
