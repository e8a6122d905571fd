//! Session presence check for protected routes.
//!
//! Tokens are not validated here; the application behind the gateway owns
//! that. The gate only rejects requests that carry no session at all.

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;

use crate::config::AuthConfig;

#[derive(Debug, Clone)]
pub struct SessionGate {
    session_cookies: Vec<String>,
    accept_bearer: bool,
}

impl SessionGate {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            session_cookies: config.session_cookies.clone(),
            accept_bearer: config.accept_bearer,
        }
    }

    /// Whether the request carries a non-empty session token.
    pub fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        self.has_session_cookie(headers) || (self.accept_bearer && has_bearer_token(headers))
    }

    fn has_session_cookie(&self, headers: &HeaderMap) -> bool {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.split_once('='))
            .any(|(name, value)| {
                !value.trim().is_empty() && self.session_cookies.iter().any(|c| c == name.trim())
            })
    }
}

fn has_bearer_token(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| !token.trim().is_empty())
}
