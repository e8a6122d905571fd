//! Path classification for the limiter stage.

use crate::config::RouteConfig;

/// How the pipeline treats a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    /// Not rate limited
    Open,
    /// Rate limited
    Limited,
    /// Session required, then rate limited
    Protected,
}

#[derive(Debug, Clone)]
pub struct RouteMatcher {
    api_prefixes: Vec<String>,
    protected_prefixes: Vec<String>,
}

impl RouteMatcher {
    pub fn new(config: &RouteConfig) -> Self {
        Self {
            api_prefixes: normalize(&config.api_prefixes),
            protected_prefixes: normalize(&config.protected_prefixes),
        }
    }

    pub fn classify(&self, path: &str) -> RouteClass {
        if self.protected_prefixes.iter().any(|p| matches_prefix(path, p)) {
            RouteClass::Protected
        } else if self.api_prefixes.iter().any(|p| matches_prefix(path, p)) {
            RouteClass::Limited
        } else {
            RouteClass::Open
        }
    }
}

fn normalize(prefixes: &[String]) -> Vec<String> {
    prefixes
        .iter()
        .map(|p| p.trim_end_matches('/'))
        .map(|p| if p.is_empty() { "/".to_string() } else { p.to_string() })
        .collect()
}

/// `/api` matches `/api` and `/api/x`, not `/apiary`. `/` matches everything.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
