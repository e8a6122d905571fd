//! Client identity resolution.

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Key shared by every client whose address cannot be resolved.
pub const ANONYMOUS_KEY: &str = "anonymous";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Longest explicit key accepted from an administrative lookup.
const MAX_KEY_LEN: usize = 256;

/// The identity a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// A resolved client address or explicit identity
    Known(String),
    /// Nothing usable was found; counted under [`ANONYMOUS_KEY`]
    Unknown,
}

impl ClientKey {
    /// Resolve the client from proxy headers, then the peer address.
    ///
    /// Sources are tried in order: the first `X-Forwarded-For` entry,
    /// `X-Real-IP`, the socket peer. A source that is present but does not
    /// hold an IP address is skipped.
    pub fn from_request(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        let forwarded = header_str(headers, FORWARDED_FOR)
            .and_then(|v| v.split(',').next())
            .and_then(parse_address);

        let resolved = forwarded
            .or_else(|| header_str(headers, REAL_IP).and_then(parse_address))
            .or(peer);

        match resolved {
            Some(ip) => ClientKey::Known(ip.to_string()),
            None => ClientKey::Unknown,
        }
    }

    /// Build a key from an explicit identity string.
    ///
    /// Empty, oversized or whitespace-bearing input maps to [`ClientKey::Unknown`].
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty()
            || raw.len() > MAX_KEY_LEN
            || raw == ANONYMOUS_KEY
            || raw.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return ClientKey::Unknown;
        }

        match parse_address(raw) {
            Some(ip) => ClientKey::Known(ip.to_string()),
            None => ClientKey::Known(raw.to_string()),
        }
    }

    /// The string the store is keyed by.
    pub fn as_str(&self) -> &str {
        match self {
            ClientKey::Known(key) => key,
            ClientKey::Unknown => ANONYMOUS_KEY,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ClientKey::Unknown)
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Accepts `1.2.3.4`, `::1`, `1.2.3.4:5678` and `[::1]:5678`.
fn parse_address(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    raw.strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .and_then(|r| r.parse::<IpAddr>().ok())
}
