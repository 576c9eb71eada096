//! Cache key derivation
//!
//! A request maps to the canonical upstream URL `scheme://host/path?query`,
//! and the URL maps to a cache key: the decimal form of its 64-bit FNV-1a
//! hash. Steam clients fetch identical content from many CDN host names, so
//! for that user agent the host is dropped from the hashed string.

use http::header::{HeaderName, HOST, USER_AGENT};
use http::request::Parts;

/// Header carrying the scheme the client originally used
pub const SCHEME_HEADER: &str = "scheme";

/// User agent of the Steam download client
pub const STEAM_USER_AGENT: &str = "Valve/Steam HTTP Client 1.0";

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// The parts of an inbound request that determine its cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub scheme: String,
    pub host: String,
    pub path_and_query: String,
    pub user_agent: Option<String>,
}

impl RequestTarget {
    /// Extract the target from request parts
    ///
    /// The host comes from the absolute-form URI when the client sent one,
    /// otherwise from the `Host` header.
    pub fn from_parts(parts: &Parts) -> Self {
        let header = |name: HeaderName| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let host = parts
            .uri
            .authority()
            .map(|a| a.as_str().to_string())
            .or_else(|| header(HOST))
            .unwrap_or_default();

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        RequestTarget::new(
            header(HeaderName::from_static(SCHEME_HEADER)).as_deref(),
            host,
            path_and_query,
            header(USER_AGENT),
        )
    }

    /// Build a target, defaulting the scheme to `http`
    pub fn new(
        scheme: Option<&str>,
        host: impl Into<String>,
        path_and_query: impl Into<String>,
        user_agent: Option<String>,
    ) -> Self {
        let scheme = match scheme {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => "http".to_string(),
        };
        RequestTarget {
            scheme,
            host: host.into(),
            path_and_query: path_and_query.into(),
            user_agent,
        }
    }

    /// Canonical upstream URL for this request
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path_and_query)
    }

    /// Whether the request comes from the Steam download client
    pub fn is_steam(&self) -> bool {
        self.user_agent.as_deref() == Some(STEAM_USER_AGENT)
    }

    /// The string that is hashed into the cache key
    pub fn cache_key_string(&self) -> String {
        if self.is_steam() {
            format!("steam{}", self.path_and_query)
        } else {
            self.url()
        }
    }

    /// Derive the cache key
    pub fn cache_key(&self) -> String {
        hash_key(&self.cache_key_string())
    }
}

/// 64-bit FNV-1a
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Hash a cache-key string into its on-disk key
pub fn hash_key(cache_key_string: &str) -> String {
    fnv1a_64(cache_key_string.as_bytes()).to_string()
}
