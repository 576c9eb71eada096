//! Cache-Control evaluation
//!
//! Responses are admitted to the store only when they are a plain `200 OK`
//! with a positive declared length and no `no-store` directive. Freshness
//! (`max-age`) is evaluated by [`can_serve`] but the proxy only consults it
//! at admission time; age-based eviction governs how long entries live.

use http::header::{CACHE_CONTROL, CONTENT_LENGTH};
use http::{HeaderMap, StatusCode};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Parsed Cache-Control directives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheControl {
    pub no_store: bool,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub public: bool,
    pub private: bool,
    /// `None` when no valid `max-age` was given
    pub max_age: Option<u64>,
}

impl CacheControl {
    /// Parse a Cache-Control header value
    ///
    /// Unknown directives are ignored, as is a `max-age` whose value is not
    /// a non-negative integer.
    pub fn parse(header: &str) -> Self {
        let mut cc = CacheControl::default();

        for part in header.split(',') {
            let part = part.trim().to_ascii_lowercase();
            if let Some(age) = part.strip_prefix("max-age=") {
                if let Ok(age) = age.trim_matches('"').parse::<u64>() {
                    cc.max_age = Some(age);
                }
                continue;
            }
            match part.as_str() {
                "no-store" => cc.no_store = true,
                "no-cache" => cc.no_cache = true,
                "must-revalidate" => cc.must_revalidate = true,
                "public" => cc.public = true,
                "private" => cc.private = true,
                _ => {}
            }
        }

        cc
    }

    /// Parse the Cache-Control header of a response, if any
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(CacheControl::parse)
            .fold(CacheControl::default(), CacheControl::merge)
    }

    fn merge(self, other: CacheControl) -> Self {
        CacheControl {
            no_store: self.no_store || other.no_store,
            no_cache: self.no_cache || other.no_cache,
            must_revalidate: self.must_revalidate || other.must_revalidate,
            public: self.public || other.public,
            private: self.private || other.private,
            max_age: other.max_age.or(self.max_age),
        }
    }
}

/// Declared Content-Length of a response
///
/// Returns `None` when the header is missing or not an integer. Negative
/// values are kept so callers can reject them explicitly.
pub fn declared_length(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
}

/// Decide whether an upstream response may be written to the store
pub fn should_cache(status: StatusCode, headers: &HeaderMap) -> bool {
    let cache_control = CacheControl::from_headers(headers);
    if cache_control.no_store {
        debug!("Skipping cache: no-store directive present");
        return false;
    }

    if status != StatusCode::OK {
        debug!("Skipping cache: status code {}", status.as_u16());
        return false;
    }

    match declared_length(headers) {
        Some(len) if len > 0 => true,
        _ => {
            debug!("Skipping cache: no content or invalid content-length");
            false
        }
    }
}

/// Check whether an entry cached at `cached_at` is still fresh
pub fn can_serve(cached_at: SystemTime, cache_control: &CacheControl) -> bool {
    can_serve_at(cached_at, cache_control, SystemTime::now())
}

/// [`can_serve`] evaluated against an explicit clock
pub fn can_serve_at(cached_at: SystemTime, cache_control: &CacheControl, now: SystemTime) -> bool {
    if let Some(max_age) = cache_control.max_age {
        let age = now.duration_since(cached_at).unwrap_or(Duration::ZERO);
        if age > Duration::from_secs(max_age) {
            debug!("Cached response expired (max-age={})", max_age);
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_parse_directives() {
        let cc = CacheControl::parse("public, max-age=600, must-revalidate");
        assert!(cc.public);
        assert!(cc.must_revalidate);
        assert!(!cc.no_store);
        assert_eq!(cc.max_age, Some(600));

        let cc = CacheControl::parse("no-store,no-cache,private");
        assert!(cc.no_store && cc.no_cache && cc.private);
        assert_eq!(cc.max_age, None);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let cc = CacheControl::parse("Public, Max-Age=60, No-Store");
        assert!(cc.public);
        assert!(cc.no_store);
        assert_eq!(cc.max_age, Some(60));
    }

    #[test]
    fn test_parse_empty_and_invalid_max_age() {
        assert_eq!(CacheControl::parse(""), CacheControl::default());
        assert_eq!(CacheControl::parse("max-age=soon").max_age, None);
        assert_eq!(CacheControl::parse("max-age=-5").max_age, None);
    }

    #[test]
    fn test_multiple_header_lines_merge() {
        let h = headers(&[("cache-control", "public"), ("cache-control", "no-store")]);
        let cc = CacheControl::from_headers(&h);
        assert!(cc.public);
        assert!(cc.no_store);
    }

    #[test]
    fn test_should_cache_plain_200() {
        let h = headers(&[("content-length", "5")]);
        assert!(should_cache(StatusCode::OK, &h));
    }

    #[test]
    fn test_should_cache_rejects_no_store() {
        let h = headers(&[("content-length", "5"), ("cache-control", "no-store")]);
        assert!(!should_cache(StatusCode::OK, &h));
    }

    #[test]
    fn test_should_cache_rejects_non_200() {
        let h = headers(&[("content-length", "5")]);
        assert!(!should_cache(StatusCode::NO_CONTENT, &h));
        assert!(!should_cache(StatusCode::PARTIAL_CONTENT, &h));
        assert!(!should_cache(StatusCode::NOT_FOUND, &h));
        assert!(!should_cache(StatusCode::INTERNAL_SERVER_ERROR, &h));
    }

    #[test]
    fn test_should_cache_content_length_boundaries() {
        assert!(!should_cache(StatusCode::OK, &headers(&[("content-length", "0")])));
        assert!(!should_cache(StatusCode::OK, &headers(&[("content-length", "-1")])));
        assert!(should_cache(StatusCode::OK, &headers(&[("content-length", "1")])));
        assert!(!should_cache(StatusCode::OK, &HeaderMap::new()));
        assert!(!should_cache(StatusCode::OK, &headers(&[("content-length", "abc")])));
    }

    #[test]
    fn test_can_serve_without_max_age() {
        let cached_at = SystemTime::now() - Duration::from_secs(86_400);
        assert!(can_serve(cached_at, &CacheControl::default()));
    }

    #[test]
    fn test_can_serve_with_max_age() {
        let now = SystemTime::now();
        let cc = CacheControl::parse("max-age=60");
        assert!(can_serve_at(now - Duration::from_secs(30), &cc, now));
        assert!(can_serve_at(now - Duration::from_secs(60), &cc, now));
        assert!(!can_serve_at(now - Duration::from_secs(61), &cc, now));
    }

    #[test]
    fn test_can_serve_future_timestamp() {
        let now = SystemTime::now();
        let cc = CacheControl::parse("max-age=0");
        assert!(can_serve_at(now + Duration::from_secs(10), &cc, now));
    }
}
