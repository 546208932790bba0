//! Request and response value types exchanged with fetchers and storage.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// HTTP request method. Only `GET` is ever intercepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Other(String),
}

impl Method {
    /// Parses a method name case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Head => write!(f, "HEAD"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// How a request interacts with intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP caching rules apply.
    #[default]
    Default,
    /// Force a round-trip to the origin, ignoring any intermediate cache.
    Reload,
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Absolute request URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Cache bypass semantics.
    pub cache: CacheMode,
}

impl Request {
    /// Creates a GET request for the given URL.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: normalize_url(url.into()),
            method: Method::Get,
            cache: CacheMode::Default,
        }
    }

    /// Creates a request with an explicit method.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: normalize_url(url.into()),
            method,
            cache: CacheMode::Default,
        }
    }

    /// Sets the cache mode.
    #[must_use]
    pub const fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Returns the key this request is stored under: the URL without any
    /// `#fragment`.
    #[must_use]
    pub fn cache_key(&self) -> &str {
        self.url
            .split_once('#')
            .map_or(self.url.as_str(), |(before, _)| before)
    }
}

/// Gives a bare `scheme://host` URL an empty path (`/`), so
/// `https://example.com` and `https://example.com/` share a cache key.
fn normalize_url(mut url: String) -> String {
    if let Some(scheme_end) = url.find("://") {
        let authority_start = scheme_end + 3;
        let boundary = url[authority_start..]
            .find(['/', '?', '#'])
            .map(|i| (authority_start + i, url.as_bytes()[authority_start + i]));
        match boundary {
            None => url.push('/'),
            Some((i, b'?' | b'#')) => url.insert(i, '/'),
            Some(_) => {}
        }
    }
    url
}

/// A response, either fresh from the network or replayed from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final URL of the response.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response headers (lower-cased names).
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Bytes,
}

impl Response {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Adds a header, lower-casing its name.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Returns true for a 2xx status.
    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the body length in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.body.len() as u64
    }

    /// Returns true when the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
