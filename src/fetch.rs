//! Network access abstraction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue, PRAGMA};

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::http::{CacheMode, Method, Request, Response};

/// Performs real network requests.
///
/// A completed exchange is `Ok` whatever its status; only transport
/// failures are errors. Callers decide what a non-2xx status means.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Sends the request and buffers the full response.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

#[async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.as_ref().fetch(request).await
    }
}

/// Fetcher backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Builds a fetcher with the configured timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Headers that force an origin round-trip for [`CacheMode::Reload`].
fn cache_headers(mode: CacheMode) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if mode == CacheMode::Reload {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }
    headers
}

fn reqwest_method(method: &Method) -> Result<reqwest::Method> {
    Ok(match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Other(name) => reqwest::Method::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidMethod(name.clone()))?,
    })
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        log::debug!("{} {}", request.method, request.url);
        let resp = self
            .client
            .request(reqwest_method(&request.method)?, request.cache_key())
            .headers(cache_headers(request.cache))
            .send()
            .await?;

        let url = resp.url().to_string();
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await?;

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}
