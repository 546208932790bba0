//! Error types for the offline-shell library.

use thiserror::Error;

/// Errors that can occur while installing, reconciling or serving the cache.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error from the reqwest client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport failure reported by a non-reqwest fetcher.
    #[error("Network error: {0}")]
    Network(String),

    /// A fetch completed but with a non-success status where one was required.
    #[error("Request for {url} failed with status {status}")]
    BadStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// A request method name that is not a valid HTTP token.
    #[error("Invalid HTTP method: {0:?}")]
    InvalidMethod(String),

    /// I/O error during storage operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration could not be parsed.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// The resource manifest is malformed or inconsistent.
    #[error("Invalid resource manifest: {0}")]
    Manifest(String),

    /// A cache storage backend rejected an operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A lifecycle event arrived while the worker was in the wrong state.
    #[error("Invalid worker state: expected {expected}, got {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: String,
        /// State the worker was actually in.
        actual: String,
    },
}

impl Error {
    /// Returns true for failures that originate from the network rather than
    /// from local storage or configuration.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Network(_) | Self::BadStatus { .. })
    }
}

/// A specialized `Result` type for offline-shell operations.
pub type Result<T> = std::result::Result<T, Error>;
