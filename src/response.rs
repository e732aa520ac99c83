//! The success envelope returned by adapter and endpoint calls.
//!
//! A [`ResponseEnvelope`] carries the validated payload together with the request
//! it answers (adapter, method, URL, effective config) and the raw transport
//! response. Calls hand it out as an `Arc` so that deduplicated callers can share
//! the very same envelope.

use crate::adapter::Adapter;
use crate::config::RequestConfig;
use crate::transport::RawResponse;
use crate::{RequestError, Result};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use url::Url;

/// A successful response.
///
/// # Examples
///
/// ```no_run
/// use adapterkit::Adapter;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = adapter.get("/users/123", None).await?;
/// let user: User = response.json()?;
///
/// println!("User: {} ({})", user.name, user.id);
/// println!("Request took {:?} over {} attempt(s)", response.latency, response.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResponseEnvelope {
    /// The adapter that produced this response.
    pub adapter: Adapter,
    /// HTTP method of the request.
    pub method: Method,
    /// The resolved request URL.
    pub url: Url,
    /// The effective config of the request.
    pub config: RequestConfig,
    /// The decoded, validated payload.
    pub data: Value,
    /// The raw transport response.
    pub response: RawResponse,
    /// Number of transport attempts. `1` when the first attempt succeeded.
    pub attempts: usize,
    /// Time from the first attempt until the response was validated.
    pub latency: Duration,
}

impl ResponseEnvelope {
    /// Creates an envelope for a single attempt.
    pub fn new(
        adapter: Adapter,
        method: Method,
        url: Url,
        config: RequestConfig,
        data: Value,
        response: RawResponse,
    ) -> Self {
        Self {
            adapter,
            method,
            url,
            config,
            data,
            response,
            attempts: 1,
            latency: Duration::ZERO,
        }
    }

    /// Returns a copy with a different payload.
    pub fn with_data(&self, data: Value) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Deserializes the payload into `T`.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if the payload does not match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.data).map_err(|e| {
            RequestError::new(crate::ErrorKind::Validation, "Invalid response data")
                .with_config(&self.config)
                .with_request(&self.method, self.url.as_str())
                .with_status(self.response.status)
                .with_cause(e)
        })
    }

    /// The HTTP status of the raw response.
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// Returns a response header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response.header(name)
    }

    /// Returns `true` if the request needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }
}

impl fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEnvelope")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("status", &self.response.status)
            .field("data", &self.data)
            .field("attempts", &self.attempts)
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}
