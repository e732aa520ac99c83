//! Error types for adapter requests.
//!
//! Every failure surfaced by an [`Adapter`](crate::Adapter) or an
//! [`Endpoint`](crate::Endpoint) is a single [`RequestError`]. The failure class is
//! carried in [`RequestError::kind`], and the request context (config, method, url,
//! status, raw response, cause, validation issues) travels with it so callers can
//! pattern-match on fields instead of on distinct error types.

use crate::config::RequestConfig;
use crate::transport::RawResponse;
use crate::validate::Issue;
use http::{Method, StatusCode};
use std::sync::Arc;

/// A boxed error as returned by hooks and custom transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The class of a [`RequestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required URL placeholder or search parameter was not supplied.
    Template,
    /// The server answered with a 4xx status.
    Client,
    /// The server answered with a 5xx status.
    Server,
    /// The request body or the response payload was rejected by a validator.
    Validation,
    /// The request did not complete before its timeout elapsed.
    Timeout,
    /// The request was cancelled through an external abort signal.
    Aborted,
    /// The transport failed before a status was received (connection, DNS, decoding).
    Transport,
    /// The endpoint does not accept the invoked HTTP method.
    NotAccepted,
    /// Invalid configuration: malformed URL, header, template or an unsupported validator.
    Configuration,
    /// Anything else, usually an error raised from a hook.
    Unexpected,
}

/// The unified failure type of the request pipeline.
///
/// # Examples
///
/// ```no_run
/// use adapterkit::{Adapter, ErrorKind, RequestConfig};
///
/// # async fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder().base_url("https://api.example.com")?.build()?;
///
/// match adapter.get("/users/1", None).await {
///     Ok(response) => println!("user: {}", response.data),
///     Err(e) if e.kind == ErrorKind::Client => {
///         eprintln!("rejected with {:?}: {}", e.status, e.reason);
///     }
///     Err(e) => eprintln!("failed: {e}"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug, Clone)]
#[error("{reason}")]
pub struct RequestError {
    /// The failure class.
    pub kind: ErrorKind,
    /// Human readable reason, e.g. `Server error: [500] Internal Server Error`.
    pub reason: String,
    /// The effective request config, when the failure happened after config resolution.
    pub config: Option<Box<RequestConfig>>,
    /// The HTTP method of the failed request.
    pub method: Option<Method>,
    /// The resolved URL of the failed request.
    pub url: Option<String>,
    /// The HTTP status, if a response was received.
    pub status: Option<StatusCode>,
    /// The raw transport response, if one was received.
    pub response: Option<RawResponse>,
    /// The underlying error this one wraps.
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
    /// Structured validation issues, when a schema reported them.
    pub issues: Option<Vec<Issue>>,
}

impl RequestError {
    /// Creates an error of the given kind with no request context attached.
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            config: None,
            method: None,
            url: None,
            status: None,
            response: None,
            cause: None,
            issues: None,
        }
    }

    /// A missing URL placeholder or search parameter.
    pub fn template(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Template, reason)
    }

    /// A configuration problem (bad URL, header, template).
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, reason)
    }

    /// The error used as the abort reason when a request timeout elapses.
    pub fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, "Request aborted, timeout exceeded")
    }

    /// The default abort reason of an [`AbortController`](crate::AbortController).
    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, "Request aborted")
    }

    /// Wraps an arbitrary error as `Unexpected error`.
    pub fn unexpected(cause: impl Into<BoxError>) -> Self {
        Self::new(ErrorKind::Unexpected, "Unexpected error").with_cause(cause)
    }

    /// Classifies a non-success status into a client or server error.
    ///
    /// Returns `None` for statuses below 400.
    pub fn from_status(status: StatusCode, status_text: &str, response: RawResponse) -> Option<Self> {
        let code = status.as_u16();
        let error = if (400..500).contains(&code) {
            Self::new(
                ErrorKind::Client,
                format!("Request failure: [{code}] {status_text}"),
            )
        } else if code >= 500 {
            Self::new(ErrorKind::Server, format!("Server error: [{code}] {status_text}"))
        } else {
            return None;
        };
        Some(error.with_status(status).with_response(response))
    }

    /// Normalizes an error raised by a hook.
    ///
    /// A [`RequestError`] passes through untouched; anything else becomes an
    /// `Unexpected error` with the original as its cause.
    pub fn from_boxed(error: BoxError) -> Self {
        match error.downcast::<RequestError>() {
            Ok(error) => *error,
            Err(other) => Self::unexpected(other),
        }
    }

    /// Attaches the effective config.
    pub fn with_config(mut self, config: &RequestConfig) -> Self {
        self.config = Some(Box::new(config.clone()));
        self
    }

    /// Attaches the method and resolved URL.
    pub fn with_request(mut self, method: &Method, url: impl Into<String>) -> Self {
        self.method = Some(method.clone());
        self.url = Some(url.into());
        self
    }

    /// Attaches the received HTTP status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Attaches the raw transport response.
    pub fn with_response(mut self, response: RawResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// Attaches the underlying cause.
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        let cause: BoxError = cause.into();
        self.cause = Some(Arc::from(cause));
        self
    }

    /// Attaches structured validation issues.
    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = Some(issues);
        self
    }

    /// Fills config, method and url only where they are not set yet.
    pub(crate) fn with_context(
        mut self,
        config: Option<&RequestConfig>,
        method: &Method,
        url: &str,
    ) -> Self {
        if self.config.is_none() {
            self.config = config.map(|c| Box::new(c.clone()));
        }
        if self.method.is_none() {
            self.method = Some(method.clone());
        }
        if self.url.is_none() {
            self.url = Some(url.to_string());
        }
        self
    }

    /// Returns `true` if the retry loop may attempt the request again.
    ///
    /// Any failure whose status is absent or outside 2xx is retryable, which
    /// includes timeouts and transport failures, not only 4xx/5xx responses. A
    /// payload that fails validation after a 2xx response is not retried. Aborts
    /// and failures raised before sending never are.
    ///
    /// # Examples
    ///
    /// ```
    /// use adapterkit::{ErrorKind, RequestError};
    /// use http::StatusCode;
    ///
    /// assert!(RequestError::timeout().is_retryable());
    /// assert!(!RequestError::aborted().is_retryable());
    ///
    /// let invalid = RequestError::new(ErrorKind::Validation, "Invalid response data")
    ///     .with_status(StatusCode::OK);
    /// assert!(!invalid.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Aborted
            | ErrorKind::Template
            | ErrorKind::NotAccepted
            | ErrorKind::Configuration => false,
            _ => !self.status.is_some_and(|s| s.is_success()),
        }
    }

    /// Returns the raw response body as text, if a response was received.
    pub fn raw_response(&self) -> Option<String> {
        self.response.as_ref().map(RawResponse::text)
    }
}

impl From<url::ParseError> for RequestError {
    fn from(error: url::ParseError) -> Self {
        Self::configuration(format!("Invalid URL: {error}")).with_cause(error)
    }
}

impl From<TransportError> for RequestError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Aborted(reason) => *reason,
            other => Self::new(ErrorKind::Transport, "Unexpected error").with_cause(other),
        }
    }
}

/// Errors raised by a [`Transport`](crate::Transport) implementation.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// A network-level error (connection refused, DNS, TLS, ...).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The abort signal fired while the request was in flight.
    ///
    /// Carries the abort reason, which becomes the request's error unchanged.
    #[error("{0}")]
    Aborted(Box<RequestError>),

    /// The request body could not be encoded for the selected content type.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// The response payload could not be decoded.
    #[error("Failed to decode response payload: {0}")]
    Decode(String),

    /// Any other failure raised by a custom transport.
    #[error(transparent)]
    Other(BoxError),
}

/// A specialized `Result` type for adapter requests.
pub type Result<T> = std::result::Result<T, RequestError>;
