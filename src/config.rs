//! Request configuration and the layered config merge.
//!
//! Configuration comes in three layers: adapter defaults ([`AdapterOptions`]),
//! optional endpoint overrides, and per-call overrides ([`RequestConfig`]). Layers
//! are combined with [`RequestConfig::merge`], which never mutates its inputs.

use crate::abort::AbortSignal;
use crate::hooks::{
    AfterBuildUrlHook, AfterResponseHook, BeforeRequestHook, RequestErrorHook,
};
use crate::transport::Transport;
use crate::validate::Validator;
use crate::{RequestError, Result};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Search parameters in serialization order.
pub type SearchParams = Vec<(String, String)>;

/// Per-call request configuration.
///
/// Every field is optional; unset fields fall through to the lower config layers.
///
/// # Examples
///
/// ```
/// use adapterkit::RequestConfig;
/// use std::time::Duration;
///
/// let config = RequestConfig::new()
///     .with_timeout(Duration::from_secs(5))
///     .with_auto_retry(2)
///     .with_search_param("page", "2")
///     .with_header("X-Trace", "abc")
///     .unwrap();
///
/// assert_eq!(config.get_search_param("page"), Some("2"));
/// ```
#[derive(Clone, Default)]
pub struct RequestConfig {
    /// Base URL the request path is resolved against.
    pub base_url: Option<Url>,
    /// Path prefix inserted between the base URL and the request path.
    pub base_path: Option<String>,
    /// Deadline for a single attempt.
    pub timeout: Option<Duration>,
    /// How many times a failed attempt is retried. `0` means a single attempt.
    pub auto_retry: Option<u32>,
    /// Pause between attempts.
    pub retry_delay: Option<Duration>,
    /// Opaque, transport-specific options.
    pub transport_options: Option<Value>,
    /// Request headers.
    pub headers: HeaderMap,
    /// External cancellation.
    pub abort_signal: Option<AbortSignal>,
    /// Query string parameters, serialized in the given order.
    pub search_params: Option<SearchParams>,
    /// Validator applied to the decoded response payload.
    pub validate: Option<Validator>,
    /// Request body for POST/PUT/PATCH/DELETE.
    pub body: Option<Value>,
}

impl RequestConfig {
    /// Creates an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn with_base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the base path.
    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the number of retries.
    pub fn with_auto_retry(mut self, retries: u32) -> Self {
        self.auto_retry = Some(retries);
        self
    }

    /// Sets the delay between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Replaces the transport options.
    pub fn with_transport_options(mut self, options: Value) -> Self {
        self.transport_options = Some(options);
        self
    }

    /// Sets a single transport option, turning the options into an object if needed.
    pub fn with_transport_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let options = self
            .transport_options
            .get_or_insert_with(|| Value::Object(Default::default()));
        if !options.is_object() {
            *options = Value::Object(Default::default());
        }
        if let Value::Object(map) = options {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Sets a header, replacing any value with the same (case-insensitive) name.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Replaces the header map.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Attaches an external abort signal.
    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    /// Appends a search parameter.
    pub fn with_search_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }

    /// Appends several search parameters, keeping their order.
    pub fn with_search_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.search_params
            .get_or_insert_with(Vec::new)
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the response validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validate = Some(validator);
        self
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `body` to JSON and sets it as the request body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized.
    pub fn with_json_body<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| {
            RequestError::configuration(format!("Failed to serialize request body: {e}"))
                .with_cause(e)
        })?;
        self.body = Some(value);
        Ok(self)
    }

    /// Returns the value of the first search parameter named `name`.
    pub fn get_search_param(&self, name: &str) -> Option<&str> {
        self.search_params
            .as_ref()?
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Merges `overrides` on top of `self`, returning a new config.
    ///
    /// Scalars: the override wins when set. Headers: union by case-insensitive
    /// name, the override's values replace same-named base values. Base paths are
    /// joined with exactly one slash. Transport options are shallow-merged when
    /// both are objects, otherwise the override replaces them.
    ///
    /// # Examples
    ///
    /// ```
    /// use adapterkit::RequestConfig;
    ///
    /// let base = RequestConfig::new()
    ///     .with_base_path("/api/")
    ///     .with_header("Accept", "application/json")
    ///     .unwrap();
    /// let call = RequestConfig::new()
    ///     .with_base_path("/v2")
    ///     .with_header("accept", "text/plain")
    ///     .unwrap();
    ///
    /// let merged = base.merge(&call);
    /// assert_eq!(merged.base_path.as_deref(), Some("/api/v2"));
    /// assert_eq!(merged.headers["ACCEPT"], "text/plain");
    /// ```
    pub fn merge(&self, overrides: &RequestConfig) -> RequestConfig {
        RequestConfig {
            base_url: overrides.base_url.clone().or_else(|| self.base_url.clone()),
            base_path: merge_base_path(self.base_path.as_deref(), overrides.base_path.as_deref()),
            timeout: overrides.timeout.or(self.timeout),
            auto_retry: overrides.auto_retry.or(self.auto_retry),
            retry_delay: overrides.retry_delay.or(self.retry_delay),
            transport_options: merge_transport_options(
                self.transport_options.as_ref(),
                overrides.transport_options.as_ref(),
            ),
            headers: merge_headers(&self.headers, &overrides.headers),
            abort_signal: overrides
                .abort_signal
                .clone()
                .or_else(|| self.abort_signal.clone()),
            search_params: overrides
                .search_params
                .clone()
                .or_else(|| self.search_params.clone()),
            validate: overrides.validate.clone().or_else(|| self.validate.clone()),
            body: overrides.body.clone().or_else(|| self.body.clone()),
        }
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("base_path", &self.base_path)
            .field("timeout", &self.timeout)
            .field("auto_retry", &self.auto_retry)
            .field("retry_delay", &self.retry_delay)
            .field("transport_options", &self.transport_options)
            .field("headers", &self.headers)
            .field("abort_signal", &self.abort_signal.is_some())
            .field("search_params", &self.search_params)
            .field("validate", &self.validate)
            .field("body", &self.body)
            .finish()
    }
}

/// Joins two path fragments with exactly one slash at the seam.
pub(crate) fn join_path(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

fn merge_base_path(base: Option<&str>, overrides: Option<&str>) -> Option<String> {
    match (base, overrides) {
        (Some(base), Some(overrides)) => Some(join_path(base, overrides)),
        (base, overrides) => overrides.or(base).map(str::to_string),
    }
}

fn merge_transport_options(base: Option<&Value>, overrides: Option<&Value>) -> Option<Value> {
    match (base, overrides) {
        (Some(Value::Object(base)), Some(Value::Object(overrides))) => {
            let mut merged = base.clone();
            merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(Value::Object(merged))
        }
        (base, overrides) => overrides.or(base).cloned(),
    }
}

/// Copies `base`, then replaces or adds every header named in `overrides`.
pub(crate) fn merge_headers(base: &HeaderMap, overrides: &HeaderMap) -> HeaderMap {
    let mut merged = base.clone();
    for name in overrides.keys() {
        merged.remove(name);
        for value in overrides.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let name = HeaderName::try_from(name)
        .map_err(|e| RequestError::configuration(format!("Invalid header name: {e}")))?;
    let value = HeaderValue::try_from(value)
        .map_err(|e| RequestError::configuration(format!("Invalid header value: {e}")))?;
    Ok((name, value))
}

/// Adapter-level defaults, hooks and transport.
///
/// Used both to build a new [`Adapter`](crate::Adapter) and to derive one with
/// [`Adapter::extend`](crate::Adapter::extend).
///
/// # Examples
///
/// ```no_run
/// use adapterkit::{Adapter, AdapterOptions};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder()
///     .base_url("https://api.example.com")?
///     .base_path("/v1")
///     .default_timeout(Duration::from_secs(10))
///     .default_auto_retry(2)
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
///
/// let admin = adapter.extend(AdapterOptions::new().base_path("/admin"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct AdapterOptions {
    /// Default base URL.
    pub base_url: Option<Url>,
    /// Default base path.
    pub base_path: Option<String>,
    /// Default per-attempt timeout.
    pub default_timeout: Option<Duration>,
    /// Default retry count.
    pub default_auto_retry: Option<u32>,
    /// Default delay between retries.
    pub default_retry_delay: Option<Duration>,
    /// Default transport options.
    pub default_transport_options: Option<Value>,
    /// Headers sent with every request.
    pub default_headers: HeaderMap,
    /// Hooks run before the transport call.
    pub on_before_request: Vec<Arc<dyn BeforeRequestHook>>,
    /// Hooks run on each successful response.
    pub on_after_response: Vec<Arc<dyn AfterResponseHook>>,
    /// Hooks run on each built URL.
    pub on_after_build_url: Vec<Arc<dyn AfterBuildUrlHook>>,
    /// Hooks run on each failure.
    pub on_request_error: Vec<Arc<dyn RequestErrorHook>>,
    /// The transport. Defaults to the reqwest transport, or the parent's when extending.
    pub transport: Option<Arc<dyn Transport>>,
}

impl AdapterOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Sets the default base path.
    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the default timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Sets the default retry count.
    pub fn default_auto_retry(mut self, retries: u32) -> Self {
        self.default_auto_retry = Some(retries);
        self
    }

    /// Sets the default retry delay.
    pub fn default_retry_delay(mut self, delay: Duration) -> Self {
        self.default_retry_delay = Some(delay);
        self
    }

    /// Sets the default transport options.
    pub fn default_transport_options(mut self, options: Value) -> Self {
        self.default_transport_options = Some(options);
        self
    }

    /// Adds a header sent with every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name.as_ref(), value.as_ref())?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Adds a before-request hook.
    pub fn on_before_request(mut self, hook: impl BeforeRequestHook + 'static) -> Self {
        self.on_before_request.push(Arc::new(hook));
        self
    }

    /// Adds an after-response hook.
    pub fn on_after_response(mut self, hook: impl AfterResponseHook + 'static) -> Self {
        self.on_after_response.push(Arc::new(hook));
        self
    }

    /// Adds an after-build-url hook.
    pub fn on_after_build_url(mut self, hook: impl AfterBuildUrlHook + 'static) -> Self {
        self.on_after_build_url.push(Arc::new(hook));
        self
    }

    /// Adds a request-error hook.
    pub fn on_request_error(mut self, hook: impl RequestErrorHook + 'static) -> Self {
        self.on_request_error.push(Arc::new(hook));
        self
    }

    /// Sets the transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Builds the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if no transport was set and the default reqwest transport
    /// cannot be constructed.
    pub fn build(self) -> Result<crate::Adapter> {
        crate::Adapter::new(self)
    }

    /// The adapter-level config layer described by these options.
    pub(crate) fn base_config(&self) -> RequestConfig {
        RequestConfig {
            base_url: self.base_url.clone(),
            base_path: self.base_path.clone(),
            timeout: self.default_timeout,
            auto_retry: self.default_auto_retry,
            retry_delay: self.default_retry_delay,
            transport_options: self.default_transport_options.clone(),
            headers: self.default_headers.clone(),
            ..RequestConfig::default()
        }
    }
}

impl fmt::Debug for AdapterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterOptions")
            .field("base_config", &self.base_config())
            .field("on_before_request", &self.on_before_request.len())
            .field("on_after_response", &self.on_after_response.len())
            .field("on_after_build_url", &self.on_after_build_url.len())
            .field("on_request_error", &self.on_request_error.len())
            .field("transport", &self.transport.is_some())
            .finish()
    }
}
