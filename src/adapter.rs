//! The adapter and its request pipeline.
//!
//! A call goes through these stages:
//!
//! 1. merge the adapter's base config with the call config and attach a JSON
//!    `Content-Type` for body-bearing methods
//! 2. build the URL (base URL, base path, search params, after-build-url hooks)
//! 3. run the before-request hooks, which may rewrite the request or answer it
//! 4. send through the transport, racing the timeout and the abort signal
//! 5. classify the status, extract and validate the payload, retrying on failure
//! 6. run the after-response hooks
//!
//! Any failure is normalized to a [`RequestError`] and passed through the
//! request-error hooks before it reaches the caller.

use crate::abort::{AbortController, AbortSignal};
use crate::config::{AdapterOptions, RequestConfig};
use crate::endpoint::{carries_body, Endpoint, EndpointConfig};
use crate::hooks::{
    AfterBuildUrlHook, AfterResponseHook, BeforeRequest, BeforeRequestHook, Handler, HandlerId,
    HookRegistry, RequestErrorHook,
};
use crate::response::ResponseEnvelope;
use crate::transport::{RawResponse, ReqwestTransport, Transport, TransportRequest};
use crate::url_builder::build_url;
use crate::{ErrorKind, RequestError, Result};
use futures::future;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// `Content-Type` attached to body-bearing requests that do not set one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// A request after URL building, as seen by before-request hooks and the transport.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    /// HTTP method.
    pub method: Method,
    /// The built URL.
    pub url: Url,
    /// The effective config.
    pub config: RequestConfig,
    /// The request body.
    pub body: Option<Value>,
}

/// An HTTP request adapter.
///
/// Holds the default config, the transport and four hook lists. Cloning is cheap
/// and clones share hooks. Derived adapters created with [`Adapter::extend`] run
/// their parents' hooks before their own.
///
/// # Examples
///
/// ```no_run
/// use adapterkit::{Adapter, RequestConfig};
/// use serde_json::json;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder()
///     .base_url("https://api.example.com")?
///     .default_timeout(Duration::from_secs(10))
///     .default_auto_retry(2)
///     .build()?;
///
/// let users = adapter
///     .get("/users", RequestConfig::new().with_search_param("page", "1"))
///     .await?;
/// println!("{}", users.data);
///
/// let created = adapter
///     .post("/users", RequestConfig::new().with_body(json!({ "name": "Ada" })))
///     .await?;
/// println!("created with status {}", created.status());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

struct AdapterInner {
    transport: Arc<dyn Transport>,
    base_config: RequestConfig,
    parent: Option<Adapter>,
    hooks: HookRegistry,
}

impl Adapter {
    /// Returns empty [`AdapterOptions`] to configure a new adapter.
    pub fn builder() -> AdapterOptions {
        AdapterOptions::default()
    }

    /// Creates an adapter from options.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if no transport is given and the default
    /// reqwest transport cannot be built.
    pub fn new(options: AdapterOptions) -> Result<Self> {
        let transport: Arc<dyn Transport> = match &options.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(ReqwestTransport::new().map_err(|e| {
                RequestError::configuration(format!("Failed to build HTTP client: {e}"))
                    .with_cause(e)
            })?),
        };

        Ok(Self {
            inner: Arc::new(AdapterInner {
                transport,
                base_config: options.base_config(),
                parent: None,
                hooks: HookRegistry::from_options(&options),
            }),
        })
    }

    /// Derives a child adapter.
    ///
    /// The child's config is the parent's merged with `options`, and its hook
    /// lists hold only the hooks in `options`; the parent's hooks still run
    /// first. The parent's transport is reused unless `options` sets one.
    pub fn extend(&self, options: AdapterOptions) -> Adapter {
        let transport = options
            .transport
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.inner.transport));

        Adapter {
            inner: Arc::new(AdapterInner {
                transport,
                base_config: self.inner.base_config.merge(&options.base_config()),
                parent: Some(self.clone()),
                hooks: HookRegistry::from_options(&options),
            }),
        }
    }

    /// Creates an endpoint bound to this adapter, or to a child adapter when the
    /// endpoint config carries options.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the URL template is malformed.
    pub fn endpoint(&self, config: EndpointConfig) -> Result<Endpoint> {
        Endpoint::new(self, config)
    }

    /// The adapter-level config layer.
    pub fn base_config(&self) -> &RequestConfig {
        &self.inner.base_config
    }

    /// The adapter this one was extended from.
    pub fn parent(&self) -> Option<&Adapter> {
        self.inner.parent.as_ref()
    }

    /// The transport used by this adapter.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Registers a hook on this adapter.
    pub fn add_handler(&self, handler: Handler) -> HandlerId {
        self.inner.hooks.add(handler)
    }

    /// Removes a hook registered on this adapter. Returns `false` if it was not found.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        self.inner.hooks.remove(id)
    }

    /// Returns `true` if both handles refer to the same adapter.
    pub fn ptr_eq(a: &Adapter, b: &Adapter) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Sends a GET request.
    pub async fn get(
        &self,
        url: &str,
        config: impl Into<Option<RequestConfig>>,
    ) -> Result<Arc<ResponseEnvelope>> {
        self.request(Method::GET, url, config.into(), None).await
    }

    /// Sends an OPTIONS request.
    pub async fn options(
        &self,
        url: &str,
        config: impl Into<Option<RequestConfig>>,
    ) -> Result<Arc<ResponseEnvelope>> {
        self.request(Method::OPTIONS, url, config.into(), None).await
    }

    /// Sends a POST request with `config.body`.
    pub async fn post(
        &self,
        url: &str,
        config: impl Into<Option<RequestConfig>>,
    ) -> Result<Arc<ResponseEnvelope>> {
        self.request_with_body(Method::POST, url, config.into()).await
    }

    /// Sends a PUT request with `config.body`.
    pub async fn put(
        &self,
        url: &str,
        config: impl Into<Option<RequestConfig>>,
    ) -> Result<Arc<ResponseEnvelope>> {
        self.request_with_body(Method::PUT, url, config.into()).await
    }

    /// Sends a PATCH request with `config.body`.
    pub async fn patch(
        &self,
        url: &str,
        config: impl Into<Option<RequestConfig>>,
    ) -> Result<Arc<ResponseEnvelope>> {
        self.request_with_body(Method::PATCH, url, config.into()).await
    }

    /// Sends a DELETE request with `config.body`.
    pub async fn delete(
        &self,
        url: &str,
        config: impl Into<Option<RequestConfig>>,
    ) -> Result<Arc<ResponseEnvelope>> {
        self.request_with_body(Method::DELETE, url, config.into()).await
    }

    async fn request_with_body(
        &self,
        method: Method,
        url: &str,
        config: Option<RequestConfig>,
    ) -> Result<Arc<ResponseEnvelope>> {
        let body = config.as_ref().and_then(|c| c.body.clone());
        self.request(method, url, config, body).await
    }

    /// Runs the full pipeline for one call.
    ///
    /// # Errors
    ///
    /// Returns the [`RequestError`] produced by the failing stage, after the
    /// request-error hooks had a chance to replace it.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        config: Option<RequestConfig>,
        body: Option<Value>,
    ) -> Result<Arc<ResponseEnvelope>> {
        let config = self.create_request_config(&method, config.as_ref());

        let url = match build_url(url, &config, &self.after_build_url_hooks()) {
            Ok(resolved) => resolved,
            Err(error) => {
                let error = error.with_context(Some(&config), &method, url);
                return Err(self.handle_error(error).await);
            }
        };

        let context = (config.clone(), url.to_string());
        let request = PreparedRequest {
            method: method.clone(),
            url,
            config,
            body,
        };

        match self.execute(request).await {
            Ok(response) => Ok(response),
            Err(error) => {
                let error = error.with_context(Some(&context.0), &method, &context.1);
                Err(self.handle_error(error).await)
            }
        }
    }

    /// Sends a prepared request with timeout, classification, validation and retry.
    ///
    /// This is the stage between the before-request and after-response hooks.
    /// Extensions call it from inside a before-request hook to perform the actual
    /// transport call. Neither hook chain runs here.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub async fn dispatch(&self, request: &PreparedRequest) -> Result<Arc<ResponseEnvelope>> {
        let max_attempts = request.config.auto_retry.unwrap_or(0) as usize + 1;
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.attempt(request, attempt).await {
                Ok((data, response)) => {
                    let mut envelope = ResponseEnvelope::new(
                        self.clone(),
                        request.method.clone(),
                        request.url.clone(),
                        request.config.clone(),
                        data,
                        response,
                    );
                    envelope.attempts = attempt;
                    envelope.latency = started.elapsed();
                    return Ok(Arc::new(envelope));
                }
                Err(error) => error.with_context(
                    Some(&request.config),
                    &request.method,
                    request.url.as_str(),
                ),
            };

            tracing::warn!(
                error = %error,
                attempt = attempt,
                method = %request.method,
                url = %request.url,
                "Request attempt failed"
            );

            let attempts_left = max_attempts - attempt;
            // Everything that did not end in a 2xx is retried, local failures
            // included. Revisit for non-idempotent methods.
            let externally_aborted = request
                .config
                .abort_signal
                .as_ref()
                .is_some_and(AbortSignal::is_aborted);
            if attempts_left == 0 || externally_aborted || !error.is_retryable() {
                return Err(error);
            }

            let delay = request.config.retry_delay.unwrap_or(Duration::ZERO);
            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempts_left = attempts_left,
                "Retrying request"
            );
            if delay.is_zero() {
                continue;
            }
            match &request.config.abort_signal {
                Some(signal) => tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    reason = signal.aborted() => {
                        return Err(reason.with_context(
                            Some(&request.config),
                            &request.method,
                            request.url.as_str(),
                        ));
                    }
                },
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    fn create_request_config(&self, method: &Method, config: Option<&RequestConfig>) -> RequestConfig {
        let mut merged = match config {
            Some(config) => self.inner.base_config.merge(config),
            None => self.inner.base_config.clone(),
        };

        if carries_body(method) && !merged.headers.contains_key(CONTENT_TYPE) {
            merged
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        }
        merged
    }

    async fn execute(&self, mut request: PreparedRequest) -> Result<Arc<ResponseEnvelope>> {
        for hook in self.before_request_hooks() {
            let outcome = hook
                .before_request(self, &request)
                .await
                .map_err(RequestError::from_boxed)?;

            match outcome {
                BeforeRequest::Continue => {}
                BeforeRequest::Replace { url, config, body } => {
                    request = PreparedRequest {
                        method: request.method,
                        url,
                        config,
                        body,
                    };
                }
                BeforeRequest::Respond(response) => {
                    tracing::debug!(
                        method = %request.method,
                        url = %request.url,
                        "Request answered by a before-request hook"
                    );
                    return self.run_after_response(response).await;
                }
            }
        }

        let response = self.dispatch(&request).await?;
        self.run_after_response(response).await
    }

    async fn attempt(
        &self,
        request: &PreparedRequest,
        attempt: usize,
    ) -> Result<(Value, RawResponse)> {
        let config = &request.config;
        let deadline = AbortController::new();
        let signal = match &config.abort_signal {
            Some(external) => AbortSignal::any([deadline.signal(), external.clone()]),
            None => deadline.signal(),
        };
        if let Some(reason) = signal.reason() {
            return Err(reason);
        }

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            attempt = attempt,
            "Executing HTTP request"
        );

        let started = Instant::now();
        let send = self.inner.transport.send_request(TransportRequest {
            method: request.method.clone(),
            url: request.url.clone(),
            body: request.body.clone(),
            options: config.transport_options.clone(),
            headers: config.headers.clone(),
            abort_signal: Some(signal.clone()),
        });
        let timeout = config.timeout.filter(|t| !t.is_zero());
        let elapsed = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => future::pending().await,
            }
        };

        // Dropping the losing branches cancels the send and clears the timer.
        let (response, status, status_text) = tokio::select! {
            result = send => result?,
            reason = signal.aborted() => return Err(reason),
            () = elapsed => {
                deadline.abort_with(RequestError::timeout());
                return Err(RequestError::timeout());
            }
        };

        if let Some(error) = RequestError::from_status(status, &status_text, response.clone()) {
            if error.kind == ErrorKind::Client {
                tracing::error!(
                    status = status.as_u16(),
                    response = %response.text(),
                    "Client error (4xx)"
                );
            } else {
                tracing::warn!(
                    status = status.as_u16(),
                    response = %response.text(),
                    "Server error (5xx)"
                );
            }
            return Err(error);
        }

        tracing::info!(
            status = status.as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            attempt = attempt,
            "Received HTTP response"
        );

        let data = self
            .inner
            .transport
            .extract_payload(&response, config.transport_options.as_ref())
            .await
            .map_err(|e| {
                RequestError::from(e)
                    .with_status(status)
                    .with_response(response.clone())
            })?;

        if let Some(validator) = &config.validate {
            validator
                .check(&data, "Invalid response data")
                .map_err(|e| e.with_status(status).with_response(response.clone()))?;
        }

        Ok((data, response))
    }

    async fn run_after_response(
        &self,
        mut response: Arc<ResponseEnvelope>,
    ) -> Result<Arc<ResponseEnvelope>> {
        for hook in self.after_response_hooks() {
            if let Some(replacement) = hook
                .after_response(&response)
                .await
                .map_err(RequestError::from_boxed)?
            {
                response = replacement;
            }
        }
        Ok(response)
    }

    /// Passes `error` through the request-error hooks, parents first.
    pub(crate) async fn handle_error(&self, mut error: RequestError) -> RequestError {
        for hook in self.request_error_hooks() {
            if let Some(replacement) = hook.on_error(&error).await {
                error = replacement;
            }
        }
        error
    }

    /// This adapter and its ancestors, root first.
    fn lineage(&self) -> Vec<&Adapter> {
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(adapter) = current {
            chain.push(adapter);
            current = adapter.inner.parent.as_ref();
        }
        chain.reverse();
        chain
    }

    fn before_request_hooks(&self) -> Vec<Arc<dyn BeforeRequestHook>> {
        self.lineage()
            .into_iter()
            .flat_map(|a| a.inner.hooks.before_request())
            .collect()
    }

    fn after_response_hooks(&self) -> Vec<Arc<dyn AfterResponseHook>> {
        self.lineage()
            .into_iter()
            .flat_map(|a| a.inner.hooks.after_response())
            .collect()
    }

    pub(crate) fn after_build_url_hooks(&self) -> Vec<Arc<dyn AfterBuildUrlHook>> {
        self.lineage()
            .into_iter()
            .flat_map(|a| a.inner.hooks.after_build_url())
            .collect()
    }

    fn request_error_hooks(&self) -> Vec<Arc<dyn RequestErrorHook>> {
        self.lineage()
            .into_iter()
            .flat_map(|a| a.inner.hooks.request_error())
            .collect()
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("base_config", &self.inner.base_config)
            .field("hooks", &self.inner.hooks)
            .field("parent", &self.inner.parent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;
    use async_trait::async_trait;
    use http::StatusCode;

    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn send_request(
            &self,
            request: TransportRequest,
        ) -> std::result::Result<(RawResponse, StatusCode, String), TransportError> {
            let content_type = request
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(Value::from)
                .unwrap_or(Value::Null);
            let response = RawResponse::new(StatusCode::OK)
                .with_url(request.url.as_str())
                .with_json(&serde_json::json!({ "content_type": content_type }));
            Ok((response, StatusCode::OK, "OK".to_string()))
        }
    }

    fn adapter() -> Adapter {
        Adapter::builder().transport(Echo).build().unwrap()
    }

    #[tokio::test]
    async fn test_content_type_only_for_body_methods() {
        let adapter = adapter();

        let purge = Method::from_bytes(b"PURGE").unwrap();
        for method in [Method::GET, Method::OPTIONS, Method::HEAD, Method::TRACE, purge] {
            let response = adapter.request(method, "/x", None, None).await.unwrap();
            assert_eq!(response.data["content_type"], Value::Null);
        }
        for method in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let response = adapter.request(method, "/x", None, None).await.unwrap();
            assert_eq!(response.data["content_type"], DEFAULT_CONTENT_TYPE);
        }

        let config = RequestConfig::new()
            .with_header("content-type", "text/plain")
            .unwrap();
        let response = adapter.post("/x", config).await.unwrap();
        assert_eq!(response.data["content_type"], "text/plain");
    }

    #[test]
    fn test_extend_layers_config_and_reuses_transport() {
        let parent = Adapter::builder()
            .transport(Echo)
            .base_url("http://example.com")
            .unwrap()
            .base_path("/api")
            .default_auto_retry(1)
            .build()
            .unwrap();
        let child = parent.extend(AdapterOptions::new().base_path("v2").default_auto_retry(3));

        assert_eq!(child.base_config().base_path.as_deref(), Some("/api/v2"));
        assert_eq!(child.base_config().auto_retry, Some(3));
        assert_eq!(parent.base_config().auto_retry, Some(1));
        assert!(Arc::ptr_eq(parent.transport(), child.transport()));
        assert!(Adapter::ptr_eq(child.parent().unwrap(), &parent));
    }

    #[tokio::test]
    async fn test_envelope_reports_resolved_request() {
        let adapter = adapter();
        let config = RequestConfig::new().with_search_param("q", "rust");
        let response = adapter.get("/search", config).await.unwrap();

        assert!(Adapter::ptr_eq(&response.adapter, &adapter));
        assert_eq!(response.method, Method::GET);
        assert_eq!(response.url.as_str(), "http://127.0.0.1/search?q=rust");
        assert_eq!(response.attempts, 1);
    }
}
