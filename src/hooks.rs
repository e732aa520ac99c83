//! Hook points of the request pipeline.
//!
//! Four hook kinds run at fixed pipeline stages:
//!
//! - [`BeforeRequestHook`]: may rewrite the prepared request or answer it directly.
//! - [`AfterResponseHook`]: may replace the response envelope.
//! - [`AfterBuildUrlHook`]: may replace the built URL.
//! - [`RequestErrorHook`]: may replace the error (but never swallow it).
//!
//! Hooks of a derived adapter run after the hooks of its parents. Plain closures
//! implement every hook trait, so most hooks are one-liners:
//!
//! ```
//! use adapterkit::{Adapter, RequestError};
//! use url::Url;
//!
//! # fn example() -> Result<(), RequestError> {
//! let adapter = Adapter::builder()
//!     .on_after_build_url(|url: &Url| {
//!         let mut url = url.clone();
//!         url.query_pairs_mut().append_pair("api_key", "secret");
//!         Some(url)
//!     })
//!     .on_request_error(|error: &RequestError| -> Option<RequestError> {
//!         tracing::warn!(reason = %error.reason, "request failed");
//!         None
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::adapter::{Adapter, PreparedRequest};
use crate::config::{AdapterOptions, RequestConfig};
use crate::error::BoxError;
use crate::response::ResponseEnvelope;
use crate::RequestError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

/// Result of a fallible hook. Errors that are not a [`RequestError`] are wrapped
/// as `Unexpected error`.
pub type HookResult<T> = std::result::Result<T, BoxError>;

/// What a before-request hook decided.
#[derive(Debug, Clone)]
pub enum BeforeRequest {
    /// Leave the request unchanged.
    Continue,
    /// Replace the request; later hooks and the transport see the replacement.
    Replace {
        /// The new URL.
        url: Url,
        /// The new effective config.
        config: RequestConfig,
        /// The new body.
        body: Option<Value>,
    },
    /// Skip the transport and answer with this envelope.
    Respond(Arc<ResponseEnvelope>),
}

/// Runs before the transport call.
#[async_trait]
pub trait BeforeRequestHook: Send + Sync {
    /// Inspects the prepared request. `adapter` is the adapter executing it.
    async fn before_request(
        &self,
        adapter: &Adapter,
        request: &PreparedRequest,
    ) -> HookResult<BeforeRequest>;
}

#[async_trait]
impl<F> BeforeRequestHook for F
where
    F: Fn(&PreparedRequest) -> HookResult<BeforeRequest> + Send + Sync,
{
    async fn before_request(
        &self,
        _adapter: &Adapter,
        request: &PreparedRequest,
    ) -> HookResult<BeforeRequest> {
        self(request)
    }
}

/// Runs on every successful response, including short-circuited ones.
#[async_trait]
pub trait AfterResponseHook: Send + Sync {
    /// Returns a replacement envelope, or `None` to keep the current one.
    async fn after_response(
        &self,
        response: &Arc<ResponseEnvelope>,
    ) -> HookResult<Option<Arc<ResponseEnvelope>>>;
}

#[async_trait]
impl<F> AfterResponseHook for F
where
    F: Fn(&Arc<ResponseEnvelope>) -> HookResult<Option<Arc<ResponseEnvelope>>> + Send + Sync,
{
    async fn after_response(
        &self,
        response: &Arc<ResponseEnvelope>,
    ) -> HookResult<Option<Arc<ResponseEnvelope>>> {
        self(response)
    }
}

/// Runs on every built URL, both for requests and for endpoint link generation.
pub trait AfterBuildUrlHook: Send + Sync {
    /// Returns a replacement URL, or `None` to keep the current one.
    fn after_build_url(&self, url: &Url) -> Option<Url>;
}

impl<F> AfterBuildUrlHook for F
where
    F: Fn(&Url) -> Option<Url> + Send + Sync,
{
    fn after_build_url(&self, url: &Url) -> Option<Url> {
        self(url)
    }
}

/// Runs on every failure before it reaches the caller.
#[async_trait]
pub trait RequestErrorHook: Send + Sync {
    /// Returns a replacement error, or `None` to keep the current one.
    async fn on_error(&self, error: &RequestError) -> Option<RequestError>;
}

#[async_trait]
impl<F> RequestErrorHook for F
where
    F: Fn(&RequestError) -> Option<RequestError> + Send + Sync,
{
    async fn on_error(&self, error: &RequestError) -> Option<RequestError> {
        self(error)
    }
}

/// A hook of any kind, for [`Adapter::add_handler`].
#[derive(Clone)]
pub enum Handler {
    /// A before-request hook.
    BeforeRequest(Arc<dyn BeforeRequestHook>),
    /// An after-response hook.
    AfterResponse(Arc<dyn AfterResponseHook>),
    /// An after-build-url hook.
    AfterBuildUrl(Arc<dyn AfterBuildUrlHook>),
    /// A request-error hook.
    RequestError(Arc<dyn RequestErrorHook>),
}

impl Handler {
    /// Wraps a before-request hook.
    pub fn before_request(hook: impl BeforeRequestHook + 'static) -> Self {
        Handler::BeforeRequest(Arc::new(hook))
    }

    /// Wraps an after-response hook.
    pub fn after_response(hook: impl AfterResponseHook + 'static) -> Self {
        Handler::AfterResponse(Arc::new(hook))
    }

    /// Wraps an after-build-url hook.
    pub fn after_build_url(hook: impl AfterBuildUrlHook + 'static) -> Self {
        Handler::AfterBuildUrl(Arc::new(hook))
    }

    /// Wraps a request-error hook.
    pub fn request_error(hook: impl RequestErrorHook + 'static) -> Self {
        Handler::RequestError(Arc::new(hook))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Handler::BeforeRequest(_) => "BeforeRequest",
            Handler::AfterResponse(_) => "AfterResponse",
            Handler::AfterBuildUrl(_) => "AfterBuildUrl",
            Handler::RequestError(_) => "RequestError",
        };
        write!(f, "Handler::{kind}")
    }
}

/// Identifies a registered hook for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

type Slot<T> = RwLock<Vec<(HandlerId, Arc<T>)>>;

/// The hook lists owned by one adapter.
#[derive(Default)]
pub(crate) struct HookRegistry {
    before_request: Slot<dyn BeforeRequestHook>,
    after_response: Slot<dyn AfterResponseHook>,
    after_build_url: Slot<dyn AfterBuildUrlHook>,
    request_error: Slot<dyn RequestErrorHook>,
}

impl HookRegistry {
    pub(crate) fn from_options(options: &AdapterOptions) -> Self {
        let registry = Self::default();
        let handlers = options
            .on_before_request
            .iter()
            .cloned()
            .map(Handler::BeforeRequest)
            .chain(options.on_after_response.iter().cloned().map(Handler::AfterResponse))
            .chain(options.on_after_build_url.iter().cloned().map(Handler::AfterBuildUrl))
            .chain(options.on_request_error.iter().cloned().map(Handler::RequestError));
        for handler in handlers {
            registry.add(handler);
        }
        registry
    }

    pub(crate) fn add(&self, handler: Handler) -> HandlerId {
        let id = HandlerId::next();
        match handler {
            Handler::BeforeRequest(hook) => push(&self.before_request, id, hook),
            Handler::AfterResponse(hook) => push(&self.after_response, id, hook),
            Handler::AfterBuildUrl(hook) => push(&self.after_build_url, id, hook),
            Handler::RequestError(hook) => push(&self.request_error, id, hook),
        }
        id
    }

    pub(crate) fn remove(&self, id: HandlerId) -> bool {
        remove(&self.before_request, id)
            || remove(&self.after_response, id)
            || remove(&self.after_build_url, id)
            || remove(&self.request_error, id)
    }

    pub(crate) fn before_request(&self) -> Vec<Arc<dyn BeforeRequestHook>> {
        snapshot(&self.before_request)
    }

    pub(crate) fn after_response(&self) -> Vec<Arc<dyn AfterResponseHook>> {
        snapshot(&self.after_response)
    }

    pub(crate) fn after_build_url(&self) -> Vec<Arc<dyn AfterBuildUrlHook>> {
        snapshot(&self.after_build_url)
    }

    pub(crate) fn request_error(&self) -> Vec<Arc<dyn RequestErrorHook>> {
        snapshot(&self.request_error)
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("before_request", &snapshot(&self.before_request).len())
            .field("after_response", &snapshot(&self.after_response).len())
            .field("after_build_url", &snapshot(&self.after_build_url).len())
            .field("request_error", &snapshot(&self.request_error).len())
            .finish()
    }
}

fn push<T: ?Sized>(slot: &Slot<T>, id: HandlerId, hook: Arc<T>) {
    slot.write()
        .unwrap_or_else(PoisonError::into_inner)
        .push((id, hook));
}

fn remove<T: ?Sized>(slot: &Slot<T>, id: HandlerId) -> bool {
    let mut hooks = slot.write().unwrap_or_else(PoisonError::into_inner);
    let before = hooks.len();
    hooks.retain(|(existing, _)| *existing != id);
    hooks.len() != before
}

// Hooks run on a copy so they can add or remove handlers without deadlocking.
fn snapshot<T: ?Sized>(slot: &Slot<T>) -> Vec<Arc<T>> {
    slot.read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(_, hook)| Arc::clone(hook))
        .collect()
}
