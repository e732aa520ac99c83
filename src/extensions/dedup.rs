use super::{lock, Connections};
use crate::adapter::{Adapter, PreparedRequest};
use crate::config::RequestConfig;
use crate::hooks::{BeforeRequest, BeforeRequestHook, Handler, HookResult};
use crate::response::ResponseEnvelope;
use crate::Result;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use http::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

type SharedResponse = Shared<BoxFuture<'static, Result<Arc<ResponseEnvelope>>>>;
type Predicate = Arc<dyn Fn(&Url, &RequestConfig) -> bool + Send + Sync>;
type PendingMap = Arc<Mutex<HashMap<String, Pending>>>;

struct Pending {
    id: u64,
    response: SharedResponse,
    /// `None` while in flight.
    expires_at: Option<Instant>,
}

/// Collapses concurrent GET requests to the same URL into one transport call.
///
/// Every caller receives the same `Arc<ResponseEnvelope>`, or a clone of the same
/// error. With a time window, a successful response keeps being served for that
/// long after it resolved. Failures are never kept.
///
/// # Examples
///
/// ```no_run
/// use adapterkit::extensions::Deduplicator;
/// use adapterkit::Adapter;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder().base_url("https://api.example.com")?.build()?;
/// let dedup = Deduplicator::new().time_window(Duration::from_millis(500));
/// dedup.register(&adapter);
///
/// let (a, b) = tokio::join!(adapter.get("/config", None), adapter.get("/config", None));
/// assert!(Arc::ptr_eq(&a?, &b?));
/// # Ok(())
/// # }
/// ```
pub struct Deduplicator {
    time_window: Option<Duration>,
    should_dedup: Predicate,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    connections: Connections,
}

impl Deduplicator {
    /// Deduplicates in-flight requests only.
    pub fn new() -> Self {
        Self {
            time_window: None,
            should_dedup: Arc::new(|_: &Url, _: &RequestConfig| true),
            pending: Arc::default(),
            next_id: Arc::default(),
            connections: Connections::default(),
        }
    }

    /// Keeps serving a successful response for `window` after it resolved.
    pub fn time_window(mut self, window: Duration) -> Self {
        self.time_window = Some(window).filter(|w| !w.is_zero());
        self
    }

    /// Only deduplicates requests for which `predicate` returns `true`.
    pub fn should_dedup<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Url, &RequestConfig) -> bool + Send + Sync + 'static,
    {
        self.should_dedup = Arc::new(predicate);
        self
    }

    /// Installs the deduplication hook on `adapter`. Registering twice is a no-op.
    pub fn register(&self, adapter: &Adapter) {
        self.connections.connect(adapter, || {
            Handler::before_request(DedupHook {
                time_window: self.time_window,
                should_dedup: Arc::clone(&self.should_dedup),
                pending: Arc::clone(&self.pending),
                next_id: Arc::clone(&self.next_id),
            })
        });
    }

    /// Removes the deduplication hook from `adapter`.
    pub fn unregister(&self, adapter: &Adapter) -> bool {
        self.connections.disconnect(adapter)
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("time_window", &self.time_window)
            .field("pending", &lock(&self.pending).len())
            .field("connections", &self.connections)
            .finish()
    }
}

struct DedupHook {
    time_window: Option<Duration>,
    should_dedup: Predicate,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

impl DedupHook {
    fn join_or_start(&self, adapter: &Adapter, request: &PreparedRequest) -> SharedResponse {
        let key = request.url.to_string();
        let mut pending = lock(&self.pending);

        let now = Instant::now();
        pending.retain(|_, entry| entry.expires_at.map_or(true, |at| at > now));

        if let Some(entry) = pending.get(&key) {
            tracing::debug!(url = %key, "Joining in-flight request");
            return entry.response.clone();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let adapter = adapter.clone();
        let request = request.clone();
        let map = Arc::clone(&self.pending);
        let window = self.time_window;
        let settle_key = key.clone();

        let response = async move {
            let result = adapter.dispatch(&request).await;
            settle(&map, &settle_key, id, window, result.is_ok());
            result
        }
        .boxed()
        .shared();

        pending.insert(
            key,
            Pending {
                id,
                response: response.clone(),
                expires_at: None,
            },
        );
        response
    }
}

/// Marks a finished request: kept for the window on success, dropped otherwise.
///
/// A kept entry is removed once its window elapses, so an idle adapter does not
/// hold on to its last responses.
fn settle(map: &PendingMap, key: &str, id: u64, window: Option<Duration>, ok: bool) {
    let mut pending = lock(map);
    if pending.get(key).map(|entry| entry.id) != Some(id) {
        return;
    }
    match window {
        Some(window) if ok => {
            if let Some(entry) = pending.get_mut(key) {
                entry.expires_at = Some(Instant::now() + window);
            }
            let map = Arc::clone(map);
            let key = key.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let mut pending = lock(&map);
                if pending.get(&key).map(|entry| entry.id) == Some(id) {
                    pending.remove(&key);
                }
            });
        }
        _ => {
            pending.remove(key);
        }
    }
}

#[async_trait]
impl BeforeRequestHook for DedupHook {
    async fn before_request(
        &self,
        adapter: &Adapter,
        request: &PreparedRequest,
    ) -> HookResult<BeforeRequest> {
        if request.method != Method::GET || !(self.should_dedup)(&request.url, &request.config) {
            return Ok(BeforeRequest::Continue);
        }

        let response = self.join_or_start(adapter, request);
        match response.await {
            Ok(response) => Ok(BeforeRequest::Respond(response)),
            Err(error) => Err(Box::new(error)),
        }
    }
}
