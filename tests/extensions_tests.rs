//! Deduplication and queueing extensions.

use adapterkit::extensions::{AsyncQueue, Deduplicator};
use adapterkit::{
    Adapter, AdapterOptions, ErrorKind, RawResponse, RequestConfig, Transport, TransportError,
    TransportRequest,
};
use async_trait::async_trait;
use http::StatusCode;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Answers after a short delay, numbering every call it receives.
struct Slow {
    status: StatusCode,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    order: Mutex<Vec<String>>,
    release: Notify,
}

impl Slow {
    fn new(status: StatusCode) -> Arc<Self> {
        Arc::new(Self {
            status,
            delay: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
            release: Notify::new(),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Slow {
    async fn send_request(
        &self,
        request: TransportRequest,
    ) -> Result<(RawResponse, StatusCode, String), TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.order
            .lock()
            .unwrap()
            .push(request.url.path().trim_start_matches('/').to_string());

        if request.url.path() == "/blocker" {
            self.release.notified().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let response = RawResponse::new(self.status).with_json(&json!({ "call": call }));
        let text = response.status_text.clone();
        Ok((response, self.status, text))
    }
}

fn adapter(transport: &Arc<Slow>) -> Adapter {
    let mut options = AdapterOptions::new();
    options.transport = Some(transport.clone());
    options.build().unwrap()
}

#[tokio::test]
async fn test_concurrent_gets_share_one_transport_call() {
    let transport = Slow::new(StatusCode::OK);
    let adapter = adapter(&transport);
    let dedup = Deduplicator::new();
    dedup.register(&adapter);

    let (a, b, c) = tokio::join!(
        adapter.get("/config", None),
        adapter.get("/config", None),
        adapter.get("/config", None),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(transport.calls(), 1);
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));

    // Resolved requests are forgotten without a time window.
    let d = adapter.get("/config", None).await.unwrap();
    assert_eq!(transport.calls(), 2);
    assert_eq!(d.data, json!({ "call": 2 }));
}

#[tokio::test]
async fn test_different_urls_are_not_shared() {
    let transport = Slow::new(StatusCode::OK);
    let adapter = adapter(&transport);
    Deduplicator::new().register(&adapter);

    let page = |n: &'static str| RequestConfig::new().with_search_param("page", n);
    let (a, b) = tokio::join!(adapter.get("/items", page("1")), adapter.get("/items", page("2")));

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_time_window_keeps_successful_responses() {
    let transport = Slow::new(StatusCode::OK);
    let adapter = adapter(&transport);
    let dedup = Deduplicator::new().time_window(Duration::from_millis(200));
    dedup.register(&adapter);

    let first = adapter.get("/config", None).await.unwrap();
    let second = adapter.get("/config", None).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(transport.calls(), 1);

    tokio::time::sleep(Duration::from_millis(250)).await;
    let third = adapter.get("/config", None).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_failures_are_shared_but_not_kept() {
    let transport = Slow::new(StatusCode::SERVICE_UNAVAILABLE);
    let adapter = adapter(&transport);
    let dedup = Deduplicator::new().time_window(Duration::from_secs(5));
    dedup.register(&adapter);

    let (a, b) = tokio::join!(adapter.get("/config", None), adapter.get("/config", None));
    let (a, b) = (a.unwrap_err(), b.unwrap_err());
    assert_eq!(a.kind, ErrorKind::Server);
    assert_eq!(a.reason, b.reason);
    assert_eq!(transport.calls(), 1);

    adapter.get("/config", None).await.unwrap_err();
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_only_matching_gets_are_deduplicated() {
    let transport = Slow::new(StatusCode::OK);
    let adapter = adapter(&transport);
    let dedup = Deduplicator::new().should_dedup(|url, _| url.path() != "/live");
    dedup.register(&adapter);

    let (a, b) = tokio::join!(adapter.post("/config", None), adapter.post("/config", None));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls(), 2);

    let (a, b) = tokio::join!(adapter.get("/live", None), adapter.get("/live", None));
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn test_dedup_register_and_unregister() {
    let transport = Slow::new(StatusCode::OK);
    let adapter = adapter(&transport);
    let dedup = Deduplicator::new();

    dedup.register(&adapter);
    dedup.register(&adapter);
    assert!(dedup.unregister(&adapter));
    assert!(!dedup.unregister(&adapter));

    let (a, b) = tokio::join!(adapter.get("/config", None), adapter.get("/config", None));
    assert!(!Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_queue_admits_by_priority() {
    let transport = Slow::new(StatusCode::OK);
    let adapter = adapter(&transport);
    let queue = AsyncQueue::new(1);
    queue.register(&adapter);

    let blocker = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.get("/blocker", None).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut waiting = Vec::new();
    for (path, priority) in [("/a", 1), ("/b", 9), ("/c", 5)] {
        let adapter = adapter.clone();
        let config = RequestConfig::new().with_transport_option("priority", priority);
        waiting.push(tokio::spawn(async move { adapter.get(path, config).await }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(transport.calls(), 1);

    transport.release.notify_one();
    blocker.await.unwrap().unwrap();
    for task in waiting {
        task.await.unwrap().unwrap();
    }

    assert_eq!(*transport.order.lock().unwrap(), ["blocker", "a", "c", "b"]);
}

#[tokio::test]
async fn test_queue_limits_concurrency() {
    let transport = Slow::new(StatusCode::OK);
    let adapter = adapter(&transport);
    let queue = AsyncQueue::new(2);
    queue.register(&adapter);

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let adapter = adapter.clone();
            tokio::spawn(async move { adapter.get(&format!("/job/{i}"), None).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(transport.calls(), 5);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 2);

    assert!(queue.unregister(&adapter));
}
