//! Pipeline tests against a scripted in-memory transport.

use adapterkit::hooks::{BeforeRequestHook, HookResult};
use adapterkit::validate::{Issue, Schema};
use adapterkit::{
    AbortController, Adapter, AdapterOptions, BeforeRequest, ErrorKind, Handler, PreparedRequest,
    RawResponse, RequestConfig, RequestError, ResponseEnvelope, Transport, TransportError,
    TransportRequest, Validator,
};
use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;

#[derive(Debug, Clone)]
enum Step {
    Json(u16, Value),
    Hang,
    Fail,
}

/// Plays back a script of responses, then repeats the fallback step.
struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
    abort_observed: Arc<AtomicBool>,
}

impl Scripted {
    fn new(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            abort_observed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn always(step: Step) -> Arc<Self> {
        Self::new([], step)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for Scripted {
    async fn send_request(
        &self,
        request: TransportRequest,
    ) -> Result<(RawResponse, StatusCode, String), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(request.url.to_string());

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Json(code, body) => {
                let status = StatusCode::from_u16(code).unwrap();
                let response = RawResponse::new(status)
                    .with_url(request.url.as_str())
                    .with_json(&body);
                let text = response.status_text.clone();
                Ok((response, status, text))
            }
            Step::Hang => {
                let signal = request.abort_signal.expect("pipeline always passes a signal");
                let observed = Arc::clone(&self.abort_observed);
                let watcher = signal.clone();
                tokio::spawn(async move {
                    watcher.aborted().await;
                    observed.store(true, Ordering::SeqCst);
                });
                std::future::pending().await
            }
            Step::Fail => Err(TransportError::Other("connection reset".into())),
        }
    }
}

fn adapter_with(transport: &Arc<Scripted>, options: AdapterOptions) -> Adapter {
    let mut options = options;
    options.transport = Some(transport.clone());
    options.build().unwrap()
}

fn adapter(transport: &Arc<Scripted>) -> Adapter {
    adapter_with(transport, AdapterOptions::new())
}

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

#[tokio::test]
async fn test_retry_exhaustion_calls_transport_n_plus_one_times() {
    let transport = Scripted::always(Step::Json(500, json!({})));
    let adapter = adapter(&transport);

    let config = RequestConfig::new().with_auto_retry(2);
    let error = adapter.get("/flaky", config).await.unwrap_err();

    assert_eq!(transport.calls(), 3);
    assert_eq!(error.kind, ErrorKind::Server);
    assert_eq!(error.reason, "Server error: [500] Internal Server Error");
}

#[tokio::test]
async fn test_retry_until_success() {
    let transport = Scripted::new(
        [Step::Json(503, json!({})), Step::Json(429, json!({}))],
        Step::Json(200, json!({ "ok": true })),
    );
    let adapter = adapter(&transport);

    let config = RequestConfig::new()
        .with_auto_retry(2)
        .with_retry_delay(Duration::from_millis(5));
    let response = adapter.get("/flaky", config).await.unwrap();

    assert_eq!(transport.calls(), 3);
    assert_eq!(response.data, json!({ "ok": true }));
    assert_eq!(response.attempts, 3);
}

#[tokio::test]
async fn test_no_retry_by_default() {
    let transport = Scripted::always(Step::Json(500, json!({})));
    let adapter = adapter(&transport);

    adapter.get("/flaky", None).await.unwrap_err();
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_transport_failures_are_retried() {
    let transport = Scripted::new([Step::Fail], Step::Json(200, json!("recovered")));
    let adapter = adapter(&transport);

    let response = adapter
        .get("/flaky", RequestConfig::new().with_auto_retry(1))
        .await
        .unwrap();
    assert_eq!(response.data, json!("recovered"));
    assert_eq!(transport.calls(), 2);

    let down = Scripted::always(Step::Fail);
    let error = adapter_with(&down, AdapterOptions::new())
        .get("/down", None)
        .await
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::Transport);
    assert_eq!(error.reason, "Unexpected error");
    assert_eq!(error.cause.unwrap().to_string(), "connection reset");
}

#[tokio::test]
async fn test_timeout_fires_the_transport_signal() {
    let transport = Scripted::always(Step::Hang);
    let adapter = adapter(&transport);

    let started = Instant::now();
    let config = RequestConfig::new().with_timeout(Duration::from_millis(50));
    let error = adapter.get("/slow", config).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.reason, "Request aborted, timeout exceeded");
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(2));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(transport.abort_observed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_timeouts_are_retried() {
    let transport = Scripted::new([Step::Hang], Step::Json(200, json!(1)));
    let adapter = adapter(&transport);

    let config = RequestConfig::new()
        .with_timeout(Duration::from_millis(20))
        .with_auto_retry(1);
    let response = adapter.get("/slow", config).await.unwrap();

    assert_eq!(response.data, json!(1));
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn test_external_abort_surfaces_reason_and_is_not_retried() {
    let transport = Scripted::always(Step::Hang);
    let adapter = adapter(&transport);
    let controller = AbortController::new();

    let config = RequestConfig::new()
        .with_abort_signal(controller.signal())
        .with_auto_retry(3);
    let call = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.get("/slow", config).await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.abort_with(RequestError::new(ErrorKind::Aborted, "user navigated away"));

    let error = call.await.unwrap().unwrap_err();
    assert_eq!(error.kind, ErrorKind::Aborted);
    assert_eq!(error.reason, "user navigated away");
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_abort_during_retry_delay_surfaces_immediately() {
    let transport = Scripted::always(Step::Fail);
    let adapter = adapter(&transport);
    let controller = AbortController::new();

    let config = RequestConfig::new()
        .with_abort_signal(controller.signal())
        .with_auto_retry(3)
        .with_retry_delay(Duration::from_secs(2));
    let call = tokio::spawn({
        let adapter = adapter.clone();
        async move { adapter.get("/flaky", config).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    controller.abort();

    let error = call.await.unwrap().unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(error.kind, ErrorKind::Aborted);
    assert_eq!(error.reason, "Request aborted");
    assert_eq!(error.url.as_deref(), Some("http://127.0.0.1/flaky"));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_already_aborted_signal_never_reaches_transport() {
    let transport = Scripted::always(Step::Json(200, json!({})));
    let adapter = adapter(&transport);
    let controller = AbortController::new();
    controller.abort();

    let config = RequestConfig::new().with_abort_signal(controller.signal());
    let error = adapter.get("/x", config).await.unwrap_err();

    assert_eq!(error.reason, "Request aborted");
    assert_eq!(transport.calls(), 0);
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct Foo {
    foo: String,
}

#[tokio::test]
async fn test_response_schema_validation() {
    let transport = Scripted::new(
        [Step::Json(200, json!({ "foo": "foo" })), Step::Json(200, json!({}))],
        Step::Fail,
    );
    let adapter = adapter(&transport);
    let config = RequestConfig::new().with_validator(Validator::deserializes::<Foo>());

    let response = adapter.get("/foo", config.clone()).await.unwrap();
    assert_eq!(response.data, json!({ "foo": "foo" }));

    let error = adapter.get("/foo", config).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Validation);
    assert_eq!(error.reason, "Invalid response data");
    assert_eq!(error.status, Some(StatusCode::OK));
    assert_eq!(error.issues.map(|issues| issues.len()), Some(1));
}

#[tokio::test]
async fn test_predicate_validation_and_async_schema() {
    struct NeedsNetwork;

    impl Schema for NeedsNetwork {
        fn validate(&self, _value: &Value) -> Result<(), Vec<Issue>> {
            Ok(())
        }

        fn is_async(&self) -> bool {
            true
        }
    }

    let transport = Scripted::always(Step::Json(200, json!([1, 2])));
    let adapter = adapter(&transport);

    let config = RequestConfig::new().with_validator(Validator::predicate(|v| v.is_object()));
    let error = adapter.get("/list", config).await.unwrap_err();
    assert_eq!(error.reason, "Invalid response data");
    assert!(error.issues.is_none());

    let config = RequestConfig::new().with_validator(Validator::schema(NeedsNetwork));
    let error = adapter.get("/list", config).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Configuration);
    assert_eq!(error.reason, "Asynchronous validation is not supported.");
}

#[tokio::test]
async fn test_parent_hooks_run_before_child_hooks() {
    let transport = Scripted::always(Step::Json(500, json!({})));
    let log: Log = Arc::default();

    let hooks = |name: &'static str| {
        let (before, after, url, error) = (log.clone(), log.clone(), log.clone(), log.clone());
        AdapterOptions::new()
            .on_before_request(move |_: &PreparedRequest| -> HookResult<BeforeRequest> {
                record(&before, &format!("{name}:before"));
                Ok(BeforeRequest::Continue)
            })
            .on_after_response(
                move |_: &Arc<ResponseEnvelope>| -> HookResult<Option<Arc<ResponseEnvelope>>> {
                    record(&after, &format!("{name}:after"));
                    Ok(None)
                },
            )
            .on_after_build_url(move |_: &Url| -> Option<Url> {
                record(&url, &format!("{name}:url"));
                None
            })
            .on_request_error(move |_: &RequestError| -> Option<RequestError> {
                record(&error, &format!("{name}:error"));
                None
            })
    };

    let root = adapter_with(&transport, hooks("root"));
    let child = root.extend(hooks("child"));
    let grandchild = child.extend(hooks("grandchild"));

    grandchild.get("/x", None).await.unwrap_err();

    assert_eq!(
        *log.lock().unwrap(),
        [
            "root:url",
            "child:url",
            "grandchild:url",
            "root:before",
            "child:before",
            "grandchild:before",
            "root:error",
            "child:error",
            "grandchild:error",
        ]
    );

    // Hooks of a child never run for its parent.
    log.lock().unwrap().clear();
    root.get("/x", None).await.unwrap_err();
    assert_eq!(*log.lock().unwrap(), ["root:url", "root:before", "root:error"]);
}

#[tokio::test]
async fn test_after_response_hooks_chain_parent_first() {
    let transport = Scripted::always(Step::Json(200, json!([])));
    let log: Log = Arc::default();

    let tagging = |name: &'static str| {
        let log = log.clone();
        AdapterOptions::new().on_after_response(
            move |response: &Arc<ResponseEnvelope>| -> HookResult<Option<Arc<ResponseEnvelope>>> {
                record(&log, name);
                let mut seen = response.data.as_array().cloned().unwrap_or_default();
                seen.push(json!(name));
                Ok(Some(Arc::new(response.with_data(json!(seen)))))
            },
        )
    };

    let root = adapter_with(&transport, tagging("root"));
    let child = root.extend(tagging("child"));
    let grandchild = child.extend(tagging("grandchild"));

    let response = grandchild.get("/x", None).await.unwrap();

    assert_eq!(*log.lock().unwrap(), ["root", "child", "grandchild"]);
    assert_eq!(response.data, json!(["root", "child", "grandchild"]));
}

struct Cached;

#[async_trait]
impl BeforeRequestHook for Cached {
    async fn before_request(
        &self,
        adapter: &Adapter,
        request: &PreparedRequest,
    ) -> HookResult<BeforeRequest> {
        let envelope = ResponseEnvelope::new(
            adapter.clone(),
            request.method.clone(),
            request.url.clone(),
            request.config.clone(),
            json!({ "cached": true }),
            RawResponse::new(StatusCode::OK),
        );
        Ok(BeforeRequest::Respond(Arc::new(envelope)))
    }
}

#[tokio::test]
async fn test_short_circuit_skips_transport_but_not_after_hooks() {
    let transport = Scripted::always(Step::Json(200, json!({})));
    let log: Log = Arc::default();
    let (after, skipped) = (log.clone(), log.clone());

    let adapter = adapter_with(
        &transport,
        AdapterOptions::new()
            .on_before_request(Cached)
            .on_before_request(move |_: &PreparedRequest| -> HookResult<BeforeRequest> {
                record(&skipped, "second before");
                Ok(BeforeRequest::Continue)
            })
            .on_after_response(
                move |response: &Arc<ResponseEnvelope>| -> HookResult<Option<Arc<ResponseEnvelope>>> {
                    record(&after, "after");
                    let mut data = response.data.clone();
                    data["seen_by_after_hook"] = json!(true);
                    Ok(Some(Arc::new(response.with_data(data))))
                },
            ),
    );

    let response = adapter.get("/cached", None).await.unwrap();

    assert_eq!(transport.calls(), 0);
    assert_eq!(response.data, json!({ "cached": true, "seen_by_after_hook": true }));
    assert_eq!(*log.lock().unwrap(), ["after"]);
}

#[tokio::test]
async fn test_before_hook_can_replace_the_request() {
    let transport = Scripted::always(Step::Json(200, json!({})));
    let adapter = adapter_with(
        &transport,
        AdapterOptions::new().on_before_request(
            |request: &PreparedRequest| -> HookResult<BeforeRequest> {
                let mut url = request.url.clone();
                url.set_path("/v2/rewritten");
                Ok(BeforeRequest::Replace {
                    url,
                    config: request.config.clone(),
                    body: request.body.clone(),
                })
            },
        ),
    );

    let response = adapter.get("/original", None).await.unwrap();
    assert_eq!(response.url.path(), "/v2/rewritten");
    assert_eq!(
        *transport.urls.lock().unwrap(),
        ["http://127.0.0.1/v2/rewritten"]
    );
}

#[tokio::test]
async fn test_error_hooks_replace_but_never_swallow() {
    let transport = Scripted::always(Step::Json(404, json!({})));
    let adapter = adapter_with(
        &transport,
        AdapterOptions::new()
            .on_request_error(|error: &RequestError| -> Option<RequestError> {
                let mut replaced = error.clone();
                replaced.reason = format!("wrapped: {}", error.reason);
                Some(replaced)
            })
            .on_request_error(|_: &RequestError| -> Option<RequestError> { None }),
    );

    let error = adapter.get("/missing", None).await.unwrap_err();
    assert_eq!(error.reason, "wrapped: Request failure: [404] Not Found");
    assert_eq!(error.kind, ErrorKind::Client);
}

#[tokio::test]
async fn test_hook_errors_are_normalized() {
    let transport = Scripted::always(Step::Json(200, json!({})));
    let seen: Log = Arc::default();
    let seen_in_hook = seen.clone();

    let adapter = adapter_with(
        &transport,
        AdapterOptions::new()
            .on_before_request(|_: &PreparedRequest| -> HookResult<BeforeRequest> {
                Err("token refresh failed".into())
            })
            .on_request_error(move |error: &RequestError| -> Option<RequestError> {
                record(&seen_in_hook, &error.reason);
                None
            }),
    );

    let error = adapter.get("/x", None).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Unexpected);
    assert_eq!(error.reason, "Unexpected error");
    assert_eq!(error.cause.unwrap().to_string(), "token refresh failed");
    assert_eq!(error.url.as_deref(), Some("http://127.0.0.1/x"));
    assert_eq!(*seen.lock().unwrap(), ["Unexpected error"]);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_add_and_remove_handler() {
    let transport = Scripted::always(Step::Json(200, json!({})));
    let adapter = adapter(&transport);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();

    let id = adapter.add_handler(Handler::before_request(
        move |_: &PreparedRequest| -> HookResult<BeforeRequest> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BeforeRequest::Continue)
        },
    ));

    adapter.get("/x", None).await.unwrap();
    assert!(adapter.remove_handler(id));
    assert!(!adapter.remove_handler(id));
    adapter.get("/x", None).await.unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_url_is_a_configuration_error() {
    let transport = Scripted::always(Step::Json(200, json!({})));
    let adapter = adapter(&transport);

    let error = adapter.get("http://[::1", None).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Configuration);
    assert_eq!(transport.calls(), 0);
}
