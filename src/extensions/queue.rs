use super::{lock, Connections};
use crate::adapter::{Adapter, PreparedRequest};
use crate::hooks::{BeforeRequest, BeforeRequestHook, Handler, HookResult};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Limits how many transport calls run at once.
///
/// Requests above the limit wait for a free slot. Waiting requests are admitted
/// by the integer transport option `priority` (lower runs first, default `0`), and
/// in arrival order among equal priorities. Only the transport call is queued;
/// URL building and earlier before-request hooks run immediately.
///
/// # Examples
///
/// ```no_run
/// use adapterkit::extensions::AsyncQueue;
/// use adapterkit::{Adapter, RequestConfig};
///
/// # async fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder().base_url("https://api.example.com")?.build()?;
/// let queue = AsyncQueue::new(2);
/// queue.register(&adapter);
///
/// let urgent = RequestConfig::new().with_transport_option("priority", -1);
/// adapter.get("/health", urgent).await?;
/// # Ok(())
/// # }
/// ```
pub struct AsyncQueue {
    gate: Arc<Gate>,
    connections: Connections,
}

impl AsyncQueue {
    /// Creates a queue running at most `max_concurrent` requests. `0` is treated as `1`.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            gate: Arc::new(Gate {
                max: max_concurrent.max(1),
                state: Mutex::new(GateState::default()),
            }),
            connections: Connections::default(),
        }
    }

    /// Installs the queueing hook on `adapter`. Registering twice is a no-op.
    pub fn register(&self, adapter: &Adapter) {
        self.connections.connect(adapter, || {
            Handler::before_request(QueueHook {
                gate: Arc::clone(&self.gate),
            })
        });
    }

    /// Removes the queueing hook from `adapter`.
    pub fn unregister(&self, adapter: &Adapter) -> bool {
        self.connections.disconnect(adapter)
    }
}

impl fmt::Debug for AsyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.gate.state);
        f.debug_struct("AsyncQueue")
            .field("max_concurrent", &self.gate.max)
            .field("running", &state.running)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

struct Gate {
    max: usize,
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    running: usize,
    waiters: BinaryHeap<Waiter>,
    seq: u64,
}

struct Waiter {
    priority: i64,
    seq: u64,
    slot: oneshot::Sender<Permit>,
}

// Max-heap order: the lowest priority value, then the earliest arrival, is greatest.
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Waiter {}

/// A running slot. Dropping it hands the slot to the next waiter.
struct Permit {
    gate: Option<Arc<Gate>>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.release();
        }
    }
}

impl Gate {
    async fn acquire(self: &Arc<Self>, priority: i64) -> Permit {
        let slot = {
            let mut state = lock(&self.state);
            if state.running < self.max && state.waiters.is_empty() {
                state.running += 1;
                return Permit {
                    gate: Some(Arc::clone(self)),
                };
            }
            let (tx, rx) = oneshot::channel();
            let seq = state.seq;
            state.seq += 1;
            state.waiters.push(Waiter {
                priority,
                seq,
                slot: tx,
            });
            rx
        };

        match slot.await {
            Ok(permit) => permit,
            // Unreachable while the gate is alive: senders are only dropped after a hand-off.
            Err(_) => Permit { gate: None },
        }
    }

    fn release(self: &Arc<Self>) {
        let mut state = lock(&self.state);
        while let Some(waiter) = state.waiters.pop() {
            let permit = Permit {
                gate: Some(Arc::clone(self)),
            };
            match waiter.slot.send(permit) {
                Ok(()) => return,
                // The waiter gave up; disarm so the drop does not re-enter the lock.
                Err(mut permit) => permit.gate = None,
            }
        }
        state.running -= 1;
    }
}

struct QueueHook {
    gate: Arc<Gate>,
}

#[async_trait]
impl BeforeRequestHook for QueueHook {
    async fn before_request(
        &self,
        adapter: &Adapter,
        request: &PreparedRequest,
    ) -> HookResult<BeforeRequest> {
        let priority = request
            .config
            .transport_options
            .as_ref()
            .and_then(|options| options.get("priority"))
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let _permit = self.gate.acquire(priority).await;
        tracing::debug!(priority = priority, url = %request.url, "Request admitted by queue");

        let response = adapter.dispatch(request).await?;
        Ok(BeforeRequest::Respond(response))
    }
}
