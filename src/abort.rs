//! Cancellation tokens for in-flight requests.
//!
//! An [`AbortController`] owns the trigger, its [`AbortSignal`]s observe it. Signals
//! can be composed with [`AbortSignal::any`]; the composed signal fires as soon as
//! any of its sources does and reports the first reason found.

use crate::RequestError;
use futures::future::{self, FutureExt};
use tokio::sync::watch;

/// The triggering side of an abort signal.
///
/// # Examples
///
/// ```no_run
/// use adapterkit::{AbortController, Adapter, RequestConfig};
///
/// # async fn example() -> Result<(), adapterkit::RequestError> {
/// let adapter = Adapter::builder().build()?;
/// let controller = AbortController::new();
///
/// let call = adapter.get(
///     "/api/slow",
///     RequestConfig::new().with_abort_signal(controller.signal()),
/// );
/// controller.abort();
///
/// let error = call.await.unwrap_err();
/// assert_eq!(error.reason, "Request aborted");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AbortController {
    sender: watch::Sender<Option<RequestError>>,
    signal: AbortSignal,
}

impl AbortController {
    /// Creates a controller that has not fired yet.
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(None);
        Self {
            sender,
            signal: AbortSignal {
                sources: vec![receiver],
            },
        }
    }

    /// Returns a signal observing this controller.
    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Fires the signal with the default `Request aborted` reason.
    pub fn abort(&self) {
        self.abort_with(RequestError::aborted());
    }

    /// Fires the signal with a custom reason. Only the first reason is kept.
    pub fn abort_with(&self, reason: RequestError) {
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    /// Returns `true` once the controller has fired.
    pub fn is_aborted(&self) -> bool {
        self.sender.borrow().is_some()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// The observing side of one or more [`AbortController`]s.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    sources: Vec<watch::Receiver<Option<RequestError>>>,
}

impl AbortSignal {
    /// Composes signals into one that fires when any of them fires.
    pub fn any(signals: impl IntoIterator<Item = AbortSignal>) -> AbortSignal {
        AbortSignal {
            sources: signals.into_iter().flat_map(|s| s.sources).collect(),
        }
    }

    /// Returns `true` if any source has fired.
    pub fn is_aborted(&self) -> bool {
        self.sources.iter().any(|rx| rx.borrow().is_some())
    }

    /// Returns the abort reason of the first fired source.
    pub fn reason(&self) -> Option<RequestError> {
        self.sources.iter().find_map(|rx| rx.borrow().clone())
    }

    /// Resolves with the abort reason once any source fires.
    ///
    /// Never resolves if every controller is dropped without firing.
    pub async fn aborted(&self) -> RequestError {
        if let Some(reason) = self.reason() {
            return reason;
        }
        if self.sources.is_empty() {
            return future::pending().await;
        }

        let waits = self.sources.iter().cloned().map(|mut rx| {
            async move {
                let reason = rx
                    .wait_for(Option::is_some)
                    .await
                    .ok()
                    .and_then(|fired| (*fired).clone());
                match reason {
                    Some(reason) => reason,
                    None => future::pending().await,
                }
            }
            .boxed()
        });

        let (reason, _, _) = future::select_all(waits).await;
        reason
    }
}
