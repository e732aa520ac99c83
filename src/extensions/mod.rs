//! Extensions that plug into an adapter through a before-request hook.
//!
//! - [`Deduplicator`]: one in-flight transport call per GET URL, shared by every
//!   caller asking for it.
//! - [`AsyncQueue`]: a fixed number of concurrent transport calls, admitted by
//!   priority.
//!
//! Both can be registered on several adapters and unregistered again.

mod dedup;
mod queue;

pub use dedup::Deduplicator;
pub use queue::AsyncQueue;

use crate::adapter::Adapter;
use crate::hooks::{Handler, HandlerId};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Adapters an extension is registered on, with the id of its hook on each.
#[derive(Debug, Default)]
struct Connections {
    adapters: Mutex<Vec<(Adapter, HandlerId)>>,
}

impl Connections {
    /// Registers the handler on `adapter` unless it is already connected.
    fn connect(&self, adapter: &Adapter, handler: impl FnOnce() -> Handler) {
        let mut adapters = lock(&self.adapters);
        if adapters.iter().any(|(a, _)| Adapter::ptr_eq(a, adapter)) {
            return;
        }
        let id = adapter.add_handler(handler());
        adapters.push((adapter.clone(), id));
    }

    /// Removes the handler from `adapter`. Returns `false` if it was not connected.
    fn disconnect(&self, adapter: &Adapter) -> bool {
        let mut adapters = lock(&self.adapters);
        match adapters.iter().position(|(a, _)| Adapter::ptr_eq(a, adapter)) {
            Some(index) => {
                let (adapter, id) = adapters.remove(index);
                adapter.remove_handler(id)
            }
            None => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
