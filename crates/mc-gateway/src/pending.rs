use std::collections::HashMap;

use mc_core::RequestId;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use crate::error::GatewayError;

pub type Outcome = Result<Value, GatewayError>;

struct PendingRequest {
    method: String,
    issued_at: Instant,
    completion: oneshot::Sender<Outcome>,
}

/// In-flight requests keyed by correlation id.
///
/// Each entry is removed exactly once: by its response, by its caller's
/// deadline or cancellation, or by a connection drop. Whoever removes it owns
/// the outcome.
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request and return the slot its outcome will be delivered to.
    pub fn register(&self, id: RequestId, method: &str) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self.inner.lock().insert(
            id,
            PendingRequest {
                method: method.to_string(),
                issued_at: Instant::now(),
                completion: tx,
            },
        );
        debug_assert!(previous.is_none(), "correlation id reused while in flight");
        rx
    }

    /// Deliver an outcome. Returns false when the id is unknown or already
    /// settled.
    pub fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        let Some(entry) = self.inner.lock().remove(id) else {
            return false;
        };
        debug!(
            id = %id,
            method = %entry.method,
            ok = outcome.is_ok(),
            elapsed_ms = entry.issued_at.elapsed().as_millis() as u64,
            "gateway response routed"
        );
        // The caller may have given up already; nothing to do then.
        let _ = entry.completion.send(outcome);
        true
    }

    /// Drop an entry without delivering anything. Returns the method name if
    /// it was still pending.
    pub fn remove(&self, id: &RequestId) -> Option<String> {
        self.inner.lock().remove(id).map(|entry| entry.method)
    }

    /// Fail every in-flight request with the same error.
    pub fn fail_all(&self, error: &GatewayError) -> usize {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.completion.send(Err(error.clone()));
        }
        count
    }

    /// Tie an entry to the caller's lifetime: the entry is dropped along with
    /// the guard unless it was settled first.
    pub fn guard<'a>(&'a self, id: &'a RequestId) -> PendingGuard<'a> {
        PendingGuard { table: self, id }
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.inner.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// See [`PendingRequests::guard`].
pub struct PendingGuard<'a> {
    table: &'a PendingRequests,
    id: &'a RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(method) = self.table.remove(self.id) {
            debug!(id = %self.id, method = %method, "abandoned gateway request removed");
        }
    }
}
