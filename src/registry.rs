//! Response registry: request-id → pending response slot.
//!
//! A `HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>` under a lock;
//! each entry settles exactly once, via the sender or via a timeout that
//! removes it first. The id allocator is an `AtomicU64` post-increment,
//! which is enough for "monotonic, never reused" without a UUID's
//! runtime cost or a mutex-guarded counter.

use crate::error::{ClientError, ProtocolErrorCode, Result};
use crate::jsonrpc::{JsonRpcResponse, RequestId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;
use tokio::time::Duration;
use tracing::{debug, warn};

/// A slot awaiting settlement. Settled exactly once by `deliver` or
/// `abort_all`, then removed from the registry.
pub struct Pending {
    id: RequestId,
    rx: oneshot::Receiver<Option<JsonRpcResponse>>,
}

impl Pending {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Blocks until settlement or `timeout` elapses.
    ///
    /// - Timeout → [`ClientError::ResponseTimeout`].
    /// - Settled with `None` (abort) → [`ClientError::ResponseAborted`].
    /// - Settled with an error response → [`ClientError::ResponseFailed`].
    /// - Otherwise returns the response.
    pub async fn await_response(self, timeout: Duration) -> Result<JsonRpcResponse> {
        let id = self.id;
        let outcome = tokio::time::timeout(timeout, self.rx)
            .await
            .map_err(|_| ClientError::ResponseTimeout(id))?;

        // A dropped sender (registry torn down without an explicit abort)
        // is equivalent to an abort for the waiter's purposes.
        let message = outcome.unwrap_or(None);
        let message = message.ok_or(ClientError::ResponseAborted(id))?;

        if let Some(error) = message.error.clone() {
            return Err(ClientError::ResponseFailed {
                id,
                code: ProtocolErrorCode(error.code),
                message: error.message,
            });
        }
        Ok(message)
    }
}

#[derive(Default)]
pub struct ResponseRegistry {
    last_id: AtomicU64,
    slots: Mutex<HashMap<RequestId, oneshot::Sender<Option<JsonRpcResponse>>>>,
}

impl ResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic post-increment of the id counter. Never reused within this
    /// registry's lifetime.
    pub fn alloc_id(&self) -> RequestId {
        self.last_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Inserts a slot for `id`. Caller contract: `id` must not already be
    /// registered.
    pub fn register(&self, id: RequestId) -> Pending {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().expect("response registry poisoned");
        if slots.insert(id, tx).is_some() {
            panic!("request id {id} registered twice");
        }
        debug!(id, "registered pending response");
        Pending { id, rx }
    }

    /// Settles the slot for `id` with `message`. Raises
    /// [`ClientError::UnexpectedResponse`] if no such slot exists — this
    /// is logged and dropped by the caller, not treated as fatal.
    pub fn deliver(&self, id: RequestId, message: JsonRpcResponse) -> Result<()> {
        let sender = {
            let mut slots = self.slots.lock().expect("response registry poisoned");
            slots.remove(&id)
        };
        match sender {
            Some(sender) => {
                debug!(id, "delivering response");
                let _ = sender.send(Some(message));
                Ok(())
            }
            None => Err(ClientError::UnexpectedResponse(id)),
        }
    }

    /// Settles every outstanding slot with `None`, unblocking every
    /// waiter with `ResponseAborted`.
    pub fn abort_all(&self) {
        let slots: HashMap<_, _> = {
            let mut slots = self.slots.lock().expect("response registry poisoned");
            std::mem::take(&mut *slots)
        };
        if !slots.is_empty() {
            warn!(count = slots.len(), "aborting outstanding responses");
        }
        for (_, sender) in slots {
            let _ = sender.send(None);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.slots.lock().expect("response registry poisoned").len()
    }
}
