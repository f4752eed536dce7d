//! Notification fan-out.
//!
//! Server pushes and server-initiated requests are serialized once and
//! written to the duplex pipe (if bound) and to every matching SSE
//! subscriber. Subscribers whose channel has closed are pruned on the spot.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

use crate::error::{Error, Result};
use crate::mcp::protocol::JsonRpcError;
use crate::mcp::server::WeakServer;

/// Identifies one attached subscriber.
pub type SubscriberId = u64;

/// Sink for the duplex pipe; receives one serialized message per call.
pub type OutputHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Invoked once with the client's answer to a server-initiated request.
pub type ResponseCallback = Box<dyn FnOnce(std::result::Result<Value, JsonRpcError>) + Send>;

struct PendingRequest {
    session_id: String,
    callback: ResponseCallback,
}

struct Subscriber {
    id: SubscriberId,
    session_id: String,
    sender: mpsc::UnboundedSender<String>,
}

/// What happened to one delivery.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Number of sinks (pipe plus subscribers) that accepted the payload.
    pub delivered: usize,
    /// Sessions that lost their last subscriber while delivering.
    pub orphaned: Vec<String>,
}

/// Subscriber list, pipe output and pending server-initiated requests.
pub struct Fanout {
    subscribers: Mutex<Vec<Subscriber>>,
    output: RwLock<Option<OutputHandler>>,
    pending: Mutex<HashMap<i64, PendingRequest>>,
    next_subscriber: AtomicU64,
    next_request: AtomicI64,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            output: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            next_request: AtomicI64::new(1),
        }
    }

    /// Attach a subscriber for `session_id`.
    pub fn attach(&self, session_id: &str) -> (SubscriberId, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber {
            id,
            session_id: session_id.to_string(),
            sender,
        });
        debug!(subscriber = id, session = session_id, "Subscriber attached");
        (id, receiver)
    }

    /// Detach a subscriber. Returns its session if no other subscriber of
    /// that session remains.
    pub fn detach(&self, id: SubscriberId) -> Option<String> {
        let mut subscribers = self.subscribers.lock();
        let index = subscribers.iter().position(|s| s.id == id)?;
        let removed = subscribers.swap_remove(index);
        debug!(subscriber = id, session = %removed.session_id, "Subscriber detached");

        let last = !subscribers.iter().any(|s| s.session_id == removed.session_id);
        last.then_some(removed.session_id)
    }

    /// Drop every subscriber of a session, ending their streams.
    pub fn detach_session(&self, session_id: &str) -> usize {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.session_id != session_id);
        before - subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Install the pipe output. Only one may be bound at a time.
    pub fn bind_output(&self, output: OutputHandler) -> Result<()> {
        let mut slot = self.output.write();
        if slot.is_some() {
            return Err(Error::IoAlreadyBound);
        }
        *slot = Some(output);
        Ok(())
    }

    pub fn unbind_output(&self) -> Option<OutputHandler> {
        self.output.write().take()
    }

    pub fn output(&self) -> Option<OutputHandler> {
        self.output.read().clone()
    }

    /// Write `payload` to the pipe and to the subscribers of `session`
    /// (every subscriber when `session` is `None`).
    pub fn deliver(&self, payload: &str, session: Option<&str>) -> Delivery {
        let mut delivery = Delivery::default();

        // Cloned out so the handler runs without the lock held.
        if let Some(output) = self.output() {
            output(payload.to_string());
            delivery.delivered += 1;
        }

        let mut subscribers = self.subscribers.lock();
        let mut dead = Vec::new();
        for subscriber in subscribers.iter() {
            if session.is_some_and(|s| s != subscriber.session_id) {
                continue;
            }
            if subscriber.sender.send(payload.to_string()).is_ok() {
                delivery.delivered += 1;
            } else {
                dead.push(subscriber.id);
            }
        }

        for id in dead {
            if let Some(index) = subscribers.iter().position(|s| s.id == id) {
                let removed = subscribers.swap_remove(index);
                debug!(subscriber = id, session = %removed.session_id, "Pruned closed subscriber");
                if !subscribers.iter().any(|s| s.session_id == removed.session_id)
                    && !delivery.orphaned.contains(&removed.session_id)
                {
                    delivery.orphaned.push(removed.session_id);
                }
            }
        }

        delivery
    }

    /// Allocate a request id and remember `callback` under it until the
    /// client of `session_id` answers.
    pub fn register_pending(&self, session_id: &str, callback: ResponseCallback) -> i64 {
        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(
            id,
            PendingRequest {
                session_id: session_id.to_string(),
                callback,
            },
        );
        id
    }

    pub fn take_pending(&self, id: i64) -> Option<ResponseCallback> {
        self.pending.lock().remove(&id).map(|pending| pending.callback)
    }

    /// Forget every request awaiting an answer from `session_id`. Their
    /// callbacks are dropped without being called.
    pub fn drop_pending_for(&self, session_id: &str) -> usize {
        let dropped: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            let ids: Vec<i64> = pending
                .iter()
                .filter(|(_, p)| p.session_id == session_id)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        if !dropped.is_empty() {
            debug!(session = session_id, count = dropped.len(), "Dropped pending requests");
        }
        dropped.len()
    }

    /// Guard that forgets request `id` when dropped, so an abandoned wait
    /// does not leave its entry behind.
    pub(crate) fn pending_guard(&self, id: i64) -> PendingGuard<'_> {
        PendingGuard { fanout: self, id }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

pub(crate) struct PendingGuard<'a> {
    fanout: &'a Fanout,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.fanout.take_pending(self.id);
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized pushes for one SSE subscriber.
///
/// Dropping the stream detaches the subscriber; if it was the last one of
/// its session, the session is removed.
pub struct NotificationStream {
    id: SubscriberId,
    receiver: mpsc::UnboundedReceiver<String>,
    server: WeakServer,
}

impl NotificationStream {
    pub(crate) fn new(
        id: SubscriberId,
        receiver: mpsc::UnboundedReceiver<String>,
        server: WeakServer,
    ) -> Self {
        Self {
            id,
            receiver,
            server,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Stream for NotificationStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        if let Some(server) = self.server.upgrade() {
            server.detach_subscriber(self.id);
        }
    }
}
