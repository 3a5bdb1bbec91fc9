// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::EngineEvent;

/// Opaque handle returned by [`EventBus::on`] / [`EventBus::once`], used to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

struct Subscription {
    id: u64,
    topic: String,
    once: bool,
    handler: Handler,
}

/// In-process typed pub/sub.  Delivery is synchronous: `emit` calls every
/// subscriber registered for the event's topic, in subscription order, on the
/// emitting task, before returning.  A handler that panics is logged and does
/// not prevent delivery to its siblings.
///
/// Handlers registered during delivery do not receive the event being
/// delivered — `emit` snapshots the subscriber list first.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every future event on `topic`.
    pub fn on(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(topic.into(), false, Arc::new(handler))
    }

    /// Register a handler that auto-unregisters after its first invocation.
    pub fn once(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(&EngineEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(topic.into(), true, Arc::new(handler))
    }

    fn subscribe(&self, topic: String, once: bool, handler: Handler) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().unwrap().push(Subscription {
            id,
            topic,
            once,
            handler,
        });
        SubscriptionId(id)
    }

    /// Remove a subscription.  Unknown ids are ignored.
    pub fn off(&self, id: SubscriptionId) {
        self.subscriptions.lock().unwrap().retain(|s| s.id != id.0);
    }

    /// Deliver `event` to every current subscriber of its topic.
    pub fn emit(&self, event: EngineEvent) {
        let topic = event.name();
        let handlers: Vec<Handler> = {
            let mut subs = self.subscriptions.lock().unwrap();
            let matched: Vec<Handler> = subs
                .iter()
                .filter(|s| s.topic == topic)
                .map(|s| Arc::clone(&s.handler))
                .collect();
            subs.retain(|s| !(s.once && s.topic == topic));
            matched
        };
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                warn!(topic, "event handler panicked; continuing delivery");
            }
        }
    }

    /// Arm a one-shot waiter for the next event on `topic` that matches
    /// `filter`.  The subscription is registered immediately, so the caller
    /// can emit a `*:request` afterwards without racing a responder that
    /// answers synchronously during the emit.
    pub fn waiter(
        &self,
        topic: &str,
        filter: impl Fn(&EngineEvent) -> bool + Send + Sync + 'static,
    ) -> EventWaiter<'_> {
        let (tx, rx) = oneshot::channel::<EngineEvent>();
        let tx = Mutex::new(Some(tx));
        let id = self.on(topic, move |ev| {
            if filter(ev) {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(ev.clone());
                }
            }
        });
        EventWaiter { bus: self, id, rx }
    }

    /// Park until an event on `topic` matches `filter`, or `abort` fires.
    ///
    /// This is the request/response rendezvous primitive.  When the request
    /// must be emitted first, arm a [`EventBus::waiter`] before emitting and
    /// await it afterwards.  Returns `None` on abort.
    pub async fn wait_for(
        &self,
        topic: &str,
        filter: impl Fn(&EngineEvent) -> bool + Send + Sync + 'static,
        abort: &CancellationToken,
    ) -> Option<EngineEvent> {
        self.waiter(topic, filter).wait(abort).await
    }
}

/// A one-shot armed subscription returned by [`EventBus::waiter`].
pub struct EventWaiter<'a> {
    bus: &'a EventBus,
    id: SubscriptionId,
    rx: oneshot::Receiver<EngineEvent>,
}

impl EventWaiter<'_> {
    /// Wait for the matching event or the abort token, unregistering the
    /// subscription either way.
    pub async fn wait(self, abort: &CancellationToken) -> Option<EngineEvent> {
        let result = tokio::select! {
            biased;
            _ = abort.cancelled() => None,
            ev = self.rx => ev.ok(),
        };
        self.bus.off(self.id);
        result
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::state::AgentId;

    fn cleared() -> EngineEvent {
        EngineEvent::SessionCleared
    }

    #[test]
    fn emit_delivers_to_topic_subscribers_only() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.on("session:cleared", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.on("session:ready", |_| panic!("wrong topic"));
        bus.emit(cleared());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delivery_is_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let o = Arc::clone(&order);
            bus.on("session:cleared", move |_| {
                o.lock().unwrap().push(i);
            });
        }
        bus.emit(cleared());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn once_fires_exactly_once() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.once("session:cleared", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(cleared());
        bus.emit(cleared());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.on("session:cleared", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.off(id);
        bus.emit(cleared());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_handler_does_not_block_siblings() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.on("session:cleared", |_| panic!("boom"));
        let h = Arc::clone(&hits);
        bus.on("session:cleared", move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(cleared());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wait_for_resolves_on_matching_event() {
        let bus = Arc::new(EventBus::new());
        let abort = CancellationToken::new();
        let b = Arc::clone(&bus);
        let waiter = tokio::spawn(async move {
            b.wait_for(
                "tool:permission:response",
                |ev| {
                    matches!(
                        ev,
                        EngineEvent::PermissionResponse { agent_id, .. }
                            if agent_id == &AgentId::main()
                    )
                },
                &abort,
            )
            .await
        });
        tokio::task::yield_now().await;
        // Non-matching agent id is ignored.
        bus.emit(EngineEvent::PermissionResponse {
            agent_id: AgentId::sub(),
            tool_name: "bash".into(),
            selected: "agree".into(),
        });
        bus.emit(EngineEvent::PermissionResponse {
            agent_id: AgentId::main(),
            tool_name: "bash".into(),
            selected: "allow".into(),
        });
        let got = waiter.await.unwrap();
        assert!(matches!(
            got,
            Some(EngineEvent::PermissionResponse { selected, .. }) if selected == "allow"
        ));
    }

    #[tokio::test]
    async fn wait_for_returns_none_on_abort() {
        let bus = Arc::new(EventBus::new());
        let abort = CancellationToken::new();
        let token = abort.clone();
        let b = Arc::clone(&bus);
        let waiter =
            tokio::spawn(
                async move { b.wait_for("tool:permission:response", |_| true, &token).await },
            );
        tokio::task::yield_now().await;
        abort.cancel();
        assert!(waiter.await.unwrap().is_none());
    }
}
