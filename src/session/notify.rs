//! Notification relay
//!
//! Fans server push notifications out to registered listeners in
//! registration order. A panicking listener is logged and skipped; the
//! remaining listeners still run and the relay stays usable.

use crate::db::link::{LinkEvent, Notification};
use crate::session::events::{EventSink, SessionEvent};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback invoked for every notification
pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync + 'static>;

#[derive(Default)]
pub struct NotificationRelay {
    listeners: Mutex<Vec<Listener>>,
}

impl NotificationRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, listener: F)
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.listeners.lock().push(Arc::new(listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Deliver `message` to every listener; returns how many completed
    pub fn dispatch(&self, message: &Notification) -> usize {
        // Snapshot so listeners may register more listeners
        let listeners: Vec<Listener> = self.listeners.lock().clone();
        let mut delivered = 0;
        for (idx, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(message))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::warn!(
                    listener = idx,
                    channel = %message.channel,
                    "Notification listener panicked"
                ),
            }
        }
        delivered
    }
}

/// Forward a link's events until its driver stops
pub(crate) async fn forward(
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    relay: Arc<NotificationRelay>,
    sink: EventSink,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Notification(message) => {
                tracing::debug!(channel = %message.channel, "Notification received");
                relay.dispatch(&message);
                sink.emit(SessionEvent::Notification(message));
            }
            LinkEvent::Closed(Some(reason)) => {
                tracing::warn!(error = %reason, "Connection to server lost");
                sink.emit(SessionEvent::ConnectionLost { message: reason });
                break;
            }
            LinkEvent::Closed(None) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(payload: &str) -> Notification {
        Notification {
            process_id: 1,
            channel: "jobs".to_string(),
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let relay = NotificationRelay::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let seen = seen.clone();
            relay.register(move |n: &Notification| {
                seen.lock().push(format!("{}:{}", name, n.payload))
            });
        }
        assert_eq!(relay.dispatch(&note("x")), 3);
        assert_eq!(*seen.lock(), vec!["first:x", "second:x", "third:x"]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let relay = NotificationRelay::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        relay.register(|_: &Notification| panic!("listener bug"));
        let seen2 = seen.clone();
        relay.register(move |n: &Notification| seen2.lock().push(n.payload.clone()));

        assert_eq!(relay.dispatch(&note("a")), 1);
        assert_eq!(relay.dispatch(&note("b")), 1);
        assert_eq!(*seen.lock(), vec!["a", "b"]);
        assert_eq!(relay.len(), 2);
    }

    #[test]
    fn test_listener_can_register_listener() {
        let relay = Arc::new(NotificationRelay::new());
        let inner = relay.clone();
        relay.register(move |_: &Notification| inner.register(|_: &Notification| {}));
        relay.dispatch(&note("a"));
        assert_eq!(relay.len(), 2);
    }

    #[test]
    fn test_empty_relay() {
        let relay = NotificationRelay::new();
        assert!(relay.is_empty());
        assert_eq!(relay.dispatch(&note("a")), 0);
    }

    #[tokio::test]
    async fn test_forward_relays_and_reports_loss() {
        let relay = Arc::new(NotificationRelay::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        relay.register(move |n: &Notification| seen2.lock().push(n.payload.clone()));

        let sink = EventSink::new();
        let mut rx = sink.subscribe();
        let (tx, events) = mpsc::unbounded_channel();
        tx.send(LinkEvent::Notification(note("hello"))).unwrap();
        tx.send(LinkEvent::Closed(Some("connection reset".to_string())))
            .unwrap();
        tx.send(LinkEvent::Notification(note("after close"))).unwrap();

        forward(events, relay, sink).await;

        assert_eq!(*seen.lock(), vec!["hello"]);
        assert_eq!(
            rx.try_recv().ok(),
            Some(SessionEvent::Notification(note("hello")))
        );
        assert_eq!(
            rx.try_recv().ok(),
            Some(SessionEvent::ConnectionLost {
                message: "connection reset".to_string()
            })
        );
    }
}
