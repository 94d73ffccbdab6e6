//! Message bus contract.
//!
//! Only the topic names and the publish/subscribe semantics are part of the
//! cortex contract; the transport behind them is interchangeable. The
//! in-process [`LocalBus`] is the default transport for single-process
//! deployments and for tests.
//!
//! Subscription handlers are dispatched on their own task: a slow handler
//! never blocks publishing or delivery to other subscribers.

pub mod topics;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::RwLock;

/// A subscription callback. Invoked with the topic and payload of each
/// matching message, on a dedicated task.
pub type Handler = Arc<dyn Fn(String, serde_json::Value) -> BoxFuture<'static, ()> + Send + Sync>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a payload to a topic. Delivery is at-most-once and
    /// fire-and-forget; subscribers observe only presence and payload.
    async fn publish(&self, topic: &str, payload: serde_json::Value);

    /// Registers a handler for a topic. The handler is spawned per message
    /// and must therefore be cheap to clone into a task.
    async fn subscribe(&self, topic: &str, handler: Handler);
}

/// In-process broker backed by a topic -> handlers map.
#[derive(Default)]
pub struct LocalBus {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) {
        let handlers = self.handlers.read().await;
        let Some(subscribers) = handlers.get(topic) else {
            log::trace!("no subscribers for topic {topic}");
            return;
        };
        for handler in subscribers {
            let handler = handler.clone();
            let topic = topic.to_string();
            let payload = payload.clone();
            tokio::spawn(async move {
                handler(topic, payload).await;
            });
        }
    }

    async fn subscribe(&self, topic: &str, handler: Handler) {
        let mut handlers = self.handlers.write().await;
        handlers.entry(topic.to_string()).or_default().push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn published_payload_reaches_subscriber() {
        let bus = LocalBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            topics::NOVA_SERVERS_SYNCED,
            Arc::new(move |topic, payload| {
                let tx = tx.clone();
                Box::pin(async move {
                    tx.send((topic, payload)).unwrap();
                })
            }),
        )
        .await;

        bus.publish(topics::NOVA_SERVERS_SYNCED, serde_json::json!({"rows": 3}))
            .await;
        let (topic, payload) = rx.recv().await.unwrap();
        assert_eq!(topic, topics::NOVA_SERVERS_SYNCED);
        assert_eq!(payload["rows"], 3);
    }

    #[tokio::test]
    async fn unrelated_topics_are_not_delivered() {
        let bus = LocalBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        bus.subscribe(
            topics::NOVA_FLAVORS_SYNCED,
            Arc::new(move |_, _| {
                let counted = counted.clone();
                Box::pin(async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await;

        bus.publish(topics::NOVA_SERVERS_SYNCED, serde_json::Value::Null)
            .await;
        tokio::task::yield_now().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
