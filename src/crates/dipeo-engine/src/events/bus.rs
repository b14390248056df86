//! Typed pub/sub event bus with priority-ordered delivery
//!
//! Handlers subscribe for a set of [`EventType`]s at a priority; published
//! events flow through one bounded queue into a dispatcher task that
//! delivers each event to every matching handler, strictly high→low
//! priority, awaiting each handler before the next observes the event.
//! Within a priority tier, delivery follows registration order.
//!
//! Publication is non-blocking until the queue fills; past capacity the
//! publisher awaits (back-pressure) rather than dropping. A handler error
//! is logged and does not cancel delivery to the remaining handlers.

use super::{EventType, ExecutionEvent};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Delivery priority: all higher-priority handlers for an event are awaited
/// before any lower-priority handler observes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    High,
    Normal,
    Low,
}

/// A subscriber on the bus
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name used in delivery failure logs
    fn name(&self) -> &str {
        "anonymous"
    }

    async fn handle(&self, event: &ExecutionEvent) -> Result<()>;
}

/// Identifier returned by subscribe, usable for removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    types: HashSet<EventType>,
    execution_id: Option<String>,
    priority: EventPriority,
    seq: u64,
    handler: Arc<dyn EventHandler>,
}

impl Subscription {
    fn matches(&self, event: &ExecutionEvent) -> bool {
        if !self.types.is_empty() && !self.types.contains(&event.event_type) {
            return false;
        }
        match &self.execution_id {
            Some(id) => *id == event.execution_id,
            None => true,
        }
    }
}

enum BusMessage {
    Event(ExecutionEvent),
    Flush(oneshot::Sender<()>),
}

/// Priority-ordered pub/sub bus (cheap to clone; clones share the queue)
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<BusMessage>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    next_id: Arc<AtomicU64>,
    event_store: Option<Arc<super::store::EventStore>>,
}

impl EventBus {
    /// Create a bus with the given queue capacity and spawn its dispatcher
    pub fn new(queue_size: usize) -> Self {
        Self::with_event_store(queue_size, None)
    }

    /// Create a bus from configuration, wiring the optional event store
    pub fn from_settings(settings: &crate::config::EventSettings) -> Self {
        let store = settings
            .enable_event_store
            .then(|| Arc::new(super::store::EventStore::new(settings.event_store_ttl)));
        Self::with_event_store(settings.queue_size, store)
    }

    /// Create a bus that additionally taps every event into an append-only
    /// [`EventStore`](super::store::EventStore)
    pub fn with_event_store(
        queue_size: usize,
        event_store: Option<Arc<super::store::EventStore>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let subscriptions: Arc<RwLock<Vec<Subscription>>> = Arc::new(RwLock::new(Vec::new()));
        let bus = Self {
            tx,
            subscriptions: subscriptions.clone(),
            next_id: Arc::new(AtomicU64::new(0)),
            event_store: event_store.clone(),
        };
        tokio::spawn(dispatch_loop(rx, subscriptions, event_store));
        bus
    }

    /// Subscribe a handler for a set of event types (empty set = all)
    pub async fn subscribe(
        &self,
        types: impl IntoIterator<Item = EventType>,
        handler: Arc<dyn EventHandler>,
        priority: EventPriority,
    ) -> SubscriptionId {
        self.subscribe_inner(types, None, handler, priority).await
    }

    /// Subscribe a handler scoped to a single execution id
    pub async fn subscribe_scoped(
        &self,
        types: impl IntoIterator<Item = EventType>,
        execution_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        priority: EventPriority,
    ) -> SubscriptionId {
        self.subscribe_inner(types, Some(execution_id.into()), handler, priority)
            .await
    }

    async fn subscribe_inner(
        &self,
        types: impl IntoIterator<Item = EventType>,
        execution_id: Option<String>,
        handler: Arc<dyn EventHandler>,
        priority: EventPriority,
    ) -> SubscriptionId {
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = SubscriptionId(seq);
        let mut subs = self.subscriptions.write().await;
        subs.push(Subscription {
            id,
            types: types.into_iter().collect(),
            execution_id,
            priority,
            seq,
            handler,
        });
        // Keep the vector delivery-ordered so the dispatcher just walks it
        subs.sort_by_key(|s| (s.priority, s.seq));
        id
    }

    /// Remove one subscription
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.write().await.retain(|s| s.id != id);
    }

    /// Remove every subscription scoped to the given execution
    pub async fn unsubscribe_execution(&self, execution_id: &str) {
        self.subscriptions
            .write()
            .await
            .retain(|s| s.execution_id.as_deref() != Some(execution_id));
    }

    /// Publish an event. Blocks only when the queue is at capacity.
    pub async fn publish(&self, event: ExecutionEvent) -> Result<()> {
        self.tx
            .send(BusMessage::Event(event))
            .await
            .map_err(|_| EngineError::EventBus("bus dispatcher stopped".to_string()))
    }

    /// Wait until every previously published event has been delivered
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Flush(done_tx))
            .await
            .map_err(|_| EngineError::EventBus("bus dispatcher stopped".to_string()))?;
        done_rx
            .await
            .map_err(|_| EngineError::EventBus("bus dispatcher stopped".to_string()))
    }

    pub fn event_store(&self) -> Option<&Arc<super::store::EventStore>> {
        self.event_store.as_ref()
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<BusMessage>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    event_store: Option<Arc<super::store::EventStore>>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            BusMessage::Event(event) => {
                let handlers: Vec<(String, Arc<dyn EventHandler>)> = {
                    let subs = subscriptions.read().await;
                    subs.iter()
                        .filter(|s| s.matches(&event))
                        .map(|s| (s.handler.name().to_string(), s.handler.clone()))
                        .collect()
                };
                for (name, handler) in handlers {
                    if let Err(e) = handler.handle(&event).await {
                        tracing::warn!(
                            handler = %name,
                            event = ?event.event_type,
                            execution_id = %event.execution_id,
                            error = %e,
                            "event handler failed"
                        );
                    }
                }
                if let Some(store) = &event_store {
                    store.append(event).await;
                }
            }
            BusMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn handle(&self, event: &ExecutionEvent) -> Result<()> {
            self.log
                .lock()
                .await
                .push(format!("{}:{:?}", self.name, event.event_type));
            if self.fail {
                return Err(EngineError::Custom("handler broke".to_string()));
            }
            Ok(())
        }
    }

    fn recorder(name: &str, log: Arc<Mutex<Vec<String>>>) -> Arc<Recorder> {
        Arc::new(Recorder {
            name: name.to_string(),
            log,
            fail: false,
        })
    }

    #[tokio::test]
    async fn test_priority_order_is_strict() {
        let bus = EventBus::new(16);
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe([], recorder("low", log.clone()), EventPriority::Low)
            .await;
        bus.subscribe([], recorder("high", log.clone()), EventPriority::High)
            .await;
        bus.subscribe([], recorder("normal", log.clone()), EventPriority::Normal)
            .await;

        bus.publish(ExecutionEvent::new(EventType::ExecutionStarted, "e1"))
            .await
            .unwrap();
        bus.flush().await.unwrap();

        let log = log.lock().await;
        assert_eq!(
            *log,
            vec![
                "high:ExecutionStarted",
                "normal:ExecutionStarted",
                "low:ExecutionStarted"
            ]
        );
    }

    #[tokio::test]
    async fn test_type_and_execution_scoping() {
        let bus = EventBus::new(16);
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            [EventType::NodeStarted],
            recorder("typed", log.clone()),
            EventPriority::Normal,
        )
        .await;
        bus.subscribe_scoped(
            [],
            "e1",
            recorder("scoped", log.clone()),
            EventPriority::Normal,
        )
        .await;

        bus.publish(ExecutionEvent::node_started("e2", "n", "code_job"))
            .await
            .unwrap();
        bus.publish(ExecutionEvent::new(EventType::ExecutionCompleted, "e1"))
            .await
            .unwrap();
        bus.flush().await.unwrap();

        let log = log.lock().await;
        assert_eq!(*log, vec!["typed:NodeStarted", "scoped:ExecutionCompleted"]);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_delivery() {
        let bus = EventBus::new(16);
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(
            [],
            Arc::new(Recorder {
                name: "broken".to_string(),
                log: log.clone(),
                fail: true,
            }),
            EventPriority::High,
        )
        .await;
        bus.subscribe([], recorder("after", log.clone()), EventPriority::Low)
            .await;

        bus.publish(ExecutionEvent::new(EventType::ExecutionStarted, "e1"))
            .await
            .unwrap();
        bus.flush().await.unwrap();

        let log = log.lock().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[1], "after:ExecutionStarted");
    }

    #[tokio::test]
    async fn test_unsubscribe_execution_removes_scoped() {
        let bus = EventBus::new(16);
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe_scoped([], "e1", recorder("scoped", log.clone()), EventPriority::Normal)
            .await;
        bus.unsubscribe_execution("e1").await;

        bus.publish(ExecutionEvent::new(EventType::ExecutionStarted, "e1"))
            .await
            .unwrap();
        bus.flush().await.unwrap();

        assert!(log.lock().await.is_empty());
    }
}
