//! Message router: per-execution fan-out to streaming subscribers
//!
//! The router keeps a set of bounded subscriber queues per execution id.
//! Broadcasting enqueues on every queue for that execution under the
//! router lock; each consumer drains its own queue independently, so one
//! slow SSE client never stalls the engine. A queue past its bound drops
//! the *oldest* frame and folds in a [`StreamFrame::Dropped`] marker so the
//! client can tell it missed data. Completion pushes a [`StreamFrame::End`]
//! sentinel that closes every stream for the execution.

use crate::events::ExecutionEvent;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};

/// One frame on a subscriber stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum StreamFrame {
    /// A routed engine event
    Event(ExecutionEvent),
    /// The queue overflowed and `count` oldest frames were discarded
    Dropped { count: u64 },
    /// Keepalive emitted when no event arrived within the interval
    Heartbeat,
    /// Execution finished; no more frames will follow
    End,
}

impl StreamFrame {
    /// Render this frame as an SSE wire chunk
    /// (`data: <json>\n\n`, or `: heartbeat\n\n` for keepalives)
    pub fn to_sse(&self) -> String {
        match self {
            StreamFrame::Heartbeat => ": heartbeat\n\n".to_string(),
            other => {
                let json = serde_json::to_string(other).unwrap_or_else(|_| "{}".to_string());
                format!("data: {}\n\n", json)
            }
        }
    }
}

struct SubscriberQueue {
    frames: Mutex<VecDeque<StreamFrame>>,
    notify: Notify,
    capacity: usize,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
        }
    }

    async fn push(&self, frame: StreamFrame) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut frames = self.frames.lock().await;
        // The end sentinel is exempt from the bound: it must always arrive
        if !matches!(frame, StreamFrame::End) && frames.len() >= self.capacity {
            // Oldest-first drop; newest frames always get through. A single
            // front marker accumulates the running drop count.
            let mut count = 0u64;
            while let Some(front) = frames.pop_front() {
                match front {
                    StreamFrame::Dropped { count: earlier } => count += earlier,
                    _ => {
                        count += 1;
                        break;
                    }
                }
            }
            frames.push_front(StreamFrame::Dropped { count });
        }
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
    }

    async fn pop(&self) -> Option<StreamFrame> {
        loop {
            {
                let mut frames = self.frames.lock().await;
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

/// Handle held by one streaming consumer
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
    keepalive: Duration,
}

impl Subscription {
    /// Next frame; `None` once the stream has ended and drained
    pub async fn recv(&self) -> Option<StreamFrame> {
        let frame = self.queue.pop().await?;
        if matches!(frame, StreamFrame::End) {
            self.queue.close();
        }
        Some(frame)
    }

    /// Like [`recv`](Self::recv), but yields a heartbeat when no frame
    /// arrives within the keepalive interval
    pub async fn recv_with_heartbeat(&self) -> Option<StreamFrame> {
        match tokio::time::timeout(self.keepalive, self.recv()).await {
            Ok(frame) => frame,
            Err(_) => Some(StreamFrame::Heartbeat),
        }
    }

    /// Consume the subscription as an async stream of frames, heartbeats
    /// included, terminating after the `End` sentinel
    pub fn into_stream(self) -> impl futures::Stream<Item = StreamFrame> {
        async_stream::stream! {
            loop {
                match self.recv_with_heartbeat().await {
                    Some(frame) => {
                        let end = matches!(frame, StreamFrame::End);
                        yield frame;
                        if end {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

/// Settings for subscriber queues
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Maximum buffered frames per subscriber
    pub buffer_max: usize,
    /// Keepalive interval for heartbeat frames
    pub keepalive: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            buffer_max: 50,
            keepalive: Duration::from_secs(25),
        }
    }
}

/// Fan-out of engine events to external subscribers, keyed by execution id
pub struct MessageRouter {
    subscribers: RwLock<HashMap<String, Vec<Arc<SubscriberQueue>>>>,
    settings: RouterSettings,
}

impl MessageRouter {
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Register a new subscriber for an execution
    pub async fn subscribe(&self, execution_id: &str) -> Subscription {
        let queue = Arc::new(SubscriberQueue::new(self.settings.buffer_max));
        self.subscribers
            .write()
            .await
            .entry(execution_id.to_string())
            .or_default()
            .push(queue.clone());
        Subscription {
            queue,
            keepalive: self.settings.keepalive,
        }
    }

    /// Enqueue an event on every subscriber queue for the execution
    pub async fn broadcast_to_execution(&self, execution_id: &str, event: ExecutionEvent) {
        let queues: Vec<Arc<SubscriberQueue>> = {
            let subs = self.subscribers.read().await;
            match subs.get(execution_id) {
                Some(queues) => queues.clone(),
                None => return,
            }
        };
        for queue in queues {
            queue.push(StreamFrame::Event(event.clone())).await;
        }
    }

    /// Send the end-of-stream sentinel and drop the execution's subscribers
    pub async fn complete_execution(&self, execution_id: &str) {
        let queues = self.subscribers.write().await.remove(execution_id);
        if let Some(queues) = queues {
            for queue in queues {
                queue.push(StreamFrame::End).await;
            }
        }
    }

    pub async fn subscriber_count(&self, execution_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(execution_id)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    fn event(execution_id: &str) -> ExecutionEvent {
        ExecutionEvent::new(EventType::ExecutionLog, execution_id)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let router = MessageRouter::new(RouterSettings::default());
        let sub1 = router.subscribe("e1").await;
        let sub2 = router.subscribe("e1").await;

        router.broadcast_to_execution("e1", event("e1")).await;

        assert!(matches!(sub1.recv().await, Some(StreamFrame::Event(_))));
        assert!(matches!(sub2.recv().await, Some(StreamFrame::Event(_))));
    }

    #[tokio::test]
    async fn test_unrelated_execution_not_delivered() {
        let router = MessageRouter::new(RouterSettings::default());
        let sub = router.subscribe("e1").await;

        router.broadcast_to_execution("e2", event("e2")).await;
        router.complete_execution("e1").await;

        assert!(matches!(sub.recv().await, Some(StreamFrame::End)));
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_and_marks() {
        let router = MessageRouter::new(RouterSettings {
            buffer_max: 3,
            keepalive: Duration::from_secs(25),
        });
        let sub = router.subscribe("e1").await;

        for _ in 0..5 {
            router.broadcast_to_execution("e1", event("e1")).await;
        }

        // The two oldest frames were discarded; the marker arrives first
        match sub.recv().await {
            Some(StreamFrame::Dropped { count }) => assert_eq!(count, 2),
            other => panic!("expected drop marker, got {:?}", other),
        }
        let mut delivered = 0;
        router.complete_execution("e1").await;
        while let Some(frame) = sub.recv().await {
            match frame {
                StreamFrame::Event(_) => delivered += 1,
                StreamFrame::End => break,
                other => panic!("unexpected frame {:?}", other),
            }
        }
        assert_eq!(delivered, 3);
    }

    #[tokio::test]
    async fn test_end_sentinel_closes_stream() {
        let router = MessageRouter::new(RouterSettings::default());
        let sub = router.subscribe("e1").await;

        router.broadcast_to_execution("e1", event("e1")).await;
        router.complete_execution("e1").await;

        assert!(matches!(sub.recv().await, Some(StreamFrame::Event(_))));
        assert!(matches!(sub.recv().await, Some(StreamFrame::End)));
        assert!(sub.recv().await.is_none());
        assert_eq!(router.subscriber_count("e1").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_when_idle() {
        let router = MessageRouter::new(RouterSettings {
            buffer_max: 8,
            keepalive: Duration::from_millis(100),
        });
        let sub = router.subscribe("e1").await;

        let frame = sub.recv_with_heartbeat().await;
        assert!(matches!(frame, Some(StreamFrame::Heartbeat)));
    }

    #[test]
    fn test_sse_framing() {
        assert_eq!(StreamFrame::Heartbeat.to_sse(), ": heartbeat\n\n");
        let sse = StreamFrame::End.to_sse();
        assert!(sse.starts_with("data: "));
        assert!(sse.ends_with("\n\n"));
    }
}
