//! Turns a connection's queue into a stream of wire frames

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::event::Event;
use crate::registry::{ConnectionRegistry, Subscription};

/// Idle time after which a heartbeat is emitted
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const CANCELLED_MESSAGE: &str = "Event stream cancelled";

/// Produces event streams for attached connections
#[derive(Clone)]
pub struct EventStream {
    registry: ConnectionRegistry,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

/// Removes the connection when the stream finishes or is dropped
struct DetachGuard {
    registry: ConnectionRegistry,
    connection_id: String,
    serial: u64,
}

impl Drop for DetachGuard {
    fn drop(&mut self) {
        self.registry.release(&self.connection_id, self.serial);
    }
}

enum Next {
    Cancelled,
    Event(Option<Arc<Event>>),
    Idle,
}

impl EventStream {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            idle_timeout: HEARTBEAT_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Streams end with a best-effort error frame once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Frames for `connection_id`, in enqueue order.
    ///
    /// A heartbeat is emitted whenever the queue stays empty for the idle
    /// timeout. The stream ends when the connection is detached (after its
    /// queue is drained), when the cancellation token fires, or on a
    /// serialization failure. It ends at once for an unknown id or one whose
    /// queue is already being consumed. However it ends, including being
    /// dropped by the consumer, the connection is removed from the registry.
    pub fn consume(&self, connection_id: &str) -> impl Stream<Item = String> + Send + 'static {
        let idle_timeout = self.idle_timeout;
        let cancel = self.cancel.clone();
        let connection_id = connection_id.to_string();

        // Taken before the first poll so an unpolled stream still detaches on drop
        let subscription = self.registry.take_subscription(&connection_id).map(|subscription| {
            let guard = DetachGuard {
                registry: self.registry.clone(),
                connection_id: connection_id.clone(),
                serial: subscription.serial,
            };
            (subscription, guard)
        });

        async_stream::stream! {
            let Some((subscription, _guard)) = subscription else {
                tracing::debug!(connection_id = %connection_id, "No queue to consume");
                return;
            };
            let Subscription { mut receiver, queue_depth, .. } = subscription;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Next::Cancelled,
                    received = tokio::time::timeout(idle_timeout, receiver.recv()) => match received {
                        Ok(event) => Next::Event(event),
                        Err(_) => Next::Idle,
                    },
                };

                let frame = match next {
                    Next::Cancelled => {
                        tracing::info!(connection_id = %connection_id, "SSE event stream cancelled");
                        if let Ok(frame) = Event::error(&connection_id, CANCELLED_MESSAGE).to_frame() {
                            yield frame;
                        }
                        break;
                    }
                    Next::Event(Some(event)) => {
                        queue_depth.fetch_sub(1, Ordering::SeqCst);
                        event.to_frame()
                    }
                    Next::Event(None) => {
                        tracing::debug!(connection_id = %connection_id, "Connection queue closed");
                        break;
                    }
                    Next::Idle => {
                        tracing::debug!(connection_id = %connection_id, "Sending heartbeat");
                        Event::heartbeat(&connection_id).to_frame()
                    }
                };

                match frame {
                    Ok(frame) => yield frame,
                    Err(e) => {
                        tracing::error!(connection_id = %connection_id, error = %e, "Error in SSE event stream");
                        if let Ok(frame) = Event::error(&connection_id, &e.to_string()).to_frame() {
                            yield frame;
                        }
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, parse_frame};
    use futures::StreamExt;
    use serde_json::Value;

    fn kind_of(frame: &str) -> EventKind {
        parse_frame(frame).unwrap().kind().unwrap()
    }

    fn setup() -> (ConnectionRegistry, EventStream) {
        let registry = ConnectionRegistry::new();
        let stream = EventStream::new(registry.clone());
        (registry, stream)
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_in_enqueue_order() {
        let (registry, events) = setup();
        registry.attach("c1", Value::Null);
        registry.send_tool_call("c1", "list_buckets", serde_json::json!({}));
        registry.send_tool_result("c1", "list_buckets", serde_json::json!(["logs"]), true);

        let mut stream = Box::pin(events.consume("c1"));
        assert_eq!(kind_of(&stream.next().await.unwrap()), EventKind::Connected);
        assert_eq!(kind_of(&stream.next().await.unwrap()), EventKind::ToolCall);

        let frame = stream.next().await.unwrap();
        assert_eq!(kind_of(&frame), EventKind::ToolResult);
        let data = parse_frame(&frame).unwrap().data_json().unwrap();
        assert_eq!(data["result"], serde_json::json!(["logs"]));
        assert_eq!(registry.stats().connections["c1"].queue_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_after_idle_timeout() {
        let (registry, events) = setup();
        registry.attach("c1", Value::Null);

        let mut stream = Box::pin(events.consume("c1"));
        stream.next().await.unwrap();

        let start = tokio::time::Instant::now();
        let frame = stream.next().await.unwrap();
        assert_eq!(kind_of(&frame), EventKind::Heartbeat);
        assert!(start.elapsed() >= HEARTBEAT_INTERVAL);
        // Heartbeats bypass the queue
        assert_eq!(registry.stats().connections["c1"].events_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_while_events_flow() {
        let (registry, events) = setup();
        registry.attach("c1", Value::Null);
        let mut stream = Box::pin(events.consume("c1"));
        stream.next().await.unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        registry.send_status_update("healthy", Value::Null);
        assert_eq!(kind_of(&stream.next().await.unwrap()), EventKind::StatusUpdate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_idle_timeout() {
        let (registry, events) = setup();
        let events = events.with_idle_timeout(Duration::from_secs(5));
        registry.attach("c1", Value::Null);
        let mut stream = Box::pin(events.consume("c1"));
        stream.next().await.unwrap();

        let start = tokio::time::Instant::now();
        assert_eq!(kind_of(&stream.next().await.unwrap()), EventKind::Heartbeat);
        assert!(start.elapsed() < HEARTBEAT_INTERVAL);
    }

    #[tokio::test]
    async fn test_unknown_connection_ends_immediately() {
        let (_registry, events) = setup();
        let mut stream = Box::pin(events.consume("ghost"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_second_consumer_ends_immediately() {
        let (registry, events) = setup();
        registry.attach("c1", Value::Null);
        let mut first = Box::pin(events.consume("c1"));
        first.next().await.unwrap();

        let mut second = Box::pin(events.consume("c1"));
        assert!(second.next().await.is_none());
        assert!(registry.contains("c1"));
    }

    #[tokio::test]
    async fn test_detach_drains_then_ends() {
        let (registry, events) = setup();
        registry.attach("c1", Value::Null);
        registry.send_tool_call("c1", "stat_object", serde_json::json!({"key": "a"}));
        registry.detach("c1");

        let frames: Vec<String> = events.consume("c1").collect().await;
        // Detached before consumption started: nothing to consume
        assert!(frames.is_empty());

        registry.attach("c2", Value::Null);
        let mut stream = Box::pin(events.consume("c2"));
        stream.next().await.unwrap();
        registry.send_tool_call("c2", "stat_object", serde_json::json!({"key": "a"}));
        registry.detach("c2");

        let rest: Vec<EventKind> = stream.map(|frame| kind_of(&frame)).collect().await;
        assert_eq!(rest, vec![EventKind::ToolCall, EventKind::Disconnected]);
    }

    #[tokio::test]
    async fn test_dropping_stream_detaches() {
        let (registry, events) = setup();
        registry.attach("c1", Value::Null);
        let mut stream = Box::pin(events.consume("c1"));
        stream.next().await.unwrap();
        assert!(registry.contains("c1"));

        drop(stream);
        assert!(!registry.contains("c1"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_unpolled_stream_detaches() {
        let (registry, events) = setup();
        registry.attach("c1", Value::Null);

        let stream = events.consume("c1");
        drop(stream);

        assert!(!registry.contains("c1"));
        assert_eq!(registry.send_status_update("healthy", Value::Null), 0);
    }

    #[tokio::test]
    async fn test_reattach_ends_old_stream_only() {
        let (registry, events) = setup();
        registry.attach("c1", serde_json::json!({"n": 1}));
        let mut old = Box::pin(events.consume("c1"));
        old.next().await.unwrap();

        registry.attach("c1", serde_json::json!({"n": 2}));
        assert_eq!(kind_of(&old.next().await.unwrap()), EventKind::Disconnected);
        assert!(old.next().await.is_none());
        drop(old);

        assert!(registry.contains("c1"));
        assert_eq!(registry.stats().connections["c1"].client_info["n"], 2);

        let mut new = Box::pin(events.consume("c1"));
        assert_eq!(kind_of(&new.next().await.unwrap()), EventKind::Connected);
    }

    #[tokio::test]
    async fn test_cancellation_emits_error_and_detaches() {
        let (registry, events) = setup();
        let cancel = CancellationToken::new();
        let events = events.with_cancellation(cancel.clone());
        registry.attach("c1", Value::Null);

        let mut stream = Box::pin(events.consume("c1"));
        stream.next().await.unwrap();

        cancel.cancel();
        let frame = stream.next().await.unwrap();
        assert_eq!(kind_of(&frame), EventKind::Error);
        let data = parse_frame(&frame).unwrap().data_json().unwrap();
        assert_eq!(data["error"], "Event stream cancelled");

        assert!(stream.next().await.is_none());
        assert!(!registry.contains("c1"));
    }
}
