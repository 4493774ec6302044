//! Connection registry
//!
//! Owns every live connection and its event queue. Publishers only ever call
//! [`ConnectionRegistry::send`] or [`ConnectionRegistry::broadcast`]; they do
//! not need to know which subscribers are currently attached.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use jiff::Timestamp;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::event::Event;

/// Public view of an attached connection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub id: String,
    pub connected_at: Timestamp,
    pub client_info: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub connected_at: Timestamp,
    pub client_info: Value,
    /// Events enqueued on this connection, including `connected`
    pub events_sent: u64,
    /// Events enqueued but not yet emitted
    pub queue_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_connections: usize,
    pub connections: BTreeMap<String, ConnectionStats>,
}

/// Receiving half of a connection, handed to exactly one stream
pub(crate) struct Subscription {
    pub(crate) serial: u64,
    pub(crate) receiver: mpsc::UnboundedReceiver<Arc<Event>>,
    pub(crate) queue_depth: Arc<AtomicUsize>,
}

struct ConnectionSlot {
    /// Distinguishes successive connections attached under the same id
    serial: u64,
    info: Connection,
    sender: mpsc::UnboundedSender<Arc<Event>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Arc<Event>>>>,
    events_sent: AtomicU64,
    queue_depth: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn enqueue(&self, event: Arc<Event>) -> bool {
        // Counted before the send so a concurrent consumer never underflows it
        self.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(event).is_err() {
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connected_at: self.info.connected_at,
            client_info: self.info.client_info.clone(),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            queue_size: self.queue_depth.load(Ordering::SeqCst),
        }
    }
}

/// Thread-safe map of connection id to queue. Cheap to clone.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, Arc<ConnectionSlot>>>,
    next_serial: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection with an empty queue holding a `connected` event.
    ///
    /// An existing connection with the same id is torn down first: it
    /// receives `disconnected` and its stream ends once drained.
    pub fn attach(&self, connection_id: &str, client_info: Value) -> Connection {
        let (sender, receiver) = mpsc::unbounded_channel();
        let info = Connection {
            id: connection_id.to_string(),
            connected_at: Timestamp::now(),
            client_info,
        };

        let slot = Arc::new(ConnectionSlot {
            serial: self.next_serial.fetch_add(1, Ordering::Relaxed),
            info: info.clone(),
            sender,
            receiver: Mutex::new(Some(receiver)),
            events_sent: AtomicU64::new(0),
            queue_depth: Arc::new(AtomicUsize::new(0)),
        });
        slot.enqueue(Arc::new(Event::connected(connection_id)));

        if let Some(previous) = self.connections.insert(connection_id.to_string(), slot) {
            previous.enqueue(Arc::new(Event::disconnected(connection_id)));
            tracing::info!(connection_id = %connection_id, "Replaced existing SSE connection");
        }

        tracing::info!(connection_id = %connection_id, "SSE connection established");
        info
    }

    /// Remove a connection after a best-effort `disconnected` event.
    /// Unknown ids are ignored.
    pub fn detach(&self, connection_id: &str) {
        if let Some((_, slot)) = self.connections.remove(connection_id) {
            if !slot.enqueue(Arc::new(Event::disconnected(connection_id))) {
                tracing::debug!(connection_id = %connection_id, "Subscriber already gone");
            }
            tracing::info!(connection_id = %connection_id, "SSE connection removed");
        }
    }

    /// Enqueue on one connection. Unknown ids are ignored.
    pub fn send(&self, connection_id: &str, event: Event) {
        if let Some(slot) = self.connections.get(connection_id)
            && !slot.enqueue(Arc::new(event))
        {
            tracing::debug!(connection_id = %connection_id, "Dropped event for closed connection");
        }
    }

    /// Enqueue the same event on every connection not in `exclude`.
    /// Returns how many connections it was enqueued on.
    pub fn broadcast(&self, event: Event, exclude: &HashSet<String>) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        for entry in self.connections.iter() {
            if exclude.contains(entry.key()) {
                continue;
            }
            if entry.value().enqueue(event.clone()) {
                delivered += 1;
            }
        }
        tracing::debug!(kind = %event.kind(), delivered, "Broadcast event");
        delivered
    }

    pub fn send_tool_call(&self, connection_id: &str, tool_name: &str, parameters: Value) {
        self.send(
            connection_id,
            Event::tool_call(connection_id, tool_name, parameters),
        );
    }

    pub fn send_tool_result(&self, connection_id: &str, tool_name: &str, result: Value, success: bool) {
        self.send(
            connection_id,
            Event::tool_result(connection_id, tool_name, result, success),
        );
    }

    /// Broadcast a `status_update` to every connection
    pub fn send_status_update(&self, status: &str, details: Value) -> usize {
        self.broadcast(Event::status_update(status, details), &HashSet::new())
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Point-in-time snapshot
    pub fn stats(&self) -> RegistryStats {
        let connections: BTreeMap<_, _> = self
            .connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect();

        RegistryStats {
            total_connections: connections.len(),
            connections,
        }
    }

    /// Hand out the receiving half. Only the first caller gets it.
    pub(crate) fn take_subscription(&self, connection_id: &str) -> Option<Subscription> {
        let slot = self.connections.get(connection_id)?;
        let receiver = slot
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        Some(Subscription {
            serial: slot.serial,
            receiver,
            queue_depth: slot.queue_depth.clone(),
        })
    }

    /// Remove the connection only if it is still the one identified by
    /// `serial`; a newer connection under the same id is left alone.
    pub(crate) fn release(&self, connection_id: &str, serial: u64) {
        if self
            .connections
            .remove_if(connection_id, |_, slot| slot.serial == serial)
            .is_some()
        {
            tracing::info!(connection_id = %connection_id, "SSE connection removed");
        }
    }
}
