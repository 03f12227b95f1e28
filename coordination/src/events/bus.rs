//! Event bus for deliberation observers
//!
//! Provides pub/sub messaging using a Tokio broadcast channel, synchronous
//! listeners and a bounded replay history. Publishing never fails: a bus
//! with no subscribers still records history, and a failing listener is
//! logged and skipped.

use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::history::{EventHistory, EventStats, DEFAULT_HISTORY_SIZE};
use super::types::{DiscoveryEvent, EventEnvelope};

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Synchronous listener. An `Err` is logged and otherwise ignored.
pub type Listener = Box<dyn Fn(&EventEnvelope) -> Result<(), String> + Send + Sync>;

/// Event bus with a broadcast channel, listeners and history
pub struct EventBus {
    /// Broadcast sender for publishing events
    sender: broadcast::Sender<EventEnvelope>,

    listeners: RwLock<Vec<(String, Listener)>>,

    history: Mutex<EventHistory>,

    next_seq: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the default history size
    pub fn new() -> Self {
        Self::with_history(DEFAULT_HISTORY_SIZE)
    }

    pub fn with_history(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            listeners: RwLock::new(Vec::new()),
            history: Mutex::new(EventHistory::new(capacity)),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to history, listeners and subscribers.
    pub fn publish(&self, event: DiscoveryEvent) -> EventEnvelope {
        let envelope = EventEnvelope {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            event,
            timestamp: Utc::now(),
        };
        let event_type = envelope.event_type();

        self.history().push(envelope.clone());
        self.notify_listeners(&envelope);

        // No receivers is OK - history still has it
        match self.sender.send(envelope.clone()) {
            Ok(count) => debug!(event_type, seq = envelope.seq, receivers = count, "Event published"),
            Err(_) => debug!(event_type, seq = envelope.seq, "Event published (no receivers)"),
        }
        envelope
    }

    /// Register a named synchronous listener.
    pub fn add_listener<F>(&self, name: &str, listener: F)
    where
        F: Fn(&EventEnvelope) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut listeners = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        listeners.push((name.to_string(), Box::new(listener)));
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<EventEnvelope> {
        self.history().recent(limit)
    }

    pub fn since(&self, seq: u64) -> Vec<EventEnvelope> {
        self.history().since(seq)
    }

    pub fn stats(&self) -> EventStats {
        self.history().stats()
    }

    fn history(&self) -> MutexGuard<'_, EventHistory> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify_listeners(&self, envelope: &EventEnvelope) {
        let listeners = match self.listeners.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (name, listener) in listeners.iter() {
            match catch_unwind(AssertUnwindSafe(|| listener(envelope))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(listener = %name, event_type = envelope.event_type(), error = %e, "Event listener failed"),
                Err(_) => warn!(listener = %name, event_type = envelope.event_type(), "Event listener panicked"),
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by session ID
    pub session_id: Option<String>,
    /// Filter by event types
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    /// Create a new empty filter (matches all events)
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by session ID. Events without a session pass.
    pub fn session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Filter by event types
    pub fn types(mut self, event_types: Vec<&str>) -> Self {
        self.event_types = Some(event_types.into_iter().map(String::from).collect());
        self
    }

    /// Check if an event matches this filter
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        if let Some(ref sid) = self.session_id {
            if let Some(event_sid) = envelope.event.session_id() {
                if event_sid != sid {
                    return false;
                }
            }
        }

        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == envelope.event_type()) {
                return false;
            }
        }

        true
    }
}

/// Filtered event receiver that only yields matching events
pub struct FilteredReceiver {
    receiver: broadcast::Receiver<EventEnvelope>,
    filter: EventFilter,
}

impl FilteredReceiver {
    pub fn new(receiver: broadcast::Receiver<EventEnvelope>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event
    pub async fn recv(&mut self) -> Result<EventEnvelope, broadcast::error::RecvError> {
        loop {
            let envelope = self.receiver.recv().await?;
            if self.filter.matches(&envelope) {
                return Ok(envelope);
            }
        }
    }
}

/// Extension trait for subscribing with filters
pub trait EventBusExt {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver;
}

impl EventBusExt for EventBus {
    fn subscribe_filtered(&self, filter: EventFilter) -> FilteredReceiver {
        FilteredReceiver::new(self.subscribe(), filter)
    }
}
