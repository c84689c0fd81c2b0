//! Event Publisher: ordered per-scope event log plus live fan-out.
//!
//! The log is the source of truth. Every published event is appended to its
//! scope's log with the next sequence number and then pushed to live
//! subscribers over a tokio broadcast channel. Live delivery is best-effort:
//! a subscriber that falls behind the channel capacity skips the events it
//! missed and must re-fetch them with [`EventPublisher::events_since`].
//!
//! Sequence assignment, append, and broadcast happen under one per-scope
//! lock, so subscribers never observe a lower sequence after a higher one.
//! Scopes never contend with each other.

use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::domain::record::now_rfc3339;
use crate::types::event::{Event, EventDraft};

/// Default live channel capacity per scope.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A lazy, potentially infinite, non-restartable sequence of events.
pub type EventStream = BoxStream<'static, Event>;

struct ScopeLog {
    events: Mutex<Vec<Event>>,
    tx: broadcast::Sender<Event>,
}

/// Per-scope ordered event log with live subscriptions.
///
/// # Examples
///
/// ```
/// use aiwrite_tasks::events::EventPublisher;
/// use aiwrite_tasks::{EventDraft, EventType};
/// use serde_json::json;
///
/// let publisher = EventPublisher::new(16);
/// let draft = EventDraft { event_type: EventType::StatusChanged, payload: json!({"taskId": "t-1"}) };
/// let first = publisher.publish("P1", draft.clone());
/// let second = publisher.publish("P1", draft.clone());
/// let other = publisher.publish("P2", draft);
///
/// assert_eq!((first.sequence, second.sequence, other.sequence), (1, 2, 1));
/// assert_eq!(publisher.events_since("P1", 2).len(), 1);
/// ```
pub struct EventPublisher {
    scopes: DashMap<String, Arc<ScopeLog>>,
    capacity: usize,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("scopes", &self.scopes.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventPublisher {
    /// Creates a publisher whose live channels hold `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            scopes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn scope(&self, scope_id: &str) -> Arc<ScopeLog> {
        if let Some(log) = self.scopes.get(scope_id) {
            return log.clone();
        }
        self.scopes
            .entry(scope_id.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                Arc::new(ScopeLog {
                    events: Mutex::new(Vec::new()),
                    tx,
                })
            })
            .clone()
    }

    /// Appends an event to the scope's log and pushes it to live subscribers.
    ///
    /// Returns the sequenced event.
    pub fn publish(&self, scope_id: &str, draft: EventDraft) -> Event {
        let log = self.scope(scope_id);
        let mut events = log.events.lock();

        let event = Event {
            scope_id: scope_id.to_string(),
            event_type: draft.event_type,
            payload: draft.payload,
            sequence: events.len() as u64 + 1,
            created_at: now_rfc3339(),
        };
        events.push(event.clone());

        // No receivers is not an error; the log already holds the event.
        let _ = log.tx.send(event.clone());
        event
    }

    /// Events of a scope with `sequence >= from_seq`, in order.
    pub fn events_since(&self, scope_id: &str, from_seq: u64) -> Vec<Event> {
        let Some(log) = self.scopes.get(scope_id).map(|l| l.clone()) else {
            return Vec::new();
        };
        let events = log.events.lock();
        backlog(&events, from_seq)
    }

    /// Highest sequence published for a scope, or 0.
    pub fn last_sequence(&self, scope_id: &str) -> u64 {
        self.scopes
            .get(scope_id)
            .map(|log| log.events.lock().len() as u64)
            .unwrap_or(0)
    }

    /// Subscribes to a scope starting at `from_seq` (inclusive).
    ///
    /// The stream first yields the logged events from `from_seq`, then live
    /// events as they are published. It never yields a sequence lower than
    /// one it already yielded. A subscriber that lags behind the channel
    /// skips ahead; missed events remain available from
    /// [`events_since`](Self::events_since).
    pub fn subscribe(&self, scope_id: &str, from_seq: u64) -> EventStream {
        let log = self.scope(scope_id);
        let (backlog, rx) = {
            let events = log.events.lock();
            (backlog(&events, from_seq), log.tx.subscribe())
        };

        let mut last_seen = backlog
            .last()
            .map(|e| e.sequence)
            .unwrap_or_else(|| from_seq.saturating_sub(1));
        let scope = scope_id.to_string();

        let live = BroadcastStream::new(rx).filter_map(move |item| {
            let next = match item {
                Ok(event) if event.sequence > last_seen => {
                    last_seen = event.sequence;
                    Some(event)
                },
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(scope_id = %scope, skipped = skipped, "event subscriber lagged");
                    None
                },
            };
            async move { next }
        });

        stream::iter(backlog).chain(live).boxed()
    }
}

fn backlog(events: &[Event], from_seq: u64) -> Vec<Event> {
    let start = from_seq.saturating_sub(1) as usize;
    events.get(start..).map(<[Event]>::to_vec).unwrap_or_default()
}
