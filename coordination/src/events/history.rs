//! Bounded in-memory event history
//!
//! Late subscribers (a browser that connects mid-session, the REST
//! `/api/events` endpoint) read from here instead of the live channel.

use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use super::types::EventEnvelope;

/// Default number of envelopes retained
pub const DEFAULT_HISTORY_SIZE: usize = 500;

/// Ring buffer of the most recent envelopes, oldest first.
#[derive(Debug, Clone)]
pub struct EventHistory {
    events: VecDeque<EventEnvelope>,
    capacity: usize,
    dropped: u64,
}

impl EventHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append, evicting the oldest entry when full. A zero capacity
    /// retains nothing.
    pub fn push(&mut self, envelope: EventEnvelope) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(envelope);
    }

    /// The last `limit` envelopes, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<EventEnvelope> {
        let skip = self.events.len().saturating_sub(limit);
        self.events.iter().skip(skip).cloned().collect()
    }

    /// Envelopes with a sequence number greater than `seq`.
    pub fn since(&self, seq: u64) -> Vec<EventEnvelope> {
        self.events.iter().filter(|e| e.seq > seq).cloned().collect()
    }

    pub fn of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
        self.events
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> EventStats {
        EventStats::from_events(self.events.iter(), self.dropped)
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

/// Aggregate statistics for retained events
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub errors: usize,
    pub discoveries: usize,
    /// Envelopes evicted since the bus started.
    pub evicted: u64,
}

impl EventStats {
    pub fn from_events<'a>(events: impl Iterator<Item = &'a EventEnvelope>, evicted: u64) -> Self {
        let mut stats = Self {
            evicted,
            ..Self::default()
        };
        for envelope in events {
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(envelope.event_type().to_string())
                .or_insert(0) += 1;
            if envelope.event.is_error() {
                stats.errors += 1;
            }
            if envelope.event_type() == "discovery" {
                stats.discoveries += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DiscoveryEvent;
    use chrono::Utc;

    fn envelope(seq: u64, event: DiscoveryEvent) -> EventEnvelope {
        EventEnvelope {
            seq,
            event,
            timestamp: Utc::now(),
        }
    }

    fn started(seq: u64) -> EventEnvelope {
        envelope(
            seq,
            DiscoveryEvent::ExplorationStarted {
                topic: "t".to_string(),
                agents: 3,
            },
        )
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = EventHistory::new(3);
        for seq in 1..=5 {
            history.push(started(seq));
        }
        assert_eq!(history.len(), 3);
        let seqs: Vec<u64> = history.recent(10).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
        assert_eq!(history.stats().evicted, 2);
    }

    #[test]
    fn test_recent_and_since() {
        let mut history = EventHistory::new(10);
        for seq in 1..=4 {
            history.push(started(seq));
        }
        let recent: Vec<u64> = history.recent(2).iter().map(|e| e.seq).collect();
        assert_eq!(recent, vec![3, 4]);
        assert_eq!(history.since(1).len(), 3);
        assert!(history.since(4).is_empty());
    }

    #[test]
    fn test_zero_capacity_retains_nothing() {
        let mut history = EventHistory::new(0);
        history.push(started(1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_event_stats() {
        let mut history = EventHistory::default();
        history.push(started(1));
        history.push(envelope(
            2,
            DiscoveryEvent::AutoCycleStarted { interval_ms: 1000 },
        ));
        history.push(started(3));

        let stats = history.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.events_by_type["exploration_started"], 2);
        assert_eq!(stats.errors, 0);
        assert_eq!(history.of_type("auto_cycle_started").len(), 1);
    }
}
