//! In-memory queues and retry timer heap.
//!
//! Holds the engine's mutable delivery state: the event store, the
//! unprocessed event queue, delivery records, the pending dispatch queue,
//! and the armed-retry min-heap. All access is serialized by the engine's
//! state lock; this module contains no synchronization of its own.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque},
};

use chrono::{DateTime, Utc};
use fanout_core::models::{Delivery, DeliveryId, DeliveryStatus, EndpointId, Event, EventId};

/// One armed retry timer.
///
/// Ordered so the `BinaryHeap` behaves as a min-heap on `fire_at`. Stale
/// entries are invalidated lazily: when popped, the timer only fires if
/// its delivery is still in the `Retrying` state.
#[derive(Debug, Clone)]
pub(crate) struct ArmedRetry {
    pub fire_at: DateTime<Utc>,
    pub delivery_id: DeliveryId,
}

impl PartialEq for ArmedRetry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.delivery_id == other.delivery_id
    }
}

impl Eq for ArmedRetry {}

impl Ord for ArmedRetry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour; delivery ID breaks ties so the
        // ordering stays total.
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.delivery_id.0.cmp(&self.delivery_id.0))
    }
}

impl PartialOrd for ArmedRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The engine's queue and record state.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    /// Retained events, keyed by ID, until the retention sweep.
    pub events: HashMap<EventId, Event>,
    /// Arrival order of events not yet matched.
    pub unprocessed: VecDeque<EventId>,
    /// Events already matched; prevents reprocessing while retained.
    pub processed: HashSet<EventId>,
    /// All delivery records, terminal ones included, until swept.
    pub deliveries: HashMap<DeliveryId, Delivery>,
    /// Deliveries eligible for immediate dispatch.
    pub pending: VecDeque<DeliveryId>,
    /// Armed retry timers.
    pub timers: BinaryHeap<ArmedRetry>,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts an event into the store and the unprocessed queue.
    pub fn enqueue_event(&mut self, event: Event) {
        self.unprocessed.push_back(event.id);
        self.events.insert(event.id, event);
    }

    /// Drains unprocessed events, marking them processed.
    pub fn take_unprocessed(&mut self) -> Vec<Event> {
        let mut drained = Vec::with_capacity(self.unprocessed.len());
        while let Some(event_id) = self.unprocessed.pop_front() {
            if let Some(event) = self.events.get(&event_id) {
                self.processed.insert(event_id);
                drained.push(event.clone());
            }
        }
        drained
    }

    /// Pops retry timers due at or before `now`.
    ///
    /// Only returns deliveries still in `Retrying` and still armed for
    /// this exact fire time; stale entries for deliveries that moved on
    /// (manual retry, cancellation, re-arming) are dropped.
    pub fn due_retries(&mut self, now: DateTime<Utc>) -> Vec<DeliveryId> {
        let mut due = Vec::new();
        while let Some(timer) = self.timers.peek() {
            if timer.fire_at > now {
                break;
            }
            let timer = self.timers.pop().expect("peeked timer");
            let still_armed = self.deliveries.get(&timer.delivery_id).is_some_and(|d| {
                d.status == DeliveryStatus::Retrying && d.next_retry_at == Some(timer.fire_at)
            });
            if still_armed {
                due.push(timer.delivery_id);
            }
        }
        due
    }

    /// Arms a retry timer.
    pub fn arm_retry(&mut self, fire_at: DateTime<Utc>, delivery_id: DeliveryId) {
        self.timers.push(ArmedRetry { fire_at, delivery_id });
    }

    /// Fails every non-terminal delivery targeting the endpoint and drops
    /// them from the dispatch structures. Returns how many were cancelled.
    pub fn cancel_endpoint_deliveries(&mut self, endpoint_id: EndpointId, reason: &str) -> usize {
        let mut cancelled = 0;
        for delivery in self.deliveries.values_mut() {
            if delivery.endpoint_id == endpoint_id && !delivery.status.is_terminal() {
                delivery.status = DeliveryStatus::Failed;
                delivery.next_retry_at = None;
                delivery.last_error = Some(reason.to_string());
                cancelled += 1;
            }
        }
        let deliveries = &self.deliveries;
        self.pending.retain(|id| {
            deliveries.get(id).is_some_and(|d| d.endpoint_id != endpoint_id)
        });
        // Timer entries for the cancelled deliveries are now stale and get
        // dropped by due_retries when they surface.
        cancelled
    }

    /// Empties the queues: unmatched events, pending dispatch, armed
    /// timers, and every non-terminal delivery record. Terminal records
    /// and already-processed events stay for audit.
    pub fn clear_queues(&mut self) {
        while let Some(event_id) = self.unprocessed.pop_front() {
            self.events.remove(&event_id);
        }
        self.pending.clear();
        self.timers.clear();
        self.deliveries.retain(|_, delivery| delivery.status.is_terminal());
    }

    /// Drops everything. Used by the engine's test/debug reset.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Purges events created before the cutoff, their dedup entries, and
    /// terminal deliveries created before the cutoff.
    pub fn sweep(&mut self, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<EventId> = self
            .events
            .values()
            .filter(|event| event.created_at < cutoff)
            .map(|event| event.id)
            .collect();

        for event_id in &expired {
            self.events.remove(event_id);
            self.processed.remove(event_id);
        }
        self.unprocessed.retain(|id| self.events.contains_key(id));

        self.deliveries
            .retain(|_, delivery| !(delivery.status.is_terminal() && delivery.created_at < cutoff));

        expired.len()
    }
}
