//! Derived delivery metrics.
//!
//! Maintains running counters and rolling averages, globally and per
//! endpoint. Metrics are recomputed from counters on read and never
//! persisted as a source of truth. Updated on every terminal or retry
//! transition; read-only externally except for the engine's test/debug
//! reset.

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use fanout_core::models::EndpointId;
use serde::{Deserialize, Serialize};

/// Global engine metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Events accepted by `trigger_event` since startup or reset.
    pub total_events: u64,
    /// Deliveries that reached terminal success.
    pub delivered: u64,
    /// Deliveries that reached terminal failure.
    pub failed: u64,
    /// Retry attempts scheduled.
    pub retried: u64,
    /// Rolling average delivery time over successful attempts, in ms.
    pub avg_delivery_ms: f64,
    /// `failed / total_events`; 0 when no events have been accepted.
    pub error_rate: f64,
}

/// Per-endpoint metrics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetrics {
    /// Deliveries created for this endpoint.
    pub deliveries: u64,
    /// Terminal successes.
    pub delivered: u64,
    /// Terminal failures.
    pub failed: u64,
    /// Retry attempts scheduled.
    pub retried: u64,
    /// Rolling average response time over successful attempts, in ms.
    pub avg_response_ms: f64,
    /// `delivered / deliveries`; 0 when no deliveries exist.
    pub success_rate: f64,
    /// `failed / deliveries`; 0 when no deliveries exist.
    pub error_rate: f64,
}

/// Summary of the retained event store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    /// Events currently retained.
    pub total_events: usize,
    /// Retained event counts per type.
    pub by_type: HashMap<String, u64>,
    /// Creation time of the oldest retained event.
    pub oldest: Option<DateTime<Utc>>,
    /// Creation time of the newest retained event.
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct EndpointCounters {
    deliveries: u64,
    delivered: u64,
    failed: u64,
    retried: u64,
    avg_response_ms: f64,
}

/// Counter store behind the metrics API.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    total_events: u64,
    delivered: u64,
    failed: u64,
    retried: u64,
    avg_delivery_ms: f64,
    endpoints: HashMap<EndpointId, EndpointCounters>,
}

impl MetricsAggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes the per-endpoint entry so rates read as zero rather
    /// than absent before the first delivery.
    pub fn ensure_endpoint(&mut self, endpoint_id: EndpointId) {
        self.endpoints.entry(endpoint_id).or_default();
    }

    /// Removes an endpoint's counters on unregistration.
    pub fn remove_endpoint(&mut self, endpoint_id: EndpointId) {
        self.endpoints.remove(&endpoint_id);
    }

    /// Records an accepted event.
    pub fn record_event(&mut self) {
        self.total_events += 1;
    }

    /// Records a delivery created for an endpoint.
    pub fn record_delivery_created(&mut self, endpoint_id: EndpointId) {
        self.endpoints.entry(endpoint_id).or_default().deliveries += 1;
    }

    /// Records a terminal success and folds the duration into the
    /// rolling averages.
    pub fn record_success(&mut self, endpoint_id: EndpointId, duration: Duration) {
        let sample_ms = duration.as_secs_f64() * 1000.0;

        self.delivered += 1;
        self.avg_delivery_ms = rolling_average(self.avg_delivery_ms, self.delivered, sample_ms);

        let counters = self.endpoints.entry(endpoint_id).or_default();
        counters.delivered += 1;
        counters.avg_response_ms =
            rolling_average(counters.avg_response_ms, counters.delivered, sample_ms);
    }

    /// Records a terminal failure.
    pub fn record_failure(&mut self, endpoint_id: EndpointId) {
        self.failed += 1;
        self.endpoints.entry(endpoint_id).or_default().failed += 1;
    }

    /// Records a scheduled retry.
    pub fn record_retry(&mut self, endpoint_id: EndpointId) {
        self.retried += 1;
        self.endpoints.entry(endpoint_id).or_default().retried += 1;
    }

    /// Global metrics snapshot with derived rates.
    pub fn snapshot(&self) -> EngineMetrics {
        EngineMetrics {
            total_events: self.total_events,
            delivered: self.delivered,
            failed: self.failed,
            retried: self.retried,
            avg_delivery_ms: self.avg_delivery_ms,
            error_rate: ratio(self.failed, self.total_events),
        }
    }

    /// Per-endpoint snapshot, when the endpoint is known.
    pub fn endpoint_snapshot(&self, endpoint_id: EndpointId) -> Option<EndpointMetrics> {
        self.endpoints.get(&endpoint_id).map(|c| EndpointMetrics {
            deliveries: c.deliveries,
            delivered: c.delivered,
            failed: c.failed,
            retried: c.retried,
            avg_response_ms: c.avg_response_ms,
            success_rate: ratio(c.delivered, c.deliveries),
            error_rate: ratio(c.failed, c.deliveries),
        })
    }

    /// Clears every counter. Only reachable through the engine's
    /// test/debug reset.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// `new = (old * (n - 1) + sample) / n`, where `n` already counts the new
/// sample.
fn rolling_average(old: f64, n: u64, sample: f64) -> f64 {
    debug_assert!(n > 0);
    (old * ((n - 1) as f64) + sample) / (n as f64)
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
