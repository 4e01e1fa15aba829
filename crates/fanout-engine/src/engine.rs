//! The delivery engine and its driver loop.
//!
//! `WebhookEngine` owns the endpoint registry, the queues, and the metrics
//! store, and exposes the engine's full operation surface. A periodic
//! driver loop drains the event queue, matches events against the
//! registry, and dispatches deliveries under a global in-flight cap; a
//! low-frequency sweep purges expired events and terminal deliveries.
//!
//! External callers only enqueue events or mutate registry entries
//! through the engine's methods; queues and metrics are never touched
//! directly. Delivery-time failures are absorbed into delivery records
//! and surfaced through queries, metrics, and notifications, never
//! raised to the `trigger_event` caller.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fanout_core::{
    models::{
        Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, EndpointTest, EndpointUpdate,
        Event, EventId, SignatureConfig,
    },
    notify::{EngineNotification, NoOpNotificationHandler, NotificationHandler},
    time::{Clock, RealClock},
    EngineError, Result,
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient, DeliveryRequest},
    error::DeliveryError,
    matching,
    metrics::{EndpointMetrics, EngineMetrics, EventStats, MetricsAggregator},
    queue::QueueState,
    registry::{EndpointRegistry, ExportDocument},
    retry::{RetryContext, RetryDecision},
    signature,
    transform::TransformRegistry,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on deliveries simultaneously in the sending state, across all
    /// endpoints.
    pub max_in_flight: usize,

    /// How often the driver loop drains the queues.
    pub tick_interval: Duration,

    /// How often the housekeeping sweep runs.
    pub sweep_interval: Duration,

    /// Retention window for events and terminal delivery records.
    pub event_retention: Duration,

    /// HTTP client configuration.
    pub client: ClientConfig,

    /// Shutdown timeout: maximum time to wait for loop tasks to stop.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_in_flight: crate::DEFAULT_MAX_IN_FLIGHT,
            tick_interval: crate::DEFAULT_TICK_INTERVAL,
            sweep_interval: crate::DEFAULT_SWEEP_INTERVAL,
            event_retention: crate::DEFAULT_EVENT_RETENTION,
            client: ClientConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Webhook event-delivery engine.
///
/// All state is owned by the engine instance; multiple independent
/// engines can coexist in one process. Cheap to share behind the
/// caller's `Arc` if needed; every operation takes `&self` except
/// [`start`](Self::start) and [`shutdown`](Self::shutdown).
pub struct WebhookEngine {
    inner: Arc<EngineInner>,
    tasks: Vec<JoinHandle<()>>,
}

struct EngineInner {
    config: EngineConfig,
    registry: RwLock<EndpointRegistry>,
    state: Mutex<QueueState>,
    metrics: RwLock<MetricsAggregator>,
    transforms: TransformRegistry,
    client: DeliveryClient,
    notifier: Arc<dyn NotificationHandler>,
    clock: Arc<dyn Clock>,
    in_flight: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl WebhookEngine {
    /// Creates an engine with a real clock, no observers, and no
    /// registered transforms.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built from the
    /// configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_dependencies(
            config,
            Arc::new(RealClock::new()),
            Arc::new(NoOpNotificationHandler::new()),
            TransformRegistry::new(),
        )
    }

    /// Creates an engine with injected clock, notification handler, and
    /// transform registry.
    ///
    /// Dependency injection keeps timing deterministic in tests and lets
    /// the host application observe lifecycle notifications and supply
    /// named transforms.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built from the
    /// configuration.
    pub fn with_dependencies(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationHandler>,
        transforms: TransformRegistry,
    ) -> Result<Self> {
        let client = DeliveryClient::new(&config.client)
            .map_err(|e| EngineError::invalid_input(e.to_string()))?;
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                registry: RwLock::new(EndpointRegistry::new()),
                state: Mutex::new(QueueState::new()),
                metrics: RwLock::new(MetricsAggregator::new()),
                transforms,
                client,
                notifier,
                clock,
                in_flight,
                cancel: CancellationToken::new(),
            }),
            tasks: Vec::new(),
        })
    }

    /// Spawns the driver loop and the housekeeping sweep.
    ///
    /// Returns immediately; use [`shutdown`](Self::shutdown) to stop the
    /// loops gracefully. Callers that prefer full control over scheduling
    /// (tests, embedders with their own loop) can skip `start` and drive
    /// the engine with [`run_tick`](Self::run_tick) and
    /// [`run_sweep`](Self::run_sweep).
    pub fn start(&mut self) {
        info!(
            max_in_flight = self.inner.config.max_in_flight,
            tick_interval_ms = self.inner.config.tick_interval.as_millis(),
            "starting delivery engine"
        );

        let driver = {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let tick = inner.config.tick_interval;
                loop {
                    tokio::select! {
                        () = inner.clock.sleep(tick) => {},
                        () = inner.cancel.cancelled() => break,
                    }
                    inner.clone().run_tick().await;
                }
                info!("delivery driver loop stopped");
            })
        };

        let sweeper = {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let interval = inner.config.sweep_interval;
                loop {
                    tokio::select! {
                        () = inner.clock.sleep(interval) => {},
                        () = inner.cancel.cancelled() => break,
                    }
                    inner.run_sweep().await;
                }
                info!("housekeeping sweep stopped");
            })
        };

        self.tasks.push(driver);
        self.tasks.push(sweeper);
    }

    /// Gracefully stops the driver loop and the sweep.
    ///
    /// In-flight deliveries are allowed to complete or time out
    /// naturally. Tasks that outlive the configured shutdown timeout are
    /// abandoned with an error log.
    pub async fn shutdown(mut self) {
        info!("shutting down delivery engine");
        self.inner.cancel.cancel();

        let timeout = self.inner.config.shutdown_timeout;
        for task in self.tasks.drain(..) {
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => {},
                Ok(Err(join_error)) => {
                    error!(error = %join_error, "engine task panicked during shutdown");
                },
                Err(_) => {
                    error!(
                        timeout_seconds = timeout.as_secs(),
                        "engine task did not stop within shutdown timeout"
                    );
                },
            }
        }
        info!("delivery engine shutdown complete");
    }

    /// Runs one driver loop iteration: re-queues due retries, matches new
    /// events, and dispatches pending deliveries under the in-flight cap.
    ///
    /// Waits for this tick's dispatched attempts to finish, so state
    /// transitions are observable when the call returns.
    pub async fn run_tick(&self) {
        self.inner.clone().run_tick().await;
    }

    /// Runs one housekeeping sweep, purging events and terminal
    /// deliveries older than the retention window.
    pub async fn run_sweep(&self) {
        self.inner.run_sweep().await;
    }

    // ---- registry operations ----

    /// Registers a delivery endpoint.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::DuplicateEndpoint`] when the identifier
    /// is already registered; the registry is unchanged.
    pub async fn register_endpoint(&self, endpoint: Endpoint) -> Result<EndpointId> {
        let name = endpoint.name.clone();
        let id = self.inner.registry.write().await.register(endpoint)?;
        self.inner.metrics.write().await.ensure_endpoint(id);

        info!(endpoint_id = %id, name = %name, "endpoint registered");
        self.inner
            .notifier
            .notify(EngineNotification::EndpointRegistered { endpoint_id: id, name })
            .await;
        Ok(id)
    }

    /// Unregisters an endpoint, removing its metrics and cancelling any
    /// pending retry timers referencing it.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::EndpointNotFound`] when the identifier
    /// is unknown.
    pub async fn unregister_endpoint(&self, id: EndpointId) -> Result<()> {
        self.inner.registry.write().await.unregister(id)?;
        self.inner.metrics.write().await.remove_endpoint(id);
        let cancelled =
            self.inner.state.lock().await.cancel_endpoint_deliveries(id, "endpoint unregistered");

        info!(endpoint_id = %id, cancelled_deliveries = cancelled, "endpoint unregistered");
        self.inner
            .notifier
            .notify(EngineNotification::EndpointRemoved { endpoint_id: id })
            .await;
        Ok(())
    }

    /// Merges partial fields into an endpoint's configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::EndpointNotFound`] when the identifier
    /// is unknown.
    pub async fn update_endpoint(
        &self,
        id: EndpointId,
        update: EndpointUpdate,
    ) -> Result<Endpoint> {
        let now = self.inner.clock.now_utc();
        let updated = self.inner.registry.write().await.update(id, update, now)?;

        debug!(endpoint_id = %id, "endpoint updated");
        self.inner
            .notifier
            .notify(EngineNotification::EndpointUpdated { endpoint_id: id })
            .await;
        Ok(updated)
    }

    /// Every registered endpoint.
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.inner.registry.read().await.list()
    }

    /// Looks up one endpoint.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::EndpointNotFound`] when the identifier
    /// is unknown.
    pub async fn endpoint(&self, id: EndpointId) -> Result<Endpoint> {
        self.inner
            .registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::endpoint_not_found(id))
    }

    // ---- event operations ----

    /// Accepts an event into the queue.
    ///
    /// Always succeeds; matching happens on the next tick, and delivery
    /// failures never propagate back to this caller.
    pub async fn trigger_event(&self, event: Event) -> EventId {
        let event_id = event.id;
        let event_type = event.event_type.clone();

        self.inner.metrics.write().await.record_event();
        self.inner.state.lock().await.enqueue_event(event);

        debug!(event_id = %event_id, event_type = %event_type, "event queued");
        self.inner
            .notifier
            .notify(EngineNotification::EventReceived { event_id, event_type })
            .await;
        event_id
    }

    /// Every retained event.
    pub async fn events(&self) -> Vec<Event> {
        self.inner.state.lock().await.events.values().cloned().collect()
    }

    /// Summary statistics over the retained event store.
    pub async fn event_stats(&self) -> EventStats {
        let state = self.inner.state.lock().await;
        let mut stats = EventStats { total_events: state.events.len(), ..EventStats::default() };
        for event in state.events.values() {
            *stats.by_type.entry(event.event_type.clone()).or_insert(0) += 1;
            stats.oldest = match stats.oldest {
                Some(oldest) => Some(oldest.min(event.created_at)),
                None => Some(event.created_at),
            };
            stats.newest = match stats.newest {
                Some(newest) => Some(newest.max(event.created_at)),
                None => Some(event.created_at),
            };
        }
        stats
    }

    // ---- delivery operations ----

    /// Every retained delivery record.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.inner.state.lock().await.deliveries.values().cloned().collect()
    }

    /// Delivery records targeting one endpoint.
    pub async fn deliveries_for_endpoint(&self, id: EndpointId) -> Vec<Delivery> {
        self.inner
            .state
            .lock()
            .await
            .deliveries
            .values()
            .filter(|delivery| delivery.endpoint_id == id)
            .cloned()
            .collect()
    }

    /// Looks up one delivery record.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::DeliveryNotFound`] when the identifier
    /// is unknown.
    pub async fn delivery(&self, id: DeliveryId) -> Result<Delivery> {
        self.inner
            .state
            .lock()
            .await
            .deliveries
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::delivery_not_found(id))
    }

    /// Manually re-queues a delivery for another attempt.
    ///
    /// A delivery whose attempt is currently in flight cannot be
    /// re-queued; one already pending is left as is.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::DeliveryNotFound`] when the identifier
    /// is unknown, or [`EngineError::InvalidInput`] while the delivery is
    /// in the sending state.
    pub async fn retry_delivery(&self, id: DeliveryId) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let delivery =
            state.deliveries.get_mut(&id).ok_or_else(|| EngineError::delivery_not_found(id))?;

        match delivery.status {
            DeliveryStatus::Sending => {
                Err(EngineError::invalid_input("delivery attempt is in flight"))
            },
            DeliveryStatus::Pending => Ok(()),
            _ => {
                delivery.status = DeliveryStatus::Pending;
                delivery.next_retry_at = None;
                state.pending.push_back(id);
                debug!(delivery_id = %id, "delivery re-queued manually");
                Ok(())
            },
        }
    }

    /// Empties the queues: unmatched events, pending dispatch, and armed
    /// retry timers. Terminal delivery records are kept for audit.
    pub async fn clear_queue(&self) {
        self.inner.state.lock().await.clear_queues();
        info!("queues cleared");
    }

    // ---- metrics ----

    /// Global metrics snapshot.
    pub async fn metrics(&self) -> EngineMetrics {
        self.inner.metrics.read().await.snapshot()
    }

    /// Per-endpoint metrics snapshot.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::EndpointNotFound`] when the endpoint has
    /// no metrics entry.
    pub async fn endpoint_metrics(&self, id: EndpointId) -> Result<EndpointMetrics> {
        self.inner
            .metrics
            .read()
            .await
            .endpoint_snapshot(id)
            .ok_or_else(|| EngineError::endpoint_not_found(id))
    }

    // ---- self-test ----

    /// Sends a synthetic test event to an endpoint, bypassing matching
    /// and retry scheduling entirely.
    ///
    /// The single best-effort attempt never mutates registry state or
    /// production metrics; the outcome is returned inline.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::EndpointNotFound`] when the identifier
    /// is unknown.
    pub async fn test_endpoint(
        &self,
        id: EndpointId,
        sample: serde_json::Value,
    ) -> Result<EndpointTest> {
        let endpoint = self
            .inner
            .registry
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::endpoint_not_found(id))?;

        let now = self.inner.clock.now_utc();
        let event =
            Event::new("self-test", "endpoint.test", sample, now).with_metadata("test", "true");

        let started = self.inner.clock.now();
        let outcome = self.inner.send_once(&endpoint, &event, DeliveryId::new(), 1).await;
        let duration = self.inner.clock.now().saturating_duration_since(started);

        Ok(match outcome {
            Ok(record) => {
                let success = record.is_success();
                let error =
                    (!success).then(|| DeliveryError::http_status(record.status).to_string());
                EndpointTest { success, response: Some(record), error, duration }
            },
            Err(error) => EndpointTest {
                success: false,
                response: None,
                error: Some(error.to_string()),
                duration,
            },
        })
    }

    // ---- import / export ----

    /// Serializes the full registry as a configuration document.
    pub async fn export_endpoints(&self) -> ExportDocument {
        self.inner.registry.read().await.export(self.inner.clock.now_utc())
    }

    /// Replaces the registry and metrics from an export document.
    ///
    /// Registrations are replayed in document order into a replacement
    /// registry that is swapped in atomically; on any failure the engine
    /// keeps its previous state. Queued work referencing the old
    /// registry is cleared.
    ///
    /// # Errors
    ///
    /// Fails with [`EngineError::InvalidImportFormat`] for a malformed
    /// document and [`EngineError::DuplicateEndpoint`] for repeated
    /// identifiers within it.
    pub async fn import_endpoints(&self, document: serde_json::Value) -> Result<usize> {
        let endpoints = EndpointRegistry::parse_import(&document)?;
        let replacement = EndpointRegistry::from_endpoints(endpoints)?;
        let count = replacement.len();

        {
            let mut registry = self.inner.registry.write().await;
            let mut metrics = self.inner.metrics.write().await;
            let mut state = self.inner.state.lock().await;

            metrics.reset();
            for endpoint in replacement.iter() {
                metrics.ensure_endpoint(endpoint.id);
            }
            state.clear_queues();
            *registry = replacement;
        }

        info!(endpoint_count = count, "registry imported");
        self.inner
            .notifier
            .notify(EngineNotification::RegistryImported { endpoint_count: count })
            .await;
        Ok(count)
    }

    /// Wipes all engine state: registry, queues, records, and metrics.
    ///
    /// Test/debug facility; there is no partial counter reset.
    pub async fn reset(&self) {
        let mut registry = self.inner.registry.write().await;
        let mut metrics = self.inner.metrics.write().await;
        let mut state = self.inner.state.lock().await;

        *registry = EndpointRegistry::new();
        metrics.reset();
        state.reset();
        warn!("engine state reset");
    }
}

impl Drop for WebhookEngine {
    fn drop(&mut self) {
        if !self.tasks.is_empty() && !self.inner.cancel.is_cancelled() {
            // Dropping without shutdown would orphan the loop tasks.
            self.inner.cancel.cancel();
            warn!("engine dropped while running; loops cancelled");
        }
    }
}

impl EngineInner {
    /// One driver loop iteration.
    async fn run_tick(self: Arc<Self>) {
        let now = self.clock.now_utc();

        self.requeue_due_retries(now).await;
        self.match_new_events(now).await;
        self.dispatch_pending(now).await;
    }

    /// Moves deliveries whose retry timers have fired back to pending.
    async fn requeue_due_retries(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        let due = state.due_retries(now);
        for delivery_id in due {
            if let Some(delivery) = state.deliveries.get_mut(&delivery_id) {
                delivery.status = DeliveryStatus::Pending;
                delivery.next_retry_at = None;
            } else {
                continue;
            }
            state.pending.push_back(delivery_id);
            debug!(delivery_id = %delivery_id, "retry timer fired");
        }
    }

    /// Matches newly queued events and creates their delivery records.
    async fn match_new_events(&self, now: DateTime<Utc>) {
        let events = self.state.lock().await.take_unprocessed();
        if events.is_empty() {
            return;
        }

        let mut created = Vec::new();
        {
            let registry = self.registry.read().await;
            for event in &events {
                let before = created.len();
                for endpoint in registry.iter() {
                    if matching::endpoint_matches(endpoint, event) {
                        created.push(Delivery::new(endpoint.id, event.id, now));
                    }
                }
                debug!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    matched = created.len() - before,
                    "event matched"
                );
            }
        }

        if created.is_empty() {
            return;
        }

        {
            let mut metrics = self.metrics.write().await;
            for delivery in &created {
                metrics.record_delivery_created(delivery.endpoint_id);
            }
        }
        let mut state = self.state.lock().await;
        for delivery in created {
            state.pending.push_back(delivery.id);
            state.deliveries.insert(delivery.id, delivery);
        }
    }

    /// Dispatches pending deliveries while in-flight permits remain, then
    /// waits for this tick's attempts to settle.
    async fn dispatch_pending(self: Arc<Self>, now: DateTime<Utc>) {
        let mut attempts = JoinSet::new();

        loop {
            let Ok(permit) = self.in_flight.clone().try_acquire_owned() else {
                break;
            };

            let claimed = {
                let mut state = self.state.lock().await;
                let Some(delivery_id) = state.pending.pop_front() else {
                    break;
                };
                match state.deliveries.get_mut(&delivery_id) {
                    Some(delivery) => {
                        delivery.status = DeliveryStatus::Sending;
                        delivery.attempts += 1;
                        delivery.last_attempt_at = Some(now);
                        Some(delivery_id)
                    },
                    None => None,
                }
            };

            let Some(delivery_id) = claimed else {
                continue;
            };

            let inner = Arc::clone(&self);
            attempts.spawn(async move {
                inner.perform_delivery(delivery_id, permit).await;
            });
        }

        while attempts.join_next().await.is_some() {}
    }

    /// Executes one delivery attempt and applies the resulting state
    /// transition.
    async fn perform_delivery(self: Arc<Self>, delivery_id: DeliveryId, _permit: OwnedSemaphorePermit) {
        let (endpoint_id, event_id, attempts, event) = {
            let state = self.state.lock().await;
            let Some(delivery) = state.deliveries.get(&delivery_id) else {
                return;
            };
            (
                delivery.endpoint_id,
                delivery.event_id,
                delivery.attempts,
                state.events.get(&delivery.event_id).cloned(),
            )
        };

        let Some(endpoint) = self.registry.read().await.get(endpoint_id).cloned() else {
            // Unregistered while queued; the cancellation path has already
            // failed the record.
            debug!(delivery_id = %delivery_id, "endpoint gone, dropping attempt");
            return;
        };

        let Some(event) = event else {
            self.fail_without_attempt(delivery_id, endpoint_id, event_id, attempts, "event expired")
                .await;
            return;
        };

        let result = self.send_once(&endpoint, &event, delivery_id, attempts).await;
        let now = self.clock.now_utc();

        match result {
            Ok(record) if record.is_success() => {
                let status = record.status;
                let duration = record.duration;
                {
                    let mut state = self.state.lock().await;
                    if let Some(delivery) = state.deliveries.get_mut(&delivery_id) {
                        delivery.status = DeliveryStatus::Delivered;
                        delivery.response = Some(record);
                        delivery.next_retry_at = None;
                        delivery.last_error = None;
                    }
                }
                self.metrics.write().await.record_success(endpoint_id, duration);

                info!(
                    delivery_id = %delivery_id,
                    event_id = %event_id,
                    endpoint_id = %endpoint_id,
                    status,
                    attempts,
                    duration_ms = duration.as_millis(),
                    "webhook delivered"
                );
                self.notifier
                    .notify(EngineNotification::DeliverySucceeded {
                        delivery_id,
                        endpoint_id,
                        event_id,
                        status,
                        attempts,
                        delivered_at: now,
                    })
                    .await;
            },
            Ok(record) => {
                let delivery_error = DeliveryError::http_status(record.status);
                self.handle_failed_attempt(
                    delivery_id,
                    &endpoint,
                    event_id,
                    attempts,
                    delivery_error,
                    Some(record),
                    now,
                )
                .await;
            },
            Err(delivery_error) => {
                self.handle_failed_attempt(
                    delivery_id,
                    &endpoint,
                    event_id,
                    attempts,
                    delivery_error,
                    None,
                    now,
                )
                .await;
            },
        }
    }

    /// Applies retry or terminal-failure transitions after a failed
    /// attempt.
    #[allow(clippy::too_many_arguments)]
    async fn handle_failed_attempt(
        &self,
        delivery_id: DeliveryId,
        endpoint: &Endpoint,
        event_id: EventId,
        attempts: u32,
        delivery_error: DeliveryError,
        response: Option<fanout_core::models::ResponseRecord>,
        now: DateTime<Utc>,
    ) {
        let context = RetryContext::new(
            attempts,
            endpoint.max_retries,
            delivery_error.clone(),
            now,
            endpoint.retry_policy.clone(),
        );
        let decision = context.decide();

        let will_retry = matches!(decision, RetryDecision::Retry { .. });
        {
            let mut state = self.state.lock().await;
            let Some(delivery) = state.deliveries.get_mut(&delivery_id) else {
                return;
            };
            delivery.last_error = Some(delivery_error.to_string());
            if let Some(record) = response {
                delivery.response = Some(record);
            }
            let armed_at = match &decision {
                RetryDecision::Retry { next_attempt_at } => {
                    delivery.status = DeliveryStatus::Retrying;
                    delivery.next_retry_at = Some(*next_attempt_at);
                    Some(*next_attempt_at)
                },
                RetryDecision::GiveUp { .. } => {
                    delivery.status = DeliveryStatus::Failed;
                    delivery.next_retry_at = None;
                    None
                },
            };
            if let Some(fire_at) = armed_at {
                state.arm_retry(fire_at, delivery_id);
            }
        }

        match &decision {
            RetryDecision::Retry { next_attempt_at } => {
                self.metrics.write().await.record_retry(endpoint.id);
                warn!(
                    delivery_id = %delivery_id,
                    event_id = %event_id,
                    endpoint_id = %endpoint.id,
                    attempts,
                    next_retry_at = %next_attempt_at,
                    error = %delivery_error,
                    "delivery failed, retry scheduled"
                );
            },
            RetryDecision::GiveUp { reason } => {
                self.metrics.write().await.record_failure(endpoint.id);
                error!(
                    delivery_id = %delivery_id,
                    event_id = %event_id,
                    endpoint_id = %endpoint.id,
                    attempts,
                    reason = %reason,
                    error = %delivery_error,
                    "delivery permanently failed"
                );
            },
        }

        self.notifier
            .notify(EngineNotification::DeliveryFailed {
                delivery_id,
                endpoint_id: endpoint.id,
                event_id,
                attempts,
                error: delivery_error.to_string(),
                will_retry,
            })
            .await;
    }

    /// Terminally fails a delivery that could not attempt at all.
    async fn fail_without_attempt(
        &self,
        delivery_id: DeliveryId,
        endpoint_id: EndpointId,
        event_id: EventId,
        attempts: u32,
        reason: &str,
    ) {
        {
            let mut state = self.state.lock().await;
            if let Some(delivery) = state.deliveries.get_mut(&delivery_id) {
                delivery.status = DeliveryStatus::Failed;
                delivery.next_retry_at = None;
                delivery.last_error = Some(reason.to_string());
            }
        }
        self.metrics.write().await.record_failure(endpoint_id);
        error!(delivery_id = %delivery_id, event_id = %event_id, reason, "delivery failed");

        self.notifier
            .notify(EngineNotification::DeliveryFailed {
                delivery_id,
                endpoint_id,
                event_id,
                attempts,
                error: reason.to_string(),
                will_retry: false,
            })
            .await;
    }

    /// Builds and sends one HTTP attempt: transform, serialize, sign,
    /// POST, then transform the captured response.
    async fn send_once(
        &self,
        endpoint: &Endpoint,
        event: &Event,
        delivery_id: DeliveryId,
        attempt: u32,
    ) -> std::result::Result<fanout_core::models::ResponseRecord, DeliveryError> {
        let payload =
            self.transforms.apply_named(endpoint.request_transform.as_deref(), &event.payload);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| DeliveryError::configuration(format!("payload serialization: {e}")))?;
        let body = Bytes::from(body);

        let signature = match &endpoint.signature {
            SignatureConfig::HmacSha256 { secret, header } => {
                Some((header.clone(), signature::sign_payload(&body, secret)?))
            },
            SignatureConfig::None => None,
        };

        let request = DeliveryRequest {
            delivery_id,
            event_id: event.id,
            event_type: event.event_type.clone(),
            url: endpoint.url.clone(),
            body,
            signature,
            headers: endpoint.headers.clone(),
            timeout: endpoint.timeout,
            attempt,
            timestamp: self.clock.now_utc(),
        };

        let mut record = self.client.deliver(request).await?;

        if let Some(name) = endpoint.response_transform.as_deref() {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&record.body) {
                record.body = self.transforms.apply_named(Some(name), &parsed).to_string();
            }
        }

        Ok(record)
    }

    /// One housekeeping sweep over the retention window.
    async fn run_sweep(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.config.event_retention) else {
            return;
        };
        let cutoff = self.clock.now_utc() - retention;
        let purged = self.state.lock().await.sweep(cutoff);
        if purged > 0 {
            debug!(purged_events = purged, "retention sweep completed");
        }
    }
}
