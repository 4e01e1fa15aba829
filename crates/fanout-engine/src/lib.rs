//! Webhook event-delivery engine.
//!
//! This crate implements the core delivery system that accepts internally
//! generated events, matches them against registered HTTP endpoints, and
//! delivers each event to every matching endpoint with configurable retry,
//! transformation, filtering, and signing semantics.
//!
//! # Architecture
//!
//! A single periodic driver loop drains the event queue and the pending
//! delivery queue each tick. Matching consults the endpoint registry;
//! every match produces a delivery record dispatched under a global
//! in-flight cap. Failed attempts are re-armed on a timer heap polled by
//! the same loop.
//!
//! ```text
//! trigger_event ──▶ Event Queue ──▶ Matching ──▶ Delivery Queue
//!                                      │              │
//!                                   Registry    Executor (≤ cap)
//!                                                     │
//!                                    Retry heap ◀── failure     success
//!                                        │                        │
//!                                        └──▶ Pending         Metrics
//! ```
//!
//! # Key Features
//!
//! - **At-least-once delivery** with per-endpoint retry policies
//! - **Bounded concurrency** across all endpoints (default 10 in flight)
//! - **HMAC-SHA256 payload signing** over the exact serialized body
//! - **Declarative filters** narrowing subscriptions beyond event types
//! - **Registered transforms** applied to request and response bodies
//!
//! # Example
//!
//! ```no_run
//! use fanout_core::{Endpoint, Event};
//! use fanout_engine::{EngineConfig, WebhookEngine};
//!
//! # async fn example() -> fanout_core::Result<()> {
//! let mut engine = WebhookEngine::new(EngineConfig::default())?;
//! engine.start();
//!
//! let endpoint = Endpoint::new("orders", "https://example.com/hook")
//!     .with_event_types(["order.created"])
//!     .with_secret("s3cr3t");
//! let endpoint_id = engine.register_endpoint(endpoint).await?;
//!
//! let event = Event::new("api", "order.created", serde_json::json!({"id": 1}), chrono::Utc::now());
//! engine.trigger_event(event).await;
//! # let _ = endpoint_id;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod signature;
pub mod transform;

mod queue;

pub use client::{ClientConfig, DeliveryClient};
pub use engine::{EngineConfig, WebhookEngine};
pub use error::DeliveryError;
pub use metrics::{EndpointMetrics, EngineMetrics, EventStats};
pub use registry::ExportDocument;
pub use transform::{Transform, TransformError, TransformRegistry};

use std::time::Duration;

/// Default cap on deliveries simultaneously in the sending state.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Default driver loop tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Default housekeeping sweep interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Default retention window for events and terminal deliveries.
pub const DEFAULT_EVENT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
