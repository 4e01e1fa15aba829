//! Core domain models and cross-cutting traits.
//!
//! Provides strongly-typed domain primitives, the public error taxonomy,
//! lifecycle-notification traits, and the clock abstraction used by the
//! delivery engine. The engine crate depends on these foundational types
//! for type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod notify;
pub mod time;

pub use error::{EngineError, Result};
pub use models::{
    BackoffStrategy, Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, EndpointTest,
    EndpointUpdate, Event, EventId, FilterOp, FilterRule, ResponseRecord, RetryPolicy,
    SignatureConfig,
};
pub use notify::{
    EngineNotification, MulticastNotificationHandler, NoOpNotificationHandler,
    NotificationHandler,
};
pub use time::{Clock, RealClock, TestClock};
