//! Core domain models and strongly-typed identifiers.
//!
//! Defines events, endpoints, deliveries, and newtype ID wrappers for
//! compile-time type safety, along with the retry-policy and filter types
//! endpoints are configured with. State transition logic for deliveries
//! lives in the engine crate; these types only describe the data.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default header carrying the payload signature when an endpoint has a
/// signing secret configured.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Fanout-Signature";

/// Strongly-typed endpoint identifier.
///
/// Each endpoint represents a unique delivery target URL with its own
/// retry policy, filters, and signing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub Uuid);

impl EndpointId {
    /// Creates a new random endpoint ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EndpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EndpointId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed event identifier.
///
/// Events are immutable once created, and this ID follows them through
/// their entire lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed delivery identifier.
///
/// A delivery binds one event to one endpoint; retries reuse the same ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Delivery lifecycle status.
///
/// Deliveries progress through these states during processing:
///
/// ```text
/// Pending -> Sending -> Delivered
///                    -> Retrying -> Pending -> ...
///                    -> Failed (terminal, retries exhausted or non-retryable)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Queued and eligible for immediate dispatch.
    Pending,

    /// The executor has claimed this delivery and a send is in flight.
    ///
    /// Bounded by the engine's global in-flight cap. This state prevents
    /// duplicate concurrent dispatch of the same delivery.
    Sending,

    /// Successfully delivered to the endpoint.
    ///
    /// Terminal success state. The record is retained for audit until the
    /// retention sweep removes it.
    Delivered,

    /// Permanently failed.
    ///
    /// Terminal failure state after all retries are exhausted or a
    /// non-retryable error was encountered.
    Failed,

    /// A retry timer is armed; the delivery returns to `Pending` on expiry.
    Retrying,
}

impl DeliveryStatus {
    /// Whether this status is terminal (no further attempts will occur).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sending => write!(f, "sending"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

/// Retry backoff strategy for failed deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Exponential backoff: `base_delay * 2^attempt`.
    Exponential,
    /// Linear backoff: `base_delay * (attempt + 1)`.
    Linear,
    /// Fixed delay between retries.
    Fixed,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exponential => write!(f, "exponential"),
            Self::Linear => write!(f, "linear"),
            Self::Fixed => write!(f, "fixed"),
        }
    }
}

/// Retry policy configuration for webhook delivery.
///
/// Defines how delivery failures are retried. Policies can be customized
/// per endpoint to handle different destination characteristics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Strategy for calculating backoff delays.
    pub strategy: BackoffStrategy,

    /// Base delay for the backoff calculation.
    pub base_delay: Duration,

    /// Upper bound on the computed delay, when set.
    pub max_delay: Option<Duration>,

    /// HTTP status codes considered retryable.
    ///
    /// When unset, server errors (5xx) and 429 are retryable and client
    /// errors (4xx) are not. Network failures and timeouts are always
    /// retryable regardless of this set.
    pub retryable_statuses: Option<HashSet<u16>>,

    /// Maximum total delivery attempts, including the initial one.
    ///
    /// Inherited from the endpoint's `max_retries` (plus the initial
    /// attempt) when unset.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(512)),
            retryable_statuses: None,
            max_attempts: None,
        }
    }
}

/// Signature configuration using a tagged union.
///
/// Keeps the signing secret and the header it travels in configured
/// together when signatures are enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignatureConfig {
    /// No payload signing.
    #[default]
    None,
    /// HMAC-SHA256 signature carried in a custom header.
    HmacSha256 {
        /// Secret key for HMAC generation.
        secret: String,
        /// Header name carrying the hex-encoded signature.
        header: String,
    },
}

impl SignatureConfig {
    /// Creates an HMAC-SHA256 config with the default signature header.
    pub fn hmac_sha256(secret: impl Into<String>) -> Self {
        Self::HmacSha256 { secret: secret.into(), header: DEFAULT_SIGNATURE_HEADER.to_string() }
    }

    /// Creates an HMAC-SHA256 config with a custom signature header.
    pub fn hmac_sha256_with_header(secret: impl Into<String>, header: impl Into<String>) -> Self {
        Self::HmacSha256 { secret: secret.into(), header: header.into() }
    }

    /// Whether payload signing is enabled.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// The signing secret, if configured.
    pub fn secret(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::HmacSha256 { secret, .. } => Some(secret),
        }
    }

    /// The signature header name, if configured.
    pub fn header(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::HmacSha256 { header, .. } => Some(header),
        }
    }
}

/// Comparison operator for a filter rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Exact equality against the comparison value.
    Equals,
    /// Substring match for strings, element membership for arrays.
    Contains,
    /// Regular-expression match against the field's string value.
    Regex,
    /// Field value is a member of the comparison array.
    In,
    /// Field value is not a member of the comparison array.
    NotIn,
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => write!(f, "equals"),
            Self::Contains => write!(f, "contains"),
            Self::Regex => write!(f, "regex"),
            Self::In => write!(f, "in"),
            Self::NotIn => write!(f, "not_in"),
        }
    }
}

/// Declarative predicate over an event field.
///
/// All filters attached to an endpoint must pass (logical AND) for the
/// endpoint to receive the event. An unresolved field path evaluates to an
/// absent value, which fails every operator unless the rule is negated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Dotted path into the event structure, e.g. `payload.order.id`.
    pub field: String,

    /// Comparison operator.
    pub op: FilterOp,

    /// Comparison value.
    pub value: serde_json::Value,

    /// Inverts the result of the comparison.
    #[serde(default)]
    pub negate: bool,
}

impl FilterRule {
    /// Creates a filter rule.
    pub fn new(field: impl Into<String>, op: FilterOp, value: serde_json::Value) -> Self {
        Self { field: field.into(), op, value, negate: false }
    }

    /// Returns the rule with the negate flag set.
    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }
}

/// A registered delivery target.
///
/// Owned exclusively by the endpoint registry; mutated only through the
/// registry's update and unregister operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique identifier for this endpoint.
    pub id: EndpointId,

    /// Human-readable endpoint name.
    pub name: String,

    /// Target URL for delivery.
    pub url: String,

    /// Event types this endpoint subscribes to.
    pub event_types: HashSet<String>,

    /// Payload signing configuration.
    #[serde(default)]
    pub signature: SignatureConfig,

    /// Whether this endpoint should receive events.
    ///
    /// Inactive endpoints are skipped during matching. Used for
    /// soft-disable without deleting endpoint configuration.
    pub is_active: bool,

    /// Retry behaviour for failed deliveries.
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Name of the registered transform applied to the outgoing payload.
    #[serde(default)]
    pub request_transform: Option<String>,

    /// Name of the registered transform applied to captured responses.
    #[serde(default)]
    pub response_transform: Option<String>,

    /// Filters narrowing which events this endpoint receives beyond its
    /// type subscription. All must pass.
    #[serde(default)]
    pub filters: Vec<FilterRule>,

    /// Per-call HTTP timeout. Hard-aborts the request on expiry.
    pub timeout: Duration,

    /// Maximum retry attempts after the initial attempt.
    ///
    /// Zero means a single attempt with no retries.
    pub max_retries: u32,

    /// Extra headers attached to every delivery to this endpoint.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// When this endpoint was registered.
    pub created_at: DateTime<Utc>,

    /// When configuration was last modified.
    pub updated_at: DateTime<Utc>,
}

impl Endpoint {
    /// Creates an endpoint with a generated ID and default configuration:
    /// active, no filters, no signing, 30 s timeout, 3 retries.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: EndpointId::new(),
            name: name.into(),
            url: url.into(),
            event_types: HashSet::new(),
            signature: SignatureConfig::None,
            is_active: true,
            retry_policy: RetryPolicy::default(),
            request_transform: None,
            response_transform: None,
            filters: Vec::new(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            headers: HashMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the subscribed event types.
    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Enables HMAC-SHA256 signing with the default signature header.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.signature = SignatureConfig::hmac_sha256(secret);
        self
    }

    /// Sets the retry cap.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Attaches filter rules.
    pub fn with_filters(mut self, filters: Vec<FilterRule>) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Names the request/response transforms to apply.
    pub fn with_transforms(
        mut self,
        request: Option<String>,
        response: Option<String>,
    ) -> Self {
        self.request_transform = request;
        self.response_transform = response;
        self
    }

    /// Whether this endpoint subscribes to the given event type.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.event_types.contains(event_type)
    }
}

/// Partial endpoint update.
///
/// Fields left as `None` keep their current value. The transform slots use
/// a nested option so `Some(None)` clears a previously configured name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New target URL.
    pub url: Option<String>,
    /// Replacement event-type subscription set.
    pub event_types: Option<HashSet<String>>,
    /// Replacement signing configuration.
    pub signature: Option<SignatureConfig>,
    /// Activate or deactivate the endpoint.
    pub is_active: Option<bool>,
    /// Replacement retry policy.
    pub retry_policy: Option<RetryPolicy>,
    /// Replacement request transform; `Some(None)` clears it.
    pub request_transform: Option<Option<String>>,
    /// Replacement response transform; `Some(None)` clears it.
    pub response_transform: Option<Option<String>>,
    /// Replacement filter list.
    pub filters: Option<Vec<FilterRule>>,
    /// New per-call timeout.
    pub timeout: Option<Duration>,
    /// New retry cap.
    pub max_retries: Option<u32>,
    /// Replacement extra headers.
    pub headers: Option<HashMap<String, String>>,
    /// Replacement metadata.
    pub metadata: Option<HashMap<String, String>>,
}

/// An immutable fact to be delivered.
///
/// Created once by `trigger_event`, never mutated afterward. Survives in
/// the engine's event store until the retention sweep expires it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// Label identifying the subsystem that produced the event.
    pub source: String,

    /// Event type string matched against endpoint subscriptions.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Arbitrary payload delivered to matching endpoints.
    pub payload: serde_json::Value,

    /// Free-form metadata. Not part of the delivered body.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Creates an event with a generated ID, stamped with the given time.
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
            metadata: HashMap::new(),
            created_at,
        }
    }

    /// Attaches a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Captured HTTP response from a delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// HTTP status code.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body, truncated if oversized.
    pub body: String,

    /// Wall-clock duration of the request.
    pub duration: Duration,
}

impl ResponseRecord {
    /// Whether the response indicates success (2xx).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The mutable unit of work binding one event to one endpoint.
///
/// Created when an event matches an endpoint; destroyed only by the
/// retention sweep. Never deleted on success so the record remains
/// available for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// Endpoint this delivery targets.
    pub endpoint_id: EndpointId,

    /// Event being delivered.
    pub event_id: EventId,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// Number of completed send attempts.
    ///
    /// Monotonically non-decreasing; never exceeds the endpoint's
    /// `max_retries + 1`.
    pub attempts: u32,

    /// Timestamp of the most recent attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the armed retry fires, while `Retrying`.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Last captured response, transformed if the endpoint configures a
    /// response transform.
    pub response: Option<ResponseRecord>,

    /// Human-readable description of the last failure.
    pub last_error: Option<String>,

    /// When this delivery was created.
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    /// Creates a pending delivery for the given event/endpoint pair.
    pub fn new(endpoint_id: EndpointId, event_id: EventId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryId::new(),
            endpoint_id,
            event_id,
            status: DeliveryStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            next_retry_at: None,
            response: None,
            last_error: None,
            created_at,
        }
    }
}

/// Outcome of an endpoint self-test.
///
/// Returned inline by `test_endpoint`; the synthetic event never enters
/// the delivery pipeline and never touches production metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointTest {
    /// Whether the endpoint responded with a 2xx status.
    pub success: bool,

    /// Captured response, when the endpoint responded at all.
    pub response: Option<ResponseRecord>,

    /// Transport or signing error, when the attempt failed outright.
    pub error: Option<String>,

    /// Wall-clock duration of the attempt.
    pub duration: Duration,
}
