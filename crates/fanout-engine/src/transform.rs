//! Registered payload transforms.
//!
//! Endpoints reference transforms by name; the host application registers
//! the implementations at configuration time. The engine never evaluates
//! user-supplied code. Transform failures are logged and the untransformed
//! value is used; a transform can never abort a delivery.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Error produced by a failing transform.
#[derive(Debug, Clone, Error)]
#[error("transform failed: {0}")]
pub struct TransformError(pub String);

impl TransformError {
    /// Creates a transform error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A pure payload transformation supplied by the host application.
///
/// Implementations must be side-effect free: they receive a value and
/// return a replacement, or an error to fall back to the original.
pub trait Transform: Send + Sync {
    /// Applies the transform to a value.
    fn apply(&self, value: &Value) -> Result<Value, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&Value) -> Result<Value, TransformError> + Send + Sync,
{
    fn apply(&self, value: &Value) -> Result<Value, TransformError> {
        self(value)
    }
}

/// Name-keyed registry of host-supplied transforms.
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { transforms: HashMap::new() }
    }

    /// Registers a transform under a name, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.transforms.insert(name.into(), transform);
    }

    /// Looks up a transform by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Transform>> {
        self.transforms.get(name)
    }

    /// Number of registered transforms.
    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Applies the named transform, falling back to the original value.
    ///
    /// `None` passes the value through untouched. Unknown names and
    /// transform errors are logged and degrade to the untransformed
    /// value; they never fail the delivery.
    pub fn apply_named(&self, name: Option<&str>, value: &Value) -> Value {
        let Some(name) = name else {
            return value.clone();
        };

        match self.transforms.get(name) {
            Some(transform) => match transform.apply(value) {
                Ok(transformed) => transformed,
                Err(error) => {
                    warn!(transform = name, error = %error, "transform failed, using untransformed value");
                    value.clone()
                },
            },
            None => {
                warn!(transform = name, "transform not registered, using untransformed value");
                value.clone()
            },
        }
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.transforms.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope_transform() -> Arc<dyn Transform> {
        Arc::new(|value: &Value| -> Result<Value, TransformError> {
            Ok(json!({ "wrapped": value.clone() }))
        })
    }

    fn failing_transform() -> Arc<dyn Transform> {
        Arc::new(|_: &Value| -> Result<Value, TransformError> {
            Err(TransformError::new("boom"))
        })
    }

    #[test]
    fn no_transform_passes_value_through() {
        let registry = TransformRegistry::new();
        let value = json!({"id": 1});
        assert_eq!(registry.apply_named(None, &value), value);
    }

    #[test]
    fn registered_transform_replaces_value() {
        let mut registry = TransformRegistry::new();
        registry.register("envelope", envelope_transform());

        let out = registry.apply_named(Some("envelope"), &json!({"id": 1}));
        assert_eq!(out, json!({"wrapped": {"id": 1}}));
    }

    #[test]
    fn unknown_name_falls_back_to_original() {
        let registry = TransformRegistry::new();
        let value = json!([1, 2, 3]);
        assert_eq!(registry.apply_named(Some("missing"), &value), value);
    }

    #[test]
    fn failing_transform_falls_back_to_original() {
        let mut registry = TransformRegistry::new();
        registry.register("broken", failing_transform());

        let value = json!("payload");
        assert_eq!(registry.apply_named(Some("broken"), &value), value);
    }

    #[test]
    fn re_registration_replaces_previous_transform() {
        let mut registry = TransformRegistry::new();
        registry.register("t", failing_transform());
        registry.register("t", envelope_transform());
        assert_eq!(registry.len(), 1);

        let out = registry.apply_named(Some("t"), &json!(1));
        assert_eq!(out, json!({"wrapped": 1}));
    }
}
