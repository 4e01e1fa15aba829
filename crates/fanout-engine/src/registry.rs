//! Endpoint registry.
//!
//! Owns the set of registered delivery targets. Endpoints are mutated only
//! through the registry's update and unregister operations; the engine
//! wraps these with lifecycle notifications and retry-timer cancellation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fanout_core::{
    models::{Endpoint, EndpointId, EndpointUpdate},
    EngineError, Result,
};
use serde::{Deserialize, Serialize};

/// Serialized form of the full registry.
///
/// Produced by `export_endpoints` and consumed by `import_endpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    /// Every registered endpoint, in no particular order.
    pub endpoints: Vec<Endpoint>,
    /// When the export was taken.
    #[serde(rename = "exportDate")]
    pub export_date: DateTime<Utc>,
}

/// The set of registered delivery targets.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<EndpointId, Endpoint>,
}

impl EndpointRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateEndpoint`] if the identifier is
    /// already registered, or [`EngineError::InvalidInput`] for an empty
    /// name or URL. The registry is unchanged on error.
    pub fn register(&mut self, endpoint: Endpoint) -> Result<EndpointId> {
        if endpoint.name.trim().is_empty() {
            return Err(EngineError::invalid_input("endpoint name must not be empty"));
        }
        if endpoint.url.trim().is_empty() {
            return Err(EngineError::invalid_input("endpoint url must not be empty"));
        }
        if self.endpoints.contains_key(&endpoint.id) {
            return Err(EngineError::duplicate_endpoint(endpoint.id));
        }

        let id = endpoint.id;
        self.endpoints.insert(id, endpoint);
        Ok(id)
    }

    /// Removes an endpoint, returning its final configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EndpointNotFound`] if the identifier is
    /// unknown.
    pub fn unregister(&mut self, id: EndpointId) -> Result<Endpoint> {
        self.endpoints.remove(&id).ok_or_else(|| EngineError::endpoint_not_found(id))
    }

    /// Merges a partial update into an endpoint and bumps `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EndpointNotFound`] if the identifier is
    /// unknown.
    pub fn update(
        &mut self,
        id: EndpointId,
        update: EndpointUpdate,
        now: DateTime<Utc>,
    ) -> Result<Endpoint> {
        let endpoint =
            self.endpoints.get_mut(&id).ok_or_else(|| EngineError::endpoint_not_found(id))?;

        if let Some(name) = update.name {
            endpoint.name = name;
        }
        if let Some(url) = update.url {
            endpoint.url = url;
        }
        if let Some(event_types) = update.event_types {
            endpoint.event_types = event_types;
        }
        if let Some(signature) = update.signature {
            endpoint.signature = signature;
        }
        if let Some(is_active) = update.is_active {
            endpoint.is_active = is_active;
        }
        if let Some(retry_policy) = update.retry_policy {
            endpoint.retry_policy = retry_policy;
        }
        if let Some(request_transform) = update.request_transform {
            endpoint.request_transform = request_transform;
        }
        if let Some(response_transform) = update.response_transform {
            endpoint.response_transform = response_transform;
        }
        if let Some(filters) = update.filters {
            endpoint.filters = filters;
        }
        if let Some(timeout) = update.timeout {
            endpoint.timeout = timeout;
        }
        if let Some(max_retries) = update.max_retries {
            endpoint.max_retries = max_retries;
        }
        if let Some(headers) = update.headers {
            endpoint.headers = headers;
        }
        if let Some(metadata) = update.metadata {
            endpoint.metadata = metadata;
        }
        endpoint.updated_at = now;

        Ok(endpoint.clone())
    }

    /// Looks up an endpoint.
    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(&id)
    }

    /// Every registered endpoint.
    pub fn list(&self) -> Vec<Endpoint> {
        self.endpoints.values().cloned().collect()
    }

    /// Iterates over registered endpoints without cloning.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether no endpoints are registered.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Serializes the full registry as a configuration document.
    pub fn export(&self, now: DateTime<Utc>) -> ExportDocument {
        ExportDocument { endpoints: self.list(), export_date: now }
    }

    /// Parses an import document into endpoints, validating its shape.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidImportFormat`] when `endpoints` is
    /// missing or not a sequence, or when an entry does not deserialize.
    pub fn parse_import(document: &serde_json::Value) -> Result<Vec<Endpoint>> {
        let entries = document
            .get("endpoints")
            .ok_or_else(|| EngineError::invalid_import("missing `endpoints` field"))?
            .as_array()
            .ok_or_else(|| EngineError::invalid_import("`endpoints` must be a sequence"))?;

        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                serde_json::from_value(entry.clone()).map_err(|e| {
                    EngineError::invalid_import(format!("endpoint at index {index}: {e}"))
                })
            })
            .collect()
    }

    /// Builds a registry by replaying registrations in document order.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid or duplicate endpoint, leaving no
    /// partial state behind; the caller swaps the result in atomically.
    pub fn from_endpoints(endpoints: Vec<Endpoint>) -> Result<Self> {
        let mut registry = Self::new();
        for endpoint in endpoints {
            registry.register(endpoint)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use fanout_core::models::SignatureConfig;
    use serde_json::json;

    use super::*;

    fn sample_endpoint(name: &str) -> Endpoint {
        Endpoint::new(name, "https://example.com/hook").with_event_types(["order.created"])
    }

    #[test]
    fn duplicate_registration_leaves_registry_unchanged() {
        let mut registry = EndpointRegistry::new();
        let endpoint = sample_endpoint("orders");
        let duplicate = endpoint.clone();

        registry.register(endpoint).unwrap();
        let error = registry.register(duplicate).unwrap_err();

        assert!(matches!(error, EngineError::DuplicateEndpoint { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_unknown_endpoint_fails() {
        let mut registry = EndpointRegistry::new();
        let error = registry.unregister(EndpointId::new()).unwrap_err();
        assert!(matches!(error, EngineError::EndpointNotFound { .. }));
    }

    #[test]
    fn empty_name_or_url_rejected() {
        let mut registry = EndpointRegistry::new();

        let mut nameless = sample_endpoint("x");
        nameless.name = String::new();
        assert!(matches!(
            registry.register(nameless),
            Err(EngineError::InvalidInput { .. })
        ));

        let mut urlless = sample_endpoint("x");
        urlless.url = "  ".to_string();
        assert!(matches!(registry.register(urlless), Err(EngineError::InvalidInput { .. })));
    }

    #[test]
    fn update_merges_partial_fields() {
        let mut registry = EndpointRegistry::new();
        let id = registry.register(sample_endpoint("orders")).unwrap();
        let now = Utc::now();

        let update = EndpointUpdate {
            url: Some("https://example.com/v2/hook".to_string()),
            is_active: Some(false),
            max_retries: Some(7),
            request_transform: Some(Some("envelope".to_string())),
            ..EndpointUpdate::default()
        };
        let updated = registry.update(id, update, now).unwrap();

        assert_eq!(updated.url, "https://example.com/v2/hook");
        assert!(!updated.is_active);
        assert_eq!(updated.max_retries, 7);
        assert_eq!(updated.request_transform.as_deref(), Some("envelope"));
        // Untouched fields keep their values.
        assert_eq!(updated.name, "orders");
        assert!(updated.subscribes_to("order.created"));
        assert_eq!(updated.updated_at, now);
    }

    #[test]
    fn update_can_clear_transform_slot() {
        let mut registry = EndpointRegistry::new();
        let endpoint =
            sample_endpoint("orders").with_transforms(Some("envelope".to_string()), None);
        let id = registry.register(endpoint).unwrap();

        let update =
            EndpointUpdate { request_transform: Some(None), ..EndpointUpdate::default() };
        let updated = registry.update(id, update, Utc::now()).unwrap();

        assert!(updated.request_transform.is_none());
    }

    #[test]
    fn export_import_round_trip_reproduces_registry() {
        let mut registry = EndpointRegistry::new();
        let first = sample_endpoint("orders");
        let second = Endpoint::new("billing", "https://example.com/billing")
            .with_event_types(["invoice.paid"])
            .with_secret("s3cr3t")
            .with_max_retries(5);
        registry.register(first).unwrap();
        registry.register(second).unwrap();

        let document = registry.export(Utc::now());
        let raw = serde_json::to_value(&document).unwrap();

        let endpoints = EndpointRegistry::parse_import(&raw).unwrap();
        let restored = EndpointRegistry::from_endpoints(endpoints).unwrap();

        assert_eq!(restored.len(), registry.len());
        for endpoint in registry.iter() {
            let imported = restored.get(endpoint.id).expect("endpoint preserved");
            assert_eq!(imported, endpoint);
        }
    }

    #[test]
    fn import_rejects_malformed_documents() {
        let missing = json!({ "exportDate": "2024-01-01T00:00:00Z" });
        assert!(matches!(
            EndpointRegistry::parse_import(&missing),
            Err(EngineError::InvalidImportFormat { .. })
        ));

        let not_a_sequence = json!({ "endpoints": "nope" });
        assert!(matches!(
            EndpointRegistry::parse_import(&not_a_sequence),
            Err(EngineError::InvalidImportFormat { .. })
        ));

        let bad_entry = json!({ "endpoints": [ { "name": "half-formed" } ] });
        assert!(matches!(
            EndpointRegistry::parse_import(&bad_entry),
            Err(EngineError::InvalidImportFormat { .. })
        ));
    }

    #[test]
    fn import_with_duplicate_ids_fails_atomically() {
        let endpoint = sample_endpoint("orders");
        let twin = endpoint.clone();

        let result = EndpointRegistry::from_endpoints(vec![endpoint, twin]);
        assert!(matches!(result, Err(EngineError::DuplicateEndpoint { .. })));
    }

    #[test]
    fn signature_config_survives_round_trip() {
        let endpoint = sample_endpoint("orders").with_secret("key");
        let raw = serde_json::to_value(&endpoint).unwrap();
        let back: Endpoint = serde_json::from_value(raw).unwrap();
        assert_eq!(back.signature, SignatureConfig::hmac_sha256("key"));
    }
}
