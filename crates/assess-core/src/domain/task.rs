//! Benchmark tasks and assessee endpoint registration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::RegistryError;

/// A benchmark instruction sent unchanged to every assessee in a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// Unique identifier within a run.
    pub id: String,

    /// Free-text instruction.
    pub description: String,

    /// Required observable outcomes. When empty the judge derives them.
    #[serde(default)]
    pub success_criteria: Vec<String>,

    /// Optional required starting state (e.g. an initial URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_context: Option<String>,
}

impl Task {
    /// Create a task without explicit success criteria.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            success_criteria: Vec::new(),
            start_context: None,
        }
    }

    /// Add a required outcome.
    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    /// Set the starting context.
    pub fn with_start_context(mut self, context: impl Into<String>) -> Self {
        self.start_context = Some(context.into());
        self
    }

    /// Why this task cannot be run, if it is malformed on its own.
    pub fn malformed_reason(&self) -> Option<&'static str> {
        if self.id.trim().is_empty() {
            Some("task id is empty")
        } else if self.description.trim().is_empty() {
            Some("task description is empty")
        } else {
            None
        }
    }
}

/// An agent under evaluation, reachable over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssesseeEndpoint {
    /// Unique identifier within a run.
    pub id: String,

    /// Human-readable name used in reports.
    #[serde(default)]
    pub display_name: String,

    /// Base URL of the assessee (e.g. `http://localhost:9001`).
    pub address: String,

    /// Informational only; never used for routing.
    #[serde(default)]
    pub capability_tags: Vec<String>,
}

impl AssesseeEndpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            address: address.into(),
            capability_tags: Vec::new(),
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Address without trailing slashes, used for joining paths and for
    /// duplicate detection.
    pub fn normalized_address(&self) -> &str {
        self.address.trim().trim_end_matches('/')
    }

    /// Validate the id and address shape.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        let invalid = |reason: String| RegistryError::InvalidAddress {
            id: self.id.clone(),
            address: self.address.clone(),
            reason,
        };
        let url = reqwest::Url::parse(self.normalized_address())
            .map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme {other}"))),
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(())
    }
}

/// Set of endpoints admitted to a run.
///
/// Registration rejects invalid endpoints and duplicate ids or addresses
/// immediately, so dispatch never sees an ambiguous endpoint set.
#[derive(Debug, Clone, Default)]
pub struct EndpointRegistry {
    endpoints: Vec<AssesseeEndpoint>,
    by_address: HashMap<String, String>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list, failing on the first invalid entry.
    pub fn from_endpoints(
        endpoints: impl IntoIterator<Item = AssesseeEndpoint>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for endpoint in endpoints {
            registry.register(endpoint)?;
        }
        Ok(registry)
    }

    /// Register a single endpoint.
    pub fn register(&mut self, endpoint: AssesseeEndpoint) -> Result<(), RegistryError> {
        endpoint.validate()?;

        if self.endpoints.iter().any(|e| e.id == endpoint.id) {
            return Err(RegistryError::DuplicateId(endpoint.id));
        }

        let address = endpoint.normalized_address().to_string();
        if let Some(first) = self.by_address.get(&address) {
            return Err(RegistryError::DuplicateAddress {
                address,
                first: first.clone(),
                second: endpoint.id,
            });
        }

        self.by_address.insert(address, endpoint.id.clone());
        self.endpoints.push(endpoint);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&AssesseeEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn endpoints(&self) -> &[AssesseeEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_builder() {
        let task = Task::new("flight_search_1", "Find the cheapest flight")
            .with_criterion("Sort by price")
            .with_start_context("https://www.google.com/travel/flights");

        assert_eq!(task.success_criteria, vec!["Sort by price"]);
        assert_eq!(
            task.start_context.as_deref(),
            Some("https://www.google.com/travel/flights")
        );
        assert!(task.malformed_reason().is_none());
    }

    #[test]
    fn test_blank_task_is_malformed() {
        assert!(Task::new("", "do something").malformed_reason().is_some());
        assert!(Task::new("t1", "   ").malformed_reason().is_some());
    }

    #[test]
    fn test_task_deserializes_without_optional_fields() {
        let task: Task = serde_json::from_str(r#"{"id":"t1","description":"d"}"#).unwrap();
        assert!(task.success_criteria.is_empty());
        assert!(task.start_context.is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_id() {
        let mut registry = EndpointRegistry::new();
        registry
            .register(AssesseeEndpoint::new("alpha", "http://localhost:9001"))
            .unwrap();
        let err = registry
            .register(AssesseeEndpoint::new("alpha", "http://localhost:9002"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId(id) if id == "alpha"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_duplicate_address_after_normalization() {
        let mut registry = EndpointRegistry::new();
        registry
            .register(AssesseeEndpoint::new("alpha", "http://localhost:9001"))
            .unwrap();
        let err = registry
            .register(AssesseeEndpoint::new("beta", "http://localhost:9001/"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAddress { .. }));
    }

    #[test]
    fn test_registry_rejects_invalid_address() {
        let err = EndpointRegistry::from_endpoints(vec![AssesseeEndpoint::new(
            "alpha",
            "ftp://localhost:9001",
        )])
        .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }));

        let err = AssesseeEndpoint::new("alpha", "not a url").validate().unwrap_err();
        assert!(matches!(err, RegistryError::InvalidAddress { .. }));
    }

    #[test]
    fn test_registry_rejects_empty_id() {
        let err = AssesseeEndpoint::new(" ", "http://localhost:9001")
            .validate()
            .unwrap_err();
        assert!(matches!(err, RegistryError::EmptyId));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = EndpointRegistry::from_endpoints(vec![
            AssesseeEndpoint::new("alpha", "http://localhost:9001").with_display_name("Alpha"),
            AssesseeEndpoint::new("beta", "http://localhost:9002"),
        ])
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("alpha").unwrap().display_name, "Alpha");
        assert_eq!(registry.get("beta").unwrap().display_name, "beta");
        assert!(registry.get("gamma").is_none());
    }
}
