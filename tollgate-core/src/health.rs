//! Unified health check types
//!
//! Used by the `/health` route to report the state of each backing
//! component (rate-limit backend, response cache, stores).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health status for a service or component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,
    /// Component is operational but degraded (e.g. running on a fallback)
    Degraded,
    /// Component is not operational
    Unhealthy,
}

impl HealthStatus {
    /// Combine two statuses, keeping the worse one.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Detailed health check result for a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl HealthCheck {
    /// Create a healthy check result.
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            component: component.into(),
            message: None,
            metadata: None,
        }
    }

    /// Create a degraded check result.
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    /// Create an unhealthy check result.
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            component: component.into(),
            message: Some(message.into()),
            metadata: None,
        }
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Healthy), Healthy);
        assert_eq!(Healthy.worst(Degraded), Degraded);
        assert_eq!(Degraded.worst(Unhealthy), Unhealthy);
        assert_eq!(Unhealthy.worst(Healthy), Unhealthy);
    }

    #[test]
    fn test_metadata_accumulates() {
        let check = HealthCheck::degraded("rate_limiter", "using local fallback")
            .with_metadata("backend", serde_json::json!("local"))
            .with_metadata("fallbacks", serde_json::json!(3));
        assert_eq!(check.status, HealthStatus::Degraded);
        assert_eq!(check.metadata.map(|m| m.len()), Some(2));
    }
}
