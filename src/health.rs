//! Component health reporting.
//!
//! Each loaded component reports a [`ComponentState`]; the overall status is
//! `healthy` exactly when the embedding stage loaded. Reducer, strategy and
//! profile problems only degrade the service, they never take it down.
//!
//! # Example
//!
//! ```rust
//! use cohort::health::{ComponentHealth, HealthReport};
//!
//! let mut report = HealthReport::new();
//! report.add(ComponentHealth::loaded("embedding"));
//! report.add(ComponentHealth::failed("reducer", "fitted_reducer.json missing"));
//! assert!(report.is_healthy());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Component whose load decides the overall status.
pub const EMBEDDING_COMPONENT: &str = "embedding";

/// Load state of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Loaded and usable.
    Loaded,
    /// Usable with a fallback.
    Degraded,
    /// Not usable.
    Failed,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentState::Loaded => write!(f, "loaded"),
            ComponentState::Degraded => write!(f, "degraded"),
            ComponentState::Failed => write!(f, "failed"),
        }
    }
}

/// State of one named component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ComponentHealth {
    pub fn loaded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Loaded,
            detail: None,
        }
    }

    pub fn degraded(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Degraded,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ComponentState::Failed,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for ComponentHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.state, self.name)?;
        if let Some(detail) = &self.detail {
            write!(f, " - {}", detail)?;
        }
        Ok(())
    }
}

/// Overall service status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Health of every loaded component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthReport {
    /// Empty report; degraded until the embedding component is added.
    pub fn new() -> Self {
        Self {
            status: HealthStatus::Degraded,
            components: Vec::new(),
        }
    }

    /// Add a component and recompute the status.
    pub fn add(&mut self, component: ComponentHealth) {
        self.components.push(component);
        self.status = if self.embedding_loaded() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
    }

    fn embedding_loaded(&self) -> bool {
        self.components
            .iter()
            .any(|c| c.name == EMBEDDING_COMPONENT && c.state == ComponentState::Loaded)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// State of a named component.
    pub fn state_of(&self, name: &str) -> Option<ComponentState> {
        self.components.iter().find(|c| c.name == name).map(|c| c.state)
    }

    /// Components not fully loaded.
    pub fn problems(&self) -> impl Iterator<Item = &ComponentHealth> {
        self.components
            .iter()
            .filter(|c| c.state != ComponentState::Loaded)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        };
        writeln!(f, "Service health: {status}")?;
        for component in &self.components {
            writeln!(f, "  {}", component)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_embedding_only() {
        let mut report = HealthReport::new();
        assert!(!report.is_healthy());

        report.add(ComponentHealth::failed("reducer", "missing"));
        report.add(ComponentHealth::failed("strategy", "missing"));
        assert_eq!(report.status, HealthStatus::Degraded);

        report.add(ComponentHealth::loaded(EMBEDDING_COMPONENT));
        assert!(report.is_healthy());
        assert_eq!(report.problems().count(), 2);
        assert_eq!(report.state_of("reducer"), Some(ComponentState::Failed));
    }

    #[test]
    fn failed_embedding_is_degraded() {
        let mut report = HealthReport::new();
        report.add(ComponentHealth::failed(EMBEDDING_COMPONENT, "unknown model"));
        report.add(ComponentHealth::loaded("reducer"));
        assert_eq!(report.status, HealthStatus::Degraded);
    }

    #[test]
    fn serializes_lowercase() {
        let mut report = HealthReport::new();
        report.add(ComponentHealth::loaded(EMBEDDING_COMPONENT));
        report.add(ComponentHealth::degraded("profiles", "empty table"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"][1]["state"], "degraded");
        assert!(json["components"][0].get("detail").is_none());
        assert!(report.to_string().contains("[degraded] profiles - empty table"));
    }
}
