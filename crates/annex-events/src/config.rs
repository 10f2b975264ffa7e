//! Event bus configuration

use serde::{Deserialize, Serialize};

use crate::error::{EventError, EventResult};
use crate::platform::{EventInitOptions, ListenerCapabilities};
use crate::specifier::{DEFAULT_NAMESPACE, WILDCARD};

/// Event bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Namespace for registrations that do not name one
    pub default_namespace: String,

    /// Listener options to assume instead of probing the platform
    pub capabilities: Option<ListenerCapabilities>,

    /// Flags for events built by `emit` when the caller passes none
    pub emit_defaults: EventInitOptions,

    /// Drop registry entries whose target has been dropped during cleanup
    pub prune_dead_targets: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            capabilities: None,
            emit_defaults: EventInitOptions::default(),
            prune_dead_targets: true,
        }
    }
}

impl BusConfig {
    /// Parse and validate a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> EventResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> EventResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check invariants the registry relies on.
    pub fn validate(&self) -> EventResult<()> {
        let ns = &self.default_namespace;
        if ns.is_empty() || ns == WILDCARD {
            return Err(EventError::config(format!(
                "default namespace must be a concrete name, got '{ns}'"
            )));
        }
        if ns.contains('.') || ns.chars().any(char::is_whitespace) {
            return Err(EventError::config(format!(
                "default namespace '{ns}' must not contain dots or whitespace"
            )));
        }
        Ok(())
    }

    /// Override the probed listener capabilities.
    pub fn with_capabilities(mut self, capabilities: ListenerCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BusConfig::default();
        assert_eq!(config.default_namespace, "__default");
        assert!(config.prune_dead_targets);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_json_partial() {
        let config = BusConfig::from_json(r#"{"emit_defaults": {"bubbles": false}}"#).unwrap();
        assert!(!config.emit_defaults.bubbles);
        assert!(config.emit_defaults.cancelable);
        assert_eq!(config.default_namespace, DEFAULT_NAMESPACE);
    }

    #[test]
    fn test_rejects_bad_namespace() {
        for ns in ["", "*", "a.b", "a b"] {
            let config = BusConfig {
                default_namespace: ns.to_string(),
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(EventError::Config(_))));
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            BusConfig::from_json("{not json"),
            Err(EventError::Config(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let config = BusConfig::default().with_capabilities(ListenerCapabilities::CAPTURE);
        let json = config.to_json().unwrap();
        assert_eq!(BusConfig::from_json(&json).unwrap(), config);
    }
}
