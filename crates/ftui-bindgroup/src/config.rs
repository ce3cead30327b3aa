#![forbid(unsafe_code)]

//! Edit group configuration.
//!
//! With the `policy-config` feature a configuration can be loaded from TOML
//! or JSON, so hosts can keep form behaviour in data files:
//!
//! ```toml
//! name = "customer"
//! shares_proposed_values = true
//! notify_on_validation_error = true
//! culture = "fr_FR.UTF-8"
//! ```
//!
//! Missing keys take their [`Default`] values.

use core::fmt;

use crate::locale::{Locale, detect_system_locale, normalize_locale};

/// Flags and identity of an edit group.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EditGroupConfig {
    /// Name bindings use to find the group.
    pub name: Option<String>,
    /// Keep a detaching binding's pending edit in the proposed-value table.
    pub shares_proposed_values: bool,
    /// Deliver validation-error add/remove events to subscribers.
    pub notify_on_validation_error: bool,
    /// Fold entity-level errors from [`EntityErrorSource`](crate::EntityErrorSource)
    /// items into the group.
    pub validates_on_entity_errors: bool,
    /// Culture for rule evaluation; detected from the environment when unset.
    pub culture: Option<String>,
}

impl Default for EditGroupConfig {
    fn default() -> Self {
        Self {
            name: None,
            shares_proposed_values: true,
            notify_on_validation_error: false,
            validates_on_entity_errors: true,
            culture: None,
        }
    }
}

impl EditGroupConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the group name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enable or disable value sharing.
    #[must_use]
    pub fn shares_proposed_values(mut self, enabled: bool) -> Self {
        self.shares_proposed_values = enabled;
        self
    }

    /// Enable or disable validation-error events.
    #[must_use]
    pub fn notify_on_validation_error(mut self, enabled: bool) -> Self {
        self.notify_on_validation_error = enabled;
        self
    }

    /// Enable or disable entity-level error validation.
    #[must_use]
    pub fn validates_on_entity_errors(mut self, enabled: bool) -> Self {
        self.validates_on_entity_errors = enabled;
        self
    }

    /// Set the culture tag.
    #[must_use]
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// The normalized culture, detecting the system locale when unset.
    #[must_use]
    pub fn resolved_culture(&self) -> Locale {
        self.culture
            .as_deref()
            .map_or_else(detect_system_locale, normalize_locale)
    }

    /// Parse a TOML configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Toml`] if the document does not parse.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        toml::from_str(src).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    /// Parse a JSON configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] if the document does not parse.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(src: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(src).map_err(|e| ConfigError::Json(e.to_string()))
    }
}

/// Errors from configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A TOML document could not be parsed.
    Toml(String),
    /// A JSON document could not be parsed.
    Json(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Toml(msg) => write!(f, "invalid TOML config: {msg}"),
            Self::Json(msg) => write!(f, "invalid JSON config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EditGroupConfig::default();
        assert!(config.shares_proposed_values);
        assert!(!config.notify_on_validation_error);
        assert!(config.validates_on_entity_errors);
        assert!(config.name.is_none());
    }

    #[test]
    fn builder_sets_fields() {
        let config = EditGroupConfig::new()
            .with_name("row")
            .shares_proposed_values(false)
            .notify_on_validation_error(true)
            .with_culture("fr_FR.UTF-8");
        assert_eq!(config.name.as_deref(), Some("row"));
        assert!(!config.shares_proposed_values);
        assert!(config.notify_on_validation_error);
        assert_eq!(config.resolved_culture(), "fr-FR");
    }

    #[test]
    fn config_error_display() {
        assert_eq!(
            ConfigError::Json("eof".into()).to_string(),
            "invalid JSON config: eof"
        );
    }

    #[cfg(feature = "policy-config")]
    #[test]
    fn toml_fills_missing_with_defaults() {
        let config = EditGroupConfig::from_toml_str("name = \"customer\"\nculture = \"de\"\n").unwrap();
        assert_eq!(config.name.as_deref(), Some("customer"));
        assert!(config.shares_proposed_values);
        assert_eq!(config.resolved_culture(), "de");
    }

    #[cfg(feature = "policy-config")]
    #[test]
    fn json_rejects_garbage() {
        let err = EditGroupConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
