//! Ambient run configuration: a TOML document covering constraints,
//! error-classification tables, the manager agent's knobs, model role
//! aliases, and per-source overrides.

use std::collections::HashMap;

use recon_core::model::Constraints;
use serde::Deserialize;

use crate::classify::ClassifierConfig;

/// `manager_agent` block (§6.4).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerAgentConfig {
    /// When false, prioritization and saturation detection are both skipped.
    pub enabled: bool,
    /// Run the saturation detector every N completed goals; 0 disables it.
    pub saturation_check_interval: u32,
    /// Minimum confidence required to honor a SATURATED verdict.
    pub saturation_confidence_threshold: u8,
    /// Whether to re-run the Prioritizer after every completed goal.
    pub reprioritize_after_task: bool,
    /// Whether an authoritative SATURATED verdict may stop the run early.
    pub allow_saturation_stop: bool,
}

impl Default for ManagerAgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            saturation_check_interval: 3,
            saturation_confidence_threshold: 70,
            reprioritize_after_task: true,
            allow_saturation_stop: true,
        }
    }
}

/// `error_handling` block (§6.4); mirrors [`ClassifierConfig`] field-for-field
/// so it deserializes directly from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    /// HTTP status codes classified as never fixable by retrying.
    pub unfixable_http_codes: Vec<u16>,
    /// HTTP status codes classified as reformulable (e.g. 422).
    pub fixable_http_codes: Vec<u16>,
    /// Substrings identifying timeout errors from a message-only error.
    pub timeout_patterns: Vec<String>,
    /// Substrings identifying rate-limit errors from a message-only error.
    pub rate_limit_patterns: Vec<String>,
    /// Substrings identifying network errors from a message-only error.
    pub network_patterns: Vec<String>,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        let defaults = ClassifierConfig::default();
        Self {
            unfixable_http_codes: defaults.unfixable_http_codes,
            fixable_http_codes: defaults.fixable_http_codes,
            timeout_patterns: defaults.timeout_patterns,
            rate_limit_patterns: defaults.rate_limit_patterns,
            network_patterns: defaults.network_patterns,
        }
    }
}

impl From<ErrorHandlingConfig> for ClassifierConfig {
    fn from(config: ErrorHandlingConfig) -> Self {
        Self {
            unfixable_http_codes: config.unfixable_http_codes,
            fixable_http_codes: config.fixable_http_codes,
            timeout_patterns: config.timeout_patterns,
            rate_limit_patterns: config.rate_limit_patterns,
            network_patterns: config.network_patterns,
        }
    }
}

/// Per-source override under `databases.<source_id>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseOverride {
    /// Whether the source is enabled for this run.
    pub enabled: bool,
    /// Per-call timeout for this source's adapter, in seconds.
    pub timeout_seconds: u64,
}

impl Default for DatabaseOverride {
    fn default() -> Self {
        Self { enabled: true, timeout_seconds: 30 }
    }
}

/// Full deserializable run configuration (§6.4).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Run-wide budgets and ceilings.
    pub constraints: Constraints,
    /// Error classification tables.
    pub error_handling: ErrorHandlingConfig,
    /// Prioritizer / saturation-detector knobs.
    pub manager_agent: ManagerAgentConfig,
    /// Role -> model id. A single bare string applies uniformly; represented
    /// here as a map that callers may populate with one key per role.
    pub model_roles: HashMap<String, String>,
    /// Per-source enable/timeout overrides, keyed by source id.
    pub databases: HashMap<String, DatabaseOverride>,
}

impl RunConfig {
    /// Parses a [`RunConfig`] from a TOML document.
    ///
    /// # Errors
    /// Returns an error if `text` is not valid TOML or doesn't match the
    /// expected shape.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Whether `source_id` is enabled, defaulting to `true` when no override
    /// is configured.
    #[must_use]
    pub fn source_enabled(&self, source_id: &str) -> bool {
        self.databases.get(source_id).is_none_or(|d| d.enabled)
    }
}
