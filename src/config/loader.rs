//! Configuration loading from disk.
//!
//! The service configuration (TOML) is strict: any read, parse or validation
//! problem is a startup error. The forwarding-rule file (YAML) fails open: a
//! missing or malformed file yields an empty rule set and a warning.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::routing::{ForwardMethod, ForwardingRule};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
    #[error("Rule file error: {0}")]
    Rules(#[from] serde_yaml::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    #[serde(rename = "domainPattern")]
    domain_pattern: String,
    #[serde(rename = "forwardMethod")]
    forward_method: ForwardMethod,
}

/// Parse a YAML rule document, keeping file order.
pub fn parse_rules(content: &str) -> Result<Vec<ForwardingRule>, ConfigError> {
    let file: RuleFile = serde_yaml::from_str(content)?;
    Ok(file
        .rules
        .into_iter()
        .map(|entry| ForwardingRule::new(&entry.domain_pattern, entry.forward_method))
        .collect())
}

/// Load the rule file, falling back to an empty rule set on any problem.
pub fn load_rules(path: Option<&Path>) -> Vec<ForwardingRule> {
    let Some(path) = path else {
        tracing::info!("No rule file configured, using built-in heuristics only");
        return Vec::new();
    };

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read rule file, continuing with no rules");
            return Vec::new();
        }
    };

    match parse_rules(&content) {
        Ok(rules) => {
            tracing::info!(path = %path.display(), count = rules.len(), "Forwarding rules loaded");
            rules
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to parse rule file, continuing with no rules");
            Vec::new()
        }
    }
}
