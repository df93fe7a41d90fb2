//! Engine configuration, resolved once at startup.

use serde::Deserialize;
use thiserror::Error;

use lpnflow_core::{ActorId, LocationId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Settings the orchestration service needs at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Location freshly received units are placed in; auto-putaway scans it.
    pub staging_location: LocationId,
    /// Actor recorded on background operations (auto-putaway).
    pub system_actor: ActorId,
    /// How often a use case is re-run after an optimistic concurrency conflict.
    pub max_commit_retries: u32,
    /// When false, ERP pushes are skipped (and logged at debug).
    pub erp_enabled: bool,
    /// ERP company the adapter posts adjustments under.
    pub erp_company_id: String,
    /// Postgres connection string; `None` selects the in-memory repository.
    pub database_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staging_location: LocationId::from_static("STAGE-01"),
            system_actor: ActorId::from_static("system"),
            max_commit_retries: 3,
            erp_enabled: true,
            erp_company_id: "1".to_string(),
            database_url: None,
        }
    }
}

impl EngineConfig {
    /// Load from `LPNFLOW_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, test map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("LPNFLOW_STAGING_LOCATION") {
            config.staging_location =
                LocationId::parse(&value).map_err(|e| ConfigError::Invalid {
                    key: "LPNFLOW_STAGING_LOCATION",
                    reason: e.to_string(),
                })?;
        }
        if let Some(value) = get("LPNFLOW_SYSTEM_ACTOR") {
            config.system_actor = ActorId::parse(&value).map_err(|e| ConfigError::Invalid {
                key: "LPNFLOW_SYSTEM_ACTOR",
                reason: e.to_string(),
            })?;
        }
        if let Some(value) = get("LPNFLOW_MAX_COMMIT_RETRIES") {
            config.max_commit_retries =
                value.trim().parse().map_err(|e| ConfigError::Invalid {
                    key: "LPNFLOW_MAX_COMMIT_RETRIES",
                    reason: format!("{e}"),
                })?;
        }
        if let Some(value) = get("LPNFLOW_ERP_ENABLED") {
            config.erp_enabled = parse_bool(&value).ok_or_else(|| ConfigError::Invalid {
                key: "LPNFLOW_ERP_ENABLED",
                reason: format!("expected true/false, got '{value}'"),
            })?;
        }
        if let Some(value) = get("LPNFLOW_ERP_COMPANY_ID") {
            config.erp_company_id = value.trim().to_string();
        }
        match get("LPNFLOW_DATABASE_URL") {
            Some(url) => config.database_url = Some(url),
            None => tracing::warn!("LPNFLOW_DATABASE_URL not set; using in-memory repository"),
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
