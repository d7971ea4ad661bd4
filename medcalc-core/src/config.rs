//! Runtime configuration read once when a session starts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ClinicalDataError;

/// Top-level configuration record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    pub ehr: EhrConfig,
    pub staleness: StalenessConfig,
    pub cache: CacheConfig,
}

impl RuntimeConfig {
    /// Parse a JSON configuration, filling missing sections with defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ClinicalDataError> {
        serde_json::from_str(input).map_err(|err| ClinicalDataError::Config(err.to_string()))
    }
}

/// EHR connection settings. Only `vendor` drives adapter selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EhrConfig {
    /// Free-form vendor tag; unknown tags fall back to the generic adapter.
    pub vendor: String,
    pub client_id: Option<String>,
    pub fhir_base_url: Option<String>,
    pub scope: Option<String>,
    pub redirect_uri: Option<String>,
}

impl Default for EhrConfig {
    fn default() -> Self {
        Self {
            vendor: "generic".to_string(),
            client_id: None,
            fhir_base_url: None,
            scope: None,
            redirect_uri: None,
        }
    }
}

impl EhrConfig {
    /// Authorization request settings derived from this record.
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            client_id: self.client_id.clone().unwrap_or_default(),
            scope: self.scope.clone(),
            redirect_uri: self.redirect_uri.clone(),
            fhir_base_url: self.fhir_base_url.clone(),
            extra_params: BTreeMap::new(),
        }
    }
}

/// Caller overrides for the SMART authorization request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub client_id: String,
    pub scope: Option<String>,
    pub redirect_uri: Option<String>,
    pub fhir_base_url: Option<String>,
    pub extra_params: BTreeMap<String, String>,
}

/// Age threshold beyond which a value is flagged as stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StalenessConfig {
    pub threshold_days: u32,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self { threshold_days: 90 }
    }
}

/// Per-session observation cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
        }
    }
}
