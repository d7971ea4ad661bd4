//! Core data model for normalizing clinical observations pulled from EHRs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod config;
pub mod loinc;
pub mod units;
pub mod validation;

pub use config::{AuthConfig, CacheConfig, EhrConfig, RuntimeConfig, StalenessConfig};

/// EHR vendor backing the current session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum EhrVendor {
    #[default]
    Generic,
    Epic,
    Cerner,
    Meditech,
}

impl EhrVendor {
    /// Every vendor with a registered adapter.
    pub const ALL: [EhrVendor; 4] = [
        EhrVendor::Generic,
        EhrVendor::Epic,
        EhrVendor::Cerner,
        EhrVendor::Meditech,
    ];

    /// Lowercase tag used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            EhrVendor::Generic => "generic",
            EhrVendor::Epic => "epic",
            EhrVendor::Cerner => "cerner",
            EhrVendor::Meditech => "meditech",
        }
    }
}

impl fmt::Display for EhrVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EhrVendor {
    type Err = ClinicalDataError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "generic" => Ok(EhrVendor::Generic),
            "epic" => Ok(EhrVendor::Epic),
            "cerner" | "oracle" => Ok(EhrVendor::Cerner),
            "meditech" => Ok(EhrVendor::Meditech),
            other => Err(ClinicalDataError::UnknownVendor(other.to_string())),
        }
    }
}

/// Optional FHIR capabilities that differ between vendors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EhrFeature {
    TextSearch,
    DateFilter,
    ComponentObservation,
    BulkData,
    OfflineAccess,
    AuditEvent,
    Provenance,
    MedicationRequest,
    Condition,
}

impl EhrFeature {
    pub const ALL: [EhrFeature; 9] = [
        EhrFeature::TextSearch,
        EhrFeature::DateFilter,
        EhrFeature::ComponentObservation,
        EhrFeature::BulkData,
        EhrFeature::OfflineAccess,
        EhrFeature::AuditEvent,
        EhrFeature::Provenance,
        EhrFeature::MedicationRequest,
        EhrFeature::Condition,
    ];

    /// Kebab-case name as used by the JavaScript widgets.
    pub fn as_str(&self) -> &'static str {
        match self {
            EhrFeature::TextSearch => "text-search",
            EhrFeature::DateFilter => "date-filter",
            EhrFeature::ComponentObservation => "component-observation",
            EhrFeature::BulkData => "bulk-data",
            EhrFeature::OfflineAccess => "offline-access",
            EhrFeature::AuditEvent => "audit-event",
            EhrFeature::Provenance => "provenance",
            EhrFeature::MedicationRequest => "medication-request",
            EhrFeature::Condition => "condition",
        }
    }
}

impl FromStr for EhrFeature {
    type Err = ClinicalDataError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EhrFeature::ALL
            .into_iter()
            .find(|feature| feature.as_str() == name.trim())
            .ok_or_else(|| ClinicalDataError::Parse(format!("unknown EHR feature '{name}'")))
    }
}

/// Ordering requested from the FHIR search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    MostRecent,
    Oldest,
}

impl SortOrder {
    /// Value of the `_sort` search parameter.
    pub fn as_search_param(&self) -> &'static str {
        match self {
            SortOrder::MostRecent => "-date",
            SortOrder::Oldest => "date",
        }
    }
}

/// Vendor-agnostic description of an Observation search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservationQuery {
    /// LOINC code, or several alternative codes separated by commas.
    pub code: String,
    /// Maximum number of entries, never below one.
    pub count: u32,
    pub sort: SortOrder,
    /// FHIR date search value such as `ge2024-01-01`.
    pub date_filter: Option<String>,
}

impl ObservationQuery {
    /// Query for the single most recent observation of `code`.
    pub fn most_recent(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            count: 1,
            sort: SortOrder::MostRecent,
            date_filter: None,
        }
    }

    pub fn with_count(self, count: u32) -> Self {
        Self {
            count: count.max(1),
            ..self
        }
    }

    pub fn with_sort(self, sort: SortOrder) -> Self {
        Self { sort, ..self }
    }

    pub fn with_date_filter(self, filter: impl Into<String>) -> Self {
        Self {
            date_filter: Some(filter.into()),
            ..self
        }
    }

    /// Individual codes of a comma-separated code list.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.code
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

/// Adapted search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObservationQueryResult {
    /// Payload exactly as returned by the vendor.
    pub raw_response: Value,
    /// `entry[].resource` objects in server order.
    pub entries: Vec<Value>,
}

impl ObservationQueryResult {
    /// First entry, most recent by the adapter ordering contract.
    pub fn first(&self) -> Option<&Value> {
        self.entries.first()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Observation whose value has been expressed in the requested unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NormalizedObservation {
    pub value: f64,
    pub unit: String,
    pub recorded_at: Option<DateTime<Utc>>,
    pub source_loinc_code: String,
    /// Value as reported by the EHR before conversion.
    pub original_value: f64,
    pub original_unit: Option<String>,
}

/// Provenance of one auto-populated form field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StalenessRecord {
    pub field_selector: String,
    pub observation_timestamp: DateTime<Utc>,
    pub loinc_code: String,
    pub label: String,
}

/// Errors surfaced by the normalization layer and its collaborators.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClinicalDataError {
    #[error("FHIR request failed: {0}")]
    Transport(String),
    #[error("Could not read FHIR payload: {0}")]
    Parse(String),
    #[error("Unknown EHR vendor '{0}'")]
    UnknownVendor(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Invalid calculator input: {0}")]
    Validation(String),
}
