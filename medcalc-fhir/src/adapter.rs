//! Vendor adapters hiding EHR-specific FHIR quirks.
//!
//! Every vendor speaks "FHIR R4" with its own dialect: code-system prefixes,
//! missing search parameters, different refresh-token scopes. The trait's
//! default methods describe the standard behaviour and each vendor overrides
//! only what differs.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use medcalc_core::{
    AuthConfig, EhrConfig, EhrFeature, EhrVendor, ObservationQuery, ObservationQueryResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const LOINC_SYSTEM: &str = "http://loinc.org";
const DEFAULT_REDIRECT_URI: &str = "./index.html";

const STANDARD_SCOPES: &[&str] = &[
    "openid",
    "fhirUser",
    "launch",
    "launch/patient",
    "offline_access",
    "user/Patient.rs",
    "user/Observation.rs",
    "user/Condition.rs",
    "user/MedicationRequest.rs",
];

/// Parameters for the SMART authorization redirect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AuthorizationParams {
    pub client_id: String,
    pub scope: String,
    pub redirect_uri: String,
    pub extra_params: BTreeMap<String, String>,
}

/// Vendor-specific translation between the service and a FHIR server.
pub trait EhrAdapter: Send + Sync {
    fn vendor(&self) -> EhrVendor;

    /// Vendor form of a LOINC code or comma-separated code list.
    ///
    /// Must be idempotent: transforming an already transformed code returns it
    /// unchanged.
    fn transform_code(&self, loinc: &str) -> String {
        loinc.to_string()
    }

    fn build_observation_query(&self, query: &ObservationQuery) -> String {
        let mut url = format!(
            "Observation?code={}&_sort={}&_count={}",
            self.transform_code(&query.code),
            query.sort.as_search_param(),
            query.count.max(1)
        );
        if let Some(filter) = query.date_filter.as_deref().filter(|f| !f.is_empty()) {
            if self.supports_feature(EhrFeature::DateFilter) {
                url.push_str("&date=");
                url.push_str(filter);
            } else {
                debug!(
                    vendor = %self.vendor(),
                    filter, "date filter unsupported, dropping it from query"
                );
            }
        }
        url
    }

    /// Active conditions carrying any of the comma-separated `codes`.
    fn build_condition_query(&self, codes: &str) -> String {
        format!("Condition?clinical-status=active&code={codes}")
    }

    /// Active medication orders for any of the comma-separated `codes`.
    fn build_medication_query(&self, codes: &str) -> String {
        format!("MedicationRequest?status=active&code={codes}")
    }

    /// Adapt a search response. Never fails: anything malformed yields no
    /// entries.
    fn process_observation_response(&self, response: &Value) -> ObservationQueryResult {
        let entries = match response.get("entry").and_then(Value::as_array) {
            Some(entries) => entries
                .iter()
                .filter_map(|entry| entry.get("resource"))
                .filter(|resource| resource.is_object())
                .cloned()
                .collect(),
            None => {
                if !response.is_null() && response.get("resourceType").is_none() {
                    debug!(vendor = %self.vendor(), "response is not a FHIR resource");
                }
                Vec::new()
            }
        };
        ObservationQueryResult {
            raw_response: response.clone(),
            entries,
        }
    }

    fn default_scopes(&self) -> Vec<&'static str> {
        STANDARD_SCOPES.to_vec()
    }

    /// Vendor additions to the authorization request.
    fn vendor_auth_params(&self, _config: &AuthConfig) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn authorization_params(&self, config: &AuthConfig) -> AuthorizationParams {
        let scope = config
            .scope
            .clone()
            .filter(|scope| !scope.trim().is_empty())
            .unwrap_or_else(|| self.default_scopes().join(" "));
        let redirect_uri = config
            .redirect_uri
            .clone()
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());

        let mut extra_params = config.extra_params.clone();
        extra_params.extend(self.vendor_auth_params(config));

        AuthorizationParams {
            client_id: config.client_id.clone(),
            scope,
            redirect_uri,
            extra_params,
        }
    }

    fn patient_request_url(&self, base_url: &str) -> String {
        base_url.to_string()
    }

    fn supports_feature(&self, _feature: EhrFeature) -> bool {
        true
    }
}

/// Standards-conformant FHIR R4 server.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericAdapter;

impl EhrAdapter for GenericAdapter {
    fn vendor(&self) -> EhrVendor {
        EhrVendor::Generic
    }
}

/// Epic requires system-qualified codes and an `aud` parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpicAdapter;

impl EhrAdapter for EpicAdapter {
    fn vendor(&self) -> EhrVendor {
        EhrVendor::Epic
    }

    fn transform_code(&self, loinc: &str) -> String {
        loinc
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| {
                if code.contains('|') {
                    code.to_string()
                } else {
                    format!("{LOINC_SYSTEM}|{code}")
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn default_scopes(&self) -> Vec<&'static str> {
        STANDARD_SCOPES
            .iter()
            .copied()
            .filter(|scope| *scope != "offline_access")
            .collect()
    }

    fn vendor_auth_params(&self, config: &AuthConfig) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if let Some(base_url) = config.fhir_base_url.as_deref() {
            params.insert("aud".to_string(), base_url.to_string());
        }
        params
    }

    fn supports_feature(&self, feature: EhrFeature) -> bool {
        !matches!(
            feature,
            EhrFeature::TextSearch
                | EhrFeature::OfflineAccess
                | EhrFeature::AuditEvent
                | EhrFeature::BulkData
        )
    }
}

/// Cerner (Oracle Health) issues online rather than offline refresh tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct CernerAdapter;

impl EhrAdapter for CernerAdapter {
    fn vendor(&self) -> EhrVendor {
        EhrVendor::Cerner
    }

    fn default_scopes(&self) -> Vec<&'static str> {
        STANDARD_SCOPES
            .iter()
            .map(|scope| match *scope {
                "offline_access" => "online_access",
                other => other,
            })
            .collect()
    }

    fn supports_feature(&self, feature: EhrFeature) -> bool {
        !matches!(
            feature,
            EhrFeature::TextSearch
                | EhrFeature::OfflineAccess
                | EhrFeature::BulkData
                | EhrFeature::AuditEvent
        )
    }
}

/// MEDITECH Expanse exposes a narrow read-only surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeditechAdapter;

impl EhrAdapter for MeditechAdapter {
    fn vendor(&self) -> EhrVendor {
        EhrVendor::Meditech
    }

    fn default_scopes(&self) -> Vec<&'static str> {
        STANDARD_SCOPES
            .iter()
            .copied()
            .filter(|scope| *scope != "offline_access")
            .collect()
    }

    fn supports_feature(&self, feature: EhrFeature) -> bool {
        matches!(
            feature,
            EhrFeature::ComponentObservation | EhrFeature::Condition | EhrFeature::MedicationRequest
        )
    }
}

/// Adapter for `vendor`.
pub fn create_adapter(vendor: EhrVendor) -> Arc<dyn EhrAdapter> {
    match vendor {
        EhrVendor::Generic => Arc::new(GenericAdapter),
        EhrVendor::Epic => Arc::new(EpicAdapter),
        EhrVendor::Cerner => Arc::new(CernerAdapter),
        EhrVendor::Meditech => Arc::new(MeditechAdapter),
    }
}

/// Adapter for a configuration tag. Unknown tags fall back to the generic
/// adapter.
pub fn adapter_for_tag(tag: &str) -> Arc<dyn EhrAdapter> {
    match tag.parse::<EhrVendor>() {
        Ok(vendor) => create_adapter(vendor),
        Err(err) => {
            warn!(%err, "falling back to generic EHR adapter");
            create_adapter(EhrVendor::Generic)
        }
    }
}

static ACTIVE_ADAPTER: RwLock<Option<Arc<dyn EhrAdapter>>> = RwLock::new(None);

/// Select the process-wide adapter from configuration.
pub fn initialize_adapter(config: &EhrConfig) -> Arc<dyn EhrAdapter> {
    let adapter = adapter_for_tag(&config.vendor);
    let mut slot = ACTIVE_ADAPTER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *slot = Some(Arc::clone(&adapter));
    debug!(vendor = %adapter.vendor(), "EHR adapter initialized");
    adapter
}

/// The process-wide adapter, generic until [`initialize_adapter`] runs.
pub fn active_adapter() -> Arc<dyn EhrAdapter> {
    let slot = ACTIVE_ADAPTER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    match slot.as_ref() {
        Some(adapter) => Arc::clone(adapter),
        None => create_adapter(EhrVendor::Generic),
    }
}
