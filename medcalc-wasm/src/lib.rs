//! Framework-neutral WASM <-> JavaScript bridge for the normalization layer.

use std::collections::HashMap;
use std::sync::Arc;

use medcalc_core::units;
use medcalc_core::validation::{
    validate_calculator_input, validation_rule, ValidationRule, ValidationSchema,
};
use medcalc_core::{ClinicalDataError, EhrFeature, ObservationQuery, RuntimeConfig, SortOrder};
use medcalc_fhir::{active_adapter, adapter_for_tag, initialize_adapter, EhrAdapter};
use serde::{Deserialize, Serialize};
use serde_wasm_bindgen::{from_value, Serializer};
use wasm_bindgen::prelude::*;

mod session;

pub use session::ObservationSession;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsRuntimeConfig {
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    fhir_base_url: Option<String>,
    #[serde(default)]
    staleness_threshold_days: Option<u32>,
    #[serde(default)]
    cache_enabled: Option<bool>,
    #[serde(default)]
    cache_ttl_seconds: Option<u64>,
}

impl From<JsRuntimeConfig> for RuntimeConfig {
    fn from(cfg: JsRuntimeConfig) -> Self {
        let mut base = RuntimeConfig::default();
        if let Some(vendor) = cfg.vendor {
            base.ehr.vendor = vendor;
        }
        if cfg.client_id.is_some() {
            base.ehr.client_id = cfg.client_id;
        }
        if cfg.fhir_base_url.is_some() {
            base.ehr.fhir_base_url = cfg.fhir_base_url;
        }
        if let Some(days) = cfg.staleness_threshold_days {
            base.staleness.threshold_days = days;
        }
        if let Some(enabled) = cfg.cache_enabled {
            base.cache.enabled = enabled;
        }
        if let Some(ttl) = cfg.cache_ttl_seconds {
            base.cache.ttl_seconds = ttl;
        }
        base
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsObservationQuery {
    code: String,
    #[serde(default)]
    count: Option<u32>,
    #[serde(default)]
    sort: Option<SortOrder>,
    #[serde(default)]
    date_filter: Option<String>,
}

impl From<JsObservationQuery> for ObservationQuery {
    fn from(js: JsObservationQuery) -> Self {
        let mut query = ObservationQuery::most_recent(js.code);
        if let Some(count) = js.count {
            query = query.with_count(count);
        }
        if let Some(sort) = js.sort {
            query = query.with_sort(sort);
        }
        if let Some(filter) = js.date_filter {
            query = query.with_date_filter(filter);
        }
        query
    }
}

/// One schema entry: either a built-in rule kind or a full rule object.
#[derive(Deserialize)]
struct JsSchemaField {
    name: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    rule: Option<ValidationRule>,
}

/// Apply a runtime configuration and install the matching adapter.
///
/// Returns the resolved configuration with defaults filled in.
#[wasm_bindgen(js_name = configureRuntime)]
pub fn configure_runtime(config: Option<JsValue>) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let cfg = read_runtime_config(config)?;
    initialize_adapter(&cfg.ehr);
    to_js(&cfg)
}

pub(crate) fn read_runtime_config(config: Option<JsValue>) -> Result<RuntimeConfig, JsValue> {
    match config {
        Some(js_cfg) => {
            let cfg: JsRuntimeConfig = from_value(js_cfg)
                .map_err(|err| JsValue::from_str(&format!("Could not read config: {err}")))?;
            Ok(RuntimeConfig::from(cfg))
        }
        None => Ok(RuntimeConfig::default()),
    }
}

#[wasm_bindgen(js_name = buildObservationQuery)]
pub fn build_observation_query(query: JsValue, vendor: Option<String>) -> Result<String, JsValue> {
    init_panic_hook();

    let query: JsObservationQuery = from_value(query)
        .map_err(|err| JsValue::from_str(&format!("Could not read query: {err}")))?;
    Ok(adapter(vendor).build_observation_query(&query.into()))
}

#[wasm_bindgen(js_name = processObservationResponse)]
pub fn process_observation_response(
    response: JsValue,
    vendor: Option<String>,
) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let response = from_value::<serde_json::Value>(response)
        .map_err(|err| JsValue::from_str(&format!("Could not read FHIR response: {err}")))?;
    to_js(&adapter(vendor).process_observation_response(&response))
}

/// Convert between two units of `family`; `undefined` when either unit is
/// unknown to the family.
#[wasm_bindgen(js_name = convertUnit)]
pub fn convert_unit(value: f64, from: &str, to: &str, family: &str) -> Option<f64> {
    units::convert(value, from, to, family)
}

/// `values` maps input names to numbers (or null); `schema` is an ordered
/// array of `{name, kind}` or `{name, rule}` entries.
#[wasm_bindgen(js_name = validateCalculatorInput)]
pub fn validate_calculator_input_js(values: JsValue, schema: JsValue) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let values: HashMap<String, Option<f64>> = from_value(values)
        .map_err(|err| JsValue::from_str(&format!("Could not read input values: {err}")))?;
    let fields: Vec<JsSchemaField> = from_value(schema)
        .map_err(|err| JsValue::from_str(&format!("Could not read schema: {err}")))?;
    let schema = build_schema(fields).map_err(format_error)?;

    to_js(&validate_calculator_input(&values, &schema))
}

/// Normalize one Observation resource; `null` when it has no usable value in
/// `targetUnit`.
#[wasm_bindgen(js_name = normalizeObservation)]
pub fn normalize_observation(
    observation: JsValue,
    code: &str,
    target_unit: &str,
    unit_type: Option<String>,
) -> Result<JsValue, JsValue> {
    init_panic_hook();

    let observation = from_value::<serde_json::Value>(observation)
        .map_err(|err| JsValue::from_str(&format!("Could not read observation: {err}")))?;
    let normalized =
        medcalc_fhir::normalize_observation(&observation, code, target_unit, unit_type.as_deref());
    to_js(&normalized)
}

#[wasm_bindgen(js_name = supportsFeature)]
pub fn supports_feature(feature: &str, vendor: Option<String>) -> Result<bool, JsValue> {
    let feature: EhrFeature = feature.parse().map_err(format_error)?;
    Ok(adapter(vendor).supports_feature(feature))
}

fn adapter(vendor: Option<String>) -> Arc<dyn EhrAdapter> {
    match vendor {
        Some(tag) => adapter_for_tag(&tag),
        None => active_adapter(),
    }
}

fn build_schema(fields: Vec<JsSchemaField>) -> Result<ValidationSchema, ClinicalDataError> {
    fields.into_iter().try_fold(ValidationSchema::new(), |schema, field| {
        let rule = match (field.rule, field.kind) {
            (Some(rule), _) => rule,
            (None, Some(kind)) => validation_rule(&kind).cloned().ok_or_else(|| {
                ClinicalDataError::Config(format!("no validation rule named '{kind}'"))
            })?,
            (None, None) => {
                return Err(ClinicalDataError::Config(format!(
                    "schema field '{}' needs a kind or a rule",
                    field.name
                )))
            }
        };
        Ok(schema.field(field.name, rule))
    })
}

/// Plain JS objects rather than `Map`s, so results read like JSON.
pub(crate) fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    value
        .serialize(&Serializer::json_compatible())
        .map_err(|err| JsValue::from_str(&format!("Could not serialize result: {err}")))
}

pub(crate) fn format_error(err: ClinicalDataError) -> JsValue {
    JsValue::from_str(&format!("Clinical data error: {err}"))
}

pub(crate) fn init_panic_hook() {
    #[cfg(target_arch = "wasm32")]
    console_error_panic_hook::set_once();
}
