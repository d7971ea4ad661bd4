//! Observation retrieval: fetch, normalize, validate and track provenance.
//!
//! Every failure path resolves to an absent value. A missing lab must never
//! block sibling lookups or reach a formula as a fabricated number.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::{join, join_all};
use medcalc_core::validation::{validate_value, ValidationOutcome, ValidationRule};
use medcalc_core::{
    loinc, units, EhrFeature, NormalizedObservation, ObservationQuery, RuntimeConfig, SortOrder,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::adapter::{initialize_adapter, EhrAdapter};
use crate::cache::ObservationCache;
use crate::client::FhirClient;
use crate::resource::{
    find_component, observation_date, observation_quantity, patient_age_on, patient_gender,
    value_quantity, Quantity,
};
use crate::staleness::{StalenessTracker, WidgetContainer};

/// Page size for history queries.
const HISTORY_COUNT: u32 = 100;
const BP_UNIT: &str = "mmHg";

/// Per-call options for [`ObservationService::get_observation`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationOptions {
    pub skip_cache: bool,
    pub track_staleness: bool,
    pub staleness_label: Option<String>,
    /// Field the staleness record is filed under; defaults to the code.
    pub field_selector: Option<String>,
    pub target_unit: Option<String>,
    /// Unit family, when the code alone does not determine it.
    pub unit_type: Option<String>,
    pub validation_rule: Option<ValidationRule>,
}

impl ObservationOptions {
    /// Convert to `unit`, inferring the family from the code.
    pub fn in_unit(unit: impl Into<String>) -> Self {
        Self {
            target_unit: Some(unit.into()),
            ..Self::default()
        }
    }

    pub fn unit_type(self, family: impl Into<String>) -> Self {
        Self {
            unit_type: Some(family.into()),
            ..self
        }
    }

    pub fn tracked(self, selector: impl Into<String>) -> Self {
        Self {
            track_staleness: true,
            field_selector: Some(selector.into()),
            ..self
        }
    }

    pub fn label(self, label: impl Into<String>) -> Self {
        Self {
            staleness_label: Some(label.into()),
            ..self
        }
    }

    pub fn validated_by(self, rule: ValidationRule) -> Self {
        Self {
            validation_rule: Some(rule),
            ..self
        }
    }

    pub fn skip_cache(self) -> Self {
        Self {
            skip_cache: true,
            ..self
        }
    }
}

/// Outcome of one observation lookup. `value` is `None` whenever the value
/// could not be retrieved or normalized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservationResult {
    pub code: String,
    pub observation: Option<Value>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub original_value: Option<f64>,
    pub original_unit: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub age_in_days: Option<i64>,
    pub validation: Option<ValidationOutcome>,
}

impl ObservationResult {
    fn absent(code: &str) -> Self {
        Self {
            code: code.to_string(),
            observation: None,
            value: None,
            unit: None,
            original_value: None,
            original_unit: None,
            date: None,
            is_stale: false,
            age_in_days: None,
            validation: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn normalized(&self) -> Option<NormalizedObservation> {
        Some(NormalizedObservation {
            value: self.value?,
            unit: self.unit.clone().unwrap_or_default(),
            recorded_at: self.date,
            source_loinc_code: self.code.clone(),
            original_value: self.original_value?,
            original_unit: self.original_unit.clone(),
        })
    }
}

/// Options for [`ObservationService::get_blood_pressure`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BloodPressureOptions {
    pub skip_cache: bool,
    pub track_staleness: bool,
    pub systolic_selector: Option<String>,
    pub diastolic_selector: Option<String>,
}

/// Systolic and diastolic pressure in mmHg.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BloodPressureResult {
    pub systolic: Option<f64>,
    pub diastolic: Option<f64>,
    /// Panel, or the systolic observation when read component by component.
    pub observation: Option<Value>,
    pub date: Option<DateTime<Utc>>,
    pub is_stale: bool,
}

/// Options for [`ObservationService::auto_populate_input`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoPopulateOptions {
    /// Display precision; defaults to the target unit's precision.
    pub decimals: Option<usize>,
    pub target_unit: Option<String>,
    pub unit_type: Option<String>,
    pub label: Option<String>,
    pub skip_staleness: bool,
}

/// One calculator input fed from the EHR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldRequirement {
    /// LOINC code, or alternatives separated by commas.
    pub code: String,
    pub selector: String,
    pub label: String,
    #[serde(default)]
    pub target_unit: Option<String>,
    #[serde(default)]
    pub unit_type: Option<String>,
    #[serde(default)]
    pub decimals: Option<usize>,
}

impl FieldRequirement {
    pub fn new(
        code: impl Into<String>,
        selector: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            selector: selector.into(),
            label: label.into(),
            target_unit: None,
            unit_type: None,
            decimals: None,
        }
    }

    pub fn in_unit(self, unit: impl Into<String>) -> Self {
        Self {
            target_unit: Some(unit.into()),
            ..self
        }
    }

    fn options(&self) -> AutoPopulateOptions {
        AutoPopulateOptions {
            decimals: self.decimals,
            target_unit: self.target_unit.clone(),
            unit_type: self.unit_type.clone(),
            label: Some(self.label.clone()),
            skip_staleness: false,
        }
    }
}

/// Results of populating a whole calculator form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AutoPopulateReport {
    /// Results keyed by field code.
    pub results: BTreeMap<String, ObservationResult>,
    /// Labels of fields whose value was written into the widget, in request
    /// order.
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
}

/// Express `quantity` in `target_unit`.
///
/// The family is `unit_type` or the one registered for `code`. Without a
/// family the value passes only when it is already in `target_unit`.
pub fn normalize_quantity(
    code: &str,
    quantity: &Quantity,
    target_unit: &str,
    unit_type: Option<&str>,
) -> Option<f64> {
    let family = unit_type.or_else(|| loinc::measurement_family(code));
    quantity.unit_candidates().find_map(|unit| match family {
        Some(family) => units::convert(quantity.value, unit, target_unit, family),
        None => (unit.trim() == target_unit.trim() && quantity.value.is_finite())
            .then_some(quantity.value),
    })
}

/// Normalize a single Observation resource outside of any session.
pub fn normalize_observation(
    observation: &Value,
    code: &str,
    target_unit: &str,
    unit_type: Option<&str>,
) -> Option<NormalizedObservation> {
    let quantity = observation_quantity(observation, code)?;
    let value = normalize_quantity(code, &quantity, target_unit, unit_type)?;
    Some(NormalizedObservation {
        value,
        unit: target_unit.to_string(),
        recorded_at: observation_date(observation),
        source_loinc_code: code.to_string(),
        original_value: quantity.value,
        original_unit: quantity.display_unit().map(str::to_string),
    })
}

/// Session-scoped access to the patient's observations.
pub struct ObservationService {
    client: Rc<dyn FhirClient>,
    adapter: Arc<dyn EhrAdapter>,
    tracker: Rc<RefCell<StalenessTracker>>,
    cache: Option<RefCell<ObservationCache>>,
    patient: RefCell<Option<Value>>,
}

impl ObservationService {
    pub fn new(client: Rc<dyn FhirClient>, adapter: Arc<dyn EhrAdapter>) -> Self {
        Self {
            client,
            adapter,
            tracker: Rc::new(RefCell::new(StalenessTracker::default())),
            cache: Some(RefCell::new(ObservationCache::default())),
            patient: RefCell::new(None),
        }
    }

    /// Service for a session bootstrapped from `config`. Also selects the
    /// process-wide adapter.
    pub fn from_config(client: Rc<dyn FhirClient>, config: &RuntimeConfig) -> Self {
        let adapter = initialize_adapter(&config.ehr);
        Self {
            tracker: Rc::new(RefCell::new(StalenessTracker::from_config(
                &config.staleness,
            ))),
            cache: ObservationCache::from_config(&config.cache).map(RefCell::new),
            ..Self::new(client, adapter)
        }
    }

    pub fn with_tracker(self, tracker: StalenessTracker) -> Self {
        Self {
            tracker: Rc::new(RefCell::new(tracker)),
            ..self
        }
    }

    pub fn without_cache(self) -> Self {
        Self {
            cache: None,
            ..self
        }
    }

    pub fn with_patient(self, patient: Value) -> Self {
        *self.patient.borrow_mut() = Some(patient);
        self
    }

    /// Bind the service to the widget it populates.
    pub fn attach(&self, container: Rc<dyn WidgetContainer>) {
        self.tracker.borrow_mut().set_container(container);
    }

    pub fn adapter(&self) -> &Arc<dyn EhrAdapter> {
        &self.adapter
    }

    pub fn tracker(&self) -> Rc<RefCell<StalenessTracker>> {
        Rc::clone(&self.tracker)
    }

    /// Most recent observation for `code`, normalized per `options`.
    pub async fn get_observation(
        &self,
        code: &str,
        options: &ObservationOptions,
    ) -> ObservationResult {
        match self.fetch_most_recent(code, options.skip_cache).await {
            Some(observation) => self.process_observation(code, observation, options),
            None => ObservationResult::absent(code),
        }
    }

    /// Look up several codes concurrently.
    pub async fn get_observations(
        &self,
        codes: &[&str],
        options: &ObservationOptions,
    ) -> BTreeMap<String, ObservationResult> {
        join_all(codes.iter().map(|code| async move {
            (code.to_string(), self.get_observation(code, options).await)
        }))
        .await
        .into_iter()
        .collect()
    }

    /// Every observation of `code`, for trends.
    pub async fn get_all_observations(&self, code: &str, sort: SortOrder) -> Vec<Value> {
        let query = ObservationQuery::most_recent(code)
            .with_sort(sort)
            .with_count(HISTORY_COUNT);
        let url = self.scoped(self.adapter.build_observation_query(&query));
        match self.request(&url).await {
            Some(response) => self.adapter.process_observation_response(&response).entries,
            None => Vec::new(),
        }
    }

    /// Most recent observation as returned by the server, for non-numeric values.
    pub async fn get_raw_observation(&self, code: &str) -> Option<Value> {
        self.fetch_most_recent(code, true).await
    }

    pub async fn get_blood_pressure(&self, options: &BloodPressureOptions) -> BloodPressureResult {
        let mut result = BloodPressureResult::default();

        if self.adapter.supports_feature(EhrFeature::ComponentObservation) {
            if let Some(panel) = self.fetch_most_recent(loinc::BP_PANEL, options.skip_cache).await {
                result.systolic = component_pressure(&panel, loinc::SYSTOLIC_BP);
                result.diastolic = component_pressure(&panel, loinc::DIASTOLIC_BP);
                if result.systolic.is_some() || result.diastolic.is_some() {
                    result.date = observation_date(&panel);
                    result.observation = Some(panel);
                }
            }
        } else {
            debug!(vendor = %self.adapter.vendor(), "component observations unsupported");
        }

        if result.observation.is_none() {
            let (systolic, diastolic) = join(
                self.fetch_most_recent(loinc::SYSTOLIC_BP, options.skip_cache),
                self.fetch_most_recent(loinc::DIASTOLIC_BP, options.skip_cache),
            )
            .await;
            result.systolic = systolic
                .as_ref()
                .and_then(|obs| single_pressure(obs, loinc::SYSTOLIC_BP));
            result.diastolic = diastolic
                .as_ref()
                .and_then(|obs| single_pressure(obs, loinc::DIASTOLIC_BP));
            result.observation = systolic.or(diastolic);
            result.date = result.observation.as_ref().and_then(observation_date);
        }

        if options.track_staleness {
            if let Some(observation) = result.observation.as_ref() {
                let mut tracker = self.tracker.borrow_mut();
                result.is_stale = tracker
                    .check_staleness(observation)
                    .is_some_and(|info| info.is_stale);
                let fields = [
                    (
                        result.systolic,
                        loinc::SYSTOLIC_BP,
                        &options.systolic_selector,
                        "Systolic BP",
                    ),
                    (
                        result.diastolic,
                        loinc::DIASTOLIC_BP,
                        &options.diastolic_selector,
                        "Diastolic BP",
                    ),
                ];
                for (value, code, selector, label) in fields {
                    if value.is_some() {
                        let selector = selector.as_deref().unwrap_or(code);
                        tracker.track_observation(selector, observation, code, Some(label));
                    }
                }
            }
        }

        result
    }

    /// Fetch `code` and write it into the attached widget's `selector` field.
    pub async fn auto_populate_input(
        &self,
        selector: &str,
        code: &str,
        options: &AutoPopulateOptions,
    ) -> ObservationResult {
        self.populate_input(selector, code, options).await.0
    }

    /// Populate every field of a calculator form.
    ///
    /// Blood pressure fields share one panel lookup; other fields are fetched
    /// concurrently. A field counts as loaded only once its value is written.
    pub async fn auto_populate_fields(&self, fields: &[FieldRequirement]) -> AutoPopulateReport {
        let mut results = BTreeMap::new();
        let mut written = BTreeSet::new();

        let is_bp = |field: &&FieldRequirement| {
            field.code == loinc::SYSTOLIC_BP || field.code == loinc::DIASTOLIC_BP
        };
        if fields.iter().any(|field| is_bp(&field)) {
            let bp = self.get_blood_pressure(&BloodPressureOptions::default()).await;
            for field in fields.iter().filter(is_bp) {
                if let Some((result, was_written)) = self.populate_pressure(field, &bp) {
                    if was_written {
                        written.insert(field.code.clone());
                    }
                    results.insert(field.code.clone(), result);
                }
            }
        }

        let remaining: Vec<&FieldRequirement> = fields
            .iter()
            .filter(|field| !results.contains_key(&field.code))
            .collect();
        let populated = join_all(remaining.iter().map(|field| async move {
            let (result, was_written) = self
                .populate_input(&field.selector, &field.code, &field.options())
                .await;
            (field.code.clone(), result, was_written)
        }))
        .await;
        for (code, result, was_written) in populated {
            if was_written {
                written.insert(code.clone());
            }
            results.insert(code, result);
        }

        let (loaded, missing): (Vec<_>, Vec<_>) = fields
            .iter()
            .partition(|field| written.contains(&field.code));
        AutoPopulateReport {
            results,
            loaded: loaded.into_iter().map(|field| field.label.clone()).collect(),
            missing: missing.into_iter().map(|field| field.label.clone()).collect(),
        }
    }

    /// Active conditions matching any of `codes`.
    pub async fn get_conditions(&self, codes: &[&str]) -> Vec<Value> {
        if !self.adapter.supports_feature(EhrFeature::Condition) {
            debug!(vendor = %self.adapter.vendor(), "condition search unsupported");
            return Vec::new();
        }
        let url = self.scoped(self.adapter.build_condition_query(&codes.join(",")));
        self.search_entries(&url).await
    }

    pub async fn has_condition(&self, codes: &[&str]) -> bool {
        !self.get_conditions(codes).await.is_empty()
    }

    /// Active medication orders matching any of `codes`.
    pub async fn get_medications(&self, codes: &[&str]) -> Vec<Value> {
        if !self.adapter.supports_feature(EhrFeature::MedicationRequest) {
            debug!(vendor = %self.adapter.vendor(), "medication search unsupported");
            return Vec::new();
        }
        let url = self.scoped(self.adapter.build_medication_query(&codes.join(",")));
        self.search_entries(&url).await
    }

    pub async fn is_on_medication(&self, codes: &[&str]) -> bool {
        !self.get_medications(codes).await.is_empty()
    }

    /// Warm the cache for `codes`.
    pub async fn prefetch(&self, codes: &[&str]) {
        join_all(codes.iter().map(|code| self.fetch_most_recent(code, false))).await;
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.borrow_mut().clear();
        }
    }

    /// Read the launch patient's resource into the session.
    pub async fn load_patient(&self) -> Option<Value> {
        let id = self.client.patient_id()?;
        let url = self.adapter.patient_request_url(&format!("Patient/{id}"));
        let patient = self.request(&url).await?;
        *self.patient.borrow_mut() = Some(patient.clone());
        Some(patient)
    }

    pub fn patient_age(&self) -> Option<u32> {
        self.patient_age_on(Utc::now().date_naive())
    }

    pub fn patient_age_on(&self, today: NaiveDate) -> Option<u32> {
        self.patient
            .borrow()
            .as_ref()
            .and_then(|patient| patient_age_on(patient, today))
    }

    pub fn patient_gender(&self) -> Option<String> {
        self.patient.borrow().as_ref().and_then(patient_gender)
    }

    fn scoped(&self, url: String) -> String {
        match self.client.patient_id() {
            Some(id) => format!("{url}&patient={id}"),
            None => url,
        }
    }

    async fn request(&self, url: &str) -> Option<Value> {
        match self.client.request(url).await {
            Ok(response) => Some(response),
            Err(err) => {
                error!(%err, query = url, "FHIR request failed");
                None
            }
        }
    }

    async fn search_entries(&self, url: &str) -> Vec<Value> {
        match self.request(url).await {
            Some(response) => self.adapter.process_observation_response(&response).entries,
            None => Vec::new(),
        }
    }

    async fn fetch_most_recent(&self, code: &str, skip_cache: bool) -> Option<Value> {
        let url = self.scoped(
            self.adapter
                .build_observation_query(&ObservationQuery::most_recent(code)),
        );

        if !skip_cache {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.borrow().get(&url, Utc::now()) {
                    debug!(code, "observation served from cache");
                    return Some(hit.clone());
                }
            }
        }

        let response = self.request(&url).await?;
        let first = self
            .adapter
            .process_observation_response(&response)
            .entries
            .into_iter()
            .next();
        let Some(observation) = first else {
            debug!(code, "no observation found");
            return None;
        };

        if let Some(cache) = &self.cache {
            cache.borrow_mut().insert(url, observation.clone(), Utc::now());
        }
        Some(observation)
    }

    fn process_observation(
        &self,
        code: &str,
        observation: Value,
        options: &ObservationOptions,
    ) -> ObservationResult {
        let mut result = ObservationResult::absent(code);
        result.date = observation_date(&observation);

        let Some(quantity) = observation_quantity(&observation, code) else {
            debug!(code, "observation has no numeric value");
            result.observation = Some(observation);
            return result;
        };
        result.original_value = Some(quantity.value);
        result.original_unit = quantity.display_unit().map(str::to_string);

        let value = match options.target_unit.as_deref() {
            None => {
                result.unit = result.original_unit.clone();
                quantity.value
            }
            Some(target) => {
                match normalize_quantity(code, &quantity, target, options.unit_type.as_deref()) {
                    Some(value) => {
                        result.unit = Some(target.to_string());
                        value
                    }
                    None => {
                        warn!(
                            code,
                            unit = quantity.display_unit().unwrap_or(""),
                            target,
                            "observation unit cannot be converted, treating as missing"
                        );
                        result.observation = Some(observation);
                        return result;
                    }
                }
            }
        };
        result.value = Some(value);

        if let Some(rule) = &options.validation_rule {
            let outcome = validate_value(Some(value), rule);
            if !outcome.is_valid || !outcome.warnings.is_empty() {
                warn!(code, value, "observation flagged by validation rule");
            }
            result.validation = Some(outcome);
        }

        if options.track_staleness {
            let selector = options.field_selector.as_deref().unwrap_or(code);
            let mut tracker = self.tracker.borrow_mut();
            if let Some(info) = tracker.check_staleness(&observation) {
                result.is_stale = info.is_stale;
                result.age_in_days = Some(info.age_in_days);
            }
            tracker.track_observation(
                selector,
                &observation,
                code,
                options.staleness_label.as_deref(),
            );
        }

        result.observation = Some(observation);
        result
    }

    /// Lookup plus field write. The flag reports whether the widget took the
    /// value.
    async fn populate_input(
        &self,
        selector: &str,
        code: &str,
        options: &AutoPopulateOptions,
    ) -> (ObservationResult, bool) {
        let lookup = ObservationOptions {
            target_unit: options.target_unit.clone(),
            unit_type: options.unit_type.clone(),
            ..ObservationOptions::default()
        };
        let mut result = self.get_observation(code, &lookup).await;

        let (Some(value), Some(observation)) = (result.value, result.observation.as_ref()) else {
            return (result, false);
        };
        let decimals = options.decimals.unwrap_or_else(|| {
            display_decimals(code, result.unit.as_deref(), options.unit_type.as_deref())
        });
        if !self.write_field(selector, &format!("{value:.decimals$}")) {
            return (result, false);
        }

        if !options.skip_staleness {
            let info = self.tracker.borrow_mut().track_observation(
                selector,
                observation,
                code,
                options.label.as_deref(),
            );
            if let Some(info) = info {
                result.is_stale = info.is_stale;
                result.age_in_days = Some(info.age_in_days);
            }
        }
        (result, true)
    }

    fn write_field(&self, selector: &str, text: &str) -> bool {
        let container = self.tracker.borrow().container();
        match container {
            Some(container) if container.is_attached() => container.set_field_value(selector, text),
            _ => {
                debug!(selector, "widget detached, value not written");
                false
            }
        }
    }

    fn populate_pressure(
        &self,
        field: &FieldRequirement,
        bp: &BloodPressureResult,
    ) -> Option<(ObservationResult, bool)> {
        let value = if field.code == loinc::SYSTOLIC_BP {
            bp.systolic?
        } else {
            bp.diastolic?
        };
        let observation = bp.observation.as_ref()?;
        let decimals = field.decimals.unwrap_or(0);
        let written = self.write_field(&field.selector, &format!("{value:.decimals$}"));
        let info = if written {
            self.tracker.borrow_mut().track_observation(
                &field.selector,
                observation,
                &field.code,
                Some(&field.label),
            )
        } else {
            None
        };
        let result = ObservationResult {
            code: field.code.clone(),
            observation: Some(observation.clone()),
            value: Some(value),
            unit: Some(BP_UNIT.to_string()),
            original_value: Some(value),
            original_unit: Some(BP_UNIT.to_string()),
            date: bp.date,
            is_stale: info.as_ref().is_some_and(|info| info.is_stale),
            age_in_days: info.map(|info| info.age_in_days),
            validation: None,
        };
        Some((result, written))
    }
}

fn component_pressure(panel: &Value, code: &str) -> Option<f64> {
    let quantity = find_component(panel, code).and_then(value_quantity)?;
    normalize_quantity(code, &quantity, BP_UNIT, Some("pressure"))
}

fn single_pressure(observation: &Value, code: &str) -> Option<f64> {
    let quantity = observation_quantity(observation, code)?;
    normalize_quantity(code, &quantity, BP_UNIT, Some("pressure"))
}

fn display_decimals(code: &str, unit: Option<&str>, unit_type: Option<&str>) -> usize {
    match (unit_type.or_else(|| loinc::measurement_family(code)), unit) {
        (Some(family), Some(unit)) => units::decimal_places(family, unit),
        _ => 1,
    }
}
