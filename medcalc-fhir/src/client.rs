//! FHIR client seam and an in-memory implementation over a resource set.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use medcalc_core::ClinicalDataError;
use serde_json::{json, Value};

use crate::resource::{
    concept_has_code, extract_datetime, observation_date, parse_datetime, split_codes,
};

/// Authenticated FHIR connection scoped to the launch patient.
///
/// Implementations run on a single-threaded executor, so futures need not be
/// `Send`.
#[async_trait(?Send)]
pub trait FhirClient {
    /// Id of the patient in context, if the launch provided one.
    fn patient_id(&self) -> Option<String>;

    /// Issue a relative GET such as `Observation?code=...` and return the JSON
    /// body.
    async fn request(&self, query: &str) -> Result<Value, ClinicalDataError>;
}

/// Answers searches from resources held in memory.
///
/// Supports the parameters the observation service emits: `code`, `_sort`,
/// `_count`, `date`, `patient`, `status` and `clinical-status`.
#[derive(Debug, Default)]
pub struct MemoryFhirClient {
    patient_id: Option<String>,
    resources: Vec<Value>,
    failing_codes: BTreeSet<String>,
    requests: RefCell<Vec<String>>,
}

impl MemoryFhirClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `entry[].resource` of a Bundle.
    pub fn from_bundle(bundle: &Value) -> Result<Self, ClinicalDataError> {
        let bundle_type = bundle
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| ClinicalDataError::Parse("missing resourceType".into()))?;
        if bundle_type != "Bundle" {
            return Err(ClinicalDataError::Parse(format!(
                "Expected resourceType Bundle, received {bundle_type}"
            )));
        }

        let resources = bundle
            .get("entry")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("resource"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            resources,
            ..Self::default()
        })
    }

    pub fn with_patient_id(mut self, id: impl Into<String>) -> Self {
        self.patient_id = Some(id.into());
        self
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resources.push(resource);
        self
    }

    /// Make every search mentioning `code` fail with a transport error.
    pub fn failing_for(mut self, code: impl Into<String>) -> Self {
        self.failing_codes.insert(code.into());
        self
    }

    /// Queries received so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }

    fn search(&self, resource_type: &str, params: &[(&str, &str)]) -> Value {
        let mut matches: Vec<&Value> = self
            .resources
            .iter()
            .filter(|resource| {
                resource.get("resourceType").and_then(Value::as_str) == Some(resource_type)
            })
            .filter(|resource| {
                params
                    .iter()
                    .all(|(name, value)| matches_param(resource, name, value))
            })
            .collect();

        if let Some((_, sort)) = params.iter().find(|(name, _)| *name == "_sort") {
            let descending = sort.starts_with('-');
            matches.sort_by(|a, b| {
                let ordering = compare_dates(resource_date(a), resource_date(b));
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let total = matches.len();
        if let Some(count) = params
            .iter()
            .find(|(name, _)| *name == "_count")
            .and_then(|(_, count)| count.parse::<usize>().ok())
        {
            matches.truncate(count);
        }

        let entries: Vec<Value> = matches
            .into_iter()
            .map(|resource| {
                let id = resource.get("id").and_then(Value::as_str).unwrap_or("unknown");
                json!({
                    "fullUrl": format!("{resource_type}/{id}"),
                    "resource": resource,
                })
            })
            .collect();

        json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "total": total,
            "entry": entries,
        })
    }

    fn read(&self, resource_type: &str, id: &str) -> Result<Value, ClinicalDataError> {
        self.resources
            .iter()
            .find(|resource| {
                resource.get("resourceType").and_then(Value::as_str) == Some(resource_type)
                    && resource.get("id").and_then(Value::as_str) == Some(id)
            })
            .cloned()
            .ok_or_else(|| ClinicalDataError::Transport(format!("{resource_type}/{id} not found")))
    }
}

#[async_trait(?Send)]
impl FhirClient for MemoryFhirClient {
    fn patient_id(&self) -> Option<String> {
        self.patient_id.clone()
    }

    async fn request(&self, query: &str) -> Result<Value, ClinicalDataError> {
        self.requests.borrow_mut().push(query.to_string());

        let (path, query_string) = query.split_once('?').unwrap_or((query, ""));
        let params: Vec<(&str, &str)> = query_string
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .collect();

        if let Some((_, codes)) = params.iter().find(|(name, _)| *name == "code") {
            if let Some(code) = split_codes(codes).find(|code| self.failing_codes.contains(*code)) {
                return Err(ClinicalDataError::Transport(format!(
                    "connection reset while fetching {code}"
                )));
            }
        }

        match path.split_once('/') {
            Some((resource_type, id)) => self.read(resource_type, id),
            None => Ok(self.search(path, &params)),
        }
    }
}

fn matches_param(resource: &Value, name: &str, value: &str) -> bool {
    match name {
        "code" => ["code", "medicationCodeableConcept"]
            .iter()
            .filter_map(|field| resource.get(*field))
            .any(|concept| concept_has_code(concept, value)),
        "patient" | "subject" => resource
            .get("subject")
            .and_then(|subject| subject.get("reference"))
            .and_then(Value::as_str)
            .is_some_and(|reference| {
                reference == value || reference.strip_prefix("Patient/") == Some(value)
            }),
        "date" => match_date(resource_date(resource), value),
        "status" => resource.get("status").and_then(Value::as_str) == Some(value),
        "clinical-status" => resource
            .get("clinicalStatus")
            .is_some_and(|concept| concept_has_code(concept, value)),
        _ => true,
    }
}

fn match_date(date: Option<DateTime<Utc>>, filter: &str) -> bool {
    let (prefix, rest) = match filter.get(..2) {
        Some(prefix @ ("ge" | "le" | "gt" | "lt" | "eq")) => (prefix, &filter[2..]),
        _ => ("eq", filter),
    };
    let (Some(date), Some(bound)) = (date, parse_datetime(rest)) else {
        return false;
    };
    match prefix {
        "ge" => date >= bound,
        "le" => date <= bound,
        "gt" => date > bound,
        "lt" => date < bound,
        _ => date.date_naive() == bound.date_naive(),
    }
}

fn resource_date(resource: &Value) -> Option<DateTime<Utc>> {
    match resource.get("resourceType").and_then(Value::as_str) {
        Some("Observation") => observation_date(resource),
        Some("Condition") => extract_datetime(resource, &["recordedDate", "onsetDateTime"]),
        Some("MedicationRequest") => extract_datetime(resource, &["authoredOn"]),
        _ => extract_datetime(resource, &["date", "issued"]),
    }
}

fn compare_dates(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    // Undated resources sort as oldest.
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}
