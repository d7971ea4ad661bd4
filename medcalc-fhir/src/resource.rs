//! Helpers for reading values out of FHIR JSON resources.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Numeric value with the unit it was reported in.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    /// Human-readable `unit`, when present.
    pub unit: Option<String>,
    /// UCUM `code`, when present.
    pub code: Option<String>,
}

impl Quantity {
    fn from_json(quantity: &Value) -> Option<Self> {
        let value = quantity.get("value").and_then(Value::as_f64)?;
        Some(Self {
            value,
            unit: non_empty_str(quantity.get("unit")),
            code: non_empty_str(quantity.get("code")),
        })
    }

    /// Unit spellings to try, human-readable first.
    pub fn unit_candidates(&self) -> impl Iterator<Item = &str> {
        self.unit.as_deref().into_iter().chain(self.code.as_deref())
    }

    /// Preferred unit label.
    pub fn display_unit(&self) -> Option<&str> {
        self.unit.as_deref().or(self.code.as_deref())
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// `valueQuantity` of an Observation or component.
pub fn value_quantity(resource: &Value) -> Option<Quantity> {
    resource.get("valueQuantity").and_then(Quantity::from_json)
}

/// Codes in a CodeableConcept, without their systems.
pub fn coding_codes(concept: &Value) -> impl Iterator<Item = &str> {
    concept
        .get("coding")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|coding| coding.get("code").and_then(Value::as_str))
}

/// Whether a CodeableConcept carries any of the comma-separated `codes`.
///
/// Codes may be system-qualified (`http://loinc.org|2345-7`).
pub fn concept_has_code(concept: &Value, codes: &str) -> bool {
    let wanted: Vec<&str> = split_codes(codes).collect();
    coding_codes(concept).any(|code| wanted.contains(&code))
}

/// Individual codes of a comma-separated list with any system prefix removed.
pub fn split_codes(codes: &str) -> impl Iterator<Item = &str> {
    codes
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| code.rsplit('|').next().unwrap_or(code))
}

/// Component of a multi-valued Observation carrying one of `codes`.
pub fn find_component<'a>(resource: &'a Value, codes: &str) -> Option<&'a Value> {
    resource
        .get("component")
        .and_then(Value::as_array)?
        .iter()
        .find(|component| {
            component
                .get("code")
                .is_some_and(|code| concept_has_code(code, codes))
        })
}

/// Numeric value of an Observation for `codes`.
///
/// Uses the top-level `valueQuantity`, falling back to the component whose
/// coding matches.
pub fn observation_quantity(resource: &Value, codes: &str) -> Option<Quantity> {
    value_quantity(resource).or_else(|| find_component(resource, codes).and_then(value_quantity))
}

/// Clinically relevant time of an Observation.
pub fn observation_date(resource: &Value) -> Option<DateTime<Utc>> {
    extract_datetime(
        resource,
        &[
            "effectiveDateTime",
            "effectiveInstant",
            "effectivePeriod",
            "issued",
        ],
    )
}

/// First parseable timestamp among `fields`. Periods prefer `end` over `start`.
pub fn extract_datetime(resource: &Value, fields: &[&str]) -> Option<DateTime<Utc>> {
    for field in fields {
        let Some(value) = resource.get(*field) else {
            continue;
        };

        if let Some(dt) = value.as_str().and_then(parse_datetime) {
            return Some(dt);
        }

        if let Some(obj) = value.as_object() {
            for key in ["end", "start"] {
                if let Some(dt) = obj.get(key).and_then(Value::as_str).and_then(parse_datetime) {
                    return Some(dt);
                }
            }
        }
    }
    None
}

/// Parse a FHIR `dateTime`/`instant`, accepting the partial date forms.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    let date = parse_date(value)
        .or_else(|| NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok())
        .or_else(|| NaiveDate::parse_from_str(&format!("{value}-01-01"), "%Y-%m-%d").ok())?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

/// Age in whole years on `today`, from a Patient's `birthDate`.
pub fn patient_age_on(resource: &Value, today: NaiveDate) -> Option<u32> {
    let birth_date = resource
        .get("birthDate")
        .and_then(Value::as_str)
        .and_then(parse_date)?;
    let mut age = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        age -= 1;
    }
    u32::try_from(age).ok()
}

/// Administrative gender of a Patient.
pub fn patient_gender(resource: &Value) -> Option<String> {
    non_empty_str(resource.get("gender")).map(|gender| gender.to_lowercase())
}
