//! Plausibility checks for normalized calculator inputs.
//!
//! Rules are plain data keyed by semantic value type (age, creatinine, pH, ...).
//! Each rule has a hard range, whose violations are errors, and an optional
//! warning zone inside it, whose violations only produce warnings.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::ClinicalDataError;

/// Range rule for one semantic value type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRule {
    pub kind: Cow<'static, str>,
    #[serde(default = "default_required")]
    pub required: bool,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub warn_min: Option<f64>,
    #[serde(default)]
    pub warn_max: Option<f64>,
    /// Message for a missing value. Defaults to "`<field>` is required".
    #[serde(default)]
    pub required_message: Option<Cow<'static, str>>,
    pub range_message: Cow<'static, str>,
    #[serde(default)]
    pub warning_message: Option<Cow<'static, str>>,
}

fn default_required() -> bool {
    true
}

impl ValidationRule {
    /// Required rule with a hard range and no warning zone.
    pub const fn range(kind: &'static str, min: f64, max: f64, message: &'static str) -> Self {
        Self {
            kind: Cow::Borrowed(kind),
            required: true,
            min,
            max,
            warn_min: None,
            warn_max: None,
            required_message: None,
            range_message: Cow::Borrowed(message),
            warning_message: None,
        }
    }

    /// Required rule with a warning zone `[warn_min, warn_max]` inside the hard range.
    pub const fn with_warning(
        kind: &'static str,
        (min, max): (f64, f64),
        message: &'static str,
        (warn_min, warn_max): (f64, f64),
        warning: &'static str,
    ) -> Self {
        Self {
            kind: Cow::Borrowed(kind),
            required: true,
            min,
            max,
            warn_min: Some(warn_min),
            warn_max: Some(warn_max),
            required_message: None,
            range_message: Cow::Borrowed(message),
            warning_message: Some(Cow::Borrowed(warning)),
        }
    }

    /// Check a single value. `None` and NaN count as missing.
    pub fn check(&self, field: &str, value: Option<f64>) -> Option<ValidationIssue> {
        let value = value.filter(|v| !v.is_nan());

        let Some(value) = value else {
            if !self.required {
                return None;
            }
            let message = match &self.required_message {
                Some(message) => message.to_string(),
                None => format!("{field} is required"),
            };
            return Some(ValidationIssue::new(field, IssueKind::Required, message));
        };

        if value < self.min || value > self.max {
            return Some(ValidationIssue::new(
                field,
                IssueKind::OutOfRange,
                self.range_message.to_string(),
            ));
        }

        let below = self.warn_min.is_some_and(|limit| value < limit);
        let above = self.warn_max.is_some_and(|limit| value > limit);
        if below || above {
            let message = match &self.warning_message {
                Some(message) => message.to_string(),
                None if below => format!("{field} is very low; double-check."),
                None => format!("{field} is very high; double-check."),
            };
            return Some(ValidationIssue::new(field, IssueKind::Warning, message));
        }

        None
    }
}

/// Built-in rule table.
pub static VALIDATION_RULES: &[ValidationRule] = &[
    ValidationRule::with_warning(
        "age",
        (0.0, 150.0),
        "Age must be between 0-150 years",
        (1.0, 120.0),
        "Age is unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "temperature",
        (20.0, 45.0),
        "Temperature must be between 20-45°C",
        (35.0, 40.0),
        "Temperature is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "systolic_bp",
        (50.0, 250.0),
        "Systolic BP must be between 50-250 mmHg",
        (70.0, 200.0),
        "Systolic BP is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "diastolic_bp",
        (30.0, 150.0),
        "Diastolic BP must be between 30-150 mmHg",
        (40.0, 110.0),
        "Diastolic BP is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "heart_rate",
        (20.0, 250.0),
        "Heart rate must be between 20-250 bpm",
        (40.0, 150.0),
        "Heart rate is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "respiratory_rate",
        (0.0, 100.0),
        "Respiratory rate must be between 0-100 breaths/min",
        (8.0, 40.0),
        "Respiratory rate is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "ph",
        (6.5, 8.0),
        "pH must be between 6.5-8.0",
        (7.25, 7.55),
        "pH is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "weight",
        (0.5, 500.0),
        "Weight must be between 0.5-500 kg",
        (30.0, 200.0),
        "Weight is unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "height",
        (30.0, 250.0),
        "Height must be between 30-250 cm",
        (100.0, 220.0),
        "Height is unusual; double-check.",
    ),
    ValidationRule::range("gcs", 3.0, 15.0, "GCS score must be between 3-15"),
    ValidationRule::with_warning(
        "glucose",
        (10.0, 2000.0),
        "Glucose must be between 10-2000 mg/dL",
        (50.0, 400.0),
        "Glucose is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "bun",
        (1.0, 200.0),
        "BUN must be between 1-200 mg/dL",
        (5.0, 80.0),
        "BUN is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "creatinine",
        (0.1, 20.0),
        "Creatinine must be between 0.1-20 mg/dL",
        (0.4, 10.0),
        "Creatinine is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "egfr",
        (1.0, 200.0),
        "eGFR must be between 1-200 mL/min/1.73m²",
        (15.0, 120.0),
        "eGFR is unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "sodium",
        (100.0, 200.0),
        "Sodium must be between 100-200 mEq/L",
        (120.0, 160.0),
        "Sodium is very low/high; double-check.",
    ),
    ValidationRule::with_warning(
        "potassium",
        (1.5, 10.0),
        "Potassium must be between 1.5-10 mEq/L",
        (2.5, 6.5),
        "Potassium is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "chloride",
        (50.0, 150.0),
        "Chloride must be between 50-150 mEq/L",
        (90.0, 115.0),
        "Chloride is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "bicarbonate",
        (2.0, 60.0),
        "HCO₃⁻ must be between 2-60 mEq/L",
        (15.0, 35.0),
        "Bicarbonate is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "bilirubin",
        (0.1, 80.0),
        "Bilirubin must be between 0.1-80 mg/dL",
        (0.2, 30.0),
        "Bilirubin is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "calcium",
        (2.0, 20.0),
        "Calcium must be between 2.0-20.0 mg/dL",
        (7.0, 12.0),
        "Calcium is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "inr",
        (0.5, 20.0),
        "INR must be between 0.5-20",
        (0.8, 6.0),
        "INR is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "albumin",
        (0.5, 8.0),
        "Albumin must be between 0.5-8.0 g/dL",
        (2.0, 5.5),
        "Albumin is unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "liver_enzyme",
        (1.0, 5000.0),
        "Enzyme level must be between 1-5000 U/L",
        (5.0, 500.0),
        "Enzyme level is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "platelets",
        (1.0, 2000.0),
        "Platelets must be between 1-2000 ×10⁹/L",
        (50.0, 500.0),
        "Platelet count is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "wbc",
        (0.0, 500.0),
        "WBC must be between 0-500 ×10⁹/L",
        (2.0, 30.0),
        "WBC count is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "hemoglobin",
        (1.0, 25.0),
        "Hemoglobin must be between 1-25 g/dL",
        (6.0, 18.0),
        "Hemoglobin is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "hematocrit",
        (5.0, 80.0),
        "Hematocrit must be between 5-80%",
        (20.0, 55.0),
        "Hematocrit is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "map",
        (20.0, 300.0),
        "MAP must be between 20-300 mmHg",
        (50.0, 150.0),
        "MAP is very low/high; double-check.",
    ),
    ValidationRule::with_warning(
        "pao2",
        (10.0, 800.0),
        "PaO₂ must be between 10-800 mmHg",
        (40.0, 500.0),
        "PaO₂ is extreme; double-check.",
    ),
    ValidationRule::with_warning(
        "paco2",
        (5.0, 200.0),
        "PaCO₂ must be between 5-200 mmHg",
        (25.0, 80.0),
        "PaCO₂ is extreme; double-check.",
    ),
    ValidationRule::range("fio2", 0.21, 1.0, "FiO₂ must be between 0.21-1.0"),
    ValidationRule::with_warning(
        "total_cholesterol",
        (50.0, 1000.0),
        "Total cholesterol must be between 50-1000 mg/dL",
        (100.0, 350.0),
        "Cholesterol is unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "hdl",
        (10.0, 200.0),
        "HDL must be between 10-200 mg/dL",
        (25.0, 100.0),
        "HDL is unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "triglycerides",
        (10.0, 3000.0),
        "Triglycerides must be between 10-3000 mg/dL",
        (30.0, 500.0),
        "Triglycerides are unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "insulin",
        (0.1, 500.0),
        "Insulin must be between 0.1-500 µU/mL",
        (2.0, 100.0),
        "Insulin level is unusual; double-check.",
    ),
    ValidationRule::with_warning(
        "phenytoin",
        (0.0, 100.0),
        "Phenytoin level must be between 0-100 mcg/mL",
        (5.0, 30.0),
        "Phenytoin level is unusual; double-check.",
    ),
    ValidationRule {
        kind: Cow::Borrowed("ethanol"),
        required: false,
        min: 0.0,
        max: 1000.0,
        warn_min: None,
        warn_max: Some(400.0),
        required_message: None,
        range_message: Cow::Borrowed("Ethanol concentration must be between 0-1000 mg/dL"),
        warning_message: Some(Cow::Borrowed("Ethanol level is very high; double-check.")),
    },
    ValidationRule::with_warning(
        "qt_interval",
        (200.0, 800.0),
        "QT interval must be between 200-800 ms",
        (350.0, 500.0),
        "QT interval is unusual; double-check.",
    ),
];

/// Look up a built-in rule by its kind, ignoring ASCII case.
pub fn validation_rule(kind: &str) -> Option<&'static ValidationRule> {
    VALIDATION_RULES
        .iter()
        .find(|rule| rule.kind.eq_ignore_ascii_case(kind.trim()))
}

/// Ordered mapping from input names to rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationSchema {
    fields: Vec<(String, ValidationRule)>,
}

impl ValidationSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rule for `name`, keeping its original position.
    pub fn field(mut self, name: impl Into<String>, rule: ValidationRule) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = rule,
            None => self.fields.push((name, rule)),
        }
        self
    }

    /// Build a schema from `(input name, rule kind)` pairs.
    pub fn from_kinds(pairs: &[(&str, &str)]) -> Result<Self, ClinicalDataError> {
        pairs.iter().try_fold(Self::new(), |schema, (name, kind)| {
            let rule = validation_rule(kind).ok_or_else(|| {
                ClinicalDataError::Config(format!("no validation rule named '{kind}'"))
            })?;
            Ok(schema.field(*name, rule.clone()))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValidationRule)> {
        self.fields.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Input values by name; `None` is an empty field.
pub type ValidationValues = HashMap<String, Option<f64>>;

/// Category of a validation finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Required,
    OutOfRange,
    Warning,
}

/// One finding for one input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationIssue {
    pub field: String,
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: &str, kind: IssueKind, message: String) -> Self {
        Self {
            field: field.to_string(),
            kind,
            message,
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self.kind, IssueKind::Warning)
    }
}

/// Per-field classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Valid,
    Warning,
    Error,
}

/// Outcome of validating a whole calculator form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// Error messages in schema order.
    pub errors: Vec<String>,
    pub has_warnings: bool,
    pub warnings: Vec<String>,
    pub issues: Vec<ValidationIssue>,
    pub field_status: BTreeMap<String, FieldStatus>,
}

impl ValidationResult {
    /// Out-of-range errors only, leaving out "required" findings that are
    /// noise while a form is still being filled in.
    pub fn range_errors(&self) -> Vec<&str> {
        self.issues
            .iter()
            .filter(|issue| issue.kind == IssueKind::OutOfRange)
            .map(|issue| issue.message.as_str())
            .collect()
    }

    pub fn into_result(self) -> Result<Self, ClinicalDataError> {
        if self.is_valid {
            Ok(self)
        } else {
            Err(ClinicalDataError::Validation(self.errors.join("; ")))
        }
    }
}

/// Outcome of checking one value against one rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check a single value, reporting findings under the rule's kind.
pub fn validate_value(value: Option<f64>, rule: &ValidationRule) -> ValidationOutcome {
    let mut outcome = ValidationOutcome {
        is_valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };
    if let Some(issue) = rule.check(&rule.kind, value) {
        if issue.is_error() {
            outcome.is_valid = false;
            outcome.errors.push(issue.message);
        } else {
            outcome.warnings.push(issue.message);
        }
    }
    outcome
}

/// Validate every input named in `schema`.
pub fn validate_calculator_input(
    values: &ValidationValues,
    schema: &ValidationSchema,
) -> ValidationResult {
    let mut result = ValidationResult::default();

    for (name, rule) in schema.iter() {
        let value = values.get(name).copied().flatten();
        let status = match rule.check(name, value) {
            None => FieldStatus::Valid,
            Some(issue) => {
                let status = if issue.is_error() {
                    result.errors.push(issue.message.clone());
                    FieldStatus::Error
                } else {
                    result.warnings.push(issue.message.clone());
                    FieldStatus::Warning
                };
                result.issues.push(issue);
                status
            }
        };
        result.field_status.insert(name.to_string(), status);
    }

    result.is_valid = result.errors.is_empty();
    result.has_warnings = !result.warnings.is_empty();
    result
}

/// Validate and fail with the joined error messages when any input is invalid.
pub fn validate_or_error(
    values: &ValidationValues,
    schema: &ValidationSchema,
) -> Result<ValidationResult, ClinicalDataError> {
    validate_calculator_input(values, schema).into_result()
}
