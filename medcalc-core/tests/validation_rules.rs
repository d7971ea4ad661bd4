use std::collections::HashMap;

use medcalc_core::validation::{
    validate_calculator_input, validate_or_error, validate_value, validation_rule, FieldStatus,
    IssueKind, ValidationRule, ValidationSchema, ValidationValues, VALIDATION_RULES,
};
use medcalc_core::{ClinicalDataError, RuntimeConfig};

fn values(pairs: &[(&str, Option<f64>)]) -> ValidationValues {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect::<HashMap<_, _>>()
}

fn age_rule() -> ValidationRule {
    ValidationRule::range("age", 0.0, 120.0, "Age must be between 0-120 years")
}

#[test]
fn missing_value_is_reported_as_required() {
    let schema = ValidationSchema::new().field("age", age_rule());
    let result = validate_calculator_input(&values(&[("age", None)]), &schema);

    assert!(!result.is_valid);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("required"));
    assert_eq!(result.issues[0].kind, IssueKind::Required);
    assert!(result.range_errors().is_empty());
}

#[test]
fn out_of_range_value_has_a_distinct_message() {
    let schema = ValidationSchema::new().field("age", age_rule());
    let result = validate_calculator_input(&values(&[("age", Some(200.0))]), &schema);

    assert!(!result.is_valid);
    assert_eq!(result.errors, vec!["Age must be between 0-120 years".to_string()]);
    assert!(!result.errors[0].contains("required"));
    assert_eq!(result.range_errors(), vec!["Age must be between 0-120 years"]);
    assert_eq!(result.field_status["age"], FieldStatus::Error);
}

#[test]
fn absent_key_counts_as_missing() {
    let schema = ValidationSchema::new().field("age", age_rule());
    let result = validate_calculator_input(&ValidationValues::new(), &schema);
    assert!(result.errors[0].contains("required"));
}

#[test]
fn nan_counts_as_missing() {
    let schema = ValidationSchema::new().field("age", age_rule());
    let result = validate_calculator_input(&values(&[("age", Some(f64::NAN))]), &schema);
    assert_eq!(result.issues[0].kind, IssueKind::Required);
}

#[test]
fn warning_zone_keeps_the_form_valid() {
    let schema = ValidationSchema::from_kinds(&[("creatinine", "creatinine")]).unwrap();
    let result = validate_calculator_input(&values(&[("creatinine", Some(12.0))]), &schema);

    assert!(result.is_valid);
    assert!(result.has_warnings);
    assert_eq!(result.warnings, vec!["Creatinine is extreme; double-check.".to_string()]);
    assert_eq!(result.field_status["creatinine"], FieldStatus::Warning);
}

#[test]
fn errors_follow_schema_order() {
    let schema = ValidationSchema::from_kinds(&[
        ("sbp", "systolic_bp"),
        ("hr", "heart_rate"),
        ("ph", "pH"),
    ])
    .unwrap();
    let input = values(&[("sbp", Some(10.0)), ("hr", None), ("ph", Some(9.0))]);
    let result = validate_calculator_input(&input, &schema);

    assert_eq!(
        result.errors,
        vec![
            "Systolic BP must be between 50-250 mmHg".to_string(),
            "hr is required".to_string(),
            "pH must be between 6.5-8.0".to_string(),
        ]
    );
    assert_eq!(result.range_errors().len(), 2);
}

#[test]
fn optional_rule_ignores_missing_value() {
    let schema = ValidationSchema::from_kinds(&[("ethanol", "ethanol")]).unwrap();
    let result = validate_calculator_input(&values(&[("ethanol", None)]), &schema);
    assert!(result.is_valid);
    assert_eq!(result.field_status["ethanol"], FieldStatus::Valid);

    let high = validate_calculator_input(&values(&[("ethanol", Some(450.0))]), &schema);
    assert!(high.is_valid);
    assert_eq!(high.warnings, vec!["Ethanol level is very high; double-check.".to_string()]);
}

#[test]
fn unknown_rule_kind_is_a_config_error() {
    let err = ValidationSchema::from_kinds(&[("x", "no-such-kind")]).unwrap_err();
    assert!(matches!(err, ClinicalDataError::Config(_)));
}

#[test]
fn builtin_table_is_consistent() {
    for rule in VALIDATION_RULES {
        assert!(rule.min <= rule.max, "{}", rule.kind);
        if let (Some(low), Some(high)) = (rule.warn_min, rule.warn_max) {
            assert!(rule.min <= low && low <= high && high <= rule.max, "{}", rule.kind);
        }
        assert!(!rule.range_message.contains("required"), "{}", rule.kind);
        assert_eq!(validation_rule(&rule.kind), Some(rule));
    }
}

#[test]
fn custom_rules_load_from_json() {
    let rule: ValidationRule = serde_json::from_str(
        r#"{"kind":"lactate","min":0,"max":30,"range_message":"Lactate must be between 0-30 mmol/L"}"#,
    )
    .unwrap();
    assert!(rule.required);

    let schema = ValidationSchema::new().field("lactate", rule);
    let result = validate_or_error(&values(&[("lactate", Some(42.0))]), &schema);
    assert_eq!(
        result.unwrap_err(),
        ClinicalDataError::Validation("Lactate must be between 0-30 mmol/L".into())
    );
}

#[test]
fn runtime_config_fills_defaults() {
    let config = RuntimeConfig::from_json_str(r#"{"ehr":{"vendor":"epic"}}"#).unwrap();
    assert_eq!(config.ehr.vendor, "epic");
    assert_eq!(config.staleness.threshold_days, 90);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl_seconds, 300);

    assert!(RuntimeConfig::from_json_str("{not json").is_err());
}

#[test]
fn single_value_checks_use_rule_kind() {
    let rule = validation_rule("glucose").unwrap();

    let fine = validate_value(Some(110.0), rule);
    assert!(fine.is_valid);
    assert!(fine.errors.is_empty() && fine.warnings.is_empty());

    let extreme = validate_value(Some(600.0), rule);
    assert!(extreme.is_valid);
    assert_eq!(extreme.warnings, vec!["Glucose is extreme; double-check.".to_string()]);

    let missing = validate_value(None, rule);
    assert!(!missing.is_valid);
    assert_eq!(missing.errors, vec!["glucose is required".to_string()]);
}
