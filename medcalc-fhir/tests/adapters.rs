use std::collections::BTreeMap;

use medcalc_core::{AuthConfig, EhrConfig, EhrFeature, EhrVendor, ObservationQuery, SortOrder};
use medcalc_fhir::{active_adapter, adapter_for_tag, create_adapter, initialize_adapter};
use serde_json::json;

const SAMPLE_CODES: &[&str] = &[
    "2345-7",
    "8310-5,8331-1",
    "http://loinc.org|2160-0",
    "85354-9, 55284-4",
    "",
];

#[test]
fn transform_code_is_idempotent_for_every_vendor() {
    for vendor in EhrVendor::ALL {
        let adapter = create_adapter(vendor);
        for code in SAMPLE_CODES {
            let once = adapter.transform_code(code);
            assert_eq!(adapter.transform_code(&once), once, "{vendor}: {code}");
        }
    }
}

#[test]
fn empty_responses_yield_no_entries_for_every_vendor() {
    let responses = [
        json!({}),
        json!({"entry": []}),
        json!({"resourceType": "Bundle", "entry": "not-an-array"}),
        json!({"resourceType": "Bundle", "entry": [{"fullUrl": "x"}, {"resource": null}]}),
        json!(null),
    ];
    for vendor in EhrVendor::ALL {
        let adapter = create_adapter(vendor);
        for response in &responses {
            let result = adapter.process_observation_response(response);
            assert!(result.entries.is_empty(), "{vendor}: {response}");
            assert_eq!(&result.raw_response, response);
        }
    }
}

#[test]
fn entries_keep_server_order() {
    let adapter = create_adapter(EhrVendor::Generic);
    let response = json!({
        "resourceType": "Bundle",
        "entry": [
            {"resource": {"resourceType": "Observation", "id": "newest"}},
            {"search": {"mode": "include"}},
            {"resource": {"resourceType": "Observation", "id": "older"}}
        ]
    });
    let result = adapter.process_observation_response(&response);
    let ids: Vec<_> = result.entries.iter().map(|e| e["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["newest", "older"]);
    assert_eq!(result.first().unwrap()["id"], "newest");
}

#[test]
fn epic_qualifies_loinc_codes() {
    let epic = create_adapter(EhrVendor::Epic);
    assert_eq!(epic.transform_code("2345-7"), "http://loinc.org|2345-7");
    assert_eq!(
        epic.transform_code("8310-5,8331-1"),
        "http://loinc.org|8310-5,http://loinc.org|8331-1"
    );

    let query = epic.build_observation_query(&ObservationQuery::most_recent("2345-7"));
    assert_eq!(
        query,
        "Observation?code=http://loinc.org|2345-7&_sort=-date&_count=1"
    );
}

#[test]
fn generic_query_shape() {
    let generic = create_adapter(EhrVendor::Generic);
    let query = ObservationQuery::most_recent("29463-7")
        .with_sort(SortOrder::Oldest)
        .with_count(0)
        .with_date_filter("ge2024-01-01");
    assert_eq!(query.count, 1);
    assert_eq!(
        generic.build_observation_query(&query),
        "Observation?code=29463-7&_sort=date&_count=1&date=ge2024-01-01"
    );
}

#[test]
fn date_filter_dropped_when_unsupported() {
    let meditech = create_adapter(EhrVendor::Meditech);
    assert!(!meditech.supports_feature(EhrFeature::DateFilter));
    let query = ObservationQuery::most_recent("2345-7").with_date_filter("ge2024-01-01");
    assert_eq!(
        meditech.build_observation_query(&query),
        "Observation?code=2345-7&_sort=-date&_count=1"
    );
}

#[test]
fn feature_tables() {
    let generic = create_adapter(EhrVendor::Generic);
    assert!(EhrFeature::ALL.iter().all(|f| generic.supports_feature(*f)));

    let epic = create_adapter(EhrVendor::Epic);
    for feature in [
        EhrFeature::TextSearch,
        EhrFeature::OfflineAccess,
        EhrFeature::AuditEvent,
        EhrFeature::BulkData,
    ] {
        assert!(!epic.supports_feature(feature), "epic {}", feature.as_str());
    }
    assert!(epic.supports_feature(EhrFeature::ComponentObservation));
    assert!(epic.supports_feature(EhrFeature::DateFilter));

    let cerner = create_adapter(EhrVendor::Cerner);
    assert!(!cerner.supports_feature(EhrFeature::BulkData));
    assert!(!cerner.supports_feature(EhrFeature::OfflineAccess));
    assert!(cerner.supports_feature(EhrFeature::DateFilter));

    let meditech = create_adapter(EhrVendor::Meditech);
    let supported: Vec<_> = EhrFeature::ALL
        .into_iter()
        .filter(|f| meditech.supports_feature(*f))
        .collect();
    assert_eq!(
        supported,
        vec![
            EhrFeature::ComponentObservation,
            EhrFeature::MedicationRequest,
            EhrFeature::Condition,
        ]
    );
}

#[test]
fn default_scopes_follow_refresh_token_policy() {
    let generic = create_adapter(EhrVendor::Generic).default_scopes();
    assert!(generic.contains(&"offline_access"));
    assert!(generic.contains(&"launch/patient"));
    assert!(generic.contains(&"user/Observation.rs"));

    let epic = create_adapter(EhrVendor::Epic).default_scopes();
    assert!(!epic.contains(&"offline_access"));

    let cerner = create_adapter(EhrVendor::Cerner).default_scopes();
    assert!(cerner.contains(&"online_access"));
    assert!(!cerner.contains(&"offline_access"));
}

#[test]
fn offline_scope_matches_offline_feature() {
    for vendor in EhrVendor::ALL {
        let adapter = create_adapter(vendor);
        assert_eq!(
            adapter.default_scopes().contains(&"offline_access"),
            adapter.supports_feature(EhrFeature::OfflineAccess),
            "{vendor}"
        );
    }
}

#[test]
fn authorization_params_merge_caller_and_vendor_values() {
    let mut extra = BTreeMap::new();
    extra.insert("launch".to_string(), "xyz123".to_string());
    let config = AuthConfig {
        client_id: "calc-app".into(),
        scope: None,
        redirect_uri: None,
        fhir_base_url: Some("https://fhir.epic.example/api/FHIR/R4".into()),
        extra_params: extra,
    };

    let epic = create_adapter(EhrVendor::Epic).authorization_params(&config);
    assert_eq!(epic.client_id, "calc-app");
    assert_eq!(epic.redirect_uri, "./index.html");
    assert!(!epic.scope.split(' ').any(|s| s == "offline_access"));
    assert_eq!(epic.extra_params["launch"], "xyz123");
    assert_eq!(
        epic.extra_params["aud"],
        "https://fhir.epic.example/api/FHIR/R4"
    );

    let custom = AuthConfig {
        scope: Some("openid patient/*.read".into()),
        redirect_uri: Some("https://app.example/callback".into()),
        ..config
    };
    let generic = create_adapter(EhrVendor::Generic).authorization_params(&custom);
    assert_eq!(generic.scope, "openid patient/*.read");
    assert_eq!(generic.redirect_uri, "https://app.example/callback");
    assert!(!generic.extra_params.contains_key("aud"));
}

#[test]
fn unknown_vendor_tag_falls_back_to_generic() {
    assert_eq!(adapter_for_tag("allscripts").vendor(), EhrVendor::Generic);
    assert_eq!(adapter_for_tag(" EPIC ").vendor(), EhrVendor::Epic);
    assert_eq!(adapter_for_tag("oracle").vendor(), EhrVendor::Cerner);
}

#[test]
fn active_adapter_follows_initialization() {
    let config = EhrConfig {
        vendor: "cerner".into(),
        ..EhrConfig::default()
    };
    assert_eq!(initialize_adapter(&config).vendor(), EhrVendor::Cerner);
    assert_eq!(active_adapter().vendor(), EhrVendor::Cerner);

    let unknown = EhrConfig {
        vendor: "nextgen".into(),
        ..EhrConfig::default()
    };
    assert_eq!(initialize_adapter(&unknown).vendor(), EhrVendor::Generic);
    assert_eq!(active_adapter().vendor(), EhrVendor::Generic);
}

#[test]
fn supplementary_queries() {
    let generic = create_adapter(EhrVendor::Generic);
    assert_eq!(
        generic.build_condition_query("44054006,73211009"),
        "Condition?clinical-status=active&code=44054006,73211009"
    );
    assert_eq!(
        generic.build_medication_query("860975"),
        "MedicationRequest?status=active&code=860975"
    );
    assert_eq!(
        generic.patient_request_url("Patient/pt-1"),
        "Patient/pt-1"
    );
}
