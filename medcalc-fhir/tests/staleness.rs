use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use medcalc_core::{loinc, StalenessConfig};
use medcalc_fhir::resource::observation_date;
use medcalc_fhir::staleness::format_age;
use medcalc_fhir::{MemoryContainer, StalenessTracker, WidgetContainer};
use serde_json::{json, Value};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
}

fn observation(id: &str, code: &str, effective: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "id": id,
        "code": {"coding": [{"system": "http://loinc.org", "code": code}]},
        "effectiveDateTime": effective,
        "valueQuantity": {"value": 1.0, "unit": "mg/dL"}
    })
}

fn attached_tracker(threshold: u32) -> (StalenessTracker, Rc<MemoryContainer>) {
    let mut tracker = StalenessTracker::new(threshold).with_reference_time(now());
    let container = Rc::new(MemoryContainer::new("widget-a"));
    tracker.set_container(container.clone());
    (tracker, container)
}

#[test]
fn age_text_buckets() {
    let cases = [
        (0, "0 days ago"),
        (1, "1 day ago"),
        (29, "29 days ago"),
        (30, "1 month ago"),
        (45, "1 month ago"),
        (364, "12 months ago"),
        (365, "1 year ago"),
        (400, "1 year 1 month ago"),
        (800, "2 years 2 months ago"),
        (-3, "0 days ago"),
    ];
    for (days, expected) in cases {
        assert_eq!(format_age(days), expected, "{days} days");
    }
}

#[test]
fn default_threshold_comes_from_config() {
    assert_eq!(StalenessTracker::default().threshold_days(), 90);
    let config = StalenessConfig { threshold_days: 30 };
    assert_eq!(StalenessTracker::from_config(&config).threshold_days(), 30);
}

#[test]
fn threshold_is_exclusive() {
    let tracker = StalenessTracker::new(90).with_reference_time(now());
    let at_threshold = observation("a", loinc::GLUCOSE, "2026-07-03T00:00:00Z");
    let past_threshold = observation("b", loinc::GLUCOSE, "2026-07-02T00:00:00Z");

    let info = tracker.check_staleness(&at_threshold).unwrap();
    assert_eq!(info.age_in_days, 90);
    assert!(!info.is_stale);

    let info = tracker.check_staleness(&past_threshold).unwrap();
    assert_eq!(info.age_in_days, 91);
    assert!(info.is_stale);
    assert_eq!(info.age_text, "3 months ago");
}

#[test]
fn partial_day_past_threshold_is_stale() {
    let noon = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap();
    let tracker = StalenessTracker::new(90).with_reference_time(noon);
    let observation = observation("a", loinc::GLUCOSE, "2026-07-03T00:00:00Z");

    let info = tracker.check_staleness(&observation).unwrap();
    assert_eq!(info.age_in_days, 90);
    assert!(info.is_stale);
}

#[test]
fn last_write_wins_per_field() {
    let (mut tracker, _container) = attached_tracker(90);

    tracker.track_observation(
        "#weight",
        &observation("old", loinc::WEIGHT, "2025-01-01"),
        loinc::WEIGHT,
        None,
    );
    tracker.track_observation(
        "#weight",
        &observation("new", loinc::WEIGHT, "2026-09-20T10:00:00Z"),
        loinc::WEIGHT,
        Some("Body weight"),
    );

    assert_eq!(tracker.records().count(), 1);
    let record = tracker.record("#weight").unwrap();
    assert_eq!(
        record.observation_timestamp,
        Utc.with_ymd_and_hms(2026, 9, 20, 10, 0, 0).unwrap()
    );
    assert_eq!(record.label, "Body Weight");
    assert_eq!(tracker.stale_count(), 0);
}

#[test]
fn label_falls_back_to_code_name_then_code() {
    let (mut tracker, _container) = attached_tracker(90);

    tracker.track_observation(
        "#cr",
        &observation("cr", loinc::CREATININE, "2026-09-01"),
        loinc::CREATININE,
        None,
    );
    tracker.track_observation(
        "#custom",
        &observation("x", "99999-9", "2026-09-01"),
        "99999-9",
        None,
    );

    assert_eq!(tracker.record("#cr").unwrap().label, "Creatinine");
    assert_eq!(tracker.record("#custom").unwrap().label, "99999-9");
}

#[test]
fn custom_labels_are_capitalized_like_code_names() {
    let (mut tracker, _container) = attached_tracker(90);

    tracker.track_observation(
        "#cr",
        &observation("cr", loinc::CREATININE, "2026-09-01"),
        loinc::CREATININE,
        Some("serum creatinine"),
    );
    tracker.track_observation(
        "#inr",
        &observation("inr", loinc::INR, "2026-09-01"),
        loinc::INR,
        Some("INR"),
    );

    assert_eq!(tracker.record("#cr").unwrap().label, "Serum Creatinine");
    assert_eq!(tracker.record("#inr").unwrap().label, "INR");
}

#[test]
fn detached_widget_is_left_alone() {
    let (mut tracker, container) = attached_tracker(90);
    container.detach();

    let info = tracker.track_observation(
        "#glucose",
        &observation("g", loinc::GLUCOSE, "2020-01-01"),
        loinc::GLUCOSE,
        None,
    );

    assert!(info.is_none());
    assert_eq!(tracker.records().count(), 0);
    assert_eq!(container.staleness_html(), "");
}

#[test]
fn untracked_without_container_or_date() {
    let mut bare = StalenessTracker::new(90).with_reference_time(now());
    let dated = observation("g", loinc::GLUCOSE, "2020-01-01");
    assert!(bare.track_observation("#glucose", &dated, loinc::GLUCOSE, None).is_none());

    let (mut tracker, _container) = attached_tracker(90);
    let undated = json!({"resourceType": "Observation", "id": "u", "valueQuantity": {"value": 140}});
    assert!(tracker.check_staleness(&undated).is_none());
    assert!(tracker
        .track_observation("#sodium", &undated, loinc::SODIUM, None)
        .is_none());
    assert_eq!(tracker.records().count(), 0);
}

#[test]
fn switching_widgets_drops_records() {
    let (mut tracker, _first) = attached_tracker(90);
    tracker.track_observation(
        "#glucose",
        &observation("g", loinc::GLUCOSE, "2020-01-01"),
        loinc::GLUCOSE,
        None,
    );

    let same_id = Rc::new(MemoryContainer::new("widget-a"));
    tracker.set_container(same_id.clone());
    assert_eq!(tracker.records().count(), 1);
    assert!(same_id.staleness_html().contains("Stale Data Warning"));

    tracker.set_container(Rc::new(MemoryContainer::new("widget-b")));
    assert_eq!(tracker.records().count(), 0);
    assert_eq!(tracker.container().unwrap().id(), "widget-b");
}

#[test]
fn warning_lists_only_stale_fields() {
    let (mut tracker, container) = attached_tracker(90);

    tracker.track_observation(
        "#glucose",
        &observation("g", loinc::GLUCOSE, "2026-09-25"),
        loinc::GLUCOSE,
        None,
    );
    assert!(tracker.render_warning().is_none());
    assert_eq!(container.staleness_html(), "");

    tracker.track_observation(
        "#weight",
        &observation("w", loinc::WEIGHT, "2025-08-15"),
        loinc::WEIGHT,
        Some("Weight <kg>"),
    );

    let stale = tracker.stale_items();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].record.field_selector, "#weight");
    assert_eq!(stale[0].info.age_text, "1 year 1 month ago");

    let html = container.staleness_html();
    assert!(html.contains("Stale Data Warning"));
    assert!(html.contains("older than 90 days"));
    assert!(html.contains("Aug 15, 2025"));
    assert!(html.contains("Weight &lt;kg&gt;"));
    assert!(!html.contains("#glucose"));
    assert_eq!(Some(html), tracker.render_warning());
}

#[test]
fn clearing_fields_refreshes_warning() {
    let (mut tracker, container) = attached_tracker(30);
    for (selector, code) in [("#a", loinc::GLUCOSE), ("#b", loinc::CREATININE)] {
        tracker.track_observation(
            selector,
            &observation(selector, code, "2026-01-01"),
            code,
            None,
        );
    }
    assert_eq!(tracker.stale_count(), 2);

    tracker.clear_field("#a");
    assert_eq!(tracker.stale_count(), 1);
    assert!(!container.staleness_html().contains("data-field=\"#a\""));
    assert!(container.staleness_html().contains("data-field=\"#b\""));

    tracker.clear_field("#missing");
    tracker.clear_all();
    assert_eq!(tracker.records().count(), 0);
    assert_eq!(container.staleness_html(), "");
}

#[test]
fn observation_date_precedence() {
    let resource = json!({
        "effectivePeriod": {"start": "2026-01-01", "end": "2026-01-03"},
        "issued": "2026-02-01T12:00:00Z"
    });
    assert_eq!(
        observation_date(&resource),
        Some(Utc.with_ymd_and_hms(2026, 1, 3, 0, 0, 0).unwrap())
    );

    let resource = json!({
        "effectiveDateTime": "2026-03-04T05:06:07+02:00",
        "issued": "2026-02-01T12:00:00Z"
    });
    assert_eq!(
        observation_date(&resource),
        Some(Utc.with_ymd_and_hms(2026, 3, 4, 3, 6, 7).unwrap())
    );

    let resource = json!({"effectiveDateTime": "not a date", "issued": "2026-02"});
    assert_eq!(
        observation_date(&resource),
        Some(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap())
    );

    assert_eq!(observation_date(&json!({"valueQuantity": {"value": 1}})), None);
}
