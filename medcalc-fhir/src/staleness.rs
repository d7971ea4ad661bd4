//! Provenance and age tracking for auto-populated form fields.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use chrono::{DateTime, Duration, Utc};
use medcalc_core::{loinc, StalenessConfig, StalenessRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::resource::observation_date;

/// Calculator widget the tracker writes into.
pub trait WidgetContainer {
    fn id(&self) -> &str;

    /// Whether the widget is still rendered. Writes to a detached widget are
    /// ignored.
    fn is_attached(&self) -> bool;

    /// Set the text of the field matched by `selector`. Returns `false` when
    /// no such field exists.
    fn set_field_value(&self, selector: &str, text: &str) -> bool;

    /// Replace the staleness warning panel. An empty string hides it.
    fn show_staleness(&self, html: &str);
}

/// In-process widget used outside the browser.
#[derive(Debug)]
pub struct MemoryContainer {
    id: String,
    attached: Cell<bool>,
    known_fields: Option<BTreeSet<String>>,
    fields: RefCell<BTreeMap<String, String>>,
    staleness_html: RefCell<String>,
}

impl MemoryContainer {
    /// Container accepting any field selector.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attached: Cell::new(true),
            known_fields: None,
            fields: RefCell::new(BTreeMap::new()),
            staleness_html: RefCell::new(String::new()),
        }
    }

    /// Container that only has the listed fields.
    pub fn with_fields(id: impl Into<String>, selectors: &[&str]) -> Self {
        Self {
            known_fields: Some(selectors.iter().map(|s| s.to_string()).collect()),
            ..Self::new(id)
        }
    }

    /// Simulate the widget being torn down.
    pub fn detach(&self) {
        self.attached.set(false);
    }

    pub fn field_value(&self, selector: &str) -> Option<String> {
        self.fields.borrow().get(selector).cloned()
    }

    pub fn staleness_html(&self) -> String {
        self.staleness_html.borrow().clone()
    }
}

impl WidgetContainer for MemoryContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_attached(&self) -> bool {
        self.attached.get()
    }

    fn set_field_value(&self, selector: &str, text: &str) -> bool {
        if !self.is_attached() {
            return false;
        }
        if let Some(known) = &self.known_fields {
            if !known.contains(selector) {
                return false;
            }
        }
        self.fields
            .borrow_mut()
            .insert(selector.to_string(), text.to_string());
        true
    }

    fn show_staleness(&self, html: &str) {
        if self.is_attached() {
            *self.staleness_html.borrow_mut() = html.to_string();
        }
    }
}

/// Age of one observation relative to the tracker's clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StalenessInfo {
    pub is_stale: bool,
    pub date: DateTime<Utc>,
    pub age_in_days: i64,
    pub age_text: String,
}

/// Tracked field whose value is older than the threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StaleItem {
    pub record: StalenessRecord,
    pub info: StalenessInfo,
}

/// Remembers which observation populated each field of one widget.
pub struct StalenessTracker {
    threshold_days: i64,
    reference_time: Option<DateTime<Utc>>,
    container: Option<Rc<dyn WidgetContainer>>,
    records: BTreeMap<String, StalenessRecord>,
}

impl Default for StalenessTracker {
    fn default() -> Self {
        Self::from_config(&StalenessConfig::default())
    }
}

impl StalenessTracker {
    pub fn new(threshold_days: u32) -> Self {
        Self {
            threshold_days: i64::from(threshold_days),
            reference_time: None,
            container: None,
            records: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &StalenessConfig) -> Self {
        Self::new(config.threshold_days)
    }

    /// Measure ages against a fixed instant instead of the wall clock.
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    pub fn threshold_days(&self) -> i64 {
        self.threshold_days
    }

    fn now(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    /// Scope the tracker to one widget. Records of a previous widget are
    /// discarded.
    pub fn set_container(&mut self, container: Rc<dyn WidgetContainer>) {
        let same = self
            .container
            .as_ref()
            .is_some_and(|current| current.id() == container.id());
        if !same {
            self.records.clear();
        }
        self.container = Some(container);
        self.refresh_warning();
    }

    pub fn container(&self) -> Option<Rc<dyn WidgetContainer>> {
        self.container.clone()
    }

    fn is_attached(&self) -> bool {
        self.container
            .as_ref()
            .is_some_and(|container| container.is_attached())
    }

    /// Age of `observation`, `None` when it carries no usable date.
    pub fn check_staleness(&self, observation: &Value) -> Option<StalenessInfo> {
        let date = observation_date(observation)?;
        Some(self.info_for(date))
    }

    fn info_for(&self, date: DateTime<Utc>) -> StalenessInfo {
        let age = self.now() - date;
        let age_in_days = age.num_days();
        StalenessInfo {
            // Exact elapsed time; whole days are for display only.
            is_stale: age > Duration::days(self.threshold_days),
            date,
            age_in_days,
            age_text: format_age(age_in_days),
        }
    }

    /// Record that `field_selector` now shows `observation`.
    ///
    /// Replaces any earlier record for the same field. Ignored when no widget
    /// is attached or the observation has no date.
    pub fn track_observation(
        &mut self,
        field_selector: &str,
        observation: &Value,
        loinc_code: &str,
        label: Option<&str>,
    ) -> Option<StalenessInfo> {
        if !self.is_attached() {
            debug!(field_selector, "widget detached, staleness not tracked");
            return None;
        }
        let info = self.check_staleness(observation)?;

        let label = label
            .or_else(|| loinc::loinc_name(loinc_code))
            .map(capitalize_words)
            .unwrap_or_else(|| loinc_code.to_string());
        self.records.insert(
            field_selector.to_string(),
            StalenessRecord {
                field_selector: field_selector.to_string(),
                observation_timestamp: info.date,
                loinc_code: loinc_code.to_string(),
                label,
            },
        );
        self.refresh_warning();
        Some(info)
    }

    pub fn clear_field(&mut self, field_selector: &str) {
        if self.records.remove(field_selector).is_some() {
            self.refresh_warning();
        }
    }

    pub fn clear_all(&mut self) {
        self.records.clear();
        self.refresh_warning();
    }

    pub fn record(&self, field_selector: &str) -> Option<&StalenessRecord> {
        self.records.get(field_selector)
    }

    /// Records ordered by field selector.
    pub fn records(&self) -> impl Iterator<Item = &StalenessRecord> {
        self.records.values()
    }

    pub fn stale_items(&self) -> Vec<StaleItem> {
        self.records
            .values()
            .map(|record| StaleItem {
                record: record.clone(),
                info: self.info_for(record.observation_timestamp),
            })
            .filter(|item| item.info.is_stale)
            .collect()
    }

    pub fn stale_count(&self) -> usize {
        self.stale_items().len()
    }

    /// Warning panel listing every stale field, `None` when nothing is stale.
    pub fn render_warning(&self) -> Option<String> {
        let items = self.stale_items();
        if items.is_empty() {
            return None;
        }

        let rows: String = items
            .iter()
            .map(|item| {
                format!(
                    "<li class=\"staleness-item\" data-field=\"{}\"><strong>{}</strong>: <span class=\"staleness-date\">{}</span> <span class=\"staleness-age\">({})</span></li>",
                    escape_html(&item.record.field_selector),
                    escape_html(&item.record.label),
                    item.info.date.format("%b %-d, %Y"),
                    item.info.age_text
                )
            })
            .collect();

        Some(format!(
            "<div class=\"staleness-warning\"><strong>Stale Data Warning</strong><p>The following auto-populated values are older than {} days. Please verify if updates are needed:</p><ul class=\"staleness-list\">{rows}</ul></div>",
            self.threshold_days
        ))
    }

    fn refresh_warning(&self) {
        let Some(container) = self.container.as_ref().filter(|c| c.is_attached()) else {
            return;
        };
        container.show_staleness(&self.render_warning().unwrap_or_default());
    }
}

/// Human-readable age: "12 days ago", "3 months ago", "1 year 2 months ago".
pub fn format_age(days: i64) -> String {
    fn plural(n: i64, unit: &str) -> String {
        if n == 1 {
            format!("{n} {unit}")
        } else {
            format!("{n} {unit}s")
        }
    }

    let days = days.max(0);
    if days >= 365 {
        let years = days / 365;
        let months = (days % 365) / 30;
        if months > 0 {
            format!("{} {} ago", plural(years, "year"), plural(months, "month"))
        } else {
            format!("{} ago", plural(years, "year"))
        }
    } else if days >= 30 {
        format!("{} ago", plural(days / 30, "month"))
    } else {
        format!("{} ago", plural(days, "day"))
    }
}

fn capitalize_words(label: &str) -> String {
    label
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
