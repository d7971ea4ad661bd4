//! Observation retrieval for browser-hosted calculators.
//!
//! The page supplies a `(query) => Promise<object>` function that performs the
//! authenticated FHIR GET; lookups are exposed as Promises.

use std::rc::Rc;

use async_trait::async_trait;
use js_sys::{Function, Promise};
use medcalc_core::validation::validation_rule;
use medcalc_core::ClinicalDataError;
use medcalc_fhir::{BloodPressureOptions, FhirClient, ObservationOptions, ObservationService};
use serde::Deserialize;
use serde_json::Value;
use serde_wasm_bindgen::from_value;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

use crate::{format_error, init_panic_hook, read_runtime_config, to_js};

/// FHIR client delegating every request to a JS callback.
struct JsFhirClient {
    request: Function,
    patient_id: Option<String>,
}

#[async_trait(?Send)]
impl FhirClient for JsFhirClient {
    fn patient_id(&self) -> Option<String> {
        self.patient_id.clone()
    }

    async fn request(&self, query: &str) -> Result<Value, ClinicalDataError> {
        let returned = self
            .request
            .call1(&JsValue::NULL, &JsValue::from_str(query))
            .map_err(|err| ClinicalDataError::Transport(js_error_text(&err)))?;
        // Plain values are accepted as well as Promises.
        let response = JsFuture::from(Promise::resolve(&returned))
            .await
            .map_err(|err| ClinicalDataError::Transport(js_error_text(&err)))?;
        from_value(response).map_err(|err| ClinicalDataError::Parse(err.to_string()))
    }
}

fn js_error_text(err: &JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct JsObservationOptions {
    target_unit: Option<String>,
    unit_type: Option<String>,
    skip_cache: bool,
    track_staleness: bool,
    field_selector: Option<String>,
    label: Option<String>,
    /// Name of a built-in validation rule, such as `"ph"`.
    validation_kind: Option<String>,
}

impl TryFrom<JsObservationOptions> for ObservationOptions {
    type Error = ClinicalDataError;

    fn try_from(js: JsObservationOptions) -> Result<Self, Self::Error> {
        let validation_rule = match js.validation_kind {
            Some(kind) => Some(validation_rule(&kind).cloned().ok_or_else(|| {
                ClinicalDataError::Config(format!("no validation rule named '{kind}'"))
            })?),
            None => None,
        };
        Ok(ObservationOptions {
            skip_cache: js.skip_cache,
            track_staleness: js.track_staleness,
            staleness_label: js.label,
            field_selector: js.field_selector,
            target_unit: js.target_unit,
            unit_type: js.unit_type,
            validation_rule,
        })
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct JsBloodPressureOptions {
    skip_cache: bool,
    track_staleness: bool,
}

impl From<JsBloodPressureOptions> for BloodPressureOptions {
    fn from(js: JsBloodPressureOptions) -> Self {
        BloodPressureOptions {
            skip_cache: js.skip_cache,
            track_staleness: js.track_staleness,
            ..BloodPressureOptions::default()
        }
    }
}

/// Retrieval session for one launch context.
#[wasm_bindgen]
pub struct ObservationSession {
    service: Rc<ObservationService>,
}

#[wasm_bindgen]
impl ObservationSession {
    /// `request` receives a relative query such as `Observation?code=...` and
    /// returns the response body (or a Promise of it).
    #[wasm_bindgen(constructor)]
    pub fn new(
        request: Function,
        patient_id: Option<String>,
        config: Option<JsValue>,
    ) -> Result<ObservationSession, JsValue> {
        init_panic_hook();

        let config = read_runtime_config(config)?;
        let client = Rc::new(JsFhirClient {
            request,
            patient_id,
        });
        Ok(ObservationSession {
            service: Rc::new(ObservationService::from_config(client, &config)),
        })
    }

    /// Resolves to an `ObservationResult`; `value` is null when the
    /// observation is missing or cannot be expressed in `targetUnit`.
    #[wasm_bindgen(js_name = getObservation)]
    pub fn get_observation(
        &self,
        code: String,
        options: Option<JsValue>,
    ) -> Result<Promise, JsValue> {
        let options: JsObservationOptions = match options {
            Some(js) => from_value(js)
                .map_err(|err| JsValue::from_str(&format!("Could not read options: {err}")))?,
            None => JsObservationOptions::default(),
        };
        let options = ObservationOptions::try_from(options).map_err(format_error)?;

        let service = Rc::clone(&self.service);
        Ok(future_to_promise(async move {
            let result = service.get_observation(&code, &options).await;
            to_js(&result)
        }))
    }

    /// Resolves to a `BloodPressureResult` in mmHg.
    #[wasm_bindgen(js_name = getBloodPressure)]
    pub fn get_blood_pressure(&self, options: Option<JsValue>) -> Result<Promise, JsValue> {
        let options: JsBloodPressureOptions = match options {
            Some(js) => from_value(js)
                .map_err(|err| JsValue::from_str(&format!("Could not read options: {err}")))?,
            None => JsBloodPressureOptions::default(),
        };
        let options = BloodPressureOptions::from(options);

        let service = Rc::clone(&self.service);
        Ok(future_to_promise(async move {
            let result = service.get_blood_pressure(&options).await;
            to_js(&result)
        }))
    }

    #[wasm_bindgen(js_name = clearCache)]
    pub fn clear_cache(&self) {
        self.service.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> Result<ObservationOptions, ClinicalDataError> {
        let js: JsObservationOptions = serde_json::from_value(value).unwrap();
        ObservationOptions::try_from(js)
    }

    #[test]
    fn observation_options_default_to_untracked_passthrough() {
        assert_eq!(options(json!({})).unwrap(), ObservationOptions::default());
    }

    #[test]
    fn observation_options_read_camel_case() {
        let parsed = options(json!({
            "targetUnit": "mg/dL",
            "skipCache": true,
            "trackStaleness": true,
            "fieldSelector": "#glucose",
            "validationKind": "glucose"
        }))
        .unwrap();

        assert_eq!(parsed.target_unit.as_deref(), Some("mg/dL"));
        assert!(parsed.skip_cache);
        assert!(parsed.track_staleness);
        assert_eq!(parsed.field_selector.as_deref(), Some("#glucose"));
        assert_eq!(parsed.validation_rule.unwrap().kind, "glucose");
    }

    #[test]
    fn unknown_validation_kind_is_rejected() {
        let err = options(json!({"validationKind": "mood"})).unwrap_err();
        assert!(matches!(err, ClinicalDataError::Config(_)));
    }

    #[test]
    fn blood_pressure_options_keep_default_selectors() {
        let js: JsBloodPressureOptions =
            serde_json::from_value(json!({"trackStaleness": true})).unwrap();
        let options = BloodPressureOptions::from(js);
        assert!(options.track_staleness);
        assert!(!options.skip_cache);
        assert_eq!(options.systolic_selector, None);
    }
}
