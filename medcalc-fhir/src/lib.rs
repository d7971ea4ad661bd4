//! EHR integration for the calculator suite: vendor adapters, the observation
//! retrieval service and staleness tracking.

pub mod adapter;
pub mod cache;
pub mod client;
pub mod resource;
pub mod service;
pub mod staleness;

pub use adapter::{
    active_adapter, adapter_for_tag, create_adapter, initialize_adapter, AuthorizationParams,
    EhrAdapter,
};
pub use client::{FhirClient, MemoryFhirClient};
pub use service::{
    normalize_observation, AutoPopulateOptions, AutoPopulateReport, BloodPressureOptions,
    BloodPressureResult, FieldRequirement, ObservationOptions, ObservationResult,
    ObservationService,
};
pub use staleness::{MemoryContainer, StalenessInfo, StalenessTracker, WidgetContainer};
