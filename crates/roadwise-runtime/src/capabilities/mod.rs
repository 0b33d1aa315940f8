//! Built-in capabilities and their registration.
//!
//! Actions in registration order:
//!
//! | # | Name | Module |
//! |---|---|---|
//! | 1 | `set_speed_advisory` | [`advisory`] |
//! | 2 | `set_lane_advisory` | [`advisory`] |
//! | 3 | `set_alert` | [`advisory`] |
//! | 4 | `get_traffic_ahead` | [`traffic`] |
//! | 5 | `report_road_issue` | [`maintenance`] |
//! | 6 | `plan_evacuation` | [`evacuation`] |
//! | 7 | `check_connectivity` | [`connectivity`] |
//!
//! followed by the five [`knowledge`] fragments.  Registration order is the
//! merge tie-break rank, so the explicit advisory actions outrank the
//! data-driven ones.

pub mod advisory;
pub mod connectivity;
pub mod evacuation;
pub mod knowledge;
pub mod maintenance;
pub mod traffic;

use std::sync::Arc;

use roadwise_kernel::{Capability, CapabilityRegistry};
use roadwise_memory::ObservationStore;
use roadwise_sources::fdem::Fdem;
use roadwise_sources::fl511::Fl511Client;
use roadwise_sources::nws::NwsClient;
use roadwise_sources::osrm::OsrmClient;
use roadwise_sources::probe::ProbeClient;
use roadwise_types::RoadwiseError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// The shared cached clients.  One instance per process; every capability
/// that reads a source holds an `Arc` to the same client, so caches and call
/// budgets are pooled.
#[derive(Clone)]
pub struct SourceHub {
    pub fl511: Arc<Fl511Client>,
    pub nws: Arc<NwsClient>,
    pub fdem: Arc<Fdem>,
    pub osrm: Arc<OsrmClient>,
    pub probe: Arc<ProbeClient>,
}

impl SourceHub {
    /// Clients against the public endpoints with their default policies.
    ///
    /// `probe_url` is the reasoning endpoint checked by `check_connectivity`.
    pub fn public(fl511_api_key: Option<String>, probe_url: &str) -> Self {
        use roadwise_sources::{CachedClient, fl511, nws, osrm, probe};
        Self {
            fl511: Arc::new(CachedClient::new(
                fl511::Fl511Source::new(fl511_api_key),
                fl511::default_policy(),
            )),
            nws: Arc::new(CachedClient::new(
                nws::NwsSource::default(),
                nws::default_policy(),
            )),
            fdem: Arc::new(Fdem::default()),
            osrm: Arc::new(CachedClient::new(
                osrm::OsrmSource::default(),
                osrm::default_policy(),
            )),
            probe: Arc::new(CachedClient::new(
                probe::ReachabilityProbe::new(probe_url),
                probe::default_policy(),
            )),
        }
    }
}

/// Register every built-in action, then every knowledge fragment.
pub fn register_defaults(
    registry: &mut CapabilityRegistry,
    hub: &SourceHub,
    store: Arc<ObservationStore>,
) -> Result<(), RoadwiseError> {
    let actions: Vec<Capability> = vec![
        Capability::Action(Arc::new(advisory::SetSpeedAdvisory)),
        Capability::Action(Arc::new(advisory::SetLaneAdvisory)),
        Capability::Action(Arc::new(advisory::SetAlert)),
        Capability::Action(Arc::new(traffic::TrafficAhead::new(hub.fl511.clone()))),
        Capability::Action(Arc::new(maintenance::ReportRoadIssue::new(store))),
        Capability::Action(Arc::new(evacuation::PlanEvacuation::new(hub.clone()))),
        Capability::Action(Arc::new(connectivity::CheckConnectivity::new(
            hub.probe.clone(),
        ))),
    ];
    for capability in actions.into_iter().chain(knowledge::all()) {
        registry.register(capability)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Inline draft-07 schema for `T`, as offered to the engine.
pub(crate) fn input_schema<T: JsonSchema>() -> Value {
    let settings = schemars::r#gen::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

/// Deserialize `args` into `T`, mapping failures to `InvalidArguments`.
pub(crate) fn parse_args<T: DeserializeOwned>(name: &str, args: &Value) -> Result<T, RoadwiseError> {
    serde_json::from_value(args.clone()).map_err(|e| RoadwiseError::InvalidArguments {
        name: name.to_string(),
        details: e.to_string(),
    })
}
