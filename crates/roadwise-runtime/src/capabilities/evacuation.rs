//! `plan_evacuation` – hurricane-season situational awareness.
//!
//! Aggregates NWS weather alerts, the FDEM evacuation zone, shelters and
//! designated routes, FL511 closures and an OSRM driving route.  Every source
//! read goes through the shared cached clients in the [`SourceHub`]; a source
//! that is down contributes nothing rather than failing the action.

use async_trait::async_trait;
use roadwise_kernel::Action;
use roadwise_sources::fdem::{self, EvacuationRoute, EvacuationZone, Shelter};
use roadwise_sources::fl511::TrafficEvent;
use roadwise_sources::nws::{self, WeatherAlert};
use roadwise_sources::osrm::{DrivingRoute, RouteKey};
use roadwise_sources::{Nearby, NearbyFilter, filter_nearby};
use roadwise_types::geo::{metres_to_miles, miles_to_metres};
use roadwise_types::{
    ALERT_TEXT_MAX_CHARS, AlertCandidate, AlertSeverity, CandidateAdvisory, ContextSnapshot,
    GeoPoint, MPH_TO_MS, RoadwiseError, SpeedCandidate, truncate_chars,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{SourceHub, input_schema, parse_args};

const NAME: &str = "plan_evacuation";

const ROUTES_RADIUS_CHECK_MI: f64 = 15.0;
const ROUTES_RADIUS_PLAN_MI: f64 = 10.0;
const CLOSURE_RADIUS_MI: f64 = 50.0;
const SHELTER_SEARCH_MI: f64 = 50.0;
const SHELTER_LIST_MI: f64 = 25.0;
const SHELTERS_LISTED: usize = 10;
const EVAC_SPEED_CAP_MPH: f32 = 55.0;
const EVAC_SPEED_CONFIDENCE: f32 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvacuationMode {
    #[default]
    CheckSituation,
    PlanRoute,
    FindShelters,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EvacuationParams {
    #[serde(default)]
    pub action: EvacuationMode,
    /// Destination latitude for `plan_route`; nearest shelter when omitted.
    #[serde(default)]
    pub destination_lat: Option<f64>,
    #[serde(default)]
    pub destination_lon: Option<f64>,
    /// Search radius in miles (closures: 50, shelters: 25).
    #[serde(default)]
    pub radius_miles: Option<f64>,
}

fn alert(text: &str, severity: AlertSeverity) -> AlertCandidate {
    AlertCandidate {
        text: truncate_chars(text, ALERT_TEXT_MAX_CHARS),
        severity,
        confidence: 1.0,
    }
}

fn route_names(routes: &[EvacuationRoute]) -> String {
    routes
        .iter()
        .take(5)
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// check_situation
// ─────────────────────────────────────────────────────────────────────────────

/// Everything `check_situation` looks at.
#[derive(Debug, Default)]
pub struct Situation<'a> {
    pub alerts: &'a [WeatherAlert],
    pub zone: Option<&'a EvacuationZone>,
    pub routes: &'a [EvacuationRoute],
    pub closures: &'a [Nearby<TrafficEvent>],
}

pub fn assess(s: &Situation<'_>) -> CandidateAdvisory {
    let mut report = Vec::new();
    let mut severity = AlertSeverity::Info;

    let (evac, other): (Vec<&WeatherAlert>, Vec<&WeatherAlert>) =
        s.alerts.iter().partition(|a| a.is_evacuation_relevant());
    let evacuation_needed = !evac.is_empty();
    if evacuation_needed {
        report.push("ACTIVE WEATHER ALERTS:".to_string());
        for a in &evac {
            severity = severity.max(a.alert_severity());
        }
        for a in evac.iter().take(3) {
            report.push(format!("- {} ({}): {}", a.event, a.severity, a.headline));
            if !a.instruction.is_empty() {
                report.push(format!("  Instructions: {}", truncate_chars(&a.instruction, 200)));
            }
        }
    } else if !other.is_empty() {
        report.push("Weather alerts (non-evacuation):".to_string());
        for a in other.iter().take(2) {
            report.push(format!("- {}: {}", a.event, a.headline));
        }
    } else {
        report.push("No active weather alerts.".to_string());
    }

    match s.zone {
        Some(z) => {
            report.push(format!(
                "Evacuation zone {} ({} County), status: {}",
                z.zone, z.county, z.status
            ));
            if z.is_high_priority() {
                report.push(format!("Zone {} is high-priority for evacuation", z.zone));
                if evacuation_needed {
                    severity = AlertSeverity::Critical;
                }
            } else if z.priority <= 4 {
                report.push(format!("Zone {} may require evacuation in severe storms", z.zone));
            }
        }
        None => report.push("Not in a designated evacuation zone (or zone data unavailable).".into()),
    }

    if !s.routes.is_empty() {
        report.push(format!(
            "Nearby designated evacuation routes: {}",
            route_names(s.routes)
        ));
    }

    if !s.closures.is_empty() {
        report.push(format!("{} road closure(s) nearby:", s.closures.len()));
        for c in s.closures.iter().take(3) {
            report.push(format!(
                "- {} {}: {} ({:.1}mi away)",
                c.item.roadway_name,
                c.item.direction_of_travel,
                truncate_chars(&c.item.description, 100),
                c.distance_mi()
            ));
        }
        severity = severity.max(AlertSeverity::Warning);
    }

    let high_priority_zone = s.zone.filter(|z| z.is_high_priority());
    let text = match (evacuation_needed, high_priority_zone) {
        (true, Some(z)) => format!("EVACUATE: Zone {} active", z.zone),
        (true, None) => "Weather alert: check evacuation".to_string(),
        (false, _) if severity >= AlertSeverity::Warning => "Road closures nearby".to_string(),
        _ => "No evacuation needed".to_string(),
    };

    let candidate = CandidateAdvisory::from_capability(NAME).with_reason(report.join("\n"));
    if severity > AlertSeverity::Info || evacuation_needed {
        candidate.with_alert(alert(&text, severity))
    } else {
        candidate
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// plan_route
// ─────────────────────────────────────────────────────────────────────────────

/// Inputs of the `plan_route` advisory once the destination is known.
#[derive(Debug)]
pub struct RoutePlan<'a> {
    pub origin: GeoPoint,
    pub destination: GeoPoint,
    /// Describes the destination when it was picked automatically.
    pub shelter: Option<&'a Shelter>,
    pub route: Option<&'a DrivingRoute>,
    pub corridor_incidents: &'a [Nearby<TrafficEvent>],
    pub designated: &'a [EvacuationRoute],
}

/// Corridor search centre and radius for an origin/destination pair.
pub fn corridor(origin: GeoPoint, destination: GeoPoint) -> (GeoPoint, f64) {
    let mid = GeoPoint::new(
        (origin.lat + destination.lat) / 2.0,
        (origin.lon + destination.lon) / 2.0,
    );
    let radius = metres_to_miles(origin.distance_m(&destination)) / 2.0 + 5.0;
    (mid, radius.min(CLOSURE_RADIUS_MI))
}

pub fn route_advisory(plan: &RoutePlan<'_>, ctx: &ContextSnapshot) -> CandidateAdvisory {
    let mut report = Vec::new();
    if let Some(s) = plan.shelter {
        report.push(format!(
            "Routing to nearest shelter: {} ({}, {:.1}mi away, capacity: {})",
            s.name,
            s.address,
            metres_to_miles(s.distance_m),
            s.capacity
        ));
    }

    if !plan.corridor_incidents.is_empty() {
        report.push(format!(
            "{} closure(s)/incident(s) on route corridor:",
            plan.corridor_incidents.len()
        ));
        for c in plan.corridor_incidents.iter().take(5) {
            report.push(format!(
                "- {} {}: {}",
                c.item.roadway_name,
                c.item.direction_of_travel,
                truncate_chars(&c.item.description, 80)
            ));
        }
    }

    let distance_m = match plan.route {
        Some(route) => {
            report.push(format!("Route: {}", route.summary()));
            report.push("Directions:".to_string());
            for (i, step) in route.steps.iter().enumerate() {
                report.push(format!("{}. {}", i + 1, step.instruction));
            }
            route.distance_m
        }
        None => {
            report.push(format!(
                "Route calculation unavailable. Head to {:.4}, {:.4}",
                plan.destination.lat, plan.destination.lon
            ));
            plan.origin.distance_m(&plan.destination)
        }
    };

    if !plan.designated.is_empty() {
        report.push(format!(
            "Designated evacuation routes nearby: {}",
            route_names(plan.designated)
        ));
    }

    let summary = match plan.route {
        Some(route) => route.summary(),
        None => format!("{:.0}mi to destination", metres_to_miles(distance_m)),
    };
    let mut candidate = CandidateAdvisory::from_capability(NAME)
        .with_alert(alert(&format!("Evac route: {summary}"), AlertSeverity::Critical))
        .with_reason(report.join("\n"));

    let speed = ctx.vehicle.speed_ms;
    if speed > 0.0 {
        candidate = candidate.with_speed(SpeedCandidate {
            target_ms: speed.min(EVAC_SPEED_CAP_MPH * MPH_TO_MS),
            source: "evacuation_routing".to_string(),
            confidence: EVAC_SPEED_CONFIDENCE,
            distance_ahead_m: distance_m as f32,
        });
    }
    candidate
}

// ─────────────────────────────────────────────────────────────────────────────
// find_shelters
// ─────────────────────────────────────────────────────────────────────────────

pub fn shelters_advisory(shelters: &[Shelter], radius_mi: f64) -> CandidateAdvisory {
    if shelters.is_empty() {
        return CandidateAdvisory::from_capability(NAME)
            .with_alert(alert("No shelters found nearby", AlertSeverity::Info))
            .with_reason(format!("No emergency shelters found within {radius_mi:.0} miles."));
    }
    let mut report = vec![format!(
        "Found {} shelter(s) within {radius_mi:.0} miles:",
        shelters.len()
    )];
    for (i, s) in shelters.iter().take(SHELTERS_LISTED).enumerate() {
        let mut line = format!(
            "{}. {} [{}] - {:.1}mi, {}, {} County, capacity {}",
            i + 1,
            s.name,
            s.status,
            metres_to_miles(s.distance_m),
            s.address,
            s.county,
            s.capacity
        );
        if let Some(avail) = s.availability {
            line.push_str(&format!(", {avail} spots available"));
        }
        if s.pet_friendly {
            line.push_str(", pets OK");
        }
        if s.special_needs {
            line.push_str(", special needs");
        }
        report.push(line);
    }
    CandidateAdvisory::from_capability(NAME)
        .with_alert(alert(
            &format!("{} shelter(s) within {radius_mi:.0}mi", shelters.len()),
            AlertSeverity::Info,
        ))
        .with_reason(report.join("\n"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Action
// ─────────────────────────────────────────────────────────────────────────────

pub struct PlanEvacuation {
    hub: SourceHub,
}

impl PlanEvacuation {
    pub fn new(hub: SourceHub) -> Self {
        Self { hub }
    }

    /// FL511 events near `centre` matching `keep`; empty without a key.
    async fn incidents(
        &self,
        centre: GeoPoint,
        radius_mi: f64,
        keep: fn(&TrafficEvent) -> bool,
    ) -> Vec<Nearby<TrafficEvent>> {
        if !self.hub.fl511.source().is_configured() {
            return Vec::new();
        }
        let Some(all) = self.hub.fl511.fetch(&()).await.into_payload() else {
            return Vec::new();
        };
        filter_nearby(all.as_slice(), &centre, &NearbyFilter::within_miles(radius_mi))
            .into_iter()
            .filter(|hit| keep(&hit.item))
            .collect()
    }

    async fn routes_near(&self, origin: GeoPoint, radius_mi: f64) -> Vec<EvacuationRoute> {
        self.hub
            .fdem
            .routes
            .fetch(&fdem::area_key(origin, radius_mi))
            .await
            .into_payload()
            .map(|r| r.as_ref().clone())
            .unwrap_or_default()
    }

    async fn shelters_near(&self, origin: GeoPoint, radius_mi: f64) -> Vec<Shelter> {
        self.hub
            .fdem
            .shelters
            .fetch(&fdem::area_key(origin, radius_mi))
            .await
            .into_payload()
            .map(|s| s.as_ref().clone())
            .unwrap_or_default()
    }

    async fn check_situation(&self, origin: GeoPoint, p: &EvacuationParams) -> CandidateAdvisory {
        let alerts = self
            .hub
            .nws
            .fetch(&nws::key_for(origin))
            .await
            .into_payload()
            .unwrap_or_default();
        let zone = self
            .hub
            .fdem
            .zones
            .fetch(&fdem::zone_key(origin))
            .await
            .into_payload()
            .flatten();
        let routes = self.routes_near(origin, ROUTES_RADIUS_CHECK_MI).await;
        let closures = self
            .incidents(
                origin,
                p.radius_miles.unwrap_or(CLOSURE_RADIUS_MI),
                TrafficEvent::is_closure,
            )
            .await;
        debug!(
            alerts = alerts.len(),
            zone = zone.as_ref().map(|z| z.zone.as_str()),
            closures = closures.len(),
            "evacuation situation gathered"
        );
        assess(&Situation {
            alerts: alerts.as_slice(),
            zone: zone.as_ref(),
            routes: &routes,
            closures: &closures,
        })
    }

    async fn plan_route(
        &self,
        origin: GeoPoint,
        p: &EvacuationParams,
        ctx: &ContextSnapshot,
    ) -> CandidateAdvisory {
        let requested = p
            .destination_lat
            .zip(p.destination_lon)
            .and_then(|(lat, lon)| GeoPoint::from_raw(lat, lon));
        let shelters;
        let (destination, shelter) = match requested {
            Some(d) => (d, None),
            None => {
                shelters = self.shelters_near(origin, SHELTER_SEARCH_MI).await;
                match shelters.first() {
                    Some(s) => (s.location, Some(s)),
                    None => {
                        return CandidateAdvisory::from_capability(NAME)
                            .with_alert(alert("No shelters found nearby", AlertSeverity::Warning))
                            .with_reason(
                                "No shelters found within 50 miles. Please provide a destination.",
                            );
                    }
                }
            }
        };

        let (mid, radius) = corridor(origin, destination);
        let corridor_incidents = self
            .incidents(mid, radius, |e| {
                e.is_closure() || e.event_type == "accidentsAndIncidents"
            })
            .await;
        let route = self
            .hub
            .osrm
            .fetch(&RouteKey::new(origin, destination))
            .await
            .into_payload()
            .flatten();
        let designated = self.routes_near(origin, ROUTES_RADIUS_PLAN_MI).await;

        route_advisory(
            &RoutePlan {
                origin,
                destination,
                shelter,
                route: route.as_ref(),
                corridor_incidents: &corridor_incidents,
                designated: &designated,
            },
            ctx,
        )
    }
}

#[async_trait]
impl Action for PlanEvacuation {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Hurricane and evacuation support for Florida: check weather alerts, the \
         evacuation zone, closures and routes (check_situation), route to a \
         destination or the nearest shelter (plan_route), or list shelters (find_shelters)."
    }

    fn input_schema(&self) -> Value {
        input_schema::<EvacuationParams>()
    }

    async fn execute(
        &self,
        args: &Value,
        ctx: &ContextSnapshot,
    ) -> Result<CandidateAdvisory, RoadwiseError> {
        let p: EvacuationParams = parse_args(NAME, args)?;
        let Some(origin) = ctx.location() else {
            return Ok(CandidateAdvisory::from_capability(NAME)
                .with_alert(alert("No GPS for evacuation check", AlertSeverity::Info))
                .with_reason("No GPS fix"));
        };
        Ok(match p.action {
            EvacuationMode::CheckSituation => self.check_situation(origin, &p).await,
            EvacuationMode::PlanRoute => self.plan_route(origin, &p, ctx).await,
            EvacuationMode::FindShelters => {
                let radius = p.radius_miles.unwrap_or(SHELTER_LIST_MI);
                let shelters = self.shelters_near(origin, radius).await;
                let within: Vec<Shelter> = shelters
                    .into_iter()
                    .filter(|s| s.distance_m <= miles_to_metres(radius))
                    .collect();
                shelters_advisory(&within, radius)
            }
        })
    }
}
