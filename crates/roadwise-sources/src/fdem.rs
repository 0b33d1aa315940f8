//! Florida Division of Emergency Management GIS layers.
//!
//! Three ArcGIS feature services are consulted, each through its own
//! [`CachedClient`]: evacuation zones, shelters and designated evacuation
//! routes.  The data is mostly static, so every client keeps answers for five
//! minutes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use roadwise_types::GeoPoint;
use roadwise_types::geo::miles_to_metres;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::cache::{CachedClient, RemoteSource, SourcePolicy};
use crate::{GridKey, SourceError, http_client, lenient_f64, lenient_string};

pub const FDEM_BASE: &str = "https://services.arcgis.com/3wFbqsFPLeKqOlIK/arcgis/rest/services";
const ZONES_LAYER: &str = "Evacuation_Zones_20230608/FeatureServer/12/query";
const ROUTES_LAYER: &str = "Evacuation_Routes_Hosted/FeatureServer/0/query";
const OPEN_SHELTERS_LAYER: &str = "Open_Shelters_in_Florida_(View_Only)/FeatureServer/0/query";
const SHELTER_INVENTORY_LAYER: &str = "Risk_Shelter_Inventory_General/FeatureServer/0/query";

const OPEN_SHELTER_FIELDS: &str = "label,street,city,county,zip,gen_capacity,gen_occupancy,\
gen_availability,pet_friendly,special_needs,status";
const INVENTORY_FIELDS: &str = "Name,Address,City,COUNTY,Zip,Risk_Capacity_Spaces,\
General_Pop,SPECIAL_NEEDS,Pet_Friendly,Evacuation_Zone";

/// Below this many open shelters the pre-planned inventory is consulted too.
const MIN_OPEN_SHELTERS: usize = 5;

const WEB_MERCATOR_HALF_EXTENT: f64 = 20_037_508.34;

pub fn default_policy() -> SourcePolicy {
    SourcePolicy::new(300, 30, 60, 5)
}

/// Zone keys use four decimals (~11 m); zone boundaries are precise.
pub fn zone_key(point: GeoPoint) -> GridKey {
    GridKey::new(point, 4)
}

/// Shelter and route keys use three decimals plus the search radius.
pub fn area_key(point: GeoPoint, radius_mi: f64) -> GridKey {
    GridKey::new(point, 3).with_radius_mi(radius_mi)
}

/// Priority of a zone letter, `1` (A) most urgent, `99` when unknown.
pub fn zone_priority(zone: &str) -> u8 {
    match zone.trim().to_ascii_uppercase().as_str() {
        "A" => 1,
        "B" => 2,
        "C" => 3,
        "D" => 4,
        "E" => 5,
        "F" => 6,
        _ => 99,
    }
}

/// Convert Web Mercator metres (EPSG:3857) to WGS84 degrees.
pub fn web_mercator_to_wgs84(x: f64, y: f64) -> GeoPoint {
    let lon = x * 180.0 / WEB_MERCATOR_HALF_EXTENT;
    let lat = (y * std::f64::consts::PI / WEB_MERCATOR_HALF_EXTENT).exp().atan() * 360.0
        / std::f64::consts::PI
        - 90.0;
    GeoPoint::new(lat, lon)
}

// ─────────────────────────────────────────────────────────────────────────────
// ArcGIS response envelope
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(bound = "A: DeserializeOwned + Default")]
struct FeatureSet<A> {
    #[serde(default)]
    features: Vec<ArcFeature<A>>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(bound = "A: DeserializeOwned + Default")]
struct ArcFeature<A> {
    #[serde(default)]
    attributes: A,
    geometry: Option<ArcPoint>,
}

#[derive(Deserialize)]
struct ArcPoint {
    #[serde(default, deserialize_with = "lenient_f64")]
    x: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    y: f64,
}

impl ArcPoint {
    /// Degrees pass through; projected metres are converted.
    fn to_geo(&self) -> Option<GeoPoint> {
        if self.x.abs() > 180.0 || self.y.abs() > 90.0 {
            let p = web_mercator_to_wgs84(self.x, self.y);
            GeoPoint::from_raw(p.lat, p.lon)
        } else {
            GeoPoint::from_raw(self.y, self.x)
        }
    }
}

fn parse_features<A: DeserializeOwned + Default>(
    layer: &str,
    body: serde_json::Value,
) -> Result<Vec<ArcFeature<A>>, SourceError> {
    let set: FeatureSet<A> = serde_json::from_value(body)
        .map_err(|e| SourceError::BadResponse(format!("{layer}: {e}")))?;
    if let Some(err) = set.error {
        return Err(SourceError::BadResponse(format!("{layer}: {err}")));
    }
    Ok(set.features)
}

/// Query parameters shared by every point query.
fn point_params(point: GeoPoint, out_fields: &str, return_geometry: bool) -> Vec<(&'static str, String)> {
    vec![
        ("geometry", format!("{},{}", point.lon, point.lat)),
        ("geometryType", "esriGeometryPoint".into()),
        ("inSR", "4326".into()),
        ("spatialRel", "esriSpatialRelIntersects".into()),
        ("outFields", out_fields.into()),
        ("returnGeometry", return_geometry.to_string()),
        ("f", "json".into()),
    ]
}

fn radius_params(radius_mi: f64, max_records: u32) -> [(&'static str, String); 3] {
    [
        ("distance", format!("{:.0}", miles_to_metres(radius_mi))),
        ("units", "esriSRUnit_Meter".into()),
        ("resultRecordCount", max_records.to_string()),
    ]
}

async fn query_layer(
    client: &reqwest::Client,
    url: &str,
    params: &[(&'static str, String)],
) -> Result<serde_json::Value, SourceError> {
    Ok(client
        .get(url)
        .query(params)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?)
}

fn or_unknown(s: String) -> String {
    if s.trim().is_empty() { "Unknown".into() } else { s }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evacuation zones
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EvacuationZone {
    /// Zone letter, `A` through `F`.
    pub zone: String,
    pub county: String,
    pub status: String,
    pub priority: u8,
}

impl EvacuationZone {
    /// Zones A and B.
    pub fn is_high_priority(&self) -> bool {
        self.priority <= 2
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ZoneAttributes {
    #[serde(rename = "EZone", deserialize_with = "lenient_string")]
    zone: String,
    #[serde(rename = "County_Nam", deserialize_with = "lenient_string")]
    county: String,
    #[serde(rename = "STATUS", deserialize_with = "lenient_string")]
    status: String,
}

/// The zone containing the queried point, if any.
pub fn parse_zone(body: serde_json::Value) -> Result<Option<EvacuationZone>, SourceError> {
    let features = parse_features::<ZoneAttributes>("fdem zones", body)?;
    Ok(features.into_iter().next().map(|f| {
        let a = f.attributes;
        EvacuationZone {
            priority: zone_priority(&a.zone),
            zone: or_unknown(a.zone),
            county: or_unknown(a.county),
            status: or_unknown(a.status),
        }
    }))
}

pub struct FdemZones {
    url: String,
    client: reqwest::Client,
}

impl Default for FdemZones {
    fn default() -> Self {
        Self::with_base(FDEM_BASE)
    }
}

impl FdemZones {
    pub fn with_base(base: &str) -> Self {
        Self {
            url: format!("{base}/{ZONES_LAYER}"),
            client: http_client(Duration::from_secs(5)),
        }
    }
}

#[async_trait]
impl RemoteSource for FdemZones {
    type Key = GridKey;
    type Payload = Option<EvacuationZone>;

    fn name(&self) -> &str {
        "fdem-zones"
    }

    async fn fetch_remote(&self, key: &GridKey) -> Result<Self::Payload, SourceError> {
        let params = point_params(key.point(), "EZone,County_Nam,STATUS", false);
        let zone = parse_zone(query_layer(&self.client, &self.url, &params).await?)?;
        debug!(zone = ?zone.as_ref().map(|z| &z.zone), "fdem zone fetched");
        Ok(zone)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shelters
// ─────────────────────────────────────────────────────────────────────────────

/// Which layer a shelter came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShelterSource {
    /// Opened for the current event.
    Active,
    /// Pre-planned risk shelter inventory.
    Inventory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shelter {
    pub name: String,
    pub address: String,
    pub county: String,
    pub capacity: u32,
    /// Only reported by active shelters.
    pub availability: Option<u32>,
    pub pet_friendly: bool,
    pub special_needs: bool,
    pub status: String,
    pub source: ShelterSource,
    pub location: GeoPoint,
    pub distance_m: f64,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct OpenShelterAttributes {
    #[serde(deserialize_with = "lenient_string")]
    label: String,
    #[serde(deserialize_with = "lenient_string")]
    street: String,
    #[serde(deserialize_with = "lenient_string")]
    city: String,
    #[serde(deserialize_with = "lenient_string")]
    county: String,
    #[serde(deserialize_with = "lenient_string")]
    zip: String,
    #[serde(deserialize_with = "lenient_f64")]
    gen_capacity: f64,
    #[serde(deserialize_with = "lenient_f64")]
    gen_availability: f64,
    #[serde(deserialize_with = "lenient_string")]
    pet_friendly: String,
    #[serde(deserialize_with = "lenient_string")]
    special_needs: String,
    #[serde(deserialize_with = "lenient_string")]
    status: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct InventoryAttributes {
    #[serde(rename = "Name", deserialize_with = "lenient_string")]
    name: String,
    #[serde(rename = "Address", deserialize_with = "lenient_string")]
    address: String,
    #[serde(rename = "City", deserialize_with = "lenient_string")]
    city: String,
    #[serde(rename = "COUNTY", deserialize_with = "lenient_string")]
    county: String,
    #[serde(rename = "Zip", deserialize_with = "lenient_string")]
    zip: String,
    #[serde(rename = "Risk_Capacity_Spaces", deserialize_with = "lenient_f64")]
    capacity: f64,
    #[serde(rename = "SPECIAL_NEEDS", deserialize_with = "lenient_string")]
    special_needs: String,
    #[serde(rename = "Pet_Friendly", deserialize_with = "lenient_string")]
    pet_friendly: String,
}

fn yes(s: &str) -> bool {
    matches!(s.trim().to_ascii_lowercase().as_str(), "yes" | "y" | "true" | "1")
}

fn join_address(parts: [&str; 3]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn count(v: f64) -> u32 {
    if v.is_finite() && v > 0.0 { v.round() as u32 } else { 0 }
}

/// Shelters within `radius_mi` of `origin`; unlocated rows are dropped.
pub fn parse_shelters(
    body: serde_json::Value,
    source: ShelterSource,
    origin: GeoPoint,
    radius_mi: f64,
) -> Result<Vec<Shelter>, SourceError> {
    let radius_m = miles_to_metres(radius_mi);
    let located = |geometry: Option<ArcPoint>| {
        let location = geometry.as_ref().and_then(ArcPoint::to_geo)?;
        let distance_m = origin.distance_m(&location);
        (distance_m <= radius_m).then_some((location, distance_m))
    };

    let shelters = match source {
        ShelterSource::Active => parse_features::<OpenShelterAttributes>("fdem open shelters", body)?
            .into_iter()
            .filter_map(|f| {
                let (location, distance_m) = located(f.geometry)?;
                let a = f.attributes;
                Some(Shelter {
                    name: if a.label.trim().is_empty() { "Unknown Shelter".into() } else { a.label },
                    address: join_address([&a.street, &a.city, &a.zip]),
                    county: a.county,
                    capacity: count(a.gen_capacity),
                    availability: Some(count(a.gen_availability)),
                    pet_friendly: yes(&a.pet_friendly),
                    special_needs: yes(&a.special_needs),
                    status: or_unknown(a.status),
                    source,
                    location,
                    distance_m,
                })
            })
            .collect(),
        ShelterSource::Inventory => parse_features::<InventoryAttributes>("fdem shelter inventory", body)?
            .into_iter()
            .filter_map(|f| {
                let (location, distance_m) = located(f.geometry)?;
                let a = f.attributes;
                Some(Shelter {
                    name: if a.name.trim().is_empty() { "Unknown Shelter".into() } else { a.name },
                    address: join_address([&a.address, &a.city, &a.zip]),
                    county: a.county,
                    capacity: count(a.capacity),
                    availability: None,
                    pet_friendly: yes(&a.pet_friendly),
                    special_needs: yes(&a.special_needs),
                    status: "Planned".into(),
                    source,
                    location,
                    distance_m,
                })
            })
            .collect(),
    };
    Ok(shelters)
}

/// Open shelters first, supplemented from the inventory when few are open.
pub struct FdemShelters {
    open_url: String,
    inventory_url: String,
    client: reqwest::Client,
}

impl Default for FdemShelters {
    fn default() -> Self {
        Self::with_base(FDEM_BASE)
    }
}

impl FdemShelters {
    pub fn with_base(base: &str) -> Self {
        Self {
            open_url: format!("{base}/{OPEN_SHELTERS_LAYER}"),
            inventory_url: format!("{base}/{SHELTER_INVENTORY_LAYER}"),
            client: http_client(Duration::from_secs(5)),
        }
    }

    async fn query(
        &self,
        source: ShelterSource,
        key: &GridKey,
    ) -> Result<Vec<Shelter>, SourceError> {
        let (url, fields) = match source {
            ShelterSource::Active => (&self.open_url, OPEN_SHELTER_FIELDS),
            ShelterSource::Inventory => (&self.inventory_url, INVENTORY_FIELDS),
        };
        let mut params = point_params(key.point(), fields, true);
        params.extend(radius_params(key.radius_mi(), 20));
        let body = query_layer(&self.client, url, &params).await?;
        parse_shelters(body, source, key.point(), key.radius_mi())
    }
}

#[async_trait]
impl RemoteSource for FdemShelters {
    type Key = GridKey;
    type Payload = Arc<Vec<Shelter>>;

    fn name(&self) -> &str {
        "fdem-shelters"
    }

    async fn fetch_remote(&self, key: &GridKey) -> Result<Self::Payload, SourceError> {
        let open = self.query(ShelterSource::Active, key).await;
        let mut shelters = match &open {
            Ok(list) => list.clone(),
            Err(e) => {
                warn!(error = %e, "open shelter layer failed");
                Vec::new()
            }
        };
        if shelters.len() < MIN_OPEN_SHELTERS {
            match self.query(ShelterSource::Inventory, key).await {
                Ok(inventory) => shelters.extend(inventory),
                // Both layers down: let the cache serve what it has.
                Err(e) if open.is_err() => return Err(e),
                Err(e) => warn!(error = %e, "shelter inventory layer failed"),
            }
        }
        shelters.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        debug!(count = shelters.len(), "fdem shelters fetched");
        Ok(Arc::new(shelters))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evacuation routes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct EvacuationRoute {
    pub name: String,
    pub highway_number: String,
    pub shield: String,
    pub county: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RouteAttributes {
    #[serde(rename = "NAME", deserialize_with = "lenient_string")]
    name: String,
    #[serde(rename = "HWY_NUM", deserialize_with = "lenient_string")]
    highway_number: String,
    #[serde(rename = "SHIELD", deserialize_with = "lenient_string")]
    shield: String,
    #[serde(rename = "NAMELSAD", deserialize_with = "lenient_string")]
    county: String,
}

/// Designated routes; unnamed rows without a highway number are dropped.
pub fn parse_routes(body: serde_json::Value) -> Result<Vec<EvacuationRoute>, SourceError> {
    let features = parse_features::<RouteAttributes>("fdem routes", body)?;
    Ok(features
        .into_iter()
        .filter_map(|f| {
            let a = f.attributes;
            let name = if !a.name.trim().is_empty() {
                a.name.trim().to_string()
            } else if !a.shield.trim().is_empty() && !a.highway_number.trim().is_empty() {
                format!("{}-{}", a.shield.trim(), a.highway_number.trim())
            } else {
                a.highway_number.trim().to_string()
            };
            (!name.is_empty()).then(|| EvacuationRoute {
                name,
                highway_number: a.highway_number,
                shield: a.shield,
                county: a.county,
            })
        })
        .collect())
}

pub struct FdemRoutes {
    url: String,
    client: reqwest::Client,
}

impl Default for FdemRoutes {
    fn default() -> Self {
        Self::with_base(FDEM_BASE)
    }
}

impl FdemRoutes {
    pub fn with_base(base: &str) -> Self {
        Self {
            url: format!("{base}/{ROUTES_LAYER}"),
            client: http_client(Duration::from_secs(5)),
        }
    }
}

#[async_trait]
impl RemoteSource for FdemRoutes {
    type Key = GridKey;
    type Payload = Arc<Vec<EvacuationRoute>>;

    fn name(&self) -> &str {
        "fdem-routes"
    }

    async fn fetch_remote(&self, key: &GridKey) -> Result<Self::Payload, SourceError> {
        let mut params = point_params(key.point(), "NAME,HWY_NUM,SHIELD,NAMELSAD", false);
        params.extend(radius_params(key.radius_mi(), 10));
        let routes = parse_routes(query_layer(&self.client, &self.url, &params).await?)?;
        debug!(count = routes.len(), "fdem routes fetched");
        Ok(Arc::new(routes))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// The three FDEM clients, each with its own cache and budget.
pub struct Fdem {
    pub zones: CachedClient<FdemZones>,
    pub shelters: CachedClient<FdemShelters>,
    pub routes: CachedClient<FdemRoutes>,
}

impl Default for Fdem {
    fn default() -> Self {
        Self::with_base(FDEM_BASE)
    }
}

impl Fdem {
    pub fn with_base(base: &str) -> Self {
        Self {
            zones: CachedClient::new(FdemZones::with_base(base), default_policy()),
            shelters: CachedClient::new(FdemShelters::with_base(base), default_policy()),
            routes: CachedClient::new(FdemRoutes::with_base(base), default_policy()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TAMPA: GeoPoint = GeoPoint {
        lat: 27.95,
        lon: -82.46,
    };

    #[test]
    fn zone_priorities() {
        assert_eq!(zone_priority("A"), 1);
        assert_eq!(zone_priority(" f "), 6);
        assert_eq!(zone_priority("Z"), 99);
        assert_eq!(zone_priority(""), 99);
    }

    #[test]
    fn parses_first_zone_feature() {
        let body = json!({"features": [
            {"attributes": {"EZone": "B", "County_Nam": "Hillsborough", "STATUS": null}},
            {"attributes": {"EZone": "A"}}
        ]});
        let zone = parse_zone(body).unwrap().unwrap();
        assert_eq!(zone.zone, "B");
        assert_eq!(zone.priority, 2);
        assert_eq!(zone.status, "Unknown");
        assert!(zone.is_high_priority());
    }

    #[test]
    fn no_zone_feature_is_none() {
        assert_eq!(parse_zone(json!({"features": []})).unwrap(), None);
    }

    #[test]
    fn arcgis_error_body_is_rejected() {
        let body = json!({"error": {"code": 400, "message": "Invalid query"}});
        assert!(matches!(parse_zone(body), Err(SourceError::BadResponse(_))));
    }

    #[test]
    fn web_mercator_converts_to_degrees() {
        let p = web_mercator_to_wgs84(-9_179_460.0, 3_242_780.0);
        assert!((p.lon - -82.46).abs() < 0.01, "{p:?}");
        assert!((p.lat - 27.95).abs() < 0.01, "{p:?}");
    }

    #[test]
    fn shelters_are_located_and_filtered_by_radius() {
        let body = json!({"features": [
            {
                "attributes": {"label": "Middleton HS", "street": "4801 N 22nd St",
                               "city": "Tampa", "zip": 33610, "gen_capacity": "800",
                               "gen_availability": 420, "pet_friendly": "Yes",
                               "special_needs": "No", "status": "Open"},
                "geometry": {"x": -82.43, "y": 27.99}
            },
            {
                "attributes": {"label": "Far Away"},
                "geometry": {"x": -81.0, "y": 29.0}
            },
            {
                "attributes": {"label": "No geometry"}
            }
        ]});
        let shelters = parse_shelters(body, ShelterSource::Active, TAMPA, 25.0).unwrap();
        assert_eq!(shelters.len(), 1);
        let s = &shelters[0];
        assert_eq!(s.address, "4801 N 22nd St Tampa 33610");
        assert_eq!(s.capacity, 800);
        assert_eq!(s.availability, Some(420));
        assert!(s.pet_friendly);
        assert!(!s.special_needs);
    }

    #[test]
    fn inventory_rows_accept_projected_geometry() {
        let body = json!({"features": [{
            "attributes": {"Name": "", "Address": "1 Main", "Risk_Capacity_Spaces": 150},
            "geometry": {"x": -9_179_460.0, "y": 3_242_780.0}
        }]});
        let shelters = parse_shelters(body, ShelterSource::Inventory, TAMPA, 5.0).unwrap();
        assert_eq!(shelters.len(), 1);
        assert_eq!(shelters[0].name, "Unknown Shelter");
        assert_eq!(shelters[0].availability, None);
        assert_eq!(shelters[0].source, ShelterSource::Inventory);
    }

    #[test]
    fn route_names_fall_back_to_shield_and_number() {
        let body = json!({"features": [
            {"attributes": {"NAME": " I-75 ", "HWY_NUM": "75", "SHIELD": "I"}},
            {"attributes": {"NAME": "", "HWY_NUM": "60", "SHIELD": "SR"}},
            {"attributes": {"NAME": null, "HWY_NUM": "41"}},
            {"attributes": {}}
        ]});
        let names: Vec<String> = parse_routes(body).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["I-75", "SR-60", "41"]);
    }

    #[test]
    fn area_keys_include_radius() {
        assert_ne!(area_key(TAMPA, 10.0), area_key(TAMPA, 15.0));
        assert_eq!(zone_key(TAMPA).point(), TAMPA);
    }
}
