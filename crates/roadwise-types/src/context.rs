//! [`ContextSnapshot`] – the immutable view of the vehicle for one cycle.
//!
//! A snapshot is built once by the context source and shared read-only with
//! the reasoning engine and every capability executed in the same cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Ego-vehicle kinematics and driver inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleState {
    pub speed_ms: f32,
    pub accel_ms2: f32,
    pub heading_deg: f32,
    pub steering_deg: f32,
    /// Cruise set-point in m/s, `0.0` when unset.
    pub cruise_set_ms: f32,
    pub cruise_enabled: bool,
    pub brake_pressed: bool,
    pub gas_pressed: bool,
    pub left_blinker: bool,
    pub right_blinker: bool,
    pub standstill: bool,
    pub gear: String,
}

impl VehicleState {
    /// The speed a reduction should be computed from: the higher of the
    /// current speed and the cruise set-point.
    pub fn reference_speed_ms(&self) -> f32 {
        self.speed_ms.max(self.cruise_set_ms)
    }
}

/// A satellite position fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpsFix {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f32,
    pub bearing_deg: f32,
}

/// A radar-tracked vehicle ahead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadVehicle {
    pub distance_m: f32,
    pub speed_ms: f32,
    pub relative_speed_ms: f32,
}

/// Road attributes from the map layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapAttributes {
    pub road_name: Option<String>,
    pub speed_limit_ms: Option<f32>,
    pub speed_limit_ahead_ms: Option<f32>,
    pub speed_limit_ahead_distance_m: Option<f32>,
}

/// Cellular / wifi link as reported by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkStatus {
    /// `none`, `wifi`, `cell2G`, `cell3G`, `cell4G`, `cell5G`, `ethernet`.
    pub network_type: String,
    /// `unknown`, `poor`, `moderate`, `good`, `great`.
    pub strength: String,
    pub metered: bool,
    pub operator: Option<String>,
    pub technology: Option<String>,
    pub last_cloud_ping_s_ago: Option<f64>,
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self {
            network_type: "none".to_string(),
            strength: "unknown".to_string(),
            metered: false,
            operator: None,
            technology: None,
            last_cloud_ping_s_ago: None,
        }
    }
}

/// Engagement flags of the host driver-assistance system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemState {
    pub enabled: bool,
    pub active: bool,
}

/// Opaque JPEG-encoded camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub jpeg: Vec<u8>,
}

/// Everything known about the vehicle at the start of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSnapshot {
    pub captured_at: DateTime<Utc>,
    pub vehicle: VehicleState,
    /// `None` means "no fix".
    pub gps: Option<GpsFix>,
    pub leads: Vec<LeadVehicle>,
    pub map: MapAttributes,
    pub network: NetworkStatus,
    pub system: SystemState,
    /// Attached by the capture side; never serialized.
    #[serde(skip)]
    pub frame: Option<Frame>,
}

impl Default for ContextSnapshot {
    fn default() -> Self {
        Self {
            captured_at: Utc::now(),
            vehicle: VehicleState::default(),
            gps: None,
            leads: Vec::new(),
            map: MapAttributes::default(),
            network: NetworkStatus::default(),
            system: SystemState::default(),
            frame: None,
        }
    }
}

impl ContextSnapshot {
    /// Current position, or `None` without a usable fix.
    pub fn location(&self) -> Option<GeoPoint> {
        self.gps.and_then(|fix| GeoPoint::from_raw(fix.lat, fix.lon))
    }

    /// Closest lead vehicle, if any is tracked.
    pub fn nearest_lead(&self) -> Option<&LeadVehicle> {
        self.leads
            .iter()
            .filter(|l| l.distance_m.is_finite())
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    }
}
