//! Geospatial filtering of located items around a reference point.

use roadwise_types::GeoPoint;
use roadwise_types::geo::{metres_to_miles, miles_to_metres};

/// Something with an optional position and optional road attributes.
pub trait Located {
    fn location(&self) -> Option<GeoPoint>;

    /// Direction of travel, e.g. `"Northbound"`.
    fn direction(&self) -> Option<&str> {
        None
    }

    /// Corridor (roadway) name, e.g. `"I-95"`.
    fn corridor(&self) -> Option<&str> {
        None
    }
}

/// Radius and optional attribute filters.  Attribute filters match
/// case-insensitive substrings; an item lacking the attribute is dropped when
/// the filter is set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NearbyFilter {
    pub radius_m: f64,
    pub direction: Option<String>,
    pub corridor: Option<String>,
}

impl NearbyFilter {
    pub fn within_miles(miles: f64) -> Self {
        Self {
            radius_m: miles_to_metres(miles),
            ..Self::default()
        }
    }

    pub fn direction(mut self, direction: Option<&str>) -> Self {
        self.direction = non_blank(direction);
        self
    }

    pub fn corridor(mut self, corridor: Option<&str>) -> Self {
        self.corridor = non_blank(corridor);
        self
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_lowercase)
}

fn contains_ci(haystack: Option<&str>, needle: &str) -> bool {
    haystack.is_some_and(|h| h.to_lowercase().contains(needle))
}

/// An item annotated with its distance from the reference point.
#[derive(Debug, Clone, PartialEq)]
pub struct Nearby<T> {
    pub item: T,
    pub distance_m: f64,
}

impl<T> Nearby<T> {
    pub fn distance_mi(&self) -> f64 {
        metres_to_miles(self.distance_m)
    }
}

/// Items within `filter.radius_m` of `origin` that pass the attribute
/// filters, nearest first.  Items without a location are skipped.
///
/// ```
/// use roadwise_sources::nearby::{filter_nearby, Located, NearbyFilter};
/// use roadwise_types::GeoPoint;
///
/// #[derive(Clone)]
/// struct Cone(GeoPoint);
/// impl Located for Cone {
///     fn location(&self) -> Option<GeoPoint> { Some(self.0) }
/// }
///
/// let origin = GeoPoint::new(28.0, -81.0);
/// let cones = [Cone(GeoPoint::new(28.01, -81.0)), Cone(GeoPoint::new(29.0, -81.0))];
/// let hits = filter_nearby(&cones, &origin, &NearbyFilter::within_miles(5.0));
/// assert_eq!(hits.len(), 1);
/// ```
pub fn filter_nearby<T: Located + Clone>(
    items: &[T],
    origin: &GeoPoint,
    filter: &NearbyFilter,
) -> Vec<Nearby<T>> {
    let mut hits: Vec<Nearby<T>> = items
        .iter()
        .filter_map(|item| {
            let distance_m = item.location()?.distance_m(origin);
            if distance_m > filter.radius_m {
                return None;
            }
            let wrong_direction = filter
                .direction
                .as_deref()
                .is_some_and(|dir| !contains_ci(item.direction(), dir));
            let wrong_corridor = filter
                .corridor
                .as_deref()
                .is_some_and(|road| !contains_ci(item.corridor(), road));
            if wrong_direction || wrong_corridor {
                return None;
            }
            Some(Nearby {
                item: item.clone(),
                distance_m,
            })
        })
        .collect();
    hits.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
    hits
}
