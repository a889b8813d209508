//! Location descriptors shared by Requirement and Availability.

use serde::{Deserialize, Serialize};

/// Mean earth radius in km, used by the haversine distance calculation.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A single point a party is willing to deliver to/from.
///
/// A `Requirement.delivery_locations` is a set of these; an `Availability`
/// carries either a `Registered` location id or a single `AdHoc` point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationSpec {
    Registered { location_id: String },
    AdHoc {
        lat: f64,
        lng: f64,
        /// Maximum radius, in km, this point is reachable/willing to serve.
        radius_km: f64,
        address: Option<String>,
        pincode: Option<String>,
        region: Option<String>,
    },
}

impl LocationSpec {
    pub fn registered(location_id: impl Into<String>) -> Self {
        LocationSpec::Registered {
            location_id: location_id.into(),
        }
    }

    pub fn ad_hoc(lat: f64, lng: f64, radius_km: f64) -> Self {
        LocationSpec::AdHoc {
            lat,
            lng,
            radius_km,
            address: None,
            pincode: None,
            region: None,
        }
    }

    pub fn registered_id(&self) -> Option<&str> {
        match self {
            LocationSpec::Registered { location_id } => Some(location_id),
            LocationSpec::AdHoc { .. } => None,
        }
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match self {
            LocationSpec::AdHoc { lat, lng, .. } => Some((*lat, *lng)),
            LocationSpec::Registered { .. } => None,
        }
    }
}

/// Great-circle distance between two points, in km.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = a;
    let (lat2, lon2) = b;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Whether `point` is reachable from any location in `set`: an exact
/// registered-location match, or within `max_km` of an ad-hoc point.
pub fn matches_any(point: &LocationSpec, set: &[LocationSpec], max_km: f64) -> bool {
    set.iter().any(|candidate| locations_match(point, candidate, max_km))
}

pub fn locations_match(a: &LocationSpec, b: &LocationSpec, max_km: f64) -> bool {
    match (a.registered_id(), b.registered_id()) {
        (Some(x), Some(y)) => return x == y,
        _ => {}
    }
    match (a.coordinates(), b.coordinates()) {
        (Some(p1), Some(p2)) => haversine_km(p1, p2) <= max_km,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_locations_match_by_id() {
        let a = LocationSpec::registered("L1");
        let b = LocationSpec::registered("L1");
        assert!(locations_match(&a, &b, 50.0));
        let c = LocationSpec::registered("L2");
        assert!(!locations_match(&a, &c, 50.0));
    }

    #[test]
    fn ad_hoc_within_radius_matches() {
        let a = LocationSpec::ad_hoc(12.9716, 77.5946, 25.0); // Bangalore
        let b = LocationSpec::ad_hoc(12.9279, 77.6271, 10.0); // ~7km away
        assert!(locations_match(&a, &b, 25.0));
    }

    #[test]
    fn ad_hoc_beyond_radius_does_not_match() {
        let a = LocationSpec::ad_hoc(12.9716, 77.5946, 25.0); // Bangalore
        let b = LocationSpec::ad_hoc(28.7041, 77.1025, 10.0); // Delhi, ~1700km away
        assert!(!locations_match(&a, &b, 25.0));
    }

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert!(haversine_km((10.0, 20.0), (10.0, 20.0)) < 1e-9);
    }
}
