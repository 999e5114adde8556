pub mod polyline;
pub mod service;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::courier::GeoPoint;

pub use service::GeoService;

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Assumed average urban courier speed for straight-line estimates.
pub const FALLBACK_SPEED_KMH: f64 = 25.0;
pub const FALLBACK_MIN_ETA_MINUTES: i64 = 3;
pub const DEFAULT_OFF_ROUTE_TOLERANCE_M: f64 = 200.0;

// Bounding box used to fabricate development coordinates.
const FALLBACK_BASE_LAT: f64 = -23.65;
const FALLBACK_BASE_LNG: f64 = -46.75;
const FALLBACK_SPAN_DEG: f64 = 0.2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrafficLevel {
    Light,
    Moderate,
    Heavy,
}

impl TrafficLevel {
    /// Classifies from the ratio of trafficked to free-flow duration.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > 1.5 {
            TrafficLevel::Heavy
        } else if ratio > 1.2 {
            TrafficLevel::Moderate
        } else {
            TrafficLevel::Light
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_meters: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteInfo {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    pub polyline: String,
    pub steps: Vec<RouteStep>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EtaEstimate {
    pub minutes: i64,
    pub distance_meters: f64,
    pub traffic_level: TrafficLevel,
}

pub fn haversine_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * central_angle
}

/// Deterministic pseudo-coordinate for an address. Development aid only.
pub fn fallback_geocode(address: &str) -> GeoPoint {
    let normalized = address.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());

    let lat_bits = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    let lng_bits = u32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]);

    GeoPoint {
        lat: FALLBACK_BASE_LAT + FALLBACK_SPAN_DEG * (lat_bits as f64 / u32::MAX as f64),
        lng: FALLBACK_BASE_LNG + FALLBACK_SPAN_DEG * (lng_bits as f64 / u32::MAX as f64),
    }
}

fn straight_line_seconds(distance_meters: f64) -> f64 {
    let meters_per_second = FALLBACK_SPEED_KMH * 1000.0 / 3600.0;
    distance_meters / meters_per_second
}

pub fn fallback_route(origin: &GeoPoint, destination: &GeoPoint) -> RouteInfo {
    let distance_meters = haversine_meters(origin, destination);
    let duration_seconds = straight_line_seconds(distance_meters);

    RouteInfo {
        distance_meters,
        duration_seconds,
        polyline: polyline::encode_delimited(&[*origin, *destination]),
        steps: vec![RouteStep {
            instruction: "Head straight to destination".to_string(),
            distance_meters,
            duration_seconds,
        }],
    }
}

pub fn fallback_eta(origin: &GeoPoint, destination: &GeoPoint) -> EtaEstimate {
    let distance_meters = haversine_meters(origin, destination);
    let minutes = (straight_line_seconds(distance_meters) / 60.0).round() as i64;

    EtaEstimate {
        minutes: minutes.max(FALLBACK_MIN_ETA_MINUTES),
        distance_meters,
        traffic_level: TrafficLevel::Moderate,
    }
}

/// True when `position` is farther than `tolerance_meters` from every point of the route.
/// An undecodable or empty route never reports off-route.
pub fn is_off_route(position: &GeoPoint, encoded_route: &str, tolerance_meters: f64) -> bool {
    let points = match polyline::decode_route(encoded_route) {
        Some(points) if !points.is_empty() => points,
        _ => return false,
    };

    let nearest = points
        .iter()
        .map(|point| haversine_meters(position, point))
        .fold(f64::INFINITY, f64::min);

    nearest > tolerance_meters
}

/// Point `meters` due north of `origin` along the meridian.
pub fn offset_north(origin: &GeoPoint, meters: f64) -> GeoPoint {
    GeoPoint {
        lat: origin.lat + (meters / EARTH_RADIUS_M).to_degrees(),
        lng: origin.lng,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sao_paulo() -> GeoPoint {
        GeoPoint {
            lat: -23.5505,
            lng: -46.6333,
        }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = sao_paulo();
        assert!(haversine_meters(&p, &p) < 1e-6);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_meters(&london, &paris);
        assert!((distance - 343_000.0).abs() < 5_000.0);
    }

    #[test]
    fn fallback_geocode_is_stable_and_bounded() {
        let first = fallback_geocode("Rua Augusta, 1500");
        let second = fallback_geocode("  rua augusta, 1500 ");
        assert_eq!(first, second);
        assert!(first.lat >= FALLBACK_BASE_LAT && first.lat <= FALLBACK_BASE_LAT + FALLBACK_SPAN_DEG);
        assert!(first.lng >= FALLBACK_BASE_LNG && first.lng <= FALLBACK_BASE_LNG + FALLBACK_SPAN_DEG);

        let other = fallback_geocode("Avenida Paulista, 900");
        assert_ne!(first, other);
    }

    #[test]
    fn fallback_eta_uses_urban_speed_with_floor() {
        let origin = sao_paulo();

        let near = fallback_eta(&origin, &offset_north(&origin, 100.0));
        assert_eq!(near.minutes, FALLBACK_MIN_ETA_MINUTES);
        assert_eq!(near.traffic_level, TrafficLevel::Moderate);

        // 25 km/h covers 5 km in 12 minutes.
        let far = fallback_eta(&origin, &offset_north(&origin, 5_000.0));
        assert_eq!(far.minutes, 12);
    }

    #[test]
    fn fallback_route_synthesizes_two_point_polyline() {
        let origin = sao_paulo();
        let destination = offset_north(&origin, 2_000.0);
        let route = fallback_route(&origin, &destination);

        let points = polyline::decode_route(&route.polyline).unwrap();
        assert_eq!(points.len(), 2);
        assert!((route.distance_meters - 2_000.0).abs() < 1.0);
        assert!((route.duration_seconds - 288.0).abs() < 1.0);
    }

    #[test]
    fn traffic_ratio_classification() {
        assert_eq!(TrafficLevel::from_ratio(1.0), TrafficLevel::Light);
        assert_eq!(TrafficLevel::from_ratio(1.2), TrafficLevel::Light);
        assert_eq!(TrafficLevel::from_ratio(1.3), TrafficLevel::Moderate);
        assert_eq!(TrafficLevel::from_ratio(1.5), TrafficLevel::Moderate);
        assert_eq!(TrafficLevel::from_ratio(1.51), TrafficLevel::Heavy);
    }

    #[test]
    fn off_route_beyond_tolerance() {
        let start = sao_paulo();
        let route = polyline::encode_delimited(&[start, offset_north(&start, 100.0)]);

        let far = offset_north(&start, 350.0);
        assert!(is_off_route(&far, &route, DEFAULT_OFF_ROUTE_TOLERANCE_M));

        let near = offset_north(&start, 250.0);
        assert!(!is_off_route(&near, &route, DEFAULT_OFF_ROUTE_TOLERANCE_M));
    }

    #[test]
    fn unreadable_route_is_never_off_route() {
        assert!(!is_off_route(&sao_paulo(), "", DEFAULT_OFF_ROUTE_TOLERANCE_M));

        let overflowing = format!("}}{}F", "~".repeat(11)).repeat(6);
        assert!(!is_off_route(&sao_paulo(), &overflowing, DEFAULT_OFF_ROUTE_TOLERANCE_M));
    }
}
