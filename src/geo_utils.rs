//! Geographic utilities: distances, bounds and interpolation.
//!
//! Surface distances use the haversine formula from `geo`. Slant distances
//! (camera to target) go through WGS84 Earth-centered coordinates so that
//! altitude is part of the metric.

use geo::{Distance, Haversine, Point};

use crate::{Bounds, GeoPoint};

/// WGS84 semi-major axis in meters.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 first eccentricity squared.
const WGS84_E2: f64 = 6.694_379_990_141_316e-3;
/// Meters per degree of latitude (mean).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Great-circle distance between two points in meters, ignoring altitude.
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

/// Convert a geodetic position to Earth-centered, Earth-fixed coordinates.
pub fn to_ecef(p: &GeoPoint) -> [f64; 3] {
    let lat = p.latitude.to_radians();
    let lng = p.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    [
        (n + p.altitude) * cos_lat * lng.cos(),
        (n + p.altitude) * cos_lat * lng.sin(),
        (n * (1.0 - WGS84_E2) + p.altitude) * sin_lat,
    ]
}

/// Straight-line (chord) distance in meters, altitude included.
pub fn slant_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let a = to_ecef(p1);
    let b = to_ecef(p2);
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)).sqrt()
}

/// Distance a camera moved: surface distance combined with the altitude change.
pub fn movement_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let surface = haversine_distance(p1, p2);
    let vertical = p2.altitude - p1.altitude;
    (surface * surface + vertical * vertical).sqrt()
}

/// Convert a distance in meters to (latitude, longitude) degree spans at `latitude`.
///
/// The longitude span is `None` near the poles where it is unbounded.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> (f64, Option<f64>) {
    let dlat = meters / METERS_PER_DEGREE;
    let cos_lat = latitude.to_radians().cos();
    if cos_lat < 1e-6 {
        return (dlat, None);
    }
    (dlat, Some(meters / (METERS_PER_DEGREE * cos_lat)))
}

/// Bounding box of a set of points, `None` when empty.
pub fn compute_bounds(points: &[GeoPoint]) -> Option<Bounds> {
    Bounds::from_points(points)
}

/// Check whether two bounding boxes intersect.
pub fn bounds_overlap(a: &Bounds, b: &Bounds) -> bool {
    a.min_lat <= b.max_lat
        && a.max_lat >= b.min_lat
        && a.min_lng <= b.max_lng
        && a.max_lng >= b.min_lng
}

/// Surface length of the bounds' diagonal in meters.
pub fn bounds_diagonal(bounds: &Bounds) -> f64 {
    haversine_distance(
        &GeoPoint::new(bounds.min_lat, bounds.min_lng, 0.0),
        &GeoPoint::new(bounds.max_lat, bounds.max_lng, 0.0),
    )
}

/// Linear interpolation between two positions.
///
/// Longitude takes the short way around the antimeridian.
pub fn interpolate(a: &GeoPoint, b: &GeoPoint, fraction: f64) -> GeoPoint {
    let t = fraction.clamp(0.0, 1.0);
    let mut d_lng = b.longitude - a.longitude;
    if d_lng > 180.0 {
        d_lng -= 360.0;
    } else if d_lng < -180.0 {
        d_lng += 360.0;
    }
    let mut longitude = a.longitude + d_lng * t;
    if longitude > 180.0 {
        longitude -= 360.0;
    } else if longitude < -180.0 {
        longitude += 360.0;
    }
    GeoPoint {
        latitude: a.latitude + (b.latitude - a.latitude) * t,
        longitude,
        altitude: a.altitude + (b.altitude - a.altitude) * t,
    }
}
