//! Geographic utilities: distances, bearings and point-to-route projection.
//!
//! All coordinates are WGS84 degrees. Distances use a spherical Earth of
//! radius 6 371 000 m.
//!
//! `point_to_segment_distance_km` projects in a locally flattened
//! (lon, lat) plane before measuring the great-circle distance to the
//! projected point. This is accurate at corridor scales (meters to a few
//! kilometers) and degrades at high latitudes or on very long segments.

use geo::{BoundingRect, Coord, LineString};

use crate::error::{NavError, OptionExt, Result};
use crate::{Bounds, GpsPoint};

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two coordinates.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Haversine distance between two GPS points in meters.
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    distance_meters(p1.latitude, p1.longitude, p2.latitude, p2.longitude)
}

/// Initial bearing from point 1 to point 2, in [0, 360).
pub fn bearing_degrees(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    normalize_degrees(y.atan2(x).to_degrees())
}

/// Distance in kilometers from `point` to the segment `a`-`b`.
///
/// The projection parameter is clamped to [0, 1], so points beyond either
/// end measure to that endpoint.
pub fn point_to_segment_distance_km(point: &GpsPoint, a: &GpsPoint, b: &GpsPoint) -> f64 {
    let ab = (b.longitude - a.longitude, b.latitude - a.latitude);
    let ap = (point.longitude - a.longitude, point.latitude - a.latitude);

    let ab2 = ab.0 * ab.0 + ab.1 * ab.1;
    let t = if ab2 > 0.0 {
        ((ap.0 * ab.0 + ap.1 * ab.1) / ab2).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let closest_lon = a.longitude + t * ab.0;
    let closest_lat = a.latitude + t * ab.1;

    distance_meters(point.latitude, point.longitude, closest_lat, closest_lon) / 1000.0
}

/// Minimum distance in meters from `point` to any segment of `route`.
///
/// A single-vertex route has no segment to follow and measures as
/// infinitely far, so a position is always off such a route. Returns `None`
/// for an empty route.
pub fn distance_to_route_m(point: &GpsPoint, route: &[GpsPoint]) -> Option<f64> {
    match route {
        [] => None,
        [_] => Some(f64::INFINITY),
        _ => route
            .windows(2)
            .map(|w| point_to_segment_distance_km(point, &w[0], &w[1]) * 1000.0)
            .reduce(f64::min),
    }
}

/// Whether `point` lies within `max_km` of any segment of `route`.
///
/// Short-circuits on the first segment inside the corridor.
pub fn is_within_corridor(point: &GpsPoint, route: &[GpsPoint], max_km: f64) -> bool {
    route
        .windows(2)
        .any(|w| point_to_segment_distance_km(point, &w[0], &w[1]) <= max_km)
}

/// Normalize an angle in degrees into [0, 360).
pub fn normalize_degrees(degrees: f64) -> f64 {
    let r = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if r >= 360.0 {
        0.0
    } else {
        r
    }
}

/// Shortest angular difference between two headings, in [0, 180].
pub fn angular_difference(a: f64, b: f64) -> f64 {
    let d = normalize_degrees(a - b);
    d.min(360.0 - d)
}

/// Check that `route` can be followed: two vertices or more, all of them
/// valid WGS84 coordinates.
pub fn validate_route(route: &[GpsPoint]) -> Result<()> {
    route
        .get(1)
        .ok_or_insufficient_points("route", route.len(), 2)?;
    match route.iter().find(|p| !p.is_valid()) {
        Some(p) => Err(NavError::InvalidCoordinates {
            latitude: p.latitude,
            longitude: p.longitude,
        }),
        None => Ok(()),
    }
}

/// Bounding box of a route polyline.
pub fn route_bounds(route: &[GpsPoint]) -> Option<Bounds> {
    let line: LineString<f64> = route
        .iter()
        .map(|p| Coord {
            x: p.longitude,
            y: p.latitude,
        })
        .collect::<Vec<_>>()
        .into();
    let rect = line.bounding_rect()?;

    Some(Bounds {
        min_lat: rect.min().y,
        max_lat: rect.max().y,
        min_lng: rect.min().x,
        max_lng: rect.max().x,
    })
}
