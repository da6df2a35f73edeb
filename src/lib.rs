//! # Route Sentinel
//!
//! Position fusion and route proximity alerts for a voice navigation
//! assistant.
//!
//! This library provides:
//! - Fusion of noisy location fixes into a stable position, speed and heading
//! - Circular heading smoothing with jump rejection
//! - Off-route detection against the active route polyline
//! - Alert-once proximity warnings for speed cameras and police controls
//! - Async orchestration of routing, geocoding and corridor POI loading
//!
//! ## Features
//!
//! - **`parallel`** - Filter the national radar dataset with rayon
//! - **`http`** - HTTP providers (OSRM, address geocoding, Overpass, radar CSV)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use route_sentinel::{GpsPoint, NavigationSession, NavConfig, RawSample};
//! use route_sentinel::providers::{RouteCandidate, RouteKind};
//!
//! let mut session = NavigationSession::create(NavConfig::default()).unwrap();
//!
//! let route = RouteCandidate::new(
//!     "Fastest",
//!     RouteKind::Fastest,
//!     vec![GpsPoint::new(48.8566, 2.3522), GpsPoint::new(45.7640, 4.8357)],
//!     392_000.0,
//!     14_400.0,
//! );
//! session.set_active_route(route, &[]).unwrap();
//!
//! let sample = RawSample::new(48.8566, 2.3522, 5.0, 1_000).with_speed(25.0);
//! if let Some(update) = session.ingest_sample(sample) {
//!     let speed = update.fused.speed_kmh.unwrap();
//!     assert!((speed - 90.0).abs() < 1e-9);
//!     assert!(!update.proximity.recalculation_requested);
//! }
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{NavError, OptionExt, Result};

// Tunable constants
pub mod config;
pub use config::{
    CorridorConfig, FusionConfig, NavConfig, ProximityConfig, RouteSettings, SmootherConfig,
};

// Geographic utilities (distance, bearing, point-to-segment projection)
pub mod geo_utils;

// Position fusion engine
pub mod fusion;
pub use fusion::{FusedState, PositionFusion, RawSample, SampleBuffer};

// Heading smoothing and speed display
pub mod smoother;
pub use smoother::{HeadingSmoother, SpeedDisplay};

// Points of interest: radars, traffic lights, police controls
pub mod poi;
pub use poi::{PoiAttributes, PoiIndex, PoiKind, PointOfInterest};

// Alert deduplication
pub mod alerts;
pub use alerts::{AlertEvent, AlertLog};

// Off-route detection and proximity alerts
pub mod proximity;
pub use proximity::{NearestPoi, OffRouteState, ProximityReport, RouteProximityMonitor};

// Navigation session (owns all per-run state)
pub mod session;
pub use session::{Notice, NavigationSession, RouteVersion, SessionUpdate};

// Cancellable location stream
pub mod tracking;
pub use tracking::{LocationErrorKind, LocationEvent, LocationFeed, LocationSubscription, StopHandle};

// External service seams
pub mod providers;
pub use providers::{
    AlertSink, Announcement, GeocodeCandidate, Geocoder, PoiCorridorLoader, RadarSource,
    RouteCandidate, RouteKind, RouteProvider,
};

// Async orchestration
pub mod navigator;
pub use navigator::{format_travel_time, Navigator};

// Spoken/typed commands
pub mod commands;
pub use commands::Command;

// HTTP providers
#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::{FrenchGeocoder, OsrmRouter, OverpassLoader, RadarDataset};

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use route_sentinel::GpsPoint;
/// let point = GpsPoint::new(48.8566, 2.3522); // Paris
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Latitude/longitude bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        geo_utils::route_bounds(points)
    }

    /// Grow each side by `ratio` of the box's own height/width.
    ///
    /// A degenerate (zero-span) axis does not grow.
    pub fn pad(&self, ratio: f64) -> Self {
        let lat_pad = (self.max_lat - self.min_lat).abs() * ratio;
        let lng_pad = (self.max_lng - self.min_lng).abs() * ratio;
        Self {
            min_lat: self.min_lat - lat_pad,
            max_lat: self.max_lat + lat_pad,
            min_lng: self.min_lng - lng_pad,
            max_lng: self.max_lng + lng_pad,
        }
    }

    /// Grow each side by a fixed distance in meters.
    pub fn expand_m(&self, meters: f64) -> Self {
        let lat_deg = (meters / geo_utils::EARTH_RADIUS_M).to_degrees();
        let widest_lat = self.min_lat.abs().max(self.max_lat.abs()).min(89.0);
        let lng_deg = lat_deg / widest_lat.to_radians().cos();
        Self {
            min_lat: self.min_lat - lat_deg,
            max_lat: self.max_lat + lat_deg,
            min_lng: self.min_lng - lng_deg,
            max_lng: self.max_lng + lng_deg,
        }
    }

    /// Whether `point` lies inside the box (edges included).
    pub fn contains(&self, point: &GpsPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}
