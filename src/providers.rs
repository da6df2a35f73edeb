//! Seams to the outside world: routing, geocoding, corridor POIs, radars
//! and the alert output.
//!
//! Async provider methods return boxed futures so the traits stay object
//! safe and can be implemented by HTTP clients or in-memory fakes alike.

use std::collections::HashSet;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::CorridorConfig;
use crate::error::Result;
use crate::poi::{PoiKind, PointOfInterest};
use crate::GpsPoint;

// ============================================================================
// Routing
// ============================================================================

/// How a route candidate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteKind {
    Fastest,
    Alternative,
    Shortest,
    TollFree,
}

/// A route offered to the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub name: String,
    pub kind: RouteKind,
    pub polyline: Vec<GpsPoint>,
    pub distance_m: f64,
    pub duration_s: f64,
}

impl RouteCandidate {
    pub fn new(
        name: impl Into<String>,
        kind: RouteKind,
        polyline: Vec<GpsPoint>,
        distance_m: f64,
        duration_s: f64,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            polyline,
            distance_m,
            duration_s,
        }
    }
}

/// A route as returned by the router, before naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedPath {
    pub polyline: Vec<GpsPoint>,
    pub distance_m: f64,
    pub duration_s: f64,
}

/// Parameters of a routing request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteRequest {
    pub origin: GpsPoint,
    pub destination: GpsPoint,
    /// Maximum number of alternatives besides the main route
    pub alternatives: u8,
    pub avoid_tolls: bool,
}

impl RouteRequest {
    pub fn new(origin: GpsPoint, destination: GpsPoint) -> Self {
        Self {
            origin,
            destination,
            alternatives: 0,
            avoid_tolls: false,
        }
    }

    pub fn with_alternatives(mut self, alternatives: u8) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn avoiding_tolls(mut self) -> Self {
        self.avoid_tolls = true;
        self
    }
}

/// Computes driving routes between two coordinates.
pub trait RouteProvider: Send + Sync {
    /// Candidate routes, best first. An empty list means no route.
    fn routes(&self, request: RouteRequest) -> BoxFuture<'_, Result<Vec<RoutedPath>>>;
}

// ============================================================================
// Geocoding
// ============================================================================

/// Where a geocoding candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeocodeSource {
    Address,
    Poi,
}

/// A ranked geocoding match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeCandidate {
    pub label: String,
    pub position: GpsPoint,
    pub source: GeocodeSource,
}

impl GeocodeCandidate {
    pub fn new(label: impl Into<String>, position: GpsPoint, source: GeocodeSource) -> Self {
        Self {
            label: label.into(),
            position,
            source,
        }
    }
}

/// Turns free text into ranked coordinates.
pub trait Geocoder: Send + Sync {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<GeocodeCandidate>>>;
}

/// Concatenate result lists in order, keep the first candidate per label and
/// cap the total.
pub fn merge_geocode_results(
    lists: impl IntoIterator<Item = Vec<GeocodeCandidate>>,
    limit: usize,
) -> Vec<GeocodeCandidate> {
    let mut seen = HashSet::new();
    lists
        .into_iter()
        .flatten()
        .filter(|c| seen.insert(c.label.clone()))
        .take(limit)
        .collect()
}

// ============================================================================
// Points of interest
// ============================================================================

/// Loads traffic lights or police controls around a route.
pub trait PoiCorridorLoader: Send + Sync {
    /// POIs of `kind` within the corridor of `route` described by `corridor`.
    fn load_corridor<'a>(
        &'a self,
        route: &'a [GpsPoint],
        kind: PoiKind,
        corridor: &'a CorridorConfig,
    ) -> BoxFuture<'a, Result<Vec<PointOfInterest>>>;
}

/// Supplies the whole radar dataset.
pub trait RadarSource: Send + Sync {
    fn load_radars(&self) -> BoxFuture<'_, Result<Vec<PointOfInterest>>>;
}

// ============================================================================
// Output
// ============================================================================

/// What an announcement is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnouncementKind {
    /// Proximity alert for a POI category
    Alert(PoiKind),
    OffRoute,
    Route,
    /// Location provider problem the driver must know about
    Notice,
    /// Answer to a spoken/typed command
    Reply,
    Error,
}

/// Text for the presentation layer to show and speak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub kind: AnnouncementKind,
    /// On-screen text
    pub text: String,
    /// Spoken phrasing when it differs from `text`
    pub speech: Option<String>,
}

impl Announcement {
    pub fn new(kind: AnnouncementKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            speech: None,
        }
    }

    pub fn with_speech(mut self, speech: impl Into<String>) -> Self {
        self.speech = Some(speech.into());
        self
    }

    /// What to say out loud.
    pub fn spoken(&self) -> &str {
        self.speech.as_deref().unwrap_or(&self.text)
    }
}

/// Receives announcements. Rendering and speech live behind this.
pub trait AlertSink: Send {
    fn announce(&mut self, announcement: Announcement);
}

impl AlertSink for Vec<Announcement> {
    fn announce(&mut self, announcement: Announcement) {
        self.push(announcement);
    }
}
