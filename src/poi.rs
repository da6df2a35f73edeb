//! Points of interest: speed cameras, traffic lights and police controls.
//!
//! Radars come from the national speed-camera dataset (CSV), loaded once
//! and filtered to a corridor around each selected route. Traffic lights
//! and police controls come from Overpass queries scoped to the route's
//! bounding box and are filtered to their own corridors.

use std::collections::BTreeMap;

use log::{debug, info};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::config::CorridorConfig;
use crate::error::Result;
use crate::geo_utils::{haversine_distance, is_within_corridor, EARTH_RADIUS_M};
use crate::{Bounds, GpsPoint};

// ============================================================================
// Core Types
// ============================================================================

/// Category of a point of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoiKind {
    Radar,
    TrafficLight,
    PoliceControl,
}

impl PoiKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoiKind::Radar => "radar",
            PoiKind::TrafficLight => "traffic_light",
            PoiKind::PoliceControl => "police_control",
        }
    }
}

/// Category-specific attributes. Unused fields stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoiAttributes {
    /// Equipment type for radars, "police station"/"possible control" for police
    pub label: Option<String>,
    pub road: Option<String>,
    pub town: Option<String>,
    pub department: Option<String>,
    /// Speed limit for cars (km/h)
    pub car_limit_kmh: Option<u32>,
    /// Speed limit for heavy vehicles (km/h)
    pub truck_limit_kmh: Option<u32>,
    /// Raw OpenStreetMap tags
    pub tags: BTreeMap<String, String>,
}

/// A radar, traffic light or police-control location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    /// Source identifier; may be empty for radars
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub kind: PoiKind,
    pub attributes: PoiAttributes,
}

impl PointOfInterest {
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, kind: PoiKind) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            kind,
            attributes: PoiAttributes::default(),
        }
    }

    pub fn with_attributes(mut self, attributes: PoiAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }

    /// Identifier used for alert deduplication.
    ///
    /// Radars without an id are keyed by their coordinates; police and
    /// light keys are namespaced so they never collide with radar ids.
    pub fn alert_key(&self) -> String {
        match self.kind {
            PoiKind::Radar if self.id.is_empty() => {
                format!("{},{}", self.latitude, self.longitude)
            }
            PoiKind::Radar => self.id.clone(),
            PoiKind::PoliceControl => format!("police_{}", self.id),
            PoiKind::TrafficLight => format!("light_{}", self.id),
        }
    }

    /// Car speed limit as text, falling back to the truck limit.
    pub fn limit_text(&self) -> Option<String> {
        match (self.attributes.car_limit_kmh, self.attributes.truck_limit_kmh) {
            (Some(v), _) => Some(format!("{} km/h", v)),
            (None, Some(v)) => Some(format!("{} km/h (HGV)", v)),
            (None, None) => None,
        }
    }

    pub fn is_police_station(&self) -> bool {
        self.attributes.tags.get("amenity").map(String::as_str) == Some("police")
    }
}

// ============================================================================
// Radar Dataset
// ============================================================================

const ID_COLUMNS: &[&str] = &["id", "ID"];
const LAT_COLUMNS: &[&str] = &["latitude", "lat", "Latitude", "y"];
const LON_COLUMNS: &[&str] = &["longitude", "lon", "Longitude", "x"];
const TYPE_COLUMNS: &[&str] = &["type", "Type", "equipement"];
const ROAD_COLUMNS: &[&str] = &["route", "Route"];
const TOWN_COLUMNS: &[&str] = &["commune", "localisation"];
const DEPARTMENT_COLUMNS: &[&str] = &["departement", "departement_code"];
const CAR_LIMIT_COLUMNS: &[&str] = &["vitesse_vehicules_legers_kmh", "Vitesse", "vitesse"];
const TRUCK_LIMIT_COLUMNS: &[&str] = &["vitesse_poids_lourds_kmh", "Vitesse_PL", "vitesse_pl"];

/// Parse the speed-camera dataset.
///
/// Column names vary between dataset revisions, so each field accepts a
/// list of aliases; the first non-empty one wins. Rows without finite
/// coordinates are dropped. Both `,` and `;` separators are accepted.
pub fn parse_radar_csv(text: &str) -> Result<Vec<PointOfInterest>> {
    let header_line = text.lines().next().unwrap_or_default();
    let delimiter = if header_line.contains(';') && !header_line.contains(',') {
        b';'
    } else {
        b','
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let column = |aliases: &[&str]| -> Vec<usize> {
        aliases
            .iter()
            .filter_map(|alias| headers.iter().position(|h| h == *alias))
            .collect()
    };
    let id_cols = column(ID_COLUMNS);
    let lat_cols = column(LAT_COLUMNS);
    let lon_cols = column(LON_COLUMNS);
    let type_cols = column(TYPE_COLUMNS);
    let road_cols = column(ROAD_COLUMNS);
    let town_cols = column(TOWN_COLUMNS);
    let dep_cols = column(DEPARTMENT_COLUMNS);
    let car_cols = column(CAR_LIMIT_COLUMNS);
    let truck_cols = column(TRUCK_LIMIT_COLUMNS);

    let mut radars = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let record = record?;
        let field = |cols: &[usize]| -> Option<String> {
            cols.iter()
                .filter_map(|&i| record.get(i))
                .find(|v| !v.is_empty())
                .map(str::to_string)
        };

        let latitude = field(&lat_cols).and_then(|v| v.parse::<f64>().ok());
        let longitude = field(&lon_cols).and_then(|v| v.parse::<f64>().ok());
        let (Some(latitude), Some(longitude)) = (latitude, longitude) else {
            skipped += 1;
            continue;
        };
        if !latitude.is_finite() || !longitude.is_finite() {
            skipped += 1;
            continue;
        }

        let attributes = PoiAttributes {
            label: field(&type_cols),
            road: field(&road_cols),
            town: field(&town_cols),
            department: field(&dep_cols),
            car_limit_kmh: field(&car_cols).and_then(|v| parse_limit(&v)),
            truck_limit_kmh: field(&truck_cols).and_then(|v| parse_limit(&v)),
            tags: BTreeMap::new(),
        };

        radars.push(
            PointOfInterest::new(field(&id_cols).unwrap_or_default(), latitude, longitude, PoiKind::Radar)
                .with_attributes(attributes),
        );
    }

    info!(
        "[Radars] Parsed {} radars ({} rows without coordinates)",
        radars.len(),
        skipped
    );
    Ok(radars)
}

/// Leading integer of a speed column ("90", "90.0", "90 km/h").
fn parse_limit(value: &str) -> Option<u32> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse::<u32>().ok().filter(|v| *v > 0)
}

/// Keep the radars within `config.radar_buffer_km` of the route.
///
/// A padded bounding box rejects most of the national dataset before the
/// per-segment check. The box is also widened by the corridor itself so a
/// route running along a meridian or parallel keeps its side radars.
pub fn filter_radars_along_route(
    radars: &[PointOfInterest],
    route: &[GpsPoint],
    config: &CorridorConfig,
) -> Vec<PointOfInterest> {
    let Some(bounds) = Bounds::from_points(route) else {
        return Vec::new();
    };
    let padded = bounds
        .pad(config.radar_bounds_pad)
        .expand_m(config.radar_buffer_km * 1000.0);
    let keep = |r: &&PointOfInterest| {
        padded.contains(&r.position())
            && is_within_corridor(&r.position(), route, config.radar_buffer_km)
    };

    #[cfg(feature = "parallel")]
    let on_route: Vec<PointOfInterest> = radars.par_iter().filter(keep).cloned().collect();

    #[cfg(not(feature = "parallel"))]
    let on_route: Vec<PointOfInterest> = radars.iter().filter(keep).cloned().collect();

    debug!(
        "[Radars] {} of {} radars along route",
        on_route.len(),
        radars.len()
    );
    on_route
}

// ============================================================================
// Overpass Corridor Loading
// ============================================================================

/// Node or way returned by an Overpass query.
#[derive(Debug, Clone, Deserialize)]
pub struct OverpassElement {
    #[serde(rename = "type", default)]
    pub element_type: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Top-level Overpass JSON response.
#[derive(Debug, Clone, Deserialize)]
pub struct OverpassResponse {
    #[serde(default)]
    pub elements: Vec<OverpassElement>,
}

/// Overpass bbox clause: south,west,north,east.
fn bbox_clause(bounds: &Bounds) -> String {
    format!(
        "{},{},{},{}",
        bounds.min_lat, bounds.min_lng, bounds.max_lat, bounds.max_lng
    )
}

/// Overpass query for traffic signals in the (padded) route bounds.
pub fn overpass_traffic_lights_query(bounds: &Bounds) -> String {
    let bbox = bbox_clause(bounds);
    format!(
        "[out:json][timeout:25];\n(\n  node[\"highway\"=\"traffic_signals\"]({bbox});\n  node[\"traffic_signals\"]({bbox});\n);\nout geom;"
    )
}

/// Overpass query for places where police controls are likely.
pub fn overpass_police_query(bounds: &Bounds) -> String {
    let bbox = bbox_clause(bounds);
    format!(
        "[out:json][timeout:25];\n(\n  node[\"highway\"=\"motorway_junction\"]({bbox});\n  node[\"highway\"=\"trunk\"]({bbox});\n  node[\"amenity\"=\"police\"]({bbox});\n  way[\"highway\"=\"motorway\"]({bbox});\n  way[\"highway\"=\"trunk\"]({bbox});\n);\nout geom;"
    )
}

/// Padded query bounds for a corridor category.
pub fn corridor_query_bounds(route: &[GpsPoint], kind: PoiKind, config: &CorridorConfig) -> Option<Bounds> {
    let (pad, buffer_km) = match kind {
        PoiKind::Radar => (config.radar_bounds_pad, config.radar_buffer_km),
        PoiKind::TrafficLight => (config.traffic_light_bounds_pad, config.traffic_light_buffer_km),
        PoiKind::PoliceControl => (config.police_bounds_pad, config.police_buffer_km),
    };
    Bounds::from_points(route).map(|b| b.pad(pad).expand_m(buffer_km * 1000.0))
}

fn element_position(element: &OverpassElement) -> Option<GpsPoint> {
    let point = GpsPoint::new(element.lat?, element.lon?);
    point.is_valid().then_some(point)
}

/// Traffic lights within the light corridor of the route.
pub fn traffic_lights_from_elements(
    elements: &[OverpassElement],
    route: &[GpsPoint],
    config: &CorridorConfig,
) -> Vec<PointOfInterest> {
    elements
        .iter()
        .filter_map(|el| {
            let pos = element_position(el)?;
            is_within_corridor(&pos, route, config.traffic_light_buffer_km).then(|| {
                PointOfInterest::new(el.id.to_string(), pos.latitude, pos.longitude, PoiKind::TrafficLight)
                    .with_attributes(PoiAttributes {
                        tags: el.tags.clone(),
                        ..PoiAttributes::default()
                    })
            })
        })
        .collect()
}

/// Police stations and motorway junctions within the police corridor.
///
/// Other strategic nodes are not kept, and at most `max_police_points`
/// entries survive, in response order.
pub fn police_controls_from_elements(
    elements: &[OverpassElement],
    route: &[GpsPoint],
    config: &CorridorConfig,
) -> Vec<PointOfInterest> {
    elements
        .iter()
        .filter_map(|el| {
            let pos = element_position(el)?;
            let tag = |k: &str| el.tags.get(k).map(String::as_str);
            let is_station = tag("amenity") == Some("police");
            let is_junction = tag("highway") == Some("motorway_junction");
            if !(is_station || is_junction) {
                return None;
            }
            if !is_within_corridor(&pos, route, config.police_buffer_km) {
                return None;
            }

            let label = if is_station { "police station" } else { "possible control" };
            Some(
                PointOfInterest::new(el.id.to_string(), pos.latitude, pos.longitude, PoiKind::PoliceControl)
                    .with_attributes(PoiAttributes {
                        label: Some(label.to_string()),
                        tags: el.tags.clone(),
                        ..PoiAttributes::default()
                    }),
            )
        })
        .take(config.max_police_points)
        .collect()
}

// ============================================================================
// Spatial Index
// ============================================================================

/// R-tree entry pointing back into the POI list.
#[derive(Debug, Clone)]
struct IndexedPoi {
    index: usize,
    lng_lat: [f64; 2],
}

impl RTreeObject for IndexedPoi {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.lng_lat)
    }
}

/// Lon/lat boxes covering every point within `radius_m` of `point`.
///
/// The longitude span is taken at the latitude farthest from the equator
/// and becomes the full circle when the radius reaches a pole. A span
/// crossing the antimeridian is split into two boxes.
fn query_envelopes(point: &GpsPoint, radius_m: f64) -> Vec<AABB<[f64; 2]>> {
    let lat_deg = (radius_m / EARTH_RADIUS_M).to_degrees();
    let min_lat = (point.latitude - lat_deg).max(-90.0);
    let max_lat = (point.latitude + lat_deg).min(90.0);
    let envelope = |west: f64, east: f64| AABB::from_corners([west, min_lat], [east, max_lat]);

    let far_lat = point.latitude.abs() + lat_deg;
    if far_lat >= 90.0 {
        return vec![envelope(-180.0, 180.0)];
    }
    let lng_deg = lat_deg / far_lat.to_radians().cos();
    if lng_deg >= 180.0 {
        return vec![envelope(-180.0, 180.0)];
    }

    let west = point.longitude - lng_deg;
    let east = point.longitude + lng_deg;
    if west < -180.0 {
        vec![envelope(-180.0, east), envelope(west + 360.0, 180.0)]
    } else if east > 180.0 {
        vec![envelope(west, 180.0), envelope(-180.0, east - 360.0)]
    } else {
        vec![envelope(west, east)]
    }
}

/// A POI within a query radius, with its great-circle distance.
#[derive(Debug, Clone, PartialEq)]
pub struct PoiDistance<'a> {
    pub poi: &'a PointOfInterest,
    pub distance_m: f64,
}

/// Route-scoped set of POIs of one category, spatially indexed.
#[derive(Debug, Default)]
pub struct PoiIndex {
    pois: Vec<PointOfInterest>,
    tree: RTree<IndexedPoi>,
}

impl PoiIndex {
    pub fn new(pois: Vec<PointOfInterest>) -> Self {
        let entries = pois
            .iter()
            .enumerate()
            .map(|(index, p)| IndexedPoi {
                index,
                lng_lat: [p.longitude, p.latitude],
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
            pois,
        }
    }

    pub fn len(&self) -> usize {
        self.pois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }

    pub fn pois(&self) -> &[PointOfInterest] {
        &self.pois
    }

    /// POIs within `radius_m` of `point`, nearest first.
    ///
    /// Equal distances keep no particular order.
    pub fn within(&self, point: &GpsPoint, radius_m: f64) -> Vec<PoiDistance<'_>> {
        let mut hits: Vec<PoiDistance<'_>> = query_envelopes(point, radius_m)
            .iter()
            .flat_map(|envelope| self.tree.locate_in_envelope(envelope))
            .map(|entry| {
                let poi = &self.pois[entry.index];
                PoiDistance {
                    poi,
                    distance_m: haversine_distance(point, &poi.position()),
                }
            })
            .filter(|hit| hit.distance_m <= radius_m)
            .collect();
        hits.sort_unstable_by(|a, b| a.distance_m.total_cmp(&b.distance_m));
        hits
    }

    /// Nearest POI regardless of distance.
    pub fn nearest(&self, point: &GpsPoint) -> Option<PoiDistance<'_>> {
        self.pois
            .iter()
            .map(|poi| PoiDistance {
                poi,
                distance_m: haversine_distance(point, &poi.position()),
            })
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    }
}
