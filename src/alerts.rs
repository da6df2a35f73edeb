//! Alert deduplication and alert text.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::poi::{PoiKind, PointOfInterest};

/// Keys of the POIs that already produced an alert on the current route.
///
/// A key is inserted at most once and only removed by [`AlertLog::reset`].
#[derive(Debug, Clone, Default)]
pub struct AlertLog {
    alerted: HashSet<String>,
}

impl AlertLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`. Returns `true` the first time a key is seen.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.alerted.contains(key) {
            return false;
        }
        self.alerted.insert(key.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.alerted.contains(key)
    }

    pub fn len(&self) -> usize {
        self.alerted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerted.is_empty()
    }

    pub fn reset(&mut self) {
        self.alerted.clear();
    }
}

/// A proximity alert ready to be shown and spoken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: PoiKind,
    /// Deduplication key of the POI
    pub key: String,
    pub distance_m: f64,
    /// Short on-screen text
    pub message: String,
    /// Longer phrasing for speech output
    pub speech: String,
    pub poi: PointOfInterest,
}

impl AlertEvent {
    /// Build the alert for `poi` at `distance_m`. The on-screen text ends
    /// with the current speed, or "—" when it is unknown.
    pub fn new(poi: &PointOfInterest, distance_m: f64, speed_kmh: Option<f64>) -> Self {
        let rounded = distance_m.round() as i64;
        let speed = speed_kmh
            .map(|s| format!("{} km/h", s.round() as i64))
            .unwrap_or_else(|| "—".to_string());
        let (message, speech) = match poi.kind {
            PoiKind::Radar => {
                let label = poi.attributes.label.as_deref().unwrap_or("").trim();
                let head = if label.is_empty() {
                    "Radar".to_string()
                } else {
                    format!("Radar {}", label)
                };
                let limit = poi
                    .limit_text()
                    .unwrap_or_else(|| "unspecified".to_string());
                (
                    format!("{} in {} m, limit {}, speed {}", head, rounded, limit, speed),
                    format!("Warning. Radar in {} meters. Limit {}.", rounded, limit),
                )
            }
            PoiKind::PoliceControl => {
                let (short, spoken) = if poi.is_police_station() {
                    ("Police station", "Police station")
                } else {
                    ("Control zone", "Possible control zone")
                };
                (
                    format!("{} in {} m, speed {}", short, rounded, speed),
                    format!("Warning. {} in {} meters.", spoken, rounded),
                )
            }
            PoiKind::TrafficLight => (
                format!("Traffic light in {} m", rounded),
                format!("Traffic light in {} meters.", rounded),
            ),
        };

        Self {
            kind: poi.kind,
            key: poi.alert_key(),
            distance_m,
            message,
            speech,
            poi: poi.clone(),
        }
    }
}

/// Status line for the nearest radar: "{type}, {d} m, {limit}".
pub fn next_radar_text(radar: Option<(&PointOfInterest, f64)>) -> String {
    match radar {
        Some((poi, distance_m)) => {
            let label = poi
                .attributes
                .label
                .as_deref()
                .filter(|l| !l.trim().is_empty())
                .unwrap_or("Radar");
            let limit = poi.limit_text().unwrap_or_else(|| "—".to_string());
            format!("{}, {} m, {}", label, distance_m.round() as i64, limit)
        }
        None => "—".to_string(),
    }
}
