//! The navigation session: every piece of per-run state in one place.
//!
//! A session owns the fusion engine, the display smoothers, the proximity
//! monitor with its alert log, the active route and the destination. One
//! session exists per running assistant; nothing here is global.
//!
//! Each route change bumps a [`RouteVersion`]. Asynchronous work started for
//! a route (corridor POI loads, recalculation) carries the version it was
//! started with, and results for an older version are refused.

use std::collections::HashSet;
use std::fmt;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::alerts::next_radar_text;
use crate::commands::Command;
use crate::config::NavConfig;
use crate::error::{NavError, Result};
use crate::fusion::{FusedState, PositionFusion, RawSample};
use crate::geo_utils::validate_route;
use crate::navigator::format_travel_time;
use crate::poi::{filter_radars_along_route, PoiKind, PointOfInterest};
use crate::providers::RouteCandidate;
use crate::proximity::{ProximityReport, RouteProximityMonitor};
use crate::smoother::{HeadingSmoother, SpeedDisplay};
use crate::tracking::LocationErrorKind;
use crate::GpsPoint;

/// Generation counter of the active route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteVersion(u64);

impl RouteVersion {
    pub fn value(&self) -> u64 {
        self.0
    }

    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RouteVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A location problem the driver must be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    LocationPermissionDenied,
    LocationUnavailable,
}

impl Notice {
    pub fn text(&self) -> &'static str {
        match self {
            Notice::LocationPermissionDenied => "Location permission denied.",
            Notice::LocationUnavailable => "Position unavailable. Check that GPS is enabled.",
        }
    }
}

/// The selected destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub label: String,
    pub position: GpsPoint,
}

/// Everything derived from one accepted fix.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub fused: FusedState,
    /// Heading for map rotation and the position marker
    pub smoothed_heading_deg: Option<f64>,
    /// Speed shown to the driver
    pub display_speed_kmh: Option<u32>,
    pub proximity: ProximityReport,
}

/// Owns all navigation state for one running assistant.
#[derive(Debug)]
pub struct NavigationSession {
    config: NavConfig,
    fusion: PositionFusion,
    smoother: HeadingSmoother,
    speed_display: SpeedDisplay,
    monitor: RouteProximityMonitor,
    route_version: RouteVersion,
    active_route: Option<RouteCandidate>,
    route_candidates: Vec<RouteCandidate>,
    destination: Option<Destination>,
    tracking: bool,
    notices_sent: HashSet<LocationErrorKind>,
}

impl NavigationSession {
    /// Validate `config` and build an idle session.
    pub fn create(config: NavConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }

    /// Build a session without validating `config`.
    pub fn new(config: NavConfig) -> Self {
        Self {
            fusion: PositionFusion::new(config.fusion.clone()),
            smoother: HeadingSmoother::new(config.smoother.clone()),
            speed_display: SpeedDisplay::default(),
            monitor: RouteProximityMonitor::new(config.proximity.clone()),
            route_version: RouteVersion::default(),
            active_route: None,
            route_candidates: Vec::new(),
            destination: None,
            tracking: false,
            notices_sent: HashSet::new(),
            config,
        }
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn fusion(&self) -> &PositionFusion {
        &self.fusion
    }

    pub fn monitor(&self) -> &RouteProximityMonitor {
        &self.monitor
    }

    pub fn smoothed_heading(&self) -> Option<f64> {
        self.smoother.current()
    }

    pub fn speed_text(&self) -> String {
        self.speed_display.text()
    }

    /// Position of the last accepted fix.
    pub fn last_position(&self) -> Option<GpsPoint> {
        self.fusion.state().map(|s| s.position)
    }

    // ------------------------------------------------------------------
    // Location stream
    // ------------------------------------------------------------------

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Begin a tracking run. Location notices may be raised again.
    pub fn start_tracking(&mut self) {
        self.tracking = true;
        self.notices_sent.clear();
        info!("[NavigationSession] Tracking started");
    }

    /// End the tracking run and forget all fusion and display state.
    ///
    /// The caller stops its [`crate::LocationSubscription`] first so no fix
    /// arrives after this returns.
    pub fn stop_tracking(&mut self) {
        self.tracking = false;
        self.fusion.reset();
        self.smoother.reset();
        self.speed_display.reset();
        info!("[NavigationSession] Tracking stopped");
    }

    /// Fuse a raw fix and check it against the active route.
    ///
    /// Returns `None` when the fix is rejected.
    pub fn ingest_sample(&mut self, sample: RawSample) -> Option<SessionUpdate> {
        let fused = self.fusion.ingest(sample)?;
        let smoothed_heading_deg = self.smoother.update(fused.heading_deg, fused.speed_kmh);
        let display_speed_kmh = self.speed_display.update(fused.speed_kmh);
        let proximity = self.monitor.check(&fused.position, fused.speed_kmh);

        Some(SessionUpdate {
            fused,
            smoothed_heading_deg,
            display_speed_kmh,
            proximity,
        })
    }

    /// Feed a compass reading. Returns the calibrated heading once known.
    pub fn ingest_orientation(&mut self, sensor_heading_deg: f64) -> Option<f64> {
        self.fusion.ingest_orientation(sensor_heading_deg)
    }

    /// Stop using the compass and drop its calibration.
    pub fn stop_orientation(&mut self) {
        self.fusion.stop_compass();
    }

    /// Decide whether a location error needs a notice.
    ///
    /// Denial and unavailability produce one notice per kind per tracking
    /// run; timeouts are only logged.
    pub fn handle_location_error(&mut self, kind: LocationErrorKind) -> Option<Notice> {
        warn!("[NavigationSession] Location error: {:?}", kind);
        if !kind.is_user_facing() {
            return None;
        }
        let notice = match kind {
            LocationErrorKind::PermissionDenied => Notice::LocationPermissionDenied,
            _ => Notice::LocationUnavailable,
        };
        self.notices_sent.insert(kind).then_some(notice)
    }

    // ------------------------------------------------------------------
    // Route and destination
    // ------------------------------------------------------------------

    pub fn route_version(&self) -> RouteVersion {
        self.route_version
    }

    pub fn is_current(&self, version: RouteVersion) -> bool {
        self.route_version == version
    }

    pub fn active_route(&self) -> Option<&RouteCandidate> {
        self.active_route.as_ref()
    }

    pub fn route_candidates(&self) -> &[RouteCandidate] {
        &self.route_candidates
    }

    pub fn set_route_candidates(&mut self, candidates: Vec<RouteCandidate>) {
        self.route_candidates = candidates;
    }

    pub fn destination(&self) -> Option<&Destination> {
        self.destination.as_ref()
    }

    pub fn set_destination(&mut self, label: impl Into<String>, position: GpsPoint) {
        let label = label.into();
        info!(
            "[NavigationSession] Destination: {} ({:.5}, {:.5})",
            label, position.latitude, position.longitude
        );
        self.destination = Some(Destination { label, position });
    }

    /// Whether a recalculation has what it needs.
    pub fn can_recalculate(&self) -> bool {
        self.destination.is_some() && self.last_position().is_some()
    }

    /// Make `route` the active route and scope `all_radars` to it.
    ///
    /// Corridor POIs of the previous route are dropped and the alert log is
    /// cleared. Returns the new route version.
    ///
    /// A polyline with fewer than two vertices or with an invalid coordinate
    /// is refused and the current route stays active.
    pub fn set_active_route(
        &mut self,
        route: RouteCandidate,
        all_radars: &[PointOfInterest],
    ) -> Result<RouteVersion> {
        validate_route(&route.polyline)?;
        let radars = filter_radars_along_route(all_radars, &route.polyline, &self.config.corridor);
        self.monitor.set_route(route.polyline.clone(), radars);
        self.route_version = self.route_version.next();
        info!(
            "[NavigationSession] Route '{}' active ({}), {:.1} km, {} radars",
            route.name,
            self.route_version,
            route.distance_m / 1000.0,
            self.monitor.radars().len()
        );
        self.active_route = Some(route);
        Ok(self.route_version)
    }

    /// Drop the active route. Pending responses for it become stale.
    pub fn clear_route(&mut self) {
        self.monitor.clear_route();
        self.active_route = None;
        self.route_version = self.route_version.next();
    }

    /// Install corridor POIs loaded for route `version`.
    ///
    /// Fails with [`NavError::StaleResponse`] when the route changed since
    /// the load was started; nothing is applied then.
    pub fn apply_corridor_pois(
        &mut self,
        version: RouteVersion,
        kind: PoiKind,
        pois: Vec<PointOfInterest>,
    ) -> Result<()> {
        if !self.is_current(version) {
            warn!(
                "[NavigationSession] Dropping {} {:?} for {}, active route is {}",
                pois.len(),
                kind,
                version,
                self.route_version
            );
            return Err(NavError::StaleResponse {
                expected: self.route_version.value(),
                actual: version.value(),
            });
        }
        match kind {
            PoiKind::Radar => self.monitor.set_radars(pois),
            PoiKind::TrafficLight => self.monitor.set_traffic_lights(pois),
            PoiKind::PoliceControl => self.monitor.set_police_controls(pois),
        }
        Ok(())
    }

    /// Status line for the nearest radar on the route.
    pub fn next_radar_text(&self) -> String {
        let nearest = self
            .last_position()
            .and_then(|p| self.monitor.nearest_radar(&p));
        next_radar_text(nearest.as_ref().map(|n| (&n.poi, n.distance_m)))
    }

    /// Travel time of the active route, "—" without one.
    pub fn travel_time_text(&self) -> String {
        format_travel_time(self.active_route.as_ref().map(|r| r.duration_s))
    }

    /// Spoken reply to a driver command.
    ///
    /// `Recalculate` only answers; the caller performs the recalculation
    /// when [`NavigationSession::can_recalculate`] holds.
    pub fn answer(&self, command: Command) -> String {
        match command {
            Command::Speed => match self.speed_display.value() {
                Some(kmh) => format!("You are driving at {} km/h.", kmh),
                None => "Speed unknown.".to_string(),
            },
            Command::TravelTime => match &self.active_route {
                Some(route) => format!(
                    "Travel time: {}, {:.1} km.",
                    format_travel_time(Some(route.duration_s)),
                    route.distance_m / 1000.0
                ),
                None => "No active route.".to_string(),
            },
            Command::NextRadar => {
                let text = self.next_radar_text();
                if text == "—" {
                    "No radar detected on the route.".to_string()
                } else {
                    format!("Next radar: {}.", text)
                }
            }
            Command::Recalculate => {
                if self.can_recalculate() {
                    "Recalculating the route.".to_string()
                } else {
                    "No destination set.".to_string()
                }
            }
            Command::Recenter => {
                if self.last_position().is_some() {
                    "Centered on your position.".to_string()
                } else {
                    "Position unknown.".to_string()
                }
            }
            Command::Unknown => Command::help_text().to_string(),
        }
    }

    /// End the session: stop tracking and drop route and destination.
    pub fn teardown(&mut self) {
        self.stop_tracking();
        self.clear_route();
        self.route_candidates.clear();
        self.destination = None;
        info!("[NavigationSession] Session torn down");
    }
}

impl Default for NavigationSession {
    fn default() -> Self {
        Self::new(NavConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poi::PoiAttributes;
    use crate::providers::RouteKind;

    fn straight_route() -> RouteCandidate {
        RouteCandidate::new(
            "Fastest",
            RouteKind::Fastest,
            vec![GpsPoint::new(45.0, 5.0), GpsPoint::new(45.1, 5.0)],
            11_120.0,
            3_900.0,
        )
    }

    fn radar(id: &str, lat: f64, lon: f64) -> PointOfInterest {
        PointOfInterest::new(id, lat, lon, PoiKind::Radar).with_attributes(PoiAttributes {
            label: Some("Radar fixe".to_string()),
            car_limit_kmh: Some(90),
            ..PoiAttributes::default()
        })
    }

    #[test]
    fn test_create_validates_config() {
        let mut config = NavConfig::default();
        config.fusion.buffer_size_fast = 1;
        assert!(NavigationSession::create(config).is_err());
        assert!(NavigationSession::create(NavConfig::default()).is_ok());
    }

    #[test]
    fn test_rejected_sample_yields_nothing() {
        let mut session = NavigationSession::default();
        assert!(session.ingest_sample(RawSample::new(45.0, 5.0, 50.0, 0)).is_none());
        assert!(session.last_position().is_none());
    }

    #[test]
    fn test_ingest_without_route() {
        let mut session = NavigationSession::default();
        let update = session
            .ingest_sample(RawSample::new(45.0, 5.0, 5.0, 0).with_speed(10.0).with_heading(90.0))
            .unwrap();
        assert_eq!(update.display_speed_kmh, Some(36));
        assert!((update.smoothed_heading_deg.unwrap() - 90.0).abs() < 1e-9);
        assert!(update.proximity.distance_to_route_m.is_none());
        assert_eq!(session.speed_text(), "36 km/h");
    }

    #[test]
    fn test_set_active_route_filters_radars_and_versions() {
        let mut session = NavigationSession::default();
        let radars = vec![radar("on", 45.05, 5.0005), radar("off", 46.0, 6.0)];

        let v1 = session.set_active_route(straight_route(), &radars).unwrap();
        assert_eq!(session.monitor().radars().len(), 1);
        assert_eq!(session.monitor().radars()[0].id, "on");

        let v2 = session.set_active_route(straight_route(), &radars).unwrap();
        assert!(v2 > v1);
        assert!(!session.is_current(v1));
        assert!(session.is_current(v2));
    }

    #[test]
    fn test_unusable_route_is_refused() {
        let mut session = NavigationSession::default();
        let v1 = session.set_active_route(straight_route(), &[]).unwrap();

        let mut single = straight_route();
        single.polyline.truncate(1);
        assert!(matches!(
            session.set_active_route(single, &[]),
            Err(NavError::InsufficientPoints { point_count: 1, minimum_required: 2, .. })
        ));

        let mut broken = straight_route();
        broken.polyline[1] = GpsPoint::new(f64::NAN, 5.0);
        assert!(matches!(
            session.set_active_route(broken, &[]),
            Err(NavError::InvalidCoordinates { .. })
        ));

        // The previous route is untouched
        assert!(session.is_current(v1));
        assert_eq!(session.monitor().route().len(), 2);
        assert_eq!(session.active_route().unwrap().name, "Fastest");
    }

    #[test]
    fn test_stale_corridor_response_dropped() {
        let mut session = NavigationSession::default();
        let v1 = session.set_active_route(straight_route(), &[]).unwrap();
        let _v2 = session.set_active_route(straight_route(), &[]).unwrap();

        let lights = vec![PointOfInterest::new("1", 45.05, 5.0, PoiKind::TrafficLight)];
        let err = session
            .apply_corridor_pois(v1, PoiKind::TrafficLight, lights.clone())
            .unwrap_err();
        assert_eq!(err, NavError::StaleResponse { expected: 2, actual: 1 });
        assert!(session.monitor().traffic_lights().is_empty());

        session
            .apply_corridor_pois(session.route_version(), PoiKind::TrafficLight, lights)
            .unwrap();
        assert_eq!(session.monitor().traffic_lights().len(), 1);
    }

    #[test]
    fn test_location_notices_once_per_run() {
        let mut session = NavigationSession::default();
        session.start_tracking();
        assert_eq!(
            session.handle_location_error(LocationErrorKind::PermissionDenied),
            Some(Notice::LocationPermissionDenied)
        );
        assert_eq!(session.handle_location_error(LocationErrorKind::PermissionDenied), None);
        assert_eq!(session.handle_location_error(LocationErrorKind::Timeout), None);
        assert_eq!(
            session.handle_location_error(LocationErrorKind::PositionUnavailable),
            Some(Notice::LocationUnavailable)
        );

        session.stop_tracking();
        session.start_tracking();
        assert!(session.handle_location_error(LocationErrorKind::PermissionDenied).is_some());
    }

    #[test]
    fn test_stop_tracking_clears_state() {
        let mut session = NavigationSession::default();
        session.start_tracking();
        session.ingest_sample(RawSample::new(45.0, 5.0, 5.0, 0).with_speed(10.0).with_heading(90.0));
        assert!(session.last_position().is_some());

        session.stop_tracking();
        assert!(!session.is_tracking());
        assert!(session.last_position().is_none());
        assert!(session.smoothed_heading().is_none());
        assert_eq!(session.speed_text(), "—");
        assert!(session.fusion().buffer().is_empty());
    }

    #[test]
    fn test_answers() {
        let mut session = NavigationSession::default();
        assert_eq!(session.answer(Command::Speed), "Speed unknown.");
        assert_eq!(session.answer(Command::TravelTime), "No active route.");
        assert_eq!(session.answer(Command::NextRadar), "No radar detected on the route.");
        assert_eq!(session.answer(Command::Recalculate), "No destination set.");

        session.set_active_route(straight_route(), &[radar("R1", 45.05, 5.0)]).unwrap();
        session.set_destination("Somewhere", GpsPoint::new(45.1, 5.0));
        session.ingest_sample(RawSample::new(45.04, 5.0, 5.0, 0).with_speed(25.0));

        assert_eq!(session.answer(Command::Speed), "You are driving at 90 km/h.");
        assert_eq!(session.answer(Command::TravelTime), "Travel time: 1h 5min, 11.1 km.");
        assert_eq!(
            session.answer(Command::NextRadar),
            "Next radar: Radar fixe, 1112 m, 90 km/h."
        );
        assert_eq!(session.answer(Command::Recalculate), "Recalculating the route.");
        assert_eq!(session.answer(Command::Recenter), "Centered on your position.");
    }

    #[test]
    fn test_teardown() {
        let mut session = NavigationSession::default();
        session.start_tracking();
        session.set_destination("Lyon", GpsPoint::new(45.764, 4.8357));
        let v = session.set_active_route(straight_route(), &[]).unwrap();
        session.teardown();

        assert!(session.active_route().is_none());
        assert!(session.destination().is_none());
        assert!(!session.monitor().has_route());
        assert!(!session.is_current(v));
        assert!(!session.is_tracking());
    }
}
