//! Route proximity monitoring: off-route detection and POI alerting.
//!
//! The monitor holds the active route and its route-scoped POI sets. Each
//! accepted fused position is checked against them once; the POI sets
//! themselves are only rebuilt when the route changes.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::alerts::{AlertEvent, AlertLog};
use crate::config::ProximityConfig;
use crate::geo_utils::distance_to_route_m;
use crate::poi::{PoiIndex, PointOfInterest};
use crate::GpsPoint;

/// Whether the driver is currently away from the active route.
///
/// A single threshold separates the two states. Positions hovering around
/// the threshold can flip the state on consecutive samples; only the
/// on-to-off transition requests a recalculation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffRouteState {
    #[default]
    OnRoute,
    OffRoute,
}

/// Nearest POI of a category with its distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestPoi {
    pub poi: PointOfInterest,
    pub distance_m: f64,
}

/// Outcome of checking one position against the active route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProximityReport {
    /// Distance to the nearest route segment, `None` without a route
    pub distance_to_route_m: Option<f64>,
    pub state: OffRouteState,
    /// Set on the on-route to off-route transition only
    pub recalculation_requested: bool,
    /// Set when an off-route driver comes back within the threshold
    pub rejoined_route: bool,
    /// New alerts, at most one per category
    pub alerts: Vec<AlertEvent>,
    /// Nearest radar on the route, regardless of alert state
    pub nearest_radar: Option<NearestPoi>,
}

/// Checks fused positions against the active route and its POIs.
#[derive(Debug, Default)]
pub struct RouteProximityMonitor {
    config: ProximityConfig,
    route: Vec<GpsPoint>,
    radars: PoiIndex,
    traffic_lights: PoiIndex,
    police: PoiIndex,
    alert_log: AlertLog,
    state: OffRouteState,
}

impl RouteProximityMonitor {
    pub fn new(config: ProximityConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Replace the active route and its radars.
    ///
    /// Corridor POIs of the previous route are dropped, the off-route flag
    /// clears and the alert log starts empty, so a POI alerted on an earlier
    /// route alerts again if the new route passes it.
    pub fn set_route(&mut self, route: Vec<GpsPoint>, radars_on_route: Vec<PointOfInterest>) {
        info!(
            "[RouteProximity] Active route: {} vertices, {} radars",
            route.len(),
            radars_on_route.len()
        );
        self.route = route;
        self.radars = PoiIndex::new(radars_on_route);
        self.traffic_lights = PoiIndex::default();
        self.police = PoiIndex::default();
        self.alert_log.reset();
        self.state = OffRouteState::OnRoute;
    }

    /// Drop the route and everything scoped to it.
    pub fn clear_route(&mut self) {
        self.set_route(Vec::new(), Vec::new());
    }

    /// Replace the radars of the current route, keeping its alert log.
    pub fn set_radars(&mut self, radars_on_route: Vec<PointOfInterest>) {
        self.radars = PoiIndex::new(radars_on_route);
    }

    pub fn set_traffic_lights(&mut self, lights: Vec<PointOfInterest>) {
        debug!("[RouteProximity] {} traffic lights on route", lights.len());
        self.traffic_lights = PoiIndex::new(lights);
    }

    pub fn set_police_controls(&mut self, controls: Vec<PointOfInterest>) {
        debug!("[RouteProximity] {} police controls on route", controls.len());
        self.police = PoiIndex::new(controls);
    }

    pub fn has_route(&self) -> bool {
        !self.route.is_empty()
    }

    pub fn route(&self) -> &[GpsPoint] {
        &self.route
    }

    pub fn radars(&self) -> &[PointOfInterest] {
        self.radars.pois()
    }

    pub fn traffic_lights(&self) -> &[PointOfInterest] {
        self.traffic_lights.pois()
    }

    pub fn police_controls(&self) -> &[PointOfInterest] {
        self.police.pois()
    }

    pub fn state(&self) -> OffRouteState {
        self.state
    }

    pub fn is_off_route(&self) -> bool {
        self.state == OffRouteState::OffRoute
    }

    pub fn alert_log(&self) -> &AlertLog {
        &self.alert_log
    }

    /// Nearest radar on the active route.
    pub fn nearest_radar(&self, position: &GpsPoint) -> Option<NearestPoi> {
        self.radars.nearest(position).map(|hit| NearestPoi {
            poi: hit.poi.clone(),
            distance_m: hit.distance_m,
        })
    }

    /// Check a fused position. Without an active route nothing happens.
    ///
    /// `speed_kmh` is the fused speed at `position`; alerts quote it.
    pub fn check(&mut self, position: &GpsPoint, speed_kmh: Option<f64>) -> ProximityReport {
        let Some(distance_m) = distance_to_route_m(position, &self.route) else {
            return ProximityReport::default();
        };

        let mut report = ProximityReport {
            distance_to_route_m: Some(distance_m),
            ..ProximityReport::default()
        };

        if distance_m > self.config.off_route_threshold_m {
            if self.state == OffRouteState::OnRoute {
                info!(
                    "[RouteProximity] Off route: {:.0}m > {:.0}m",
                    distance_m, self.config.off_route_threshold_m
                );
                self.state = OffRouteState::OffRoute;
                report.recalculation_requested = true;
            }
        } else if self.state == OffRouteState::OffRoute {
            info!("[RouteProximity] Back on route ({:.0}m)", distance_m);
            self.state = OffRouteState::OnRoute;
            report.rejoined_route = true;
        }
        report.state = self.state;

        let categories = [
            (&self.radars, self.config.radar_alert_radius_m),
            (&self.police, self.config.police_alert_radius_m),
        ];
        for (index, radius_m) in categories {
            let Some(nearest) = index.within(position, radius_m).into_iter().next() else {
                continue;
            };
            if self.alert_log.insert(&nearest.poi.alert_key()) {
                let event = AlertEvent::new(nearest.poi, nearest.distance_m, speed_kmh);
                info!("[RouteProximity] Alert: {}", event.message);
                report.alerts.push(event);
            }
        }

        report.nearest_radar = self.nearest_radar(position);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::EARTH_RADIUS_M;
    use crate::poi::PoiKind;

    /// Meridian segment, so a latitude-free eastward offset is perpendicular.
    fn meridian_route() -> Vec<GpsPoint> {
        vec![GpsPoint::new(45.0, 5.0), GpsPoint::new(45.1, 5.0)]
    }

    /// Point `meters` east of (lat, 5.0).
    fn east_of_route(lat: f64, meters: f64) -> GpsPoint {
        let dlon = (meters / (EARTH_RADIUS_M * lat.to_radians().cos())).to_degrees();
        GpsPoint::new(lat, 5.0 + dlon)
    }

    #[test]
    fn test_no_route_no_report() {
        let mut monitor = RouteProximityMonitor::default();
        let report = monitor.check(&GpsPoint::new(45.0, 5.0), None);
        assert!(report.distance_to_route_m.is_none());
        assert!(!report.recalculation_requested);
        assert!(report.alerts.is_empty());
    }

    #[test]
    fn test_off_route_at_150m_not_at_50m() {
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), Vec::new());

        let report = monitor.check(&east_of_route(45.05, 50.0), None);
        assert!((report.distance_to_route_m.unwrap() - 50.0).abs() < 0.5);
        assert_eq!(report.state, OffRouteState::OnRoute);
        assert!(!report.recalculation_requested);

        let report = monitor.check(&east_of_route(45.05, 150.0), None);
        assert!((report.distance_to_route_m.unwrap() - 150.0).abs() < 0.5);
        assert_eq!(report.state, OffRouteState::OffRoute);
        assert!(report.recalculation_requested);
        assert!(monitor.is_off_route());
    }

    #[test]
    fn test_off_route_requests_recalculation_once() {
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), Vec::new());

        let requests = (0..5)
            .map(|i| monitor.check(&east_of_route(45.02 + i as f64 * 0.001, 200.0), None))
            .filter(|r| r.recalculation_requested)
            .count();
        assert_eq!(requests, 1);

        let report = monitor.check(&east_of_route(45.03, 20.0), None);
        assert!(report.rejoined_route);
        assert!(!report.recalculation_requested);
        assert!(!monitor.is_off_route());
    }

    #[test]
    fn test_single_vertex_route_is_off_route() {
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(vec![GpsPoint::new(45.0, 5.0)], Vec::new());

        // Even on the vertex itself there is no segment to follow
        let report = monitor.check(&GpsPoint::new(45.0, 5.0), None);
        assert_eq!(report.distance_to_route_m, Some(f64::INFINITY));
        assert_eq!(report.state, OffRouteState::OffRoute);
        assert!(report.recalculation_requested);

        let report = monitor.check(&east_of_route(45.0, 30.0), None);
        assert!(!report.recalculation_requested);
        assert!(monitor.is_off_route());
    }

    #[test]
    fn test_radar_alert_once() {
        let radar = PointOfInterest::new("R1", 45.05, 5.0, PoiKind::Radar);
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), vec![radar]);

        let near = GpsPoint::new(45.048, 5.0);
        let first = monitor.check(&near, None);
        let second = monitor.check(&near, None);
        let total = first.alerts.len() + second.alerts.len();
        assert_eq!(total, 1);
        assert_eq!(first.alerts[0].key, "R1");
        assert!((first.alerts[0].distance_m - 222.4).abs() < 1.0);

        // Nearest radar is still reported after the alert
        assert_eq!(second.nearest_radar.unwrap().poi.id, "R1");
        assert!(monitor.alert_log().contains("R1"));
        assert_eq!(monitor.alert_log().len(), 1);
    }

    #[test]
    fn test_alert_quotes_current_speed() {
        let radar = PointOfInterest::new("R1", 45.05, 5.0, PoiKind::Radar);
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), vec![radar]);
        monitor.set_police_controls(vec![PointOfInterest::new("7", 45.055, 5.0, PoiKind::PoliceControl)]);

        let report = monitor.check(&GpsPoint::new(45.048, 5.0), Some(92.4));
        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.alerts[0].message, "Radar in 222 m, limit unspecified, speed 92 km/h");
        assert!(report.alerts[1].message.ends_with(", speed 92 km/h"));
    }

    #[test]
    fn test_radar_outside_radius_not_alerted() {
        let radar = PointOfInterest::new("R1", 45.09, 5.0, PoiKind::Radar);
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), vec![radar]);

        let report = monitor.check(&GpsPoint::new(45.0, 5.0), None);
        assert!(report.alerts.is_empty());
        let nearest = report.nearest_radar.unwrap();
        assert!(nearest.distance_m > 9_000.0);
    }

    #[test]
    fn test_only_nearest_radar_alerts() {
        let radars = vec![
            PointOfInterest::new("far", 45.053, 5.0, PoiKind::Radar),
            PointOfInterest::new("near", 45.051, 5.0, PoiKind::Radar),
        ];
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), radars);

        let report = monitor.check(&GpsPoint::new(45.05, 5.0), None);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].key, "near");
    }

    #[test]
    fn test_police_alert_radius() {
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), Vec::new());
        monitor.set_police_controls(vec![PointOfInterest::new("7", 45.056, 5.0, PoiKind::PoliceControl)]);

        // ~667 m away: inside the police radius
        let report = monitor.check(&GpsPoint::new(45.05, 5.0), None);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].key, "police_7");
        assert_eq!(report.alerts[0].kind, PoiKind::PoliceControl);
    }

    #[test]
    fn test_traffic_lights_tracked_not_alerted() {
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), Vec::new());
        monitor.set_traffic_lights(vec![PointOfInterest::new("1", 45.05, 5.0, PoiKind::TrafficLight)]);

        let report = monitor.check(&GpsPoint::new(45.05, 5.0), None);
        assert!(report.alerts.is_empty());
        assert_eq!(monitor.traffic_lights().len(), 1);
    }

    #[test]
    fn test_new_route_resets_alerts() {
        let radar = PointOfInterest::new("R1", 45.05, 5.0, PoiKind::Radar);
        let mut monitor = RouteProximityMonitor::default();
        monitor.set_route(meridian_route(), vec![radar.clone()]);
        monitor.set_police_controls(vec![PointOfInterest::new("7", 45.0, 5.0, PoiKind::PoliceControl)]);

        let near = GpsPoint::new(45.049, 5.0);
        assert_eq!(monitor.check(&near, None).alerts.len(), 1);

        monitor.set_route(meridian_route(), vec![radar]);
        assert!(monitor.alert_log().is_empty());
        assert!(monitor.police_controls().is_empty());
        assert_eq!(monitor.check(&near, None).alerts.len(), 1);
    }
}
