//! Async orchestration of a navigation session.
//!
//! [`Navigator`] wires a [`NavigationSession`] to the routing, geocoding
//! and corridor providers and to the alert sink. It never holds the session
//! lock across a provider call, so fixes keep flowing while a route or a
//! corridor is being fetched. Every result is re-validated against the
//! route version it was requested for before it touches the session.

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::error::{NavError, OptionExt, Result};
use crate::commands::Command;
use crate::fusion::RawSample;
use crate::geo_utils::validate_route;
use crate::poi::{PoiKind, PointOfInterest};
use crate::providers::{
    AlertSink, Announcement, AnnouncementKind, GeocodeCandidate, Geocoder, PoiCorridorLoader,
    RadarSource, RouteCandidate, RouteKind, RouteProvider, RouteRequest, RoutedPath,
};
use crate::session::{NavigationSession, Notice, RouteVersion, SessionUpdate};
use crate::tracking::{LocationErrorKind, LocationEvent, LocationSubscription, StopHandle};
use crate::GpsPoint;

/// Alternatives requested besides the main route.
const MAX_ALTERNATIVES: u8 = 3;
/// The shortest route is only offered when it differs this much (meters).
const SHORTEST_MIN_DIFFERENCE_M: f64 = 1000.0;
/// Geocoding suggestions kept.
const MAX_SUGGESTIONS: usize = 5;

/// Travel time as "1h 5min" or "42min"; "—" without a duration.
pub fn format_travel_time(duration_s: Option<f64>) -> String {
    let Some(seconds) = duration_s.filter(|s| s.is_finite() && *s > 0.0) else {
        return "—".to_string();
    };
    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    if hours > 0 {
        format!("{}h {}min", hours, minutes)
    } else {
        format!("{}min", minutes)
    }
}

fn named(path: RoutedPath, name: impl Into<String>, kind: RouteKind) -> RouteCandidate {
    RouteCandidate::new(name, kind, path.polyline, path.distance_m, path.duration_s)
}

/// Drives a [`NavigationSession`] from provider responses and location events.
pub struct Navigator<R, G, L, S> {
    router: R,
    geocoder: G,
    loader: L,
    session: Mutex<NavigationSession>,
    /// Whole radar dataset; scoped to each selected route
    radars: Mutex<Vec<PointOfInterest>>,
    sink: Mutex<S>,
}

impl<R, G, L, S> Navigator<R, G, L, S>
where
    R: RouteProvider,
    G: Geocoder,
    L: PoiCorridorLoader,
    S: AlertSink,
{
    pub fn new(session: NavigationSession, router: R, geocoder: G, loader: L, sink: S) -> Self {
        Self {
            router,
            geocoder,
            loader,
            session: Mutex::new(session),
            radars: Mutex::new(Vec::new()),
            sink: Mutex::new(sink),
        }
    }

    /// Run `f` with the session locked.
    pub async fn with_session<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut NavigationSession) -> T,
    {
        let mut session = self.session.lock().await;
        f(&mut session)
    }

    /// Run `f` with the sink locked.
    pub async fn with_sink<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut S) -> T,
    {
        let mut sink = self.sink.lock().await;
        f(&mut sink)
    }

    pub fn into_parts(self) -> (NavigationSession, S) {
        (self.session.into_inner(), self.sink.into_inner())
    }

    async fn announce(&self, announcement: Announcement) {
        debug!("[Navigator] Announce {:?}: {}", announcement.kind, announcement.text);
        self.sink.lock().await.announce(announcement);
    }

    async fn say(&self, kind: AnnouncementKind, text: impl Into<String>) {
        self.announce(Announcement::new(kind, text)).await;
    }

    // ------------------------------------------------------------------
    // Radars
    // ------------------------------------------------------------------

    /// Replace the radar dataset. Takes effect on the next route selection.
    pub async fn set_radars(&self, radars: Vec<PointOfInterest>) {
        info!("[Navigator] Radar dataset: {} entries", radars.len());
        *self.radars.lock().await = radars;
    }

    /// Fetch the radar dataset from `source`.
    pub async fn load_radars<Src>(&self, source: &Src) -> Result<usize>
    where
        Src: RadarSource + ?Sized,
    {
        match source.load_radars().await {
            Ok(radars) => {
                let count = radars.len();
                self.set_radars(radars).await;
                Ok(count)
            }
            Err(e) => {
                warn!("[Navigator] Radar dataset unavailable: {}", e);
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Destination and routes
    // ------------------------------------------------------------------

    /// Ranked destination suggestions. Failures yield an empty list.
    pub async fn search(&self, query: &str) -> Vec<GeocodeCandidate> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        match self.geocoder.search(query).await {
            Ok(mut candidates) => {
                candidates.truncate(MAX_SUGGESTIONS);
                candidates
            }
            Err(e) => {
                warn!("[Navigator] Geocoding '{}' failed: {}", query, e);
                Vec::new()
            }
        }
    }

    /// Geocode `query`, make the top match the destination and plan routes
    /// to it from the current position.
    ///
    /// The candidates are stored in the session for [`Navigator::select_route`].
    pub async fn navigate_to(&self, query: &str) -> Result<Vec<RouteCandidate>> {
        if query.trim().is_empty() {
            self.say(AnnouncementKind::Error, "Enter a destination.").await;
            return Err(NavError::NoDestination);
        }

        let Some(best) = self.search(query).await.into_iter().next() else {
            self.say(AnnouncementKind::Error, "Destination not found.").await;
            return Err(NavError::NoDestination);
        };

        let origin = {
            let mut session = self.session.lock().await;
            session.set_destination(best.label.clone(), best.position);
            session.last_position()
        };
        let Some(origin) = origin else {
            self.say(AnnouncementKind::Error, "Current position unknown.").await;
            return Err(NavError::NoPosition);
        };

        let routes = self.plan_routes(origin, best.position).await;
        if routes.is_empty() {
            self.say(AnnouncementKind::Error, "Unable to compute a route.").await;
            return Err(NavError::NoRoute);
        }

        self.session
            .lock()
            .await
            .set_route_candidates(routes.clone());
        self.say(
            AnnouncementKind::Route,
            format!("{} routes available. Pick one.", routes.len()),
        )
        .await;
        Ok(routes)
    }

    async fn request_routes(&self, request: RouteRequest) -> Vec<RoutedPath> {
        match self.router.routes(request).await {
            Ok(paths) => paths
                .into_iter()
                .filter(|p| validate_route(&p.polyline).is_ok())
                .collect(),
            Err(e) => {
                warn!("[Navigator] Route request failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Fastest route with up to three alternatives, the shortest route when
    /// it differs noticeably, and a toll-free variant when tolls are avoided.
    pub async fn plan_routes(&self, origin: GpsPoint, destination: GpsPoint) -> Vec<RouteCandidate> {
        let avoid_tolls = self.session.lock().await.config().routing.avoid_tolls;

        let main = RouteRequest::new(origin, destination).with_alternatives(MAX_ALTERNATIVES);
        let mut routes: Vec<RouteCandidate> = self
            .request_routes(main)
            .await
            .into_iter()
            .take(1 + MAX_ALTERNATIVES as usize)
            .enumerate()
            .map(|(i, path)| match i {
                0 => named(path, "Fastest", RouteKind::Fastest),
                _ => named(path, format!("Alternative {}", i), RouteKind::Alternative),
            })
            .collect();

        let shortest = self
            .request_routes(RouteRequest::new(origin, destination))
            .await
            .into_iter()
            .next();
        if let Some(path) = shortest {
            let differs = routes
                .first()
                .map_or(true, |f| (path.distance_m - f.distance_m).abs() > SHORTEST_MIN_DIFFERENCE_M);
            if differs {
                routes.push(named(path, "Shortest", RouteKind::Shortest));
            }
        }

        if avoid_tolls {
            let request = RouteRequest::new(origin, destination).avoiding_tolls();
            if let Some(path) = self.request_routes(request).await.into_iter().next() {
                routes.push(named(path, "Toll-free", RouteKind::TollFree));
            }
        }

        info!("[Navigator] {} routes available", routes.len());
        routes
    }

    /// Activate the stored candidate at `index` and load its corridors.
    pub async fn select_route(&self, index: usize) -> Result<RouteVersion> {
        let (version, route, radar_count) = {
            let radars = self.radars.lock().await;
            let mut session = self.session.lock().await;
            let route = session.route_candidates().get(index).cloned().ok_or_no_route()?;
            let version = session.set_active_route(route.clone(), &radars)?;
            (version, route, session.monitor().radars().len())
        };

        self.say(
            AnnouncementKind::Route,
            format!("{} route selected. {} radars detected.", route.name, radar_count),
        )
        .await;
        self.load_corridors(version, &route.polyline).await;
        Ok(version)
    }

    /// Fetch traffic lights and police controls for route `version`.
    ///
    /// Results for a route that has since been replaced are dropped.
    async fn load_corridors(&self, version: RouteVersion, route: &[GpsPoint]) {
        let corridor = self.session.lock().await.config().corridor.clone();

        let (lights, police) = futures::join!(
            self.loader.load_corridor(route, PoiKind::TrafficLight, &corridor),
            self.loader.load_corridor(route, PoiKind::PoliceControl, &corridor),
        );

        for (kind, loaded) in [(PoiKind::TrafficLight, lights), (PoiKind::PoliceControl, police)] {
            match loaded {
                Ok(pois) => {
                    let count = pois.len();
                    let applied = self
                        .session
                        .lock()
                        .await
                        .apply_corridor_pois(version, kind, pois);
                    if applied.is_ok() {
                        debug!("[Navigator] {} {} loaded for {}", count, kind.as_str(), version);
                    }
                }
                Err(e) => warn!("[Navigator] Loading {} corridor failed: {}", kind.as_str(), e),
            }
        }
    }

    /// Plan from `from` to the current destination and switch to the first
    /// new route.
    ///
    /// Fails with [`NavError::StaleResponse`] if another route was selected
    /// while the router was busy.
    pub async fn recalculate(&self, from: GpsPoint) -> Result<RouteVersion> {
        let (destination, started) = {
            let session = self.session.lock().await;
            let destination = session
                .destination()
                .map(|d| d.position)
                .ok_or(NavError::NoDestination)?;
            (destination, session.route_version())
        };

        let routes = self.plan_routes(from, destination).await;
        let first = routes.first().cloned().ok_or_no_route()?;

        let version = {
            let radars = self.radars.lock().await;
            let mut session = self.session.lock().await;
            if !session.is_current(started) {
                warn!(
                    "[Navigator] Recalculation for {} dropped, active route is {}",
                    started,
                    session.route_version()
                );
                return Err(NavError::StaleResponse {
                    expected: session.route_version().value(),
                    actual: started.value(),
                });
            }
            let version = session.set_active_route(first.clone(), &radars)?;
            session.set_route_candidates(routes);
            version
        };

        info!("[Navigator] Recalculated route active ({})", version);
        self.say(AnnouncementKind::Route, "New route calculated.").await;
        self.load_corridors(version, &first.polyline).await;
        Ok(version)
    }

    // ------------------------------------------------------------------
    // Location stream
    // ------------------------------------------------------------------

    /// Process one raw fix: fuse, announce alerts, recalculate when the
    /// driver leaves the route.
    pub async fn handle_sample(&self, sample: RawSample) -> Option<SessionUpdate> {
        let update = self.session.lock().await.ingest_sample(sample)?;

        for alert in &update.proximity.alerts {
            self.announce(
                Announcement::new(AnnouncementKind::Alert(alert.kind), alert.message.clone())
                    .with_speech(alert.speech.clone()),
            )
            .await;
        }

        if update.proximity.recalculation_requested {
            self.say(
                AnnouncementKind::OffRoute,
                "You are leaving the route. Recalculating...",
            )
            .await;
            if let Err(e) = self.recalculate(update.fused.position).await {
                warn!("[Navigator] Recalculation failed: {}", e);
            }
        }

        Some(update)
    }

    pub async fn handle_orientation(&self, sensor_heading_deg: f64) -> Option<f64> {
        self.session
            .lock()
            .await
            .ingest_orientation(sensor_heading_deg)
    }

    pub async fn handle_location_error(&self, kind: LocationErrorKind) -> Option<Notice> {
        let notice = self.session.lock().await.handle_location_error(kind)?;
        self.say(AnnouncementKind::Notice, notice.text()).await;
        Some(notice)
    }

    /// Answer a spoken/typed command, recalculating when asked to.
    pub async fn handle_command(&self, text: &str) -> String {
        let command = Command::parse(text);
        let (reply, recalculate_from) = {
            let session = self.session.lock().await;
            let from = match command {
                Command::Recalculate if session.can_recalculate() => session.last_position(),
                _ => None,
            };
            (session.answer(command), from)
        };

        self.say(AnnouncementKind::Reply, reply.clone()).await;
        if let Some(from) = recalculate_from {
            if let Err(e) = self.recalculate(from).await {
                warn!("[Navigator] Recalculation failed: {}", e);
            }
        }
        reply
    }

    /// Consume location events until the subscription ends or is stopped,
    /// then clear fusion and display state.
    pub async fn run(&self, mut subscription: LocationSubscription) {
        self.session.lock().await.start_tracking();

        while let Some(event) = subscription.next().await {
            match event {
                LocationEvent::Sample(sample) => {
                    self.handle_sample(sample).await;
                }
                LocationEvent::Orientation(heading) => {
                    self.handle_orientation(heading).await;
                }
                LocationEvent::Error(kind) => {
                    self.handle_location_error(kind).await;
                }
            }
        }

        self.session.lock().await.stop_tracking();
    }

    /// Stop the location stream behind `handle` and clear tracking state.
    pub async fn stop_tracking(&self, handle: &StopHandle) {
        handle.stop();
        self.session.lock().await.stop_tracking();
    }
}
