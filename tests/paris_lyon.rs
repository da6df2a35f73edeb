//! End-to-end drive from Paris towards Lyon with in-memory providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use route_sentinel::geo_utils::haversine_distance;
use route_sentinel::providers::{
    AnnouncementKind, GeocodeSource, RouteRequest, RoutedPath,
};
use route_sentinel::{
    Announcement, CorridorConfig, GeocodeCandidate, Geocoder, GpsPoint, LocationEvent,
    LocationSubscription, NavError, NavigationSession, Navigator, OffRouteState,
    PoiCorridorLoader, PoiKind, PointOfInterest, RawSample, Result, RouteProvider,
};

const PARIS: (f64, f64) = (48.8566, 2.3522);
const LYON: (f64, f64) = (45.7640, 4.8357);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Point at `fraction` of the straight Paris-Lyon line.
fn along(fraction: f64) -> GpsPoint {
    GpsPoint::new(
        PARIS.0 + (LYON.0 - PARIS.0) * fraction,
        PARIS.1 + (LYON.1 - PARIS.1) * fraction,
    )
}

fn offset_east(p: GpsPoint, meters: f64) -> GpsPoint {
    let dlon = (meters / (6_371_000.0 * p.latitude.to_radians().cos())).to_degrees();
    GpsPoint::new(p.latitude, p.longitude + dlon)
}

fn fix(p: GpsPoint, t_ms: u64) -> RawSample {
    RawSample::new(p.latitude, p.longitude, 5.0, t_ms).with_speed(25.0)
}

/// Straight line from origin to destination at 90 km/h.
///
/// Only the first plan succeeds; later requests fail, so the original
/// route stays active after a failed reroute.
struct StraightLineRouter {
    plans: Arc<AtomicUsize>,
}

impl RouteProvider for StraightLineRouter {
    fn routes(&self, request: RouteRequest) -> BoxFuture<'_, Result<Vec<RoutedPath>>> {
        if request.alternatives > 0 {
            self.plans.fetch_add(1, Ordering::SeqCst);
        }
        let reachable = self.plans.load(Ordering::SeqCst) <= 1;
        Box::pin(async move {
            if !reachable {
                return Err(NavError::Network {
                    message: "router unreachable".to_string(),
                    status_code: None,
                });
            }
            let distance_m = haversine_distance(&request.origin, &request.destination);
            Ok(vec![RoutedPath {
                polyline: vec![request.origin, request.destination],
                distance_m,
                duration_s: distance_m / 25.0,
            }])
        })
    }
}

struct LyonGeocoder;

impl Geocoder for LyonGeocoder {
    fn search<'a>(&'a self, _query: &'a str) -> BoxFuture<'a, Result<Vec<GeocodeCandidate>>> {
        Box::pin(async {
            Ok(vec![GeocodeCandidate::new(
                "Lyon",
                GpsPoint::new(LYON.0, LYON.1),
                GeocodeSource::Address,
            )])
        })
    }
}

struct NoCorridorPois;

impl PoiCorridorLoader for NoCorridorPois {
    fn load_corridor<'a>(
        &'a self,
        _route: &'a [GpsPoint],
        _kind: PoiKind,
        _corridor: &'a CorridorConfig,
    ) -> BoxFuture<'a, Result<Vec<PointOfInterest>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

type TestNavigator =
    Navigator<StraightLineRouter, LyonGeocoder, NoCorridorPois, Vec<Announcement>>;

/// Navigator plus the count of full route plans it requested.
fn navigator() -> (TestNavigator, Arc<AtomicUsize>) {
    let plans = Arc::new(AtomicUsize::new(0));
    let router = StraightLineRouter {
        plans: Arc::clone(&plans),
    };
    let nav = Navigator::new(
        NavigationSession::default(),
        router,
        LyonGeocoder,
        NoCorridorPois,
        Vec::new(),
    );
    (nav, plans)
}

#[tokio::test]
async fn test_drive_leave_route_and_rejoin() {
    init_logger();
    let (nav, plans) = navigator();
    let radar = along(0.02);
    nav.set_radars(vec![
        PointOfInterest::new("A6-1", radar.latitude, radar.longitude, PoiKind::Radar),
        PointOfInterest::new("far", 43.3, 5.4, PoiKind::Radar),
    ])
    .await;

    nav.handle_sample(fix(along(0.0), 0)).await.unwrap();
    let routes = nav.navigate_to("Lyon").await.unwrap();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].name, "Fastest");
    let version = nav.select_route(0).await.unwrap();
    assert_eq!(nav.with_session(|s| s.monitor().radars().len()).await, 1);
    assert_eq!(plans.load(Ordering::SeqCst), 1);

    // Approach the radar: one alert, not repeated
    let first = nav.handle_sample(fix(along(0.019), 1_000)).await.unwrap();
    assert_eq!(first.proximity.alerts.len(), 1);
    assert!(first.proximity.alerts[0].message.ends_with("speed 90 km/h"));
    assert_eq!(first.proximity.state, OffRouteState::OnRoute);
    let second = nav.handle_sample(fix(along(0.0195), 2_000)).await.unwrap();
    assert!(second.proximity.alerts.is_empty());

    // 120 m east of the line is about 115 m from it
    let off = nav
        .handle_sample(fix(offset_east(along(0.0195), 120.0), 3_000))
        .await
        .unwrap();
    assert!(off.proximity.distance_to_route_m.unwrap() > 100.0);
    assert!(off.proximity.recalculation_requested);
    assert_eq!(off.proximity.state, OffRouteState::OffRoute);
    assert_eq!(plans.load(Ordering::SeqCst), 2);

    // The reroute failed: same route, still off it, no second request
    assert!(nav.with_session(|s| s.is_current(version)).await);
    let still_off = nav
        .handle_sample(fix(offset_east(along(0.0197), 120.0), 4_000))
        .await
        .unwrap();
    assert!(!still_off.proximity.recalculation_requested);
    assert_eq!(still_off.proximity.state, OffRouteState::OffRoute);
    assert_eq!(plans.load(Ordering::SeqCst), 2);

    // Back within 80 m of the original route
    let back = nav
        .handle_sample(fix(offset_east(along(0.02), 60.0), 5_000))
        .await
        .unwrap();
    assert!(back.proximity.distance_to_route_m.unwrap() <= 80.0);
    assert!(back.proximity.rejoined_route);
    assert!(!back.proximity.recalculation_requested);
    assert_eq!(back.proximity.state, OffRouteState::OnRoute);
    assert!(back.proximity.alerts.is_empty());
    assert_eq!(plans.load(Ordering::SeqCst), 2);

    let (session, said) = nav.into_parts();
    assert!(session.is_current(version));
    assert!(!session.monitor().is_off_route());
    let count = |kind: AnnouncementKind| said.iter().filter(|a| a.kind == kind).count();
    assert_eq!(count(AnnouncementKind::Alert(PoiKind::Radar)), 1);
    assert_eq!(count(AnnouncementKind::OffRoute), 1);
    // Routes listed and selected; no reroute
    assert_eq!(count(AnnouncementKind::Route), 2);
}

#[tokio::test]
async fn test_location_stream_drives_session() {
    init_logger();
    let (nav, _) = navigator();
    let nav = Arc::new(nav);
    let (feed, subscription) = LocationSubscription::channel();
    let handle = subscription.stop_handle();

    let runner = {
        let nav = Arc::clone(&nav);
        tokio::spawn(async move { nav.run(subscription).await })
    };

    // About 20 m per second
    for (i, fraction) in [0.0, 0.00005, 0.0001].into_iter().enumerate() {
        assert!(feed.send(LocationEvent::Sample(fix(along(fraction), i as u64 * 1_000))));
    }
    feed.send(LocationEvent::Orientation(150.0));

    let last = along(0.0001);
    while nav.with_session(|s| s.last_position()).await != Some(last) {
        tokio::task::yield_now().await;
    }
    assert!(nav.with_session(|s| s.is_tracking()).await);
    let reply = nav.handle_command("quelle vitesse").await;
    assert!(reply.starts_with("You are driving at "), "{}", reply);

    nav.stop_tracking(&handle).await;
    runner.await.unwrap();

    assert!(!feed.send(LocationEvent::Sample(fix(along(0.00015), 3_000))));
    assert!(nav.with_session(|s| s.last_position()).await.is_none());
    assert_eq!(nav.with_session(|s| s.speed_text()).await, "—");
}
