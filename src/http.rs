//! HTTP providers for the public French/OSM services.
//!
//! - [`OsrmRouter`]: driving routes from an OSRM server
//! - [`FrenchGeocoder`]: national address base merged with Nominatim
//! - [`OverpassLoader`]: traffic lights and police controls around a route
//! - [`RadarDataset`]: the national speed camera CSV
//!
//! Every request is retried with exponential backoff on 429, 5xx and
//! transport errors.

use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::config::CorridorConfig;
use crate::error::{NavError, Result};
use crate::poi::{
    corridor_query_bounds, overpass_police_query, overpass_traffic_lights_query, parse_radar_csv,
    police_controls_from_elements, traffic_lights_from_elements, OverpassResponse, PoiKind,
    PointOfInterest,
};
use crate::providers::{
    merge_geocode_results, GeocodeCandidate, GeocodeSource, Geocoder, PoiCorridorLoader,
    RadarSource, RouteProvider, RouteRequest, RoutedPath,
};
use crate::GpsPoint;

pub const OSRM_URL: &str = "https://router.project-osrm.org";
pub const ADDRESS_URL: &str = "https://api-adresse.data.gouv.fr/search/";
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
pub const RADAR_CSV_URL: &str =
    "https://www.data.gouv.fr/api/1/datasets/r/8a22b5a8-4b65-41be-891a-7c0aead4ba51";

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT_SECS: u64 = 30;
// Matches per source; the merged list is capped at MAX_SUGGESTIONS
const GEOCODE_LIMIT: usize = 3;
const MAX_SUGGESTIONS: usize = 5;
const USER_AGENT: &str = concat!("route-sentinel/", env!("CARGO_PKG_VERSION"));

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| NavError::Config {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

fn network_error(err: reqwest::Error) -> NavError {
    NavError::Network {
        message: err.to_string(),
        status_code: err.status().map(|s| s.as_u16()),
    }
}

/// Delay before retry number `retry` (1-based): 1s, 2s, 4s, 8s.
fn backoff(retry: u32) -> Duration {
    Duration::from_millis(500 * (1u64 << retry.min(4)))
}

/// Send the request built by `build`, retrying transient failures.
async fn send_with_retry<F>(component: &str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut retries = 0;

    loop {
        let error = match build().send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                let error = NavError::Network {
                    message: format!("HTTP {}", status),
                    status_code: Some(status.as_u16()),
                };
                if status != StatusCode::TOO_MANY_REQUESTS && !status.is_server_error() {
                    return Err(error);
                }
                error
            }
            Err(e) => network_error(e),
        };

        retries += 1;
        if retries > MAX_RETRIES {
            warn!("[{}] Giving up after {} retries: {}", component, MAX_RETRIES, error);
            return Err(error);
        }
        let delay = backoff(retries);
        warn!(
            "[{}] {}, retry {} after {:?}",
            component, error, retries, delay
        );
        tokio::time::sleep(delay).await;
    }
}

async fn fetch_text<F>(component: &str, build: F) -> Result<String>
where
    F: Fn() -> RequestBuilder,
{
    send_with_retry(component, build)
        .await?
        .text()
        .await
        .map_err(network_error)
}

// ============================================================================
// Routing
// ============================================================================

#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    geometry: LineGeometry,
}

#[derive(Debug, Deserialize)]
struct LineGeometry {
    /// [lng, lat] pairs
    coordinates: Vec<[f64; 2]>,
}

/// OSRM route service URL for `request`.
pub fn osrm_route_url(base_url: &str, request: &RouteRequest) -> String {
    let mut url = format!(
        "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=geojson",
        base_url.trim_end_matches('/'),
        request.origin.longitude,
        request.origin.latitude,
        request.destination.longitude,
        request.destination.latitude
    );
    if request.alternatives > 0 {
        url.push_str(&format!("&alternatives={}", request.alternatives));
    }
    if request.avoid_tolls {
        url.push_str("&exclude=toll");
    }
    url
}

/// Decode an OSRM route response. "NoRoute" is an empty list.
pub fn parse_osrm_response(body: &str) -> Result<Vec<RoutedPath>> {
    let response: OsrmResponse = serde_json::from_str(body)?;
    match response.code.as_str() {
        "Ok" => {}
        "NoRoute" => return Ok(Vec::new()),
        code => {
            return Err(NavError::ProviderUnavailable {
                provider: "osrm".to_string(),
                message: response.message.unwrap_or_else(|| code.to_string()),
            })
        }
    }

    Ok(response
        .routes
        .into_iter()
        .map(|route| RoutedPath {
            polyline: route
                .geometry
                .coordinates
                .iter()
                .map(|[lng, lat]| GpsPoint::new(*lat, *lng))
                .filter(GpsPoint::is_valid)
                .collect(),
            distance_m: route.distance,
            duration_s: route.duration,
        })
        .filter(|path| !path.polyline.is_empty())
        .collect())
}

/// Driving routes from an OSRM server.
pub struct OsrmRouter {
    client: Client,
    base_url: String,
}

impl OsrmRouter {
    /// Router against the public OSRM demo server.
    pub fn new() -> Result<Self> {
        Self::with_base_url(OSRM_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
        })
    }
}

impl RouteProvider for OsrmRouter {
    fn routes(&self, request: RouteRequest) -> BoxFuture<'_, Result<Vec<RoutedPath>>> {
        Box::pin(async move {
            let url = osrm_route_url(&self.base_url, &request);
            debug!("[OsrmRouter] GET {}", url);
            let body = fetch_text("OsrmRouter", || self.client.get(&url)).await?;
            let paths = parse_osrm_response(&body)?;
            info!(
                "[OsrmRouter] {} route(s), alternatives={}, avoid_tolls={}",
                paths.len(),
                request.alternatives,
                request.avoid_tolls
            );
            Ok(paths)
        })
    }
}

// ============================================================================
// Geocoding
// ============================================================================

#[derive(Debug, Deserialize)]
struct AddressResponse {
    #[serde(default)]
    features: Vec<AddressFeature>,
}

#[derive(Debug, Deserialize)]
struct AddressFeature {
    geometry: PointGeometry,
    properties: AddressProperties,
}

#[derive(Debug, Deserialize)]
struct PointGeometry {
    /// [lng, lat]
    coordinates: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct AddressProperties {
    label: String,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    display_name: String,
    lat: String,
    lon: String,
}

/// Decode an api-adresse GeoJSON response.
pub fn parse_address_results(body: &str) -> Result<Vec<GeocodeCandidate>> {
    let response: AddressResponse = serde_json::from_str(body)?;
    Ok(response
        .features
        .into_iter()
        .filter_map(|f| {
            let [lng, lat] = f.geometry.coordinates;
            let position = GpsPoint::new(lat, lng);
            position
                .is_valid()
                .then(|| GeocodeCandidate::new(f.properties.label, position, GeocodeSource::Address))
        })
        .collect())
}

/// Decode a Nominatim JSON response. Coordinates come as strings.
pub fn parse_nominatim_results(body: &str) -> Result<Vec<GeocodeCandidate>> {
    let places: Vec<NominatimPlace> = serde_json::from_str(body)?;
    Ok(places
        .into_iter()
        .filter_map(|p| {
            let position = GpsPoint::new(p.lat.trim().parse().ok()?, p.lon.trim().parse().ok()?);
            position
                .is_valid()
                .then(|| GeocodeCandidate::new(p.display_name, position, GeocodeSource::Poi))
        })
        .collect())
}

/// Address search on the national address base, completed with
/// businesses and landmarks from Nominatim.
pub struct FrenchGeocoder {
    client: Client,
    address_url: String,
    nominatim_url: String,
}

impl FrenchGeocoder {
    pub fn new() -> Result<Self> {
        Self::with_urls(ADDRESS_URL, NOMINATIM_URL)
    }

    pub fn with_urls(address_url: impl Into<String>, nominatim_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            address_url: address_url.into(),
            nominatim_url: nominatim_url.into(),
        })
    }

    async fn search_addresses(&self, query: &str) -> Result<Vec<GeocodeCandidate>> {
        let limit = GEOCODE_LIMIT.to_string();
        let body = fetch_text("FrenchGeocoder", || {
            self.client
                .get(&self.address_url)
                .query(&[("q", query), ("limit", limit.as_str())])
        })
        .await?;
        parse_address_results(&body)
    }

    async fn search_places(&self, query: &str) -> Result<Vec<GeocodeCandidate>> {
        let limit = GEOCODE_LIMIT.to_string();
        let scoped = format!("{} France", query);
        let body = fetch_text("FrenchGeocoder", || {
            self.client.get(&self.nominatim_url).query(&[
                ("format", "json"),
                ("q", scoped.as_str()),
                ("limit", limit.as_str()),
                ("addressdetails", "1"),
            ])
        })
        .await?;
        parse_nominatim_results(&body)
    }
}

impl Geocoder for FrenchGeocoder {
    fn search<'a>(&'a self, query: &'a str) -> BoxFuture<'a, Result<Vec<GeocodeCandidate>>> {
        Box::pin(async move {
            let (addresses, places) =
                futures::join!(self.search_addresses(query), self.search_places(query));

            let results = match (addresses, places) {
                (Err(e), Err(_)) => return Err(e),
                (addresses, places) => {
                    let lists = [addresses, places].into_iter().filter_map(|r| match r {
                        Ok(list) => Some(list),
                        Err(e) => {
                            warn!("[FrenchGeocoder] One source failed: {}", e);
                            None
                        }
                    });
                    merge_geocode_results(lists, MAX_SUGGESTIONS)
                }
            };

            debug!("[FrenchGeocoder] '{}': {} result(s)", query, results.len());
            Ok(results)
        })
    }
}

// ============================================================================
// Corridor POIs
// ============================================================================

/// Traffic lights and police controls from the Overpass API.
pub struct OverpassLoader {
    client: Client,
    url: String,
}

impl OverpassLoader {
    pub fn new() -> Result<Self> {
        Self::with_url(OVERPASS_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
        })
    }
}

impl PoiCorridorLoader for OverpassLoader {
    fn load_corridor<'a>(
        &'a self,
        route: &'a [GpsPoint],
        kind: PoiKind,
        corridor: &'a CorridorConfig,
    ) -> BoxFuture<'a, Result<Vec<PointOfInterest>>> {
        Box::pin(async move {
            let Some(bounds) = corridor_query_bounds(route, kind, corridor) else {
                return Ok(Vec::new());
            };
            let query = match kind {
                PoiKind::TrafficLight => overpass_traffic_lights_query(&bounds),
                PoiKind::PoliceControl => overpass_police_query(&bounds),
                // Radars come from the national dataset
                PoiKind::Radar => return Ok(Vec::new()),
            };

            let body = fetch_text("OverpassLoader", || {
                self.client.post(&self.url).body(query.clone())
            })
            .await?;
            let response: OverpassResponse = serde_json::from_str(&body)?;

            let pois = match kind {
                PoiKind::TrafficLight => traffic_lights_from_elements(&response.elements, route, corridor),
                _ => police_controls_from_elements(&response.elements, route, corridor),
            };
            info!(
                "[OverpassLoader] {} {} in corridor ({} elements)",
                pois.len(),
                kind.as_str(),
                response.elements.len()
            );
            Ok(pois)
        })
    }
}

// ============================================================================
// Radar dataset
// ============================================================================

/// The national fixed speed camera dataset (CSV).
pub struct RadarDataset {
    client: Client,
    url: String,
}

impl RadarDataset {
    pub fn new() -> Result<Self> {
        Self::with_url(RADAR_CSV_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
        })
    }
}

impl RadarSource for RadarDataset {
    fn load_radars(&self) -> BoxFuture<'_, Result<Vec<PointOfInterest>>> {
        Box::pin(async move {
            let text = fetch_text("RadarDataset", || self.client.get(&self.url)).await?;
            parse_radar_csv(&text)
        })
    }
}
