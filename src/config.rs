//! Tunable constants for fusion, smoothing, proximity and corridor loading.
//!
//! Every struct derives serde with `#[serde(default)]`, so a JSON document
//! only needs the fields it overrides:
//!
//! ```rust
//! use route_sentinel::NavConfig;
//!
//! let config = NavConfig::from_json(r#"{ "proximity": { "off_route_threshold_m": 150.0 } }"#).unwrap();
//! assert_eq!(config.proximity.off_route_threshold_m, 150.0);
//! assert_eq!(config.proximity.radar_alert_radius_m, 500.0);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};

/// Configuration for the position fusion engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Accuracy ceiling for accepting a fix while slow or stopped (meters).
    /// Default: 20.0
    pub max_accuracy_m: f64,
    /// Relaxed accuracy ceiling while moving fast (meters).
    /// Default: 25.0
    pub max_accuracy_moving_m: f64,
    /// Fused speed above which the relaxed ceiling applies (km/h).
    /// Default: 10.0
    pub relaxed_accuracy_speed_kmh: f64,

    /// Sample buffer size at high speed. Default: 3
    pub buffer_size_fast: usize,
    /// Sample buffer size at low speed. Default: 5
    pub buffer_size_slow: usize,
    /// Fused speed above which the small buffer is used (km/h).
    /// Default: 15.0
    pub fast_buffer_speed_kmh: f64,

    /// Minimum time between samples for a derived speed pair (seconds).
    /// Default: 0.2
    pub pair_min_dt_s: f64,
    /// Maximum time between samples for a derived speed pair (seconds).
    /// Default: 1.5
    pub pair_max_dt_s: f64,
    /// Minimum displacement for a derived speed pair (meters). Default: 0.2
    pub pair_min_distance_m: f64,
    /// Derived speed candidates above this are discarded (km/h). Default: 180.0
    pub max_derived_speed_kmh: f64,
    /// Provider speeds above this are discarded (km/h). Default: 200.0
    pub max_provider_speed_kmh: f64,

    /// Provider and derived speed must agree within this to be blended (km/h).
    /// Default: 10.0
    pub speed_agreement_kmh: f64,
    /// Provider weight when the fix is accurate. Default: 0.7
    pub provider_weight_accurate: f64,
    /// Provider weight otherwise. Default: 0.6
    pub provider_weight_default: f64,
    /// Fix accuracy below which the provider is trusted more (meters). Default: 10.0
    pub accurate_fix_m: f64,

    /// Age limit for decaying the last provider speed (milliseconds). Default: 3000
    pub speed_decay_window_ms: u64,
    /// Multiplier applied to a stale provider speed. Default: 0.95
    pub speed_decay_factor: f64,

    /// Below this fused speed the last heading is kept (km/h). Default: 2.0
    pub min_heading_speed_kmh: f64,
    /// Minimum displacement to derive a bearing from samples (meters). Default: 8.0
    pub min_bearing_distance_m: f64,
    /// Age limit for reusing the last valid heading (milliseconds). Default: 5000
    pub heading_hold_ms: u64,

    /// Provider speed needed before the compass is calibrated (km/h). Default: 3.0
    pub calibration_speed_kmh: f64,
    /// Whether a calibrated compass may supply headings. Default: true
    pub use_compass: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 20.0,
            max_accuracy_moving_m: 25.0,
            relaxed_accuracy_speed_kmh: 10.0,
            buffer_size_fast: 3,
            buffer_size_slow: 5,
            fast_buffer_speed_kmh: 15.0,
            pair_min_dt_s: 0.2,
            pair_max_dt_s: 1.5,
            pair_min_distance_m: 0.2,
            max_derived_speed_kmh: 180.0,
            max_provider_speed_kmh: 200.0,
            speed_agreement_kmh: 10.0,
            provider_weight_accurate: 0.7,
            provider_weight_default: 0.6,
            accurate_fix_m: 10.0,
            speed_decay_window_ms: 3000,
            speed_decay_factor: 0.95,
            min_heading_speed_kmh: 2.0,
            min_bearing_distance_m: 8.0,
            heading_hold_ms: 5000,
            calibration_speed_kmh: 3.0,
            use_compass: true,
        }
    }
}

/// Configuration for the heading smoother.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmootherConfig {
    /// Jump rejection threshold at high speed (degrees). Default: 60.0
    pub jump_threshold_fast_deg: f64,
    /// Jump rejection threshold otherwise (degrees). Default: 35.0
    pub jump_threshold_slow_deg: f64,
    /// Speed above which the fast threshold applies (km/h). Default: 20.0
    pub fast_threshold_speed_kmh: f64,
    /// Jumps are only rejected once the buffer holds more than this. Default: 2
    pub min_samples_for_rejection: usize,
    /// Buffer size at high speed. Default: 3
    pub buffer_size_fast: usize,
    /// Buffer size otherwise. Default: 6
    pub buffer_size_slow: usize,
    /// Speed above which the small buffer is used (km/h). Default: 15.0
    pub fast_buffer_speed_kmh: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            jump_threshold_fast_deg: 60.0,
            jump_threshold_slow_deg: 35.0,
            fast_threshold_speed_kmh: 20.0,
            min_samples_for_rejection: 2,
            buffer_size_fast: 3,
            buffer_size_slow: 6,
            fast_buffer_speed_kmh: 15.0,
        }
    }
}

/// Configuration for the route proximity monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Distance to the route beyond which the driver is off-route (meters).
    /// Default: 100.0
    pub off_route_threshold_m: f64,
    /// Radars within this distance raise an alert (meters). Default: 500.0
    pub radar_alert_radius_m: f64,
    /// Police controls within this distance raise an alert (meters). Default: 800.0
    pub police_alert_radius_m: f64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            off_route_threshold_m: 100.0,
            radar_alert_radius_m: 500.0,
            police_alert_radius_m: 800.0,
        }
    }
}

/// Corridor widths used to scope points of interest to a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorridorConfig {
    /// Radar corridor half-width (kilometers). Default: 0.12
    pub radar_buffer_km: f64,
    /// Route bounds padding for the radar prefilter (ratio). Default: 0.02
    pub radar_bounds_pad: f64,
    /// Traffic light corridor half-width (kilometers). Default: 0.05
    pub traffic_light_buffer_km: f64,
    /// Route bounds padding for the traffic light query (ratio). Default: 0.01
    pub traffic_light_bounds_pad: f64,
    /// Police corridor half-width (kilometers). Default: 2.0
    pub police_buffer_km: f64,
    /// Route bounds padding for the police query (ratio). Default: 0.05
    pub police_bounds_pad: f64,
    /// Maximum police points kept per route. Default: 20
    pub max_police_points: usize,
}

impl Default for CorridorConfig {
    fn default() -> Self {
        Self {
            radar_buffer_km: 0.12,
            radar_bounds_pad: 0.02,
            traffic_light_buffer_km: 0.05,
            traffic_light_bounds_pad: 0.01,
            police_buffer_km: 2.0,
            police_bounds_pad: 0.05,
            max_police_points: 20,
        }
    }
}

/// Options passed to the route provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSettings {
    /// Also request a toll-free variant.
    pub avoid_tolls: bool,
}

/// Aggregate configuration for a navigation session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub fusion: FusionConfig,
    pub smoother: SmootherConfig,
    pub proximity: ProximityConfig,
    pub corridor: CorridorConfig,
    pub routing: RouteSettings,
}

impl NavConfig {
    /// Parse a (possibly partial) JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NavConfig = serde_json::from_str(json).map_err(|e| NavError::Config {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.fusion.buffer_size_fast < 2 || self.fusion.buffer_size_slow < 2 {
            return Err(NavError::Config {
                message: "fusion buffer sizes must be at least 2".to_string(),
            });
        }
        if self.smoother.buffer_size_fast == 0 || self.smoother.buffer_size_slow == 0 {
            return Err(NavError::Config {
                message: "smoother buffer sizes must be non-zero".to_string(),
            });
        }
        for weight in [
            self.fusion.provider_weight_accurate,
            self.fusion.provider_weight_default,
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(NavError::Config {
                    message: format!("provider weight {} outside [0, 1]", weight),
                });
            }
        }
        if self.proximity.off_route_threshold_m <= 0.0 {
            return Err(NavError::Config {
                message: "off-route threshold must be positive".to_string(),
            });
        }
        Ok(())
    }
}
