//! # Position Fusion
//!
//! Turns noisy, intermittent location fixes into a stable position, speed
//! and heading estimate.
//!
//! ## Pipeline (per accepted fix)
//! 1. Accuracy gate: 20 m ceiling, relaxed to 25 m above 10 km/h
//! 2. Buffer: last 3 fixes above 15 km/h, last 5 otherwise
//! 3. Derived speed: mean of the valid pair speeds over the 3 newest fixes
//! 4. Speed reconciliation: provider speed blended with derived speed when
//!    they agree, with a short decay of the last provider speed when both
//!    are missing
//! 5. Heading: provider heading, else bearing over the buffer, else the
//!    calibrated compass, else the last heading while it is fresh
//!
//! Rejected fixes leave every piece of state untouched.

use std::collections::VecDeque;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::FusionConfig;
use crate::geo_utils::{bearing_degrees, distance_meters, normalize_degrees};
use crate::GpsPoint;

const MPS_TO_KMH: f64 = 3.6;

// ============================================================================
// Core Types
// ============================================================================

/// A raw fix from the location provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,
    /// Milliseconds since an arbitrary epoch, monotonic per stream
    pub timestamp_ms: u64,
    /// Instantaneous speed reported by the provider (m/s)
    pub speed_mps: Option<f64>,
    /// Course over ground reported by the provider (degrees, 0 = north)
    pub heading_deg: Option<f64>,
}

impl RawSample {
    pub fn new(latitude: f64, longitude: f64, accuracy_m: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m,
            timestamp_ms,
            speed_mps: None,
            heading_deg: None,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_heading(mut self, heading_deg: f64) -> Self {
        self.heading_deg = Some(heading_deg);
        self
    }

    pub fn position(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Best current estimate of position, speed and heading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusedState {
    pub position: GpsPoint,
    /// `None` means "no reading"
    pub speed_kmh: Option<f64>,
    /// In [0, 360); `None` means "no reading"
    pub heading_deg: Option<f64>,
    pub accuracy_m: f64,
    pub timestamp_ms: u64,
}

/// Bounded buffer of the most recent accepted fixes.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: VecDeque<RawSample>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fix, evicting the oldest entries beyond `capacity`.
    pub fn push(&mut self, sample: RawSample, capacity: usize) {
        self.samples.push_back(sample);
        while self.samples.len() > capacity.max(1) {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&RawSample> {
        self.samples.back()
    }

    /// Fix `n` places before the newest (0 = newest).
    pub fn nth_back(&self, n: usize) -> Option<&RawSample> {
        self.samples.len().checked_sub(n + 1).and_then(|i| self.samples.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RawSample> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

// ============================================================================
// Speed Derivation
// ============================================================================

/// Speed in km/h between two consecutive fixes, if the pair is usable.
///
/// The pair must be 0.2–1.5 s apart (exclusive), more than 0.2 m apart, and
/// the resulting speed must lie in [0, 180] km/h.
pub fn pair_speed_kmh(prev: &RawSample, curr: &RawSample, config: &FusionConfig) -> Option<f64> {
    let dt_s = curr.timestamp_ms.checked_sub(prev.timestamp_ms)? as f64 / 1000.0;
    if dt_s <= config.pair_min_dt_s || dt_s >= config.pair_max_dt_s {
        return None;
    }

    let distance = distance_meters(prev.latitude, prev.longitude, curr.latitude, curr.longitude);
    if distance <= config.pair_min_distance_m {
        return None;
    }

    let speed = distance / dt_s * MPS_TO_KMH;
    (0.0..=config.max_derived_speed_kmh)
        .contains(&speed)
        .then_some(speed)
}

/// Mean pair speed over the three newest buffered fixes.
///
/// Needs both pairs to be valid; otherwise the derived speed is undefined.
pub fn derived_speed_kmh(buffer: &SampleBuffer, config: &FusionConfig) -> Option<f64> {
    if buffer.len() < 3 {
        return None;
    }

    let recent: Vec<&RawSample> = buffer.iter().skip(buffer.len() - 3).collect();
    let speeds: Vec<f64> = recent
        .windows(2)
        .filter_map(|w| pair_speed_kmh(w[0], w[1], config))
        .collect();

    if speeds.len() < 2 {
        return None;
    }
    Some(speeds.iter().sum::<f64>() / speeds.len() as f64)
}

// ============================================================================
// Compass
// ============================================================================

/// Convert a device-orientation `alpha` angle into a compass heading.
///
/// Platforms that report alpha counter-clockwise need `counter_clockwise`.
pub fn compass_heading_from_alpha(alpha: f64, counter_clockwise: bool) -> f64 {
    let heading = if counter_clockwise { 360.0 - alpha } else { alpha };
    normalize_degrees(heading)
}

/// Auxiliary orientation sensor with a one-time calibration offset.
#[derive(Debug, Clone, Default)]
pub struct Compass {
    offset_deg: Option<f64>,
    heading_deg: Option<f64>,
}

impl Compass {
    pub fn is_calibrated(&self) -> bool {
        self.offset_deg.is_some()
    }

    pub fn offset_deg(&self) -> Option<f64> {
        self.offset_deg
    }

    /// Calibrated heading, if calibration has happened.
    pub fn calibrated_heading(&self) -> Option<f64> {
        self.offset_deg.and(self.heading_deg)
    }

    fn reset(&mut self) {
        self.offset_deg = None;
        self.heading_deg = None;
    }
}

// ============================================================================
// Position Fusion Engine
// ============================================================================

/// Fuses raw location fixes (and optional compass readings) into a
/// [`FusedState`].
#[derive(Debug, Clone)]
pub struct PositionFusion {
    config: FusionConfig,
    buffer: SampleBuffer,
    /// Last defined fused speed; drives the adaptive gates
    last_speed_kmh: Option<f64>,
    /// Last speed computed while the provider reported one, with its time
    last_provider_speed: Option<(f64, u64)>,
    /// Last provider or derived heading, with its time
    last_heading: Option<(f64, u64)>,
    compass: Compass,
    state: Option<FusedState>,
}

impl PositionFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            buffer: SampleBuffer::new(),
            last_speed_kmh: None,
            last_provider_speed: None,
            last_heading: None,
            compass: Compass::default(),
            state: None,
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn compass(&self) -> &Compass {
        &self.compass
    }

    /// Latest fused estimate.
    pub fn state(&self) -> Option<&FusedState> {
        self.state.as_ref()
    }

    /// Last defined fused speed.
    pub fn last_speed_kmh(&self) -> Option<f64> {
        self.last_speed_kmh
    }

    fn is_moving_faster_than(&self, kmh: f64) -> bool {
        self.last_speed_kmh.is_some_and(|s| s > kmh)
    }

    /// Accuracy ceiling for the current speed regime.
    pub fn accuracy_ceiling_m(&self) -> f64 {
        if self.is_moving_faster_than(self.config.relaxed_accuracy_speed_kmh) {
            self.config.max_accuracy_moving_m
        } else {
            self.config.max_accuracy_m
        }
    }

    /// Buffer capacity for the current speed regime.
    pub fn buffer_capacity(&self) -> usize {
        if self.is_moving_faster_than(self.config.fast_buffer_speed_kmh) {
            self.config.buffer_size_fast
        } else {
            self.config.buffer_size_slow
        }
    }

    /// Ingest a raw fix.
    ///
    /// Returns `None` when the fix is rejected; nothing is mutated then.
    pub fn ingest(&mut self, sample: RawSample) -> Option<FusedState> {
        if !sample.position().is_valid() {
            debug!(
                "[PositionFusion] Sample rejected: invalid coordinates ({}, {})",
                sample.latitude, sample.longitude
            );
            return None;
        }

        let ceiling = self.accuracy_ceiling_m();
        if !(sample.accuracy_m <= ceiling) {
            debug!(
                "[PositionFusion] Sample rejected: accuracy {:.1}m > {:.1}m",
                sample.accuracy_m, ceiling
            );
            return None;
        }

        let capacity = self.buffer_capacity();
        self.buffer.push(sample, capacity);

        let now = sample.timestamp_ms;
        let speed = self.fuse_speed(&sample, now);
        let heading = self.fuse_heading(&sample, speed, now);

        if speed.is_some() {
            self.last_speed_kmh = speed;
        }

        let state = FusedState {
            position: sample.position(),
            speed_kmh: speed,
            heading_deg: heading,
            accuracy_m: sample.accuracy_m,
            timestamp_ms: now,
        };
        self.state = Some(state);
        Some(state)
    }

    fn provider_speed_kmh(&self, sample: &RawSample) -> Option<f64> {
        sample
            .speed_mps
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| s * MPS_TO_KMH)
            .filter(|kmh| *kmh <= self.config.max_provider_speed_kmh)
    }

    fn fuse_speed(&mut self, sample: &RawSample, now: u64) -> Option<f64> {
        let derived = derived_speed_kmh(&self.buffer, &self.config);
        let provider = self.provider_speed_kmh(sample);

        match (provider, derived) {
            (Some(p), Some(d)) if (p - d).abs() < self.config.speed_agreement_kmh => {
                let weight = if sample.accuracy_m < self.config.accurate_fix_m {
                    self.config.provider_weight_accurate
                } else {
                    self.config.provider_weight_default
                };
                let blended = p * weight + d * (1.0 - weight);
                self.last_provider_speed = Some((blended, now));
                Some(blended)
            }
            (Some(p), _) => {
                self.last_provider_speed = Some((p, now));
                Some(p)
            }
            (None, Some(d)) => Some(d),
            (None, None) => self
                .last_provider_speed
                .filter(|(_, at)| now.saturating_sub(*at) < self.config.speed_decay_window_ms)
                .map(|(s, _)| s * self.config.speed_decay_factor),
        }
    }

    fn fuse_heading(&mut self, sample: &RawSample, speed: Option<f64>, now: u64) -> Option<f64> {
        let speed = speed?;
        if speed <= self.config.min_heading_speed_kmh {
            return self.last_heading.map(|(h, _)| h);
        }

        let measured = sample
            .heading_deg
            .filter(|h| h.is_finite() && *h >= 0.0)
            .map(normalize_degrees)
            .or_else(|| self.bearing_from_buffer());

        if let Some(h) = measured {
            self.last_heading = Some((h, now));
            return Some(h);
        }

        if self.config.use_compass {
            if let Some(h) = self.compass.calibrated_heading() {
                return Some(h);
            }
        }

        self.last_heading
            .filter(|(_, at)| now.saturating_sub(*at) < self.config.heading_hold_ms)
            .map(|(h, _)| h)
    }

    /// Bearing from the fix two places back to the newest fix, when they
    /// are far enough apart for the bearing to be meaningful.
    fn bearing_from_buffer(&self) -> Option<f64> {
        let prev = self.buffer.nth_back(2)?;
        let curr = self.buffer.latest()?;
        let distance = distance_meters(prev.latitude, prev.longitude, curr.latitude, curr.longitude);
        (distance > self.config.min_bearing_distance_m)
            .then(|| bearing_from(prev, curr))
    }

    /// Feed a compass heading (degrees, 0 = north, clockwise).
    ///
    /// The first reading taken while moving faster than the calibration
    /// speed with a known heading fixes the offset for the rest of the run.
    pub fn ingest_orientation(&mut self, sensor_heading_deg: f64) -> Option<f64> {
        if !sensor_heading_deg.is_finite() {
            return self.compass.calibrated_heading();
        }
        let raw = normalize_degrees(sensor_heading_deg);

        if !self.compass.is_calibrated()
            && self.is_moving_faster_than(self.config.calibration_speed_kmh)
        {
            if let Some((reference, _)) = self.last_heading {
                let offset = reference - raw;
                self.compass.offset_deg = Some(offset);
                info!("[PositionFusion] Compass calibrated: offset {:.1}°", offset);
            }
        }

        let heading = match self.compass.offset_deg {
            Some(offset) => normalize_degrees(raw + offset),
            None => raw,
        };
        self.compass.heading_deg = Some(heading);
        self.compass.calibrated_heading()
    }

    /// Forget compass readings and calibration.
    pub fn stop_compass(&mut self) {
        self.compass.reset();
    }

    /// Clear all buffers and remembered readings.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_speed_kmh = None;
        self.last_provider_speed = None;
        self.last_heading = None;
        self.compass.reset();
        self.state = None;
    }
}

impl Default for PositionFusion {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

fn bearing_from(prev: &RawSample, curr: &RawSample) -> f64 {
    bearing_degrees(prev.latitude, prev.longitude, curr.latitude, curr.longitude)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::EARTH_RADIUS_M;

    const BASE_LAT: f64 = 48.8566;
    const BASE_LON: f64 = 2.3522;

    /// Latitude `meters` north of the base point.
    fn north(meters: f64) -> f64 {
        BASE_LAT + (meters / EARTH_RADIUS_M).to_degrees()
    }

    fn fix(meters_north: f64, t_ms: u64) -> RawSample {
        RawSample::new(north(meters_north), BASE_LON, 5.0, t_ms)
    }

    #[test]
    fn test_pair_speed_10m_per_second_is_36kmh() {
        let config = FusionConfig::default();
        let speed = pair_speed_kmh(&fix(0.0, 0), &fix(10.0, 1000), &config).unwrap();
        assert!((speed - 36.0).abs() < 1e-6, "got {}", speed);
    }

    #[test]
    fn test_pair_speed_rejects_bad_windows() {
        let config = FusionConfig::default();
        // Too close in time
        assert!(pair_speed_kmh(&fix(0.0, 0), &fix(10.0, 100), &config).is_none());
        // Too far apart in time
        assert!(pair_speed_kmh(&fix(0.0, 0), &fix(10.0, 2000), &config).is_none());
        // Barely moved
        assert!(pair_speed_kmh(&fix(0.0, 0), &fix(0.1, 1000), &config).is_none());
        // Implausibly fast (100 m in 1 s = 360 km/h)
        assert!(pair_speed_kmh(&fix(0.0, 0), &fix(100.0, 1000), &config).is_none());
        // Out of order
        assert!(pair_speed_kmh(&fix(10.0, 1000), &fix(0.0, 0), &config).is_none());
    }

    #[test]
    fn test_derived_speed_needs_two_pairs() {
        let config = FusionConfig::default();
        let mut buffer = SampleBuffer::new();
        buffer.push(fix(0.0, 0), 5);
        buffer.push(fix(10.0, 1000), 5);
        assert!(derived_speed_kmh(&buffer, &config).is_none());

        buffer.push(fix(20.0, 2000), 5);
        let speed = derived_speed_kmh(&buffer, &config).unwrap();
        assert!((speed - 36.0).abs() < 1e-6);
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut buffer = SampleBuffer::new();
        for i in 0..7 {
            buffer.push(fix(i as f64, i * 1000), 5);
        }
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.latest().unwrap().timestamp_ms, 6000);
        assert_eq!(buffer.nth_back(4).unwrap().timestamp_ms, 2000);
        assert!(buffer.nth_back(5).is_none());

        // Shrinking capacity evicts down to the new size at once
        buffer.push(fix(7.0, 7000), 3);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_coarse_fix_rejected_without_mutation() {
        let mut fusion = PositionFusion::default();
        assert!(fusion.ingest(fix(0.0, 0)).is_some());
        let before = *fusion.state().unwrap();

        let mut coarse = fix(10.0, 1000);
        coarse.accuracy_m = 21.0;
        assert!(fusion.ingest(coarse).is_none());

        assert_eq!(fusion.buffer().len(), 1);
        assert_eq!(*fusion.state().unwrap(), before);
    }

    #[test]
    fn test_nan_accuracy_rejected() {
        let mut fusion = PositionFusion::default();
        let mut sample = fix(0.0, 0);
        sample.accuracy_m = f64::NAN;
        assert!(fusion.ingest(sample).is_none());
        assert!(fusion.buffer().is_empty());
    }

    #[test]
    fn test_ceiling_relaxes_when_fast() {
        let mut fusion = PositionFusion::default();
        assert_eq!(fusion.accuracy_ceiling_m(), 20.0);

        // 5 m/s = 18 km/h from the provider
        fusion.ingest(fix(0.0, 0).with_speed(5.0)).unwrap();
        assert_eq!(fusion.accuracy_ceiling_m(), 25.0);
        assert_eq!(fusion.buffer_capacity(), 3);

        let mut noisy = fix(5.0, 1000).with_speed(5.0);
        noisy.accuracy_m = 22.0;
        assert!(fusion.ingest(noisy).is_some());
    }

    #[test]
    fn test_derived_speed_used_without_provider() {
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0));
        fusion.ingest(fix(10.0, 1000));
        let state = fusion.ingest(fix(20.0, 2000)).unwrap();

        let speed = state.speed_kmh.unwrap();
        assert!((speed - 36.0).abs() < 1e-6);
        // Derived from the bearing over the buffer: due north
        let heading = state.heading_deg.unwrap();
        assert!(heading < 1e-6 || heading > 360.0 - 1e-6);
    }

    #[test]
    fn test_blended_speed_when_sources_agree() {
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0));
        fusion.ingest(fix(10.0, 1000));
        // Provider says 11 m/s = 39.6 km/h, derived is 36 km/h, accuracy 5 m
        let state = fusion.ingest(fix(20.0, 2000).with_speed(11.0)).unwrap();

        let expected = 39.6 * 0.7 + 36.0 * 0.3;
        assert!((state.speed_kmh.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_blend_weight_drops_for_coarser_fix() {
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0));
        fusion.ingest(fix(10.0, 1000));
        let mut sample = fix(20.0, 2000).with_speed(11.0);
        sample.accuracy_m = 15.0;
        let state = fusion.ingest(sample).unwrap();

        let expected = 39.6 * 0.6 + 36.0 * 0.4;
        assert!((state.speed_kmh.unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_provider_wins_when_sources_disagree() {
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0));
        fusion.ingest(fix(10.0, 1000));
        // 20 m/s = 72 km/h, far from the derived 36 km/h
        let state = fusion.ingest(fix(20.0, 2000).with_speed(20.0)).unwrap();
        assert!((state.speed_kmh.unwrap() - 72.0).abs() < 1e-6);
    }

    #[test]
    fn test_absurd_provider_speed_falls_back_to_derived() {
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0));
        fusion.ingest(fix(10.0, 1000));
        // 60 m/s = 216 km/h is discarded
        let state = fusion.ingest(fix(20.0, 2000).with_speed(60.0)).unwrap();
        assert!((state.speed_kmh.unwrap() - 36.0).abs() < 1e-6);
    }

    #[test]
    fn test_speed_decays_then_expires() {
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0).with_speed(10.0)).unwrap();

        // No provider speed, no derived speed (only two fixes), 2 s later
        let state = fusion.ingest(fix(0.0, 2000)).unwrap();
        assert!((state.speed_kmh.unwrap() - 36.0 * 0.95).abs() < 1e-6);

        // 3.5 s after the provider reading: no reading at all
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0).with_speed(10.0)).unwrap();
        let state = fusion.ingest(fix(0.0, 3500)).unwrap();
        assert!(state.speed_kmh.is_none());
        assert!(state.heading_deg.is_none());
    }

    #[test]
    fn test_provider_heading_preferred() {
        let mut fusion = PositionFusion::default();
        let state = fusion
            .ingest(fix(0.0, 0).with_speed(10.0).with_heading(123.0))
            .unwrap();
        assert_eq!(state.heading_deg, Some(123.0));
    }

    #[test]
    fn test_heading_held_when_slow() {
        let mut fusion = PositionFusion::default();
        fusion
            .ingest(fix(0.0, 0).with_speed(10.0).with_heading(90.0))
            .unwrap();

        // Nearly stopped with a jittery provider heading: keep the old one
        let state = fusion
            .ingest(fix(0.0, 60_000).with_speed(0.3).with_heading(250.0))
            .unwrap();
        assert_eq!(state.heading_deg, Some(90.0));
    }

    #[test]
    fn test_heading_hold_expires_after_five_seconds() {
        let mut fusion = PositionFusion::default();
        fusion
            .ingest(fix(0.0, 0).with_speed(10.0).with_heading(45.0))
            .unwrap();

        // Moving, no provider heading, too few fixes for a bearing
        let state = fusion.ingest(fix(1.0, 4000).with_speed(10.0)).unwrap();
        assert_eq!(state.heading_deg, Some(45.0));

        let state = fusion.ingest(fix(2.0, 9500).with_speed(10.0)).unwrap();
        assert!(state.heading_deg.is_none());
    }

    #[test]
    fn test_compass_calibration_and_use() {
        let mut fusion = PositionFusion::default();
        // Uncalibrated while stationary
        assert!(fusion.ingest_orientation(100.0).is_none());

        fusion
            .ingest(fix(0.0, 0).with_speed(10.0).with_heading(90.0))
            .unwrap();
        // Sensor reads 80 while the true course is 90: offset +10
        assert_eq!(fusion.ingest_orientation(80.0), Some(90.0));
        assert!(fusion.compass().is_calibrated());
        assert_eq!(fusion.ingest_orientation(355.0), Some(5.0));

        // No provider heading and no usable bearing: the compass answers
        let state = fusion.ingest(fix(1.0, 1000).with_speed(10.0)).unwrap();
        assert_eq!(state.heading_deg, Some(5.0));

        fusion.stop_compass();
        assert!(!fusion.compass().is_calibrated());
    }

    #[test]
    fn test_compass_alpha_conversion() {
        assert_eq!(compass_heading_from_alpha(30.0, false), 30.0);
        assert_eq!(compass_heading_from_alpha(30.0, true), 330.0);
        assert_eq!(compass_heading_from_alpha(0.0, true), 0.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut fusion = PositionFusion::default();
        fusion.ingest(fix(0.0, 0).with_speed(10.0).with_heading(10.0));
        fusion.reset();
        assert!(fusion.buffer().is_empty());
        assert!(fusion.state().is_none());
        assert!(fusion.last_speed_kmh().is_none());
        assert_eq!(fusion.accuracy_ceiling_m(), 20.0);
    }
}
