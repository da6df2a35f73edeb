//! Display smoothing for heading and speed.
//!
//! [`HeadingSmoother`] keeps a circular moving average of headings with
//! outlier rejection, independent of the fusion engine's instantaneous
//! heading. [`SpeedDisplay`] is the short moving average shown to the
//! driver.

use std::collections::VecDeque;

use crate::config::SmootherConfig;
use crate::geo_utils::{angular_difference, normalize_degrees};

/// Circular mean of headings in degrees, normalized into [0, 360).
///
/// Returns `None` for an empty input. Opposite headings that cancel out
/// exactly yield 0.
pub fn circular_mean_deg<'a>(headings: impl IntoIterator<Item = &'a f64>) -> Option<f64> {
    let mut count = 0usize;
    let (sum_sin, sum_cos) = headings.into_iter().fold((0.0, 0.0), |(s, c), h| {
        count += 1;
        let r = h.to_radians();
        (s + r.sin(), c + r.cos())
    });
    if count == 0 {
        return None;
    }
    Some(normalize_degrees(sum_sin.atan2(sum_cos).to_degrees()))
}

/// Circular moving average of headings with jump rejection.
#[derive(Debug, Clone)]
pub struct HeadingSmoother {
    config: SmootherConfig,
    buffer: VecDeque<f64>,
    smoothed: Option<f64>,
}

impl HeadingSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            buffer: VecDeque::with_capacity(config.buffer_size_slow),
            config,
            smoothed: None,
        }
    }

    /// Current smoothed heading.
    pub fn current(&self) -> Option<f64> {
        self.smoothed
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Feed the next heading, given the current fused speed.
    ///
    /// `None` clears the buffer and the smoothed value. A heading that jumps
    /// further than the speed-dependent threshold from the smoothed value,
    /// once the buffer holds more than two entries, is ignored.
    pub fn update(&mut self, heading_deg: Option<f64>, speed_kmh: Option<f64>) -> Option<f64> {
        let heading = match heading_deg.filter(|h| h.is_finite()) {
            Some(h) => normalize_degrees(h),
            None => {
                self.reset();
                return None;
            }
        };

        let fast = |threshold: f64| speed_kmh.is_some_and(|s| s > threshold);

        if let Some(previous) = self.smoothed {
            let jump_threshold = if fast(self.config.fast_threshold_speed_kmh) {
                self.config.jump_threshold_fast_deg
            } else {
                self.config.jump_threshold_slow_deg
            };
            if angular_difference(heading, previous) > jump_threshold
                && self.buffer.len() > self.config.min_samples_for_rejection
            {
                return self.smoothed;
            }
        }

        let capacity = if fast(self.config.fast_buffer_speed_kmh) {
            self.config.buffer_size_fast
        } else {
            self.config.buffer_size_slow
        };
        self.buffer.push_back(heading);
        while self.buffer.len() > capacity.max(1) {
            self.buffer.pop_front();
        }

        self.smoothed = circular_mean_deg(self.buffer.iter());
        self.smoothed
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.smoothed = None;
    }
}

impl Default for HeadingSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}

/// Two-sample moving average of speed, rounded for display.
#[derive(Debug, Clone, Default)]
pub struct SpeedDisplay {
    recent: VecDeque<f64>,
}

impl SpeedDisplay {
    const WINDOW: usize = 2;

    /// Feed a fused speed; `None` clears the display.
    pub fn update(&mut self, speed_kmh: Option<f64>) -> Option<u32> {
        match speed_kmh.filter(|s| s.is_finite()) {
            Some(s) => {
                self.recent.push_back(s);
                while self.recent.len() > Self::WINDOW {
                    self.recent.pop_front();
                }
                self.value()
            }
            None => {
                self.recent.clear();
                None
            }
        }
    }

    /// Current display value in whole km/h.
    pub fn value(&self) -> Option<u32> {
        if self.recent.is_empty() {
            return None;
        }
        let avg = self.recent.iter().sum::<f64>() / self.recent.len() as f64;
        Some(avg.max(0.0).round() as u32)
    }

    /// Display text, "—" without a reading.
    pub fn text(&self) -> String {
        match self.value() {
            Some(v) => format!("{} km/h", v),
            None => "—".to_string(),
        }
    }

    pub fn reset(&mut self) {
        self.recent.clear();
    }
}
