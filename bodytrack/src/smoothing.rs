//! Double-exponential (Holt) smoothing filter for joint samples
//!
//! Each joint keeps a short history: the previous raw sample, the previous
//! filtered value and the previous trend. A zero raw sample is the device's
//! "not tracked" sentinel and restarts the filter run.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Smallest jitter radius the filter will use
pub const MIN_JITTER_RADIUS: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingParameters {
    /// Lag vs noise trade-off, in [0, 1]. Higher is smoother and laggier.
    pub smoothing: f32,
    /// Trend responsiveness, in [0, 1]
    pub correction: f32,
    /// Number of frames to predict ahead
    pub prediction: f32,
    /// Deadband distance (meters) inside which motion is treated as jitter
    pub jitter_radius: f32,
    /// Hard cap (meters) on how far the output may stray from the raw sample
    pub max_deviation_radius: f32,
}

impl Default for SmoothingParameters {
    fn default() -> Self {
        Self {
            smoothing: 0.5,
            correction: 0.5,
            prediction: 0.5,
            jitter_radius: 0.05,
            max_deviation_radius: 0.04,
        }
    }
}

impl SmoothingParameters {
    pub fn new(
        smoothing: f32,
        correction: f32,
        prediction: f32,
        jitter_radius: f32,
        max_deviation_radius: f32,
    ) -> Self {
        Self {
            smoothing,
            correction,
            prediction,
            jitter_radius,
            max_deviation_radius,
        }
        .sanitized()
    }

    /// Clamp every field into its valid range.
    ///
    /// A non-positive jitter radius is floored to [`MIN_JITTER_RADIUS`].
    pub fn sanitized(self) -> Self {
        Self {
            smoothing: self.smoothing.clamp(0.0, 1.0),
            correction: self.correction.clamp(0.0, 1.0),
            prediction: self.prediction.max(0.0),
            jitter_radius: self.jitter_radius.max(MIN_JITTER_RADIUS),
            max_deviation_radius: self.max_deviation_radius.max(MIN_JITTER_RADIUS),
        }
    }

    /// Same parameters with jitter and deviation radii doubled
    pub fn widened(self) -> Self {
        Self {
            jitter_radius: self.jitter_radius * 2.0,
            max_deviation_radius: self.max_deviation_radius * 2.0,
            ..self
        }
    }
}

/// Named parameter sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmoothingPreset {
    /// Filtering disabled
    None,
    #[default]
    Default,
    Medium,
    Aggressive,
}

impl SmoothingPreset {
    /// Parameters for this preset, `None` when filtering is disabled
    pub fn parameters(self) -> Option<SmoothingParameters> {
        match self {
            Self::None => None,
            Self::Default => Some(SmoothingParameters::default()),
            Self::Medium => Some(SmoothingParameters::new(0.5, 0.1, 0.5, 0.1, 0.1)),
            Self::Aggressive => Some(SmoothingParameters::new(0.7, 0.3, 1.0, 1.0, 1.0)),
        }
    }
}

/// History for one filtered channel of one joint
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FilterState {
    pub raw: Vector3<f32>,
    pub filtered: Vector3<f32>,
    pub trend: Vector3<f32>,
    pub frame_count: u32,
}

impl FilterState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Filter one raw sample and return the predicted output.
    ///
    /// `params` must already be sanitized.
    pub fn filter_sample(&mut self, raw: Vector3<f32>, params: &SmoothingParameters) -> Vector3<f32> {
        if raw == Vector3::zeros() {
            self.frame_count = 0;
            return raw;
        }

        let prev_filtered = self.filtered;
        let prev_trend = self.trend;
        let prev_raw = self.raw;

        let (filtered, trend) = match self.frame_count {
            0 => (raw, Vector3::zeros()),
            1 => {
                let filtered = (raw + prev_raw) * 0.5;
                let diff = filtered - prev_filtered;
                let trend = diff * params.correction + prev_trend * (1.0 - params.correction);
                (filtered, trend)
            }
            _ => {
                // Jitter deadband: pull small moves toward the previous output
                let diff = raw - prev_filtered;
                let distance = diff.norm();
                let gated = if distance <= params.jitter_radius {
                    let weight = distance / params.jitter_radius;
                    raw * weight + prev_filtered * (1.0 - weight)
                } else {
                    raw
                };

                let filtered = gated * (1.0 - params.smoothing)
                    + (prev_filtered + prev_trend) * params.smoothing;
                let diff = filtered - prev_filtered;
                let trend = diff * params.correction + prev_trend * (1.0 - params.correction);
                (filtered, trend)
            }
        };

        let mut predicted = filtered + trend * params.prediction;

        let deviation = (predicted - raw).norm();
        if deviation > params.max_deviation_radius {
            let ratio = params.max_deviation_radius / deviation;
            predicted = predicted * ratio + raw * (1.0 - ratio);
        }

        self.raw = raw;
        self.filtered = filtered;
        self.trend = trend;
        self.frame_count = self.frame_count.saturating_add(1);

        predicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_constant_input_converges_with_defaults() {
        let params = SmoothingParameters::default();
        let mut state = FilterState::default();
        let raw = Vector3::new(0.0, 0.0, 1.0);

        let mut out = Vector3::zeros();
        for _ in 0..3 {
            out = state.filter_sample(raw, &params);
        }
        assert_abs_diff_eq!(out, raw, epsilon = 1e-6);
        assert_abs_diff_eq!(state.filtered, raw, epsilon = 1e-6);
    }

    #[test]
    fn test_constant_input_is_fixed_point_for_any_parameters() {
        let presets = [
            SmoothingParameters::default(),
            SmoothingParameters::new(0.9, 0.1, 3.0, 0.2, 0.01),
            SmoothingParameters::new(0.0, 1.0, 0.0, 0.001, 1.0),
            SmoothingParameters::new(1.0, 0.0, 10.0, 1.0, 0.5),
        ];
        let raw = Vector3::new(0.4, -1.2, 2.5);
        for params in presets {
            let mut state = FilterState::default();
            let mut out = Vector3::zeros();
            for _ in 0..5 {
                out = state.filter_sample(raw, &params);
            }
            assert_abs_diff_eq!(out, raw, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_zero_sample_resets_run() {
        let params = SmoothingParameters::default();
        let mut state = FilterState::default();
        for i in 0..4 {
            state.filter_sample(Vector3::new(0.1 * i as f32, 1.0, 2.0), &params);
        }
        assert_eq!(state.frame_count, 4);

        let out = state.filter_sample(Vector3::zeros(), &params);
        assert_eq!(out, Vector3::zeros());
        assert_eq!(state.frame_count, 0);

        let fresh = Vector3::new(1.5, 0.2, 3.0);
        let out = state.filter_sample(fresh, &params);
        assert_eq!(out, fresh);
    }

    #[test]
    fn test_deviation_bound_holds_every_tick() {
        let params = SmoothingParameters::new(0.8, 0.7, 2.0, 0.03, 0.04);
        let mut state = FilterState::default();
        // Fast sweep with a sudden jump halfway through
        for i in 0..60 {
            let t = i as f32 * 0.05;
            let jump = if i > 30 { 0.8 } else { 0.0 };
            let raw = Vector3::new(t.sin() + jump, (2.0 * t).cos(), 2.0 + 0.1 * t);
            let out = state.filter_sample(raw, &params);
            assert!(
                (out - raw).norm() <= params.max_deviation_radius + 1e-5,
                "tick {i}: deviation {}",
                (out - raw).norm()
            );
        }
    }

    #[test]
    fn test_second_sample_averages_with_first() {
        let params = SmoothingParameters::new(0.5, 0.5, 0.0, 0.05, 10.0);
        let mut state = FilterState::default();
        state.filter_sample(Vector3::new(0.0, 0.0, 1.0), &params);
        state.filter_sample(Vector3::new(0.0, 0.0, 1.2), &params);
        assert_abs_diff_eq!(state.filtered, Vector3::new(0.0, 0.0, 1.1), epsilon = 1e-6);
        // trend = 0.5 * (1.1 - 1.0)
        assert_abs_diff_eq!(state.trend, Vector3::new(0.0, 0.0, 0.05), epsilon = 1e-6);
    }

    #[test]
    fn test_jitter_inside_deadband_is_damped() {
        let params = SmoothingParameters::new(0.0, 0.0, 0.0, 0.1, 1.0);
        let mut state = FilterState::default();
        let center = Vector3::new(0.0, 1.0, 2.0);
        state.filter_sample(center, &params);
        state.filter_sample(center, &params);

        // 0.02 away inside a 0.1 deadband keeps 20% of the move
        let out = state.filter_sample(center + Vector3::new(0.02, 0.0, 0.0), &params);
        assert_abs_diff_eq!(out.x, 0.004, epsilon = 1e-6);

        // A large jump passes through untouched
        let far = center + Vector3::new(0.5, 0.0, 0.0);
        let out = state.filter_sample(far, &params);
        assert_abs_diff_eq!(out, far, epsilon = 1e-6);
    }

    #[test]
    fn test_sanitize_floors_jitter_radius() {
        let params = SmoothingParameters::new(1.5, -0.2, -1.0, 0.0, -3.0);
        assert_eq!(params.smoothing, 1.0);
        assert_eq!(params.correction, 0.0);
        assert_eq!(params.prediction, 0.0);
        assert_eq!(params.jitter_radius, MIN_JITTER_RADIUS);
        assert!(params.max_deviation_radius > 0.0);
    }

    #[test]
    fn test_presets() {
        assert!(SmoothingPreset::None.parameters().is_none());
        assert_eq!(
            SmoothingPreset::Default.parameters(),
            Some(SmoothingParameters::default())
        );
        let aggressive = SmoothingPreset::Aggressive.parameters().unwrap();
        assert_abs_diff_eq!(aggressive.smoothing, 0.7);
        assert_abs_diff_eq!(aggressive.max_deviation_radius, 1.0);
    }
}
