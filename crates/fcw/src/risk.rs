//! Time-to-Collision Risk Engine
//!
//! Distance comes from the apparent height of the bounding box against a
//! single calibration point, closing speed from the motor RPM. The engine
//! never fails: anything it cannot assess yields an infinite TTC and
//! `AlertLevel::Safe`.

use crate::{Detection, FcwConfig};
use serde::{Deserialize, Serialize};
use telemetry_store::TelemetrySnapshot;
use tracing::debug;
use vesc_protocol::ActuationRequest;

/// Discrete intervention level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertLevel {
    #[default]
    Safe,
    Warning,
    Critical,
}

/// Brake parameters handed to the actuation controller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrakeProfile {
    pub current_a: f64,
    pub ramp_time_s: f64,
}

impl BrakeProfile {
    pub fn to_request(&self) -> ActuationRequest {
        ActuationRequest::SetBrakeCurrent {
            current_a: self.current_a,
            ramp_time_s: self.ramp_time_s,
        }
    }
}

/// Result of one evaluation; recomputed every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub distance_m: f64,
    pub closing_speed_mps: f64,
    /// Seconds to collision, `f64::INFINITY` when there is no time-bound risk
    pub ttc_s: f64,
    pub alert_level: AlertLevel,
    /// Present unless `alert_level` is Safe
    pub brake: Option<BrakeProfile>,
}

impl RiskAssessment {
    /// Nothing to assess
    pub fn safe() -> Self {
        Self {
            distance_m: f64::INFINITY,
            closing_speed_mps: 0.0,
            ttc_s: f64::INFINITY,
            alert_level: AlertLevel::Safe,
            brake: None,
        }
    }

    /// Brake request for the actuation controller, if any
    pub fn to_request(&self) -> Option<ActuationRequest> {
        self.brake.map(|b| b.to_request())
    }
}

impl Default for RiskAssessment {
    fn default() -> Self {
        Self::safe()
    }
}

/// Linear interpolation through (x0, y0) and (x1, y1), clamped to the
/// y range
fn interpolate(x: f64, x0: f64, x1: f64, y0: f64, y1: f64) -> f64 {
    let (lo, hi) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
    if x1 == x0 {
        return y0.clamp(lo, hi);
    }
    (y0 + (x - x0) * (y1 - y0) / (x1 - x0)).clamp(lo, hi)
}

/// FCW risk engine
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    config: FcwConfig,
}

impl RiskEngine {
    pub fn new(config: FcwConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FcwConfig {
        &self.config
    }

    /// Distance from bounding box height; infinite below one pixel
    pub fn estimate_distance(&self, box_height_px: f64) -> f64 {
        if !(box_height_px >= 1.0) {
            return f64::INFINITY;
        }
        self.config.calibration_box_height_px / box_height_px * self.config.calibration_distance_m
    }

    /// Ground speed from motor RPM
    pub fn estimate_speed(&self, rpm: f64) -> f64 {
        let speed = rpm / 60.0 / self.config.gear_ratio * self.config.wheel_circumference_m;
        if speed.is_finite() {
            speed
        } else {
            0.0
        }
    }

    /// Seconds to collision; infinite at negligible speed
    pub fn time_to_collision(&self, distance_m: f64, speed_mps: f64) -> f64 {
        if !(speed_mps >= self.config.min_speed_mps) {
            return f64::INFINITY;
        }
        let ttc = distance_m / speed_mps;
        if ttc.is_nan() {
            f64::INFINITY
        } else {
            ttc
        }
    }

    /// Critical below the critical threshold, Warning up to and including
    /// the warning threshold
    pub fn alert_level(&self, ttc_s: f64) -> AlertLevel {
        if ttc_s < self.config.critical_ttc_s {
            AlertLevel::Critical
        } else if ttc_s <= self.config.warning_ttc_s {
            AlertLevel::Warning
        } else {
            AlertLevel::Safe
        }
    }

    /// Brake current and ramp for a TTC: shorter TTC brakes harder and
    /// faster
    pub fn brake_profile(&self, ttc_s: f64) -> BrakeProfile {
        let c = &self.config;
        BrakeProfile {
            current_a: interpolate(ttc_s, c.near_ttc_s, c.far_ttc_s, c.near_current_a, c.far_current_a),
            ramp_time_s: interpolate(ttc_s, c.near_ttc_s, c.far_ttc_s, c.near_ramp_s, c.far_ramp_s),
        }
    }

    /// Assess one detection against the current telemetry. Confidence is
    /// not checked here.
    pub fn assess(&self, detection: &Detection, telemetry: &TelemetrySnapshot) -> RiskAssessment {
        let distance_m = self.estimate_distance(detection.bounding_box.height);
        let closing_speed_mps = self.estimate_speed(telemetry.rpm.unwrap_or(0) as f64);
        let ttc_s = self.time_to_collision(distance_m, closing_speed_mps);
        let alert_level = self.alert_level(ttc_s);
        let brake = match alert_level {
            AlertLevel::Safe => None,
            _ => Some(self.brake_profile(ttc_s)),
        };

        debug!(
            "{}: distance {:.2} m, speed {:.2} m/s, ttc {:.2} s, {:?}",
            detection.label, distance_m, closing_speed_mps, ttc_s, alert_level
        );

        RiskAssessment {
            distance_m,
            closing_speed_mps,
            ttc_s,
            alert_level,
            brake,
        }
    }

    /// Assess every detection of one camera frame and keep the most severe
    /// (lowest TTC). Ties keep the earlier detection.
    pub fn assess_frame(&self, detections: &[Detection], telemetry: &TelemetrySnapshot) -> RiskAssessment {
        detections
            .iter()
            .map(|d| self.assess(d, telemetry))
            .fold(None, |worst: Option<RiskAssessment>, a| match worst {
                Some(w) if w.ttc_s <= a.ttc_s => Some(w),
                _ => Some(a),
            })
            .unwrap_or_default()
    }
}
