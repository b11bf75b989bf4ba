//! FCW configuration

use serde::{Deserialize, Serialize};

/// Risk engine calibration and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FcwConfig {
    /// Box height of the calibration object (pixels)
    pub calibration_box_height_px: f64,

    /// Distance at which the calibration object had that height (meters)
    pub calibration_distance_m: f64,

    /// Motor revolutions per wheel revolution
    pub gear_ratio: f64,

    pub wheel_circumference_m: f64,

    /// Below this speed TTC is infinite
    pub min_speed_mps: f64,

    /// TTC below this is Critical
    pub critical_ttc_s: f64,

    /// TTC up to and including this is Warning
    pub warning_ttc_s: f64,

    /// Brake mapping anchors: at `near_ttc_s` brake hardest and fastest,
    /// at `far_ttc_s` softest and slowest
    pub near_ttc_s: f64,
    pub far_ttc_s: f64,
    pub near_ramp_s: f64,
    pub far_ramp_s: f64,
    pub near_current_a: f64,
    pub far_current_a: f64,

    /// Detections at or below this confidence are discarded
    pub confidence_threshold: f64,
}

impl Default for FcwConfig {
    fn default() -> Self {
        Self {
            calibration_box_height_px: 100.0,
            calibration_distance_m: 2.0,
            gear_ratio: 3.0,
            wheel_circumference_m: 0.5,
            min_speed_mps: 0.1,
            critical_ttc_s: 1.0,
            warning_ttc_s: 3.0,
            near_ttc_s: 1.0,
            far_ttc_s: 5.0,
            near_ramp_s: 3.0,
            far_ramp_s: 10.0,
            near_current_a: 10.0,
            far_current_a: 2.0,
            confidence_threshold: 0.7,
        }
    }
}
