//! Camera detections and the confidence pre-filter

use crate::FcwConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Bounding box in image pixels [x, y, width, height]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Urgency of a detected object class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DetectionPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl DetectionPriority {
    /// Classify a detector label, case-insensitive
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "stop sign" | "traffic light" | "barrier" => DetectionPriority::Critical,
            "person" | "bicycle" | "car" | "truck" | "motorcycle" => DetectionPriority::High,
            "dog" | "cat" | "obstacle" => DetectionPriority::Medium,
            _ => DetectionPriority::Low,
        }
    }
}

/// One object reported by the detector for one camera frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// Detector confidence (0.0..1.0)
    pub confidence: f64,
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64, bounding_box: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box,
        }
    }

    pub fn priority(&self) -> DetectionPriority {
        DetectionPriority::from_label(&self.label)
    }
}

/// Discards low-confidence detections before risk evaluation
#[derive(Debug, Clone, Copy)]
pub struct DetectionFilter {
    threshold: f64,
}

impl DetectionFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &FcwConfig) -> Self {
        Self::new(config.confidence_threshold)
    }

    /// Confidence must be strictly above the threshold
    pub fn accepts(&self, detection: &Detection) -> bool {
        detection.confidence > self.threshold
    }

    /// Keep confident detections, most urgent first
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let total = detections.len();
        let mut kept: Vec<Detection> = detections
            .into_iter()
            .filter(|d| self.accepts(d))
            .collect();
        kept.sort_by_key(|d| std::cmp::Reverse(d.priority()));

        if kept.len() < total {
            debug!(
                "Discarded {} of {} detections below confidence {}",
                total - kept.len(),
                total,
                self.threshold
            );
        }
        kept
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::from_config(&FcwConfig::default())
    }
}
