//! Forward Collision Warning
//!
//! Fuses camera detections with motor speed into a Time-to-Collision
//! estimate and maps it to an alert level and brake parameters:
//! - Confidence pre-filter and label priority
//! - Monocular distance from bounding box height
//! - Closing speed from RPM, gear ratio and wheel circumference
//! - Alert deduplication with escalation

pub mod alert;
pub mod config;
pub mod detection;
pub mod risk;

pub use alert::{AlertConfig, AlertGate};
pub use config::FcwConfig;
pub use detection::{BoundingBox, Detection, DetectionFilter, DetectionPriority};
pub use risk::{AlertLevel, BrakeProfile, RiskAssessment, RiskEngine};
