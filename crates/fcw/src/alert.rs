//! Alert deduplication

use crate::AlertLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Alert gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Quiet period after an alert during which the same or a lower level
    /// is suppressed (seconds)
    pub cooldown_s: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self { cooldown_s: 2.0 }
    }
}

/// Suppresses repeated alerts; escalations always pass
#[derive(Debug)]
pub struct AlertGate {
    config: AlertConfig,
    last_fired: Option<(AlertLevel, Instant)>,
    fire_count: usize,
    suppressed_count: usize,
}

impl AlertGate {
    pub fn new(config: AlertConfig) -> Self {
        info!("Creating alert gate with config: {:?}", config);
        Self {
            config,
            last_fired: None,
            fire_count: 0,
            suppressed_count: 0,
        }
    }

    fn cooldown(&self) -> Duration {
        if self.config.cooldown_s > 0.0 {
            Duration::try_from_secs_f64(self.config.cooldown_s).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }

    /// Check whether an alert at `level` should fire at `now`
    pub fn should_fire(&self, level: AlertLevel, now: Instant) -> bool {
        if level == AlertLevel::Safe {
            return false;
        }

        match self.last_fired {
            Some((last, _)) if level > last => true,
            Some((_, at)) if now.saturating_duration_since(at) < self.cooldown() => {
                debug!("Alert suppressed: {:?} in cooldown", level);
                false
            }
            _ => true,
        }
    }

    /// Record that an alert was fired
    pub fn record_fire(&mut self, level: AlertLevel, now: Instant) {
        self.last_fired = Some((level, now));
        self.fire_count += 1;
        match level {
            AlertLevel::Critical => warn!("Collision alert: {:?} (count: {})", level, self.fire_count),
            _ => info!("Collision alert: {:?} (count: {})", level, self.fire_count),
        }
    }

    /// Check and record in one step; returns whether the alert fired
    pub fn try_fire(&mut self, level: AlertLevel, now: Instant) -> bool {
        if self.should_fire(level, now) {
            self.record_fire(level, now);
            true
        } else {
            if level != AlertLevel::Safe {
                self.suppressed_count += 1;
            }
            false
        }
    }

    /// Alerts fired so far
    pub fn fire_count(&self) -> usize {
        self.fire_count
    }

    /// Non-safe alerts held back by the cooldown
    pub fn suppressed_count(&self) -> usize {
        self.suppressed_count
    }

    /// Level and time of the last alert
    pub fn last_fired(&self) -> Option<(AlertLevel, Instant)> {
        self.last_fired
    }

    /// Forget the last alert
    pub fn clear(&mut self) {
        self.last_fired = None;
    }
}

impl Default for AlertGate {
    fn default() -> Self {
        Self::new(AlertConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_never_fires() {
        let mut gate = AlertGate::default();
        assert!(!gate.try_fire(AlertLevel::Safe, Instant::now()));
        assert_eq!(gate.fire_count(), 0);
        assert_eq!(gate.suppressed_count(), 0);
    }

    #[test]
    fn test_deduplication() {
        let mut gate = AlertGate::default();
        let now = Instant::now();

        assert!(gate.try_fire(AlertLevel::Warning, now));
        assert!(!gate.try_fire(AlertLevel::Warning, now + Duration::from_millis(500)));
        assert!(gate.try_fire(AlertLevel::Warning, now + Duration::from_secs(2)));
        assert_eq!(gate.fire_count(), 2);
        assert_eq!(gate.suppressed_count(), 1);
    }

    #[test]
    fn test_escalation_passes_cooldown() {
        let mut gate = AlertGate::default();
        let now = Instant::now();

        assert!(gate.try_fire(AlertLevel::Warning, now));
        assert!(gate.try_fire(AlertLevel::Critical, now + Duration::from_millis(100)));
        // de-escalation stays quiet
        assert!(!gate.try_fire(AlertLevel::Warning, now + Duration::from_millis(200)));
        assert_eq!(gate.last_fired().map(|(l, _)| l), Some(AlertLevel::Critical));
    }

    #[test]
    fn test_huge_cooldown_saturates() {
        let mut gate = AlertGate::new(AlertConfig { cooldown_s: 1e30 });
        let now = Instant::now();
        assert!(gate.try_fire(AlertLevel::Warning, now));
        assert!(!gate.try_fire(AlertLevel::Warning, now + Duration::from_secs(3600)));
        assert!(gate.try_fire(AlertLevel::Critical, now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_clear() {
        let mut gate = AlertGate::default();
        let now = Instant::now();
        gate.try_fire(AlertLevel::Critical, now);
        gate.clear();
        assert!(gate.should_fire(AlertLevel::Warning, now));
    }
}
