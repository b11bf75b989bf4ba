//! Controller Registry Implementation

use crate::snapshot::{TelemetryReport, TelemetrySnapshot};
use crate::{RegistryConfig, RegistryError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vesc_protocol::{
    decode, CanFrame, ControllerId, DecodeError, Decoded, PacketId, StatusMessage, TelemetryField,
};

/// Liveness of a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// First frame seen
    Discovered,
    /// Frames arriving within the stale timeout
    Live,
    /// Silent longer than the stale timeout; still addressable
    Stale,
    /// Silent longer than the lost timeout; eligible for removal
    Lost,
}

impl ConnectionState {
    /// Whether commands may still be addressed to the controller
    pub fn is_addressable(&self) -> bool {
        !matches!(self, ConnectionState::Lost)
    }
}

/// State kept for one controller id
#[derive(Debug, Clone)]
pub struct ControllerRecord {
    pub controller_id: ControllerId,
    pub snapshot: TelemetrySnapshot,
    pub connection_state: ConnectionState,
    /// Last frame of any kind, decoded or not
    pub last_frame: Instant,
    pub first_seen: Instant,
}

impl ControllerRecord {
    fn new(controller_id: ControllerId, now: Instant) -> Self {
        Self {
            controller_id,
            snapshot: TelemetrySnapshot::new(),
            connection_state: ConnectionState::Discovered,
            last_frame: now,
            first_seen: now,
        }
    }

    fn touch(&mut self, now: Instant) {
        self.last_frame = now;
        match self.connection_state {
            ConnectionState::Discovered | ConnectionState::Live => {
                if self.connection_state == ConnectionState::Discovered && now > self.first_seen {
                    self.connection_state = ConnectionState::Live;
                }
            }
            ConnectionState::Stale | ConnectionState::Lost => {
                info!(
                    "Controller {} recovered from {:?}",
                    self.controller_id, self.connection_state
                );
                self.connection_state = ConnectionState::Live;
            }
        }
    }
}

/// A connection state change produced by [`ControllerRegistry::sweep`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub controller_id: ControllerId,
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub frames_seen: u64,
    pub status_decoded: u64,
    pub commands_observed: u64,
    pub unknown_packets: u64,
    pub decode_errors: u64,
}

#[derive(Default)]
struct Counters {
    frames_seen: AtomicU64,
    status_decoded: AtomicU64,
    commands_observed: AtomicU64,
    unknown_packets: AtomicU64,
    decode_errors: AtomicU64,
}

type SharedRecord = Arc<RwLock<ControllerRecord>>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Registry of every controller seen on the bus
///
/// The map lock is only held long enough to find or insert a record; each
/// record has its own lock so readers of one controller never wait on
/// writers of another.
pub struct ControllerRegistry {
    config: RegistryConfig,
    records: RwLock<HashMap<ControllerId, SharedRecord>>,
    counters: Counters,
    started: Instant,
}

impl ControllerRegistry {
    /// Create an empty registry; the discovery window starts now
    pub fn new(config: RegistryConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Create an empty registry with an explicit discovery start
    pub fn starting_at(config: RegistryConfig, started: Instant) -> Self {
        info!("Creating controller registry with config: {:?}", config);
        Self {
            config,
            records: RwLock::new(HashMap::new()),
            counters: Counters::default(),
            started,
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn record(&self, controller_id: ControllerId) -> Option<SharedRecord> {
        read(&self.records).get(&controller_id).cloned()
    }

    fn record_or_insert(&self, controller_id: ControllerId, now: Instant) -> (SharedRecord, bool) {
        if let Some(record) = self.record(controller_id) {
            return (record, false);
        }

        let mut records = write(&self.records);
        let mut created = false;
        let record = records
            .entry(controller_id)
            .or_insert_with(|| {
                created = true;
                Arc::new(RwLock::new(ControllerRecord::new(controller_id, now)))
            })
            .clone();
        if created {
            info!("Discovered controller {}", controller_id);
        }
        (record, created)
    }

    /// Record that a frame from `controller_id` arrived, without data
    pub fn touch(&self, controller_id: ControllerId, now: Instant) {
        let (record, created) = self.record_or_insert(controller_id, now);
        if !created {
            write(&record).touch(now);
        }
    }

    /// Apply a single decoded field
    pub fn on_frame(&self, controller_id: ControllerId, field: TelemetryField, now: Instant) {
        let (record, created) = self.record_or_insert(controller_id, now);
        let mut record = write(&record);
        if !created {
            record.touch(now);
        }
        record.snapshot.apply(field, now);
    }

    /// Apply every field of a status message under one lock
    pub fn on_status(&self, controller_id: ControllerId, message: &StatusMessage, now: Instant) {
        let (record, created) = self.record_or_insert(controller_id, now);
        let mut record = write(&record);
        if !created {
            record.touch(now);
        }
        for field in message.fields() {
            record.snapshot.apply(field, now);
        }
    }

    /// Decode a raw frame and fold it into the registry.
    ///
    /// Status frames update telemetry. Unknown packets and truncated status
    /// frames still count as liveness for their controller. Command frames
    /// are addressed *to* a controller and say nothing about it being alive.
    pub fn ingest(&self, frame: &CanFrame, now: Instant) -> Result<Decoded, DecodeError> {
        self.counters.frames_seen.fetch_add(1, Ordering::Relaxed);

        match decode(frame) {
            Ok(decoded) => {
                match &decoded {
                    Decoded::Telemetry {
                        controller_id,
                        message,
                    } => {
                        self.counters.status_decoded.fetch_add(1, Ordering::Relaxed);
                        self.on_status(*controller_id, message, now);
                    }
                    Decoded::CommandAck { .. } => {
                        self.counters.commands_observed.fetch_add(1, Ordering::Relaxed);
                    }
                    Decoded::Unknown {
                        controller_id,
                        packet_id,
                    } => {
                        self.counters.unknown_packets.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "Unknown packet {} from controller {}",
                            packet_id, controller_id
                        );
                        self.touch(*controller_id, now);
                    }
                }
                Ok(decoded)
            }
            Err(e) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to decode frame 0x{:08X}: {}", frame.id, e);
                if let DecodeError::Truncated {
                    controller_id,
                    packet_id,
                    ..
                } = e
                {
                    if PacketId::from_u8(packet_id).map_or(false, |p| p.is_status()) {
                        self.touch(controller_id, now);
                    }
                }
                Err(e)
            }
        }
    }

    /// Move records through Live -> Stale -> Lost by silence duration
    pub fn sweep(&self, now: Instant) -> Vec<Transition> {
        let stale_after = Duration::from_millis(self.config.stale_timeout_ms);
        let lost_after = Duration::from_millis(self.config.lost_timeout_ms);
        let records: Vec<SharedRecord> = read(&self.records).values().cloned().collect();

        let mut transitions = Vec::new();
        for record in records {
            let mut record = write(&record);
            let silence = now.saturating_duration_since(record.last_frame);
            let next = if silence > lost_after {
                ConnectionState::Lost
            } else if silence > stale_after {
                ConnectionState::Stale
            } else {
                continue;
            };

            let from = record.connection_state;
            if from == next || from == ConnectionState::Lost {
                continue;
            }

            record.connection_state = next;
            match next {
                ConnectionState::Lost => warn!(
                    "Controller {} lost after {} ms of silence",
                    record.controller_id,
                    silence.as_millis()
                ),
                _ => info!(
                    "Controller {} stale after {} ms of silence",
                    record.controller_id,
                    silence.as_millis()
                ),
            }
            transitions.push(Transition {
                controller_id: record.controller_id,
                from,
                to: next,
            });
        }

        transitions
    }

    /// Remove every record in `Lost`; returns the removed ids
    pub fn purge_lost(&self) -> Vec<ControllerId> {
        let mut records = write(&self.records);
        let lost: Vec<ControllerId> = records
            .iter()
            .filter(|(_, r)| read(r).connection_state == ConnectionState::Lost)
            .map(|(id, _)| *id)
            .collect();
        for id in &lost {
            records.remove(id);
            info!("Removed lost controller {}", id);
        }
        lost
    }

    /// Latest telemetry, or `None` if the id was never seen
    pub fn get_snapshot(&self, controller_id: ControllerId) -> Option<TelemetrySnapshot> {
        self.record(controller_id)
            .map(|record| read(&record).snapshot.clone())
    }

    /// Connection state of a known controller
    pub fn connection_state(&self, controller_id: ControllerId) -> Option<ConnectionState> {
        self.record(controller_id)
            .map(|record| read(&record).connection_state)
    }

    /// Check that a controller can receive commands
    pub fn ensure_addressable(
        &self,
        controller_id: ControllerId,
    ) -> Result<ConnectionState, RegistryError> {
        match self.connection_state(controller_id) {
            None => Err(RegistryError::UnknownController(controller_id)),
            Some(ConnectionState::Lost) => Err(RegistryError::Lost(controller_id)),
            Some(state) => Ok(state),
        }
    }

    /// Ids that are Discovered, Live or Stale
    pub fn list_connected(&self) -> BTreeSet<ControllerId> {
        read(&self.records)
            .iter()
            .filter(|(_, r)| read(r).connection_state.is_addressable())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every id in the registry, including Lost ones not yet purged
    pub fn list_all(&self) -> BTreeSet<ControllerId> {
        read(&self.records).keys().copied().collect()
    }

    /// Whether the discovery window has elapsed. Before that an absent id
    /// may still show up.
    pub fn is_discovery_settled(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started)
            >= Duration::from_millis(self.config.discovery_settle_ms)
    }

    /// Ingestion counters
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            frames_seen: self.counters.frames_seen.load(Ordering::Relaxed),
            status_decoded: self.counters.status_decoded.load(Ordering::Relaxed),
            commands_observed: self.counters.commands_observed.load(Ordering::Relaxed),
            unknown_packets: self.counters.unknown_packets.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
        }
    }

    /// Aggregate view of one controller
    pub fn report(&self, controller_id: ControllerId, now: Instant) -> Option<TelemetryReport> {
        self.record(controller_id).map(|record| {
            let record = read(&record);
            TelemetryReport::build(
                controller_id,
                record.connection_state,
                now.saturating_duration_since(record.last_frame).as_millis() as u64,
                &record.snapshot,
            )
        })
    }

    /// Aggregate view of every controller, ordered by id
    pub fn reports(&self, now: Instant) -> Vec<TelemetryReport> {
        self.list_all()
            .into_iter()
            .filter_map(|id| self.report(id, now))
            .collect()
    }

    fn field<T>(
        &self,
        controller_id: ControllerId,
        get: impl FnOnce(&TelemetrySnapshot) -> Option<T>,
    ) -> Option<T> {
        self.record(controller_id)
            .and_then(|record| get(&read(&record).snapshot))
    }

    /// Electrical RPM, if reported
    pub fn rpm(&self, controller_id: ControllerId) -> Option<i32> {
        self.field(controller_id, |s| s.rpm)
    }

    /// Motor current (A), if reported
    pub fn motor_current(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.motor_current)
    }

    /// Battery-side input current (A), if reported
    pub fn input_current(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.input_current)
    }

    /// Duty cycle, -1.0 to 1.0, if reported
    pub fn duty_cycle(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.duty_cycle)
    }

    /// Input voltage (V), if reported
    pub fn input_voltage(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.input_voltage)
    }

    /// Charge drawn (Ah), if reported
    pub fn amp_hours_consumed(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.amp_hours_consumed)
    }

    /// Charge regenerated (Ah), if reported
    pub fn amp_hours_charged(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.amp_hours_charged)
    }

    /// Energy drawn (Wh), if reported
    pub fn watt_hours_consumed(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.watt_hours_consumed)
    }

    /// Energy regenerated (Wh), if reported
    pub fn watt_hours_charged(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.watt_hours_charged)
    }

    /// MOSFET temperature (°C), if reported
    pub fn fet_temperature(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.fet_temperature)
    }

    /// Motor temperature (°C), if reported
    pub fn motor_temperature(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.motor_temperature)
    }

    /// Tachometer count, if reported
    pub fn tachometer(&self, controller_id: ControllerId) -> Option<i32> {
        self.field(controller_id, |s| s.tachometer)
    }

    /// PID position (degrees), if reported
    pub fn pid_position(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.pid_position)
    }

    /// External ADC channel 1 (V), if reported
    pub fn adc_voltage_ext(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.adc_voltage_ext)
    }

    /// External ADC channel 2 (V), if reported
    pub fn adc_voltage_ext2(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.adc_voltage_ext2)
    }

    /// External ADC channel 3 (V), if reported
    pub fn adc_voltage_ext3(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.adc_voltage_ext3)
    }

    /// Servo output value, if reported
    pub fn servo_value(&self, controller_id: ControllerId) -> Option<f64> {
        self.field(controller_id, |s| s.servo_value)
    }

    /// When any field of the controller was last written
    pub fn last_updated(&self, controller_id: ControllerId) -> Option<Instant> {
        self.field(controller_id, |s| s.last_updated)
    }
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status1(rpm: i32) -> StatusMessage {
        StatusMessage::Status1 {
            rpm,
            motor_current: 0.0,
            duty_cycle: 0.0,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_unseen_controller_has_no_snapshot() {
        let registry = ControllerRegistry::default();
        assert!(registry.get_snapshot(74).is_none());
        assert!(registry.rpm(74).is_none());
        assert_eq!(
            registry.ensure_addressable(74),
            Err(RegistryError::UnknownController(74))
        );
    }

    #[test]
    fn test_fields_stay_unknown_until_received() {
        let registry = ControllerRegistry::default();
        let now = Instant::now();
        registry.on_frame(74, TelemetryField::InputVoltage(36.4), now);

        assert_eq!(registry.input_voltage(74), Some(36.4));
        assert_eq!(registry.rpm(74), None);
        assert_eq!(registry.connection_state(74), Some(ConnectionState::Discovered));
    }

    #[test]
    fn test_second_frame_makes_controller_live() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(74, &status1(100), t0);
        registry.on_status(74, &status1(120), t0 + ms(20));

        assert_eq!(registry.connection_state(74), Some(ConnectionState::Live));
        assert_eq!(registry.rpm(74), Some(120));
        assert_eq!(registry.last_updated(74), Some(t0 + ms(20)));
    }

    #[test]
    fn test_stale_then_lost() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(74, &status1(0), t0);
        registry.on_status(74, &status1(0), t0 + ms(20));

        assert!(registry.sweep(t0 + ms(100)).is_empty());

        let transitions = registry.sweep(t0 + ms(200));
        assert_eq!(
            transitions,
            vec![Transition {
                controller_id: 74,
                from: ConnectionState::Live,
                to: ConnectionState::Stale,
            }]
        );
        assert!(registry.list_connected().contains(&74));

        registry.sweep(t0 + ms(2100));
        assert_eq!(registry.connection_state(74), Some(ConnectionState::Lost));
        assert!(!registry.list_connected().contains(&74));
        // reads are advisory and keep working
        assert_eq!(registry.rpm(74), Some(0));
        assert_eq!(registry.ensure_addressable(74), Err(RegistryError::Lost(74)));
    }

    #[test]
    fn test_stale_is_per_controller() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(74, &status1(0), t0);
        registry.on_status(2, &status1(0), t0);
        registry.on_status(2, &status1(0), t0 + ms(180));

        registry.sweep(t0 + ms(200));
        assert_eq!(registry.connection_state(74), Some(ConnectionState::Stale));
        assert_eq!(registry.connection_state(2), Some(ConnectionState::Live));
    }

    #[test]
    fn test_frame_recovers_stale_controller() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(74, &status1(0), t0);
        registry.sweep(t0 + ms(3000));
        assert_eq!(registry.connection_state(74), Some(ConnectionState::Lost));

        registry.on_status(74, &status1(10), t0 + ms(3010));
        assert_eq!(registry.connection_state(74), Some(ConnectionState::Live));
    }

    #[test]
    fn test_unknown_packet_counts_as_liveness() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(74, &status1(0), t0);

        // PING from 74
        let ping = CanFrame::new(0x114A, true, &[0x01]).unwrap();
        let decoded = registry.ingest(&ping, t0 + ms(90)).unwrap();
        assert!(matches!(decoded, Decoded::Unknown { packet_id: 17, .. }));

        assert!(registry.sweep(t0 + ms(150)).is_empty());
        assert_eq!(registry.stats().unknown_packets, 1);
    }

    #[test]
    fn test_decode_error_does_not_touch_fields() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(74, &status1(500), t0);

        let truncated = CanFrame::new(0x094A, true, &[0, 0, 0]).unwrap();
        assert!(registry.ingest(&truncated, t0 + ms(10)).is_err());

        assert_eq!(registry.rpm(74), Some(500));
        assert_eq!(registry.stats().decode_errors, 1);
        assert_eq!(registry.stats().frames_seen, 1);
    }

    #[test]
    fn test_command_frames_do_not_create_records() {
        let registry = ControllerRegistry::default();
        let frame = vesc_protocol::encode(&vesc_protocol::ActuationRequest::STOP, 74);
        registry.ingest(&frame, Instant::now()).unwrap();
        assert!(registry.list_all().is_empty());
        assert_eq!(registry.stats().commands_observed, 1);
    }

    #[test]
    fn test_purge_lost() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(74, &status1(0), t0);
        registry.on_status(2, &status1(0), t0 + ms(2500));
        registry.sweep(t0 + ms(2600));

        assert_eq!(registry.purge_lost(), vec![74]);
        assert_eq!(registry.list_all().into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_discovery_window() {
        let t0 = Instant::now();
        let registry = ControllerRegistry::starting_at(RegistryConfig::default(), t0);
        assert!(!registry.is_discovery_settled(t0 + ms(5999)));
        assert!(registry.is_discovery_settled(t0 + ms(6000)));
    }

    #[test]
    fn test_report_serializes() {
        let registry = ControllerRegistry::default();
        let t0 = Instant::now();
        registry.on_status(
            74,
            &StatusMessage::Status5 {
                tachometer: 10,
                input_voltage: 36.0,
            },
            t0,
        );

        let report = registry.report(74, t0 + ms(40)).unwrap();
        assert_eq!(report.age_ms, 40);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["power"]["input_voltage"], 36.0);
        assert!(json["motor"]["rpm"].is_null());
    }
}
