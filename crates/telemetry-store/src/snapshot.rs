//! Telemetry Snapshot
//!
//! Latest known value of every status field for one controller. Fields stay
//! `None` until the first frame carrying them has been decoded.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use vesc_protocol::{ControllerId, TelemetryField};

/// Latest-known-good telemetry for one controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Electrical RPM
    pub rpm: Option<i32>,
    /// Motor current (A)
    pub motor_current: Option<f64>,
    /// Battery-side input current (A)
    pub input_current: Option<f64>,
    /// Duty cycle, -1.0 to 1.0
    pub duty_cycle: Option<f64>,
    /// Input voltage (V)
    pub input_voltage: Option<f64>,
    /// Charge drawn (Ah)
    pub amp_hours_consumed: Option<f64>,
    /// Charge regenerated (Ah)
    pub amp_hours_charged: Option<f64>,
    /// Energy drawn (Wh)
    pub watt_hours_consumed: Option<f64>,
    /// Energy regenerated (Wh)
    pub watt_hours_charged: Option<f64>,
    /// MOSFET temperature (°C)
    pub fet_temperature: Option<f64>,
    /// Motor temperature (°C)
    pub motor_temperature: Option<f64>,
    /// Tachometer count
    pub tachometer: Option<i32>,
    /// PID position (degrees)
    pub pid_position: Option<f64>,
    /// External ADC channel 1 (V)
    pub adc_voltage_ext: Option<f64>,
    /// External ADC channel 2 (V)
    pub adc_voltage_ext2: Option<f64>,
    /// External ADC channel 3 (V)
    pub adc_voltage_ext3: Option<f64>,
    /// Servo output value
    pub servo_value: Option<f64>,
    /// When any field was last written
    #[serde(skip)]
    pub last_updated: Option<Instant>,
}

impl TelemetrySnapshot {
    /// Create an empty snapshot (every field unknown)
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one decoded field
    pub fn apply(&mut self, field: TelemetryField, now: Instant) {
        match field {
            TelemetryField::Rpm(v) => self.rpm = Some(v),
            TelemetryField::MotorCurrent(v) => self.motor_current = Some(v),
            TelemetryField::DutyCycle(v) => self.duty_cycle = Some(v),
            TelemetryField::AmpHoursConsumed(v) => self.amp_hours_consumed = Some(v),
            TelemetryField::AmpHoursCharged(v) => self.amp_hours_charged = Some(v),
            TelemetryField::WattHoursConsumed(v) => self.watt_hours_consumed = Some(v),
            TelemetryField::WattHoursCharged(v) => self.watt_hours_charged = Some(v),
            TelemetryField::FetTemperature(v) => self.fet_temperature = Some(v),
            TelemetryField::MotorTemperature(v) => self.motor_temperature = Some(v),
            TelemetryField::InputCurrent(v) => self.input_current = Some(v),
            TelemetryField::PidPosition(v) => self.pid_position = Some(v),
            TelemetryField::Tachometer(v) => self.tachometer = Some(v),
            TelemetryField::InputVoltage(v) => self.input_voltage = Some(v),
            TelemetryField::AdcVoltageExt(v) => self.adc_voltage_ext = Some(v),
            TelemetryField::AdcVoltageExt2(v) => self.adc_voltage_ext2 = Some(v),
            TelemetryField::AdcVoltageExt3(v) => self.adc_voltage_ext3 = Some(v),
            TelemetryField::ServoValue(v) => self.servo_value = Some(v),
        }
        self.last_updated = Some(now);
    }

    /// True until the first field has been decoded
    pub fn is_empty(&self) -> bool {
        self.last_updated.is_none()
    }
}

/// Motor group of a [`TelemetryReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorReport {
    pub rpm: Option<i32>,
    pub current: Option<f64>,
    pub duty_cycle: Option<f64>,
    pub temperature: Option<f64>,
}

/// Power group of a [`TelemetryReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerReport {
    pub input_voltage: Option<f64>,
    pub input_current: Option<f64>,
    pub amp_hours_consumed: Option<f64>,
    pub amp_hours_charged: Option<f64>,
    pub watt_hours_consumed: Option<f64>,
    pub watt_hours_charged: Option<f64>,
}

/// Sensor group of a [`TelemetryReport`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReport {
    pub tachometer: Option<i32>,
    pub pid_position: Option<f64>,
    pub adc_ext: Option<f64>,
    pub adc_ext2: Option<f64>,
    pub adc_ext3: Option<f64>,
    pub servo_value: Option<f64>,
}

/// Aggregate, serializable view of one controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub controller_id: ControllerId,
    pub connection_state: crate::ConnectionState,
    /// Milliseconds since the last frame of any kind
    pub age_ms: u64,
    pub motor: MotorReport,
    pub power: PowerReport,
    pub fet_temperature: Option<f64>,
    pub sensors: SensorReport,
}

impl TelemetryReport {
    pub(crate) fn build(
        controller_id: ControllerId,
        connection_state: crate::ConnectionState,
        age_ms: u64,
        s: &TelemetrySnapshot,
    ) -> Self {
        Self {
            controller_id,
            connection_state,
            age_ms,
            motor: MotorReport {
                rpm: s.rpm,
                current: s.motor_current,
                duty_cycle: s.duty_cycle,
                temperature: s.motor_temperature,
            },
            power: PowerReport {
                input_voltage: s.input_voltage,
                input_current: s.input_current,
                amp_hours_consumed: s.amp_hours_consumed,
                amp_hours_charged: s.amp_hours_charged,
                watt_hours_consumed: s.watt_hours_consumed,
                watt_hours_charged: s.watt_hours_charged,
            },
            fet_temperature: s.fet_temperature,
            sensors: SensorReport {
                tachometer: s.tachometer,
                pid_position: s.pid_position,
                adc_ext: s.adc_voltage_ext,
                adc_ext2: s.adc_voltage_ext2,
                adc_ext3: s.adc_voltage_ext3,
                servo_value: s.servo_value,
            },
        }
    }
}
