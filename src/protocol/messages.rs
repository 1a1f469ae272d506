//! Wire-level message types for the AETHERIS fleet feed
//!
//! Every payload that crosses the broker is defined here: robot telemetry,
//! heartbeats, anomaly reports, pipeline environment readings, commands and
//! command responses, plus the [`MessageEnvelope`] that wraps most of them.

use serde::{Deserialize, Serialize};

/// 3D position in site coordinates. No bounds are enforced.
///
/// # Examples
/// ```
/// use aetheris_fleet::protocol::Position;
///
/// let a = Position::origin();
/// let b = Position::new(3.0, 4.0, 0.0);
/// assert_eq!(a.distance_to(&b), 5.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::origin()
    }
}

/// Velocity vector in m/s
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

impl Velocity {
    pub fn new(vx: f64, vy: f64, vz: f64) -> Self {
        Self { vx, vy, vz }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Speed, i.e. the Euclidean norm of the vector
    pub fn magnitude(&self) -> f64 {
        (self.vx.powi(2) + self.vy.powi(2) + self.vz.powi(2)).sqrt()
    }
}

/// Kind of inspection robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotType {
    /// Ground patrol rover for external pipeline inspection
    Rover,
    /// Aerial drone for overhead surveillance
    Drone,
    /// In-pipe crawler (corrosion, cracks, wall thickness)
    Crawler,
}

impl RobotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RobotType::Rover => "rover",
            RobotType::Drone => "drone",
            RobotType::Crawler => "crawler",
        }
    }
}

/// Operational status reported by a robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotStatus {
    Active,
    Idle,
    Maintenance,
    Error,
    Offline,
}

/// Aggregate subsystem health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Optimal,
    Warning,
    Critical,
}

/// Sensor scan modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    /// Full multi-sensor sweep
    Full,
    /// Hydrogen leak detection only
    LeakDetection,
    Thermal,
    /// Ultrasonic wall thickness measurement
    Ultrasonic,
    Visual,
}

/// Task a robot is currently executing
///
/// Wire form is adjacently tagged: `{"type": "moving_to", "data": {"target": {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum CurrentTask {
    None,
    Patrolling { route_id: String },
    MovingTo { target: Position },
    Scanning { scan_type: ScanType },
    ReturningToBase,
    Investigating { anomaly_id: String },
}

/// Full state of one robot, replaced wholesale on every telemetry message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    /// Stable identifier, e.g. "RV-001", "DR-002", "CR-001"
    pub id: String,
    /// Human-readable name, e.g. "Rover Alpha"
    pub name: String,
    pub robot_type: RobotType,
    pub position: Position,
    pub velocity: Velocity,
    /// Battery level, 0-100
    pub battery: f64,
    /// Signal strength, 0-100
    pub signal: f64,
    pub health: HealthStatus,
    pub status: RobotStatus,
    pub current_task: CurrentTask,
    /// Producer-side event time (ms since epoch)
    pub timestamp: u64,
}

impl RobotState {
    /// Fresh idle robot at the origin with full battery and signal
    pub fn new(id: impl Into<String>, name: impl Into<String>, robot_type: RobotType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            robot_type,
            position: Position::origin(),
            velocity: Velocity::zero(),
            battery: 100.0,
            signal: 100.0,
            health: HealthStatus::Optimal,
            status: RobotStatus::Idle,
            current_task: CurrentTask::None,
            timestamp: current_timestamp_ms(),
        }
    }

    pub fn speed(&self) -> f64 {
        self.velocity.magnitude()
    }
}

/// Environmental sensor readings for one pipeline section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeEnvironment {
    pub section_id: String,
    /// Internal pressure in bar
    pub pressure: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Hydrogen concentration in ppm
    pub h2_concentration: f64,
    /// Wall thickness in mm
    pub wall_thickness: f64,
    /// Flow rate in m3/h
    pub flow_rate: f64,
    /// Relative humidity, 0-100
    pub humidity: f64,
    pub position: Position,
    pub timestamp: u64,
}

/// Alert threshold for hydrogen: 10% of the ~40,000 ppm lower explosive limit
pub const H2_ALERT_PPM: f64 = 4000.0;
pub const PRESSURE_ALERT_BAR: f64 = 100.0;
pub const TEMPERATURE_ALERT_C: f64 = 80.0;

impl PipeEnvironment {
    /// True if any reading crosses its alert threshold
    pub fn is_hazardous(&self) -> bool {
        self.h2_concentration > H2_ALERT_PPM
            || self.pressure > PRESSURE_ALERT_BAR
            || self.temperature > TEMPERATURE_ALERT_C
    }
}

/// Anomaly classes produced by the detection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Leak,
    Corrosion,
    Crack,
    PressureDrop,
    TemperatureAnomaly,
    WallThinning,
    StructuralDamage,
    Unknown,
}

/// Anomaly severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A detected anomaly
///
/// `acknowledged` is local dashboard state: it is only ever changed by
/// [`crate::fleet::FleetStore::acknowledge_alert`], never by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub id: String,
    pub anomaly_type: AnomalyType,
    pub severity: SeverityLevel,
    pub position: Position,
    pub section_id: String,
    /// Robot id of the detector
    pub detected_by: String,
    /// Detector confidence, 0-1
    pub confidence: f64,
    pub description: String,
    pub timestamp: u64,
    #[serde(default)]
    pub acknowledged: bool,
}

/// Liveness signal from a robot, published bare (not enveloped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub robot_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_type: Option<RobotType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RobotStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<f64>,
    /// Seconds since the robot booted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
    pub timestamp: u64,
}

impl Heartbeat {
    pub fn new(robot_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            robot_id: robot_id.into(),
            robot_type: None,
            status: None,
            battery: None,
            signal: None,
            uptime: None,
            timestamp,
        }
    }
}

/// Fault kinds that can be injected into a robot for drills
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    LowBattery,
    SensorFailure,
    CommDropout,
    MotorFailure,
    GpsDrift,
}

/// Robot configuration overrides; absent fields are left unchanged by the robot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RobotConfig {
    /// Maximum speed in m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_speed: Option<f64>,
    /// Scan interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_interval: Option<u32>,
    /// Heartbeat interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u32>,
    /// Low battery threshold percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_battery_threshold: Option<f64>,
}

/// Command sent to one robot or broadcast to the fleet
///
/// Wire form: `{"command": "move_to", "params": {"target": {...}, "speed": 2.5}}`.
/// Unit commands omit `params`, e.g. `{"command": "emergency_stop"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "command", content = "params")]
pub enum Command {
    MoveTo {
        target: Position,
        #[serde(default)]
        speed: Option<f64>,
    },
    Stop,
    PerformScan {
        scan_type: ScanType,
    },
    StartPatrol {
        route_id: String,
    },
    ReturnToBase,
    Investigate {
        anomaly_id: String,
    },
    /// Highest priority halt
    EmergencyStop,
    InjectFault {
        fault_type: FaultType,
    },
    Configure {
        config: RobotConfig,
    },
}

impl Command {
    /// Wire name of the command, matching the `command` tag
    pub fn name(&self) -> &'static str {
        match self {
            Command::MoveTo { .. } => "move_to",
            Command::Stop => "stop",
            Command::PerformScan { .. } => "perform_scan",
            Command::StartPatrol { .. } => "start_patrol",
            Command::ReturnToBase => "return_to_base",
            Command::Investigate { .. } => "investigate",
            Command::EmergencyStop => "emergency_stop",
            Command::InjectFault { .. } => "inject_fault",
            Command::Configure { .. } => "configure",
        }
    }
}

/// Robot reply to a command. Decodable, but not tracked by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub robot_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub timestamp: u64,
}

/// Routing/provenance wrapper around a payload
///
/// `seq` is informational: nothing in this crate deduplicates or orders by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    /// Origin of the message (robot id, component name)
    pub source: String,
    /// Producer send time (ms since epoch)
    pub timestamp: u64,
    pub seq: u64,
}

impl<T> MessageEnvelope<T> {
    /// Wrap a payload, stamping it with the current time
    pub fn new(payload: T, source: impl Into<String>, seq: u64) -> Self {
        Self {
            payload,
            source: source.into(),
            timestamp: current_timestamp_ms(),
            seq,
        }
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Current Unix time in milliseconds
pub fn current_timestamp_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_distance() {
        let p1 = Position::new(0.0, 0.0, 0.0);
        let p2 = Position::new(3.0, 4.0, 0.0);
        assert!((p1.distance_to(&p2) - 5.0).abs() < 0.0001);
    }

    #[test]
    fn test_velocity_magnitude() {
        let v = Velocity::new(2.0, 3.0, 6.0);
        assert!((v.magnitude() - 7.0).abs() < f64::EPSILON);
        assert_eq!(Velocity::zero().magnitude(), 0.0);
    }

    #[test]
    fn test_current_task_wire_format() {
        let task = CurrentTask::MovingTo {
            target: Position::new(1.0, 2.0, 3.0),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(
            value,
            json!({"type": "moving_to", "data": {"target": {"x": 1.0, "y": 2.0, "z": 3.0}}})
        );

        let none: CurrentTask = serde_json::from_value(json!({"type": "none"})).unwrap();
        assert_eq!(none, CurrentTask::None);

        let scanning: CurrentTask = serde_json::from_value(
            json!({"type": "scanning", "data": {"scan_type": "leak_detection"}}),
        )
        .unwrap();
        assert_eq!(
            scanning,
            CurrentTask::Scanning {
                scan_type: ScanType::LeakDetection
            }
        );
    }

    #[test]
    fn test_command_wire_format() {
        let cmd = Command::MoveTo {
            target: Position::new(10.0, 20.0, 0.0),
            speed: Some(2.5),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["command"], "move_to");
        assert_eq!(value["params"]["speed"], 2.5);

        let stop = serde_json::to_value(Command::EmergencyStop).unwrap();
        assert_eq!(stop, json!({"command": "emergency_stop"}));
        assert_eq!(Command::EmergencyStop.name(), "emergency_stop");

        let fault: Command = serde_json::from_value(
            json!({"command": "inject_fault", "params": {"fault_type": "gps_drift"}}),
        )
        .unwrap();
        assert_eq!(
            fault,
            Command::InjectFault {
                fault_type: FaultType::GpsDrift
            }
        );
    }

    #[test]
    fn test_configure_omits_unset_fields() {
        let cmd = Command::Configure {
            config: RobotConfig {
                max_speed: Some(1.5),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["params"]["config"], json!({"max_speed": 1.5}));
    }

    #[test]
    fn test_heartbeat_minimal_and_full_forms() {
        let minimal: Heartbeat =
            serde_json::from_value(json!({"robot_id": "DR-002", "timestamp": 1000})).unwrap();
        assert_eq!(minimal, Heartbeat::new("DR-002", 1000));

        let full: Heartbeat = serde_json::from_value(json!({
            "robot_id": "RV-001",
            "robot_type": "rover",
            "status": "active",
            "battery": 87.0,
            "signal": 95.0,
            "uptime": 120,
            "timestamp": 5000
        }))
        .unwrap();
        assert_eq!(full.robot_type, Some(RobotType::Rover));
        assert_eq!(full.uptime, Some(120));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(SeverityLevel::Info < SeverityLevel::Low);
        assert!(SeverityLevel::High < SeverityLevel::Critical);
        let max = [SeverityLevel::Medium, SeverityLevel::Critical, SeverityLevel::Low]
            .into_iter()
            .max();
        assert_eq!(max, Some(SeverityLevel::Critical));
    }

    #[test]
    fn test_pipe_environment_hazard() {
        let safe = PipeEnvironment {
            section_id: "PIPE-001".into(),
            pressure: 50.0,
            temperature: 25.0,
            h2_concentration: 100.0,
            wall_thickness: 10.0,
            flow_rate: 500.0,
            humidity: 45.0,
            position: Position::origin(),
            timestamp: 0,
        };
        assert!(!safe.is_hazardous());

        let leaking = PipeEnvironment {
            h2_concentration: 5000.0,
            ..safe.clone()
        };
        assert!(leaking.is_hazardous());

        let hot = PipeEnvironment {
            temperature: 81.0,
            ..safe
        };
        assert!(hot.is_hazardous());
    }

    #[test]
    fn test_anomaly_acknowledged_defaults_false() {
        let report: AnomalyReport = serde_json::from_value(json!({
            "id": "a1",
            "anomaly_type": "wall_thinning",
            "severity": "high",
            "position": {"x": 0.0, "y": 0.0, "z": 0.0},
            "section_id": "PIPE-003",
            "detected_by": "CR-001",
            "confidence": 0.91,
            "description": "Wall thickness below threshold",
            "timestamp": 1
        }))
        .unwrap();
        assert!(!report.acknowledged);
        assert_eq!(report.anomaly_type, AnomalyType::WallThinning);
    }

    #[test]
    fn test_envelope_new_stamps_time() {
        let before = current_timestamp_ms();
        let envelope = MessageEnvelope::new(Command::Stop, "dashboard", 7);
        assert!(envelope.timestamp >= before);
        assert_eq!(envelope.seq, 7);
        assert_eq!(envelope.into_payload(), Command::Stop);
    }
}
