use crate::domain::address::BoardAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Acceleration in g
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Acceleration {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Acceleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{x: {:.3}g, y: {:.3}g, z: {:.3}g}}", self.x, self.y, self.z)
    }
}

/// Orientation quaternion from the sensor fusion engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }
}

impl fmt::Display for Quaternion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{w: {:.3}, x: {:.3}, y: {:.3}, z: {:.3}}}",
            self.w, self.x, self.y, self.z
        )
    }
}

/// Confidence the fusion engine has in one sensor's calibration
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CalibrationAccuracy {
    #[default]
    Unreliable,
    Low,
    Medium,
    High,
}

impl fmt::Display for CalibrationAccuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unreliable => "unreliable",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(label)
    }
}

/// Calibration accuracy per sensor.
///
/// `magnetometer` is `None` when the fusion engine runs without the
/// magnetometer (IMUPlus).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationState {
    pub accelerometer: CalibrationAccuracy,
    pub gyroscope: CalibrationAccuracy,
    pub magnetometer: Option<CalibrationAccuracy>,
}

impl CalibrationState {
    /// True if any reported sensor is below medium accuracy
    pub fn needs_calibration(&self) -> bool {
        self.accelerometer < CalibrationAccuracy::Medium
            || self.gyroscope < CalibrationAccuracy::Medium
            || self
                .magnetometer
                .is_some_and(|m| m < CalibrationAccuracy::Medium)
    }
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accelerometer: {}, gyroscope: {}",
            self.accelerometer, self.gyroscope
        )?;
        if let Some(magnetometer) = self.magnetometer {
            write!(f, ", magnetometer: {}", magnetometer)?;
        }
        Ok(())
    }
}

/// One decoded reading delivered to a stream consumer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorSample {
    Acceleration(Acceleration),
    Quaternion(Quaternion),
    CalibrationState(CalibrationState),
}

/// Last known fusion values for a board
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionData {
    pub acceleration: Acceleration,
    pub quaternion: Quaternion,
    pub calibration: CalibrationState,
}

impl Default for FusionData {
    fn default() -> Self {
        Self {
            acceleration: Acceleration::new(0.0, 0.0, 0.0),
            quaternion: Quaternion::new(0.0, 0.0, 0.0, 0.0),
            calibration: CalibrationState::default(),
        }
    }
}

impl FusionData {
    /// Overwrite the cached value matching the sample kind
    pub fn record(&mut self, sample: &SensorSample) {
        match sample {
            SensorSample::Acceleration(a) => self.acceleration = *a,
            SensorSample::Quaternion(q) => self.quaternion = *q,
            SensorSample::CalibrationState(c) => self.calibration = *c,
        }
    }
}

/// Sensor modules that can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    Accelerometer,
    SensorFusion,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accelerometer => f.write_str("accelerometer"),
            Self::SensorFusion => f.write_str("sensor fusion"),
        }
    }
}

/// Module output channels a route can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RouteChannel {
    /// One acceleration sample per packet
    Acceleration,
    /// Three acceleration samples per packet
    PackedAcceleration,
    Quaternion,
    LinearAcceleration,
}

impl RouteChannel {
    pub fn module(&self) -> ModuleKind {
        match self {
            Self::Acceleration | Self::PackedAcceleration => ModuleKind::Accelerometer,
            Self::Quaternion | Self::LinearAcceleration => ModuleKind::SensorFusion,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    TearingDown,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::TearingDown => "tearing down",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Configuring,
    RouteBound,
    Streaming,
    Stopping,
}

impl SessionState {
    /// States that hold the board's streaming hardware
    pub fn holds_module(&self) -> bool {
        matches!(self, Self::RouteBound | Self::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::RouteBound => "route bound",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
        };
        f.write_str(label)
    }
}

/// Accelerometer output data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputDataRate {
    Hz12_5,
    Hz25,
    Hz50,
    Hz100,
    Hz200,
    Hz400,
    Hz800,
    Hz1600,
}

impl OutputDataRate {
    pub fn hz(&self) -> f32 {
        match self {
            Self::Hz12_5 => 12.5,
            Self::Hz25 => 25.0,
            Self::Hz50 => 50.0,
            Self::Hz100 => 100.0,
            Self::Hz200 => 200.0,
            Self::Hz400 => 400.0,
            Self::Hz800 => 800.0,
            Self::Hz1600 => 1600.0,
        }
    }
}

/// Accelerometer full-scale range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccRange {
    G2,
    G4,
    G8,
    G16,
}

/// Gyroscope full-scale range in degrees per second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GyroRange {
    Dps125,
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

/// Sensor fusion algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FusionMode {
    /// Accelerometer + magnetometer heading
    Compass,
    /// Accelerometer + gyroscope, magnetometer unused
    ImuPlus,
}

impl FusionMode {
    pub fn uses_magnetometer(&self) -> bool {
        matches!(self, Self::Compass)
    }
}

/// Accelerometer oversampling filter used inside the fusion engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterMode {
    Osr4,
    Osr2,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccelerometerConfig {
    pub output_rate: OutputDataRate,
    pub range: AccRange,
    /// Three samples per BLE packet instead of one
    pub packed: bool,
}

impl Default for AccelerometerConfig {
    fn default() -> Self {
        Self {
            output_rate: OutputDataRate::Hz25,
            range: AccRange::G4,
            packed: false,
        }
    }
}

/// Extra tuning passed to the fusion engine's internal accelerometer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionExtras {
    pub acc_output_rate: Option<OutputDataRate>,
    pub filter_mode: Option<FilterMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFusionConfig {
    pub mode: FusionMode,
    pub acc_range: AccRange,
    pub gyro_range: GyroRange,
    pub extras: FusionExtras,
    /// Routes bound and started in this order
    pub outputs: Vec<RouteChannel>,
}

impl SensorFusionConfig {
    /// IMUPlus streaming quaternions only
    pub fn imu_plus() -> Self {
        Self {
            mode: FusionMode::ImuPlus,
            acc_range: AccRange::G16,
            gyro_range: GyroRange::Dps2000,
            extras: FusionExtras::default(),
            outputs: vec![RouteChannel::Quaternion],
        }
    }

    /// Compass streaming quaternions and linear acceleration
    pub fn compass() -> Self {
        Self {
            mode: FusionMode::Compass,
            acc_range: AccRange::G2,
            gyro_range: GyroRange::Dps250,
            extras: FusionExtras {
                acc_output_rate: Some(OutputDataRate::Hz12_5),
                filter_mode: Some(FilterMode::Osr2),
            },
            outputs: vec![RouteChannel::Quaternion, RouteChannel::LinearAcceleration],
        }
    }
}

/// What a streaming session should configure and stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleConfig {
    Accelerometer(AccelerometerConfig),
    SensorFusion(SensorFusionConfig),
}

impl ModuleConfig {
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Accelerometer(_) => ModuleKind::Accelerometer,
            Self::SensorFusion(_) => ModuleKind::SensorFusion,
        }
    }
}

/// Notifications for whoever drives the controller
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    BoardFound(BoardAddress),
    Connected(BoardAddress),
    Disconnected(BoardAddress),
    ConnectionLost(BoardAddress),
    LowBattery {
        address: BoardAddress,
        level: u8,
    },
    CalibrationNeeded {
        address: BoardAddress,
        state: CalibrationState,
    },
}
