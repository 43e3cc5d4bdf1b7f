//! MetaWear Board Protocol
//!
//! Register parameters sent to the sensor modules and the shape of the
//! data packets delivered on each route.

use crate::domain::models::{
    AccRange, AccelerometerConfig, Acceleration, FilterMode, FusionMode, GyroRange,
    OutputDataRate, Quaternion, RouteChannel, SensorFusionConfig, SensorSample,
};

/// Fastest BLE connection interval the boards accept, in milliseconds.
/// Needed to carry 100 Hz sampling.
pub const FAST_CONNECTION_INTERVAL_MS: f32 = 7.5;

/// Internal accelerometer rate used by Compass mode when none is given
pub const COMPASS_ACC_OUTPUT_RATE: OutputDataRate = OutputDataRate::Hz12_5;

/// Filter used by Compass mode when none is given
pub const COMPASS_FILTER_MODE: FilterMode = FilterMode::Osr2;

/// Samples carried by one packed acceleration packet
pub const PACKED_SAMPLES: usize = 3;

/// Register values written by `configure_module`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModuleParams {
    Accelerometer {
        output_rate: OutputDataRate,
        range: AccRange,
    },
    SensorFusion {
        mode: FusionMode,
        acc_range: AccRange,
        gyro_range: GyroRange,
        acc_output_rate: Option<OutputDataRate>,
        filter_mode: Option<FilterMode>,
    },
}

impl ModuleParams {
    pub fn accelerometer(config: &AccelerometerConfig) -> Self {
        Self::Accelerometer {
            output_rate: config.output_rate,
            range: config.range,
        }
    }

    /// Compass mode always carries an internal accelerometer rate and
    /// filter so it stays inside the link's bandwidth.
    pub fn sensor_fusion(config: &SensorFusionConfig) -> Self {
        let (acc_output_rate, filter_mode) = match config.mode {
            FusionMode::Compass => (
                Some(config.extras.acc_output_rate.unwrap_or(COMPASS_ACC_OUTPUT_RATE)),
                Some(config.extras.filter_mode.unwrap_or(COMPASS_FILTER_MODE)),
            ),
            FusionMode::ImuPlus => (config.extras.acc_output_rate, config.extras.filter_mode),
        };

        Self::SensorFusion {
            mode: config.mode,
            acc_range: config.acc_range,
            gyro_range: config.gyro_range,
            acc_output_rate,
            filter_mode,
        }
    }
}

/// Route for accelerometer streaming
pub fn accelerometer_route(packed: bool) -> RouteChannel {
    if packed {
        RouteChannel::PackedAcceleration
    } else {
        RouteChannel::Acceleration
    }
}

/// Readings carried by one notification packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteData {
    Acceleration(Acceleration),
    PackedAcceleration([Acceleration; PACKED_SAMPLES]),
    Quaternion(Quaternion),
}

impl RouteData {
    /// Samples in the order they appear in the packet
    pub fn samples(&self) -> Vec<SensorSample> {
        match self {
            Self::Acceleration(a) => vec![SensorSample::Acceleration(*a)],
            Self::PackedAcceleration(batch) => {
                batch.iter().copied().map(SensorSample::Acceleration).collect()
            }
            Self::Quaternion(q) => vec![SensorSample::Quaternion(*q)],
        }
    }
}
