//! Module Configuration
//!
//! Sequences BLE parameter changes and module register writes with the
//! settle delays the board firmware needs between dependent commands.

use crate::domain::models::{
    AccRange, CalibrationState, ModuleKind, OutputDataRate, RouteChannel,
    SensorFusionConfig,
};
use crate::domain::settings::{ConnectionInterval, SettleDelays};
use crate::error::{BoardError, Result};
use crate::infrastructure::bluetooth::connection::{ActiveStream, BoardConnection, SequenceGuard};
use crate::infrastructure::bluetooth::protocol::{
    self, ModuleParams, FAST_CONNECTION_INTERVAL_MS,
};
use crate::infrastructure::bluetooth::transport::{BleTransport, ModuleHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A configured module and the routes that should be bound for it
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguredModule {
    pub module: ModuleHandle,
    /// In bind and start order
    pub routes: Vec<RouteChannel>,
}

#[derive(Clone)]
pub struct ModuleConfigurator {
    transport: Arc<dyn BleTransport>,
    delays: SettleDelays,
    interval: ConnectionInterval,
}

impl ModuleConfigurator {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        delays: SettleDelays,
        interval: ConnectionInterval,
    ) -> Self {
        Self {
            transport,
            delays,
            interval,
        }
    }

    pub fn delays(&self) -> &SettleDelays {
        &self.delays
    }

    pub(crate) fn transport(&self) -> &Arc<dyn BleTransport> {
        &self.transport
    }

    /// The requested interval, capped to what 100 Hz streaming needs
    pub fn fast_interval(&self) -> ConnectionInterval {
        let max_ms = self.interval.max_ms.min(FAST_CONNECTION_INTERVAL_MS);
        ConnectionInterval {
            min_ms: self.interval.min_ms.min(max_ms),
            max_ms,
        }
    }

    pub(crate) async fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn module(&self, connection: &BoardConnection, kind: ModuleKind) -> Result<ModuleHandle> {
        connection.ensure_live()?;
        self.transport
            .get_module(connection.handle(), kind)
            .ok_or(BoardError::ModuleUnavailable {
                address: connection.address(),
                module: kind,
            })
    }

    async fn reduce_connection_interval(&self, guard: &SequenceGuard<'_>) -> Result<()> {
        let interval = self.fast_interval();
        guard.ensure_live()?;
        self.transport
            .set_connection_interval(guard.handle(), interval.min_ms, interval.max_ms)
            .await?;
        guard.set_connection_interval(interval);
        debug!(
            "Connection interval of {} set to {}-{} ms",
            guard.address(),
            interval.min_ms,
            interval.max_ms
        );
        self.settle(self.delays.after_interval_change()).await;
        Ok(())
    }

    /// Prepare the accelerometer for streaming.
    ///
    /// `packed` selects the three-samples-per-packet route instead of one
    /// sample per packet.
    pub async fn configure_accelerometer(
        &self,
        guard: &SequenceGuard<'_>,
        output_rate: OutputDataRate,
        range: AccRange,
        packed: bool,
    ) -> Result<ConfiguredModule> {
        let module = self.module(guard, ModuleKind::Accelerometer)?;
        self.reduce_connection_interval(guard).await?;

        guard.ensure_live()?;
        let params = ModuleParams::Accelerometer { output_rate, range };
        self.transport.configure_module(module, &params).await?;
        info!(
            "Accelerometer of {} configured: {} Hz, {:?}, packed={}",
            guard.address(),
            output_rate.hz(),
            range,
            packed
        );

        Ok(ConfiguredModule {
            module,
            routes: vec![protocol::accelerometer_route(packed)],
        })
    }

    /// Prepare the sensor fusion engine for streaming
    pub async fn configure_sensor_fusion(
        &self,
        guard: &SequenceGuard<'_>,
        config: &SensorFusionConfig,
    ) -> Result<ConfiguredModule> {
        let module = self.module(guard, ModuleKind::SensorFusion)?;
        if let Some(route) = config
            .outputs
            .iter()
            .find(|r| r.module() != ModuleKind::SensorFusion)
        {
            return Err(BoardError::InvalidRoute {
                route: *route,
                module: ModuleKind::SensorFusion,
            });
        }
        self.reduce_connection_interval(guard).await?;

        guard.ensure_live()?;
        let params = ModuleParams::sensor_fusion(config);
        self.transport.configure_module(module, &params).await?;
        guard.set_fusion_mode(config.mode);
        info!(
            "Sensor fusion of {} configured: {:?}",
            guard.address(),
            params
        );

        Ok(ConfiguredModule {
            module,
            routes: config.outputs.clone(),
        })
    }

    /// Read per-sensor calibration accuracy from the fusion engine.
    ///
    /// The magnetometer is left out when the board runs IMUPlus, which does
    /// not use it.
    pub async fn read_calibration_state(
        &self,
        guard: &SequenceGuard<'_>,
    ) -> Result<CalibrationState> {
        let module = self.module(guard, ModuleKind::SensorFusion)?;
        let raw = self.transport.read_calibration(module).await?;

        let magnetometer = match guard.fusion_mode() {
            Some(mode) if !mode.uses_magnetometer() => None,
            _ => Some(raw.magnetometer),
        };
        let state = CalibrationState {
            accelerometer: raw.accelerometer,
            gyroscope: raw.gyroscope,
            magnetometer,
        };
        debug!("Calibration of {}: {}", guard.address(), state);
        Ok(state)
    }

    /// Put the module back into standby, then stop its routes in reverse
    /// start order.
    pub(crate) async fn halt(&self, guard: &SequenceGuard<'_>, stream: &ActiveStream) -> Result<()> {
        if let Some(module) = stream.module {
            guard.ensure_live()?;
            self.transport.stop_module(module).await?;
            self.settle(self.delays.after_module_stop()).await;
        }

        for route in stream.routes.iter().rev() {
            guard.ensure_live()?;
            self.transport.stop_route(*route).await?;
        }

        info!("Stopped {} stream on {}", stream.kind, guard.address());
        Ok(())
    }
}
