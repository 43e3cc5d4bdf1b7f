//! Board Service Module
//!
//! Main service that coordinates scanning, connections and streaming
//! sessions for MetaWear boards.

use crate::domain::address::BoardAddress;
use crate::domain::models::{
    AccelerometerConfig, BoardEvent, ModuleConfig, SensorFusionConfig, SensorSample,
};
use crate::domain::settings::SettingsService;
use crate::error::{BoardError, Result};
use crate::infrastructure::bluetooth::{
    configurator::ModuleConfigurator,
    connection::{lock, BoardConnection, ConnectionConfig, ConnectionManager},
    scanner::BoardScanner,
    session::{ModuleSession, StreamingSession},
    transport::BleTransport,
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// Main service coordinating all board operations
pub struct BoardService {
    scanner: BoardScanner,
    connections: ConnectionManager,
    streaming: StreamingSession,
    settings: Arc<Mutex<SettingsService>>,
}

impl BoardService {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        event_sender: mpsc::UnboundedSender<BoardEvent>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Self {
        let (delays, interval, min_battery_level, check_calibration) = {
            let guard = lock(&settings);
            let s = guard.get();
            (
                s.settle_delays,
                s.connection_interval,
                s.min_battery_level,
                s.check_calibration,
            )
        };

        let configurator = ModuleConfigurator::new(transport.clone(), delays, interval);
        Self {
            scanner: BoardScanner::new(transport.clone(), event_sender.clone()),
            connections: ConnectionManager::new(
                transport,
                configurator.clone(),
                ConnectionConfig { min_battery_level },
                event_sender.clone(),
            ),
            streaming: StreamingSession::new(configurator, event_sender, check_calibration),
            settings,
        }
    }

    pub fn start_scan(&mut self) {
        self.scanner.start();
    }

    pub fn stop_scan(&mut self) {
        self.scanner.stop();
    }

    pub fn scan_results(&self) -> Vec<BoardAddress> {
        self.scanner.results()
    }

    pub fn connection_manager(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn streaming(&self) -> &StreamingSession {
        &self.streaming
    }

    pub fn is_connected(&self, address: BoardAddress) -> bool {
        self.connections.is_connected(address)
    }

    pub fn connected_boards(&self) -> Vec<BoardAddress> {
        self.connections.registry().addresses()
    }

    /// Connect to a board and remember it in settings
    pub async fn connect(&self, address: BoardAddress) -> Result<Arc<BoardConnection>> {
        let connection = self.connections.connect(address).await?;
        if let Err(e) = self.remember(address) {
            warn!("Could not save board {} to settings: {}", address, e);
        }
        Ok(connection)
    }

    fn remember(&self, address: BoardAddress) -> anyhow::Result<()> {
        let mut settings = lock(&self.settings);
        settings.add_known_address(address)?;
        settings.set_last_connected(address)
    }

    pub async fn disconnect(&self, connection: &BoardConnection) -> Result<()> {
        self.connections.disconnect(connection).await
    }

    pub async fn start_accelerometer_stream<F>(
        &self,
        connection: &Arc<BoardConnection>,
        config: AccelerometerConfig,
        on_sample: F,
    ) -> Result<ModuleSession>
    where
        F: Fn(SensorSample) + Send + Sync + 'static,
    {
        self.start_stream(connection, ModuleConfig::Accelerometer(config), on_sample)
            .await
    }

    pub async fn start_fusion_stream<F>(
        &self,
        connection: &Arc<BoardConnection>,
        config: SensorFusionConfig,
        on_sample: F,
    ) -> Result<ModuleSession>
    where
        F: Fn(SensorSample) + Send + Sync + 'static,
    {
        self.start_stream(connection, ModuleConfig::SensorFusion(config), on_sample)
            .await
    }

    /// Start a stream; a half-started stream is stopped again before the
    /// error is returned.
    async fn start_stream<F>(
        &self,
        connection: &Arc<BoardConnection>,
        config: ModuleConfig,
        on_sample: F,
    ) -> Result<ModuleSession>
    where
        F: Fn(SensorSample) + Send + Sync + 'static,
    {
        let session = ModuleSession::new(config);
        if let Err(e) = self.streaming.start(connection, &session, on_sample).await {
            if let Err(stop_error) = self.streaming.stop(&session).await {
                if !matches!(stop_error, BoardError::NotConnected(_)) {
                    warn!("Cleanup after failed start also failed: {}", stop_error);
                }
            }
            return Err(e);
        }
        Ok(session)
    }

    pub async fn stop_stream(&self, session: &ModuleSession) -> Result<()> {
        self.streaming.stop(session).await
    }
}
