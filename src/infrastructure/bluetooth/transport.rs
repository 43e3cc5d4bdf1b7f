//! BLE Transport Interface
//!
//! Everything the controller needs from the radio side: discovery, GATT
//! level board access, module registers and data route subscriptions.
//! Implementations wrap a platform BLE stack and the board SDK.

use crate::domain::address::BoardAddress;
use crate::domain::models::{CalibrationAccuracy, ModuleKind, RouteChannel};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::protocol::{ModuleParams, RouteData};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An open link to one board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

/// A sensor module on an open link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle {
    pub link: TransportHandle,
    pub kind: ModuleKind,
}

/// A bound data route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteHandle(pub u64);

/// Calibration levels as read from the fusion module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCalibration {
    pub accelerometer: CalibrationAccuracy,
    pub gyroscope: CalibrationAccuracy,
    pub magnetometer: CalibrationAccuracy,
}

/// Invoked by the transport once per notification packet, in arrival order
pub type PacketHandler = Arc<dyn Fn(RouteData) + Send + Sync>;

/// Invoked by the transport when a link drops without being closed
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Start discovery. The receiver closes when scanning ends.
    fn discover(&self) -> mpsc::Receiver<BoardAddress>;

    async fn open(&self, address: BoardAddress) -> Result<TransportHandle, TransportError>;

    async fn initialize(&self, handle: TransportHandle) -> Result<(), TransportError>;

    /// Battery charge in percent
    async fn read_battery(&self, handle: TransportHandle) -> Result<u8, TransportError>;

    async fn set_connection_interval(
        &self,
        handle: TransportHandle,
        min_ms: f32,
        max_ms: f32,
    ) -> Result<(), TransportError>;

    /// `None` if the board hardware lacks the module
    fn get_module(&self, handle: TransportHandle, kind: ModuleKind) -> Option<ModuleHandle>;

    async fn configure_module(
        &self,
        module: ModuleHandle,
        params: &ModuleParams,
    ) -> Result<(), TransportError>;

    async fn bind_route(
        &self,
        module: ModuleHandle,
        channel: RouteChannel,
        handler: PacketHandler,
    ) -> Result<RouteHandle, TransportError>;

    async fn start_route(&self, route: RouteHandle) -> Result<(), TransportError>;

    async fn stop_route(&self, route: RouteHandle) -> Result<(), TransportError>;

    async fn start_module(&self, module: ModuleHandle) -> Result<(), TransportError>;

    async fn stop_module(&self, module: ModuleHandle) -> Result<(), TransportError>;

    async fn read_calibration(&self, module: ModuleHandle)
        -> Result<RawCalibration, TransportError>;

    /// Transport-reported link status
    fn is_link_up(&self, handle: TransportHandle) -> bool;

    async fn close(&self, handle: TransportHandle);

    fn on_unexpected_disconnect(&self, handle: TransportHandle, callback: DisconnectCallback);
}
