//! In-memory transport for tests.
//!
//! Records every call in order, lets tests push packets into bound routes
//! and drop links.

use crate::domain::address::BoardAddress;
use crate::domain::models::{CalibrationAccuracy, ModuleKind, RouteChannel};
use crate::error::TransportError;
use crate::infrastructure::bluetooth::connection::lock;
use crate::infrastructure::bluetooth::protocol::{ModuleParams, RouteData};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, DisconnectCallback, ModuleHandle, PacketHandler, RawCalibration, RouteHandle,
    TransportHandle,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(BoardAddress),
    Initialize,
    ReadBattery,
    SetInterval { min_ms: f32, max_ms: f32 },
    Configure(ModuleParams),
    BindRoute(RouteChannel),
    StartRoute(RouteChannel),
    StopRoute(RouteChannel),
    StartModule(ModuleKind),
    StopModule(ModuleKind),
    ReadCalibration,
    Close,
}

struct Route {
    channel: RouteChannel,
    link: TransportHandle,
    handler: PacketHandler,
}

#[derive(Default)]
struct MockState {
    calls: Vec<(Instant, Call)>,
    next_id: u64,
    links: HashMap<TransportHandle, BoardAddress>,
    up: HashSet<TransportHandle>,
    routes: HashMap<RouteHandle, Route>,
    disconnect_callbacks: HashMap<TransportHandle, DisconnectCallback>,
}

pub struct MockTransport {
    battery: u8,
    modules: HashSet<ModuleKind>,
    fail_open: bool,
    fail_initialize: bool,
    fail_bind: Option<RouteChannel>,
    drop_during_battery_read: bool,
    open_delay: Duration,
    calibration: RawCalibration,
    discovered: Vec<BoardAddress>,
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            battery: 100,
            modules: [ModuleKind::Accelerometer, ModuleKind::SensorFusion]
                .into_iter()
                .collect(),
            fail_open: false,
            fail_initialize: false,
            fail_bind: None,
            drop_during_battery_read: false,
            open_delay: Duration::ZERO,
            calibration: RawCalibration {
                accelerometer: CalibrationAccuracy::High,
                gyroscope: CalibrationAccuracy::High,
                magnetometer: CalibrationAccuracy::High,
            },
            discovered: Vec::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_battery(mut self, level: u8) -> Self {
        self.battery = level;
        self
    }

    pub fn without_module(mut self, kind: ModuleKind) -> Self {
        self.modules.remove(&kind);
        self
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fail_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn fail_bind(mut self, channel: RouteChannel) -> Self {
        self.fail_bind = Some(channel);
        self
    }

    /// The link drops while the battery level is being read
    pub fn drop_during_battery_read(mut self) -> Self {
        self.drop_during_battery_read = true;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_calibration(
        mut self,
        accelerometer: CalibrationAccuracy,
        gyroscope: CalibrationAccuracy,
        magnetometer: CalibrationAccuracy,
    ) -> Self {
        self.calibration = RawCalibration {
            accelerometer,
            gyroscope,
            magnetometer,
        };
        self
    }

    pub fn with_discovered(mut self, addresses: Vec<BoardAddress>) -> Self {
        self.discovered = addresses;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state)
            .calls
            .iter()
            .map(|(_, call)| call.clone())
            .collect()
    }

    /// Calls with their offset from the first recorded call, in milliseconds
    pub fn timed_calls(&self) -> Vec<(u128, Call)> {
        let state = lock(&self.state);
        let Some((first, _)) = state.calls.first() else {
            return Vec::new();
        };
        let first = *first;
        state
            .calls
            .iter()
            .map(|(at, call)| ((*at - first).as_millis(), call.clone()))
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn record(&self, call: Call) {
        lock(&self.state).calls.push((Instant::now(), call));
    }

    fn route_channel(&self, route: RouteHandle) -> Result<RouteChannel, TransportError> {
        lock(&self.state)
            .routes
            .get(&route)
            .map(|r| r.channel)
            .ok_or_else(|| TransportError::failed("route", "unknown route"))
    }

    fn ensure_up(&self, link: TransportHandle, operation: &'static str) -> Result<(), TransportError> {
        if lock(&self.state).up.contains(&link) {
            Ok(())
        } else {
            Err(TransportError::failed(operation, "link is down"))
        }
    }

    /// Deliver one packet to every route bound to `channel`
    pub fn emit(&self, channel: RouteChannel, packet: RouteData) {
        let handlers: Vec<PacketHandler> = lock(&self.state)
            .routes
            .values()
            .filter(|r| r.channel == channel)
            .map(|r| r.handler.clone())
            .collect();
        for handler in handlers {
            handler(packet);
        }
    }

    /// Drop the link to `address` as if the board went out of range
    pub fn fire_disconnect(&self, address: BoardAddress) {
        let links: Vec<TransportHandle> = {
            let state = lock(&self.state);
            state
                .links
                .iter()
                .filter(|(link, a)| **a == address && state.up.contains(*link))
                .map(|(link, _)| *link)
                .collect()
        };
        for link in links {
            self.drop_link(link);
        }
    }

    fn drop_link(&self, link: TransportHandle) {
        let callback = {
            let mut state = lock(&self.state);
            state.up.remove(&link);
            state.disconnect_callbacks.remove(&link)
        };
        if let Some(callback) = callback {
            callback();
        }
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    fn discover(&self) -> mpsc::Receiver<BoardAddress> {
        let (tx, rx) = mpsc::channel(self.discovered.len().max(1));
        for address in &self.discovered {
            let _ = tx.try_send(*address);
        }
        rx
    }

    async fn open(&self, address: BoardAddress) -> Result<TransportHandle, TransportError> {
        self.record(Call::Open(address));
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if self.fail_open {
            return Err(TransportError::failed("open", "device not found"));
        }
        let mut state = lock(&self.state);
        state.next_id += 1;
        let handle = TransportHandle(state.next_id);
        state.links.insert(handle, address);
        state.up.insert(handle);
        Ok(handle)
    }

    async fn initialize(&self, handle: TransportHandle) -> Result<(), TransportError> {
        self.record(Call::Initialize);
        if self.fail_initialize {
            return Err(TransportError::failed("initialize", "service discovery failed"));
        }
        self.ensure_up(handle, "initialize")
    }

    async fn read_battery(&self, handle: TransportHandle) -> Result<u8, TransportError> {
        self.record(Call::ReadBattery);
        self.ensure_up(handle, "read battery")?;
        if self.drop_during_battery_read {
            self.drop_link(handle);
        }
        Ok(self.battery)
    }

    async fn set_connection_interval(
        &self,
        handle: TransportHandle,
        min_ms: f32,
        max_ms: f32,
    ) -> Result<(), TransportError> {
        self.record(Call::SetInterval { min_ms, max_ms });
        self.ensure_up(handle, "set connection interval")
    }

    fn get_module(&self, handle: TransportHandle, kind: ModuleKind) -> Option<ModuleHandle> {
        self.modules
            .contains(&kind)
            .then_some(ModuleHandle { link: handle, kind })
    }

    async fn configure_module(
        &self,
        module: ModuleHandle,
        params: &ModuleParams,
    ) -> Result<(), TransportError> {
        self.record(Call::Configure(*params));
        self.ensure_up(module.link, "configure module")
    }

    async fn bind_route(
        &self,
        module: ModuleHandle,
        channel: RouteChannel,
        handler: PacketHandler,
    ) -> Result<RouteHandle, TransportError> {
        self.record(Call::BindRoute(channel));
        self.ensure_up(module.link, "bind route")?;
        if self.fail_bind == Some(channel) {
            return Err(TransportError::Timeout {
                operation: "bind route",
            });
        }
        let mut state = lock(&self.state);
        state.next_id += 1;
        let route = RouteHandle(state.next_id);
        state.routes.insert(
            route,
            Route {
                channel,
                link: module.link,
                handler,
            },
        );
        Ok(route)
    }

    async fn start_route(&self, route: RouteHandle) -> Result<(), TransportError> {
        let channel = self.route_channel(route)?;
        self.record(Call::StartRoute(channel));
        Ok(())
    }

    async fn stop_route(&self, route: RouteHandle) -> Result<(), TransportError> {
        let channel = self.route_channel(route)?;
        self.record(Call::StopRoute(channel));
        Ok(())
    }

    async fn start_module(&self, module: ModuleHandle) -> Result<(), TransportError> {
        self.record(Call::StartModule(module.kind));
        self.ensure_up(module.link, "start module")
    }

    async fn stop_module(&self, module: ModuleHandle) -> Result<(), TransportError> {
        self.record(Call::StopModule(module.kind));
        self.ensure_up(module.link, "stop module")
    }

    async fn read_calibration(
        &self,
        module: ModuleHandle,
    ) -> Result<RawCalibration, TransportError> {
        self.record(Call::ReadCalibration);
        self.ensure_up(module.link, "read calibration")?;
        Ok(self.calibration)
    }

    fn is_link_up(&self, handle: TransportHandle) -> bool {
        lock(&self.state).up.contains(&handle)
    }

    async fn close(&self, handle: TransportHandle) {
        self.record(Call::Close);
        let mut state = lock(&self.state);
        state.up.remove(&handle);
        state.disconnect_callbacks.remove(&handle);
        state.routes.retain(|_, r| r.link != handle);
    }

    fn on_unexpected_disconnect(&self, handle: TransportHandle, callback: DisconnectCallback) {
        lock(&self.state).disconnect_callbacks.insert(handle, callback);
    }
}
