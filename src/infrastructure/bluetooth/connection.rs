//! Board Connection Module
//!
//! Connect and disconnect lifecycle for boards, unexpected link loss, and
//! the per-board sequence point every transport-facing operation goes
//! through.

use crate::domain::address::BoardAddress;
use crate::domain::models::{BoardEvent, ConnectionState, FusionData, FusionMode, ModuleKind};
use crate::domain::settings::ConnectionInterval;
use crate::error::{BoardError, Result, TransportError};
use crate::infrastructure::bluetooth::configurator::ModuleConfigurator;
use crate::infrastructure::bluetooth::registry::{RegistryView, SharedRegistry};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, ModuleHandle, RouteHandle, TransportHandle,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Battery percentage below which a low-battery advisory is raised
    pub min_battery_level: u8,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            min_battery_level: 20,
        }
    }
}

/// Link status shared with the transport's disconnect callback
struct LinkStatus {
    state: watch::Sender<ConnectionState>,
    lost: AtomicBool,
}

impl LinkStatus {
    /// Returns false if the link was already marked lost
    fn mark_lost(&self) -> bool {
        if self.lost.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.send_replace(ConnectionState::Disconnected);
        true
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

/// Module, routes and progress of the stream currently holding a board
#[derive(Debug, Clone)]
pub(crate) struct ActiveStream {
    pub session_id: u64,
    pub kind: ModuleKind,
    pub module: Option<ModuleHandle>,
    /// In start order
    pub routes: Vec<RouteHandle>,
}

/// One live association with a board
pub struct BoardConnection {
    address: BoardAddress,
    handle: TransportHandle,
    battery_level: u8,
    link: Arc<LinkStatus>,
    registry: RegistryView,
    sequence: tokio::sync::Mutex<()>,
    interval: Mutex<Option<ConnectionInterval>>,
    fusion_mode: Mutex<Option<FusionMode>>,
    fusion_data: Arc<Mutex<FusionData>>,
    active: Mutex<Option<ActiveStream>>,
}

impl BoardConnection {
    pub fn address(&self) -> BoardAddress {
        self.address
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle
    }

    /// Battery percentage sampled while connecting
    pub fn battery_level(&self) -> u8 {
        self.battery_level
    }

    pub fn state(&self) -> ConnectionState {
        *self.link.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.link.state.subscribe()
    }

    /// Usable for transport calls: not lost, not closed, still registered
    pub fn is_live(&self) -> bool {
        !self.link.is_lost()
            && matches!(
                self.state(),
                ConnectionState::Connected | ConnectionState::TearingDown
            )
            && self.registry.is_connected(self.address)
    }

    pub fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(BoardError::NotConnected(self.address))
        }
    }

    /// Connection interval last requested from the board
    pub fn connection_interval(&self) -> Option<ConnectionInterval> {
        *lock(&self.interval)
    }

    /// Fusion algorithm the board was last configured with
    pub fn fusion_mode(&self) -> Option<FusionMode> {
        *lock(&self.fusion_mode)
    }

    /// Snapshot of the latest fusion values
    pub fn fusion_data(&self) -> FusionData {
        *lock(&self.fusion_data)
    }

    /// Module currently holding the board's streaming hardware
    pub fn active_module(&self) -> Option<ModuleKind> {
        lock(&self.active).as_ref().map(|a| a.kind)
    }

    /// Wait for exclusive use of the link.
    ///
    /// Held for a whole configure / start / stop sequence so commands for
    /// one board never overlap.
    pub async fn sequence(&self) -> SequenceGuard<'_> {
        let permit = self.sequence.lock().await;
        SequenceGuard {
            connection: self,
            _permit: permit,
        }
    }

    pub(crate) fn fusion_cache(&self) -> Arc<Mutex<FusionData>> {
        self.fusion_data.clone()
    }

    pub(crate) fn set_connection_interval(&self, interval: ConnectionInterval) {
        *lock(&self.interval) = Some(interval);
    }

    pub(crate) fn set_fusion_mode(&self, mode: FusionMode) {
        *lock(&self.fusion_mode) = Some(mode);
    }

    /// Reserve the streaming hardware for a session.
    ///
    /// Fails while any stream holds the board, including an earlier start
    /// of the same session.
    pub(crate) fn claim(&self, session_id: u64, kind: ModuleKind) -> Result<()> {
        let mut active = lock(&self.active);
        match active.as_ref() {
            Some(current) => Err(BoardError::ModuleConflict {
                address: self.address,
                active: current.kind,
                requested: kind,
            }),
            None => {
                *active = Some(ActiveStream {
                    session_id,
                    kind,
                    module: None,
                    routes: Vec::new(),
                });
                Ok(())
            }
        }
    }

    pub(crate) fn update_active<F>(&self, session_id: u64, update: F)
    where
        F: FnOnce(&mut ActiveStream),
    {
        if let Some(stream) = lock(&self.active)
            .as_mut()
            .filter(|s| s.session_id == session_id)
        {
            update(stream);
        }
    }

    pub(crate) fn active_for(&self, session_id: u64) -> Option<ActiveStream> {
        lock(&self.active)
            .as_ref()
            .filter(|s| s.session_id == session_id)
            .cloned()
    }

    pub(crate) fn release(&self, session_id: u64) {
        let mut active = lock(&self.active);
        if active.as_ref().is_some_and(|s| s.session_id == session_id) {
            *active = None;
        }
    }

    pub(crate) fn take_active(&self) -> Option<ActiveStream> {
        lock(&self.active).take()
    }
}

impl std::fmt::Debug for BoardConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoardConnection")
            .field("address", &self.address)
            .field("handle", &self.handle)
            .field("state", &self.state())
            .field("battery_level", &self.battery_level)
            .finish()
    }
}

/// Proof of exclusive access to a board's link
pub struct SequenceGuard<'a> {
    connection: &'a BoardConnection,
    _permit: tokio::sync::MutexGuard<'a, ()>,
}

impl std::ops::Deref for SequenceGuard<'_> {
    type Target = BoardConnection;

    fn deref(&self) -> &Self::Target {
        self.connection
    }
}

struct ManagerShared {
    registry: SharedRegistry,
    connections: Mutex<HashMap<BoardAddress, Arc<BoardConnection>>>,
    /// One connect at a time per address
    connect_gates: Mutex<HashMap<BoardAddress, Arc<tokio::sync::Mutex<()>>>>,
    event_sender: mpsc::UnboundedSender<BoardEvent>,
}

impl ManagerShared {
    fn is_current(&self, connection: &BoardConnection) -> bool {
        lock(&self.connections)
            .get(&connection.address)
            .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c), connection))
    }

    /// Drop the connection from the registry if it is still the current one
    fn forget(&self, connection: &BoardConnection) -> bool {
        let mut connections = lock(&self.connections);
        let current = connections
            .get(&connection.address)
            .is_some_and(|c| std::ptr::eq(Arc::as_ptr(c), connection));
        if current {
            connections.remove(&connection.address);
            self.registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .mark_disconnected(connection.address);
        }
        current
    }

    fn send(&self, event: BoardEvent) {
        let _ = self.event_sender.send(event);
    }
}

/// Owns the connect / disconnect lifecycle and the device registry
pub struct ConnectionManager {
    transport: Arc<dyn BleTransport>,
    configurator: ModuleConfigurator,
    config: ConnectionConfig,
    shared: Arc<ManagerShared>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        configurator: ModuleConfigurator,
        config: ConnectionConfig,
        event_sender: mpsc::UnboundedSender<BoardEvent>,
    ) -> Self {
        Self {
            transport,
            configurator,
            config,
            shared: Arc::new(ManagerShared {
                registry: SharedRegistry::default(),
                connections: Mutex::new(HashMap::new()),
                connect_gates: Mutex::new(HashMap::new()),
                event_sender,
            }),
        }
    }

    /// Read-only registry access for other components
    pub fn registry(&self) -> RegistryView {
        RegistryView::new(self.shared.registry.clone())
    }

    pub fn is_connected(&self, address: BoardAddress) -> bool {
        self.registry().is_connected(address)
    }

    pub fn connection(&self, address: BoardAddress) -> Option<Arc<BoardConnection>> {
        lock(&self.shared.connections).get(&address).cloned()
    }

    /// Connect to and initialise a board.
    ///
    /// Returns the existing connection if the board is already connected.
    /// Concurrent calls for one address wait for each other and share the
    /// resulting connection. On failure the transport handle is released
    /// and nothing is registered.
    pub async fn connect(&self, address: BoardAddress) -> Result<Arc<BoardConnection>> {
        let gate = lock(&self.shared.connect_gates)
            .entry(address)
            .or_default()
            .clone();
        let _gate = gate.lock().await;

        if let Some(existing) = self.connection(address).filter(|c| c.is_live()) {
            info!("Already connected to board {}", address);
            return Ok(existing);
        }

        info!("Connecting to board {}", address);
        let handle = self
            .transport
            .open(address)
            .await
            .map_err(|cause| self.connect_failed(address, cause))?;

        match self.initialize(address, handle).await {
            Ok(connection) => Ok(connection),
            Err(cause) => {
                self.transport.close(handle).await;
                Err(self.connect_failed(address, cause))
            }
        }
    }

    async fn initialize(
        &self,
        address: BoardAddress,
        handle: TransportHandle,
    ) -> std::result::Result<Arc<BoardConnection>, TransportError> {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let link = Arc::new(LinkStatus {
            state,
            lost: AtomicBool::new(false),
        });

        self.transport.initialize(handle).await?;

        // The callback only flips link status; registry cleanup happens in
        // the link watcher.
        let callback_link = Arc::downgrade(&link);
        self.transport.on_unexpected_disconnect(
            handle,
            Box::new(move || {
                if let Some(link) = callback_link.upgrade() {
                    link.mark_lost();
                }
            }),
        );

        let battery_level = self.transport.read_battery(handle).await?;
        if battery_level < self.config.min_battery_level {
            warn!(
                "Battery level low! (MAC={}, Charge={}%)",
                address, battery_level
            );
            self.shared.send(BoardEvent::LowBattery {
                address,
                level: battery_level,
            });
        }

        let connection = Arc::new(BoardConnection {
            address,
            handle,
            battery_level,
            link: link.clone(),
            registry: self.registry(),
            sequence: tokio::sync::Mutex::new(()),
            interval: Mutex::new(None),
            fusion_mode: Mutex::new(None),
            fusion_data: Arc::new(Mutex::new(FusionData::default())),
            active: Mutex::new(None),
        });

        {
            let mut connections = lock(&self.shared.connections);
            self.shared
                .registry
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .mark_connected(address);
            connections.insert(address, connection.clone());
        }

        // A loss reported from here on is seen by the watcher; one reported
        // earlier leaves the state at Disconnected and fails the connect.
        let promoted = link.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !promoted {
            self.shared.forget(&connection);
            return Err(TransportError::LinkLost);
        }

        tokio::spawn(watch_link(
            self.transport.clone(),
            Arc::downgrade(&self.shared),
            Arc::downgrade(&connection),
            connection.subscribe_state(),
        ));

        info!("Connected to board {} (battery {}%)", address, battery_level);
        self.shared.send(BoardEvent::Connected(address));
        Ok(connection)
    }

    fn connect_failed(&self, address: BoardAddress, cause: TransportError) -> BoardError {
        error!(
            "Could not connect to or initialise board {}: {}",
            address, cause
        );
        BoardError::Connect { address, cause }
    }

    /// Disconnect a board, stopping any stream it still carries.
    ///
    /// Fails with `NotConnected` if the board is neither registered nor
    /// reported connected by the transport.
    pub async fn disconnect(&self, connection: &BoardConnection) -> Result<()> {
        let address = connection.address();
        let registered = self.shared.is_current(connection) && self.is_connected(address);
        if !registered && !self.transport.is_link_up(connection.handle()) {
            error!("Could not disconnect board {}: not connected", address);
            return Err(BoardError::NotConnected(address));
        }

        if !connection.link.is_lost() {
            connection.link.state.send_replace(ConnectionState::TearingDown);
        }

        let guard = connection.sequence().await;
        if let Some(stream) = guard.take_active() {
            if guard.is_live() {
                info!("Stopping {} stream before disconnecting {}", stream.kind, address);
                if let Err(e) = self.configurator.halt(&guard, &stream).await {
                    warn!("Failed to stop stream on {}: {}", address, e);
                }
            }
        }

        self.transport.close(connection.handle()).await;
        self.shared.forget(connection);
        connection.link.state.send_replace(ConnectionState::Disconnected);
        drop(guard);

        info!("Disconnected from board {}", address);
        self.shared.send(BoardEvent::Disconnected(address));
        Ok(())
    }
}

/// Waits for a connection to end and cleans up after unexpected loss
async fn watch_link(
    transport: Arc<dyn BleTransport>,
    shared: Weak<ManagerShared>,
    connection: Weak<BoardConnection>,
    mut state: watch::Receiver<ConnectionState>,
) {
    let _ = state
        .wait_for(|s| *s == ConnectionState::Disconnected)
        .await;

    let (Some(shared), Some(connection)) = (shared.upgrade(), connection.upgrade()) else {
        return;
    };
    if !connection.link.is_lost() {
        return;
    }

    let address = connection.address();
    if let Some(stream) = connection.take_active() {
        debug!("Dropping {} stream of lost board {}", stream.kind, address);
    }
    if !shared.forget(&connection) {
        debug!("Board {} was reconnected before its lost link was cleaned up", address);
    }
    transport.close(connection.handle()).await;
    warn!("Unexpectedly lost connection to board {}!", address);
    shared.send(BoardEvent::ConnectionLost(address));
}
