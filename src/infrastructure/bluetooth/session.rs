//! Streaming Sessions
//!
//! Start and stop sequencing for module data streams, and delivery of the
//! decoded samples to the consumer.
//!
//! ```text
//! Idle -> Configuring -> RouteBound -> Streaming -> Stopping -> Idle
//! ```
//!
//! A board carries at most one RouteBound or Streaming session; the
//! accelerometer and the fusion engine cannot stream at the same time.
//! A start or stop sequence runs to completion once begun.

use crate::domain::models::{
    BoardEvent, FusionData, ModuleConfig, ModuleKind, SensorSample, SessionState,
};
use crate::error::{BoardError, Result};
use crate::infrastructure::bluetooth::configurator::{ConfiguredModule, ModuleConfigurator};
use crate::infrastructure::bluetooth::connection::{lock, BoardConnection, SequenceGuard};
use crate::infrastructure::bluetooth::protocol::RouteData;
use crate::infrastructure::bluetooth::transport::PacketHandler;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Consumer of decoded samples
pub type SampleCallback = Arc<dyn Fn(SensorSample) + Send + Sync>;

/// Forward samples into a channel
pub fn channel_sink(
    sender: mpsc::UnboundedSender<SensorSample>,
) -> impl Fn(SensorSample) + Send + Sync {
    move |sample| {
        let _ = sender.send(sample);
    }
}

/// A sensor module activation, owned by the caller
pub struct ModuleSession {
    id: u64,
    config: ModuleConfig,
    state: Mutex<SessionState>,
    connection: Mutex<Option<Arc<BoardConnection>>>,
}

impl ModuleSession {
    pub fn new(config: ModuleConfig) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            state: Mutex::new(SessionState::Idle),
            connection: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> ModuleKind {
        self.config.kind()
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Board the session was started on, if any
    pub fn connection(&self) -> Option<Arc<BoardConnection>> {
        lock(&self.connection).clone()
    }

    /// Current lifecycle state.
    ///
    /// A session whose board was lost or disconnected reads as Idle.
    pub fn state(&self) -> SessionState {
        let stored = *lock(&self.state);
        if !stored.holds_module() {
            return stored;
        }
        match self.connection() {
            Some(c) if c.is_live() && c.active_for(self.id).is_some() => stored,
            _ => SessionState::Idle,
        }
    }

    fn stored_state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        debug!("Session {} -> {}", self.id, state);
        *lock(&self.state) = state;
    }

    fn bind(&self, connection: Arc<BoardConnection>) {
        *lock(&self.connection) = Some(connection);
    }

    fn reset(&self) {
        self.set_state(SessionState::Idle);
        *lock(&self.connection) = None;
    }
}

impl std::fmt::Debug for ModuleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSession")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

/// Build the decode + forward step for one route
fn packet_handler(
    on_sample: SampleCallback,
    cache: Option<Arc<Mutex<FusionData>>>,
) -> PacketHandler {
    Arc::new(move |packet: RouteData| {
        for sample in packet.samples() {
            if let Some(cache) = &cache {
                lock(cache).record(&sample);
            }
            on_sample(sample);
        }
    })
}

/// Runs start / stop sequences for module sessions
#[derive(Clone)]
pub struct StreamingSession {
    configurator: ModuleConfigurator,
    event_sender: mpsc::UnboundedSender<BoardEvent>,
    check_calibration: bool,
}

impl StreamingSession {
    pub fn new(
        configurator: ModuleConfigurator,
        event_sender: mpsc::UnboundedSender<BoardEvent>,
        check_calibration: bool,
    ) -> Self {
        Self {
            configurator,
            event_sender,
            check_calibration,
        }
    }

    /// Configure the session's module, bind its routes and start streaming.
    ///
    /// Valid only from Idle. On failure the session keeps its last reached
    /// state, so `stop` can always be retried.
    pub async fn start<F>(
        &self,
        connection: &Arc<BoardConnection>,
        session: &ModuleSession,
        on_sample: F,
    ) -> Result<()>
    where
        F: Fn(SensorSample) + Send + Sync + 'static,
    {
        let state = session.state();
        if state != SessionState::Idle {
            return Err(BoardError::InvalidState {
                operation: "start",
                state,
            });
        }

        let guard = connection.sequence().await;
        // Another start of this session may have run while we waited
        let state = session.state();
        if state != SessionState::Idle {
            return Err(BoardError::InvalidState {
                operation: "start",
                state,
            });
        }
        guard.ensure_live()?;
        guard.claim(session.id, session.kind())?;
        session.bind(connection.clone());
        session.set_state(SessionState::Configuring);
        info!("Starting {} stream on {}", session.kind(), guard.address());

        let result = self
            .run_start(&guard, session, Arc::new(on_sample))
            .await;

        if let Err(e) = &result {
            warn!("Starting {} stream on {} failed: {}", session.kind(), guard.address(), e);
            let bound = guard
                .active_for(session.id)
                .is_some_and(|s| !s.routes.is_empty());
            if !bound {
                guard.release(session.id);
                session.reset();
            } else if session.stored_state() == SessionState::Configuring {
                session.set_state(SessionState::RouteBound);
            }
        }
        result
    }

    async fn run_start(
        &self,
        guard: &SequenceGuard<'_>,
        session: &ModuleSession,
        on_sample: SampleCallback,
    ) -> Result<()> {
        let (configured, cache) = match session.config() {
            ModuleConfig::Accelerometer(config) => (
                self.configurator
                    .configure_accelerometer(guard, config.output_rate, config.range, config.packed)
                    .await?,
                None,
            ),
            ModuleConfig::SensorFusion(config) => (
                self.configurator.configure_sensor_fusion(guard, config).await?,
                Some(guard.fusion_cache()),
            ),
        };
        guard.update_active(session.id, |s| s.module = Some(configured.module));

        self.bind_routes(guard, session, &configured, &on_sample, cache.clone())
            .await?;
        session.set_state(SessionState::RouteBound);

        if let Some(cache) = cache.filter(|_| self.check_calibration) {
            self.report_calibration(guard, &on_sample, &cache).await?;
        }

        self.start_streaming(guard, session, &configured).await?;
        session.set_state(SessionState::Streaming);
        info!("Streaming {} data from {}", session.kind(), guard.address());
        Ok(())
    }

    async fn bind_routes(
        &self,
        guard: &SequenceGuard<'_>,
        session: &ModuleSession,
        configured: &ConfiguredModule,
        on_sample: &SampleCallback,
        cache: Option<Arc<Mutex<FusionData>>>,
    ) -> Result<()> {
        let transport = self.configurator.transport();
        for channel in &configured.routes {
            guard.ensure_live()?;
            let route = transport
                .bind_route(
                    configured.module,
                    *channel,
                    packet_handler(on_sample.clone(), cache.clone()),
                )
                .await?;
            guard.update_active(session.id, |s| s.routes.push(route));
            debug!("Bound {:?} route on {}", channel, guard.address());
            self.configurator
                .settle(self.configurator.delays().after_route_bind())
                .await;
        }
        Ok(())
    }

    async fn report_calibration(
        &self,
        guard: &SequenceGuard<'_>,
        on_sample: &SampleCallback,
        cache: &Arc<Mutex<FusionData>>,
    ) -> Result<()> {
        self.configurator
            .settle(self.configurator.delays().before_calibration_read())
            .await;
        let state = self.configurator.read_calibration_state(guard).await?;

        let sample = SensorSample::CalibrationState(state);
        lock(cache).record(&sample);
        on_sample(sample);

        if state.needs_calibration() {
            warn!(
                "Sensor fusion calibration necessary on {}! ({})",
                guard.address(),
                state
            );
            let _ = self.event_sender.send(BoardEvent::CalibrationNeeded {
                address: guard.address(),
                state,
            });
        }
        Ok(())
    }

    /// Start routes in declared order, then put the module in active mode
    async fn start_streaming(
        &self,
        guard: &SequenceGuard<'_>,
        session: &ModuleSession,
        configured: &ConfiguredModule,
    ) -> Result<()> {
        let transport = self.configurator.transport();
        let between_starts = self.configurator.delays().between_starts();
        let routes = guard
            .active_for(session.id)
            .map(|s| s.routes)
            .unwrap_or_default();

        for (i, route) in routes.iter().enumerate() {
            if i > 0 {
                self.configurator.settle(between_starts).await;
            }
            guard.ensure_live()?;
            transport.start_route(*route).await?;
        }

        self.configurator.settle(between_starts).await;
        guard.ensure_live()?;
        transport.start_module(configured.module).await?;
        Ok(())
    }

    /// Put the module in standby and stop its routes.
    ///
    /// A no-op on an Idle session. Fails with `NotConnected` if the board
    /// went away while the session held it.
    pub async fn stop(&self, session: &ModuleSession) -> Result<()> {
        let stored = session.stored_state();
        match stored {
            SessionState::Idle => return Ok(()),
            SessionState::Configuring | SessionState::Stopping => {
                return Err(BoardError::InvalidState {
                    operation: "stop",
                    state: stored,
                })
            }
            SessionState::RouteBound | SessionState::Streaming => {}
        }

        let Some(connection) = session.connection() else {
            session.reset();
            return Ok(());
        };
        let address = connection.address();
        if !connection.is_live() {
            session.reset();
            return Err(BoardError::NotConnected(address));
        }

        let guard = connection.sequence().await;
        let stream = match (guard.ensure_live(), guard.active_for(session.id)) {
            (Ok(()), Some(stream)) => stream,
            _ => {
                session.reset();
                return Err(BoardError::NotConnected(address));
            }
        };

        session.set_state(SessionState::Stopping);
        match self.configurator.halt(&guard, &stream).await {
            Ok(()) => {
                guard.release(session.id);
                session.reset();
                Ok(())
            }
            Err(e) => {
                warn!("Stopping {} stream on {} failed: {}", stream.kind, address, e);
                if guard.is_live() {
                    session.set_state(stored);
                } else {
                    session.reset();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::address::BoardAddress;
    use crate::domain::models::{
        AccRange, AccelerometerConfig, Acceleration, CalibrationAccuracy, OutputDataRate,
        Quaternion, RouteChannel, SensorFusionConfig,
    };
    use crate::domain::settings::{ConnectionInterval, SettleDelays};
    use crate::infrastructure::bluetooth::connection::{ConnectionConfig, ConnectionManager};
    use crate::infrastructure::bluetooth::mock::{Call, MockTransport};
    use crate::infrastructure::bluetooth::protocol::ModuleParams;
    use crate::infrastructure::bluetooth::transport::BleTransport;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        transport: Arc<MockTransport>,
        manager: ConnectionManager,
        streaming: StreamingSession,
        events: UnboundedReceiver<BoardEvent>,
    }

    fn board() -> BoardAddress {
        BoardAddress::new(0xE61F69181338).unwrap()
    }

    fn harness(transport: MockTransport) -> Harness {
        harness_with_delays(transport, SettleDelays::none())
    }

    fn harness_with_delays(transport: MockTransport, delays: SettleDelays) -> Harness {
        let transport = Arc::new(transport);
        let (tx, events) = mpsc::unbounded_channel();
        let dyn_transport: Arc<dyn BleTransport> = transport.clone();
        let configurator =
            ModuleConfigurator::new(dyn_transport.clone(), delays, ConnectionInterval::default());
        Harness {
            manager: ConnectionManager::new(
                dyn_transport,
                configurator.clone(),
                ConnectionConfig::default(),
                tx.clone(),
            ),
            streaming: StreamingSession::new(configurator, tx, true),
            transport,
            events,
        }
    }

    fn accelerometer(packed: bool) -> ModuleSession {
        ModuleSession::new(ModuleConfig::Accelerometer(AccelerometerConfig {
            output_rate: OutputDataRate::Hz100,
            range: AccRange::G4,
            packed,
        }))
    }

    fn collector() -> (impl Fn(SensorSample) + Send + Sync, UnboundedReceiver<SensorSample>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (channel_sink(tx), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<SensorSample>) -> Vec<SensorSample> {
        let mut samples = Vec::new();
        while let Ok(sample) = rx.try_recv() {
            samples.push(sample);
        }
        samples
    }

    #[tokio::test]
    async fn test_packed_accelerometer_stream() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(true);
        let (sink, mut samples) = collector();

        h.streaming.start(&connection, &session, sink).await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(connection.active_module(), Some(ModuleKind::Accelerometer));

        let packet = [
            Acceleration::new(0.1, 0.0, 1.0),
            Acceleration::new(0.2, 0.0, 1.0),
            Acceleration::new(0.3, 0.0, 1.0),
        ];
        h.transport
            .emit(RouteChannel::PackedAcceleration, RouteData::PackedAcceleration(packet));

        let received = drain(&mut samples);
        assert_eq!(
            received,
            packet.iter().copied().map(SensorSample::Acceleration).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_start_and_stop_ordering() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(false);
        h.transport.clear_calls();

        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        h.streaming.stop(&session).await.unwrap();

        let calls = h.transport.calls();
        assert_eq!(
            &calls[2..],
            &[
                Call::BindRoute(RouteChannel::Acceleration),
                Call::StartRoute(RouteChannel::Acceleration),
                Call::StartModule(ModuleKind::Accelerometer),
                Call::StopModule(ModuleKind::Accelerometer),
                Call::StopRoute(RouteChannel::Acceleration),
            ]
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(connection.active_module(), None);
    }

    #[tokio::test]
    async fn test_fusion_routes_bound_before_any_start() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = ModuleSession::new(ModuleConfig::SensorFusion(SensorFusionConfig::compass()));
        h.transport.clear_calls();

        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        h.streaming.stop(&session).await.unwrap();

        let calls = h.transport.calls();
        assert_eq!(
            &calls[2..],
            &[
                Call::BindRoute(RouteChannel::Quaternion),
                Call::BindRoute(RouteChannel::LinearAcceleration),
                Call::ReadCalibration,
                Call::StartRoute(RouteChannel::Quaternion),
                Call::StartRoute(RouteChannel::LinearAcceleration),
                Call::StartModule(ModuleKind::SensorFusion),
                Call::StopModule(ModuleKind::SensorFusion),
                Call::StopRoute(RouteChannel::LinearAcceleration),
                Call::StopRoute(RouteChannel::Quaternion),
            ]
        );
    }

    #[tokio::test]
    async fn test_fusion_updates_cache_and_callback() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = ModuleSession::new(ModuleConfig::SensorFusion(SensorFusionConfig::imu_plus()));
        let (sink, mut samples) = collector();

        h.streaming.start(&connection, &session, sink).await.unwrap();
        let first = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let second = Quaternion::new(0.7, 0.7, 0.0, 0.0);
        h.transport.emit(RouteChannel::Quaternion, RouteData::Quaternion(first));
        h.transport.emit(RouteChannel::Quaternion, RouteData::Quaternion(second));

        let received = drain(&mut samples);
        assert_eq!(received.len(), 3);
        match received[0] {
            SensorSample::CalibrationState(state) => assert_eq!(state.magnetometer, None),
            other => panic!("expected calibration first, got {other:?}"),
        }
        assert_eq!(received[1], SensorSample::Quaternion(first));
        assert_eq!(received[2], SensorSample::Quaternion(second));

        let cached = connection.fusion_data();
        assert_eq!(cached.quaternion, second);
        assert_eq!(cached.calibration.gyroscope, CalibrationAccuracy::High);
    }

    #[tokio::test]
    async fn test_compass_calibration_includes_magnetometer() {
        let mut h = harness(MockTransport::new().with_calibration(
            CalibrationAccuracy::High,
            CalibrationAccuracy::Medium,
            CalibrationAccuracy::Unreliable,
        ));
        let connection = h.manager.connect(board()).await.unwrap();
        let session = ModuleSession::new(ModuleConfig::SensorFusion(SensorFusionConfig::compass()));

        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        assert_eq!(
            connection.fusion_data().calibration.magnetometer,
            Some(CalibrationAccuracy::Unreliable)
        );

        assert_eq!(h.events.recv().await, Some(BoardEvent::Connected(board())));
        match h.events.recv().await {
            Some(BoardEvent::CalibrationNeeded { address, state }) => {
                assert_eq!(address, board());
                assert_eq!(state.magnetometer, Some(CalibrationAccuracy::Unreliable));
            }
            other => panic!("expected calibration advisory, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[tokio::test]
    async fn test_exclusive_modules() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let acc = accelerometer(false);
        let fusion = ModuleSession::new(ModuleConfig::SensorFusion(SensorFusionConfig::imu_plus()));

        h.streaming.start(&connection, &acc, |_| {}).await.unwrap();
        assert_eq!(
            h.streaming.start(&connection, &fusion, |_| {}).await,
            Err(BoardError::ModuleConflict {
                address: board(),
                active: ModuleKind::Accelerometer,
                requested: ModuleKind::SensorFusion,
            })
        );
        assert_eq!(fusion.state(), SessionState::Idle);

        h.streaming.stop(&acc).await.unwrap();
        h.streaming.start(&connection, &fusion, |_| {}).await.unwrap();
        assert_eq!(fusion.state(), SessionState::Streaming);
        assert_eq!(connection.active_module(), Some(ModuleKind::SensorFusion));
    }

    #[tokio::test]
    async fn test_stop_idle_is_noop() {
        let h = harness(MockTransport::new());
        let session = accelerometer(false);
        assert_eq!(h.streaming.stop(&session).await, Ok(()));
        assert_eq!(h.streaming.stop(&session).await, Ok(()));
        assert!(h.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(false);

        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        assert_eq!(
            h.streaming.start(&connection, &session, |_| {}).await,
            Err(BoardError::InvalidState {
                operation: "start",
                state: SessionState::Streaming
            })
        );
    }

    #[tokio::test]
    async fn test_stop_after_unexpected_disconnect() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = ModuleSession::new(ModuleConfig::SensorFusion(SensorFusionConfig::imu_plus()));
        h.streaming.start(&connection, &session, |_| {}).await.unwrap();

        h.transport.fire_disconnect(board());
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(
            h.streaming.stop(&session).await,
            Err(BoardError::NotConnected(board()))
        );
        assert_eq!(h.streaming.stop(&session).await, Ok(()));
    }

    #[tokio::test]
    async fn test_disconnect_cascades_stop() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(false);
        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        h.transport.clear_calls();

        h.manager.disconnect(&connection).await.unwrap();
        assert_eq!(
            h.transport.calls(),
            vec![
                Call::StopModule(ModuleKind::Accelerometer),
                Call::StopRoute(RouteChannel::Acceleration),
                Call::Close,
            ]
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(
            h.streaming.stop(&session).await,
            Err(BoardError::NotConnected(board()))
        );
    }

    #[tokio::test]
    async fn test_missing_module_leaves_session_idle() {
        let h = harness(MockTransport::new().without_module(ModuleKind::Accelerometer));
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(false);

        assert_eq!(
            h.streaming.start(&connection, &session, |_| {}).await,
            Err(BoardError::ModuleUnavailable {
                address: board(),
                module: ModuleKind::Accelerometer
            })
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(connection.active_module(), None);
    }

    #[tokio::test]
    async fn test_failed_second_bind_can_be_stopped() {
        let h = harness(MockTransport::new().fail_bind(RouteChannel::LinearAcceleration));
        let connection = h.manager.connect(board()).await.unwrap();
        let session = ModuleSession::new(ModuleConfig::SensorFusion(SensorFusionConfig::compass()));

        let err = h.streaming.start(&connection, &session, |_| {}).await.unwrap_err();
        assert!(matches!(err, BoardError::Transport(_)));
        assert_eq!(session.state(), SessionState::RouteBound);

        h.transport.clear_calls();
        h.streaming.stop(&session).await.unwrap();
        assert_eq!(
            h.transport.calls(),
            vec![
                Call::StopModule(ModuleKind::SensorFusion),
                Call::StopRoute(RouteChannel::Quaternion),
            ]
        );
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_on_disconnected_board() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        h.manager.disconnect(&connection).await.unwrap();

        let session = accelerometer(false);
        assert_eq!(
            h.streaming.start(&connection, &session, |_| {}).await,
            Err(BoardError::NotConnected(board()))
        );
    }

    #[tokio::test]
    async fn test_queued_second_start_is_rejected() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(false);

        let held = connection.sequence().await;
        let (first, second, _) = tokio::join!(
            h.streaming.start(&connection, &session, |_| {}),
            h.streaming.start(&connection, &session, |_| {}),
            async move {
                tokio::task::yield_now().await;
                drop(held);
            }
        );
        assert_eq!(first, Ok(()));
        assert_eq!(
            second,
            Err(BoardError::InvalidState {
                operation: "start",
                state: SessionState::Streaming
            })
        );

        h.streaming.stop(&session).await.unwrap();
        let calls = h.transport.calls();
        let count = |wanted: Call| calls.iter().filter(|c| **c == wanted).count();
        assert_eq!(count(Call::BindRoute(RouteChannel::Acceleration)), 1);
        assert_eq!(count(Call::StartRoute(RouteChannel::Acceleration)), 1);
        assert_eq!(count(Call::StopRoute(RouteChannel::Acceleration)), 1);
        assert_eq!(connection.active_module(), None);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let h = harness(MockTransport::new());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(false);

        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        h.streaming.stop(&session).await.unwrap();
        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accelerometer_settle_delays() {
        let h = harness_with_delays(MockTransport::new(), SettleDelays::default());
        let connection = h.manager.connect(board()).await.unwrap();
        let session = accelerometer(false);
        h.transport.clear_calls();

        h.streaming.start(&connection, &session, |_| {}).await.unwrap();
        h.streaming.stop(&session).await.unwrap();

        assert_eq!(
            h.transport.timed_calls(),
            vec![
                (0, Call::SetInterval { min_ms: 7.5, max_ms: 7.5 }),
                (
                    1500,
                    Call::Configure(ModuleParams::Accelerometer {
                        output_rate: OutputDataRate::Hz100,
                        range: AccRange::G4
                    })
                ),
                (1500, Call::BindRoute(RouteChannel::Acceleration)),
                (3000, Call::StartRoute(RouteChannel::Acceleration)),
                (3500, Call::StartModule(ModuleKind::Accelerometer)),
                (3500, Call::StopModule(ModuleKind::Accelerometer)),
                (4000, Call::StopRoute(RouteChannel::Acceleration)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fusion_settle_delays() {
        let h = harness_with_delays(MockTransport::new(), SettleDelays::default());
        let connection = h.manager.connect(board()).await.unwrap();
        let config = SensorFusionConfig::compass();
        let session = ModuleSession::new(ModuleConfig::SensorFusion(config.clone()));
        h.transport.clear_calls();

        h.streaming.start(&connection, &session, |_| {}).await.unwrap();

        assert_eq!(
            h.transport.timed_calls(),
            vec![
                (0, Call::SetInterval { min_ms: 7.5, max_ms: 7.5 }),
                (1500, Call::Configure(ModuleParams::sensor_fusion(&config))),
                (1500, Call::BindRoute(RouteChannel::Quaternion)),
                (3000, Call::BindRoute(RouteChannel::LinearAcceleration)),
                (5000, Call::ReadCalibration),
                (5000, Call::StartRoute(RouteChannel::Quaternion)),
                (5500, Call::StartRoute(RouteChannel::LinearAcceleration)),
                (6000, Call::StartModule(ModuleKind::SensorFusion)),
            ]
        );
    }
}
