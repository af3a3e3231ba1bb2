use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::accumulator::Accumulator;
use crate::config::SessionConfig;
use crate::error::DiscoveryError;
use crate::record::{AdvertisementRecord, Transport};
use crate::source::{AdvertisementSource, SourceEvent};

/// Session lifecycle.
///
/// Idle, then AwaitingReadiness on `start()` until the platform confirms the
/// subsystem is powered on, then Scanning for the fixed observation window,
/// then Stopped. A new `start()` from Idle or Stopped begins a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingReadiness,
    Scanning,
    Stopped,
}

/// Wraps one platform discovery source in a fixed wall-clock observation
/// window and funnels its sightings into a deduplicating accumulator.
pub struct DiscoverySession {
    source: Arc<dyn AdvertisementSource>,
    accumulator: Arc<Accumulator>,
    state: Arc<RwLock<SessionState>>,
    /// Observation gate. Flipped off before the source is halted so that no
    /// upsert can happen once `stop()` has returned.
    accepting: Arc<AtomicBool>,
    permission_denied: Arc<AtomicBool>,
    cancel: Arc<RwLock<CancellationToken>>,
    window: Duration,
    readiness_timeout: Duration,
}

impl DiscoverySession {
    pub fn new(source: Arc<dyn AdvertisementSource>, config: &SessionConfig) -> Self {
        Self {
            source,
            accumulator: Arc::new(Accumulator::new()),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            accepting: Arc::new(AtomicBool::new(false)),
            permission_denied: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(RwLock::new(CancellationToken::new())),
            window: config.window,
            readiness_timeout: config.readiness_timeout,
        }
    }

    pub fn transport(&self) -> Transport {
        self.source.transport()
    }

    /// Begin a discovery session. Fire-and-forget: returns once the source
    /// has been started, without waiting for readiness or the window.
    ///
    /// No-op while a session is already pending or scanning. Clears the
    /// previous session's results.
    pub async fn start(&self) -> Result<(), DiscoveryError> {
        {
            let mut state = self.state.write().await;
            if matches!(
                *state,
                SessionState::AwaitingReadiness | SessionState::Scanning
            ) {
                debug!("{} session already running, ignoring start", self.transport());
                return Ok(());
            }
            *state = SessionState::AwaitingReadiness;
        }

        self.accumulator.clear().await;
        self.permission_denied.store(false, Ordering::SeqCst);
        self.accepting.store(true, Ordering::SeqCst);

        let token = CancellationToken::new();
        *self.cancel.write().await = token.clone();

        let (tx, rx) = mpsc::unbounded_channel();

        if let Err(e) = self.source.start(tx).await {
            warn!("{} source failed to start: {}", self.transport(), e);
            if matches!(e, DiscoveryError::PermissionDenied { .. }) {
                self.permission_denied.store(true, Ordering::SeqCst);
            }
            self.accepting.store(false, Ordering::SeqCst);
            *self.state.write().await = SessionState::Stopped;
            return Err(e);
        }

        debug!("{} session awaiting readiness", self.transport());

        let pump = SessionPump {
            source: Arc::clone(&self.source),
            accumulator: Arc::clone(&self.accumulator),
            state: Arc::clone(&self.state),
            accepting: Arc::clone(&self.accepting),
            permission_denied: Arc::clone(&self.permission_denied),
            token,
            window: self.window,
            readiness_timeout: self.readiness_timeout,
        };
        tokio::spawn(pump.run(rx));

        Ok(())
    }

    /// Stop the session and halt the platform source. Idempotent; a no-op
    /// from Idle or Stopped. Accumulated results are retained.
    ///
    /// The observation gate closes before the source is halted, so a late
    /// in-flight platform callback arriving after this returns can no
    /// longer reach the accumulator.
    pub async fn stop(&self) {
        {
            let state = self.state.read().await;
            if matches!(*state, SessionState::Idle | SessionState::Stopped) {
                return;
            }
        }

        self.accepting.store(false, Ordering::SeqCst);
        self.cancel.read().await.cancel();
        self.source.stop().await;
        *self.state.write().await = SessionState::Stopped;
        debug!("{} session stopped", self.transport());
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        matches!(
            self.state().await,
            SessionState::AwaitingReadiness | SessionState::Scanning
        )
    }

    /// Whether the platform denied the required permission during the most
    /// recent session. Cleared on the next `start()`.
    pub fn permission_denied(&self) -> bool {
        self.permission_denied.load(Ordering::SeqCst)
    }

    /// Live view of the accumulator. Partial while the window is open.
    pub async fn snapshot(&self) -> Vec<AdvertisementRecord> {
        self.accumulator.snapshot().await
    }

    pub async fn result_count(&self) -> usize {
        self.accumulator.len().await
    }
}

/// Event-pump task for one session run: drives the readiness wait, the
/// observation window, and forwarding of sightings into the accumulator.
struct SessionPump {
    source: Arc<dyn AdvertisementSource>,
    accumulator: Arc<Accumulator>,
    state: Arc<RwLock<SessionState>>,
    accepting: Arc<AtomicBool>,
    permission_denied: Arc<AtomicBool>,
    token: CancellationToken,
    window: Duration,
    readiness_timeout: Duration,
}

impl SessionPump {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SourceEvent>) {
        // Readiness phase. Bounded so a radio that never powers on cannot
        // hold the session in AwaitingReadiness forever.
        let ready = tokio::select! {
            _ = self.token.cancelled() => return,
            ready = self.wait_ready(&mut rx) => ready,
            _ = tokio::time::sleep(self.readiness_timeout) => {
                warn!(
                    "{} source not ready after {:?}, giving up",
                    self.source.transport(),
                    self.readiness_timeout
                );
                false
            }
        };
        if !ready {
            self.finish().await;
            return;
        }

        *self.state.write().await = SessionState::Scanning;
        debug!("{} scanning for {:?}", self.source.transport(), self.window);

        // Deferred stop: the window is measured from entry into Scanning.
        let deadline = tokio::time::sleep(self.window);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => return,
                _ = &mut deadline => break,
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle(event).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.finish().await;
    }

    /// Drain events until the source reports readiness. Returns false when
    /// an event ended the session before scanning could begin.
    async fn wait_ready(&self, rx: &mut mpsc::UnboundedReceiver<SourceEvent>) -> bool {
        while let Some(event) = rx.recv().await {
            match event {
                SourceEvent::Ready => return true,
                other => {
                    if !self.handle(other).await {
                        return false;
                    }
                }
            }
        }
        // Channel closed before readiness: source went away.
        false
    }

    /// Returns false when the event ends the session.
    async fn handle(&self, event: SourceEvent) -> bool {
        match event {
            SourceEvent::Ready => true,
            SourceEvent::Observation(record) => {
                if self.accepting.load(Ordering::SeqCst) {
                    self.accumulator.upsert(record).await;
                }
                true
            }
            SourceEvent::PermissionDenied => {
                warn!("{} permission denied during scan", self.source.transport());
                self.permission_denied.store(true, Ordering::SeqCst);
                false
            }
            SourceEvent::Unavailable(reason) => {
                warn!("{} became unavailable: {}", self.source.transport(), reason);
                false
            }
        }
    }

    async fn finish(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.source.stop().await;
        *self.state.write().await = SessionState::Stopped;
        debug!(
            "{} session stopped with {} record(s)",
            self.source.transport(),
            self.accumulator.len().await
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeSource;

    fn quick_config() -> SessionConfig {
        SessionConfig {
            window: Duration::from_millis(100),
            readiness_timeout: Duration::from_millis(200),
            ..SessionConfig::default()
        }
    }

    fn ble(id: &str, name: &str, rssi: i16) -> AdvertisementRecord {
        AdvertisementRecord::new(id, name, Transport::Ble).with_signal(rssi)
    }

    fn obs(delay_ms: u64, record: AdvertisementRecord) -> (Duration, SourceEvent) {
        (
            Duration::from_millis(delay_ms),
            SourceEvent::Observation(record),
        )
    }

    #[tokio::test]
    async fn test_window_elapses_into_stopped() {
        let source = Arc::new(FakeSource::ready(Transport::Ble));
        let session = DiscoverySession::new(source.clone(), &quick_config());

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(session.state().await, SessionState::Stopped);
        assert!(!session.is_running().await);
        assert_eq!(source.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_reentrant_start_is_noop() {
        let source = Arc::new(FakeSource::ready(Transport::Ble));
        let session = DiscoverySession::new(source.clone(), &quick_config());

        session.start().await.unwrap();
        session.start().await.unwrap();
        session.start().await.unwrap();

        assert_eq!(source.start_count(), 1);
        session.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let source = Arc::new(FakeSource::ready(Transport::Ble));
        let session = DiscoverySession::new(source.clone(), &quick_config());

        // No-op from Idle.
        session.stop().await;
        assert_eq!(session.state().await, SessionState::Idle);
        assert_eq!(source.stop_count(), 0);

        session.start().await.unwrap();
        session.stop().await;
        assert_eq!(session.state().await, SessionState::Stopped);
        assert_eq!(source.stop_count(), 1);

        // No-op from Stopped.
        session.stop().await;
        assert_eq!(source.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_no_observations_after_stop() {
        let source = Arc::new(
            FakeSource::scripted(
                Transport::Ble,
                vec![
                    (Duration::ZERO, SourceEvent::Ready),
                    obs(10, ble("A", "Sensor1", -55)),
                ],
            )
            .with_late_event(SourceEvent::Observation(ble("B", "Latecomer", -40))),
        );
        let config = SessionConfig {
            window: Duration::from_secs(2),
            ..quick_config()
        };
        let session = DiscoverySession::new(source, &config);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.stop().await;

        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].peer_id, "A");

        // Give the late in-flight event time to land if the gate leaked.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.snapshot().await, snapshot);
    }

    #[tokio::test]
    async fn test_three_advertisements_dedup() {
        let source = Arc::new(FakeSource::scripted(
            Transport::Ble,
            vec![
                (Duration::ZERO, SourceEvent::Ready),
                obs(5, ble("A", "Sensor1", -55)),
                obs(10, ble("B", "Unknown", -70)),
                obs(15, ble("A", "Sensor1", -50)),
            ],
        ));
        let session = DiscoverySession::new(source, &quick_config());

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(session.state().await, SessionState::Stopped);
        let snapshot = session.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].peer_id, "A");
        assert_eq!(snapshot[0].signal_dbm, Some(-50));
        assert_eq!(snapshot[1].peer_id, "B");
        assert_eq!(snapshot[1].name, "Unknown");
    }

    #[tokio::test]
    async fn test_empty_window_yields_empty_snapshot() {
        let source = Arc::new(FakeSource::ready(Transport::ServiceBrowse));
        let session = DiscoverySession::new(source, &quick_config());

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(session.snapshot().await.is_empty());
        assert!(!session.is_running().await);
    }

    #[tokio::test]
    async fn test_permission_denied_mid_scan() {
        let source = Arc::new(FakeSource::scripted(
            Transport::Ble,
            vec![
                (Duration::ZERO, SourceEvent::Ready),
                (Duration::from_millis(10), SourceEvent::PermissionDenied),
            ],
        ));
        let config = SessionConfig {
            window: Duration::from_secs(2),
            ..quick_config()
        };
        let session = DiscoverySession::new(source.clone(), &config);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(session.state().await, SessionState::Stopped);
        assert!(session.permission_denied());
        assert!(session.snapshot().await.is_empty());
        assert_eq!(source.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_at_start() {
        let source = Arc::new(FakeSource::failing(
            Transport::Ble,
            DiscoveryError::PermissionDenied {
                transport: Transport::Ble,
            },
        ));
        let session = DiscoverySession::new(source, &quick_config());

        let result = session.start().await;
        assert!(matches!(
            result,
            Err(DiscoveryError::PermissionDenied { .. })
        ));
        assert_eq!(session.state().await, SessionState::Stopped);
        assert!(session.permission_denied());
        assert!(session.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_readiness_timeout_stops_session() {
        // Source starts fine but never signals readiness.
        let source = Arc::new(FakeSource::new(Transport::Ble));
        let session = DiscoverySession::new(source.clone(), &quick_config());

        session.start().await.unwrap();
        assert_eq!(session.state().await, SessionState::AwaitingReadiness);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(session.state().await, SessionState::Stopped);
        assert!(session.snapshot().await.is_empty());
        assert_eq!(source.stop_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_mid_scan_stops_session() {
        let source = Arc::new(FakeSource::scripted(
            Transport::Ble,
            vec![
                (Duration::ZERO, SourceEvent::Ready),
                (
                    Duration::from_millis(10),
                    SourceEvent::Unavailable("adapter gone".to_string()),
                ),
            ],
        ));
        let config = SessionConfig {
            window: Duration::from_secs(2),
            ..quick_config()
        };
        let session = DiscoverySession::new(source, &config);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(session.state().await, SessionState::Stopped);
        assert!(!session.permission_denied());
    }

    #[tokio::test]
    async fn test_restart_clears_previous_results() {
        let source = Arc::new(FakeSource::scripted(
            Transport::Ble,
            vec![
                (Duration::ZERO, SourceEvent::Ready),
                obs(20, ble("A", "Sensor1", -55)),
            ],
        ));
        let session = DiscoverySession::new(source.clone(), &quick_config());

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(session.result_count().await, 1);

        // Second run: results are gone immediately, then repopulate from the
        // replayed script.
        session.start().await.unwrap();
        assert_eq!(session.result_count().await, 0);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(session.result_count().await, 1);
        assert_eq!(source.start_count(), 2);
    }

    #[tokio::test]
    async fn test_live_snapshot_mid_scan() {
        let source = Arc::new(FakeSource::scripted(
            Transport::Ble,
            vec![
                (Duration::ZERO, SourceEvent::Ready),
                obs(10, ble("A", "Sensor1", -55)),
            ],
        ));
        let config = SessionConfig {
            window: Duration::from_secs(2),
            ..quick_config()
        };
        let session = DiscoverySession::new(source, &config);

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(session.is_running().await);
        assert_eq!(session.snapshot().await.len(), 1);

        session.stop().await;
    }
}
