use std::collections::HashMap;
use std::sync::Arc;

use log::warn;

use crate::config::SessionConfig;
use crate::error::DiscoveryError;
use crate::record::{AdvertisementRecord, Transport};
use crate::session::DiscoverySession;
use crate::source::AdvertisementSource;

/// Bridges one discovery session per transport to the presentation layer.
///
/// Sessions of different kinds run concurrently; re-running an active kind
/// is a no-op (the session's own re-entrancy guard). Callers observe
/// completion by polling `is_running` and read live, partial results at any
/// time via `current_results`.
pub struct SessionCoordinator {
    sessions: HashMap<Transport, Arc<DiscoverySession>>,
}

impl SessionCoordinator {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Register a platform source. Replaces any previous session for the
    /// same transport kind.
    pub fn register(&mut self, source: Arc<dyn AdvertisementSource>, config: &SessionConfig) {
        let session = DiscoverySession::new(source, config);
        self.sessions.insert(session.transport(), Arc::new(session));
    }

    /// Registered transport kinds, in a stable order.
    pub fn transports(&self) -> Vec<Transport> {
        let mut kinds: Vec<Transport> = self.sessions.keys().copied().collect();
        kinds.sort();
        kinds
    }

    fn session(&self, kind: Transport) -> Result<&Arc<DiscoverySession>, DiscoveryError> {
        self.sessions.get(&kind).ok_or(DiscoveryError::Unavailable {
            transport: kind,
            reason: "no source registered".to_string(),
        })
    }

    /// Start the named session if not already running. Non-blocking: the
    /// observation window runs in the background.
    pub async fn run_session(&self, kind: Transport) -> Result<(), DiscoveryError> {
        self.session(kind)?.start().await
    }

    /// Start every registered session, collecting per-transport failures
    /// instead of aborting on the first.
    pub async fn run_all(&self) -> Vec<(Transport, DiscoveryError)> {
        let mut failures = Vec::new();
        for kind in self.transports() {
            if let Err(e) = self.run_session(kind).await {
                warn!("{} session failed to start: {}", kind, e);
                failures.push((kind, e));
            }
        }
        failures
    }

    /// Snapshot of the named session's accumulator, valid mid-scan. Empty
    /// when the transport has no registered source.
    pub async fn current_results(&self, kind: Transport) -> Vec<AdvertisementRecord> {
        match self.sessions.get(&kind) {
            Some(session) => session.snapshot().await,
            None => Vec::new(),
        }
    }

    pub async fn result_count(&self, kind: Transport) -> usize {
        match self.sessions.get(&kind) {
            Some(session) => session.result_count().await,
            None => 0,
        }
    }

    pub async fn is_running(&self, kind: Transport) -> bool {
        match self.sessions.get(&kind) {
            Some(session) => session.is_running().await,
            None => false,
        }
    }

    pub async fn any_running(&self) -> bool {
        for session in self.sessions.values() {
            if session.is_running().await {
                return true;
            }
        }
        false
    }

    /// Whether the named session's most recent run hit a permission denial.
    pub fn permission_denied(&self, kind: Transport) -> bool {
        self.sessions
            .get(&kind)
            .map(|session| session.permission_denied())
            .unwrap_or(false)
    }

    pub async fn stop_session(&self, kind: Transport) {
        if let Some(session) = self.sessions.get(&kind) {
            session.stop().await;
        }
    }

    pub async fn stop_all(&self) {
        for session in self.sessions.values() {
            session.stop().await;
        }
    }
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
