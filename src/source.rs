use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DiscoveryError;
use crate::record::{AdvertisementRecord, Transport};

/// Event pushed by a platform source into its session.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// The underlying subsystem confirmed it is powered on and scanning.
    Ready,
    /// One sighting of a peer.
    Observation(AdvertisementRecord),
    /// The platform reported the required permission as denied or restricted.
    PermissionDenied,
    /// The subsystem dropped out mid-scan (adapter gone, stream closed).
    Unavailable(String),
}

/// Seam between the session core and a platform discovery primitive.
///
/// Implementations translate the platform SDK's callback shape (BLE central
/// delegate, browse results handler) into `SourceEvent`s on the channel the
/// session hands to `start`. This keeps the core free of SDK types and lets
/// tests drive a session from a scripted fake.
#[async_trait]
pub trait AdvertisementSource: Send + Sync {
    /// Begin the platform primitive. Returns once the primitive has been
    /// kicked off; readiness is signalled later via `SourceEvent::Ready`.
    ///
    /// Startup failures are returned directly: a denied permission maps to
    /// `DiscoveryError::PermissionDenied`, a missing radio or subsystem to
    /// `DiscoveryError::Unavailable`.
    async fn start(
        &self,
        events: mpsc::UnboundedSender<SourceEvent>,
    ) -> Result<(), DiscoveryError>;

    /// Halt the platform primitive. Idempotent; callable when not started.
    async fn stop(&self);

    fn transport(&self) -> Transport;

    /// Whether this source can run on the current platform at all.
    fn is_available(&self) -> bool {
        true
    }
}
