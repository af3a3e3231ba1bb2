pub mod accumulator;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod record;
pub mod session;
pub mod source;
pub mod transports;

#[cfg(test)]
pub(crate) mod testutil;

pub use accumulator::Accumulator;
pub use config::{ScanConfigFile, SessionConfig};
pub use coordinator::SessionCoordinator;
pub use error::DiscoveryError;
pub use record::{AdvertisementRecord, RssiQuality, Transport};
pub use session::{DiscoverySession, SessionState};
pub use source::{AdvertisementSource, SourceEvent};

/// Common result type for nearscan operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;
