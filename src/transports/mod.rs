//! Platform-backed advertisement sources, one per transport kind.

#[cfg(feature = "ble")]
pub mod ble;

#[cfg(feature = "mdns-browse")]
pub mod mdns;

#[cfg(feature = "ble")]
pub use ble::BleSource;

#[cfg(feature = "mdns-browse")]
pub use mdns::ServiceBrowseSource;
