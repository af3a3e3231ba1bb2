use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel name for peers that do not broadcast one.
pub const UNKNOWN_NAME: &str = "Unknown";

/// The platform primitive a record was observed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Transport {
    /// Bluetooth LE advertisement scan
    Ble,
    /// Bonjour / DNS-SD service browse
    ServiceBrowse,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Ble => "ble",
            Transport::ServiceBrowse => "mdns",
        }
    }

    /// Parse a user-supplied transport name (CLI flags, config files).
    pub fn parse(s: &str) -> Option<Transport> {
        match s.trim().to_lowercase().as_str() {
            "ble" | "bluetooth" => Some(Transport::Ble),
            "mdns" | "bonjour" | "service-browse" => Some(Transport::ServiceBrowse),
            _ => None,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Signal strength bucket for display, derived from RSSI in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RssiQuality {
    Excellent,
    Good,
    Fair,
    Weak,
}

impl RssiQuality {
    pub fn from_dbm(dbm: i16) -> Self {
        match dbm {
            d if d >= -50 => RssiQuality::Excellent,
            d if d >= -65 => RssiQuality::Good,
            d if d >= -80 => RssiQuality::Fair,
            _ => RssiQuality::Weak,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RssiQuality::Excellent => "excellent",
            RssiQuality::Good => "good",
            RssiQuality::Fair => "fair",
            RssiQuality::Weak => "weak",
        }
    }
}

impl fmt::Display for RssiQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One observed peer at one point in time.
///
/// `peer_id` is stable for the duration of a session only: the BLE stack
/// hands out a per-host peripheral identifier, and service browsing derives
/// a composite of service type and instance name. Neither survives across
/// sessions or installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementRecord {
    pub peer_id: String,
    pub name: String,
    /// RSSI in dBm. Absent for service-browse sightings.
    pub signal_dbm: Option<i16>,
    pub capabilities: BTreeSet<String>,
    pub transport: Transport,
}

impl AdvertisementRecord {
    pub fn new(peer_id: impl Into<String>, name: impl Into<String>, transport: Transport) -> Self {
        let name = name.into();
        let name = if name.is_empty() {
            UNKNOWN_NAME.to_string()
        } else {
            name
        };
        Self {
            peer_id: peer_id.into(),
            name,
            signal_dbm: None,
            capabilities: BTreeSet::new(),
            transport,
        }
    }

    pub fn with_signal(mut self, dbm: i16) -> Self {
        self.signal_dbm = Some(dbm);
        self
    }

    pub fn add_capability(&mut self, tag: impl Into<String>) {
        self.capabilities.insert(tag.into());
    }

    pub fn has_known_name(&self) -> bool {
        self.name != UNKNOWN_NAME
    }

    pub fn is_same_peer(&self, other: &AdvertisementRecord) -> bool {
        self.peer_id == other.peer_id
    }

    /// Fold a repeat sighting of the same peer into this record.
    ///
    /// Each field is overridden only when the newer sighting actually
    /// observed it: a nameless repeat advertisement keeps the prior name,
    /// an empty payload keeps the prior capability tags, and a fresh RSSI
    /// reading always wins since it changes per advertisement.
    pub fn merge(&mut self, newer: AdvertisementRecord) {
        if !self.is_same_peer(&newer) {
            return;
        }

        if newer.has_known_name() {
            self.name = newer.name;
        }

        if newer.signal_dbm.is_some() {
            self.signal_dbm = newer.signal_dbm;
        }

        if !newer.capabilities.is_empty() {
            self.capabilities = newer.capabilities;
        }
    }

    pub fn signal_quality(&self) -> Option<RssiQuality> {
        self.signal_dbm.map(RssiQuality::from_dbm)
    }

    /// Human-readable one-line summary, e.g. "Sensor1 (ble), -55 dBm (good)".
    pub fn description(&self) -> String {
        match self.signal_dbm {
            Some(dbm) => format!(
                "{} ({}), {} dBm ({})",
                self.name,
                self.transport,
                dbm,
                RssiQuality::from_dbm(dbm)
            ),
            None => format!("{} ({})", self.name, self.transport),
        }
    }
}

impl fmt::Display for AdvertisementRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
