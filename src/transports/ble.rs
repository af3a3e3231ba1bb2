use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::DiscoveryError;
use crate::record::{AdvertisementRecord, Transport, UNKNOWN_NAME};
use crate::source::{AdvertisementSource, SourceEvent};

/// Bluetooth LE central scan source.
///
/// Uses the first available adapter. The scan-start call succeeding doubles
/// as the readiness signal: the host stack rejects the call while the radio
/// is off or unauthorized.
pub struct BleSource {
    /// Restrict the scan to peripherals advertising these services; empty
    /// scans everything.
    service_filter: Vec<Uuid>,
    adapter: Arc<RwLock<Option<Adapter>>>,
    scanning: Arc<AtomicBool>,
}

impl BleSource {
    pub fn new() -> Self {
        Self {
            service_filter: Vec::new(),
            adapter: Arc::new(RwLock::new(None)),
            scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_service_filter(services: Vec<Uuid>) -> Self {
        Self {
            service_filter: services,
            ..Self::new()
        }
    }
}

impl Default for BleSource {
    fn default() -> Self {
        Self::new()
    }
}

/// btleplug reports authorization problems as adapter errors without a
/// dedicated variant, so classification goes by message text.
fn classify(e: btleplug::Error) -> DiscoveryError {
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
    {
        DiscoveryError::PermissionDenied {
            transport: Transport::Ble,
        }
    } else {
        DiscoveryError::Unavailable {
            transport: Transport::Ble,
            reason: text,
        }
    }
}

/// Resolve one peripheral sighting into a record. Missing advertisement
/// fields degrade to sentinels, never to errors.
async fn sighting(central: &Adapter, id: &PeripheralId) -> Option<AdvertisementRecord> {
    let peripheral = central.peripheral(id).await.ok()?;
    let props = peripheral.properties().await.ok().flatten()?;

    let name = props
        .local_name
        .unwrap_or_else(|| UNKNOWN_NAME.to_string());
    let mut record = AdvertisementRecord::new(id.to_string(), name, Transport::Ble);
    record.signal_dbm = props.rssi;

    if let Some(tx_power) = props.tx_power_level {
        record.add_capability(format!("tx-power:{} dBm", tx_power));
    }
    for service in &props.services {
        record.add_capability(format!("svc:{}", service));
    }
    for company_id in props.manufacturer_data.keys() {
        record.add_capability(format!("mfg:0x{:04x}", company_id));
    }

    Some(record)
}

#[async_trait]
impl AdvertisementSource for BleSource {
    async fn start(
        &self,
        events: mpsc::UnboundedSender<SourceEvent>,
    ) -> Result<(), DiscoveryError> {
        let manager = Manager::new().await.map_err(classify)?;
        let adapters = manager.adapters().await.map_err(classify)?;
        let central = adapters
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::Unavailable {
                transport: Transport::Ble,
                reason: "no Bluetooth adapter found".to_string(),
            })?;

        let mut stream = central.events().await.map_err(classify)?;

        let mut filter = ScanFilter::default();
        filter.services = self.service_filter.clone();
        central.start_scan(filter).await.map_err(classify)?;

        *self.adapter.write().await = Some(central.clone());
        self.scanning.store(true, Ordering::SeqCst);
        let _ = events.send(SourceEvent::Ready);
        debug!("BLE scan started");

        let scanning = Arc::clone(&self.scanning);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                if !scanning.load(Ordering::SeqCst) || events.is_closed() {
                    break;
                }
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                if let Some(record) = sighting(&central, &id).await {
                    if events.send(SourceEvent::Observation(record)).is_err() {
                        break;
                    }
                }
            }
            // Stream ending while a scan is up means the adapter went away.
            if scanning.load(Ordering::SeqCst) {
                let _ = events.send(SourceEvent::Unavailable(
                    "BLE event stream closed".to_string(),
                ));
            }
            debug!("BLE event pump ended");
        });

        Ok(())
    }

    async fn stop(&self) {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(adapter) = self.adapter.read().await.as_ref() {
            if let Err(e) = adapter.stop_scan().await {
                warn!("failed to stop BLE scan: {}", e);
            }
        }
        debug!("BLE scan stopped");
    }

    fn transport(&self) -> Transport {
        Transport::Ble
    }

    fn is_available(&self) -> bool {
        cfg!(any(
            target_os = "linux",
            target_os = "macos",
            target_os = "windows"
        ))
    }
}
