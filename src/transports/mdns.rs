use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{pin_mut, StreamExt};
use log::{debug, warn};
use mdns::RecordKind;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::DiscoveryError;
use crate::record::{AdvertisementRecord, Transport};
use crate::source::{AdvertisementSource, SourceEvent};

/// Re-query interval for each browse while the window is open.
const QUERY_INTERVAL: Duration = Duration::from_secs(1);

/// Bonjour / DNS-SD service browse source.
///
/// One browse task per service type, all funneled into the session's single
/// event channel. Peer identity is the composite `"{type}.{name}"`, so the
/// same device offering two services shows up once per service.
pub struct ServiceBrowseSource {
    service_types: Vec<String>,
    cancel: Arc<RwLock<CancellationToken>>,
}

impl ServiceBrowseSource {
    pub fn new(service_types: Vec<String>) -> Self {
        Self {
            service_types,
            cancel: Arc::new(RwLock::new(CancellationToken::new())),
        }
    }
}

#[async_trait]
impl AdvertisementSource for ServiceBrowseSource {
    async fn start(
        &self,
        events: mpsc::UnboundedSender<SourceEvent>,
    ) -> Result<(), DiscoveryError> {
        if self.service_types.is_empty() {
            return Err(DiscoveryError::Configuration(
                "no service types configured for browsing".to_string(),
            ));
        }

        let token = CancellationToken::new();
        *self.cancel.write().await = token.clone();

        for service_type in &self.service_types {
            tokio::spawn(browse(
                service_type.clone(),
                events.clone(),
                token.clone(),
            ));
        }

        // Unlike BLE there is no radio power-on gate: once the browse
        // sockets are up the subsystem is as ready as it gets.
        let _ = events.send(SourceEvent::Ready);
        debug!("browsing {} service type(s)", self.service_types.len());

        Ok(())
    }

    async fn stop(&self) {
        self.cancel.read().await.cancel();
        debug!("service browse cancelled");
    }

    fn transport(&self) -> Transport {
        Transport::ServiceBrowse
    }
}

/// Browse one service type until cancelled.
async fn browse(
    service_type: String,
    events: mpsc::UnboundedSender<SourceEvent>,
    token: CancellationToken,
) {
    let service_name = format!("{}.local", service_type);
    let stream = match mdns::discover::all(&service_name, QUERY_INTERVAL) {
        Ok(discovery) => discovery.listen(),
        Err(e) => {
            // One failing type must not end the whole session; the others
            // keep browsing.
            warn!("mDNS browse for {} failed to start: {}", service_type, e);
            return;
        }
    };
    pin_mut!(stream);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            next = stream.next() => match next {
                Some(Ok(response)) => {
                    for record in records_from_response(&service_type, &response) {
                        if events.send(SourceEvent::Observation(record)).is_err() {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    debug!("mDNS response error for {}: {}", service_type, e);
                }
                None => break,
            }
        }
    }
}

/// Map the PTR/SRV records of one response to advertisement records.
fn records_from_response(
    service_type: &str,
    response: &mdns::Response,
) -> Vec<AdvertisementRecord> {
    let suffix = format!(".{}.local", service_type);
    let mut instances = Vec::new();
    let mut port = None;

    for record in response.records() {
        match &record.kind {
            RecordKind::PTR(target) => {
                if let Some(instance) = target.strip_suffix(&suffix) {
                    if !instance.is_empty() {
                        instances.push(instance.to_string());
                    }
                }
            }
            RecordKind::SRV { port: srv_port, .. } => port = Some(*srv_port),
            _ => {}
        }
    }

    instances
        .into_iter()
        .map(|name| {
            let peer_id = format!("{}.{}", service_type, name);
            let mut record = AdvertisementRecord::new(peer_id, name, Transport::ServiceBrowse);
            record.add_capability(format!("type:{}", service_type));
            record.add_capability("domain:local.".to_string());
            if let Some(port) = port {
                record.add_capability(format!("port:{}", port));
            }
            record
        })
        .collect()
}
