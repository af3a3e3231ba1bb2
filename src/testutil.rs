use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::DiscoveryError;
use crate::record::Transport;
use crate::source::{AdvertisementSource, SourceEvent};

/// Scripted platform source for session and coordinator tests.
///
/// Replays its script (delay, event) on every `start`. An optional late
/// event is fired during `stop` to simulate an in-flight platform callback
/// landing after the session closed its observation gate.
pub struct FakeSource {
    transport: Transport,
    script: Vec<(Duration, SourceEvent)>,
    late_event: Mutex<Option<SourceEvent>>,
    fail_start: Mutex<Option<DiscoveryError>>,
    sender: Mutex<Option<mpsc::UnboundedSender<SourceEvent>>>,
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl FakeSource {
    /// Source that never signals readiness.
    pub fn new(transport: Transport) -> Self {
        Self::scripted(transport, Vec::new())
    }

    /// Source that signals readiness immediately and nothing else.
    pub fn ready(transport: Transport) -> Self {
        Self::scripted(transport, vec![(Duration::ZERO, SourceEvent::Ready)])
    }

    pub fn scripted(transport: Transport, script: Vec<(Duration, SourceEvent)>) -> Self {
        Self {
            transport,
            script,
            late_event: Mutex::new(None),
            fail_start: Mutex::new(None),
            sender: Mutex::new(None),
            started: AtomicUsize::new(0),
            stopped: AtomicUsize::new(0),
        }
    }

    /// Source whose `start` fails with the given error.
    pub fn failing(transport: Transport, err: DiscoveryError) -> Self {
        let source = Self::new(transport);
        *source.fail_start.lock().unwrap() = Some(err);
        source
    }

    pub fn with_late_event(self, event: SourceEvent) -> Self {
        *self.late_event.lock().unwrap() = Some(event);
        self
    }

    pub fn start_count(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AdvertisementSource for FakeSource {
    async fn start(
        &self,
        events: mpsc::UnboundedSender<SourceEvent>,
    ) -> Result<(), DiscoveryError> {
        if let Some(err) = self.fail_start.lock().unwrap().take() {
            return Err(err);
        }

        self.started.fetch_add(1, Ordering::SeqCst);
        *self.sender.lock().unwrap() = Some(events.clone());

        let script = self.script.clone();
        tokio::spawn(async move {
            for (delay, event) in script {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if events.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);

        // Simulated in-flight callback: delivered while (or right after)
        // the session is tearing down.
        let late = self.late_event.lock().unwrap().take();
        if let Some(event) = late {
            let sender = self.sender.lock().unwrap().clone();
            if let Some(sender) = sender {
                let _ = sender.send(event);
            }
        }
    }

    fn transport(&self) -> Transport {
        self.transport
    }
}
