use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};

use crate::config::{ConfigManager, ScanConfigFile};
use crate::coordinator::SessionCoordinator;
use crate::record::{AdvertisementRecord, Transport};

/// Slack added on top of window + readiness bound when waiting for sessions
/// to wind down.
const COMPLETION_SLACK: Duration = Duration::from_secs(2);

/// CLI commands for running scans from the terminal
pub struct ScanCli;

impl ScanCli {
    /// Run one scan session per enabled transport and display the results.
    pub async fn scan(
        transport: Option<String>,
        duration_secs: Option<u64>,
        watch: bool,
        json: bool,
        verbose: bool,
    ) -> Result<()> {
        let mut file = ConfigManager::load_or_default(None);
        if let Some(secs) = duration_secs {
            file.scan.window_secs = secs;
        }
        file.validate()?;

        let selected = match transport.as_deref() {
            Some(name) => Some(
                Transport::parse(name).ok_or_else(|| {
                    anyhow!("unknown transport: {} (expected ble or mdns)", name)
                })?,
            ),
            None => None,
        };

        let coordinator = Self::build_coordinator(&file, selected)?;
        let kinds = coordinator.transports();

        if verbose {
            println!(
                "Scanning via {:?} for {} second(s)",
                kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
                file.scan.window_secs
            );
        }

        for (kind, error) in coordinator.run_all().await {
            eprintln!("warning: {} scan did not start: {}", kind, error);
        }

        Self::wait_for_completion(&coordinator, &file, watch).await;

        if json {
            let mut all: Vec<AdvertisementRecord> = Vec::new();
            for kind in &kinds {
                all.extend(coordinator.current_results(*kind).await);
            }
            println!("{}", serde_json::to_string_pretty(&all)?);
            return Ok(());
        }

        for kind in kinds {
            let results = coordinator.current_results(kind).await;
            Self::print_results(kind, &results, verbose);
            if coordinator.permission_denied(kind) {
                println!(
                    "  {} permission denied; grant access in system settings and retry",
                    kind
                );
            }
            println!();
        }

        Ok(())
    }

    fn build_coordinator(
        file: &ScanConfigFile,
        selected: Option<Transport>,
    ) -> Result<SessionCoordinator> {
        let config = file.session_config();
        let wanted = |kind: Transport| {
            selected.map(|s| s == kind).unwrap_or(true) && file.transport_enabled(kind)
        };

        #[allow(unused_mut)]
        let mut coordinator = SessionCoordinator::new();

        #[cfg(feature = "ble")]
        if wanted(Transport::Ble) {
            let source = crate::transports::BleSource::new();
            if crate::source::AdvertisementSource::is_available(&source) {
                coordinator.register(Arc::new(source), &config);
            } else {
                eprintln!("warning: BLE is not supported on this platform, skipping");
            }
        }

        #[cfg(feature = "mdns-browse")]
        if wanted(Transport::ServiceBrowse) {
            coordinator.register(
                Arc::new(crate::transports::ServiceBrowseSource::new(
                    config.service_types.clone(),
                )),
                &config,
            );
        }

        if coordinator.transports().is_empty() {
            bail!("no transports enabled (check config and build features)");
        }
        Ok(coordinator)
    }

    /// Block until every session reaches Stopped, bounded by the window
    /// plus readiness wait plus slack. With `watch`, print running counts.
    async fn wait_for_completion(
        coordinator: &SessionCoordinator,
        file: &ScanConfigFile,
        watch: bool,
    ) {
        let deadline = Instant::now()
            + Duration::from_secs(file.scan.window_secs)
            + Duration::from_secs(file.scan.readiness_timeout_secs)
            + COMPLETION_SLACK;

        while coordinator.any_running().await && Instant::now() < deadline {
            if watch {
                let mut parts = Vec::new();
                for kind in coordinator.transports() {
                    parts.push(format!(
                        "{}: {}",
                        kind,
                        coordinator.result_count(kind).await
                    ));
                }
                println!("scanning... {}", parts.join(", "));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    fn print_results(kind: Transport, results: &[AdvertisementRecord], verbose: bool) {
        match kind {
            Transport::Ble => println!("Bluetooth devices: {} found", results.len()),
            Transport::ServiceBrowse => println!("Network services: {} found", results.len()),
        }

        for (i, record) in results.iter().enumerate() {
            println!("  {}. {}", i + 1, record.description());
            if verbose {
                println!("     Peer id: {}", record.peer_id);
                if !record.capabilities.is_empty() {
                    let tags: Vec<&str> =
                        record.capabilities.iter().map(String::as_str).collect();
                    println!("     Tags: {}", tags.join(", "));
                }
            }
        }
    }
}
