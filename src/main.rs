use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use log::{error, info};

use ble_central_lib::core::bluetooth::{BleEvent, BluestAdapter, EventKind, SessionManager};
use ble_central_lib::{SessionConfig, commands, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    logging::init_logging(log::LevelFilter::Info);

    let config = SessionConfig::load_config(&config_dir).await?;
    let scan_duration = Duration::from_millis(config.scan_duration_ms);

    let (adapter, events) = BluestAdapter::new().await?;
    let manager = SessionManager::init(adapter, events, config).await;

    let mut discovered = manager.subscribe(&[EventKind::DeviceDiscovered, EventKind::ScanFinished]);
    if let Err(e) = manager.start_scan(None, None).await {
        error!("Failed to start scan: {}", e);
        manager.shutdown().await;
        return Err(e.into());
    }
    info!("Scanning for {:?}...", scan_duration);

    while let Some(event) = discovered.recv().await {
        if event == BleEvent::ScanFinished {
            break;
        }
        let (name, payload) = commands::event_payload(&event);
        println!("{}", serde_json::json!({ "event": name, "payload": payload }));
    }

    info!("Found {} device(s).", manager.discovered_devices().len());
    manager.shutdown().await;
    Ok(())
}
