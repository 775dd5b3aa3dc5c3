//! yurex-driver
//!
//! Drives every YUREX attached to the host, publishes its counter and
//! animation views and logs what the devices report.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{UsbBridge, UsbCommand, UsbEvent, create_usb_bridge, setup_logging};
use driver::usb::spawn_usb_worker;
use driver::{Driver, DriverConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "yurex-driver")]
#[command(author, version, about = "Driver for YUREX USB counters")]
#[command(long_about = "
Attaches to YUREX devices as they are plugged in, keeps their counters
current and logs every update.

EXAMPLES:
    # Run with default config
    yurex-driver

    # List attached devices as JSON
    yurex-driver --list-devices --json

    # Run with debug logging
    yurex-driver --log-level debug

CONFIGURATION:
    The driver looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/yurex/driver.toml
    3. /etc/yurex/driver.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List attached devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Print the device list as JSON
    #[arg(long, requires = "list_devices")]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let path = DriverConfig::default_path();
        DriverConfig::default()
            .save(&path)
            .context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let (config, fallback) = match &args.config {
        Some(path) => {
            let path = PathBuf::from(shellexpand::tilde(path).into_owned());
            let config = DriverConfig::load(Some(path)).context("Failed to load configuration")?;
            (config, None)
        }
        None => DriverConfig::load_or_default(),
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.driver.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("yurex-driver v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);
    if let Some(e) = fallback {
        warn!("Failed to load config: {:#}, using defaults", e);
    }

    let (usb_bridge, worker) = create_usb_bridge();
    let driver = Arc::new(Driver::new(&config.driver).with_events(worker.event_tx.clone()));
    let usb_worker_handle = spawn_usb_worker(worker, driver, config.usb.clone())
        .context("Failed to spawn USB worker thread")?;

    let result = if args.list_devices {
        list_devices_mode(&usb_bridge, args.json).await
    } else {
        run(&usb_bridge).await
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_worker(&usb_bridge).await {
        error!("Error shutting down USB worker: {:#}", e);
    }

    match usb_worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    result
}

/// Print attached devices and exit
async fn list_devices_mode(usb_bridge: &UsbBridge, json: bool) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    usb_bridge
        .send_command(UsbCommand::ListDevices { response: tx })
        .await
        .context("Failed to send ListDevices command")?;

    let devices = rx.await.context("Failed to receive device list")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No YUREX devices attached.");
        return Ok(());
    }

    println!("Found {} YUREX device(s):\n", devices.len());
    for device in devices {
        println!(
            "  [{}] {} BBU, animation {}",
            device.id,
            device.bbu,
            if device.animation { "on" } else { "off" }
        );
        println!("      {}", device.counter_name);
        println!("      {}", device.animation_name);
        if let Some(endpoint) = device.endpoint {
            println!(
                "      Interface {} Endpoint {:#04x}",
                endpoint.interface, endpoint.address
            );
        }
        println!();
    }

    Ok(())
}

/// Log driver events until Ctrl+C
async fn run(usb_bridge: &UsbBridge) -> Result<()> {
    info!("Press Ctrl+C to shutdown");

    loop {
        tokio::select! {
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                    Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                }
                return Ok(());
            }
            event = usb_bridge.recv_event() => {
                let event = event.map_err(|e| anyhow!("USB worker stopped: {}", e))?;
                log_event(&event);
            }
        }
    }
}

fn log_event(event: &UsbEvent) {
    match event {
        UsbEvent::DeviceAttached {
            device_id,
            counter_name,
            animation_name,
        } => info!(
            "Device {} attached: {}, {}",
            device_id, counter_name, animation_name
        ),
        UsbEvent::DeviceDetached { device_id } => info!("Device {} detached", device_id),
        UsbEvent::CounterUpdated { device_id, value } => {
            info!("Device {}: {} BBU", device_id, value)
        }
        UsbEvent::AnimationChanged { device_id, enabled } => {
            info!(
                "Device {}: animation {}",
                device_id,
                if *enabled { "on" } else { "off" }
            )
        }
    }
}

/// Shutdown USB worker thread gracefully
async fn shutdown_usb_worker(usb_bridge: &UsbBridge) -> Result<()> {
    usb_bridge
        .send_command(UsbCommand::Shutdown)
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}
