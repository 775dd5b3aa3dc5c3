//! USB worker thread
//!
//! Runs the libusb event loop for the device manager and answers commands
//! from the Tokio runtime over the channel bridge.

use crate::config::UsbSettings;
use crate::driver::Driver;
use crate::usb::manager::DeviceManager;
use common::{UsbCommand, UsbWorker};
use rusb::UsbContext;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

const EVENT_TIMEOUT: Duration = Duration::from_millis(100);

pub struct UsbWorkerThread {
    manager: DeviceManager,
    worker: UsbWorker,
}

impl UsbWorkerThread {
    pub fn new(
        worker: UsbWorker,
        driver: Arc<Driver>,
        settings: UsbSettings,
    ) -> Result<Self, rusb::Error> {
        let mut manager = DeviceManager::new(driver, settings)?;
        manager.initialize()?;
        Ok(Self { manager, worker })
    }

    /// Run until a Shutdown command arrives or the bridge is dropped
    pub fn run(mut self) -> Result<(), rusb::Error> {
        info!("USB worker thread started");

        loop {
            match self.worker.try_recv_command() {
                Some(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Some(UsbCommand::ListDevices { response }) => {
                    let devices = self.manager.list_devices();
                    debug!("Listing {} devices", devices.len());
                    let _ = response.send(devices);
                }
                None if self.worker.is_closed() => {
                    info!("Command channel closed, USB worker exiting");
                    break;
                }
                None => {}
            }

            match self.manager.context().handle_events(Some(EVENT_TIMEOUT)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(EVENT_TIMEOUT);
                }
            }

            self.manager.process_hotplug_events();
        }

        self.manager.shutdown();
        info!("USB worker thread stopped");
        Ok(())
    }
}

/// Spawn the USB worker thread
pub fn spawn_usb_worker(
    worker: UsbWorker,
    driver: Arc<Driver>,
    settings: UsbSettings,
) -> std::io::Result<JoinHandle<Result<(), rusb::Error>>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || UsbWorkerThread::new(worker, driver, settings)?.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use common::create_usb_bridge;

    #[test]
    fn test_usb_worker_creation() {
        let (_bridge, worker) = create_usb_bridge();
        let config = DriverConfig::default();
        let driver = Arc::new(Driver::new(&config.driver));

        // May fail without USB permissions
        if let Err(e) = UsbWorkerThread::new(worker, driver, config.usb) {
            eprintln!("USB worker creation failed (expected without permissions): {}", e);
        }
    }
}
