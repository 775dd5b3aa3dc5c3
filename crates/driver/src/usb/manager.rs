//! YUREX device manager
//!
//! Enumerates matching devices, listens for hot-plug events and feeds them
//! to the [`Driver`] as attach/detach notifications. Runs on the USB worker
//! thread.

use crate::config::UsbSettings;
use crate::driver::{Driver, SessionCookie};
use crate::usb::device::read_configuration;
use crate::usb::transport::RusbTransport;
use async_channel::{Receiver, Sender};
use common::{DeviceId, DeviceSummary};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hot-plug notification queued for the worker loop
enum HotplugEvent {
    Arrived(Device<Context>),
    Left { bus: u8, address: u8 },
}

/// Tracks attached YUREX devices by bus location
pub struct DeviceManager {
    context: Context,
    driver: Arc<Driver>,
    settings: UsbSettings,
    /// (bus, address) -> attached session
    attached: HashMap<(u8, u8), SessionCookie>,
    next_device_id: u32,
    hotplug_rx: Receiver<HotplugEvent>,
    hotplug_tx: Sender<HotplugEvent>,
    _hotplug_registration: Option<Registration<Context>>,
}

impl DeviceManager {
    pub fn new(driver: Arc<Driver>, settings: UsbSettings) -> Result<Self, rusb::Error> {
        let context = Context::new()?;
        let (hotplug_tx, hotplug_rx) = async_channel::unbounded();

        Ok(Self {
            context,
            driver,
            settings,
            attached: HashMap::new(),
            next_device_id: 1,
            hotplug_rx,
            hotplug_tx,
            _hotplug_registration: None,
        })
    }

    /// Attach devices already present and register for hot-plug
    pub fn initialize(&mut self) -> Result<(), rusb::Error> {
        self.enumerate_devices()?;

        if rusb::has_hotplug() {
            self.register_hotplug()?;
        } else {
            warn!("libusb has no hot-plug support; only devices present at startup are driven");
        }

        info!(
            "Device manager initialized with {} devices",
            self.attached.len()
        );
        Ok(())
    }

    fn enumerate_devices(&mut self) -> Result<(), rusb::Error> {
        let devices = self.context.devices()?;
        for device in devices.iter() {
            self.handle_device_arrived(device);
        }
        Ok(())
    }

    fn register_hotplug(&mut self) -> Result<(), rusb::Error> {
        let callback = HotplugCallback {
            events: self.hotplug_tx.clone(),
        };

        let registration = HotplugBuilder::new()
            .enumerate(false)
            .register(&self.context, Box::new(callback))?;

        self._hotplug_registration = Some(registration);
        debug!("Hot-plug callbacks registered");
        Ok(())
    }

    /// Handle events queued by the hot-plug callback
    pub fn process_hotplug_events(&mut self) {
        while let Ok(event) = self.hotplug_rx.try_recv() {
            match event {
                HotplugEvent::Arrived(device) => self.handle_device_arrived(device),
                HotplugEvent::Left { bus, address } => self.handle_device_left(bus, address),
            }
        }
    }

    /// A YUREX selected by the filters, with a HID boot interface
    fn is_device_allowed(&self, device: &Device<Context>) -> bool {
        let Ok(desc) = device.device_descriptor() else {
            return false;
        };
        if !self.settings.allows(desc.vendor_id(), desc.product_id()) {
            return false;
        }

        match read_configuration(device) {
            Ok(config) if config.has_hid_boot_interface() => true,
            Ok(_) => {
                warn!(
                    "Device at bus={}, addr={} has no HID boot interface, skipped",
                    device.bus_number(),
                    device.address()
                );
                false
            }
            Err(e) => {
                debug!(
                    "Can not read configuration at bus={}, addr={}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                false
            }
        }
    }

    /// Open a matching device and hand it to the driver
    pub fn handle_device_arrived(&mut self, device: Device<Context>) {
        let key = (device.bus_number(), device.address());
        if self.attached.contains_key(&key) || !self.is_device_allowed(&device) {
            return;
        }

        let transport = match RusbTransport::open(device, &self.settings) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Failed to open device at bus={}, addr={}: {}", key.0, key.1, e);
                return;
            }
        };

        let device_id = DeviceId(self.next_device_id);
        self.next_device_id += 1;

        match self.driver.on_attach(device_id, Arc::new(transport)) {
            Ok(cookie) => {
                debug!(
                    "Attached device {} at bus={}, addr={}",
                    device_id, key.0, key.1
                );
                self.attached.insert(key, cookie);
            }
            Err(e) => warn!("Device {} not attached: {}", device_id, e),
        }
    }

    /// Detach the device that was at (bus, address)
    pub fn handle_device_left(&mut self, bus: u8, address: u8) {
        let Some(cookie) = self.attached.remove(&(bus, address)) else {
            return;
        };

        if let Err(e) = self.driver.on_detach(cookie) {
            warn!("Device {}: detach failed: {}", cookie.device_id(), e);
        }
    }

    /// Listing of attached devices
    pub fn list_devices(&self) -> Vec<DeviceSummary> {
        self.driver.summaries()
    }

    /// Detach every device
    pub fn shutdown(&mut self) {
        for (_, cookie) in self.attached.drain() {
            if let Err(e) = self.driver.on_detach(cookie) {
                warn!("Device {}: detach failed: {}", cookie.device_id(), e);
            }
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

/// Hot-plug callback
///
/// libusb calls this from inside `handle_events`, so the events are only
/// queued here and handled by [`DeviceManager::process_hotplug_events`].
struct HotplugCallback {
    events: Sender<HotplugEvent>,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device arrived (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        if self.events.try_send(HotplugEvent::Arrived(device)).is_err() {
            warn!("Hot-plug arrival dropped: manager gone");
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        debug!(
            "Hot-plug callback: device left (bus={}, addr={})",
            device.bus_number(),
            device.address()
        );
        let event = HotplugEvent::Left {
            bus: device.bus_number(),
            address: device.address(),
        };
        if self.events.try_send(event).is_err() {
            warn!("Hot-plug removal dropped: manager gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;

    #[test]
    fn test_device_id_assignment() {
        let config = DriverConfig::default();
        let driver = Arc::new(Driver::new(&config.driver));

        // Context creation may fail without USB access
        match DeviceManager::new(driver, config.usb) {
            Ok(manager) => {
                assert_eq!(manager.next_device_id, 1);
                assert!(manager.attached.is_empty());
                assert!(manager.list_devices().is_empty());
            }
            Err(e) => eprintln!("USB context unavailable: {}", e),
        }
    }
}
