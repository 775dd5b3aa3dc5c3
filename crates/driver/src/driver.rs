//! Hooks exposed to the host
//!
//! [`Driver`] is the surface a host framework talks to: hotplug
//! notifications come in through [`Driver::on_attach`] and
//! [`Driver::on_detach`], file operations through [`Driver::open`],
//! [`Driver::read`], [`Driver::write`], [`Driver::close`] and
//! [`Driver::free`].

use crate::config::DriverSettings;
use crate::error::{DriverError, Result};
use crate::handle::SessionHandle;
use crate::registry::Registry;
use crate::session::{DeviceSession, SessionNames};
use async_channel::Sender;
use common::{DeviceId, DeviceSummary, Transport, UsbEvent};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cookie returned by [`Driver::on_attach`] and handed back on detach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionCookie(DeviceId);

impl SessionCookie {
    pub fn device_id(&self) -> DeviceId {
        self.0
    }
}

/// YUREX driver core
pub struct Driver {
    registry: Registry,
    name_prefix: String,
    events: Option<Sender<UsbEvent>>,
}

impl Driver {
    pub fn new(settings: &DriverSettings) -> Self {
        Self {
            registry: Registry::new(settings.max_devices),
            name_prefix: settings.name_prefix.clone(),
            events: None,
        }
    }

    /// Publish driver events on `events`
    pub fn with_events(mut self, events: Sender<UsbEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Hotplug attach
    ///
    /// Registers a session for the device, configures it and starts its
    /// interrupt loop. A detach that arrives while the device is being
    /// started wins: attach then fails with `StateInvalid` and nothing is
    /// published.
    pub fn on_attach(&self, id: DeviceId, transport: Arc<dyn Transport>) -> Result<SessionCookie> {
        debug!("Device added: {}", id);

        let names = SessionNames::new(&self.name_prefix, id);
        let session = DeviceSession::new(id, names.clone(), transport, self.events.clone());
        self.registry.attach(session.clone())?;

        if let Err(e) = session.start() {
            warn!("Device {}: attach failed: {}", id, e);
            // A concurrent detach already owns the teardown
            if session.begin_detach().is_ok() {
                self.registry.detach(id);
                session.mark_released();
            }
            return Err(e);
        }

        info!("Published {} and {}", names.counter, names.animation);
        self.emit(UsbEvent::DeviceAttached {
            device_id: id,
            counter_name: names.counter,
            animation_name: names.animation,
        });
        Ok(SessionCookie(id))
    }

    /// Hotplug removal
    ///
    /// Stops the read loop, flushes the transport, unlinks the session and
    /// releases it. No completion callback runs against the session after
    /// this returns.
    pub fn on_detach(&self, cookie: SessionCookie) -> Result<()> {
        let id = cookie.device_id();
        debug!("Device removed: {}", id);

        let session = self
            .registry
            .get(id)
            .ok_or_else(|| DriverError::DeviceNotFound(format!("device {}", id)))?;

        session.begin_detach()?;
        self.registry.detach(id);
        session.mark_released();

        info!("Device {} detached", id);
        self.emit(UsbEvent::DeviceDetached { device_id: id });
        Ok(())
    }

    /// Names to publish, two per attached device
    pub fn publish_devices(&self) -> Arc<[String]> {
        self.registry.publish_names()
    }

    /// Open a published name
    pub fn open(&self, name: &str) -> Result<SessionHandle> {
        debug!("open({})", name);
        let (session, view) = self.registry.resolve(name).inspect_err(|_| {
            warn!("Cookie not found for {}", name);
        })?;
        Ok(SessionHandle::new(&session, view))
    }

    /// Read from an open handle
    pub fn read(&self, handle: &mut SessionHandle, offset: u64, length: usize) -> Result<Vec<u8>> {
        handle.read(offset, length)
    }

    /// Write to an open handle
    pub fn write(&self, handle: &mut SessionHandle, data: &[u8]) -> Result<usize> {
        handle.write(data)
    }

    /// Close a handle; the device is unaffected
    pub fn close(&self, handle: &mut SessionHandle) -> Result<()> {
        if !handle.is_open() {
            return Err(DriverError::StateInvalid("handle already closed"));
        }
        handle.close();
        Ok(())
    }

    /// Release a handle's resources
    pub fn free(&self, handle: SessionHandle) {
        drop(handle);
    }

    /// Listing of attached devices, most recent first
    pub fn summaries(&self) -> Vec<DeviceSummary> {
        self.registry.summaries()
    }

    /// Detach every device, most recent first
    pub fn detach_all(&self) {
        for session in self.registry.sessions() {
            if let Err(e) = self.on_detach(SessionCookie(session.id())) {
                warn!("Device {}: detach failed: {}", session.id(), e);
            }
        }
    }

    fn emit(&self, event: UsbEvent) {
        if let Some(events) = &self.events
            && let Err(e) = events.try_send(event)
        {
            debug!("Driver event dropped: {}", e);
        }
    }
}
