//! Per-device session
//!
//! A [`DeviceSession`] owns the live state of one attached YUREX: the BBU
//! counter, the animation flag and the self-sustaining interrupt read loop
//! that keeps the counter current.
//!
//! # Lifecycle
//!
//! ```text
//! Attaching ──start()──► Active ──begin_detach()──► Detaching ──mark_released()──► Released
//! ```
//!
//! The detection flag is the only gate the completion callback consults
//! before queueing the next read. It is set once, together with the
//! `Attaching -> Active` step when an endpoint was found, and cleared for good
//! at the start of detach, before the pending transfer is cancelled. Both
//! steps happen under the lifecycle lock, so a detach that lands while
//! `start` runs leaves the flag cleared and makes `start` fail.

use crate::error::{DriverError, Result};
use async_channel::Sender;
use common::{
    DeviceId, DeviceSummary, DiscoveredEndpoint, TransferStatus, Transport, TransportError,
    UsbEvent, discover_endpoint,
};
use protocol::{Bbu, Command, MODE_ANIMATION_ON, Notification, decode_notification, encode_command};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, trace, warn};

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Attaching = 0,
    Active = 1,
    Detaching = 2,
    Released = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Attaching,
            1 => SessionState::Active,
            2 => SessionState::Detaching,
            _ => SessionState::Released,
        }
    }
}

/// Published names of a session, one per view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionNames {
    pub counter: String,
    pub animation: String,
}

impl SessionNames {
    /// `<prefix>/<id>/bbu` and `<prefix>/<id>/animation`
    pub fn new(prefix: &str, id: DeviceId) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            counter: format!("{}/{}/bbu", prefix, id),
            animation: format!("{}/{}/animation", prefix, id),
        }
    }
}

/// Counter and animation flag, guarded by the session lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readings {
    pub bbu: Bbu,
    pub animation: bool,
}

/// Live state of one attached device
pub struct DeviceSession {
    id: DeviceId,
    names: SessionNames,
    transport: Arc<dyn Transport>,
    /// Notification endpoint, set once during start
    endpoint: OnceLock<DiscoveredEndpoint>,
    /// Endpoint found and read loop allowed to requeue
    detected: AtomicBool,
    state: AtomicU8,
    /// Serializes the state transitions that touch the detection flag
    lifecycle: Mutex<()>,
    readings: Mutex<Readings>,
    events: Option<Sender<UsbEvent>>,
    /// Completions that arrived after release
    late_completions: AtomicU64,
}

impl DeviceSession {
    /// Allocate a session in the `Attaching` state with animation on
    pub fn new(
        id: DeviceId,
        names: SessionNames,
        transport: Arc<dyn Transport>,
        events: Option<Sender<UsbEvent>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            names,
            transport,
            endpoint: OnceLock::new(),
            detected: AtomicBool::new(false),
            state: AtomicU8::new(SessionState::Attaching as u8),
            lifecycle: Mutex::new(()),
            readings: Mutex::new(Readings {
                bbu: Bbu::ZERO,
                animation: true,
            }),
            events,
            late_completions: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn names(&self) -> &SessionNames {
        &self.names
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while user operations may touch the session
    pub fn is_usable(&self) -> bool {
        matches!(
            self.state(),
            SessionState::Attaching | SessionState::Active
        )
    }

    /// True while the interrupt loop may requeue
    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::Acquire)
    }

    pub fn endpoint(&self) -> Option<DiscoveredEndpoint> {
        self.endpoint.get().copied()
    }

    /// Interface commands are addressed to (0 until an endpoint is found)
    pub fn interface(&self) -> u8 {
        self.endpoint().map(|ep| ep.interface).unwrap_or(0)
    }

    /// Completions delivered after the session was released
    pub fn late_completions(&self) -> u64 {
        self.late_completions.load(Ordering::Acquire)
    }

    fn lock_readings(&self) -> MutexGuard<'_, Readings> {
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the counter and flag taken under the session lock
    pub fn readings(&self) -> Result<Readings> {
        self.ensure_usable()?;
        Ok(*self.lock_readings())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_usable() {
            Ok(())
        } else {
            Err(DriverError::StateInvalid("session detached"))
        }
    }

    fn ensure_attaching(&self) -> Result<()> {
        match self.state() {
            SessionState::Attaching => Ok(()),
            SessionState::Active => Err(DriverError::StateInvalid("session already started")),
            _ => Err(DriverError::StateInvalid("session detached during attach")),
        }
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discover the endpoint, configure the device and start the read loop
    ///
    /// Fails when the device configuration cannot be read, or with
    /// `StateInvalid` when the session is no longer attaching (started twice,
    /// or detached meanwhile). A missing endpoint leaves the session usable
    /// for commands but without a loop.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let config = self.transport.configuration().map_err(|e| {
            warn!("Device {}: can not read configuration: {}", self.id, e);
            DriverError::DeviceNotFound(format!("device {} has no configuration", self.id))
        })?;
        self.ensure_attaching()?;

        let endpoint = discover_endpoint(&config);
        match endpoint {
            Some(endpoint) => {
                debug!(
                    "Device {}: interrupt endpoint {:#04x} on interface {}",
                    self.id, endpoint.address, endpoint.interface
                );
                if self.endpoint.set(endpoint).is_err() {
                    warn!("Device {}: endpoint already set", self.id);
                    return Err(DriverError::StateInvalid("session already started"));
                }
            }
            None => warn!("Device {}: can not find suitable endpoint", self.id),
        }

        if let Err(e) = self.transport.apply_configuration(&config) {
            warn!("Device {}: can not set default configuration: {}", self.id, e);
        }

        self.ensure_attaching()?;
        self.send(Command::Mode(MODE_ANIMATION_ON));
        self.send(Command::Read);

        {
            let _lifecycle = self.lock_lifecycle();
            self.ensure_attaching()?;
            self.detected.store(endpoint.is_some(), Ordering::Release);
            self.state
                .store(SessionState::Active as u8, Ordering::Release);
        }

        self.arm();
        Ok(())
    }

    /// Change the animation flag and tell the device
    pub fn set_animation(&self, enabled: bool) -> Result<()> {
        self.ensure_usable()?;
        self.lock_readings().animation = enabled;
        debug!(
            "Device {}: animation {}",
            self.id,
            if enabled { "on" } else { "off" }
        );
        self.send(Command::animation(enabled));
        self.emit(UsbEvent::AnimationChanged {
            device_id: self.id,
            enabled,
        });
        Ok(())
    }

    /// Ask the device to adopt `value`
    ///
    /// The local counter is not touched; it follows the device once the
    /// write is acknowledged and read back.
    pub fn write_counter(&self, value: Bbu) -> Result<()> {
        self.ensure_usable()?;
        debug!("Device {}: write bbu {}", self.id, value);
        self.send(Command::Write(value));
        Ok(())
    }

    /// Best-effort command send; failures are logged and dropped
    fn send(&self, command: Command) {
        let frame = encode_command(&command);
        match self.transport.send_command(self.interface(), &frame) {
            Ok(()) => trace!("Device {}: sent {:?}", self.id, command),
            Err(e) => warn!("Device {}: {:?} failed: {}", self.id, command, e),
        }
    }

    fn emit(&self, event: UsbEvent) {
        if let Some(events) = &self.events
            && let Err(e) = events.try_send(event)
        {
            trace!("Device {}: event dropped: {}", self.id, e);
        }
    }

    /// Queue the next interrupt read if the loop is still allowed to run
    fn arm(self: &Arc<Self>) {
        let Some(endpoint) = self.endpoint() else {
            return;
        };
        if !self.is_detected() {
            return;
        }

        let session = Arc::downgrade(self);
        let result = self.transport.arm_interrupt_read(
            &endpoint,
            Box::new(move |status, data| match session.upgrade() {
                Some(session) => session.on_interrupt_complete(status, data),
                None => trace!("Completion for dropped session ignored"),
            }),
        );

        match result {
            Ok(()) => trace!("Device {}: interrupt read queued", self.id),
            Err(TransportError::Cancelled) => {
                debug!("Device {}: endpoint closed, read loop stopped", self.id)
            }
            Err(e) => warn!("Device {}: can not queue interrupt read: {}", self.id, e),
        }
    }

    fn on_interrupt_complete(self: &Arc<Self>, status: TransferStatus, data: &[u8]) {
        if self.state() == SessionState::Released {
            self.late_completions.fetch_add(1, Ordering::AcqRel);
            warn!("Device {}: completion after release ignored", self.id);
            return;
        }

        let requeue = match status {
            TransferStatus::Completed => {
                self.handle_notification(data);
                true
            }
            TransferStatus::Cancelled => {
                debug!("Device {}: interrupt read cancelled", self.id);
                false
            }
            TransferStatus::Failed(TransportError::Disconnected) => {
                debug!("Device {}: device gone, read loop stopped", self.id);
                false
            }
            TransferStatus::Failed(e) => {
                warn!("Device {}: interrupt read failed: {}", self.id, e);
                true
            }
        };

        if requeue {
            self.arm();
        }
    }

    fn handle_notification(&self, data: &[u8]) {
        trace!("Device {}: notification {:02x?}", self.id, data);

        match decode_notification(data) {
            Ok(Notification::Counter {
                source,
                value,
                terminated,
            }) => {
                self.lock_readings().bbu = value;
                if !terminated
                    && let Err(e) = protocol::check_terminator(data)
                {
                    warn!("Device {}: invalid bbu delta EOF: {}", self.id, e);
                }
                debug!("Device {}: bbu={} ({:?})", self.id, value, source);
                self.emit(UsbEvent::CounterUpdated {
                    device_id: self.id,
                    value,
                });
            }
            Ok(notification) if notification.is_write_ack() => {
                debug!("Device {}: write acknowledged, reading back", self.id);
                self.send(Command::Read);
            }
            Ok(other) => trace!("Device {}: ignoring {:?}", self.id, other),
            Err(e) => warn!("Device {}: dropping frame: {}", self.id, e),
        }
    }

    /// Stop the read loop and cancel the in-flight transfer
    ///
    /// Clears the detection flag before cancelling, so a completion racing
    /// with detach cannot queue another read. Returns once the transport
    /// guarantees no callback is running or will run.
    pub fn begin_detach(&self) -> Result<()> {
        {
            let _lifecycle = self.lock_lifecycle();
            self.state
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (SessionState::from_u8(current) < SessionState::Detaching)
                        .then_some(SessionState::Detaching as u8)
                })
                .map_err(|_| DriverError::StateInvalid("session already detaching"))?;
            self.detected.store(false, Ordering::Release);
        }

        if let Some(endpoint) = self.endpoint() {
            self.transport.cancel_pending(&endpoint);
        }
        debug!("Device {}: transfers flushed", self.id);
        Ok(())
    }

    /// Enter the terminal state
    pub fn mark_released(&self) {
        self.state
            .store(SessionState::Released as u8, Ordering::Release);
    }

    /// Listing snapshot
    pub fn summary(&self) -> DeviceSummary {
        let readings = *self.lock_readings();
        DeviceSummary {
            id: self.id,
            counter_name: self.names.counter.clone(),
            animation_name: self.names.animation.clone(),
            bbu: readings.bbu,
            animation: readings.animation,
            endpoint: self.endpoint(),
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("names", &self.names)
            .field("state", &self.state())
            .field("detected", &self.is_detected())
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        MockTransport, config_without_endpoint, read_result_frame, value_frame, write_ack_frame,
    };
    use protocol::opcode;

    fn session_with(mock: &Arc<MockTransport>) -> Arc<DeviceSession> {
        DeviceSession::new(
            DeviceId(7),
            SessionNames::new("misc/yurex", DeviceId(7)),
            mock.clone(),
            None,
        )
    }

    #[test]
    fn test_names() {
        let names = SessionNames::new("misc/yurex/", DeviceId(12));
        assert_eq!(names.counter, "misc/yurex/00000012/bbu");
        assert_eq!(names.animation, "misc/yurex/00000012/animation");
    }

    #[test]
    fn test_start_sends_mode_then_read_and_arms() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        assert_eq!(session.state(), SessionState::Attaching);

        session.start().unwrap();

        assert_eq!(session.state(), SessionState::Active);
        assert!(session.is_detected());
        assert_eq!(mock.applied_configuration(), Some(1));
        let frames = mock.sent_frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..3], &[opcode::MODE, 0x00, opcode::EOF]);
        assert_eq!(&frames[1][..2], &[opcode::READ, opcode::EOF]);
        assert!(mock.has_pending());
        assert!(session.readings().unwrap().animation);
    }

    #[test]
    fn test_start_without_endpoint_has_no_loop() {
        let mock = Arc::new(MockTransport::new(config_without_endpoint()));
        let session = session_with(&mock);
        session.start().unwrap();

        assert_eq!(session.state(), SessionState::Active);
        assert!(!session.is_detected());
        assert!(!mock.has_pending());
        assert_eq!(mock.sent_frames().len(), 2);
    }

    #[test]
    fn test_start_tolerates_configuration_and_command_failures() {
        let mock = Arc::new(MockTransport::yurex());
        mock.fail_apply(Some(TransportError::Stall));
        mock.fail_commands(Some(TransportError::Timeout));
        let session = session_with(&mock);

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert!(mock.has_pending());
        assert!(mock.sent_frames().is_empty());
    }

    #[test]
    fn test_start_fails_without_configuration() {
        let mock = Arc::new(MockTransport::unconfigured());
        let session = session_with(&mock);
        assert!(matches!(
            session.start(),
            Err(DriverError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_start_twice_rejected() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        session.start().unwrap();
        mock.clear_sent();

        assert!(matches!(
            session.start(),
            Err(DriverError::StateInvalid(_))
        ));
        assert!(mock.sent_frames().is_empty());
        assert_eq!(mock.arm_count(), 1);
        assert_eq!(session.state(), SessionState::Active);
    }

    #[test]
    fn test_start_after_detach_keeps_flag_cleared() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        session.begin_detach().unwrap();

        assert!(matches!(
            session.start(),
            Err(DriverError::StateInvalid(_))
        ));
        assert!(!session.is_detected());
        assert_eq!(session.state(), SessionState::Detaching);
        assert!(mock.sent_frames().is_empty());
        assert!(!mock.has_pending());
    }

    #[test]
    fn test_notifications_update_counter_and_requeue() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        session.start().unwrap();

        assert!(mock.complete(&value_frame(41)));
        assert_eq!(session.readings().unwrap().bbu.get(), 41);
        assert!(mock.complete(&read_result_frame(42)));
        assert_eq!(session.readings().unwrap().bbu.get(), 42);
        assert_eq!(mock.arm_count(), 3);
        assert!(mock.has_pending());
    }

    #[test]
    fn test_write_ack_triggers_read() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        session.start().unwrap();
        mock.clear_sent();

        session.write_counter(Bbu::new(100).unwrap()).unwrap();
        // Not trusted locally
        assert_eq!(session.readings().unwrap().bbu, Bbu::ZERO);

        mock.complete(&write_ack_frame());
        let frames = mock.sent_frames();
        assert_eq!(frames[0][0], opcode::WRITE);
        assert_eq!(frames[1][0], opcode::READ);

        mock.complete(&read_result_frame(100));
        assert_eq!(session.readings().unwrap().bbu.get(), 100);
    }

    #[test]
    fn test_failed_read_requeues_but_disconnect_stops() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        session.start().unwrap();

        mock.fail(TransportError::Stall);
        assert!(mock.has_pending());

        mock.fail(TransportError::Disconnected);
        assert!(!mock.has_pending());
    }

    #[test]
    fn test_unknown_and_short_frames_keep_loop_alive() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        session.start().unwrap();
        mock.complete(&value_frame(5));

        mock.complete(&[0x99, 1, 2, 3, 4, 5, 6, 7]);
        mock.complete(&[opcode::VALUE, 1]);
        assert_eq!(session.readings().unwrap().bbu.get(), 5);
        assert!(mock.has_pending());
    }

    #[test]
    fn test_detach_cancels_and_blocks_requeue() {
        let mock = Arc::new(MockTransport::yurex());
        let session = session_with(&mock);
        session.start().unwrap();

        session.begin_detach().unwrap();
        assert_eq!(session.state(), SessionState::Detaching);
        assert!(!session.is_detected());
        assert!(mock.is_cancelled());
        assert!(!mock.has_pending());
        assert!(!mock.complete(&value_frame(9)));

        assert!(matches!(
            session.readings(),
            Err(DriverError::StateInvalid(_))
        ));
        assert!(session.set_animation(false).is_err());
        assert!(session.begin_detach().is_err());

        session.mark_released();
        assert_eq!(session.state(), SessionState::Released);
        assert_eq!(session.late_completions(), 0);
    }

    #[test]
    fn test_events_published() {
        let (tx, rx) = async_channel::bounded(8);
        let mock = Arc::new(MockTransport::yurex());
        let session = DeviceSession::new(
            DeviceId(1),
            SessionNames::new("misc/yurex", DeviceId(1)),
            mock.clone(),
            Some(tx),
        );
        session.start().unwrap();
        mock.complete(&value_frame(3));
        session.set_animation(false).unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            UsbEvent::CounterUpdated {
                device_id: DeviceId(1),
                value: Bbu::new(3).unwrap()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            UsbEvent::AnimationChanged {
                device_id: DeviceId(1),
                enabled: false
            }
        );
    }
}
