//! Test utilities for rust-yurex
//!
//! Provides an in-memory [`Transport`] and frame/descriptor builders for
//! testing across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockTransport, value_frame};
//! use common::{Transport, TransferStatus, discover_endpoint};
//! use std::sync::{Arc, Mutex};
//!
//! let mock = MockTransport::yurex();
//! let endpoint = discover_endpoint(&mock.configuration().unwrap()).unwrap();
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! mock.arm_interrupt_read(
//!     &endpoint,
//!     Box::new(move |status, data| {
//!         assert_eq!(status, TransferStatus::Completed);
//!         sink.lock().unwrap().extend_from_slice(data);
//!     }),
//! )
//! .unwrap();
//!
//! assert!(mock.complete(&value_frame(5)));
//! assert_eq!(seen.lock().unwrap().len(), 8);
//! ```

use crate::error::TransportError;
use crate::transport::{CompletionFn, TransferStatus, Transport};
use crate::usb_types::{
    ConfigDescriptor, DiscoveredEndpoint, EndpointDescriptor, EndpointKind, HID_BOOT_SUBCLASS,
    HID_CLASS, InterfaceDescriptor,
};
use protocol::{Bbu, Command, FRAME_LEN, Frame, encode_command, opcode};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Address of the notification endpoint in [`yurex_config`]
pub const MOCK_ENDPOINT: u8 = 0x81;

/// Descriptor of a YUREX: one HID interface with an 8-byte interrupt IN endpoint
pub fn yurex_config() -> ConfigDescriptor {
    ConfigDescriptor {
        value: 1,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            class: HID_CLASS,
            sub_class: HID_BOOT_SUBCLASS,
            active: Some(vec![EndpointDescriptor {
                address: MOCK_ENDPOINT,
                kind: EndpointKind::Interrupt,
                max_packet_size: FRAME_LEN as u16,
            }]),
        }],
    }
}

/// Descriptor with no usable notification endpoint
pub fn config_without_endpoint() -> ConfigDescriptor {
    ConfigDescriptor {
        value: 1,
        interfaces: vec![InterfaceDescriptor {
            number: 0,
            class: HID_CLASS,
            sub_class: HID_BOOT_SUBCLASS,
            active: Some(vec![EndpointDescriptor {
                address: MOCK_ENDPOINT,
                kind: EndpointKind::Interrupt,
                max_packet_size: 64,
            }]),
        }],
    }
}

/// VALUE notification carrying `value` (low 40 bits)
pub fn value_frame(value: u64) -> Frame {
    counter_frame(opcode::VALUE, value)
}

/// READ result notification carrying `value` (low 40 bits)
pub fn read_result_frame(value: u64) -> Frame {
    counter_frame(opcode::READ, value)
}

/// ACK of a WRITE command
pub fn write_ack_frame() -> Frame {
    let mut frame = [opcode::PADDING; FRAME_LEN];
    frame[0] = opcode::ACK;
    frame[1] = opcode::WRITE;
    frame[2] = opcode::EOF;
    frame
}

fn counter_frame(op: u8, value: u64) -> Frame {
    let mut frame = encode_command(&Command::Write(Bbu::truncate(value)));
    frame[0] = op;
    frame
}

#[derive(Default)]
struct MockState {
    sent: Vec<(u8, Frame)>,
    pending: Option<(DiscoveredEndpoint, CompletionFn)>,
    cancelled: bool,
    applied: Option<u8>,
    arm_count: usize,
    command_failure: Option<TransportError>,
    apply_failure: Option<TransportError>,
    arm_failure: Option<TransportError>,
}

/// In-memory transport
///
/// Records every command frame, holds at most one pending interrupt callback
/// and lets tests complete or fail it from any thread. Cancellation waits for
/// a callback that is currently running before returning.
pub struct MockTransport {
    config: Result<ConfigDescriptor, TransportError>,
    state: Mutex<MockState>,
    /// Held while a completion callback runs
    callback_gate: Mutex<()>,
}

impl MockTransport {
    /// Transport reporting `config` as the first configuration
    pub fn new(config: ConfigDescriptor) -> Self {
        Self {
            config: Ok(config),
            state: Mutex::new(MockState::default()),
            callback_gate: Mutex::new(()),
        }
    }

    /// Transport for a regular YUREX
    pub fn yurex() -> Self {
        Self::new(yurex_config())
    }

    /// Transport whose configuration cannot be read
    pub fn unconfigured() -> Self {
        Self {
            config: Err(TransportError::NotConfigured),
            state: Mutex::new(MockState::default()),
            callback_gate: Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, status: TransferStatus, data: &[u8]) -> bool {
        let _gate = self
            .callback_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let pending = self.state().pending.take();
        match pending {
            Some((_, callback)) => {
                callback(status, data);
                true
            }
            None => false,
        }
    }

    /// Complete the pending interrupt read with `data`
    ///
    /// Returns false if no read was pending.
    pub fn complete(&self, data: &[u8]) -> bool {
        self.deliver(TransferStatus::Completed, data)
    }

    /// Fail the pending interrupt read
    pub fn fail(&self, error: TransportError) -> bool {
        self.deliver(TransferStatus::Failed(error), &[])
    }

    /// Frames sent so far, oldest first
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.state().sent.iter().map(|(_, frame)| *frame).collect()
    }

    /// Frames sent so far with the interface they were addressed to
    pub fn sent(&self) -> Vec<(u8, Frame)> {
        self.state().sent.clone()
    }

    /// Forget recorded frames
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// True while an interrupt read is queued
    pub fn has_pending(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Number of interrupt reads queued so far
    pub fn arm_count(&self) -> usize {
        self.state().arm_count
    }

    /// True once the endpoint has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.state().cancelled
    }

    /// Configuration value applied through the transport, if any
    pub fn applied_configuration(&self) -> Option<u8> {
        self.state().applied
    }

    /// Make every following command send fail with `error`
    pub fn fail_commands(&self, error: Option<TransportError>) {
        self.state().command_failure = error;
    }

    /// Make applying a configuration fail with `error`
    pub fn fail_apply(&self, error: Option<TransportError>) {
        self.state().apply_failure = error;
    }

    /// Make queueing interrupt reads fail with `error`
    pub fn fail_arm(&self, error: Option<TransportError>) {
        self.state().arm_failure = error;
    }
}

impl Transport for MockTransport {
    fn configuration(&self) -> Result<ConfigDescriptor, TransportError> {
        self.config.clone()
    }

    fn apply_configuration(&self, config: &ConfigDescriptor) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(error) = state.apply_failure.clone() {
            return Err(error);
        }
        state.applied = Some(config.value);
        Ok(())
    }

    fn send_command(&self, interface: u8, frame: &Frame) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(error) = state.command_failure.clone() {
            return Err(error);
        }
        state.sent.push((interface, *frame));
        Ok(())
    }

    fn arm_interrupt_read(
        &self,
        endpoint: &DiscoveredEndpoint,
        on_complete: CompletionFn,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.cancelled {
            return Err(TransportError::Cancelled);
        }
        if let Some(error) = state.arm_failure.clone() {
            return Err(error);
        }
        if state.pending.is_some() {
            return Err(TransportError::Busy {
                endpoint: endpoint.address,
            });
        }
        state.pending = Some((*endpoint, on_complete));
        state.arm_count += 1;
        Ok(())
    }

    fn cancel_pending(&self, _endpoint: &DiscoveredEndpoint) {
        let pending = {
            let mut state = self.state();
            state.cancelled = true;
            state.pending.take()
        };

        // Wait for a callback running on another thread
        let _gate = self
            .callback_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((_, callback)) = pending {
            callback(TransferStatus::Cancelled, &[]);
        }
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
