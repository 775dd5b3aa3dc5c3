//! Transport capability the driver core runs on
//!
//! The core never talks to a USB stack directly. It sends commands, queues
//! interrupt reads and cancels them through this trait, which is implemented
//! over rusb by the driver and in memory by [`crate::test_utils::MockTransport`].

use crate::error::TransportError;
use crate::usb_types::{ConfigDescriptor, DiscoveredEndpoint};
use protocol::Frame;

/// Outcome of a queued interrupt transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Data arrived
    Completed,
    /// The transfer was cancelled before data arrived
    Cancelled,
    /// The transfer failed
    Failed(TransportError),
}

/// Completion callback for an interrupt read
///
/// Invoked exactly once with the status and the bytes received (empty unless
/// the transfer completed).
pub type CompletionFn = Box<dyn FnOnce(TransferStatus, &[u8]) + Send + 'static>;

/// USB transport for one device
pub trait Transport: Send + Sync {
    /// First configuration of the device
    fn configuration(&self) -> Result<ConfigDescriptor, TransportError>;

    /// Make `config` the active configuration
    fn apply_configuration(&self, config: &ConfigDescriptor) -> Result<(), TransportError>;

    /// Send a frame as a HID SET_REPORT (output report) on `interface`
    fn send_command(&self, interface: u8, frame: &Frame) -> Result<(), TransportError>;

    /// Queue one interrupt IN transfer of one frame on `endpoint`
    ///
    /// At most one transfer may be in flight per endpoint; a second request
    /// fails with [`TransportError::Busy`]. After [`Transport::cancel_pending`]
    /// the endpoint refuses new transfers with [`TransportError::Cancelled`].
    fn arm_interrupt_read(
        &self,
        endpoint: &DiscoveredEndpoint,
        on_complete: CompletionFn,
    ) -> Result<(), TransportError>;

    /// Cancel any queued transfer on `endpoint` and close it
    ///
    /// Returns only once the pending callback has run (with
    /// [`TransferStatus::Cancelled`] if it had not completed yet) and no
    /// further callback can start.
    fn cancel_pending(&self, endpoint: &DiscoveredEndpoint);
}
