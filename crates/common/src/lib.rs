//! Common utilities for rust-yurex
//!
//! This crate provides what the driver core and its hosts share: the USB
//! descriptor model and endpoint discovery, the [`Transport`] capability,
//! error handling, logging setup and the async channel bridge for USB
//! thread communication.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod transport;
pub mod usb_types;

pub use channel::{UsbBridge, UsbCommand, UsbEvent, UsbWorker, create_usb_bridge};
pub use error::{Error, Result, TransportError};
pub use logging::setup_logging;
pub use transport::{CompletionFn, TransferStatus, Transport};
pub use usb_types::{
    ConfigDescriptor, DeviceId, DeviceSummary, DiscoveredEndpoint, EndpointDescriptor,
    EndpointKind, HID_BOOT_SUBCLASS, HID_CLASS, InterfaceDescriptor, YUREX_PRODUCT_ID,
    YUREX_VENDOR_ID, discover_endpoint, is_yurex,
};
