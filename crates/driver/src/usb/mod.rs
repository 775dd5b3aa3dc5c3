//! USB subsystem
//!
//! Runs the driver against real hardware through rusb:
//! - descriptor conversion and interface claiming
//! - the [`common::Transport`] implementation with one pipe thread per
//!   interrupt endpoint
//! - enumeration and hot-plug detection feeding the driver's attach and
//!   detach hooks
//!
//! Everything here runs on a dedicated worker thread so the Tokio runtime
//! never blocks on libusb.

pub mod device;
pub mod manager;
pub mod transport;
pub mod worker;

pub use manager::DeviceManager;
pub use transport::{RusbTransport, map_rusb_error};
pub use worker::{UsbWorkerThread, spawn_usb_worker};
