//! YUREX driver core
//!
//! Drives YUREX "BBU" counters: each attached device publishes a counter
//! view and an animation view, configures itself on attach and keeps an
//! interrupt read armed for the notifications the device pushes. The core
//! runs on any [`common::Transport`]; [`usb`] provides the rusb one.

pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod registry;
pub mod session;
pub mod usb;

pub use config::{DriverConfig, DriverSettings, UsbSettings};
pub use driver::{Driver, SessionCookie};
pub use error::{DriverError, Result};
pub use handle::{SessionHandle, View};
pub use registry::Registry;
pub use session::{DeviceSession, Readings, SessionNames, SessionState};
