//! USB type abstractions and utilities
//!
//! A transport-independent model of the descriptors the driver inspects,
//! plus endpoint discovery over that model.

use protocol::{Bbu, FRAME_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Microdia vendor ID
pub const YUREX_VENDOR_ID: u16 = 0x0c45;

/// YUREX product ID
pub const YUREX_PRODUCT_ID: u16 = 0x1010;

/// Interface class of a YUREX (HID)
pub const HID_CLASS: u8 = 0x03;

/// Interface subclass of a YUREX (HID boot)
pub const HID_BOOT_SUBCLASS: u8 = 0x01;

/// Direction bit of an endpoint address
pub const ENDPOINT_DIR_IN: u8 = 0x80;

/// True for the YUREX vendor/product pair
pub fn is_yurex(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == YUREX_VENDOR_ID && product_id == YUREX_PRODUCT_ID
}

/// Host-assigned identifier of an attached device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Endpoint descriptor fields the driver cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint address including the direction bit
    pub address: u8,
    pub kind: EndpointKind,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// True for device-to-host endpoints
    pub fn is_in(&self) -> bool {
        self.address & ENDPOINT_DIR_IN != 0
    }
}

/// One interface of a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub number: u8,
    /// bInterfaceClass of alternate setting 0
    pub class: u8,
    /// bInterfaceSubClass of alternate setting 0
    pub sub_class: u8,
    /// Endpoints of the active alternate setting, `None` if no setting is active
    pub active: Option<Vec<EndpointDescriptor>>,
}

impl InterfaceDescriptor {
    pub fn is_hid_boot(&self) -> bool {
        self.class == HID_CLASS && self.sub_class == HID_BOOT_SUBCLASS
    }
}

/// A device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDescriptor {
    /// bConfigurationValue
    pub value: u8,
    pub interfaces: Vec<InterfaceDescriptor>,
}

impl ConfigDescriptor {
    /// True if some interface is a HID boot interface
    pub fn has_hid_boot_interface(&self) -> bool {
        self.interfaces.iter().any(InterfaceDescriptor::is_hid_boot)
    }
}

/// The interrupt IN endpoint that carries device notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpoint {
    /// Interface the endpoint belongs to; commands are addressed here
    pub interface: u8,
    /// Endpoint address (pipe handle for the transport)
    pub address: u8,
}

/// Find the notification endpoint of a configuration
///
/// Scans interfaces, then the endpoints of each active setting, in listed
/// order and returns the first interrupt IN endpoint whose max packet size is
/// exactly one frame.
pub fn discover_endpoint(config: &ConfigDescriptor) -> Option<DiscoveredEndpoint> {
    config.interfaces.iter().find_map(|interface| {
        interface
            .active
            .as_ref()?
            .iter()
            .find(|ep| {
                ep.kind == EndpointKind::Interrupt
                    && ep.is_in()
                    && usize::from(ep.max_packet_size) == FRAME_LEN
            })
            .map(|ep| DiscoveredEndpoint {
                interface: interface.number,
                address: ep.address,
            })
    })
}

/// Snapshot of an attached device for listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub counter_name: String,
    pub animation_name: String,
    pub bbu: Bbu,
    pub animation: bool,
    pub endpoint: Option<DiscoveredEndpoint>,
}
