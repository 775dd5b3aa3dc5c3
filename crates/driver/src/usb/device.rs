//! rusb descriptor and interface helpers
//!
//! Converts rusb descriptors into the transport-independent model used by
//! endpoint discovery, and claims/releases interfaces around a session.

use super::transport::map_rusb_error;
use common::{ConfigDescriptor, EndpointDescriptor, EndpointKind, InterfaceDescriptor, TransportError};
use rusb::{Context, Device, DeviceHandle};
use tracing::{debug, warn};

/// Read the first configuration of `device`
pub fn read_configuration(device: &Device<Context>) -> Result<ConfigDescriptor, TransportError> {
    let config = device.config_descriptor(0).map_err(map_rusb_error)?;
    Ok(convert_config(&config))
}

fn convert_config(config: &rusb::ConfigDescriptor) -> ConfigDescriptor {
    ConfigDescriptor {
        value: config.number(),
        interfaces: config
            .interfaces()
            .map(|interface| {
                // libusb does not report the selected alternate setting;
                // setting 0 is active after configuration
                let setting = interface.descriptors().next();
                InterfaceDescriptor {
                    number: interface.number(),
                    class: setting.as_ref().map_or(0, |s| s.class_code()),
                    sub_class: setting.as_ref().map_or(0, |s| s.sub_class_code()),
                    active: setting.map(|setting| {
                        setting
                            .endpoint_descriptors()
                            .map(|ep| EndpointDescriptor {
                                address: ep.address(),
                                kind: map_transfer_type(ep.transfer_type()),
                                max_packet_size: ep.max_packet_size(),
                            })
                            .collect()
                    }),
                }
            })
            .collect(),
    }
}

/// Map rusb transfer type to the descriptor model
fn map_transfer_type(kind: rusb::TransferType) -> EndpointKind {
    match kind {
        rusb::TransferType::Control => EndpointKind::Control,
        rusb::TransferType::Isochronous => EndpointKind::Isochronous,
        rusb::TransferType::Bulk => EndpointKind::Bulk,
        rusb::TransferType::Interrupt => EndpointKind::Interrupt,
    }
}

/// Detach kernel drivers and claim the HID boot interfaces of `config`
///
/// Other interfaces are left to their drivers. Returns the interfaces
/// actually claimed. Failures are logged and the interface skipped; a YUREX
/// remains usable for commands without a claim.
pub fn claim_interfaces(handle: &DeviceHandle<Context>, config: &ConfigDescriptor) -> Vec<u8> {
    let mut claimed = Vec::new();

    for interface in config.interfaces.iter().filter(|i| i.is_hid_boot()) {
        let number = interface.number;

        match handle.kernel_driver_active(number) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", number);
                if let Err(e) = handle.detach_kernel_driver(number) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        number, e
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    number, e
                );
            }
        }

        match handle.claim_interface(number) {
            Ok(()) => {
                debug!("Claimed interface {}", number);
                claimed.push(number);
            }
            Err(e) => warn!("Failed to claim interface {}: {}", number, e),
        }
    }

    claimed
}

/// Release claimed interfaces and hand them back to the kernel
pub fn release_interfaces(handle: &DeviceHandle<Context>, interfaces: &[u8]) {
    for &interface in interfaces {
        if let Err(e) = handle.release_interface(interface) {
            debug!("Failed to release interface {}: {}", interface, e);
        }

        if let Err(e) = handle.attach_kernel_driver(interface) {
            debug!(
                "Could not reattach kernel driver to interface {} (may not have been detached): {}",
                interface, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_transfer_type() {
        assert_eq!(
            map_transfer_type(rusb::TransferType::Interrupt),
            EndpointKind::Interrupt
        );
        assert_eq!(map_transfer_type(rusb::TransferType::Bulk), EndpointKind::Bulk);
        assert_eq!(
            map_transfer_type(rusb::TransferType::Control),
            EndpointKind::Control
        );
        assert_eq!(
            map_transfer_type(rusb::TransferType::Isochronous),
            EndpointKind::Isochronous
        );
    }
}
