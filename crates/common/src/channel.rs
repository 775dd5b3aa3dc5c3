//! Async channel bridge between Tokio runtime and USB thread

use crate::usb_types::{DeviceId, DeviceSummary};
use async_channel::{Receiver, Sender, bounded};
use protocol::Bbu;

/// Commands from Tokio runtime to USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// List attached devices
    ListDevices {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<DeviceSummary>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Events raised by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsbEvent {
    /// A device was attached and its names published
    DeviceAttached {
        device_id: DeviceId,
        counter_name: String,
        animation_name: String,
    },

    /// A device was removed
    DeviceDetached { device_id: DeviceId },

    /// The device reported a counter value
    CounterUpdated { device_id: DeviceId, value: Bbu },

    /// The animation flag was changed through the animation view
    AnimationChanged { device_id: DeviceId, enabled: bool },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
    event_rx: Receiver<UsbEvent>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for USB thread (blocking)
pub struct UsbWorker {
    pub(crate) cmd_rx: Receiver<UsbCommand>,
    /// Event sender (public so the driver can publish from callbacks)
    pub event_tx: Sender<UsbEvent>,
}

impl UsbWorker {
    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// True once every [`UsbBridge`] has been dropped
    pub fn is_closed(&self) -> bool {
        self.cmd_rx.is_closed()
    }
}

/// Create the channel bridge between Tokio and USB thread
///
/// Returns (UsbBridge for Tokio, UsbWorker for USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(256);
    let (event_tx, event_rx) = bounded(256);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_bridge() {
        let (bridge, worker) = create_usb_bridge();

        // Send command from async context
        let (tx, _rx) = tokio::sync::oneshot::channel();
        bridge
            .send_command(UsbCommand::ListDevices { response: tx })
            .await
            .unwrap();

        assert!(matches!(
            worker.try_recv_command(),
            Some(UsbCommand::ListDevices { .. })
        ));
        assert!(worker.try_recv_command().is_none());
    }

    #[test]
    fn test_worker_sees_closed_bridge() {
        let (bridge, worker) = create_usb_bridge();
        assert!(!worker.is_closed());
        drop(bridge);
        assert!(worker.is_closed());
    }

    #[tokio::test]
    async fn test_event_from_worker() {
        let (bridge, worker) = create_usb_bridge();

        std::thread::spawn(move || {
            worker
                .event_tx
                .send_blocking(UsbEvent::DeviceDetached {
                    device_id: DeviceId(3),
                })
                .unwrap();
        });

        let event = bridge.recv_event().await.unwrap();
        assert_eq!(
            event,
            UsbEvent::DeviceDetached {
                device_id: DeviceId(3)
            }
        );
    }
}
