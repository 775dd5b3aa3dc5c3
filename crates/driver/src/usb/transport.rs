//! rusb implementation of [`Transport`]
//!
//! rusb only offers blocking transfers, so each interrupt endpoint gets a
//! pipe thread. Arming hands the completion callback to the thread through
//! a single-slot channel; the thread polls `read_interrupt` with a short
//! timeout so cancellation is noticed within one poll interval.

use super::device::{claim_interfaces, read_configuration, release_interfaces};
use crate::config::UsbSettings;
use async_channel::{Receiver, Sender, TrySendError};
use common::{
    CompletionFn, ConfigDescriptor, DiscoveredEndpoint, TransferStatus, Transport, TransportError,
};
use protocol::{FRAME_LEN, Frame};
use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// HID class request SET_REPORT
const HID_SET_REPORT: u8 = 0x09;
/// Report type "output" in the high byte of wValue
const HID_REPORT_OUTPUT: u16 = 0x02;

/// Map rusb errors to transport errors
pub fn map_rusb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::NoDevice => TransportError::Disconnected,
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe => TransportError::Stall,
        rusb::Error::NotFound => TransportError::NotConfigured,
        _ => TransportError::Usb(err.to_string()),
    }
}

/// Blocking reader servicing one interrupt IN endpoint
struct InterruptPipe {
    endpoint: u8,
    requests: Sender<CompletionFn>,
    /// Set while a request is queued or being serviced
    in_flight: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InterruptPipe {
    fn spawn(
        handle: Arc<DeviceHandle<Context>>,
        endpoint: u8,
        poll: Duration,
    ) -> Result<Self, TransportError> {
        let (requests, rx) = async_channel::bounded(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let cancelled = Arc::new(AtomicBool::new(false));

        let thread = {
            let in_flight = in_flight.clone();
            let cancelled = cancelled.clone();
            thread::Builder::new()
                .name(format!("yurex-ep{:02x}", endpoint))
                .spawn(move || run_pipe(handle, endpoint, poll, rx, in_flight, cancelled))
                .map_err(|e| TransportError::Usb(format!("failed to spawn pipe thread: {}", e)))?
        };

        debug!("Interrupt pipe started on endpoint {:#04x}", endpoint);
        Ok(Self {
            endpoint,
            requests,
            in_flight,
            cancelled,
            thread: Some(thread),
        })
    }

    fn submit(&self, on_complete: CompletionFn) -> Result<(), TransportError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(TransportError::Cancelled);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::Busy {
                endpoint: self.endpoint,
            });
        }

        self.requests.try_send(on_complete).map_err(|e| {
            self.in_flight.store(false, Ordering::Release);
            match e {
                TrySendError::Full(_) => TransportError::Busy {
                    endpoint: self.endpoint,
                },
                TrySendError::Closed(_) => TransportError::Cancelled,
            }
        })
    }

    /// Stop accepting requests; the thread drains what is queued
    fn close(&mut self) -> Option<JoinHandle<()>> {
        self.cancelled.store(true, Ordering::Release);
        self.requests.close();
        self.thread.take()
    }
}

fn run_pipe(
    handle: Arc<DeviceHandle<Context>>,
    endpoint: u8,
    poll: Duration,
    requests: Receiver<CompletionFn>,
    in_flight: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
) {
    while let Ok(on_complete) = requests.recv_blocking() {
        let mut buf: Frame = [0; FRAME_LEN];

        let (status, len) = loop {
            if cancelled.load(Ordering::Acquire) {
                break (TransferStatus::Cancelled, 0);
            }
            match handle.read_interrupt(endpoint, &mut buf, poll) {
                Ok(len) => break (TransferStatus::Completed, len),
                Err(rusb::Error::Timeout) => continue,
                Err(e) => {
                    let error = map_rusb_error(e);
                    if error != TransportError::Disconnected {
                        // Keep a persistent fault from spinning the re-arm loop
                        thread::sleep(poll);
                    }
                    break (TransferStatus::Failed(error), 0);
                }
            }
        };

        trace!("Endpoint {:#04x}: {:?} ({} bytes)", endpoint, status, len);
        in_flight.store(false, Ordering::Release);
        on_complete(status, &buf[..len]);
    }

    debug!("Interrupt pipe on endpoint {:#04x} stopped", endpoint);
}

/// Transport for one opened YUREX
pub struct RusbTransport {
    device: Device<Context>,
    handle: Arc<DeviceHandle<Context>>,
    claimed: Mutex<Vec<u8>>,
    pipe: Mutex<Option<InterruptPipe>>,
    closed: AtomicBool,
    control_timeout: Duration,
    poll: Duration,
}

impl RusbTransport {
    /// Open `device`
    pub fn open(device: Device<Context>, settings: &UsbSettings) -> Result<Self, TransportError> {
        let handle = device.open().map_err(map_rusb_error)?;
        debug!(
            "Opened device: bus={}, addr={}",
            device.bus_number(),
            device.address()
        );

        Ok(Self {
            device,
            handle: Arc::new(handle),
            claimed: Mutex::new(Vec::new()),
            pipe: Mutex::new(None),
            closed: AtomicBool::new(false),
            control_timeout: settings.control_timeout(),
            poll: settings.interrupt_poll(),
        })
    }

    /// (bus, address) of the device
    pub fn location(&self) -> (u8, u8) {
        (self.device.bus_number(), self.device.address())
    }

    fn lock_pipe(&self) -> MutexGuard<'_, Option<InterruptPipe>> {
        self.pipe.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the pipe and wait for its thread
    fn shutdown_pipe(&self) {
        self.closed.store(true, Ordering::Release);

        // Joined outside the lock: the final callback may try to re-arm
        let thread = self.lock_pipe().as_mut().and_then(InterruptPipe::close);
        let Some(thread) = thread else {
            return;
        };

        if thread.thread().id() == thread::current().id() {
            warn!("Interrupt pipe cancelled from its own callback; not joining");
            return;
        }
        if thread.join().is_err() {
            warn!("Interrupt pipe thread panicked");
        }
    }
}

impl Transport for RusbTransport {
    fn configuration(&self) -> Result<ConfigDescriptor, TransportError> {
        read_configuration(&self.device)
    }

    fn apply_configuration(&self, config: &ConfigDescriptor) -> Result<(), TransportError> {
        let result = match self.handle.active_configuration() {
            Ok(active) if active == config.value => Ok(()),
            _ => self
                .handle
                .set_active_configuration(config.value)
                .map_err(map_rusb_error),
        };

        let claimed = claim_interfaces(&self.handle, config);
        *self.claimed.lock().unwrap_or_else(PoisonError::into_inner) = claimed;
        result
    }

    fn send_command(&self, interface: u8, frame: &Frame) -> Result<(), TransportError> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Class, Recipient::Interface);
        self.handle
            .write_control(
                request_type,
                HID_SET_REPORT,
                HID_REPORT_OUTPUT << 8,
                u16::from(interface),
                frame,
                self.control_timeout,
            )
            .map(|_| ())
            .map_err(map_rusb_error)
    }

    fn arm_interrupt_read(
        &self,
        endpoint: &DiscoveredEndpoint,
        on_complete: CompletionFn,
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Cancelled);
        }

        let mut pipe = self.lock_pipe();
        if pipe.is_none() {
            *pipe = Some(InterruptPipe::spawn(
                self.handle.clone(),
                endpoint.address,
                self.poll,
            )?);
        }

        match pipe.as_ref() {
            Some(pipe) if pipe.endpoint == endpoint.address => pipe.submit(on_complete),
            Some(pipe) => Err(TransportError::Usb(format!(
                "endpoint {:#04x} is not the interrupt pipe ({:#04x})",
                endpoint.address, pipe.endpoint
            ))),
            None => Err(TransportError::Cancelled),
        }
    }

    fn cancel_pending(&self, endpoint: &DiscoveredEndpoint) {
        debug!("Cancelling transfers on endpoint {:#04x}", endpoint.address);
        self.shutdown_pipe();
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        self.shutdown_pipe();

        let claimed = std::mem::take(self.claimed.get_mut().unwrap_or_else(PoisonError::into_inner));
        release_interfaces(&self.handle, &claimed);
        debug!(
            "Closed device: bus={}, addr={}",
            self.device.bus_number(),
            self.device.address()
        );
    }
}
