//! Raw USB bulk transport.
//!
//! The [`Bulk`] trait is the byte pipe the protocol session drives; the
//! transaction framing itself lives in [`Session`](crate::Session).
//! [`UsbBulk`] is the libusb implementation that owns the device handle for
//! its whole lifetime.

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use failure::{Error, Fail, ResultExt};
use libusb::{Device, DeviceHandle, Direction, TransferType};
use log::{debug, trace};

/// Maximum bytes moved by a single bulk call. Related to the transfer
/// timeouts: the value is chosen so that a maximum-size transfer at slow
/// (*SoC*-specific) speeds of approx. *64 KiB/s* still completes within the
/// default timeout.
const AW_USB_MAX_BULK_SEND: usize = 512 * 1024;

/// A raw bulk endpoint pair.
///
/// Implementations only move bytes. Short reads are reported, not treated
/// as errors, because the session layer needs them to detect stray
/// envelopes.
pub trait Bulk {
    /// Sends `data` over the bulk OUT endpoint, returning the count sent.
    fn send(&mut self, data: &[u8], timeout: Duration) -> Result<usize, Error>;

    /// Receives into `buf` from the bulk IN endpoint, returning the count
    /// received.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error>;
}

/// Bulk endpoint pair of an opened USB device.
///
/// Claims interface 0 on creation and releases it when dropped, on every
/// exit path. On Linux, an interface held by the kernel driver is detached
/// first and reattached on drop.
pub struct UsbBulk<'h> {
    device_handle: DeviceHandle<'h>,
    endpoint_in: u8,
    endpoint_out: u8,
    iface_detached: bool,
}

impl<'h> fmt::Debug for UsbBulk<'h> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UsbBulk")
            .field("endpoint_in", &self.endpoint_in)
            .field("endpoint_out", &self.endpoint_out)
            .field("iface_detached", &self.iface_detached)
            .finish()
    }
}

impl<'h> UsbBulk<'h> {
    /// Opens the given device and claims its recovery interface.
    pub(crate) fn from_device(device: &Device<'h>) -> Result<UsbBulk<'h>, Error> {
        let mut bulk = UsbBulk {
            device_handle: device.open().context("unable to open device")?,
            endpoint_in: 0,
            endpoint_out: 0,
            iface_detached: false,
        };
        bulk.claim(device)?;
        Ok(bulk)
    }

    /// Claims interface 0, detaching the kernel driver if needed.
    fn claim(&mut self, device: &Device<'h>) -> Result<(), Error> {
        if let Err(e) = self.device_handle.claim_interface(0) {
            if cfg!(target_os = "linux") {
                self.device_handle
                    .detach_kernel_driver(0)
                    .context("unable to detach kernel driver")?;
                self.iface_detached = true;
                self.device_handle
                    .claim_interface(0)
                    .context("unable to claim device interface")?;
            } else {
                bail!(e.context("unable to claim device interface"));
            }
        }
        self.get_endpoints(device)
            .context("unable to get device endpoints")?;
        Ok(())
    }

    /// Locates the first bulk IN and first bulk OUT endpoints.
    fn get_endpoints(&mut self, device: &Device<'h>) -> Result<(), Error> {
        let config_descriptor = device
            .active_config_descriptor()
            .context("unable to get active config descriptor")?;
        let mut endpoint_in = None;
        let mut endpoint_out = None;
        for interface in config_descriptor.interfaces() {
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if let TransferType::Bulk = endpoint.transfer_type() {
                        match endpoint.direction() {
                            Direction::In => {
                                if endpoint_in.is_none() {
                                    endpoint_in = Some(endpoint.address());
                                }
                            }
                            Direction::Out => {
                                if endpoint_out.is_none() {
                                    endpoint_out = Some(endpoint.address());
                                }
                            }
                        }
                    }
                }
            }
        }
        self.endpoint_in =
            endpoint_in.ok_or_else(|| format_err!("the device has no bulk IN endpoint"))?;
        self.endpoint_out =
            endpoint_out.ok_or_else(|| format_err!("the device has no bulk OUT endpoint"))?;
        debug!(
            "claimed interface 0, endpoints {:#04x} (in) / {:#04x} (out)",
            self.endpoint_in, self.endpoint_out
        );
        Ok(())
    }
}

impl<'h> Bulk for UsbBulk<'h> {
    fn send(&mut self, data: &[u8], timeout: Duration) -> Result<usize, Error> {
        let mut sent = 0;
        while sent < data.len() {
            let slice = if data.len() - sent < AW_USB_MAX_BULK_SEND {
                &data[sent..]
            } else {
                &data[sent..sent + AW_USB_MAX_BULK_SEND]
            };
            sent += self
                .device_handle
                .write_bulk(self.endpoint_out, slice, timeout)
                .with_context(|_| {
                    format!("unable to send data chunk to USB, sent {} bytes", sent)
                })?;
        }
        trace!("bulk out: {} bytes", sent);
        Ok(sent)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Error> {
        let received = self
            .device_handle
            .read_bulk(self.endpoint_in, buf, timeout)
            .context("unable to receive data in bulk from USB")?;
        trace!("bulk in: {} of {} bytes", received, buf.len());
        Ok(received)
    }
}

impl<'h> Drop for UsbBulk<'h> {
    fn drop(&mut self) {
        if let Err(e) = self.device_handle.release_interface(0) {
            let _ = writeln!(
                io::stderr(),
                "error releasing device handle interface: {}",
                e
            );
        }
        if cfg!(target_os = "linux") && self.iface_detached {
            if let Err(e) = self.device_handle.attach_kernel_driver(0) {
                let _ = writeln!(io::stderr(), "error attaching kernel driver: {}", e);
            }
        }
    }
}
