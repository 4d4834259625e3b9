//! Allwinner FEL/FES USB recovery protocol client.
//!
//! Allwinner ARM SoCs expose a ROM-level USB recovery mode (*FEL*) and,
//! once a DRAM initializer has been uploaded and executed, a storage-aware
//! secondary mode (*FES*). Both speak the same bulk transaction framing
//! over a single bulk endpoint pair; this crate implements that framing
//! and the command primitives layered on top of it: device identification,
//! arbitrary memory reads and writes, code execution, MBR programming,
//! storage driver control and the media-aware `RW_TRANSMITE` transfers.
//!
//! A [`Fel`] context enumerates devices; each opened device is driven
//! through a [`Session`], which exclusively owns the USB handle until it
//! is dropped.

#![forbid(anonymous_parameters)]
#![deny(
    variant_size_differences,
    unused_results,
    unused_qualifications,
    unused_import_braces,
    unsafe_code,
    trivial_numeric_casts,
    trivial_casts,
    missing_docs,
    unused_extern_crates,
    missing_debug_implementations,
    missing_copy_implementations
)]

#[macro_use]
extern crate failure;

use std::fmt;

use failure::{Error, ResultExt};

mod session;
mod transport;
mod wire;

pub use crate::session::{NullReporter, Operation, Reporter, Session};
pub use crate::transport::{Bulk, UsbBulk};
pub use crate::wire::{
    AwFelMessage, AwFelStandardRequest, AwFelStatusResponse, AwFelVerifyDeviceResponse,
    AwFesTransmiteRequest, AwFesVerifyStatusResponse, AwUsbRequest, AwUsbResponse, DeviceMode,
    FelCmd, FesCmd, MediaIndex, Mode, Tag, Tags, VERIFY_STATUS_FLAGS,
};

/// Allwinner FEL device USB vendor ID.
pub const AW_VENDOR_ID: u16 = 0x1f3a;
/// Allwinner FEL device USB product ID.
pub const AW_PRODUCT_ID: u16 = 0xefe8;
/// Protocol-imposed maximum single-transfer payload, in bytes.
pub const MAX_CHUNK: usize = 65_536;
/// Exact size of the sunxi MBR image, in bytes.
pub const MBR_SIZE: usize = 65_536;

/// FEL/FES protocol errors.
#[derive(Debug, Fail, PartialEq)]
pub enum ProtocolError {
    /// A bulk-in returned fewer bytes than requested and resynchronization
    /// did not recover.
    #[fail(
        display = "short transfer: expected {} bytes, received {}",
        expected, got
    )]
    TransportShort {
        /// Bytes requested.
        expected: usize,
        /// Bytes actually received.
        got: usize,
    },
    /// A response arrived without its expected magic.
    #[fail(display = "invalid response: expected '{}', found '{}'", expected, found)]
    BadEnvelope {
        /// Expected magic string.
        expected: &'static str,
        /// Bytes found in its place.
        found: String,
    },
    /// The closing envelope carried a non-zero transport status.
    #[fail(display = "bulk transaction failed with CSW status {:#04x}", status)]
    CswStatus {
        /// Reported transport status.
        status: u8,
    },
    /// The status record closing a logical command reported failure.
    #[fail(display = "command failed with state {:#04x}", state)]
    CommandFailed {
        /// Reported state; zero means success.
        state: u8,
    },
    /// A verification reply reported a non-zero CRC.
    #[fail(
        display = "verification failed: CRC {:#010x}, last error {}",
        crc, last_error
    )]
    VerifyFailed {
        /// Reported CRC.
        crc: u32,
        /// Device-side error code, `-1` on failure.
        last_error: i32,
    },
    /// An operation was invoked with invalid arguments.
    #[fail(display = "{}", msg)]
    BadArgument {
        /// Description of the offending argument.
        msg: String,
    },
    /// A multi-chunk transfer failed part-way through.
    #[fail(display = "transfer aborted after {} of {} bytes", done, total)]
    Aborted {
        /// Bytes fully transferred before the failure.
        done: usize,
        /// Bytes the transfer was meant to move.
        total: usize,
    },
}

/// Allwinner FEL/FES devices context.
pub struct Fel {
    context: libusb::Context,
}

impl fmt::Debug for Fel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Fel").finish()
    }
}

impl Fel {
    /// Creates a new context.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            context: libusb::Context::new().context("unable to create libUSB context")?,
        })
    }

    /// Opens the `index`-th Allwinner recovery-mode device on the bus.
    ///
    /// Claims interface 0 and locates the bulk endpoint pair; both are
    /// released again when the returned session is dropped, on every exit
    /// path.
    pub fn open_device(&self, index: usize) -> Result<Session<UsbBulk>, Error> {
        let mut seen = 0;
        for device in self
            .context
            .devices()
            .context("unable to list USB devices")?
            .iter()
        {
            let descriptor = device
                .device_descriptor()
                .context("unable to get USB device descriptor")?;
            if descriptor.vendor_id() == AW_VENDOR_ID && descriptor.product_id() == AW_PRODUCT_ID {
                if seen == index {
                    let bulk = UsbBulk::from_device(&device)?;
                    return Ok(Session::new(bulk));
                }
                seen += 1;
            }
        }
        bail!(
            "no Allwinner USB device at index {} ({} found on the bus)",
            index,
            seen
        );
    }
}
