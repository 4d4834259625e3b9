//! Protocol session: transaction framing, status layer and command
//! primitives.
//!
//! Every logical command is built from the two transaction shapes of the
//! bulk transport. A write-shape sends the outer `"AWUC"` envelope, sends
//! the payload and consumes the closing `"AWUS"` envelope; a read-shape
//! sends the outer envelope, receives the payload and consumes the closing
//! envelope. A logical command submits its inner record with a write-shape,
//! optionally moves payload data, and always ends by reading the 8-byte
//! status record.

use std::cmp;
use std::fmt;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use failure::{Error, ResultExt};
use log::{debug, warn};

use crate::transport::Bulk;
use crate::wire::{
    AwFelMessage, AwFelStandardRequest, AwFelStatusResponse, AwFelVerifyDeviceResponse,
    AwFesTransmiteRequest, AwFesVerifyStatusResponse, AwUsbRequest, AwUsbResponse, FelCmd, FesCmd,
    MediaIndex, Mode, Tag, Tags, AW_USB_READ, AW_USB_WRITE, VERIFY_STATUS_FLAGS,
};
use crate::{ProtocolError, MAX_CHUNK, MBR_SIZE};

/// Default bulk transfer timeout (in seconds).
const USB_TIMEOUT: u64 = 10;
/// Timeout (in seconds) for the closing envelope of a write-shape.
/// Storage-side work such as a NAND format can stall the device well past
/// the default timeout before it acknowledges.
const STATUS_TIMEOUT: u64 = 60;
/// Address unit of block-addressed storage.
const SECTOR_SIZE: usize = 512;
/// Stray envelopes tolerated per read before giving up.
const MAX_STRAY_ENVELOPES: usize = 2;

/// Logical operation a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Device-to-host transfer.
    Read,
    /// Host-to-device transfer.
    Write,
    /// Media-aware `RW_TRANSMITE` transfer.
    Transmite,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
            Operation::Transmite => write!(f, "transmite"),
        }
    }
}

/// Progress sink for multi-chunk transfers.
///
/// The session reports after every completed chunk, so on failure the last
/// reported count is exactly the number of bytes that reached the device.
pub trait Reporter {
    /// Reports `done` of `total` bytes transferred for `operation`.
    fn progress(&mut self, operation: Operation, done: usize, total: usize);
}

/// Reporter that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn progress(&mut self, _operation: Operation, _done: usize, _total: usize) {}
}

/// Lazy `(offset, length)` cover of a transfer, [`MAX_CHUNK`] at a time.
///
/// Offsets are strictly increasing and the chunk lengths sum to the total;
/// every chunk but possibly the last is exactly [`MAX_CHUNK`] long.
struct Chunks {
    total: usize,
    offset: usize,
}

fn chunks(total: usize) -> Chunks {
    Chunks { total, offset: 0 }
}

impl Iterator for Chunks {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        if self.offset >= self.total {
            return None;
        }
        let len = cmp::min(self.total - self.offset, MAX_CHUNK);
        let item = (self.offset, len);
        self.offset += len;
        Some(item)
    }
}

/// Steps a transfer address past a completed chunk.
///
/// DRAM targets step by byte length. Block-addressed storage steps by
/// 512-byte sectors, where a sub-sector tail chunk still consumes one
/// sector.
fn step_address(address: u32, chunk_len: usize, dram: bool) -> u32 {
    if dram {
        address.wrapping_add(chunk_len as u32)
    } else {
        address.wrapping_add(cmp::max(1, chunk_len / SECTOR_SIZE) as u32)
    }
}

/// A per-device FEL/FES protocol client.
///
/// Owns the bulk endpoint pair for its whole lifetime. Operations are
/// strictly serialized on the wire: every logical command consumes its
/// status before the next begins, and the stray-envelope
/// resynchronization rule is the only tolerated deviation from a clean
/// transaction boundary.
pub struct Session<B: Bulk> {
    bulk: B,
    reporter: Box<dyn Reporter>,
}

impl<B: Bulk> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Session").finish()
    }
}

impl<B: Bulk> Session<B> {
    /// Creates a session over the given bulk pipe, discarding progress
    /// events.
    pub fn new(bulk: B) -> Session<B> {
        Session {
            bulk,
            reporter: Box::new(NullReporter),
        }
    }

    /// Replaces the progress reporter.
    pub fn set_reporter(&mut self, reporter: Box<dyn Reporter>) {
        self.reporter = reporter;
    }

    /// Borrows the underlying bulk pipe.
    pub fn get_ref(&self) -> &B {
        &self.bulk
    }

    /// Requests the device identity record.
    ///
    /// Works in both modes; the reply carries the mode the device itself
    /// reports.
    pub fn device_info(&mut self) -> Result<AwFelVerifyDeviceResponse, Error> {
        let request = AwFelStandardRequest::new(FelCmd::VerifyDevice);
        self.usb_write(&request.to_bytes())
            .context("unable to send the VERIFY_DEVICE request")?;
        let mut buf = [0_u8; AwFelVerifyDeviceResponse::SIZE];
        self.usb_read(&mut buf)
            .context("unable to read the VERIFY_DEVICE reply")?;
        let info = AwFelVerifyDeviceResponse::from_bytes(&buf)?;
        self.read_status()
            .context("VERIFY_DEVICE did not complete")?;
        debug!("device identity: {}", info);
        Ok(info)
    }

    /// Reads `length` bytes starting at `address`.
    ///
    /// In FEL mode, and in FES mode with the `dram` tag, addresses step by
    /// byte length between chunks; otherwise the target is block-addressed
    /// storage and addresses step by 512-byte sectors.
    pub fn read(
        &mut self,
        address: u32,
        length: usize,
        tags: Tags,
        mode: Mode,
    ) -> Result<Vec<u8>, Error> {
        let mut data = vec![0_u8; length];
        let dram = tags.contains(Tag::Dram) || mode == Mode::Fel;
        let mut address = address;
        for (offset, chunk_len) in chunks(length) {
            let message =
                AwFelMessage::new(mode.upload_cmd(), address, chunk_len as u32, tags.flags());
            self.read_chunk(&message, &mut data[offset..offset + chunk_len])
                .with_context(|_| ProtocolError::Aborted {
                    done: offset,
                    total: length,
                })?;
            address = step_address(address, chunk_len, dram);
            self.reporter
                .progress(Operation::Read, offset + chunk_len, length);
        }
        Ok(data)
    }

    /// Writes `data` starting at `address`.
    ///
    /// Address stepping follows the same rules as [`read`](#method.read).
    pub fn write(&mut self, address: u32, data: &[u8], tags: Tags, mode: Mode) -> Result<(), Error> {
        let dram = tags.contains(Tag::Dram) || mode == Mode::Fel;
        let mut address = address;
        for (offset, chunk_len) in chunks(data.len()) {
            let message =
                AwFelMessage::new(mode.download_cmd(), address, chunk_len as u32, tags.flags());
            self.write_chunk(&message, &data[offset..offset + chunk_len])
                .with_context(|_| ProtocolError::Aborted {
                    done: offset,
                    total: data.len(),
                })?;
            address = step_address(address, chunk_len, dram);
            self.reporter
                .progress(Operation::Write, offset + chunk_len, data.len());
        }
        Ok(())
    }

    /// Makes the device execute the code at `address`.
    ///
    /// Control returns before the device-side code observably completes;
    /// subsequent operations must follow whatever protocol the executed
    /// code implements.
    pub fn run(&mut self, address: u32, mode: Mode) -> Result<(), Error> {
        let message = AwFelMessage::new(mode.run_cmd(), address, 0, 0);
        self.usb_write(&message.to_bytes())
            .context("unable to send the RUN request")?;
        self.read_status().context("RUN did not complete")?;
        Ok(())
    }

    /// Fetches the verification status of the last tagged transfer. FES
    /// only.
    ///
    /// On the MBR and erase paths a `crc` of zero signals success.
    pub fn verify_status(&mut self, tags: Tags) -> Result<AwFesVerifyStatusResponse, Error> {
        self.verify_reply(AwFelMessage::new(
            FesCmd::VerifyStatus.into(),
            0,
            0,
            tags.flags(),
        ))
    }

    /// CRCs `length` bytes of storage starting at `address`. FES only.
    pub fn verify_value(
        &mut self,
        address: u32,
        length: u32,
    ) -> Result<AwFesVerifyStatusResponse, Error> {
        self.verify_reply(AwFelMessage::new(FesCmd::VerifyValue.into(), address, length, 0))
    }

    fn verify_reply(&mut self, message: AwFelMessage) -> Result<AwFesVerifyStatusResponse, Error> {
        self.usb_write(&message.to_bytes())
            .context("unable to send the verify request")?;
        let mut buf = [0_u8; AwFesVerifyStatusResponse::SIZE];
        self.usb_read(&mut buf)
            .context("unable to read the verify reply")?;
        let status = AwFesVerifyStatusResponse::from_bytes(&buf);
        self.read_status().context("verify did not complete")?;
        if status.get_flags() != VERIFY_STATUS_FLAGS {
            warn!("unexpected verify flags word {:#010x}", status.get_flags());
        }
        Ok(status)
    }

    /// Brings the storage (NAND/card) driver up or down. FES only.
    pub fn set_storage_state(&mut self, on: bool) -> Result<(), Error> {
        let cmd = if on {
            FesCmd::FlashSetOn
        } else {
            FesCmd::FlashSetOff
        };
        let request = AwFelStandardRequest::new(cmd);
        self.usb_write(&request.to_bytes())
            .context("unable to send the storage state request")?;
        self.read_status()
            .context("storage state change did not complete")?;
        Ok(())
    }

    /// Queries the active storage kind. FES only.
    pub fn query_storage(&mut self) -> Result<u32, Error> {
        let request = AwFelStandardRequest::new(FesCmd::QueryStorage);
        self.usb_write(&request.to_bytes())
            .context("unable to send the storage query")?;
        let mut buf = [0_u8; 4];
        self.usb_read(&mut buf)
            .context("unable to read the storage kind")?;
        self.read_status()
            .context("storage query did not complete")?;
        Ok(LittleEndian::read_u32(&buf))
    }

    /// Selects the device work mode for the next boot. FES only.
    ///
    /// With the reboot work mode this is the last command of a session:
    /// the device drops off the bus once it acknowledges.
    pub fn set_tool_mode(&mut self, mode: u32, action: u32) -> Result<(), Error> {
        let message = AwFelMessage::new(FesCmd::ToolMode.into(), mode, action, 0);
        self.usb_write(&message.to_bytes())
            .context("unable to send the tool mode request")?;
        self.read_status()
            .context("tool mode change did not complete")?;
        Ok(())
    }

    /// Programs the sunxi MBR, optionally forcing a full erase first. FES
    /// only.
    ///
    /// The image must be exactly [`MBR_SIZE`] bytes. The erase flag is
    /// written first, then the image, then the write is verified; a
    /// non-zero CRC fails with [`ProtocolError::VerifyFailed`].
    pub fn write_mbr(
        &mut self,
        mbr: &[u8],
        erase: bool,
    ) -> Result<AwFesVerifyStatusResponse, Error> {
        if mbr.len() != MBR_SIZE {
            return Err(ProtocolError::BadArgument {
                msg: format!("MBR image must be {} bytes, got {}", MBR_SIZE, mbr.len()),
            }
            .into());
        }
        let flag = if erase { [1, 0, 0, 0] } else { [0, 0, 0, 0] };
        self.write(0, &flag, Tag::Erase | Tag::Finish, Mode::Fes)
            .context("unable to set the platform erase flag")?;
        self.write(0, mbr, Tag::Mbr | Tag::Finish, Mode::Fes)
            .context("unable to transfer the MBR image")?;
        let status = self
            .verify_status(Tags::from(Tag::Mbr))
            .context("unable to verify the MBR write")?;
        if status.get_crc() != 0 {
            return Err(ProtocolError::VerifyFailed {
                crc: status.get_crc(),
                last_error: status.get_last_error(),
            }
            .into());
        }
        Ok(status)
    }

    /// Reads `length` bytes at `address` of the given media. FES only.
    ///
    /// Bounded to a single chunk; longer reads are an error, not a silent
    /// truncation.
    // TODO: chunk longer uploads with sector stepping, as downloads do,
    // once the device behavior for multi-chunk transmite uploads is
    // confirmed.
    pub fn transmite_read(
        &mut self,
        address: u32,
        length: usize,
        media: MediaIndex,
    ) -> Result<Vec<u8>, Error> {
        if length > MAX_CHUNK {
            return Err(ProtocolError::BadArgument {
                msg: format!(
                    "transmite reads are bounded to {} bytes, got {}",
                    MAX_CHUNK, length
                ),
            }
            .into());
        }
        let request = AwFesTransmiteRequest::upload(address, length as u32, media);
        self.usb_write(&request.to_bytes())
            .context("unable to send the transmite request")?;
        let mut data = vec![0_u8; length];
        self.usb_read(&mut data)
            .context("unable to receive the transmite payload")?;
        self.read_status()
            .context("transmite read did not complete")?;
        self.reporter.progress(Operation::Transmite, length, length);
        Ok(data)
    }

    /// Writes `data` at `address` of the given media. FES only.
    ///
    /// Transmite addresses always step by 512-byte sectors, regardless of
    /// the target media.
    pub fn transmite_write(
        &mut self,
        address: u32,
        data: &[u8],
        media: MediaIndex,
    ) -> Result<(), Error> {
        let mut address = address;
        for (offset, chunk_len) in chunks(data.len()) {
            let request = AwFesTransmiteRequest::download(address, chunk_len as u32, media);
            self.transmite_chunk(&request, &data[offset..offset + chunk_len])
                .with_context(|_| ProtocolError::Aborted {
                    done: offset,
                    total: data.len(),
                })?;
            address = step_address(address, chunk_len, false);
            self.reporter
                .progress(Operation::Transmite, offset + chunk_len, data.len());
        }
        Ok(())
    }

    /// Sends a bare request with the given opcode and consumes its status.
    ///
    /// Debugging aid for opcodes this crate has no dedicated primitive
    /// for. A non-zero status fails with the parsed state value.
    pub fn request(&mut self, cmd: u16) -> Result<(), Error> {
        let request = AwFelStandardRequest::new(cmd);
        self.usb_write(&request.to_bytes())
            .context("unable to send the raw request")?;
        self.read_status()
            .with_context(|_| format!("request {:#06x} failed", cmd))?;
        Ok(())
    }

    fn read_chunk(&mut self, message: &AwFelMessage, chunk: &mut [u8]) -> Result<(), Error> {
        self.usb_write(&message.to_bytes())
            .context("unable to send the upload request")?;
        self.usb_read(chunk)
            .context("unable to receive the upload payload")?;
        self.read_status()
    }

    fn write_chunk(&mut self, message: &AwFelMessage, chunk: &[u8]) -> Result<(), Error> {
        self.usb_write(&message.to_bytes())
            .context("unable to send the download request")?;
        self.usb_write(chunk)
            .context("unable to send the download payload")?;
        self.read_status()
    }

    fn transmite_chunk(
        &mut self,
        request: &AwFesTransmiteRequest,
        chunk: &[u8],
    ) -> Result<(), Error> {
        self.usb_write(&request.to_bytes())
            .context("unable to send the transmite request")?;
        self.usb_write(chunk)
            .context("unable to send the transmite payload")?;
        self.read_status()
    }

    /// Reads the 8-byte status record closing a logical command.
    fn read_status(&mut self) -> Result<(), Error> {
        let mut buf = [0_u8; AwFelStatusResponse::SIZE];
        self.usb_read(&mut buf)
            .context("unable to read the command status")?;
        let status = AwFelStatusResponse::from_bytes(&buf);
        if status.get_state() != 0 {
            return Err(ProtocolError::CommandFailed {
                state: status.get_state(),
            }
            .into());
        }
        Ok(())
    }

    /// Write-shape transaction: envelope out, payload out, closing
    /// envelope in.
    fn usb_write(&mut self, data: &[u8]) -> Result<(), Error> {
        self.send_usb_request(AW_USB_WRITE, data.len() as u32)
            .context("unable to send the AW_USB_WRITE envelope")?;
        let _ = self
            .bulk
            .send(data, Duration::from_secs(USB_TIMEOUT))
            .context("unable to send the payload data")?;
        self.read_usb_response(Duration::from_secs(STATUS_TIMEOUT))
    }

    /// Read-shape transaction: envelope out, payload in, closing envelope
    /// in.
    fn usb_read(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.send_usb_request(AW_USB_READ, buf.len() as u32)
            .context("unable to send the AW_USB_READ envelope")?;
        self.recv_exact(buf, Duration::from_secs(USB_TIMEOUT))
            .context("unable to receive the payload data")?;
        self.read_usb_response(Duration::from_secs(USB_TIMEOUT))
    }

    /// Sends the outer bulk envelope announcing a payload leg.
    fn send_usb_request(&mut self, cmd: u8, len: u32) -> Result<(), Error> {
        let request = AwUsbRequest::new(cmd, len).to_bytes();
        let _ = self
            .bulk
            .send(&request, Duration::from_secs(USB_TIMEOUT))
            .context("unable to send the bulk transaction request")?;
        Ok(())
    }

    /// Reads and validates the closing 13-byte envelope.
    fn read_usb_response(&mut self, timeout: Duration) -> Result<(), Error> {
        let mut buf = [0_u8; AwUsbResponse::SIZE];
        self.recv_exact(&mut buf, timeout)
            .context("unable to receive the closing envelope")?;
        let response = AwUsbResponse::from_bytes(&buf)?;
        if response.get_csw_status() != 0 {
            return Err(ProtocolError::CswStatus {
                status: response.get_csw_status(),
            }
            .into());
        }
        Ok(())
    }

    /// Receives exactly `buf.len()` bytes, discarding stray envelopes.
    ///
    /// The device occasionally emits a spurious 13-byte envelope or 8-byte
    /// status out of sequence. A first packet of either size, when more was
    /// expected, is dropped and the read reissued.
    fn recv_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), Error> {
        let expected = buf.len();
        let mut received = 0;
        let mut strays = 0;
        while received < expected {
            let count = self.bulk.recv(&mut buf[received..], timeout)?;
            if received == 0
                && count != expected
                && (count == AwUsbResponse::SIZE || count == AwFelStatusResponse::SIZE)
            {
                if strays >= MAX_STRAY_ENVELOPES {
                    return Err(ProtocolError::TransportShort {
                        expected,
                        got: count,
                    }
                    .into());
                }
                strays += 1;
                debug!(
                    "discarding stray {}-byte packet while expecting {} bytes",
                    count, expected
                );
                continue;
            }
            if count == 0 {
                return Err(ProtocolError::TransportShort {
                    expected,
                    got: received,
                }
                .into());
            }
            received += count;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use failure::Context;

    use super::*;
    use crate::wire::DeviceMode;

    /// Scripted bulk pipe standing in for a device.
    #[derive(Debug, Default)]
    struct StubBulk {
        sent: Vec<Vec<u8>>,
        replies: VecDeque<Vec<u8>>,
    }

    impl StubBulk {
        fn reply(&mut self, data: Vec<u8>) {
            self.replies.push_back(data);
        }
    }

    impl Bulk for StubBulk {
        fn send(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, Error> {
            self.sent.push(data.to_vec());
            Ok(data.len())
        }

        fn recv(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, Error> {
            let reply = self
                .replies
                .pop_front()
                .expect("device ran out of scripted replies");
            let count = cmp::min(reply.len(), buf.len());
            buf[..count].copy_from_slice(&reply[..count]);
            Ok(count)
        }
    }

    fn csw_ok() -> Vec<u8> {
        AwUsbResponse {
            tag: 0,
            residue: 0,
            csw_status: 0,
        }
        .to_bytes()
        .to_vec()
    }

    fn status(state: u8) -> Vec<u8> {
        AwFelStatusResponse {
            mark: 0xFFFF,
            tag: 0,
            state,
        }
        .to_bytes()
        .to_vec()
    }

    fn fel_message(bytes: &[u8]) -> AwFelMessage {
        let mut buf = [0_u8; AwFelMessage::SIZE];
        buf.copy_from_slice(bytes);
        AwFelMessage::from_bytes(&buf)
    }

    fn transmite_request(bytes: &[u8]) -> AwFesTransmiteRequest {
        let mut buf = [0_u8; AwFesTransmiteRequest::SIZE];
        buf.copy_from_slice(bytes);
        AwFesTransmiteRequest::from_bytes(&buf)
    }

    fn protocol_error(error: &Error) -> &ProtocolError {
        error
            .find_root_cause()
            .downcast_ref::<ProtocolError>()
            .expect("root cause is not a protocol error")
    }

    #[test]
    fn it_chunks_exactly() {
        for &total in &[
            0_usize,
            1,
            511,
            512,
            MAX_CHUNK - 1,
            MAX_CHUNK,
            MAX_CHUNK + 1,
            3 * MAX_CHUNK + 17,
        ] {
            let spans: Vec<(usize, usize)> = chunks(total).collect();
            let mut expected_offset = 0;
            for (i, &(offset, len)) in spans.iter().enumerate() {
                assert_eq!(offset, expected_offset);
                if i + 1 < spans.len() {
                    assert_eq!(len, MAX_CHUNK);
                }
                expected_offset += len;
            }
            assert_eq!(expected_offset, total);
        }
    }

    #[test]
    fn it_steps_addresses() {
        assert_eq!(step_address(0x4010_0000, 100, true), 0x4010_0064);
        assert_eq!(step_address(0x8000, 65_536, false), 0x8080);
        assert_eq!(step_address(0x8080, 4_464, false), 0x8088);
        // A sub-sector tail still consumes one sector.
        assert_eq!(step_address(0x10, 1, false), 0x11);
    }

    #[test]
    fn it_verifies_the_device() {
        let mut stub = StubBulk::default();
        stub.reply(csw_ok());
        let identity = AwFelVerifyDeviceResponse {
            board: 0x0016_2300,
            fw: 1,
            mode: 0,
            data_flag: 0x44,
            data_length: 0x08,
            data_start_address: 0x7E00,
        };
        stub.reply(identity.to_bytes().to_vec());
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let info = session.device_info().unwrap();
        assert_eq!(info.get_board(), 0x0016_2300);
        assert_eq!(info.get_fw(), 1);
        assert_eq!(info.get_mode(), DeviceMode::Fel);
        assert_eq!(info.get_data_start_address(), 0x7E00);

        let sent = &session.get_ref().sent;
        let mut buf = [0_u8; AwFelStandardRequest::SIZE];
        buf.copy_from_slice(&sent[1]);
        assert_eq!(AwFelStandardRequest::from_bytes(&buf).get_cmd(), 0x0001);
    }

    #[test]
    fn it_reads_dram_in_fel_mode() {
        let payload: Vec<u8> = (0..100).map(|i| i as u8).collect();
        let mut stub = StubBulk::default();
        stub.reply(csw_ok());
        stub.reply(payload.clone());
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let data = session.read(0x4010_0000, 100, Tags::NONE, Mode::Fel).unwrap();
        assert_eq!(data, payload);

        let sent = &session.get_ref().sent;
        // One chunk: request envelope + message, payload envelope, status
        // envelope.
        assert_eq!(sent.len(), 4);
        let message = fel_message(&sent[1]);
        assert_eq!(message.get_cmd(), 0x0103);
        assert_eq!(message.get_address(), 0x4010_0000);
        assert_eq!(message.get_len(), 100);
        assert_eq!(message.get_flags(), 0);
    }

    #[test]
    fn it_steps_sector_addresses_on_fes_writes() {
        let data = vec![0xAB_u8; 70_000];
        let mut stub = StubBulk::default();
        for _ in 0..2 {
            stub.reply(csw_ok());
            stub.reply(csw_ok());
            stub.reply(status(0));
            stub.reply(csw_ok());
        }

        let mut session = Session::new(stub);
        session.write(0x8000, &data, Tags::NONE, Mode::Fes).unwrap();

        let sent = &session.get_ref().sent;
        // Five bulk-out transfers per chunk.
        assert_eq!(sent.len(), 10);
        let first = fel_message(&sent[1]);
        assert_eq!(first.get_cmd(), 0x0206);
        assert_eq!(first.get_address(), 0x8000);
        assert_eq!(first.get_len(), 65_536);
        let second = fel_message(&sent[6]);
        assert_eq!(second.get_address(), 0x8080);
        assert_eq!(second.get_len(), 4_464);
    }

    #[test]
    fn it_programs_the_mbr() {
        let mbr = vec![0x5A_u8; MBR_SIZE];
        let mut stub = StubBulk::default();
        // Erase-flag write and MBR image write.
        for _ in 0..2 {
            stub.reply(csw_ok());
            stub.reply(csw_ok());
            stub.reply(status(0));
            stub.reply(csw_ok());
        }
        // Verify status round-trip.
        stub.reply(csw_ok());
        stub.reply(
            AwFesVerifyStatusResponse {
                flags: VERIFY_STATUS_FLAGS,
                fes_crc: 0,
                last_error: 0,
            }
            .to_bytes()
            .to_vec(),
        );
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let verify = session.write_mbr(&mbr, true).unwrap();
        assert_eq!(verify.get_flags(), VERIFY_STATUS_FLAGS);
        assert_eq!(verify.get_crc(), 0);
        assert_eq!(verify.get_last_error(), 0);

        let sent = &session.get_ref().sent;
        assert_eq!(sent.len(), 14);
        let erase = fel_message(&sent[1]);
        assert_eq!(erase.get_address(), 0);
        assert_eq!(erase.get_len(), 4);
        assert_eq!(erase.get_flags(), 0x1_7F04);
        assert_eq!(sent[3], vec![1, 0, 0, 0]);
        let mbr_message = fel_message(&sent[6]);
        assert_eq!(mbr_message.get_len(), MBR_SIZE as u32);
        assert_eq!(mbr_message.get_flags(), 0x1_7F01);
        let verify_message = fel_message(&sent[11]);
        assert_eq!(verify_message.get_cmd(), 0x020D);
        assert_eq!(verify_message.get_flags(), 0x7F01);
    }

    #[test]
    fn it_rejects_wrongly_sized_mbr_images() {
        let mut session = Session::new(StubBulk::default());
        let error = session.write_mbr(&[0; 512], false).unwrap_err();
        match protocol_error(&error) {
            ProtocolError::BadArgument { .. } => {}
            other => panic!("expected a bad argument error, got {:?}", other),
        }
    }

    #[test]
    fn it_fails_mbr_writes_on_bad_crc() {
        let mbr = vec![0_u8; MBR_SIZE];
        let mut stub = StubBulk::default();
        for _ in 0..2 {
            stub.reply(csw_ok());
            stub.reply(csw_ok());
            stub.reply(status(0));
            stub.reply(csw_ok());
        }
        stub.reply(csw_ok());
        stub.reply(
            AwFesVerifyStatusResponse {
                flags: VERIFY_STATUS_FLAGS,
                fes_crc: 0xDEAD_BEEF,
                last_error: -1,
            }
            .to_bytes()
            .to_vec(),
        );
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let error = session.write_mbr(&mbr, false).unwrap_err();
        assert_eq!(
            protocol_error(&error),
            &ProtocolError::VerifyFailed {
                crc: 0xDEAD_BEEF,
                last_error: -1,
            }
        );
    }

    #[test]
    fn it_resynchronizes_after_a_stray_envelope() {
        let payload = vec![0x33_u8; 256];
        let mut stub = StubBulk::default();
        stub.reply(csw_ok());
        // A stray envelope arrives in place of the payload.
        stub.reply(csw_ok());
        stub.reply(payload.clone());
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let data = session.read(0x1000, 256, Tags::NONE, Mode::Fel).unwrap();
        assert_eq!(data, payload);
    }

    #[test]
    fn it_classifies_a_failing_status() {
        let mut stub = StubBulk::default();
        stub.reply(csw_ok());
        stub.reply(status(1));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let error = session.run(0x2000, Mode::Fel).unwrap_err();
        assert_eq!(
            protocol_error(&error),
            &ProtocolError::CommandFailed { state: 1 }
        );
    }

    #[test]
    fn it_rejects_a_failing_envelope() {
        let mut stub = StubBulk::default();
        stub.reply(
            AwUsbResponse {
                tag: 0,
                residue: 0,
                csw_status: 1,
            }
            .to_bytes()
            .to_vec(),
        );

        let mut session = Session::new(stub);
        let error = session.run(0, Mode::Fel).unwrap_err();
        assert_eq!(protocol_error(&error), &ProtocolError::CswStatus { status: 1 });
    }

    #[test]
    fn it_rejects_a_bad_envelope_magic() {
        let mut stub = StubBulk::default();
        stub.reply(vec![0xFF_u8; AwUsbResponse::SIZE]);

        let mut session = Session::new(stub);
        let error = session.run(0, Mode::Fel).unwrap_err();
        match protocol_error(&error) {
            ProtocolError::BadEnvelope { expected, .. } => assert_eq!(*expected, "AWUS"),
            other => panic!("expected a bad envelope error, got {:?}", other),
        }
    }

    #[test]
    fn it_exposes_transferred_bytes_on_mid_transfer_failures() {
        let data = vec![0_u8; 70_000];
        let mut stub = StubBulk::default();
        // First chunk completes, second fails its status.
        stub.reply(csw_ok());
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());
        stub.reply(csw_ok());
        stub.reply(csw_ok());
        stub.reply(status(3));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let error = session.write(0x8000, &data, Tags::NONE, Mode::Fes).unwrap_err();
        assert_eq!(
            protocol_error(&error),
            &ProtocolError::CommandFailed { state: 3 }
        );
        let aborted = error
            .iter_chain()
            .filter_map(|fail| fail.downcast_ref::<Context<ProtocolError>>())
            .next()
            .expect("no abort marker in the error chain");
        assert_eq!(
            aborted.get_context(),
            &ProtocolError::Aborted {
                done: 65_536,
                total: 70_000,
            }
        );
    }

    #[test]
    fn it_reports_chunk_progress() {
        struct Recorder(Rc<RefCell<Vec<(Operation, usize, usize)>>>);

        impl Reporter for Recorder {
            fn progress(&mut self, operation: Operation, done: usize, total: usize) {
                self.0.borrow_mut().push((operation, done, total));
            }
        }

        let data = vec![0_u8; 70_000];
        let mut stub = StubBulk::default();
        for _ in 0..2 {
            stub.reply(csw_ok());
            stub.reply(csw_ok());
            stub.reply(status(0));
            stub.reply(csw_ok());
        }

        let events = Rc::new(RefCell::new(Vec::new()));
        let mut session = Session::new(stub);
        session.set_reporter(Box::new(Recorder(Rc::clone(&events))));
        session.write(0, &data, Tags::from(Tag::Dram), Mode::Fes).unwrap();

        assert_eq!(
            *events.borrow(),
            vec![
                (Operation::Write, 65_536, 70_000),
                (Operation::Write, 70_000, 70_000),
            ]
        );
    }

    #[test]
    fn it_bounds_transmite_reads_to_one_chunk() {
        let mut session = Session::new(StubBulk::default());
        let error = session
            .transmite_read(0, MAX_CHUNK + 1, MediaIndex::Dram)
            .unwrap_err();
        match protocol_error(&error) {
            ProtocolError::BadArgument { .. } => {}
            other => panic!("expected a bad argument error, got {:?}", other),
        }
    }

    #[test]
    fn it_transmite_reads_a_chunk() {
        let payload = vec![0x42_u8; 512];
        let mut stub = StubBulk::default();
        stub.reply(csw_ok());
        stub.reply(payload.clone());
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let data = session
            .transmite_read(0x2000, 512, MediaIndex::Physical)
            .unwrap();
        assert_eq!(data, payload);

        let request = transmite_request(&session.get_ref().sent[1]);
        assert_eq!(request.cmd, 0x0201);
        assert_eq!(request.address, 0x2000);
        assert_eq!(request.len, 512);
        assert_eq!(request.media_index, 2);
        assert_eq!(request.direction, 1);
    }

    #[test]
    fn it_transmite_writes_with_sector_stepping() {
        let data = vec![0_u8; 66_000];
        let mut stub = StubBulk::default();
        for _ in 0..2 {
            stub.reply(csw_ok());
            stub.reply(csw_ok());
            stub.reply(status(0));
            stub.reply(csw_ok());
        }

        let mut session = Session::new(stub);
        session
            .transmite_write(0x100, &data, MediaIndex::Log)
            .unwrap();

        let sent = &session.get_ref().sent;
        assert_eq!(sent.len(), 10);
        let first = transmite_request(&sent[1]);
        assert_eq!(first.address, 0x100);
        assert_eq!(first.len, 65_536);
        assert_eq!(first.media_index, 1);
        assert_eq!(first.direction, 0);
        let second = transmite_request(&sent[6]);
        assert_eq!(second.address, 0x180);
        assert_eq!(second.len, 464);
    }

    #[test]
    fn it_queries_storage() {
        let mut stub = StubBulk::default();
        stub.reply(csw_ok());
        stub.reply(vec![3, 0, 0, 0]);
        stub.reply(csw_ok());
        stub.reply(status(0));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        assert_eq!(session.query_storage().unwrap(), 3);
    }

    #[test]
    fn it_toggles_storage_state() {
        let mut stub = StubBulk::default();
        for _ in 0..2 {
            stub.reply(csw_ok());
            stub.reply(status(0));
            stub.reply(csw_ok());
        }

        let mut session = Session::new(stub);
        session.set_storage_state(true).unwrap();
        session.set_storage_state(false).unwrap();

        let sent = &session.get_ref().sent;
        let mut buf = [0_u8; AwFelStandardRequest::SIZE];
        buf.copy_from_slice(&sent[1]);
        assert_eq!(AwFelStandardRequest::from_bytes(&buf).get_cmd(), 0x020A);
        buf.copy_from_slice(&sent[4]);
        assert_eq!(AwFelStandardRequest::from_bytes(&buf).get_cmd(), 0x020B);
    }

    #[test]
    fn it_propagates_request_failures_with_the_parsed_state() {
        let mut stub = StubBulk::default();
        stub.reply(csw_ok());
        stub.reply(status(0xAA));
        stub.reply(csw_ok());

        let mut session = Session::new(stub);
        let error = session.request(0x0003).unwrap_err();
        assert_eq!(
            protocol_error(&error),
            &ProtocolError::CommandFailed { state: 0xAA }
        );
    }
}
