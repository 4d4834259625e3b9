//! On-the-wire records of the *FEL*/*FES* protocol.
//!
//! Every record is little-endian and packed, with no padding beyond the
//! reserved bytes the protocol itself carries. Serialization goes through
//! fixed-size buffers, so a record can never be emitted with a wrong length.

use std::fmt;
use std::iter::FromIterator;
use std::ops::BitOr;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

use crate::ProtocolError;

/// Magic of the outer bulk request envelope.
const AWUC_MAGIC: &[u8] = b"AWUC";
/// Magic of the closing bulk response envelope.
const AWUS_MAGIC: &[u8] = b"AWUS";
/// Magic of the `VERIFY_DEVICE` reply.
const AWUSBFEX_MAGIC: &[u8] = b"AWUSBFEX";
/// Fixed value of the inner command length byte of the outer envelope.
const AWUC_CMD_LEN: u8 = 0x0C;

/// Inner envelope command requesting a device-to-host payload.
pub(crate) const AW_USB_READ: u8 = 0x11;
/// Inner envelope command announcing a host-to-device payload.
pub(crate) const AW_USB_WRITE: u8 = 0x12;

/// `flags` word every `VERIFY_STATUS`/`VERIFY_VALUE` reply is expected to
/// carry.
pub const VERIFY_STATUS_FLAGS: u32 = 0x6a61_7603;

/// Direction value of a transmite request moving data host to device.
const TRANSMITE_DOWNLOAD: u8 = 0;
/// Direction value of a transmite request moving data device to host.
const TRANSMITE_UPLOAD: u8 = 1;

/// *FEL* command opcodes, as understood by the *BROM*.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FelCmd {
    /// Request the device identity record.
    VerifyDevice = 0x0001,
    /// Switch the USB role.
    SwitchRole = 0x0002,
    /// Poll whether the device finished its last long operation.
    IsReady = 0x0003,
    /// Request the supported command set version.
    GetCmdSetVer = 0x0004,
    /// Ask the device to drop off the bus.
    Disconnect = 0x0010,
    /// Host-to-device memory write.
    Download = 0x0101,
    /// Execute code at an address.
    Run = 0x0102,
    /// Device-to-host memory read.
    Upload = 0x0103,
}

impl From<FelCmd> for u16 {
    fn from(cmd: FelCmd) -> u16 {
        cmd as u16
    }
}

/// *FES* command opcodes, served once the second-stage loader runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FesCmd {
    /// Media-aware raw transfer (`RW_TRANSMITE`).
    Transmite = 0x0201,
    /// Execute code at an address.
    Run = 0x0202,
    /// Request loader information.
    Info = 0x0203,
    /// Fetch the loader message buffer.
    GetMsg = 0x0204,
    /// Unregister the FED storage driver.
    UnregFed = 0x0205,
    /// Host-to-device write.
    Download = 0x0206,
    /// Device-to-host read.
    Upload = 0x0207,
    /// Verify a previously transferred image.
    Verify = 0x0208,
    /// Query the active storage kind.
    QueryStorage = 0x0209,
    /// Bring up the storage (NAND/card) driver.
    FlashSetOn = 0x020A,
    /// Shut down the storage driver.
    FlashSetOff = 0x020B,
    /// CRC a region of storage or memory.
    VerifyValue = 0x020C,
    /// Fetch the status of the last tagged transfer.
    VerifyStatus = 0x020D,
    /// Probe the storage size.
    FlashSizeProbe = 0x020E,
    /// Select the next boot/tool work mode.
    ToolMode = 0x020F,
}

impl From<FesCmd> for u16 {
    fn from(cmd: FesCmd) -> u16 {
        cmd as u16
    }
}

/// Operating mode of the device, selecting which opcode family a command
/// primitive emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// ROM-resident recovery mode.
    Fel,
    /// Secondary mode, entered once DRAM is initialized.
    Fes,
}

impl Mode {
    /// Opcode of a host-to-device write in this mode.
    pub(crate) fn download_cmd(self) -> u16 {
        match self {
            Mode::Fel => FelCmd::Download.into(),
            Mode::Fes => FesCmd::Download.into(),
        }
    }

    /// Opcode of a device-to-host read in this mode.
    pub(crate) fn upload_cmd(self) -> u16 {
        match self {
            Mode::Fel => FelCmd::Upload.into(),
            Mode::Fes => FesCmd::Upload.into(),
        }
    }

    /// Opcode of an execute request in this mode.
    pub(crate) fn run_cmd(self) -> u16 {
        match self {
            Mode::Fel => FelCmd::Run.into(),
            Mode::Fes => FesCmd::Run.into(),
        }
    }
}

impl FromStr for Mode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Mode, ProtocolError> {
        match s {
            "fel" => Ok(Mode::Fel),
            "fes" => Ok(Mode::Fes),
            _ => Err(ProtocolError::BadArgument {
                msg: format!("invalid mode '{}', expected 'fel' or 'fes'", s),
            }),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Mode::Fel => write!(f, "fel"),
            Mode::Fes => write!(f, "fes"),
        }
    }
}

/// Mode the device reports about itself in the `VERIFY_DEVICE` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// ROM recovery mode.
    Fel,
    /// Second-stage loader mode.
    Fes,
    /// A mode this crate does not know about.
    Other(u16),
}

impl DeviceMode {
    fn from_word(word: u16) -> DeviceMode {
        match word {
            0 => DeviceMode::Fel,
            1 => DeviceMode::Fes,
            other => DeviceMode::Other(other),
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DeviceMode::Fel => write!(f, "fel"),
            DeviceMode::Fes => write!(f, "fes"),
            DeviceMode::Other(word) => write!(f, "unknown ({:#06x})", word),
        }
    }
}

/// Target media of a transmite request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaIndex {
    /// DRAM.
    Dram,
    /// Logical (FTL-mapped) storage space.
    Log,
    /// Physical storage space.
    Physical,
}

impl MediaIndex {
    fn value(self) -> u8 {
        match self {
            MediaIndex::Dram => 0,
            MediaIndex::Log => 1,
            MediaIndex::Physical => 2,
        }
    }
}

impl Default for MediaIndex {
    fn default() -> MediaIndex {
        MediaIndex::Dram
    }
}

impl FromStr for MediaIndex {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<MediaIndex, ProtocolError> {
        match s {
            "dram" => Ok(MediaIndex::Dram),
            "log" | "physical-log" => Ok(MediaIndex::Log),
            "physical" => Ok(MediaIndex::Physical),
            _ => Err(ProtocolError::BadArgument {
                msg: format!("invalid media index '{}'", s),
            }),
        }
    }
}

/// Content-type and framing tags carried in the `flags` field of an
/// [`AwFelMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// No tag.
    None,
    /// The operand addresses DRAM; addresses step by byte length.
    Dram,
    /// The payload is the sunxi MBR; combine with [`Tag::Finish`].
    Mbr,
    /// U-Boot content selector.
    Uboot,
    /// boot0 content selector.
    Boot0,
    /// Force the erase-flag path; combine with [`Tag::Finish`].
    Erase,
    /// Marks the terminal chunk of a multi-chunk logical operation.
    Finish,
}

impl Tag {
    /// Every recognized tag, in wire-value order.
    pub const ALL: [Tag; 7] = [
        Tag::None,
        Tag::Dram,
        Tag::Mbr,
        Tag::Uboot,
        Tag::Boot0,
        Tag::Erase,
        Tag::Finish,
    ];

    /// Wire value the tag contributes to the `flags` field.
    pub fn value(self) -> u32 {
        match self {
            Tag::None => 0x0000,
            Tag::Dram => 0x7F00,
            Tag::Mbr => 0x7F01,
            Tag::Uboot => 0x7F02,
            Tag::Boot0 => 0x7F03,
            Tag::Erase => 0x7F04,
            Tag::Finish => 0x1_0000,
        }
    }

    /// Membership bit inside [`Tags`]. The content-type wire values share
    /// low bits, so membership cannot be recovered from the OR'd word.
    fn bit(self) -> u8 {
        match self {
            Tag::None => 0x01,
            Tag::Dram => 0x02,
            Tag::Mbr => 0x04,
            Tag::Uboot => 0x08,
            Tag::Boot0 => 0x10,
            Tag::Erase => 0x20,
            Tag::Finish => 0x40,
        }
    }
}

impl FromStr for Tag {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Tag, ProtocolError> {
        match s {
            "none" => Ok(Tag::None),
            "dram" => Ok(Tag::Dram),
            "mbr" => Ok(Tag::Mbr),
            "uboot" => Ok(Tag::Uboot),
            "boot0" => Ok(Tag::Boot0),
            "erase" => Ok(Tag::Erase),
            "finish" => Ok(Tag::Finish),
            _ => Err(ProtocolError::BadArgument {
                msg: format!("invalid tag '{}'", s),
            }),
        }
    }
}

/// A set of [`Tag`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tags(u8);

impl Tags {
    /// The empty tag set.
    pub const NONE: Tags = Tags(0);

    /// Returns the set with `tag` added.
    pub fn with(self, tag: Tag) -> Tags {
        Tags(self.0 | tag.bit())
    }

    /// Whether `tag` is a member of the set.
    pub fn contains(self, tag: Tag) -> bool {
        self.0 & tag.bit() != 0
    }

    /// The OR of the member wire values, as sent on the wire.
    pub fn flags(self) -> u32 {
        Tag::ALL
            .iter()
            .filter(|tag| self.contains(**tag))
            .fold(0, |flags, tag| flags | tag.value())
    }
}

impl From<Tag> for Tags {
    fn from(tag: Tag) -> Tags {
        Tags::NONE.with(tag)
    }
}

impl BitOr for Tag {
    type Output = Tags;

    fn bitor(self, rhs: Tag) -> Tags {
        Tags::NONE.with(self).with(rhs)
    }
}

impl BitOr<Tag> for Tags {
    type Output = Tags;

    fn bitor(self, rhs: Tag) -> Tags {
        self.with(rhs)
    }
}

impl FromIterator<Tag> for Tags {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Tags {
        iter.into_iter().fold(Tags::NONE, Tags::with)
    }
}

/// Outer bulk transaction request (`"AWUC"` header, 32 bytes).
///
/// Opens every bulk transaction. `len` announces the size of the payload
/// leg that follows and is carried twice on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwUsbRequest {
    pub(crate) cmd: u8,
    pub(crate) tag: u32,
    pub(crate) len: u32,
}

impl AwUsbRequest {
    /// Serialized size in bytes.
    pub const SIZE: usize = 32;

    /// Builds an envelope for the given inner command and payload length.
    pub fn new(cmd: u8, len: u32) -> AwUsbRequest {
        AwUsbRequest { cmd, tag: 0, len }
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwUsbRequest::SIZE] {
        let mut buf = [0_u8; AwUsbRequest::SIZE];
        buf[..4].copy_from_slice(AWUC_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.tag);
        LittleEndian::write_u32(&mut buf[8..12], self.len);
        buf[15] = AWUC_CMD_LEN;
        buf[16] = self.cmd;
        // The protocol repeats the length.
        LittleEndian::write_u32(&mut buf[18..22], self.len);
        buf
    }

    /// Deserializes the record, validating the `"AWUC"` magic.
    pub fn from_bytes(bytes: &[u8; AwUsbRequest::SIZE]) -> Result<AwUsbRequest, ProtocolError> {
        if &bytes[..4] != AWUC_MAGIC {
            return Err(ProtocolError::BadEnvelope {
                expected: "AWUC",
                found: String::from_utf8_lossy(&bytes[..4]).into_owned(),
            });
        }
        Ok(AwUsbRequest {
            cmd: bytes[16],
            tag: LittleEndian::read_u32(&bytes[4..8]),
            len: LittleEndian::read_u32(&bytes[8..12]),
        })
    }

    /// Inner command byte.
    pub fn get_cmd(&self) -> u8 {
        self.cmd
    }

    /// Announced payload length.
    pub fn get_len(&self) -> u32 {
        self.len
    }
}

/// Closing bulk transaction envelope (`"AWUS"` header, 13 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwUsbResponse {
    pub(crate) tag: u32,
    pub(crate) residue: u32,
    pub(crate) csw_status: u8,
}

impl AwUsbResponse {
    /// Serialized size in bytes.
    pub const SIZE: usize = 13;

    /// Deserializes the record, validating the `"AWUS"` magic.
    pub fn from_bytes(bytes: &[u8; AwUsbResponse::SIZE]) -> Result<AwUsbResponse, ProtocolError> {
        if &bytes[..4] != AWUS_MAGIC {
            return Err(ProtocolError::BadEnvelope {
                expected: "AWUS",
                found: String::from_utf8_lossy(&bytes[..4]).into_owned(),
            });
        }
        Ok(AwUsbResponse {
            tag: LittleEndian::read_u32(&bytes[4..8]),
            residue: LittleEndian::read_u32(&bytes[8..12]),
            csw_status: bytes[12],
        })
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwUsbResponse::SIZE] {
        let mut buf = [0_u8; AwUsbResponse::SIZE];
        buf[..4].copy_from_slice(AWUS_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], self.tag);
        LittleEndian::write_u32(&mut buf[8..12], self.residue);
        buf[12] = self.csw_status;
        buf
    }

    /// Transport status; non-zero means the transaction failed.
    pub fn get_csw_status(&self) -> u8 {
        self.csw_status
    }

    /// Untransferred byte count reported by the device.
    pub fn get_residue(&self) -> u32 {
        self.residue
    }
}

/// Inner command record with no operands (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwFelStandardRequest {
    pub(crate) cmd: u16,
    pub(crate) tag: u16,
}

impl AwFelStandardRequest {
    /// Serialized size in bytes.
    pub const SIZE: usize = 16;

    /// Builds a request for the given opcode.
    pub fn new<C: Into<u16>>(cmd: C) -> AwFelStandardRequest {
        AwFelStandardRequest {
            cmd: cmd.into(),
            tag: 0,
        }
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwFelStandardRequest::SIZE] {
        let mut buf = [0_u8; AwFelStandardRequest::SIZE];
        LittleEndian::write_u16(&mut buf[..2], self.cmd);
        LittleEndian::write_u16(&mut buf[2..4], self.tag);
        buf
    }

    /// Deserializes the record.
    pub fn from_bytes(bytes: &[u8; AwFelStandardRequest::SIZE]) -> AwFelStandardRequest {
        AwFelStandardRequest {
            cmd: LittleEndian::read_u16(&bytes[..2]),
            tag: LittleEndian::read_u16(&bytes[2..4]),
        }
    }

    /// Opcode of the request.
    pub fn get_cmd(&self) -> u16 {
        self.cmd
    }
}

/// Polymorphic inner command record shared by most *FEL*/*FES* commands
/// (16 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwFelMessage {
    pub(crate) cmd: u16,
    pub(crate) tag: u16,
    pub(crate) address: u32,
    pub(crate) len: u32,
    pub(crate) flags: u32,
}

impl AwFelMessage {
    /// Serialized size in bytes.
    pub const SIZE: usize = 16;

    /// Builds a message for the given opcode and operands.
    pub fn new(cmd: u16, address: u32, len: u32, flags: u32) -> AwFelMessage {
        AwFelMessage {
            cmd,
            tag: 0,
            address,
            len,
            flags,
        }
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwFelMessage::SIZE] {
        let mut buf = [0_u8; AwFelMessage::SIZE];
        LittleEndian::write_u16(&mut buf[..2], self.cmd);
        LittleEndian::write_u16(&mut buf[2..4], self.tag);
        LittleEndian::write_u32(&mut buf[4..8], self.address);
        LittleEndian::write_u32(&mut buf[8..12], self.len);
        LittleEndian::write_u32(&mut buf[12..16], self.flags);
        buf
    }

    /// Deserializes the record.
    pub fn from_bytes(bytes: &[u8; AwFelMessage::SIZE]) -> AwFelMessage {
        AwFelMessage {
            cmd: LittleEndian::read_u16(&bytes[..2]),
            tag: LittleEndian::read_u16(&bytes[2..4]),
            address: LittleEndian::read_u32(&bytes[4..8]),
            len: LittleEndian::read_u32(&bytes[8..12]),
            flags: LittleEndian::read_u32(&bytes[12..16]),
        }
    }

    /// Opcode of the message.
    pub fn get_cmd(&self) -> u16 {
        self.cmd
    }

    /// Address operand.
    pub fn get_address(&self) -> u32 {
        self.address
    }

    /// Length operand.
    pub fn get_len(&self) -> u32 {
        self.len
    }

    /// OR'd tag flags.
    pub fn get_flags(&self) -> u32 {
        self.flags
    }
}

/// Media-aware transfer request of the `RW_TRANSMITE` command (24 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwFesTransmiteRequest {
    pub(crate) cmd: u16,
    pub(crate) tag: u16,
    pub(crate) address: u32,
    pub(crate) len: u32,
    pub(crate) media_index: u8,
    pub(crate) direction: u8,
}

impl AwFesTransmiteRequest {
    /// Serialized size in bytes.
    pub const SIZE: usize = 24;

    /// Builds a host-to-device transfer request.
    pub fn download(address: u32, len: u32, media: MediaIndex) -> AwFesTransmiteRequest {
        AwFesTransmiteRequest {
            cmd: FesCmd::Transmite.into(),
            tag: 0,
            address,
            len,
            media_index: media.value(),
            direction: TRANSMITE_DOWNLOAD,
        }
    }

    /// Builds a device-to-host transfer request.
    pub fn upload(address: u32, len: u32, media: MediaIndex) -> AwFesTransmiteRequest {
        AwFesTransmiteRequest {
            cmd: FesCmd::Transmite.into(),
            tag: 0,
            address,
            len,
            media_index: media.value(),
            direction: TRANSMITE_UPLOAD,
        }
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwFesTransmiteRequest::SIZE] {
        let mut buf = [0_u8; AwFesTransmiteRequest::SIZE];
        LittleEndian::write_u16(&mut buf[..2], self.cmd);
        LittleEndian::write_u16(&mut buf[2..4], self.tag);
        LittleEndian::write_u32(&mut buf[4..8], self.address);
        LittleEndian::write_u32(&mut buf[8..12], self.len);
        buf[12] = self.media_index;
        buf[13] = self.direction;
        buf
    }

    /// Deserializes the record.
    pub fn from_bytes(bytes: &[u8; AwFesTransmiteRequest::SIZE]) -> AwFesTransmiteRequest {
        AwFesTransmiteRequest {
            cmd: LittleEndian::read_u16(&bytes[..2]),
            tag: LittleEndian::read_u16(&bytes[2..4]),
            address: LittleEndian::read_u32(&bytes[4..8]),
            len: LittleEndian::read_u32(&bytes[8..12]),
            media_index: bytes[12],
            direction: bytes[13],
        }
    }
}

/// Status record closing every logical command (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwFelStatusResponse {
    pub(crate) mark: u16,
    pub(crate) tag: u16,
    pub(crate) state: u8,
}

impl AwFelStatusResponse {
    /// Serialized size in bytes.
    pub const SIZE: usize = 8;

    /// Deserializes the record.
    pub fn from_bytes(bytes: &[u8; AwFelStatusResponse::SIZE]) -> AwFelStatusResponse {
        AwFelStatusResponse {
            mark: LittleEndian::read_u16(&bytes[..2]),
            tag: LittleEndian::read_u16(&bytes[2..4]),
            state: bytes[4],
        }
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwFelStatusResponse::SIZE] {
        let mut buf = [0_u8; AwFelStatusResponse::SIZE];
        LittleEndian::write_u16(&mut buf[..2], self.mark);
        LittleEndian::write_u16(&mut buf[2..4], self.tag);
        buf[4] = self.state;
        buf
    }

    /// Command state; zero means success.
    pub fn get_state(&self) -> u8 {
        self.state
    }
}

/// Device identity record returned by `VERIFY_DEVICE` (32 bytes,
/// `"AWUSBFEX"` header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwFelVerifyDeviceResponse {
    pub(crate) board: u32,
    pub(crate) fw: u32,
    pub(crate) mode: u16,
    pub(crate) data_flag: u8,
    pub(crate) data_length: u8,
    pub(crate) data_start_address: u32,
}

impl AwFelVerifyDeviceResponse {
    /// Serialized size in bytes.
    pub const SIZE: usize = 32;

    /// Deserializes the record, validating the `"AWUSBFEX"` magic.
    pub fn from_bytes(
        bytes: &[u8; AwFelVerifyDeviceResponse::SIZE],
    ) -> Result<AwFelVerifyDeviceResponse, ProtocolError> {
        if &bytes[..8] != AWUSBFEX_MAGIC {
            return Err(ProtocolError::BadEnvelope {
                expected: "AWUSBFEX",
                found: String::from_utf8_lossy(&bytes[..8]).into_owned(),
            });
        }
        Ok(AwFelVerifyDeviceResponse {
            board: LittleEndian::read_u32(&bytes[8..12]),
            fw: LittleEndian::read_u32(&bytes[12..16]),
            mode: LittleEndian::read_u16(&bytes[16..18]),
            data_flag: bytes[18],
            data_length: bytes[19],
            data_start_address: LittleEndian::read_u32(&bytes[20..24]),
        })
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwFelVerifyDeviceResponse::SIZE] {
        let mut buf = [0_u8; AwFelVerifyDeviceResponse::SIZE];
        buf[..8].copy_from_slice(AWUSBFEX_MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], self.board);
        LittleEndian::write_u32(&mut buf[12..16], self.fw);
        LittleEndian::write_u16(&mut buf[16..18], self.mode);
        buf[18] = self.data_flag;
        buf[19] = self.data_length;
        LittleEndian::write_u32(&mut buf[20..24], self.data_start_address);
        buf
    }

    /// Board identifier.
    pub fn get_board(&self) -> u32 {
        self.board
    }

    /// Firmware identifier.
    pub fn get_fw(&self) -> u32 {
        self.fw
    }

    /// Current operating mode of the device.
    pub fn get_mode(&self) -> DeviceMode {
        DeviceMode::from_word(self.mode)
    }

    /// Data flag.
    pub fn get_data_flag(&self) -> u8 {
        self.data_flag
    }

    /// Data length.
    pub fn get_data_length(&self) -> u8 {
        self.data_length
    }

    /// Scratchpad address where uploaded code may be placed.
    pub fn get_data_start_address(&self) -> u32 {
        self.data_start_address
    }
}

impl fmt::Display for AwFelVerifyDeviceResponse {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "board: {:#010x}, firmware: {:#010x}, mode: {}, data flag: {:#04x}, data length: \
             {:#04x}, data start address: {:#010x}",
            self.board,
            self.fw,
            self.get_mode(),
            self.data_flag,
            self.data_length,
            self.data_start_address
        )
    }
}

/// Verification status record returned by `VERIFY_STATUS` and
/// `VERIFY_VALUE` (12 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AwFesVerifyStatusResponse {
    pub(crate) flags: u32,
    pub(crate) fes_crc: u32,
    pub(crate) last_error: i32,
}

impl AwFesVerifyStatusResponse {
    /// Serialized size in bytes.
    pub const SIZE: usize = 12;

    /// Deserializes the record.
    pub fn from_bytes(bytes: &[u8; AwFesVerifyStatusResponse::SIZE]) -> AwFesVerifyStatusResponse {
        AwFesVerifyStatusResponse {
            flags: LittleEndian::read_u32(&bytes[..4]),
            fes_crc: LittleEndian::read_u32(&bytes[4..8]),
            last_error: LittleEndian::read_i32(&bytes[8..12]),
        }
    }

    /// Serializes the record.
    pub fn to_bytes(&self) -> [u8; AwFesVerifyStatusResponse::SIZE] {
        let mut buf = [0_u8; AwFesVerifyStatusResponse::SIZE];
        LittleEndian::write_u32(&mut buf[..4], self.flags);
        LittleEndian::write_u32(&mut buf[4..8], self.fes_crc);
        LittleEndian::write_i32(&mut buf[8..12], self.last_error);
        buf
    }

    /// Marker word, expected to equal [`VERIFY_STATUS_FLAGS`].
    pub fn get_flags(&self) -> u32 {
        self.flags
    }

    /// CRC of the verified transfer; zero signals success on MBR and erase
    /// paths.
    pub fn get_crc(&self) -> u32 {
        self.fes_crc
    }

    /// Last device-side error, `-1` on failure.
    pub fn get_last_error(&self) -> i32 {
        self.last_error
    }
}
