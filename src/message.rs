//! Addresses, message kinds and the decoded replies carried by them.

use core::fmt;
use core::time::Duration;

use strum_macros::EnumIter;

use crate::frame::{self, Frame, FrameError, MAX_DATA_LEN};

/// Identifies one bus participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u8);

impl Address {
    /// Requests sent here reach every leaf and are never answered.
    pub const BROADCAST: Address = Address(0xFF);
    /// Address the master uses unless configured otherwise.
    pub const DEFAULT_MASTER: Address = Address(0x1E);

    pub const fn new(address: u8) -> Self {
        Self(address)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }

    /// Every address a leaf can answer at, in scanning order.
    pub fn unicast() -> impl Iterator<Item = Address> {
        (0..Self::BROADCAST.0).map(Address)
    }
}

impl From<u8> for Address {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Address> for u8 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// What a message means, encoded on the wire as a little-endian `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum MessageKind {
    Ping,
    /// Data: device id, protocol major, protocol minor.
    PingReply,
    AckOk,
    AckNok,
    /// Data: sleep duration in microseconds, `u32` little-endian.
    Sleep,
    GetInfo,
    /// Data: a [`DeviceInfo`] record.
    InfoReply,
    /// Restore factory defaults, honored only while the memory lock is open.
    ResetHard,
    ResetSoft,
    /// Take one sample now.
    Sync,
    /// Data: offset `u16` little-endian, then the bytes to write.
    WriteReg,
    /// Data: offset `u16` little-endian, length `u8`.
    ReadReg,
    /// Data: the bytes read.
    ReadReply,
    /// Any id this crate has no name for, e.g. sensor specific measurement messages.
    Other(u16),
}

impl MessageKind {
    pub const fn id(self) -> u16 {
        match self {
            Self::Ping => 0x0000,
            Self::PingReply => 0x0001,
            Self::AckOk => 0x0002,
            Self::AckNok => 0x0003,
            Self::Sleep => 0x0004,
            Self::GetInfo => 0x0005,
            Self::InfoReply => 0x0006,
            Self::ResetHard => 0x00FE,
            Self::ResetSoft => 0x00FF,
            Self::Sync => 0x0101,
            Self::WriteReg => 0x0200,
            Self::ReadReg => 0x0201,
            Self::ReadReply => 0x0202,
            Self::Other(id) => id,
        }
    }
}

impl From<u16> for MessageKind {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => Self::Ping,
            0x0001 => Self::PingReply,
            0x0002 => Self::AckOk,
            0x0003 => Self::AckNok,
            0x0004 => Self::Sleep,
            0x0005 => Self::GetInfo,
            0x0006 => Self::InfoReply,
            0x00FE => Self::ResetHard,
            0x00FF => Self::ResetSoft,
            0x0101 => Self::Sync,
            0x0200 => Self::WriteReg,
            0x0201 => Self::ReadReg,
            0x0202 => Self::ReadReply,
            other => Self::Other(other),
        }
    }
}

impl From<MessageKind> for u16 {
    fn from(value: MessageKind) -> Self {
        value.id()
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: Address,
    pub destination: Address,
    pub kind: MessageKind,
    pub data: heapless::Vec<u8, MAX_DATA_LEN>,
}

impl Message {
    pub fn new(
        source: Address,
        destination: Address,
        kind: MessageKind,
        data: &[u8],
    ) -> Result<Self, FrameError> {
        Ok(Self {
            source,
            destination,
            kind,
            data: heapless::Vec::from_slice(data)
                .map_err(|_| FrameError::PayloadTooLarge(data.len()))?,
        })
    }

    pub fn encode(&self) -> Result<Frame, FrameError> {
        frame::encode(self.source, self.destination, self.kind, &self.data)
    }
}

/// Protocol revision implemented by a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Kind of device behind a leaf, as reported in its ping reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum DeviceKind {
    /// Pressure 0-600 mbar with two external temperature probes.
    Pressure600mbar,
    /// Pressure 0-60 mbar with two external temperature probes.
    Pressure60mbar,
    Strain24Bit,
    Io8Di8Do,
    Io4Di4Do,
    Io4Ai,
    /// Encoder reader, 1000 pulses per revolution.
    Encoder1000Ppr,
    /// Inclinometer, ±90°.
    AngleXy90,
    /// Inclinometer, ±30°.
    AngleXy30,
    Distance22mm,
    Distance225mm,
    AirPollutionCoNoxVoc,
    AirPollutionPm,
    AirPollutionCoNoxVocPm,
    AirPollutionCoNoxVocPmGps,
    Unknown(u8),
}

impl From<u8> for DeviceKind {
    fn from(value: u8) -> Self {
        use DeviceKind as DK;
        match value {
            0x03 => DK::Pressure600mbar,
            0x04 => DK::Pressure60mbar,
            0x11 => DK::Strain24Bit,
            0x20 => DK::Io8Di8Do,
            0x21 => DK::Io4Di4Do,
            0x22 => DK::Io4Ai,
            0x2A => DK::Encoder1000Ppr,
            0x30 => DK::AngleXy90,
            0x31 => DK::AngleXy30,
            0x40 => DK::Distance22mm,
            0x41 => DK::Distance225mm,
            0x50 => DK::AirPollutionCoNoxVoc,
            0x51 => DK::AirPollutionPm,
            0x52 => DK::AirPollutionCoNoxVocPm,
            0x53 => DK::AirPollutionCoNoxVocPmGps,
            other => DK::Unknown(other),
        }
    }
}

impl From<DeviceKind> for u8 {
    fn from(value: DeviceKind) -> Self {
        use DeviceKind as DK;
        match value {
            DK::Pressure600mbar => 0x03,
            DK::Pressure60mbar => 0x04,
            DK::Strain24Bit => 0x11,
            DK::Io8Di8Do => 0x20,
            DK::Io4Di4Do => 0x21,
            DK::Io4Ai => 0x22,
            DK::Encoder1000Ppr => 0x2A,
            DK::AngleXy90 => 0x30,
            DK::AngleXy30 => 0x31,
            DK::Distance22mm => 0x40,
            DK::Distance225mm => 0x41,
            DK::AirPollutionCoNoxVoc => 0x50,
            DK::AirPollutionPm => 0x51,
            DK::AirPollutionCoNoxVocPm => 0x52,
            DK::AirPollutionCoNoxVocPmGps => 0x53,
            DK::Unknown(other) => other,
        }
    }
}

/// Outcome of one ping. Created fresh for every ping, never stored by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingReply {
    /// Who answered.
    pub source: Address,
    /// Who was asked.
    pub pinged: Address,
    pub device: DeviceKind,
    pub version: ProtocolVersion,
    /// Wall-clock round trip of the transaction.
    pub latency: Duration,
    /// Sequence number of the ping on its network, see [`Network::is_ping_latest`](crate::network::Network::is_ping_latest).
    pub sequence: u32,
}

impl PingReply {
    /// Data carried by a ping reply.
    pub const LEN: usize = 3;

    pub(crate) fn parse(
        message: &Message,
        pinged: Address,
        latency: Duration,
        sequence: u32,
    ) -> Option<Self> {
        if message.kind != MessageKind::PingReply || message.data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            source: message.source,
            pinged,
            device: DeviceKind::from(message.data[0]),
            version: ProtocolVersion::new(message.data[1], message.data[2]),
            latency,
            sequence,
        })
    }
}

/// Identity record answered to `GET_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device: DeviceKind,
    pub version: ProtocolVersion,
    pub uid: u64,
}

impl DeviceInfo {
    /// Device id, protocol major and minor, uid `u64` little-endian.
    pub const LEN: usize = 11;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }
        Some(Self {
            device: DeviceKind::from(data[0]),
            version: ProtocolVersion::new(data[1], data[2]),
            uid: u64::from_le_bytes(data[3..Self::LEN].try_into().ok()?),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0] = self.device.into();
        bytes[1] = self.version.major;
        bytes[2] = self.version.minor;
        bytes[3..].copy_from_slice(&self.uid.to_le_bytes());
        bytes
    }
}
