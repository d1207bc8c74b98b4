//! Frame codec and checksum.
//!
//! Every transaction on the bus is carried by one frame:
//!
//! ```text
//! SOH | LEN | FROM | DST | KIND_L | KIND_H | DATA ... | CHECKSUM
//! ```
//!
//! `LEN` counts the whole frame, header and checksum included. The message kind is a
//! 16 bit little-endian id, so a frame without data is 7 bytes long and the data of a
//! single frame is limited to 248 bytes.
//!
//! The checksum is the two's complement of the byte sum of everything before it, so the
//! byte sum of an intact frame is zero.

use thiserror::Error;

use crate::message::{Address, Message, MessageKind};

/// Start of header marker.
pub const SOH: u8 = 0x01;
/// `LEN` is a single byte.
pub const MAX_FRAME_LEN: usize = 255;
/// SOH, LEN, FROM, DST, the two kind bytes and the checksum.
pub const FRAME_OVERHEAD: usize = 7;
/// Largest data block a single frame can carry.
pub const MAX_DATA_LEN: usize = MAX_FRAME_LEN - FRAME_OVERHEAD;
/// SOH, LEN, FROM and DST.
pub const HEADER_LEN: usize = 4;

/// Raw bytes of one encoded frame.
pub type Frame = heapless::Vec<u8, MAX_FRAME_LEN>;

/// Reasons a byte sequence is not a valid frame, or a message cannot be framed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("fewer bytes than the frame declares")]
    MessageIncomplete,
    #[error("checksum mismatch")]
    ChecksumError,
    #[error("frame does not start with SOH")]
    BadStartOfHeader,
    #[error("length field disagrees with the frame")]
    LengthMismatch,
    #[error("{0} bytes of data do not fit a frame")]
    PayloadTooLarge(usize),
}

/// Compute the checksum byte for the bytes preceding it.
pub fn checksum(bytes: &[u8]) -> u8 {
    byte_sum(bytes).wrapping_neg()
}

/// Whether a complete frame, checksum included, sums up to zero.
pub fn is_intact(frame: &[u8]) -> bool {
    byte_sum(frame) == 0
}

fn byte_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Serialize one message into a frame.
pub fn encode(
    source: Address,
    destination: Address,
    kind: MessageKind,
    data: &[u8],
) -> Result<Frame, FrameError> {
    if data.len() > MAX_DATA_LEN {
        return Err(FrameError::PayloadTooLarge(data.len()));
    }
    let too_large = |_| FrameError::PayloadTooLarge(data.len());
    let [kind_l, kind_h] = u16::from(kind).to_le_bytes();

    let mut frame = Frame::new();
    frame
        .extend_from_slice(&[
            SOH,
            (FRAME_OVERHEAD + data.len()) as u8,
            source.value(),
            destination.value(),
            kind_l,
            kind_h,
        ])
        .map_err(too_large)?;
    frame.extend_from_slice(data).map_err(too_large)?;
    frame
        .push(checksum(&frame))
        .map_err(|_| FrameError::PayloadTooLarge(data.len()))?;
    Ok(frame)
}

/// Parse one complete frame.
///
/// The length is checked before the checksum so a truncated frame is reported as
/// incomplete rather than corrupt. A failed decode never yields any field.
pub fn decode(bytes: &[u8]) -> Result<Message, FrameError> {
    if bytes.len() < FRAME_OVERHEAD {
        return Err(FrameError::MessageIncomplete);
    }
    let declared = usize::from(bytes[1]);
    if bytes.len() < declared {
        return Err(FrameError::MessageIncomplete);
    }
    if !is_intact(bytes) {
        return Err(FrameError::ChecksumError);
    }
    if bytes[0] != SOH {
        return Err(FrameError::BadStartOfHeader);
    }
    if declared != bytes.len() || declared < FRAME_OVERHEAD {
        return Err(FrameError::LengthMismatch);
    }

    let data = &bytes[HEADER_LEN + 2..declared - 1];
    Ok(Message {
        source: Address::new(bytes[2]),
        destination: Address::new(bytes[3]),
        kind: MessageKind::from(u16::from_le_bytes([bytes[4], bytes[5]])),
        data: heapless::Vec::from_slice(data)
            .map_err(|_| FrameError::PayloadTooLarge(data.len()))?,
    })
}
