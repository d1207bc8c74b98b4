//! Our error types for the bus master.

use thiserror::Error;

use crate::frame::FrameError;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Custom error type for bus communications.
///
/// `I` is the error type of the serial interface the bus runs over.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error")]
    SerialError(I),
    /// No valid frame was decoded before the deadline, the leaf is absent or its reply was lost.
    #[error("Communication timeout")]
    Timeout,
    #[error("Frame checksum mismatch")]
    ChecksumError,
    /// The deadline expired while a frame was only partially received.
    #[error("Incomplete message")]
    MessageIncomplete,
    #[error("Frame does not start with SOH")]
    BadStartOfHeader,
    #[error("Frame length field does not match the frame")]
    LengthMismatch,
    /// Rejected locally, nothing was sent on the wire.
    #[error("Register at offset {0} is read-only")]
    WriteErrorReadOnly(u16),
    /// Rejected locally, nothing was sent on the wire.
    #[error("Payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),
    /// A request was issued while a reply to a previous one is still awaited.
    #[error("A reply is still pending on the bus")]
    ReplyPending,
    /// The leaf answered with `ACK_NOK`.
    #[error("Request refused by the leaf")]
    Refused,
    #[error("Unknown register")]
    UnknownRegister,
    /// A dynamic value does not fit the register it was written to.
    #[error("Value does not match the register type")]
    TypeMismatch,
    #[error("Invalid response received")]
    InvalidResponse,
}

impl<I: embedded_io::Error> From<FrameError> for Error<I> {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::MessageIncomplete => Error::MessageIncomplete,
            FrameError::ChecksumError => Error::ChecksumError,
            FrameError::BadStartOfHeader => Error::BadStartOfHeader,
            FrameError::LengthMismatch => Error::LengthMismatch,
            FrameError::PayloadTooLarge(len) => Error::PayloadTooLarge(len),
        }
    }
}
