//! Half-duplex request/reply transport over a byte stream.
//!
//! [`BusTransport`] owns the serial port. Requests are written in one go, replies are
//! assembled byte by byte by a small state machine which resynchronizes on the next
//! SOH whenever a frame turns out to be corrupt, truncated or of impossible length.

use core::time::Duration;
use std::time::Instant;

use embedded_io::Error as _;
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::frame::{self, FRAME_OVERHEAD, Frame, FrameError, HEADER_LEN, MAX_FRAME_LEN, SOH};
use crate::message::{Address, Message, MessageKind};

/// Bytes requested from the port per read.
const READ_CHUNK: usize = 64;
/// One read chunk on top of a replayed frame.
const BACKLOG: usize = MAX_FRAME_LEN + READ_CHUNK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    AwaitSoh,
    /// LEN, FROM and DST.
    AwaitHeader,
    /// Kind and data.
    AwaitPayload,
    AwaitChecksum,
}

/// Counters kept since the transport was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames delivered to the caller.
    pub frames: u64,
    pub checksum_errors: u64,
    pub length_errors: u64,
    /// Partial frames dropped because the rest never arrived.
    pub incomplete: u64,
    /// Bytes seen outside of any frame.
    pub noise_bytes: u64,
    /// Receives which ran out of time without dropping a frame.
    pub timeouts: u64,
    /// Valid frames addressed to someone else.
    pub skipped: u64,
}

/// You can create a BusTransport using any interface which implements [embedded_io::Read] & [embedded_io::Write].
///
/// A non-blocking port, or one with a short read timeout, is expected: reads failing with
/// [`TimedOut`](embedded_io::ErrorKind::TimedOut), [`Other`](embedded_io::ErrorKind::Other)
/// or [`Interrupted`](embedded_io::ErrorKind::Interrupted) mean that nothing arrived yet.
pub struct BusTransport<S: embedded_io::Read + embedded_io::Write> {
    port: S,
    master: Address,
    frame_timeout: Duration,
    /// Set between a request and the receive of its reply.
    pending: bool,
    /// Bytes read from the port but not yet consumed.
    backlog: heapless::Deque<u8, BACKLOG>,
    stats: TransportStats,
}

impl<S: embedded_io::Read + embedded_io::Write> BusTransport<S> {
    pub fn new(port: S, master: Address, frame_timeout: Duration) -> Self {
        Self {
            port,
            master,
            frame_timeout,
            pending: false,
            backlog: heapless::Deque::new(),
            stats: TransportStats::default(),
        }
    }

    pub fn master(&self) -> Address {
        self.master
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Whether a request was sent and its reply not yet received.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Give the port back.
    pub fn into_inner(self) -> S {
        self.port
    }

    /// Send a message no reply is expected to, e.g. a broadcast.
    pub fn transmit(
        &mut self,
        destination: Address,
        kind: MessageKind,
        data: &[u8],
    ) -> Result<(), S::Error> {
        if self.pending {
            return Err(Error::ReplyPending);
        }
        let frame = frame::encode(self.master, destination, kind, data)?;

        // Whatever is left over belongs to an earlier transaction.
        if !self.backlog.is_empty() {
            trace!("discarding {} stale bytes", self.backlog.len());
            self.stats.noise_bytes += self.backlog.len() as u64;
            self.backlog.clear();
        }

        debug!("{kind:?} -> {destination}, {} bytes of data", data.len());
        self.port.write_all(&frame).map_err(Error::SerialError)?;
        self.port.flush().map_err(Error::SerialError)
    }

    /// Send a message and mark its reply as pending, collect it with [`Self::receive`].
    pub fn request(
        &mut self,
        destination: Address,
        kind: MessageKind,
        data: &[u8],
    ) -> Result<(), S::Error> {
        self.transmit(destination, kind, data)?;
        self.pending = true;
        Ok(())
    }

    /// Send a request and wait for its reply.
    pub fn exchange(
        &mut self,
        destination: Address,
        kind: MessageKind,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Message, S::Error> {
        self.request(destination, kind, data)?;
        self.receive(timeout)
    }

    /// Wait for the next valid frame addressed to the master.
    ///
    /// `timeout` bounds the wait for a frame to start, once its SOH is seen the frame has
    /// the frame timeout to complete. If nothing usable arrived the error tells why: a
    /// frame was dropped for being corrupt or incomplete, or the bus stayed silent
    /// ([`Error::Timeout`]).
    ///
    /// Any outcome clears the pending reply.
    pub fn receive(&mut self, timeout: Duration) -> Result<Message, S::Error> {
        self.pending = false;

        let deadline = Instant::now() + timeout;
        let mut frame_deadline = deadline;
        let mut frame = Frame::new();
        let mut state = RxState::AwaitSoh;
        let mut dropped: Option<FrameError> = None;

        loop {
            // Checked before every byte, a line that never goes quiet still times out.
            let now = Instant::now();
            match state {
                RxState::AwaitSoh if now >= deadline => {
                    return Err(match dropped {
                        Some(reason) => reason.into(),
                        None => {
                            self.stats.timeouts += 1;
                            Error::Timeout
                        }
                    });
                }
                RxState::AwaitSoh => {}
                _ if now >= frame_deadline => {
                    warn!("dropping partial frame of {} bytes", frame.len());
                    self.stats.incomplete += 1;
                    dropped = Some(FrameError::MessageIncomplete);
                    self.resync(&mut frame);
                    state = RxState::AwaitSoh;
                    continue;
                }
                _ => {}
            }

            let Some(byte) = self.next_byte()? else {
                continue;
            };

            if state == RxState::AwaitSoh {
                if byte == SOH {
                    frame.clear();
                    frame_deadline = Instant::now() + self.frame_timeout;
                    state = RxState::AwaitHeader;
                } else {
                    trace!("noise byte {byte:#04x}");
                    self.stats.noise_bytes += 1;
                    continue;
                }
            }
            // A frame never outgrows its declared length, which fits a `Frame`.
            frame.push(byte).map_err(|_| Error::LengthMismatch)?;

            match state {
                RxState::AwaitSoh => {}
                RxState::AwaitHeader => {
                    if frame.len() == HEADER_LEN {
                        if usize::from(frame[1]) < FRAME_OVERHEAD {
                            warn!("impossible frame length {}", frame[1]);
                            self.stats.length_errors += 1;
                            dropped = Some(FrameError::LengthMismatch);
                            self.resync(&mut frame);
                            state = RxState::AwaitSoh;
                        } else {
                            state = RxState::AwaitPayload;
                        }
                    }
                }
                RxState::AwaitPayload => {
                    if frame.len() + 1 == usize::from(frame[1]) {
                        state = RxState::AwaitChecksum;
                    }
                }
                RxState::AwaitChecksum => {
                    state = RxState::AwaitSoh;
                    match frame::decode(&frame) {
                        Ok(message) if message.source == self.master => {
                            trace!("ignoring echo of our own {:?}", message.kind);
                            self.stats.skipped += 1;
                            frame.clear();
                        }
                        Ok(message) if message.destination == self.master => {
                            debug!(
                                "{:?} <- {}, {} bytes of data",
                                message.kind,
                                message.source,
                                message.data.len()
                            );
                            self.stats.frames += 1;
                            return Ok(message);
                        }
                        Ok(message) => {
                            trace!("skipping {:?} for {}", message.kind, message.destination);
                            self.stats.skipped += 1;
                            frame.clear();
                        }
                        Err(err) => {
                            warn!("dropping frame: {err}");
                            match err {
                                FrameError::ChecksumError => self.stats.checksum_errors += 1,
                                _ => self.stats.length_errors += 1,
                            }
                            dropped = Some(err);
                            self.resync(&mut frame);
                        }
                    }
                }
            }
        }
    }

    /// Push back everything after the failed SOH, the next frame may start in there.
    fn resync(&mut self, frame: &mut Frame) {
        for byte in frame.iter().skip(1).rev() {
            // Cannot overflow: the backlog holds less than one read chunk besides the frame.
            let _ = self.backlog.push_front(*byte);
        }
        frame.clear();
    }

    fn next_byte(&mut self) -> Result<Option<u8>, S::Error> {
        if let Some(byte) = self.backlog.pop_front() {
            return Ok(Some(byte));
        }
        let mut chunk = [0u8; READ_CHUNK];
        match self.port.read(&mut chunk) {
            Ok(count) => {
                for byte in &chunk[..count] {
                    // The backlog is empty here.
                    let _ = self.backlog.push_back(*byte);
                }
                Ok(self.backlog.pop_front())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    embedded_io::ErrorKind::Other
                        | embedded_io::ErrorKind::TimedOut
                        | embedded_io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(Error::SerialError(e)),
        }
    }
}
