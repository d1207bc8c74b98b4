//! The network coordinator, owner of the one transport of a bus.

use core::cell::{Cell, RefCell};
use core::time::Duration;
use std::time::Instant;

use fugit::MicrosDurationU32;
use log::{debug, info};

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::leaf::Leaf;
use crate::message::{Address, Message, MessageKind, PingReply};
use crate::transport::{BusTransport, TransportStats};

/// A bus and everything on it.
///
/// Only one transaction may be in flight at a time, every operation borrows the transport
/// for its whole duration. The network is not `Sync`: share it between threads behind a
/// mutex.
///
/// ```no_run
/// # fn demo<S: embedded_io::Read + embedded_io::Write>(port: S) -> leafbus::error::Result<(), S::Error> {
/// use leafbus::network::Network;
///
/// let network = Network::new(port);
/// for reply in network.scan(leafbus::message::Address::unicast())? {
///     println!("{} is a {:?}", reply.source, reply.device);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Network<S: embedded_io::Read + embedded_io::Write> {
    transport: RefCell<BusTransport<S>>,
    config: NetworkConfig,
    /// Number of the most recent ping.
    ping_sequence: Cell<u32>,
}

impl<S: embedded_io::Read + embedded_io::Write> Network<S> {
    pub fn new(port: S) -> Self {
        Self::with_config(port, NetworkConfig::default())
    }

    pub fn with_config(port: S, config: NetworkConfig) -> Self {
        Self {
            transport: RefCell::new(BusTransport::new(port, config.master, config.frame_timeout)),
            config,
            ping_sequence: Cell::new(0),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// A proxy to the leaf answering at `address`.
    pub fn leaf(&self, address: impl Into<Address>) -> Leaf<'_, S> {
        Leaf::new(self, address.into())
    }

    pub fn stats(&self) -> TransportStats {
        self.transport.borrow().stats()
    }

    pub fn into_transport(self) -> BusTransport<S> {
        self.transport.into_inner()
    }

    /// Send a message which gets no reply.
    pub fn transmit(&self, destination: Address, kind: MessageKind, data: &[u8]) -> Result<(), S::Error> {
        self.transport()?.transmit(destination, kind, data)
    }

    /// One request/reply transaction, waiting for the reply as long as configured.
    pub fn exchange(&self, destination: Address, kind: MessageKind, data: &[u8]) -> Result<Message, S::Error> {
        self.exchange_with_timeout(destination, kind, data, self.config.reply_timeout)
    }

    pub fn exchange_with_timeout(
        &self,
        destination: Address,
        kind: MessageKind,
        data: &[u8],
        timeout: Duration,
    ) -> Result<Message, S::Error> {
        self.transport()?.exchange(destination, kind, data, timeout)
    }

    /// Make every leaf take one sample now.
    pub fn sync(&self) -> Result<(), S::Error> {
        self.transmit(Address::BROADCAST, MessageKind::Sync, &[])
    }

    /// Put every leaf to sleep, they ignore the bus until woken up by the end of `duration`.
    pub fn sleep_all(&self, duration: MicrosDurationU32) -> Result<(), S::Error> {
        info!("all leaves sleeping for {} us", duration.ticks());
        self.transmit(Address::BROADCAST, MessageKind::Sleep, &duration.ticks().to_le_bytes())
    }

    /// Ping one address, each ping gets a new sequence number.
    pub(crate) fn ping(&self, address: Address) -> Result<PingReply, S::Error> {
        let sequence = self.ping_sequence.get().wrapping_add(1);
        self.ping_sequence.set(sequence);

        let start = Instant::now();
        let reply = self.exchange(address, MessageKind::Ping, &[])?;
        let latency = start.elapsed();

        match reply.kind {
            MessageKind::PingReply => {
                PingReply::parse(&reply, address, latency, sequence).ok_or(Error::InvalidResponse)
            }
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Whether `reply` is a sound answer to the most recent ping on this network.
    ///
    /// It must come from the address which was pinged and announce the expected protocol
    /// version.
    pub fn is_ping_latest(&self, reply: &PingReply) -> bool {
        reply.version == self.config.expected_version
            && reply.source == reply.pinged
            && reply.sequence == self.ping_sequence.get()
    }

    /// Ping each address in turn and collect the replies.
    ///
    /// The master's own address and silent addresses are skipped, any other failure ends
    /// the scan.
    pub fn scan(&self, addresses: impl IntoIterator<Item = Address>) -> Result<Vec<PingReply>, S::Error> {
        let mut found = Vec::new();
        for address in addresses.into_iter().filter(|address| *address != self.config.master) {
            match self.ping(address) {
                Ok(reply) => {
                    info!("found {:?} v{} at {address}", reply.device, reply.version);
                    found.push(reply);
                }
                Err(Error::Timeout) => debug!("nothing at {address}"),
                Err(err) => return Err(err),
            }
        }
        Ok(found)
    }

    fn transport(&self) -> Result<core::cell::RefMut<'_, BusTransport<S>>, S::Error> {
        self.transport.try_borrow_mut().map_err(|_| Error::ReplyPending)
    }
}
