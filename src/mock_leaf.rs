//! Leaf firmware emulation, used in unit tests to run whole bus scenarios without hardware.
//!
//! A [`MockBus`] stands in for the serial port: frames the master writes are decoded and
//! handed to every attached [`MockLeaf`], their replies are queued for the master to read.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use strum::IntoEnumIterator;

use crate::config::PROTOCOL_VERSION;
use crate::frame::{self, FRAME_OVERHEAD, SOH};
use crate::message::{Address, DeviceInfo, DeviceKind, Message, MessageKind};
use crate::mock_serial::MockSerialError;
use crate::register::{
    Channel, DESIRED_CYCLE_TIME_US, DEVICE_ADDRESS, DEVICE_CONFIG, DEVICE_ERROR, DEVICE_UID,
    DeviceConfig, ErrorFlags, FACTORY_GAIN, FACTORY_OFFSET, GAIN_PV, MAX_PV, MEAN_PV,
    MEMORY_LOCK, MEMORY_SIZE, MEMORY_UNLOCKED, MESSAGE, MIN_PV, NET_CYCLE_TIME_US, OFFSET_PV,
    PV, READ_ONLY, Register, RegisterType, STD_DEV_PV, VOLATILE,
};

/// A rebooting leaf is deaf for this long.
const REBOOT_TIME: Duration = Duration::from_millis(50);
const FACTORY_CYCLE_TIME_US: u32 = 10_000;
/// Cap on free-run samples caught up in one go.
const MAX_SAMPLES_PER_TICK: u64 = 16;

#[derive(Debug, Default, Clone, Copy)]
struct RunningStats {
    count: u32,
    mean: f64,
    m2: f64,
    min: f32,
    max: f32,
}

impl RunningStats {
    fn push(&mut self, value: f32) {
        self.count += 1;
        let x = f64::from(value);
        let delta = x - self.mean;
        self.mean += delta / f64::from(self.count);
        self.m2 += delta * (x - self.mean);
        if self.count == 1 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }

    fn std_dev(&self) -> f32 {
        (self.m2 / f64::from(self.count.max(1))).sqrt() as f32
    }
}

/// One emulated leaf.
pub struct MockLeaf {
    address: u8,
    device: DeviceKind,
    memory: [u8; MEMORY_SIZE as usize],
    silent_until: Option<Instant>,
    last_sample: Instant,
    samples: u32,
    stats: [RunningStats; 4],
}

impl MockLeaf {
    pub fn new(address: u8, device: DeviceKind) -> Self {
        let mut leaf = Self {
            address,
            device,
            memory: [0; MEMORY_SIZE as usize],
            silent_until: None,
            last_sample: Instant::now(),
            samples: 0,
            stats: Default::default(),
        };
        leaf.factory_defaults();
        leaf.set(DEVICE_ADDRESS, address);
        leaf.set(DEVICE_UID, 0xE660_5838_1B2C_7D00 | u64::from(address));
        let text = b"leaf ready";
        leaf.memory[usize::from(MESSAGE.offset)..][..text.len()].copy_from_slice(text);
        leaf
    }

    fn get<T: RegisterType>(&self, register: Register<T>) -> T {
        let span = register.descriptor().span();
        T::decode(&self.memory[usize::from(span.start)..usize::from(span.end)])
            .expect("register fits its span")
    }

    fn set<T: RegisterType>(&mut self, register: Register<T>, value: T) {
        let bytes = value.encode();
        self.memory[usize::from(register.offset())..][..bytes.len()].copy_from_slice(&bytes);
    }

    fn factory_defaults(&mut self) {
        for channel in Channel::iter() {
            self.set(GAIN_PV[channel.index()], FACTORY_GAIN);
            self.set(OFFSET_PV[channel.index()], FACTORY_OFFSET);
        }
        self.set(DESIRED_CYCLE_TIME_US, FACTORY_CYCLE_TIME_US);
        self.set(DEVICE_CONFIG, DeviceConfig::clean());
    }

    fn reboot(&mut self, now: Instant) {
        self.memory[usize::from(VOLATILE.start)..usize::from(VOLATILE.end)].fill(0);
        self.stats = Default::default();
        self.silent_until = Some(now + REBOOT_TIME);
        self.address = self.get(DEVICE_ADDRESS);
    }

    fn sample(&mut self) {
        self.samples += 1;
        let config = self.get(DEVICE_CONFIG);
        for channel in Channel::iter() {
            let i = channel.index();
            let raw = (i + 1) as f32 * (1.0 + 0.1 * (self.samples % 5) as f32);
            let value = raw * self.get(GAIN_PV[i]) + self.get(OFFSET_PV[i]);
            self.set(PV[i], value);

            if config.calc_stat() {
                self.stats[i].push(value);
                let stats = self.stats[i];
                self.set(MEAN_PV[i], stats.mean as f32);
                self.set(STD_DEV_PV[i], stats.std_dev());
                self.set(MIN_PV[i], stats.min);
                self.set(MAX_PV[i], stats.max);
            }
        }
    }

    /// Free-running leaves catch up on the samples due since the last request.
    fn tick(&mut self, now: Instant) {
        if !self.get(DEVICE_CONFIG).free_run() {
            return;
        }
        let cycle = u64::from(self.get(DESIRED_CYCLE_TIME_US).max(1));
        let due = now.duration_since(self.last_sample).as_micros() as u64 / cycle;
        if due == 0 {
            return;
        }
        for _ in 0..due.min(MAX_SAMPLES_PER_TICK) {
            self.sample();
        }
        self.last_sample = now;
        self.set(NET_CYCLE_TIME_US, cycle as u32);
    }

    fn reply(&self, to: Address, kind: MessageKind, data: &[u8]) -> Option<Message> {
        Message::new(Address::new(self.address), to, kind, data).ok()
    }

    fn handle(&mut self, request: &Message, now: Instant) -> Option<Message> {
        if self.silent_until.is_some_and(|until| now < until) {
            return None;
        }
        let broadcast = request.destination.is_broadcast();
        if !broadcast && request.destination != Address::new(self.address) {
            return None;
        }
        self.tick(now);
        let master = request.source;

        match request.kind {
            MessageKind::Sync => {
                self.sample();
                None
            }
            MessageKind::Sleep => {
                let micros = u32::from_le_bytes(request.data.get(..4)?.try_into().ok()?);
                self.silent_until = Some(now + Duration::from_micros(u64::from(micros)));
                None
            }
            _ if broadcast => None,
            MessageKind::Ping => self.reply(
                master,
                MessageKind::PingReply,
                &[self.device.into(), PROTOCOL_VERSION.major, PROTOCOL_VERSION.minor],
            ),
            MessageKind::GetInfo => {
                let info = DeviceInfo {
                    device: self.device,
                    version: PROTOCOL_VERSION,
                    uid: self.get(DEVICE_UID),
                };
                self.reply(master, MessageKind::InfoReply, &info.to_bytes())
            }
            MessageKind::ResetSoft => {
                self.reboot(now);
                None
            }
            MessageKind::ResetHard => {
                if self.get(MEMORY_LOCK) == MEMORY_UNLOCKED {
                    self.factory_defaults();
                    self.reboot(now);
                    None
                } else {
                    self.reply(master, MessageKind::AckNok, &[])
                }
            }
            MessageKind::WriteReg => {
                let (offset, bytes) = match request.data.as_slice() {
                    [l, h, bytes @ ..] => (usize::from(u16::from_le_bytes([*l, *h])), bytes),
                    _ => return self.reply(master, MessageKind::AckNok, &[]),
                };
                if offset + bytes.len() > usize::from(READ_ONLY.start) {
                    return self.reply(master, MessageKind::AckNok, &[]);
                }
                self.memory[offset..][..bytes.len()].copy_from_slice(bytes);
                self.address = self.get(DEVICE_ADDRESS);
                self.reply(master, MessageKind::AckOk, &[])
            }
            MessageKind::ReadReg => {
                let (offset, length) = match request.data.as_slice() {
                    [l, h, length, ..] => (usize::from(u16::from_le_bytes([*l, *h])), usize::from(*length)),
                    _ => return self.reply(master, MessageKind::AckNok, &[]),
                };
                if offset + length > usize::from(MEMORY_SIZE) {
                    return self.reply(master, MessageKind::AckNok, &[]);
                }
                self.reply(master, MessageKind::ReadReply, &self.memory[offset..][..length])
            }
            _ => None,
        }
    }
}

#[derive(Default)]
struct BusState {
    leaves: Vec<MockLeaf>,
    /// Written by the master, not yet framed.
    incoming: Vec<u8>,
    /// Waiting to be read by the master.
    outgoing: VecDeque<u8>,
    written: Vec<u8>,
    requests: usize,
}

impl BusState {
    fn dispatch(&mut self) {
        loop {
            match self.incoming.iter().position(|b| *b == SOH) {
                Some(start) => {
                    self.incoming.drain(..start);
                }
                None => {
                    self.incoming.clear();
                    return;
                }
            }
            let Some(&len) = self.incoming.get(1) else {
                return;
            };
            let len = usize::from(len);
            if len < FRAME_OVERHEAD {
                self.incoming.remove(0);
                continue;
            }
            if self.incoming.len() < len {
                return;
            }
            let bytes: Vec<u8> = self.incoming.drain(..len).collect();
            let Ok(request) = frame::decode(&bytes) else {
                continue;
            };
            self.requests += 1;
            let now = Instant::now();
            for leaf in &mut self.leaves {
                if let Some(reply) = leaf.handle(&request, now) {
                    let frame = reply.encode().expect("replies fit a frame");
                    self.outgoing.extend(frame.iter().copied());
                }
            }
        }
    }
}

/// The emulated line, clones share it.
#[derive(Clone, Default)]
pub struct MockBus(Rc<RefCell<BusState>>);

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, leaf: MockLeaf) {
        self.0.borrow_mut().leaves.push(leaf);
    }

    /// Frames received from the master, replied to or not.
    pub fn requests_seen(&self) -> usize {
        self.0.borrow().requests
    }

    /// Every byte the master wrote.
    pub fn written(&self) -> Vec<u8> {
        self.0.borrow().written.clone()
    }

    /// Queue raw bytes, the master reads them before any later reply.
    pub fn inject_before_reply(&self, bytes: &[u8]) {
        self.0.borrow_mut().outgoing.extend(bytes.iter().copied());
    }

    /// Set error flags on every leaf.
    pub fn raise_error(&self, flags: ErrorFlags) {
        for leaf in &mut self.0.borrow_mut().leaves {
            leaf.set(DEVICE_ERROR, flags);
        }
    }
}

impl embedded_io::ErrorType for MockBus {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockBus {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.borrow_mut();
        state.written.extend_from_slice(buf);
        state.incoming.extend_from_slice(buf);
        state.dispatch();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockBus {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.borrow_mut();
        if state.outgoing.is_empty() {
            return Err(MockSerialError::WouldBlock);
        }
        let count = buf.len().min(state.outgoing.len());
        for (slot, byte) in buf.iter_mut().zip(state.outgoing.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    #[test]
    fn test_leaf_answers_ping() {
        let mut bus = MockBus::new();
        bus.attach(MockLeaf::new(0x05, DeviceKind::Encoder1000Ppr));

        let ping = frame::encode(Address::DEFAULT_MASTER, Address::new(0x05), MessageKind::Ping, &[]).unwrap();
        bus.write_all(&ping).unwrap();

        let mut buffer = [0u8; 16];
        let count = bus.read(&mut buffer).unwrap();
        let reply = frame::decode(&buffer[..count]).unwrap();
        assert_eq!(reply.kind, MessageKind::PingReply);
        assert_eq!(reply.data.as_slice(), &[0x2A, 1, 4]);
    }

    #[test]
    fn test_other_addresses_stay_silent() {
        let mut bus = MockBus::new();
        bus.attach(MockLeaf::new(0x05, DeviceKind::Encoder1000Ppr));

        let ping = frame::encode(Address::DEFAULT_MASTER, Address::new(0x06), MessageKind::Ping, &[]).unwrap();
        bus.write_all(&ping[..3]).unwrap();
        bus.write_all(&ping[3..]).unwrap();
        assert_eq!(bus.requests_seen(), 1);
        assert!(bus.read(&mut [0u8; 16]).is_err());
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            stats.push(value);
        }
        assert!((stats.mean - 5.0).abs() < 1e-9);
        assert!((stats.std_dev() - 2.0).abs() < 1e-6);
        assert_eq!((stats.min, stats.max), (2.0, 9.0));
    }
}
