//! Proxy to one leaf of a network.

use fugit::MicrosDurationU32;
use log::info;

use crate::error::{Error, Result};
use crate::frame::MAX_DATA_LEN;
use crate::message::{Address, DeviceInfo, MessageKind, PingReply};
use crate::network::Network;
use crate::register::{
    self, AV, Channel, DEVICE_ADDRESS, DEVICE_CONFIG, DEVICE_ERROR, DEVICE_STATUS, DEVICE_UID,
    DESIRED_CYCLE_TIME_US, DV, DeviceConfig, ErrorFlags, GAIN_PV, MAX_PV, MAX_REGISTER_WIDTH,
    MEAN_PV, MEMORY_LOCK, MEMORY_UNLOCKED, MESSAGE, MIN_PV, NET_CYCLE_TIME_US, OFFSET_PV, PV,
    Register, RegisterDescriptor, RegisterType, STD_DEV_PV, Value,
};

/// Answer of a leaf to a hard reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardReset {
    /// The leaf is rebooting with factory calibration.
    Accepted,
    /// The memory lock was closed, nothing changed.
    Refused,
}

/// Light reference to one leaf, it can be created or dropped at no cost.
///
/// Every operation is one transaction on the network. Methods reading a register return
/// whatever the leaf holds at the time of the request, nothing is cached.
pub struct Leaf<'n, S: embedded_io::Read + embedded_io::Write> {
    network: &'n Network<S>,
    address: Address,
}

impl<'n, S: embedded_io::Read + embedded_io::Write> Leaf<'n, S> {
    pub fn new(network: &'n Network<S>, address: Address) -> Self {
        Self { network, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn network(&self) -> &'n Network<S> {
        self.network
    }

    /// Check the leaf is present, and what it is.
    pub fn ping(&self) -> Result<PingReply, S::Error> {
        self.network.ping(self.address)
    }

    pub fn info(&self) -> Result<DeviceInfo, S::Error> {
        let reply = self.network.exchange(self.address, MessageKind::GetInfo, &[])?;
        match reply.kind {
            MessageKind::InfoReply => DeviceInfo::parse(&reply.data).ok_or(Error::InvalidResponse),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Reboot the leaf, volatile memory is cleared. The leaf does not answer.
    pub fn reset_soft(&self) -> Result<(), S::Error> {
        info!("soft reset of {}", self.address);
        self.network.transmit(self.address, MessageKind::ResetSoft, &[])
    }

    /// Restore factory calibration and reboot.
    ///
    /// The leaf only complies while its memory lock is open, see [`Self::unlock`]. An
    /// accepted reset is not answered, so silence counts as acceptance: an absent leaf
    /// looks the same.
    pub fn reset_hard(&self) -> Result<HardReset, S::Error> {
        match self.network.exchange(self.address, MessageKind::ResetHard, &[]) {
            Ok(reply) if reply.kind == MessageKind::AckNok => {
                info!("hard reset of {} refused, memory is locked", self.address);
                Ok(HardReset::Refused)
            }
            Ok(reply) if reply.kind == MessageKind::AckOk => Ok(HardReset::Accepted),
            Ok(_) => Err(Error::InvalidResponse),
            Err(Error::Timeout) => {
                info!("hard reset of {}", self.address);
                Ok(HardReset::Accepted)
            }
            Err(err) => Err(err),
        }
    }

    /// Open the memory lock so the next hard reset is honored.
    pub fn unlock(&self) -> Result<(), S::Error> {
        self.write(MEMORY_LOCK, MEMORY_UNLOCKED)
    }

    /// The leaf ignores the bus for `duration`.
    pub fn sleep(&self, duration: MicrosDurationU32) -> Result<(), S::Error> {
        self.network.transmit(
            self.address,
            MessageKind::Sleep,
            &duration.ticks().to_le_bytes(),
        )
    }

    /// Read `length` bytes of memory starting at `offset`.
    pub fn read_reg(
        &self,
        offset: u16,
        length: usize,
    ) -> Result<heapless::Vec<u8, MAX_DATA_LEN>, S::Error> {
        let request = register::read_request(offset, length)?;
        let reply = self.network.exchange(self.address, MessageKind::ReadReg, &request)?;
        match reply.kind {
            MessageKind::ReadReply if reply.data.len() == length => Ok(reply.data),
            MessageKind::AckNok => Err(Error::Refused),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Write `bytes` to memory starting at `offset`.
    ///
    /// Writes touching read-only memory are refused before anything is sent.
    pub fn write_reg(&self, offset: u16, bytes: &[u8]) -> Result<(), S::Error> {
        if register::is_read_only(offset, bytes.len()) {
            return Err(Error::WriteErrorReadOnly(offset));
        }
        let request = register::write_request(offset, bytes)?;
        let reply = self.network.exchange(self.address, MessageKind::WriteReg, &request)?;
        match reply.kind {
            MessageKind::AckOk => Ok(()),
            MessageKind::AckNok => Err(Error::Refused),
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Fill `buffer` from memory starting at `offset`, in as many transactions as needed.
    ///
    /// The whole block must lie within the 16 bit address space.
    pub fn read_block(&self, offset: u16, buffer: &mut [u8]) -> Result<(), S::Error> {
        let len = buffer.len();
        if usize::from(offset) + len > usize::from(u16::MAX) + 1 {
            return Err(Error::PayloadTooLarge(len));
        }
        for (index, chunk) in buffer.chunks_mut(MAX_DATA_LEN).enumerate() {
            let position = u16::try_from(usize::from(offset) + index * MAX_DATA_LEN)
                .map_err(|_| Error::PayloadTooLarge(len))?;
            chunk.copy_from_slice(&self.read_reg(position, chunk.len())?);
        }
        Ok(())
    }

    pub fn read<T: RegisterType>(&self, register: Register<T>) -> Result<T, S::Error> {
        let descriptor = register.descriptor();
        let bytes = self.read_reg(descriptor.offset, usize::from(descriptor.width))?;
        T::decode(&bytes).ok_or(Error::InvalidResponse)
    }

    pub fn write<T: RegisterType>(&self, register: Register<T>, value: T) -> Result<(), S::Error> {
        self.write_reg(register.offset(), &value.encode())
    }

    /// Read any register, typed after its descriptor.
    pub fn read_value(&self, descriptor: &RegisterDescriptor) -> Result<Value, S::Error> {
        let mut buffer = [0u8; MAX_REGISTER_WIDTH];
        let bytes = buffer
            .get_mut(..usize::from(descriptor.width))
            .ok_or(Error::UnknownRegister)?;
        self.read_block(descriptor.offset, bytes)?;
        Value::decode(descriptor, bytes).ok_or(Error::InvalidResponse)
    }

    pub fn write_value(&self, descriptor: &RegisterDescriptor, value: &Value) -> Result<(), S::Error> {
        if descriptor.is_read_only() {
            return Err(Error::WriteErrorReadOnly(descriptor.offset));
        }
        let bytes = value.encode(descriptor).ok_or(Error::TypeMismatch)?;
        self.write_reg(descriptor.offset, &bytes)
    }

    /// Read a register by its name in the [register map](register::REGISTER_MAP).
    pub fn read_named(&self, name: &str) -> Result<Value, S::Error> {
        self.read_value(register::find(name).ok_or(Error::UnknownRegister)?)
    }

    pub fn write_named(&self, name: &str, value: &Value) -> Result<(), S::Error> {
        self.write_value(register::find(name).ok_or(Error::UnknownRegister)?, value)
    }

    /// Four consecutive `f32`, starting at `first`.
    fn read_quad(&self, first: Register<f32>) -> Result<[f32; 4], S::Error> {
        let bytes = self.read_reg(first.offset(), 16)?;
        let mut values = [0f32; 4];
        for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(4)) {
            *value = f32::decode(chunk).ok_or(Error::InvalidResponse)?;
        }
        Ok(values)
    }

    /// Latest sample of a process value, gain and offset applied.
    pub fn pv(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(PV[channel.index()])
    }

    /// All four process values, read in one transaction.
    pub fn process_values(&self) -> Result<[f32; 4], S::Error> {
        self.read_quad(PV[0])
    }

    pub fn mean(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(MEAN_PV[channel.index()])
    }

    pub fn means(&self) -> Result<[f32; 4], S::Error> {
        self.read_quad(MEAN_PV[0])
    }

    pub fn std_dev(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(STD_DEV_PV[channel.index()])
    }

    pub fn std_devs(&self) -> Result<[f32; 4], S::Error> {
        self.read_quad(STD_DEV_PV[0])
    }

    pub fn min(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(MIN_PV[channel.index()])
    }

    pub fn max(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(MAX_PV[channel.index()])
    }

    pub fn gain(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(GAIN_PV[channel.index()])
    }

    pub fn set_gain(&self, channel: Channel, gain: f32) -> Result<(), S::Error> {
        self.write(GAIN_PV[channel.index()], gain)
    }

    pub fn offset(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(OFFSET_PV[channel.index()])
    }

    pub fn set_offset(&self, channel: Channel, offset: f32) -> Result<(), S::Error> {
        self.write(OFFSET_PV[channel.index()], offset)
    }

    pub fn dv(&self, channel: Channel) -> Result<u32, S::Error> {
        self.read(DV[channel.index()])
    }

    pub fn set_dv(&self, channel: Channel, value: u32) -> Result<(), S::Error> {
        self.write(DV[channel.index()], value)
    }

    pub fn av(&self, channel: Channel) -> Result<f32, S::Error> {
        self.read(AV[channel.index()])
    }

    pub fn set_av(&self, channel: Channel, value: f32) -> Result<(), S::Error> {
        self.write(AV[channel.index()], value)
    }

    pub fn device_config(&self) -> Result<DeviceConfig, S::Error> {
        self.read(DEVICE_CONFIG)
    }

    pub fn set_device_config(&self, config: DeviceConfig) -> Result<(), S::Error> {
        self.write(DEVICE_CONFIG, config)
    }

    pub fn device_error(&self) -> Result<ErrorFlags, S::Error> {
        self.read(DEVICE_ERROR)
    }

    pub fn device_status(&self) -> Result<u64, S::Error> {
        self.read(DEVICE_STATUS)
    }

    pub fn device_uid(&self) -> Result<u64, S::Error> {
        self.read(DEVICE_UID)
    }

    pub fn desired_cycle_time(&self) -> Result<MicrosDurationU32, S::Error> {
        self.read(DESIRED_CYCLE_TIME_US)
            .map(MicrosDurationU32::from_ticks)
    }

    pub fn set_desired_cycle_time(&self, cycle_time: MicrosDurationU32) -> Result<(), S::Error> {
        self.write(DESIRED_CYCLE_TIME_US, cycle_time.ticks())
    }

    /// Cycle time the leaf actually achieves.
    pub fn net_cycle_time(&self) -> Result<MicrosDurationU32, S::Error> {
        self.read(NET_CYCLE_TIME_US).map(MicrosDurationU32::from_ticks)
    }

    pub fn memory_lock(&self) -> Result<u32, S::Error> {
        self.read(MEMORY_LOCK)
    }

    pub fn set_memory_lock(&self, lock: u32) -> Result<(), S::Error> {
        self.write(MEMORY_LOCK, lock)
    }

    pub fn device_address(&self) -> Result<Address, S::Error> {
        self.read(DEVICE_ADDRESS).map(Address::new)
    }

    /// Move the leaf to another address, this proxy follows it there.
    pub fn set_device_address(&mut self, address: Address) -> Result<(), S::Error> {
        self.write(DEVICE_ADDRESS, address.value())?;
        info!("leaf {} moved to {address}", self.address);
        self.address = address;
        Ok(())
    }

    /// Text log of the leaf.
    pub fn message(&self) -> Result<String, S::Error> {
        let mut buffer = [0u8; MAX_REGISTER_WIDTH];
        self.read_block(MESSAGE.offset, &mut buffer)?;
        let end = buffer.iter().position(|b| *b == 0).unwrap_or(buffer.len());
        Ok(String::from_utf8_lossy(&buffer[..end]).into_owned())
    }
}
