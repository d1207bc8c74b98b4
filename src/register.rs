//! This module is used to define the memory map shared by all leaves.
//!
//! A leaf exposes 1 KiB of byte addressable memory split in four regions:
//!
//! | Range       | Region                                         |
//! |-------------|------------------------------------------------|
//! | `0..256`    | non-volatile, kept across resets              |
//! | `256..512`  | volatile, cleared on any reset                |
//! | `512..768`  | read-only, maintained by the leaf             |
//! | `768..1024` | read-only message buffer                      |
//!
//! Every named slot is described by a [`RegisterDescriptor`]. The typed [`Register`]
//! constants below couple a descriptor with the Rust type its bytes decode to, and
//! [`REGISTER_MAP`] lists them all for data driven access.

use core::marker::PhantomData;
use core::ops::{BitAnd, BitOr, BitOrAssign, Range};

use modular_bitfield::prelude::*;
use strum_macros::EnumIter;

use crate::frame::{FrameError, MAX_DATA_LEN};

pub const NON_VOLATILE: Range<u16> = 0..256;
pub const VOLATILE: Range<u16> = 256..512;
pub const READ_ONLY: Range<u16> = 512..768;
pub const MESSAGE_BUFFER: Range<u16> = 768..1024;
/// Size of a leaf's memory.
pub const MEMORY_SIZE: u16 = 1024;
/// Widest single register, the message buffer.
pub const MAX_REGISTER_WIDTH: usize = 256;

/// Value the memory lock must hold for a hard reset to be honored.
pub const MEMORY_UNLOCKED: u32 = 0x55AA_55AA;
/// Gain restored by a hard reset.
pub const FACTORY_GAIN: f32 = 1.0;
/// Offset restored by a hard reset.
pub const FACTORY_OFFSET: f32 = 0.0;

/// How the bytes of a register are interpreted, all multi-byte values are little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    F32,
    U32,
    U64,
    U8,
    /// Bit set, one or eight bytes wide.
    Flags,
    Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    /// Lost on soft and hard reset.
    Volatile,
    /// Persisted in flash by the leaf.
    NonVolatile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    /// Writes are refused locally, before anything is sent.
    ReadOnly,
}

/// Describes one named slot in a leaf's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    pub offset: u16,
    pub width: u16,
    pub ty: ScalarType,
    pub volatility: Volatility,
    pub access: Access,
}

impl RegisterDescriptor {
    pub const fn span(&self) -> Range<u16> {
        self.offset..self.offset + self.width
    }

    pub const fn is_read_only(&self) -> bool {
        matches!(self.access, Access::ReadOnly)
    }

    fn overlaps(&self, start: usize, end: usize) -> bool {
        start < usize::from(self.offset + self.width) && usize::from(self.offset) < end
    }
}

/// Rust types a register's bytes can be decoded to.
pub trait RegisterType: Sized {
    const TYPE: ScalarType;
    const WIDTH: u16;

    fn decode(bytes: &[u8]) -> Option<Self>;
    fn encode(&self) -> heapless::Vec<u8, 8>;
}

macro_rules! le_register_type {
    ($t:ty, $scalar:expr) => {
        impl RegisterType for $t {
            const TYPE: ScalarType = $scalar;
            const WIDTH: u16 = core::mem::size_of::<$t>() as u16;

            fn decode(bytes: &[u8]) -> Option<Self> {
                Some(<$t>::from_le_bytes(bytes.try_into().ok()?))
            }

            fn encode(&self) -> heapless::Vec<u8, 8> {
                // Never wider than 8 bytes.
                heapless::Vec::from_slice(&self.to_le_bytes()).unwrap_or_default()
            }
        }
    };
}

le_register_type!(f32, ScalarType::F32);
le_register_type!(u32, ScalarType::U32);
le_register_type!(u64, ScalarType::U64);
le_register_type!(u8, ScalarType::U8);

/// A typed pointer into a leaf's memory.
///
/// It only holds the descriptor, hence can be created, copied or destroyed at no cost.
#[derive(Debug, PartialEq, Eq)]
pub struct Register<T> {
    descriptor: RegisterDescriptor,
    ty: PhantomData<T>,
}

impl<T> Register<T> {
    pub const fn from_descriptor(descriptor: RegisterDescriptor) -> Self {
        Self {
            descriptor,
            ty: PhantomData,
        }
    }

    pub const fn descriptor(&self) -> RegisterDescriptor {
        self.descriptor
    }

    pub const fn offset(&self) -> u16 {
        self.descriptor.offset
    }
}

impl<T> Clone for Register<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Register<T> {}

const fn register<T: RegisterType>(
    name: &'static str,
    offset: u16,
    volatility: Volatility,
    access: Access,
) -> Register<T> {
    Register::from_descriptor(RegisterDescriptor {
        name,
        offset,
        width: T::WIDTH,
        ty: T::TYPE,
        volatility,
        access,
    })
}

const fn persistent<T: RegisterType>(name: &'static str, offset: u16) -> Register<T> {
    register(name, offset, Volatility::NonVolatile, Access::ReadWrite)
}

const fn volatile<T: RegisterType>(name: &'static str, offset: u16) -> Register<T> {
    register(name, offset, Volatility::Volatile, Access::ReadWrite)
}

const fn read_only<T: RegisterType>(name: &'static str, offset: u16) -> Register<T> {
    register(name, offset, Volatility::Volatile, Access::ReadOnly)
}

/// Device configuration bits.
///
/// A leaf in the clean state (no flag set) only samples on [`sync`](crate::network::Network::sync).
#[bitfield(bytes = 1)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Sample continuously at the desired cycle time.
    pub free_run: bool,
    /// Accumulate mean, standard deviation, min and max of the process values.
    pub calc_stat: bool,
    #[skip]
    __: B6,
}

impl DeviceConfig {
    pub fn clean() -> Self {
        Self::new()
    }

    pub fn free_running() -> Self {
        Self::new().with_free_run(true)
    }

    pub fn statistics() -> Self {
        Self::new().with_calc_stat(true)
    }

    pub fn bits(self) -> u8 {
        self.into_bytes()[0]
    }

    pub fn from_bits(bits: u8) -> Self {
        Self::from_bytes([bits])
    }

    pub fn is_clean(self) -> bool {
        self.bits() == 0
    }

    /// Whether every flag set in `other` is also set here.
    pub fn contains(self, other: Self) -> bool {
        self.bits() & other.bits() == other.bits()
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::clean()
    }
}

impl BitOr for DeviceConfig {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self::from_bits(self.bits() | rhs.bits())
    }
}

impl BitOrAssign for DeviceConfig {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl BitAnd for DeviceConfig {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self::from_bits(self.bits() & rhs.bits())
    }
}

impl RegisterType for DeviceConfig {
    const TYPE: ScalarType = ScalarType::Flags;
    const WIDTH: u16 = 1;

    fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [bits] => Some(Self::from_bits(*bits)),
            _ => None,
        }
    }

    fn encode(&self) -> heapless::Vec<u8, 8> {
        heapless::Vec::from_slice(&[self.bits()]).unwrap_or_default()
    }
}

/// Error flags raised by the leaf.
#[bitfield(bytes = 8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFlags {
    pub uart_overload: bool,
    pub cpu_overload: bool,
    pub bus_collision: bool,
    pub watchdog_timeout: bool,
    /// The sensor can not keep up with the desired cycle time.
    pub sensor_overload: bool,
    pub sensor_connection: bool,
    pub sensor_connection_mem: bool,
    #[skip]
    __: B57,
}

impl ErrorFlags {
    pub fn bits(self) -> u64 {
        u64::from_le_bytes(self.into_bytes())
    }

    pub fn from_bits(bits: u64) -> Self {
        Self::from_bytes(bits.to_le_bytes())
    }

    pub fn is_empty(self) -> bool {
        self.bits() == 0
    }
}

impl RegisterType for ErrorFlags {
    const TYPE: ScalarType = ScalarType::Flags;
    const WIDTH: u16 = 8;

    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self::from_bits(u64::from_le_bytes(bytes.try_into().ok()?)))
    }

    fn encode(&self) -> heapless::Vec<u8, 8> {
        heapless::Vec::from_slice(&self.bits().to_le_bytes()).unwrap_or_default()
    }
}

/* ### NON VOLATILE ### */

/// __R/W__ - Gain of process value 0. Factory default `1.0`.
pub const GAIN_PV0: Register<f32> = persistent("gain_pv0", 0);
/// __R/W__ - Gain of process value 1.
pub const GAIN_PV1: Register<f32> = persistent("gain_pv1", 4);
/// __R/W__ - Gain of process value 2.
pub const GAIN_PV2: Register<f32> = persistent("gain_pv2", 8);
/// __R/W__ - Gain of process value 3.
pub const GAIN_PV3: Register<f32> = persistent("gain_pv3", 12);
/// __R/W__ - Offset of process value 0. Factory default `0.0`.
pub const OFFSET_PV0: Register<f32> = persistent("offset_pv0", 16);
/// __R/W__ - Offset of process value 1.
pub const OFFSET_PV1: Register<f32> = persistent("offset_pv1", 20);
/// __R/W__ - Offset of process value 2.
pub const OFFSET_PV2: Register<f32> = persistent("offset_pv2", 24);
/// __R/W__ - Offset of process value 3.
pub const OFFSET_PV3: Register<f32> = persistent("offset_pv3", 28);
/// __R/W__ - Desired sampling cycle in free-run mode, in microseconds.
pub const DESIRED_CYCLE_TIME_US: Register<u32> = persistent("desired_cycle_time_us", 32);
/// __R/W__ - Address the leaf answers at.
///
/// Effective immediately: the leaf stops answering at its old address as soon as the
/// write is processed.
pub const DEVICE_ADDRESS: Register<u8> = persistent("device_address", 36);
/// __R/W__ - See [`DeviceConfig`].
pub const DEVICE_CONFIG: Register<DeviceConfig> = persistent("device_config", 40);

/* ### VOLATILE ### */

pub const PV0: Register<f32> = volatile("pv0", 256);
pub const PV1: Register<f32> = volatile("pv1", 260);
pub const PV2: Register<f32> = volatile("pv2", 264);
pub const PV3: Register<f32> = volatile("pv3", 268);
pub const MEAN_PV0: Register<f32> = volatile("mean_pv0", 272);
pub const MEAN_PV1: Register<f32> = volatile("mean_pv1", 276);
pub const MEAN_PV2: Register<f32> = volatile("mean_pv2", 280);
pub const MEAN_PV3: Register<f32> = volatile("mean_pv3", 284);
pub const STD_DEV_PV0: Register<f32> = volatile("std_dev_pv0", 288);
pub const STD_DEV_PV1: Register<f32> = volatile("std_dev_pv1", 292);
pub const STD_DEV_PV2: Register<f32> = volatile("std_dev_pv2", 296);
pub const STD_DEV_PV3: Register<f32> = volatile("std_dev_pv3", 300);
pub const MIN_PV0: Register<f32> = volatile("min_pv0", 304);
pub const MIN_PV1: Register<f32> = volatile("min_pv1", 308);
pub const MIN_PV2: Register<f32> = volatile("min_pv2", 312);
pub const MIN_PV3: Register<f32> = volatile("min_pv3", 316);
pub const MAX_PV0: Register<f32> = volatile("max_pv0", 320);
pub const MAX_PV1: Register<f32> = volatile("max_pv1", 324);
pub const MAX_PV2: Register<f32> = volatile("max_pv2", 328);
pub const MAX_PV3: Register<f32> = volatile("max_pv3", 332);
/// __R/W__ - Digital value 0, e.g. an output word of an IO leaf.
pub const DV0: Register<u32> = volatile("dv0", 336);
pub const DV1: Register<u32> = volatile("dv1", 340);
pub const DV2: Register<u32> = volatile("dv2", 344);
pub const DV3: Register<u32> = volatile("dv3", 348);
/// __R/W__ - Analog value 0, e.g. a raw actuator output.
pub const AV0: Register<f32> = volatile("av0", 352);
pub const AV1: Register<f32> = volatile("av1", 356);
pub const AV2: Register<f32> = volatile("av2", 360);
pub const AV3: Register<f32> = volatile("av3", 364);
/// __R/W__ - Hard reset is only honored while this holds [`MEMORY_UNLOCKED`].
pub const MEMORY_LOCK: Register<u32> = volatile("memory_lock", 384);

/* ### READ ONLY ### */

/// __R__ - Status bits.
pub const DEVICE_STATUS: Register<u64> = read_only("device_status", 512);
/// __R__ - See [`ErrorFlags`].
pub const DEVICE_ERROR: Register<ErrorFlags> = read_only("device_error", 520);
/// __R__ - Unique id of the leaf's chip.
pub const DEVICE_UID: Register<u64> = read_only("device_uid", 528);
/// __R__ - Measured sampling cycle, in microseconds.
pub const NET_CYCLE_TIME_US: Register<u32> = read_only("net_cycle_time_us", 536);
/// __R__ - Text log of the leaf.
pub const MESSAGE: RegisterDescriptor = RegisterDescriptor {
    name: "message",
    offset: MESSAGE_BUFFER.start,
    width: MESSAGE_BUFFER.end - MESSAGE_BUFFER.start,
    ty: ScalarType::Bytes,
    volatility: Volatility::Volatile,
    access: Access::ReadOnly,
};

/// One of the four process value channels of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Channel {
    Ch0,
    Ch1,
    Ch2,
    Ch3,
}

impl Channel {
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<usize> for Channel {
    type Error = usize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Channel::Ch0),
            1 => Ok(Channel::Ch1),
            2 => Ok(Channel::Ch2),
            3 => Ok(Channel::Ch3),
            other => Err(other),
        }
    }
}

/// Channel-indexed views, a 16 byte read at the first register of a block covers all four.
pub const PV: [Register<f32>; 4] = [PV0, PV1, PV2, PV3];
pub const MEAN_PV: [Register<f32>; 4] = [MEAN_PV0, MEAN_PV1, MEAN_PV2, MEAN_PV3];
pub const STD_DEV_PV: [Register<f32>; 4] = [STD_DEV_PV0, STD_DEV_PV1, STD_DEV_PV2, STD_DEV_PV3];
pub const MIN_PV: [Register<f32>; 4] = [MIN_PV0, MIN_PV1, MIN_PV2, MIN_PV3];
pub const MAX_PV: [Register<f32>; 4] = [MAX_PV0, MAX_PV1, MAX_PV2, MAX_PV3];
pub const GAIN_PV: [Register<f32>; 4] = [GAIN_PV0, GAIN_PV1, GAIN_PV2, GAIN_PV3];
pub const OFFSET_PV: [Register<f32>; 4] = [OFFSET_PV0, OFFSET_PV1, OFFSET_PV2, OFFSET_PV3];
pub const DV: [Register<u32>; 4] = [DV0, DV1, DV2, DV3];
pub const AV: [Register<f32>; 4] = [AV0, AV1, AV2, AV3];

/// Every named register, ordered by offset.
pub const REGISTER_MAP: &[RegisterDescriptor] = &[
    GAIN_PV0.descriptor(),
    GAIN_PV1.descriptor(),
    GAIN_PV2.descriptor(),
    GAIN_PV3.descriptor(),
    OFFSET_PV0.descriptor(),
    OFFSET_PV1.descriptor(),
    OFFSET_PV2.descriptor(),
    OFFSET_PV3.descriptor(),
    DESIRED_CYCLE_TIME_US.descriptor(),
    DEVICE_ADDRESS.descriptor(),
    DEVICE_CONFIG.descriptor(),
    PV0.descriptor(),
    PV1.descriptor(),
    PV2.descriptor(),
    PV3.descriptor(),
    MEAN_PV0.descriptor(),
    MEAN_PV1.descriptor(),
    MEAN_PV2.descriptor(),
    MEAN_PV3.descriptor(),
    STD_DEV_PV0.descriptor(),
    STD_DEV_PV1.descriptor(),
    STD_DEV_PV2.descriptor(),
    STD_DEV_PV3.descriptor(),
    MIN_PV0.descriptor(),
    MIN_PV1.descriptor(),
    MIN_PV2.descriptor(),
    MIN_PV3.descriptor(),
    MAX_PV0.descriptor(),
    MAX_PV1.descriptor(),
    MAX_PV2.descriptor(),
    MAX_PV3.descriptor(),
    DV0.descriptor(),
    DV1.descriptor(),
    DV2.descriptor(),
    DV3.descriptor(),
    AV0.descriptor(),
    AV1.descriptor(),
    AV2.descriptor(),
    AV3.descriptor(),
    MEMORY_LOCK.descriptor(),
    DEVICE_STATUS.descriptor(),
    DEVICE_ERROR.descriptor(),
    DEVICE_UID.descriptor(),
    NET_CYCLE_TIME_US.descriptor(),
    MESSAGE,
];

/// Look a register up by name.
pub fn find(name: &str) -> Option<&'static RegisterDescriptor> {
    REGISTER_MAP.iter().find(|d| d.name == name)
}

/// The register starting at `offset`, if any.
pub fn at_offset(offset: u16) -> Option<&'static RegisterDescriptor> {
    REGISTER_MAP.iter().find(|d| d.offset == offset)
}

/// Whether writing `len` bytes at `offset` would touch read-only memory.
pub fn is_read_only(offset: u16, len: usize) -> bool {
    let start = usize::from(offset);
    let end = start + len;
    if len == 0 {
        return false;
    }
    let region = usize::from(READ_ONLY.start)..usize::from(MEMORY_SIZE);
    (start < region.end && region.start < end)
        || REGISTER_MAP
            .iter()
            .any(|d| d.is_read_only() && d.overlaps(start, end))
}

/// Data of a `READ_REG` request.
pub fn read_request(offset: u16, length: usize) -> Result<[u8; 3], FrameError> {
    if length > MAX_DATA_LEN {
        return Err(FrameError::PayloadTooLarge(length));
    }
    let [offset_l, offset_h] = offset.to_le_bytes();
    Ok([offset_l, offset_h, length as u8])
}

/// Data of a `WRITE_REG` request.
pub fn write_request(offset: u16, bytes: &[u8]) -> Result<heapless::Vec<u8, MAX_DATA_LEN>, FrameError> {
    let too_large = |_| FrameError::PayloadTooLarge(bytes.len());
    let mut data = heapless::Vec::new();
    data.extend_from_slice(&offset.to_le_bytes()).map_err(too_large)?;
    data.extend_from_slice(bytes).map_err(too_large)?;
    Ok(data)
}

/// Dynamically typed register content.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    F32(f32),
    U32(u32),
    U64(u64),
    U8(u8),
    Flags(u64),
    Bytes(heapless::Vec<u8, MAX_REGISTER_WIDTH>),
}

impl Value {
    /// Interpret raw bytes the way `descriptor` says.
    pub fn decode(descriptor: &RegisterDescriptor, bytes: &[u8]) -> Option<Self> {
        match descriptor.ty {
            ScalarType::F32 => f32::decode(bytes).map(Value::F32),
            ScalarType::U32 => u32::decode(bytes).map(Value::U32),
            ScalarType::U64 => u64::decode(bytes).map(Value::U64),
            ScalarType::U8 => u8::decode(bytes).map(Value::U8),
            ScalarType::Flags => {
                let mut wide = [0u8; 8];
                wide.get_mut(..bytes.len())?.copy_from_slice(bytes);
                Some(Value::Flags(u64::from_le_bytes(wide)))
            }
            ScalarType::Bytes => heapless::Vec::from_slice(bytes).ok().map(Value::Bytes),
        }
    }

    /// Raw bytes for `descriptor`, `None` if the value does not fit it.
    pub fn encode(&self, descriptor: &RegisterDescriptor) -> Option<heapless::Vec<u8, MAX_REGISTER_WIDTH>> {
        let width = usize::from(descriptor.width);
        let bytes = match (self, descriptor.ty) {
            (Value::F32(v), ScalarType::F32) => heapless::Vec::from_slice(&v.to_le_bytes()).ok()?,
            (Value::U32(v), ScalarType::U32) => heapless::Vec::from_slice(&v.to_le_bytes()).ok()?,
            (Value::U64(v), ScalarType::U64) => heapless::Vec::from_slice(&v.to_le_bytes()).ok()?,
            (Value::U8(v), ScalarType::U8) => heapless::Vec::from_slice(&[*v]).ok()?,
            (Value::Flags(v), ScalarType::Flags) => {
                let bytes = v.to_le_bytes();
                if bytes[width.min(8)..].iter().any(|b| *b != 0) {
                    return None;
                }
                heapless::Vec::from_slice(bytes.get(..width)?).ok()?
            }
            (Value::Bytes(v), ScalarType::Bytes) if v.len() <= width => v.clone(),
            _ => return None,
        };
        Some(bytes)
    }
}
