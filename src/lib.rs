//! This crate provides the master side of a half-duplex, single-master polling bus of small
//! sensor and actuator devices, called leaves.
//!
//! The master sends one framed request to one leaf at a time, only the addressed leaf may
//! reply. Broadcasts (sync, sleep) are never answered. Every leaf exposes the same 1 KiB
//! memory map of calibration, process values, statistics and identification, see
//! [`register`].
//!
//! It is suitable for interfacing with leaves over RS485 or a plain UART, through any
//! interface implementing [`embedded_io::Read`] and [`embedded_io::Write`].
//!
//! The serial port used for bus comms should be configured like so:
//! * Default baud rate: 115200
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//! * A short read timeout, or non-blocking reads
//!
//! The crate logs through the [`log`] facade and installs no logger itself.

pub mod config;
pub mod error;
pub mod frame;
pub mod leaf;
pub mod message;
pub mod network;
pub mod register;
pub mod transport;

#[cfg(test)]
mod mock_leaf;
#[cfg(test)]
mod mock_serial;
