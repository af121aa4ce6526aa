//! Relay a serial port to a single TCP client.
//!
//! The [`Gateway`] forwards every byte received from the TCP client to the serial port,
//! and every byte received from the serial port to the TCP client.
//! No framing is imposed on the relayed data.
//!
//! Only one client can be connected at a time.
//! When a new client connects, the previous one is disconnected.
//!
//! # Control opcodes
//! The client can change the serial port configuration at runtime by sending single bytes as TCP urgent data
//! (`send()` with `MSG_OOB`):
//!
//! | Byte   | Effect                                   |
//! |--------|------------------------------------------|
//! | `0x10` | disable RTS/CTS hardware flow control    |
//! | `0x11` | enable RTS/CTS hardware flow control     |
//!
//! All other urgent bytes are ignored.
//!
//! # Errors
//! Losing a client is normal and handled by the gateway itself.
//! Problems with the serial port or the listening socket are reported as [`FatalError`]:
//! the gateway can not continue after them.

#[macro_use]
mod log;

mod config;
mod connection;
mod error;
mod gateway;
mod oob;
mod registry;
mod serial;
mod status;

pub use config::GatewayConfig;
pub use error::{FatalError, InvalidBaudRate, OpenError};
pub use gateway::{suppress_sigpipe, Gateway, CHUNK_SIZE};
pub use oob::ControlOpcode;
pub use serial::{open as open_serial, SerialSettings, SUPPORTED_BAUD_RATES};
pub use status::{LedFile, NoIndicator, StatusIndicator};
