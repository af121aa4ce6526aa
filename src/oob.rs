//! Control opcodes sent by the client as TCP urgent data.
//!
//! Each opcode is a single urgent byte, so it is never mixed up with the relayed payload.

use std::net::SocketAddr;

use crate::connection::Connection;
use crate::error::FatalError;
use crate::registry::Registry;
use crate::serial::SerialTransport;

/// A control opcode received from the client.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ControlOpcode {
	/// Disable RTS/CTS flow control on the serial port.
	FlowControlOff,

	/// Enable RTS/CTS flow control on the serial port.
	FlowControlOn,

	/// Any other byte. These are ignored.
	Unknown(u8),
}

impl ControlOpcode {
	pub const FLOW_CONTROL_OFF: u8 = 0x10;
	pub const FLOW_CONTROL_ON: u8 = 0x11;

	pub fn from_byte(byte: u8) -> Self {
		match byte {
			Self::FLOW_CONTROL_OFF => Self::FlowControlOff,
			Self::FLOW_CONTROL_ON => Self::FlowControlOn,
			other => Self::Unknown(other),
		}
	}

	pub fn as_byte(self) -> u8 {
		match self {
			Self::FlowControlOff => Self::FLOW_CONTROL_OFF,
			Self::FlowControlOn => Self::FLOW_CONTROL_ON,
			Self::Unknown(byte) => byte,
		}
	}
}

/// Read one urgent byte from `connection` and execute it.
///
/// If no urgent byte can be read, nothing happens.
/// A failure to re-open the serial port is fatal.
pub(crate) fn handle_urgent_byte(
	connection: &Connection,
	serial: &mut SerialTransport,
	registry: &mut Registry,
) -> Result<(), FatalError> {
	let byte = match connection.read_urgent() {
		Ok(byte) => byte,
		Err(e) => {
			debug!("no urgent byte from {}: {}", connection.peer_addr(), e);
			return Ok(());
		},
	};

	match ControlOpcode::from_byte(byte) {
		ControlOpcode::FlowControlOff => set_hardware_flow_control(serial, registry, false, connection.peer_addr()),
		ControlOpcode::FlowControlOn => set_hardware_flow_control(serial, registry, true, connection.peer_addr()),
		ControlOpcode::Unknown(byte) => {
			warn!("ignoring unknown control opcode {:#04X} from {}", byte, connection.peer_addr());
			Ok(())
		},
	}
}

fn set_hardware_flow_control(
	serial: &mut SerialTransport,
	registry: &mut Registry,
	enabled: bool,
	peer: SocketAddr,
) -> Result<(), FatalError> {
	info!(
		"{} hardware flow control as requested by {}",
		if enabled { "enabling" } else { "disabling" },
		peer
	);
	let mut settings = serial.settings().clone();
	settings.hardware_flow_control = enabled;
	serial.reconfigure(settings, registry).map_err(FatalError::OpenSerial)
}
