use std::net::{Ipv4Addr, SocketAddrV4};

use crate::serial::SerialSettings;

/// Everything needed to start a [`Gateway`](crate::Gateway).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GatewayConfig {
	/// Initial settings of the serial port.
	pub serial: SerialSettings,

	/// Address to accept client connections on.
	pub listen_address: Ipv4Addr,

	/// TCP port to accept client connections on.
	///
	/// Port 0 lets the system pick a free port.
	pub port: u16,
}

impl GatewayConfig {
	pub const DEFAULT_PORT: u16 = 8888;

	pub fn new(serial: SerialSettings, port: u16) -> Self {
		Self {
			serial,
			listen_address: Ipv4Addr::UNSPECIFIED,
			port,
		}
	}

	pub fn with_listen_address(mut self, listen_address: Ipv4Addr) -> Self {
		self.listen_address = listen_address;
		self
	}

	pub fn socket_addr(&self) -> SocketAddrV4 {
		SocketAddrV4::new(self.listen_address, self.port)
	}
}

impl Default for GatewayConfig {
	fn default() -> Self {
		Self::new(SerialSettings::default(), Self::DEFAULT_PORT)
	}
}
