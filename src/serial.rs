//! Serial transport: the device the gateway relays to and from.
//!
//! The serial port is always configured in raw mode with 8 data bits, no parity and one stop bit.
//! Only the baud rate and hardware (RTS/CTS) flow control are configurable.

use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::time::Duration;

use nix::poll::PollFlags;
use serial2::{CharSize, FlowControl, Parity, SerialPort, Settings, StopBits};

use crate::error::{InvalidBaudRate, OpenError};
use crate::registry::Registry;

/// All baud rates the gateway accepts, in bits per second.
pub const SUPPORTED_BAUD_RATES: [u32; 31] = [
	0,
	50,
	75,
	110,
	134,
	150,
	200,
	300,
	600,
	1_200,
	1_800,
	2_400,
	4_800,
	9_600,
	19_200,
	38_400,
	57_600,
	115_200,
	230_400,
	460_800,
	500_000,
	576_000,
	921_600,
	1_000_000,
	1_152_000,
	1_500_000,
	2_000_000,
	2_500_000,
	3_000_000,
	3_500_000,
	4_000_000,
];

/// Line settings of the serial device.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SerialSettings {
	/// Path of the serial device.
	pub path: PathBuf,

	/// Baud rate in bits per second, must be one of [`SUPPORTED_BAUD_RATES`].
	pub baud_rate: u32,

	/// Use RTS/CTS hardware flow control.
	pub hardware_flow_control: bool,
}

impl SerialSettings {
	/// The serial port of the Silvercrest gateway that is wired to the Zigbee co-processor.
	pub const DEFAULT_PATH: &'static str = "/dev/ttyS1";

	pub const DEFAULT_BAUD_RATE: u32 = 115_200;

	pub fn new(path: impl Into<PathBuf>, baud_rate: u32, hardware_flow_control: bool) -> Self {
		Self {
			path: path.into(),
			baud_rate,
			hardware_flow_control,
		}
	}

	fn flow_control(&self) -> FlowControl {
		if self.hardware_flow_control {
			FlowControl::RtsCts
		} else {
			FlowControl::None
		}
	}

	fn apply(&self, mut settings: Settings) -> std::io::Result<Settings> {
		// Raw mode: no canonical processing, no echo, no signal characters,
		// no input or output translation and reads return as soon as one byte is available.
		settings.set_raw();
		settings.set_baud_rate(self.baud_rate)?;
		settings.set_char_size(CharSize::Bits8);
		settings.set_parity(Parity::None);
		settings.set_stop_bits(StopBits::One);
		settings.set_flow_control(self.flow_control());
		Ok(settings)
	}
}

impl Default for SerialSettings {
	fn default() -> Self {
		Self::new(Self::DEFAULT_PATH, Self::DEFAULT_BAUD_RATE, true)
	}
}

/// Open a serial port and configure it for raw transfers.
///
/// The baud rate is validated before the device is opened,
/// so an unsupported baud rate never leaves an open descriptor behind.
///
/// Writes block until the device accepts the data.
/// A device that holds CTS low stalls the writer instead of failing it.
pub fn open(settings: &SerialSettings) -> Result<SerialPort, OpenError> {
	InvalidBaudRate::check(settings.baud_rate)?;
	let device_error = |source| OpenError::Device {
		path: settings.path.clone(),
		source,
	};
	let mut port = SerialPort::open(&settings.path, |port_settings: Settings| settings.apply(port_settings))
		.map_err(device_error)?;
	// Saturates to an infinite poll timeout.
	port.set_write_timeout(Duration::MAX).map_err(device_error)?;
	Ok(port)
}

/// The one open serial link and the settings it was opened with.
pub struct SerialTransport {
	settings: SerialSettings,
	port: Option<SerialPort>,
	reconfigure_count: u64,
}

impl std::fmt::Debug for SerialTransport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SerialTransport")
			.field("settings", &self.settings)
			.field("fd", &self.as_raw_fd())
			.field("reconfigure_count", &self.reconfigure_count)
			.finish()
	}
}

impl SerialTransport {
	/// Open the serial port and register it for readability.
	pub fn open(settings: SerialSettings, registry: &mut Registry) -> Result<Self, OpenError> {
		let port = open(&settings)?;
		registry.register(port.as_raw_fd(), PollFlags::POLLIN);
		debug!(
			"opened serial port {} at {} baud, hardware flow control: {}",
			settings.path.display(),
			settings.baud_rate,
			settings.hardware_flow_control
		);
		Ok(Self {
			settings,
			port: Some(port),
			reconfigure_count: 0,
		})
	}

	pub fn settings(&self) -> &SerialSettings {
		&self.settings
	}

	/// The descriptor of the open serial port, if any.
	///
	/// This is only `None` after a failed reconfiguration.
	pub fn as_raw_fd(&self) -> Option<RawFd> {
		self.port.as_ref().map(|port| port.as_raw_fd())
	}

	/// The number of times the serial port has been re-opened with new settings.
	pub fn reconfigure_count(&self) -> u64 {
		self.reconfigure_count
	}

	/// Replace the open serial port with one configured according to `settings`.
	///
	/// The old port is deregistered and closed before the new one is opened.
	/// On failure the transport is left without an open port.
	/// There is no fallback to the previous settings.
	pub fn reconfigure(&mut self, settings: SerialSettings, registry: &mut Registry) -> Result<(), OpenError> {
		if let Some(port) = self.port.take() {
			registry.deregister(port.as_raw_fd());
			drop(port);
		}

		let port = open(&settings)?;
		registry.register(port.as_raw_fd(), PollFlags::POLLIN);
		info!(
			"reconfigured serial port {}: {} baud, hardware flow control: {}",
			settings.path.display(),
			settings.baud_rate,
			settings.hardware_flow_control
		);
		self.port = Some(port);
		self.settings = settings;
		self.reconfigure_count += 1;
		Ok(())
	}

	/// Read at most `buffer.len()` bytes.
	///
	/// Only call this when the port is known to be readable.
	pub fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
		self.port()?.read(buffer)
	}

	pub fn write_all(&mut self, buffer: &[u8]) -> std::io::Result<()> {
		self.port()?.write_all(buffer)
	}

	fn port(&self) -> std::io::Result<&SerialPort> {
		self.port
			.as_ref()
			.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "serial port is closed"))
	}
}
