use std::path::PathBuf;

use crate::serial::SUPPORTED_BAUD_RATES;

/// The requested baud rate is not one of the [`SUPPORTED_BAUD_RATES`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InvalidBaudRate {
	pub actual: u32,
}

/// An error that can occur while opening the serial device.
#[derive(Debug)]
pub enum OpenError {
	/// The settings were rejected before the device was touched.
	InvalidArgument(InvalidBaudRate),

	/// The device could not be opened, or its line settings could not be read or applied.
	Device {
		path: PathBuf,
		source: std::io::Error,
	},
}

/// An unrecoverable error.
///
/// The gateway can not safely continue after one of these.
/// It is returned up to the caller of [`Gateway::run()`](crate::Gateway::run),
/// which is expected to report it and terminate the process.
#[derive(Debug)]
pub enum FatalError {
	/// The serial device could not be (re)opened.
	OpenSerial(OpenError),

	/// Reading from the serial device failed.
	ReadSerial(std::io::Error),

	/// The serial device reported end-of-file.
	SerialClosed,

	/// Writing to the serial device failed.
	WriteSerial(std::io::Error),

	/// The TCP listener could not be created, bound or put into listening mode.
	Listen(std::io::Error),

	/// Waiting for readiness failed.
	Wait(std::io::Error),
}

impl InvalidBaudRate {
	pub fn check(actual: u32) -> Result<u32, Self> {
		if SUPPORTED_BAUD_RATES.contains(&actual) {
			Ok(actual)
		} else {
			Err(Self { actual })
		}
	}
}

impl FatalError {
	/// Check if the error was caused by the serial hardware.
	pub fn is_serial_failure(&self) -> bool {
		matches!(self, Self::OpenSerial(_) | Self::ReadSerial(_) | Self::SerialClosed | Self::WriteSerial(_))
	}
}

impl std::error::Error for InvalidBaudRate {}

impl std::error::Error for OpenError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::InvalidArgument(e) => Some(e),
			Self::Device { source, .. } => Some(source),
		}
	}
}

impl std::error::Error for FatalError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Self::OpenSerial(e) => Some(e),
			Self::ReadSerial(e) | Self::WriteSerial(e) | Self::Listen(e) | Self::Wait(e) => Some(e),
			Self::SerialClosed => None,
		}
	}
}

impl From<InvalidBaudRate> for OpenError {
	fn from(other: InvalidBaudRate) -> Self {
		Self::InvalidArgument(other)
	}
}

impl From<OpenError> for FatalError {
	fn from(other: OpenError) -> Self {
		Self::OpenSerial(other)
	}
}

impl From<OpenError> for std::io::Error {
	fn from(other: OpenError) -> Self {
		match other {
			OpenError::InvalidArgument(e) => Self::new(std::io::ErrorKind::InvalidInput, e),
			OpenError::Device { source, .. } => source,
		}
	}
}

impl std::fmt::Display for InvalidBaudRate {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "invalid baud rate: {}", self.actual)
	}
}

impl std::fmt::Display for OpenError {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::InvalidArgument(e) => write!(f, "{}", e),
			Self::Device { path, source } => write!(f, "failed to open serial port {}: {}", path.display(), source),
		}
	}
}

impl std::fmt::Display for FatalError {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::OpenSerial(e) => write!(f, "{}", e),
			Self::ReadSerial(e) => write!(f, "failed to read from serial port: {}", e),
			Self::SerialClosed => write!(f, "failed to read from serial port: end of file"),
			Self::WriteSerial(e) => write!(f, "failed to write to serial port: {}", e),
			Self::Listen(e) => write!(f, "failed to listen for TCP connections: {}", e),
			Self::Wait(e) => write!(f, "failed to wait for readiness: {}", e),
		}
	}
}
