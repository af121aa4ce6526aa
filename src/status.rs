//! External status indicator, switched on while a client is connected.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Something that can show whether a client is connected.
///
/// Failures are reported to the caller, but the gateway only logs them:
/// the indicator is never critical for relaying data.
pub trait StatusIndicator {
	fn set_connected(&mut self, connected: bool) -> std::io::Result<()>;
}

/// A status indicator that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;

/// A status indicator backed by a file that accepts `"1\n"` and `"0\n"`, such as a LED driver in `/proc`.
///
/// The file is opened for every update and must already exist.
#[derive(Debug, Clone)]
pub struct LedFile {
	path: PathBuf,
}

impl LedFile {
	/// The connection LED of the Silvercrest gateway.
	pub const DEFAULT_PATH: &'static str = "/proc/led1";

	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl Default for LedFile {
	fn default() -> Self {
		Self::new(Self::DEFAULT_PATH)
	}
}

impl StatusIndicator for NoIndicator {
	fn set_connected(&mut self, _connected: bool) -> std::io::Result<()> {
		Ok(())
	}
}

impl StatusIndicator for LedFile {
	fn set_connected(&mut self, connected: bool) -> std::io::Result<()> {
		let mut file = std::fs::OpenOptions::new().write(true).open(&self.path)?;
		file.write_all(if connected { b"1\n" } else { b"0\n" })
	}
}

impl<T: StatusIndicator + ?Sized> StatusIndicator for &mut T {
	fn set_connected(&mut self, connected: bool) -> std::io::Result<()> {
		(**self).set_connected(connected)
	}
}

impl<T: StatusIndicator + ?Sized> StatusIndicator for Box<T> {
	fn set_connected(&mut self, connected: bool) -> std::io::Result<()> {
		(**self).set_connected(connected)
	}
}

/// Update the indicator, logging but otherwise ignoring failures.
pub(crate) fn update(indicator: &mut impl StatusIndicator, connected: bool) {
	if let Err(e) = indicator.set_connected(connected) {
		debug!("failed to update status indicator: {}", e);
	}
}
