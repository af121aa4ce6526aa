//! The single active client connection.
//!
//! At most one client is connected at any time.
//! Accepting a new connection first evicts the current one.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use nix::poll::PollFlags;
use nix::sys::socket::{setsockopt, sockopt};

use crate::error::FatalError;
use crate::registry::Registry;
use crate::serial::SerialTransport;
use crate::status::{self, StatusIndicator};

// asm-generic/sockios.h
#[cfg(any(target_os = "linux", target_os = "android"))]
const SIOCATMARK: libc::c_ulong = 0x8905;

#[cfg(any(target_os = "linux", target_os = "android"))]
nix::ioctl_read_bad!(socket_at_mark, SIOCATMARK, libc::c_int);

// sys/sockio.h: _IOR('s', 7, int)
#[cfg(not(any(target_os = "linux", target_os = "android")))]
nix::ioctl_read!(socket_at_mark, b's', 7, libc::c_int);

/// A connected TCP client.
#[derive(Debug)]
pub struct Connection {
	id: u64,
	stream: TcpStream,
	peer: SocketAddr,
}

impl Connection {
	fn new(id: u64, stream: TcpStream, peer: SocketAddr) -> Self {
		if let Err(e) = setsockopt(&stream, sockopt::KeepAlive, &true) {
			warn!("failed to enable keep-alive for {}: {}", peer, e);
		}
		Self { id, stream, peer }
	}

	/// Sequence number of the connection, unique for the lifetime of the [`ConnectionManager`].
	pub fn id(&self) -> u64 {
		self.id
	}

	pub fn peer_addr(&self) -> SocketAddr {
		self.peer
	}

	pub fn as_raw_fd(&self) -> RawFd {
		self.stream.as_raw_fd()
	}

	fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
		self.stream.read(buffer)
	}

	fn write_all(&mut self, buffer: &[u8]) -> std::io::Result<()> {
		self.stream.write_all(buffer)
	}

	/// Check if the next byte in the stream is the urgent data mark.
	pub fn at_urgent_mark(&self) -> std::io::Result<bool> {
		let mut mark: libc::c_int = 0;
		// SAFETY: the descriptor is owned by `self.stream` and `mark` outlives the call.
		unsafe { socket_at_mark(self.stream.as_raw_fd(), &mut mark) }?;
		Ok(mark != 0)
	}

	/// Read the pending urgent byte.
	///
	/// Fails if there is no urgent byte to read.
	pub fn read_urgent(&self) -> std::io::Result<u8> {
		let mut byte: u8 = 0;
		// SAFETY: the descriptor is owned by `self.stream` and the buffer is a single valid byte.
		let read =
			unsafe { libc::recv(self.stream.as_raw_fd(), std::ptr::from_mut(&mut byte).cast(), 1, libc::MSG_OOB) };
		match read {
			n if n < 0 => Err(std::io::Error::last_os_error()),
			0 => Err(std::io::ErrorKind::UnexpectedEof.into()),
			_ => Ok(byte),
		}
	}

	fn shutdown(&self) {
		if let Err(e) = self.stream.shutdown(Shutdown::Both) {
			debug!("failed to shut down connection from {}: {}", self.peer, e);
		}
	}
}

/// Owner of the active client connection.
#[derive(Debug, Default)]
pub struct ConnectionManager {
	active: Option<Connection>,
	accepted: u64,
}

impl ConnectionManager {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn active(&self) -> Option<&Connection> {
		self.active.as_ref()
	}

	pub fn active_fd(&self) -> Option<RawFd> {
		self.active.as_ref().map(Connection::as_raw_fd)
	}

	/// Accept a pending connection on `listener` and make it the active connection.
	///
	/// The previous connection, if any, is evicted before the new one is registered.
	/// A failed accept is logged and leaves the current connection in place.
	pub fn accept(&mut self, listener: &TcpListener, registry: &mut Registry, indicator: &mut impl StatusIndicator) {
		let (stream, peer) = match listener.accept() {
			Ok(x) => x,
			Err(e) => {
				warn!("failed to accept connection: {}", e);
				return;
			},
		};

		self.evict(registry, indicator);
		status::update(indicator, true);
		info!("connect from host {}", peer);

		self.accepted += 1;
		let connection = Connection::new(self.accepted, stream, peer);
		registry.register(connection.as_raw_fd(), PollFlags::POLLIN | PollFlags::POLLPRI);
		self.active = Some(connection);
	}

	/// Shut down, deregister and close the active connection, if any.
	pub fn evict(&mut self, registry: &mut Registry, indicator: &mut impl StatusIndicator) {
		let Some(connection) = self.active.take() else {
			return;
		};
		status::update(indicator, false);
		info!("closing connection from {}", connection.peer_addr());
		connection.shutdown();
		registry.deregister(connection.as_raw_fd());
	}

	/// Check if the active connection has an urgent byte waiting at the read position.
	pub fn urgent_pending(&self) -> bool {
		let Some(connection) = &self.active else {
			return false;
		};
		match connection.at_urgent_mark() {
			Ok(at_mark) => at_mark,
			Err(e) => {
				debug!("failed to check urgent mark of {}: {}", connection.peer_addr(), e);
				false
			},
		}
	}

	/// Read one chunk from the client and write it to the serial port.
	///
	/// End-of-file or a read error evicts the client.
	/// Failing to write to the serial port is fatal.
	pub fn forward_to_serial(
		&mut self,
		serial: &mut SerialTransport,
		registry: &mut Registry,
		indicator: &mut impl StatusIndicator,
		buffer: &mut [u8],
	) -> Result<(), FatalError> {
		let Some(connection) = self.active.as_mut() else {
			return Ok(());
		};

		let len = match connection.read(buffer) {
			Ok(0) => {
				debug!("connection from {} closed by peer", connection.peer_addr());
				self.evict(registry, indicator);
				return Ok(());
			},
			Err(e) => {
				warn!("failed to read from {}: {}", connection.peer_addr(), e);
				self.evict(registry, indicator);
				return Ok(());
			},
			Ok(len) => len,
		};

		debug!("client -> serial: {} bytes", len);
		trace!("client -> serial: {:02X?}", &buffer[..len]);
		serial.write_all(&buffer[..len]).map_err(FatalError::WriteSerial)
	}

	/// Send data read from the serial port to the client.
	///
	/// Without a client the data is dropped.
	/// A write error evicts the client.
	pub fn forward_from_serial(&mut self, data: &[u8], registry: &mut Registry, indicator: &mut impl StatusIndicator) {
		let Some(connection) = self.active.as_mut() else {
			trace!("no client connected, discarding {} bytes", data.len());
			return;
		};

		if let Err(e) = connection.write_all(data) {
			warn!("failed to write to {}: {}", connection.peer_addr(), e);
			self.evict(registry, indicator);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::serial::SerialSettings;
	use crate::error::OpenError;
	use assert2::{assert, let_assert};
	use nix::fcntl::OFlag;
	use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
	use std::net::Ipv4Addr;

	#[derive(Default)]
	struct Recorder {
		states: Vec<bool>,
	}

	impl StatusIndicator for Recorder {
		fn set_connected(&mut self, connected: bool) -> std::io::Result<()> {
			self.states.push(connected);
			Ok(())
		}
	}

	fn open_pty() -> (PtyMaster, String) {
		let_assert!(Ok(master) = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY));
		assert!(let Ok(()) = grantpt(&master));
		assert!(let Ok(()) = unlockpt(&master));
		let_assert!(Ok(path) = ptsname_r(&master));
		(master, path)
	}

	/// Accept one loopback client into a fresh manager.
	fn accepted(registry: &mut Registry, indicator: &mut Recorder) -> (ConnectionManager, TcpStream) {
		let_assert!(Ok(listener) = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)));
		let_assert!(Ok(addr) = listener.local_addr());
		let_assert!(Ok(client) = TcpStream::connect(addr));
		let mut manager = ConnectionManager::new();
		manager.accept(&listener, registry, indicator);
		assert!(manager.active().is_some());
		(manager, client)
	}

	fn send_urgent(stream: &TcpStream, byte: u8) {
		// SAFETY: the descriptor is owned by `stream` and the buffer is a single valid byte.
		let sent = unsafe { libc::send(stream.as_raw_fd(), std::ptr::from_ref(&byte).cast(), 1, libc::MSG_OOB) };
		assert!(sent == 1);
	}

	#[test]
	fn test_accept_registers_for_urgent_data() {
		let mut registry = Registry::new();
		let mut indicator = Recorder::default();
		let (manager, _client) = accepted(&mut registry, &mut indicator);
		let_assert!(Some(fd) = manager.active_fd());
		assert!(registry.interest(fd) == Some(PollFlags::POLLIN | PollFlags::POLLPRI));
		assert!(indicator.states == [true]);
	}

	#[test]
	fn test_urgent_mark() {
		let mut registry = Registry::new();
		let mut indicator = Recorder::default();
		let (manager, client) = accepted(&mut registry, &mut indicator);
		let_assert!(Some(connection) = manager.active());
		assert!(let Ok(false) = connection.at_urgent_mark());
		assert!(!manager.urgent_pending());

		send_urgent(&client, 0x11);
		assert!(let Ok(true) = connection.at_urgent_mark());
		assert!(manager.urgent_pending());
		assert!(let Ok(0x11) = connection.read_urgent());
		assert!(let Err(_) = connection.read_urgent());
	}

	#[test]
	fn test_write_failure_evicts() {
		let mut registry = Registry::new();
		let mut indicator = Recorder::default();
		let (mut manager, client) = accepted(&mut registry, &mut indicator);

		// Close with a reset, so writes from our side fail instead of being buffered.
		let linger = libc::linger { l_onoff: 1, l_linger: 0 };
		assert!(let Ok(()) = setsockopt(&client, sockopt::Linger, &linger));
		drop(client);

		for _ in 0..100 {
			if manager.active().is_none() {
				break;
			}
			manager.forward_from_serial(b"data", &mut registry, &mut indicator);
		}
		assert!(manager.active().is_none());
		assert!(registry.is_empty());
		assert!(indicator.states == [true, false]);
	}

	#[test]
	fn test_serial_write_failure_is_fatal() {
		let (_master, path) = open_pty();
		let mut registry = Registry::new();
		let mut indicator = Recorder::default();
		let settings = SerialSettings::new(&path, 115_200, true);
		let_assert!(Ok(mut serial) = SerialTransport::open(settings, &mut registry));

		// A failed reopen leaves the transport without a port.
		let invalid = SerialSettings::new(&path, 12_345, true);
		let_assert!(Err(OpenError::InvalidArgument(_)) = serial.reconfigure(invalid, &mut registry));
		assert!(serial.as_raw_fd().is_none());

		let (mut manager, mut client) = accepted(&mut registry, &mut indicator);
		assert!(let Ok(()) = client.write_all(b"data"));

		let mut buffer = [0; 16];
		let result = manager.forward_to_serial(&mut serial, &mut registry, &mut indicator, &mut buffer);
		let_assert!(Err(FatalError::WriteSerial(e)) = result);
		assert!(e.kind() == std::io::ErrorKind::NotConnected);
		assert!(manager.active().is_some());
	}
}
