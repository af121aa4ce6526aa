//! The event loop.
//!
//! A single thread owns the listener, the serial port and the client connection.
//! Every iteration waits (without timeout) until one of the registered descriptors is ready,
//! and then dispatches each ready descriptor to the handler for its current role.

use std::convert::Infallible;
use std::net::{SocketAddr, SocketAddrV4, TcpListener};
use std::os::unix::io::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::socket::{setsockopt, sockopt};

use crate::config::GatewayConfig;
use crate::connection::ConnectionManager;
use crate::error::FatalError;
use crate::oob;
use crate::registry::Registry;
use crate::serial::{SerialSettings, SerialTransport};
use crate::status::{NoIndicator, StatusIndicator};

/// Maximum number of bytes relayed in one read.
pub const CHUNK_SIZE: usize = 1024;

const LISTEN_BACKLOG: libc::c_int = 1;

/// Readiness flags that are handled by reading from the descriptor.
///
/// Hang-ups and errors are included so the read reports them.
const READABLE: PollFlags = PollFlags::POLLIN
	.union(PollFlags::POLLHUP)
	.union(PollFlags::POLLERR)
	.union(PollFlags::POLLNVAL);

/// Serial to TCP gateway.
///
/// Relays bytes between one serial port and at most one TCP client,
/// and accepts flow control changes from the client as TCP urgent data.
pub struct Gateway<S = NoIndicator> {
	listener: TcpListener,
	serial: SerialTransport,
	connections: ConnectionManager,
	registry: Registry,
	indicator: S,
	buffer: Vec<u8>,
}

/// What a registered descriptor currently is.
///
/// The serial generation and connection ID distinguish a handle from
/// a replacement that happens to reuse the same descriptor number.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Role {
	Listener,
	Serial { generation: u64 },
	Client { id: u64 },
}

/// The operations the event loop can perform on a descriptor with a given role.
struct Handler<S> {
	on_readable: fn(&mut Gateway<S>) -> Result<(), FatalError>,
	on_exception: Option<fn(&mut Gateway<S>) -> Result<(), FatalError>>,
}

/// A descriptor that was reported ready by the readiness wait.
#[derive(Debug)]
struct Ready {
	fd: RawFd,
	events: PollFlags,
	role: Option<Role>,
}

impl Role {
	fn handler<S: StatusIndicator>(self) -> Handler<S> {
		match self {
			Self::Listener => Handler {
				on_readable: Gateway::<S>::accept_client,
				on_exception: None,
			},
			Self::Serial { .. } => Handler {
				on_readable: Gateway::<S>::forward_serial_to_client,
				on_exception: None,
			},
			Self::Client { .. } => Handler {
				on_readable: Gateway::<S>::forward_client_to_serial,
				on_exception: Some(Gateway::<S>::handle_exception),
			},
		}
	}
}

impl<S> std::fmt::Debug for Gateway<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Gateway")
			.field("listener", &self.listener)
			.field("serial", &self.serial)
			.field("connections", &self.connections)
			.field("registry", &self.registry)
			.finish_non_exhaustive()
	}
}

impl<S: StatusIndicator> Gateway<S> {
	/// Open the serial port and start listening for clients.
	///
	/// Nothing is relayed until [`Self::run()`] or [`Self::run_once()`] is called.
	pub fn new(config: &GatewayConfig, indicator: S) -> Result<Self, FatalError> {
		let mut registry = Registry::new();
		let serial = SerialTransport::open(config.serial.clone(), &mut registry)?;
		let listener = bind_listener(config.socket_addr()).map_err(FatalError::Listen)?;
		registry.register(listener.as_raw_fd(), PollFlags::POLLIN);

		info!(
			"serialgateway: port {}, baud {}, flow={}",
			listener.local_addr().map(|addr| addr.port()).unwrap_or(config.port),
			config.serial.baud_rate,
			if config.serial.hardware_flow_control { "HW" } else { "none" },
		);

		Ok(Self {
			listener,
			serial,
			connections: ConnectionManager::new(),
			registry,
			indicator,
			buffer: vec![0; CHUNK_SIZE],
		})
	}

	/// Run the event loop until a fatal error occurs.
	pub fn run(&mut self) -> Result<Infallible, FatalError> {
		loop {
			self.run_once()?;
		}
	}

	/// Wait for readiness once and handle every ready descriptor.
	///
	/// This blocks until at least one descriptor is ready.
	pub fn run_once(&mut self) -> Result<(), FatalError> {
		for ready in self.wait()? {
			match (ready.role, self.role_of(ready.fd)) {
				(Some(before), Some(now)) if before == now => self.dispatch(ready.fd, now, ready.events)?,
				(None, None) if self.registry.contains(ready.fd) => self.close_orphan(ready.fd),
				(_, _) => trace!("skipping stale readiness of fd {}", ready.fd),
			}
		}
		Ok(())
	}

	/// The current serial port settings.
	pub fn settings(&self) -> &SerialSettings {
		self.serial.settings()
	}

	/// The address the listener is bound to.
	pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
		self.listener.local_addr()
	}

	pub fn serial_fd(&self) -> Option<RawFd> {
		self.serial.as_raw_fd()
	}

	pub fn client_fd(&self) -> Option<RawFd> {
		self.connections.active_fd()
	}

	/// The address of the connected client, if any.
	pub fn client_addr(&self) -> Option<SocketAddr> {
		self.connections.active().map(|connection| connection.peer_addr())
	}

	pub fn is_connected(&self) -> bool {
		self.connections.active().is_some()
	}

	/// The number of times the serial port has been re-opened with new settings.
	pub fn reconfigure_count(&self) -> u64 {
		self.serial.reconfigure_count()
	}

	/// All descriptors monitored by the event loop, in ascending order.
	pub fn registered_fds(&self) -> Vec<RawFd> {
		self.registry.iter().map(|(fd, _)| fd).collect()
	}

	pub fn indicator(&self) -> &S {
		&self.indicator
	}

	fn wait(&self) -> Result<Vec<Ready>, FatalError> {
		let watched: Vec<(RawFd, PollFlags)> = self.registry.iter().collect();
		let mut poll_fds: Vec<PollFd> = watched
			.iter()
			// SAFETY: registry entries only exist while the handle owning the descriptor is open,
			// and the handles are not touched until the poll descriptors are dropped.
			.map(|&(fd, interest)| PollFd::new(unsafe { BorrowedFd::borrow_raw(fd) }, interest))
			.collect();

		loop {
			match poll(&mut poll_fds, PollTimeout::NONE) {
				Ok(_) => break,
				Err(Errno::EINTR) => continue,
				Err(e) => return Err(FatalError::Wait(e.into())),
			}
		}

		let ready = watched
			.iter()
			.zip(&poll_fds)
			.filter_map(|(&(fd, _), poll_fd)| {
				let events = poll_fd.revents().filter(|events| !events.is_empty())?;
				Some(Ready {
					fd,
					events,
					role: self.role_of(fd),
				})
			})
			.collect();
		Ok(ready)
	}

	fn role_of(&self, fd: RawFd) -> Option<Role> {
		if !self.registry.contains(fd) {
			None
		} else if fd == self.listener.as_raw_fd() {
			Some(Role::Listener)
		} else if Some(fd) == self.serial.as_raw_fd() {
			Some(Role::Serial {
				generation: self.serial.reconfigure_count(),
			})
		} else {
			self.connections
				.active()
				.filter(|connection| connection.as_raw_fd() == fd)
				.map(|connection| Role::Client { id: connection.id() })
		}
	}

	fn dispatch(&mut self, fd: RawFd, role: Role, events: PollFlags) -> Result<(), FatalError> {
		let handler = role.handler::<S>();
		if events.contains(PollFlags::POLLPRI) {
			if let Some(on_exception) = handler.on_exception {
				on_exception(self)?;
			}
		}
		if events.intersects(READABLE) && self.role_of(fd) == Some(role) {
			(handler.on_readable)(self)?;
		}
		Ok(())
	}

	fn close_orphan(&mut self, fd: RawFd) {
		error!("bug: closing orphaned fd {}", fd);
		self.registry.deregister(fd);
		// SAFETY: the descriptor is registered but not owned by any handle, so nothing else will close it.
		unsafe {
			libc::close(fd);
		}
	}

	fn accept_client(&mut self) -> Result<(), FatalError> {
		self.connections.accept(&self.listener, &mut self.registry, &mut self.indicator);
		Ok(())
	}

	fn forward_serial_to_client(&mut self) -> Result<(), FatalError> {
		let len = match self.serial.read(&mut self.buffer) {
			Ok(0) => return Err(FatalError::SerialClosed),
			Ok(len) => len,
			Err(e) => return Err(FatalError::ReadSerial(e)),
		};
		debug!("serial -> client: {} bytes", len);
		trace!("serial -> client: {:02X?}", &self.buffer[..len]);
		self.connections
			.forward_from_serial(&self.buffer[..len], &mut self.registry, &mut self.indicator);
		Ok(())
	}

	fn forward_client_to_serial(&mut self) -> Result<(), FatalError> {
		self.connections
			.forward_to_serial(&mut self.serial, &mut self.registry, &mut self.indicator, &mut self.buffer)?;
		// Urgent data can arrive together with ordinary payload.
		self.handle_exception()
	}

	fn handle_exception(&mut self) -> Result<(), FatalError> {
		if !self.connections.urgent_pending() {
			return Ok(());
		}
		match self.connections.active() {
			Some(connection) => oob::handle_urgent_byte(connection, &mut self.serial, &mut self.registry),
			None => Ok(()),
		}
	}
}

/// Ignore `SIGPIPE` for the whole process.
///
/// Writing to a connection that was closed by the peer then fails with `EPIPE`,
/// which evicts the client instead of killing the process.
pub fn suppress_sigpipe() -> std::io::Result<()> {
	// SAFETY: ignoring a signal does not install any handler code.
	unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }?;
	Ok(())
}

/// Create an IPv4 TCP listener with a backlog of one connection.
fn bind_listener(address: SocketAddrV4) -> std::io::Result<TcpListener> {
	// SAFETY: socket() has no memory safety requirements.
	let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
	if fd < 0 {
		return Err(std::io::Error::last_os_error());
	}
	// SAFETY: `fd` is a freshly created socket that nothing else owns.
	let socket = unsafe { OwnedFd::from_raw_fd(fd) };

	setsockopt(&socket, sockopt::ReuseAddr, &true)?;

	let addr = libc::sockaddr_in {
		sin_family: libc::AF_INET as libc::sa_family_t,
		sin_port: address.port().to_be(),
		sin_addr: libc::in_addr {
			s_addr: u32::from(*address.ip()).to_be(),
		},
		sin_zero: [0; 8],
	};

	// SAFETY: `addr` is a valid sockaddr_in and the length matches its size.
	let bound = unsafe {
		libc::bind(
			socket.as_raw_fd(),
			std::ptr::from_ref(&addr).cast(),
			std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
		)
	};
	if bound < 0 {
		return Err(std::io::Error::last_os_error());
	}

	// SAFETY: the descriptor is a valid, bound socket.
	if unsafe { libc::listen(socket.as_raw_fd(), LISTEN_BACKLOG) } < 0 {
		return Err(std::io::Error::last_os_error());
	}

	Ok(TcpListener::from(socket))
}
