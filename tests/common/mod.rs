#![allow(dead_code)]

use assert2::{assert, let_assert};
use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::socket::{setsockopt, sockopt};
use serial_gateway::{Gateway, GatewayConfig, SerialSettings, StatusIndicator};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::os::unix::io::{AsFd, AsRawFd};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(1);

/// The controlling side of a pseudo terminal, standing in for the device behind the serial port.
pub struct FakeSerial {
	master: PtyMaster,
	path: String,
}

impl FakeSerial {
	pub fn new() -> Self {
		let_assert!(Ok(master) = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY));
		assert!(let Ok(()) = grantpt(&master));
		assert!(let Ok(()) = unlockpt(&master));
		let_assert!(Ok(path) = ptsname_r(&master));
		Self { master, path }
	}

	/// The path of the terminal to hand to the gateway.
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Send data as if the device transmitted it.
	pub fn write(&mut self, data: &[u8]) {
		assert!(let Ok(()) = self.master.write_all(data));
	}

	/// Read whatever the gateway wrote to the serial port, waiting at most [`TIMEOUT`].
	pub fn read(&mut self) -> Vec<u8> {
		let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLIN)];
		let_assert!(Ok(ready) = poll(&mut fds, PollTimeout::from(TIMEOUT.as_millis() as u16)));
		if ready == 0 {
			return Vec::new();
		}
		let mut buffer = [0; 4096];
		let_assert!(Ok(len) = self.master.read(&mut buffer));
		buffer[..len].to_vec()
	}
}

/// Status indicator that records every update.
#[derive(Debug, Default)]
pub struct RecordingIndicator {
	pub states: Vec<bool>,
}

impl StatusIndicator for RecordingIndicator {
	fn set_connected(&mut self, connected: bool) -> std::io::Result<()> {
		self.states.push(connected);
		Ok(())
	}
}

pub fn config(serial: &FakeSerial, hardware_flow_control: bool) -> GatewayConfig {
	GatewayConfig::new(SerialSettings::new(serial.path(), 115_200, hardware_flow_control), 0)
		.with_listen_address(Ipv4Addr::LOCALHOST)
}

pub fn start_gateway(serial: &FakeSerial, hardware_flow_control: bool) -> Gateway<RecordingIndicator> {
	let_assert!(Ok(gateway) = Gateway::new(&config(serial, hardware_flow_control), RecordingIndicator::default()));
	gateway
}

/// Connect a client and let the gateway accept it.
pub fn connect(gateway: &mut Gateway<RecordingIndicator>) -> TcpStream {
	let_assert!(Ok(addr) = gateway.local_addr());
	let_assert!(Ok(stream) = TcpStream::connect(addr));
	assert!(let Ok(()) = stream.set_read_timeout(Some(TIMEOUT)));
	assert!(let Ok(()) = gateway.run_once());
	let_assert!(Ok(local) = stream.local_addr());
	assert!(gateway.client_addr() == Some(local));
	stream
}

/// Send a single byte as TCP urgent data.
pub fn send_urgent(stream: &TcpStream, byte: u8) {
	// SAFETY: the descriptor is owned by `stream` and the buffer is a single valid byte.
	let sent = unsafe { libc::send(stream.as_raw_fd(), std::ptr::from_ref(&byte).cast(), 1, libc::MSG_OOB) };
	assert!(sent == 1);
}

/// Close the connection with a TCP reset instead of an orderly shutdown.
pub fn reset(stream: TcpStream) {
	let linger = libc::linger { l_onoff: 1, l_linger: 0 };
	assert!(let Ok(()) = setsockopt(&stream, sockopt::Linger, &linger));
	drop(stream);
}

/// Let the gateway run until `expected` arrived on the serial port.
pub fn relay_to_serial(gateway: &mut Gateway<RecordingIndicator>, serial: &mut FakeSerial, expected: &[u8]) {
	let mut received = Vec::new();
	while received.len() < expected.len() {
		assert!(let Ok(()) = gateway.run_once());
		loop {
			let data = serial.read();
			if data.is_empty() {
				break;
			}
			received.extend(data);
			if received.len() >= expected.len() {
				break;
			}
		}
	}
	assert!(received == expected);
}

/// Let the gateway run until `expected` arrived at the client.
pub fn relay_to_client(gateway: &mut Gateway<RecordingIndicator>, client: &mut TcpStream, expected: &[u8]) {
	let mut received = Vec::new();
	let mut buffer = [0; 256];
	while received.len() < expected.len() {
		assert!(let Ok(()) = gateway.run_once());
		while received.len() < expected.len() {
			match client.read(&mut buffer) {
				Ok(0) => panic!("gateway closed the connection"),
				Ok(len) => received.extend_from_slice(&buffer[..len]),
				Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => break,
				Err(e) => panic!("failed to read from gateway: {}", e),
			}
		}
	}
	assert!(received == expected);
}

/// Check that nothing else is waiting to be read by the client.
pub fn assert_no_more_data(client: &mut TcpStream) {
	assert!(let Ok(()) = client.set_read_timeout(Some(Duration::from_millis(100))));
	let mut buffer = [0; 16];
	let_assert!(Err(e) = client.read(&mut buffer));
	assert!(matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut));
	assert!(let Ok(()) = client.set_read_timeout(Some(TIMEOUT)));
}
