use std::net::Ipv4Addr;
use std::path::PathBuf;

use serial_gateway::{GatewayConfig, InvalidBaudRate, LedFile, SerialSettings};

/// Relay a serial port to a single TCP client.
///
/// Bytes written to the TCP connection are sent verbatim to the serial port, and vice versa.
/// A new connection replaces the current one.
///
/// Hardware flow control can be switched at runtime by sending TCP urgent data:
/// 0x10 disables it, 0x11 enables it.
#[derive(clap::Parser)]
#[command(version)]
pub struct Options {
	#[clap(long, short)]
	#[clap(global = true)]
	#[clap(action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// The serial port to relay.
	#[clap(long, short)]
	#[clap(default_value = SerialSettings::DEFAULT_PATH)]
	pub serial_port: PathBuf,

	/// The baud rate of the serial port.
	#[clap(long, short)]
	#[clap(default_value_t = SerialSettings::DEFAULT_BAUD_RATE)]
	#[clap(value_parser = parse_baud_rate)]
	pub baud_rate: u32,

	/// Start with hardware flow control disabled.
	#[clap(long = "no-flow-control", short = 'f')]
	pub no_flow_control: bool,

	/// The TCP port to accept clients on.
	#[clap(long, short)]
	#[clap(default_value_t = GatewayConfig::DEFAULT_PORT)]
	pub port: u16,

	/// The address to accept clients on.
	#[clap(long)]
	#[clap(default_value_t = Ipv4Addr::UNSPECIFIED)]
	pub listen: Ipv4Addr,

	/// File to write the connection status to ("1" or "0").
	#[clap(long)]
	#[clap(default_value = LedFile::DEFAULT_PATH)]
	pub status_led: PathBuf,

	/// Do not update the connection status file.
	#[clap(long)]
	#[clap(conflicts_with = "status_led")]
	pub no_status_led: bool,

	#[clap(subcommand)]
	pub command: Option<Command>,
}

#[derive(clap::Subcommand)]
pub enum Command {
	/// Write shell completions to a file or standard output.
	ShellCompletion {
		/// The shell for which to generate completions.
		#[clap(long)]
		shell: clap_complete::Shell,

		/// The file to write the generated completion file to.
		#[clap(long, short)]
		output: Option<PathBuf>,
	},
}

impl Options {
	pub fn gateway_config(&self) -> GatewayConfig {
		let serial = SerialSettings::new(&self.serial_port, self.baud_rate, !self.no_flow_control);
		GatewayConfig::new(serial, self.port).with_listen_address(self.listen)
	}
}

fn parse_baud_rate(input: &str) -> Result<u32, String> {
	let baud_rate = input.parse().map_err(|e| format!("{}", e))?;
	InvalidBaudRate::check(baud_rate).map_err(|e| e.to_string())
}

#[cfg(test)]
mod test {
	use super::*;
	use assert2::{assert, let_assert};
	use clap::Parser;

	#[test]
	fn test_defaults() {
		let_assert!(Ok(options) = Options::try_parse_from(["serialgateway"]));
		let config = options.gateway_config();
		assert!(config == GatewayConfig::default());
		assert!(options.status_led == PathBuf::from("/proc/led1"));
		assert!(!options.no_status_led);
		assert!(options.command.is_none());
	}

	#[test]
	fn test_original_flags() {
		let_assert!(Ok(options) = Options::try_parse_from(["serialgateway", "-f", "-p", "9999"]));
		let config = options.gateway_config();
		assert!(config.port == 9999);
		assert!(!config.serial.hardware_flow_control);
	}

	#[test]
	fn test_invalid_baud_rate() {
		assert!(let Err(_) = Options::try_parse_from(["serialgateway", "--baud-rate", "12345"]));
		assert!(let Err(_) = Options::try_parse_from(["serialgateway", "--baud-rate", "fast"]));
		let_assert!(Ok(options) = Options::try_parse_from(["serialgateway", "--baud-rate", "57600"]));
		assert!(options.baud_rate == 57_600);
	}
}
