use std::path::Path;

use serial_gateway::{Gateway, LedFile, NoIndicator, StatusIndicator};

mod logging;
mod options;

use options::{Command, Options};

fn main() {
	if let Err(()) = do_main(clap::Parser::parse()) {
		std::process::exit(1);
	}
}

fn do_main(options: Options) -> Result<(), ()> {
	logging::init(module_path!(), options.verbose);

	if let Some(Command::ShellCompletion { shell, output }) = &options.command {
		return write_shell_completion(*shell, output.as_deref());
	}

	serial_gateway::suppress_sigpipe().map_err(|e| log::error!("Failed to ignore SIGPIPE: {}", e))?;

	let indicator: Box<dyn StatusIndicator> = if options.no_status_led {
		Box::new(NoIndicator)
	} else {
		log::debug!("Using {} as connection status indicator", options.status_led.display());
		Box::new(LedFile::new(&options.status_led))
	};

	let config = options.gateway_config();
	let mut gateway = Gateway::new(&config, indicator).map_err(|e| log::error!("{}", e))?;
	match gateway.run() {
		Ok(never) => match never {},
		Err(e) => {
			log::error!("{}", e);
			Err(())
		},
	}
}

fn write_shell_completion(shell: clap_complete::Shell, path: Option<&Path>) -> Result<(), ()> {
	use std::io::Write;

	let script = completion_script(shell);
	match path {
		None => {
			log::debug!("Writing {} completion script to standard output", shell);
			std::io::stdout()
				.lock()
				.write_all(&script)
				.map_err(|e| log::error!("Failed to write completion script to standard output: {}", e))
		},
		Some(path) => {
			log::debug!("Writing {} completion script to {}", shell, path.display());
			std::fs::write(path, &script)
				.map_err(|e| log::error!("Failed to write completion script to {}: {}", path.display(), e))
		},
	}
}

/// Generate the completion script for `shell`, always ending in a newline.
fn completion_script(shell: clap_complete::Shell) -> Vec<u8> {
	use clap::CommandFactory;

	let mut script = Vec::with_capacity(4 * 1024);
	clap_complete::generate(shell, &mut Options::command(), env!("CARGO_BIN_NAME"), &mut script);
	if !script.ends_with(b"\n") {
		script.push(b'\n');
	}
	script
}
