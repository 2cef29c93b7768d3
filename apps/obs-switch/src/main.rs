mod cli;
mod error;

use clap::Parser;
use cli::{Cli, Command};
use error::{Error, Result};
use obs_switcher::{ConnectionState, ObsSwitcher, Priority, Statistics};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Serialize)]
struct StatusReport {
	state: ConnectionState,
	ready: bool,
	flags: String,
	flag_bits: u32,
	current_scene: Option<String>,
	retry_count: u32,
	queued_commands: usize,
	last_error: Option<String>,
	statistics: Statistics,
}

impl StatusReport {
	fn capture(switcher: &ObsSwitcher) -> Self {
		let flags = switcher.status_flags();
		Self {
			state: switcher.state(),
			ready: switcher.is_ready(),
			flags: flags.to_string(),
			flag_bits: flags.bits(),
			current_scene: switcher.current_scene(),
			retry_count: switcher.retry_count(),
			queued_commands: switcher.queued_commands(),
			last_error: switcher.last_error(),
			statistics: switcher.statistics(),
		}
	}
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		thread::sleep(POLL);
	}
	condition()
}

fn wait_ready(switcher: &ObsSwitcher, timeout: Duration) -> Result<()> {
	if wait_for(timeout, || switcher.is_ready()) {
		return Ok(());
	}
	let reason = switcher.last_error().unwrap_or_else(|| format!("still {}", switcher.state()));
	Err(Error::Timeout(format!("OBS not ready after {timeout:?}: {reason}")))
}

fn switch(switcher: &ObsSwitcher, scene: &str, priority: Priority, timeout: Duration) -> Result<()> {
	wait_ready(switcher, timeout)?;
	switcher.switch_scene(scene, priority)?;

	if wait_for(timeout, || switcher.current_scene().as_deref() == Some(scene)) {
		info!("Program scene is '{}'", scene);
	} else {
		warn!("OBS did not confirm the switch to '{}'", scene);
	}

	println!("{}", serde_json::to_string_pretty(&StatusReport::capture(switcher))?);
	Ok(())
}

fn watch(switcher: &ObsSwitcher, duration: Duration) {
	switcher.set_scene_callback(|scene| info!("Program scene changed to '{}'", scene));
	switcher.set_state_callback(|old, new| {
		if new == ConnectionState::Error {
			warn!("Connection lost ({} -> {})", old, new);
		}
	});

	let started = Instant::now();
	while duration.is_zero() || started.elapsed() < duration {
		thread::sleep(Duration::from_millis(250));
	}
}

fn run(cli: &Cli) -> Result<()> {
	let config = cli.obs_config();
	config.validate()?;
	info!("Connecting to OBS at {}:{}", config.host, config.port);

	let switcher = ObsSwitcher::new(config)?;
	switcher.start_daemon()?;

	let result = match &cli.command {
		Command::Switch { scene, priority } => switch(&switcher, scene, *priority, cli.wait()),
		Command::Status => {
			let _ = wait_for(cli.wait(), || switcher.is_ready());
			serde_json::to_string_pretty(&StatusReport::capture(&switcher)).map(|report| println!("{report}")).map_err(Error::from)
		}
		Command::Watch { duration_secs } => {
			watch(&switcher, Duration::from_secs(*duration_secs));
			Ok(())
		}
	};

	switcher.shutdown()?;
	result
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "obs_switch=info,obs_switcher=info".into()))
		.with(tracing_subscriber::fmt::layer())
		.init();

	let cli = Cli::parse();
	run(&cli)?;
	Ok(())
}
