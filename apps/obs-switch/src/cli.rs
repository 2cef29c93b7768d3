use clap::{Parser, Subcommand};
use obs_switcher::{ObsConfig, Priority};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "obs-switch")]
#[command(about = "Switch OBS scenes over obs-websocket v5", long_about = None)]
pub struct Cli {
	/// Directory of *.json config files, applied in file-name order
	#[arg(long, env = "OBS_CONFIG_DIR")]
	pub config_dir: Option<PathBuf>,

	/// OBS host; overrides config files and OBS_HOST
	#[arg(long)]
	pub host: Option<String>,

	/// obs-websocket port
	#[arg(long)]
	pub port: Option<u16>,

	/// obs-websocket password
	#[arg(long)]
	pub password: Option<String>,

	/// How long to wait for OBS before giving up
	#[arg(long, env = "OBS_WAIT_MS", default_value = "10000")]
	pub wait_ms: u64,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
	/// Switch the program scene and wait for OBS to confirm it
	Switch {
		scene: String,

		/// low, normal, high or critical
		#[arg(long, default_value_t = Priority::Normal)]
		priority: Priority,
	},
	/// Print connection state, flags and statistics as JSON
	Status,
	/// Log program scene changes until the duration elapses (0 runs until killed)
	Watch {
		#[arg(long, default_value = "0")]
		duration_secs: u64,
	},
}

impl Cli {
	/// Defaults, then config files, then `OBS_*` variables, then flags
	pub fn obs_config(&self) -> obs_switcher::ObsConfig {
		let mut config = ObsConfig::default();
		if let Some(dir) = &self.config_dir {
			if let Err(e) = config.load_dir(dir) {
				tracing::warn!("Ignoring config directory: {}", e);
			}
		}
		config.apply_env();

		if let Some(host) = &self.host {
			config.host.clone_from(host);
		}
		if let Some(port) = self.port {
			config.port = port;
		}
		if let Some(password) = &self.password {
			config.password.clone_from(password);
		}
		config
	}

	pub const fn wait(&self) -> Duration {
		Duration::from_millis(self.wait_ms)
	}
}
