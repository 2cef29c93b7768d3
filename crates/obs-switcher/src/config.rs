use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_PORT: u16 = 4455;
pub const DEFAULT_COMMAND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("host must not be empty")]
	EmptyHost,

	#[error("port must be in 1..=65535, got {0}")]
	InvalidPort(u16),

	#[error("command queue size must be greater than zero")]
	ZeroQueueSize,

	#[error("{field} must be greater than zero")]
	ZeroValue { field: &'static str },

	#[error("failed to read config from {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config value: {0}")]
	Parse(#[from] serde_json::Error),
}

/// Connection target and tuning for one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObsConfig {
	pub host: String,
	pub port: u16,
	pub password: String,
	pub max_retries: u32,
	pub retry_delay_ms: u64,
	pub ping_interval_ms: u64,
	pub ping_timeout_ms: u64,
	/// Commands older than this when dequeued are dropped; 0 disables expiry
	pub command_timeout_ms: u64,
	pub command_queue_size: usize,
	pub enable_scene_cache: bool,
	pub enable_keepalive: bool,
	/// Bound on connect, upgrade response, Hello and in-frame reads
	pub handshake_timeout_ms: u64,
	/// Identify attempts allowed per received challenge
	pub max_auth_attempts: u32,
}

impl Default for ObsConfig {
	fn default() -> Self {
		Self {
			host: "localhost".to_string(),
			port: DEFAULT_PORT,
			password: String::new(),
			max_retries: 5,
			retry_delay_ms: 5000,
			ping_interval_ms: 10_000,
			ping_timeout_ms: 5000,
			command_timeout_ms: 2000,
			command_queue_size: DEFAULT_COMMAND_QUEUE_SIZE,
			enable_scene_cache: true,
			enable_keepalive: true,
			handshake_timeout_ms: 5000,
			max_auth_attempts: 3,
		}
	}
}

impl ObsConfig {
	pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
		Self {
			host: host.into(),
			port,
			password: password.into(),
			..Self::default()
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.host.trim().is_empty() {
			return Err(ConfigError::EmptyHost);
		}
		if self.port == 0 {
			return Err(ConfigError::InvalidPort(self.port));
		}
		if self.command_queue_size == 0 {
			return Err(ConfigError::ZeroQueueSize);
		}
		if self.handshake_timeout_ms == 0 {
			return Err(ConfigError::ZeroValue { field: "handshake_timeout_ms" });
		}
		if self.retry_delay_ms == 0 {
			return Err(ConfigError::ZeroValue { field: "retry_delay_ms" });
		}
		if self.max_auth_attempts == 0 {
			return Err(ConfigError::ZeroValue { field: "max_auth_attempts" });
		}
		Ok(())
	}

	/// Load configuration from environment variables with defaults for anything unset
	pub fn from_env() -> Self {
		let mut config = Self::default();
		config.apply_env();
		config
	}

	/// Overlay `OBS_*` environment variables onto this configuration
	pub fn apply_env(&mut self) {
		if let Ok(host) = std::env::var("OBS_HOST") {
			self.host = host;
		}
		if let Ok(password) = std::env::var("OBS_PASSWORD") {
			self.password = password;
		}
		env_override("OBS_PORT", &mut self.port);
		env_override("OBS_MAX_RETRIES", &mut self.max_retries);
		env_override("OBS_RETRY_DELAY_MS", &mut self.retry_delay_ms);
		env_override("OBS_PING_INTERVAL_MS", &mut self.ping_interval_ms);
		env_override("OBS_PING_TIMEOUT_MS", &mut self.ping_timeout_ms);
		env_override("OBS_COMMAND_TIMEOUT_MS", &mut self.command_timeout_ms);
		env_override("OBS_COMMAND_QUEUE_SIZE", &mut self.command_queue_size);
		env_override("OBS_ENABLE_SCENE_CACHE", &mut self.enable_scene_cache);
		env_override("OBS_ENABLE_KEEPALIVE", &mut self.enable_keepalive);
		env_override("OBS_HANDSHAKE_TIMEOUT_MS", &mut self.handshake_timeout_ms);
	}

	/// Overlay every `*.json` file in `dir`, in file-name order (last one wins).
	///
	/// Each file holds a flat object. Unknown keys and values of the wrong type are
	/// skipped with a warning; the remaining keys of the file still apply.
	pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<(), ConfigError> {
		let dir = dir.as_ref();
		let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
			path: dir.to_path_buf(),
			source,
		})?;

		let mut files: Vec<PathBuf> = entries
			.filter_map(Result::ok)
			.map(|entry| entry.path())
			.filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
			.collect();
		files.sort();

		for path in files {
			let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
			match serde_json::from_str::<Value>(&content) {
				Ok(Value::Object(overrides)) => {
					debug!("Applying config file {}", path.display());
					self.merge(&path, overrides)?;
				}
				Ok(_) | Err(_) => warn!("Invalid JSON in config file '{}', skipping", path.display()),
			}
		}

		Ok(())
	}

	fn merge(&mut self, path: &Path, overrides: Map<String, Value>) -> Result<(), ConfigError> {
		let Value::Object(mut current) = serde_json::to_value(&*self)? else {
			return Ok(());
		};

		for (key, value) in overrides {
			if !current.contains_key(&key) {
				warn!("Unknown config key '{}' in {}", key, path.display());
				continue;
			}

			let previous = current.insert(key.clone(), value);
			if serde_json::from_value::<Self>(Value::Object(current.clone())).is_err() {
				warn!("Type mismatch for config key '{}' in {}", key, path.display());
				if let Some(previous) = previous {
					current.insert(key, previous);
				}
			}
		}

		*self = serde_json::from_value(Value::Object(current))?;
		Ok(())
	}

	pub const fn retry_delay(&self) -> Duration {
		Duration::from_millis(self.retry_delay_ms)
	}

	pub const fn ping_interval(&self) -> Duration {
		Duration::from_millis(self.ping_interval_ms)
	}

	pub const fn ping_timeout(&self) -> Duration {
		Duration::from_millis(self.ping_timeout_ms)
	}

	/// `None` when command expiry is disabled
	pub const fn command_timeout(&self) -> Option<Duration> {
		if self.command_timeout_ms == 0 {
			None
		} else {
			Some(Duration::from_millis(self.command_timeout_ms))
		}
	}

	pub const fn handshake_timeout(&self) -> Duration {
		Duration::from_millis(self.handshake_timeout_ms)
	}
}

fn env_override<T: FromStr>(key: &str, target: &mut T) {
	if let Ok(raw) = std::env::var(key) {
		match raw.trim().parse() {
			Ok(value) => *target = value,
			Err(_) => warn!("Ignoring unparseable {}={:?}", key, raw),
		}
	}
}
