// obs-switcher
//
// Keeps an authenticated OBS WebSocket v5 session alive on a background thread
// and exposes a non-blocking scene switch to any number of caller threads.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info};

mod auth;
mod config;
mod core;
mod messages;
mod state;
pub mod transport;

pub use auth::{compute_auth_response, identify_message, AuthChallenge};
pub use config::{ConfigError, ObsConfig, DEFAULT_PORT};
pub use crate::core::{Command, CommandKind, CommandQueue, ErrorCallback, ParsePriorityError, Priority, QueueError, SceneCallback, StateCallback};
pub use messages::{route, MessageError, RoutedMessage};
pub use state::{ConnectionState, Statistics, StatusFlags};

use crate::core::{Daemon, Shared};
use transport::{Connector, TcpConnector};

/// Longest scene name accepted by [`ObsSwitcher::switch_scene`], in bytes
pub const MAX_SCENE_NAME_LEN: usize = 256;

const DAEMON_THREAD_NAME: &str = "obs-daemon";

#[derive(Debug, Error)]
pub enum ObsSwitcherError {
	#[error("Invalid configuration: {0}")]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Queue(#[from] QueueError),

	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	#[error("Operation not valid in state {0}")]
	InvalidState(ConnectionState),

	#[error("Failed to spawn daemon thread: {0}")]
	Spawn(#[source] std::io::Error),

	#[error("Daemon thread panicked during shutdown")]
	Shutdown,
}

/// Handle to one OBS connection engine.
///
/// Every method is callable from any thread. Network I/O happens only on the
/// daemon thread started by [`start_daemon`](Self::start_daemon).
pub struct ObsSwitcher {
	shared: Arc<Shared>,
	connector: Mutex<Option<Box<dyn Connector>>>,
	daemon: Mutex<Option<JoinHandle<()>>>,
}

impl ObsSwitcher {
	/// Validate `config` and build an engine that connects over TCP
	pub fn new(config: ObsConfig) -> Result<Self, ObsSwitcherError> {
		Self::with_connector(config, TcpConnector)
	}

	/// Build an engine that opens its transports through `connector`
	pub fn with_connector(config: ObsConfig, connector: impl Connector + 'static) -> Result<Self, ObsSwitcherError> {
		config.validate()?;

		let connector: Box<dyn Connector> = Box::new(connector);
		let shared = Arc::new(Shared::new(config));
		shared.insert_flags(StatusFlags::COMMAND_QUEUE_OK);
		shared.set_state(ConnectionState::Disconnected);

		Ok(Self {
			shared,
			connector: Mutex::new(Some(connector)),
			daemon: Mutex::new(None),
		})
	}

	pub fn config(&self) -> &ObsConfig {
		&self.shared.config
	}

	/// Spawn the daemon thread. Only valid from `Disconnected`, so at most once.
	pub fn start_daemon(&self) -> Result<(), ObsSwitcherError> {
		let state = self.shared.state();
		if state != ConnectionState::Disconnected {
			return Err(ObsSwitcherError::InvalidState(state));
		}

		let mut daemon = self.daemon.lock().unwrap_or_else(PoisonError::into_inner);
		let connector = self.connector.lock().unwrap_or_else(PoisonError::into_inner).take();
		let (None, Some(connector)) = (daemon.as_ref(), connector) else {
			return Err(ObsSwitcherError::InvalidState(state));
		};

		let worker = Daemon::new(Arc::clone(&self.shared), connector);
		let handle = std::thread::Builder::new()
			.name(DAEMON_THREAD_NAME.to_string())
			.spawn(move || worker.run())
			.map_err(ObsSwitcherError::Spawn)?;

		*daemon = Some(handle);
		self.shared.insert_flags(StatusFlags::DAEMON_READY);
		info!("OBS daemon started for {}:{}", self.shared.config.host, self.shared.config.port);
		Ok(())
	}

	/// Queue a scene switch and return immediately.
	///
	/// Succeeds without queueing when the scene cache says OBS is already on `scene_name`.
	/// Commands queued while disconnected are sent once the session is back; their expiry
	/// clock starts no earlier than that session.
	pub fn switch_scene(&self, scene_name: &str, priority: Priority) -> Result<(), ObsSwitcherError> {
		if scene_name.is_empty() {
			return Err(ObsSwitcherError::InvalidArgument("scene name must not be empty".to_string()));
		}
		if scene_name.len() > MAX_SCENE_NAME_LEN {
			return Err(ObsSwitcherError::InvalidArgument(format!("scene name longer than {MAX_SCENE_NAME_LEN} bytes")));
		}

		if self.shared.config.enable_scene_cache && self.shared.is_current_scene(scene_name) {
			debug!("Already on scene '{}'", scene_name);
			return Ok(());
		}

		match self.shared.queue.push(Command::switch_scene(scene_name, priority)) {
			Ok(()) => Ok(()),
			Err(e @ QueueError::Full { .. }) => {
				let mut inner = self.shared.lock();
				inner.flags.insert(StatusFlags::QUEUE_FULL);
				inner.flags.remove(StatusFlags::COMMAND_QUEUE_OK);
				inner.stats.queue_overflows += 1;
				inner.last_error = Some(e.to_string());
				Err(e.into())
			}
			Err(e) => Err(e.into()),
		}
	}

	pub fn state(&self) -> ConnectionState {
		self.shared.state()
	}

	pub fn status_flags(&self) -> StatusFlags {
		self.shared.flags()
	}

	/// Last program scene reported by OBS
	pub fn current_scene(&self) -> Option<String> {
		self.shared.lock().current_scene.clone()
	}

	pub fn statistics(&self) -> Statistics {
		self.shared.lock().stats.clone()
	}

	pub fn last_error(&self) -> Option<String> {
		self.shared.lock().last_error.clone()
	}

	pub fn retry_count(&self) -> u32 {
		self.shared.lock().retry_count
	}

	pub fn queued_commands(&self) -> usize {
		self.shared.queue.len()
	}

	/// Connected, authenticated and free of network, auth and protocol errors
	pub fn is_ready(&self) -> bool {
		let inner = self.shared.lock();
		inner.state == ConnectionState::Connected && inner.flags.contains(StatusFlags::AUTHENTICATED) && !inner.flags.intersects(StatusFlags::BLOCKING_ERRORS)
	}

	/// Called on the daemon thread with `(old, new)` after every state change.
	/// Must not block.
	pub fn set_state_callback(&self, callback: impl Fn(ConnectionState, ConnectionState) + Send + Sync + 'static) {
		self.shared.lock().callbacks.state = Some(Arc::new(callback));
	}

	/// Called with the error message and the flag raised. Must not block.
	pub fn set_error_callback(&self, callback: impl Fn(&str, StatusFlags) + Send + Sync + 'static) {
		self.shared.lock().callbacks.error = Some(Arc::new(callback));
	}

	/// Called when OBS reports a new program scene. Must not block.
	pub fn set_scene_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
		self.shared.lock().callbacks.scene = Some(Arc::new(callback));
	}

	/// Drop the current session and reconnect with a fresh retry budget.
	///
	/// Effective from `Connected`, and from `Error` once retries are exhausted.
	/// Returns whether a reconnect was scheduled.
	pub fn reconnect(&self) -> bool {
		let from_error = self.shared.state() == ConnectionState::Error;
		let scheduled = self
			.shared
			.transition(|state| matches!(state, ConnectionState::Connected | ConnectionState::Error), ConnectionState::Reconnecting);
		if scheduled {
			self.shared.lock().retry_count = 0;
			if from_error {
				// the daemon is parked in its retry delay
				self.shared.queue.wake();
			}
		}
		scheduled
	}

	/// Stop the daemon and release everything still queued. Idempotent; blocks until the thread exits.
	pub fn shutdown(&self) -> Result<(), ObsSwitcherError> {
		self.shared.request_exit();
		self.shared.set_state(ConnectionState::ShuttingDown);

		let dropped = self.shared.queue.close();
		if !dropped.is_empty() {
			debug!("Discarding {} queued commands", dropped.len());
		}

		let handle = self.daemon.lock().unwrap_or_else(PoisonError::into_inner).take();
		let joined = handle.map_or(Ok(()), JoinHandle::join);

		self.shared.clear_flags(StatusFlags::DAEMON_READY | StatusFlags::COMMAND_QUEUE_OK);
		if joined.is_err() {
			error!("OBS daemon thread panicked");
			self.shared.raise(StatusFlags::SHUTDOWN_ERROR, "Daemon thread panicked");
			return Err(ObsSwitcherError::Shutdown);
		}
		Ok(())
	}
}

impl Drop for ObsSwitcher {
	fn drop(&mut self) {
		let _ = self.shutdown();
	}
}

impl std::fmt::Debug for ObsSwitcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObsSwitcher")
			.field("host", &self.shared.config.host)
			.field("port", &self.shared.config.port)
			.field("state", &self.state())
			.field("flags", &self.status_flags())
			.finish_non_exhaustive()
	}
}
