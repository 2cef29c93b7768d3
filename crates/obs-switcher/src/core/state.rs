use super::CommandQueue;
use crate::config::ObsConfig;
use crate::state::{ConnectionState, Statistics, StatusFlags};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Invoked with `(old, new)` on every state change
pub type StateCallback = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;
/// Invoked with the error message and the flag that was raised
pub type ErrorCallback = Arc<dyn Fn(&str, StatusFlags) + Send + Sync>;
/// Invoked with the new program scene name
pub type SceneCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default, Clone)]
pub(crate) struct Callbacks {
	pub state: Option<StateCallback>,
	pub error: Option<ErrorCallback>,
	pub scene: Option<SceneCallback>,
}

/// Fields guarded by the state mutex
pub(crate) struct EngineState {
	pub state: ConnectionState,
	pub flags: StatusFlags,
	pub current_scene: Option<String>,
	pub stats: Statistics,
	pub last_error: Option<String>,
	pub retry_count: u32,
	pub callbacks: Callbacks,
}

impl EngineState {
	fn new() -> Self {
		Self {
			state: ConnectionState::Uninitialized,
			flags: StatusFlags::NONE,
			current_scene: None,
			stats: Statistics::default(),
			last_error: None,
			retry_count: 0,
			callbacks: Callbacks::default(),
		}
	}
}

/// Everything the facade and the daemon thread share.
///
/// Two lock domains: the state mutex here and the command queue's own mutex.
/// Neither is held across network I/O and callbacks run after the lock is released.
pub(crate) struct Shared {
	pub config: ObsConfig,
	pub queue: CommandQueue,
	inner: Mutex<EngineState>,
	exit: AtomicBool,
}

impl Shared {
	pub fn new(config: ObsConfig) -> Self {
		let queue = CommandQueue::new(config.command_queue_size);
		Self {
			config,
			queue,
			inner: Mutex::new(EngineState::new()),
			exit: AtomicBool::new(false),
		}
	}

	pub fn lock(&self) -> MutexGuard<'_, EngineState> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn state(&self) -> ConnectionState {
		self.lock().state
	}

	pub fn flags(&self) -> StatusFlags {
		self.lock().flags
	}

	pub fn should_exit(&self) -> bool {
		self.exit.load(Ordering::Acquire)
	}

	pub fn request_exit(&self) {
		self.exit.store(true, Ordering::Release);
	}

	/// Move to `new`; a no-op once `ShuttingDown` has been entered. Returns whether the state changed.
	pub fn set_state(&self, new: ConnectionState) -> bool {
		self.transition(|_| true, new)
	}

	/// Move to `new` only when `allowed` accepts the current state
	pub fn transition(&self, allowed: impl FnOnce(ConnectionState) -> bool, new: ConnectionState) -> bool {
		let (old, callback) = {
			let mut inner = self.lock();
			let old = inner.state;
			if old == new || old.is_terminal() || !allowed(old) {
				return false;
			}
			inner.state = new;
			(old, inner.callbacks.state.clone())
		};

		info!("OBS connection state: {} -> {}", old, new);
		if let Some(callback) = callback {
			callback(old, new);
		}
		true
	}

	/// Set an error flag, record the message and notify the error callback
	pub fn raise(&self, flag: StatusFlags, message: impl Into<String>) {
		let message = message.into();
		let callback = {
			let mut inner = self.lock();
			inner.flags.insert(flag);
			inner.last_error = Some(message.clone());
			inner.callbacks.error.clone()
		};

		warn!("[{}] {}", flag, message);
		if let Some(callback) = callback {
			callback(&message, flag);
		}
	}

	pub fn insert_flags(&self, flags: StatusFlags) {
		self.lock().flags.insert(flags);
	}

	pub fn clear_flags(&self, flags: StatusFlags) {
		self.lock().flags.remove(flags);
	}

	pub fn update_stats(&self, f: impl FnOnce(&mut Statistics)) {
		f(&mut self.lock().stats);
	}

	/// Cache the program scene reported by the server
	pub fn set_scene(&self, name: String) {
		let callback = {
			let mut inner = self.lock();
			inner.flags.insert(StatusFlags::SCENE_CACHE_VALID);
			inner.current_scene = Some(name.clone());
			inner.callbacks.scene.clone()
		};

		debug!("Program scene is now '{}'", name);
		if let Some(callback) = callback {
			callback(&name);
		}
	}

	/// Scene-cache hit: the server already reported `name` as the program scene
	pub fn is_current_scene(&self, name: &str) -> bool {
		let inner = self.lock();
		inner.flags.contains(StatusFlags::SCENE_CACHE_VALID) && inner.current_scene.as_deref() == Some(name)
	}
}
