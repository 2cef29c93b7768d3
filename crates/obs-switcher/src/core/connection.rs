use super::Shared;
use crate::auth::{identify_message, AuthChallenge};
use crate::messages::{self, RoutedMessage};
use crate::state::{ConnectionState, StatusFlags};
use crate::transport::{frame, handshake, Connector, Frame, Opcode, Transport, TransportError};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, trace, warn};

/// Bound on each readability poll while connected
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CLOSE_NORMAL: u16 = 1000;

/// Ping bookkeeping for the current session
#[derive(Debug)]
struct Keepalive {
	next_ping_at: Instant,
	last_ping_sent: Option<Instant>,
	/// Send time of the oldest ping still waiting for a pong
	awaiting_since: Option<Instant>,
}

impl Keepalive {
	fn new(interval: Duration) -> Self {
		Self {
			next_ping_at: Instant::now() + interval,
			last_ping_sent: None,
			awaiting_since: None,
		}
	}

	fn sent(&mut self, now: Instant, interval: Duration) {
		self.last_ping_sent = Some(now);
		self.awaiting_since.get_or_insert(now);
		self.next_ping_at = now + interval;
	}

	/// Round trip of the latest ping, if one was outstanding
	fn answered(&mut self) -> Option<Duration> {
		self.awaiting_since.take()?;
		self.last_ping_sent.map(|sent| sent.elapsed())
	}

	fn is_overdue(&self, timeout: Duration) -> bool {
		self.awaiting_since.is_some_and(|since| since.elapsed() > timeout)
	}
}

/// The connection state machine. Lives on the daemon thread and is the only owner of the socket.
pub(crate) struct Daemon {
	shared: Arc<Shared>,
	connector: Box<dyn Connector>,
	socket: Option<Box<dyn Transport>>,
	challenge: Option<AuthChallenge>,
	auth_attempts: u32,
	keepalive: Keepalive,
	/// Start of the current usable session; command expiry only counts time after it
	connected_since: Option<Instant>,
}

impl Daemon {
	pub fn new(shared: Arc<Shared>, connector: Box<dyn Connector>) -> Self {
		let keepalive = Keepalive::new(shared.config.ping_interval());
		Self {
			shared,
			connector,
			socket: None,
			challenge: None,
			auth_attempts: 0,
			keepalive,
			connected_since: None,
		}
	}

	/// Drive the state machine until the exit flag is set
	pub fn run(mut self) {
		let span = info_span!("obs_daemon", host = %self.shared.config.host, port = self.shared.config.port);
		let _guard = span.enter();
		info!("OBS daemon started");

		while !self.shared.should_exit() {
			match self.shared.state() {
				ConnectionState::Uninitialized => {
					self.shared.set_state(ConnectionState::Disconnected);
				}
				ConnectionState::Disconnected | ConnectionState::Connecting | ConnectionState::Reconnecting => self.connect_step(),
				ConnectionState::Authenticating => self.authenticate_step(),
				ConnectionState::Connected => self.connected_step(),
				ConnectionState::Error => self.error_step(),
				ConnectionState::ShuttingDown => self.shared.request_exit(),
			}
		}

		self.say_goodbye();
		self.close_socket();
		info!("OBS daemon stopped");
	}

	fn connect_step(&mut self) {
		self.close_socket();
		self.shared.set_state(ConnectionState::Connecting);

		match self.open_session() {
			Ok(Some(challenge)) => {
				self.challenge = Some(challenge);
				self.auth_attempts = 0;
				self.shared.set_state(ConnectionState::Authenticating);
			}
			Ok(None) => self.enter_connected(),
			Err(e) => {
				self.fail(&e);
				self.close_socket();
				self.backoff();
			}
		}
	}

	/// TCP connect, HTTP upgrade and Hello. Returns the challenge when the server wants authentication.
	fn open_session(&mut self) -> Result<Option<AuthChallenge>, TransportError> {
		let config = &self.shared.config;
		let timeout = config.handshake_timeout();

		debug!("Connecting to OBS at {}:{}", config.host, config.port);
		let mut socket = self.connector.connect(&config.host, config.port, timeout).map_err(|source| TransportError::Connect {
			endpoint: format!("{}:{}", config.host, config.port),
			source,
		})?;
		socket.set_io_timeout(Some(timeout))?;
		self.shared.insert_flags(StatusFlags::SOCKET_CONNECTED);
		self.shared.clear_flags(StatusFlags::NETWORK_ERROR);

		handshake::perform(&mut *socket, &config.host, config.port)?;
		self.shared.insert_flags(StatusFlags::WEBSOCKET_READY);
		self.shared.clear_flags(StatusFlags::PROTOCOL_ERROR);
		let socket = self.socket.insert(socket);

		if !socket.poll_readable(timeout)? {
			return Err(TransportError::Protocol(format!("no Hello within {timeout:?}")));
		}
		let hello = frame::read_frame(&mut **socket)?;
		self.shared.update_stats(|stats| stats.messages_received += 1);

		let text = hello.text().filter(|_| hello.opcode == Opcode::Text).ok_or_else(|| TransportError::Protocol(format!("expected Hello, got {} frame", hello.opcode)))?;
		match messages::route(text) {
			Ok(RoutedMessage::Hello {
				authentication,
				obs_websocket_version,
			}) => {
				info!("Connected to obs-websocket {}", obs_websocket_version.as_deref().unwrap_or("(unknown version)"));
				if authentication.is_none() {
					self.send_json(&identify_message(None))?;
				}
				Ok(authentication)
			}
			Ok(other) => Err(TransportError::Protocol(format!("expected Hello, got {other:?}"))),
			Err(e) => Err(TransportError::Protocol(e.to_string())),
		}
	}

	fn authenticate_step(&mut self) {
		let Some(challenge) = self.challenge.clone() else {
			self.fail(&TransportError::Auth("no challenge cached".into()));
			return;
		};

		if self.auth_attempts >= self.shared.config.max_auth_attempts {
			self.challenge = None;
			self.fail(&TransportError::Auth(format!("gave up after {} attempts", self.auth_attempts)));
			return;
		}
		self.auth_attempts += 1;

		debug!("Sending Identify (attempt {})", self.auth_attempts);
		match self.send_json(&challenge.respond(&self.shared.config.password)) {
			Ok(()) => {
				self.challenge = None;
				self.shared.insert_flags(StatusFlags::AUTHENTICATED);
				self.shared.clear_flags(StatusFlags::AUTH_ERROR);
				self.enter_connected();
			}
			Err(e) => self.shared.raise(StatusFlags::AUTH_ERROR, format!("Failed to send authentication: {e}")),
		}
	}

	fn enter_connected(&mut self) {
		self.keepalive = Keepalive::new(self.shared.config.ping_interval());
		self.connected_since = Some(Instant::now());
		self.shared.update_stats(|stats| stats.connection_started_at = Some(chrono::Utc::now()));
		self.shared.set_state(ConnectionState::Connected);
	}

	fn connected_step(&mut self) {
		if let Err(e) = self.service_connection() {
			self.fail(&e);
		}
	}

	/// One bounded poll, at most one command, then the keepalive check
	fn service_connection(&mut self) -> Result<(), TransportError> {
		self.poll_inbound()?;
		self.drain_one_command()?;
		if self.shared.config.enable_keepalive {
			self.keepalive()?;
		}
		Ok(())
	}

	fn poll_inbound(&mut self) -> Result<(), TransportError> {
		let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
		if !socket.poll_readable(POLL_INTERVAL)? {
			return Ok(());
		}

		let frame = frame::read_frame(&mut **socket)?;
		self.handle_frame(frame)
	}

	fn handle_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
		match frame.opcode {
			Opcode::Text if !frame.fin => {
				debug!("Ignoring fragmented message ({} bytes)", frame.payload().len());
			}
			Opcode::Text => {
				self.shared.update_stats(|stats| stats.messages_received += 1);
				match frame.text() {
					Some(text) => self.dispatch(text),
					None => self.shared.raise(StatusFlags::PROTOCOL_ERROR, "Invalid UTF-8 in text frame"),
				}
			}
			Opcode::Pong => self.on_pong(),
			Opcode::Ping => {
				trace!("Answering server ping");
				self.send_frame(frame.payload(), Opcode::Pong)?;
			}
			Opcode::Close => {
				let (code, reason) = frame.close_reason().map_or((None, String::new()), |(code, reason)| (Some(code), reason));
				return Err(TransportError::Closed { code, reason });
			}
			other => trace!("Ignoring {} frame", other),
		}
		Ok(())
	}

	fn dispatch(&mut self, text: &str) {
		let routed = match messages::route(text) {
			Ok(routed) => routed,
			Err(_) => {
				self.shared.raise(StatusFlags::PROTOCOL_ERROR, "Invalid JSON received");
				return;
			}
		};

		match routed {
			RoutedMessage::Identified { negotiated_rpc_version } => {
				info!("Identified by OBS (rpc version {})", negotiated_rpc_version.unwrap_or_default());
				let mut inner = self.shared.lock();
				inner.retry_count = 0;
				inner.flags.remove(StatusFlags::AUTH_ERROR);
				inner.flags.insert(StatusFlags::AUTHENTICATED);
			}
			RoutedMessage::SceneChanged(name) => self.shared.set_scene(name),
			RoutedMessage::RequestFailed { request_id, comment } => {
				debug!("Request {} failed", request_id.as_deref().unwrap_or("(no id)"));
				self.shared.raise(StatusFlags::PROTOCOL_ERROR, comment);
			}
			RoutedMessage::RequestSucceeded { request_id } => {
				trace!("Request {} succeeded", request_id.as_deref().unwrap_or("(no id)"));
				self.shared.clear_flags(StatusFlags::PROTOCOL_ERROR);
			}
			RoutedMessage::Hello { .. } => debug!("Ignoring Hello on an established session"),
			RoutedMessage::Ignored => {}
		}
	}

	fn on_pong(&mut self) {
		let rtt = self.keepalive.answered();
		{
			let mut inner = self.shared.lock();
			inner.flags.insert(StatusFlags::KEEPALIVE_OK);
			inner.flags.remove(StatusFlags::TIMEOUT_ERROR);
			if let Some(rtt) = rtt {
				inner.stats.record_response_time(rtt.as_secs_f64() * 1000.0);
			}
		}
		trace!("Pong received (rtt {:?})", rtt);
	}

	/// Send at most one queued command
	fn drain_one_command(&mut self) -> Result<(), TransportError> {
		let Some(command) = self.shared.queue.pop_next() else {
			return Ok(());
		};
		{
			let mut inner = self.shared.lock();
			inner.flags.remove(StatusFlags::QUEUE_FULL);
			inner.flags.insert(StatusFlags::COMMAND_QUEUE_OK);
		}

		if let Some(limit) = self.shared.config.command_timeout() {
			let age = self.connected_since.map_or_else(|| command.age(), |since| command.age_since(since));
			if age > limit {
				warn!("Dropping {} command {} queued {:?} ago", command.priority, command.request_id, age);
				self.shared.update_stats(|stats| stats.command_timeouts += 1);
				return Ok(());
			}
		}

		debug!("Sending {} command {}", command.priority, command.request_id);
		self.send_json(&command.to_request())?;
		self.shared.update_stats(|stats| stats.scene_switches += 1);
		Ok(())
	}

	fn keepalive(&mut self) -> Result<(), TransportError> {
		let config = &self.shared.config;
		if self.keepalive.is_overdue(config.ping_timeout()) {
			let mut inner = self.shared.lock();
			inner.stats.ping_failures += 1;
			inner.flags.remove(StatusFlags::KEEPALIVE_OK);
			return Err(TransportError::PingTimeout(config.ping_timeout()));
		}

		let now = Instant::now();
		if now >= self.keepalive.next_ping_at {
			let interval = config.ping_interval();
			self.send_frame(&[], Opcode::Ping)?;
			self.keepalive.sent(now, interval);
			trace!("Ping sent");
		}
		Ok(())
	}

	fn error_step(&mut self) {
		self.close_socket();

		let max_retries = self.shared.config.max_retries;
		let (retry_count, exhausted_now) = {
			let mut inner = self.shared.lock();
			let before = inner.retry_count;
			inner.retry_count = before.saturating_add(1).min(max_retries);
			(inner.retry_count, before < max_retries && inner.retry_count == max_retries)
		};

		if retry_count < max_retries {
			info!("Reconnecting (attempt {} of {})", retry_count, max_retries);
			self.shared.update_stats(|stats| stats.reconnections += 1);
			self.shared.set_state(ConnectionState::Reconnecting);
		} else {
			if exhausted_now {
				error!("Giving up after {} failed attempts; waiting for an explicit reconnect", retry_count);
			}
			self.backoff();
		}
	}

	fn fail(&self, e: &TransportError) {
		debug!("{} error: {}", e.type_name(), e);
		self.shared.raise(e.status_flag(), e.to_string());
		self.shared.set_state(ConnectionState::Error);
	}

	/// Sleep the retry delay, waking early on shutdown or an explicit reconnect
	fn backoff(&self) {
		if self.shared.queue.wait_closed(self.shared.config.retry_delay()) {
			trace!("Backoff interrupted by shutdown");
		}
	}

	fn send_json(&mut self, value: &Value) -> Result<(), TransportError> {
		let text = value.to_string();
		self.send_frame(text.as_bytes(), Opcode::Text)?;
		self.shared.update_stats(|stats| stats.messages_sent += 1);
		Ok(())
	}

	fn send_frame(&mut self, payload: &[u8], opcode: Opcode) -> Result<(), TransportError> {
		let socket = self.socket.as_mut().ok_or(TransportError::NotConnected)?;
		frame::send_frame(&mut **socket, payload, opcode)?;
		Ok(())
	}

	fn say_goodbye(&mut self) {
		let connected = self.shared.flags().contains(StatusFlags::WEBSOCKET_READY);
		if connected && self.socket.is_some() {
			if let Err(e) = self.send_frame(&CLOSE_NORMAL.to_be_bytes(), Opcode::Close) {
				debug!("Close frame not sent: {}", e);
			}
		}
	}

	/// Drop the socket and every flag that described it
	fn close_socket(&mut self) {
		if let Some(mut socket) = self.socket.take() {
			socket.shutdown();
			debug!("Socket closed");
		}
		self.challenge = None;
		self.connected_since = None;
		self.shared.clear_flags(StatusFlags::CONNECTION | StatusFlags::SCENE_CACHE_VALID);
	}
}
