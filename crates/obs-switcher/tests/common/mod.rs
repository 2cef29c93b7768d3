#![allow(dead_code)]

use obs_switcher::transport::{frame, Connector, Frame, Opcode, Transport};
use obs_switcher::{ConnectionState, ObsConfig, ObsSwitcher};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const SWITCHING_PROTOCOLS: &str = "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Protocol: obswebsocket.json\r\n\r\n";
pub const HELLO_NO_AUTH: &str = r#"{"op":0,"d":{"obsWebSocketVersion":"5.1.0","rpcVersion":1}}"#;
pub const IDENTIFIED: &str = r#"{"op":2,"d":{"negotiatedRpcVersion":1}}"#;

/// Unmasked server-to-client frame
pub fn server_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
	let mut wire = vec![0x80 | opcode.bits()];
	match payload.len() {
		len @ 0..=125 => wire.push(len as u8),
		len @ 126..=65535 => {
			wire.push(126);
			wire.extend_from_slice(&(len as u16).to_be_bytes());
		}
		len => {
			wire.push(127);
			wire.extend_from_slice(&(len as u64).to_be_bytes());
		}
	}
	wire.extend_from_slice(payload);
	wire
}

pub fn scene_changed(name: &str) -> String {
	serde_json::json!({
		"op": 5,
		"d": {
			"eventType": "CurrentProgramSceneChanged",
			"eventIntent": 4,
			"eventData": { "sceneName": name },
		},
	})
	.to_string()
}

/// One scripted OBS session: bytes the server will send and bytes the client wrote
#[derive(Clone, Default)]
pub struct MockServer {
	inbound: Arc<Mutex<VecDeque<u8>>>,
	outbound: Arc<Mutex<Vec<u8>>>,
	/// Remaining successful `write` calls; `None` is unlimited
	write_budget: Arc<Mutex<Option<usize>>>,
	/// While set, `poll_readable` blocks and reports itself parked
	paused: Arc<AtomicBool>,
	parked: Arc<AtomicBool>,
}

impl MockServer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Upgrade response followed by `hello`
	pub fn accepting(hello: &str) -> Self {
		let server = Self::new();
		server.push_raw(SWITCHING_PROTOCOLS.as_bytes());
		server.push_text(hello);
		server
	}

	pub fn limit_writes(&self, writes: usize) {
		*self.write_budget.lock().unwrap() = Some(writes);
	}

	pub fn push_raw(&self, bytes: &[u8]) {
		self.inbound.lock().unwrap().extend(bytes.iter().copied());
	}

	pub fn push_text(&self, text: &str) {
		self.push_raw(&server_frame(Opcode::Text, text.as_bytes()));
	}

	pub fn push_frame(&self, opcode: Opcode, payload: &[u8]) {
		self.push_raw(&server_frame(opcode, payload));
	}

	/// Hold the client inside its next readability poll
	pub fn pause(&self) {
		self.paused.store(true, Ordering::SeqCst);
	}

	pub fn resume(&self) {
		self.paused.store(false, Ordering::SeqCst);
	}

	pub fn is_parked(&self) -> bool {
		self.parked.load(Ordering::SeqCst)
	}

	pub fn transport(&self) -> MockTransport {
		MockTransport { server: self.clone() }
	}

	/// Everything the client wrote, as the upgrade request text
	pub fn upgrade_request(&self) -> String {
		let outbound = self.outbound.lock().unwrap();
		let end = find_header_end(&outbound).unwrap_or(outbound.len());
		String::from_utf8_lossy(&outbound[..end]).into_owned()
	}

	/// Decode every client frame written after the upgrade request
	pub fn sent_frames(&self) -> Vec<Frame> {
		let outbound = self.outbound.lock().unwrap().clone();
		let Some(start) = find_header_end(&outbound) else {
			return Vec::new();
		};

		let mut cursor = Cursor::new(&outbound[start..]);
		std::iter::from_fn(|| frame::read_frame(&mut cursor).ok()).collect()
	}

	pub fn sent_json(&self) -> Vec<Value> {
		self.sent_frames()
			.iter()
			.filter(|frame| frame.opcode == Opcode::Text)
			.filter_map(|frame| serde_json::from_slice(frame.payload()).ok())
			.collect()
	}

	pub fn sent_requests(&self) -> Vec<String> {
		self.sent_json()
			.iter()
			.filter(|msg| msg["op"] == 6)
			.filter_map(|msg| msg["d"]["requestData"]["sceneName"].as_str().map(String::from))
			.collect()
	}
}

fn find_header_end(bytes: &[u8]) -> Option<usize> {
	bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

pub struct MockTransport {
	server: MockServer,
}

impl Read for MockTransport {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		let mut inbound = self.server.inbound.lock().unwrap();
		if inbound.is_empty() {
			return Err(io::Error::from(io::ErrorKind::TimedOut));
		}
		let n = buf.len().min(inbound.len());
		for (slot, byte) in buf.iter_mut().zip(inbound.drain(..n)) {
			*slot = byte;
		}
		Ok(n)
	}
}

impl Write for MockTransport {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		let mut budget = self.server.write_budget.lock().unwrap();
		if let Some(remaining) = budget.as_mut() {
			if *remaining == 0 {
				return Err(io::Error::from(io::ErrorKind::BrokenPipe));
			}
			*remaining -= 1;
		}
		self.server.outbound.lock().unwrap().extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl Transport for MockTransport {
	fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
		while self.server.paused.load(Ordering::SeqCst) {
			self.server.parked.store(true, Ordering::SeqCst);
			thread::sleep(Duration::from_millis(2));
		}
		self.server.parked.store(false, Ordering::SeqCst);

		let deadline = Instant::now() + timeout;
		loop {
			if !self.server.inbound.lock().unwrap().is_empty() {
				return Ok(true);
			}
			if Instant::now() >= deadline {
				return Ok(false);
			}
			thread::sleep(Duration::from_millis(2));
		}
	}

	fn set_io_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
		Ok(())
	}

	fn shutdown(&mut self) {}
}

/// Hands out scripted sessions in order, then refuses every further connection
#[derive(Clone, Default)]
pub struct MockConnector {
	/// `None` refuses that attempt
	sessions: Arc<Mutex<VecDeque<Option<MockServer>>>>,
	attempts: Arc<AtomicUsize>,
}

impl MockConnector {
	pub fn new(sessions: impl IntoIterator<Item = MockServer>) -> Self {
		Self::scripted(sessions.into_iter().map(Some))
	}

	pub fn scripted(sessions: impl IntoIterator<Item = Option<MockServer>>) -> Self {
		Self {
			sessions: Arc::new(Mutex::new(sessions.into_iter().collect())),
			attempts: Arc::new(AtomicUsize::new(0)),
		}
	}

	pub fn refusing() -> Self {
		Self::new([])
	}

	pub fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}
}

impl Connector for MockConnector {
	fn connect(&mut self, _host: &str, _port: u16, _timeout: Duration) -> io::Result<Box<dyn Transport>> {
		self.attempts.fetch_add(1, Ordering::SeqCst);
		match self.sessions.lock().unwrap().pop_front().flatten() {
			Some(server) => Ok(Box::new(server.transport())),
			None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
		}
	}
}

/// Settings that keep scenario tests fast
pub fn test_config() -> ObsConfig {
	let mut config = ObsConfig::new("obs.test", 4455, "");
	config.retry_delay_ms = 60_000;
	config.ping_interval_ms = 60_000;
	config.handshake_timeout_ms = 500;
	config
}

/// Record every `(old, new)` state change
pub fn record_states(switcher: &ObsSwitcher) -> Arc<Mutex<Vec<(ConnectionState, ConnectionState)>>> {
	let history = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&history);
	switcher.set_state_callback(move |old, new| sink.lock().unwrap().push((old, new)));
	history
}

pub fn visited(history: &Mutex<Vec<(ConnectionState, ConnectionState)>>, state: ConnectionState) -> bool {
	history.lock().unwrap().iter().any(|&(_, new)| new == state)
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let deadline = Instant::now() + timeout;
	while Instant::now() < deadline {
		if condition() {
			return true;
		}
		thread::sleep(Duration::from_millis(5));
	}
	condition()
}
