use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Lifecycle of the connection driven by the daemon thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
	Uninitialized,
	Disconnected,
	Connecting,
	Authenticating,
	Connected,
	Error,
	Reconnecting,
	ShuttingDown,
}

impl ConnectionState {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Uninitialized => "Uninitialized",
			Self::Disconnected => "Disconnected",
			Self::Connecting => "Connecting",
			Self::Authenticating => "Authenticating",
			Self::Connected => "Connected",
			Self::Error => "Error",
			Self::Reconnecting => "Reconnecting",
			Self::ShuttingDown => "Shutting Down",
		}
	}

	/// `ShuttingDown` is never left once entered
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::ShuttingDown)
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Sticky status bitfield, independent from [`ConnectionState`].
///
/// Error bits stay set until the code path that resolves the condition clears them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusFlags(u32);

impl StatusFlags {
	pub const NONE: Self = Self(0);

	pub const DAEMON_READY: Self = Self(1 << 0);
	pub const SOCKET_CONNECTED: Self = Self(1 << 1);
	pub const WEBSOCKET_READY: Self = Self(1 << 2);
	pub const AUTHENTICATED: Self = Self(1 << 3);
	pub const KEEPALIVE_OK: Self = Self(1 << 4);
	pub const SCENE_CACHE_VALID: Self = Self(1 << 5);
	pub const COMMAND_QUEUE_OK: Self = Self(1 << 6);

	pub const NETWORK_ERROR: Self = Self(1 << 8);
	pub const AUTH_ERROR: Self = Self(1 << 9);
	pub const PROTOCOL_ERROR: Self = Self(1 << 10);
	pub const TIMEOUT_ERROR: Self = Self(1 << 11);
	pub const QUEUE_FULL: Self = Self(1 << 12);
	pub const MEMORY_ERROR: Self = Self(1 << 13);
	pub const CONFIG_ERROR: Self = Self(1 << 14);
	pub const SHUTDOWN_ERROR: Self = Self(1 << 15);

	/// Flags describing a live socket; dropped together when the socket is closed
	pub const CONNECTION: Self = Self(Self::SOCKET_CONNECTED.0 | Self::WEBSOCKET_READY.0 | Self::AUTHENTICATED.0 | Self::KEEPALIVE_OK.0);

	/// Errors that make the engine not ready
	pub const BLOCKING_ERRORS: Self = Self(Self::NETWORK_ERROR.0 | Self::AUTH_ERROR.0 | Self::PROTOCOL_ERROR.0);

	const NAMES: [(Self, &'static str); 15] = [
		(Self::DAEMON_READY, "DAEMON_READY"),
		(Self::SOCKET_CONNECTED, "SOCKET_CONNECTED"),
		(Self::WEBSOCKET_READY, "WEBSOCKET_READY"),
		(Self::AUTHENTICATED, "AUTHENTICATED"),
		(Self::KEEPALIVE_OK, "KEEPALIVE_OK"),
		(Self::SCENE_CACHE_VALID, "SCENE_CACHE_VALID"),
		(Self::COMMAND_QUEUE_OK, "COMMAND_QUEUE_OK"),
		(Self::NETWORK_ERROR, "NETWORK_ERROR"),
		(Self::AUTH_ERROR, "AUTH_ERROR"),
		(Self::PROTOCOL_ERROR, "PROTOCOL_ERROR"),
		(Self::TIMEOUT_ERROR, "TIMEOUT_ERROR"),
		(Self::QUEUE_FULL, "QUEUE_FULL"),
		(Self::MEMORY_ERROR, "MEMORY_ERROR"),
		(Self::CONFIG_ERROR, "CONFIG_ERROR"),
		(Self::SHUTDOWN_ERROR, "SHUTDOWN_ERROR"),
	];

	pub const fn from_bits(bits: u32) -> Self {
		Self(bits)
	}

	pub const fn bits(self) -> u32 {
		self.0
	}

	pub const fn is_empty(self) -> bool {
		self.0 == 0
	}

	/// True when every bit of `other` is set
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}

	/// True when any bit of `other` is set
	pub const fn intersects(self, other: Self) -> bool {
		self.0 & other.0 != 0
	}

	pub fn insert(&mut self, other: Self) {
		self.0 |= other.0;
	}

	pub fn remove(&mut self, other: Self) {
		self.0 &= !other.0;
	}
}

impl BitOr for StatusFlags {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self {
		Self(self.0 | rhs.0)
	}
}

impl BitOrAssign for StatusFlags {
	fn bitor_assign(&mut self, rhs: Self) {
		self.0 |= rhs.0;
	}
}

impl fmt::Display for StatusFlags {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut first = true;
		for (flag, name) in Self::NAMES {
			if self.contains(flag) {
				if !first {
					f.write_str("|")?;
				}
				f.write_str(name)?;
				first = false;
			}
		}
		if first {
			f.write_str("NONE")?;
		}
		Ok(())
	}
}

/// Monitoring counters, mutated by the daemon thread and read as snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
	pub messages_sent: u64,
	pub messages_received: u64,
	pub scene_switches: u64,
	pub reconnections: u64,
	pub ping_failures: u64,
	pub command_timeouts: u64,
	pub queue_overflows: u64,
	pub connection_started_at: Option<DateTime<Utc>>,
	pub last_successful_ping: Option<DateTime<Utc>>,
	pub avg_response_time_ms: f64,
}

impl Statistics {
	const RESPONSE_SMOOTHING: f64 = 0.2;

	/// Fold a ping round trip into the moving average
	pub fn record_response_time(&mut self, rtt_ms: f64) {
		if self.last_successful_ping.is_none() || self.avg_response_time_ms == 0.0 {
			self.avg_response_time_ms = rtt_ms;
		} else {
			self.avg_response_time_ms += Self::RESPONSE_SMOOTHING * (rtt_ms - self.avg_response_time_ms);
		}
		self.last_successful_ping = Some(Utc::now());
	}
}
