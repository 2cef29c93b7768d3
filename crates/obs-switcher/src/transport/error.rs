use crate::state::StatusFlags;
use crate::transport::{FrameError, HandshakeError};
use std::time::Duration;

/// Close code OBS sends when the Identify was rejected
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4009;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
	#[error("failed to connect to {endpoint}: {source}")]
	Connect {
		endpoint: String,
		#[source]
		source: std::io::Error,
	},

	#[error("socket error: {0}")]
	Io(#[from] std::io::Error),

	#[error("frame error: {0}")]
	Frame(#[from] FrameError),

	#[error("handshake failed: {0}")]
	Handshake(#[from] HandshakeError),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("authentication failed: {0}")]
	Auth(String),

	#[error("connection closed by server (code {code:?}): {reason}")]
	Closed { code: Option<u16>, reason: String },

	#[error("no pong within {0:?}")]
	PingTimeout(Duration),

	#[error("not connected")]
	NotConnected,
}

impl TransportError {
	/// Status bit recording this failure category
	pub fn status_flag(&self) -> StatusFlags {
		match self {
			Self::Closed {
				code: Some(CLOSE_AUTHENTICATION_FAILED),
				..
			} => StatusFlags::AUTH_ERROR,
			Self::Connect { .. } | Self::Io(_) | Self::Frame(FrameError::Io(_)) | Self::Closed { .. } | Self::NotConnected => StatusFlags::NETWORK_ERROR,
			Self::Frame(FrameError::TooLarge { .. }) | Self::Handshake(_) | Self::Protocol(_) => StatusFlags::PROTOCOL_ERROR,
			Self::Auth(_) => StatusFlags::AUTH_ERROR,
			Self::PingTimeout(_) => StatusFlags::TIMEOUT_ERROR,
		}
	}

	pub fn type_name(&self) -> &'static str {
		match self {
			Self::Connect { .. } => "Connect",
			Self::Io(_) => "Io",
			Self::Frame(_) => "Frame",
			Self::Handshake(_) => "Handshake",
			Self::Protocol(_) => "Protocol",
			Self::Auth(_) => "Auth",
			Self::Closed { .. } => "Closed",
			Self::PingTimeout(_) => "PingTimeout",
			Self::NotConnected => "NotConnected",
		}
	}
}
