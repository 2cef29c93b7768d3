mod parsers;

use crate::auth::AuthChallenge;
use parsers::{EventMessageParser, HelloMessageParser, ResponseMessageParser};
use serde_json::Value;
use thiserror::Error;
use tracing::{instrument, trace, warn};

pub const OP_HELLO: u64 = 0;
pub const OP_IDENTIFIED: u64 = 2;
pub const OP_EVENT: u64 = 5;
pub const OP_REQUEST: u64 = 6;
pub const OP_REQUEST_RESPONSE: u64 = 7;

#[derive(Debug, Error)]
pub enum MessageError {
	#[error("Invalid JSON received: {0}")]
	Json(#[from] serde_json::Error),
}

/// What an inbound control message means for the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedMessage {
	Hello {
		obs_websocket_version: Option<String>,
		authentication: Option<AuthChallenge>,
	},
	Identified {
		negotiated_rpc_version: Option<u64>,
	},
	SceneChanged(String),
	RequestSucceeded {
		request_id: Option<String>,
	},
	RequestFailed {
		request_id: Option<String>,
		comment: String,
	},
	Ignored,
}

/// Dispatch one text payload on its `op` field.
///
/// Only unparseable JSON is an error; a missing or unknown `op` is ignored.
#[instrument(level = "trace", skip(text), fields(message_len = text.len()))]
pub fn route(text: &str) -> Result<RoutedMessage, MessageError> {
	let json: Value = serde_json::from_str(text).map_err(|e| {
		warn!("Failed to parse JSON from OBS message: {}", e);
		trace!("Failed message content (first 200 chars): {}", text.chars().take(200).collect::<String>());
		e
	})?;

	let Some(op) = json.get("op").and_then(Value::as_u64) else {
		trace!("Message without integer op, dropping");
		return Ok(RoutedMessage::Ignored);
	};
	let d = json.get("d");

	let routed = match op {
		OP_HELLO => HelloMessageParser::parse(d),
		OP_IDENTIFIED => RoutedMessage::Identified {
			negotiated_rpc_version: d.and_then(|d| d.get("negotiatedRpcVersion")).and_then(Value::as_u64),
		},
		OP_EVENT => EventMessageParser::parse(d),
		OP_REQUEST_RESPONSE => ResponseMessageParser::parse(d),
		other => {
			trace!("Ignoring message with op {}", other);
			RoutedMessage::Ignored
		}
	};

	Ok(routed)
}
