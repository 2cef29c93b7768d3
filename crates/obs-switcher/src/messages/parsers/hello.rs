use crate::auth::AuthChallenge;
use crate::messages::RoutedMessage;
use serde_json::Value;
use tracing::{debug, warn};

/// Handles parsing of Hello messages
pub(crate) struct HelloMessageParser;

impl HelloMessageParser {
	pub fn parse(d: Option<&Value>) -> RoutedMessage {
		let obs_websocket_version = d.and_then(|d| d.get("obsWebSocketVersion")).and_then(Value::as_str).map(String::from);

		// both strings must be present for authentication to be required
		let authentication = match d.and_then(|d| d.get("authentication")) {
			Some(auth) if auth.is_object() => {
				let parsed = serde_json::from_value::<AuthChallenge>(auth.clone()).ok();
				if parsed.is_none() {
					warn!("Hello carried an authentication object without challenge/salt strings");
				}
				parsed
			}
			_ => None,
		};

		debug!(
			"Hello from obs-websocket {} (authentication {})",
			obs_websocket_version.as_deref().unwrap_or("unknown"),
			if authentication.is_some() { "required" } else { "not required" }
		);

		RoutedMessage::Hello {
			obs_websocket_version,
			authentication,
		}
	}
}
