use crate::messages::RoutedMessage;
use serde_json::Value;

const DEFAULT_FAILURE: &str = "Request failed";

/// Handles parsing of RequestResponse messages
pub(crate) struct ResponseMessageParser;

impl ResponseMessageParser {
	pub fn parse(d: Option<&Value>) -> RoutedMessage {
		let Some(d) = d else {
			return RoutedMessage::Ignored;
		};

		let request_id = d.get("requestId").and_then(Value::as_str).map(String::from);
		let Some(status) = d.get("requestStatus") else {
			return RoutedMessage::Ignored;
		};

		match status.get("result").and_then(Value::as_bool) {
			Some(false) => RoutedMessage::RequestFailed {
				request_id,
				comment: status.get("comment").and_then(Value::as_str).unwrap_or(DEFAULT_FAILURE).to_string(),
			},
			Some(true) => RoutedMessage::RequestSucceeded { request_id },
			None => RoutedMessage::Ignored,
		}
	}
}
