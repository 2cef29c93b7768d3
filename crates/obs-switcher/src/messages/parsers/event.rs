use crate::messages::RoutedMessage;
use serde_json::Value;
use tracing::trace;

pub const CURRENT_PROGRAM_SCENE_CHANGED: &str = "CurrentProgramSceneChanged";

/// Handles parsing of Event messages
pub(crate) struct EventMessageParser;

impl EventMessageParser {
	pub fn parse(d: Option<&Value>) -> RoutedMessage {
		let Some(d) = d else {
			return RoutedMessage::Ignored;
		};

		match d.get("eventType").and_then(Value::as_str) {
			Some(CURRENT_PROGRAM_SCENE_CHANGED) => d
				.get("eventData")
				.and_then(|data| data.get("sceneName"))
				.and_then(Value::as_str)
				.map_or(RoutedMessage::Ignored, |name| RoutedMessage::SceneChanged(name.to_string())),
			Some(other) => {
				trace!("Ignoring event {}", other);
				RoutedMessage::Ignored
			}
			None => RoutedMessage::Ignored,
		}
	}
}
