use base64::engine::{general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Identify op code
pub const OP_IDENTIFY: u64 = 1;
pub const RPC_VERSION: u64 = 1;
/// General (1) | Scenes (32): the server then emits `CurrentProgramSceneChanged`
pub const EVENT_SUBSCRIPTIONS: u64 = 33;

/// Challenge and salt announced by the server's Hello
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AuthChallenge {
	pub challenge: String,
	pub salt: String,
}

/// OBS WebSocket v5 challenge response:
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn compute_auth_response(password: &str, salt: &str, challenge: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(password.as_bytes());
	hasher.update(salt.as_bytes());
	let secret = STANDARD.encode(hasher.finalize());

	let mut hasher = Sha256::new();
	hasher.update(secret.as_bytes());
	hasher.update(challenge.as_bytes());
	STANDARD.encode(hasher.finalize())
}

/// Identify envelope; `authentication` is only sent when the server asked for it
pub fn identify_message(authentication: Option<&str>) -> Value {
	let mut d = json!({
		"rpcVersion": RPC_VERSION,
		"eventSubscriptions": EVENT_SUBSCRIPTIONS,
	});
	if let Some(auth) = authentication {
		d["authentication"] = Value::String(auth.to_string());
	}

	json!({
		"op": OP_IDENTIFY,
		"d": d,
	})
}

impl AuthChallenge {
	pub fn respond(&self, password: &str) -> Value {
		let auth = compute_auth_response(password, &self.salt, &self.challenge);
		identify_message(Some(&auth))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_known_response() {
		assert_eq!(compute_auth_response("abc", "s1", "c1"), "2NOyAyCN6/M3ksRrRmjwYTgzRTGrv0snpRxJ0AzDvRs=");
	}

	#[test]
	fn test_concatenation_order_matters() {
		let forward = compute_auth_response("abc", "s1", "c1");
		assert_ne!(forward, compute_auth_response("abc", "c1", "s1"));
		assert_ne!(forward, compute_auth_response("s1", "abc", "c1"));
	}

	#[test]
	fn test_response_shape() {
		let auth = compute_auth_response("supersecretpassword", "PZVbYpvAnZut2SS6JNJytDm9", "ztTBnnuqrqaKDzRM3xcVdbYm");
		assert_eq!(auth.len(), 44);
		assert!(STANDARD.decode(&auth).is_ok());
	}

	#[test]
	fn test_identify_with_authentication() {
		let challenge = AuthChallenge {
			challenge: "c1".to_string(),
			salt: "s1".to_string(),
		};
		let msg = challenge.respond("abc");

		assert_eq!(msg["op"], 1);
		assert_eq!(msg["d"]["rpcVersion"], 1);
		assert_eq!(msg["d"]["eventSubscriptions"], 33);
		assert_eq!(msg["d"]["authentication"], "2NOyAyCN6/M3ksRrRmjwYTgzRTGrv0snpRxJ0AzDvRs=");
	}

	#[test]
	fn test_identify_without_authentication() {
		let msg = identify_message(None);
		assert_eq!(msg["op"], 1);
		assert!(msg["d"].get("authentication").is_none());
	}
}
