use base64::engine::{general_purpose::STANDARD, Engine};
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, trace};

pub const SUBPROTOCOL: &str = "obswebsocket.json";

const SWITCHING_PROTOCOLS: &str = "101 Switching Protocols";
const MAX_RESPONSE_LEN: usize = 2048;

#[derive(Debug, Error)]
pub enum HandshakeError {
	#[error("failed to send upgrade request: {0}")]
	Send(#[source] io::Error),

	#[error("failed to receive upgrade response: {0}")]
	Receive(#[source] io::Error),

	#[error("connection closed before upgrade response")]
	Closed,

	#[error("invalid upgrade response: {status_line}")]
	Rejected { status_line: String },

	#[error("upgrade response headers exceed {limit} bytes")]
	Oversized { limit: usize },
}

/// Random 16-byte `Sec-WebSocket-Key`, base64 encoded
pub fn generate_key() -> String {
	let key: [u8; 16] = rand::random();
	STANDARD.encode(key)
}

pub fn upgrade_request(host: &str, port: u16, key: &str) -> String {
	format!(
		"GET / HTTP/1.1\r\n\
		 Host: {host}:{port}\r\n\
		 Upgrade: websocket\r\n\
		 Connection: Upgrade\r\n\
		 Sec-WebSocket-Key: {key}\r\n\
		 Sec-WebSocket-Version: 13\r\n\
		 Sec-WebSocket-Protocol: {SUBPROTOCOL}\r\n\
		 \r\n"
	)
}

/// Send the HTTP upgrade and confirm the server switched protocols.
///
/// Only the status substring is checked; headers are not parsed. The response is
/// consumed up to the blank line so frames sent right behind it stay unread.
pub fn perform<S: Read + Write + ?Sized>(stream: &mut S, host: &str, port: u16) -> Result<(), HandshakeError> {
	let key = generate_key();
	let request = upgrade_request(host, port, &key);
	trace!("Sending upgrade request to {}:{}", host, port);

	stream.write_all(request.as_bytes()).map_err(HandshakeError::Send)?;
	stream.flush().map_err(HandshakeError::Send)?;

	let response = read_response(stream)?;
	if !response.contains(SWITCHING_PROTOCOLS) {
		let status_line = response.lines().next().unwrap_or_default().to_string();
		return Err(HandshakeError::Rejected { status_line });
	}

	debug!("WebSocket upgrade accepted by {}:{}", host, port);
	Ok(())
}

fn read_response<S: Read + ?Sized>(stream: &mut S) -> Result<String, HandshakeError> {
	let mut buf = Vec::with_capacity(256);
	let mut byte = [0u8; 1];

	while buf.len() < MAX_RESPONSE_LEN && !buf.ends_with(b"\r\n\r\n") {
		match stream.read(&mut byte) {
			Ok(0) if buf.is_empty() => return Err(HandshakeError::Closed),
			Ok(0) => break,
			Ok(_) => buf.push(byte[0]),
			Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
			Err(e) => return Err(HandshakeError::Receive(e)),
		}
	}

	if buf.len() >= MAX_RESPONSE_LEN && !buf.ends_with(b"\r\n\r\n") {
		return Err(HandshakeError::Oversized { limit: MAX_RESPONSE_LEN });
	}
	Ok(String::from_utf8_lossy(&buf).into_owned())
}
