use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_BITS: u8 = 0x0F;
const LEN_BITS: u8 = 0x7F;

const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Largest payload accepted from the server
pub const MAX_PAYLOAD_LEN: u64 = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
	#[error("frame io failed: {0}")]
	Io(#[from] io::Error),

	#[error("frame payload of {len} bytes exceeds limit of {max} bytes")]
	TooLarge { len: u64, max: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
	Continuation,
	Text,
	Binary,
	Close,
	Ping,
	Pong,
	Reserved(u8),
}

impl Opcode {
	pub const fn from_bits(bits: u8) -> Self {
		match bits & OPCODE_BITS {
			0x0 => Self::Continuation,
			0x1 => Self::Text,
			0x2 => Self::Binary,
			0x8 => Self::Close,
			0x9 => Self::Ping,
			0xA => Self::Pong,
			other => Self::Reserved(other),
		}
	}

	pub const fn bits(self) -> u8 {
		match self {
			Self::Continuation => 0x0,
			Self::Text => 0x1,
			Self::Binary => 0x2,
			Self::Close => 0x8,
			Self::Ping => 0x9,
			Self::Pong => 0xA,
			Self::Reserved(bits) => bits & OPCODE_BITS,
		}
	}
}

impl fmt::Display for Opcode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Continuation => f.write_str("continuation"),
			Self::Text => f.write_str("text"),
			Self::Binary => f.write_str("binary"),
			Self::Close => f.write_str("close"),
			Self::Ping => f.write_str("ping"),
			Self::Pong => f.write_str("pong"),
			Self::Reserved(bits) => write!(f, "reserved({bits:#x})"),
		}
	}
}

/// One decoded frame. Fragments are surfaced as-is; nothing is reassembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
	pub fin: bool,
	pub opcode: Opcode,
	/// `None` for a zero-length payload
	pub payload: Option<Vec<u8>>,
}

impl Frame {
	pub fn payload(&self) -> &[u8] {
		self.payload.as_deref().unwrap_or_default()
	}

	pub fn text(&self) -> Option<&str> {
		std::str::from_utf8(self.payload()).ok()
	}

	/// Status code and reason carried by a close frame
	pub fn close_reason(&self) -> Option<(u16, String)> {
		let payload = self.payload();
		if self.opcode != Opcode::Close || payload.len() < 2 {
			return None;
		}
		let code = u16::from_be_bytes([payload[0], payload[1]]);
		Some((code, String::from_utf8_lossy(&payload[2..]).into_owned()))
	}
}

/// Encode a single final, masked client frame.
pub fn encode_frame(payload: &[u8], opcode: Opcode, mask_key: [u8; 4]) -> Vec<u8> {
	let len = payload.len();
	let mut buf = Vec::with_capacity(len + 14);

	buf.push(FIN_BIT | opcode.bits());

	if len <= 125 {
		// fits in the 7 length bits
		#[allow(clippy::cast_possible_truncation)]
		buf.push(MASK_BIT | len as u8);
	} else if let Ok(len) = u16::try_from(len) {
		buf.push(MASK_BIT | LEN_16);
		buf.extend_from_slice(&len.to_be_bytes());
	} else {
		buf.push(MASK_BIT | LEN_64);
		buf.extend_from_slice(&(len as u64).to_be_bytes());
	}

	buf.extend_from_slice(&mask_key);
	buf.extend(payload.iter().enumerate().map(|(i, byte)| byte ^ mask_key[i % 4]));
	buf
}

/// Write one masked frame with a fresh random mask key.
pub fn send_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8], opcode: Opcode) -> Result<(), FrameError> {
	let mask_key: [u8; 4] = rand::random();
	writer.write_all(&encode_frame(payload, opcode, mask_key))?;
	writer.flush()?;
	Ok(())
}

/// Read exactly one frame, unmasking it if the peer masked it.
///
/// Partial payload reads are retried until filled; end of stream at any point fails the frame.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Frame, FrameError> {
	let mut header = [0u8; 2];
	reader.read_exact(&mut header)?;

	let fin = header[0] & FIN_BIT != 0;
	let opcode = Opcode::from_bits(header[0]);
	let masked = header[1] & MASK_BIT != 0;

	let payload_len = match header[1] & LEN_BITS {
		LEN_16 => {
			let mut ext = [0u8; 2];
			reader.read_exact(&mut ext)?;
			u64::from(u16::from_be_bytes(ext))
		}
		LEN_64 => {
			let mut ext = [0u8; 8];
			reader.read_exact(&mut ext)?;
			u64::from_be_bytes(ext)
		}
		short => u64::from(short),
	};

	if payload_len > MAX_PAYLOAD_LEN {
		return Err(FrameError::TooLarge {
			len: payload_len,
			max: MAX_PAYLOAD_LEN,
		});
	}

	let mut mask_key = [0u8; 4];
	if masked {
		reader.read_exact(&mut mask_key)?;
	}

	let payload = if payload_len == 0 {
		None
	} else {
		// bounded by MAX_PAYLOAD_LEN above
		#[allow(clippy::cast_possible_truncation)]
		let mut data = vec![0u8; payload_len as usize];
		reader.read_exact(&mut data)?;
		if masked {
			for (i, byte) in data.iter_mut().enumerate() {
				*byte ^= mask_key[i % 4];
			}
		}
		Some(data)
	};

	Ok(Frame { fin, opcode, payload })
}
