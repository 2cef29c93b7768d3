mod error;
pub mod frame;
pub mod handshake;
mod tcp;

use std::io::{self, Read, Write};
use std::time::Duration;

pub use error::TransportError;
pub use frame::{Frame, FrameError, Opcode};
pub use handshake::HandshakeError;
pub use tcp::{TcpConnector, TcpTransport};

/// Byte stream owned by the daemon thread
pub trait Transport: Read + Write + Send {
	/// Wait up to `timeout` for inbound bytes. End of stream counts as readable.
	fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

	/// Bound every blocking read and write; `None` blocks indefinitely
	fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

	fn shutdown(&mut self);
}

/// Opens transports for the daemon thread on every (re)connection attempt
pub trait Connector: Send {
	fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<Box<dyn Transport>>;
}

impl<F> Connector for F
where
	F: FnMut(&str, u16, Duration) -> io::Result<Box<dyn Transport>> + Send,
{
	fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<Box<dyn Transport>> {
		self(host, port, timeout)
	}
}
