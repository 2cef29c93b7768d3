use super::{Connector, Transport};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, trace};

/// Plain TCP stream; TLS is expected to be handled below this layer if needed
#[derive(Debug)]
pub struct TcpTransport {
	stream: TcpStream,
	io_timeout: Option<Duration>,
}

impl TcpTransport {
	pub const fn new(stream: TcpStream) -> Self {
		Self { stream, io_timeout: None }
	}
}

impl Read for TcpTransport {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.stream.read(buf)
	}
}

impl Write for TcpTransport {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.stream.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.stream.flush()
	}
}

impl Transport for TcpTransport {
	fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
		// a zero read timeout is rejected by the OS
		self.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

		let mut probe = [0u8; 1];
		let readable = match self.stream.peek(&mut probe) {
			Ok(_) => Ok(true),
			Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => Ok(false),
			Err(e) => Err(e),
		};

		self.stream.set_read_timeout(self.io_timeout)?;
		readable
	}

	fn set_io_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
		self.stream.set_read_timeout(timeout)?;
		self.stream.set_write_timeout(timeout)?;
		self.io_timeout = timeout;
		Ok(())
	}

	fn shutdown(&mut self) {
		if let Err(e) = self.stream.shutdown(Shutdown::Both) {
			trace!("Socket shutdown: {}", e);
		}
	}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
	fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> io::Result<Box<dyn Transport>> {
		let mut last_error = None;

		for addr in (host, port).to_socket_addrs()? {
			match TcpStream::connect_timeout(&addr, timeout) {
				Ok(stream) => {
					stream.set_nodelay(true)?;
					let mut transport = TcpTransport::new(stream);
					transport.set_io_timeout(Some(timeout))?;
					debug!("TCP connection established to {}", addr);
					return Ok(Box::new(transport));
				}
				Err(e) => {
					debug!("Connect to {} failed: {}", addr, e);
					last_error = Some(e);
				}
			}
		}

		Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address found for {host}:{port}"))))
	}
}
