//! One TCP connection to a mirror.
//!
//! A thin wrapper around `TcpStream` so that connection state is an explicit
//! value the worker can drop and replace, rather than an implicit fallback
//! path. All three blocking operations (connect, send, receive) run under
//! the same configured timeout.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// An open TCP connection to one (host, port).
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
}

impl Connection {
    /// Resolve the host and connect, applying `timeout` to the connect call
    /// and to all subsequent reads and writes.
    pub fn open(host: &str, port: u16, timeout: Duration) -> EngineResult<Self> {
        let addrs = (host, port).to_socket_addrs().map_err(|e| connect_error(host, port, e))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    debug!(%addr, "connection established");
                    return Ok(Self { stream });
                }
                Err(e) => last_err = Some(e),
            }
        }

        let source = last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses")
        });
        Err(connect_error(host, port, source))
    }

    /// Write the full request to the socket.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Read available bytes into `buf`. `Ok(0)` means the peer closed.
    pub fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    /// Shut the connection down, ignoring errors.
    pub fn close(self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn connect_error(host: &str, port: u16, source: io::Error) -> EngineError {
    EngineError::Connect {
        host: host.to_string(),
        port,
        source,
    }
}
