use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::error::{ChannelError, Result};
use crate::traits::Channel;

/// TCP socket transport.
///
/// The stream is cloned into separate read and write halves so that the
/// receive loop can block in `readx` while writers make progress.
pub struct TcpChannel {
    read_half: Mutex<TcpStream>,
    write_half: Mutex<TcpStream>,
    peer: SocketAddr,
}

impl TcpChannel {
    /// Connect to a device listening on `addr` (blocking).
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let mut last_err = None;
        for resolved in addr.to_socket_addrs()? {
            match TcpStream::connect(resolved) {
                Ok(stream) => return Self::from_stream(stream),
                Err(err) => last_err = Some((resolved, err)),
            }
        }
        let (resolved, source) = last_err.ok_or_else(|| {
            ChannelError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "address resolved to nothing",
            ))
        })?;
        Err(ChannelError::Connect {
            addr: resolved.to_string(),
            source,
        })
    }

    /// Connect with a bounded connection attempt.
    pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> Result<Self> {
        let stream =
            TcpStream::connect_timeout(addr, timeout).map_err(|source| ChannelError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Self::from_stream(stream)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let read_half = stream.try_clone()?;
        debug!(%peer, "tcp channel established");
        Ok(Self {
            read_half: Mutex::new(read_half),
            write_half: Mutex::new(stream),
            peer,
        })
    }

    /// The remote address this channel is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Channel for TcpChannel {
    fn readx(&self, buf: &mut [u8]) -> Result<()> {
        let mut stream = self.read_half.lock().expect("tcp read half poisoned");
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
        Ok(())
    }

    fn writex(&self, buf: &[u8]) -> Result<()> {
        let mut stream = self.write_half.lock().expect("tcp write half poisoned");
        let mut offset = 0;
        while offset < buf.len() {
            match stream.write(&buf[offset..]) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ChannelError::Io(err)),
            }
        }
        Ok(())
    }

    fn close(&self) {
        debug!(peer = %self.peer, "closing tcp channel");
        if let Ok(stream) = self.write_half.lock() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
