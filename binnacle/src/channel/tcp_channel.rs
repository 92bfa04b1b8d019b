use crate::AbstractChannel;
use std::{
    io::{Error, ErrorKind, Read, Result, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    time::{Duration, Instant},
};

/// A channel over two TCP connections, one per direction.
///
/// Each endpoint accepts one connection as a server on its local port (the
/// write half) and connects as a client to the peer's port (the read half).
/// The two sockets let both parties push large buffers simultaneously without
/// deadlocking on a single full-duplex stream; the protocols only require
/// that writes and reads stay logically ordered.
pub struct TwoTcpChannel {
    reader: TcpStream,
    writer: TcpStream,
    bytes_read: usize,
    bytes_written: usize,
}

impl TwoTcpChannel {
    /// Connect to the peer at `address`: serve the write half on
    /// `local_port`, connect the read half to `remote_port`. Retries the
    /// client connect until the default 90 second deadline passes.
    pub fn connect(address: &str, remote_port: u16, local_port: u16) -> Result<Self> {
        Self::connect_timeout(address, remote_port, local_port, Duration::from_secs(90))
    }

    /// Like `connect`, with an explicit deadline.
    pub fn connect_timeout(
        address: &str,
        remote_port: u16,
        local_port: u16,
        timeout: Duration,
    ) -> Result<Self> {
        let remote: IpAddr = address
            .parse()
            .map_err(|_| Error::new(ErrorKind::InvalidInput, format!("bad address {address}")))?;
        let local: IpAddr = match remote {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };

        // The two bring-up tasks run concurrently: with both parties doing
        // the same thing, a sequential accept-then-connect would deadlock.
        let server = std::thread::spawn(move || -> Result<TcpStream> {
            let listener = TcpListener::bind(SocketAddr::new(local, local_port))?;
            let (stream, _) = listener.accept()?;
            stream.set_nodelay(true)?;
            Ok(stream)
        });
        let remote_addr = SocketAddr::new(remote, remote_port);
        let client = std::thread::spawn(move || -> Result<TcpStream> {
            let deadline = Instant::now() + timeout;
            loop {
                match TcpStream::connect(remote_addr) {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        return Ok(stream);
                    }
                    Err(e) => {
                        if Instant::now() >= deadline {
                            return Err(e);
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        });

        let writer = server
            .join()
            .map_err(|_| Error::new(ErrorKind::Other, "server bring-up panicked"))??;
        let reader = client
            .join()
            .map_err(|_| Error::new(ErrorKind::Other, "client bring-up panicked"))??;
        Ok(Self {
            reader,
            writer,
            bytes_read: 0,
            bytes_written: 0,
        })
    }

    /// Total bytes read from the channel.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Total bytes written to the channel.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl AbstractChannel for TwoTcpChannel {
    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes_written += bytes.len();
        self.writer.write_all(bytes)
    }

    #[inline]
    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.bytes_read += bytes.len();
        self.reader.read_exact(bytes)
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    #[inline]
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.try_clone().unwrap(),
            writer: self.writer.try_clone().unwrap(),
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_tcp_roundtrip() {
        let handle = std::thread::spawn(|| {
            let mut channel = TwoTcpChannel::connect("127.0.0.1", 30430, 30431).unwrap();
            channel.write_vec(b"ahoy").unwrap();
            channel.flush().unwrap();
            channel.read_u64().unwrap()
        });
        let mut channel = TwoTcpChannel::connect("127.0.0.1", 30431, 30430).unwrap();
        let msg = channel.read_vec().unwrap();
        assert_eq!(msg, b"ahoy");
        channel.write_u64(99).unwrap();
        channel.flush().unwrap();
        assert_eq!(handle.join().unwrap(), 99);
        assert!(channel.bytes_written() > 0 && channel.bytes_read() > 0);
    }
}
