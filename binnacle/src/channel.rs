//! Party-to-party I/O.
//!
//! Everything the protocols say on the wire goes through
//! [`AbstractChannel`]: an ordered, reliable byte stream dressed up with
//! the handful of shapes the protocol layers actually send — fixed-width
//! native-endian values, length-prefixed blobs, packed boolean runs, and
//! 16-byte blocks. Implementations decide what carries the bytes: an
//! in-process socket pair in the tests, two TCP connections in deployment.

mod tcp_channel;
mod track_channel;
#[cfg(unix)]
mod unix_channel;

pub use tcp_channel::TwoTcpChannel;
pub use track_channel::TrackChannel;

#[cfg(unix)]
pub use unix_channel::{track_unix_channel_pair, unix_channel_pair, TrackUnixChannel, UnixChannel};

use crate::Block;
use std::{
    cell::RefCell,
    io::{Read, Result, Write},
    rc::Rc,
};

/// The byte-stream interface the protocol layers are written against.
///
/// Channels are clonable so the PSI and share layers can drive the same
/// underlying stream. Writes may be buffered; a party must `flush` before
/// turning around to wait on the peer.
pub trait AbstractChannel {
    /// Fill `bytes` from the stream.
    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<()>;
    /// Push `bytes` onto the stream.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;
    /// Flush buffered writes.
    fn flush(&mut self) -> Result<()>;
    /// Another handle onto the same stream.
    fn clone(&self) -> Self
    where
        Self: Sized;

    /// Read a run of `nbytes` into a fresh vector.
    fn read_exact_vec(&mut self, nbytes: usize) -> Result<Vec<u8>> {
        let mut data = vec![0; nbytes];
        self.read_bytes(&mut data)?;
        Ok(data)
    }

    /// Write a length-prefixed blob: the length as a native-endian `usize`,
    /// then the payload.
    fn write_vec(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_usize(bytes.len())?;
        if !bytes.is_empty() {
            self.write_bytes(bytes)?;
        }
        Ok(())
    }

    /// Read a blob written by `write_vec`.
    fn read_vec(&mut self) -> Result<Vec<u8>> {
        let len = self.read_usize()?;
        self.read_exact_vec(len)
    }

    /// Write one `bool` as one byte.
    #[inline]
    fn write_bool(&mut self, b: bool) -> Result<()> {
        self.write_bytes(&[b as u8])
    }

    /// Read one `bool`.
    #[inline]
    fn read_bool(&mut self) -> Result<bool> {
        let mut byte = [0u8; 1];
        self.read_bytes(&mut byte)?;
        Ok(byte[0] != 0)
    }

    /// Write a run of `bool`s, each full run of 8 packed into one byte and
    /// a trailing partial run sent one byte per bool.
    fn write_bools(&mut self, bits: &[bool]) -> Result<()> {
        let mut chunks = bits.chunks_exact(8);
        for chunk in &mut chunks {
            let mut packed = 0u8;
            for (position, bit) in chunk.iter().enumerate() {
                packed |= (*bit as u8) << position;
            }
            self.write_bytes(&[packed])?;
        }
        for bit in chunks.remainder() {
            self.write_bool(*bit)?;
        }
        Ok(())
    }

    /// Read `n` packed `bool`s.
    fn read_bools(&mut self, n: usize) -> Result<Vec<bool>> {
        let mut bits = Vec::with_capacity(n);
        let mut byte = [0u8; 1];
        for _ in 0..n / 8 {
            self.read_bytes(&mut byte)?;
            for position in 0..8 {
                bits.push((byte[0] >> position) & 1 != 0);
            }
        }
        for _ in 0..n % 8 {
            bits.push(self.read_bool()?);
        }
        Ok(bits)
    }

    /// Write a `u64`, native-endian.
    #[inline]
    fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_ne_bytes())
    }

    /// Read a `u64`, native-endian.
    #[inline]
    fn read_u64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_bytes(&mut bytes)?;
        Ok(u64::from_ne_bytes(bytes))
    }

    /// Write a `usize` as eight native-endian bytes; the length prefix of
    /// every blob on the wire.
    #[inline]
    fn write_usize(&mut self, value: usize) -> Result<()> {
        self.write_u64(value as u64)
    }

    /// Read a `usize` written by `write_usize`.
    #[inline]
    fn read_usize(&mut self) -> Result<usize> {
        Ok(self.read_u64()? as usize)
    }

    /// Write a `Block` as its 16 raw bytes.
    #[inline]
    fn write_block(&mut self, block: &Block) -> Result<()> {
        self.write_bytes(block.as_ref())
    }

    /// Read a `Block`.
    #[inline]
    fn read_block(&mut self) -> Result<Block> {
        let mut block = Block::ZERO;
        self.read_bytes(block.as_mut())?;
        Ok(block)
    }
}

/// A channel over any reader/writer pair. Clones share the pair, which is
/// what lets one session thread the same stream through its PSI and share
/// layers in turn.
pub struct Channel<R, W> {
    reader: Rc<RefCell<R>>,
    writer: Rc<RefCell<W>>,
}

impl<R: Read, W: Write> Channel<R, W> {
    /// Wrap a `reader` and a `writer` into a channel.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Rc::new(RefCell::new(reader)),
            writer: Rc::new(RefCell::new(writer)),
        }
    }
}

impl<R: Read, W: Write> AbstractChannel for Channel<R, W> {
    #[inline]
    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.reader.borrow_mut().read_exact(bytes)
    }

    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.borrow_mut().write_all(bytes)
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        self.writer.borrow_mut().flush()
    }

    #[inline]
    fn clone(&self) -> Self {
        Self {
            reader: self.reader.clone(),
            writer: self.writer.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_bool_packing_roundtrip() {
        for n in [0usize, 1, 7, 8, 9, 64, 100] {
            let bits = (0..n).map(|_| rand::random::<bool>()).collect::<Vec<_>>();
            let bits_ = bits.clone();
            let (a, b) = UnixStream::pair().unwrap();
            let handle = std::thread::spawn(move || {
                let mut channel = Channel::new(a.try_clone().unwrap(), a);
                channel.write_bools(&bits_).unwrap();
                channel.flush().unwrap();
            });
            let mut channel = Channel::new(b.try_clone().unwrap(), b);
            let result = channel.read_bools(n).unwrap();
            handle.join().unwrap();
            assert_eq!(result, bits);
        }
    }

    #[test]
    fn test_vec_prefix_roundtrip() {
        let data = (0..1000).map(|_| rand::random::<u8>()).collect::<Vec<_>>();
        let data_ = data.clone();
        let (a, b) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = Channel::new(a.try_clone().unwrap(), a);
            channel.write_vec(&data_).unwrap();
            channel.write_vec(&[]).unwrap();
            channel.flush().unwrap();
        });
        let mut channel = Channel::new(b.try_clone().unwrap(), b);
        let result = channel.read_vec().unwrap();
        let empty = channel.read_vec().unwrap();
        handle.join().unwrap();
        assert_eq!(result, data);
        assert!(empty.is_empty());
    }

    #[test]
    fn test_values_roundtrip() {
        let (a, b) = UnixStream::pair().unwrap();
        let block = rand::random::<Block>();
        let handle = std::thread::spawn(move || {
            let mut channel = Channel::new(a.try_clone().unwrap(), a);
            channel.write_u64(0xDEAD_BEEF_0BAD_CAFE).unwrap();
            channel.write_usize(42).unwrap();
            channel.write_bool(true).unwrap();
            channel.write_block(&block).unwrap();
            channel.flush().unwrap();
            block
        });
        let mut channel = Channel::new(b.try_clone().unwrap(), b);
        assert_eq!(channel.read_u64().unwrap(), 0xDEAD_BEEF_0BAD_CAFE);
        assert_eq!(channel.read_usize().unwrap(), 42);
        assert!(channel.read_bool().unwrap());
        let got = channel.read_block().unwrap();
        let sent = handle.join().unwrap();
        assert_eq!(got, sent);
    }

    // Clones must observe one shared stream position, not private copies.
    #[test]
    fn test_clones_share_the_stream() {
        let (a, b) = UnixStream::pair().unwrap();
        let handle = std::thread::spawn(move || {
            let mut channel = Channel::new(a.try_clone().unwrap(), a);
            channel.write_u64(1).unwrap();
            channel.write_u64(2).unwrap();
            channel.flush().unwrap();
        });
        let mut channel = Channel::new(b.try_clone().unwrap(), b);
        let mut alias = AbstractChannel::clone(&channel);
        assert_eq!(channel.read_u64().unwrap(), 1);
        assert_eq!(alias.read_u64().unwrap(), 2);
        handle.join().unwrap();
    }
}
