use crate::{AbstractChannel, Channel};
use std::io::{Read, Result, Write};

/// A channel wrapper that counts traffic, byte for byte, in each
/// direction. Useful for accounting how much a protocol phase costs on
/// the wire.
pub struct TrackChannel<R, W> {
    channel: Channel<R, W>,
    bytes_read: usize,
    bytes_written: usize,
}

impl<R: Read, W: Write> TrackChannel<R, W> {
    /// Wrap a `reader` and a `writer` into a tracked channel.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            channel: Channel::new(reader, writer),
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Zero both counters.
    pub fn clear(&mut self) {
        self.bytes_read = 0;
        self.bytes_written = 0;
    }

    /// Total bytes written since construction or the last `clear`.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Total bytes read since construction or the last `clear`.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Traffic in both directions combined.
    pub fn total_bytes(&self) -> usize {
        self.bytes_written + self.bytes_read
    }
}

impl<R: Read, W: Write> AbstractChannel for TrackChannel<R, W> {
    #[inline]
    fn read_bytes(&mut self, bytes: &mut [u8]) -> Result<()> {
        self.bytes_read += bytes.len();
        self.channel.read_bytes(bytes)
    }

    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes_written += bytes.len();
        self.channel.write_bytes(bytes)
    }

    #[inline]
    fn flush(&mut self) -> Result<()> {
        self.channel.flush()
    }

    #[inline]
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
        }
    }
}
