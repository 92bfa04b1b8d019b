use crate::{Channel, TrackChannel};
use std::{
    io::{BufReader, BufWriter},
    os::unix::net::UnixStream,
};

/// A channel over a Unix-domain socket pair, for in-process tests.
pub type UnixChannel = Channel<BufReader<UnixStream>, BufWriter<UnixStream>>;
/// A tracked channel over a Unix-domain socket pair.
pub type TrackUnixChannel = TrackChannel<BufReader<UnixStream>, BufWriter<UnixStream>>;

/// Make a pair of connected `UnixChannel`s.
pub fn unix_channel_pair() -> (UnixChannel, UnixChannel) {
    let (tx, rx) = UnixStream::pair().unwrap();
    let left = Channel::new(
        BufReader::new(tx.try_clone().unwrap()),
        BufWriter::new(tx),
    );
    let right = Channel::new(
        BufReader::new(rx.try_clone().unwrap()),
        BufWriter::new(rx),
    );
    (left, right)
}

/// Make a pair of connected `TrackUnixChannel`s.
pub fn track_unix_channel_pair() -> (TrackUnixChannel, TrackUnixChannel) {
    let (tx, rx) = UnixStream::pair().unwrap();
    let left = TrackChannel::new(
        BufReader::new(tx.try_clone().unwrap()),
        BufWriter::new(tx),
    );
    let right = TrackChannel::new(
        BufReader::new(rx.try_clone().unwrap()),
        BufWriter::new(rx),
    );
    (left, right)
}
