/// Errors produced by the PSI protocol and its cryptographic layers.
#[derive(Debug)]
pub enum Error {
    /// A parameter is out of range, unknown, or disagrees with the peer.
    Parameter(String),
    /// Malformed serialized data: EC point, Paillier key, or wire blob.
    Deserialization(String),
    /// An arithmetic precondition was violated.
    Arithmetic(String),
    /// An input/output error occurred.
    IoError(std::io::Error),
    /// A cryptographic primitive failed.
    Crypto(String),
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(e: std::io::Error) -> Error {
        Error::IoError(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Parameter(s) => write!(f, "parameter error: {}", s),
            Error::Deserialization(s) => write!(f, "deserialization error: {}", s),
            Error::Arithmetic(s) => write!(f, "arithmetic error: {}", s),
            Error::IoError(e) => write!(f, "IO error: {}", e),
            Error::Crypto(s) => write!(f, "crypto error: {}", s),
        }
    }
}
