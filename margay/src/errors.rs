/// Errors produced by `margay`.
#[derive(Debug)]
pub enum Error {
    /// The input length is invalid.
    InvalidInputLength,
    /// An I/O error has occurred.
    IoError(std::io::Error),
    /// A curve point failed to deserialize.
    InvalidPoint,
    /// Some other error, given by `String`.
    Other(String),
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::IoError(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidInputLength => "invalid input length".fmt(f),
            Error::IoError(e) => write!(f, "IO error: {}", e),
            Error::InvalidPoint => "invalid curve point".fmt(f),
            Error::Other(s) => write!(f, "other error: {}", s),
        }
    }
}
