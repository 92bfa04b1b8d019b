/// Errors produced by the share layer and the session coordinator.
#[derive(Debug)]
pub enum Error {
    /// An input/output error occurred.
    IoError(std::io::Error),
    /// The oblivious-transfer layer failed.
    OtError(margay::Error),
    /// The PSI layer failed.
    PsiError(paddlepop::Error),
    /// A protocol-level shape or state error.
    ProtocolError(String),
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    #[inline]
    fn from(e: std::io::Error) -> Error {
        Error::IoError(e)
    }
}

impl From<margay::Error> for Error {
    #[inline]
    fn from(e: margay::Error) -> Error {
        Error::OtError(e)
    }
}

impl From<paddlepop::Error> for Error {
    #[inline]
    fn from(e: paddlepop::Error) -> Error {
        Error::PsiError(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "IO error: {}", e),
            Error::OtError(e) => write!(f, "oblivious transfer error: {}", e),
            Error::PsiError(e) => write!(f, "PSI error: {}", e),
            Error::ProtocolError(s) => write!(f, "protocol error: {}", s),
        }
    }
}
