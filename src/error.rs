use std::fmt::Display;

/// SBTree errors.
///
/// The data path (`insert`/`lookup`/`scan`) surfaces success or absence,
/// never runtime faults; errors can only arise while building an engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// A rejected configuration, e.g. a search-layer fanout below 2.
    InvalidConfig(String),
    /// An IO error, e.g. failing to spawn the index worker thread.
    Io(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidConfig for the given format string.
#[macro_export]
macro_rules! errconfig {
    ($($args:tt)*) => { $crate::error::Error::InvalidConfig(format!($($args)*)).into() };
}

/// An SBTree Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
