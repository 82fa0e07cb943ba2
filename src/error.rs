use std::fmt::Display;

/// CinderDB errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The key does not exist (or has expired, or was deleted).
    KeyNotFound,
    /// No log file is open for the requested data type and file id.
    LogFileNotFound,
    /// A variadic command was called with a malformed argument list,
    /// typically an odd number of key/value or field/value arguments.
    InvalidNumberOfArgs,
    /// An increment or decrement would overflow a signed 64-bit integer.
    IntegerOverflow,
    /// The stored value is not a decimal integer.
    InvalidValueType,
    /// A list index falls outside the current bounds of the list.
    IndexOutOfRange,
    /// Log file compaction is already running.
    LogFileGcRunning,
    /// A record failed its checksum, typically a torn write or corruption.
    InvalidCrc,
    /// The I/O layer reported fewer bytes written than requested.
    WriteSizeMismatch,
    /// Replay sentinel: an all-zero record header marks the end of the
    /// written portion of a segment. Never surfaced to callers.
    EndOfEntry,
    /// A segment file name does not match any known data type.
    UnsupportedLogFileType,
    /// The discard table has no free slot for another segment.
    DiscardNoSpace,
    /// A backing file was opened with a non-positive size.
    InvalidFileSize,
    /// A scan pattern failed to compile.
    InvalidPattern(String),
    /// A read past the written extent of a file.
    Eof,
    /// An I/O error.
    Io(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::KeyNotFound => write!(f, "key not found"),
            Error::LogFileNotFound => write!(f, "log file not found"),
            Error::InvalidNumberOfArgs => write!(f, "invalid number of arguments"),
            Error::IntegerOverflow => write!(f, "increment or decrement overflow"),
            Error::InvalidValueType => write!(f, "value is not an integer"),
            Error::IndexOutOfRange => write!(f, "index is out of range"),
            Error::LogFileGcRunning => write!(f, "log file gc is running, retry later"),
            Error::InvalidCrc => write!(f, "logfile: invalid crc"),
            Error::WriteSizeMismatch => write!(f, "logfile: write size is not equal to entry size"),
            Error::EndOfEntry => write!(f, "logfile: end of entry"),
            Error::UnsupportedLogFileType => write!(f, "logfile: unsupported log file type"),
            Error::DiscardNoSpace => {
                write!(f, "not enough space can be allocated in the discard file")
            }
            Error::InvalidFileSize => write!(f, "invalid file size"),
            Error::InvalidPattern(msg) => write!(f, "invalid pattern: {msg}"),
            Error::Eof => write!(f, "end of file"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// A CinderDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::Eof
        } else {
            Error::Io(err.to_string())
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<regex::Error> for Error {
    fn from(err: regex::Error) -> Self {
        Error::InvalidPattern(err.to_string())
    }
}
