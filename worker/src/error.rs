use std::{error::Error, fmt, io};

use comms::packet::PacketError;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
///
/// Failures of the work itself never show up here, they travel back to the
/// dispatcher as error units. These are the failures of the worker's own link.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    /// The error unit describing a failure could not be encoded.
    Encode(PacketError),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Encode(e) => write!(f, "failed to encode an error unit: {e}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Encode(e) => Some(e),
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<PacketError> for WorkerErr {
    fn from(value: PacketError) -> Self {
        Self::Encode(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
