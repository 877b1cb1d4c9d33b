use std::{error::Error, fmt, io};

use comms::unit::RemoteError;

/// Errors reported synchronously by the `NodePool`.
#[derive(Debug)]
pub enum PoolError {
    /// The pool has no nodes, so waiting for one would never end.
    Empty,
    /// More nodes were requested at once than the pool will ever hold.
    TooManyRequested { requested: usize, total: usize },
    /// The pool was shut down.
    Closed,
    /// Failed to connect to a remote node.
    ConnectionFailed { addr: String, source: io::Error },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("the node pool is empty"),
            Self::TooManyRequested { requested, total } => {
                write!(f, "requested {requested} nodes from a pool of {total}")
            }
            Self::Closed => f.write_str("the node pool was shut down"),
            Self::ConnectionFailed { addr, source } => {
                write!(f, "connection failed to {addr}: {source}")
            }
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ConnectionFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors surfaced when reading the outcome of a `Promise`.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseError {
    /// The work unit failed on its node.
    Remote(RemoteError),
    /// The link to the node broke before the job reached a terminal state.
    Transport(String),
    /// The task driving the job went away without reporting an outcome.
    Detached,
}

impl fmt::Display for PromiseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "{e}"),
            Self::Transport(msg) => write!(f, "transport failure: {msg}"),
            Self::Detached => f.write_str("the job was detached from its promise"),
        }
    }
}

impl Error for PromiseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RemoteError> for PromiseError {
    fn from(e: RemoteError) -> Self {
        Self::Remote(e)
    }
}
