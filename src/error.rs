use std::fmt;
use std::io;

/// Errors surfaced by the reactor cluster and its public handles.
#[derive(Debug)]
pub enum ReactorError {
    /// An I/O error from a socket, the multiplexer, or the ticker pipe.
    Io(io::Error),
    /// The reactor's cross-thread task queue was full. The targeted reactor
    /// terminates itself on observing this condition; the submission was not
    /// accepted.
    TaskQueueFull,
    /// The targeted reactor has shut down (orderly or fatally) and no longer
    /// accepts submissions.
    ReactorGone,
    /// The cluster was used in a state that does not allow the operation,
    /// e.g. `start()` after `stop()`. Restart is not supported.
    ClusterState(&'static str),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorError::Io(e) => write!(f, "IO Error: {}", e),
            ReactorError::TaskQueueFull => write!(f, "Reactor task queue overflow"),
            ReactorError::ReactorGone => write!(f, "Reactor is gone"),
            ReactorError::ClusterState(msg) => write!(f, "Cluster state error: {}", msg),
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReactorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ReactorError {
    fn from(err: io::Error) -> Self {
        ReactorError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_wraps_and_displays() {
        let err: ReactorError = io::Error::new(io::ErrorKind::ConnectionReset, "peer reset").into();
        assert!(err.to_string().contains("peer reset"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn overflow_is_distinct_from_gone() {
        assert!(ReactorError::TaskQueueFull.to_string().contains("overflow"));
        assert!(std::error::Error::source(&ReactorError::ReactorGone).is_none());
    }
}
