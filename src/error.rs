//! Error types for the gateway's setup and run surface.
//!
//! Per-connection failures never show up here: they drop the connection and
//! the loop moves on. Only failures of the listening socket or of the
//! multiplexer itself reach the host.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure that stops the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The listening socket could not be set up.
    ///
    /// This is the gateway's restart request: the host should wait
    /// `restart_after` and try again rather than the gateway retrying itself.
    #[error("listener setup failed while trying to {stage}: {source} (restart in {}s)", .restart_after.as_secs())]
    Setup {
        /// Step that failed (`resolve`, `bind`, `listen`, ...).
        stage: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
        /// Delay hint for the host.
        restart_after: Duration,
    },

    /// The readiness multiplexer itself failed.
    #[error("readiness poll failed: {0}")]
    Poll(#[source] io::Error),
}

impl GatewayError {
    /// Delay before the host should restart the gateway, if a restart is
    /// requested at all.
    pub fn restart_delay(&self) -> Option<Duration> {
        match self {
            Self::Setup { restart_after, .. } => Some(*restart_after),
            Self::Poll(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_requests_restart() {
        let err = GatewayError::Setup {
            stage: "bind",
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
            restart_after: Duration::from_secs(30),
        };
        assert_eq!(err.restart_delay(), Some(Duration::from_secs(30)));
        let message = err.to_string();
        assert!(message.contains("bind"));
        assert!(message.contains("restart in 30s"));
    }

    #[test]
    fn test_poll_failure_is_not_restartable() {
        let err = GatewayError::Poll(io::Error::from_raw_os_error(libc::EBADF));
        assert_eq!(err.restart_delay(), None);
    }
}
