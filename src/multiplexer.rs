//! Single-threaded readiness multiplexer.
//!
//! Watches the listening socket and every client socket with one
//! `libc::poll` call and reports which registrations are readable.
//!
//! Registrations are identified by a caller-chosen [`Token`]. Hang-ups and
//! socket errors (`POLLHUP`, `POLLERR`, `POLLNVAL`) are reported as ready
//! too, so the subsequent read observes the failure and the caller can drop
//! the socket.
//!
// NOTE: `poll(2)` is O(n) per call. With the handful of clients this
// gateway serves that is cheaper than maintaining an epoll/kqueue set.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

/// Identifies one registration with the [`Poller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub usize);

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness events that count as "ready for reading".
const READY_MASK: libc::c_short = libc::POLLIN | libc::POLLHUP | libc::POLLERR | libc::POLLNVAL;

/// Set of tokens reported ready by one [`Poller::poll`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    tokens: Vec<Token>,
}

impl Readiness {
    /// Whether `token` was reported ready.
    pub fn contains(&self, token: Token) -> bool {
        self.tokens.contains(&token)
    }

    /// Whether nothing was ready (timeout).
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Number of ready registrations.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Ready tokens in registration order.
    pub fn iter(&self) -> impl Iterator<Item = Token> + '_ {
        self.tokens.iter().copied()
    }
}

impl FromIterator<Token> for Readiness {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

/// `poll(2)`-based readiness multiplexer.
///
/// Does not own the sockets it watches; callers must unregister a socket
/// before closing it.
#[derive(Debug, Default)]
pub struct Poller {
    entries: Vec<(Token, RawFd)>,
}

impl Poller {
    /// Create an empty poller.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `source` for readability under `token`.
    ///
    /// # Errors
    ///
    /// Fails if `token` is already registered or the descriptor is invalid.
    /// Existing registrations are unaffected.
    pub fn register(&mut self, source: &impl AsRawFd, token: Token) -> io::Result<()> {
        let fd = source.as_raw_fd();
        if fd < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid descriptor {fd} for {token}"),
            ));
        }
        if self.is_registered(token) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{token} already registered"),
            ));
        }
        self.entries.push((token, fd));
        Ok(())
    }

    /// Stop watching `token`. Returns `false` if it was not registered.
    pub fn unregister(&mut self, token: Token) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(t, _)| *t != token);
        self.entries.len() != before
    }

    /// Whether `token` is currently registered.
    pub fn is_registered(&self, token: Token) -> bool {
        self.entries.iter().any(|(t, _)| *t == token)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no sockets are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Wait up to `timeout` for any registration to become ready.
    ///
    /// Returns as soon as one is ready. A timeout, or a signal interrupting
    /// the wait, yields an empty [`Readiness`].
    pub fn poll(&mut self, timeout: Duration) -> io::Result<Readiness> {
        let mut pollfds: Vec<libc::pollfd> = self
            .entries
            .iter()
            .map(|(_, fd)| libc::pollfd {
                fd: *fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        // SAFETY: `pollfds` is a live, exclusively borrowed buffer of exactly
        // `pollfds.len()` initialized `pollfd` structs for the whole call.
        let rc = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Readiness::default());
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(Readiness::default());
        }

        Ok(self
            .entries
            .iter()
            .zip(&pollfds)
            .filter(|(_, pfd)| pfd.revents & READY_MASK != 0)
            .map(|((token, _), _)| *token)
            .collect())
    }
}

/// Convert a timeout to whole milliseconds, rounding up so a short non-zero
/// timeout never degenerates into a busy poll.
fn timeout_millis(timeout: Duration) -> libc::c_int {
    let mut millis = timeout.as_millis();
    if timeout.subsec_nanos() % 1_000_000 != 0 {
        millis += 1;
    }
    libc::c_int::try_from(millis).unwrap_or(libc::c_int::MAX)
}
