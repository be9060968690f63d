//! Connection registry with per-connection line framing.
//!
//! The registry owns every live client [`Connection`]. Each connection owns
//! its socket and its [`LineFramer`] together, so socket and partial-line
//! buffer can never drift apart.
//!
//! Only the gateway loop thread touches the registry; no locking is needed.
//! Connections are kept in insertion order so broadcasts reach clients in
//! the order they connected.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::AsRawFd;

use crate::framing::LineFramer;
use crate::multiplexer::{Poller, Readiness, Token};

/// First token handed to a client; [`Token(0)`](Token) is the listener.
pub const FIRST_CLIENT_TOKEN: usize = 1;

/// Framing settings applied to every new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramerSettings {
    /// Line delimiter.
    pub delimiter: Vec<u8>,
    /// Optional cap on the undelimited remainder.
    pub max_line_length: Option<usize>,
}

impl FramerSettings {
    fn build(&self) -> LineFramer {
        LineFramer::new(self.delimiter.clone()).with_max_line_length(self.max_line_length)
    }
}

impl Default for FramerSettings {
    fn default() -> Self {
        Self {
            delimiter: crate::constants::DEFAULT_DELIMITER.as_bytes().to_vec(),
            max_line_length: None,
        }
    }
}

/// A live client session.
#[derive(Debug)]
pub struct Connection<S = TcpStream> {
    token: Token,
    peer: String,
    stream: S,
    framer: LineFramer,
    alive: bool,
}

impl<S: Read + Write> Connection<S> {
    /// Registration token, unique for the registry's lifetime.
    pub fn token(&self) -> Token {
        self.token
    }

    /// Peer description for logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Whether the connection is still usable.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Mark the connection dead; the registry drops it on its next sweep.
    ///
    /// Callers of [`ConnectionRegistry::for_each_ready`] use this to hang up
    /// on a client explicitly.
    pub fn close(&mut self) {
        self.alive = false;
    }

    /// Write one encoded line. A failure marks the connection dead.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let result = self.stream.write_all(bytes).and_then(|()| self.stream.flush());
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Read once into `buf` and answer every line the read completes.
    ///
    /// `respond` maps each line to the bytes written back, one reply per
    /// line. End of stream, a read error, or a failed reply write closes the
    /// connection; a spurious wakeup (`WouldBlock`) does nothing.
    pub fn service<F>(&mut self, buf: &mut [u8], mut respond: F)
    where
        F: FnMut(&[u8]) -> Vec<u8>,
    {
        let n = match self.stream.read(buf) {
            Ok(0) => {
                log::info!("[Registry] Client {} ({}) disconnected", self.token, self.peer());
                self.close();
                return;
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return;
            }
            Err(e) => {
                log::warn!("[Registry] Read error for {} ({}): {e}", self.token, self.peer());
                self.close();
                return;
            }
        };

        for line in self.framer.feed(&buf[..n]) {
            let reply = respond(line.as_slice());
            let written = self
                .stream
                .write_all(&reply)
                .and_then(|()| self.stream.flush());
            if let Err(e) = written {
                log::warn!("[Registry] Write error for {} ({}): {e}", self.token, self.peer());
                self.close();
                break;
            }
        }
    }

    /// Buffered bytes not yet forming a complete line.
    pub fn pending_len(&self) -> usize {
        self.framer.pending_len()
    }
}

/// Registry of all connected clients.
#[derive(Debug)]
pub struct ConnectionRegistry<S = TcpStream> {
    connections: Vec<Connection<S>>,
    next_token: usize,
    framing: FramerSettings,
}

impl<S: Read + Write + AsRawFd> ConnectionRegistry<S> {
    /// Create an empty registry whose connections frame with `framing`.
    pub fn new(framing: FramerSettings) -> Self {
        Self {
            connections: Vec::new(),
            next_token: FIRST_CLIENT_TOKEN,
            framing,
        }
    }

    /// Wrap an accepted socket in a [`Connection`] and start watching it.
    ///
    /// # Errors
    ///
    /// Returns the registration error; the socket is dropped (closed) and
    /// the registry is unchanged.
    pub fn accept(
        &mut self,
        stream: S,
        peer: impl Into<String>,
        poller: &mut Poller,
    ) -> io::Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        poller.register(&stream, token)?;

        let peer = peer.into();
        log::info!("[Registry] Client {} connected from {}", token, peer);
        self.connections.push(Connection {
            token,
            peer,
            stream,
            framer: self.framing.build(),
            alive: true,
        });
        Ok(token)
    }

    /// Invoke `f` for every connection reported ready, in insertion order,
    /// then drop the connections `f` closed.
    pub fn for_each_ready<F>(&mut self, ready: &Readiness, poller: &mut Poller, mut f: F)
    where
        F: FnMut(&mut Connection<S>),
    {
        for conn in &mut self.connections {
            if conn.is_alive() && ready.contains(conn.token()) {
                f(conn);
            }
        }
        self.sweep(poller);
    }

    /// Drop the connection with `token`. Removing an unknown or already
    /// removed token is a no-op returning `false`.
    pub fn remove(&mut self, token: Token, poller: &mut Poller) -> bool {
        let Some(index) = self.connections.iter().position(|c| c.token == token) else {
            return false;
        };
        poller.unregister(token);
        let conn = self.connections.remove(index);
        log::debug!("[Registry] Released {} ({})", conn.token, conn.peer);
        true
    }

    /// Write `bytes` to every live connection.
    ///
    /// A connection whose write fails is removed; delivery continues with
    /// the rest. Returns how many connections received the bytes.
    pub fn broadcast(&mut self, bytes: &[u8], poller: &mut Poller) -> usize {
        let mut delivered = 0;
        for conn in &mut self.connections {
            if !conn.is_alive() {
                continue;
            }
            match conn.send(bytes) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    log::warn!(
                        "[Registry] Broadcast to {} ({}) failed: {e}",
                        conn.token(),
                        conn.peer()
                    );
                }
            }
        }
        self.sweep(poller);
        delivered
    }

    /// Release every connection.
    pub fn clear(&mut self, poller: &mut Poller) {
        for conn in self.connections.drain(..) {
            poller.unregister(conn.token);
        }
    }

    /// Whether a connection with `token` is registered.
    pub fn contains(&self, token: Token) -> bool {
        self.connections.iter().any(|c| c.token == token)
    }

    /// Tokens of all connections in insertion order.
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.connections.iter().map(|c| c.token)
    }

    /// Number of connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Remove every connection marked dead.
    fn sweep(&mut self, poller: &mut Poller) {
        self.connections.retain(|conn| {
            if conn.is_alive() {
                return true;
            }
            poller.unregister(conn.token());
            log::debug!("[Registry] Dropped {} ({})", conn.token(), conn.peer());
            false
        });
    }
}
