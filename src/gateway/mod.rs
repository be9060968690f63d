//! The gateway loop.
//!
//! One thread drives everything that touches a socket:
//!
//! ```text
//! loop {
//!     poll (listener + clients, short timeout)
//!     listener ready   -> accept one client
//!     client ready     -> read, frame, parse, publish, reply per line
//!     queued notices   -> broadcast (+PSTATE, +SMSSTATE, +SMSRECV)
//!     timer overflowed -> broadcast +TPH, reset timer
//!     pause briefly so bus deliveries get scheduled
//! }
//! ```
//!
//! Bus events arrive on other threads and only ever touch the
//! [`BusEventCache`]; the loop picks their effects up on its next pass.
//!
//! Failures are graded: a broken client is dropped, an accept error is
//! logged, and only setup of the listening socket or a failing multiplexer
//! end the loop (see [`GatewayError`]).

// Rust guideline compliant 2026-02

pub mod dispatch;

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::bus::MessageBus;
use crate::cache::BusEventCache;
use crate::config::Config;
use crate::error::GatewayError;
use crate::framing::terminate;
use crate::multiplexer::{Poller, Readiness, Token};
use crate::registry::ConnectionRegistry;
use crate::timer::BroadcastTimer;

/// Token of the listening socket.
pub const LISTENER: Token = Token(0);

/// TCP line-protocol gateway.
pub struct Gateway {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    poller: Poller,
    clients: ConnectionRegistry,
    cache: BusEventCache,
    bus: Arc<dyn MessageBus>,
    timer: BroadcastTimer,
    read_buf: Vec<u8>,
    delimiter: Vec<u8>,
    poll_timeout: Duration,
    idle_yield: Duration,
    io_timeout: Option<Duration>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("local_addr", &self.local_addr)
            .field("listening", &self.listener.is_some())
            .field("clients", &self.clients.len())
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Bind the listening socket and prepare the loop.
    ///
    /// The cache should already be subscribed to `bus`; the gateway only
    /// reads it.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Setup`] if the address cannot be resolved, bound or
    /// listened on. The error carries the configured restart delay.
    pub fn bind(
        config: &Config,
        bus: Arc<dyn MessageBus>,
        cache: BusEventCache,
    ) -> Result<Self, GatewayError> {
        let restart_after = config.restart_delay();
        let setup = |stage: &'static str| {
            move |source: io::Error| GatewayError::Setup {
                stage,
                source,
                restart_after,
            }
        };

        let addr = (config.bind_address.as_str(), config.port)
            .to_socket_addrs()
            .map_err(setup("resolve"))?
            .next()
            .ok_or_else(|| {
                setup("resolve")(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} resolved to no address", config.bind_address),
                ))
            })?;

        let listener = TcpListener::bind(addr).map_err(setup("bind"))?;
        set_backlog(&listener, config.max_clients).map_err(setup("listen"))?;
        listener.set_nonblocking(true).map_err(setup("configure"))?;
        let local_addr = listener.local_addr().map_err(setup("configure"))?;

        let mut poller = Poller::new();
        poller.register(&listener, LISTENER).map_err(setup("register"))?;

        log::info!(
            "[Gateway] Listening on {} (backlog {}, telemetry every {:?})",
            local_addr,
            config.max_clients,
            config.telemetry_period()
        );

        Ok(Self {
            listener: Some(listener),
            local_addr,
            poller,
            clients: ConnectionRegistry::new(config.framer_settings()),
            cache,
            bus,
            timer: BroadcastTimer::new(config.telemetry_period()),
            read_buf: vec![0; config.read_buffer_size],
            delimiter: config.delimiter.as_bytes().to_vec(),
            poll_timeout: config.poll_timeout(),
            idle_yield: config.idle_yield(),
            io_timeout: config.io_timeout(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether the listening socket is still open.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Run until `stop` is set, then release every socket.
    ///
    /// The flag is checked once per iteration.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), GatewayError> {
        let result = loop {
            if stop.load(Ordering::Relaxed) {
                break Ok(());
            }
            if let Err(e) = self.run_once() {
                break Err(e);
            }
            if !self.idle_yield.is_zero() {
                thread::sleep(self.idle_yield);
            }
        };
        self.shutdown();
        result
    }

    /// One loop iteration without the trailing pause.
    pub fn run_once(&mut self) -> Result<(), GatewayError> {
        let ready = self
            .poller
            .poll(self.poll_timeout)
            .map_err(GatewayError::Poll)?;

        if ready.contains(LISTENER) {
            self.accept_pending();
        }
        self.service_clients(&ready);
        self.flush_notices();
        self.broadcast_telemetry_if_due();
        Ok(())
    }

    /// Accept exactly one pending connection, if any.
    ///
    /// Failures are logged and otherwise ignored.
    pub fn accept_pending(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = configure_client(&stream, self.io_timeout) {
                    log::warn!("[Gateway] Dropping client {}: {e}", peer);
                    return;
                }
                if let Err(e) = self.clients.accept(stream, peer.to_string(), &mut self.poller) {
                    log::warn!("[Gateway] Could not register client {}: {e}", peer);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("[Gateway] Accept failed: {e}"),
        }
    }

    /// Read from every ready client and answer each completed line.
    pub fn service_clients(&mut self, ready: &Readiness) {
        let cache = &self.cache;
        let bus = self.bus.as_ref();
        let delimiter = self.delimiter.as_slice();
        let buf = &mut self.read_buf;

        self.clients.for_each_ready(ready, &mut self.poller, |conn| {
            conn.service(&mut buf[..], |line| {
                let reply = dispatch::handle_line(line, cache, bus);
                terminate(&reply.to_string(), delimiter)
            });
        });
    }

    /// Broadcast every notice queued by bus deliveries. Returns how many.
    ///
    /// Bus handlers only queue notices, so a notice reaches clients on the
    /// loop iteration after its event arrives. The delay is bounded by one
    /// poll timeout plus the idle yield, not zero.
    pub fn flush_notices(&mut self) -> usize {
        let notices = self.cache.take_notices();
        for notice in &notices {
            let line = terminate(&notice.to_string(), &self.delimiter);
            let delivered = self.clients.broadcast(&line, &mut self.poller);
            log::debug!("[Gateway] {} -> {} client(s)", notice, delivered);
        }
        notices.len()
    }

    /// Broadcast `+TPH` if the timer overflowed, then re-arm it.
    ///
    /// Returns whether a broadcast happened.
    pub fn broadcast_telemetry_if_due(&mut self) -> bool {
        if !self.timer.overflow() {
            return false;
        }
        let notice = self.cache.telemetry().to_notice();
        let line = terminate(&notice.to_string(), &self.delimiter);
        let delivered = self.clients.broadcast(&line, &mut self.poller);
        log::debug!("[Gateway] {} -> {} client(s)", notice, delivered);
        self.timer.reset();
        true
    }

    /// Close the listener and every client. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let Some(listener) = self.listener.take() {
            self.poller.unregister(LISTENER);
            drop(listener);
            log::info!(
                "[Gateway] Shutting down {} ({} client(s))",
                self.local_addr,
                self.clients.len()
            );
        }
        self.clients.clear(&mut self.poller);
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accepted sockets stay blocking with short timeouts; reads only happen
/// after the poller reported readiness.
fn configure_client(stream: &TcpStream, io_timeout: Option<Duration>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(io_timeout)?;
    stream.set_write_timeout(io_timeout)?;
    Ok(())
}

/// Re-issue `listen(2)` so the backlog matches the client limit.
fn set_backlog(listener: &TcpListener, backlog: u32) -> io::Result<()> {
    let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
    // SAFETY: the descriptor is owned by `listener`, which outlives the call,
    // and is already a bound, listening TCP socket.
    let rc = unsafe { libc::listen(listener.as_raw_fd(), backlog) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusEvent, BusRequest, LocalBus};
    use tokio::sync::mpsc::UnboundedReceiver;
    use std::io::{BufRead, BufReader, Write};

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            telemetry_period: 3600.0,
            poll_timeout_ms: 20,
            idle_yield_ms: 0,
            ..Config::default()
        }
    }

    fn gateway(config: &Config) -> (Gateway, Arc<LocalBus>, UnboundedReceiver<BusRequest>) {
        let (bus, rx) = LocalBus::new();
        let bus = Arc::new(bus);
        let cache = BusEventCache::new();
        cache.subscribe(bus.as_ref());
        let gw = Gateway::bind(config, Arc::clone(&bus) as Arc<dyn MessageBus>, cache).unwrap();
        (gw, bus, rx)
    }

    fn connect(gw: &mut Gateway) -> BufReader<TcpStream> {
        let stream = TcpStream::connect(gw.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let before = gw.client_count();
        for _ in 0..100 {
            gw.run_once().unwrap();
            if gw.client_count() > before {
                break;
            }
        }
        assert_eq!(gw.client_count(), before + 1);
        BufReader::new(stream)
    }

    fn pump_until_line(gw: &mut Gateway, client: &mut BufReader<TcpStream>) -> String {
        client.get_ref().set_nonblocking(true).unwrap();
        let mut line = String::new();
        for _ in 0..100 {
            gw.run_once().unwrap();
            match client.read_line(&mut line) {
                Ok(_) if line.ends_with('\n') => break,
                _ => continue,
            }
        }
        client.get_ref().set_nonblocking(false).unwrap();
        line
    }

    #[test]
    fn test_bind_reports_ephemeral_port() {
        let (gw, _bus, _rx) = gateway(&test_config());
        assert_ne!(gw.local_addr().port(), 0);
        assert!(gw.is_listening());
        assert_eq!(gw.client_count(), 0);
    }

    #[test]
    fn test_bind_conflict_is_setup_error() {
        let (gw, _bus, _rx) = gateway(&test_config());
        let config = Config {
            port: gw.local_addr().port(),
            restart_delay_secs: 7,
            ..test_config()
        };
        let (bus, _rx) = LocalBus::new();
        let err = Gateway::bind(&config, Arc::new(bus), BusEventCache::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Setup { stage: "bind", .. }));
        assert_eq!(err.restart_delay(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_unresolvable_address_is_setup_error() {
        let config = Config {
            bind_address: "not an address".to_string(),
            ..test_config()
        };
        let (bus, _rx) = LocalBus::new();
        let err = Gateway::bind(&config, Arc::new(bus), BusEventCache::new()).unwrap_err();
        assert!(matches!(err, GatewayError::Setup { stage: "resolve", .. }));
    }

    #[test]
    fn test_reply_per_line() {
        let (mut gw, bus, mut rx) = gateway(&test_config());
        bus.deliver(&BusEvent::PowerChannelState {
            name: "fan".to_string(),
            state: false,
        });
        // The +PSTATE notice goes out before anyone is connected
        assert_eq!(gw.flush_notices(), 1);
        let mut client = connect(&mut gw);

        client
            .get_mut()
            .write_all(b"$PCONTROL,fan,1\r\nbogus\r\n")
            .unwrap();
        assert_eq!(pump_until_line(&mut gw, &mut client), "OK\r\n");
        assert_eq!(pump_until_line(&mut gw, &mut client), "ERROR\r\n");
        assert_eq!(
            rx.try_recv().unwrap(),
            BusRequest::PowerChannelControl {
                name: "fan".to_string(),
                op: 1,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_notices_are_broadcast_on_next_iteration() {
        let (mut gw, bus, _rx) = gateway(&test_config());
        let mut client = connect(&mut gw);

        bus.deliver(&BusEvent::TextMessage {
            origin: "+351911111111".to_string(),
            text: "ping".to_string(),
        });
        assert_eq!(
            pump_until_line(&mut gw, &mut client),
            "+SMSRECV,+351911111111,ping\r\n"
        );
    }

    #[test]
    fn test_notice_waits_in_cache_until_flushed() {
        let (mut gw, bus, _rx) = gateway(&test_config());
        let mut client = connect(&mut gw);

        bus.deliver(&BusEvent::TextMessage {
            origin: "+351".to_string(),
            text: "queued".to_string(),
        });
        client.get_ref().set_nonblocking(true).unwrap();
        let mut line = String::new();
        let early = client.read_line(&mut line);
        assert_eq!(early.unwrap_err().kind(), io::ErrorKind::WouldBlock);

        assert_eq!(gw.flush_notices(), 1);
        assert_eq!(gw.flush_notices(), 0);
        client.get_ref().set_nonblocking(false).unwrap();
        client.read_line(&mut line).unwrap();
        assert_eq!(line, "+SMSRECV,+351,queued\r\n");
    }

    #[test]
    fn test_telemetry_broadcast_resets_timer() {
        let config = Config {
            telemetry_period: 0.05,
            ..test_config()
        };
        let (mut gw, bus, _rx) = gateway(&config);
        bus.deliver(&BusEvent::Temperature { value: 21.5 });
        bus.deliver(&BusEvent::Pressure { value: 101.3 });
        bus.deliver(&BusEvent::RelativeHumidity { value: 40.0 });
        let mut client = connect(&mut gw);

        assert_eq!(
            pump_until_line(&mut gw, &mut client),
            "+TPH,21.50,101.30,40.00\r\n"
        );
        assert!(!gw.broadcast_telemetry_if_due());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (mut gw, _bus, _rx) = gateway(&test_config());
        let _client = connect(&mut gw);

        gw.shutdown();
        assert!(!gw.is_listening());
        assert_eq!(gw.client_count(), 0);
        gw.shutdown();
        assert!(!gw.is_listening());
    }

    #[test]
    fn test_run_returns_when_stopped() {
        let (mut gw, _bus, _rx) = gateway(&test_config());
        let stop = AtomicBool::new(true);
        gw.run(&stop).unwrap();
        assert!(!gw.is_listening());
    }
}
