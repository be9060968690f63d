//! Host side of the gateway's restart request.
//!
//! When the listening socket cannot be set up the gateway does not retry on
//! its own; it fails with [`GatewayError::Setup`] carrying a delay hint. This
//! module honours that hint a bounded number of times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::bus::MessageBus;
use crate::cache::BusEventCache;
use crate::config::Config;
use crate::constants::SHUTDOWN_CHECK_INTERVAL;
use crate::error::GatewayError;
use crate::gateway::Gateway;

/// Bind and run the gateway until `stop` is set, restarting after setup
/// failures up to `config.max_restarts` times.
///
/// Returns `Ok` on a clean stop, including a stop requested while waiting
/// to restart.
pub fn run_supervised(
    config: &Config,
    bus: Arc<dyn MessageBus>,
    cache: BusEventCache,
    stop: &AtomicBool,
) -> Result<()> {
    let mut restarts = 0;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }

        let error = match Gateway::bind(config, Arc::clone(&bus), cache.clone()) {
            Ok(mut gateway) => return gateway.run(stop).context("Gateway loop failed"),
            Err(e) => e,
        };

        let Some(delay) = error.restart_delay() else {
            return Err(error).context("Gateway failed");
        };
        if restarts >= config.max_restarts {
            return Err(error)
                .with_context(|| format!("Giving up after {restarts} restart(s)"));
        }

        restarts += 1;
        log::warn!(
            "[Supervisor] {}; restart {}/{} in {:?}",
            error,
            restarts,
            config.max_restarts,
            delay
        );
        if !sleep_unless_stopped(delay, stop) {
            log::info!("[Supervisor] Stop requested while waiting to restart");
            return Ok(());
        }
    }
}

/// Sleep for `delay` in short slices. Returns `false` if `stop` was set.
fn sleep_unless_stopped(delay: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(SHUTDOWN_CHECK_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use std::net::TcpListener;

    fn occupied_port_config(listener: &TcpListener) -> Config {
        Config {
            bind_address: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
            restart_delay_secs: 0,
            ..Config::default()
        }
    }

    fn bus() -> Arc<dyn MessageBus> {
        let (bus, _rx) = LocalBus::new();
        Arc::new(bus)
    }

    #[test]
    fn test_gives_up_after_max_restarts() {
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            max_restarts: 2,
            ..occupied_port_config(&holder)
        };
        let stop = AtomicBool::new(false);

        let err = run_supervised(&config, bus(), BusEventCache::new(), &stop).unwrap_err();
        assert!(err.to_string().contains("2 restart(s)"));
        assert!(err.downcast_ref::<GatewayError>().is_some());
    }

    #[test]
    fn test_no_restarts_when_disabled() {
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            max_restarts: 0,
            ..occupied_port_config(&holder)
        };
        let stop = AtomicBool::new(false);

        let err = run_supervised(&config, bus(), BusEventCache::new(), &stop).unwrap_err();
        assert!(err.to_string().contains("0 restart(s)"));
    }

    #[test]
    fn test_stop_interrupts_restart_wait() {
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let config = Config {
            restart_delay_secs: 30,
            ..occupied_port_config(&holder)
        };
        let stop = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            setter.store(true, Ordering::Relaxed);
        });

        let start = Instant::now();
        run_supervised(&config, bus(), BusEventCache::new(), &stop).unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_already_stopped_returns_immediately() {
        let stop = AtomicBool::new(true);
        run_supervised(&Config::default(), bus(), BusEventCache::new(), &stop).unwrap();
    }

    #[test]
    fn test_sleep_completes_without_stop() {
        let stop = AtomicBool::new(false);
        assert!(sleep_unless_stopped(Duration::from_millis(10), &stop));
    }
}
