//! Configuration loading.
//!
//! Sources are layered, later ones winning:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. JSON file (`--config PATH`, else `$LINEGATE_CONFIG_DIR/config.json`,
//!    else `<platform config dir>/linegate/config.json`)
//! 3. Environment variables (`LINEGATE_BIND`, `LINEGATE_PORT`,
//!    `LINEGATE_TELEMETRY_PERIOD`, `LINEGATE_MAX_CLIENTS`)
//! 4. Command-line flags (applied by the binary)
//!
//! Every field is optional in the file; missing ones keep their defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::registry::FramerSettings;

/// Environment variable naming the configuration directory.
pub const CONFIG_DIR_ENV: &str = "LINEGATE_CONFIG_DIR";

/// Configuration file name inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Gateway configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address the listener binds to.
    pub bind_address: String,
    /// TCP port; `0` picks an ephemeral port.
    pub port: u16,
    /// Seconds between telemetry broadcasts.
    pub telemetry_period: f64,
    /// Maximum concurrent clients, used as the listen backlog.
    pub max_clients: u32,
    /// Multiplexer wait per loop iteration, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Pause between loop iterations, in milliseconds.
    pub idle_yield_ms: u64,
    /// Bytes read from a client socket per readiness event.
    pub read_buffer_size: usize,
    /// Per-client socket read/write timeout, in milliseconds.
    pub io_timeout_ms: u64,
    /// Line delimiter for both directions.
    pub delimiter: String,
    /// Optional cap on a client's undelimited remainder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_line_length: Option<usize>,
    /// Restart delay hint reported when the listener cannot be set up.
    pub restart_delay_secs: u64,
    /// Host restarts attempted after setup failures before giving up.
    pub max_restarts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: constants::DEFAULT_BIND_ADDRESS.to_string(),
            port: constants::DEFAULT_PORT,
            telemetry_period: constants::DEFAULT_TELEMETRY_PERIOD_SECS,
            max_clients: constants::DEFAULT_MAX_CLIENTS,
            poll_timeout_ms: millis(constants::DEFAULT_POLL_TIMEOUT),
            idle_yield_ms: millis(constants::DEFAULT_IDLE_YIELD),
            read_buffer_size: constants::DEFAULT_READ_BUFFER_SIZE,
            io_timeout_ms: millis(constants::DEFAULT_IO_TIMEOUT),
            delimiter: constants::DEFAULT_DELIMITER.to_string(),
            max_line_length: None,
            restart_delay_secs: constants::DEFAULT_RESTART_DELAY.as_secs(),
            max_restarts: constants::DEFAULT_MAX_RESTARTS,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Directory holding `config.json`.
    ///
    /// `LINEGATE_CONFIG_DIR` wins; otherwise the platform config directory
    /// (`~/.config/linegate` on Linux). The directory is not created.
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("linegate"))
    }

    /// Load defaults, then `path` (or the default file), then environment
    /// overrides.
    ///
    /// An explicit `path` must exist. The default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?
                .with_context(|| format!("Config file not found: {}", path.display()))?,
            None => {
                let default_path = Self::config_dir()?.join(CONFIG_FILE_NAME);
                Self::load_from_file(&default_path)?.unwrap_or_default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse the JSON file at `path`. `Ok(None)` when it does not exist.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        log::debug!("[Config] Loaded {}", path.display());
        Ok(Some(config))
    }

    /// Apply `LINEGATE_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides looked up through `lookup`. Unparsable values are
    /// ignored with a warning.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("LINEGATE_BIND") {
            self.bind_address = bind;
        }

        if let Some(port) = lookup("LINEGATE_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("[Config] Ignoring invalid LINEGATE_PORT={port}"),
            }
        }

        if let Some(period) = lookup("LINEGATE_TELEMETRY_PERIOD") {
            match period.trim().parse::<f64>() {
                Ok(period) => self.telemetry_period = period,
                Err(_) => log::warn!("[Config] Ignoring invalid LINEGATE_TELEMETRY_PERIOD={period}"),
            }
        }

        if let Some(max) = lookup("LINEGATE_MAX_CLIENTS") {
            match max.trim().parse::<u32>() {
                Ok(max) => self.max_clients = max,
                Err(_) => log::warn!("[Config] Ignoring invalid LINEGATE_MAX_CLIENTS={max}"),
            }
        }
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.delimiter.is_empty() {
            bail!("delimiter must not be empty");
        }
        if !self.telemetry_period.is_finite() || self.telemetry_period < 0.0 {
            bail!(
                "telemetry_period must be a non-negative number of seconds, got {}",
                self.telemetry_period
            );
        }
        if self.max_clients == 0 {
            bail!("max_clients must be at least 1");
        }
        if self.read_buffer_size == 0 {
            bail!("read_buffer_size must be at least 1");
        }
        if self.max_line_length == Some(0) {
            bail!("max_line_length must be at least 1 when set");
        }
        Ok(())
    }

    /// Telemetry broadcast period.
    pub fn telemetry_period(&self) -> Duration {
        Duration::try_from_secs_f64(self.telemetry_period)
            .unwrap_or_else(|_| Duration::from_secs_f64(constants::DEFAULT_TELEMETRY_PERIOD_SECS))
    }

    /// Multiplexer wait per iteration.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Pause between iterations.
    pub fn idle_yield(&self) -> Duration {
        Duration::from_millis(self.idle_yield_ms)
    }

    /// Client socket timeout; `None` when configured as zero (no timeout).
    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }

    /// Restart delay hint.
    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Framing applied to every client connection.
    pub fn framer_settings(&self) -> FramerSettings {
        FramerSettings {
            delimiter: self.delimiter.as_bytes().to_vec(),
            max_line_length: self.max_line_length,
        }
    }
}
