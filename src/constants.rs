//! Application-wide constants for linegate.
//!
//! Centralizes protocol tokens and default tunables so the wire format and
//! the configuration defaults live in one discoverable place.
//!
//! # Categories
//!
//! - **Wire protocol**: command prefixes, reply words, notice tags
//! - **Defaults**: listening port, timer period, loop pacing
//! - **Restart**: host restart policy after setup failure

use std::time::Duration;

// ============================================================================
// Wire protocol
// ============================================================================

/// Default line delimiter (carriage return + line feed).
pub const DEFAULT_DELIMITER: &str = "\r\n";

/// Prefix of a power channel control request (`$PCONTROL,<name>,<op>`).
pub const PCONTROL_PREFIX: &str = "$PCONTROL,";

/// Prefix of an SMS send request (`$SMSSEND,<reqId>,<dest>,<text>,<timeout>`).
pub const SMSSEND_PREFIX: &str = "$SMSSEND,";

/// Reply for a command that was accepted and forwarded.
pub const REPLY_OK: &str = "OK";

/// Reply for a malformed command or an unknown channel.
pub const REPLY_ERROR: &str = "ERROR";

/// Tag of the periodic telemetry broadcast.
pub const TELEMETRY_TAG: &str = "+TPH";

/// Tag of a power channel state notice.
pub const POWER_STATE_TAG: &str = "+PSTATE";

/// Tag of an inbound text message notice.
pub const SMS_RECEIVED_TAG: &str = "+SMSRECV";

/// Tag of an SMS delivery status notice.
pub const SMS_STATE_TAG: &str = "+SMSSTATE";

// ============================================================================
// Defaults
// ============================================================================

/// Default TCP port to listen on.
pub const DEFAULT_PORT: u16 = 10000;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default seconds between telemetry broadcasts.
pub const DEFAULT_TELEMETRY_PERIOD_SECS: f64 = 5.0;

/// Default maximum concurrent clients, used as the listen backlog.
pub const DEFAULT_MAX_CLIENTS: u32 = 5;

/// Multiplexer wait per loop iteration.
///
/// Short enough that the telemetry timer stays accurate to a few
/// milliseconds without spinning the CPU.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// Pause between loop iterations so bus deliveries get scheduled.
pub const DEFAULT_IDLE_YIELD: Duration = Duration::from_millis(5);

/// Bytes pulled from a client socket per read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 512;

/// Per-client socket read/write timeout.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on notices queued between two loop iterations.
pub const MAX_PENDING_NOTICES: usize = 1024;

// ============================================================================
// Restart
// ============================================================================

/// Delay hint handed to the host when the listening socket cannot be set up.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(30);

/// Number of restarts the host attempts before giving up.
pub const DEFAULT_MAX_RESTARTS: u32 = 5;

/// Granularity of interruptible sleeps while waiting for a restart.
pub const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(100);
