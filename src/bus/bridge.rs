//! Newline-delimited JSON bridge between a byte stream and [`LocalBus`].
//!
//! The binary wires stdin to [`pump_events`] and stdout to
//! [`drain_requests`], so the gateway can sit behind any process that speaks
//! one JSON object per line:
//!
//! ```text
//! stdin  <- {"type":"temperature","value":21.5}
//! stdout -> {"type":"power_channel_control","name":"fan","op":1}
//! ```

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{BusEvent, BusRequest, LocalBus};

/// Deliver every JSON event read from `reader` until end of stream.
///
/// Lines that do not decode are logged and skipped. Returns the number of
/// events delivered.
pub async fn pump_events<R>(reader: R, bus: &LocalBus) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut delivered = 0;

    while let Some(line) = lines.next_line().await.context("reading bus events")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<BusEvent>(line) {
            Ok(event) => {
                log::trace!("[Bus] Event: {:?}", event);
                bus.deliver(&event);
                delivered += 1;
            }
            Err(e) => log::warn!("[Bus] Skipping malformed event: {e}"),
        }
    }

    log::info!("[Bus] Event stream closed after {} events", delivered);
    Ok(delivered)
}

/// Write each published request to `writer` as one JSON line.
///
/// Returns once every sender is dropped and the queue is drained.
pub async fn drain_requests<W>(
    mut requests: mpsc::UnboundedReceiver<BusRequest>,
    mut writer: W,
) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;
    while let Some(request) = requests.recv().await {
        let mut line = serde_json::to_vec(&request).context("encoding bus request")?;
        line.push(b'\n');
        writer
            .write_all(&line)
            .await
            .context("writing bus request")?;
        writer.flush().await.context("flushing bus request")?;
        written += 1;
    }
    Ok(written)
}
