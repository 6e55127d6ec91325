//! Process wiring: startup recovery and the newline-delimited JSON loop
//! the binary runs over stdin/stdout.

use persistence::{RecoveryEngine, RecoveryError};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use types::errors::EngineError;
use types::ids::CorrelationId;

use crate::config::AppConfig;
use crate::engine::MatchingEngine;
use crate::events::EventEnvelope;
use crate::messages::{Envelope, Response};
use crate::sequencer::{EngineHandle, SequencerError};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("snapshot state rejected: {0}")]
    Restore(#[from] EngineError),
}

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode response: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),
}

/// Engine from the newest usable snapshot, or empty with the configured
/// markets when there is none
///
/// A snapshot that loads but fails the engine's consistency checks stops
/// startup instead of being skipped.
pub fn recover(config: &AppConfig) -> Result<MatchingEngine, StartupError> {
    let mut recovery = RecoveryEngine::new(&config.snapshot.dir);
    let recovered = recovery.recover()?;

    let engine = match recovered.snapshot {
        Some(snapshot) => MatchingEngine::restore(&config.markets, snapshot.state)?,
        None => MatchingEngine::new(&config.markets),
    };
    info!(
        sequence = engine.sequence(),
        orders = engine.resting_order_count(),
        rejected = recovered.metrics.snapshots_rejected,
        load_ms = recovered.metrics.snapshot_load_time_ms,
        "engine ready"
    );
    Ok(engine)
}

/// Feed request lines to the engine and write one response line each
///
/// Returns the number of lines answered once `input` is exhausted.
/// Malformed lines are answered with `INVALID_ORDER`, echoing their
/// correlation token when one can be read.
pub async fn serve<R, W>(handle: &EngineHandle, input: R, mut output: W) -> Result<u64, ServeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut served = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => handle.submit(envelope.request, envelope.correlation).await?,
            Err(err) => {
                warn!(error = %err, "malformed request line");
                Response::new(
                    salvage_correlation(line),
                    Err(EngineError::InvalidOrder(format!("malformed request: {}", err))),
                )
            }
        };

        let mut bytes = serde_json::to_vec(&response)?;
        bytes.push(b'\n');
        output.write_all(&bytes).await?;
        output.flush().await?;
        served += 1;
    }

    Ok(served)
}

fn salvage_correlation(line: &str) -> CorrelationId {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("correlation")?.as_str().map(CorrelationId::new))
        .unwrap_or_default()
}

/// Log every engine event until the stream closes
pub async fn log_events(mut events: broadcast::Receiver<EventEnvelope>) {
    loop {
        match events.recv().await {
            Ok(envelope) => debug!(
                sequence = envelope.sequence,
                index = envelope.index,
                market = %envelope.event.market(),
                event = ?envelope.event,
                "engine event"
            ),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
