//! Single-sequencer actor
//!
//! One task owns the [`MatchingEngine`] and drains a bounded FIFO of
//! requests, one at a time, in arrival order. Callers talk to it only
//! through an [`EngineHandle`]:
//!
//! - requests go in over `mpsc`, each answered on its own `oneshot`
//! - domain events fan out over `broadcast`
//! - a post-step [`MarketView`] is published over `watch`, so readers never
//!   see a half-applied match
//!
//! Snapshots are cut between steps and written on the blocking pool; the
//! queue keeps draining while the file is written.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use persistence::{
    EngineState, Snapshot, SnapshotCleanupPolicy, SnapshotError, SnapshotIntervalPolicy,
    SnapshotWriter,
};
use thiserror::Error;
use tokio::select;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use types::ids::{CorrelationId, MarketId};

use crate::book::Depth;
use crate::config::{EngineSettings, SnapshotConfig};
use crate::engine::MatchingEngine;
use crate::events::EventEnvelope;
use crate::messages::{Request, Response};

#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("engine sequencer has stopped")]
    Stopped,

    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("snapshot task failed: {0}")]
    Join(#[from] JoinError),
}

/// Depth of every market as of one completed step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketView {
    pub sequence: u64,
    pub halted: bool,
    pub depths: BTreeMap<MarketId, Depth>,
}

impl MarketView {
    pub fn capture(engine: &MatchingEngine) -> Self {
        let depths = engine
            .markets()
            .filter_map(|market| {
                engine
                    .get_depth(market, usize::MAX)
                    .ok()
                    .map(|depth| (market.clone(), depth))
            })
            .collect();
        Self {
            sequence: engine.sequence(),
            halted: engine.is_halted(),
            depths,
        }
    }

    /// Depth of one market truncated to `levels` per side
    pub fn depth(&self, market: &MarketId, levels: usize) -> Option<Depth> {
        self.depths.get(market).map(|depth| Depth {
            market: depth.market.clone(),
            bids: depth.bids.iter().take(levels).cloned().collect(),
            asks: depth.asks.iter().take(levels).cloned().collect(),
        })
    }
}

/// When and where snapshots are written
#[derive(Debug, Clone)]
pub struct SnapshotSchedule {
    pub writer: SnapshotWriter,
    pub interval: SnapshotIntervalPolicy,
    pub cleanup: SnapshotCleanupPolicy,
    /// Timer-driven snapshots, taken only if something changed
    pub timer: Option<Duration>,
}

impl SnapshotSchedule {
    /// Schedule from config, counting operations from `restored_sequence`
    pub fn from_config(cfg: &SnapshotConfig, restored_sequence: u64) -> Self {
        Self {
            writer: SnapshotWriter::new(cfg.dir.clone(), cfg.compress),
            interval: SnapshotIntervalPolicy::with_interval(cfg.interval_ops)
                .starting_at(restored_sequence),
            cleanup: SnapshotCleanupPolicy::new(cfg.keep),
            timer: (cfg.interval_secs > 0).then(|| Duration::from_secs(cfg.interval_secs)),
        }
    }
}

type SnapshotReply = oneshot::Sender<Result<Option<PathBuf>, SequencerError>>;

enum Command {
    Submit {
        request: Request,
        correlation: CorrelationId,
        reply: oneshot::Sender<Response>,
    },
    Snapshot {
        reply: SnapshotReply,
    },
    Shutdown {
        reply: SnapshotReply,
    },
}

/// Cloneable handle to the sequencer task
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<EventEnvelope>,
    view: watch::Receiver<Arc<MarketView>>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Submit { request, correlation, .. } => f
                .debug_struct("Submit")
                .field("request", &request.name())
                .field("correlation", correlation)
                .finish(),
            Command::Snapshot { .. } => f.write_str("Snapshot"),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl EngineHandle {
    /// Enqueue a request and wait for its response
    ///
    /// Waits for queue space when the queue is full.
    pub async fn submit(
        &self,
        request: Request,
        correlation: CorrelationId,
    ) -> Result<Response, SequencerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                request,
                correlation,
                reply,
            })
            .await
            .map_err(|_| SequencerError::Stopped)?;
        response.await.map_err(|_| SequencerError::Stopped)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Latest published view; never reflects a partially applied step
    pub fn view(&self) -> Arc<MarketView> {
        self.view.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<MarketView>> {
        self.view.clone()
    }

    /// Write a snapshot now, after everything queued before this call
    ///
    /// Yields `None` once the engine has halted; its state is not written.
    pub async fn snapshot(&self) -> Result<Option<PathBuf>, SequencerError> {
        self.control(|reply| Command::Snapshot { reply }).await
    }

    /// Stop after everything queued before this call and write a final
    /// snapshot if anything changed since the last one
    pub async fn shutdown(&self) -> Result<Option<PathBuf>, SequencerError> {
        self.control(|reply| Command::Shutdown { reply }).await
    }

    async fn control(
        &self,
        command: impl FnOnce(SnapshotReply) -> Command,
    ) -> Result<Option<PathBuf>, SequencerError> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SequencerError::Stopped)?;
        result.await.map_err(|_| SequencerError::Stopped)?
    }
}

/// Owner of the engine inside the worker task
pub struct Sequencer {
    engine: MatchingEngine,
    events: broadcast::Sender<EventEnvelope>,
    view: watch::Sender<Arc<MarketView>>,
    snapshots: Option<SnapshotSchedule>,
    in_flight: Option<JoinHandle<Result<PathBuf, SnapshotError>>>,
}

enum Wake {
    Command(Option<Command>),
    Timer,
}

impl Sequencer {
    /// Start the worker task on the current runtime
    ///
    /// The task ends after a shutdown request or once every handle is
    /// dropped, and yields the engine back.
    pub fn spawn(
        engine: MatchingEngine,
        settings: &EngineSettings,
        snapshots: Option<SnapshotSchedule>,
    ) -> (EngineHandle, JoinHandle<MatchingEngine>) {
        let (commands, inbox) = mpsc::channel(settings.queue_capacity.max(1));
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (view, view_rx) = watch::channel(Arc::new(MarketView::capture(&engine)));

        let sequencer = Sequencer {
            engine,
            events: events.clone(),
            view,
            snapshots,
            in_flight: None,
        };
        let task = tokio::spawn(sequencer.run(inbox));

        let handle = EngineHandle {
            commands,
            events,
            view: view_rx,
        };
        (handle, task)
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) -> MatchingEngine {
        let mut timer = self.snapshots.as_ref().and_then(|s| s.timer).map(|period| {
            let mut timer = time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        info!(sequence = self.engine.sequence(), "sequencer started");

        loop {
            let wake = select! {
                command = inbox.recv() => Wake::Command(command),
                _ = tick(&mut timer) => Wake::Timer,
            };

            match wake {
                Wake::Timer => {
                    if self.has_progress() {
                        self.spawn_snapshot();
                    }
                }
                Wake::Command(Some(Command::Submit {
                    request,
                    correlation,
                    reply,
                })) => {
                    let response = self.apply(request, correlation);
                    if reply.send(response).is_err() {
                        debug!("caller went away before its response");
                    }
                    if self.due_by_interval() {
                        self.spawn_snapshot();
                    }
                }
                Wake::Command(Some(Command::Snapshot { reply })) => {
                    let _ = reply.send(self.snapshot_now(true).await);
                }
                Wake::Command(Some(Command::Shutdown { reply })) => {
                    let _ = reply.send(self.snapshot_now(false).await);
                    break;
                }
                Wake::Command(None) => {
                    if let Err(err) = self.snapshot_now(false).await {
                        error!(error = %err, "final snapshot failed");
                    }
                    break;
                }
            }
        }

        info!(sequence = self.engine.sequence(), "sequencer stopped");
        self.engine
    }

    /// Run one request to completion and publish its effects
    fn apply(&mut self, request: Request, correlation: CorrelationId) -> Response {
        let mutating = request.is_mutating();
        let name = request.name();
        let result = self.engine.handle(request).map(|applied| {
            for event in applied.events {
                // no subscribers is fine; the stream is best effort
                let _ = self.events.send(event);
            }
            applied.response
        });

        if let Err(err) = &result {
            if self.engine.is_halted() && err.is_fatal() {
                error!(request = name, %correlation, error = %err, "engine halted");
            }
        }
        if mutating {
            self.view.send_replace(Arc::new(MarketView::capture(&self.engine)));
        }
        Response::new(correlation, result)
    }

    fn has_progress(&self) -> bool {
        self.snapshots
            .as_ref()
            .is_some_and(|s| s.interval.has_progress(self.engine.sequence()))
    }

    fn due_by_interval(&self) -> bool {
        self.snapshots
            .as_ref()
            .is_some_and(|s| s.interval.should_snapshot(self.engine.sequence()))
    }

    /// Hand the current state to the blocking pool without waiting
    ///
    /// Skipped while a previous write is still running; the next trigger
    /// retries.
    fn spawn_snapshot(&mut self) {
        if self.refuse_halted_snapshot() {
            return;
        }
        if self.in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("previous snapshot still being written");
            return;
        }
        let Some(schedule) = self.snapshots.as_mut() else {
            return;
        };
        let state = self.engine.state();
        schedule.interval.record_snapshot(state.sequence);
        let writer = schedule.writer.clone();
        let cleanup = schedule.cleanup.clone();
        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            write_snapshot(&writer, &cleanup, state)
        }));
    }

    /// Write a snapshot and wait for it
    ///
    /// Without `force`, nothing is written unless the engine moved since
    /// the last snapshot.
    async fn snapshot_now(&mut self, force: bool) -> Result<Option<PathBuf>, SequencerError> {
        if let Some(task) = self.in_flight.take() {
            if let Err(err) = task.await? {
                warn!(error = %err, "background snapshot failed");
            }
        }
        if self.refuse_halted_snapshot() {
            return Ok(None);
        }
        let Some(schedule) = self.snapshots.as_mut() else {
            return Ok(None);
        };
        if !force && !schedule.interval.has_progress(self.engine.sequence()) {
            return Ok(None);
        }

        let state = self.engine.state();
        schedule.interval.record_snapshot(state.sequence);
        let writer = schedule.writer.clone();
        let cleanup = schedule.cleanup.clone();
        let path =
            tokio::task::spawn_blocking(move || write_snapshot(&writer, &cleanup, state)).await??;
        Ok(Some(path))
    }

    /// A halted engine's state failed an invariant and must not become the
    /// recovery point
    fn refuse_halted_snapshot(&self) -> bool {
        let halted = self.engine.is_halted() && self.snapshots.is_some();
        if halted {
            error!(
                sequence = self.engine.sequence(),
                reason = self.engine.halt_reason().unwrap_or_default(),
                "engine halted, snapshot skipped"
            );
        }
        halted
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn write_snapshot(
    writer: &SnapshotWriter,
    cleanup: &SnapshotCleanupPolicy,
    state: EngineState,
) -> Result<PathBuf, SnapshotError> {
    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let snapshot = Snapshot::new(timestamp, state, writer.compress());
    let path = writer.write(&snapshot).map_err(|err| {
        error!(sequence = snapshot.sequence, error = %err, "snapshot write failed");
        err
    })?;
    info!(
        sequence = snapshot.sequence,
        orders = snapshot.state.resting_order_count(),
        path = %path.display(),
        "snapshot written"
    );

    match cleanup.cleanup(writer.dir()) {
        Ok(removed) if !removed.is_empty() => {
            debug!(removed = removed.len(), "old snapshots removed")
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "snapshot cleanup failed"),
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketConfig;
    use crate::events::EngineEvent;
    use crate::messages::ResponseBody;
    use persistence::SnapshotLoader;
    use types::errors::{EngineError, ErrorCode};
    use types::ids::{AssetId, UserId};
    use types::numeric::{Amount, Price, Quantity};
    use types::order::{OrderKind, Side};

    fn markets() -> Vec<MarketConfig> {
        vec![MarketConfig::new(MarketId::new("BTC/USDT"), Price::from_u64(1000))]
    }

    fn settings() -> EngineSettings {
        EngineSettings {
            queue_capacity: 16,
            event_capacity: 64,
        }
    }

    fn credit(user: UserId, asset: &str, amount: u64) -> Request {
        Request::CreditFunds {
            user_id: user,
            asset: AssetId::new(asset),
            amount: Amount::from_u64(amount),
        }
    }

    fn limit(user: UserId, side: Side, price: u64, qty: u64) -> Request {
        Request::CreateOrder {
            user_id: user,
            market: MarketId::new("BTC/USDT"),
            side,
            kind: OrderKind::Limit,
            price: Some(Price::from_u64(price)),
            quantity: Quantity::from_u64(qty),
        }
    }

    fn schedule(dir: &std::path::Path, interval_ops: u64) -> SnapshotSchedule {
        SnapshotSchedule {
            writer: SnapshotWriter::new(dir, false),
            interval: SnapshotIntervalPolicy::with_interval(interval_ops),
            cleanup: SnapshotCleanupPolicy::new(10),
            timer: None,
        }
    }

    #[tokio::test]
    async fn test_submit_returns_correlated_response() {
        let (handle, task) = Sequencer::spawn(MatchingEngine::new(&markets()), &settings(), None);
        let user = UserId::new();

        let response = handle
            .submit(credit(user, "USDT", 100), CorrelationId::new("req-1"))
            .await
            .unwrap();

        assert_eq!(response.correlation, CorrelationId::new("req-1"));
        assert!(matches!(response.body(), Some(ResponseBody::FundsCredited(_))));

        handle.shutdown().await.unwrap();
        let engine = task.await.unwrap();
        assert_eq!(engine.sequence(), 1);
    }

    #[tokio::test]
    async fn test_events_and_view_follow_match() {
        let (handle, task) = Sequencer::spawn(MatchingEngine::new(&markets()), &settings(), None);
        let mut events = handle.subscribe();
        let seller = UserId::new();
        let buyer = UserId::new();

        handle.submit(credit(seller, "BTC", 5), CorrelationId::new("1")).await.unwrap();
        handle.submit(credit(buyer, "USDT", 500), CorrelationId::new("2")).await.unwrap();
        handle
            .submit(limit(seller, Side::Sell, 100, 5), CorrelationId::new("3"))
            .await
            .unwrap();

        let view = handle.view();
        let depth = view.depth(&MarketId::new("BTC/USDT"), 10).unwrap();
        assert_eq!(depth.asks[0].quantity, Quantity::from_u64(5));

        let response = handle
            .submit(limit(buyer, Side::Buy, 100, 5), CorrelationId::new("4"))
            .await
            .unwrap();
        assert!(response.is_ok());

        let mut trades = 0;
        while let Ok(envelope) = events.try_recv() {
            if matches!(envelope.event, EngineEvent::TradeExecuted { .. }) {
                trades += 1;
            }
        }
        assert_eq!(trades, 1);
        assert!(handle.view().depth(&MarketId::new("BTC/USDT"), 10).unwrap().asks.is_empty());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_callers_are_serialized() {
        let (handle, task) = Sequencer::spawn(MatchingEngine::new(&markets()), &settings(), None);
        let user = UserId::new();

        let mut callers = Vec::new();
        for i in 0..20 {
            let handle = handle.clone();
            callers.push(tokio::spawn(async move {
                handle
                    .submit(credit(user, "USDT", 1), CorrelationId::new(i.to_string()))
                    .await
                    .unwrap()
            }));
        }
        for caller in callers {
            assert!(caller.await.unwrap().is_ok());
        }

        handle.shutdown().await.unwrap();
        let engine = task.await.unwrap();
        assert_eq!(engine.sequence(), 20);
        assert_eq!(
            engine.get_balance(&user, &AssetId::new("USDT")).available,
            Amount::from_u64(20)
        );
    }

    #[tokio::test]
    async fn test_handle_fails_after_shutdown() {
        let (handle, task) = Sequencer::spawn(MatchingEngine::new(&markets()), &settings(), None);
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        let result = handle.submit(credit(UserId::new(), "USDT", 1), CorrelationId::new("x")).await;
        assert!(matches!(result, Err(SequencerError::Stopped)));
    }

    #[tokio::test]
    async fn test_interval_and_final_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = Sequencer::spawn(
            MatchingEngine::new(&markets()),
            &settings(),
            Some(schedule(dir.path(), 2)),
        );
        let user = UserId::new();

        for i in 0..3 {
            handle
                .submit(credit(user, "USDT", 10), CorrelationId::new(i.to_string()))
                .await
                .unwrap();
        }
        let final_path = handle.shutdown().await.unwrap();
        assert!(final_path.is_some());
        let engine = task.await.unwrap();

        let loader = SnapshotLoader::new(dir.path());
        let sequences: Vec<u64> = loader
            .list_snapshots()
            .unwrap()
            .into_iter()
            .map(|(seq, _)| seq)
            .collect();
        assert_eq!(sequences, vec![2, 3]);

        let latest = loader.load_latest().unwrap();
        assert_eq!(latest.state, engine.state());
    }

    #[tokio::test]
    async fn test_shutdown_without_progress_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = Sequencer::spawn(
            MatchingEngine::new(&markets()),
            &settings(),
            Some(schedule(dir.path(), 100)),
        );

        assert!(handle.shutdown().await.unwrap().is_none());
        task.await.unwrap();
        assert!(SnapshotLoader::new(dir.path()).list_snapshots().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, task) = Sequencer::spawn(
            MatchingEngine::new(&markets()),
            &settings(),
            Some(schedule(dir.path(), 0)),
        );
        handle
            .submit(credit(UserId::new(), "BTC", 1), CorrelationId::new("a"))
            .await
            .unwrap();

        let path = handle.snapshot().await.unwrap().unwrap();
        assert!(path.exists());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_halted_engine_is_never_snapshotted() {
        let dir = tempfile::tempdir().unwrap();
        let user = UserId::new();
        let mut engine = MatchingEngine::new(&markets());
        engine
            .credit_funds(user, &AssetId::new("USDT"), Amount::from_u64(10))
            .unwrap();
        engine.halt(&EngineError::InvariantViolation("locked balance went negative".to_string()));

        let (handle, task) = Sequencer::spawn(engine, &settings(), Some(schedule(dir.path(), 1)));
        let response = handle
            .submit(credit(user, "USDT", 1), CorrelationId::new("a"))
            .await
            .unwrap();
        assert_eq!(response.error_code(), Some(ErrorCode::EngineHalted));
        assert!(handle.view().halted);

        assert!(handle.snapshot().await.unwrap().is_none());
        assert!(handle.shutdown().await.unwrap().is_none());
        let engine = task.await.unwrap();

        assert_eq!(engine.sequence(), 1);
        assert!(SnapshotLoader::new(dir.path()).list_snapshots().unwrap().is_empty());
    }
}
