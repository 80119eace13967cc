//! Live polling coordinator
//!
//! Owns at most one interval loop, scoped to one intersection. Each tick
//! issues independent vehicle and metrics fetches whose results come back as
//! `PollUpdate`s over an mpsc channel. Every fetch is stamped with a sequence
//! number at issue time so the consumer can discard out-of-order responses.
//!
//! Cancelling does not abort in-flight requests. Their results still arrive,
//! but `admits` rejects tick results from a cancelled generation and
//! on-demand results issued before the coordinator last went idle.

use crate::domain::types::{IntersectionId, SimulationMetrics, Vehicle};
use crate::infra::metrics::{FetchKind, Metrics};
use crate::io::gateway::{GatewayError, SimulationGateway};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Buffered poll results before fetch tasks start waiting on the consumer
const UPDATE_CHANNEL_SIZE: usize = 256;

/// Shortest accepted poll period; tokio intervals reject zero
pub const MIN_POLL_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling(IntersectionId),
}

/// Where a fetch came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Issued by the interval loop of this generation
    Tick { generation: u64 },
    /// Issued on demand (after start, inject, step), stamped with the
    /// coordinator epoch; every transition to Idle starts a new epoch
    OutOfBand { epoch: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTicket {
    pub intersection: IntersectionId,
    pub origin: Origin,
    /// Issue order across all fetches of this coordinator
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub enum PollPayload {
    Vehicles(Result<Vec<Vehicle>, GatewayError>),
    Metrics(Result<SimulationMetrics, GatewayError>),
}

impl PollPayload {
    pub fn kind(&self) -> FetchKind {
        match self {
            PollPayload::Vehicles(_) => FetchKind::Vehicles,
            PollPayload::Metrics(_) => FetchKind::Metrics,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollUpdate {
    pub ticket: PollTicket,
    pub payload: PollPayload,
}

/// Which resources an out-of-band refresh should fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Vehicles,
    Metrics,
    Both,
}

impl Refresh {
    fn vehicles(self) -> bool {
        matches!(self, Refresh::Vehicles | Refresh::Both)
    }

    fn metrics(self) -> bool {
        matches!(self, Refresh::Metrics | Refresh::Both)
    }
}

/// Log a failed poll fetch (cold path)
#[cold]
fn log_fetch_failed(kind: FetchKind, intersection: IntersectionId, seq: u64, e: &GatewayError) {
    warn!(kind = ?kind, intersection_id = %intersection, seq = %seq, error = %e, "poll_fetch_failed");
}

/// Issues fetches and forwards their results; cheap to clone into loop tasks
#[derive(Clone)]
struct Fetcher {
    gateway: Arc<dyn SimulationGateway>,
    metrics: Arc<Metrics>,
    update_tx: mpsc::Sender<PollUpdate>,
    seq: Arc<AtomicU64>,
}

impl Fetcher {
    fn ticket(&self, intersection: IntersectionId, origin: Origin) -> PollTicket {
        // Relaxed is enough: uniqueness and monotonicity come from fetch_add itself
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        PollTicket { intersection, origin, seq }
    }

    fn spawn(&self, intersection: IntersectionId, origin: Origin, which: Refresh) {
        if which.vehicles() {
            let ticket = self.ticket(intersection, origin);
            let this = self.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let result = this.gateway.list_vehicles(Some(intersection)).await;
                this.finish(ticket, start, PollPayload::Vehicles(result)).await;
            });
        }
        if which.metrics() {
            let ticket = self.ticket(intersection, origin);
            let this = self.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                let result = this.gateway.get_metrics(intersection).await;
                this.finish(ticket, start, PollPayload::Metrics(result)).await;
            });
        }
    }

    async fn finish(&self, ticket: PollTicket, start: Instant, payload: PollPayload) {
        let kind = payload.kind();
        let error = match &payload {
            PollPayload::Vehicles(Err(e)) | PollPayload::Metrics(Err(e)) => Some(e),
            _ => None,
        };
        self.metrics.record_fetch(kind, error.is_none(), start.elapsed().as_millis() as u64);
        if let Some(e) = error {
            log_fetch_failed(kind, ticket.intersection, ticket.seq, e);
        }
        // Receiver gone means the console is shutting down
        let _ = self.update_tx.send(PollUpdate { ticket, payload }).await;
    }
}

/// Decrements the live-loop count when a loop task ends, however it ends
struct LoopGuard(Arc<AtomicUsize>);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct PollingCoordinator {
    fetcher: Fetcher,
    period: Duration,
    state: PollState,
    generation: u64,
    epoch: u64,
    cancel_tx: Option<watch::Sender<bool>>,
    live_loops: Arc<AtomicUsize>,
}

impl PollingCoordinator {
    /// Create a coordinator and the receiver its updates arrive on.
    /// Periods below [`MIN_POLL_PERIOD`] are raised to it.
    pub fn new(
        gateway: Arc<dyn SimulationGateway>,
        metrics: Arc<Metrics>,
        period: Duration,
    ) -> (Self, mpsc::Receiver<PollUpdate>) {
        let (update_tx, update_rx) = mpsc::channel(UPDATE_CHANNEL_SIZE);
        if period < MIN_POLL_PERIOD {
            warn!(requested_ms = %period.as_millis(), min_ms = %MIN_POLL_PERIOD.as_millis(), "poll_period_raised");
        }
        let coordinator = Self {
            fetcher: Fetcher { gateway, metrics, update_tx, seq: Arc::new(AtomicU64::new(0)) },
            period: period.max(MIN_POLL_PERIOD),
            state: PollState::Idle,
            generation: 0,
            epoch: 0,
            cancel_tx: None,
            live_loops: Arc::new(AtomicUsize::new(0)),
        };
        (coordinator, update_rx)
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Interval loops whose task has not exited yet
    pub fn live_loops(&self) -> usize {
        self.live_loops.load(Ordering::Relaxed)
    }

    /// Begin polling `intersection`, replacing any running loop
    pub fn start(&mut self, intersection: IntersectionId) {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        self.cancel_tx = Some(cancel_tx);
        self.state = PollState::Polling(intersection);

        let fetcher = self.fetcher.clone();
        let period = self.period;
        self.live_loops.fetch_add(1, Ordering::Relaxed);
        let guard = LoopGuard(self.live_loops.clone());

        info!(intersection_id = %intersection, generation = %generation, period_ms = %period.as_millis(), "polling_started");

        tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *cancel_rx.borrow() {
                            break;
                        }
                        fetcher.metrics.record_poll_tick();
                        fetcher.spawn(intersection, Origin::Tick { generation }, Refresh::Both);
                    }
                }
            }
            debug!(intersection_id = %intersection, generation = %generation, "poll_loop_exited");
        });
    }

    /// Stop the current loop, if any; idempotent
    pub fn cancel(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(true);
        }
        if let PollState::Polling(intersection) = self.state {
            self.epoch += 1;
            info!(intersection_id = %intersection, generation = %self.generation, "polling_cancelled");
        }
        self.state = PollState::Idle;
    }

    /// Fetch now, outside the interval schedule
    pub fn fetch_now(&self, intersection: IntersectionId, which: Refresh) {
        self.fetcher.spawn(intersection, Origin::OutOfBand { epoch: self.epoch }, which);
    }

    /// Whether a result may still be applied
    pub fn admits(&self, ticket: &PollTicket) -> bool {
        match ticket.origin {
            Origin::Tick { generation } => {
                generation == self.generation
                    && self.state == PollState::Polling(ticket.intersection)
            }
            Origin::OutOfBand { epoch } => epoch == self.epoch,
        }
    }
}

impl Drop for PollingCoordinator {
    fn drop(&mut self) {
        self.cancel();
    }
}
