//! Runtime glue between the session and the network
//!
//! The controller is the only place that turns `Effect`s into IO. Gateway
//! calls run as spawned tasks whose completions come back as `Action`s;
//! poll results come back from the coordinator. Both are applied to the
//! session on the caller's task, so the session has a single writer.

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::gateway::SimulationGateway;
use crate::services::dispatcher::CommandDispatcher;
use crate::services::poller::{PollUpdate, PollingCoordinator};
use crate::services::session::{Action, Effect, PollApplied, Session, SimulationSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

const ACTION_CHANNEL_SIZE: usize = 64;

/// What `next` applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Action,
    Poll(PollApplied),
}

pub struct Controller {
    session: Session,
    poller: PollingCoordinator,
    dispatcher: CommandDispatcher,
    gateway: Arc<dyn SimulationGateway>,
    metrics: Arc<Metrics>,
    action_tx: mpsc::Sender<Action>,
    action_rx: mpsc::Receiver<Action>,
    poll_rx: mpsc::Receiver<PollUpdate>,
}

impl Controller {
    pub fn new(
        gateway: Arc<dyn SimulationGateway>,
        metrics: Arc<Metrics>,
        settings: SimulationSettings,
        poll_interval: Duration,
    ) -> Self {
        let (poller, poll_rx) = PollingCoordinator::new(gateway.clone(), metrics.clone(), poll_interval);
        let dispatcher = CommandDispatcher::new(gateway.clone(), metrics.clone());
        let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_SIZE);
        Self {
            session: Session::new(settings),
            poller,
            dispatcher,
            gateway,
            metrics,
            action_tx,
            action_rx,
            poll_rx,
        }
    }

    pub fn from_config(
        gateway: Arc<dyn SimulationGateway>,
        metrics: Arc<Metrics>,
        config: &Config,
    ) -> Self {
        Self::new(
            gateway,
            metrics,
            SimulationSettings::from(config),
            Duration::from_millis(config.poll_interval_ms()),
        )
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn poller(&self) -> &PollingCoordinator {
        &self.poller
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Reduce `action` and run the effects it produces
    pub fn dispatch(&mut self, action: Action) {
        let effects = self.session.reduce(action);
        for effect in effects {
            self.run(effect);
        }
    }

    fn run(&mut self, effect: Effect) {
        debug!(effect = ?effect, "effect");
        match effect {
            Effect::FetchCities => {
                let gateway = self.gateway.clone();
                self.spawn(async move { Action::CitiesLoaded(gateway.list_cities().await) });
            }
            Effect::FetchIntersections(city) => {
                let gateway = self.gateway.clone();
                self.spawn(async move {
                    let result = gateway.list_intersections(Some(city)).await;
                    Action::IntersectionsLoaded { city, result }
                });
            }
            Effect::FetchIntersection(id) => {
                let gateway = self.gateway.clone();
                self.spawn(async move {
                    let result = gateway.get_intersection(id).await;
                    Action::IntersectionLoaded { id, result }
                });
            }
            Effect::Execute(command) => {
                let dispatcher = self.dispatcher.clone();
                self.spawn(async move {
                    let result = dispatcher.execute(&command).await;
                    Action::CommandFinished { command, result }
                });
            }
            Effect::StartPolling(id) => self.poller.start(id),
            Effect::StopPolling => self.poller.cancel(),
            Effect::Refresh(id, which) => self.poller.fetch_now(id, which),
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = Action> + Send + 'static,
    {
        let action_tx = self.action_tx.clone();
        tokio::spawn(async move {
            let action = task.await;
            // Receiver lives as long as the controller
            let _ = action_tx.send(action).await;
        });
    }

    fn apply_poll(&mut self, update: PollUpdate) -> PollApplied {
        if !self.poller.admits(&update.ticket) {
            self.metrics.record_stale_dropped();
            return PollApplied::Stale;
        }
        let applied = self.session.apply_poll(update);
        if applied == PollApplied::Stale {
            self.metrics.record_stale_dropped();
        }
        applied
    }

    /// Wait for the next completion or poll result and apply it
    pub async fn next(&mut self) -> Applied {
        tokio::select! {
            Some(action) = self.action_rx.recv() => {
                self.dispatch(action);
                Applied::Action
            }
            Some(update) = self.poll_rx.recv() => Applied::Poll(self.apply_poll(update)),
        }
    }

    /// Apply everything already queued without waiting; returns how many items were applied
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(action) = self.action_rx.try_recv() {
            self.dispatch(action);
            applied += 1;
        }
        while let Ok(update) = self.poll_rx.try_recv() {
            self.apply_poll(update);
            applied += 1;
        }
        applied
    }
}
