//! Command dispatcher - operator commands against the remote gateway
//!
//! The dispatcher is stateless apart from metrics: it validates, performs the
//! round trip and reports the outcome. Busy gating lives in `InFlight`, which
//! the session owns so the "running" flag and the busy set change together.

use crate::domain::types::{
    InjectVehicleRequest, IntersectionId, OptimizeReport, SimulationAck, StartSimulationRequest,
    Vehicle,
};
use crate::infra::metrics::Metrics;
use crate::io::gateway::{
    validate_inject, validate_intersection, validate_start, validate_step, GatewayError,
    SimulationGateway,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(StartSimulationRequest),
    Stop(IntersectionId),
    Optimize(IntersectionId),
    Inject(InjectVehicleRequest),
    Step { intersection: IntersectionId, dt: Option<f64> },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Stop(_) => "stop",
            Command::Optimize(_) => "optimize",
            Command::Inject(_) => "inject",
            Command::Step { .. } => "step",
        }
    }

    pub fn intersection(&self) -> IntersectionId {
        match self {
            Command::Start(req) => req.intersection_id,
            Command::Inject(req) => req.intersection_id,
            Command::Stop(id) | Command::Optimize(id) => *id,
            Command::Step { intersection, .. } => *intersection,
        }
    }

    /// Control this command occupies while outstanding
    pub fn control(&self) -> Control {
        match self {
            Command::Start(_) | Command::Stop(_) => Control::RunToggle,
            Command::Optimize(_) => Control::Optimize,
            Command::Inject(_) => Control::Inject,
            Command::Step { .. } => Control::Step,
        }
    }

    /// Client-side checks mirroring the remote schema
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self {
            Command::Start(req) => validate_start(req),
            Command::Inject(req) => validate_inject(req),
            Command::Stop(id) | Command::Optimize(id) => validate_intersection(*id),
            Command::Step { intersection, dt } => {
                validate_intersection(*intersection)?;
                validate_step(*dt)
            }
        }
    }
}

/// Operator control a command is bound to; start and stop share one toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Control {
    RunToggle,
    Optimize,
    Inject,
    Step,
}

/// Controls with a command still outstanding
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InFlight(BTreeSet<Control>);

impl InFlight {
    /// Mark `control` busy; false if it already was
    pub fn try_begin(&mut self, control: Control) -> bool {
        self.0.insert(control)
    }

    pub fn finish(&mut self, control: Control) {
        self.0.remove(&control);
    }

    pub fn is_busy(&self, control: Control) -> bool {
        self.0.contains(&control)
    }

    pub fn is_idle(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// What a successful command returned
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Started(SimulationAck),
    Stopped(SimulationAck),
    Optimized(OptimizeReport),
    Injected(Vehicle),
    Stepped(SimulationAck),
}

/// Log a rejected or failed command (cold path)
#[cold]
fn log_command_failed(command: &Command, e: &GatewayError, latency_ms: u128) {
    warn!(
        command = %command.name(),
        intersection_id = %command.intersection(),
        latency_ms = %latency_ms,
        error = %e,
        "command_failed"
    );
}

#[derive(Clone)]
pub struct CommandDispatcher {
    gateway: Arc<dyn SimulationGateway>,
    metrics: Arc<Metrics>,
}

impl CommandDispatcher {
    pub fn new(gateway: Arc<dyn SimulationGateway>, metrics: Arc<Metrics>) -> Self {
        Self { gateway, metrics }
    }

    /// Validate, send and report one command
    pub async fn execute(&self, command: &Command) -> Result<CommandOutcome, GatewayError> {
        let start = Instant::now();
        let result = match command.validate() {
            Ok(()) => self.send(command).await,
            Err(e) => Err(e),
        };
        let latency_ms = start.elapsed().as_millis();
        self.metrics.record_command(result.is_ok());

        match &result {
            Ok(outcome) => {
                info!(
                    command = %command.name(),
                    intersection_id = %command.intersection(),
                    latency_ms = %latency_ms,
                    "command_ok"
                );
                if let CommandOutcome::Optimized(report) = outcome {
                    info!(
                        intersection_id = %report.intersection_id,
                        signals = %report.optimized_timings.len(),
                        emergency = %report.emergency_detected,
                        "signals_optimized"
                    );
                }
            }
            Err(e) => log_command_failed(command, e, latency_ms),
        }
        result
    }

    async fn send(&self, command: &Command) -> Result<CommandOutcome, GatewayError> {
        match command {
            Command::Start(req) => self.gateway.start_simulation(req).await.map(CommandOutcome::Started),
            Command::Stop(id) => self.gateway.stop_simulation(*id).await.map(CommandOutcome::Stopped),
            Command::Optimize(id) => {
                self.gateway.optimize_signals(*id).await.map(CommandOutcome::Optimized)
            }
            Command::Inject(req) => self.gateway.inject_vehicle(req).await.map(CommandOutcome::Injected),
            Command::Step { intersection, dt } => self
                .gateway
                .step_simulation(*intersection, *dt)
                .await
                .map(CommandOutcome::Stepped),
        }
    }
}
