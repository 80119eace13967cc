//! Action handlers for the Session
//!
//! One handler per action family. Handlers mutate state synchronously and
//! return the effects to run; they never perform IO themselves.

use super::{AlertLevel, DetailState, Effect, Load, PollApplied, Session, View};
use crate::domain::types::{City, CityId, Intersection, IntersectionId, StartSimulationRequest};
use crate::io::gateway::GatewayError;
use crate::services::dispatcher::{Command, CommandOutcome, Control};
use crate::services::poller::{PollPayload, PollUpdate, Refresh};
use tracing::{debug, info, warn};

/// Operator-facing wording for a failed command
fn failure_message(command: &Command, e: &GatewayError) -> String {
    let what = match command {
        Command::Start(_) => "start simulation",
        Command::Stop(_) => "stop simulation",
        Command::Optimize(_) => "optimize signals",
        Command::Inject(_) => "inject vehicle",
        Command::Step { .. } => "step simulation",
    };
    format!("Failed to {what}: {e}")
}

/// Log a primary fetch that blocks the view (cold path)
#[cold]
fn log_primary_fetch_failed(what: &str, e: &GatewayError) {
    warn!(what = %what, error = %e, "primary_fetch_failed");
}

impl Session {
    pub(crate) fn handle_load_cities(&mut self) -> Vec<Effect> {
        self.overview.cities = Load::Loading;
        vec![Effect::FetchCities]
    }

    pub(crate) fn handle_cities_loaded(
        &mut self,
        result: Result<Vec<City>, GatewayError>,
    ) -> Vec<Effect> {
        match result {
            Ok(cities) => {
                info!(count = %cities.len(), "cities_loaded");
                let keep = self
                    .overview
                    .selected_city
                    .filter(|id| cities.iter().any(|c| c.id == *id));
                let first = cities.first().map(|c| c.id);
                self.overview.cities = Load::Ready(cities);
                match (keep, first) {
                    (Some(_), _) => Vec::new(),
                    // Auto-select the first city
                    (None, Some(first)) => self.handle_select_city(first),
                    (None, None) => {
                        self.overview.selected_city = None;
                        self.overview.intersections = Load::Ready(Vec::new());
                        Vec::new()
                    }
                }
            }
            Err(e) => {
                log_primary_fetch_failed("cities", &e);
                self.overview.cities = Load::Failed(e.to_string());
                Vec::new()
            }
        }
    }

    pub(crate) fn handle_select_city(&mut self, id: CityId) -> Vec<Effect> {
        if self.view != View::Overview {
            return Vec::new();
        }
        info!(city_id = %id, "city_selected");
        self.overview.selected_city = Some(id);
        self.overview.selected_intersection = None;
        self.overview.hovered = None;
        self.overview.intersections = Load::Loading;
        vec![Effect::FetchIntersections(id)]
    }

    pub(crate) fn handle_intersections_loaded(
        &mut self,
        city: CityId,
        result: Result<Vec<Intersection>, GatewayError>,
    ) -> Vec<Effect> {
        if self.overview.selected_city != Some(city) {
            debug!(city_id = %city, "stale_intersection_list_ignored");
            return Vec::new();
        }
        match result {
            Ok(list) => {
                info!(city_id = %city, count = %list.len(), "intersections_loaded");
                self.overview.intersections = Load::Ready(list);
            }
            Err(e) => {
                log_primary_fetch_failed("intersections", &e);
                self.overview.intersections = Load::Failed(e.to_string());
            }
        }
        Vec::new()
    }

    pub(crate) fn handle_retry_intersections(&mut self) -> Vec<Effect> {
        match self.overview.selected_city {
            Some(city) if self.view == View::Overview => {
                self.overview.intersections = Load::Loading;
                vec![Effect::FetchIntersections(city)]
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn handle_select_intersection(&mut self, id: IntersectionId) -> Vec<Effect> {
        if self.view == View::Overview && self.overview.intersection(id).is_some() {
            self.overview.selected_intersection = Some(id);
        }
        Vec::new()
    }

    pub(crate) fn enter_detail(&mut self, id: IntersectionId) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.view {
            View::Detail(current) if current == id => return effects,
            View::Detail(current) => {
                info!(from = %current, to = %id, "intersection_switched");
                effects.push(Effect::StopPolling);
            }
            View::Overview => {
                info!(intersection_id = %id, "detail_opened");
            }
        }
        self.view = View::Detail(id);
        self.overview.selected_intersection = Some(id);
        self.detail = Some(DetailState::new(id));
        effects.push(Effect::FetchIntersection(id));
        effects.push(Effect::Refresh(id, Refresh::Both));
        effects
    }

    pub(crate) fn handle_intersection_loaded(
        &mut self,
        id: IntersectionId,
        result: Result<Intersection, GatewayError>,
    ) -> Vec<Effect> {
        let Some(detail) = self.detail.as_mut().filter(|d| d.intersection_id == id) else {
            debug!(intersection_id = %id, "stale_intersection_ignored");
            return Vec::new();
        };
        detail.intersection = match result {
            Ok(intersection) => Load::Ready(intersection),
            Err(e) => {
                log_primary_fetch_failed("intersection", &e);
                Load::Failed(e.to_string())
            }
        };
        Vec::new()
    }

    pub(crate) fn handle_retry_intersection(&mut self) -> Vec<Effect> {
        match self.detail.as_mut() {
            Some(detail) => {
                detail.intersection = Load::Loading;
                vec![Effect::FetchIntersection(detail.intersection_id)]
            }
            None => Vec::new(),
        }
    }

    pub(crate) fn handle_back(&mut self) -> Vec<Effect> {
        let View::Detail(id) = self.view else {
            return Vec::new();
        };
        info!(intersection_id = %id, "detail_closed");
        self.view = View::Overview;
        self.detail = None;
        self.overview.selected_intersection = None;
        vec![Effect::StopPolling]
    }

    /// Claim `control` on the open detail and build its command
    fn submit(
        &mut self,
        control: Control,
        build: impl FnOnce(&DetailState) -> Option<Command>,
    ) -> Vec<Effect> {
        let Some(detail) = self.detail.as_mut() else {
            return Vec::new();
        };
        let Some(command) = build(detail) else {
            return Vec::new();
        };
        if !detail.in_flight.try_begin(control) {
            debug!(command = %command.name(), "command_already_in_flight");
            return Vec::new();
        }
        vec![Effect::Execute(command)]
    }

    pub(crate) fn handle_start(&mut self) -> Vec<Effect> {
        let settings = self.settings;
        self.submit(Control::RunToggle, |detail| {
            (!detail.running).then(|| {
                Command::Start(StartSimulationRequest {
                    intersection_id: detail.intersection_id,
                    duration: settings.duration_secs,
                    speed_factor: settings.speed_factor,
                })
            })
        })
    }

    pub(crate) fn handle_stop(&mut self) -> Vec<Effect> {
        self.submit(Control::RunToggle, |detail| {
            detail.running.then_some(Command::Stop(detail.intersection_id))
        })
    }

    pub(crate) fn handle_optimize(&mut self) -> Vec<Effect> {
        self.submit(Control::Optimize, |detail| Some(Command::Optimize(detail.intersection_id)))
    }

    pub(crate) fn handle_inject(&mut self) -> Vec<Effect> {
        self.submit(Control::Inject, |detail| {
            Some(Command::Inject(detail.injector.request(detail.intersection_id)))
        })
    }

    pub(crate) fn handle_step(&mut self) -> Vec<Effect> {
        self.submit(Control::Step, |detail| {
            Some(Command::Step { intersection: detail.intersection_id, dt: None })
        })
    }

    pub(crate) fn handle_command_finished(
        &mut self,
        command: Command,
        result: Result<CommandOutcome, GatewayError>,
    ) -> Vec<Effect> {
        let id = command.intersection();
        let Some(detail) = self.detail.as_mut().filter(|d| d.intersection_id == id) else {
            debug!(command = %command.name(), intersection_id = %id, "command_result_for_closed_detail");
            return Vec::new();
        };
        detail.in_flight.finish(command.control());

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // Never flip `running` on failure
                self.push_alert(AlertLevel::Error, failure_message(&command, &e));
                return Vec::new();
            }
        };

        match outcome {
            CommandOutcome::Started(_) => {
                detail.running = true;
                info!(intersection_id = %id, "simulation_started");
                vec![Effect::StartPolling(id), Effect::Refresh(id, Refresh::Both)]
            }
            CommandOutcome::Stopped(_) => {
                detail.running = false;
                info!(intersection_id = %id, "simulation_stopped");
                vec![Effect::StopPolling]
            }
            CommandOutcome::Injected(vehicle) => {
                info!(intersection_id = %id, vehicle_id = %vehicle.vehicle_id, "vehicle_injected");
                vec![Effect::Refresh(id, Refresh::Vehicles)]
            }
            CommandOutcome::Stepped(_) => vec![Effect::Refresh(id, Refresh::Both)],
            CommandOutcome::Optimized(report) => {
                let mut message =
                    format!("Signals optimized: {} timings updated", report.optimized_timings.len());
                if report.emergency_detected {
                    message.push_str(", emergency corridor active");
                }
                detail.last_optimization = Some(report);
                self.push_alert(AlertLevel::Info, message);
                vec![Effect::Refresh(id, Refresh::Metrics)]
            }
        }
    }

    /// Apply a poll result if it is for the open detail and newer than what is shown
    pub fn apply_poll(&mut self, update: PollUpdate) -> PollApplied {
        let ticket = update.ticket;
        if self.view != View::Detail(ticket.intersection) {
            return PollApplied::Stale;
        }
        let Some(detail) = self.detail.as_mut().filter(|d| d.intersection_id == ticket.intersection)
        else {
            return PollApplied::Stale;
        };

        match update.payload {
            PollPayload::Vehicles(result) => {
                if ticket.seq <= detail.last_vehicles_seq {
                    return PollApplied::Stale;
                }
                match result {
                    Ok(vehicles) => {
                        detail.vehicles = vehicles;
                        detail.last_vehicles_seq = ticket.seq;
                        PollApplied::Applied
                    }
                    Err(_) => PollApplied::Failed,
                }
            }
            PollPayload::Metrics(result) => {
                if ticket.seq <= detail.last_metrics_seq {
                    return PollApplied::Stale;
                }
                match result {
                    Ok(metrics) => {
                        detail.metrics = Some(metrics);
                        detail.last_metrics_seq = ticket.seq;
                        PollApplied::Applied
                    }
                    Err(_) => PollApplied::Failed,
                }
            }
        }
    }
}
