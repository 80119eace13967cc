//! View/selection state machine
//!
//! All console state lives in `Session` and changes only through
//! `Session::reduce`, which returns the side effects the caller must run
//! (fetches, commands, polling start/stop). Effects come back later as
//! further `Action`s. Nothing in here awaits or touches the network.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::types::{
    City, CityId, Direction, InjectVehicleRequest, Intersection, IntersectionId, OptimizeReport,
    SimulationMetrics, Vehicle, VehicleType,
};
use crate::infra::config::Config;
use crate::io::gateway::GatewayError;
use crate::services::dispatcher::{Command, CommandOutcome, InFlight};
use crate::services::poller::{PollUpdate, Refresh};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Alerts kept before the oldest is dropped
pub const MAX_ALERTS: usize = 8;

/// A primary fetch whose failure blocks the view
#[derive(Debug, Clone, PartialEq)]
pub enum Load<T> {
    Loading,
    Ready(T),
    Failed(String),
}

impl<T> Load<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Load::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Load::Loading)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Load::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Overview,
    Detail(IntersectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverviewState {
    pub cities: Load<Vec<City>>,
    pub selected_city: Option<CityId>,
    pub intersections: Load<Vec<Intersection>>,
    pub selected_intersection: Option<IntersectionId>,
    pub hovered: Option<IntersectionId>,
}

impl OverviewState {
    fn new() -> Self {
        Self {
            cities: Load::Loading,
            selected_city: None,
            intersections: Load::Loading,
            selected_intersection: None,
            hovered: None,
        }
    }

    pub fn selected_city(&self) -> Option<&City> {
        let id = self.selected_city?;
        self.cities.ready()?.iter().find(|c| c.id == id)
    }

    pub fn intersection(&self, id: IntersectionId) -> Option<&Intersection> {
        self.intersections.ready()?.iter().find(|i| i.id == id)
    }
}

/// The vehicle injector form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectorForm {
    pub vehicle_type: VehicleType,
    pub direction: Direction,
    pub is_emergency: bool,
}

impl Default for InjectorForm {
    fn default() -> Self {
        Self { vehicle_type: VehicleType::Car, direction: Direction::North, is_emergency: false }
    }
}

impl InjectorForm {
    pub fn request(&self, intersection: IntersectionId) -> InjectVehicleRequest {
        InjectVehicleRequest {
            vehicle_type: self.vehicle_type,
            intersection_id: intersection,
            lane_id: self.direction.preset_lane(),
            is_emergency: self.is_emergency,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetailState {
    pub intersection_id: IntersectionId,
    pub intersection: Load<Intersection>,
    pub vehicles: Vec<Vehicle>,
    pub metrics: Option<SimulationMetrics>,
    pub running: bool,
    pub in_flight: InFlight,
    pub injector: InjectorForm,
    pub last_optimization: Option<OptimizeReport>,
    last_vehicles_seq: u64,
    last_metrics_seq: u64,
}

impl DetailState {
    fn new(intersection_id: IntersectionId) -> Self {
        Self {
            intersection_id,
            intersection: Load::Loading,
            vehicles: Vec::new(),
            metrics: None,
            running: false,
            in_flight: InFlight::default(),
            injector: InjectorForm::default(),
            last_optimization: None,
            last_vehicles_seq: 0,
            last_metrics_seq: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Start parameters sent with every start command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationSettings {
    pub duration_secs: u32,
    pub speed_factor: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self { duration_secs: 300, speed_factor: 1.0 }
    }
}

impl From<&Config> for SimulationSettings {
    fn from(config: &Config) -> Self {
        Self { duration_secs: config.sim_duration_secs(), speed_factor: config.sim_speed_factor() }
    }
}

#[derive(Debug, Clone)]
pub enum Action {
    LoadCities,
    CitiesLoaded(Result<Vec<City>, GatewayError>),
    SelectCity(CityId),
    IntersectionsLoaded { city: CityId, result: Result<Vec<Intersection>, GatewayError> },
    RetryIntersections,
    SelectIntersection(IntersectionId),
    Hover(Option<IntersectionId>),
    /// Enter detail for the selected intersection
    OpenDetail,
    OpenIntersection(IntersectionId),
    IntersectionLoaded { id: IntersectionId, result: Result<Intersection, GatewayError> },
    RetryIntersection,
    Back,
    StartSimulation,
    StopSimulation,
    OptimizeSignals,
    InjectVehicle,
    StepSimulation,
    SetVehicleType(VehicleType),
    SetDirection(Direction),
    SetEmergency(bool),
    CommandFinished { command: Command, result: Result<CommandOutcome, GatewayError> },
    Poll(PollUpdate),
    DismissAlert,
}

/// Work the caller must perform on the session's behalf
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchCities,
    FetchIntersections(CityId),
    FetchIntersection(IntersectionId),
    Execute(Command),
    StartPolling(IntersectionId),
    StopPolling,
    Refresh(IntersectionId, Refresh),
}

/// What happened to one poll update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollApplied {
    Applied,
    /// Fetch failed; the last good value was kept
    Failed,
    /// Wrong view, wrong intersection or older than what is shown
    Stale,
}

pub struct Session {
    view: View,
    overview: OverviewState,
    detail: Option<DetailState>,
    alerts: VecDeque<Alert>,
    settings: SimulationSettings,
}

impl Session {
    pub fn new(settings: SimulationSettings) -> Self {
        Self {
            view: View::Overview,
            overview: OverviewState::new(),
            detail: None,
            alerts: VecDeque::new(),
            settings,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn overview(&self) -> &OverviewState {
        &self.overview
    }

    pub fn detail(&self) -> Option<&DetailState> {
        self.detail.as_ref()
    }

    pub fn alerts(&self) -> &VecDeque<Alert> {
        &self.alerts
    }

    pub fn settings(&self) -> SimulationSettings {
        self.settings
    }

    /// Apply one action and return the effects it requires
    pub fn reduce(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::LoadCities => self.handle_load_cities(),
            Action::CitiesLoaded(result) => self.handle_cities_loaded(result),
            Action::SelectCity(id) => self.handle_select_city(id),
            Action::IntersectionsLoaded { city, result } => {
                self.handle_intersections_loaded(city, result)
            }
            Action::RetryIntersections => self.handle_retry_intersections(),
            Action::SelectIntersection(id) => self.handle_select_intersection(id),
            Action::Hover(id) => {
                self.overview.hovered = id;
                Vec::new()
            }
            Action::OpenDetail => match self.overview.selected_intersection {
                Some(id) if self.view == View::Overview => self.enter_detail(id),
                _ => Vec::new(),
            },
            Action::OpenIntersection(id) => self.enter_detail(id),
            Action::IntersectionLoaded { id, result } => self.handle_intersection_loaded(id, result),
            Action::RetryIntersection => self.handle_retry_intersection(),
            Action::Back => self.handle_back(),
            Action::StartSimulation => self.handle_start(),
            Action::StopSimulation => self.handle_stop(),
            Action::OptimizeSignals => self.handle_optimize(),
            Action::InjectVehicle => self.handle_inject(),
            Action::StepSimulation => self.handle_step(),
            Action::SetVehicleType(vehicle_type) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.injector.vehicle_type = vehicle_type;
                }
                Vec::new()
            }
            Action::SetDirection(direction) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.injector.direction = direction;
                }
                Vec::new()
            }
            Action::SetEmergency(is_emergency) => {
                if let Some(detail) = self.detail.as_mut() {
                    detail.injector.is_emergency = is_emergency;
                }
                Vec::new()
            }
            Action::CommandFinished { command, result } => {
                self.handle_command_finished(command, result)
            }
            Action::Poll(update) => {
                self.apply_poll(update);
                Vec::new()
            }
            Action::DismissAlert => {
                self.alerts.pop_front();
                Vec::new()
            }
        }
    }

    fn push_alert(&mut self, level: AlertLevel, message: String) {
        if self.alerts.len() >= MAX_ALERTS {
            self.alerts.pop_front();
        }
        self.alerts.push_back(Alert { level, message, at: Utc::now() });
    }
}
