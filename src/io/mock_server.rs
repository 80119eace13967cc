//! In-memory stand-in for the remote simulator
//!
//! Serves the `/api` wire contract over hyper HTTP/1 so the console can be
//! developed and tested without the real backend. Running simulations are
//! advanced by a background ticker (see `run_ticker`).
//!
//! Lane ids are local to an intersection (1=N, 2=S, 3=E, 4=W), matching the
//! injector presets. Signal "NS" governs lanes 1-2, "EW" lanes 3-4.

use crate::domain::types::{
    City, CityId, CongestionScore, Direction, InjectVehicleRequest, Intersection, IntersectionId,
    Lane, LaneId, LaneMetrics, OptimizeReport, Signal, SignalMetrics, SignalState, SimulationAck,
    SimulationMetrics, StartSimulationRequest, Vehicle, VehicleState, VehicleType,
};
use crate::io::gateway::{validate_step, GatewayError};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

pub type SharedWorld = Arc<Mutex<MockWorld>>;

const LANE_CAPACITY: u32 = 30;
const LANE_LENGTH_M: f64 = 100.0;
const LANE_WIDTH_M: f64 = 3.5;
const GREEN_SECS: u32 = 20;
const YELLOW_SECS: f64 = 3.0;
const ACCELERATION: f64 = 2.0;
const SAFETY_GAP_M: f64 = 2.0;
/// Simulated seconds between automatic arrivals on a running intersection
const SPAWN_EVERY_SECS: f64 = 2.0;
const MIN_GREEN_SECS: u32 = 5;
const MAX_GREEN_SECS: u32 = 60;
const CYCLE_SECS: u32 = 60;
const EMERGENCY_HOLD_SECS: f64 = 999.0;
const DEFAULT_STEP_DT: f64 = 0.1;
const MAX_RECORDED_REQUESTS: usize = 256;

/// Arrival mix used by the ticker, cycled in order
const ARRIVAL_MIX: [VehicleType; 7] = [
    VehicleType::Car,
    VehicleType::Car,
    VehicleType::TwoWheeler,
    VehicleType::Auto,
    VehicleType::Bus,
    VehicleType::Car,
    VehicleType::Truck,
];

fn max_speed(vehicle_type: VehicleType) -> f64 {
    match vehicle_type {
        VehicleType::Car => 15.0,
        VehicleType::Bus | VehicleType::Truck => 12.0,
        VehicleType::TwoWheeler => 20.0,
        VehicleType::Auto => 14.0,
        VehicleType::Ambulance | VehicleType::Police => 25.0,
        VehicleType::FireEngine => 22.0,
    }
}

fn body_length(vehicle_type: VehicleType) -> f64 {
    match vehicle_type {
        VehicleType::TwoWheeler => 2.0,
        VehicleType::Auto => 3.0,
        VehicleType::Bus => 12.0,
        VehicleType::Truck | VehicleType::FireEngine => 10.0,
        _ => 4.5,
    }
}

/// Passenger-car equivalents used for lane occupancy
fn occupancy_weight(vehicle_type: VehicleType) -> f64 {
    match vehicle_type {
        VehicleType::TwoWheeler => 0.4,
        VehicleType::Auto => 0.8,
        VehicleType::Bus => 2.5,
        VehicleType::Truck => 3.0,
        _ => 1.0,
    }
}

/// Force individual routes to fail with 503
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    pub fail_vehicles: bool,
    pub fail_metrics: bool,
    pub fail_start: bool,
}

/// One request as the mock saw it
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct MockSignal {
    intersection_id: IntersectionId,
    signal: Signal,
    yellow_secs: f64,
    red_secs: f64,
    adaptive_green: Option<u32>,
}

impl MockSignal {
    fn governs(&self, lane: LaneId) -> bool {
        let ns = matches!(Direction::for_lane(lane), Direction::North | Direction::South);
        ns == self.signal.name.ends_with("NS")
    }

    fn green_secs(&self) -> u32 {
        self.adaptive_green.unwrap_or(self.signal.green_duration)
    }

    fn advance(&mut self, dt: f64) {
        if self.signal.remaining_time > 0.0 {
            self.signal.remaining_time = (self.signal.remaining_time - dt).max(0.0);
            return;
        }
        let (state, remaining) = match self.signal.state {
            SignalState::Green => (SignalState::Yellow, self.yellow_secs),
            SignalState::Yellow => (SignalState::Red, self.red_secs),
            SignalState::Red => (SignalState::Green, self.green_secs() as f64),
        };
        self.signal.state = state;
        self.signal.remaining_time = remaining;
    }
}

#[derive(Debug, Clone)]
struct SimRun {
    running: bool,
    duration: f64,
    speed_factor: f64,
    elapsed: f64,
    since_spawn: f64,
    spawned: usize,
}

#[derive(Debug, Clone, Default)]
struct IntersectionClock {
    simulation_time: f64,
    exited: u32,
}

/// Route failure rendered as FastAPI-style `{"detail": ...}`
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: &str) -> Self {
        Self { status: StatusCode::BAD_REQUEST, detail: detail.to_string() }
    }

    fn not_found(detail: &str) -> Self {
        Self { status: StatusCode::NOT_FOUND, detail: detail.to_string() }
    }

    fn unavailable(detail: &str) -> Self {
        Self { status: StatusCode::SERVICE_UNAVAILABLE, detail: detail.to_string() }
    }

    fn unprocessable(e: GatewayError) -> Self {
        let detail = match e {
            GatewayError::InvalidRequest(detail) => detail,
            other => other.to_string(),
        };
        Self { status: StatusCode::UNPROCESSABLE_ENTITY, detail }
    }
}

type ApiResult = Result<(StatusCode, serde_json::Value), ApiError>;

fn ok<T: Serialize>(value: &T) -> ApiResult {
    reply(StatusCode::OK, value)
}

fn reply<T: Serialize>(status: StatusCode, value: &T) -> ApiResult {
    serde_json::to_value(value)
        .map(|v| (status, v))
        .map_err(|e| ApiError { status: StatusCode::INTERNAL_SERVER_ERROR, detail: e.to_string() })
}

/// The whole simulated backend
#[derive(Debug)]
pub struct MockWorld {
    cities: Vec<City>,
    intersections: Vec<Intersection>,
    lanes: Vec<Lane>,
    signals: Vec<MockSignal>,
    vehicles: Vec<Vehicle>,
    runs: HashMap<IntersectionId, SimRun>,
    clocks: HashMap<IntersectionId, IntersectionClock>,
    next_vehicle_pk: i64,
    pub faults: Faults,
    requests: Vec<RecordedRequest>,
}

impl MockWorld {
    /// Empty world (no cities)
    pub fn empty() -> Self {
        Self {
            cities: Vec::new(),
            intersections: Vec::new(),
            lanes: Vec::new(),
            signals: Vec::new(),
            vehicles: Vec::new(),
            runs: HashMap::new(),
            clocks: HashMap::new(),
            next_vehicle_pk: 1,
            faults: Faults::default(),
            requests: Vec::new(),
        }
    }

    /// Two cities with two four-lane intersections each
    pub fn seeded() -> Self {
        let mut world = Self::empty();
        let bangalore = world.add_city("Bangalore", "Karnataka", 12.9716, 77.5946);
        world.add_intersection(bangalore, "MG Road - Brigade Road", 12.9352, 77.6245);
        world.add_intersection(bangalore, "Koramangala - Mysore Road", 12.9279, 77.6271);
        let mumbai = world.add_city("Mumbai", "Maharashtra", 19.0760, 72.8777);
        world.add_intersection(mumbai, "VT - Bandra", 19.0176, 72.8479);
        world.add_intersection(mumbai, "Churchgate - CST", 18.9352, 72.8235);
        world
    }

    pub fn shared(self) -> SharedWorld {
        Arc::new(Mutex::new(self))
    }

    pub fn add_city(&mut self, name: &str, state: &str, latitude: f64, longitude: f64) -> CityId {
        let id = CityId(self.cities.len() as i64 + 1);
        self.cities.push(City {
            id,
            name: name.to_string(),
            state: state.to_string(),
            latitude: Some(latitude),
            longitude: Some(longitude),
            description: None,
            population: None,
        });
        id
    }

    /// Adds the intersection with four lanes and the NS/EW signal pair
    pub fn add_intersection(
        &mut self,
        city: CityId,
        name: &str,
        latitude: f64,
        longitude: f64,
    ) -> IntersectionId {
        let id = IntersectionId(self.intersections.len() as i64 + 1);
        self.intersections.push(Intersection {
            id,
            name: name.to_string(),
            city_id: city,
            latitude,
            longitude,
            num_lanes: 4,
            description: None,
        });
        for direction in Direction::ALL {
            self.lanes.push(Lane {
                id: direction.preset_lane(),
                name: format!("Lane {}", direction.label().to_ascii_uppercase()),
                intersection_id: id,
                direction,
                capacity: LANE_CAPACITY,
                length: LANE_LENGTH_M,
                width: LANE_WIDTH_M,
            });
        }
        let red_secs = GREEN_SECS as f64 + YELLOW_SECS;
        for (offset, name, state) in [(1, "Signal NS", SignalState::Red), (2, "Signal EW", SignalState::Green)] {
            let remaining = match state {
                SignalState::Red => red_secs,
                _ => GREEN_SECS as f64,
            };
            self.signals.push(MockSignal {
                intersection_id: id,
                signal: Signal {
                    id: id.0 * 10 + offset,
                    name: name.to_string(),
                    state,
                    remaining_time: remaining,
                    green_duration: GREEN_SECS,
                    is_optimized: false,
                },
                yellow_secs: YELLOW_SECS,
                red_secs,
                adaptive_green: None,
            });
        }
        self.clocks.insert(id, IntersectionClock::default());
        id
    }

    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }

    /// Number of recorded requests with this method whose path starts with `prefix`
    pub fn request_count(&self, method: &str, prefix: &str) -> usize {
        self.requests.iter().filter(|r| r.method == method && r.path.starts_with(prefix)).count()
    }

    pub fn clear_requests(&mut self) {
        self.requests.clear();
    }

    pub fn is_running(&self, id: IntersectionId) -> bool {
        self.runs.get(&id).is_some_and(|r| r.running)
    }

    /// Vehicles still on the road at `id`
    pub fn active_vehicles(&self, id: IntersectionId) -> usize {
        self.vehicles.iter().filter(|v| v.intersection_id == Some(id)).count()
    }

    fn record(&mut self, method: &Method, path: &str, query: Option<&str>, body: &[u8]) {
        if self.requests.len() >= MAX_RECORDED_REQUESTS {
            self.requests.remove(0);
        }
        self.requests.push(RecordedRequest {
            method: method.to_string(),
            path: path.to_string(),
            query: query.map(str::to_string),
            body: serde_json::from_slice(body).ok(),
        });
    }

    fn intersection(&self, id: IntersectionId) -> Option<&Intersection> {
        self.intersections.iter().find(|i| i.id == id)
    }

    fn lane(&self, intersection: IntersectionId, lane: LaneId) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.intersection_id == intersection && l.id == lane)
    }

    fn lane_vehicles(&self, intersection: IntersectionId, lane: LaneId) -> impl Iterator<Item = &Vehicle> {
        self.vehicles
            .iter()
            .filter(move |v| v.intersection_id == Some(intersection) && v.lane_id == Some(lane))
    }

    fn lane_congestion(&self, lane: &Lane) -> f64 {
        let weighted: f64 = self
            .lane_vehicles(lane.intersection_id, lane.id)
            .map(|v| occupancy_weight(v.vehicle_type))
            .sum();
        (weighted / lane.capacity.max(1) as f64 * 100.0).min(100.0)
    }

    fn add_vehicle(
        &mut self,
        intersection: IntersectionId,
        lane: LaneId,
        vehicle_type: VehicleType,
        is_emergency: bool,
    ) -> Vehicle {
        let pk = self.next_vehicle_pk;
        self.next_vehicle_pk += 1;
        let vehicle = Vehicle {
            id: pk,
            vehicle_id: format!("{}-{}", vehicle_type.as_str(), uuid::Uuid::now_v7().simple()),
            vehicle_type,
            intersection_id: Some(intersection),
            lane_id: Some(lane),
            position: 0.0,
            speed: 0.0,
            state: VehicleState::Waiting,
            is_emergency,
            waiting_time: 0.0,
        };
        self.vehicles.push(vehicle.clone());
        vehicle
    }

    fn inject(&mut self, req: &InjectVehicleRequest) -> Result<Vehicle, ApiError> {
        let lane = self
            .lane(req.intersection_id, req.lane_id)
            .ok_or_else(|| ApiError::bad_request("Lane not found"))?;
        let occupied = self.lane_vehicles(req.intersection_id, req.lane_id).count();
        if occupied >= lane.capacity as usize {
            return Err(ApiError::bad_request("Lane is at capacity"));
        }
        let is_emergency = req.is_emergency || req.vehicle_type.is_emergency_service();
        let vehicle = self.add_vehicle(req.intersection_id, req.lane_id, req.vehicle_type, is_emergency);
        info!(vehicle_id = %vehicle.vehicle_id, intersection_id = %req.intersection_id, lane_id = %req.lane_id, "mock_vehicle_injected");
        Ok(vehicle)
    }

    fn start(&mut self, req: &StartSimulationRequest) -> Result<SimulationAck, ApiError> {
        if self.intersection(req.intersection_id).is_none() {
            return Err(ApiError::bad_request("Intersection not found"));
        }
        self.runs.insert(
            req.intersection_id,
            SimRun {
                running: true,
                duration: req.duration as f64,
                speed_factor: req.speed_factor,
                elapsed: 0.0,
                since_spawn: SPAWN_EVERY_SECS,
                spawned: 0,
            },
        );
        info!(intersection_id = %req.intersection_id, duration = %req.duration, "mock_simulation_started");
        Ok(SimulationAck {
            status: "started".to_string(),
            intersection_id: Some(req.intersection_id),
            simulation_time: None,
        })
    }

    fn stop(&mut self, id: IntersectionId) -> SimulationAck {
        if let Some(run) = self.runs.get_mut(&id) {
            run.running = false;
        }
        info!(intersection_id = %id, "mock_simulation_stopped");
        SimulationAck { status: "stopped".to_string(), intersection_id: Some(id), simulation_time: None }
    }

    fn step(&mut self, id: IntersectionId, dt: f64) -> Result<SimulationAck, ApiError> {
        if !self.is_running(id) {
            return Err(ApiError::bad_request("Simulation not running"));
        }
        self.step_intersection(id, dt);
        let simulation_time = self.clocks.get(&id).map(|c| c.simulation_time);
        Ok(SimulationAck { status: "stepped".to_string(), intersection_id: None, simulation_time })
    }

    /// Advance every running simulation by `wall_dt` seconds of wall time
    pub fn advance(&mut self, wall_dt: f64) {
        let running: Vec<IntersectionId> =
            self.runs.iter().filter(|(_, r)| r.running).map(|(id, _)| *id).collect();
        for id in running {
            let Some(run) = self.runs.get_mut(&id) else { continue };
            let dt = wall_dt * run.speed_factor;
            run.elapsed += dt;
            run.since_spawn += dt;
            let finished = run.elapsed >= run.duration;
            let spawn = run.since_spawn >= SPAWN_EVERY_SECS;
            let spawn_index = run.spawned;
            if spawn {
                run.since_spawn = 0.0;
                run.spawned += 1;
            }
            if finished {
                run.running = false;
                info!(intersection_id = %id, "mock_simulation_finished");
            }

            if spawn {
                let lane = Direction::ALL[spawn_index % Direction::ALL.len()].preset_lane();
                let vehicle_type = ARRIVAL_MIX[spawn_index % ARRIVAL_MIX.len()];
                let room = self
                    .lane(id, lane)
                    .map(|l| l.capacity as usize)
                    .is_some_and(|cap| self.lane_vehicles(id, lane).count() < cap);
                if room {
                    self.add_vehicle(id, lane, vehicle_type, false);
                }
            }
            self.step_intersection(id, dt);
        }
    }

    fn step_intersection(&mut self, id: IntersectionId, dt: f64) {
        let clock = self.clocks.entry(id).or_default();
        clock.simulation_time += dt;

        // Snapshot of who is ahead of whom, per lane, before anyone moves
        let ahead: Vec<(usize, Option<(f64, f64)>)> = self
            .vehicles
            .iter()
            .enumerate()
            .filter(|(_, v)| v.intersection_id == Some(id))
            .map(|(idx, v)| {
                let nearest = self
                    .vehicles
                    .iter()
                    .filter(|o| o.lane_id == v.lane_id && o.intersection_id == v.intersection_id)
                    .filter(|o| o.position > v.position)
                    .map(|o| (o.position, o.speed))
                    .min_by(|a, b| a.0.total_cmp(&b.0));
                (idx, nearest)
            })
            .collect();

        for (idx, nearest) in ahead {
            let Some(lane_id) = self.vehicles[idx].lane_id else { continue };
            let signal = self
                .signals
                .iter()
                .find(|s| s.intersection_id == id && s.governs(lane_id))
                .map(|s| s.signal.state)
                .unwrap_or(SignalState::Green);
            let vehicle = &mut self.vehicles[idx];
            let top = max_speed(vehicle.vehicle_type);

            let (mut target, mut state) = match signal {
                SignalState::Green => (top, VehicleState::Moving),
                SignalState::Yellow => (top * 0.5, VehicleState::Moving),
                SignalState::Red => (0.0, VehicleState::Stopped),
            };
            if vehicle.is_emergency {
                target = top;
                state = VehicleState::Moving;
            }
            if let Some((position, speed)) = nearest {
                let min_gap = body_length(vehicle.vehicle_type) + SAFETY_GAP_M;
                let gap = position - vehicle.position;
                if gap < min_gap {
                    target = 0.0;
                    state = VehicleState::Stopped;
                } else if gap < min_gap * 2.0 {
                    target = target.min(speed * 0.8);
                }
            }

            vehicle.speed = if target > vehicle.speed {
                (vehicle.speed + ACCELERATION * dt).min(target)
            } else {
                (vehicle.speed - ACCELERATION * dt).max(target)
            };
            vehicle.position += vehicle.speed * dt;
            vehicle.state = state;
            if vehicle.speed == 0.0 {
                vehicle.waiting_time += dt;
            }
            if vehicle.position >= LANE_LENGTH_M {
                vehicle.state = VehicleState::Exited;
            }
        }

        let before = self.vehicles.len();
        self.vehicles.retain(|v| !(v.intersection_id == Some(id) && v.state == VehicleState::Exited));
        let exited = (before - self.vehicles.len()) as u32;
        if let Some(clock) = self.clocks.get_mut(&id) {
            clock.exited += exited;
        }

        for signal in self.signals.iter_mut().filter(|s| s.intersection_id == id) {
            signal.advance(dt);
        }
    }

    fn optimize(&mut self, id: IntersectionId) -> Result<OptimizeReport, ApiError> {
        if self.intersection(id).is_none() {
            return Err(ApiError::bad_request("Intersection not found"));
        }
        let lanes: Vec<Lane> = self.lanes.iter().filter(|l| l.intersection_id == id).cloned().collect();
        let congestion: Vec<(LaneId, f64)> =
            lanes.iter().map(|l| (l.id, self.lane_congestion(l))).collect();
        let total: f64 = congestion.iter().map(|(_, c)| c).sum();

        let mut optimized_timings = BTreeMap::new();
        let signal_count = self.signals.iter().filter(|s| s.intersection_id == id).count().max(1);
        for signal in self.signals.iter_mut().filter(|s| s.intersection_id == id) {
            let share: f64 = congestion.iter().filter(|(lane, _)| signal.governs(*lane)).map(|(_, c)| c).sum();
            let proportion = if total > 0.0 { share / total } else { 1.0 / signal_count as f64 };
            let green = ((proportion * (CYCLE_SECS - 10) as f64) as u32).clamp(MIN_GREEN_SECS, MAX_GREEN_SECS);
            signal.adaptive_green = Some(green);
            signal.signal.is_optimized = true;
            optimized_timings.insert(signal.signal.id.to_string(), green);
        }

        let emergency_detected =
            self.vehicles.iter().any(|v| v.intersection_id == Some(id) && v.is_emergency);
        if emergency_detected {
            for signal in self.signals.iter_mut().filter(|s| s.intersection_id == id) {
                signal.signal.state = SignalState::Green;
                signal.signal.remaining_time = EMERGENCY_HOLD_SECS;
            }
        }
        info!(intersection_id = %id, emergency = %emergency_detected, "mock_signals_optimized");
        Ok(OptimizeReport {
            status: "optimized".to_string(),
            intersection_id: id,
            optimized_timings,
            emergency_detected,
        })
    }

    fn metrics(&self, id: IntersectionId) -> Result<SimulationMetrics, ApiError> {
        if self.intersection(id).is_none() {
            return Err(ApiError::bad_request("Intersection not found"));
        }
        let clock = self.clocks.get(&id).cloned().unwrap_or_default();
        let active: Vec<&Vehicle> = self.vehicles.iter().filter(|v| v.intersection_id == Some(id)).collect();
        let total_waiting_time: f64 = active.iter().map(|v| v.waiting_time).sum();
        let avg_waiting_time =
            if active.is_empty() { 0.0 } else { total_waiting_time / active.len() as f64 };
        let throughput = if clock.exited > 0 {
            clock.exited as f64 / (clock.simulation_time + 0.1) * 60.0
        } else {
            0.0
        };

        let lanes: Vec<LaneMetrics> = self
            .lanes
            .iter()
            .filter(|l| l.intersection_id == id)
            .map(|lane| {
                let on_lane: Vec<&Vehicle> = self.lane_vehicles(id, lane.id).collect();
                let wait: f64 = on_lane.iter().map(|v| v.waiting_time).sum();
                LaneMetrics {
                    lane_id: lane.id,
                    lane_name: lane.name.clone(),
                    vehicle_count: on_lane.len() as u32,
                    congestion_score: CongestionScore::new(self.lane_congestion(lane)).unwrap_or_default(),
                    avg_wait_time: if on_lane.is_empty() { 0.0 } else { wait / on_lane.len() as f64 },
                    throughput,
                }
            })
            .collect();
        let congestion = if lanes.is_empty() {
            0.0
        } else {
            lanes.iter().map(|l| l.congestion_score.value()).sum::<f64>() / lanes.len() as f64
        };

        let signals = self
            .signals
            .iter()
            .filter(|s| s.intersection_id == id)
            .map(|s| SignalMetrics {
                signal_id: s.signal.id,
                signal_name: s.signal.name.clone(),
                state: s.signal.state,
                remaining_time: s.signal.remaining_time,
                green_duration: s.green_secs(),
                is_optimized: s.signal.is_optimized,
            })
            .collect();

        Ok(SimulationMetrics {
            simulation_time: clock.simulation_time,
            is_running: self.is_running(id),
            total_vehicles: active.len() as u32 + clock.exited,
            vehicles_exited: clock.exited,
            avg_waiting_time,
            total_waiting_time,
            congestion_score: CongestionScore::new(congestion).unwrap_or_default(),
            vehicles_per_minute: throughput,
            lanes,
            signals,
        })
    }

    fn route(&mut self, method: &Method, path: &str, query: Option<&str>, body: &[u8]) -> ApiResult {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match (method, segments.as_slice()) {
            (&Method::GET, ["health"]) => ok(&serde_json::json!({"status": "ok"})),
            (&Method::GET, ["api", "cities"]) => ok(&self.cities),
            (&Method::GET, ["api", "cities", id]) => {
                let id = parse_id(id)?;
                let city = self.cities.iter().find(|c| c.id.0 == id);
                city.map_or_else(|| Err(ApiError::not_found("City not found")), ok)
            }
            (&Method::GET, ["api", "intersections"]) => {
                let city = query_i64(query, "city_id")?;
                let list: Vec<&Intersection> = self
                    .intersections
                    .iter()
                    .filter(|i| city.map_or(true, |c| i.city_id.0 == c))
                    .collect();
                ok(&list)
            }
            (&Method::GET, ["api", "intersections", id]) => {
                let id = IntersectionId(parse_id(id)?);
                self.intersection(id)
                    .map_or_else(|| Err(ApiError::not_found("Intersection not found")), ok)
            }
            (&Method::GET, ["api", "vehicles"]) => {
                if self.faults.fail_vehicles {
                    return Err(ApiError::unavailable("vehicle store unavailable"));
                }
                let filter = query_i64(query, "intersection_id")?;
                let list: Vec<&Vehicle> = self
                    .vehicles
                    .iter()
                    .filter(|v| filter.map_or(true, |f| v.intersection_id.is_some_and(|i| i.0 == f)))
                    .collect();
                ok(&list)
            }
            (&Method::POST, ["api", "vehicles", "inject"]) => {
                let req: InjectVehicleRequest = parse_body(body)?;
                reply(StatusCode::CREATED, &self.inject(&req)?)
            }
            (&Method::POST, ["api", "simulation", "start"]) => {
                if self.faults.fail_start {
                    return Err(ApiError::unavailable("simulation engine unavailable"));
                }
                let req: StartSimulationRequest = parse_body(body)?;
                ok(&self.start(&req)?)
            }
            (&Method::POST, ["api", "simulation", "stop", id]) => {
                let id = IntersectionId(parse_id(id)?);
                ok(&self.stop(id))
            }
            (&Method::POST, ["api", "simulation", "optimize", id]) => {
                let id = IntersectionId(parse_id(id)?);
                ok(&self.optimize(id)?)
            }
            (&Method::GET, ["api", "simulation", "metrics", id]) => {
                if self.faults.fail_metrics {
                    return Err(ApiError::unavailable("metrics unavailable"));
                }
                let id = IntersectionId(parse_id(id)?);
                ok(&self.metrics(id)?)
            }
            (&Method::POST, ["api", "simulation", "step", id]) => {
                let id = IntersectionId(parse_id(id)?);
                let dt = query_f64(query, "dt")?.unwrap_or(DEFAULT_STEP_DT);
                validate_step(Some(dt)).map_err(ApiError::unprocessable)?;
                ok(&self.step(id, dt)?)
            }
            _ => Err(ApiError::not_found("Not Found")),
        }
    }

    /// Serve one request against the world (records it first)
    pub fn handle(&mut self, method: &Method, path: &str, query: Option<&str>, body: &[u8]) -> (StatusCode, serde_json::Value) {
        self.record(method, path, query, body);
        match self.route(method, path, query, body) {
            Ok(reply) => reply,
            Err(e) => (e.status, serde_json::json!({ "detail": e.detail })),
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>().map_err(|_| ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        detail: format!("invalid id: {raw}"),
    })
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError {
        status: StatusCode::UNPROCESSABLE_ENTITY,
        detail: e.to_string(),
    })
}

/// Form-style decoding: `+` is a space, then percent escapes
fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " ")).ok().map(|s| s.into_owned())
}

fn query_value(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (decode_component(key)? == name).then(|| decode_component(value)).flatten()
    })
}

fn query_i64(query: Option<&str>, name: &str) -> Result<Option<i64>, ApiError> {
    query_value(query, name).map(|raw| parse_id(&raw)).transpose()
}

fn query_f64(query: Option<&str>, name: &str) -> Result<Option<f64>, ApiError> {
    query_value(query, name)
        .map(|raw| {
            raw.parse::<f64>().map_err(|_| ApiError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                detail: format!("invalid {name}: {raw}"),
            })
        })
        .transpose()
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    world: SharedWorld,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            let detail = serde_json::json!({ "detail": format!("failed to read body: {e}") });
            return Ok(json_response(StatusCode::BAD_REQUEST, &detail));
        }
    };
    let path = parts.uri.path();
    let (status, value) = world.lock().handle(&parts.method, path, parts.uri.query(), &body);
    debug!(method = %parts.method, path = %path, status = %status.as_u16(), "mock_request");
    Ok(json_response(status, &value))
}

/// Accept connections until `shutdown` flips to true
pub async fn serve(
    listener: TcpListener,
    world: SharedWorld,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "mock_gateway_listening");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _peer)) => {
                        let io = TokioIo::new(stream);
                        let world = world.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| handle_request(req, world.clone()));
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "mock_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "mock_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("mock_gateway_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Advance running simulations every `period` of wall time
pub async fn run_ticker(world: SharedWorld, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f64();
                last = now;
                world.lock().advance(dt);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// A mock gateway bound to loopback, for tests and local runs
pub struct MockServerHandle {
    pub addr: SocketAddr,
    pub world: SharedWorld,
    shutdown_tx: watch::Sender<bool>,
}

impl MockServerHandle {
    /// Origin to hand to `HttpGateway::new`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for MockServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind `addr`, then spawn the server and (if `tick` is set) the ticker
pub async fn spawn(
    addr: SocketAddr,
    world: SharedWorld,
    tick: Option<Duration>,
) -> anyhow::Result<MockServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Some(period) = tick {
        tokio::spawn(run_ticker(world.clone(), period, shutdown_rx.clone()));
    }
    let server_world = world.clone();
    tokio::spawn(async move {
        if let Err(e) = serve(listener, server_world, shutdown_rx).await {
            error!(error = %e, "mock_gateway_failed");
        }
    });

    Ok(MockServerHandle { addr, world, shutdown_tx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(world: &mut MockWorld, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        world.handle(&Method::POST, path, None, body.to_string().as_bytes())
    }

    fn get(world: &mut MockWorld, path: &str, query: Option<&str>) -> (StatusCode, serde_json::Value) {
        world.handle(&Method::GET, path, query, b"")
    }

    fn start(world: &mut MockWorld, id: i64) {
        let (status, _) = post(
            world,
            "/api/simulation/start",
            serde_json::json!({"intersection_id": id, "duration": 60, "speed_factor": 1.0}),
        );
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn test_lists_filter_by_city() {
        let mut world = MockWorld::seeded();
        let (status, all) = get(&mut world, "/api/intersections", None);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(all.as_array().map(Vec::len), Some(4));

        let (_, mumbai) = get(&mut world, "/api/intersections", Some("city_id=2"));
        let names: Vec<&str> = mumbai
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|i| i["name"].as_str())
            .collect();
        assert_eq!(names, vec!["VT - Bandra", "Churchgate - CST"]);
    }

    #[test]
    fn test_unknown_entities() {
        let mut world = MockWorld::seeded();
        assert_eq!(get(&mut world, "/api/cities/99", None).0, StatusCode::NOT_FOUND);
        let (status, body) = get(&mut world, "/api/intersections/99", None);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Intersection not found");
        let (status, _) = post(
            &mut world,
            "/api/simulation/start",
            serde_json::json!({"intersection_id": 99, "duration": 60, "speed_factor": 1.0}),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_inject_returns_created_and_respects_capacity() {
        let mut world = MockWorld::seeded();
        let body = serde_json::json!({
            "vehicle_type": "AMBULANCE", "intersection_id": 1, "lane_id": 1, "is_emergency": true
        });
        let (status, vehicle) = post(&mut world, "/api/vehicles/inject", body.clone());
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(vehicle["state"], "WAITING");
        assert_eq!(vehicle["is_emergency"], true);
        assert_eq!(world.requests().last().and_then(|r| r.body.clone()), Some(body.clone()));

        for _ in 1..LANE_CAPACITY {
            assert_eq!(post(&mut world, "/api/vehicles/inject", body.clone()).0, StatusCode::CREATED);
        }
        let (status, err) = post(&mut world, "/api/vehicles/inject", body);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["detail"], "Lane is at capacity");

        let (status, err) = post(
            &mut world,
            "/api/vehicles/inject",
            serde_json::json!({"vehicle_type": "CAR", "intersection_id": 1, "lane_id": 9}),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["detail"], "Lane not found");
    }

    #[test]
    fn test_step_requires_running_simulation() {
        let mut world = MockWorld::seeded();
        let (status, err) = post(&mut world, "/api/simulation/step/1", serde_json::Value::Null);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["detail"], "Simulation not running");

        start(&mut world, 1);
        let (status, ack) =
            world.handle(&Method::POST, "/api/simulation/step/1", Some("dt=0.5"), b"");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["status"], "stepped");
        assert_eq!(ack["simulation_time"], 0.5);
    }

    #[test]
    fn test_running_simulation_spawns_and_moves_vehicles() {
        let mut world = MockWorld::seeded();
        start(&mut world, 1);
        for _ in 0..50 {
            world.advance(0.1);
        }
        assert!(world.active_vehicles(IntersectionId(1)) >= 2);
        assert_eq!(world.active_vehicles(IntersectionId(2)), 0);

        let metrics = world.metrics(IntersectionId(1)).unwrap();
        assert!(metrics.is_running);
        assert!((metrics.simulation_time - 5.0).abs() < 1e-6);
        assert_eq!(metrics.lanes.len(), 4);
        assert_eq!(metrics.signals.len(), 2);
        assert!(metrics.congestion_score.value() <= 100.0);
    }

    #[test]
    fn test_simulation_finishes_after_duration() {
        let mut world = MockWorld::seeded();
        start(&mut world, 1);
        world.advance(61.0);
        assert!(!world.is_running(IntersectionId(1)));
    }

    #[test]
    fn test_vehicles_exit_on_green() {
        let mut world = MockWorld::seeded();
        start(&mut world, 1);
        // East lane starts green
        world.add_vehicle(IntersectionId(1), LaneId(3), VehicleType::TwoWheeler, false);
        for _ in 0..200 {
            world.step_intersection(IntersectionId(1), 0.1);
        }
        let metrics = world.metrics(IntersectionId(1)).unwrap();
        assert!(metrics.vehicles_exited >= 1);
        assert!(metrics.vehicles_per_minute > 0.0);
    }

    #[test]
    fn test_optimize_reports_timings_and_emergency() {
        let mut world = MockWorld::seeded();
        world.add_vehicle(IntersectionId(1), LaneId(1), VehicleType::Bus, false);
        world.add_vehicle(IntersectionId(1), LaneId(2), VehicleType::Police, true);

        let report = world.optimize(IntersectionId(1)).unwrap();
        assert_eq!(report.status, "optimized");
        assert!(report.emergency_detected);
        assert_eq!(report.optimized_timings.len(), 2);
        // All congestion is on the NS approach
        assert_eq!(report.optimized_timings.get("11"), Some(&50));
        assert_eq!(report.optimized_timings.get("12"), Some(&MIN_GREEN_SECS));
    }

    #[test]
    fn test_faults_fail_routes_independently() {
        let mut world = MockWorld::seeded();
        world.faults.fail_vehicles = true;
        assert_eq!(get(&mut world, "/api/vehicles", Some("intersection_id=1")).0, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(get(&mut world, "/api/simulation/metrics/1", None).0, StatusCode::OK);
    }

    #[test]
    fn test_query_value() {
        assert_eq!(query_value(Some("city_id=3&x=1"), "city_id").as_deref(), Some("3"));
        assert_eq!(query_value(Some("x=1"), "city_id"), None);
        assert_eq!(query_value(None, "city_id"), None);
        assert_eq!(query_value(Some("city%5Fid=%34%32"), "city_id").as_deref(), Some("42"));
        assert_eq!(query_value(Some("dt=%2B0.5"), "dt").as_deref(), Some("+0.5"));
        assert_eq!(query_value(Some("dt=%FF"), "dt"), None);
    }

    #[test]
    fn test_step_rejects_invalid_dt() {
        let mut world = MockWorld::seeded();
        start(&mut world, 1);

        for query in ["dt=NaN", "dt=-1", "dt=0", "dt=inf"] {
            let (status, err) = world.handle(&Method::POST, "/api/simulation/step/1", Some(query), b"");
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{query}");
            assert!(err["detail"].as_str().unwrap().starts_with("dt must be a positive number"), "{query}");
        }

        let (status, ack) = world.handle(&Method::POST, "/api/simulation/step/1", Some("dt=0%2E25"), b"");
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["simulation_time"], 0.25);
    }
}
