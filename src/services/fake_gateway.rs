//! Scriptable in-process gateway for unit tests

use crate::domain::types::{
    City, CityId, CongestionScore, InjectVehicleRequest, Intersection, IntersectionId,
    OptimizeReport, SimulationAck, SimulationMetrics, StartSimulationRequest, Vehicle,
    VehicleState, VehicleType,
};
use crate::io::gateway::{
    validate_inject, validate_intersection, validate_start, validate_step, GatewayError,
    SimulationGateway,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

/// Records every call as `"op:id"` and fails the operations named in `failing`
pub(crate) struct FakeGateway {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
    vehicles: Mutex<Vec<Vehicle>>,
    congestion: Mutex<f64>,
}

impl FakeGateway {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            vehicles: Mutex::new(Vec::new()),
            congestion: Mutex::new(10.0),
        }
    }

    pub(crate) fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub(crate) fn recover(&self, op: &'static str) {
        self.failing.lock().remove(op);
    }

    pub(crate) fn set_congestion(&self, score: f64) {
        *self.congestion.lock() = score;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.calls.lock().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    pub(crate) fn count_for(&self, op: &str, id: i64) -> usize {
        let wanted = format!("{op}:{id}");
        self.calls.lock().iter().filter(|c| **c == wanted).count()
    }

    fn enter(&self, op: &'static str, id: impl std::fmt::Display) -> Result<(), GatewayError> {
        self.calls.lock().push(format!("{op}:{id}"));
        if self.failing.lock().contains(op) {
            return Err(GatewayError::Status { status: 503, detail: format!("{op} unavailable") });
        }
        Ok(())
    }
}

pub(crate) fn intersection(id: i64, city: i64, latitude: f64, longitude: f64) -> Intersection {
    Intersection {
        id: IntersectionId(id),
        name: format!("Junction {id}"),
        city_id: CityId(city),
        latitude,
        longitude,
        num_lanes: 4,
        description: None,
    }
}

pub(crate) fn city(id: i64, name: &str) -> City {
    City {
        id: CityId(id),
        name: name.to_string(),
        state: "Karnataka".to_string(),
        latitude: None,
        longitude: None,
        description: None,
        population: None,
    }
}

pub(crate) fn metrics_with_score(score: f64) -> SimulationMetrics {
    SimulationMetrics {
        simulation_time: 12.0,
        is_running: true,
        total_vehicles: 3,
        vehicles_exited: 1,
        avg_waiting_time: 2.5,
        total_waiting_time: 5.0,
        congestion_score: CongestionScore::new(score).unwrap_or_default(),
        vehicles_per_minute: 4.8,
        lanes: Vec::new(),
        signals: Vec::new(),
    }
}

#[async_trait]
impl SimulationGateway for FakeGateway {
    async fn list_cities(&self) -> Result<Vec<City>, GatewayError> {
        self.enter("list_cities", "*")?;
        Ok(vec![city(1, "Bangalore"), city(2, "Mumbai")])
    }

    async fn get_city(&self, id: CityId) -> Result<City, GatewayError> {
        self.enter("get_city", id)?;
        Ok(city(id.0, "Bangalore"))
    }

    async fn list_intersections(
        &self,
        city: Option<CityId>,
    ) -> Result<Vec<Intersection>, GatewayError> {
        let city = city.map_or(0, |c| c.0);
        self.enter("list_intersections", city)?;
        Ok(vec![
            intersection(city * 10 + 1, city, 12.93, 77.62),
            intersection(city * 10 + 2, city, 12.97, 77.59),
        ])
    }

    async fn get_intersection(&self, id: IntersectionId) -> Result<Intersection, GatewayError> {
        self.enter("get_intersection", id)?;
        Ok(intersection(id.0, 1, 12.93, 77.62))
    }

    async fn list_vehicles(
        &self,
        intersection: Option<IntersectionId>,
    ) -> Result<Vec<Vehicle>, GatewayError> {
        self.enter("list_vehicles", intersection.map_or(0, |i| i.0))?;
        Ok(self.vehicles.lock().clone())
    }

    async fn inject_vehicle(&self, req: &InjectVehicleRequest) -> Result<Vehicle, GatewayError> {
        validate_inject(req)?;
        self.enter("inject_vehicle", req.intersection_id)?;
        let mut vehicles = self.vehicles.lock();
        let vehicle = Vehicle {
            id: vehicles.len() as i64 + 1,
            vehicle_id: format!("{}-{}", req.vehicle_type, vehicles.len() + 1),
            vehicle_type: req.vehicle_type,
            intersection_id: Some(req.intersection_id),
            lane_id: Some(req.lane_id),
            position: 0.0,
            speed: 0.0,
            state: VehicleState::Waiting,
            is_emergency: req.is_emergency || req.vehicle_type == VehicleType::Ambulance,
            waiting_time: 0.0,
        };
        vehicles.push(vehicle.clone());
        Ok(vehicle)
    }

    async fn start_simulation(
        &self,
        req: &StartSimulationRequest,
    ) -> Result<SimulationAck, GatewayError> {
        validate_start(req)?;
        self.enter("start_simulation", req.intersection_id)?;
        Ok(SimulationAck {
            status: "started".to_string(),
            intersection_id: Some(req.intersection_id),
            simulation_time: None,
        })
    }

    async fn stop_simulation(&self, id: IntersectionId) -> Result<SimulationAck, GatewayError> {
        validate_intersection(id)?;
        self.enter("stop_simulation", id)?;
        Ok(SimulationAck { status: "stopped".to_string(), intersection_id: Some(id), simulation_time: None })
    }

    async fn optimize_signals(&self, id: IntersectionId) -> Result<OptimizeReport, GatewayError> {
        validate_intersection(id)?;
        self.enter("optimize_signals", id)?;
        Ok(OptimizeReport {
            status: "optimized".to_string(),
            intersection_id: id,
            optimized_timings: BTreeMap::from([("1".to_string(), 35), ("2".to_string(), 15)]),
            emergency_detected: false,
        })
    }

    async fn get_metrics(&self, id: IntersectionId) -> Result<SimulationMetrics, GatewayError> {
        self.enter("get_metrics", id)?;
        Ok(metrics_with_score(*self.congestion.lock()))
    }

    async fn step_simulation(
        &self,
        id: IntersectionId,
        dt: Option<f64>,
    ) -> Result<SimulationAck, GatewayError> {
        validate_intersection(id)?;
        validate_step(dt)?;
        self.enter("step_simulation", id)?;
        Ok(SimulationAck { status: "stepped".to_string(), intersection_id: None, simulation_time: Some(0.1) })
    }
}
