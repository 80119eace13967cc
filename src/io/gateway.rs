//! Remote simulation gateway contract
//!
//! Typed request/response boundary to the remote simulator's `/api`.
//! Everything above this layer holds an `Arc<dyn SimulationGateway>`.

use crate::domain::types::{
    City, CityId, InjectVehicleRequest, Intersection, IntersectionId, OptimizeReport,
    SimulationAck, SimulationMetrics, StartSimulationRequest, Vehicle,
};
use async_trait::async_trait;
use thiserror::Error;

/// Accepted run length for a start request (seconds)
pub const DURATION_RANGE_SECS: std::ops::RangeInclusive<u32> = 10..=3600;
/// Accepted playback speed multiplier for a start request
pub const SPEED_FACTOR_RANGE: std::ops::RangeInclusive<f64> = 0.1..=10.0;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error("gateway returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// True for 404 responses
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Status { status: 404, .. })
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

#[async_trait]
pub trait SimulationGateway: Send + Sync {
    async fn list_cities(&self) -> Result<Vec<City>, GatewayError>;

    async fn get_city(&self, id: CityId) -> Result<City, GatewayError>;

    async fn list_intersections(
        &self,
        city: Option<CityId>,
    ) -> Result<Vec<Intersection>, GatewayError>;

    async fn get_intersection(&self, id: IntersectionId) -> Result<Intersection, GatewayError>;

    async fn list_vehicles(
        &self,
        intersection: Option<IntersectionId>,
    ) -> Result<Vec<Vehicle>, GatewayError>;

    async fn inject_vehicle(&self, req: &InjectVehicleRequest) -> Result<Vehicle, GatewayError>;

    async fn start_simulation(
        &self,
        req: &StartSimulationRequest,
    ) -> Result<SimulationAck, GatewayError>;

    async fn stop_simulation(&self, id: IntersectionId) -> Result<SimulationAck, GatewayError>;

    async fn optimize_signals(&self, id: IntersectionId) -> Result<OptimizeReport, GatewayError>;

    async fn get_metrics(&self, id: IntersectionId) -> Result<SimulationMetrics, GatewayError>;

    async fn step_simulation(
        &self,
        id: IntersectionId,
        dt: Option<f64>,
    ) -> Result<SimulationAck, GatewayError>;
}

fn check_id(name: &str, raw: i64) -> Result<(), GatewayError> {
    if raw <= 0 {
        return Err(GatewayError::InvalidRequest(format!("{name} must be positive, got {raw}")));
    }
    Ok(())
}

/// Reject start requests the remote schema would refuse
pub fn validate_start(req: &StartSimulationRequest) -> Result<(), GatewayError> {
    check_id("intersection_id", req.intersection_id.0)?;
    if !DURATION_RANGE_SECS.contains(&req.duration) {
        return Err(GatewayError::InvalidRequest(format!(
            "duration must be within {}..={} seconds, got {}",
            DURATION_RANGE_SECS.start(),
            DURATION_RANGE_SECS.end(),
            req.duration
        )));
    }
    if !SPEED_FACTOR_RANGE.contains(&req.speed_factor) {
        return Err(GatewayError::InvalidRequest(format!(
            "speed_factor must be within {}..={}, got {}",
            SPEED_FACTOR_RANGE.start(),
            SPEED_FACTOR_RANGE.end(),
            req.speed_factor
        )));
    }
    Ok(())
}

pub fn validate_inject(req: &InjectVehicleRequest) -> Result<(), GatewayError> {
    check_id("intersection_id", req.intersection_id.0)?;
    check_id("lane_id", req.lane_id.0)
}

pub fn validate_intersection(id: IntersectionId) -> Result<(), GatewayError> {
    check_id("intersection_id", id.0)
}

pub fn validate_step(dt: Option<f64>) -> Result<(), GatewayError> {
    match dt {
        Some(dt) if !(dt.is_finite() && dt > 0.0) => {
            Err(GatewayError::InvalidRequest(format!("dt must be a positive number, got {dt}")))
        }
        _ => Ok(()),
    }
}
