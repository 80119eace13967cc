//! Shared types for the junction console
//!
//! Every entity here is owned by the remote simulator. The console never
//! originates identity; it only deserializes what the gateway returns and
//! serializes the few request bodies the gateway accepts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Newtype wrapper for city IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CityId(pub i64);

impl std::fmt::Display for CityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for intersection IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct IntersectionId(pub i64);

impl std::fmt::Display for IntersectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for lane IDs to provide type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct LaneId(pub i64);

impl std::fmt::Display for LaneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
    pub id: CityId,
    pub name: String,
    pub state: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub population: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    pub id: IntersectionId,
    pub name: String,
    pub city_id: CityId,
    pub latitude: f64,
    pub longitude: f64,
    pub num_lanes: u32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VehicleType {
    Car,
    Bus,
    Truck,
    TwoWheeler,
    Auto,
    Ambulance,
    FireEngine,
    Police,
}

impl VehicleType {
    /// Injector order, matching the selector in the operator console
    pub const ALL: [VehicleType; 8] = [
        VehicleType::Car,
        VehicleType::Bus,
        VehicleType::Truck,
        VehicleType::TwoWheeler,
        VehicleType::Auto,
        VehicleType::Ambulance,
        VehicleType::FireEngine,
        VehicleType::Police,
    ];

    /// Wire name (e.g. `TWO_WHEELER`)
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Car => "CAR",
            VehicleType::Bus => "BUS",
            VehicleType::Truck => "TRUCK",
            VehicleType::TwoWheeler => "TWO_WHEELER",
            VehicleType::Auto => "AUTO",
            VehicleType::Ambulance => "AMBULANCE",
            VehicleType::FireEngine => "FIRE_ENGINE",
            VehicleType::Police => "POLICE",
        }
    }

    /// Human label (underscores become spaces)
    pub fn label(&self) -> String {
        self.as_str().replace('_', " ")
    }

    /// Single-letter glyph drawn on the vehicle marker
    pub fn glyph(&self) -> char {
        self.as_str().chars().next().unwrap_or('?')
    }

    /// Types the remote always treats as priority traffic
    pub fn is_emergency_service(&self) -> bool {
        matches!(self, VehicleType::Ambulance | VehicleType::FireEngine | VehicleType::Police)
    }

    pub fn parse(s: &str) -> Option<Self> {
        let wanted = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Self::ALL.into_iter().find(|t| t.as_str() == wanted)
    }

    /// Next type in injector order, wrapping around
    pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|t| t == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl std::fmt::Display for VehicleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VehicleState {
    Waiting,
    Moving,
    Stopped,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: i64,
    pub vehicle_id: String,
    pub vehicle_type: VehicleType,
    #[serde(default)]
    pub intersection_id: Option<IntersectionId>,
    #[serde(default)]
    pub lane_id: Option<LaneId>,
    pub position: f64,
    pub speed: f64,
    pub state: VehicleState,
    #[serde(default)]
    pub is_emergency: bool,
    #[serde(default)]
    pub waiting_time: f64,
}

/// Congestion score guaranteed to lie in [0, 100]
///
/// Finite out-of-range values are clamped on decode. NaN and infinities are
/// rejected, which fails the whole payload.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct CongestionScore(f64);

impl CongestionScore {
    pub const MAX: f64 = 100.0;

    /// Clamp a finite raw score into range; `None` for NaN/infinite input
    pub fn new(raw: f64) -> Option<Self> {
        if !raw.is_finite() {
            return None;
        }
        Some(Self(raw.clamp(0.0, Self::MAX)))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn severity(&self) -> Severity {
        Severity::from_score(self.0)
    }
}

impl TryFrom<f64> for CongestionScore {
    type Error = String;

    fn try_from(raw: f64) -> Result<Self, Self::Error> {
        let score = Self::new(raw).ok_or_else(|| format!("congestion score {raw} is not finite"))?;
        if score.0 != raw {
            warn!(raw = %raw, clamped = %score.0, "congestion_score_clamped");
        }
        Ok(score)
    }
}

impl From<CongestionScore> for f64 {
    fn from(score: CongestionScore) -> f64 {
        score.0
    }
}

/// Congestion severity band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub const LOW_BELOW: f64 = 30.0;
    pub const MEDIUM_BELOW: f64 = 60.0;

    pub fn from_score(score: f64) -> Self {
        if score < Self::LOW_BELOW {
            Severity::Low
        } else if score < Self::MEDIUM_BELOW {
            Severity::Medium
        } else {
            Severity::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneMetrics {
    pub lane_id: LaneId,
    pub lane_name: String,
    pub vehicle_count: u32,
    pub congestion_score: CongestionScore,
    pub avg_wait_time: f64,
    pub throughput: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetrics {
    pub signal_id: i64,
    pub signal_name: String,
    pub state: SignalState,
    pub remaining_time: f64,
    pub green_duration: u32,
    pub is_optimized: bool,
}

/// Point-in-time snapshot of one intersection's simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    pub simulation_time: f64,
    #[serde(default)]
    pub is_running: bool,
    pub total_vehicles: u32,
    pub vehicles_exited: u32,
    pub avg_waiting_time: f64,
    #[serde(default)]
    pub total_waiting_time: f64,
    pub congestion_score: CongestionScore,
    pub vehicles_per_minute: f64,
    #[serde(default)]
    pub lanes: Vec<LaneMetrics>,
    #[serde(default)]
    pub signals: Vec<SignalMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] =
        [Direction::North, Direction::South, Direction::East, Direction::West];

    pub fn label(&self) -> &'static str {
        match self {
            Direction::North => "North",
            Direction::South => "South",
            Direction::East => "East",
            Direction::West => "West",
        }
    }

    /// Lane id the injector submits for this approach (North=1 .. West=4)
    pub fn preset_lane(&self) -> LaneId {
        match self {
            Direction::North => LaneId(1),
            Direction::South => LaneId(2),
            Direction::East => LaneId(3),
            Direction::West => LaneId(4),
        }
    }

    /// Approach arm for a lane id, cycling N/S/E/W for ids beyond the presets
    pub fn for_lane(lane: LaneId) -> Self {
        Self::ALL[lane.0.wrapping_sub(1).rem_euclid(4) as usize]
    }

    pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|d| d == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub id: LaneId,
    pub name: String,
    pub intersection_id: IntersectionId,
    pub direction: Direction,
    pub capacity: u32,
    pub length: f64,
    pub width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalState {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub name: String,
    pub state: SignalState,
    pub remaining_time: f64,
    pub green_duration: u32,
    pub is_optimized: bool,
}

// ============================================================================
// Request / acknowledgement payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSimulationRequest {
    pub intersection_id: IntersectionId,
    pub duration: u32,
    pub speed_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectVehicleRequest {
    pub vehicle_type: VehicleType,
    pub intersection_id: IntersectionId,
    pub lane_id: LaneId,
    #[serde(default)]
    pub is_emergency: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StepRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dt: Option<f64>,
}

/// Generic acknowledgement for start / stop / step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationAck {
    pub status: String,
    #[serde(default)]
    pub intersection_id: Option<IntersectionId>,
    #[serde(default)]
    pub simulation_time: Option<f64>,
}

/// Result of a signal re-timing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeReport {
    pub status: String,
    pub intersection_id: IntersectionId,
    /// Signal id -> optimized green seconds
    #[serde(default)]
    pub optimized_timings: BTreeMap<String, u32>,
    #[serde(default)]
    pub emergency_detected: bool,
}
