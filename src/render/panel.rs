//! Live metrics panel model

use crate::domain::types::{Severity, SignalState, SimulationMetrics, Vehicle, VehicleState};
use crate::render::palette::{severity_color, Rgb};

pub const NO_METRICS: &str = "No metrics available";
pub const NO_VEHICLES: &str = "No active vehicles";

#[derive(Debug, Clone, PartialEq)]
pub struct MetricCard {
    pub label: &'static str,
    pub value: String,
    pub subtext: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CongestionBar {
    /// Fill width in percent, always within [0, 100]
    pub percent: f64,
    pub severity: Severity,
    pub color: Rgb,
}

impl CongestionBar {
    pub fn label(&self) -> String {
        format!("{:.1}%", self.percent)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleSummary {
    pub moving: usize,
    pub stopped: usize,
    pub waiting: usize,
    pub emergency: usize,
}

impl VehicleSummary {
    pub fn count(vehicles: &[Vehicle]) -> Self {
        vehicles.iter().fold(Self::default(), |mut s, v| {
            match v.state {
                VehicleState::Moving => s.moving += 1,
                VehicleState::Stopped => s.stopped += 1,
                VehicleState::Waiting => s.waiting += 1,
                VehicleState::Exited => {}
            }
            if v.is_emergency {
                s.emergency += 1;
            }
            s
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaneRow {
    pub name: String,
    pub vehicles: u32,
    pub congestion: CongestionBar,
    pub avg_wait_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalRow {
    pub name: String,
    pub state: SignalState,
    pub remaining_secs: f64,
    pub green_secs: u32,
    pub optimized: bool,
}

/// Everything derived from one metrics snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub cards: [MetricCard; 4],
    pub congestion: CongestionBar,
    pub simulation_time: String,
    /// `None` when the vehicle list is empty
    pub vehicles: Option<VehicleSummary>,
    pub lanes: Vec<LaneRow>,
    pub signals: Vec<SignalRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricsPanel {
    pub running: bool,
    /// `None` until the first snapshot arrives
    pub snapshot: Option<Snapshot>,
}

fn congestion_bar(score: f64) -> CongestionBar {
    let percent = score.clamp(0.0, 100.0);
    let severity = Severity::from_score(percent);
    CongestionBar { percent, severity, color: severity_color(severity) }
}

impl MetricsPanel {
    pub fn build(metrics: Option<&SimulationMetrics>, vehicles: &[Vehicle], running: bool) -> Self {
        let snapshot = metrics.map(|m| Snapshot {
            cards: [
                MetricCard {
                    label: "Total Vehicles",
                    value: m.total_vehicles.to_string(),
                    subtext: "Active in intersection",
                },
                MetricCard {
                    label: "Exited Vehicles",
                    value: m.vehicles_exited.to_string(),
                    subtext: "Left intersection",
                },
                MetricCard {
                    label: "Avg Wait Time",
                    value: format!("{:.1}s", m.avg_waiting_time),
                    subtext: "Per vehicle",
                },
                MetricCard {
                    label: "Vehicles/Min",
                    value: format!("{:.1}", m.vehicles_per_minute),
                    subtext: "Throughput",
                },
            ],
            congestion: congestion_bar(m.congestion_score.value()),
            simulation_time: format!("{:.1}s", m.simulation_time),
            vehicles: (!vehicles.is_empty()).then(|| VehicleSummary::count(vehicles)),
            lanes: m
                .lanes
                .iter()
                .map(|l| LaneRow {
                    name: l.lane_name.clone(),
                    vehicles: l.vehicle_count,
                    congestion: congestion_bar(l.congestion_score.value()),
                    avg_wait_secs: l.avg_wait_time,
                })
                .collect(),
            signals: m
                .signals
                .iter()
                .map(|s| SignalRow {
                    name: s.signal_name.clone(),
                    state: s.state,
                    remaining_secs: s.remaining_time,
                    green_secs: s.green_duration,
                    optimized: s.is_optimized,
                })
                .collect(),
        });
        Self { running, snapshot }
    }

    pub fn status_label(&self) -> &'static str {
        if self.running {
            "Simulation Running"
        } else {
            "Simulation Stopped"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{CongestionScore, LaneId, LaneMetrics, VehicleType};
    use crate::render::palette::{SEVERITY_HIGH, SEVERITY_LOW, SEVERITY_MEDIUM};

    fn metrics(score: f64) -> SimulationMetrics {
        SimulationMetrics {
            simulation_time: 12.34,
            is_running: true,
            total_vehicles: 5,
            vehicles_exited: 2,
            avg_waiting_time: 3.4,
            total_waiting_time: 17.0,
            congestion_score: CongestionScore::new(score).unwrap(),
            vehicles_per_minute: 9.96,
            lanes: vec![LaneMetrics {
                lane_id: LaneId(1),
                lane_name: "North Lane".to_string(),
                vehicle_count: 3,
                congestion_score: CongestionScore::new(10.0).unwrap(),
                avg_wait_time: 1.5,
                throughput: 0.0,
            }],
            signals: Vec::new(),
        }
    }

    fn vehicle(state: VehicleState, is_emergency: bool) -> Vehicle {
        Vehicle {
            id: 1,
            vehicle_id: "V-1".to_string(),
            vehicle_type: VehicleType::Car,
            intersection_id: None,
            lane_id: None,
            position: 0.0,
            speed: 0.0,
            state,
            is_emergency,
            waiting_time: 0.0,
        }
    }

    fn band(score: f64) -> (Severity, Rgb) {
        let panel = MetricsPanel::build(Some(&metrics(score)), &[], true);
        let bar = panel.snapshot.unwrap().congestion;
        (bar.severity, bar.color)
    }

    #[test]
    fn test_congestion_severity_bands() {
        assert_eq!(band(75.0), (Severity::High, SEVERITY_HIGH));
        assert_eq!(band(45.0), (Severity::Medium, SEVERITY_MEDIUM));
        assert_eq!(band(10.0), (Severity::Low, SEVERITY_LOW));
    }

    #[test]
    fn test_no_metrics_placeholder() {
        let panel = MetricsPanel::build(None, &[vehicle(VehicleState::Moving, false)], false);
        assert!(panel.snapshot.is_none());
        assert_eq!(panel.status_label(), "Simulation Stopped");
    }

    #[test]
    fn test_cards_and_formatting() {
        let panel = MetricsPanel::build(Some(&metrics(42.0)), &[], true);
        let snapshot = panel.snapshot.unwrap();
        assert_eq!(snapshot.cards[0].value, "5");
        assert_eq!(snapshot.cards[2].value, "3.4s");
        assert_eq!(snapshot.cards[3].value, "10.0");
        assert_eq!(snapshot.simulation_time, "12.3s");
        assert_eq!(snapshot.congestion.label(), "42.0%");
        assert_eq!(snapshot.lanes[0].congestion.severity, Severity::Low);
        assert!(snapshot.vehicles.is_none());
    }

    #[test]
    fn test_vehicle_summary_counts() {
        let vehicles = [
            vehicle(VehicleState::Moving, false),
            vehicle(VehicleState::Moving, true),
            vehicle(VehicleState::Stopped, false),
            vehicle(VehicleState::Waiting, false),
        ];
        let summary = VehicleSummary::count(&vehicles);
        assert_eq!(summary, VehicleSummary { moving: 2, stopped: 1, waiting: 1, emergency: 1 });
    }
}
