//! Tests for the Session reducer

use super::*;
use crate::domain::types::{CongestionScore, LaneId, VehicleState};
use crate::services::dispatcher::Control;
use crate::services::fake_gateway::{city, intersection, metrics_with_score};
use crate::services::poller::{Origin, PollPayload, PollTicket};

fn session() -> Session {
    Session::new(SimulationSettings { duration_secs: 300, speed_factor: 1.0 })
}

/// Session with cities loaded, city 1 selected and its intersections ready
fn overview_ready() -> Session {
    let mut s = session();
    s.reduce(Action::LoadCities);
    s.reduce(Action::CitiesLoaded(Ok(vec![city(1, "Bangalore"), city(2, "Mumbai")])));
    s.reduce(Action::IntersectionsLoaded {
        city: CityId(1),
        result: Ok(vec![intersection(11, 1, 12.93, 77.62), intersection(12, 1, 12.97, 77.59)]),
    });
    s
}

fn in_detail(id: i64) -> Session {
    let mut s = overview_ready();
    s.reduce(Action::OpenIntersection(IntersectionId(id)));
    s
}

fn running(id: i64) -> Session {
    let mut s = in_detail(id);
    let effects = s.reduce(Action::StartSimulation);
    let Some(Effect::Execute(command)) = effects.into_iter().next() else {
        panic!("start did not produce a command");
    };
    s.reduce(Action::CommandFinished {
        command,
        result: Ok(CommandOutcome::Started(ack("started"))),
    });
    s
}

fn ack(status: &str) -> crate::domain::types::SimulationAck {
    crate::domain::types::SimulationAck {
        status: status.to_string(),
        intersection_id: None,
        simulation_time: None,
    }
}

fn unavailable() -> GatewayError {
    GatewayError::Status { status: 503, detail: "simulation engine unavailable".to_string() }
}

fn vehicle(id: i64) -> Vehicle {
    Vehicle {
        id,
        vehicle_id: format!("CAR-{id}"),
        vehicle_type: VehicleType::Car,
        intersection_id: Some(IntersectionId(11)),
        lane_id: Some(LaneId(1)),
        position: 10.0,
        speed: 5.0,
        state: VehicleState::Moving,
        is_emergency: false,
        waiting_time: 0.0,
    }
}

fn vehicles_update(intersection: i64, seq: u64, result: Result<Vec<Vehicle>, GatewayError>) -> PollUpdate {
    PollUpdate {
        ticket: PollTicket {
            intersection: IntersectionId(intersection),
            origin: Origin::Tick { generation: 1 },
            seq,
        },
        payload: PollPayload::Vehicles(result),
    }
}

fn metrics_update(intersection: i64, seq: u64, score: f64) -> PollUpdate {
    PollUpdate {
        ticket: PollTicket { intersection: IntersectionId(intersection), origin: Origin::OutOfBand { epoch: 0 }, seq },
        payload: PollPayload::Metrics(Ok(metrics_with_score(score))),
    }
}

// ============================================================================
// Overview
// ============================================================================

#[test]
fn test_first_city_is_auto_selected() {
    let mut s = session();
    assert_eq!(s.reduce(Action::LoadCities), vec![Effect::FetchCities]);
    assert!(s.overview().cities.is_loading());

    let effects = s.reduce(Action::CitiesLoaded(Ok(vec![city(1, "Bangalore"), city(2, "Mumbai")])));
    assert_eq!(effects, vec![Effect::FetchIntersections(CityId(1))]);
    assert_eq!(s.overview().selected_city, Some(CityId(1)));
    assert_eq!(s.overview().selected_city().map(|c| c.name.as_str()), Some("Bangalore"));
}

#[test]
fn test_city_failure_blocks_until_retry() {
    let mut s = session();
    s.reduce(Action::LoadCities);
    s.reduce(Action::CitiesLoaded(Err(GatewayError::Network("connection refused".into()))));
    assert!(s.overview().cities.error().is_some_and(|e| e.contains("connection refused")));

    assert_eq!(s.reduce(Action::LoadCities), vec![Effect::FetchCities]);
    assert!(s.overview().cities.is_loading());
}

#[test]
fn test_selecting_city_clears_intersection_selection() {
    let mut s = overview_ready();
    s.reduce(Action::SelectIntersection(IntersectionId(11)));
    assert_eq!(s.overview().selected_intersection, Some(IntersectionId(11)));

    let effects = s.reduce(Action::SelectCity(CityId(2)));
    assert_eq!(effects, vec![Effect::FetchIntersections(CityId(2))]);
    assert_eq!(s.overview().selected_intersection, None);
    assert!(s.overview().intersections.is_loading());
}

#[test]
fn test_stale_intersection_list_is_ignored() {
    let mut s = overview_ready();
    s.reduce(Action::SelectCity(CityId(2)));
    // City 1's late answer must not overwrite the list being loaded for city 2
    s.reduce(Action::IntersectionsLoaded {
        city: CityId(1),
        result: Ok(vec![intersection(11, 1, 0.0, 0.0)]),
    });
    assert!(s.overview().intersections.is_loading());
}

#[test]
fn test_unknown_intersection_cannot_be_selected() {
    let mut s = overview_ready();
    s.reduce(Action::SelectIntersection(IntersectionId(99)));
    assert_eq!(s.overview().selected_intersection, None);
    assert!(s.reduce(Action::OpenDetail).is_empty());
    assert_eq!(s.view(), View::Overview);
}

// ============================================================================
// Detail transitions
// ============================================================================

#[test]
fn test_open_detail_requires_selection() {
    let mut s = overview_ready();
    s.reduce(Action::SelectIntersection(IntersectionId(12)));
    let effects = s.reduce(Action::OpenDetail);
    assert_eq!(s.view(), View::Detail(IntersectionId(12)));
    assert_eq!(
        effects,
        vec![
            Effect::FetchIntersection(IntersectionId(12)),
            Effect::Refresh(IntersectionId(12), Refresh::Both)
        ]
    );
    let detail = s.detail().unwrap();
    assert!(!detail.running);
    assert!(detail.intersection.is_loading());
}

#[test]
fn test_back_discards_detail_and_stops_polling() {
    let mut s = running(11);
    let effects = s.reduce(Action::Back);
    assert_eq!(effects, vec![Effect::StopPolling]);
    assert_eq!(s.view(), View::Overview);
    assert!(s.detail().is_none());
    assert_eq!(s.overview().selected_intersection, None);
}

#[test]
fn test_switching_intersection_resets_detail() {
    let mut s = running(11);
    s.reduce(Action::Poll(vehicles_update(11, 5, Ok(vec![vehicle(1)]))));

    let effects = s.reduce(Action::OpenIntersection(IntersectionId(12)));
    assert_eq!(effects[0], Effect::StopPolling);
    let detail = s.detail().unwrap();
    assert_eq!(detail.intersection_id, IntersectionId(12));
    assert!(!detail.running);
    assert!(detail.vehicles.is_empty());
    assert!(detail.metrics.is_none());
}

#[test]
fn test_reopening_same_intersection_is_a_no_op() {
    let mut s = running(11);
    assert!(s.reduce(Action::OpenIntersection(IntersectionId(11))).is_empty());
    assert!(s.detail().unwrap().running);
}

#[test]
fn test_intersection_failure_and_retry() {
    let mut s = in_detail(11);
    s.reduce(Action::IntersectionLoaded { id: IntersectionId(11), result: Err(unavailable()) });
    assert!(s.detail().unwrap().intersection.error().is_some());

    let effects = s.reduce(Action::RetryIntersection);
    assert_eq!(effects, vec![Effect::FetchIntersection(IntersectionId(11))]);

    s.reduce(Action::IntersectionLoaded {
        id: IntersectionId(11),
        result: Ok(intersection(11, 1, 12.93, 77.62)),
    });
    assert_eq!(s.detail().unwrap().intersection.ready().map(|i| i.id), Some(IntersectionId(11)));
}

// ============================================================================
// Commands
// ============================================================================

#[test]
fn test_start_success_sets_running_and_starts_polling() {
    let mut s = in_detail(11);
    let effects = s.reduce(Action::StartSimulation);
    let expected = Command::Start(crate::domain::types::StartSimulationRequest {
        intersection_id: IntersectionId(11),
        duration: 300,
        speed_factor: 1.0,
    });
    assert_eq!(effects, vec![Effect::Execute(expected.clone())]);
    // Not flipped before confirmation
    assert!(!s.detail().unwrap().running);
    assert!(s.detail().unwrap().in_flight.is_busy(Control::RunToggle));

    let effects = s.reduce(Action::CommandFinished {
        command: expected,
        result: Ok(CommandOutcome::Started(ack("started"))),
    });
    assert_eq!(
        effects,
        vec![
            Effect::StartPolling(IntersectionId(11)),
            Effect::Refresh(IntersectionId(11), Refresh::Both)
        ]
    );
    assert!(s.detail().unwrap().running);
    assert!(s.detail().unwrap().in_flight.is_idle());
}

#[test]
fn test_failed_start_leaves_running_false_and_alerts() {
    let mut s = in_detail(11);
    let Some(Effect::Execute(command)) = s.reduce(Action::StartSimulation).into_iter().next() else {
        panic!("expected a start command");
    };
    let effects = s.reduce(Action::CommandFinished { command, result: Err(unavailable()) });
    assert!(effects.is_empty());
    assert!(!s.detail().unwrap().running);
    let alert = s.alerts().back().unwrap();
    assert_eq!(alert.level, AlertLevel::Error);
    assert!(alert.message.starts_with("Failed to start simulation"));
}

#[test]
fn test_double_submission_is_refused() {
    let mut s = in_detail(11);
    assert_eq!(s.reduce(Action::InjectVehicle).len(), 1);
    assert!(s.reduce(Action::InjectVehicle).is_empty());
    // Other controls stay available
    assert_eq!(s.reduce(Action::OptimizeSignals).len(), 1);
}

#[test]
fn test_stop_only_when_running() {
    let mut s = in_detail(11);
    assert!(s.reduce(Action::StopSimulation).is_empty());

    let mut s = running(11);
    assert!(s.reduce(Action::StartSimulation).is_empty());
    let effects = s.reduce(Action::StopSimulation);
    assert_eq!(effects, vec![Effect::Execute(Command::Stop(IntersectionId(11)))]);

    let effects = s.reduce(Action::CommandFinished {
        command: Command::Stop(IntersectionId(11)),
        result: Ok(CommandOutcome::Stopped(ack("stopped"))),
    });
    assert_eq!(effects, vec![Effect::StopPolling]);
    assert!(!s.detail().unwrap().running);
}

#[test]
fn test_failed_stop_keeps_running() {
    let mut s = running(11);
    s.reduce(Action::StopSimulation);
    s.reduce(Action::CommandFinished {
        command: Command::Stop(IntersectionId(11)),
        result: Err(unavailable()),
    });
    assert!(s.detail().unwrap().running);
    assert!(s.alerts().back().unwrap().message.starts_with("Failed to stop simulation"));
}

#[test]
fn test_inject_uses_form_and_refreshes_vehicles() {
    let mut s = in_detail(42);
    s.reduce(Action::SetVehicleType(VehicleType::Ambulance));
    s.reduce(Action::SetDirection(Direction::North));
    s.reduce(Action::SetEmergency(true));

    let effects = s.reduce(Action::InjectVehicle);
    let request = InjectVehicleRequest {
        vehicle_type: VehicleType::Ambulance,
        intersection_id: IntersectionId(42),
        lane_id: LaneId(1),
        is_emergency: true,
    };
    assert_eq!(effects, vec![Effect::Execute(Command::Inject(request.clone()))]);

    let effects = s.reduce(Action::CommandFinished {
        command: Command::Inject(request),
        result: Ok(CommandOutcome::Injected(vehicle(9))),
    });
    assert_eq!(effects, vec![Effect::Refresh(IntersectionId(42), Refresh::Vehicles)]);
}

#[test]
fn test_optimize_stores_report_and_informs() {
    let mut s = in_detail(11);
    s.reduce(Action::OptimizeSignals);
    let report = OptimizeReport {
        status: "optimized".to_string(),
        intersection_id: IntersectionId(11),
        optimized_timings: [("21".to_string(), 40), ("22".to_string(), 10)].into_iter().collect(),
        emergency_detected: true,
    };
    s.reduce(Action::CommandFinished {
        command: Command::Optimize(IntersectionId(11)),
        result: Ok(CommandOutcome::Optimized(report.clone())),
    });
    assert_eq!(s.detail().unwrap().last_optimization.as_ref(), Some(&report));
    let alert = s.alerts().back().unwrap();
    assert_eq!(alert.level, AlertLevel::Info);
    assert!(alert.message.contains("2 timings"));
    assert!(alert.message.contains("emergency"));
}

#[test]
fn test_command_result_for_closed_detail_is_ignored() {
    let mut s = in_detail(11);
    let Some(Effect::Execute(command)) = s.reduce(Action::StartSimulation).into_iter().next() else {
        panic!("expected a start command");
    };
    s.reduce(Action::OpenIntersection(IntersectionId(12)));
    let effects = s.reduce(Action::CommandFinished {
        command,
        result: Ok(CommandOutcome::Started(ack("started"))),
    });
    assert!(effects.is_empty());
    assert!(!s.detail().unwrap().running);
}

#[test]
fn test_alerts_are_bounded() {
    let mut s = in_detail(11);
    for _ in 0..(MAX_ALERTS + 3) {
        s.reduce(Action::StepSimulation);
        s.reduce(Action::CommandFinished {
            command: Command::Step { intersection: IntersectionId(11), dt: None },
            result: Err(unavailable()),
        });
    }
    assert_eq!(s.alerts().len(), MAX_ALERTS);
    s.reduce(Action::DismissAlert);
    assert_eq!(s.alerts().len(), MAX_ALERTS - 1);
}

// ============================================================================
// Poll updates
// ============================================================================

#[test]
fn test_poll_replaces_snapshot_wholesale() {
    let mut s = running(11);
    assert_eq!(s.apply_poll(vehicles_update(11, 1, Ok(vec![vehicle(1), vehicle(2)]))), PollApplied::Applied);
    assert_eq!(s.apply_poll(vehicles_update(11, 2, Ok(vec![vehicle(3)]))), PollApplied::Applied);
    let ids: Vec<i64> = s.detail().unwrap().vehicles.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![3]);
}

#[test]
fn test_out_of_order_response_is_discarded() {
    let mut s = running(11);
    assert_eq!(s.apply_poll(metrics_update(11, 8, 75.0)), PollApplied::Applied);
    assert_eq!(s.apply_poll(metrics_update(11, 6, 10.0)), PollApplied::Stale);
    let score = s.detail().unwrap().metrics.as_ref().map(|m| m.congestion_score);
    assert_eq!(score, CongestionScore::new(75.0));
}

#[test]
fn test_failure_keeps_last_good_value() {
    let mut s = running(11);
    s.apply_poll(vehicles_update(11, 1, Ok(vec![vehicle(1)])));
    assert_eq!(s.apply_poll(vehicles_update(11, 2, Err(unavailable()))), PollApplied::Failed);
    assert_eq!(s.detail().unwrap().vehicles.len(), 1);
    // Failures never raise operator alerts
    assert!(s.alerts().is_empty());
}

#[test]
fn test_vehicle_and_metrics_sequences_are_independent() {
    let mut s = running(11);
    assert_eq!(s.apply_poll(vehicles_update(11, 10, Ok(vec![vehicle(1)]))), PollApplied::Applied);
    assert_eq!(s.apply_poll(metrics_update(11, 9, 45.0)), PollApplied::Applied);
}

#[test]
fn test_update_for_other_intersection_is_stale() {
    let mut s = running(11);
    assert_eq!(s.apply_poll(vehicles_update(12, 1, Ok(vec![vehicle(1)]))), PollApplied::Stale);

    s.reduce(Action::Back);
    assert_eq!(s.apply_poll(metrics_update(11, 2, 10.0)), PollApplied::Stale);
}
