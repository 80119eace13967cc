//! Integration tests: HttpGateway against the mock gateway over loopback

use junction_console::domain::types::{
    CityId, InjectVehicleRequest, IntersectionId, LaneId, StartSimulationRequest, VehicleState,
    VehicleType,
};
use junction_console::io::mock_server::{self, MockServerHandle, MockWorld};
use junction_console::io::{GatewayError, HttpGateway, SimulationGateway};
use std::time::Duration;

async fn setup() -> (MockServerHandle, HttpGateway) {
    let server = mock_server::spawn("127.0.0.1:0".parse().unwrap(), MockWorld::seeded().shared(), None)
        .await
        .unwrap();
    let gateway = HttpGateway::new(&server.base_url(), Duration::from_secs(5)).unwrap();
    (server, gateway)
}

fn start_request(id: i64) -> StartSimulationRequest {
    StartSimulationRequest { intersection_id: IntersectionId(id), duration: 60, speed_factor: 1.0 }
}

#[tokio::test]
async fn test_lists_and_lookups() {
    let (_server, gateway) = setup().await;

    let cities = gateway.list_cities().await.unwrap();
    assert_eq!(cities.len(), 2);
    assert_eq!(cities[0].name, "Bangalore");

    let city = gateway.get_city(CityId(2)).await.unwrap();
    assert_eq!(city.state, "Maharashtra");

    let all = gateway.list_intersections(None).await.unwrap();
    assert_eq!(all.len(), 4);
    let bangalore = gateway.list_intersections(Some(CityId(1))).await.unwrap();
    assert_eq!(bangalore.iter().map(|i| i.id).collect::<Vec<_>>(), [IntersectionId(1), IntersectionId(2)]);

    let junction = gateway.get_intersection(IntersectionId(3)).await.unwrap();
    assert_eq!(junction.name, "VT - Bandra");
    assert_eq!(junction.num_lanes, 4);
}

#[tokio::test]
async fn test_unknown_intersection_is_not_found() {
    let (_server, gateway) = setup().await;

    let err = gateway.get_intersection(IntersectionId(99)).await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
    match err {
        GatewayError::Status { detail, .. } => assert_eq!(detail, "Intersection not found"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_inject_sends_expected_body() {
    let (server, gateway) = setup().await;

    let req = InjectVehicleRequest {
        vehicle_type: VehicleType::Ambulance,
        intersection_id: IntersectionId(1),
        lane_id: LaneId(1),
        is_emergency: true,
    };
    let vehicle = gateway.inject_vehicle(&req).await.unwrap();
    assert_eq!(vehicle.vehicle_type, VehicleType::Ambulance);
    assert_eq!(vehicle.lane_id, Some(LaneId(1)));
    assert_eq!(vehicle.state, VehicleState::Waiting);
    assert!(vehicle.is_emergency);

    let world = server.world.lock();
    let sent = world
        .requests()
        .iter()
        .find(|r| r.path == "/api/vehicles/inject")
        .and_then(|r| r.body.clone())
        .unwrap();
    assert_eq!(
        sent,
        serde_json::json!({
            "vehicle_type": "AMBULANCE",
            "intersection_id": 1,
            "lane_id": 1,
            "is_emergency": true,
        })
    );
    assert_eq!(world.active_vehicles(IntersectionId(1)), 1);
}

#[tokio::test]
async fn test_inject_into_unknown_lane_reports_detail() {
    let (_server, gateway) = setup().await;

    let req = InjectVehicleRequest {
        vehicle_type: VehicleType::Car,
        intersection_id: IntersectionId(1),
        lane_id: LaneId(9),
        is_emergency: false,
    };
    let err = gateway.inject_vehicle(&req).await.unwrap_err();
    match err {
        GatewayError::Status { status, detail } => {
            assert_eq!(status, 400);
            assert_eq!(detail, "Lane not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_simulation_lifecycle() {
    let (server, gateway) = setup().await;

    let ack = gateway.start_simulation(&start_request(1)).await.unwrap();
    assert_eq!(ack.status, "started");
    assert!(server.world.lock().is_running(IntersectionId(1)));

    let metrics = gateway.get_metrics(IntersectionId(1)).await.unwrap();
    assert!(metrics.is_running);
    assert_eq!(metrics.lanes.len(), 4);
    assert_eq!(metrics.signals.len(), 2);
    assert!(metrics.congestion_score.value() <= 100.0);

    let report = gateway.optimize_signals(IntersectionId(1)).await.unwrap();
    assert_eq!(report.optimized_timings.len(), 2);
    assert!(report.optimized_timings.contains_key("11"));
    assert!(!report.emergency_detected);

    let ack = gateway.stop_simulation(IntersectionId(1)).await.unwrap();
    assert_eq!(ack.status, "stopped");
    assert_eq!(ack.intersection_id, Some(IntersectionId(1)));
    assert!(!server.world.lock().is_running(IntersectionId(1)));
}

#[tokio::test]
async fn test_step_sends_dt_as_query() {
    let (server, gateway) = setup().await;

    let err = gateway.step_simulation(IntersectionId(2), Some(0.5)).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 400, ref detail } if detail == "Simulation not running"));

    gateway.start_simulation(&start_request(2)).await.unwrap();
    let ack = gateway.step_simulation(IntersectionId(2), Some(0.5)).await.unwrap();
    assert!(ack.simulation_time.is_some());

    let world = server.world.lock();
    let step = world
        .requests()
        .iter()
        .rev()
        .find(|r| r.path == "/api/simulation/step/2")
        .unwrap();
    assert_eq!(step.query.as_deref(), Some("dt=0.5"));
    assert!(step.body.is_none());
}

#[tokio::test]
async fn test_start_for_unknown_intersection_is_rejected() {
    let (_server, gateway) = setup().await;

    let err = gateway.start_simulation(&start_request(42)).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 400, ref detail } if detail == "Intersection not found"));
}

#[tokio::test]
async fn test_vehicle_fault_leaves_metrics_route_alone() {
    let (server, gateway) = setup().await;
    server.world.lock().faults.fail_vehicles = true;

    let err = gateway.list_vehicles(Some(IntersectionId(1))).await.unwrap_err();
    assert!(matches!(err, GatewayError::Status { status: 503, .. }));
    assert!(gateway.get_metrics(IntersectionId(1)).await.is_ok());

    server.world.lock().faults.fail_vehicles = false;
    assert!(gateway.list_vehicles(Some(IntersectionId(1))).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_gateway_is_a_network_error() {
    let (server, _) = setup().await;
    let base_url = server.base_url();
    server.shutdown();
    drop(server);
    // Give the accept loop a moment to close the listener
    tokio::time::sleep(Duration::from_millis(50)).await;

    let gateway = HttpGateway::new(&base_url, Duration::from_millis(500)).unwrap();
    let err = gateway.list_cities().await.unwrap_err();
    assert!(matches!(err, GatewayError::Network(_)), "{err:?}");
}
