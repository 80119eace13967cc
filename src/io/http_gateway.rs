//! JSON-over-HTTP implementation of the simulation gateway
//!
//! All routes live under `<base_url>/api`. Non-2xx responses are mapped to
//! `GatewayError::Status`, carrying the server's `{"detail": ...}` text when present.

use crate::domain::types::{
    City, CityId, InjectVehicleRequest, Intersection, IntersectionId, OptimizeReport,
    SimulationAck, SimulationMetrics, StartSimulationRequest, StepRequest, Vehicle,
};
use crate::io::gateway::{
    validate_inject, validate_intersection, validate_start, validate_step, GatewayError,
    SimulationGateway,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const API_PREFIX: &str = "/api";
const NO_QUERY: [(&str, i64); 0] = [];

/// Log a failed round trip (cold path)
#[cold]
fn log_request_failed(method: &str, path: &str, e: &GatewayError) {
    warn!(method = %method, path = %path, error = %e, "gateway_request_failed");
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

fn error_detail(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { detail: serde_json::Value::String(s) }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

pub struct HttpGateway {
    client: reqwest::Client,
    api_root: String,
}

impl HttpGateway {
    /// `base_url` is the origin without the `/api` prefix
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| GatewayError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, api_root: format!("{}{}", base_url.trim_end_matches('/'), API_PREFIX) })
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status: status.as_u16(), detail: error_detail(&body) });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, i64)],
    ) -> Result<T, GatewayError> {
        let start = Instant::now();
        let result = async {
            let response = self.client.get(self.url(path)).query(query).send().await?;
            Self::decode(response).await
        }
        .await;
        debug!(path = %path, latency_ms = %start.elapsed().as_millis(), ok = result.is_ok(), "gateway_get");
        if let Err(ref e) = result {
            log_request_failed("GET", path, e);
        }
        result
    }

    async fn post<Q: Serialize + ?Sized, B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Q,
        body: Option<&B>,
    ) -> Result<T, GatewayError> {
        let start = Instant::now();
        let result = async {
            let mut request = self.client.post(self.url(path)).query(query);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            Self::decode(response).await
        }
        .await;
        debug!(path = %path, latency_ms = %start.elapsed().as_millis(), ok = result.is_ok(), "gateway_post");
        if let Err(ref e) = result {
            log_request_failed("POST", path, e);
        }
        result
    }
}

#[async_trait]
impl SimulationGateway for HttpGateway {
    async fn list_cities(&self) -> Result<Vec<City>, GatewayError> {
        self.get("/cities", &[]).await
    }

    async fn get_city(&self, id: CityId) -> Result<City, GatewayError> {
        self.get(&format!("/cities/{}", id), &[]).await
    }

    async fn list_intersections(
        &self,
        city: Option<CityId>,
    ) -> Result<Vec<Intersection>, GatewayError> {
        match city {
            Some(city) => self.get("/intersections", &[("city_id", city.0)]).await,
            None => self.get("/intersections", &[]).await,
        }
    }

    async fn get_intersection(&self, id: IntersectionId) -> Result<Intersection, GatewayError> {
        self.get(&format!("/intersections/{}", id), &[]).await
    }

    async fn list_vehicles(
        &self,
        intersection: Option<IntersectionId>,
    ) -> Result<Vec<Vehicle>, GatewayError> {
        match intersection {
            Some(id) => self.get("/vehicles", &[("intersection_id", id.0)]).await,
            None => self.get("/vehicles", &[]).await,
        }
    }

    async fn inject_vehicle(&self, req: &InjectVehicleRequest) -> Result<Vehicle, GatewayError> {
        validate_inject(req)?;
        self.post("/vehicles/inject", &NO_QUERY, Some(req)).await
    }

    async fn start_simulation(
        &self,
        req: &StartSimulationRequest,
    ) -> Result<SimulationAck, GatewayError> {
        validate_start(req)?;
        self.post("/simulation/start", &NO_QUERY, Some(req)).await
    }

    async fn stop_simulation(&self, id: IntersectionId) -> Result<SimulationAck, GatewayError> {
        validate_intersection(id)?;
        self.post(&format!("/simulation/stop/{}", id), &NO_QUERY, None::<&()>).await
    }

    async fn optimize_signals(&self, id: IntersectionId) -> Result<OptimizeReport, GatewayError> {
        validate_intersection(id)?;
        self.post(&format!("/simulation/optimize/{}", id), &NO_QUERY, None::<&()>).await
    }

    async fn get_metrics(&self, id: IntersectionId) -> Result<SimulationMetrics, GatewayError> {
        self.get(&format!("/simulation/metrics/{}", id), &[]).await
    }

    async fn step_simulation(
        &self,
        id: IntersectionId,
        dt: Option<f64>,
    ) -> Result<SimulationAck, GatewayError> {
        validate_intersection(id)?;
        validate_step(dt)?;
        // dt travels as a query parameter; the route takes no body
        self.post(&format!("/simulation/step/{}", id), &StepRequest { dt }, None::<&()>).await
    }
}
