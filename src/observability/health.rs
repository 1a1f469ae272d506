//! Health check and fleet read API over HTTP
//!
//! Serves probe endpoints for orchestration and read-only JSON views of the
//! fleet store for dashboards and operators.

use crate::fleet::FleetStore;
use crate::observability::metrics::metrics;
use crate::protocol::current_timestamp_ms;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// A robot whose last heartbeat is older than this is reported stale
pub const HEARTBEAT_STALENESS_MS: u64 = 30_000;

/// HTTP health check server
pub struct HealthServer {
    service_id: String,
    port: u16,
    store: FleetStore,
    additional_checks: Arc<RwLock<HashMap<String, HealthCheck>>>,
}

impl HealthServer {
    /// Create new health server reading from `store`
    pub fn new(service_id: impl Into<String>, port: u16, store: FleetStore) -> Self {
        Self {
            service_id: service_id.into(),
            port,
            store,
            additional_checks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Add custom health check
    pub async fn add_health_check(&self, name: String, check: HealthCheck) {
        let mut checks = self.additional_checks.write().await;
        checks.insert(name, check);
    }

    /// Remove health check
    pub async fn remove_health_check(&self, name: &str) {
        let mut checks = self.additional_checks.write().await;
        checks.remove(name);
    }

    /// All routes, with CORS open for browser dashboards
    pub fn routes(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let ready_server = self.clone();
        let fleet_server = self.clone();
        let summary_server = self;

        // GET /health - overall status with detailed checks
        let health_route = warp::path!("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let status = server.get_health_status().await;
                let status_code = if status.status == "healthy" {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&status),
                    status_code,
                ))
            }
        });

        // GET /metrics - counter snapshot
        let metrics_route = warp::path!("metrics").and(warp::get()).and_then(|| async move {
            Ok::<_, Infallible>(warp::reply::json(&metrics().get_metrics()))
        });

        // GET /ready - readiness probe
        let ready_route = warp::path!("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let connection_status = server.store.connection_status();
                let ready = connection_status.is_connected();
                let response = ReadinessResponse {
                    ready,
                    connection_status: connection_status.to_string(),
                    timestamp: current_timestamp(),
                };
                let status_code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&response),
                    status_code,
                ))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path!("live").and(warp::get()).and_then(|| async move {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        // GET /fleet - full state snapshot
        let fleet_route = warp::path!("fleet").and(warp::get()).and_then(move || {
            let server = fleet_server.clone();
            async move { Ok::<_, Infallible>(warp::reply::json(&server.store.snapshot())) }
        });

        // GET /fleet/summary - aggregate counts
        let summary_route = warp::path!("fleet" / "summary")
            .and(warp::get())
            .and_then(move || {
                let server = summary_server.clone();
                async move { Ok::<_, Infallible>(warp::reply::json(&server.store.summary())) }
            });

        // GET / - API documentation
        let root_route = warp::path::end().and(warp::get()).and_then(|| async move {
            let endpoints: HashMap<String, String> = [
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Ingestion, connection and command counters"),
                ("/ready", "Readiness probe, ready while the broker connection is up"),
                ("/live", "Liveness probe"),
                ("/fleet", "Full fleet state snapshot"),
                ("/fleet/summary", "Fleet summary counts"),
            ]
            .into_iter()
            .map(|(path, description)| (path.to_string(), description.to_string()))
            .collect();

            Ok::<_, Infallible>(warp::reply::json(&ApiDocumentationResponse { endpoints }))
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(summary_route)
            .or(fleet_route)
            .or(root_route)
            .with(warp::cors().allow_any_origin())
    }

    /// Start the HTTP server; runs until the task is dropped
    pub async fn start(self: Arc<Self>) {
        let port = self.port;
        tracing::info!("Starting health server on port {}", port);
        warp::serve(self.routes()).run(([0, 0, 0, 0], port)).await;
    }

    /// Overall status follows the broker connection; other checks are
    /// informational
    async fn get_health_status(&self) -> HealthStatus {
        let mqtt_check = self.check_mqtt_health();
        let overall_status = if mqtt_check.status == "healthy" {
            "healthy"
        } else {
            "degraded"
        };

        let mut checks = HashMap::new();
        checks.insert("mqtt".to_string(), mqtt_check);
        checks.insert("heartbeats".to_string(), self.check_heartbeat_health());

        let additional = self.additional_checks.read().await;
        for (name, check) in additional.iter() {
            checks.insert(name.clone(), check.clone());
        }

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: current_timestamp(),
            service_id: self.service_id.clone(),
            connection_status: self.store.connection_status().to_string(),
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }

    fn check_mqtt_health(&self) -> HealthCheck {
        let status = self.store.connection_status();
        if status.is_connected() {
            HealthCheck::new("healthy", "MQTT connection established")
        } else {
            HealthCheck::new("unhealthy", format!("MQTT connection {status}"))
        }
    }

    fn check_heartbeat_health(&self) -> HealthCheck {
        let snapshot = self.store.snapshot();
        if snapshot.heartbeats.is_empty() {
            return HealthCheck::new("healthy", "No heartbeats received yet");
        }

        let stale = snapshot.stale_robots(current_timestamp_ms(), HEARTBEAT_STALENESS_MS);
        if stale.is_empty() {
            HealthCheck::new("healthy", "All robots reporting")
        } else {
            HealthCheck::new(
                "stale",
                format!("No heartbeat for {}s from: {}", HEARTBEAT_STALENESS_MS / 1000, stale.join(", ")),
            )
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    pub fn new(status: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    service_id: String,
    connection_status: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    connection_status: String,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct ApiDocumentationResponse {
    endpoints: HashMap<String, String>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
