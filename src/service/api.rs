//! HTTP API for clients, operators and monitoring
//!
//! This module provides the frontend HTTP surface of the service using Axum:
//! ticket creation and assignment polling for clients, profile management
//! for operators, plus health checks and Prometheus metrics.

use crate::error::Result;
use crate::profile::MatchProfile;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use crate::types::{CreateTicketRequest, CreateTicketResponse, TicketId};
use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to bind to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the API server
#[derive(Clone)]
struct ApiState {
    app_state: Arc<AppState>,
}

/// HTTP server exposing the frontend, operator and monitoring endpoints
pub struct ApiServer {
    config: ApiServerConfig,
    state: ApiState,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, app_state: Arc<AppState>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: ApiState { app_state },
            shutdown_tx,
        }
    }

    /// Start serving; completes on shutdown
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid API server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr).await?;

        info!("API server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API server shutdown signal received");
            })
            .await?;

        info!("API server stopped");
        Ok(())
    }

    /// Create the Axum router with all endpoints
    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/v1/tickets", post(create_ticket_handler))
            .route(
                "/v1/tickets/{id}/assignment",
                get(get_assignment_handler),
            )
            .route("/v1/tickets/{id}", delete(cancel_ticket_handler))
            .route(
                "/v1/profiles",
                put(register_profile_handler).get(list_profiles_handler),
            )
            .route("/health", get(health_handler))
            .route("/alive", get(alive_handler))
            .route("/ready", get(ready_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    /// Stop the API server
    pub fn stop(&self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("API server was not running when stop was requested");
        }
    }
}

/// Root endpoint handler - shows service information
async fn root_handler() -> impl IntoResponse {
    let info = json!({
        "service": "rallypoint",
        "version": crate::VERSION,
        "endpoints": [
            "/v1/tickets",
            "/v1/tickets/{id}/assignment",
            "/v1/profiles",
            "/health",
            "/ready",
            "/alive",
            "/metrics",
            "/stats"
        ]
    });

    Json(info)
}

/// Reject obviously malformed search fields before they enter the pool
fn validate_create(request: &CreateTicketRequest) -> std::result::Result<(), String> {
    if request.search_fields.tags.iter().any(|tag| tag.trim().is_empty()) {
        return Err("Tags cannot be empty strings".to_string());
    }
    for (key, value) in &request.search_fields.numeric_args {
        if !value.is_finite() {
            return Err(format!("Numeric argument '{}' must be finite", key));
        }
    }
    Ok(())
}

/// Create a new ticket
async fn create_ticket_handler(
    State(state): State<ApiState>,
    Json(request): Json<CreateTicketRequest>,
) -> impl IntoResponse {
    if let Err(reason) = validate_create(&request) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response();
    }

    match state
        .app_state
        .store()
        .create(request.search_fields, request.extensions)
    {
        Ok(ticket) => {
            debug!("Created ticket {} via API", ticket.id);
            (
                StatusCode::OK,
                Json(json!(CreateTicketResponse { id: ticket.id })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Poll a ticket's assignment
///
/// Returns an empty connection while the ticket is unmatched and 404 once it
/// is unknown (never created, cancelled or expired).
async fn get_assignment_handler(
    State(state): State<ApiState>,
    Path(id): Path<TicketId>,
) -> impl IntoResponse {
    match state.app_state.store().get_assignment(id) {
        Ok(Some(assignment)) => (StatusCode::OK, Json(json!(assignment))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Ticket {} not found", id) })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Cancel a ticket
async fn cancel_ticket_handler(
    State(state): State<ApiState>,
    Path(id): Path<TicketId>,
) -> impl IntoResponse {
    match state.app_state.store().cancel(id) {
        Ok(true) => (StatusCode::OK, Json(json!({ "cancelled": true }))).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Ticket {} not found", id) })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Register or replace a match profile
async fn register_profile_handler(
    State(state): State<ApiState>,
    Json(profile): Json<MatchProfile>,
) -> impl IntoResponse {
    let name = profile.name.clone();
    match state.app_state.registry().register(profile) {
        Ok(()) => (StatusCode::OK, Json(json!({ "registered": name }))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// List all registered profiles
async fn list_profiles_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match state.app_state.registry().list() {
        Ok(profiles) => (StatusCode::OK, Json(json!(profiles))).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Comprehensive health check endpoint handler
async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    debug!("Health check requested");

    match HealthCheck::check(state.app_state.clone()).await {
        Ok(health) => {
            let code = match health.status {
                HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
                HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            };
            (code, Json(json!(health))).into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Liveness probe handler
async fn alive_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match HealthCheck::liveness_check(state.app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "alive").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not alive").into_response(),
    }
}

/// Readiness probe handler
async fn ready_handler(State(state): State<ApiState>) -> impl IntoResponse {
    match HealthCheck::readiness_check(state.app_state.clone()).await {
        Ok(HealthStatus::Healthy) | Ok(HealthStatus::Degraded) => {
            (StatusCode::OK, "ready").into_response()
        }
        _ => (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response(),
    }
}

/// Prometheus metrics exposition handler
async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let registry = state.app_state.metrics().registry();
    let metric_families = registry.gather();

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (StatusCode::OK, buffer).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// JSON statistics handler
async fn stats_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let store_stats = state.app_state.store().stats();
    let director_stats = state.app_state.director().stats();

    match (store_stats, director_stats) {
        (Ok(store), Ok(director)) => (
            StatusCode::OK,
            Json(json!({
                "store": {
                    "tickets_created": store.tickets_created,
                    "tickets_assigned": store.tickets_assigned,
                    "tickets_expired": store.tickets_expired,
                    "tickets_cancelled": store.tickets_cancelled,
                    "reserve_conflicts": store.reserve_conflicts,
                    "reservations_reverted": store.reservations_reverted,
                    "pending_tickets": store.pending_tickets,
                    "reserved_tickets": store.reserved_tickets,
                    "assigned_tickets": store.assigned_tickets,
                },
                "director": {
                    "ticks_completed": director.ticks_completed,
                    "proposals_seen": director.proposals_seen,
                    "matches_assigned": director.matches_assigned,
                    "tickets_assigned": director.tickets_assigned,
                    "allocation_failures": director.allocation_failures,
                    "stale_proposals": director.stale_proposals,
                    "profile_failures": director.profile_failures,
                },
            })),
        )
            .into_response(),
        (Err(e), _) | (_, Err(e)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
