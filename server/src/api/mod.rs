//! API Router and Application State
//!
//! Everything except `/health` sits behind the admission gate. Requests that
//! pass are answered by a placeholder handler standing in for the chat
//! application proper.

use axum::{
    extract::State, http::Method, http::Uri, middleware::from_fn_with_state, routing::get, Json,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    ratelimit::{admission_gate, AdmissionController, ParameterSnapshot, SharedParameters},
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Admission controller
    pub admission: AdmissionController,
    /// Live burst-detection parameters
    pub parameters: SharedParameters,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, admission: AdmissionController, parameters: SharedParameters) -> Self {
        Self {
            config: Arc::new(config),
            admission,
            parameters,
        }
    }
}

/// Create the main application router.
///
/// # Security
///
/// `/api/admin/admission` and `/api/admin/admission/parameters` expose tracked
/// key counts and the live burst thresholds. This router does no
/// authentication; an upstream auth layer must restrict these routes to
/// operators, the same layer that sets the `Privilege` extension read by
/// [`admission_gate`].
pub fn create_router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/api/admin/admission", get(admission_stats))
        .route("/api/admin/admission/parameters", get(current_parameters))
        .fallback(accepted)
        .layer(from_fn_with_state(state.admission.clone(), admission_gate));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(gated)
        // Middleware
        .layer(TraceLayer::new_for_http())
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Whether admission control is enabled
    admission_control: bool,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        admission_control: state.config.admission.enabled,
    })
}

#[derive(Serialize)]
struct AdmissionStats {
    tracked_keys: usize,
    damped: bool,
}

/// Tracked key count and feedback mode. Operators only; see [`create_router`].
async fn admission_stats(State(state): State<AppState>) -> Json<AdmissionStats> {
    Json(AdmissionStats {
        tracked_keys: state.admission.tracked_keys(),
        damped: state.admission.config().damped,
    })
}

/// Live burst-detection thresholds. Operators only; see [`create_router`].
async fn current_parameters(State(state): State<AppState>) -> Json<ParameterSnapshot> {
    Json(state.parameters.current().as_ref().clone())
}

#[derive(Serialize)]
struct Accepted {
    status: &'static str,
    method: String,
    path: String,
}

/// Placeholder for the downstream application.
async fn accepted(method: Method, uri: Uri) -> Json<Accepted> {
    Json(Accepted {
        status: "accepted",
        method: method.to_string(),
        path: uri.path().to_string(),
    })
}
