//! HTTP surface: agent attempts, admin environment controls, the sponsor
//! economy, and role-gated observer reads.

pub mod error;
pub mod observer;
pub mod rest;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use sqlx::PgPool;

use terrarium_gate::ActionGate;
use terrarium_physics::PhysicsEngine;
use terrarium_pressure::PressureLedger;

pub struct AppState {
    pub pool: PgPool,
    pub gate: ActionGate,
    pub engine: PhysicsEngine,
    pub ledger: PressureLedger,
    pub chronicle_page_cap: u32,
}

impl AppState {
    pub fn new(pool: PgPool, chronicle_page_cap: u32) -> Self {
        Self {
            gate: ActionGate::new(pool.clone()),
            engine: PhysicsEngine::new(pool.clone()),
            ledger: PressureLedger::new(pool.clone()),
            pool,
            chronicle_page_cap,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Agent surface
        .route("/agents/{id}/attempt", post(rest::attempt))
        // Operator surface
        .route("/admin/agents", post(rest::create_agent))
        .route("/admin/environment/{deployment}", put(rest::override_environment))
        .route("/admin/environment/{deployment}/apply-regime/{name}", post(rest::apply_regime))
        .route("/admin/environment/{deployment}/tick", post(rest::tick))
        .route("/admin/regimes", post(rest::create_regime))
        .route("/admin/regimes/{name}", put(rest::update_regime))
        .route("/admin/regimes/{name}", delete(rest::delete_regime))
        // Sponsor surface
        .route("/sponsors/{id}/credits", post(rest::purchase_credits))
        .route("/sponsors/{id}/pressures", post(rest::create_pressure))
        .route("/sponsors/{id}/pressures", get(rest::list_pressures))
        .route("/sponsors/{id}/pressures/{pid}", get(rest::get_pressure))
        .route("/sponsors/{id}/pressures/{pid}/cancel", post(rest::cancel_pressure))
        // Observer surface
        .route("/deployments/{deployment}/pressure", get(rest::braid_view))
        .route("/chronicle", get(rest::chronicle))
        .route("/chronicle/debug", get(rest::chronicle_debug))
        .route("/system/event-lag", get(rest::event_lag))
        .route("/system/projection-health", get(rest::projection_health))
        .with_state(state)
        // Logging layer: method + path only, no query params
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}
