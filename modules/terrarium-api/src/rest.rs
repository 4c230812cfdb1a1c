//! REST handlers. Thin: parse, delegate to the owning crate, map errors.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use terrarium_common::{Agent, CognitionAvailability, EnvironmentState, ObserverRole, Regime, SponsorPressure};
use terrarium_events::EventStore;
use terrarium_gate::{AttemptRequest, AttemptResponse};
use terrarium_pressure::{braid, BraidView, CreatePressure};
use terrarium_projector::materializer::{
    self, ChronicleDebugRow, ChronicleEntry, CONSUMER_GROUP,
};

use crate::error::ApiError;
use crate::observer::{Observer, Operator};
use crate::AppState;

// ---------------------------------------------------------------------------
// Agent surface
// ---------------------------------------------------------------------------

pub async fn attempt(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<Uuid>,
    Json(req): Json<AttemptRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let response = state.gate.attempt(agent_id, &req).await?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Operator surface
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateAgentBody {
    pub handle: String,
    pub deployment_target: String,
    #[serde(default)]
    pub sponsor_id: Option<Uuid>,
    #[serde(default = "default_max_balance")]
    pub max_balance: f64,
    #[serde(default = "default_regen")]
    pub regen_per_hour: f64,
}

fn default_max_balance() -> f64 {
    100.0
}

fn default_regen() -> f64 {
    10.0
}

pub async fn create_agent(
    _operator: Operator,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAgentBody>,
) -> Result<Json<Agent>, ApiError> {
    let agent = state
        .gate
        .provision_agent(
            &body.handle,
            &body.deployment_target,
            body.sponsor_id,
            body.max_balance,
            body.regen_per_hour,
        )
        .await?;
    Ok(Json(agent))
}

#[derive(Deserialize)]
pub struct OverrideBody {
    pub cognition: CognitionAvailability,
    pub max_throughput_per_minute: i32,
    pub throttle_factor: f64,
    /// "HH:MM-HH:MM" UTC; omit to keep the deployment open around the clock.
    #[serde(default)]
    pub active_window: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn override_environment(
    _operator: Operator,
    State(state): State<Arc<AppState>>,
    Path(deployment): Path<String>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<EnvironmentState>, ApiError> {
    let state_row = state
        .engine
        .override_environment(
            &deployment,
            body.cognition,
            body.max_throughput_per_minute,
            body.throttle_factor,
            body.active_window.as_deref(),
            body.reason.as_deref(),
        )
        .await?;
    Ok(Json(state_row))
}

pub async fn apply_regime(
    _operator: Operator,
    State(state): State<Arc<AppState>>,
    Path((deployment, name)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    state.engine.apply_regime(&deployment, &name).await?;
    Ok(Json(json!({ "deployment": deployment, "regime": name })))
}

pub async fn tick(
    _operator: Operator,
    State(state): State<Arc<AppState>>,
    Path(deployment): Path<String>,
) -> Result<Json<EnvironmentState>, ApiError> {
    let state_row = state.engine.tick(&deployment).await?;
    Ok(Json(state_row))
}

#[derive(Deserialize)]
pub struct RegimeBody {
    pub name: String,
    pub storm_probability: f64,
    pub drought_probability: f64,
    #[serde(default)]
    pub is_default: bool,
}

pub async fn create_regime(
    _operator: Operator,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegimeBody>,
) -> Result<Json<Regime>, ApiError> {
    let regime = Regime {
        name: body.name,
        storm_probability: body.storm_probability,
        drought_probability: body.drought_probability,
        is_default: body.is_default,
    };
    terrarium_physics::upsert_regime(&state.pool, &regime).await?;
    Ok(Json(regime))
}

pub async fn update_regime(
    _operator: Operator,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<RegimeBody>,
) -> Result<Json<Regime>, ApiError> {
    let regime = Regime {
        name,
        storm_probability: body.storm_probability,
        drought_probability: body.drought_probability,
        is_default: body.is_default,
    };
    terrarium_physics::upsert_regime(&state.pool, &regime).await?;
    Ok(Json(regime))
}

pub async fn delete_regime(
    _operator: Operator,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    terrarium_physics::delete_regime(&state.pool, &name).await?;
    Ok(Json(json!({ "deleted": name })))
}

// ---------------------------------------------------------------------------
// Sponsor surface
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct PurchaseBody {
    pub amount: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

pub async fn purchase_credits(
    State(state): State<Arc<AppState>>,
    Path(sponsor_id): Path<Uuid>,
    Json(body): Json<PurchaseBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .ledger
        .purchase_credits(sponsor_id, body.amount, body.idempotency_key.as_deref())
        .await?;
    let balance = state.ledger.credit_balance(sponsor_id).await?;
    Ok(Json(json!({ "balance": balance })))
}

pub async fn create_pressure(
    State(state): State<Arc<AppState>>,
    Path(sponsor_id): Path<Uuid>,
    Json(body): Json<CreatePressure>,
) -> Result<Json<SponsorPressure>, ApiError> {
    let pressure = state.ledger.create_pressure(sponsor_id, &body).await?;
    Ok(Json(pressure))
}

pub async fn list_pressures(
    State(state): State<Arc<AppState>>,
    Path(sponsor_id): Path<Uuid>,
) -> Result<Json<Vec<SponsorPressure>>, ApiError> {
    Ok(Json(state.ledger.list_pressures(sponsor_id).await?))
}

pub async fn get_pressure(
    State(state): State<Arc<AppState>>,
    Path((sponsor_id, pressure_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SponsorPressure>, ApiError> {
    let pressure = state
        .ledger
        .get_pressure(sponsor_id, pressure_id)
        .await?
        .ok_or_else(|| terrarium_common::TerrariumError::NotFound("pressure not found".into()))?;
    Ok(Json(pressure))
}

pub async fn cancel_pressure(
    State(state): State<Arc<AppState>>,
    Path((sponsor_id, pressure_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<SponsorPressure>, ApiError> {
    Ok(Json(
        state.ledger.cancel_pressure(sponsor_id, pressure_id).await?,
    ))
}

// ---------------------------------------------------------------------------
// Observer surface
// ---------------------------------------------------------------------------

pub async fn braid_view(
    observer: Observer,
    State(state): State<Arc<AppState>>,
    Path(deployment): Path<String>,
) -> Result<Json<BraidView>, ApiError> {
    observer
        .authorize(&state.pool, ObserverRole::Viewer, "deployments/pressure")
        .await?;
    let braid = braid(&state.pool, &deployment, Utc::now()).await?;
    Ok(Json(braid.view(observer.role)))
}

#[derive(Deserialize)]
pub struct ChronicleQuery {
    #[serde(default)]
    pub deployment: Option<String>,
    /// Look-back window in seconds; entries older than this are excluded.
    #[serde(default)]
    pub window: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ChronicleQuery {
    fn since(&self) -> Result<Option<chrono::DateTime<Utc>>, ApiError> {
        match self.window {
            None => Ok(None),
            Some(secs) if secs > 0 => Ok(Some(Utc::now() - chrono::Duration::seconds(secs))),
            Some(_) => Err(terrarium_common::TerrariumError::Validation(
                "window must be a positive number of seconds".into(),
            )
            .into()),
        }
    }
}

pub async fn chronicle(
    observer: Observer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChronicleQuery>,
) -> Result<Json<Vec<ChronicleEntry>>, ApiError> {
    observer
        .authorize(&state.pool, ObserverRole::Viewer, "chronicle")
        .await?;
    let since = query.since()?;
    let limit = query
        .limit
        .unwrap_or(state.chronicle_page_cap)
        .min(state.chronicle_page_cap);
    let entries =
        materializer::chronicle_page(&state.pool, query.deployment.as_deref(), since, limit)
            .await?;
    Ok(Json(entries))
}

pub async fn chronicle_debug(
    observer: Observer,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChronicleQuery>,
) -> Result<Json<Vec<ChronicleDebugRow>>, ApiError> {
    observer
        .authorize(&state.pool, ObserverRole::Analyst, "chronicle/debug")
        .await?;
    let since = query.since()?;
    let limit = query
        .limit
        .unwrap_or(state.chronicle_page_cap)
        .min(state.chronicle_page_cap);
    let rows = materializer::chronicle_debug_page(
        &state.pool,
        query.deployment.as_deref(),
        since,
        limit,
        observer.role >= ObserverRole::Auditor,
    )
    .await?;
    Ok(Json(rows))
}

// ---------------------------------------------------------------------------
// System surface
// ---------------------------------------------------------------------------

pub async fn event_lag(
    observer: Observer,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    observer
        .authorize(&state.pool, ObserverRole::Auditor, "system/event-lag")
        .await?;
    let store = EventStore::new(state.pool.clone());
    let latest = store.latest_seq().await?;
    let consumed = store.load_offset(CONSUMER_GROUP).await?;
    Ok(Json(json!({ "lag": (latest - consumed).max(0) })))
}

pub async fn projection_health(
    observer: Observer,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    observer
        .authorize(&state.pool, ObserverRole::Auditor, "system/projection-health")
        .await?;
    let counts = materializer::projection_health(&state.pool).await?;
    let tables: Vec<Value> = counts
        .into_iter()
        .map(|(table, rows)| json!({ "table": table, "rows": rows }))
        .collect();
    Ok(Json(json!({ "tables": tables })))
}
