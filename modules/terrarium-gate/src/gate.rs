//! The admission state machine.
//!
//! Steps 1–4 of an attempt are pure checks. Side effects are confined to
//! the idempotency cache, the throughput bucket, and the final
//! balance + attempt + event write, all of which commit atomically.

use anyhow::Result;
use chrono::{NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use terrarium_common::{
    Agent, AgentStatus, CognitionAvailability, Event, RejectReason, TerrariumError, WeatherState,
};
use terrarium_events::{outbox, PublishEvent};

use crate::catalog::load_catalog_entry;

#[derive(Debug, Clone, Deserialize)]
pub struct AttemptRequest {
    pub action_type: String,
    #[serde(default)]
    pub requested_cost: Option<f64>,
    pub idempotency_key: String,
    #[serde(default)]
    pub subject_agent_id: Option<Uuid>,
    #[serde(default)]
    pub participants: Vec<Uuid>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    pub cost: f64,
    pub remaining_balance: f64,
}

impl AttemptResponse {
    fn rejected(reason: RejectReason, remaining_balance: f64) -> Self {
        Self {
            accepted: false,
            reason: Some(reason),
            cost: 0.0,
            remaining_balance,
        }
    }
}

/// Environment parameters the gate consults. Defaults apply when the
/// physics engine has not yet written a state row for a deployment.
#[derive(Debug, Clone)]
struct GateEnvironment {
    weather: WeatherState,
    cognition: CognitionAvailability,
    max_throughput_per_minute: i32,
    throttle_factor: f64,
    active_window: Option<String>,
}

impl Default for GateEnvironment {
    fn default() -> Self {
        Self {
            weather: WeatherState::Clear,
            cognition: CognitionAvailability::Full,
            max_throughput_per_minute: 120,
            throttle_factor: 1.0,
            active_window: None,
        }
    }
}

#[derive(Clone)]
pub struct ActionGate {
    pool: PgPool,
}

impl ActionGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Provision an agent with a capacity account. Used by the admin surface
    /// and tests.
    pub async fn provision_agent(
        &self,
        handle: &str,
        deployment_target: &str,
        sponsor_id: Option<Uuid>,
        max_balance: f64,
        regen_per_hour: f64,
    ) -> Result<Agent, TerrariumError> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO agents (id, handle, status, deployment_target, sponsor_id)
            VALUES ($1, $2, 'active', $3, $4)
            "#,
        )
        .bind(id)
        .bind(handle)
        .bind(deployment_target)
        .bind(sponsor_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO capacity_accounts (agent_id, balance, max_balance, regen_per_hour)
            VALUES ($1, $2, $2, $3)
            "#,
        )
        .bind(id)
        .bind(max_balance)
        .bind(regen_per_hour)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(agent_id = %id, handle, deployment_target, "Agent provisioned");

        Ok(Agent {
            id,
            handle: handle.to_string(),
            status: AgentStatus::Active,
            deployment_target: deployment_target.to_string(),
            sponsor_id,
            cognition_provider: "default".to_string(),
            throttle_profile: "standard".to_string(),
            created_at: Utc::now(),
        })
    }

    /// Admission contract: decide one attempt, persist the decision, and
    /// enqueue the resulting envelope. Exactly-once effect per
    /// idempotency key despite at-least-once transport.
    pub async fn attempt(
        &self,
        agent_id: Uuid,
        req: &AttemptRequest,
    ) -> Result<AttemptResponse, TerrariumError> {
        // 1. The agent must exist.
        let Some((handle, deployment)) = self.load_agent(agent_id).await? else {
            return Err(TerrariumError::NotFound("agent_not_found".into()));
        };

        // 2. Known action type.
        let Some(entry) = load_catalog_entry(&self.pool, &req.action_type).await? else {
            return self
                .record_rejection(agent_id, req, &deployment, RejectReason::InvalidActionType)
                .await;
        };

        // 3. Perception-class actions need a subject. This is a malformed
        //    request, not an admission decision.
        if entry.requires_subject && req.subject_agent_id.is_none() {
            return Err(TerrariumError::Validation(
                "subject_agent_id is required for this action type".into(),
            ));
        }

        // 4. Call shape must match the catalog's valid contexts.
        let multi = req.subject_agent_id.is_some() || !req.participants.is_empty();
        let shape_ok = entry.valid_contexts.iter().any(|c| match c {
            terrarium_common::ActionContext::Solo => !multi,
            terrarium_common::ActionContext::MultiAgent
            | terrarium_common::ActionContext::SessionBound => multi,
        });
        if !shape_ok {
            return self
                .record_rejection(agent_id, req, &deployment, RejectReason::InvalidContext)
                .await;
        }

        // 5. Environment gates.
        let env = self.load_environment(&deployment).await?;
        if let Some(window) = &env.active_window {
            if !window_open(window, Utc::now().time()) {
                return self
                    .record_rejection(agent_id, req, &deployment, RejectReason::EnvironmentClosed)
                    .await;
            }
        }
        if entry.cognition_dependent && env.cognition == CognitionAvailability::Unavailable {
            return self
                .record_rejection(agent_id, req, &deployment, RejectReason::CognitionUnavailable)
                .await;
        }

        // 6. Idempotency replay: return the stored response verbatim before
        //    any side effect, so duplicate submissions can never flip to a
        //    throughput rejection or debit twice.
        if let Some(stored) = self.stored_response(&req.idempotency_key).await? {
            debug!(agent_id = %agent_id, key = %req.idempotency_key, "Idempotent replay");
            return Ok(stored);
        }

        let mut tx = self.pool.begin().await?;

        // 7. Atomic throughput bucket increment for the current minute.
        let minute_window = Utc::now().format("%Y-%m-%dT%H:%M").to_string();
        let (count,): (i32,) = sqlx::query_as(
            r#"
            INSERT INTO throughput_buckets (deployment_target, minute_window, action_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (deployment_target, minute_window)
            DO UPDATE SET action_count = throughput_buckets.action_count + 1
            RETURNING action_count
            "#,
        )
        .bind(&deployment)
        .bind(&minute_window)
        .fetch_one(&mut *tx)
        .await?;

        if count > env.max_throughput_per_minute {
            let response =
                AttemptResponse::rejected(RejectReason::ThroughputLimited, self.peek_balance(agent_id).await?);
            return self
                .persist_decision(tx, agent_id, req, &deployment, &response, None)
                .await;
        }

        // 8. Cost: base × weather modifier × throttle × decayed pressure braid.
        let modifier = environment_modifier(&entry.environment_modifiers, env.weather);
        let pressure_multiplier =
            terrarium_pressure::cost_multiplier(&self.pool, &deployment, Utc::now()).await?;
        let cost = entry.base_cost * modifier * env.throttle_factor * pressure_multiplier;

        // 9. Reconcile regeneration, then check the balance under a row lock.
        let (balance, max_balance, regen_per_hour, last_reconciled): (
            f64,
            f64,
            f64,
            chrono::DateTime<Utc>,
        ) = sqlx::query_as(
            r#"
            SELECT balance, max_balance, regen_per_hour, last_reconciled_at
            FROM capacity_accounts
            WHERE agent_id = $1
            FOR UPDATE
            "#,
        )
        .bind(agent_id)
        .fetch_one(&mut *tx)
        .await?;

        let hours = (Utc::now() - last_reconciled).num_milliseconds() as f64 / 3_600_000.0;
        let reconciled = (balance + regen_per_hour * hours).min(max_balance);

        if reconciled < cost {
            sqlx::query(
                "UPDATE capacity_accounts SET balance = $2, last_reconciled_at = now() WHERE agent_id = $1",
            )
            .bind(agent_id)
            .bind(reconciled)
            .execute(&mut *tx)
            .await?;

            let response = AttemptResponse::rejected(RejectReason::CapacityInsufficient, reconciled);
            return self
                .persist_decision(tx, agent_id, req, &deployment, &response, None)
                .await;
        }

        // 10. Debit and commit everything together.
        let remaining = reconciled - cost;
        sqlx::query(
            "UPDATE capacity_accounts SET balance = $2, last_reconciled_at = now() WHERE agent_id = $1",
        )
        .bind(agent_id)
        .bind(remaining)
        .execute(&mut *tx)
        .await?;

        let response = AttemptResponse {
            accepted: true,
            reason: None,
            cost,
            remaining_balance: remaining,
        };
        self.persist_decision(tx, agent_id, req, &deployment, &response, Some(&handle))
            .await
    }

    // -- internals --

    async fn load_agent(&self, agent_id: Uuid) -> Result<Option<(String, String)>, TerrariumError> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT handle, deployment_target FROM agents WHERE id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn load_environment(&self, deployment: &str) -> Result<GateEnvironment, TerrariumError> {
        let row = sqlx::query_as::<_, (String, String, i32, f64, Option<String>)>(
            r#"
            SELECT weather_state, cognition_availability, max_throughput_per_minute,
                   throttle_factor, active_window
            FROM environment_states
            WHERE deployment_target = $1
            "#,
        )
        .bind(deployment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(weather, cognition, cap, throttle, window)| GateEnvironment {
                weather: WeatherState::parse(&weather).unwrap_or(WeatherState::Clear),
                cognition: CognitionAvailability::parse(&cognition)
                    .unwrap_or(CognitionAvailability::Full),
                max_throughput_per_minute: cap,
                throttle_factor: throttle,
                active_window: window,
            })
            .unwrap_or_default())
    }

    async fn stored_response(&self, key: &str) -> Result<Option<AttemptResponse>, TerrariumError> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT response FROM action_attempts WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((value,)) => Ok(Some(serde_json::from_value(value).map_err(|e| {
                TerrariumError::Validation(format!("stored response corrupt: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    async fn peek_balance(&self, agent_id: Uuid) -> Result<f64, TerrariumError> {
        let row = sqlx::query_as::<_, (f64,)>(
            "SELECT balance FROM capacity_accounts WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(b,)| b).unwrap_or(0.0))
    }

    /// Rejections decided before any side effect run in their own small
    /// transaction so the attempt row and envelope still commit together.
    async fn record_rejection(
        &self,
        agent_id: Uuid,
        req: &AttemptRequest,
        deployment: &str,
        reason: RejectReason,
    ) -> Result<AttemptResponse, TerrariumError> {
        let response = AttemptResponse::rejected(reason, self.peek_balance(agent_id).await?);
        let tx = self.pool.begin().await?;
        self.persist_decision(tx, agent_id, req, deployment, &response, None)
            .await
    }

    /// Insert the attempt row + outbox envelope and commit. On an
    /// idempotency-key race the losing writer returns the stored response.
    async fn persist_decision(
        &self,
        mut tx: Transaction<'_, Postgres>,
        agent_id: Uuid,
        req: &AttemptRequest,
        deployment: &str,
        response: &AttemptResponse,
        handle: Option<&str>,
    ) -> Result<AttemptResponse, TerrariumError> {
        let attempt_id = Uuid::new_v4();

        let event = if response.accepted {
            Event::ActionAccepted {
                attempt_id,
                agent_id,
                agent_handle: handle.unwrap_or("").to_string(),
                action_type: req.action_type.clone(),
                deployment: deployment.to_string(),
                cost: response.cost,
                remaining_balance: response.remaining_balance,
                subject_agent_id: req.subject_agent_id,
                participants: req.participants.clone(),
            }
        } else {
            Event::ActionRejected {
                attempt_id,
                agent_id,
                action_type: req.action_type.clone(),
                deployment: deployment.to_string(),
                reason: response.reason.unwrap_or(RejectReason::InvalidActionType),
                requested_cost: req.requested_cost.unwrap_or(0.0),
            }
        };

        let envelope = PublishEvent::new(event.topic(), event.event_type(), event.to_payload())
            .with_actor(agent_id.to_string())
            .with_idempotency_key(&req.idempotency_key);

        let insert = sqlx::query(
            r#"
            INSERT INTO action_attempts
                (id, agent_id, action_type, cost, accepted, reason,
                 idempotency_key, event_id, response)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(attempt_id)
        .bind(agent_id)
        .bind(&req.action_type)
        .bind(response.cost)
        .bind(response.accepted)
        .bind(response.reason.map(|r| r.as_str()))
        .bind(&req.idempotency_key)
        .bind(envelope.event_id)
        .bind(serde_json::to_value(response).expect("response serializes"))
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            let unique_race = e
                .as_database_error()
                .map(|d| d.is_unique_violation())
                .unwrap_or(false);
            tx.rollback().await.ok();
            if unique_race {
                // A concurrent duplicate won the race. Its response is the
                // response.
                if let Some(stored) = self.stored_response(&req.idempotency_key).await? {
                    return Ok(stored);
                }
            }
            return Err(TerrariumError::Database(e));
        }

        outbox::enqueue(&mut tx, &envelope).await?;
        tx.commit().await?;

        Ok(response.clone())
    }
}

/// Cost multiplier for the current weather, defaulting to 1.0.
fn environment_modifier(modifiers: &serde_json::Value, weather: WeatherState) -> f64 {
    modifiers
        .get(weather.as_str())
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0)
}

/// Parse an "HH:MM-HH:MM" window. Malformed windows are treated as open.
fn window_open(window: &str, now: NaiveTime) -> bool {
    let Some((start, end)) = window.split_once('-') else {
        return true;
    };
    let (Ok(start), Ok(end)) = (
        NaiveTime::parse_from_str(start.trim(), "%H:%M"),
        NaiveTime::parse_from_str(end.trim(), "%H:%M"),
    ) else {
        return true;
    };

    if start <= end {
        now >= start && now <= end
    } else {
        // Overnight window, e.g. 22:00-06:00
        now >= start || now <= end
    }
}
