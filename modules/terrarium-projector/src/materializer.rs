//! Materializer — consumes every topic and maintains the read views.
//!
//! Each envelope is either acted upon or ignored. The materializer never
//! generates UUIDs or reads wall-clock time: every value it writes comes
//! from the envelope, so replaying the log reproduces the tables exactly.
//!
//! Idempotency: the `live_events` insert doubles as the event_id dedup
//! gate. A redelivered envelope conflicts there and the whole apply
//! becomes a no-op before any counter is touched.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use terrarium_common::{Event, RejectReason};
use terrarium_events::{EventEnvelope, EventStore};

use crate::chronicle;

pub const CONSUMER_GROUP: &str = "projector";

/// Result of applying a single envelope.
#[derive(Debug)]
pub enum ApplyResult {
    /// The envelope produced projection rows.
    Applied,
    /// Already seen (event_id dedup) or nothing to materialize.
    NoOp,
    /// The payload could not be deserialized.
    DeserializeError(String),
}

#[derive(Clone)]
pub struct Materializer {
    pool: PgPool,
    store: EventStore,
    session_gap_secs: i64,
    batch_size: usize,
}

impl Materializer {
    pub fn new(pool: PgPool, store: EventStore, session_gap_secs: i64) -> Self {
        Self {
            pool,
            store,
            session_gap_secs,
            batch_size: 200,
        }
    }

    /// Consume one batch from the last stored offset. Returns how many
    /// envelopes were processed.
    pub async fn run_once(&self) -> Result<usize> {
        let last = self.store.load_offset(CONSUMER_GROUP).await?;
        let batch = self.store.read_from(last + 1, self.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let mut processed = 0usize;
        let mut new_last = last;
        for envelope in &batch {
            match self.apply(envelope).await? {
                ApplyResult::Applied => debug!(seq = envelope.seq, event_type = %envelope.event_type, "Projected"),
                ApplyResult::NoOp => {}
                ApplyResult::DeserializeError(e) => {
                    warn!(seq = envelope.seq, error = %e, "Skipping undecodable envelope");
                }
            }
            new_last = envelope.seq;
            processed += 1;
        }

        self.store.store_offset(CONSUMER_GROUP, new_last).await?;
        Ok(processed)
    }

    /// Run the consume loop until the process exits.
    pub async fn run(&self, poll_interval: Duration) {
        info!(poll_secs = poll_interval.as_secs(), "Materializer started");
        loop {
            match self.run_once().await {
                Ok(0) => tokio::time::sleep(poll_interval).await,
                Ok(_) => {} // keep draining without sleeping
                Err(e) => {
                    warn!(error = %e, "Materializer pass failed");
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    /// Envelopes the projector has not yet consumed.
    pub async fn lag(&self) -> Result<i64> {
        let latest = self.store.latest_seq().await?;
        let consumed = self.store.load_offset(CONSUMER_GROUP).await?;
        Ok((latest - consumed).max(0))
    }

    /// Project a single envelope. Idempotent.
    ///
    /// All writes for one envelope share one transaction: either every
    /// projection row for the event lands, or none do and the dedup gate
    /// still admits the redelivery. A committed gate row with missing
    /// downstream rows would be invisible until a full replay.
    pub async fn apply(&self, envelope: &EventEnvelope) -> Result<ApplyResult> {
        let event = match Event::from_payload(&envelope.payload) {
            Ok(e) => e,
            Err(e) => return Ok(ApplyResult::DeserializeError(e.to_string())),
        };

        let mut tx = self.pool.begin().await?;

        let deployment = deployment_of(&event);

        // Dedup gate: a second delivery conflicts here and stops.
        let inserted = sqlx::query(
            r#"
            INSERT INTO live_events (event_id, seq, topic, event_type, deployment, occurred_at, summary)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(envelope.event_id)
        .bind(envelope.seq)
        .bind(&envelope.topic)
        .bind(&envelope.event_type)
        .bind(deployment.clone())
        .bind(envelope.occurred_at)
        .bind(summary_of(&envelope.event_type, deployment.as_deref()))
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(ApplyResult::NoOp);
        }

        if let (Some(text), Some(category), Some(deployment)) =
            (chronicle::render(&event), chronicle::category(&event), deployment.as_deref())
        {
            sqlx::query(
                r#"
                INSERT INTO chronicle_entries (event_id, deployment, occurred_at, text, category)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (event_id) DO NOTHING
                "#,
            )
            .bind(envelope.event_id)
            .bind(deployment)
            .bind(envelope.occurred_at)
            .bind(&text)
            .bind(category)
            .execute(&mut *tx)
            .await?;
        }

        match event {
            Event::ActionAccepted {
                agent_id,
                action_type,
                deployment,
                subject_agent_id,
                participants,
                ..
            } => {
                self.bump_pattern(&mut tx, agent_id, &action_type, envelope)
                    .await?;

                if chronicle::is_perception(&action_type) {
                    sqlx::query(
                        r#"
                        INSERT INTO artifacts
                            (event_id, artifact_kind, agent_id, subject_id, deployment, occurred_at)
                        VALUES ($1, $2, $3, $4, $5, $6)
                        ON CONFLICT (event_id) DO NOTHING
                        "#,
                    )
                    .bind(envelope.event_id)
                    .bind(&action_type)
                    .bind(agent_id)
                    .bind(subject_agent_id)
                    .bind(&deployment)
                    .bind(envelope.occurred_at)
                    .execute(&mut *tx)
                    .await?;
                }

                let mut members: Vec<Uuid> = participants;
                members.push(agent_id);
                if let Some(subject) = subject_agent_id {
                    members.push(subject);
                }
                members.sort();
                members.dedup();
                if members.len() > 1 {
                    self.track_session(&mut tx, &members, envelope.event_id, envelope.occurred_at)
                        .await?;
                }
            }

            Event::ActionRejected {
                agent_id,
                action_type,
                deployment,
                reason,
                ..
            } => {
                if matches!(
                    reason,
                    RejectReason::ThroughputLimited
                        | RejectReason::CognitionUnavailable
                        | RejectReason::EnvironmentClosed
                ) {
                    sqlx::query(
                        r#"
                        INSERT INTO environment_rejections
                            (event_id, deployment, agent_id, action_type, reason, occurred_at)
                        VALUES ($1, $2, $3, $4, $5, $6)
                        ON CONFLICT (event_id) DO NOTHING
                        "#,
                    )
                    .bind(envelope.event_id)
                    .bind(&deployment)
                    .bind(agent_id)
                    .bind(&action_type)
                    .bind(reason.as_str())
                    .bind(envelope.occurred_at)
                    .execute(&mut *tx)
                    .await?;
                }
            }

            // Climate facts surface through live_events + chronicle only.
            Event::PhysicsTicked { .. }
            | Event::RegimeApplied { .. }
            | Event::EnvironmentOverridden { .. } => {}

            // Sponsor-economy facts stay out of observer-facing views
            // beyond the live feed.
            Event::CreditsPurchased { .. }
            | Event::PressureCreated { .. }
            | Event::PressureCancelled { .. } => {}
        }

        tx.commit().await?;
        Ok(ApplyResult::Applied)
    }

    async fn bump_pattern(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        agent_id: Uuid,
        action_type: &str,
        envelope: &EventEnvelope,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_patterns (agent_id, action_type, occurrence_count, last_seen_at, last_event_id)
            VALUES ($1, $2, 1, $3, $4)
            ON CONFLICT (agent_id, action_type) DO UPDATE SET
                occurrence_count = agent_patterns.occurrence_count + 1,
                last_seen_at = EXCLUDED.last_seen_at,
                last_event_id = EXCLUDED.last_event_id
            "#,
        )
        .bind(agent_id)
        .bind(action_type)
        .bind(envelope.occurred_at)
        .bind(envelope.event_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Group events sharing a participant set within the inactivity gap.
    /// Session identity is the first event's id — deterministic under
    /// replay. Closing is driven by event time only, never wall clock.
    async fn track_session(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        members: &[Uuid],
        event_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Result<()> {
        let key = members
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(":");

        let open = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            SELECT id, last_event_at
            FROM sessions
            WHERE participant_key = $1 AND NOT closed
            ORDER BY last_event_at DESC
            LIMIT 1
            "#,
        )
        .bind(&key)
        .fetch_optional(&mut **tx)
        .await?;

        let session_id = match open {
            Some((id, last)) if (occurred_at - last).num_seconds() <= self.session_gap_secs => {
                sqlx::query(
                    r#"
                    UPDATE sessions
                    SET last_event_at = GREATEST(last_event_at, $2),
                        event_count = event_count + 1
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(occurred_at)
                .execute(&mut **tx)
                .await?;
                id
            }
            stale => {
                if let Some((id, _)) = stale {
                    // The gap elapsed: the old session closes here.
                    sqlx::query("UPDATE sessions SET closed = true WHERE id = $1")
                        .bind(id)
                        .execute(&mut **tx)
                        .await?;
                }
                sqlx::query(
                    r#"
                    INSERT INTO sessions (id, participant_key, started_at, last_event_at, event_count)
                    VALUES ($1, $2, $3, $3, 1)
                    ON CONFLICT (id) DO NOTHING
                    "#,
                )
                .bind(event_id)
                .bind(&key)
                .bind(occurred_at)
                .execute(&mut **tx)
                .await?;
                event_id
            }
        };

        sqlx::query(
            r#"
            INSERT INTO session_events (session_id, event_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(event_id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

fn deployment_of(event: &Event) -> Option<String> {
    match event {
        Event::ActionAccepted { deployment, .. }
        | Event::ActionRejected { deployment, .. }
        | Event::PhysicsTicked { deployment, .. }
        | Event::RegimeApplied { deployment, .. }
        | Event::EnvironmentOverridden { deployment, .. }
        | Event::PressureCreated { deployment, .. }
        | Event::PressureCancelled { deployment, .. } => Some(deployment.clone()),
        Event::CreditsPurchased { .. } => None,
    }
}

fn summary_of(event_type: &str, deployment: Option<&str>) -> String {
    match deployment {
        Some(d) => format!("{event_type} @ {d}"),
        None => event_type.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Read API — consumed by the HTTP surface
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
pub struct ChronicleEntry {
    pub ts: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, serde::Serialize)]
pub struct ChronicleDebugRow {
    pub ts: DateTime<Utc>,
    pub text: String,
    pub category: String,
    pub evidence_count: i32,
    /// Auditor-only: the raw evidence event ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_event_ids: Option<Vec<Uuid>>,
}

pub async fn chronicle_page(
    pool: &PgPool,
    deployment: Option<&str>,
    since: Option<DateTime<Utc>>,
    limit: u32,
) -> Result<Vec<ChronicleEntry>> {
    let rows = sqlx::query_as::<_, (DateTime<Utc>, String)>(
        r#"
        SELECT occurred_at, text
        FROM chronicle_entries
        WHERE ($1::TEXT IS NULL OR deployment = $1)
          AND ($2::TIMESTAMPTZ IS NULL OR occurred_at >= $2)
        ORDER BY occurred_at DESC
        LIMIT $3
        "#,
    )
    .bind(deployment)
    .bind(since)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(ts, text)| ChronicleEntry { ts, text })
        .collect())
}

pub async fn chronicle_debug_page(
    pool: &PgPool,
    deployment: Option<&str>,
    since: Option<DateTime<Utc>>,
    limit: u32,
    include_evidence_ids: bool,
) -> Result<Vec<ChronicleDebugRow>> {
    let rows = sqlx::query_as::<_, (Uuid, DateTime<Utc>, String, String, i32)>(
        r#"
        SELECT event_id, occurred_at, text, category, evidence_count
        FROM chronicle_entries
        WHERE ($1::TEXT IS NULL OR deployment = $1)
          AND ($2::TIMESTAMPTZ IS NULL OR occurred_at >= $2)
        ORDER BY occurred_at DESC
        LIMIT $3
        "#,
    )
    .bind(deployment)
    .bind(since)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(event_id, ts, text, category, evidence_count)| ChronicleDebugRow {
            ts,
            text,
            category,
            evidence_count,
            evidence_event_ids: include_evidence_ids.then(|| vec![event_id]),
        })
        .collect())
}

/// Row counts per projection table, for the health endpoint.
pub async fn projection_health(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut out = Vec::new();
    for table in crate::schema::PROJECTION_TABLES {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await?;
        out.push((table.to_string(), count));
    }
    Ok(out)
}
