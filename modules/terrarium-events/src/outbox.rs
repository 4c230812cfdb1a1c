//! Outbox dispatcher — eventual publication of locally committed facts.
//!
//! Writers insert an outbox row in the same transaction as their state
//! change. A background loop republishes due rows: delete on success, bump
//! `attempts`/`next_attempt_at` with bounded backoff on failure. Every
//! committed state change is published at least once; consumers dedup by
//! `event_id`.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};

use crate::store::EventStore;
use crate::types::PublishEvent;

/// Retry backoff doubles per attempt, capped here (seconds).
const MAX_BACKOFF_SECS: i64 = 300;

/// A pending publication as stored in the outbox table.
#[derive(Debug, Clone)]
pub struct OutboxRow {
    pub event_id: uuid::Uuid,
    pub topic: String,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<String>,
    pub correlation_id: Option<uuid::Uuid>,
    pub idempotency_key: Option<String>,
    pub payload: serde_json::Value,
    pub context: serde_json::Value,
    pub attempts: i32,
}

impl OutboxRow {
    fn into_publish_event(self) -> PublishEvent {
        PublishEvent {
            event_id: self.event_id,
            topic: self.topic,
            event_type: self.event_type,
            occurred_at: self.occurred_at,
            actor_id: self.actor_id,
            correlation_id: self.correlation_id,
            idempotency_key: self.idempotency_key,
            payload: self.payload,
            context: self.context,
        }
    }
}

/// Enqueue an envelope inside the caller's transaction. The row becomes
/// visible to the dispatcher only once the caller commits.
pub async fn enqueue(tx: &mut Transaction<'_, Postgres>, event: &PublishEvent) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox
            (event_id, topic, event_type, occurred_at, actor_id,
             correlation_id, idempotency_key, payload, context)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (event_id) DO NOTHING
        "#,
    )
    .bind(event.event_id)
    .bind(&event.topic)
    .bind(&event.event_type)
    .bind(event.occurred_at)
    .bind(&event.actor_id)
    .bind(event.correlation_id)
    .bind(&event.idempotency_key)
    .bind(&event.payload)
    .bind(&event.context)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Background publisher shared by the gate, physics, and pressure writers.
pub struct OutboxDispatcher {
    pool: PgPool,
    store: EventStore,
    batch_size: i64,
}

impl OutboxDispatcher {
    pub fn new(pool: PgPool, store: EventStore) -> Self {
        Self {
            pool,
            store,
            batch_size: 100,
        }
    }

    /// Publish all due rows once. Returns how many were published.
    pub async fn run_once(&self) -> Result<usize> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            SELECT event_id, topic, event_type, occurred_at, actor_id,
                   correlation_id, idempotency_key, payload, context, attempts
            FROM outbox
            WHERE next_attempt_at <= now()
            ORDER BY occurred_at ASC
            LIMIT $1
            "#,
        )
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await?;

        let mut published = 0usize;
        for row in rows {
            let event_id = row.event_id;
            let attempts = row.attempts;
            let event = row.into_publish_event();

            match self.store.publish(&event).await {
                Ok(()) => {
                    sqlx::query("DELETE FROM outbox WHERE event_id = $1")
                        .bind(event_id)
                        .execute(&self.pool)
                        .await?;
                    published += 1;
                    debug!(%event_id, event_type = %event.event_type, "Outbox row published");
                }
                Err(e) => {
                    let backoff = (2i64 << attempts.min(16)).min(MAX_BACKOFF_SECS);
                    warn!(%event_id, error = %e, attempts = attempts + 1, backoff_secs = backoff,
                        "Outbox publish failed, will retry");
                    sqlx::query(
                        r#"
                        UPDATE outbox
                        SET attempts = attempts + 1,
                            next_attempt_at = now() + make_interval(secs => $2),
                            last_error = $3
                        WHERE event_id = $1
                        "#,
                    )
                    .bind(event_id)
                    .bind(backoff as f64)
                    .bind(e.to_string())
                    .execute(&self.pool)
                    .await?;
                }
            }
        }

        Ok(published)
    }

    /// Run the dispatch loop until the process exits.
    pub async fn run(&self, poll_interval: Duration) {
        info!(poll_secs = poll_interval.as_secs(), "Outbox dispatcher started");
        loop {
            match self.run_once().await {
                Ok(0) => {}
                Ok(n) => debug!(published = n, "Outbox batch dispatched"),
                Err(e) => warn!(error = %e, "Outbox dispatch pass failed"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Rows still waiting for publication (for health reporting).
    pub async fn backlog(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM outbox")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(OutboxRow {
            event_id: row.try_get("event_id")?,
            topic: row.try_get("topic")?,
            event_type: row.try_get("event_type")?,
            occurred_at: row.try_get("occurred_at")?,
            actor_id: row.try_get("actor_id")?,
            correlation_id: row.try_get("correlation_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            payload: row.try_get("payload")?,
            context: row.try_get("context")?,
            attempts: row.try_get("attempts")?,
        })
    }
}
