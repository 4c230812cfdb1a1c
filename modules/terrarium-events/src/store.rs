//! EventStore — append-only envelope log backed by Postgres.
//!
//! Gap-free reads are guaranteed internally. Consumers never see BIGSERIAL
//! gaps from rolled-back or in-flight transactions. This is the store's job.

use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;

use crate::types::{EventEnvelope, PublishEvent};

/// Create the log tables if they do not exist. Idempotent; run at startup.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            seq             BIGSERIAL    PRIMARY KEY,
            event_id        UUID         NOT NULL UNIQUE,
            topic           TEXT         NOT NULL,
            event_type      TEXT         NOT NULL,
            occurred_at     TIMESTAMPTZ  NOT NULL,
            actor_id        TEXT,
            correlation_id  UUID,
            idempotency_key TEXT,
            payload         JSONB        NOT NULL,
            context         JSONB        NOT NULL DEFAULT 'null'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consumer_offsets (
            consumer_group TEXT   PRIMARY KEY,
            last_seq       BIGINT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox (
            event_id        UUID         PRIMARY KEY,
            topic           TEXT         NOT NULL,
            event_type      TEXT         NOT NULL,
            occurred_at     TIMESTAMPTZ  NOT NULL,
            actor_id        TEXT,
            correlation_id  UUID,
            idempotency_key TEXT,
            payload         JSONB        NOT NULL,
            context         JSONB        NOT NULL DEFAULT 'null',
            attempts        INT          NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ  NOT NULL DEFAULT now(),
            last_error      TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only envelope log. The single source of truth for projections.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Publish an envelope. Duplicate `event_id`s are absorbed silently so
    /// outbox retries after a failed delete are harmless.
    ///
    /// The existence check runs before the insert rather than as an
    /// `ON CONFLICT` clause: a conflicting insert would still consume a
    /// `seq` from the sequence, and the resulting hole never closes, which
    /// stalls every gap-free reader behind it.
    pub async fn publish(&self, event: &PublishEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events
                (event_id, topic, event_type, occurred_at, actor_id,
                 correlation_id, idempotency_key, payload, context)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9
            WHERE NOT EXISTS (SELECT 1 FROM events WHERE event_id = $1)
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
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Read envelopes in flat sequence order starting from `seq_start`
    /// (inclusive).
    ///
    /// **Gap-free guarantee:** If concurrent transactions created a momentary
    /// gap, this returns envelopes only up to the gap boundary. The next call
    /// picks up where it left off once the gap closes.
    pub async fn read_from(&self, seq_start: i64, limit: usize) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query_as::<_, EventEnvelope>(
            r#"
            SELECT seq, event_id, topic, event_type, occurred_at, actor_id,
                   correlation_id, idempotency_key, payload, context
            FROM events
            WHERE seq >= $1
            ORDER BY seq ASC
            LIMIT $2
            "#,
        )
        .bind(seq_start)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // Enforce gap-free: stop at the first gap in the sequence.
        let mut result = Vec::with_capacity(rows.len());
        let mut expected_seq = seq_start;

        for row in rows {
            if row.seq != expected_seq {
                // An in-flight transaction hasn't committed yet. Return what
                // we have; the next call picks up the rest.
                break;
            }
            expected_seq = row.seq + 1;
            result.push(row);
        }

        Ok(result)
    }

    /// Read a single envelope by its dedup key.
    pub async fn read_by_event_id(&self, event_id: uuid::Uuid) -> Result<Option<EventEnvelope>> {
        let row = sqlx::query_as::<_, EventEnvelope>(
            r#"
            SELECT seq, event_id, topic, event_type, occurred_at, actor_id,
                   correlation_id, idempotency_key, payload, context
            FROM events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// The latest committed sequence number, or 0 if the log is empty.
    pub async fn latest_seq(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (Option<i64>,)>("SELECT MAX(seq) FROM events")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.unwrap_or(0))
    }

    /// Total envelopes in the log.
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    // -- Consumer group offsets --

    /// Last sequence a consumer group has fully processed (0 if new).
    pub async fn load_offset(&self, consumer_group: &str) -> Result<i64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT last_seq FROM consumer_offsets WHERE consumer_group = $1",
        )
        .bind(consumer_group)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(seq,)| seq).unwrap_or(0))
    }

    pub async fn store_offset(&self, consumer_group: &str, last_seq: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (consumer_group, last_seq)
            VALUES ($1, $2)
            ON CONFLICT (consumer_group) DO UPDATE SET last_seq = EXCLUDED.last_seq
            "#,
        )
        .bind(consumer_group)
        .bind(last_seq)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reset a consumer group to the earliest offset. The next read starts
    /// from the beginning of the log.
    pub async fn reset_offset(&self, consumer_group: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (consumer_group, last_seq)
            VALUES ($1, 0)
            ON CONFLICT (consumer_group) DO UPDATE SET last_seq = 0
            "#,
        )
        .bind(consumer_group)
        .execute(&self.pool)
        .await?;

        warn!(consumer_group, "Consumer offset reset to 0");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// sqlx::FromRow for EventEnvelope
// ---------------------------------------------------------------------------

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for EventEnvelope {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(EventEnvelope {
            seq: row.try_get("seq")?,
            event_id: row.try_get("event_id")?,
            topic: row.try_get("topic")?,
            event_type: row.try_get("event_type")?,
            occurred_at: row.try_get("occurred_at")?,
            actor_id: row.try_get("actor_id")?,
            correlation_id: row.try_get("correlation_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            payload: row.try_get("payload")?,
            context: row.try_get("context")?,
        })
    }
}
