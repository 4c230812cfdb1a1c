//! Projection tables. All disposable: truncating them and replaying the
//! log rebuilds every row. Primary keys include the originating event id
//! (or a deterministic composite) so redelivery is a no-op.

use anyhow::Result;
use sqlx::PgPool;

/// Every table the replay harness may truncate and re-derive.
pub const PROJECTION_TABLES: &[&str] = &[
    "live_events",
    "sessions",
    "session_events",
    "chronicle_entries",
    "artifacts",
    "agent_patterns",
    "environment_rejections",
];

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_events (
            event_id    UUID        PRIMARY KEY,
            seq         BIGINT      NOT NULL,
            topic       TEXT        NOT NULL,
            event_type  TEXT        NOT NULL,
            deployment  TEXT,
            occurred_at TIMESTAMPTZ NOT NULL,
            summary     TEXT        NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id              UUID        PRIMARY KEY,
            participant_key TEXT        NOT NULL,
            started_at      TIMESTAMPTZ NOT NULL,
            last_event_at   TIMESTAMPTZ NOT NULL,
            event_count     INT         NOT NULL DEFAULT 0,
            closed          BOOLEAN     NOT NULL DEFAULT false
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_events (
            session_id UUID NOT NULL,
            event_id   UUID NOT NULL,
            PRIMARY KEY (session_id, event_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chronicle_entries (
            event_id       UUID        PRIMARY KEY,
            deployment     TEXT        NOT NULL,
            occurred_at    TIMESTAMPTZ NOT NULL,
            text           TEXT        NOT NULL,
            category       TEXT        NOT NULL,
            evidence_count INT         NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS artifacts (
            event_id      UUID        PRIMARY KEY,
            artifact_kind TEXT        NOT NULL,
            agent_id      UUID        NOT NULL,
            subject_id    UUID,
            deployment    TEXT        NOT NULL,
            occurred_at   TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agent_patterns (
            agent_id         UUID        NOT NULL,
            action_type      TEXT        NOT NULL,
            occurrence_count INT         NOT NULL DEFAULT 0,
            last_seen_at     TIMESTAMPTZ NOT NULL,
            last_event_id    UUID        NOT NULL,
            PRIMARY KEY (agent_id, action_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS environment_rejections (
            event_id    UUID        PRIMARY KEY,
            deployment  TEXT        NOT NULL,
            agent_id    UUID        NOT NULL,
            action_type TEXT        NOT NULL,
            reason      TEXT        NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observer_access_log (
            id          BIGSERIAL   PRIMARY KEY,
            observer_id TEXT        NOT NULL,
            role        TEXT        NOT NULL,
            endpoint    TEXT        NOT NULL,
            granted     BOOLEAN     NOT NULL,
            occurred_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
