//! Gate-owned tables. Idempotent `CREATE TABLE IF NOT EXISTS`, run at startup.

use anyhow::Result;
use sqlx::PgPool;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS agents (
            id                 UUID         PRIMARY KEY,
            handle             TEXT         NOT NULL UNIQUE,
            status             TEXT         NOT NULL DEFAULT 'active',
            deployment_target  TEXT         NOT NULL,
            sponsor_id         UUID,
            cognition_provider TEXT         NOT NULL DEFAULT 'default',
            throttle_profile   TEXT         NOT NULL DEFAULT 'standard',
            created_at         TIMESTAMPTZ  NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS capacity_accounts (
            agent_id           UUID             PRIMARY KEY REFERENCES agents(id),
            balance            DOUBLE PRECISION NOT NULL,
            max_balance        DOUBLE PRECISION NOT NULL,
            regen_per_hour     DOUBLE PRECISION NOT NULL,
            last_reconciled_at TIMESTAMPTZ      NOT NULL DEFAULT now(),
            CHECK (balance >= 0 AND balance <= max_balance)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS action_catalog (
            action_type           TEXT             PRIMARY KEY,
            base_cost             DOUBLE PRECISION NOT NULL CHECK (base_cost > 0),
            environment_modifiers JSONB            NOT NULL DEFAULT '{}',
            valid_contexts        TEXT[]           NOT NULL,
            requires_subject      BOOLEAN          NOT NULL DEFAULT false,
            cognition_dependent   BOOLEAN          NOT NULL DEFAULT false
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS action_attempts (
            id              UUID             PRIMARY KEY,
            agent_id        UUID             NOT NULL,
            action_type     TEXT             NOT NULL,
            cost            DOUBLE PRECISION NOT NULL,
            accepted        BOOLEAN          NOT NULL,
            reason          TEXT,
            idempotency_key TEXT             UNIQUE,
            event_id        UUID             NOT NULL,
            response        JSONB            NOT NULL,
            occurred_at     TIMESTAMPTZ      NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS throughput_buckets (
            deployment_target TEXT NOT NULL,
            minute_window     TEXT NOT NULL,
            action_count      INT  NOT NULL DEFAULT 0,
            PRIMARY KEY (deployment_target, minute_window)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
