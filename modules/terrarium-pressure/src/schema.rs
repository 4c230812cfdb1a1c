//! Ledger-owned tables.

use anyhow::Result;
use sqlx::PgPool;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sponsor_pressures (
            id                UUID             PRIMARY KEY,
            sponsor_id        UUID             NOT NULL,
            target_deployment TEXT             NOT NULL,
            pressure_type     TEXT             NOT NULL,
            magnitude         DOUBLE PRECISION NOT NULL CHECK (magnitude >= -100 AND magnitude <= 100),
            half_life_seconds BIGINT           NOT NULL CHECK (half_life_seconds >= 60),
            created_at        TIMESTAMPTZ      NOT NULL DEFAULT now(),
            cancelled_at      TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS credit_ledger (
            id              UUID        PRIMARY KEY,
            sponsor_id      UUID        NOT NULL,
            entry_type      TEXT        NOT NULL,
            amount          BIGINT      NOT NULL,
            idempotency_key TEXT        UNIQUE,
            created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
