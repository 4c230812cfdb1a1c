//! Physics-owned tables.

use anyhow::Result;
use sqlx::PgPool;

pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS regimes (
            name                TEXT             PRIMARY KEY,
            storm_probability   DOUBLE PRECISION NOT NULL CHECK (storm_probability >= 0 AND storm_probability <= 1),
            drought_probability DOUBLE PRECISION NOT NULL CHECK (drought_probability >= 0 AND drought_probability <= 1),
            is_default          BOOLEAN          NOT NULL DEFAULT false
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS environment_states (
            deployment_target         TEXT             PRIMARY KEY,
            weather_state             TEXT             NOT NULL DEFAULT 'clear',
            cognition_availability    TEXT             NOT NULL DEFAULT 'full',
            max_throughput_per_minute INT              NOT NULL CHECK (max_throughput_per_minute > 0 AND max_throughput_per_minute <= 10000),
            throttle_factor           DOUBLE PRECISION NOT NULL CHECK (throttle_factor >= 0.1 AND throttle_factor <= 10),
            active_regime             TEXT,
            active_window             TEXT,
            reason                    TEXT,
            rng_seed                  BIGINT           NOT NULL,
            rng_sequence              BIGINT           NOT NULL DEFAULT 0,
            updated_at                TIMESTAMPTZ      NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
