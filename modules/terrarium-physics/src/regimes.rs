//! Regime reference data — named weather distributions.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use terrarium_common::{Regime, TerrariumError};

/// Seed the built-in regimes. Idempotent; `calm` is the default.
pub async fn seed_default_regimes(pool: &PgPool) -> Result<()> {
    let seeds = [
        ("calm", 0.10, 0.05, true),
        ("storm", 0.70, 0.10, false),
        ("drought", 0.10, 0.70, false),
        ("swarm", 0.40, 0.20, false),
    ];

    for (name, storm, drought, is_default) in seeds {
        sqlx::query(
            r#"
            INSERT INTO regimes (name, storm_probability, drought_probability, is_default)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(storm)
        .bind(drought)
        .bind(is_default)
        .execute(pool)
        .await?;
    }

    info!("Default regimes seeded");
    Ok(())
}

/// Create or update a regime. Marking one default clears all others in the
/// same transaction, so exactly one default exists at any time.
pub async fn upsert_regime(pool: &PgPool, regime: &Regime) -> Result<(), TerrariumError> {
    for p in [regime.storm_probability, regime.drought_probability] {
        if !(0.0..=1.0).contains(&p) {
            return Err(TerrariumError::Validation(
                "probabilities must be within [0, 1]".into(),
            ));
        }
    }
    if regime.storm_probability + regime.drought_probability > 1.0 {
        return Err(TerrariumError::Validation(
            "storm and drought probabilities must sum to at most 1".into(),
        ));
    }

    let mut tx = pool.begin().await?;
    if regime.is_default {
        sqlx::query("UPDATE regimes SET is_default = false WHERE is_default")
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query(
        r#"
        INSERT INTO regimes (name, storm_probability, drought_probability, is_default)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE SET
            storm_probability = EXCLUDED.storm_probability,
            drought_probability = EXCLUDED.drought_probability,
            is_default = EXCLUDED.is_default
        "#,
    )
    .bind(&regime.name)
    .bind(regime.storm_probability)
    .bind(regime.drought_probability)
    .bind(regime.is_default)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Delete a regime. The default regime cannot be removed.
pub async fn delete_regime(pool: &PgPool, name: &str) -> Result<(), TerrariumError> {
    let deleted = sqlx::query("DELETE FROM regimes WHERE name = $1 AND NOT is_default")
        .bind(name)
        .execute(pool)
        .await?;

    if deleted.rows_affected() == 0 {
        return Err(TerrariumError::Validation(
            "regime is missing or is the default".into(),
        ));
    }
    Ok(())
}

pub async fn list_regimes(pool: &PgPool) -> Result<Vec<Regime>> {
    let rows = sqlx::query_as::<_, (String, f64, f64, bool)>(
        "SELECT name, storm_probability, drought_probability, is_default FROM regimes ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(name, storm_probability, drought_probability, is_default)| Regime {
            name,
            storm_probability,
            drought_probability,
            is_default,
        })
        .collect())
}

pub(crate) async fn load_regime(pool: &PgPool, name: &str) -> Result<Option<Regime>> {
    let row = sqlx::query_as::<_, (String, f64, f64, bool)>(
        "SELECT name, storm_probability, drought_probability, is_default FROM regimes WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(name, storm_probability, drought_probability, is_default)| Regime {
        name,
        storm_probability,
        drought_probability,
        is_default,
    }))
}

pub(crate) async fn load_default_regime(pool: &PgPool) -> Result<Option<Regime>> {
    let row = sqlx::query_as::<_, (String, f64, f64, bool)>(
        "SELECT name, storm_probability, drought_probability, is_default FROM regimes WHERE is_default LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(name, storm_probability, drought_probability, is_default)| Regime {
        name,
        storm_probability,
        drought_probability,
        is_default,
    }))
}
