//! Credit purchases and the pressure lifecycle.

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use terrarium_common::{Event, PressureType, RejectReason, SponsorPressure, TerrariumError};
use terrarium_events::{outbox, PublishEvent};

/// Credits debited per unit of |magnitude|.
const CREDITS_PER_MAGNITUDE: f64 = 10.0;

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePressure {
    pub target_deployment: String,
    pub pressure_type: PressureType,
    pub magnitude: f64,
    pub half_life_seconds: i64,
}

#[derive(Clone)]
pub struct PressureLedger {
    pool: PgPool,
}

impl PressureLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a purchase row. Idempotent per key.
    pub async fn purchase_credits(
        &self,
        sponsor_id: Uuid,
        amount: i64,
        idempotency_key: Option<&str>,
    ) -> Result<(), TerrariumError> {
        if amount <= 0 {
            return Err(TerrariumError::Validation(
                "credit amount must be positive".into(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO credit_ledger (id, sponsor_id, entry_type, amount, idempotency_key)
            VALUES ($1, $2, 'purchase', $3, $4)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sponsor_id)
        .bind(amount)
        .bind(idempotency_key)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() > 0 {
            let event = Event::CreditsPurchased { sponsor_id, amount };
            let envelope =
                PublishEvent::new(event.topic(), event.event_type(), event.to_payload())
                    .with_actor(sponsor_id.to_string());
            outbox::enqueue(&mut tx, &envelope).await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Signed sum of the sponsor's ledger. Balances are derived, never stored.
    pub async fn credit_balance(&self, sponsor_id: Uuid) -> Result<i64, TerrariumError> {
        let (balance,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM credit_ledger WHERE sponsor_id = $1",
        )
        .bind(sponsor_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(balance)
    }

    /// Create a pressure, debiting `|magnitude| × 10` credits atomically with
    /// the insert. Insufficient balance creates nothing.
    pub async fn create_pressure(
        &self,
        sponsor_id: Uuid,
        req: &CreatePressure,
    ) -> Result<SponsorPressure, TerrariumError> {
        if req.target_deployment.trim().is_empty() {
            return Err(TerrariumError::Validation(
                "target_deployment is required".into(),
            ));
        }
        if !(-100.0..=100.0).contains(&req.magnitude) {
            return Err(TerrariumError::Validation(
                "magnitude must be within [-100, 100]".into(),
            ));
        }
        if req.half_life_seconds < 60 {
            return Err(TerrariumError::Validation(
                "half_life_seconds must be at least 60".into(),
            ));
        }

        let cost = (req.magnitude.abs() * CREDITS_PER_MAGNITUDE).round() as i64;
        let id = Uuid::new_v4();

        let mut tx = self.pool.begin().await?;

        // Serialize concurrent spends per sponsor, then check the balance in
        // the same transaction as the debit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(sponsor_id.to_string())
            .execute(&mut *tx)
            .await?;

        let (balance,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM credit_ledger WHERE sponsor_id = $1",
        )
        .bind(sponsor_id)
        .fetch_one(&mut *tx)
        .await?;

        if balance < cost {
            tx.rollback().await.ok();
            return Err(TerrariumError::Rejected(RejectReason::InsufficientCredits));
        }

        sqlx::query(
            r#"
            INSERT INTO sponsor_pressures
                (id, sponsor_id, target_deployment, pressure_type, magnitude, half_life_seconds)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(sponsor_id)
        .bind(&req.target_deployment)
        .bind(req.pressure_type.as_str())
        .bind(req.magnitude)
        .bind(req.half_life_seconds)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO credit_ledger (id, sponsor_id, entry_type, amount)
            VALUES ($1, $2, 'pressure_debit', $3)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(sponsor_id)
        .bind(-cost)
        .execute(&mut *tx)
        .await?;

        let event = Event::PressureCreated {
            pressure_id: id,
            sponsor_id,
            deployment: req.target_deployment.clone(),
            pressure_type: req.pressure_type,
            magnitude: req.magnitude,
            half_life_seconds: req.half_life_seconds,
            credits_debited: cost,
        };
        let envelope = PublishEvent::new(event.topic(), event.event_type(), event.to_payload())
            .with_actor(sponsor_id.to_string());
        outbox::enqueue(&mut tx, &envelope).await?;

        tx.commit().await?;
        info!(pressure_id = %id, sponsor_id = %sponsor_id,
            deployment = %req.target_deployment, cost, "Pressure created");

        Ok(SponsorPressure {
            id,
            sponsor_id,
            target_deployment: req.target_deployment.clone(),
            pressure_type: req.pressure_type,
            magnitude: req.magnitude,
            half_life_seconds: req.half_life_seconds,
            created_at: Utc::now(),
            cancelled_at: None,
        })
    }

    /// Mark a pressure cancelled. Does not touch the decay curve — it only
    /// stops the pressure from contributing to future braids.
    pub async fn cancel_pressure(
        &self,
        sponsor_id: Uuid,
        pressure_id: Uuid,
    ) -> Result<SponsorPressure, TerrariumError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE sponsor_pressures
            SET cancelled_at = now()
            WHERE id = $1 AND sponsor_id = $2 AND cancelled_at IS NULL
            "#,
        )
        .bind(pressure_id)
        .bind(sponsor_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.ok();
            // Either unknown, or already cancelled — re-read to distinguish.
            return self
                .get_pressure(sponsor_id, pressure_id)
                .await?
                .ok_or_else(|| TerrariumError::NotFound("pressure not found".into()));
        }

        let deployment: (String,) =
            sqlx::query_as("SELECT target_deployment FROM sponsor_pressures WHERE id = $1")
                .bind(pressure_id)
                .fetch_one(&mut *tx)
                .await?;

        let event = Event::PressureCancelled {
            pressure_id,
            sponsor_id,
            deployment: deployment.0,
        };
        let envelope = PublishEvent::new(event.topic(), event.event_type(), event.to_payload())
            .with_actor(sponsor_id.to_string());
        outbox::enqueue(&mut tx, &envelope).await?;

        tx.commit().await?;

        self.get_pressure(sponsor_id, pressure_id)
            .await?
            .ok_or_else(|| TerrariumError::NotFound("pressure not found".into()))
    }

    pub async fn get_pressure(
        &self,
        sponsor_id: Uuid,
        pressure_id: Uuid,
    ) -> Result<Option<SponsorPressure>, TerrariumError> {
        let row = sqlx::query_as::<_, SponsorPressureRow>(
            r#"
            SELECT id, sponsor_id, target_deployment, pressure_type, magnitude,
                   half_life_seconds, created_at, cancelled_at
            FROM sponsor_pressures
            WHERE id = $1 AND sponsor_id = $2
            "#,
        )
        .bind(pressure_id)
        .bind(sponsor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    pub async fn list_pressures(
        &self,
        sponsor_id: Uuid,
    ) -> Result<Vec<SponsorPressure>, TerrariumError> {
        let rows = sqlx::query_as::<_, SponsorPressureRow>(
            r#"
            SELECT id, sponsor_id, target_deployment, pressure_type, magnitude,
                   half_life_seconds, created_at, cancelled_at
            FROM sponsor_pressures
            WHERE sponsor_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(sponsor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

pub(crate) struct SponsorPressureRow {
    id: Uuid,
    sponsor_id: Uuid,
    target_deployment: String,
    pressure_type: String,
    magnitude: f64,
    half_life_seconds: i64,
    created_at: chrono::DateTime<Utc>,
    cancelled_at: Option<chrono::DateTime<Utc>>,
}

impl From<SponsorPressureRow> for SponsorPressure {
    fn from(row: SponsorPressureRow) -> Self {
        SponsorPressure {
            id: row.id,
            sponsor_id: row.sponsor_id,
            target_deployment: row.target_deployment,
            pressure_type: PressureType::parse(&row.pressure_type)
                .unwrap_or(PressureType::Capacity),
            magnitude: row.magnitude,
            half_life_seconds: row.half_life_seconds,
            created_at: row.created_at,
            cancelled_at: row.cancelled_at,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for SponsorPressureRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(SponsorPressureRow {
            id: row.try_get("id")?,
            sponsor_id: row.try_get("sponsor_id")?,
            target_deployment: row.try_get("target_deployment")?,
            pressure_type: row.try_get("pressure_type")?,
            magnitude: row.try_get("magnitude")?,
            half_life_seconds: row.try_get("half_life_seconds")?,
            created_at: row.try_get("created_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
        })
    }
}
