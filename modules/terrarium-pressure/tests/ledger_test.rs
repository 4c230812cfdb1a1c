//! Integration tests for the credit ledger and pressure lifecycle.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use terrarium_common::{ObserverRole, PressureType, RejectReason, TerrariumError};
use terrarium_pressure::{braid, CreatePressure, PressureLedger};

/// Get a test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    terrarium_events::ensure_schema(&pool).await.ok()?;
    terrarium_pressure::ensure_schema(&pool).await.ok()?;

    // Clean slate for each test
    sqlx::query("TRUNCATE events RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .ok()?;
    sqlx::query("TRUNCATE outbox, consumer_offsets, sponsor_pressures, credit_ledger")
        .execute(&pool)
        .await
        .ok()?;

    Some(pool)
}

fn capacity_pressure(magnitude: f64, half_life_seconds: i64) -> CreatePressure {
    CreatePressure {
        target_deployment: "meadow".into(),
        pressure_type: PressureType::Capacity,
        magnitude,
        half_life_seconds,
    }
}

// =========================================================================
// Purchases
// =========================================================================

#[tokio::test]
async fn purchases_accumulate_and_are_idempotent_per_key() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool);
    let sponsor = Uuid::new_v4();

    ledger
        .purchase_credits(sponsor, 500, Some("order-1"))
        .await
        .unwrap();
    ledger
        .purchase_credits(sponsor, 500, Some("order-1"))
        .await
        .unwrap();
    ledger
        .purchase_credits(sponsor, 200, Some("order-2"))
        .await
        .unwrap();

    assert_eq!(ledger.credit_balance(sponsor).await.unwrap(), 700);
}

#[tokio::test]
async fn non_positive_purchase_is_malformed() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool);

    let err = ledger
        .purchase_credits(Uuid::new_v4(), 0, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TerrariumError::Validation(_)));
}

// =========================================================================
// Pressure creation boundaries
// =========================================================================

#[tokio::test]
async fn magnitude_and_half_life_boundaries() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool);
    let sponsor = Uuid::new_v4();
    ledger
        .purchase_credits(sponsor, 10_000, None)
        .await
        .unwrap();

    // Both magnitude extremes are inside the envelope.
    ledger
        .create_pressure(sponsor, &capacity_pressure(100.0, 3600))
        .await
        .unwrap();
    ledger
        .create_pressure(sponsor, &capacity_pressure(-100.0, 3600))
        .await
        .unwrap();

    for bad in [101.0, -101.0] {
        let err = ledger
            .create_pressure(sponsor, &capacity_pressure(bad, 3600))
            .await
            .unwrap_err();
        assert!(matches!(err, TerrariumError::Validation(_)));
    }

    // Half-life floor is 60 seconds.
    ledger
        .create_pressure(sponsor, &capacity_pressure(10.0, 60))
        .await
        .unwrap();
    let err = ledger
        .create_pressure(sponsor, &capacity_pressure(10.0, 59))
        .await
        .unwrap_err();
    assert!(matches!(err, TerrariumError::Validation(_)));
}

#[tokio::test]
async fn pressure_debits_ten_credits_per_unit_magnitude() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool);
    let sponsor = Uuid::new_v4();
    ledger.purchase_credits(sponsor, 500, None).await.unwrap();

    ledger
        .create_pressure(sponsor, &capacity_pressure(-40.0, 3600))
        .await
        .unwrap();
    assert_eq!(ledger.credit_balance(sponsor).await.unwrap(), 100);
}

#[tokio::test]
async fn insufficient_credits_create_nothing() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool.clone());
    let sponsor = Uuid::new_v4();
    ledger.purchase_credits(sponsor, 100, None).await.unwrap();

    let err = ledger
        .create_pressure(sponsor, &capacity_pressure(50.0, 3600))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TerrariumError::Rejected(RejectReason::InsufficientCredits)
    ));

    // Balance untouched, no pressure row.
    assert_eq!(ledger.credit_balance(sponsor).await.unwrap(), 100);
    assert!(ledger.list_pressures(sponsor).await.unwrap().is_empty());
}

// =========================================================================
// Cancellation and braids
// =========================================================================

#[tokio::test]
async fn cancelled_pressures_leave_the_braid() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool.clone());
    let sponsor = Uuid::new_v4();
    ledger.purchase_credits(sponsor, 2_000, None).await.unwrap();

    let kept = ledger
        .create_pressure(sponsor, &capacity_pressure(30.0, 3600))
        .await
        .unwrap();
    let dropped = ledger
        .create_pressure(sponsor, &capacity_pressure(50.0, 3600))
        .await
        .unwrap();

    let full = braid(&pool, "meadow", Utc::now()).await.unwrap();
    assert!(full.total_intensity > 75.0);

    let cancelled = ledger.cancel_pressure(sponsor, dropped.id).await.unwrap();
    assert!(cancelled.cancelled_at.is_some());
    // Cancellation refunds nothing.
    assert_eq!(ledger.credit_balance(sponsor).await.unwrap(), 1_200);

    let remaining = braid(&pool, "meadow", Utc::now()).await.unwrap();
    assert!(remaining.total_intensity < 31.0);
    assert!(remaining.total_intensity > 25.0);

    // The kept pressure is still readable.
    let still = ledger.get_pressure(sponsor, kept.id).await.unwrap().unwrap();
    assert!(still.cancelled_at.is_none());
}

#[tokio::test]
async fn cancelling_an_unknown_pressure_is_not_found() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool);

    let err = ledger
        .cancel_pressure(Uuid::new_v4(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, TerrariumError::NotFound(_)));
}

#[tokio::test]
async fn braid_views_redact_by_role() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let ledger = PressureLedger::new(pool.clone());
    let sponsor = Uuid::new_v4();
    ledger.purchase_credits(sponsor, 1_000, None).await.unwrap();
    ledger
        .create_pressure(sponsor, &capacity_pressure(20.0, 3600))
        .await
        .unwrap();

    let full = braid(&pool, "meadow", Utc::now()).await.unwrap();

    let viewer = full.view(ObserverRole::Viewer);
    assert!(viewer.braid_vector.is_none());
    assert!(viewer.pressures.is_none());

    let analyst = full.view(ObserverRole::Analyst);
    assert!(analyst.braid_vector.is_some());
    assert!(analyst.pressures.is_none());

    let auditor = full.view(ObserverRole::Auditor);
    assert_eq!(auditor.pressures.as_ref().map(Vec::len), Some(1));
}
