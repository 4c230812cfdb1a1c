//! Integration tests for the admission gate.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use terrarium_common::{RejectReason, TerrariumError};
use terrarium_gate::{ActionGate, AttemptRequest};

/// Get a test database pool, or skip if no test DB is available.
async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    terrarium_events::ensure_schema(&pool).await.ok()?;
    terrarium_gate::ensure_schema(&pool).await.ok()?;
    terrarium_physics::ensure_schema(&pool).await.ok()?;
    terrarium_pressure::ensure_schema(&pool).await.ok()?;

    // Clean slate for each test
    sqlx::query("TRUNCATE events RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .ok()?;
    sqlx::query(
        "TRUNCATE outbox, consumer_offsets, action_attempts, throughput_buckets, \
         capacity_accounts, agents, environment_states, sponsor_pressures, credit_ledger",
    )
    .execute(&pool)
    .await
    .ok()?;

    terrarium_gate::seed_catalog(&pool).await.ok()?;

    Some(pool)
}

fn request(action_type: &str, key: &str) -> AttemptRequest {
    AttemptRequest {
        action_type: action_type.into(),
        requested_cost: None,
        idempotency_key: key.into(),
        subject_agent_id: None,
        participants: Vec::new(),
        payload: serde_json::Value::Null,
    }
}

// =========================================================================
// Idempotency
// =========================================================================

#[tokio::test]
async fn duplicate_idempotency_key_returns_stored_response_and_debits_once() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "meadow", None, 100.0, 0.0)
        .await
        .unwrap();

    let req = request("forage", "forage-once");
    let first = gate.attempt(agent.id, &req).await.unwrap();
    assert!(first.accepted);
    assert_eq!(first.cost, 3.0);
    assert_eq!(first.remaining_balance, 97.0);

    let second = gate.attempt(agent.id, &req).await.unwrap();
    assert_eq!(second, first);

    // Only one debit happened.
    let (balance,): (f64,) =
        sqlx::query_as("SELECT balance FROM capacity_accounts WHERE agent_id = $1")
            .bind(agent.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(balance, 97.0);

    // And only one attempt row exists.
    let (attempts,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM action_attempts WHERE agent_id = $1")
            .bind(agent.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(attempts, 1);
}

// =========================================================================
// Capacity
// =========================================================================

#[tokio::test]
async fn attempts_debit_until_capacity_runs_out() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "meadow", None, 10.0, 0.0)
        .await
        .unwrap();

    // forage costs 3: 10 → 7 → 4 → 1, then refusal.
    for n in 0..3 {
        let r = gate
            .attempt(agent.id, &request("forage", &format!("f-{n}")))
            .await
            .unwrap();
        assert!(r.accepted);
    }

    let refused = gate
        .attempt(agent.id, &request("forage", "f-last"))
        .await
        .unwrap();
    assert!(!refused.accepted);
    assert_eq!(refused.reason, Some(RejectReason::CapacityInsufficient));
    assert_eq!(refused.remaining_balance, 1.0);
    assert_eq!(refused.cost, 0.0);
}

// =========================================================================
// Throughput
// =========================================================================

#[tokio::test]
async fn throughput_cap_rejects_overflow_within_a_minute() {
    let Some(pool) = test_pool().await else {
        return;
    };
    sqlx::query(
        r#"
        INSERT INTO environment_states
            (deployment_target, max_throughput_per_minute, throttle_factor, rng_seed)
        VALUES ('burrow', 5, 1.0, 1)
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "burrow", None, 100.0, 0.0)
        .await
        .unwrap();

    let window_before = Utc::now().format("%Y-%m-%dT%H:%M").to_string();
    let mut accepted = 0;
    let mut limited = 0;
    for n in 0..10 {
        let r = gate
            .attempt(agent.id, &request("observe", &format!("o-{n}")))
            .await
            .unwrap();
        if r.accepted {
            accepted += 1;
        } else {
            assert_eq!(r.reason, Some(RejectReason::ThroughputLimited));
            limited += 1;
        }
    }
    assert_eq!(accepted + limited, 10);

    // Skip the exact split if the minute rolled over mid-test.
    let window_after = Utc::now().format("%Y-%m-%dT%H:%M").to_string();
    if window_before == window_after {
        assert_eq!(accepted, 5);
        assert_eq!(limited, 5);
    }
}

// =========================================================================
// Shape and catalog checks
// =========================================================================

#[tokio::test]
async fn unknown_action_type_is_rejected_not_erred() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "meadow", None, 100.0, 0.0)
        .await
        .unwrap();

    let r = gate
        .attempt(agent.id, &request("burrow_dig", "x-1"))
        .await
        .unwrap();
    assert!(!r.accepted);
    assert_eq!(r.reason, Some(RejectReason::InvalidActionType));
}

#[tokio::test]
async fn unknown_agent_is_not_found() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gate = ActionGate::new(pool);

    let err = gate
        .attempt(Uuid::new_v4(), &request("observe", "x-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TerrariumError::NotFound(msg) if msg == "agent_not_found"));
}

#[tokio::test]
async fn perception_without_subject_is_malformed() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "meadow", None, 100.0, 0.0)
        .await
        .unwrap();

    let err = gate
        .attempt(agent.id, &request("critique", "c-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, TerrariumError::Validation(_)));

    // Malformed requests leave no attempt row.
    let (attempts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM action_attempts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(attempts, 0);
}

#[tokio::test]
async fn solo_action_with_subject_is_invalid_context() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "meadow", None, 100.0, 0.0)
        .await
        .unwrap();

    let mut req = request("observe", "ctx-1");
    req.subject_agent_id = Some(Uuid::new_v4());
    let r = gate.attempt(agent.id, &req).await.unwrap();
    assert!(!r.accepted);
    assert_eq!(r.reason, Some(RejectReason::InvalidContext));
}

// =========================================================================
// Environment gates
// =========================================================================

#[tokio::test]
async fn cognition_outage_blocks_dependent_actions_only() {
    let Some(pool) = test_pool().await else {
        return;
    };
    sqlx::query(
        r#"
        INSERT INTO environment_states
            (deployment_target, cognition_availability, max_throughput_per_minute,
             throttle_factor, rng_seed)
        VALUES ('fog', 'unavailable', 120, 1.0, 1)
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "fog", None, 100.0, 0.0)
        .await
        .unwrap();

    let blocked = gate
        .attempt(agent.id, &request("signal", "s-1"))
        .await
        .unwrap();
    assert!(!blocked.accepted);
    assert_eq!(blocked.reason, Some(RejectReason::CognitionUnavailable));

    // observe does not depend on cognition.
    let allowed = gate
        .attempt(agent.id, &request("observe", "o-1"))
        .await
        .unwrap();
    assert!(allowed.accepted);
}

#[tokio::test]
async fn attempts_outside_the_active_window_are_rejected() {
    let Some(pool) = test_pool().await else {
        return;
    };
    let engine = terrarium_physics::PhysicsEngine::new(pool.clone());

    // A window that opens two hours from now, so it is closed at test time.
    let open = (Utc::now() + chrono::Duration::hours(2)).format("%H:%M");
    let shut = (Utc::now() + chrono::Duration::hours(3)).format("%H:%M");
    let window = format!("{open}-{shut}");
    let state = engine
        .override_environment(
            "den",
            terrarium_common::CognitionAvailability::Full,
            120,
            1.0,
            Some(&window),
            Some("night shift"),
        )
        .await
        .unwrap();
    assert_eq!(state.active_window.as_deref(), Some(window.as_str()));

    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "den", None, 100.0, 0.0)
        .await
        .unwrap();

    let r = gate.attempt(agent.id, &request("observe", "w-1")).await.unwrap();
    assert!(!r.accepted);
    assert_eq!(r.reason, Some(RejectReason::EnvironmentClosed));

    // Clearing the window reopens the deployment.
    engine
        .override_environment(
            "den",
            terrarium_common::CognitionAvailability::Full,
            120,
            1.0,
            None,
            None,
        )
        .await
        .unwrap();
    let r = gate.attempt(agent.id, &request("observe", "w-2")).await.unwrap();
    assert!(r.accepted);
}

#[tokio::test]
async fn stormy_weather_and_throttle_scale_the_cost() {
    let Some(pool) = test_pool().await else {
        return;
    };
    sqlx::query(
        r#"
        INSERT INTO environment_states
            (deployment_target, weather_state, max_throughput_per_minute,
             throttle_factor, rng_seed)
        VALUES ('gale', 'stormy', 120, 2.0, 1)
        "#,
    )
    .execute(&pool)
    .await
    .unwrap();

    let gate = ActionGate::new(pool.clone());
    let agent = gate
        .provision_agent("wren", "gale", None, 100.0, 0.0)
        .await
        .unwrap();

    // signal: base 2.0 × stormy 1.25 × throttle 2.0 = 5.0
    let r = gate
        .attempt(agent.id, &request("signal", "s-1"))
        .await
        .unwrap();
    assert!(r.accepted);
    assert!((r.cost - 5.0).abs() < 1e-9);
    assert!((r.remaining_balance - 95.0).abs() < 1e-9);
}
