//! Tick mechanics. One draw per tick from the active regime's distribution;
//! the seed/sequence pair is persisted with the emitted event so any tick's
//! outcome can be re-derived later.

use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::PgPool;
use tracing::info;

use terrarium_common::{
    CognitionAvailability, EnvironmentState, Event, Regime, TerrariumError, WeatherState,
};
use terrarium_events::{outbox, PublishEvent};

use crate::regimes::{load_default_regime, load_regime};

/// Per-weather environment parameters. Cap stays in (0, 10000],
/// throttle in [0.1, 10].
pub fn weather_profile(weather: WeatherState) -> (CognitionAvailability, i32, f64) {
    match weather {
        WeatherState::Clear => (CognitionAvailability::Full, 120, 1.0),
        WeatherState::Stormy => (CognitionAvailability::Degraded, 30, 2.5),
        WeatherState::Drought => (CognitionAvailability::Unavailable, 60, 4.0),
    }
}

/// The deterministic draw: a seed/sequence pair and a regime fully determine
/// the next weather state.
pub fn draw_weather(seed: i64, sequence: i64, regime: &Regime) -> WeatherState {
    let mut rng = StdRng::seed_from_u64((seed as u64) ^ (sequence as u64));
    let u: f64 = rng.random();

    if u < regime.storm_probability {
        WeatherState::Stormy
    } else if u < regime.storm_probability + regime.drought_probability {
        WeatherState::Drought
    } else {
        WeatherState::Clear
    }
}

/// "HH:MM-HH:MM". Overnight spans (start > end) are allowed.
pub fn valid_window(window: &str) -> bool {
    let Some((start, end)) = window.split_once('-') else {
        return false;
    };
    chrono::NaiveTime::parse_from_str(start, "%H:%M").is_ok()
        && chrono::NaiveTime::parse_from_str(end, "%H:%M").is_ok()
}

#[derive(Clone)]
pub struct PhysicsEngine {
    pool: PgPool,
}

impl PhysicsEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensure a state row exists for a deployment, seeding its PRNG.
    pub async fn ensure_deployment(&self, deployment: &str) -> Result<(), TerrariumError> {
        sqlx::query(
            r#"
            INSERT INTO environment_states
                (deployment_target, max_throughput_per_minute, throttle_factor, rng_seed)
            VALUES ($1, 120, 1.0, $2)
            ON CONFLICT (deployment_target) DO NOTHING
            "#,
        )
        .bind(deployment)
        .bind(rand::random::<i64>())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Point a deployment at a named regime and emit the fact.
    pub async fn apply_regime(
        &self,
        deployment: &str,
        regime_name: &str,
    ) -> Result<(), TerrariumError> {
        let Some(regime) = load_regime(&self.pool, regime_name).await? else {
            return Err(TerrariumError::NotFound("regime not found".into()));
        };

        self.ensure_deployment(deployment).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE environment_states
            SET active_regime = $2, updated_at = now()
            WHERE deployment_target = $1
            "#,
        )
        .bind(deployment)
        .bind(&regime.name)
        .execute(&mut *tx)
        .await?;

        let event = Event::RegimeApplied {
            deployment: deployment.to_string(),
            regime: regime.name.clone(),
        };
        let envelope = PublishEvent::new(event.topic(), event.event_type(), event.to_payload())
            .with_actor("physics");
        outbox::enqueue(&mut tx, &envelope).await?;
        tx.commit().await?;

        info!(deployment, regime = %regime.name, "Regime applied");
        Ok(())
    }

    /// Advance a deployment by one tick. Triggered externally, never
    /// self-scheduled.
    pub async fn tick(&self, deployment: &str) -> Result<EnvironmentState, TerrariumError> {
        self.ensure_deployment(deployment).await?;

        let mut tx = self.pool.begin().await?;

        let (seed, sequence, active_regime): (i64, i64, Option<String>) = sqlx::query_as(
            r#"
            SELECT rng_seed, rng_sequence, active_regime
            FROM environment_states
            WHERE deployment_target = $1
            FOR UPDATE
            "#,
        )
        .bind(deployment)
        .fetch_one(&mut *tx)
        .await?;

        let regime = match &active_regime {
            Some(name) => load_regime(&self.pool, name).await?,
            None => None,
        };
        let regime = match regime {
            Some(r) => r,
            None => load_default_regime(&self.pool)
                .await?
                .ok_or_else(|| TerrariumError::Config("no default regime seeded".into()))?,
        };

        let next_sequence = sequence + 1;
        let weather = draw_weather(seed, next_sequence, &regime);
        let (cognition, cap, throttle) = weather_profile(weather);

        sqlx::query(
            r#"
            UPDATE environment_states
            SET weather_state = $2,
                cognition_availability = $3,
                max_throughput_per_minute = $4,
                throttle_factor = $5,
                rng_sequence = $6,
                reason = NULL,
                updated_at = now()
            WHERE deployment_target = $1
            "#,
        )
        .bind(deployment)
        .bind(weather.as_str())
        .bind(cognition.as_str())
        .bind(cap)
        .bind(throttle)
        .bind(next_sequence)
        .execute(&mut *tx)
        .await?;

        let event = Event::PhysicsTicked {
            deployment: deployment.to_string(),
            regime: regime.name.clone(),
            weather,
            cognition,
            max_throughput_per_minute: cap,
            throttle_factor: throttle,
            rng_seed: seed,
            rng_sequence: next_sequence,
        };
        let envelope = PublishEvent::new(event.topic(), event.event_type(), event.to_payload())
            .with_actor("physics");
        outbox::enqueue(&mut tx, &envelope).await?;
        tx.commit().await?;

        info!(deployment, weather = weather.as_str(), regime = %regime.name,
            sequence = next_sequence, "Physics tick");

        self.load_state(deployment)
            .await?
            .ok_or_else(|| TerrariumError::NotFound("environment state vanished".into()))
    }

    /// Ops override: write environment parameters directly and emit the fact.
    /// `active_window` is "HH:MM-HH:MM" (UTC) or `None` to run around the
    /// clock; the gate rejects attempts outside it.
    pub async fn override_environment(
        &self,
        deployment: &str,
        cognition: CognitionAvailability,
        max_throughput_per_minute: i32,
        throttle_factor: f64,
        active_window: Option<&str>,
        reason: Option<&str>,
    ) -> Result<EnvironmentState, TerrariumError> {
        if !(1..=10000).contains(&max_throughput_per_minute) {
            return Err(TerrariumError::Validation(
                "max_throughput_per_minute must be within (0, 10000]".into(),
            ));
        }
        if !(0.1..=10.0).contains(&throttle_factor) {
            return Err(TerrariumError::Validation(
                "throttle_factor must be within [0.1, 10]".into(),
            ));
        }
        if let Some(window) = active_window {
            if !valid_window(window) {
                return Err(TerrariumError::Validation(
                    "active_window must be HH:MM-HH:MM".into(),
                ));
            }
        }

        self.ensure_deployment(deployment).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE environment_states
            SET cognition_availability = $2,
                max_throughput_per_minute = $3,
                throttle_factor = $4,
                active_window = $5,
                reason = $6,
                updated_at = now()
            WHERE deployment_target = $1
            "#,
        )
        .bind(deployment)
        .bind(cognition.as_str())
        .bind(max_throughput_per_minute)
        .bind(throttle_factor)
        .bind(active_window)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        let event = Event::EnvironmentOverridden {
            deployment: deployment.to_string(),
            cognition,
            max_throughput_per_minute,
            throttle_factor,
            active_window: active_window.map(String::from),
            reason: reason.map(String::from),
        };
        let envelope = PublishEvent::new(event.topic(), event.event_type(), event.to_payload())
            .with_actor("ops");
        outbox::enqueue(&mut tx, &envelope).await?;
        tx.commit().await?;

        self.load_state(deployment)
            .await?
            .ok_or_else(|| TerrariumError::NotFound("environment state vanished".into()))
    }

    pub async fn load_state(
        &self,
        deployment: &str,
    ) -> Result<Option<EnvironmentState>, TerrariumError> {
        let row = sqlx::query_as::<
            _,
            (
                String,
                String,
                String,
                i32,
                f64,
                Option<String>,
                Option<String>,
                Option<String>,
                i64,
                i64,
                chrono::DateTime<Utc>,
            ),
        >(
            r#"
            SELECT deployment_target, weather_state, cognition_availability,
                   max_throughput_per_minute, throttle_factor, active_regime,
                   active_window, reason, rng_seed, rng_sequence, updated_at
            FROM environment_states
            WHERE deployment_target = $1
            "#,
        )
        .bind(deployment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(
                deployment_target,
                weather,
                cognition,
                max_throughput_per_minute,
                throttle_factor,
                active_regime,
                active_window,
                reason,
                rng_seed,
                rng_sequence,
                updated_at,
            )| EnvironmentState {
                deployment_target,
                weather_state: WeatherState::parse(&weather).unwrap_or(WeatherState::Clear),
                cognition_availability: CognitionAvailability::parse(&cognition)
                    .unwrap_or(CognitionAvailability::Full),
                max_throughput_per_minute,
                throttle_factor,
                active_regime,
                active_window,
                reason,
                rng_seed,
                rng_sequence,
                updated_at,
            },
        ))
    }
}
