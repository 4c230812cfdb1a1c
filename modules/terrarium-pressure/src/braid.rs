//! Braid composition — the aggregate of all live pressures on a deployment.
//!
//! The gate and physics engine read the aggregate; observers see a
//! role-stratified view. Cancelled pressures stop contributing here, but
//! their own decay curves are untouched.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use terrarium_common::{ObserverRole, PressureType, SponsorPressure};

use crate::decay::current_magnitude;
use crate::ledger::SponsorPressureRow;

/// Clamp bounds for the capacity-cost multiplier derived from the braid.
const MULTIPLIER_FLOOR: f64 = 0.25;
const MULTIPLIER_CEIL: f64 = 4.0;

#[derive(Debug, Clone, Serialize)]
pub struct Braid {
    pub deployment: String,
    /// Sum of absolute decayed per-type totals.
    pub total_intensity: f64,
    /// Decayed total per pressure type.
    pub per_type: BTreeMap<String, f64>,
    /// The raw contributing rows (auditor-only downstream).
    #[serde(skip)]
    pub pressures: Vec<SponsorPressure>,
}

/// Role-stratified rendering of a braid.
#[derive(Debug, Clone, Serialize)]
pub struct BraidView {
    pub deployment: String,
    pub total_intensity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub braid_vector: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressures: Option<Vec<SponsorPressure>>,
}

impl Braid {
    pub fn view(&self, role: ObserverRole) -> BraidView {
        BraidView {
            deployment: self.deployment.clone(),
            total_intensity: self.total_intensity,
            braid_vector: (role >= ObserverRole::Analyst).then(|| self.per_type.clone()),
            pressures: (role >= ObserverRole::Auditor).then(|| self.pressures.clone()),
        }
    }
}

/// Compose all non-cancelled pressures on a deployment at time `now`.
pub async fn braid(pool: &PgPool, deployment: &str, now: DateTime<Utc>) -> Result<Braid> {
    let rows = sqlx::query_as::<_, SponsorPressureRow>(
        r#"
        SELECT id, sponsor_id, target_deployment, pressure_type, magnitude,
               half_life_seconds, created_at, cancelled_at
        FROM sponsor_pressures
        WHERE target_deployment = $1 AND cancelled_at IS NULL
        ORDER BY created_at ASC
        "#,
    )
    .bind(deployment)
    .fetch_all(pool)
    .await?;

    let pressures: Vec<SponsorPressure> = rows.into_iter().map(Into::into).collect();

    let mut per_type: BTreeMap<String, f64> = BTreeMap::new();
    for kind in PressureType::ALL {
        let total: f64 = pressures
            .iter()
            .filter(|p| p.pressure_type == kind)
            .map(|p| current_magnitude(p, now))
            .sum();
        per_type.insert(kind.as_str().to_string(), total);
    }

    let total_intensity = per_type.values().map(|v| v.abs()).sum();

    Ok(Braid {
        deployment: deployment.to_string(),
        total_intensity,
        per_type,
        pressures,
    })
}

/// Cost multiplier the action gate applies: driven by the decayed
/// capacity-type total, `(1 + total/100)` clamped to `[0.25, 4.0]`.
pub async fn cost_multiplier(pool: &PgPool, deployment: &str, now: DateTime<Utc>) -> Result<f64> {
    let braid = braid(pool, deployment, now).await?;
    let capacity_total = braid
        .per_type
        .get(PressureType::Capacity.as_str())
        .copied()
        .unwrap_or(0.0);

    Ok((1.0 + capacity_total / 100.0).clamp(MULTIPLIER_FLOOR, MULTIPLIER_CEIL))
}
