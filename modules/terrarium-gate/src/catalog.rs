//! Action catalog — immutable reference data, seeded once.

use anyhow::Result;
use serde_json::json;
use sqlx::PgPool;
use tracing::info;

use terrarium_common::{ActionCatalogEntry, ActionContext};

/// The fixed action set. Perception-class actions require a subject agent;
/// cognition-dependent actions are blocked when a deployment's cognition is
/// unavailable.
fn seed_entries() -> Vec<ActionCatalogEntry> {
    let perception = |action_type: &str, base_cost: f64| ActionCatalogEntry {
        action_type: action_type.to_string(),
        base_cost,
        environment_modifiers: json!({"stormy": 1.5, "drought": 2.0}),
        valid_contexts: vec![ActionContext::MultiAgent, ActionContext::SessionBound],
        requires_subject: true,
        cognition_dependent: true,
    };

    vec![
        ActionCatalogEntry {
            action_type: "observe".into(),
            base_cost: 1.0,
            environment_modifiers: json!({}),
            valid_contexts: vec![ActionContext::Solo],
            requires_subject: false,
            cognition_dependent: false,
        },
        ActionCatalogEntry {
            action_type: "signal".into(),
            base_cost: 2.0,
            environment_modifiers: json!({"stormy": 1.25}),
            valid_contexts: vec![ActionContext::Solo],
            requires_subject: false,
            cognition_dependent: true,
        },
        ActionCatalogEntry {
            action_type: "forage".into(),
            base_cost: 3.0,
            environment_modifiers: json!({"drought": 2.5}),
            valid_contexts: vec![ActionContext::Solo],
            requires_subject: false,
            cognition_dependent: false,
        },
        ActionCatalogEntry {
            action_type: "exchange".into(),
            base_cost: 5.0,
            environment_modifiers: json!({"stormy": 1.5}),
            valid_contexts: vec![ActionContext::MultiAgent, ActionContext::SessionBound],
            requires_subject: false,
            cognition_dependent: true,
        },
        ActionCatalogEntry {
            action_type: "session_join".into(),
            base_cost: 2.0,
            environment_modifiers: json!({}),
            valid_contexts: vec![ActionContext::MultiAgent],
            requires_subject: false,
            cognition_dependent: false,
        },
        perception("critique", 8.0),
        perception("counter_model", 10.0),
        perception("refusal", 6.0),
        perception("rederivation", 12.0),
        perception("conflict", 15.0),
    ]
}

/// Seed the catalog. Idempotent: existing rows are left untouched.
pub async fn seed_catalog(pool: &PgPool) -> Result<()> {
    for entry in seed_entries() {
        let contexts: Vec<String> = entry
            .valid_contexts
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        sqlx::query(
            r#"
            INSERT INTO action_catalog
                (action_type, base_cost, environment_modifiers, valid_contexts,
                 requires_subject, cognition_dependent)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (action_type) DO NOTHING
            "#,
        )
        .bind(&entry.action_type)
        .bind(entry.base_cost)
        .bind(&entry.environment_modifiers)
        .bind(&contexts)
        .bind(entry.requires_subject)
        .bind(entry.cognition_dependent)
        .execute(pool)
        .await?;
    }

    info!("Action catalog seeded");
    Ok(())
}

/// Load one catalog entry, or None for an unknown action type.
pub async fn load_catalog_entry(
    pool: &PgPool,
    action_type: &str,
) -> Result<Option<ActionCatalogEntry>> {
    let row = sqlx::query_as::<_, (String, f64, serde_json::Value, Vec<String>, bool, bool)>(
        r#"
        SELECT action_type, base_cost, environment_modifiers, valid_contexts,
               requires_subject, cognition_dependent
        FROM action_catalog
        WHERE action_type = $1
        "#,
    )
    .bind(action_type)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(
        |(action_type, base_cost, environment_modifiers, contexts, requires_subject, cognition_dependent)| {
            ActionCatalogEntry {
                action_type,
                base_cost,
                environment_modifiers,
                valid_contexts: contexts
                    .iter()
                    .filter_map(|c| ActionContext::parse(c))
                    .collect(),
                requires_subject,
                cognition_dependent,
            }
        },
    ))
}
