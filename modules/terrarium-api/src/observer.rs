//! Observer Access Gate.
//!
//! Observers identify themselves with `x-observer-id` and
//! `x-observer-role` headers. Roles are strictly ordered
//! (viewer < analyst < auditor); `authorize` enforces a minimum rank and
//! records every attempt, granted or denied, in `observer_access_log`.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::response::Json;
use serde_json::{json, Value};
use sqlx::PgPool;

use terrarium_common::{ObserverRole, TerrariumError};

#[derive(Debug, Clone)]
pub struct Observer {
    pub id: String,
    pub role: ObserverRole,
}

impl<S> FromRequestParts<S> for Observer
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-observer-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| unauthorized("observer identity required"))?;

        let role = parts
            .headers
            .get("x-observer-role")
            .and_then(|v| v.to_str().ok())
            .and_then(ObserverRole::parse)
            .ok_or_else(|| unauthorized("unknown observer role"))?;

        Ok(Observer {
            id: id.to_string(),
            role,
        })
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": message })))
}

impl Observer {
    /// Enforce a minimum role and append to the access log either way.
    pub async fn authorize(
        &self,
        pool: &PgPool,
        min_role: ObserverRole,
        endpoint: &str,
    ) -> Result<(), TerrariumError> {
        let granted = self.role >= min_role;

        sqlx::query(
            r#"
            INSERT INTO observer_access_log (observer_id, role, endpoint, granted)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&self.id)
        .bind(self.role.as_str())
        .bind(endpoint)
        .bind(granted)
        .execute(pool)
        .await?;

        if granted {
            Ok(())
        } else {
            Err(TerrariumError::InsufficientRole)
        }
    }
}

/// Operator guard for the admin surface. No ledger row: operators are
/// infrastructure, not observers.
pub struct Operator;

impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let role = parts
            .headers
            .get("x-operator-role")
            .and_then(|v| v.to_str().ok());
        if role == Some("operator") {
            Ok(Operator)
        } else {
            Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "insufficient_role" })),
            ))
        }
    }
}
