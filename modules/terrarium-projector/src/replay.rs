//! Replay harness — proves the projections are a pure function of the log.
//!
//! Snapshot the views, truncate them, rewind the consumer offset, let the
//! materializer reprocess the full log, then compare. Divergence is
//! reported, never patched over: a differing rebuild means the projector
//! leaked non-event state (wall clock, random ids) and that is a bug to
//! fix at the source.

use std::time::Duration;

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Connection, PgPool};
use std::collections::BTreeMap;
use tracing::{info, warn};

use terrarium_common::TerrariumError;
use terrarium_events::EventStore;

use crate::materializer::{Materializer, CONSUMER_GROUP};
use crate::schema::PROJECTION_TABLES;

/// Session-level advisory lock key. Two concurrent replays against the
/// same database would truncate each other's half-built views.
const REPLAY_LOCK_KEY: i64 = 0x7465_7272_6172_6901;

/// Tables whose row identity is deterministic under replay and therefore
/// checksummed, not just counted.
const CHECKSUMMED: &[&str] = &["live_events", "chronicle_entries", "artifacts"];

#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Projection tables to leave untouched (e.g. operator-curated data).
    pub preserve: Vec<String>,
    /// Abort the rebuild if it has not caught up within this window.
    pub timeout: Duration,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            preserve: Vec::new(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Per-table row counts plus content checksums for the deterministic views.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Snapshot {
    pub counts: BTreeMap<String, i64>,
    pub checksums: BTreeMap<String, String>,
}

#[derive(Debug, serde::Serialize)]
pub struct ReplayReport {
    pub events_reprocessed: i64,
    pub before: Snapshot,
    pub after: Snapshot,
    pub divergences: Vec<String>,
}

impl ReplayReport {
    pub fn converged(&self) -> bool {
        self.divergences.is_empty()
    }
}

/// Capture counts and checksums of the current projection state.
pub async fn snapshot(pool: &PgPool) -> Result<Snapshot> {
    let mut counts = BTreeMap::new();
    for table in PROJECTION_TABLES {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await?;
        counts.insert(table.to_string(), count);
    }

    let mut checksums = BTreeMap::new();
    for table in CHECKSUMMED {
        // PK order makes the digest independent of insertion order.
        let ids: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT event_id::TEXT FROM {table} ORDER BY event_id"
        ))
        .fetch_all(pool)
        .await?;
        let mut hasher = Sha256::new();
        for (id,) in &ids {
            hasher.update(id.as_bytes());
        }
        checksums.insert(table.to_string(), hex::encode(hasher.finalize()));
    }

    Ok(Snapshot { counts, checksums })
}

/// Tear down the read views and rebuild them from seq 1.
pub async fn run_replay(
    pool: &PgPool,
    store: &EventStore,
    materializer: &Materializer,
    options: ReplayOptions,
) -> Result<ReplayReport, TerrariumError> {
    // The lock is session-scoped, so it must live on one dedicated
    // connection for the whole run.
    let mut lock_conn = pool.acquire().await?;
    let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .bind(REPLAY_LOCK_KEY)
        .fetch_one(&mut *lock_conn)
        .await?;
    if !locked {
        return Err(TerrariumError::Validation(
            "replay already in progress".into(),
        ));
    }

    let result = rebuild(pool, store, materializer, &options).await;

    let unlock = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(REPLAY_LOCK_KEY)
        .execute(&mut *lock_conn)
        .await;
    if let Err(e) = unlock {
        warn!(error = %e, "Failed to release replay lock");
        // The lock dies with the connection anyway.
        let _ = lock_conn.detach().close().await;
    }

    result
}

async fn rebuild(
    pool: &PgPool,
    store: &EventStore,
    materializer: &Materializer,
    options: &ReplayOptions,
) -> Result<ReplayReport, TerrariumError> {
    let before = snapshot(pool).await?;
    let target = store.latest_seq().await?;
    info!(target_seq = target, "Replay starting");

    for table in PROJECTION_TABLES {
        if options.preserve.iter().any(|p| p == table) {
            continue;
        }
        sqlx::query(&format!("TRUNCATE {table}"))
            .execute(pool)
            .await?;
    }
    store.reset_offset(CONSUMER_GROUP).await?;

    let deadline = tokio::time::Instant::now() + options.timeout;
    let mut reprocessed: i64 = 0;
    loop {
        let n = materializer
            .run_once()
            .await
            .map_err(TerrariumError::Anyhow)?;
        reprocessed += n as i64;
        if n == 0 {
            let consumed = store.load_offset(CONSUMER_GROUP).await?;
            if consumed >= target {
                break;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(TerrariumError::ReplayDivergence(format!(
                "rebuild did not catch up to seq {target} within {:?}",
                options.timeout
            )));
        }
    }

    let after = snapshot(pool).await?;
    let divergences = diff(&before, &after, &options.preserve);
    if divergences.is_empty() {
        info!(events = reprocessed, "Replay converged");
    } else {
        warn!(events = reprocessed, divergences = divergences.len(), "Replay diverged");
    }

    Ok(ReplayReport {
        events_reprocessed: reprocessed,
        before,
        after,
        divergences,
    })
}

fn diff(before: &Snapshot, after: &Snapshot, preserve: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for (table, expected) in &before.counts {
        if preserve.iter().any(|p| p == table) {
            continue;
        }
        let got = after.counts.get(table).copied().unwrap_or(0);
        if got != *expected {
            out.push(format!("{table}: count {expected} before, {got} after"));
        }
    }
    for (table, expected) in &before.checksums {
        if preserve.iter().any(|p| p == table) {
            continue;
        }
        let got = after.checksums.get(table).map(String::as_str).unwrap_or("");
        if got != expected {
            out.push(format!("{table}: checksum mismatch"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(counts: &[(&str, i64)], sums: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            counts: counts
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            checksums: sums
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn identical_snapshots_have_no_divergence() {
        let a = sample(&[("live_events", 4)], &[("live_events", "abc")]);
        let b = a.clone();
        assert!(diff(&a, &b, &[]).is_empty());
    }

    #[test]
    fn count_and_checksum_drift_are_both_reported() {
        let a = sample(&[("live_events", 4)], &[("live_events", "abc")]);
        let b = sample(&[("live_events", 3)], &[("live_events", "def")]);
        let d = diff(&a, &b, &[]);
        assert_eq!(d.len(), 2);
        assert!(d[0].contains("count 4 before, 3 after"));
    }

    #[test]
    fn preserved_tables_are_exempt() {
        let a = sample(&[("sessions", 2)], &[]);
        let b = sample(&[("sessions", 0)], &[]);
        assert!(diff(&a, &b, &["sessions".to_string()]).is_empty());
    }
}
