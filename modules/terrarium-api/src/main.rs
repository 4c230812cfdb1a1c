use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use terrarium_api::{router, AppState};
use terrarium_common::Config;
use terrarium_events::{EventStore, OutboxDispatcher};
use terrarium_projector::Materializer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("terrarium=info".parse()?))
        .init();

    info!("Terrarium API starting");

    let config = Config::from_env();
    let pool = PgPool::connect(&config.database_url).await?;

    terrarium_events::ensure_schema(&pool).await?;
    terrarium_gate::ensure_schema(&pool).await?;
    terrarium_physics::ensure_schema(&pool).await?;
    terrarium_pressure::ensure_schema(&pool).await?;
    terrarium_projector::ensure_schema(&pool).await?;

    terrarium_gate::seed_catalog(&pool).await?;
    terrarium_physics::seed_default_regimes(&pool).await?;
    info!("Schema ensured, catalog and regimes seeded");

    let store = EventStore::new(pool.clone());

    let dispatcher = OutboxDispatcher::new(pool.clone(), store.clone());
    let outbox_poll = Duration::from_secs(config.outbox_poll_secs);
    tokio::spawn(async move { dispatcher.run(outbox_poll).await });

    let materializer = Materializer::new(pool.clone(), store.clone(), config.session_gap_secs);
    let projector_poll = Duration::from_secs(config.projector_poll_secs);
    tokio::spawn(async move { materializer.run(projector_poll).await });

    let state = Arc::new(AppState::new(pool, config.chronicle_page_cap));
    let app = router(state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
