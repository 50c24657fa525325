use dotenv::dotenv;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use competitor_crawler::api::{self, AppState};
use competitor_crawler::scheduler;
use competitor_crawler::store::{ContentStore, PgStore};
use competitor_crawler::{Engine, EngineConfig};

const DB_CONNECT_ATTEMPTS: u32 = 15;

async fn connect_db(db_url: &str) -> anyhow::Result<PgPool> {
    info!("🔌 connecting to database");
    let mut attempts = 0;
    loop {
        match PgPoolOptions::new().max_connections(5).connect(db_url).await {
            Ok(pool) => {
                info!("✅ database connected");
                return Ok(pool);
            }
            Err(e) => {
                attempts += 1;
                if attempts >= DB_CONNECT_ATTEMPTS {
                    error!("🔥 failed to connect to database after {} attempts", attempts);
                    return Err(e.into());
                }
                warn!(
                    "⚠️ database connect failed ({}), retrying in 2s (attempt {}/{})",
                    e, attempts, DB_CONNECT_ATTEMPTS
                );
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,competitor_crawler=debug")),
        )
        .init();

    let config = EngineConfig::from_env();
    let engine = Arc::new(Engine::from_config(&config).await?);

    let store: Option<Arc<dyn ContentStore>> = match env::var("DATABASE_URL") {
        Ok(db_url) if !db_url.is_empty() => {
            let pg = PgStore::new(connect_db(&db_url).await?);
            pg.init_schema().await?;
            Some(Arc::new(pg))
        }
        _ => {
            info!("DATABASE_URL not set, analyses will not be persisted");
            None
        }
    };

    // Kept alive for the lifetime of the server.
    let _scheduler = match scheduler::start_scheduler(engine.proxies().clone()).await {
        Ok(sched) => Some(sched),
        Err(e) => {
            error!("🔥 scheduler error: {}", e);
            None
        }
    };

    let state = Arc::new(AppState { engine, store });
    let app = api::router(state);

    let port = env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
