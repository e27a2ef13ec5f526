use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use campusd::config::Config;
use campusd::notify::provider::FcmProvider;
use campusd::{build_router, build_state, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("campusd=info")),
        )
        .init();

    let cfg = Config::from_env();
    let conn = db::open_db(&cfg.db_path)?;
    info!(db = %cfg.db_path.display(), "database ready");

    // Provider credentials load once; the handle is shared for the
    // process lifetime.
    let provider = Arc::new(FcmProvider::new(cfg.fcm_server_key.clone()));

    let addr = cfg.addr.clone();
    let state = build_state(cfg, conn, provider);
    let router = build_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "campusd listening");
    axum::serve(listener, router).await?;
    Ok(())
}
