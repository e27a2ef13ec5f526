pub mod config;
pub mod db;
pub mod exam_engine;
pub mod grading;
pub mod http;
pub mod notify;
pub mod results_view;

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use config::Config;
use notify::dispatcher::Dispatcher;
use notify::provider::PushProvider;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub cfg: Config,
    pub provider: Arc<dyn PushProvider>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Wires the shared state: one store connection, one provider handle,
/// one dispatcher with its process-wide concurrency semaphore.
pub fn build_state(cfg: Config, conn: Connection, provider: Arc<dyn PushProvider>) -> Arc<AppState> {
    let db = Arc::new(Mutex::new(conn));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&db),
        Arc::clone(&provider),
        cfg.dispatch_concurrency,
        cfg.dispatch_chunk_size,
    ));
    Arc::new(AppState {
        db,
        cfg,
        provider,
        dispatcher,
    })
}

pub use http::build_router;
