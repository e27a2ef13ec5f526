use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::http::error::{ok, ApiError};
use crate::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    // A trivial query doubles as a store liveness probe.
    let conn = state.db.lock().await;
    let _: i64 = conn.query_row("SELECT COUNT(*) FROM classrooms", [], |r| r.get(0))?;
    Ok(ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "db": "ok",
    })))
}
