use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;

use crate::exam_engine;
use crate::http::auth::{self, Role};
use crate::http::error::{ok, ApiError};
use crate::results_view;
use crate::AppState;

pub async fn exam_results(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    Ok(ok(results_view::exam_detail(&conn, &exam_id)?))
}

pub async fn rank_list(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    let exam = exam_engine::exam_row(&conn, &exam_id)?;
    auth::require_classroom_access(&principal, &exam.classroom_id)?;

    Ok(ok(results_view::rank_list(&conn, &exam_id)?))
}

pub async fn my_result(
    State(state): State<Arc<AppState>>,
    Path(exam_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    if principal.role != Role::Student {
        return Err(ApiError::forbidden("student access required"));
    }
    let Some(enrollment_id) = principal.enrollment_id.as_deref() else {
        return Err(ApiError::forbidden("no enrollment on this account"));
    };

    Ok(ok(results_view::student_transcript(
        &conn,
        &exam_id,
        enrollment_id,
    )?))
}
