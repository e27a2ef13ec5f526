use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::http::auth;
use crate::http::error::{ok, ok_with_message, ApiError};
use crate::notify::orchestrator::{self, SendInput};
use crate::notify::registry;
use crate::AppState;

pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<SendInput>,
) -> Result<Json<Value>, ApiError> {
    {
        let conn = state.db.lock().await;
        let principal = auth::authenticate(&conn, &headers)?;
        auth::require_admin(&principal)?;
    }

    let receipt = orchestrator::send(
        &state.db,
        &state.dispatcher,
        state.cfg.notification_driver,
        input,
    )
    .await?;
    // Delivery continues in the background; the caller only waits for
    // persistence.
    drop(receipt.delivery);

    Ok(ok_with_message(
        json!({ "notificationIds": receipt.notification_ids }),
        "notifications queued",
    ))
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let conn = state.db.lock().await;
    let principal = auth::authenticate(&conn, &headers)?;
    auth::require_admin(&principal)?;

    let mut stmt = conn.prepare(
        "SELECT n.id, n.title, n.body, n.recipient_type, n.recipient_id, n.status,
                n.sent_at, n.created_at,
                (SELECT f.error_code FROM notification_failures f
                 WHERE f.notification_id = n.id ORDER BY f.failed_at DESC LIMIT 1)
         FROM notifications n
         ORDER BY n.created_at DESC
         LIMIT 100",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "notificationId": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "body": r.get::<_, String>(2)?,
                "recipientType": r.get::<_, String>(3)?,
                "recipientId": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "sentAt": r.get::<_, Option<String>>(6)?,
                "createdAt": r.get::<_, String>(7)?,
                "errorCode": r.get::<_, Option<String>>(8)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ok(json!({ "notifications": rows })))
}

#[derive(Debug, Deserialize)]
pub struct RegisterTokenInput {
    pub token: String,
    pub platform: String,
}

/// Registers the caller's device token under their own principal and
/// reconciles the role-topic subscription.
pub async fn register_device_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(input): Json<RegisterTokenInput>,
) -> Result<Json<Value>, ApiError> {
    if input.token.trim().is_empty() {
        return Err(ApiError::validation("token must be non-empty"));
    }
    let change = {
        let conn = state.db.lock().await;
        let principal = auth::authenticate(&conn, &headers)?;
        registry::register(
            &conn,
            input.token.trim(),
            &input.platform,
            principal.role.as_str(),
            &principal.user_id,
        )?
    };
    registry::apply_topic_change(&state.provider, &change).await;
    Ok(ok_with_message(json!({ "registered": true }), "device token registered"))
}

pub async fn unregister_device_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let change = {
        let conn = state.db.lock().await;
        let _principal = auth::authenticate(&conn, &headers)?;
        registry::unregister(&conn, &token)?
    };
    let Some(change) = change else {
        return Err(ApiError::not_found("NOT_FOUND", "device token not registered"));
    };
    registry::apply_topic_change(&state.provider, &change).await;
    Ok(ok_with_message(json!({ "unregistered": true }), "device token removed"))
}
