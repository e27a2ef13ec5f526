//! Turns a business event plus recipient spec into persisted
//! notification rows and hands them to the dispatcher.
//!
//! Persistence is awaited by the caller; delivery runs on a spawned
//! task that outlives the originating request. The join handle is
//! surfaced so tests (and callers that care) can await completion.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::dispatcher::{is_broadcast_id, Dispatcher, NotificationRow};
use crate::config::NotificationDriver;
use crate::http::error::ApiError;

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientSpec {
    pub role: String,
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendInput {
    /// Optional event type; a matching active template overrides
    /// `title`/`body`.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    pub title: String,
    pub body: String,
    pub recipients: Vec<RecipientSpec>,
    #[serde(default)]
    pub data: Option<Value>,
}

pub struct SendReceipt {
    pub notification_ids: Vec<String>,
    pub delivery: Option<JoinHandle<()>>,
}

pub async fn send(
    db: &Arc<Mutex<Connection>>,
    dispatcher: &Arc<Dispatcher>,
    driver: NotificationDriver,
    input: SendInput,
) -> Result<SendReceipt, ApiError> {
    if input.recipients.is_empty() {
        return Err(ApiError::validation("recipients must be non-empty"));
    }

    // One logical recipient per persisted row; `all` broadcasts expand
    // to one row per role topic.
    let mut targets: Vec<(String, String)> = Vec::new();
    for spec in &input.recipients {
        match spec.role.as_str() {
            "student" | "teacher" | "admin" => {
                if is_broadcast_id(&spec.id) {
                    targets.push((spec.role.clone(), "ALL".to_string()));
                } else {
                    targets.push((spec.role.clone(), spec.id.clone()));
                }
            }
            "all" => {
                if !is_broadcast_id(&spec.id) {
                    return Err(ApiError::validation(
                        "role 'all' requires a broadcast recipient id",
                    ));
                }
                for role in ["student", "teacher", "admin"] {
                    targets.push((role.to_string(), "ALL".to_string()));
                }
            }
            other => {
                return Err(ApiError::validation("unknown recipient role")
                    .with_details(json!({ "role": other })));
            }
        }
    }

    let dispatch_mode = match driver {
        NotificationDriver::Sync => "sync",
        NotificationDriver::Queue => "queue",
    };
    let data = input.data.clone().unwrap_or_else(|| json!({}));

    let rows = {
        let conn = db.lock().await;
        let (template_id, title, body) =
            resolve_template(&conn, input.event_type.as_deref(), &input.title, &input.body)?;

        let now = Utc::now().to_rfc3339();
        let mut rows: Vec<NotificationRow> = Vec::with_capacity(targets.len());
        for (recipient_type, recipient_id) in &targets {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO notifications(id, template_id, title, body, data, dispatch_mode,
                                           recipient_type, recipient_id, status, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
                (
                    &id,
                    &template_id,
                    &title,
                    &body,
                    data.to_string(),
                    dispatch_mode,
                    recipient_type,
                    recipient_id,
                    &now,
                ),
            )?;
            rows.push(NotificationRow {
                id,
                title: title.clone(),
                body: body.clone(),
                data: data.clone(),
                recipient_type: recipient_type.clone(),
                recipient_id: recipient_id.clone(),
            });
        }
        rows
    };

    let notification_ids = rows.iter().map(|r| r.id.clone()).collect();
    let delivery = match driver {
        NotificationDriver::Sync => {
            let dispatcher = Arc::clone(dispatcher);
            Some(tokio::spawn(async move {
                dispatcher.dispatch(rows).await;
            }))
        }
        // Rows stay pending for the external queue consumer.
        NotificationDriver::Queue => None,
    };

    Ok(SendReceipt {
        notification_ids,
        delivery,
    })
}

fn resolve_template(
    conn: &Connection,
    event_type: Option<&str>,
    title: &str,
    body: &str,
) -> Result<(Option<String>, String, String), ApiError> {
    let Some(event_type) = event_type else {
        return Ok((None, title.to_string(), body.to_string()));
    };
    let template: Option<(String, String, String)> = conn
        .query_row(
            "SELECT id, title_template, body_template FROM notification_templates
             WHERE type = ? AND is_active = 1",
            [event_type],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    match template {
        Some((id, t, b)) => Ok((Some(id), t, b)),
        None => Ok((None, title.to_string(), body.to_string())),
    }
}
