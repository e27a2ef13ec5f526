//! Delivery of persisted notification rows: token fan-out with
//! chunking and bounded concurrency for individual recipients, a
//! single publish for role topics.

use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::provider::{is_invalid_token_error, PushMessage, PushProvider};
use super::registry;

/// A persisted notification awaiting delivery.
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub title: String,
    pub body: String,
    pub data: Value,
    pub recipient_type: String,
    pub recipient_id: String,
}

pub fn is_broadcast_id(id: &str) -> bool {
    matches!(id, "ALL" | "BROADCAST" | "*")
}

pub struct Dispatcher {
    db: Arc<Mutex<Connection>>,
    provider: Arc<dyn PushProvider>,
    semaphore: Arc<Semaphore>,
    chunk_size: usize,
}

impl Dispatcher {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        provider: Arc<dyn PushProvider>,
        concurrency: usize,
        chunk_size: usize,
    ) -> Dispatcher {
        Dispatcher {
            db,
            provider,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            chunk_size: chunk_size.max(1),
        }
    }

    pub async fn dispatch(&self, rows: Vec<NotificationRow>) {
        for row in rows {
            self.send_row(&row).await;
        }
    }

    async fn send_row(&self, row: &NotificationRow) {
        let msg = PushMessage {
            title: row.title.clone(),
            body: row.body.clone(),
            data: coerce_data(&row.data),
        };

        if is_broadcast_id(&row.recipient_id) {
            self.send_topic(row, &msg).await;
        } else {
            self.send_individual(row, &msg).await;
        }
    }

    async fn send_topic(&self, row: &NotificationRow, msg: &PushMessage) {
        let Some(topic) = registry::topic_for_role(&row.recipient_type) else {
            self.mark_failed(&row.id, "unknown_recipient_type", &row.recipient_type)
                .await;
            return;
        };
        match self.provider.send_to_topic(topic, msg).await {
            Ok(()) => {
                info!(notification = %row.id, topic, "topic notification sent");
                self.mark_sent(&row.id).await;
            }
            Err(e) => {
                warn!(notification = %row.id, topic, error = %e, "topic notification failed");
                self.mark_failed(&row.id, e.code(), &e.to_string()).await;
            }
        }
    }

    async fn send_individual(&self, row: &NotificationRow, msg: &PushMessage) {
        let tokens = {
            let conn = self.db.lock().await;
            registry::list_valid_tokens(&conn, &row.recipient_type, &row.recipient_id)
        };
        let tokens = match tokens {
            Ok(t) => t,
            Err(e) => {
                self.mark_failed(&row.id, "token_lookup_failed", &e.message).await;
                return;
            }
        };
        if tokens.is_empty() {
            self.mark_failed(&row.id, "no_tokens", "recipient has no registered devices")
                .await;
            return;
        }

        let mut tasks: JoinSet<Result<Vec<super::provider::TokenOutcome>, super::provider::ProviderError>> =
            JoinSet::new();
        for chunk in tokens.chunks(self.chunk_size) {
            let chunk = chunk.to_vec();
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&self.semaphore);
            let msg = msg.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("dispatch semaphore closed");
                provider.multicast(&chunk, &msg).await
            });
        }

        let mut delivered_any = false;
        let mut first_error: Option<(String, String)> = None;
        let mut dead_tokens: Vec<String> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcomes)) => {
                    for outcome in outcomes {
                        if outcome.delivered {
                            delivered_any = true;
                        } else if let Some(code) = outcome.error_code {
                            if is_invalid_token_error(&code) {
                                dead_tokens.push(outcome.token.clone());
                            }
                            if first_error.is_none() {
                                first_error =
                                    Some((code, format!("delivery failed for {}", outcome.token)));
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some((e.code().to_string(), e.to_string()));
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(("dispatch_panic".to_string(), e.to_string()));
                    }
                }
            }
        }

        if !dead_tokens.is_empty() {
            let conn = self.db.lock().await;
            if let Err(e) = registry::invalidate(&conn, &dead_tokens) {
                warn!(error = %e.message, "failed to invalidate dead tokens");
            }
        }

        if delivered_any {
            info!(notification = %row.id, tokens = tokens.len(), "notification sent");
            self.mark_sent(&row.id).await;
        } else {
            let (code, message) = first_error
                .unwrap_or_else(|| ("unknown".to_string(), "no provider outcome".to_string()));
            warn!(notification = %row.id, code = %code, "notification failed");
            self.mark_failed(&row.id, &code, &message).await;
        }
    }

    async fn mark_sent(&self, notification_id: &str) {
        let conn = self.db.lock().await;
        let result = conn.execute(
            "UPDATE notifications SET status = 'sent', sent_at = ? WHERE id = ?",
            (Utc::now().to_rfc3339(), notification_id),
        );
        if let Err(e) = result {
            warn!(notification = %notification_id, error = %e, "failed to mark notification sent");
        }
    }

    async fn mark_failed(&self, notification_id: &str, code: &str, message: &str) {
        let conn = self.db.lock().await;
        let update = conn.execute(
            "UPDATE notifications SET status = 'failed' WHERE id = ?",
            [notification_id],
        );
        let insert = conn.execute(
            "INSERT INTO notification_failures(id, notification_id, error_code, error_message, failed_at)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                notification_id,
                code,
                message,
                Utc::now().to_rfc3339(),
            ),
        );
        if let Err(e) = update.and(insert) {
            warn!(notification = %notification_id, error = %e, "failed to record notification failure");
        }
    }
}

/// `data` values travel as strings on the wire; everything non-string
/// is rendered through its JSON form.
fn coerce_data(data: &Value) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(obj) = data.as_object() {
        for (k, v) in obj {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(k.clone(), s);
        }
    }
    out
}
