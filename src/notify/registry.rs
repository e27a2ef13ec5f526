//! Device token registry: (principal -> tokens) with validity, plus
//! role-topic subscription bookkeeping.
//!
//! Database writes are synchronous under the caller's connection lock;
//! the resulting topic subscription calls are returned as a
//! [`TopicChange`] and applied afterwards, so provider I/O never runs
//! while the store lock is held and can be retried independently.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::sync::Arc;
use tracing::warn;

use super::provider::PushProvider;
use crate::http::error::ApiError;

pub const ROLE_TOPICS: [&str; 3] = ["students", "teachers", "admins"];

pub fn topic_for_role(role: &str) -> Option<&'static str> {
    match role {
        "student" => Some("students"),
        "teacher" => Some("teachers"),
        "admin" => Some("admins"),
        _ => None,
    }
}

/// Topic subscriptions to reconcile after a registry write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicChange {
    pub token: String,
    pub subscribe: Vec<&'static str>,
    pub unsubscribe: Vec<&'static str>,
}

pub fn register(
    conn: &Connection,
    token: &str,
    platform: &str,
    role: &str,
    recipient_id: &str,
) -> Result<TopicChange, ApiError> {
    let Some(new_topic) = topic_for_role(role) else {
        return Err(ApiError::validation("unknown role for device token"));
    };

    let previous: Option<String> = conn
        .query_row(
            "SELECT recipient_type FROM device_tokens WHERE token = ?",
            [token],
            |r| r.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO device_tokens(token, platform, recipient_type, recipient_id, is_valid, registered_at)
         VALUES(?, ?, ?, ?, 1, ?)
         ON CONFLICT(token) DO UPDATE SET
           platform = excluded.platform,
           recipient_type = excluded.recipient_type,
           recipient_id = excluded.recipient_id,
           is_valid = 1,
           registered_at = excluded.registered_at",
        (token, platform, role, recipient_id, Utc::now().to_rfc3339()),
    )?;

    let mut change = TopicChange {
        token: token.to_string(),
        subscribe: vec![new_topic],
        unsubscribe: Vec::new(),
    };
    if let Some(previous_role) = previous {
        if let Some(old_topic) = topic_for_role(&previous_role) {
            if old_topic != new_topic {
                change.unsubscribe.push(old_topic);
            } else {
                // Same role re-registration; the subscription stands.
                change.subscribe.clear();
            }
        }
    }
    Ok(change)
}

pub fn unregister(conn: &Connection, token: &str) -> Result<Option<TopicChange>, ApiError> {
    let deleted = conn.execute("DELETE FROM device_tokens WHERE token = ?", [token])?;
    if deleted == 0 {
        return Ok(None);
    }
    Ok(Some(TopicChange {
        token: token.to_string(),
        subscribe: Vec::new(),
        unsubscribe: ROLE_TOPICS.to_vec(),
    }))
}

pub fn list_valid_tokens(
    conn: &Connection,
    role: &str,
    recipient_id: &str,
) -> Result<Vec<String>, ApiError> {
    let mut stmt = conn.prepare(
        "SELECT token FROM device_tokens
         WHERE recipient_type = ? AND recipient_id = ? AND is_valid = 1",
    )?;
    let tokens = stmt
        .query_map((role, recipient_id), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tokens)
}

/// Flips `is_valid` off; rows are kept for audit.
pub fn invalidate(conn: &Connection, tokens: &[String]) -> Result<usize, ApiError> {
    let mut changed = 0usize;
    for token in tokens {
        changed += conn.execute(
            "UPDATE device_tokens SET is_valid = 0 WHERE token = ?",
            [token],
        )?;
    }
    Ok(changed)
}

/// Best-effort topic reconciliation. A failed subscription call is
/// logged and left for the next re-registration; the DB write it
/// follows has already committed.
pub async fn apply_topic_change(provider: &Arc<dyn PushProvider>, change: &TopicChange) {
    let tokens = [change.token.clone()];
    for topic in &change.unsubscribe {
        if let Err(e) = provider.unsubscribe_from_topic(topic, &tokens).await {
            warn!(topic, error = %e, "topic unsubscribe failed");
        }
    }
    for topic in &change.subscribe {
        if let Err(e) = provider.subscribe_to_topic(topic, &tokens).await {
            warn!(topic, error = %e, "topic subscribe failed");
        }
    }
}
