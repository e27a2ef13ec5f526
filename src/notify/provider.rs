//! Push provider interface and the FCM (legacy HTTP API) implementation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("push transport error: {0}")]
    Transport(String),
    #[error("push provider rejected the request: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Transport(_) => "transport_error",
            ProviderError::Rejected(_) => "provider_rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
}

/// Per-token multicast result. `error_code` carries the provider's
/// error string when delivery to that token failed.
#[derive(Debug, Clone)]
pub struct TokenOutcome {
    pub token: String,
    pub delivered: bool,
    pub error_code: Option<String>,
}

/// Provider error strings that mean the token itself is dead and
/// should be invalidated, as opposed to a transient delivery failure.
pub fn is_invalid_token_error(code: &str) -> bool {
    matches!(
        code,
        "NotRegistered" | "InvalidRegistration" | "MissingRegistration"
    )
}

#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn multicast(
        &self,
        tokens: &[String],
        msg: &PushMessage,
    ) -> Result<Vec<TokenOutcome>, ProviderError>;

    /// Broadcast to a topic. Topic publishes yield no per-token results.
    async fn send_to_topic(&self, topic: &str, msg: &PushMessage) -> Result<(), ProviderError>;

    async fn subscribe_to_topic(&self, topic: &str, tokens: &[String])
        -> Result<(), ProviderError>;

    async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<(), ProviderError>;
}

const FCM_SEND_URL: &str = "https://fcm.googleapis.com/fcm/send";
const IID_BATCH_ADD_URL: &str = "https://iid.googleapis.com/iid/v1:batchAdd";
const IID_BATCH_REMOVE_URL: &str = "https://iid.googleapis.com/iid/v1:batchRemove";

pub struct FcmProvider {
    client: reqwest::Client,
    server_key: String,
}

impl FcmProvider {
    pub fn new(server_key: String) -> FcmProvider {
        FcmProvider {
            client: reqwest::Client::new(),
            server_key,
        }
    }

    async fn post_json(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("key={}", self.server_key))
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ProviderError::Rejected(format!(
                "{} returned {}",
                url,
                resp.status()
            )));
        }
        Ok(resp)
    }
}

#[derive(Debug, Deserialize)]
struct FcmSendResponse {
    #[serde(default)]
    results: Vec<FcmTokenResult>,
}

#[derive(Debug, Deserialize)]
struct FcmTokenResult {
    message_id: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl PushProvider for FcmProvider {
    async fn multicast(
        &self,
        tokens: &[String],
        msg: &PushMessage,
    ) -> Result<Vec<TokenOutcome>, ProviderError> {
        let payload = json!({
            "registration_ids": tokens,
            "notification": { "title": msg.title, "body": msg.body },
            "data": msg.data,
        });
        let resp = self.post_json(FCM_SEND_URL, &payload).await?;
        let parsed: FcmSendResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        // FCM answers positionally, one result per requested token.
        let outcomes = tokens
            .iter()
            .zip(parsed.results.into_iter())
            .map(|(token, r)| TokenOutcome {
                token: token.clone(),
                delivered: r.message_id.is_some() && r.error.is_none(),
                error_code: r.error,
            })
            .collect();
        Ok(outcomes)
    }

    async fn send_to_topic(&self, topic: &str, msg: &PushMessage) -> Result<(), ProviderError> {
        let payload = json!({
            "to": format!("/topics/{}", topic),
            "notification": { "title": msg.title, "body": msg.body },
            "data": msg.data,
        });
        self.post_json(FCM_SEND_URL, &payload).await?;
        Ok(())
    }

    async fn subscribe_to_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<(), ProviderError> {
        let payload = json!({
            "to": format!("/topics/{}", topic),
            "registration_tokens": tokens,
        });
        self.post_json(IID_BATCH_ADD_URL, &payload).await?;
        Ok(())
    }

    async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<(), ProviderError> {
        let payload = json!({
            "to": format!("/topics/{}", topic),
            "registration_tokens": tokens,
        });
        self.post_json(IID_BATCH_REMOVE_URL, &payload).await?;
        Ok(())
    }
}
