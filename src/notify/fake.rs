//! Scripted in-process push provider for tests. Records every call and
//! reports scripted invalid tokens the way FCM would.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::provider::{ProviderError, PushMessage, PushProvider, TokenOutcome};

#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    Multicast { tokens: Vec<String>, title: String },
    Topic { topic: String, title: String },
    Subscribe { topic: String, tokens: Vec<String> },
    Unsubscribe { topic: String, tokens: Vec<String> },
}

#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<FakeCall>>,
    stale_tokens: Mutex<HashSet<String>>,
    fail_transport: AtomicBool,
}

impl FakeProvider {
    pub fn new() -> FakeProvider {
        FakeProvider::default()
    }

    /// Future multicasts report this token as `NotRegistered`.
    pub fn mark_stale(&self, token: &str) {
        self.stale_tokens
            .lock()
            .expect("stale token set")
            .insert(token.to_string());
    }

    /// When set, every provider call fails with a transport error.
    pub fn set_transport_failure(&self, fail: bool) {
        self.fail_transport.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().expect("call log").clone()
    }

    fn record(&self, call: FakeCall) -> Result<(), ProviderError> {
        self.calls.lock().expect("call log").push(call);
        if self.fail_transport.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport("scripted failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PushProvider for FakeProvider {
    async fn multicast(
        &self,
        tokens: &[String],
        msg: &PushMessage,
    ) -> Result<Vec<TokenOutcome>, ProviderError> {
        self.record(FakeCall::Multicast {
            tokens: tokens.to_vec(),
            title: msg.title.clone(),
        })?;
        let stale = self.stale_tokens.lock().expect("stale token set");
        Ok(tokens
            .iter()
            .map(|t| {
                if stale.contains(t) {
                    TokenOutcome {
                        token: t.clone(),
                        delivered: false,
                        error_code: Some("NotRegistered".to_string()),
                    }
                } else {
                    TokenOutcome {
                        token: t.clone(),
                        delivered: true,
                        error_code: None,
                    }
                }
            })
            .collect())
    }

    async fn send_to_topic(&self, topic: &str, msg: &PushMessage) -> Result<(), ProviderError> {
        self.record(FakeCall::Topic {
            topic: topic.to_string(),
            title: msg.title.clone(),
        })
    }

    async fn subscribe_to_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<(), ProviderError> {
        self.record(FakeCall::Subscribe {
            topic: topic.to_string(),
            tokens: tokens.to_vec(),
        })
    }

    async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<(), ProviderError> {
        self.record(FakeCall::Unsubscribe {
            topic: topic.to_string(),
            tokens: tokens.to_vec(),
        })
    }
}
