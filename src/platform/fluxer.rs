use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};

use crate::event::{Author, EventKind, Platform};
use crate::pipeline::Ingestor;

use super::rest::{impersonated_body, RestClient};
use super::{MessageRef, PlatformAdapter, PlatformError, WebhookCredentials};

const API_BASE: &str = "https://api.fluxer.app/v1";

/// How long a webhook send waits for its own gateway echo before giving up
/// on learning the message id.
const CAPTURE_WINDOW: Duration = Duration::from_secs(5);

type CaptureKey = (String, String, String);

/// Fluxer's webhook execute endpoint returns 204, so the only way to learn
/// the created message id is to watch for the gateway echo of our own post.
/// Pending sends are keyed on `(channel, content, username)` and resolved by
/// the first matching inbound message.
struct CorrelatedCapture {
    pending: Mutex<HashMap<CaptureKey, oneshot::Sender<String>>>,
}

impl CorrelatedCapture {
    fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn subscribe(
        &self,
        channel_id: &str,
        content: &str,
        username: &str,
    ) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(
            (
                channel_id.to_string(),
                content.to_string(),
                username.to_string(),
            ),
            tx,
        );
        rx
    }

    fn unsubscribe(&self, channel_id: &str, content: &str, username: &str) {
        self.pending.lock().unwrap().remove(&(
            channel_id.to_string(),
            content.to_string(),
            username.to_string(),
        ));
    }

    /// Hands the message id to a waiting send, if any. Returns whether the
    /// event was consumed as an echo of our own post.
    fn resolve(&self, channel_id: &str, content: &str, username: &str, message_id: &str) -> bool {
        let sender = self.pending.lock().unwrap().remove(&(
            channel_id.to_string(),
            content.to_string(),
            username.to_string(),
        ));
        match sender {
            Some(sender) => sender.send(message_id.to_string()).is_ok(),
            None => false,
        }
    }
}

/// Outbound Fluxer client. Discord-compatible REST surface, with two
/// differences the pipeline cares about: webhook messages cannot be edited,
/// and webhook sends return no id (see [`CorrelatedCapture`]).
pub struct FluxerAdapter {
    rest: RestClient,
    capture: CorrelatedCapture,
    ingest: RwLock<Option<Arc<Ingestor>>>,
}

impl FluxerAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(API_BASE, token)
    }

    pub fn with_api_base(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            rest: RestClient::new(api_base, token),
            capture: CorrelatedCapture::new(),
            ingest: RwLock::new(None),
        }
    }

    pub async fn bind_ingest(&self, ingest: Arc<Ingestor>) {
        *self.ingest.write().await = Some(ingest);
    }

    /// Entry point for the gateway transport. Create events first service
    /// any pending correlated capture, then flow into the pipeline (the loop
    /// filter drops them there).
    pub async fn handle_gateway_event(&self, kind: EventKind, raw: &Value) {
        if kind == EventKind::MsgCreate {
            let channel_id = raw.get("channel_id").and_then(Value::as_str);
            let content = raw.get("content").and_then(Value::as_str);
            let username = raw
                .get("author")
                .and_then(|a| a.get("username"))
                .and_then(Value::as_str);
            let message_id = raw.get("id").and_then(Value::as_str);
            if let (Some(channel_id), Some(content), Some(username), Some(message_id)) =
                (channel_id, content, username, message_id)
            {
                if self.capture.resolve(channel_id, content, username, message_id) {
                    debug!(channel_id, message_id, "captured webhook echo");
                }
            }
        }

        let ingest = self.ingest.read().await.clone();
        let Some(ingest) = ingest else {
            debug!("ignoring fluxer gateway event before ingest binding");
            return;
        };
        ingest.submit_raw(Platform::Fluxer, kind, raw).await;
    }
}

#[async_trait]
impl PlatformAdapter for FluxerAdapter {
    fn platform(&self) -> Platform {
        Platform::Fluxer
    }

    /// Fluxer's API refuses edits of impersonated webhook posts; the
    /// delivery worker applies the jump-link workaround instead.
    fn supports_webhook_edit(&self) -> bool {
        false
    }

    async fn connect(&self) -> Result<(), PlatformError> {
        let me = self.rest.get("/users/@me").await?;
        info!(
            user = %me.get("username").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "fluxer token validated"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        info!("fluxer adapter disconnected");
        Ok(())
    }

    async fn create_webhook(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError> {
        let created = self
            .rest
            .post(
                &format!("/channels/{channel_id}/webhooks"),
                &json!({ "name": name }),
            )
            .await?;
        let id = created.get("id").and_then(Value::as_str);
        let token = created.get("token").and_then(Value::as_str);
        Ok(match (id, token) {
            (Some(id), Some(token)) => Some(WebhookCredentials {
                id: id.to_string(),
                token: token.to_string(),
            }),
            _ => None,
        })
    }

    async fn fetch_webhook(
        &self,
        channel_id: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError> {
        let webhooks = self
            .rest
            .get(&format!("/channels/{channel_id}/webhooks"))
            .await?;
        Ok(webhooks.as_array().into_iter().flatten().find_map(|hook| {
            let id = hook.get("id").and_then(Value::as_str)?;
            let token = hook.get("token").and_then(Value::as_str)?;
            Some(WebhookCredentials {
                id: id.to_string(),
                token: token.to_string(),
            })
        }))
    }

    async fn send_webhook(
        &self,
        credentials: &WebhookCredentials,
        content: &str,
        username: &str,
        avatar_url: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<Option<String>, PlatformError> {
        // Subscribe before the POST: the echo can arrive before the HTTP
        // response does.
        let receiver =
            channel_id.map(|channel| self.capture.subscribe(channel, content, username));

        let mut body = json!({ "content": content, "username": username });
        if let Some(avatar_url) = avatar_url {
            body["avatar_url"] = Value::String(avatar_url.to_string());
        }

        let sent = self
            .rest
            .post(
                &format!("/webhooks/{}/{}", credentials.id, credentials.token),
                &body,
            )
            .await;

        let (Some(channel), Some(receiver)) = (channel_id, receiver) else {
            return sent.map(|_| None);
        };

        if let Err(e) = sent {
            self.capture.unsubscribe(channel, content, username);
            return Err(e);
        }

        match tokio::time::timeout(CAPTURE_WINDOW, receiver).await {
            Ok(Ok(message_id)) => Ok(Some(message_id)),
            _ => {
                self.capture.unsubscribe(channel, content, username);
                debug!(channel, "no echo captured for webhook send");
                Ok(None)
            }
        }
    }

    async fn edit_webhook_message(
        &self,
        _credentials: &WebhookCredentials,
        _message_id: &str,
        _content: &str,
    ) -> Result<bool, PlatformError> {
        Ok(false)
    }

    async fn delete_webhook_message(
        &self,
        credentials: &WebhookCredentials,
        message_id: &str,
    ) -> Result<bool, PlatformError> {
        self.rest
            .delete(&format!(
                "/webhooks/{}/{}/messages/{message_id}",
                credentials.id, credentials.token
            ))
            .await?;
        Ok(true)
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        impersonate: Option<&Author>,
    ) -> Result<MessageRef, PlatformError> {
        let body = match impersonate {
            Some(author) => impersonated_body(&author.name, content),
            None => content.to_string(),
        };
        let message = self
            .rest
            .post(
                &format!("/channels/{channel_id}/messages"),
                &json!({ "content": body }),
            )
            .await?;

        let id = message
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| PlatformError::Transient("send response carried no id".to_string()))?
            .to_string();
        Ok(MessageRef { id })
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PlatformError> {
        self.rest
            .patch(
                &format!("/channels/{channel_id}/messages/{message_id}"),
                &json!({ "content": content }),
            )
            .await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        self.rest
            .delete(&format!("/channels/{channel_id}/messages/{message_id}"))
            .await?;
        Ok(())
    }
}
