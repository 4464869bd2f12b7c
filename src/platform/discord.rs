use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::event::{Author, EventKind, Platform};
use crate::pipeline::Ingestor;

use super::rest::{impersonated_body, RestClient};
use super::{MessageRef, PlatformAdapter, PlatformError, WebhookCredentials};

const API_BASE: &str = "https://discord.com/api/v10";

/// Outbound Discord client. The gateway websocket is an external
/// collaborator; it pushes raw payloads through [`handle_gateway_event`]
/// once an [`Ingestor`] has been bound.
///
/// [`handle_gateway_event`]: DiscordAdapter::handle_gateway_event
pub struct DiscordAdapter {
    rest: RestClient,
    ingest: RwLock<Option<Arc<Ingestor>>>,
}

impl DiscordAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(API_BASE, token)
    }

    pub fn with_api_base(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            rest: RestClient::new(api_base, token),
            ingest: RwLock::new(None),
        }
    }

    pub async fn bind_ingest(&self, ingest: Arc<Ingestor>) {
        *self.ingest.write().await = Some(ingest);
    }

    /// Entry point for the gateway transport.
    pub async fn handle_gateway_event(&self, kind: EventKind, raw: &Value) {
        let ingest = self.ingest.read().await.clone();
        let Some(ingest) = ingest else {
            debug!("ignoring discord gateway event before ingest binding");
            return;
        };
        ingest.submit_raw(Platform::Discord, kind, raw).await;
    }
}

#[async_trait]
impl PlatformAdapter for DiscordAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    fn supports_webhook_edit(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), PlatformError> {
        let me = self.rest.get("/users/@me").await?;
        info!(
            user = %me.get("username").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "discord token validated"
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        info!("discord adapter disconnected");
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
        Ok(credentials_from(&created))
    }

    async fn fetch_webhook(
        &self,
        channel_id: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError> {
        let webhooks = self
            .rest
            .get(&format!("/channels/{channel_id}/webhooks"))
            .await?;
        Ok(webhooks
            .as_array()
            .into_iter()
            .flatten()
            .find_map(credentials_from))
    }

    async fn send_webhook(
        &self,
        credentials: &WebhookCredentials,
        content: &str,
        username: &str,
        avatar_url: Option<&str>,
        _channel_id: Option<&str>,
    ) -> Result<Option<String>, PlatformError> {
        let mut body = json!({ "content": content, "username": username });
        if let Some(avatar_url) = avatar_url {
            body["avatar_url"] = Value::String(avatar_url.to_string());
        }

        // ?wait=true makes the API return the created message.
        let message = self
            .rest
            .post(
                &format!(
                    "/webhooks/{}/{}?wait=true",
                    credentials.id, credentials.token
                ),
                &body,
            )
            .await?;
        Ok(message
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    async fn edit_webhook_message(
        &self,
        credentials: &WebhookCredentials,
        message_id: &str,
        content: &str,
    ) -> Result<bool, PlatformError> {
        self.rest
            .patch(
                &format!(
                    "/webhooks/{}/{}/messages/{message_id}",
                    credentials.id, credentials.token
                ),
                &json!({ "content": content }),
            )
            .await?;
        Ok(true)
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
            .ok_or_else(|| {
                warn!(channel_id, "discord send returned no message id");
                PlatformError::Transient("send response carried no id".to_string())
            })?
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

fn credentials_from(webhook: &Value) -> Option<WebhookCredentials> {
    let id = webhook.get("id").and_then(Value::as_str)?;
    let token = webhook.get("token").and_then(Value::as_str)?;
    Some(WebhookCredentials {
        id: id.to_string(),
        token: token.to_string(),
    })
}
