use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::event::{Author, Platform};

use super::{MessageRef, PlatformAdapter, PlatformError, WebhookCredentials};

/// Every outbound call a [`MockAdapter`] observed, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    CreateWebhook {
        channel_id: String,
    },
    SendWebhook {
        webhook_id: String,
        content: String,
        username: String,
        avatar_url: Option<String>,
        channel_id: Option<String>,
    },
    EditWebhookMessage {
        message_id: String,
        content: String,
    },
    DeleteWebhookMessage {
        message_id: String,
    },
    SendMessage {
        channel_id: String,
        content: String,
        impersonate: Option<String>,
    },
    EditMessage {
        channel_id: String,
        message_id: String,
        content: String,
    },
    DeleteMessage {
        channel_id: String,
        message_id: String,
    },
}

/// Scriptable in-memory adapter for pipeline tests.
pub struct MockAdapter {
    platform: Platform,
    supports_webhook_edit: bool,
    pub calls: Mutex<Vec<MockCall>>,
    next_id: AtomicU64,
    /// When set, webhook sends return no message id (a missed correlated
    /// capture).
    pub webhook_send_returns_none: Mutex<bool>,
    /// One-shot error injected into the next outbound call.
    pub fail_next: Mutex<Option<PlatformError>>,
}

impl MockAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            supports_webhook_edit: platform == Platform::Discord,
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            webhook_send_returns_none: Mutex::new(false),
            fail_next: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    fn take_failure(&self) -> Option<PlatformError> {
        self.fail_next.lock().unwrap().take()
    }

    fn fresh_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn supports_webhook_edit(&self) -> bool {
        self.supports_webhook_edit
    }

    async fn connect(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn create_webhook(
        &self,
        channel_id: &str,
        _name: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.calls.lock().unwrap().push(MockCall::CreateWebhook {
            channel_id: channel_id.to_string(),
        });
        Ok(Some(WebhookCredentials {
            id: self.fresh_id("wh"),
            token: self.fresh_id("tok"),
        }))
    }

    async fn fetch_webhook(
        &self,
        _channel_id: &str,
    ) -> Result<Option<WebhookCredentials>, PlatformError> {
        Ok(None)
    }

    async fn send_webhook(
        &self,
        credentials: &WebhookCredentials,
        content: &str,
        username: &str,
        avatar_url: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<Option<String>, PlatformError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.calls.lock().unwrap().push(MockCall::SendWebhook {
            webhook_id: credentials.id.clone(),
            content: content.to_string(),
            username: username.to_string(),
            avatar_url: avatar_url.map(str::to_string),
            channel_id: channel_id.map(str::to_string),
        });
        if *self.webhook_send_returns_none.lock().unwrap() {
            Ok(None)
        } else {
            Ok(Some(self.fresh_id("msg")))
        }
    }

    async fn edit_webhook_message(
        &self,
        _credentials: &WebhookCredentials,
        message_id: &str,
        content: &str,
    ) -> Result<bool, PlatformError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.calls.lock().unwrap().push(MockCall::EditWebhookMessage {
            message_id: message_id.to_string(),
            content: content.to_string(),
        });
        Ok(self.supports_webhook_edit)
    }

    async fn delete_webhook_message(
        &self,
        _credentials: &WebhookCredentials,
        message_id: &str,
    ) -> Result<bool, PlatformError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.calls
            .lock()
            .unwrap()
            .push(MockCall::DeleteWebhookMessage {
                message_id: message_id.to_string(),
            });
        Ok(true)
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        impersonate: Option<&Author>,
    ) -> Result<MessageRef, PlatformError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.calls.lock().unwrap().push(MockCall::SendMessage {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            impersonate: impersonate.map(|a| a.name.clone()),
        });
        Ok(MessageRef {
            id: self.fresh_id("native"),
        })
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<(), PlatformError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.calls.lock().unwrap().push(MockCall::EditMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
        });
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> Result<(), PlatformError> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        self.calls.lock().unwrap().push(MockCall::DeleteMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
        });
        Ok(())
    }
}
