use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use crate::db::{MessageMapStore, MessageMapping, PairStore};
use crate::event::{AttachmentMeta, Platform};
use crate::kv::{KvStore, NAMESPACE};
use crate::platform::{PlatformAdapter, PlatformError, PlatformRegistry, WebhookCredentials};
use crate::utils::preview_text;

use super::circuit_breaker::{CircuitBreakers, CircuitError};
use super::loop_filter::LoopFilter;
use super::queue::{JobEnvelope, JobHandler, JobOutcome};
use super::rate_limiter::RateLimiter;
use super::{DeliveryAction, DeliveryJob};

/// Jump link into a platform's web client; DM channels have no guild and
/// use the `@me` scope.
pub(crate) fn jump_link(
    web_base: &str,
    guild_id: Option<&str>,
    channel_id: &str,
    message_id: &str,
) -> String {
    let guild = guild_id.unwrap_or("@me");
    format!("{web_base}/channels/{guild}/{channel_id}/{message_id}")
}

/// Body of the edit-workaround message posted when the target platform will
/// not edit impersonated webhook posts.
pub(crate) fn edit_workaround_body(content: &str, jump_url: &str) -> String {
    format!("{content}\n-# [Jump to original message]({jump_url})")
}

/// Attachment metadata is forwarded as trailing URLs; re-upload is the
/// business of an external collaborator.
pub(crate) fn render_outbound(content: &str, attachments: &[AttachmentMeta]) -> String {
    if attachments.is_empty() {
        return content.to_string();
    }
    let mut body = String::from(content);
    for attachment in attachments {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str(&attachment.url);
    }
    body
}

fn edit_update_key(pair_id: i64, platform: Platform, source_message_id: &str) -> String {
    format!("{NAMESPACE}:edit-update:{pair_id}:{platform}:{source_message_id}")
}

/// A platform call collapsed into the queue's failure vocabulary.
enum CallError {
    Retry(String),
    RateLimited(u64),
    Permanent(String),
}

fn classify<T>(result: Result<T, CircuitError<PlatformError>>) -> Result<T, CallError> {
    match result {
        Ok(value) => Ok(value),
        Err(CircuitError::Open(name)) => Err(CallError::Retry(format!("circuit `{name}` open"))),
        Err(CircuitError::Timeout(after)) => {
            Err(CallError::Retry(format!("platform call timed out after {after:?}")))
        }
        Err(CircuitError::Inner(PlatformError::Transient(message))) => {
            Err(CallError::Retry(message))
        }
        Err(CircuitError::Inner(PlatformError::RateLimited { retry_after_ms })) => {
            Err(CallError::RateLimited(retry_after_ms))
        }
        Err(CircuitError::Inner(PlatformError::Permanent { status, message })) => {
            Err(CallError::Permanent(format!("{status}: {message}")))
        }
    }
}

/// Applies canonical events to a destination channel. One instance serves
/// every `deliver:<platform>:<channel>` queue; the job itself carries the
/// target.
pub struct DeliveryWorker {
    pairs: Arc<dyn PairStore>,
    maps: Arc<dyn MessageMapStore>,
    registry: PlatformRegistry,
    rate_limiter: Arc<RateLimiter>,
    loop_filter: Arc<LoopFilter>,
    breakers: Arc<CircuitBreakers>,
    kv: Arc<dyn KvStore>,
    fluxer_web_base_url: String,
    edit_update_ttl_secs: u64,
}

impl DeliveryWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pairs: Arc<dyn PairStore>,
        maps: Arc<dyn MessageMapStore>,
        registry: PlatformRegistry,
        rate_limiter: Arc<RateLimiter>,
        loop_filter: Arc<LoopFilter>,
        breakers: Arc<CircuitBreakers>,
        kv: Arc<dyn KvStore>,
        fluxer_web_base_url: String,
        edit_update_ttl_secs: u64,
    ) -> Self {
        Self {
            pairs,
            maps,
            registry,
            rate_limiter,
            loop_filter,
            breakers,
            kv,
            fluxer_web_base_url,
            edit_update_ttl_secs,
        }
    }

    async fn register_outbound(&self, content: &str, author_name: &str) {
        let now_ms = Utc::now().timestamp_millis();
        if let Err(e) = self.loop_filter.register(content, author_name, now_ms).await {
            warn!(error = %e, "failed to register outbound hash");
        }
    }

    /// Retryable and rate-limited failures map straight onto queue outcomes;
    /// a permanent refusal removes the mapping (further retries would loop
    /// forever) and completes the job.
    async fn failure_outcome(
        &self,
        error: CallError,
        mapping: Option<&MessageMapping>,
    ) -> JobOutcome {
        match error {
            CallError::Retry(reason) => JobOutcome::Retry(reason),
            CallError::RateLimited(delay_ms) => JobOutcome::RescheduleMs(delay_ms),
            CallError::Permanent(reason) => {
                if let Some(mapping) = mapping {
                    debug!(
                        pair_id = mapping.pair_id,
                        source_message_id = %mapping.source_message_id,
                        reason,
                        "permanent platform refusal, dropping message mapping"
                    );
                    if let Err(e) = self
                        .maps
                        .delete_mapping(
                            mapping.pair_id,
                            mapping.source_platform,
                            &mapping.source_message_id,
                        )
                        .await
                    {
                        warn!(error = %e, "failed to drop stale message mapping");
                    }
                } else {
                    debug!(reason, "permanent platform refusal, completing job");
                }
                JobOutcome::Done
            }
        }
    }

    async fn lookup_mapping(&self, job: &DeliveryJob) -> Result<Option<MessageMapping>, String> {
        self.maps
            .get_mapping(
                job.pair_id,
                job.event.source.platform,
                &job.event.source.message_id,
            )
            .await
            .map_err(|e| format!("mapping lookup failed: {e}"))
    }

    async fn deliver_create(
        &self,
        job: &DeliveryJob,
        adapter: &Arc<dyn PlatformAdapter>,
        webhook: Option<&WebhookCredentials>,
    ) -> JobOutcome {
        let event = &job.event;
        let content = event.content.trim();
        if content.is_empty() && event.attachments.is_empty() {
            debug!(
                pair_id = job.pair_id,
                message_id = %event.source.message_id,
                "empty create, nothing to deliver"
            );
            return JobOutcome::Done;
        }

        let body = render_outbound(content, &event.attachments);
        let breaker = self.breakers.get(job.target.platform.as_str());

        let sent: Result<Option<String>, CallError> = if let Some(credentials) = webhook {
            classify(
                breaker
                    .call(adapter.send_webhook(
                        credentials,
                        &body,
                        &event.author.name,
                        event.author.avatar.as_deref(),
                        Some(&job.target.channel_id),
                    ))
                    .await,
            )
        } else {
            classify(
                breaker
                    .call(adapter.send_message(
                        &job.target.channel_id,
                        &body,
                        Some(&event.author),
                    ))
                    .await,
            )
            .map(|message| Some(message.id))
        };

        let dest_message_id = match sent {
            Ok(id) => id,
            Err(e) => return self.failure_outcome(e, None).await,
        };

        if let Some(dest_message_id) = dest_message_id {
            let mapping = MessageMapping {
                id: 0,
                pair_id: job.pair_id,
                source_platform: event.source.platform,
                source_message_id: event.source.message_id.clone(),
                dest_platform: job.target.platform,
                dest_message_id,
                created_at: Utc::now(),
            };
            if let Err(e) = self.maps.upsert_mapping(&mapping).await {
                // The message is out; a retry re-sends it, which
                // at-least-once permits, and the loop filter usually
                // suppresses the duplicate.
                return JobOutcome::Retry(format!("mapping persist failed: {e}"));
            }
        } else {
            debug!(
                pair_id = job.pair_id,
                message_id = %event.source.message_id,
                "no destination id captured, edits and deletes will not follow"
            );
        }

        self.register_outbound(&body, &event.author.name).await;
        debug!(
            pair_id = job.pair_id,
            target = %job.target.platform,
            channel_id = %job.target.channel_id,
            content_preview = %preview_text(&body),
            "message delivered"
        );
        JobOutcome::Done
    }

    async fn deliver_update_direct(
        &self,
        job: &DeliveryJob,
        adapter: &Arc<dyn PlatformAdapter>,
        webhook: Option<&WebhookCredentials>,
    ) -> JobOutcome {
        let mapping = match self.lookup_mapping(job).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => return JobOutcome::Done,
            Err(reason) => return JobOutcome::Retry(reason),
        };

        let event = &job.event;
        let breaker = self.breakers.get(job.target.platform.as_str());
        let mut edited = false;

        if let Some(credentials) = webhook {
            if adapter.supports_webhook_edit() {
                match classify(
                    breaker
                        .call(adapter.edit_webhook_message(
                            credentials,
                            &mapping.dest_message_id,
                            &event.content,
                        ))
                        .await,
                ) {
                    Ok(true) => edited = true,
                    Ok(false) => {}
                    Err(e) => return self.failure_outcome(e, Some(&mapping)).await,
                }
            }
        }

        if !edited {
            match classify(
                breaker
                    .call(adapter.edit_message(
                        &job.target.channel_id,
                        &mapping.dest_message_id,
                        &event.content,
                    ))
                    .await,
            ) {
                Ok(()) => {}
                Err(e) => return self.failure_outcome(e, Some(&mapping)).await,
            }
        }

        self.register_outbound(&event.content, &event.author.name).await;
        JobOutcome::Done
    }

    async fn deliver_update_workaround(
        &self,
        job: &DeliveryJob,
        adapter: &Arc<dyn PlatformAdapter>,
        webhook: Option<&WebhookCredentials>,
    ) -> JobOutcome {
        let mapping = match self.lookup_mapping(job).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => return JobOutcome::Done,
            Err(reason) => return JobOutcome::Retry(reason),
        };

        // Credentials may have vanished since routing; an in-place edit is
        // the only option left then.
        let Some(credentials) = webhook else {
            return self.deliver_update_direct(job, adapter, None).await;
        };

        let event = &job.event;
        let url = jump_link(
            &self.fluxer_web_base_url,
            job.target.guild_id.as_deref(),
            &job.target.channel_id,
            &mapping.dest_message_id,
        );
        let body = edit_workaround_body(event.content.trim(), &url);
        let breaker = self.breakers.get(job.target.platform.as_str());

        let sent = match classify(
            breaker
                .call(adapter.send_webhook(
                    credentials,
                    &body,
                    &event.author.name,
                    event.author.avatar.as_deref(),
                    Some(&job.target.channel_id),
                ))
                .await,
        ) {
            Ok(sent) => sent,
            Err(e) => return self.failure_outcome(e, Some(&mapping)).await,
        };

        if let Some(update_id) = sent {
            let key = edit_update_key(
                job.pair_id,
                event.source.platform,
                &event.source.message_id,
            );
            match self
                .kv
                .getset_ex(&key, &update_id, self.edit_update_ttl_secs)
                .await
            {
                Ok(Some(previous)) if previous != update_id => {
                    // Supersede the previous workaround post, best effort.
                    if let Err(e) = breaker
                        .call(adapter.delete_webhook_message(credentials, &previous))
                        .await
                    {
                        debug!(error = %e, "could not delete superseded update message");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to track update message"),
            }
        }

        self.register_outbound(&body, &event.author.name).await;
        JobOutcome::Done
    }

    async fn deliver_delete(
        &self,
        job: &DeliveryJob,
        adapter: &Arc<dyn PlatformAdapter>,
        webhook: Option<&WebhookCredentials>,
    ) -> JobOutcome {
        let mapping = match self.lookup_mapping(job).await {
            Ok(Some(mapping)) => mapping,
            Ok(None) => return JobOutcome::Done,
            Err(reason) => return JobOutcome::Retry(reason),
        };

        let breaker = self.breakers.get(job.target.platform.as_str());

        let deleted: Result<(), CallError> = if let Some(credentials) = webhook {
            classify(
                breaker
                    .call(adapter.delete_webhook_message(credentials, &mapping.dest_message_id))
                    .await,
            )
            .map(|_| ())
        } else {
            classify(
                breaker
                    .call(adapter.delete_message(&job.target.channel_id, &mapping.dest_message_id))
                    .await,
            )
        };

        match deleted {
            Ok(()) => {}
            // Already gone on the platform; the cleanup below still applies.
            Err(CallError::Permanent(reason)) => {
                debug!(reason, "destination message already gone");
            }
            Err(e) => return self.failure_outcome(e, None).await,
        }

        let key = edit_update_key(
            job.pair_id,
            job.event.source.platform,
            &job.event.source.message_id,
        );
        match self.kv.get(&key).await {
            Ok(Some(update_id)) => {
                let removed: Result<(), CallError> = if let Some(credentials) = webhook {
                    classify(
                        breaker
                            .call(adapter.delete_webhook_message(credentials, &update_id))
                            .await,
                    )
                    .map(|_| ())
                } else {
                    classify(
                        breaker
                            .call(adapter.delete_message(&job.target.channel_id, &update_id))
                            .await,
                    )
                };
                if let Err(CallError::Retry(reason)) = removed {
                    debug!(reason, "could not delete tracked update message");
                }
                if let Err(e) = self.kv.del(&key).await {
                    warn!(error = %e, "failed to clear update tracker");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to read update tracker"),
        }

        if let Err(e) = self
            .maps
            .delete_mapping(
                mapping.pair_id,
                mapping.source_platform,
                &mapping.source_message_id,
            )
            .await
        {
            return JobOutcome::Retry(format!("mapping delete failed: {e}"));
        }

        debug!(
            pair_id = job.pair_id,
            target = %job.target.platform,
            dest_message_id = %mapping.dest_message_id,
            "destination message deleted"
        );
        JobOutcome::Done
    }
}

#[async_trait]
impl JobHandler<DeliveryJob> for DeliveryWorker {
    async fn handle(&self, envelope: &JobEnvelope<DeliveryJob>) -> JobOutcome {
        let job = &envelope.payload;
        let target = &job.target;

        match self
            .rate_limiter
            .allow(target.platform, &target.channel_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let delay = self
                    .rate_limiter
                    .delay_ms(target.platform, &target.channel_id)
                    .await
                    .unwrap_or(1_000);
                return JobOutcome::RescheduleMs(delay.max(50));
            }
            Err(e) => return JobOutcome::Retry(format!("rate limiter unavailable: {e}")),
        }

        let pair = match self.pairs.get_pair_by_id(job.pair_id).await {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                debug!(pair_id = job.pair_id, "bridge pair gone, dropping job");
                return JobOutcome::Done;
            }
            Err(e) => return JobOutcome::Retry(format!("bridge pair lookup failed: {e}")),
        };

        if !pair.is_active {
            // The supervisor is stopping this worker; park the job so it
            // survives a later re-activation.
            return JobOutcome::RescheduleMs(60_000);
        }

        // Credentials may have been repaired since routing; prefer the
        // freshly loaded ones, keep the routed snapshot as a fallback.
        let webhook = pair
            .webhook_on(target.platform)
            .or_else(|| job.webhook.clone());
        let adapter = self.registry.get(target.platform);

        match job.action {
            DeliveryAction::CreateWithWebhook | DeliveryAction::CreateFallback => {
                self.deliver_create(job, &adapter, webhook.as_ref()).await
            }
            DeliveryAction::UpdateDirect => {
                self.deliver_update_direct(job, &adapter, webhook.as_ref())
                    .await
            }
            DeliveryAction::UpdateWorkaround => {
                self.deliver_update_workaround(job, &adapter, webhook.as_ref())
                    .await
            }
            DeliveryAction::Delete => {
                self.deliver_delete(job, &adapter, webhook.as_ref()).await
            }
        }
    }
}
