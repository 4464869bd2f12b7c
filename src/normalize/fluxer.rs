use serde::Deserialize;

use crate::event::{AttachmentMeta, Author, CanonicalEvent, EventKind, Platform, SourceRef};

use super::{avatar_url, timestamp_ms, NormalizeError};

const CDN_BASE: &str = "https://cdn.fluxer.app";

/// Fluxer's gateway speaks a Discord-compatible dialect; the differences the
/// bridge cares about are the CDN host and the absence of `global_name`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFluxerMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<RawFluxerAuthor>,
    #[serde(default)]
    pub attachments: Vec<RawFluxerAttachment>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFluxerAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFluxerAttachment {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

pub fn normalize(
    raw: &RawFluxerMessage,
    kind: EventKind,
    received_at_ms: i64,
) -> Result<CanonicalEvent, NormalizeError> {
    let author = match (&raw.author, kind) {
        (Some(author), _) => Author {
            name: author.username.clone(),
            avatar: avatar_url(CDN_BASE, &author.id, author.avatar.as_deref()),
        },
        (None, EventKind::MsgDelete) => Author {
            name: String::new(),
            avatar: None,
        },
        (None, _) => return Err(NormalizeError::MissingField("author")),
    };

    let timestamp = raw
        .edited_timestamp
        .as_deref()
        .or(raw.timestamp.as_deref());

    Ok(CanonicalEvent {
        kind,
        content: raw.content.clone().unwrap_or_default(),
        author,
        source: SourceRef {
            platform: Platform::Fluxer,
            message_id: raw.id.clone(),
            channel_id: raw.channel_id.clone(),
            guild_id: raw.guild_id.clone(),
        },
        attachments: raw
            .attachments
            .iter()
            .map(|a| AttachmentMeta {
                url: a.url.clone(),
                filename: a.filename.clone(),
                content_type: a.content_type.clone(),
                size: a.size,
            })
            .collect(),
        timestamp_ms: timestamp_ms(timestamp, received_at_ms)?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize;

    #[test]
    fn create_payload_normalizes_with_fluxer_cdn() {
        let raw = json!({
            "id": "900",
            "channel_id": "901",
            "content": "hey",
            "author": {"id": "7", "username": "bob", "avatar": "a_wave"},
            "timestamp": "2024-05-01T12:00:00Z"
        });

        let event = normalize::normalize(Platform::Fluxer, EventKind::MsgCreate, &raw, 0)
            .expect("normalize");

        assert_eq!(event.source.platform, Platform::Fluxer);
        assert_eq!(event.author.name, "bob");
        assert_eq!(
            event.author.avatar.as_deref(),
            Some("https://cdn.fluxer.app/avatars/7/a_wave.gif")
        );
        assert!(event.source.guild_id.is_none());
    }

    #[test]
    fn delete_payload_needs_only_identity() {
        let raw = json!({"id": "900", "channel_id": "901"});
        let event = normalize::normalize(Platform::Fluxer, EventKind::MsgDelete, &raw, 123)
            .expect("normalize");
        assert_eq!(event.source.message_id, "900");
        assert_eq!(event.timestamp_ms, 123);
    }
}
