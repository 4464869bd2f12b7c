use serde::Deserialize;

use crate::event::{AttachmentMeta, Author, CanonicalEvent, EventKind, Platform, SourceRef};

use super::{avatar_url, timestamp_ms, NormalizeError};

const CDN_BASE: &str = "https://cdn.discordapp.com";

/// The subset of a Discord gateway message payload the bridge consumes.
/// Delete payloads carry identity fields only.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub author: Option<RawDiscordAuthor>,
    #[serde(default)]
    pub attachments: Vec<RawDiscordAttachment>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub edited_timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDiscordAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDiscordAttachment {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

pub fn normalize(
    raw: &RawDiscordMessage,
    kind: EventKind,
    received_at_ms: i64,
) -> Result<CanonicalEvent, NormalizeError> {
    let author = match (&raw.author, kind) {
        (Some(author), _) => Author {
            name: author
                .global_name
                .clone()
                .unwrap_or_else(|| author.username.clone()),
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
            platform: Platform::Discord,
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
    fn create_payload_normalizes() {
        let raw = json!({
            "id": "100",
            "channel_id": "200",
            "guild_id": "300",
            "content": "hello",
            "author": {"id": "1", "username": "alice", "avatar": "abc"},
            "attachments": [
                {"url": "https://cdn.discordapp.com/a/cat.png", "filename": "cat.png", "size": 5}
            ],
            "timestamp": "2024-05-01T12:00:00Z"
        });

        let event = normalize::normalize(Platform::Discord, EventKind::MsgCreate, &raw, 0)
            .expect("normalize");

        assert_eq!(event.content, "hello");
        assert_eq!(event.author.name, "alice");
        assert_eq!(
            event.author.avatar.as_deref(),
            Some("https://cdn.discordapp.com/avatars/1/abc.png")
        );
        assert_eq!(event.source.message_id, "100");
        assert_eq!(event.source.guild_id.as_deref(), Some("300"));
        assert_eq!(event.attachments.len(), 1);
        assert_eq!(event.timestamp_ms, 1_714_564_800_000);
    }

    #[test]
    fn global_name_wins_over_username() {
        let raw = json!({
            "id": "100",
            "channel_id": "200",
            "content": "hi",
            "author": {"id": "1", "username": "alice", "global_name": "Alice A."},
            "timestamp": "2024-05-01T12:00:00Z"
        });

        let event = normalize::normalize(Platform::Discord, EventKind::MsgCreate, &raw, 0)
            .expect("normalize");
        assert_eq!(event.author.name, "Alice A.");
    }

    #[test]
    fn update_prefers_edited_timestamp() {
        let raw = json!({
            "id": "100",
            "channel_id": "200",
            "content": "hi",
            "author": {"id": "1", "username": "alice"},
            "timestamp": "2024-05-01T12:00:00Z",
            "edited_timestamp": "2024-05-01T12:05:00Z"
        });

        let event = normalize::normalize(Platform::Discord, EventKind::MsgUpdate, &raw, 0)
            .expect("normalize");
        assert_eq!(event.timestamp_ms, 1_714_565_100_000);
    }

    #[test]
    fn delete_payload_needs_only_identity() {
        let raw = json!({"id": "100", "channel_id": "200"});

        let event = normalize::normalize(Platform::Discord, EventKind::MsgDelete, &raw, 999)
            .expect("normalize");

        assert_eq!(event.content, "");
        assert_eq!(event.author.name, "");
        assert!(event.attachments.is_empty());
        assert_eq!(event.timestamp_ms, 999);
    }

    #[test]
    fn create_without_author_is_malformed() {
        let raw = json!({"id": "100", "channel_id": "200", "content": "hi"});
        assert!(normalize::normalize(Platform::Discord, EventKind::MsgCreate, &raw, 0).is_err());
    }

    #[test]
    fn normalization_is_a_pure_projection() {
        let raw = json!({
            "id": "100",
            "channel_id": "200",
            "content": "hello",
            "author": {"id": "1", "username": "alice"},
            "timestamp": "2024-05-01T12:00:00Z"
        });

        let once = normalize::normalize(Platform::Discord, EventKind::MsgCreate, &raw, 5)
            .expect("normalize");
        let twice = normalize::normalize(Platform::Discord, EventKind::MsgCreate, &raw, 5)
            .expect("normalize");
        assert_eq!(once, twice);
    }
}
