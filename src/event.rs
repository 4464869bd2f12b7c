use serde::{Deserialize, Serialize};

/// The two bridged chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Discord,
    Fluxer,
}

impl Platform {
    /// The counterpart side of a bridge pair.
    pub fn other(self) -> Self {
        match self {
            Platform::Discord => Platform::Fluxer,
            Platform::Fluxer => Platform::Discord,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Discord => "discord",
            Platform::Fluxer => "fluxer",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(Platform::Discord),
            "fluxer" => Ok(Platform::Fluxer),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MsgCreate,
    MsgUpdate,
    MsgDelete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Identity of the message on the platform it originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub platform: Platform,
    pub message_id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/// Platform-agnostic representation of a message create/update/delete.
///
/// Events travel through the ingest queue as JSON, so every field is serde
/// round-trippable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub kind: EventKind,
    pub content: String,
    pub author: Author,
    pub source: SourceRef,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    pub timestamp_ms: i64,
}
