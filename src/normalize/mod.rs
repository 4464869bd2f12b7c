pub mod discord;
pub mod fluxer;

use chrono::DateTime;
use serde_json::Value;

use crate::event::{CanonicalEvent, EventKind, Platform};

pub use self::discord::{RawDiscordAuthor, RawDiscordMessage};
pub use self::fluxer::{RawFluxerAuthor, RawFluxerMessage};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed {platform} payload: {source}")]
    Malformed {
        platform: Platform,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unparseable timestamp `{0}`")]
    BadTimestamp(String),
}

/// Translates a raw gateway payload into a [`CanonicalEvent`].
///
/// `received_at_ms` is the wall-clock fallback for payloads that carry no
/// timestamp of their own (deletes in particular), keeping the function a
/// pure projection of its inputs.
pub fn normalize(
    platform: Platform,
    kind: EventKind,
    raw: &Value,
    received_at_ms: i64,
) -> Result<CanonicalEvent, NormalizeError> {
    match platform {
        Platform::Discord => {
            let message: RawDiscordMessage = serde_json::from_value(raw.clone())
                .map_err(|source| NormalizeError::Malformed { platform, source })?;
            discord::normalize(&message, kind, received_at_ms)
        }
        Platform::Fluxer => {
            let message: RawFluxerMessage = serde_json::from_value(raw.clone())
                .map_err(|source| NormalizeError::Malformed { platform, source })?;
            fluxer::normalize(&message, kind, received_at_ms)
        }
    }
}

/// Parses an RFC 3339 timestamp into epoch milliseconds. Events without a
/// timestamp (deletes) fall back to `received_at_ms`.
pub(crate) fn timestamp_ms(
    raw: Option<&str>,
    received_at_ms: i64,
) -> Result<i64, NormalizeError> {
    match raw {
        None => Ok(received_at_ms),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|ts| ts.timestamp_millis())
            .map_err(|_| NormalizeError::BadTimestamp(value.to_string())),
    }
}

/// Resolves an avatar field that is either a full URL (passed through) or a
/// CDN hash. Animated hashes carry the platform's `a_` prefix and resolve to
/// a gif, everything else to a png.
pub(crate) fn avatar_url(cdn_base: &str, user_id: &str, avatar: Option<&str>) -> Option<String> {
    let hash = avatar?;
    if hash.starts_with("http://") || hash.starts_with("https://") {
        return Some(hash.to_string());
    }
    let ext = if hash.starts_with("a_") { "gif" } else { "png" };
    Some(format!("{cdn_base}/avatars/{user_id}/{hash}.{ext}"))
}
