use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::kv::{KvError, KvStore, NAMESPACE};

/// Fingerprint of an outbound message: `SHA-256(content "|" author "|"
/// minute-bucket)`. Bucketing by wall-clock minute collapses the echo of our
/// own send onto the original while letting a human repost the same text in
/// a later minute.
pub fn fingerprint(content: &str, author_name: &str, now_ms: i64) -> String {
    let bucket = now_ms.div_euclid(60_000);
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.update(b"|");
    hasher.update(author_name.as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Short-TTL fingerprint registry that keeps the bridge from re-ingesting
/// its own output. Advisory by design: rare false positives (two humans
/// typing the same short line within a minute) and false negatives (an echo
/// arriving after the TTL) are accepted.
pub struct LoopFilter {
    kv: Arc<dyn KvStore>,
    ttl_secs: u64,
}

impl LoopFilter {
    pub fn new(kv: Arc<dyn KvStore>, ttl_secs: u64) -> Self {
        Self { kv, ttl_secs }
    }

    fn key(hash: &str) -> String {
        format!("{NAMESPACE}:hash:{hash}")
    }

    /// Records an outbound send so the inbound echo is recognized.
    pub async fn register(
        &self,
        content: &str,
        author_name: &str,
        now_ms: i64,
    ) -> Result<(), KvError> {
        let hash = fingerprint(content, author_name, now_ms);
        self.kv
            .set_nx_ex(&Self::key(&hash), "1", self.ttl_secs)
            .await?;
        Ok(())
    }

    /// True when an identical send was registered within the TTL.
    pub async fn hit(
        &self,
        content: &str,
        author_name: &str,
        now_ms: i64,
    ) -> Result<bool, KvError> {
        let hash = fingerprint(content, author_name, now_ms);
        self.kv.exists(&Self::key(&hash)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    const MINUTE_MS: i64 = 60_000;

    #[test]
    fn fingerprint_is_deterministic_within_a_minute() {
        let a = fingerprint("hello", "alice", 10 * MINUTE_MS + 1);
        let b = fingerprint("hello", "alice", 10 * MINUTE_MS + 59_999);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_across_minute_buckets() {
        let a = fingerprint("hello", "alice", 10 * MINUTE_MS);
        let b = fingerprint("hello", "alice", 11 * MINUTE_MS);
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_differs_per_author_and_content() {
        let base = fingerprint("hello", "alice", 0);
        assert_ne!(base, fingerprint("hello", "bob", 0));
        assert_ne!(base, fingerprint("hello!", "alice", 0));
    }

    #[test]
    fn fingerprint_separator_is_not_ambiguous() {
        // "a|b" by "c" must not collide with "a" by "b|c".
        assert_ne!(fingerprint("a|b", "c", 0), fingerprint("a", "b|c", 0));
    }

    proptest::proptest! {
        #[test]
        fn fingerprint_depends_only_on_the_minute_bucket(
            content in ".{0,64}",
            author in "[a-zA-Z0-9_]{1,16}",
            minute in 0i64..1_000_000,
            offset_a in 0i64..60_000,
            offset_b in 0i64..60_000,
        ) {
            let base = minute * MINUTE_MS;
            proptest::prop_assert_eq!(
                fingerprint(&content, &author, base + offset_a),
                fingerprint(&content, &author, base + offset_b)
            );
            proptest::prop_assert_ne!(
                fingerprint(&content, &author, base),
                fingerprint(&content, &author, base + MINUTE_MS)
            );
        }
    }

    #[tokio::test]
    async fn registered_send_drops_the_echo() {
        let filter = LoopFilter::new(Arc::new(MemoryKv::new()), 10);
        let now = 42 * MINUTE_MS;

        assert!(!filter.hit("hello", "alice", now).await.unwrap());
        filter.register("hello", "alice", now).await.unwrap();
        assert!(filter.hit("hello", "alice", now + 500).await.unwrap());
        assert!(!filter.hit("hello", "bob", now + 500).await.unwrap());
    }
}
