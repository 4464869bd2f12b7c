use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Namespace prefix for every transient key the bridge owns.
pub const NAMESPACE: &str = "janus";

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),
    #[error("kv command error: {0}")]
    Command(String),
}

/// The slice of key-value semantics the pipeline relies on. Strings carry
/// TTLs, lists back the durable queues, and the sorted set backs delayed
/// re-queues. The redis implementation is authoritative; [`MemoryKv`] mirrors
/// it for tests.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError>;
    /// `SET key value NX EX ttl`; returns whether the key was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, KvError>;
    /// `SET key value EX ttl GET`; returns the previous value.
    async fn getset_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;
    async fn exists(&self, key: &str) -> Result<bool, KvError>;
    async fn incr(&self, key: &str) -> Result<i64, KvError>;
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError>;
    /// Remaining TTL in milliseconds, `None` when the key is absent or has
    /// no expiry.
    async fn ttl_ms(&self, key: &str) -> Result<Option<u64>, KvError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn lpush(&self, key: &str, value: &str) -> Result<(), KvError>;
    /// `LMOVE src dst LEFT RIGHT`: pops the head of `src`, appends it to
    /// `dst`, returns the moved element.
    async fn lmove_head(&self, src: &str, dst: &str) -> Result<Option<String>, KvError>;
    /// Removes every occurrence of `value` from the list.
    async fn lrem(&self, key: &str, value: &str) -> Result<(), KvError>;
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError>;
    async fn llen(&self, key: &str) -> Result<u64, KvError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError>;
    /// Pops up to `limit` members with `score <= max_score`, lowest first.
    async fn zpop_due(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>, KvError>;
}

/// Redis-backed store shared by every worker in the process.
#[derive(Clone)]
pub struct RedisKv {
    manager: ConnectionManager,
}

impl RedisKv {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url.to_string())
            .map_err(|e| KvError::Connection(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { manager })
    }
}

fn command_err(e: redis::RedisError) -> KvError {
    KvError::Command(e.to_string())
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(command_err)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.set_ex(key, value, ttl_secs).await.map_err(command_err)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(command_err)?;
        Ok(reply.is_some())
    }

    async fn getset_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .arg("GET")
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await.map_err(command_err)
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.manager.clone();
        conn.exists(key).await.map_err(command_err)
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut conn = self.manager.clone();
        conn.incr(key, 1).await.map_err(command_err)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.expire::<_, ()>(key, ttl_secs as i64)
            .await
            .map_err(command_err)
    }

    async fn ttl_ms(&self, key: &str) -> Result<Option<u64>, KvError> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err)?;
        if ttl < 0 {
            Ok(None)
        } else {
            Ok(Some(ttl as u64))
        }
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(key, value).await.map_err(command_err)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(key, value).await.map_err(command_err)
    }

    async fn lmove_head(&self, src: &str, dst: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.manager.clone();
        redis::cmd("LMOVE")
            .arg(src)
            .arg(dst)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut conn)
            .await
            .map_err(command_err)
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.lrem::<_, _, ()>(key, 0, value).await.map_err(command_err)
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.ltrim::<_, ()>(key, start as isize, stop as isize)
            .await
            .map_err(command_err)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        conn.lrange(key, start as isize, stop as isize)
            .await
            .map_err(command_err)
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        let mut conn = self.manager.clone();
        conn.llen(key).await.map_err(command_err)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut conn = self.manager.clone();
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(command_err)
    }

    async fn zpop_due(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>, KvError> {
        let mut conn = self.manager.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(command_err)?;
        for member in &due {
            conn.zrem::<_, _, ()>(key, member).await.map_err(command_err)?;
        }
        Ok(due)
    }
}

#[derive(Default)]
struct MemoryInner {
    strings: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, Vec<(f64, String)>>,
}

impl MemoryInner {
    fn live_string(&mut self, key: &str) -> Option<&(String, Option<Instant>)> {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(deadline))) if *deadline <= Instant::now()
        );
        if expired {
            self.strings.remove(key);
        }
        self.strings.get(key)
    }
}

/// In-process [`KvStore`] with the same observable semantics as redis, used
/// by the test suites so the pipeline can run without a server.
#[derive(Default)]
pub struct MemoryKv {
    inner: Mutex<MemoryInner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.live_string(key).map(|(v, _)| v.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        self.inner
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.live_string(key).is_some() {
            return Ok(false);
        }
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(true)
    }

    async fn getset_ex(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<Option<String>, KvError> {
        let mut inner = self.inner.lock().unwrap();
        let previous = inner.live_string(key).map(|(v, _)| v.clone());
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        inner
            .strings
            .insert(key.to_string(), (value.to_string(), Some(deadline)));
        Ok(previous)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut inner = self.inner.lock().unwrap();
        inner.strings.remove(key);
        inner.lists.remove(key);
        inner.zsets.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, KvError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.live_string(key).is_some() || inner.lists.contains_key(key))
    }

    async fn incr(&self, key: &str) -> Result<i64, KvError> {
        let mut inner = self.inner.lock().unwrap();
        let next = match inner.live_string(key) {
            Some((value, _)) => value
                .parse::<i64>()
                .map_err(|_| KvError::Command("value is not an integer".to_string()))?
                + 1,
            None => 1,
        };
        let expiry = inner.strings.get(key).and_then(|(_, deadline)| *deadline);
        inner
            .strings
            .insert(key.to_string(), (next.to_string(), expiry));
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.strings.get_mut(key) {
            entry.1 = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn ttl_ms(&self, key: &str) -> Result<Option<u64>, KvError> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.live_string(key).and_then(|(_, deadline)| {
            deadline.map(|d| d.saturating_duration_since(Instant::now()).as_millis() as u64)
        }))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.inner
            .lock()
            .unwrap()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_back(value.to_string());
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.inner
            .lock()
            .unwrap()
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn lmove_head(&self, src: &str, dst: &str) -> Result<Option<String>, KvError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(value) = inner.lists.get_mut(src).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        inner
            .lists
            .entry(dst.to_string())
            .or_default()
            .push_back(value.clone());
        Ok(Some(value))
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<(), KvError> {
        if let Some(list) = self.inner.lock().unwrap().lists.get_mut(key) {
            list.retain(|v| v != value);
        }
        Ok(())
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), KvError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(list) = inner.lists.get_mut(key) {
            let len = list.len() as i64;
            let clamp = |i: i64| -> usize {
                let i = if i < 0 { len + i } else { i };
                i.clamp(0, len) as usize
            };
            let (start, stop) = (clamp(start), clamp(stop));
            let kept: VecDeque<String> = list
                .iter()
                .enumerate()
                .filter(|(i, _)| *i >= start && *i <= stop)
                .map(|(_, v)| v.clone())
                .collect();
            *list = kept;
        }
        Ok(())
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, KvError> {
        let inner = self.inner.lock().unwrap();
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as i64;
        let clamp = |i: i64| -> i64 {
            let i = if i < 0 { len + i } else { i };
            i.clamp(0, len.max(0))
        };
        let (start, stop) = (clamp(start), clamp(stop));
        Ok(list
            .iter()
            .enumerate()
            .filter(|(i, _)| (*i as i64) >= start && (*i as i64) <= stop)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn llen(&self, key: &str) -> Result<u64, KvError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .lists
            .get(key)
            .map_or(0, |l| l.len() as u64))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
        let mut inner = self.inner.lock().unwrap();
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|(_, m)| m != member);
        set.push((score, member.to_string()));
        set.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(())
    }

    async fn zpop_due(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> Result<Vec<String>, KvError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(Vec::new());
        };
        let due: Vec<String> = set
            .iter()
            .filter(|(score, _)| *score <= max_score)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect();
        set.retain(|(_, m)| !due.contains(m));
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_respects_existing_keys() {
        let kv = MemoryKv::new();
        assert!(kv.set_nx_ex("k", "1", 10).await.unwrap());
        assert!(!kv.set_nx_ex("k", "2", 10).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn getset_swaps_and_returns_previous() {
        let kv = MemoryKv::new();
        assert_eq!(kv.getset_ex("k", "a", 10).await.unwrap(), None);
        assert_eq!(
            kv.getset_ex("k", "b", 10).await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn incr_counts_from_one() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("n").await.unwrap(), 1);
        assert_eq!(kv.incr("n").await.unwrap(), 2);
        assert_eq!(kv.incr("n").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn lmove_claims_in_fifo_order() {
        let kv = MemoryKv::new();
        kv.rpush("q", "a").await.unwrap();
        kv.rpush("q", "b").await.unwrap();

        assert_eq!(
            kv.lmove_head("q", "q:active").await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(
            kv.lmove_head("q", "q:active").await.unwrap().as_deref(),
            Some("b")
        );
        assert_eq!(kv.lmove_head("q", "q:active").await.unwrap(), None);
        assert_eq!(kv.llen("q:active").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn zpop_due_returns_only_ripe_members() {
        let kv = MemoryKv::new();
        kv.zadd("d", "late", 2000.0).await.unwrap();
        kv.zadd("d", "early", 1000.0).await.unwrap();

        assert_eq!(kv.zpop_due("d", 1500.0, 16).await.unwrap(), vec!["early"]);
        assert_eq!(kv.zpop_due("d", 1500.0, 16).await.unwrap(), Vec::<String>::new());
        assert_eq!(kv.zpop_due("d", 2500.0, 16).await.unwrap(), vec!["late"]);
    }
}
